#![allow(dead_code)]

mod mocks;

use std::{cell::RefCell, path::PathBuf};

use geo_batch::core::item::{ItemWriter, ItemWriterResult};

pub use mocks::MockFile;

/// Routes the crate's logs to the test output, once per test binary.
pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn data_path(file: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("data")
        .join(file)
}

/// Keeps committed items in memory, in commit order.
pub struct RecordingWriter<T> {
    pending: RefCell<Vec<T>>,
    committed: RefCell<Vec<T>>,
}

impl<T> Default for RecordingWriter<T> {
    fn default() -> Self {
        Self {
            pending: RefCell::new(Vec::new()),
            committed: RefCell::new(Vec::new()),
        }
    }
}

impl<T: Clone> RecordingWriter<T> {
    pub fn committed(&self) -> Vec<T> {
        self.committed.borrow().clone()
    }
}

impl<T: Clone> ItemWriter<T> for RecordingWriter<T> {
    fn write(&self, items: &[T]) -> ItemWriterResult {
        self.pending.borrow_mut().extend_from_slice(items);
        Ok(())
    }

    fn flush(&self) -> ItemWriterResult {
        let mut pending = self.pending.borrow_mut();
        self.committed.borrow_mut().append(&mut pending);
        Ok(())
    }

    fn rollback(&self) -> ItemWriterResult {
        self.pending.borrow_mut().clear();
        Ok(())
    }
}
