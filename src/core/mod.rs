#[cfg(feature = "rdbc-sqlite")]
use std::future::Future;

use rand::distr::{Alphanumeric, SampleString};

#[cfg(feature = "rdbc-sqlite")]
use crate::BatchError;

pub mod chunk;

pub mod item;

pub mod job;

pub mod repository;

pub mod step;

/// Generates a random name consisting of alphanumeric characters.
///
/// # Returns
///
/// A `String` containing the generated random name.
fn build_name() -> String {
    Alphanumeric.sample_string(&mut rand::rng(), 8)
}

/// Runs a future to completion from synchronous batch code.
///
/// Readers, writers and the job repository expose a blocking API; the
/// database drivers underneath are async. The caller must run inside a
/// multi-threaded tokio runtime.
#[cfg(feature = "rdbc-sqlite")]
pub(crate) fn block_on<F: Future>(future: F) -> Result<F::Output, BatchError> {
    let handle = tokio::runtime::Handle::try_current()
        .map_err(|error| BatchError::Configuration(format!("no tokio runtime: {}", error)))?;

    Ok(tokio::task::block_in_place(|| handle.block_on(future)))
}
