/// This module contains the MongoDB writer implementation.
pub mod mongodb_writer;

pub use mongodb_writer::{MongodbItemWriter, MongodbItemWriterBuilder, MongodbKeyMapper};
