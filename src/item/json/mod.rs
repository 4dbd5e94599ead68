//! JSON support for reading and writing structured data.
//!
//! The module consists of two components, both built on `serde_json`:
//!
//! 1. **JsonItemReader**: a streaming reader of the elements of a JSON
//!    array. Elements are extracted one at a time by tracking nesting and
//!    string literals, so large files never need to fit in memory.
//!
//! 2. **JsonItemWriter**: a writer producing one JSON array. Every chunk is
//!    staged in memory and reaches the output only when the chunk commits.
//!
//! # Examples
//!
//! ```
//! use geo_batch::core::item::{ItemReader, ItemWriter};
//! use geo_batch::item::json::{JsonItemReaderBuilder, JsonItemWriterBuilder};
//! use serde::{Deserialize, Serialize};
//! use std::io::Cursor;
//!
//! #[derive(Debug, Deserialize, Serialize)]
//! #[serde(rename_all = "camelCase")]
//! struct Country {
//!     name: String,
//!     alpha3_code: String,
//! }
//!
//! let input = r#"[{"name": "Croatia", "alpha3Code": "HRV", "region": "Europe"}]"#;
//! let reader = JsonItemReaderBuilder::<Country>::new().from_reader(Cursor::new(input));
//! let writer = JsonItemWriterBuilder::new().from_writer(Vec::new());
//!
//! ItemWriter::<Country>::open(&writer).unwrap();
//! while let Some(country) = reader.read().unwrap() {
//!     writer.write(&[country]).unwrap();
//!     ItemWriter::<Country>::flush(&writer).unwrap();
//! }
//! ItemWriter::<Country>::close(&writer).unwrap();
//!
//! let output = String::from_utf8(writer.into_inner().unwrap()).unwrap();
//! assert_eq!(output, "[{\"name\":\"Croatia\",\"alpha3Code\":\"HRV\"}]\n");
//! ```

/// A module providing facilities for reading JSON data records.
pub mod json_reader;
/// The `json_writer` module contains the `JsonItemWriter` struct, which serializes items into a JSON array.
pub mod json_writer;

// Re-export the main types for easier access
pub use json_reader::{JsonItemReader, JsonItemReaderBuilder};
pub use json_writer::{JsonItemWriter, JsonItemWriterBuilder};
