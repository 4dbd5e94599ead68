//! CSV support for reading tabular data.
//!
//! The [`CsvItemReader`](csv_reader::CsvItemReader) deserializes each row
//! into a Rust struct with serde. Like the loaders of flat files found in
//! most batch toolkits it can skip a header line, keep only some columns of
//! every row and name the kept columns itself, which is how the cities of
//! a wide world-cities extract are loaded:
//!
//! ```
//! use geo_batch::core::item::ItemReader;
//! use geo_batch::item::csv::csv_reader::CsvItemReaderBuilder;
//! use serde::Deserialize;
//!
//! #[derive(Debug, Deserialize)]
//! struct City {
//!     name: String,
//!     lat: f32,
//!     lng: f32,
//!     iso3: String,
//! }
//!
//! let data = "\
//! city,city_ascii,lat,lng,country,iso2,iso3
//! Tokyo,Tokyo,35.6897,139.6922,Japan,JP,JPN
//! ";
//!
//! let reader = CsvItemReaderBuilder::new()
//!     .has_headers(true)
//!     .included_fields(&[0, 2, 3, 6])
//!     .names(&["name", "lat", "lng", "iso3"])
//!     .from_reader(data.as_bytes());
//!
//! let city: City = reader.read().unwrap().unwrap();
//! assert_eq!(city.name, "Tokyo");
//! assert_eq!(city.iso3, "JPN");
//! assert!(ItemReader::<City>::read(&reader).unwrap().is_none());
//! ```

/// A module providing facilities for reading CSV data records.
pub mod csv_reader;

pub use csv_reader::{CsvItemReader, CsvItemReaderBuilder};
