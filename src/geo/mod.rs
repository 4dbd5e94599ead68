//! The geographic reference data job: countries and cities loaded into a
//! SQLite store, then extracted as locations.

/// The four steps of the job, wired together.
pub mod job;

/// Binders, row mappers and statements between the records and the store.
pub mod mapping;

/// Countries and cities.
pub mod model;

pub mod processor;

/// Tables of the store.
pub mod schema;

pub use job::run_geo_job;
pub use model::{City, Country};
