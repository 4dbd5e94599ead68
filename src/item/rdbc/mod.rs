use sqlx::{query_builder::Separated, Database};

use crate::BatchError;

/// This module contains the paged SQLite reader implementation.
pub mod sqlite_reader;

/// This module contains the transactional SQLite writer implementation.
pub mod sqlite_writer;

/// Trait for binding item data to database query parameters.
///
/// This trait is generic over the database type so that binders read like
/// the SQLx query builder they feed.
///
/// # Examples
///
/// ```
/// use geo_batch::item::rdbc::DatabaseItemBinder;
/// use sqlx::{query_builder::Separated, Sqlite};
///
/// struct City {
///     name: String,
///     lat: f32,
/// }
///
/// struct CityBinder;
/// impl DatabaseItemBinder<City, Sqlite> for CityBinder {
///     fn bind(&self, item: &City, mut query_builder: Separated<Sqlite, &str>) {
///         query_builder.push_bind(item.name.clone());
///         query_builder.push_bind(item.lat);
///     }
/// }
/// ```
pub trait DatabaseItemBinder<O, DB: Database> {
    /// Binds the properties of an item to a separated query builder.
    ///
    /// # Arguments
    ///
    /// * `item` - The item whose properties should be bound.
    /// * `query_builder` - The separated query builder to bind parameters to.
    fn bind(&self, item: &O, query_builder: Separated<DB, &str>);
}

/// Maps one row of a query result to an item.
///
/// A mapping error is reported by the reader as `BatchError::ItemReader`
/// and does not stop the stream.
pub trait RdbcRowMapper<T, DB: Database> {
    fn map_row(&self, row: &DB::Row) -> Result<T, BatchError>;
}

pub use sqlite_reader::{SqliteItemReader, SqliteItemReaderBuilder};
pub use sqlite_writer::SqliteItemWriter;
