#[cfg(feature = "csv")]
/// This module provides a CSV item reader.
pub mod csv;

#[cfg(feature = "json")]
/// This module provides a streaming JSON item reader and a JSON array item writer.
pub mod json;

#[cfg(feature = "rdbc-sqlite")]
/// This module provides a paged SQLite item reader and a transactional SQLite item writer.
pub mod rdbc;

#[cfg(feature = "mongodb")]
/// This module provides a MongoDB upserting item writer.
pub mod mongodb;
