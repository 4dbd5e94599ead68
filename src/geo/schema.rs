use log::debug;
use sqlx::SqlitePool;

use crate::BatchError;

const SCHEMA: [&str; 3] = [
    r#"
    CREATE TABLE IF NOT EXISTS countries (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        alpha2code TEXT,
        alpha3code TEXT NOT NULL UNIQUE,
        calling_code TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS cities (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        lat REAL NOT NULL,
        lng REAL NOT NULL,
        country_id INTEGER NOT NULL REFERENCES countries (id),
        UNIQUE (name, lat, lng, country_id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS cities_country_id ON cities (country_id)",
];

/// Creates the `countries` and `cities` tables when missing.
///
/// Both tables carry a natural unique key, so loading a file again, or a
/// chunk again after a restart, inserts nothing twice.
pub async fn init_schema(pool: &SqlitePool) -> Result<(), BatchError> {
    for statement in SCHEMA {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(|error| BatchError::Configuration(format!("schema creation failed: {}", error)))?;
    }
    debug!("Geo schema ready");
    Ok(())
}
