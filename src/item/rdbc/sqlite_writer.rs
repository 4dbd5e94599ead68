use std::cell::RefCell;

use log::{debug, error};
use sqlx::{Pool, QueryBuilder, Sqlite, Transaction};

use crate::core::block_on;
use crate::core::item::{ItemWriter, ItemWriterResult};
use crate::item::rdbc::DatabaseItemBinder;
use crate::BatchError;

// Default maximum number of host parameters of a SQLite statement
const BIND_LIMIT: usize = 32766;

/// Inserts items into a SQLite table, one transaction per chunk.
///
/// `write` opens the transaction of the chunk when needed and runs the
/// inserts inside it, split into several statements when the chunk holds
/// more parameters than SQLite accepts in one. `flush` commits the
/// transaction and `rollback` discards it, so a chunk is either entirely
/// visible or not at all.
///
/// The statement is `INSERT INTO table (columns) <prefix> VALUES (...), ...
/// <suffix>`. The prefix and suffix turn it into an `INSERT ... SELECT` or
/// add an `ON CONFLICT` clause:
///
/// ```no_run
/// # use geo_batch::item::rdbc::{DatabaseItemBinder, SqliteItemWriter};
/// # use sqlx::{query_builder::Separated, Sqlite, SqlitePool};
/// # struct City { name: String, country: String }
/// # struct CityBinder;
/// # impl DatabaseItemBinder<City, Sqlite> for CityBinder {
/// #     fn bind(&self, item: &City, mut query_builder: Separated<Sqlite, &str>) {
/// #         query_builder.push_bind(item.name.clone());
/// #         query_builder.push_bind(item.country.clone());
/// #     }
/// # }
/// # fn build(pool: &SqlitePool) {
/// let writer = SqliteItemWriter::<City>::new()
///     .pool(pool)
///     .table("cities")
///     .add_column("name")
///     .add_column("country_id")
///     .item_binder(&CityBinder)
///     .values_prefix("SELECT v.column1, c.id FROM (")
///     .values_suffix(") v JOIN countries c ON c.alpha3code = v.column2 WHERE true");
/// # }
/// ```
pub struct SqliteItemWriter<'a, O> {
    pool: Option<&'a Pool<Sqlite>>,
    table: Option<&'a str>,
    columns: Vec<&'a str>,
    item_binder: Option<&'a dyn DatabaseItemBinder<O, Sqlite>>,
    values_prefix: Option<&'a str>,
    values_suffix: Option<&'a str>,
    transaction: RefCell<Option<Transaction<'static, Sqlite>>>,
}

impl<'a, O> SqliteItemWriter<'a, O> {
    pub fn new() -> Self {
        Self {
            pool: None,
            table: None,
            columns: Vec::new(),
            item_binder: None,
            values_prefix: None,
            values_suffix: None,
            transaction: RefCell::new(None),
        }
    }

    pub fn pool(mut self, pool: &'a Pool<Sqlite>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn table(mut self, table: &'a str) -> Self {
        self.table = Some(table);
        self
    }

    pub fn add_column(mut self, column: &'a str) -> Self {
        self.columns.push(column);
        self
    }

    pub fn item_binder(mut self, item_binder: &'a dyn DatabaseItemBinder<O, Sqlite>) -> Self {
        self.item_binder = Some(item_binder);
        self
    }

    /// SQL placed between the column list and `VALUES`.
    pub fn values_prefix(mut self, prefix: &'a str) -> Self {
        self.values_prefix = Some(prefix);
        self
    }

    /// SQL placed after the last row of `VALUES`.
    pub fn values_suffix(mut self, suffix: &'a str) -> Self {
        self.values_suffix = Some(suffix);
        self
    }

    fn insert<'q>(
        &self,
        table: &str,
        item_binder: &dyn DatabaseItemBinder<O, Sqlite>,
        items: &[O],
    ) -> QueryBuilder<'q, Sqlite> {
        let mut query_builder = QueryBuilder::new("INSERT INTO ");
        query_builder.push(table);
        query_builder.push(" (");
        query_builder.push(self.columns.join(","));
        query_builder.push(") ");

        if let Some(prefix) = self.values_prefix {
            query_builder.push(prefix);
        }

        query_builder.push_values(items, |b, item| {
            item_binder.bind(item, b);
        });

        if let Some(suffix) = self.values_suffix {
            query_builder.push(suffix);
        }

        query_builder
    }

    fn end_transaction(&self, commit: bool) -> ItemWriterResult {
        let transaction = self.transaction.borrow_mut().take();

        let Some(transaction) = transaction else {
            return Ok(());
        };

        let result = block_on(async {
            if commit {
                transaction.commit().await
            } else {
                transaction.rollback().await
            }
        })?;

        result.map_err(|error| {
            BatchError::ItemWriter(format!(
                "SQLite {} failed: {}",
                if commit { "commit" } else { "rollback" },
                error
            ))
        })
    }
}

impl<O> Default for SqliteItemWriter<'_, O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O> ItemWriter<O> for SqliteItemWriter<'_, O> {
    fn write(&self, items: &[O]) -> ItemWriterResult {
        if items.is_empty() {
            return Ok(());
        }

        let missing =
            |what: &str| BatchError::Configuration(format!("{} is required for a SQLite writer", what));
        let pool = self.pool.ok_or_else(|| missing("A pool"))?;
        let table = self.table.ok_or_else(|| missing("A table"))?;
        let item_binder = self.item_binder.ok_or_else(|| missing("An item binder"))?;
        if self.columns.is_empty() {
            return Err(missing("A column"));
        }

        let rows_per_statement = (BIND_LIMIT / self.columns.len()).max(1);
        let mut slot = self.transaction.borrow_mut();

        let result = block_on(async {
            let mut transaction = match slot.take() {
                Some(transaction) => transaction,
                None => pool.begin().await?,
            };

            for batch in items.chunks(rows_per_statement) {
                let mut query_builder = self.insert(table, item_binder, batch);
                let executed = query_builder.build().execute(&mut *transaction).await;
                if let Err(error) = executed {
                    // Dropping the statements already run for this chunk
                    if let Err(rollback_error) = transaction.rollback().await {
                        error!("SQLite rollback failed: {}", rollback_error);
                    }
                    return Err(error);
                }
            }

            *slot = Some(transaction);
            Ok::<(), sqlx::Error>(())
        })?;

        match result {
            Ok(()) => {
                debug!("Staged {} items into SQLite table {}", items.len(), table);
                Ok(())
            }
            Err(error) => {
                error!("Failed to write items to SQLite table {}: {}", table, error);
                Err(BatchError::ItemWriter(format!("SQLite write failed: {}", error)))
            }
        }
    }

    fn flush(&self) -> ItemWriterResult {
        self.end_transaction(true)
    }

    fn rollback(&self) -> ItemWriterResult {
        self.end_transaction(false)
    }

    fn close(&self) -> ItemWriterResult {
        // A step that failed between write and flush leaves a transaction behind.
        self.end_transaction(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::item::ItemWriter;
    use sqlx::{
        query_builder::Separated,
        sqlite::{SqliteConnectOptions, SqliteJournalMode},
        Sqlite, SqlitePool,
    };
    use tempfile::TempDir;

    #[derive(Clone, Debug, PartialEq)]
    struct TestCity {
        name: String,
        country: String,
    }

    fn city(name: &str, country: &str) -> TestCity {
        TestCity {
            name: name.to_string(),
            country: country.to_string(),
        }
    }

    struct TestCityBinder;
    impl DatabaseItemBinder<TestCity, Sqlite> for TestCityBinder {
        fn bind(&self, item: &TestCity, mut query_builder: Separated<Sqlite, &str>) {
            query_builder.push_bind(item.name.clone());
            query_builder.push_bind(item.country.clone());
        }
    }

    async fn setup_test_db() -> (TempDir, SqlitePool) {
        let dir = tempfile::tempdir().unwrap();
        let options = SqliteConnectOptions::new()
            .filename(dir.path().join("writer.db"))
            .journal_mode(SqliteJournalMode::Wal)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await.unwrap();

        sqlx::query(
            r#"
            CREATE TABLE countries (id INTEGER PRIMARY KEY, alpha3code TEXT NOT NULL UNIQUE);
            INSERT INTO countries (alpha3code) VALUES ('HRV'), ('JPN');
            CREATE TABLE cities (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                country_id INTEGER NOT NULL REFERENCES countries(id),
                UNIQUE (name, country_id)
            );
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();

        (dir, pool)
    }

    fn city_writer(pool: &SqlitePool) -> SqliteItemWriter<'_, TestCity> {
        SqliteItemWriter::new()
            .pool(pool)
            .table("cities")
            .add_column("name")
            .add_column("country_id")
            .item_binder(&TestCityBinder)
            .values_prefix("SELECT v.column1, c.id FROM (")
            .values_suffix(
                ") v JOIN countries c ON c.alpha3code = v.column2 WHERE true ON CONFLICT DO NOTHING",
            )
    }

    async fn count(pool: &SqlitePool) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM cities")
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn chunk_should_be_visible_after_flush_only() {
        let (_dir, pool) = setup_test_db().await;
        let writer = city_writer(&pool);

        writer
            .write(&[city("Zagreb", "HRV"), city("Tokyo", "JPN")])
            .unwrap();
        assert_eq!(count(&pool).await, 0);

        writer.flush().unwrap();
        assert_eq!(count(&pool).await, 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rolled_back_chunk_should_leave_no_row() {
        let (_dir, pool) = setup_test_db().await;
        let writer = city_writer(&pool);

        writer.write(&[city("Zagreb", "HRV")]).unwrap();
        writer.rollback().unwrap();
        writer.flush().unwrap();

        assert_eq!(count(&pool).await, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn city_of_unknown_country_should_insert_no_row() {
        let (_dir, pool) = setup_test_db().await;
        let writer = city_writer(&pool);

        writer
            .write(&[city("Zagreb", "HRV"), city("Atlantis", "ATL")])
            .unwrap();
        writer.flush().unwrap();

        let names: Vec<String> = sqlx::query_scalar("SELECT name FROM cities ORDER BY id")
            .fetch_all(&pool)
            .await
            .unwrap();
        assert_eq!(names, vec!["Zagreb"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rewritten_chunk_should_not_duplicate_rows() {
        let (_dir, pool) = setup_test_db().await;
        let writer = city_writer(&pool);

        for _ in 0..2 {
            writer
                .write(&[city("Zagreb", "HRV"), city("Split", "HRV")])
                .unwrap();
            writer.flush().unwrap();
        }

        assert_eq!(count(&pool).await, 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_statement_should_discard_the_whole_chunk() {
        let (_dir, pool) = setup_test_db().await;
        let writer = SqliteItemWriter::new()
            .pool(&pool)
            .table("cities")
            .add_column("name")
            .add_column("country_id")
            .item_binder(&TestCityBinder);

        // The second row violates UNIQUE (name, country_id).
        let result = writer.write(&[city("Zagreb", "1"), city("Zagreb", "1")]);

        assert!(matches!(result, Err(BatchError::ItemWriter(_))));
        writer.flush().unwrap();
        assert_eq!(count(&pool).await, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn empty_chunk_should_not_touch_the_database() {
        let writer = SqliteItemWriter::<TestCity>::new();

        assert!(writer.write(&[]).is_ok());
        assert!(writer.flush().is_ok());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn incomplete_writer_should_be_a_configuration_error() {
        let writer = SqliteItemWriter::<TestCity>::new().table("cities");

        let result = writer.write(&[city("Zagreb", "HRV")]);

        assert!(matches!(result, Err(BatchError::Configuration(_))));
    }
}
