use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
};

use log::debug;
use sqlx::{sqlite::SqliteRow, Pool, QueryBuilder, Sqlite};

use crate::{
    core::{
        block_on,
        item::{ItemReader, ItemReaderResult},
    },
    BatchError,
};

use super::RdbcRowMapper;

const DEFAULT_PAGE_SIZE: i64 = 10;

/// Reads the rows of a query page by page.
///
/// Each page is fetched by appending `LIMIT page_size OFFSET n` to the
/// query, so the query must order its rows in a stable way (`ORDER BY` on
/// a unique key). No query runs before the first call to `read`: a reader
/// built before a step starts sees what the previous steps committed.
pub struct SqliteItemReader<'a, T> {
    pool: &'a Pool<Sqlite>,
    query: &'a str,
    page_size: i64,
    offset: Cell<i64>,
    row_mapper: &'a dyn RdbcRowMapper<T, Sqlite>,
    buffer: RefCell<VecDeque<SqliteRow>>,
    exhausted: Cell<bool>,
}

impl<T> SqliteItemReader<'_, T> {
    fn read_page(&self) -> Result<(), BatchError> {
        let offset = self.offset.get();

        let rows = block_on(async {
            let mut query_builder = QueryBuilder::<Sqlite>::new(self.query);
            query_builder.push(" LIMIT ");
            query_builder.push_bind(self.page_size);
            query_builder.push(" OFFSET ");
            query_builder.push_bind(offset);

            query_builder.build().fetch_all(self.pool).await
        })?
        .map_err(|error| BatchError::ItemReaderFatal(format!("SQLite read failed: {}", error)))?;

        debug!("Fetched {} rows at offset {}", rows.len(), offset);

        let fetched = rows.len() as i64;
        if fetched < self.page_size {
            self.exhausted.set(true);
        }
        self.offset.set(offset + fetched);
        self.buffer.borrow_mut().extend(rows);
        Ok(())
    }
}

impl<T> ItemReader<T> for SqliteItemReader<'_, T> {
    fn read(&self) -> ItemReaderResult<T> {
        if self.buffer.borrow().is_empty() && !self.exhausted.get() {
            self.read_page()?;
        }

        let row = self.buffer.borrow_mut().pop_front();

        match row {
            Some(row) => self.row_mapper.map_row(&row).map(Some),
            None => Ok(None),
        }
    }
}

#[derive(Default)]
pub struct SqliteItemReaderBuilder<'a, T> {
    pool: Option<&'a Pool<Sqlite>>,
    query: Option<&'a str>,
    page_size: Option<i64>,
    row_mapper: Option<&'a dyn RdbcRowMapper<T, Sqlite>>,
}

impl<'a, T> SqliteItemReaderBuilder<'a, T> {
    pub fn new() -> Self {
        Self {
            pool: None,
            query: None,
            page_size: None,
            row_mapper: None,
        }
    }

    /// Number of rows fetched per query, 10 by default.
    pub fn page_size(mut self, page_size: i64) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn query(mut self, query: &'a str) -> Self {
        self.query = Some(query);
        self
    }

    pub fn pool(mut self, pool: &'a Pool<Sqlite>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn row_mapper(mut self, row_mapper: &'a dyn RdbcRowMapper<T, Sqlite>) -> Self {
        self.row_mapper = Some(row_mapper);
        self
    }

    pub fn build(self) -> Result<SqliteItemReader<'a, T>, BatchError> {
        let missing =
            |what: &str| BatchError::Configuration(format!("{} is required for a SQLite reader", what));

        let page_size = self.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
        if page_size < 1 {
            return Err(BatchError::Configuration(
                "page size of a SQLite reader must be at least 1".to_string(),
            ));
        }

        Ok(SqliteItemReader {
            pool: self.pool.ok_or_else(|| missing("A pool"))?,
            query: self.query.ok_or_else(|| missing("A query"))?,
            page_size,
            offset: Cell::new(0),
            row_mapper: self.row_mapper.ok_or_else(|| missing("A row mapper"))?,
            buffer: RefCell::new(VecDeque::new()),
            exhausted: Cell::new(false),
        })
    }
}

#[cfg(test)]
mod tests {
    use sqlx::{sqlite::SqliteConnectOptions, Row, SqlitePool};
    use tempfile::TempDir;

    use super::*;

    struct NameMapper;

    impl RdbcRowMapper<String, Sqlite> for NameMapper {
        fn map_row(&self, row: &SqliteRow) -> Result<String, BatchError> {
            let name: String = row
                .try_get("name")
                .map_err(|error| BatchError::ItemReader(error.to_string()))?;
            if name.is_empty() {
                return Err(BatchError::ItemReader("empty name".to_string()));
            }
            Ok(name)
        }
    }

    async fn pool_with_names(names: &[&str]) -> (TempDir, SqlitePool) {
        let dir = tempfile::tempdir().unwrap();
        let options = SqliteConnectOptions::new()
            .filename(dir.path().join("reader.db"))
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await.unwrap();

        sqlx::query("CREATE TABLE countries (id INTEGER PRIMARY KEY, name TEXT NOT NULL)")
            .execute(&pool)
            .await
            .unwrap();
        for name in names {
            sqlx::query("INSERT INTO countries (name) VALUES (?)")
                .bind(*name)
                .execute(&pool)
                .await
                .unwrap();
        }

        (dir, pool)
    }

    fn read_all(reader: &SqliteItemReader<String>) -> Vec<String> {
        let mut names = Vec::new();
        while let Some(name) = reader.read().unwrap() {
            names.push(name);
        }
        names
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rows_should_be_read_across_pages() {
        let names = ["Austria", "Belgium", "Croatia", "Denmark", "Estonia"];
        let (_dir, pool) = pool_with_names(&names).await;

        for page_size in [1, 2, 5, 10] {
            let reader = SqliteItemReaderBuilder::new()
                .pool(&pool)
                .query("SELECT name FROM countries ORDER BY id")
                .page_size(page_size)
                .row_mapper(&NameMapper)
                .build()
                .unwrap();

            assert_eq!(read_all(&reader), names);
            assert!(reader.read().unwrap().is_none());
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn query_should_run_on_first_read_only() {
        let (_dir, pool) = pool_with_names(&["Austria"]).await;

        let reader = SqliteItemReaderBuilder::new()
            .pool(&pool)
            .query("SELECT name FROM countries ORDER BY id")
            .row_mapper(&NameMapper)
            .build()
            .unwrap();

        sqlx::query("INSERT INTO countries (name) VALUES ('Belgium')")
            .execute(&pool)
            .await
            .unwrap();

        assert_eq!(read_all(&reader), vec!["Austria", "Belgium"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn mapping_error_should_not_stop_the_stream() {
        let (_dir, pool) = pool_with_names(&["Austria", "", "Croatia"]).await;

        let reader = SqliteItemReaderBuilder::new()
            .pool(&pool)
            .query("SELECT name FROM countries ORDER BY id")
            .page_size(2)
            .row_mapper(&NameMapper)
            .build()
            .unwrap();

        assert_eq!(reader.read().unwrap(), Some("Austria".to_string()));
        assert!(matches!(reader.read(), Err(BatchError::ItemReader(_))));
        assert_eq!(reader.read().unwrap(), Some("Croatia".to_string()));
        assert_eq!(reader.read().unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn invalid_query_should_be_a_read_error() {
        let (_dir, pool) = pool_with_names(&[]).await;

        let reader = SqliteItemReaderBuilder::new()
            .pool(&pool)
            .query("SELECT name FROM unknown_table ORDER BY id")
            .row_mapper(&NameMapper)
            .build()
            .unwrap();

        assert!(matches!(reader.read(), Err(BatchError::ItemReaderFatal(_))));
    }

    #[test]
    fn builder_should_reject_missing_pool() {
        let result = SqliteItemReaderBuilder::<String>::new()
            .query("SELECT name FROM countries ORDER BY id")
            .row_mapper(&NameMapper)
            .build();

        assert!(matches!(result, Err(BatchError::Configuration(_))));
    }
}
