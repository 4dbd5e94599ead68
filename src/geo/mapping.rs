use sqlx::{query_builder::Separated, sqlite::SqliteRow, Row, Sqlite};

use crate::{
    item::rdbc::{DatabaseItemBinder, RdbcRowMapper},
    BatchError,
};

use super::model::{City, Country};

/// Suffix of the countries insert: a country already loaded is left as is.
pub const COUNTRIES_SUFFIX: &str = " ON CONFLICT (alpha3code) DO NOTHING";

/// The cities insert resolves the country of each city from its alpha3 code.
/// A city of an unknown country matches no country and inserts no row.
pub const CITIES_PREFIX: &str = "SELECT v.column1, v.column2, v.column3, c.id FROM (";
pub const CITIES_SUFFIX: &str =
    ") v JOIN countries c ON c.alpha3code = v.column4 WHERE true ON CONFLICT DO NOTHING";

/// Countries having at least one city, each with its cities as a JSON array.
pub const COUNTRIES_WITH_CITIES: &str = r#"
    SELECT c.id, c.name, c.alpha2code, c.alpha3code, c.calling_code,
        (SELECT json_group_array(json_object('name', ct.name, 'lat', ct.lat, 'lng', ct.lng))
            FROM (SELECT name, lat, lng FROM cities WHERE country_id = c.id ORDER BY id) ct
        ) AS cities
    FROM countries c
    WHERE EXISTS (SELECT 1 FROM cities WHERE country_id = c.id)
    ORDER BY c.id"#;

pub struct CountryBinder;

impl DatabaseItemBinder<Country, Sqlite> for CountryBinder {
    fn bind(&self, item: &Country, mut query_builder: Separated<Sqlite, &str>) {
        query_builder.push_bind(item.name.clone());
        query_builder.push_bind(item.alpha2_code.clone());
        query_builder.push_bind(item.alpha3_code.clone());
        query_builder.push_bind(item.calling_code.clone());
    }
}

pub struct CityBinder;

impl DatabaseItemBinder<City, Sqlite> for CityBinder {
    fn bind(&self, item: &City, mut query_builder: Separated<Sqlite, &str>) {
        query_builder.push_bind(item.name.clone());
        query_builder.push_bind(item.lat);
        query_builder.push_bind(item.lng);
        query_builder.push_bind(item.alpha3_code.clone());
    }
}

/// Maps a row of [`COUNTRIES_WITH_CITIES`].
pub struct CountryRowMapper;

fn column<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T, BatchError>
where
    T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    row.try_get(name)
        .map_err(|error| BatchError::ItemReader(format!("column {}: {}", name, error)))
}

impl RdbcRowMapper<Country, Sqlite> for CountryRowMapper {
    fn map_row(&self, row: &SqliteRow) -> Result<Country, BatchError> {
        let id: i64 = column(row, "id")?;
        let cities: String = column(row, "cities")?;
        let cities: Vec<City> = serde_json::from_str(&cities).map_err(|error| {
            BatchError::ItemReader(format!("cities of country {}: {}", id, error))
        })?;

        Ok(Country {
            id,
            name: column(row, "name")?,
            alpha2_code: column(row, "alpha2code")?,
            alpha3_code: column(row, "alpha3code")?,
            calling_code: column(row, "calling_code")?,
            calling_codes: Vec::new(),
            cities,
        })
    }
}

#[cfg(feature = "mongodb")]
mod locations {
    use mongodb::bson::{doc, Document};

    use crate::item::mongodb::MongodbKeyMapper;

    use super::Country;

    /// Identifies a location document by the alpha3 code of its country.
    pub struct CountryKeyMapper;

    impl MongodbKeyMapper<Country> for CountryKeyMapper {
        fn key(&self, item: &Country) -> Document {
            doc! { "alpha3Code": item.alpha3_code.clone() }
        }
    }
}

#[cfg(feature = "mongodb")]
pub use locations::CountryKeyMapper;
