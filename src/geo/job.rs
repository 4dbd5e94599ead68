use log::info;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;

use crate::{
    config::AppConfig,
    core::{
        item::ItemWriter,
        job::{Job, JobBuilder, JobExecution},
        repository::JobRepository,
        step::StepBuilder,
    },
    item::{
        csv::CsvItemReaderBuilder,
        json::{JsonItemReaderBuilder, JsonItemWriterBuilder},
        rdbc::{SqliteItemReaderBuilder, SqliteItemWriter},
    },
    BatchError,
};

use super::{
    mapping::{
        CityBinder, CountryBinder, CountryRowMapper, CITIES_PREFIX, CITIES_SUFFIX,
        COUNTRIES_SUFFIX, COUNTRIES_WITH_CITIES,
    },
    model::{City, Country},
    processor::CountryProcessor,
};

pub const COUNTRIES_TO_DB: &str = "countries-to-db";
pub const CITIES_TO_DB: &str = "cities-to-db";
pub const EXTRACT_TO_JSON: &str = "extract-to-json";
pub const LOCATIONS_TO_MONGO: &str = "locations-to-mongo";

/// Steps of the job, in execution order.
pub const STEP_NAMES: [&str; 4] = [COUNTRIES_TO_DB, CITIES_TO_DB, EXTRACT_TO_JSON, LOCATIONS_TO_MONGO];

/// Columns of the cities file kept by the cities step: name, lat, lng, iso3.
const CITY_FIELDS: [usize; 4] = [0, 2, 3, 6];
const CITY_NAMES: [&str; 4] = ["name", "lat", "lng", "alpha3Code"];

/// Loads countries and cities into the store, then extracts the countries
/// having cities to a JSON file and to the locations writer.
///
/// Steps run in this order:
/// 1. `countries-to-db`: countries file into the `countries` table
/// 2. `cities-to-db`: cities file into the `cities` table
/// 3. `extract-to-json`: countries with their cities into the output file
/// 4. `locations-to-mongo`: the same countries into `locations`
///
/// The two last steps read what the two first ones committed. Their
/// readers query the store on their first read only.
///
/// The schema must exist in `pool` and the caller must run inside a
/// multi-threaded tokio runtime.
pub fn run_geo_job(
    config: &AppConfig,
    pool: &SqlitePool,
    repository: &dyn JobRepository,
    locations: &dyn ItemWriter<Country>,
    job_name: &str,
    resume: bool,
    cancellation: CancellationToken,
) -> Result<JobExecution, BatchError> {
    // countries-to-db
    let countries_reader =
        JsonItemReaderBuilder::<Country>::new().from_path(&config.countries_input)?;
    let country_processor = CountryProcessor;
    let countries_writer = SqliteItemWriter::<Country>::new()
        .pool(pool)
        .table("countries")
        .add_column("name")
        .add_column("alpha2code")
        .add_column("alpha3code")
        .add_column("calling_code")
        .item_binder(&CountryBinder)
        .values_suffix(COUNTRIES_SUFFIX);

    let settings = config.step(COUNTRIES_TO_DB);
    let countries_to_db = StepBuilder::new(COUNTRIES_TO_DB)
        .chunk::<Country, Country>(settings.chunk_size)
        .reader(&countries_reader)
        .processor(&country_processor)
        .writer(&countries_writer)
        .skip_limit(settings.skip_limit)
        .retry_limit(settings.retry_limit)
        .build()?;

    // cities-to-db
    let cities_reader = CsvItemReaderBuilder::new()
        .has_headers(true)
        .included_fields(&CITY_FIELDS)
        .names(&CITY_NAMES)
        .from_path(&config.cities_input)?;
    let cities_writer = SqliteItemWriter::<City>::new()
        .pool(pool)
        .table("cities")
        .add_column("name")
        .add_column("lat")
        .add_column("lng")
        .add_column("country_id")
        .item_binder(&CityBinder)
        .values_prefix(CITIES_PREFIX)
        .values_suffix(CITIES_SUFFIX);

    let settings = config.step(CITIES_TO_DB);
    let cities_to_db = StepBuilder::new(CITIES_TO_DB)
        .chunk::<City, City>(settings.chunk_size)
        .reader(&cities_reader)
        .writer(&cities_writer)
        .pass_through()
        .skip_limit(settings.skip_limit)
        .retry_limit(settings.retry_limit)
        .build()?;

    // extract-to-json
    let settings = config.step(EXTRACT_TO_JSON);
    let extract_reader = SqliteItemReaderBuilder::new()
        .pool(pool)
        .query(COUNTRIES_WITH_CITIES)
        .page_size(settings.chunk_size as i64)
        .row_mapper(&CountryRowMapper)
        .build()?;
    let json_writer = JsonItemWriterBuilder::new()
        .pretty_formatter(true)
        .from_path(&config.output);

    let extract_to_json = StepBuilder::new(EXTRACT_TO_JSON)
        .chunk::<Country, Country>(settings.chunk_size)
        .reader(&extract_reader)
        .writer(&json_writer)
        .pass_through()
        .skip_limit(settings.skip_limit)
        .retry_limit(settings.retry_limit)
        .build()?;

    // locations-to-mongo
    let settings = config.step(LOCATIONS_TO_MONGO);
    let locations_reader = SqliteItemReaderBuilder::new()
        .pool(pool)
        .query(COUNTRIES_WITH_CITIES)
        .page_size(settings.chunk_size as i64)
        .row_mapper(&CountryRowMapper)
        .build()?;

    let locations_to_mongo = StepBuilder::new(LOCATIONS_TO_MONGO)
        .chunk::<Country, Country>(settings.chunk_size)
        .reader(&locations_reader)
        .writer(locations)
        .pass_through()
        .skip_limit(settings.skip_limit)
        .retry_limit(settings.retry_limit)
        .build()?;

    let job = JobBuilder::new()
        .name(job_name.to_string())
        .repository(repository)
        .cancellation_token(cancellation)
        .start(&countries_to_db)
        .next(&cities_to_db)
        .next(&extract_to_json)
        .next(&locations_to_mongo)
        .build()?;

    info!(
        "Job {} wired: countries from {}, cities from {}, output to {}",
        job_name,
        config.countries_input.display(),
        config.cities_input.display(),
        config.output.display()
    );

    job.run(resume)
}
