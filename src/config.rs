use std::{collections::HashMap, fs, path::Path, path::PathBuf};

use serde::Deserialize;

use crate::{
    geo::job::{CITIES_TO_DB, COUNTRIES_TO_DB, EXTRACT_TO_JSON, LOCATIONS_TO_MONGO, STEP_NAMES},
    BatchError,
};

/// Configuration of the geo job, read from a JSON document.
///
/// ```json
/// {
///   "countries_input": "data/countries.json",
///   "cities_input": "data/worldcities.csv",
///   "output": "out/countries.json",
///   "steps": { "cities-to-db": { "chunk_size": 500, "skip_limit": 10 } }
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    pub countries_input: PathBuf,
    pub cities_input: PathBuf,
    pub output: PathBuf,
    /// Store loaded by the job
    #[serde(default = "default_database_url")]
    pub database_url: String,
    /// Store of the job and step executions
    #[serde(default = "default_repository_url")]
    pub repository_url: String,
    #[serde(default)]
    pub mongodb: MongodbConfig,
    #[serde(default)]
    pub steps: HashMap<String, StepConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MongodbConfig {
    #[serde(default = "default_mongodb_uri")]
    pub uri: String,
    #[serde(default = "default_mongodb_database")]
    pub database: String,
    #[serde(default = "default_mongodb_collection")]
    pub collection: String,
}

impl Default for MongodbConfig {
    fn default() -> Self {
        Self {
            uri: default_mongodb_uri(),
            database: default_mongodb_database(),
            collection: default_mongodb_collection(),
        }
    }
}

/// Overrides of the settings of one step. Missing values keep the defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepConfig {
    pub chunk_size: Option<usize>,
    pub skip_limit: Option<usize>,
    pub retry_limit: Option<usize>,
}

/// Effective settings of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepSettings {
    pub chunk_size: usize,
    pub skip_limit: usize,
    /// Total number of write attempts of a chunk
    pub retry_limit: usize,
}

fn default_database_url() -> String {
    "sqlite://geo.db".to_string()
}

fn default_repository_url() -> String {
    "sqlite://batch.db".to_string()
}

fn default_mongodb_uri() -> String {
    "mongodb://localhost:27017".to_string()
}

fn default_mongodb_database() -> String {
    "geo".to_string()
}

fn default_mongodb_collection() -> String {
    "locations".to_string()
}

fn default_chunk_size(step: &str) -> usize {
    match step {
        COUNTRIES_TO_DB => 100,
        CITIES_TO_DB => 1000,
        EXTRACT_TO_JSON => 10,
        LOCATIONS_TO_MONGO => 100,
        _ => 10,
    }
}

impl AppConfig {
    /// Reads and validates the configuration file at `path`.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, BatchError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|error| {
            BatchError::Configuration(format!("unable to read {}: {}", path.display(), error))
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, BatchError> {
        let config: AppConfig = serde_json::from_str(content)
            .map_err(|error| BatchError::Configuration(error.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), BatchError> {
        for (name, step) in &self.steps {
            if !STEP_NAMES.contains(&name.as_str()) {
                return Err(BatchError::Configuration(format!(
                    "unknown step {}, expected one of {}",
                    name,
                    STEP_NAMES.join(", ")
                )));
            }
            if step.chunk_size == Some(0) {
                return Err(BatchError::Configuration(format!(
                    "chunk_size of step {} must be at least 1",
                    name
                )));
            }
            if step.retry_limit == Some(0) {
                return Err(BatchError::Configuration(format!(
                    "retry_limit of step {} must be at least 1",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Settings of the step named `name`, overrides applied.
    pub fn step(&self, name: &str) -> StepSettings {
        let overrides = self.steps.get(name).cloned().unwrap_or_default();

        StepSettings {
            chunk_size: overrides.chunk_size.unwrap_or_else(|| default_chunk_size(name)),
            skip_limit: overrides.skip_limit.unwrap_or(0),
            retry_limit: overrides.retry_limit.unwrap_or(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    const MINIMAL: &str = r#"{
        "countries_input": "countries.json",
        "cities_input": "cities.csv",
        "output": "out.json"
    }"#;

    #[test]
    fn missing_settings_should_take_defaults() {
        let config = AppConfig::parse(MINIMAL).unwrap();

        assert_eq!(config.database_url, "sqlite://geo.db");
        assert_eq!(config.repository_url, "sqlite://batch.db");
        assert_eq!(config.mongodb.collection, "locations");
        assert_eq!(config.step(COUNTRIES_TO_DB).chunk_size, 100);
        assert_eq!(config.step(CITIES_TO_DB).chunk_size, 1000);
        assert_eq!(config.step(EXTRACT_TO_JSON).chunk_size, 10);
        assert_eq!(
            config.step(LOCATIONS_TO_MONGO),
            StepSettings {
                chunk_size: 100,
                skip_limit: 0,
                retry_limit: 1
            }
        );
    }

    #[test]
    fn step_overrides_should_apply_to_their_step_only() {
        let config = AppConfig::parse(
            r#"{
                "countries_input": "countries.json",
                "cities_input": "cities.csv",
                "output": "out.json",
                "mongodb": { "database": "world" },
                "steps": { "cities-to-db": { "chunk_size": 250, "skip_limit": 3 } }
            }"#,
        )
        .unwrap();

        assert_eq!(
            config.step(CITIES_TO_DB),
            StepSettings {
                chunk_size: 250,
                skip_limit: 3,
                retry_limit: 1
            }
        );
        assert_eq!(config.step(COUNTRIES_TO_DB).chunk_size, 100);
        assert_eq!(config.mongodb.database, "world");
        assert_eq!(config.mongodb.uri, "mongodb://localhost:27017");
    }

    #[test]
    fn zero_chunk_size_or_retry_limit_should_be_rejected() {
        for step in [r#"{ "chunk_size": 0 }"#, r#"{ "retry_limit": 0 }"#] {
            let content = format!(
                r#"{{ "countries_input": "a", "cities_input": "b", "output": "c",
                     "steps": {{ "countries-to-db": {} }} }}"#,
                step
            );

            assert!(matches!(
                AppConfig::parse(&content),
                Err(BatchError::Configuration(_))
            ));
        }
    }

    #[test]
    fn unknown_step_should_be_rejected() {
        let content = r#"{ "countries_input": "a", "cities_input": "b", "output": "c",
            "steps": { "cities-to-mongo": { "chunk_size": 10 } } }"#;

        match AppConfig::parse(content) {
            Err(BatchError::Configuration(message)) => assert!(message.contains("cities-to-mongo")),
            other => panic!("expected a configuration error, got {:?}", other),
        }
    }

    #[test]
    fn missing_input_should_be_rejected() {
        let content = r#"{ "cities_input": "b", "output": "c" }"#;

        assert!(matches!(
            AppConfig::parse(content),
            Err(BatchError::Configuration(_))
        ));
    }

    #[test]
    fn config_should_be_read_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();

        let config = AppConfig::from_file(file.path()).unwrap();

        assert_eq!(config.output, PathBuf::from("out.json"));
        assert!(AppConfig::from_file("/nonexistent/config.json").is_err());
    }
}
