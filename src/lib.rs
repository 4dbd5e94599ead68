#![cfg_attr(docsrs, feature(doc_cfg))]

/*!
 # geo-batch

 A chunk-oriented batch job runner, and the job loading geographic
 reference data (countries and cities) that it was built for.

 ## Core Concepts

- **Job:** an ordered sequence of steps. A step starts only once the previous
  one completed, and the first failing step halts the job.
- **Step:** reads items, processes them and writes them chunk by chunk. Each
  chunk is written and committed as one unit, or rolled back.
- **ItemReader:** the input of a step, one item at a time.
- **ItemProcessor:** transforms an item, or filters it out as a skip.
- **ItemWriter:** the output of a step, one chunk at a time, with `flush` as
  the commit of the chunk and `rollback` as its abort.
- **JobRepository:** where runs and step executions are checkpointed, so that
  a failed run can be resumed at its first step that did not complete.

 ## Features

| **Feature**   | **Description**                                                   |
|---------------|-------------------------------------------------------------------|
| csv           | Enables the CSV `ItemReader`                                      |
| json          | Enables the JSON `ItemReader` and `ItemWriter`                    |
| rdbc-sqlite   | Enables the SQLite `ItemReader`, `ItemWriter` and `JobRepository` |
| mongodb       | Enables the MongoDB `ItemWriter`                                  |
| geo           | Enables the countries and cities job and its configuration        |
| cli           | Builds the `geo-batch` binary                                     |
| full          | Enables all available features                                    |

 ## Getting Started

```rust
# use std::cell::RefCell;
# use serde::Deserialize;
# use geo_batch::{
#     core::{
#         item::{ItemWriter, ItemWriterResult},
#         job::{Job, JobBuilder},
#         repository::InMemoryJobRepository,
#         step::StepBuilder,
#     },
#     item::csv::CsvItemReaderBuilder,
#     BatchError,
# };
#[derive(Deserialize, Debug, Clone)]
struct City {
    name: String,
    population: u32,
}

#[derive(Default)]
struct CityNames(RefCell<Vec<String>>);

impl ItemWriter<City> for CityNames {
    fn write(&self, items: &[City]) -> ItemWriterResult {
        self.0
            .borrow_mut()
            .extend(items.iter().map(|city| city.name.clone()));
        Ok(())
    }
}

fn main() -> Result<(), BatchError> {
    let csv = "name,population
    Zagreb,767131
    Split,160577
    Rijeka,107964";

    let reader = CsvItemReaderBuilder::new()
        .has_headers(true)
        .from_reader(csv.as_bytes());
    let writer = CityNames::default();

    let step = StepBuilder::new("load-cities")
        .chunk::<City, City>(2)
        .reader(&reader)
        .writer(&writer)
        .pass_through()
        .build()?;

    let repository = InMemoryJobRepository::new();
    let job = JobBuilder::new()
        .name("cities".to_string())
        .repository(&repository)
        .start(&step)
        .build()?;

    let execution = job.run(false)?;

    assert!(execution.is_completed());
    assert_eq!(execution.step_executions[0].write_count, 3);
    assert_eq!(writer.0.borrow().as_slice(), ["Zagreb", "Split", "Rijeka"]);
    Ok(())
}
```

 ## License
 Licensed under either of

 -   Apache License, Version 2.0
     ([LICENSE-APACHE](LICENSE-APACHE) or <http://www.apache.org/licenses/LICENSE-2.0>)
 -   MIT license
     ([LICENSE-MIT](LICENSE-MIT) or <http://opensource.org/licenses/MIT>)

 at your option.
 */

/// Core module for batch operations
pub mod core;

/// Error types for batch operations
pub mod error;

#[doc(inline)]
pub use error::*;

/// Set of items readers / writers (CSV, JSON, SQLite, MongoDB)
pub mod item;

#[cfg(feature = "geo")]
/// Configuration of the geo job
pub mod config;

#[cfg(feature = "geo")]
/// The countries and cities job
pub mod geo;
