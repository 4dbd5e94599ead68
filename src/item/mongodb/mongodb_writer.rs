use log::debug;
use mongodb::{bson::Document, sync::Collection};
use serde::Serialize;

use crate::{
    core::item::{ItemWriter, ItemWriterResult},
    BatchError,
};

/// Gives the filter identifying the document of an item.
pub trait MongodbKeyMapper<W> {
    fn key(&self, item: &W) -> Document;
}

/// Upserts items into a MongoDB collection.
///
/// Every item replaces the document matching its key, or is inserted when
/// there is none, so a chunk written again after a failure or by a resumed
/// job never duplicates documents.
pub struct MongodbItemWriter<'a, W: Send + Sync> {
    collection: &'a Collection<W>,
    key_mapper: &'a dyn MongodbKeyMapper<W>,
}

impl<W: Serialize + Send + Sync> ItemWriter<W> for MongodbItemWriter<'_, W> {
    fn write(&self, items: &[W]) -> ItemWriterResult {
        for item in items {
            let key = self.key_mapper.key(item);

            self.collection
                .replace_one(key, item)
                .upsert(true)
                .run()
                .map_err(|error| BatchError::ItemWriter(error.to_string()))?;
        }

        debug!(
            "Upserted {} documents into {}",
            items.len(),
            self.collection.name()
        );
        Ok(())
    }
}

#[derive(Default)]
pub struct MongodbItemWriterBuilder<'a, W: Send + Sync> {
    collection: Option<&'a Collection<W>>,
    key_mapper: Option<&'a dyn MongodbKeyMapper<W>>,
}

impl<'a, W: Send + Sync> MongodbItemWriterBuilder<'a, W> {
    pub fn new() -> Self {
        Self {
            collection: None,
            key_mapper: None,
        }
    }

    pub fn collection(mut self, collection: &'a Collection<W>) -> MongodbItemWriterBuilder<'a, W> {
        self.collection = Some(collection);
        self
    }

    pub fn key_mapper(
        mut self,
        key_mapper: &'a dyn MongodbKeyMapper<W>,
    ) -> MongodbItemWriterBuilder<'a, W> {
        self.key_mapper = Some(key_mapper);
        self
    }

    pub fn build(self) -> Result<MongodbItemWriter<'a, W>, BatchError> {
        let missing = |what: &str| {
            BatchError::Configuration(format!("{} is required for a MongoDB writer", what))
        };

        Ok(MongodbItemWriter {
            collection: self.collection.ok_or_else(|| missing("A collection"))?,
            key_mapper: self.key_mapper.ok_or_else(|| missing("A key mapper"))?,
        })
    }
}
