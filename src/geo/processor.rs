use crate::core::item::{ItemProcessor, ItemProcessorResult};

use super::model::Country;

/// Keeps the first calling code of a country as its calling code.
#[derive(Default)]
pub struct CountryProcessor;

impl ItemProcessor<Country, Country> for CountryProcessor {
    fn process(&self, item: &Country) -> ItemProcessorResult<Country> {
        let calling_code = item
            .calling_code
            .clone()
            .or_else(|| item.calling_codes.first().cloned());

        Ok(Some(Country {
            calling_code,
            ..item.clone()
        }))
    }
}
