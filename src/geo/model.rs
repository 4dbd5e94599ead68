use serde::{Deserialize, Serialize};

/// A country, as read from the countries file and extracted with its cities.
///
/// Keys are camelCase on both sides (`alpha3Code`, `callingCode`). The
/// database id is never read nor written as JSON and `callingCodes` is only
/// read: the first calling code is kept as `callingCode`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Country {
    #[serde(skip)]
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub alpha2_code: Option<String>,
    pub alpha3_code: String,
    #[serde(default)]
    pub calling_code: Option<String>,
    #[serde(default, skip_serializing)]
    pub calling_codes: Vec<String>,
    #[serde(default)]
    pub cities: Vec<City>,
}

/// A city of the cities file.
///
/// `alpha3Code` links the city to its country while loading and is not
/// part of the extracted documents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct City {
    #[serde(skip)]
    pub id: i64,
    pub name: String,
    pub lat: f32,
    pub lng: f32,
    #[serde(default, skip_serializing)]
    pub alpha3_code: String,
}
