use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use anyhow::bail;
use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Attribute key carrying a record's provenance.
pub const SOURCE_TYPE_KEY: &str = "sourceType";
pub const SERVICES_KEY: &str = "services";
pub const HOURS_KEY: &str = "hours";

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Retailer {
    SevenEleven,
    FamilyMart,
}

impl fmt::Display for Retailer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Retailer {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "seven-eleven" | "711" | "7-eleven" => Self::SevenEleven,
            "family-mart" | "family" | "familymart" => Self::FamilyMart,
            _ => bail!("unknown retailer: {s}"),
        })
    }
}

impl Retailer {
    pub fn all() -> Vec<Self> {
        vec![Retailer::SevenEleven, Retailer::FamilyMart]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::SevenEleven => "7-ELEVEN",
            Self::FamilyMart => "全家",
        }
    }

    pub fn slug(&self) -> &'static str {
        match self {
            Self::SevenEleven => "seven-eleven",
            Self::FamilyMart => "family-mart",
        }
    }

    /// Tag the cart system uses to tell feeds apart.
    pub fn feed_type(&self) -> &'static str {
        match self {
            Self::SevenEleven => "711",
            Self::FamilyMart => "family",
        }
    }

    /// Prefix for store codes this pipeline derives or synthesizes.
    pub fn code_prefix(&self) -> &'static str {
        match self {
            Self::SevenEleven => "711",
            Self::FamilyMart => "FM",
        }
    }

    pub fn table_name(&self) -> &'static str {
        match self {
            Self::SevenEleven => "seven_eleven_stores",
            Self::FamilyMart => "family_mart_stores",
        }
    }

    pub fn artifact_name(&self) -> &'static str {
        match self {
            Self::SevenEleven => "cart_stores_711.json",
            Self::FamilyMart => "cart_stores_family.json",
        }
    }

    /// Opening hours assumed when a source omits them.
    pub fn default_hours(&self) -> Option<&'static str> {
        match self {
            Self::SevenEleven => None,
            Self::FamilyMart => Some("24小時"),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Sourced,
    Synthetic,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sourced => "sourced",
            Self::Synthetic => "synthetic",
        }
    }

    pub fn parse(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("synthetic") {
            Self::Synthetic
        } else {
            Self::Sourced
        }
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One store as a source returned it. Field names and value shapes vary by retailer
/// and endpoint, so the record is kept as an untyped JSON object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRecord(pub Map<String, Value>);

impl RawRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps a JSON value if it is an object.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// First non-empty value among `keys`, rendered as a trimmed string.
    /// Numbers are accepted and printed in their JSON form.
    pub fn first_str(&self, keys: &[&str]) -> Option<String> {
        keys.iter().find_map(|key| match self.0.get(*key)? {
            Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
    }

    /// First value among `keys` that reads as a finite float (numbers or numeric strings).
    pub fn first_f64(&self, keys: &[&str]) -> Option<f64> {
        keys.iter().find_map(|key| {
            let v = self.0.get(*key)?;
            let parsed = match v {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            };
            parsed.filter(|f| f.is_finite())
        })
    }

    pub fn provenance(&self) -> Provenance {
        self.first_str(&[SOURCE_TYPE_KEY])
            .map(|s| Provenance::parse(&s))
            .unwrap_or(Provenance::Sourced)
    }
}

/// Canonical, retailer-scoped store row keyed by `store_code`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreRecord {
    pub store_code: String,
    pub store_name: String,
    pub region: String,
    pub sub_region: Option<String>,
    pub address: String,
    pub phone: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub attributes: BTreeMap<String, String>,
    pub updated_at: DateTime<Utc>,
}

impl StoreRecord {
    pub fn provenance(&self) -> Provenance {
        self.attributes
            .get(SOURCE_TYPE_KEY)
            .map(|s| Provenance::parse(s))
            .unwrap_or(Provenance::Sourced)
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Sort key used by every ordered listing: region, sub-region (absent first), name.
    pub fn listing_key(&self) -> (&str, Option<&str>, &str) {
        (
            self.region.as_str(),
            self.sub_region.as_deref(),
            self.store_name.as_str(),
        )
    }
}
