use async_trait::async_trait;
use serde_json::{Number, Value};

use crate::database_ops::fetcher::{records_from, SourceFetcher};
use crate::database_ops::session::Candidate;
use crate::model::{RawRecord, Retailer};

/// emap coordinates above this are micro-degrees rather than degrees.
const SCALED_COORD_THRESHOLD: f64 = 1000.0;
const COORD_SCALE: f64 = 1_000_000.0;

/// 7-ELEVEN store lookup (ibon retail inquiry).
///
/// Endpoints, in order:
/// - GET /retail_inquiry.aspx?city=..&district=..&page=1
/// - GET /api/retail/stores?city=..&area=..
///
/// Responses are either a bare array or an object wrapping the array in `stores`, `data`
/// or `GeoPosition`. The emap shape uses `POIID`/`POIName`/`Telno` and scaled `X`/`Y`.
#[derive(Debug, Clone)]
pub struct SevenElevenFetcher {
    base_url: String,
}

impl SevenElevenFetcher {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl SourceFetcher for SevenElevenFetcher {
    fn retailer(&self) -> Retailer {
        Retailer::SevenEleven
    }

    fn candidates(&self, region: &str, sub_region: Option<&str>) -> Vec<Candidate> {
        let mut inquiry = Candidate::new(format!("{}/retail_inquiry.aspx", self.base_url)).param("city", region);
        let mut api = Candidate::new(format!("{}/api/retail/stores", self.base_url)).param("city", region);
        if let Some(district) = sub_region {
            inquiry = inquiry.param("district", district);
            api = api.param("area", district);
        }
        vec![inquiry.param("page", "1"), api]
    }

    fn parse(&self, body: &Value) -> Option<Vec<RawRecord>> {
        let mut records = records_from(body, &["stores", "data", "GeoPosition"])?;
        for record in &mut records {
            unscale(record, "X");
            unscale(record, "Y");
        }
        Some(records)
    }
}

fn unscale(record: &mut RawRecord, key: &str) {
    let Some(v) = record.first_f64(&[key]) else {
        return;
    };
    if v.abs() > SCALED_COORD_THRESHOLD {
        if let Some(n) = Number::from_f64(v / COORD_SCALE) {
            record.insert(key, Value::Number(n));
        }
    }
}
