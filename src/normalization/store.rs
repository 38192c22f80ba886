use std::collections::BTreeMap;

use chrono::Utc;
use serde_json::Value;
use tracing::warn;

use crate::geo::{GeoCatalog, TAIWAN_BBOX};
use crate::model::{RawRecord, Retailer, StoreRecord, HOURS_KEY, SERVICES_KEY, SOURCE_TYPE_KEY};
use crate::normalization::region::district_from_address;

// Alternative spellings per semantic field, highest priority first.
const CODE_KEYS: &[&str] = &["store_code", "storeId", "StoreId", "POIID", "id"];
const NAME_KEYS: &[&str] = &["store_name", "storeName", "POIName", "name"];
const SUB_REGION_KEYS: &[&str] = &["district", "area", "town"];
const ADDRESS_KEYS: &[&str] = &["address", "addr", "Address"];
const PHONE_KEYS: &[&str] = &["phone", "tel", "Telno"];
const LAT_KEYS: &[&str] = &["latitude", "lat", "Y"];
const LNG_KEYS: &[&str] = &["longitude", "lng", "lon", "X"];
const HOURS_KEYS: &[&str] = &["hours", "openHours"];

/// One unit of geography a batch of raw records was collected for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GeoUnit {
    pub retailer: Retailer,
    pub region: String,
    pub region_code: String,
    pub sub_region: Option<String>,
    /// 1-based catalog position of `sub_region`; 0 for region-level units.
    pub sub_index: usize,
}

impl GeoUnit {
    pub fn label(&self) -> String {
        match &self.sub_region {
            Some(sub) => format!("{}-{}", self.region, sub),
            None => self.region.clone(),
        }
    }
}

/// Maps source-shaped [`RawRecord`]s onto the canonical [`StoreRecord`].
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    catalog: GeoCatalog,
}

impl Normalizer {
    pub fn new(catalog: GeoCatalog) -> Self {
        Self { catalog }
    }

    /// Normalize one raw record collected for `unit`. `seq` is the record's position in
    /// its unit and only feeds derived store codes.
    ///
    /// Returns `None` (and logs the raw record) when the record has neither a store code
    /// nor a name, since it could not be keyed.
    pub fn normalize(&self, raw: &RawRecord, unit: &GeoUnit, seq: usize) -> Option<StoreRecord> {
        let retailer = unit.retailer;
        let code = raw.first_str(CODE_KEYS);
        let name = raw.first_str(NAME_KEYS);

        let (store_code, store_name) = match (code, name) {
            (None, None) => {
                let raw_json = Value::Object(raw.0.clone());
                warn!(
                    retailer = %retailer,
                    unit = %unit.label(),
                    raw = %raw_json,
                    "skipping unkeyable record (no store code, no name)"
                );
                return None;
            }
            (Some(code), Some(name)) => (code, name),
            (Some(code), None) => {
                let name = format!("{} {}", retailer.name(), code);
                (code, name)
            }
            (None, Some(name)) => (derived_code(unit, seq), name),
        };

        let address = raw.first_str(ADDRESS_KEYS).unwrap_or_default();
        let sub_region = self.resolve_sub_region(raw, unit, &address);
        let phone = raw.first_str(PHONE_KEYS);
        let (latitude, longitude) = coordinates(raw);

        let mut attributes = BTreeMap::new();
        if let Some(services) = services(raw) {
            attributes.insert(SERVICES_KEY.to_string(), services);
        }
        let hours = raw
            .first_str(HOURS_KEYS)
            .or_else(|| retailer.default_hours().map(str::to_string));
        if let Some(hours) = hours {
            attributes.insert(HOURS_KEY.to_string(), hours);
        }
        attributes.insert(
            SOURCE_TYPE_KEY.to_string(),
            raw.provenance().as_str().to_string(),
        );

        Some(StoreRecord {
            store_code,
            store_name,
            region: unit.region.clone(),
            sub_region,
            address,
            phone,
            latitude,
            longitude,
            attributes,
            updated_at: Utc::now(),
        })
    }

    fn resolve_sub_region(&self, raw: &RawRecord, unit: &GeoUnit, address: &str) -> Option<String> {
        if let Some(sub) = &unit.sub_region {
            return Some(sub.clone());
        }
        raw.first_str(SUB_REGION_KEYS)
            .and_then(|d| self.catalog.canonical_sub_region(unit.retailer, &unit.region, &d))
            .or_else(|| district_from_address(address, &unit.region))
    }
}

/// Code for a sourced record that carried none: stable for a given unit and position.
pub fn derived_code(unit: &GeoUnit, seq: usize) -> String {
    format!(
        "{}-{}-{:02}-{:04}",
        unit.retailer.code_prefix(),
        unit.region_code,
        unit.sub_index,
        seq + 1
    )
}

/// Both coordinates or neither; never substitute 0 for an unknown side.
fn coordinates(raw: &RawRecord) -> (Option<f64>, Option<f64>) {
    let lat = raw.first_f64(LAT_KEYS);
    let lng = raw.first_f64(LNG_KEYS);
    match (lat, lng) {
        (Some(lat), Some(lng)) if (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lng) => {
            if !TAIWAN_BBOX.contains(lat, lng) {
                tracing::debug!(lat, lng, "coordinates outside Taiwan bounding box");
            }
            (Some(lat), Some(lng))
        }
        _ => (None, None),
    }
}

fn services(raw: &RawRecord) -> Option<String> {
    match raw.get(SERVICES_KEY)? {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Array(items) => {
            let joined = items
                .iter()
                .filter_map(|v| v.as_str())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join(",");
            Some(joined).filter(|s| !s.is_empty())
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Provenance;
    use serde_json::json;

    fn unit(retailer: Retailer, sub: Option<&str>, sub_index: usize) -> GeoUnit {
        GeoUnit {
            retailer,
            region: "台北市".into(),
            region_code: "TPE".into(),
            sub_region: sub.map(str::to_string),
            sub_index,
        }
    }

    fn raw(v: serde_json::Value) -> RawRecord {
        RawRecord::from_value(v).unwrap()
    }

    #[test]
    fn picks_first_present_key_in_priority_order() {
        let n = Normalizer::default();
        let r = raw(json!({
            "id": "should-not-win",
            "storeId": "F001234",
            "name": "全家大安店",
            "addr": "台北市大安區和平東路1號",
            "tel": "02-2700-0000",
            "lat": "25.03",
            "lng": 121.54
        }));
        let rec = n.normalize(&r, &unit(Retailer::FamilyMart, None, 0), 0).unwrap();
        assert_eq!(rec.store_code, "F001234");
        assert_eq!(rec.store_name, "全家大安店");
        assert_eq!(rec.address, "台北市大安區和平東路1號");
        assert_eq!(rec.phone.as_deref(), Some("02-2700-0000"));
        assert_eq!(rec.latitude, Some(25.03));
        assert_eq!(rec.longitude, Some(121.54));
        assert_eq!(rec.sub_region.as_deref(), Some("大安區"));
        assert_eq!(rec.provenance(), Provenance::Sourced);
        assert_eq!(rec.attribute(HOURS_KEY), Some("24小時"));
    }

    #[test]
    fn missing_optional_fields_stay_absent() {
        let n = Normalizer::default();
        let r = raw(json!({"store_code": "123456", "store_name": "7-ELEVEN 松仁門市"}));
        let rec = n
            .normalize(&r, &unit(Retailer::SevenEleven, Some("信義區"), 7), 0)
            .unwrap();
        assert_eq!(rec.phone, None);
        assert_eq!(rec.latitude, None);
        assert_eq!(rec.longitude, None);
        assert_eq!(rec.address, "");
        assert_eq!(rec.sub_region.as_deref(), Some("信義區"));
        assert_eq!(rec.attribute(HOURS_KEY), None);
    }

    #[test]
    fn half_a_coordinate_pair_is_dropped() {
        let n = Normalizer::default();
        let r = raw(json!({"store_code": "1", "store_name": "x", "lat": 25.0}));
        let rec = n.normalize(&r, &unit(Retailer::SevenEleven, None, 0), 0).unwrap();
        assert_eq!((rec.latitude, rec.longitude), (None, None));
    }

    #[test]
    fn zero_coordinates_are_kept_when_supplied() {
        let n = Normalizer::default();
        let r = raw(json!({"store_code": "1", "store_name": "x", "lat": 0.0, "lng": 0.0}));
        let rec = n.normalize(&r, &unit(Retailer::SevenEleven, None, 0), 0).unwrap();
        assert_eq!((rec.latitude, rec.longitude), (Some(0.0), Some(0.0)));
    }

    #[test]
    fn unkeyable_record_is_skipped() {
        let n = Normalizer::default();
        let r = raw(json!({"address": "台北市信義區松仁路1號", "phone": "02-1234-5678"}));
        assert!(n.normalize(&r, &unit(Retailer::SevenEleven, None, 0), 0).is_none());
    }

    #[test]
    fn derives_code_from_unit_and_sequence() {
        let n = Normalizer::default();
        let r = raw(json!({"name": "7-ELEVEN 信義門市"}));
        let u = unit(Retailer::SevenEleven, Some("信義區"), 7);
        let rec = n.normalize(&r, &u, 4).unwrap();
        assert_eq!(rec.store_code, "711-TPE-07-0005");
        assert_eq!(n.normalize(&r, &u, 4).unwrap().store_code, rec.store_code);
    }

    #[test]
    fn name_falls_back_to_brand_and_code() {
        let n = Normalizer::default();
        let r = raw(json!({"storeId": "F009"}));
        let rec = n.normalize(&r, &unit(Retailer::FamilyMart, None, 0), 0).unwrap();
        assert_eq!(rec.store_name, "全家 F009");
    }

    #[test]
    fn joins_service_arrays_and_keeps_synthetic_tag() {
        let n = Normalizer::default();
        let r = raw(json!({
            "store_code": "MOCK-FM-TPE-00-001",
            "store_name": "全家中山店",
            "district": "臺北市中山區",
            "services": ["ATM", " WiFi ", ""],
            "hours": "07:00-23:00",
            "sourceType": "synthetic"
        }));
        let rec = n.normalize(&r, &unit(Retailer::FamilyMart, None, 0), 0).unwrap();
        assert_eq!(rec.attribute(SERVICES_KEY), Some("ATM,WiFi"));
        assert_eq!(rec.attribute(HOURS_KEY), Some("07:00-23:00"));
        assert_eq!(rec.provenance(), Provenance::Synthetic);
    }

    #[test]
    fn district_field_is_folded_to_catalog_spelling() {
        let n = Normalizer::default();
        let r = raw(json!({"storeId": "F1", "storeName": "全家", "area": "臺北市 中山"}));
        let rec = n.normalize(&r, &unit(Retailer::FamilyMart, None, 0), 0).unwrap();
        assert_eq!(rec.sub_region.as_deref(), Some("中山區"));
    }
}
