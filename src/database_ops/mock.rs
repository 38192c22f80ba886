use std::collections::BTreeMap;
use std::path::Path;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::geo::GeoCatalog;
use crate::model::{Provenance, RawRecord, Retailer, HOURS_KEY, SERVICES_KEY, SOURCE_TYPE_KEY};
use crate::normalization::GeoUnit;

const STREETS: [&str; 10] = [
    "中正路", "民生路", "復興路", "中山路", "和平路", "建國路", "忠孝路", "仁愛路", "信義路", "自由路",
];
const SERVICES: [&str; 12] = [
    "ATM", "WiFi", "代收", "影印", "傳真", "宅配", "店到店", "冷凍宅配", "FamiPort", "Let's Café",
    "廁所", "停車場",
];
const HOURS: [&str; 3] = ["24小時", "06:00-24:00", "07:00-23:00"];

const CENTER_LAT: f64 = 23.5;
const CENTER_LNG: f64 = 120.5;
const JITTER: f64 = 2.0;

/// Inclusive `[min, max]` store count.
pub type SizeHint = (usize, usize);

/// How many synthetic stores a unit of geography gets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MockScales {
    #[serde(default)]
    pub region_ranges: BTreeMap<String, SizeHint>,
    #[serde(default = "default_sub_region_range")]
    pub sub_region_range: SizeHint,
    #[serde(default = "default_region_range")]
    pub default_range: SizeHint,
}

fn default_sub_region_range() -> SizeHint {
    (3, 15)
}

fn default_region_range() -> SizeHint {
    (3, 8)
}

impl Default for MockScales {
    fn default() -> Self {
        let region_ranges = [
            ("台北市", (15, 25)),
            ("新北市", (20, 30)),
            ("桃園市", (12, 18)),
            ("台中市", (15, 25)),
            ("台南市", (12, 20)),
            ("高雄市", (18, 28)),
            ("基隆市", (3, 8)),
            ("新竹市", (4, 10)),
            ("新竹縣", (3, 8)),
            ("苗栗縣", (3, 8)),
            ("彰化縣", (5, 12)),
            ("南投縣", (3, 8)),
            ("雲林縣", (4, 10)),
            ("嘉義市", (3, 8)),
            ("嘉義縣", (4, 10)),
            ("屏東縣", (5, 12)),
            ("宜蘭縣", (4, 10)),
            ("花蓮縣", (3, 8)),
            ("台東縣", (3, 8)),
            ("澎湖縣", (2, 5)),
            ("金門縣", (2, 5)),
            ("連江縣", (1, 3)),
        ]
        .into_iter()
        .map(|(name, range)| (name.to_string(), range))
        .collect();
        Self {
            region_ranges,
            sub_region_range: default_sub_region_range(),
            default_range: default_region_range(),
        }
    }
}

impl MockScales {
    /// Defaults with the entries of the JSON file at `path` laid over them.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::Config(format!("mock scales {}: {e}", path.display())))?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let overrides: MockScales = serde_json::from_str(raw)
            .map_err(|e| PipelineError::Config(format!("mock scales: {e}")))?;
        let mut scales = Self::default();
        scales.region_ranges.extend(overrides.region_ranges);
        scales.sub_region_range = overrides.sub_region_range;
        scales.default_range = overrides.default_range;
        scales.validate()?;
        Ok(scales)
    }

    fn validate(&self) -> Result<()> {
        let bad = self
            .region_ranges
            .iter()
            .map(|(k, r)| (k.as_str(), *r))
            .chain([("sub_region_range", self.sub_region_range), ("default_range", self.default_range)])
            .find(|(_, (min, max))| min > max);
        match bad {
            Some((name, (min, max))) => Err(PipelineError::Config(format!(
                "mock scale for {name} has min {min} > max {max}"
            ))),
            None => Ok(()),
        }
    }

    /// Sub-region units share one range; region-level units use the region's entry.
    pub fn size_hint(&self, region: &str, sub_region: Option<&str>) -> SizeHint {
        if sub_region.is_some() {
            return self.sub_region_range;
        }
        self.region_ranges
            .get(region)
            .copied()
            .unwrap_or(self.default_range)
    }
}

/// Synthesizes plausible stores for a unit the live source had nothing for.
#[derive(Debug, Clone, Default)]
pub struct MockGenerator {
    catalog: GeoCatalog,
    scales: MockScales,
}

impl MockGenerator {
    pub fn new(catalog: GeoCatalog, scales: MockScales) -> Self {
        Self { catalog, scales }
    }

    pub fn scales(&self) -> &MockScales {
        &self.scales
    }

    /// Generate with the thread RNG, sized by the configured scales.
    pub fn generate_for(&self, unit: &GeoUnit) -> Vec<RawRecord> {
        let hint = self.scales.size_hint(&unit.region, unit.sub_region.as_deref());
        self.generate(&mut rand::thread_rng(), unit, hint)
    }

    /// Between `size_hint.0` and `size_hint.1` records (inclusive), each tagged synthetic.
    pub fn generate<R: Rng + ?Sized>(&self, rng: &mut R, unit: &GeoUnit, size_hint: SizeHint) -> Vec<RawRecord> {
        let (min, max) = (size_hint.0.min(size_hint.1), size_hint.0.max(size_hint.1));
        let count = rng.gen_range(min..=max);
        let districts = match &unit.sub_region {
            Some(sub) => vec![sub.clone()],
            None => self.catalog.display_districts(&unit.region),
        };
        let bbox = self.catalog.bounding_box();
        let brand = brand_prefix(unit.retailer);

        let records: Vec<RawRecord> = (1..=count)
            .map(|i| {
                let district = districts.choose(rng).cloned().unwrap_or_default();
                let street = STREETS.choose(rng).copied().unwrap_or(STREETS[0]);
                let place = district.strip_prefix(unit.region.as_str()).unwrap_or(district.as_str());
                let names = [
                    format!("{brand}{place}店"),
                    format!("{brand}{place}門市"),
                    format!("{brand}{place}分店"),
                    format!("{brand}{street}店"),
                    format!("{brand}{}{i:02}店", unit.region),
                ];
                let name = names.choose(rng).cloned().unwrap_or_default();
                let (lat, lng) = bbox.clamp(
                    CENTER_LAT + rng.gen_range(-JITTER..=JITTER),
                    CENTER_LNG + rng.gen_range(-JITTER..=JITTER),
                );

                let mut record = RawRecord::new()
                    .with("store_code", synthetic_code(unit, i))
                    .with("store_name", name)
                    .with("district", district.clone())
                    .with(
                        "address",
                        format!("{}{}{}{}號", unit.region, place, street, rng.gen_range(1..=500)),
                    )
                    .with(
                        "phone",
                        format!(
                            "0{}-{}-{}",
                            rng.gen_range(2..=9),
                            rng.gen_range(2000..=9999),
                            rng.gen_range(1000..=9999)
                        ),
                    )
                    .with("latitude", lat)
                    .with("longitude", lng)
                    .with(SOURCE_TYPE_KEY, Provenance::Synthetic.as_str());

                if unit.retailer == Retailer::FamilyMart {
                    let n = rng.gen_range(3..=7);
                    let services: Vec<&str> = SERVICES.choose_multiple(rng, n).copied().collect();
                    record.insert(SERVICES_KEY, services.join(","));
                    record.insert(HOURS_KEY, HOURS.choose(rng).copied().unwrap_or(HOURS[0]));
                }
                record
            })
            .collect();

        debug!(
            retailer = %unit.retailer,
            unit = %unit.label(),
            count = records.len(),
            "generated synthetic stores"
        );
        records
    }
}

fn brand_prefix(retailer: Retailer) -> &'static str {
    match retailer {
        Retailer::SevenEleven => "7-ELEVEN ",
        Retailer::FamilyMart => "全家",
    }
}

/// `MOCK-` keeps synthetic codes out of every retailer's real code space.
pub fn synthetic_code(unit: &GeoUnit, index: usize) -> String {
    format!(
        "MOCK-{}-{}-{:02}-{:03}",
        unit.retailer.code_prefix(),
        unit.region_code,
        unit.sub_index,
        index
    )
}
