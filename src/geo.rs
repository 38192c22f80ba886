//! Static reference geography for Taiwan: first-level regions (縣市), the district lists
//! each retailer is queried at, and the country bounding box used for synthetic points.

use strsim::jaro_winkler;

use crate::model::Retailer;
use crate::normalization::region::fold_variants;

/// Minimum Jaro-Winkler score for a fuzzy region match.
pub const MIN_REGION_SIMILARITY: f64 = 0.90;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Region {
    pub name: &'static str,
    pub code: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl BoundingBox {
    pub fn contains(&self, lat: f64, lng: f64) -> bool {
        (self.min_lat..=self.max_lat).contains(&lat) && (self.min_lng..=self.max_lng).contains(&lng)
    }

    pub fn clamp(&self, lat: f64, lng: f64) -> (f64, f64) {
        (
            lat.clamp(self.min_lat, self.max_lat),
            lng.clamp(self.min_lng, self.max_lng),
        )
    }
}

pub const TAIWAN_BBOX: BoundingBox = BoundingBox {
    min_lat: 21.8,
    max_lat: 25.4,
    min_lng: 119.3,
    max_lng: 122.1,
};

static REGIONS: [Region; 22] = [
    Region { name: "基隆市", code: "KEE" },
    Region { name: "台北市", code: "TPE" },
    Region { name: "新北市", code: "TPQ" },
    Region { name: "桃園市", code: "TAO" },
    Region { name: "新竹市", code: "HSZ" },
    Region { name: "新竹縣", code: "HSQ" },
    Region { name: "苗栗縣", code: "MIA" },
    Region { name: "台中市", code: "TXG" },
    Region { name: "彰化縣", code: "CHA" },
    Region { name: "雲林縣", code: "YUN" },
    Region { name: "南投縣", code: "NAN" },
    Region { name: "嘉義縣", code: "CYQ" },
    Region { name: "嘉義市", code: "CYI" },
    Region { name: "台南市", code: "TNN" },
    Region { name: "高雄市", code: "KHH" },
    Region { name: "屏東縣", code: "PIF" },
    Region { name: "台東縣", code: "TTT" },
    Region { name: "花蓮縣", code: "HUA" },
    Region { name: "宜蘭縣", code: "ILA" },
    Region { name: "澎湖縣", code: "PEN" },
    Region { name: "金門縣", code: "KIN" },
    Region { name: "連江縣", code: "LIE" },
];

const TAIPEI: &[&str] = &[
    "中正區", "大同區", "中山區", "松山區", "大安區", "萬華區", "信義區", "士林區", "北投區",
    "內湖區", "南港區", "文山區",
];
const NEW_TAIPEI: &[&str] = &[
    "板橋區", "三重區", "中和區", "永和區", "新莊區", "新店區", "樹林區", "鶯歌區", "三峽區",
    "淡水區", "汐止區", "瑞芳區", "土城區", "蘆洲區", "五股區", "泰山區", "林口區", "深坑區",
    "石碇區", "坪林區", "三芝區", "石門區", "八里區", "平溪區", "雙溪區", "貢寮區", "金山區",
    "萬里區", "烏來區",
];
const TAOYUAN: &[&str] = &[
    "桃園區", "中壢區", "大溪區", "楊梅區", "蘆竹區", "大園區", "龜山區", "八德區", "龍潭區",
    "平鎮區", "新屋區", "觀音區", "復興區",
];
const TAICHUNG: &[&str] = &[
    "中區", "東區", "南區", "西區", "北區", "北屯區", "西屯區", "南屯區", "太平區", "大里區",
    "霧峰區", "烏日區", "豐原區", "后里區", "石岡區", "東勢區", "和平區", "新社區", "潭子區",
    "大雅區", "神岡區", "大肚區", "沙鹿區", "龍井區", "梧棲區", "清水區", "大甲區", "外埔區",
    "大安區",
];
const TAINAN: &[&str] = &[
    "中西區", "東區", "南區", "北區", "安平區", "安南區", "永康區", "歸仁區", "新化區", "左鎮區",
    "玉井區", "楠西區", "南化區", "仁德區", "關廟區", "龍崎區", "官田區", "麻豆區", "佳里區",
    "西港區", "七股區", "將軍區", "學甲區", "北門區", "新營區", "後壁區", "白河區", "東山區",
    "六甲區", "下營區", "柳營區", "鹽水區", "善化區", "大內區", "山上區", "新市區", "安定區",
];
const KAOHSIUNG: &[&str] = &[
    "新興區", "前金區", "苓雅區", "鹽埕區", "鼓山區", "旗津區", "前鎮區", "三民區", "楠梓區",
    "小港區", "左營區", "仁武區", "大社區", "岡山區", "路竹區", "阿蓮區", "田寮區", "燕巢區",
    "橋頭區", "梓官區", "彌陀區", "永安區", "湖內區", "鳳山區", "大寮區", "林園區", "鳥松區",
    "大樹區", "旗山區", "美濃區", "六龜區", "內門區", "杉林區", "甲仙區", "桃源區", "那瑪夏區",
    "茂林區", "茄萣區",
];

/// Districts used to label region-level synthetic stores.
const DISPLAY_DISTRICTS: &[(&str, &[&str])] = &[
    ("台北市", TAIPEI),
    (
        "新北市",
        &["板橋區", "三重區", "中和區", "永和區", "新莊區", "新店區", "樹林區", "鶯歌區", "三峽區", "淡水區"],
    ),
    (
        "台中市",
        &["中區", "東區", "南區", "西區", "北區", "北屯區", "西屯區", "南屯區", "太平區", "大里區"],
    ),
    (
        "高雄市",
        &["新興區", "前金區", "苓雅區", "鹽埕區", "鼓山區", "前鎮區", "三民區", "楠梓區", "小港區", "左營區"],
    ),
];

/// In-memory geography lookup. Cheap to construct; holds only static data.
#[derive(Debug, Clone, Default)]
pub struct GeoCatalog;

impl GeoCatalog {
    pub fn new() -> Self {
        Self
    }

    /// All first-level regions in canonical order.
    pub fn regions(&self) -> &'static [Region] {
        &REGIONS
    }

    /// Districts a retailer is queried at inside `region`. Empty means the region is
    /// fetched as a single unit.
    pub fn sub_regions(&self, retailer: Retailer, region: &str) -> &'static [&'static str] {
        match retailer {
            Retailer::SevenEleven => match region {
                "台北市" => TAIPEI,
                "新北市" => NEW_TAIPEI,
                "桃園市" => TAOYUAN,
                "台中市" => TAICHUNG,
                "台南市" => TAINAN,
                "高雄市" => KAOHSIUNG,
                _ => &[],
            },
            Retailer::FamilyMart => &[],
        }
    }

    /// 1-based position of `sub_region` in the retailer's list for `region`; 0 when the
    /// unit is region-level or the district is not catalogued.
    pub fn sub_region_index(&self, retailer: Retailer, region: &str, sub_region: Option<&str>) -> usize {
        let Some(sub) = sub_region else {
            return 0;
        };
        self.sub_regions(retailer, region)
            .iter()
            .position(|d| *d == sub)
            .map(|i| i + 1)
            .unwrap_or(0)
    }

    pub fn display_districts(&self, region: &str) -> Vec<String> {
        match DISPLAY_DISTRICTS.iter().find(|(name, _)| *name == region) {
            Some((_, districts)) => districts.iter().map(|d| d.to_string()).collect(),
            None => vec![
                format!("{region}中心區"),
                format!("{region}東區"),
                format!("{region}西區"),
            ],
        }
    }

    pub fn bounding_box(&self) -> BoundingBox {
        TAIWAN_BBOX
    }

    pub fn region(&self, name: &str) -> Option<&'static Region> {
        REGIONS.iter().find(|r| r.name == name)
    }

    /// Resolve free-form region input to the catalog's canonical region.
    ///
    /// Tries exact name, code, 臺/台 folding, the name without its 市/縣 suffix, and
    /// finally a fuzzy match above [`MIN_REGION_SIMILARITY`].
    pub fn canonical_region(&self, raw: &str) -> Option<&'static Region> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        if let Some(r) = self.region(trimmed) {
            return Some(r);
        }
        if let Some(r) = REGIONS.iter().find(|r| r.code.eq_ignore_ascii_case(trimmed)) {
            return Some(r);
        }
        let folded = fold_variants(trimmed);
        if let Some(r) = self.region(&folded) {
            return Some(r);
        }
        // 新竹 and 嘉義 exist as both 市 and 縣; a bare name means the city.
        let mut bare: Vec<&'static Region> = REGIONS
            .iter()
            .filter(|r| r.name.trim_end_matches(&['市', '縣'][..]) == folded)
            .collect();
        bare.sort_by_key(|r| !r.name.ends_with('市'));
        if let Some(r) = bare.first().copied() {
            return Some(r);
        }
        REGIONS
            .iter()
            .map(|r| (r, jaro_winkler(r.name, &folded)))
            .filter(|(_, score)| *score >= MIN_REGION_SIMILARITY)
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(r, _)| r)
    }

    /// Resolve a district label to the retailer's catalog spelling when one exists.
    /// A leading region name is tolerated; unknown labels come back folded.
    pub fn canonical_sub_region(&self, retailer: Retailer, region: &str, raw: &str) -> Option<String> {
        let folded = fold_variants(raw.trim());
        let stripped = folded.strip_prefix(region).unwrap_or(&folded).to_string();
        if stripped.is_empty() {
            return None;
        }
        let known = self
            .sub_regions(retailer, region)
            .iter()
            .map(|d| d.to_string())
            .chain(self.display_districts(region))
            .find(|d| *d == folded || *d == stripped || d.trim_end_matches('區') == stripped);
        Some(known.unwrap_or(stripped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_all_regions_in_order() {
        let catalog = GeoCatalog::new();
        let regions = catalog.regions();
        assert_eq!(regions.len(), 22);
        assert_eq!(regions[0].name, "基隆市");
        assert_eq!(regions[21].code, "LIE");
    }

    #[test]
    fn family_mart_has_no_sub_regions() {
        let catalog = GeoCatalog::new();
        for region in catalog.regions() {
            assert!(catalog.sub_regions(Retailer::FamilyMart, region.name).is_empty());
        }
        assert_eq!(catalog.sub_regions(Retailer::SevenEleven, "台北市").len(), 12);
        assert!(catalog.sub_regions(Retailer::SevenEleven, "花蓮縣").is_empty());
    }

    #[test]
    fn resolves_region_spellings() {
        let catalog = GeoCatalog::new();
        assert_eq!(catalog.canonical_region("臺北市").map(|r| r.name), Some("台北市"));
        assert_eq!(catalog.canonical_region("tpe").map(|r| r.name), Some("台北市"));
        assert_eq!(catalog.canonical_region(" 台中 ").map(|r| r.name), Some("台中市"));
        assert_eq!(catalog.canonical_region("新竹").map(|r| r.name), Some("新竹市"));
        assert_eq!(catalog.canonical_region("Gotham"), None);
        assert_eq!(catalog.canonical_region(""), None);
    }

    #[test]
    fn sub_region_index_is_one_based() {
        let catalog = GeoCatalog::new();
        assert_eq!(catalog.sub_region_index(Retailer::SevenEleven, "台北市", Some("中正區")), 1);
        assert_eq!(catalog.sub_region_index(Retailer::SevenEleven, "台北市", None), 0);
        assert_eq!(catalog.sub_region_index(Retailer::FamilyMart, "台北市", Some("中正區")), 0);
    }

    #[test]
    fn display_districts_fall_back_to_generic_labels() {
        let catalog = GeoCatalog::new();
        assert_eq!(catalog.display_districts("澎湖縣")[0], "澎湖縣中心區");
        assert!(catalog.display_districts("台北市").contains(&"大安區".to_string()));
    }

    #[test]
    fn canonical_sub_region_folds_and_strips_region() {
        let catalog = GeoCatalog::new();
        let fm = Retailer::FamilyMart;
        assert_eq!(catalog.canonical_sub_region(fm, "台北市", "臺北市 中山").as_deref(), Some("中山區"));
        assert_eq!(catalog.canonical_sub_region(fm, "澎湖縣", "澎湖縣中心區").as_deref(), Some("澎湖縣中心區"));
        assert_eq!(catalog.canonical_sub_region(fm, "花蓮縣", "吉安鄉").as_deref(), Some("吉安鄉"));
        assert_eq!(catalog.canonical_sub_region(fm, "台北市", "  "), None);
    }

    #[test]
    fn bounding_box_clamps_into_range() {
        let bbox = GeoCatalog::new().bounding_box();
        let (lat, lng) = bbox.clamp(26.0, 118.0);
        assert!(bbox.contains(lat, lng));
    }
}
