use std::sync::OnceLock;

use regex::Regex;

/// Character variants that sources use interchangeably in place names.
const VARIANTS: [(char, char); 2] = [('臺', '台'), ('　', ' ')];

/// Fold a place name to catalog spelling.
///
/// Normalization steps:
/// - map traditional variants (臺 → 台) and full-width spaces
/// - drop all whitespace
pub fn fold_variants(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            VARIANTS
                .iter()
                .find(|(from, _)| *from == c)
                .map(|(_, to)| *to)
                .unwrap_or(c)
        })
        .filter(|c| !c.is_whitespace())
        .collect()
}

fn district_patterns() -> &'static [Regex; 2] {
    static RE: OnceLock<[Regex; 2]> = OnceLock::new();
    RE.get_or_init(|| {
        // 區 first so names like 新市區 are not cut at their inner 市. Bounded so a
        // street name is never swallowed into the district.
        [
            Regex::new(r"^(\p{Han}{1,4}?區)").expect("static district regex"),
            Regex::new(r"^(\p{Han}{1,3}?[鄉鎮市])").expect("static township regex"),
        ]
    })
}

/// Extract the district from a Taiwanese address that starts with `region`.
///
/// `"台北市大安區復興南路一段390號"` with region `"台北市"` yields `"大安區"`.
pub fn district_from_address(address: &str, region: &str) -> Option<String> {
    let folded = fold_variants(address);
    let rest = folded.strip_prefix(region)?;
    district_patterns()
        .iter()
        .find_map(|re| re.captures(rest)?.get(1))
        .map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_traditional_variant_and_spaces() {
        assert_eq!(fold_variants(" 臺中市　西屯區 "), "台中市西屯區");
        assert_eq!(fold_variants("高雄市"), "高雄市");
    }

    #[test]
    fn extracts_district_after_region_prefix() {
        assert_eq!(
            district_from_address("臺北市大安區復興南路一段390號", "台北市").as_deref(),
            Some("大安區")
        );
        assert_eq!(
            district_from_address("新北市板橋區中山路1號", "新北市").as_deref(),
            Some("板橋區")
        );
        assert_eq!(
            district_from_address("台南市新市區中華路8號", "台南市").as_deref(),
            Some("新市區")
        );
        assert_eq!(
            district_from_address("屏東縣恆春鎮中山路2號", "屏東縣").as_deref(),
            Some("恆春鎮")
        );
    }

    #[test]
    fn no_district_when_region_prefix_missing() {
        assert_eq!(district_from_address("大安區復興南路一段390號", "台北市"), None);
        assert_eq!(district_from_address("", "台北市"), None);
    }
}
