use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, ORIGIN, REFERER};
use serde_json::Value;

use crate::database_ops::fetcher::{records_from, SourceFetcher};
use crate::database_ops::session::Candidate;
use crate::model::{RawRecord, Retailer};

const SEARCH_PATHS: [&str; 3] = [
    "/api/StoreMap/Search",
    "/Marketing/api/Map/Search",
    "/api/store/search",
];
const PAGE_LIMIT: &str = "100";

/// Family Mart store map search. The site answers from one of several API paths
/// depending on deployment, all taking `search`/`city`/`limit` and returning either a bare
/// array or `{ "stores": [...] }`.
#[derive(Debug, Clone)]
pub struct FamilyMartFetcher {
    base_url: String,
}

impl FamilyMartFetcher {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl SourceFetcher for FamilyMartFetcher {
    fn retailer(&self) -> Retailer {
        Retailer::FamilyMart
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json, text/plain, */*"));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("zh-TW,zh;q=0.9,en;q=0.8"));
        if let Ok(v) = HeaderValue::from_str(&format!("{}/Marketing/zh/Map", self.base_url)) {
            headers.insert(REFERER, v);
        }
        if let Ok(v) = HeaderValue::from_str(&self.base_url) {
            headers.insert(ORIGIN, v);
        }
        headers
    }

    fn candidates(&self, region: &str, sub_region: Option<&str>) -> Vec<Candidate> {
        let search = match sub_region {
            Some(d) => format!("{region}{d}"),
            None => region.to_string(),
        };
        SEARCH_PATHS
            .iter()
            .map(|path| {
                let c = Candidate::new(format!("{}{}", self.base_url, path))
                    .param("search", search.as_str())
                    .param("city", region);
                let c = match sub_region {
                    Some(d) => c.param("district", d),
                    None => c,
                };
                c.param("limit", PAGE_LIMIT)
            })
            .collect()
    }

    fn parse(&self, body: &Value) -> Option<Vec<RawRecord>> {
        records_from(body, &["stores"])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_ops::session::test_server::{serve, Route};
    use crate::database_ops::session::{FetchSession, SessionSettings};
    use serde_json::json;
    use std::collections::HashMap;
    use std::time::Duration;

    #[test]
    fn sends_browser_like_headers() {
        let f = FamilyMartFetcher::new("https://www.family.com.tw");
        let h = f.headers();
        assert_eq!(h.get(ORIGIN).unwrap().to_str().unwrap(), "https://www.family.com.tw");
        assert_eq!(
            h.get(REFERER).unwrap().to_str().unwrap(),
            "https://www.family.com.tw/Marketing/zh/Map"
        );
        assert!(h.get(ACCEPT).is_some());
    }

    #[test]
    fn three_candidates_in_fixed_order() {
        let f = FamilyMartFetcher::new("http://fm");
        let c = f.candidates("高雄市", None);
        let urls: Vec<_> = c.iter().map(|c| c.url.as_str()).collect();
        assert_eq!(
            urls,
            [
                "http://fm/api/StoreMap/Search",
                "http://fm/Marketing/api/Map/Search",
                "http://fm/api/store/search"
            ]
        );
        assert!(c[0].query.contains(&("limit".into(), "100".into())));
        assert!(c[0].query.contains(&("search".into(), "高雄市".into())));
    }

    #[tokio::test]
    async fn skips_empty_and_malformed_endpoints() {
        let mut routes = HashMap::new();
        routes.insert("/api/StoreMap/Search".to_string(), Route::new(200, "[]"));
        routes.insert("/Marketing/api/Map/Search".to_string(), Route::new(200, "<html>"));
        routes.insert(
            "/api/store/search".to_string(),
            Route::new(
                200,
                json!({"stores": [
                    {"storeId": "F1", "storeName": "全家信義店", "services": ["ATM", "影印"]},
                    {"storeId": "F2", "storeName": "全家松仁店"}
                ]})
                .to_string(),
            ),
        );
        let (base, seen) = serve(routes).await;
        let f = FamilyMartFetcher::new(&base);
        let session = FetchSession::open(SessionSettings {
            headers: f.headers(),
            max_concurrency: 3,
            request_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(2),
        })
        .unwrap();

        let recs = f.fetch(&session, "台北市", None).await;
        assert_eq!(recs.len(), 2);
        assert_eq!(seen.lock().await.len(), 3);
    }

    #[tokio::test]
    async fn timed_out_endpoint_escalates_to_the_next() {
        let mut routes = HashMap::new();
        routes.insert(
            "/api/StoreMap/Search".to_string(),
            Route::new(200, json!({"stores": [{"storeId": "F9", "storeName": "全家慢店"}]}).to_string())
                .delayed(Duration::from_secs(3)),
        );
        routes.insert(
            "/Marketing/api/Map/Search".to_string(),
            Route::new(200, json!([{"storeId": "F3", "storeName": "全家永春店"}]).to_string()),
        );
        let (base, seen) = serve(routes).await;
        let f = FamilyMartFetcher::new(&base);
        let session = FetchSession::open(SessionSettings {
            headers: f.headers(),
            max_concurrency: 3,
            request_timeout: Duration::from_millis(200),
            connect_timeout: Duration::from_secs(2),
        })
        .unwrap();

        let recs = f.fetch(&session, "台北市", None).await;
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].0.get("storeId"), Some(&json!("F3")));
        assert_eq!(seen.lock().await.len(), 2);
    }
}
