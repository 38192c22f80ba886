use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde_json::Value;
use tracing::debug;

use crate::config::PipelineConfig;
use crate::database_ops::family_mart::provider::FamilyMartFetcher;
use crate::database_ops::session::{Candidate, FetchSession, SessionSettings};
use crate::database_ops::seven_eleven::provider::SevenElevenFetcher;
use crate::error::Result;
use crate::model::{RawRecord, Retailer};

/// Retailer-specific source of raw store records for one unit of geography.
///
/// Implementors only describe endpoints and response shapes; [`SourceFetcher::fetch`]
/// walks the candidates and swallows every failure, so callers see an empty list rather
/// than an error when the source is unavailable.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    fn retailer(&self) -> Retailer;

    /// Headers sent with every request of the run.
    fn headers(&self) -> HeaderMap {
        HeaderMap::new()
    }

    /// Endpoints to try, highest priority first.
    fn candidates(&self, region: &str, sub_region: Option<&str>) -> Vec<Candidate>;

    /// Extract records from a decoded body. `None` means the shape was not recognised.
    fn parse(&self, body: &Value) -> Option<Vec<RawRecord>>;

    async fn fetch(
        &self,
        session: &FetchSession,
        region: &str,
        sub_region: Option<&str>,
    ) -> Vec<RawRecord> {
        for candidate in self.candidates(region, sub_region) {
            match session.get_json(&candidate).await {
                Ok(body) => match self.parse(&body) {
                    Some(records) if !records.is_empty() => {
                        debug!(
                            retailer = %self.retailer(),
                            region,
                            sub_region,
                            url = %candidate.url,
                            count = records.len(),
                            "endpoint answered"
                        );
                        return records;
                    }
                    Some(_) => {
                        debug!(retailer = %self.retailer(), region, sub_region, url = %candidate.url, "endpoint returned no stores");
                    }
                    None => {
                        debug!(retailer = %self.retailer(), region, sub_region, url = %candidate.url, "unrecognised response shape");
                    }
                },
                Err(e) => {
                    debug!(retailer = %self.retailer(), region, sub_region, url = %candidate.url, error = %e, "endpoint attempt failed");
                }
            }
        }
        Vec::new()
    }
}

/// Never reaches the network; every unit falls through to synthetic data.
#[derive(Debug, Clone, Copy)]
pub struct OfflineFetcher {
    retailer: Retailer,
}

impl OfflineFetcher {
    pub fn new(retailer: Retailer) -> Self {
        Self { retailer }
    }
}

#[async_trait]
impl SourceFetcher for OfflineFetcher {
    fn retailer(&self) -> Retailer {
        self.retailer
    }

    fn candidates(&self, _region: &str, _sub_region: Option<&str>) -> Vec<Candidate> {
        Vec::new()
    }

    fn parse(&self, _body: &Value) -> Option<Vec<RawRecord>> {
        None
    }
}

/// The live fetcher for `retailer`, or [`OfflineFetcher`] when `offline` is set.
pub fn fetcher_for(retailer: Retailer, cfg: &PipelineConfig, offline: bool) -> Arc<dyn SourceFetcher> {
    if offline {
        return Arc::new(OfflineFetcher::new(retailer));
    }
    let base_url = cfg.base_url(retailer);
    match retailer {
        Retailer::SevenEleven => Arc::new(SevenElevenFetcher::new(base_url)),
        Retailer::FamilyMart => Arc::new(FamilyMartFetcher::new(base_url)),
    }
}

/// Open the run's session using `fetcher`'s headers and the configured limits.
pub fn open_session(fetcher: &dyn SourceFetcher, cfg: &PipelineConfig) -> Result<Arc<FetchSession>> {
    FetchSession::open(SessionSettings {
        headers: fetcher.headers(),
        max_concurrency: cfg.http_concurrency_for(fetcher.retailer()),
        request_timeout: cfg.request_timeout,
        connect_timeout: cfg.connect_timeout,
    })
}

/// Collect the records inside a decoded body: a top-level array, or the first array
/// found under one of `keys`. Non-object entries are dropped.
pub fn records_from(body: &Value, keys: &[&str]) -> Option<Vec<RawRecord>> {
    let items = match body {
        Value::Array(items) => items,
        Value::Object(map) => keys.iter().find_map(|k| map.get(*k)?.as_array())?,
        _ => return None,
    };
    Some(
        items
            .iter()
            .filter_map(|v| RawRecord::from_value(v.clone()))
            .collect(),
    )
}
