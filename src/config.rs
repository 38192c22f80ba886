use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::error::{PipelineError, Result};
use crate::model::Retailer;
use crate::util::env::{env_flag, env_opt, env_parse, env_parse_opt};

pub const DEFAULT_DATABASE_URL: &str = "sqlite://cvs_stores.db";
pub const SEVEN_ELEVEN_BASE_URL: &str = "https://www.ibon.com.tw";
pub const FAMILY_MART_BASE_URL: &str = "https://www.family.com.tw";

/// Settings for one aggregation run and the storage/export around it.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub database_url: String,
    pub db_max_connections: u32,
    pub export_dir: PathBuf,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    /// Overrides the per-retailer outbound ceiling when set.
    pub http_concurrency: Option<usize>,
    pub region_concurrency: usize,
    pub sub_region_concurrency: usize,
    pub run_budget: Option<Duration>,
    pub supersede_synthetic: bool,
    pub mock_scales_file: Option<PathBuf>,
    pub seven_eleven_base_url: String,
    pub family_mart_base_url: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            db_max_connections: 5,
            export_dir: PathBuf::from("."),
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            http_concurrency: None,
            region_concurrency: 22,
            sub_region_concurrency: 8,
            run_budget: None,
            supersede_synthetic: false,
            mock_scales_file: None,
            seven_eleven_base_url: SEVEN_ELEVEN_BASE_URL.to_string(),
            family_mart_base_url: FAMILY_MART_BASE_URL.to_string(),
        }
    }
}

impl PipelineConfig {
    /// Read `CVS_*` variables (after loading `.env`), falling back to defaults.
    pub fn from_env() -> Result<Self> {
        let d = Self::default();
        let cfg = Self {
            database_url: env_opt("CVS_DATABASE_URL").unwrap_or(d.database_url),
            db_max_connections: env_parse("CVS_DB_MAX_CONNECTIONS", d.db_max_connections),
            export_dir: env_opt("CVS_EXPORT_DIR").map(PathBuf::from).unwrap_or(d.export_dir),
            request_timeout: Duration::from_secs(env_parse("CVS_REQUEST_TIMEOUT_SECS", 30u64)),
            connect_timeout: Duration::from_secs(env_parse("CVS_CONNECT_TIMEOUT_SECS", 10u64)),
            http_concurrency: env_parse_opt("CVS_HTTP_CONCURRENCY"),
            region_concurrency: env_parse("CVS_REGION_CONCURRENCY", d.region_concurrency),
            sub_region_concurrency: env_parse("CVS_SUBREGION_CONCURRENCY", d.sub_region_concurrency),
            run_budget: env_parse_opt::<u64>("CVS_RUN_BUDGET_SECS").map(Duration::from_secs),
            supersede_synthetic: env_flag("CVS_SUPERSEDE_SYNTHETIC", d.supersede_synthetic),
            mock_scales_file: env_opt("CVS_MOCK_SCALES_FILE").map(PathBuf::from),
            seven_eleven_base_url: env_opt("CVS_SEVEN_ELEVEN_BASE_URL")
                .unwrap_or(d.seven_eleven_base_url),
            family_mart_base_url: env_opt("CVS_FAMILY_MART_BASE_URL")
                .unwrap_or(d.family_mart_base_url),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        for retailer in Retailer::all() {
            let raw = self.base_url(retailer);
            Url::parse(raw).map_err(|e| {
                PipelineError::Config(format!("{} base url {raw:?}: {e}", retailer.slug()))
            })?;
        }
        if self.request_timeout.is_zero() {
            return Err(PipelineError::Config("request timeout must be non-zero".into()));
        }
        if self.db_max_connections == 0 {
            return Err(PipelineError::Config("db max connections must be non-zero".into()));
        }
        Ok(())
    }

    pub fn base_url(&self, retailer: Retailer) -> &str {
        match retailer {
            Retailer::SevenEleven => &self.seven_eleven_base_url,
            Retailer::FamilyMart => &self.family_mart_base_url,
        }
    }

    /// Outbound connection ceiling for `retailer`'s host.
    pub fn http_concurrency_for(&self, retailer: Retailer) -> usize {
        let default = match retailer {
            Retailer::SevenEleven => 5,
            Retailer::FamilyMart => 3,
        };
        self.http_concurrency.unwrap_or(default).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.database_url, "sqlite://cvs_stores.db");
        assert_eq!(cfg.request_timeout, Duration::from_secs(30));
        assert_eq!(cfg.http_concurrency_for(Retailer::SevenEleven), 5);
        assert_eq!(cfg.http_concurrency_for(Retailer::FamilyMart), 3);
        assert!(!cfg.supersede_synthetic);
        assert!(cfg.run_budget.is_none());
        cfg.validate().unwrap();
    }

    #[test]
    fn concurrency_override_never_drops_to_zero() {
        let cfg = PipelineConfig {
            http_concurrency: Some(0),
            ..Default::default()
        };
        assert_eq!(cfg.http_concurrency_for(Retailer::FamilyMart), 1);
    }

    #[test]
    fn rejects_unparseable_base_url() {
        let cfg = PipelineConfig {
            family_mart_base_url: "not a url".into(),
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(PipelineError::Config(_))));
    }
}
