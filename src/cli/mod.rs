pub mod crawl;
pub mod maintenance;
pub mod query;

use anyhow::{Context, Result};

use crate::config::PipelineConfig;
use crate::database_ops::db::Db;
use crate::database_ops::store_repository::StoreRepository;
use crate::model::Retailer;

/// Connect to the configured database.
pub async fn connect(cfg: &PipelineConfig) -> Result<Db> {
    Db::connect(&cfg.database_url, cfg.db_max_connections)
        .await
        .with_context(|| format!("opening store database {}", cfg.database_url))
}

/// Repository for `retailer` with its table in place.
pub async fn open_repository(db: &Db, retailer: Retailer) -> Result<StoreRepository> {
    let repo = StoreRepository::new(db.clone(), retailer);
    repo.init_schema()
        .await
        .with_context(|| format!("preparing {} table", retailer.table_name()))?;
    Ok(repo)
}

/// Selected retailers, or every retailer when none was named.
pub fn retailers_or_all(selected: Option<Retailer>) -> Vec<Retailer> {
    match selected {
        Some(r) => vec![r],
        None => Retailer::all(),
    }
}
