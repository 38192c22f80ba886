use std::path::PathBuf;

use anyhow::{anyhow, Result};
use tracing::info;

use crate::database_ops::export::{ExportOutcome, FeedExporter};
use crate::database_ops::store_repository::StoreRepository;
use crate::geo::GeoCatalog;

/// Re-export the feed from what is already persisted, without crawling.
pub async fn export(repo: &StoreRepository, export_dir: impl Into<PathBuf>) -> Result<ExportOutcome> {
    Ok(FeedExporter::new(repo.clone(), export_dir).export().await?)
}

/// Drop synthetic rows for one geography once real data has been confirmed there.
pub async fn reconcile(repo: &StoreRepository, region: &str, sub_region: Option<&str>) -> Result<u64> {
    let catalog = GeoCatalog::new();
    let region = catalog
        .canonical_region(region)
        .ok_or_else(|| anyhow!("unknown region {region:?}"))?;
    let sub_region = match sub_region {
        Some(raw) => Some(
            catalog
                .canonical_sub_region(repo.retailer(), region.name, raw)
                .ok_or_else(|| anyhow!("empty sub-region"))?,
        ),
        None => None,
    };
    let purged = repo.purge_synthetic(region.name, sub_region.as_deref()).await?;
    info!(
        retailer = %repo.retailer(),
        region = region.name,
        sub_region = sub_region.as_deref(),
        purged,
        "reconcile finished"
    );
    Ok(purged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_ops::db::Db;
    use crate::model::{Provenance, Retailer, StoreRecord, SOURCE_TYPE_KEY};
    use chrono::Utc;

    fn synthetic(code: &str, district: &str) -> StoreRecord {
        StoreRecord {
            store_code: code.into(),
            store_name: format!("全家{district}店"),
            region: "台北市".into(),
            sub_region: Some(district.into()),
            address: format!("台北市{district}1號"),
            phone: None,
            latitude: None,
            longitude: None,
            attributes: [(SOURCE_TYPE_KEY.to_string(), Provenance::Synthetic.as_str().to_string())]
                .into_iter()
                .collect(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn reconcile_scopes_to_the_named_district() {
        let repo = StoreRepository::new(Db::in_memory().await.unwrap(), Retailer::FamilyMart);
        repo.init_schema().await.unwrap();
        repo.upsert_many(&[synthetic("M1", "信義區"), synthetic("M2", "大安區")])
            .await
            .unwrap();

        assert_eq!(reconcile(&repo, "臺北市", Some("信義")).await.unwrap(), 1);
        assert_eq!(repo.count().await.unwrap(), 1);
        assert!(reconcile(&repo, "Atlantis", None).await.is_err());
    }

    #[tokio::test]
    async fn export_writes_the_artifact() {
        let repo = StoreRepository::new(Db::in_memory().await.unwrap(), Retailer::FamilyMart);
        repo.init_schema().await.unwrap();
        repo.upsert_one(&synthetic("M1", "信義區")).await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let out = export(&repo, dir.path()).await.unwrap();
        assert_eq!(out.manifest.record_count, 1);
        assert!(out.path.ends_with("cart_stores_family.json"));
    }
}
