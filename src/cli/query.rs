//! Read-only views over the persisted directory.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use anyhow::Result;

use crate::database_ops::store_repository::StoreRepository;
use crate::geo::GeoCatalog;
use crate::model::StoreRecord;

/// Stores in `region`. Accepts the same spellings the normalizer does.
pub async fn by_region(repo: &StoreRepository, region: &str) -> Result<Vec<StoreRecord>> {
    let catalog = GeoCatalog::new();
    let name = catalog
        .canonical_region(region)
        .map(|r| r.name.to_string())
        .unwrap_or_else(|| region.trim().to_string());
    Ok(repo.by_region(&name).await?)
}

pub async fn search(repo: &StoreRepository, keyword: &str) -> Result<Vec<StoreRecord>> {
    Ok(repo.search(keyword).await?)
}

pub fn to_json(records: &[StoreRecord]) -> Result<String> {
    Ok(serde_json::to_string_pretty(records)?)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetailerStats {
    pub table: &'static str,
    pub total: i64,
    pub by_source: BTreeMap<String, i64>,
}

pub async fn stats(repo: &StoreRepository) -> Result<RetailerStats> {
    Ok(RetailerStats {
        table: repo.retailer().table_name(),
        total: repo.count().await?,
        by_source: repo.count_by_source().await?,
    })
}

pub fn render_stats(stats: &[RetailerStats]) -> String {
    let mut out = String::new();
    for s in stats {
        let _ = writeln!(out, "{}: {}", s.table, s.total);
        for (source, n) in &s.by_source {
            let _ = writeln!(out, "  {source}: {n}");
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_ops::db::Db;
    use crate::model::{Provenance, Retailer, SOURCE_TYPE_KEY};
    use chrono::Utc;

    async fn seeded() -> StoreRepository {
        let repo = StoreRepository::new(Db::in_memory().await.unwrap(), Retailer::SevenEleven);
        repo.init_schema().await.unwrap();
        let mk = |code: &str, name: &str, region: &str, provenance: Provenance| StoreRecord {
            store_code: code.into(),
            store_name: name.into(),
            region: region.into(),
            sub_region: None,
            address: format!("{region}某路1號"),
            phone: None,
            latitude: None,
            longitude: None,
            attributes: [(SOURCE_TYPE_KEY.to_string(), provenance.as_str().to_string())]
                .into_iter()
                .collect(),
            updated_at: Utc::now(),
        };
        repo.upsert_many(&[
            mk("100", "7-ELEVEN 台大門市", "台北市", Provenance::Sourced),
            mk("MOCK-1", "7-ELEVEN 港都門市", "高雄市", Provenance::Synthetic),
        ])
        .await
        .unwrap();
        repo
    }

    #[tokio::test]
    async fn by_region_accepts_variant_spellings() {
        let repo = seeded().await;
        let rows = by_region(&repo, "臺北市").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].store_code, "100");
        assert!(by_region(&repo, "宜蘭縣").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stats_split_by_source() {
        let repo = seeded().await;
        let s = stats(&repo).await.unwrap();
        assert_eq!(s.total, 2);
        assert_eq!(s.by_source.get("sourced"), Some(&1));
        assert_eq!(s.by_source.get("synthetic"), Some(&1));
        let text = render_stats(&[s]);
        assert!(text.starts_with("seven_eleven_stores: 2"));
    }

    #[tokio::test]
    async fn search_prints_json() {
        let repo = seeded().await;
        let rows = search(&repo, "港都").await.unwrap();
        let json: serde_json::Value = serde_json::from_str(&to_json(&rows).unwrap()).unwrap();
        assert_eq!(json[0]["store_code"], "MOCK-1");
    }
}
