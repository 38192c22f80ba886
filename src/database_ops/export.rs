use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::database_ops::store_repository::StoreRepository;
use crate::error::{PipelineError, Result};
use crate::model::{Retailer, StoreRecord, HOURS_KEY, SERVICES_KEY};

pub const SCHEMA_VERSION: u32 = 1;

/// One pick-up point as the cart system reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportEntry {
    pub id: String,
    pub name: String,
    pub city: String,
    pub district: String,
    pub address: String,
    pub phone: String,
    pub services: String,
    pub hours: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub source_type: String,
}

impl ExportEntry {
    pub fn from_record(record: &StoreRecord, retailer: Retailer) -> Self {
        let attr = |key: &str| record.attribute(key).unwrap_or_default().to_string();
        Self {
            id: record.store_code.clone(),
            name: record.store_name.clone(),
            city: record.region.clone(),
            district: record.sub_region.clone().unwrap_or_default(),
            address: record.address.clone(),
            phone: record.phone.clone().unwrap_or_default(),
            services: attr(SERVICES_KEY),
            hours: attr(HOURS_KEY),
            kind: retailer.feed_type().to_string(),
            source_type: record.provenance().as_str().to_string(),
        }
    }
}

/// Full feed for one retailer, ordered by region, sub-region, name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExportDocument {
    pub entries: Vec<ExportEntry>,
}

impl ExportDocument {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Sidecar describing the artifact next to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportManifest {
    pub schema_version: u32,
    pub retailer: String,
    pub artifact: String,
    pub generated_at: DateTime<Utc>,
    pub record_count: usize,
    pub sha256: String,
}

#[derive(Debug, Clone)]
pub struct ExportOutcome {
    pub document: ExportDocument,
    pub path: PathBuf,
    pub manifest_path: PathBuf,
    pub manifest: ExportManifest,
}

#[derive(Debug, Clone)]
pub struct FeedExporter {
    repo: StoreRepository,
    export_dir: PathBuf,
}

impl FeedExporter {
    pub fn new(repo: StoreRepository, export_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo,
            export_dir: export_dir.into(),
        }
    }

    pub fn artifact_path(&self) -> PathBuf {
        self.export_dir.join(self.repo.retailer().artifact_name())
    }

    pub fn manifest_path(&self) -> PathBuf {
        let mut name = self.repo.retailer().artifact_name().to_string();
        name.push_str(".manifest.json");
        self.export_dir.join(name)
    }

    /// Build the document from a full scan without writing anything.
    pub async fn document(&self) -> Result<ExportDocument> {
        let retailer = self.repo.retailer();
        let mut records = self.repo.all().await?;
        records.sort_by(|a, b| a.listing_key().cmp(&b.listing_key()));
        Ok(ExportDocument {
            entries: records
                .iter()
                .map(|r| ExportEntry::from_record(r, retailer))
                .collect(),
        })
    }

    /// Rewrite the artifact and its manifest. Readers see either the old or the new file.
    #[instrument(skip(self), fields(retailer = %self.repo.retailer()))]
    pub async fn export(&self) -> Result<ExportOutcome> {
        let document = self.document().await?;
        let mut body = serde_json::to_vec_pretty(&document)?;
        body.push(b'\n');

        let retailer = self.repo.retailer();
        let manifest = ExportManifest {
            schema_version: SCHEMA_VERSION,
            retailer: retailer.slug().to_string(),
            artifact: retailer.artifact_name().to_string(),
            generated_at: Utc::now(),
            record_count: document.len(),
            sha256: format!("{:x}", Sha256::digest(&body)),
        };
        let mut manifest_body = serde_json::to_vec_pretty(&manifest)?;
        manifest_body.push(b'\n');

        tokio::fs::create_dir_all(&self.export_dir)
            .await
            .map_err(|e| PipelineError::export(self.export_dir.display().to_string(), e))?;
        let path = self.artifact_path();
        let manifest_path = self.manifest_path();
        write_atomic(&path, &body).await?;
        write_atomic(&manifest_path, &manifest_body).await?;

        info!(
            path = %path.display(),
            records = manifest.record_count,
            sha256 = %manifest.sha256,
            "feed exported"
        );
        Ok(ExportOutcome {
            document,
            path,
            manifest_path,
            manifest,
        })
    }
}

/// Write to a sibling temp file, then rename over `path`.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "export".to_string());
    let tmp = path.with_file_name(format!(".{file_name}.{}.tmp", Uuid::new_v4().simple()));
    let display = path.display().to_string();

    if let Err(e) = tokio::fs::write(&tmp, bytes).await {
        return Err(PipelineError::export(display, e));
    }
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(PipelineError::export(display, e));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_ops::db::Db;
    use crate::model::{Provenance, SOURCE_TYPE_KEY};
    use std::collections::BTreeMap;

    fn record(code: &str, name: &str, region: &str, sub: Option<&str>) -> StoreRecord {
        let mut attributes = BTreeMap::new();
        attributes.insert(SOURCE_TYPE_KEY.to_string(), Provenance::Synthetic.as_str().to_string());
        attributes.insert(HOURS_KEY.to_string(), "24小時".to_string());
        StoreRecord {
            store_code: code.into(),
            store_name: name.into(),
            region: region.into(),
            sub_region: sub.map(str::to_string),
            address: "台北市信義區松仁路1號".into(),
            phone: None,
            latitude: None,
            longitude: None,
            attributes,
            updated_at: Utc::now(),
        }
    }

    async fn repo_with(records: &[StoreRecord]) -> StoreRepository {
        let repo = StoreRepository::new(Db::in_memory().await.unwrap(), Retailer::FamilyMart);
        repo.init_schema().await.unwrap();
        repo.upsert_many(records).await.unwrap();
        repo
    }

    #[tokio::test]
    async fn writes_sorted_feed_and_manifest() {
        let repo = repo_with(&[
            record("3", "乙店", "台北市", Some("信義區")),
            record("1", "甲店", "台北市", Some("信義區")),
            record("2", "丙店", "台北市", None),
            record("4", "丁店", "基隆市", None),
        ])
        .await;
        let dir = tempfile::tempdir().unwrap();
        let exporter = FeedExporter::new(repo, dir.path().join("feeds"));

        let out = exporter.export().await.unwrap();
        assert_eq!(out.path, dir.path().join("feeds/cart_stores_family.json"));

        let bytes = std::fs::read(&out.path).unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.contains("\"city\": \"台北市\""));
        assert!(text.ends_with('\n'));

        let entries: Vec<serde_json::Value> = serde_json::from_slice(&bytes).unwrap();
        let ids: Vec<_> = entries.iter().map(|e| e["id"].as_str().unwrap()).collect();
        assert_eq!(ids, ["2", "3", "1", "4"]);
        let first = &entries[0];
        assert_eq!(first["district"], "");
        assert_eq!(first["phone"], "");
        assert_eq!(first["services"], "");
        assert_eq!(first["hours"], "24小時");
        assert_eq!(first["type"], "family");
        assert_eq!(first["source_type"], "synthetic");

        let manifest: ExportManifest =
            serde_json::from_slice(&std::fs::read(&out.manifest_path).unwrap()).unwrap();
        assert_eq!(manifest.schema_version, 1);
        assert_eq!(manifest.record_count, 4);
        assert_eq!(manifest.sha256, format!("{:x}", Sha256::digest(&bytes)));

        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("feeds"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn reexport_replaces_the_artifact_wholesale() {
        let repo = repo_with(&[record("1", "甲店", "台北市", None)]).await;
        let dir = tempfile::tempdir().unwrap();
        let exporter = FeedExporter::new(repo.clone(), dir.path());
        assert_eq!(exporter.export().await.unwrap().document.len(), 1);

        repo.upsert_one(&record("2", "乙店", "台北市", None)).await.unwrap();
        let out = exporter.export().await.unwrap();
        let entries: Vec<ExportEntry> = serde_json::from_slice(&std::fs::read(&out.path).unwrap()).unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[tokio::test]
    async fn unwritable_location_is_an_export_error() {
        let repo = repo_with(&[record("1", "甲店", "台北市", None)]).await;
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();
        let exporter = FeedExporter::new(repo.clone(), &blocker);
        let err = exporter.export().await.unwrap_err();
        assert!(matches!(err, PipelineError::Export { .. }));
        // Persisted rows are untouched by the failed export.
        assert_eq!(repo.count().await.unwrap(), 1);
    }
}
