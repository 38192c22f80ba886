//! Aggregation run for one retailer: fan out over the geography, fall back to synthetic
//! stores where the source has nothing, then normalize, persist and export.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use futures::{stream, StreamExt};
use indexmap::IndexMap;
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::database_ops::export::FeedExporter;
use crate::database_ops::fetcher::{open_session, SourceFetcher};
use crate::database_ops::mock::{MockGenerator, MockScales};
use crate::database_ops::session::FetchSession;
use crate::database_ops::store_repository::{StoreRepository, UpsertCounts};
use crate::error::{PipelineError, Result};
use crate::geo::{GeoCatalog, Region};
use crate::model::{Provenance, RawRecord, Retailer, StoreRecord};
use crate::normalization::{GeoUnit, Normalizer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    FetchingRegions,
    Merging,
    Persisted,
    Exported,
    Aborted,
}

/// Why a unit ended up with synthetic data.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Fallback {
    /// Every candidate endpoint came back empty or failed.
    NoData,
    /// The run budget ran out before the unit finished.
    TimedOut,
    /// The unit task panicked.
    Crashed(String),
}

#[derive(Debug)]
struct UnitResult {
    unit: GeoUnit,
    records: Vec<RawRecord>,
    fallback: Option<Fallback>,
}

impl UnitResult {
    fn degraded(&self) -> bool {
        matches!(self.fallback, Some(Fallback::TimedOut | Fallback::Crashed(_)))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub retailer: Retailer,
    pub phase: RunPhase,
    pub units: usize,
    pub sourced_units: usize,
    pub synthetic_units: usize,
    /// Units that fell back because of a timeout or a crashed task.
    pub degraded_units: usize,
    pub sourced: usize,
    pub synthetic: usize,
    pub skipped: usize,
    pub inserted: usize,
    pub updated: usize,
    pub purged: u64,
    pub exported: Option<usize>,
    pub export_error: Option<String>,
    pub elapsed_ms: u64,
}

impl RunSummary {
    pub fn total(&self) -> usize {
        self.sourced + self.synthetic
    }

    /// Nothing aggregated, or the feed could not be written.
    pub fn is_failure(&self) -> bool {
        self.total() == 0 || self.export_error.is_some()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "run {} ({}) finished in {:?}", self.run_id, self.retailer.slug(), self.phase)?;
        writeln!(
            f,
            "  units: {} (sourced {}, synthetic {}, degraded {})",
            self.units, self.sourced_units, self.synthetic_units, self.degraded_units
        )?;
        writeln!(
            f,
            "  records: {} (sourced {}, synthetic {}, skipped {})",
            self.total(),
            self.sourced,
            self.synthetic,
            self.skipped
        )?;
        writeln!(
            f,
            "  persisted: inserted {}, updated {}, purged {}",
            self.inserted, self.updated, self.purged
        )?;
        match (&self.exported, &self.export_error) {
            (Some(n), _) => writeln!(f, "  exported: {n} entries")?,
            (None, Some(e)) => writeln!(f, "  export FAILED: {e}")?,
            (None, None) => writeln!(f, "  export skipped")?,
        }
        write!(f, "  elapsed: {:.1}s", self.elapsed_ms as f64 / 1000.0)
    }
}

pub struct AggregationOrchestrator {
    fetcher: Arc<dyn SourceFetcher>,
    repo: StoreRepository,
    exporter: FeedExporter,
    mock: Arc<MockGenerator>,
    normalizer: Normalizer,
    catalog: GeoCatalog,
    cfg: PipelineConfig,
    regions: Vec<&'static Region>,
}

impl AggregationOrchestrator {
    /// Wire a run for `fetcher`'s retailer. Loads mock scales from
    /// `cfg.mock_scales_file` when set.
    pub fn new(fetcher: Arc<dyn SourceFetcher>, repo: StoreRepository, cfg: PipelineConfig) -> Result<Self> {
        if fetcher.retailer() != repo.retailer() {
            return Err(PipelineError::Config(format!(
                "fetcher is for {} but repository is for {}",
                fetcher.retailer().slug(),
                repo.retailer().slug()
            )));
        }
        let catalog = GeoCatalog::new();
        let scales = match &cfg.mock_scales_file {
            Some(path) => MockScales::load(path)?,
            None => MockScales::default(),
        };
        Ok(Self {
            exporter: FeedExporter::new(repo.clone(), cfg.export_dir.clone()),
            mock: Arc::new(MockGenerator::new(catalog.clone(), scales)),
            normalizer: Normalizer::new(catalog.clone()),
            regions: catalog.regions().iter().collect(),
            catalog,
            fetcher,
            repo,
            cfg,
        })
    }

    /// Restrict the run to the named regions (any spelling [`GeoCatalog::canonical_region`]
    /// accepts). An empty list keeps every region.
    pub fn with_regions<S: AsRef<str>>(mut self, names: &[S]) -> Result<Self> {
        if names.is_empty() {
            return Ok(self);
        }
        let mut picked = Vec::with_capacity(names.len());
        for name in names {
            let region = self
                .catalog
                .canonical_region(name.as_ref())
                .ok_or_else(|| PipelineError::Config(format!("unknown region {:?}", name.as_ref())))?;
            if !picked.contains(&region) {
                picked.push(region);
            }
        }
        // Keep catalog order regardless of argument order.
        picked.sort_by_key(|r| self.catalog.regions().iter().position(|c| c == *r));
        self.regions = picked;
        Ok(self)
    }

    pub fn with_mock(mut self, mock: MockGenerator) -> Self {
        self.mock = Arc::new(mock);
        self
    }

    pub fn retailer(&self) -> Retailer {
        self.fetcher.retailer()
    }

    /// Units of work for `region`: one per catalogued sub-region, or the region itself.
    pub fn units_for(&self, region: &Region) -> Vec<GeoUnit> {
        let retailer = self.retailer();
        let subs = self.catalog.sub_regions(retailer, region.name);
        if subs.is_empty() {
            return vec![GeoUnit {
                retailer,
                region: region.name.to_string(),
                region_code: region.code.to_string(),
                sub_region: None,
                sub_index: 0,
            }];
        }
        subs.iter()
            .map(|sub| GeoUnit {
                retailer,
                region: region.name.to_string(),
                region_code: region.code.to_string(),
                sub_region: Some(sub.to_string()),
                sub_index: self.catalog.sub_region_index(retailer, region.name, Some(sub)),
            })
            .collect()
    }

    /// One full run. Only persistence (or setup) failures return `Err`; source trouble
    /// degrades to synthetic data and export trouble is reported in the summary.
    pub async fn run(&self) -> Result<RunSummary> {
        let run_id = Uuid::new_v4();
        let retailer = self.retailer();
        let started = Instant::now();
        let deadline = self.cfg.run_budget.map(|b| tokio::time::Instant::now() + b);
        let mut phase = RunPhase::Idle;
        info!(%run_id, retailer = %retailer, regions = self.regions.len(), "aggregation run starting");

        let session = open_session(self.fetcher.as_ref(), &self.cfg)?;

        phase = advance(run_id, phase, RunPhase::FetchingRegions);
        let results = self.fetch_all(run_id, session, deadline).await;

        phase = advance(run_id, phase, RunPhase::Merging);
        let units = results.len();
        let sourced_units = results.iter().filter(|r| r.fallback.is_none()).count();
        let degraded_units = results.iter().filter(|r| r.degraded()).count();
        let (batch, skipped) = self.merge(&results);
        let sourced = batch
            .iter()
            .filter(|r| r.provenance() == Provenance::Sourced)
            .count();

        let (counts, purged) = match self.persist(&batch, &results).await {
            Ok(done) => done,
            Err(e) => {
                advance(run_id, phase, RunPhase::Aborted);
                error!(%run_id, retailer = %retailer, error = %e, "run aborted: storage unwritable");
                return Err(e);
            }
        };
        phase = advance(run_id, phase, RunPhase::Persisted);

        let (exported, export_error) = match self.exporter.export().await {
            Ok(out) => {
                phase = advance(run_id, phase, RunPhase::Exported);
                (Some(out.document.len()), None)
            }
            Err(e) => {
                error!(%run_id, retailer = %retailer, error = %e, "export failed; persisted data kept");
                (None, Some(e.to_string()))
            }
        };

        let summary = RunSummary {
            run_id,
            retailer,
            phase,
            units,
            sourced_units,
            synthetic_units: units - sourced_units,
            degraded_units,
            sourced,
            synthetic: batch.len() - sourced,
            skipped,
            inserted: counts.inserted,
            updated: counts.updated,
            purged,
            exported,
            export_error,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            %run_id,
            retailer = %retailer,
            units = summary.units,
            sourced = summary.sourced,
            synthetic = summary.synthetic,
            skipped = summary.skipped,
            degraded = summary.degraded_units,
            inserted = summary.inserted,
            updated = summary.updated,
            elapsed_ms = summary.elapsed_ms,
            "aggregation run finished"
        );
        Ok(summary)
    }

    /// Fan out over regions, then over each region's units. Results come back in
    /// catalog order whatever order the I/O finished in.
    async fn fetch_all(
        &self,
        run_id: Uuid,
        session: Arc<FetchSession>,
        deadline: Option<tokio::time::Instant>,
    ) -> Vec<UnitResult> {
        let mut per_region: Vec<(usize, Vec<UnitResult>)> = stream::iter(self.regions.iter().enumerate())
            .map(|(idx, region)| {
                let session = session.clone();
                async move { (idx, self.fetch_region(run_id, region, session, deadline).await) }
            })
            .buffer_unordered(self.cfg.region_concurrency.max(1))
            .collect()
            .await;
        per_region.sort_by_key(|(idx, _)| *idx);
        per_region.into_iter().flat_map(|(_, units)| units).collect()
    }

    async fn fetch_region(
        &self,
        run_id: Uuid,
        region: &Region,
        session: Arc<FetchSession>,
        deadline: Option<tokio::time::Instant>,
    ) -> Vec<UnitResult> {
        let units = self.units_for(region);
        let permits = Arc::new(Semaphore::new(self.cfg.sub_region_concurrency.max(1)));

        let handles: Vec<_> = units
            .iter()
            .cloned()
            .map(|unit| {
                let fetcher = self.fetcher.clone();
                let session = session.clone();
                let permits = permits.clone();
                tokio::spawn(async move {
                    let work = async {
                        let _permit = permits.acquire_owned().await.ok();
                        fetcher
                            .fetch(&session, &unit.region, unit.sub_region.as_deref())
                            .await
                    };
                    match deadline {
                        Some(at) => tokio::time::timeout_at(at, work).await.ok(),
                        None => Some(work.await),
                    }
                })
            })
            .collect();

        let joined = join_all(handles).await;
        let results: Vec<UnitResult> = units
            .into_iter()
            .zip(joined)
            .map(|(unit, joined)| {
                let fetched = match joined {
                    Ok(Some(records)) if !records.is_empty() => Ok(records),
                    Ok(Some(_)) => Err(Fallback::NoData),
                    Ok(None) => Err(Fallback::TimedOut),
                    Err(join_err) => Err(Fallback::Crashed(join_err.to_string())),
                };
                match fetched {
                    Ok(records) => {
                        debug!(%run_id, unit = %unit.label(), count = records.len(), "unit sourced");
                        UnitResult {
                            unit,
                            records,
                            fallback: None,
                        }
                    }
                    Err(cause) => {
                        match &cause {
                            Fallback::NoData => {
                                debug!(%run_id, unit = %unit.label(), "no source data; generating synthetic stores")
                            }
                            Fallback::TimedOut => {
                                warn!(%run_id, unit = %unit.label(), "run budget exhausted; generating synthetic stores")
                            }
                            Fallback::Crashed(e) => {
                                warn!(%run_id, unit = %unit.label(), error = %e, "unit task failed; generating synthetic stores")
                            }
                        }
                        let records = self.mock.generate_for(&unit);
                        UnitResult {
                            unit,
                            records,
                            fallback: Some(cause),
                        }
                    }
                }
            })
            .collect();

        info!(
            %run_id,
            region = region.name,
            units = results.len(),
            records = results.iter().map(|r| r.records.len()).sum::<usize>(),
            "region collected"
        );
        results
    }

    /// Normalize in flatten order and dedup by store code; a later unit replaces an
    /// earlier one. Returns the batch and the number of unkeyable records dropped.
    fn merge(&self, results: &[UnitResult]) -> (Vec<StoreRecord>, usize) {
        let mut by_code: IndexMap<String, StoreRecord> = IndexMap::new();
        let mut skipped = 0;
        for result in results {
            for (seq, raw) in result.records.iter().enumerate() {
                match self.normalizer.normalize(raw, &result.unit, seq) {
                    Some(record) => {
                        if let Some(prev) = by_code.insert(record.store_code.clone(), record) {
                            debug!(code = %prev.store_code, "duplicate store code; later unit wins");
                        }
                    }
                    None => skipped += 1,
                }
            }
        }
        (by_code.into_values().collect(), skipped)
    }

    async fn persist(&self, batch: &[StoreRecord], results: &[UnitResult]) -> Result<(UpsertCounts, u64)> {
        let counts = self.repo.upsert_many(batch).await?;
        let mut purged = 0;
        if self.cfg.supersede_synthetic {
            for result in results.iter().filter(|r| r.fallback.is_none()) {
                purged += self
                    .repo
                    .purge_synthetic(&result.unit.region, result.unit.sub_region.as_deref())
                    .await?;
            }
        }
        Ok((counts, purged))
    }
}

fn advance(run_id: Uuid, from: RunPhase, to: RunPhase) -> RunPhase {
    debug!(%run_id, ?from, ?to, "phase change");
    to
}
