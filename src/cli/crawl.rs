use anyhow::{bail, Context, Result};
use futures::future::join_all;
use itertools::Itertools;
use tracing::{error, info};

use crate::cli::{connect, open_repository};
use crate::config::PipelineConfig;
use crate::database_ops::fetcher::fetcher_for;
use crate::model::Retailer;
use crate::orchestrator::{AggregationOrchestrator, RunSummary};

#[derive(Debug, Clone, Default)]
pub struct CrawlConfig {
    /// Retailers to aggregate; empty means all of them.
    pub retailers: Vec<Retailer>,
    /// Skip the network and fill every unit with synthetic stores.
    pub offline: bool,
    /// Restrict to these regions; empty means the whole catalog.
    pub regions: Vec<String>,
    /// Overrides the environment-derived pipeline settings.
    pub pipeline: Option<PipelineConfig>,
}

/// Run one aggregation per retailer, concurrently, against a shared database.
pub async fn run(cfg: CrawlConfig) -> Result<Vec<RunSummary>> {
    let pipeline = match cfg.pipeline {
        Some(p) => p,
        None => PipelineConfig::from_env()?,
    };
    let retailers = if cfg.retailers.is_empty() {
        Retailer::all()
    } else {
        cfg.retailers
    };
    let db = connect(&pipeline).await?;
    info!(
        retailers = ?retailers.iter().map(|r| r.slug()).collect::<Vec<_>>(),
        offline = cfg.offline,
        "crawl starting"
    );

    let runs = retailers.iter().map(|&retailer| {
        let db = db.clone();
        let pipeline = pipeline.clone();
        let regions = &cfg.regions;
        let offline = cfg.offline;
        async move {
            let repo = open_repository(&db, retailer).await?;
            let fetcher = fetcher_for(retailer, &pipeline, offline);
            let orchestrator = AggregationOrchestrator::new(fetcher, repo, pipeline)?.with_regions(regions.as_slice())?;
            orchestrator
                .run()
                .await
                .with_context(|| format!("{} run aborted", retailer.slug()))
        }
    });

    let mut summaries = Vec::with_capacity(retailers.len());
    let mut first_err = None;
    for outcome in join_all(runs).await {
        match outcome {
            Ok(summary) => summaries.push(summary),
            Err(e) => {
                error!(error = %format!("{e:#}"), "crawl failed");
                first_err.get_or_insert(e);
            }
        }
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(summaries),
    }
}

/// Print every summary; fail if any run aggregated nothing or could not export.
pub fn report(summaries: &[RunSummary]) -> Result<()> {
    for summary in summaries {
        println!("{summary}");
    }
    let failed = summaries
        .iter()
        .filter(|s| s.is_failure())
        .map(|s| s.retailer.slug())
        .join(", ");
    if !failed.is_empty() {
        bail!("crawl incomplete for {failed}");
    }
    Ok(())
}
