use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cvs_directory::cli::{self, crawl, maintenance, query};
use cvs_directory::config::PipelineConfig;
use cvs_directory::model::Retailer;
use cvs_directory::util::env;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "cvs", version, about = "Convenience-store directory admin CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// Aggregate, persist and export store directories
    Crawl {
        /// Only this retailer (default: all)
        #[arg(long, value_enum)]
        retailer: Option<Retailer>,
        /// Skip the network; every unit gets synthetic stores
        #[arg(long, default_value_t = false)]
        offline: bool,
        /// Restrict to these regions (repeatable or comma-separated)
        #[arg(long = "region", value_delimiter = ',')]
        regions: Vec<String>,
        /// Overall run budget in seconds (overrides CVS_RUN_BUDGET_SECS)
        #[arg(long)]
        budget_secs: Option<u64>,
        /// Purge synthetic rows wherever real data arrived (overrides CVS_SUPERSEDE_SYNTHETIC)
        #[arg(long, default_value_t = false)]
        supersede_synthetic: bool,
    },
    /// Rewrite the cart feed from persisted rows
    Export {
        #[arg(long, value_enum)]
        retailer: Option<Retailer>,
    },
    /// List stores in a region as JSON
    ByRegion {
        #[arg(long, value_enum)]
        retailer: Retailer,
        region: String,
    },
    /// Keyword search over name, code and address; prints JSON
    Search {
        #[arg(long, value_enum)]
        retailer: Retailer,
        keyword: String,
    },
    /// Delete synthetic rows for a region or one of its sub-regions
    Reconcile {
        #[arg(long, value_enum)]
        retailer: Retailer,
        #[arg(long)]
        region: String,
        #[arg(long)]
        sub_region: Option<String>,
    },
    /// Row counts per retailer and provenance
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    env::bootstrap_cli("cvs");
    let cli = Cli::parse();
    let mut cfg = PipelineConfig::from_env().context("loading configuration")?;

    match cli.command {
        Commands::Crawl {
            retailer,
            offline,
            regions,
            budget_secs,
            supersede_synthetic,
        } => {
            if let Some(secs) = budget_secs {
                cfg.run_budget = Some(std::time::Duration::from_secs(secs));
            }
            cfg.supersede_synthetic |= supersede_synthetic;
            let summaries = crawl::run(crawl::CrawlConfig {
                retailers: cli::retailers_or_all(retailer),
                offline,
                regions,
                pipeline: Some(cfg),
            })
            .await?;
            crawl::report(&summaries)?;
        }
        Commands::Export { retailer } => {
            let db = cli::connect(&cfg).await?;
            for retailer in cli::retailers_or_all(retailer) {
                let repo = cli::open_repository(&db, retailer).await?;
                let out = maintenance::export(&repo, cfg.export_dir.clone()).await?;
                println!(
                    "{}: {} entries -> {}",
                    retailer.slug(),
                    out.manifest.record_count,
                    out.path.display()
                );
            }
        }
        Commands::ByRegion { retailer, region } => {
            let db = cli::connect(&cfg).await?;
            let repo = cli::open_repository(&db, retailer).await?;
            let rows = query::by_region(&repo, &region).await?;
            println!("{}", query::to_json(&rows)?);
        }
        Commands::Search { retailer, keyword } => {
            let db = cli::connect(&cfg).await?;
            let repo = cli::open_repository(&db, retailer).await?;
            let rows = query::search(&repo, &keyword).await?;
            println!("{}", query::to_json(&rows)?);
        }
        Commands::Reconcile {
            retailer,
            region,
            sub_region,
        } => {
            let db = cli::connect(&cfg).await?;
            let repo = cli::open_repository(&db, retailer).await?;
            let purged = maintenance::reconcile(&repo, &region, sub_region.as_deref()).await?;
            println!("purged {purged} synthetic rows");
        }
        Commands::Stats => {
            let db = cli::connect(&cfg).await?;
            let mut all = Vec::new();
            for retailer in Retailer::all() {
                let repo = cli::open_repository(&db, retailer).await?;
                all.push(query::stats(&repo).await?);
            }
            print!("{}", query::render_stats(&all));
        }
    }
    info!("cvs: done");
    Ok(())
}
