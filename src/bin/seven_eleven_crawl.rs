use anyhow::Result;
use clap::Parser;
use cvs_directory::cli::crawl::{report, run, CrawlConfig};
use cvs_directory::model::Retailer;
use cvs_directory::util::env;

/// Crawl every 7-ELEVEN store, persist, and export the cart feed.
#[derive(Parser, Debug)]
#[command(name = "seven_eleven_crawl", version)]
struct Args {
    /// Skip the network; every unit gets synthetic stores
    #[arg(long, default_value_t = false)]
    offline: bool,
    /// Restrict to these regions (repeatable or comma-separated)
    #[arg(long = "region", value_delimiter = ',')]
    regions: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env::bootstrap_cli("seven_eleven_crawl");
    let args = Args::parse();

    let summaries = run(CrawlConfig {
        retailers: vec![Retailer::SevenEleven],
        offline: args.offline,
        regions: args.regions,
        pipeline: None,
    })
    .await?;
    report(&summaries)
}
