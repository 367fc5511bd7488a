use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use nypuc_scraper::client::DownstreamClient;
use nypuc_scraper::docket::{scan_docket_ids, DocketId};
use nypuc_scraper::driver::HttpDriver;
use nypuc_scraper::graph::{CrawlConfig, CrawlContext, SiteGraph};
use nypuc_scraper::ledger::Ledger;

const DEFAULT_SEED_FILE: &str = "output_cases.json";

#[derive(Parser)]
#[command(name = "nypuc_scraper", about = "NYPUC case docket crawler")]
struct Cli {
    /// Json file to save the aggregate case data
    #[arg(short, long)]
    output: Option<String>,

    /// Seed case-list json file
    #[arg(short, long, default_value = DEFAULT_SEED_FILE)]
    input: String,

    /// Comma separated list of cases, overriding the seed file
    #[arg(short, long)]
    cases: Option<String>,

    /// Skip the first N seed entries
    #[arg(long, default_value = "0")]
    skip: usize,

    /// Directory for filing files and error logs
    #[arg(long, default_value = ".")]
    data_dir: PathBuf,

    /// Scan an HTML dump for docket ids, write them to the seed file, and exit
    #[arg(long)]
    bootstrap: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let ledger = Ledger::new(&cli.data_dir);

    if let Some(html_path) = &cli.bootstrap {
        let html = std::fs::read_to_string(html_path)
            .with_context(|| format!("reading {}", html_path.display()))?;
        let ids = scan_docket_ids(&html);
        ledger.save_case_list(&cli.input, &ids)?;
        println!("Wrote {} docket ids to {}", ids.len(), cli.input);
        return Ok(());
    }

    let cases: Vec<DocketId> = match &cli.cases {
        Some(list) => list
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.parse().with_context(|| format!("in --cases: {s:?}")))
            .collect::<Result<_>>()?,
        None => ledger.load_case_list(&cli.input, cli.skip)?,
    };
    if cases.is_empty() {
        println!("No cases to crawl. Seed {} or pass --cases.", cli.input);
        return Ok(());
    }
    info!("seeding {} case pages", cases.len());

    let mut graph = SiteGraph::new();
    graph.seed(cases.iter().map(DocketId::case_url));

    let mut ctx = CrawlContext {
        driver: HttpDriver::new(),
        client: DownstreamClient::from_env(),
        ledger,
        config: CrawlConfig::default(),
    };
    let stats = graph.crawl(&mut ctx).await?;
    println!(
        "Crawled {} pages ({} extracted, {} no-case, {} errored, {} skipped).",
        stats.total, stats.extracted, stats.no_case, stats.errored, stats.skipped
    );

    if let Some(output) = &cli.output {
        graph.save_site_state(&ctx.ledger, output)?;
        println!(
            "Saved case data for {} cases to {}",
            graph.case_data().len(),
            output
        );
    }

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }
    Ok(())
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
