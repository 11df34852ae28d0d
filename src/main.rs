/*
 * Pipeline, per source:
 *
 *  Stage 1. Download
 *      chemRxiv: page through the institution's article listing (short),
 *      then fetch the detail document for every id found on disk (full).
 *      bioRxiv: walk the publication feed backward one day at a time, then
 *      fetch the details document for every DOI found in the day files.
 *      Both sources skip anything already cached, so interrupted runs
 *      resume where they stopped.
 *
 *  Stage 2. Process
 *      Flatten the cached detail documents into the summary TSV.
 *
 *  Stage 3. Stats
 *      Clean identifiers, bucket by month, write the aggregate tables.
 *
 * Everything below the cache directory is recomputed on each run; the
 * cache itself is only ever appended to.
 */

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod biorxiv;
mod cache;
mod client;
mod config;
mod error;
mod figshare;
mod gender;
mod orcid;
mod stats;

use crate::config::{Config, Dirs};
use crate::error::Result;
use crate::figshare::FigshareClient;
use crate::gender::NameListDetector;

#[derive(Parser)]
struct Cli {
    /// Directory holding the metadata cache and the generated tables
    datadir: PathBuf,
    /// TOML config file (default: ~/.config/rxiv-trends/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Name-to-gender dictionary for first-author inference (TSV)
    #[arg(long)]
    names: Option<PathBuf>,
    #[command(subcommand)]
    cmd: CliCmd,
}

#[derive(Subcommand)]
enum CliCmd {
    /// Crawl and process chemRxiv preprints
    Chemrxiv {
        /// figshare API token (overrides the config file)
        #[arg(long)]
        token: Option<String>,
        #[command(subcommand)]
        stage: Option<Stage>,
    },
    /// Crawl and process bioRxiv preprints
    Biorxiv {
        #[command(subcommand)]
        stage: Option<Stage>,
    },
}

#[derive(Subcommand, Clone, Copy)]
enum Stage {
    /// Fetch whatever the on-disk cache is missing
    Download,
    /// Flatten the cache into the summary table
    Process,
    /// Derive the aggregate trend tables
    Stats,
}

impl Stage {
    /// A named stage runs alone; no stage means the whole pipeline.
    fn selected(stage: Option<Stage>) -> Vec<Stage> {
        match stage {
            Some(s) => vec![s],
            None => vec![Stage::Download, Stage::Process, Stage::Stats],
        }
    }
}

#[tokio::main]
async fn main() {
    let subscriber = tracing_subscriber::fmt()
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber).unwrap();

    if let Err(e) = run(Cli::parse()).await {
        tracing::error!("{e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref())?;
    let dirs = Dirs::new(cli.datadir);
    let detector = match &cli.names {
        Some(path) => NameListDetector::from_path(path)?,
        None => NameListDetector::empty(),
    };

    match cli.cmd {
        CliCmd::Chemrxiv { token, stage } => {
            let client = FigshareClient::connect(&dirs, &config, token).await?;
            for stage in Stage::selected(stage) {
                match stage {
                    Stage::Download => {
                        client.download_short().await?;
                        client.download_full().await?;
                    }
                    Stage::Process => {
                        let rows = client.normalize(&detector)?;
                        client.write_summary(&rows)?;
                    }
                    Stage::Stats => {
                        let rows = client.normalize(&detector)?;
                        client.write_stats(&rows)?;
                    }
                }
            }
        }
        CliCmd::Biorxiv { stage } => {
            for stage in Stage::selected(stage) {
                match stage {
                    Stage::Download => {
                        let stop = biorxiv::stop_date(&config)?;
                        biorxiv::download_days(&dirs, stop).await?;
                        biorxiv::download_articles(&dirs).await?;
                    }
                    Stage::Process => {
                        let rows = biorxiv::normalize(&dirs, &detector)?;
                        biorxiv::write_summary(&dirs, &rows)?;
                    }
                    Stage::Stats => {
                        let rows = biorxiv::normalize(&dirs, &detector)?;
                        biorxiv::write_stats(&dirs, &rows)?;
                    }
                }
            }
        }
    }
    Ok(())
}
