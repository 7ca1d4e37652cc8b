//! Operator CLI for [`cached_path`], the content-addressed download cache.
//!
//! Thin argument-parsing shell over the library facade; no logic beyond
//! dispatching to [`cached_path::Cache`] lives here.

use std::path::PathBuf;

use cached_path::{Cache, ClearTarget};
use clap::{Parser, Subcommand};

/// The `cached-path` CLI.
#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level filter (e.g. `debug`, `cached_path=trace`).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Download `url`, printing the local cache path.
    Get {
        /// The URL to fetch.
        url: String,
        /// Force a re-download even if already cached.
        #[arg(long)]
        update: bool,
    },

    /// Remove entries from the cache.
    Clear {
        /// Remove the entry for a single URL.
        #[arg(long, conflicts_with_all = ["hash", "all"])]
        url: Option<String>,
        /// Remove by hex digest.
        #[arg(long, conflicts_with_all = ["url", "all"])]
        hash: Option<String>,
        /// Remove the entire cache directory tree.
        #[arg(long, conflicts_with_all = ["url", "hash"])]
        all: bool,
    },

    /// Run the consistency checker and print any strays.
    Check {
        /// Recompute and verify each blob's hash.
        #[arg(long)]
        hash: bool,
    },

    /// Export a cache snapshot to a ZIP archive.
    Export {
        /// Destination archive path.
        archive: PathBuf,
        /// URLs to include (default: every cached URL).
        urls: Vec<String>,
    },

    /// Import a cache snapshot from a ZIP archive.
    Import {
        /// Source archive path.
        archive: PathBuf,
        /// URLs to import (default: every URL in the archive).
        urls: Vec<String>,
        /// Re-download URLs that are already cached.
        #[arg(long)]
        update: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&cli.log_level))
        .init();

    let cache = Cache::new()?;

    match cli.command {
        Commands::Get { url, update } => {
            let mut options = cached_path::DownloadOptions::new(&url);
            options.update_cache = update;
            let path = cache.download_with(options)?;
            println!("{}", path.display());
        }
        Commands::Clear { url, hash, all } => {
            let target = if all {
                ClearTarget::All
            } else if let Some(url) = url.as_deref() {
                ClearTarget::Url(url)
            } else if let Some(hash) = hash.as_deref() {
                ClearTarget::HashOrPath(hash)
            } else {
                anyhow::bail!("one of --url, --hash, or --all is required");
            };
            cache.clear(target)?;
        }
        Commands::Check { hash } => {
            let report = cache.check(hash)?;
            if report.strays.is_empty() {
                println!("cache is consistent, no strays");
            } else {
                for stray in &report.strays {
                    println!("stray: {}", stray.display());
                }
            }
        }
        Commands::Export { archive, urls } => {
            let urls = (!urls.is_empty()).then_some(urls.as_slice());
            cache.export(&archive, urls)?;
        }
        Commands::Import {
            archive,
            urls,
            update,
        } => {
            let urls = (!urls.is_empty()).then_some(urls.as_slice());
            cache.import(&archive, urls, update)?;
        }
    }

    Ok(())
}
