use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;

use feedpoll::config::{self, RawConfig, MAIN_SECTION};
use feedpoll::hooks::HookBus;
use feedpoll::Runner;

#[derive(Parser, Debug)]
#[command(
    name = "feedpoll",
    version,
    about = "Poll RSS/Atom feeds and report only the items that are new since the last run"
)]
struct Args {
    /// Configuration file (TOML)
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Fetch and report, but leave the cache file untouched
    #[arg(long)]
    no_cache_update: bool,

    /// Maximum number of feeds fetched concurrently
    #[arg(long, value_name = "N")]
    max_threads: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut raw = RawConfig::load(&args.config)
        .with_context(|| format!("Failed to read config file '{}'", args.config.display()))?;

    // Command-line overrides go through the loader like any other variable,
    // so they are validated and seen by observers.
    if args.no_cache_update {
        raw.section_mut(MAIN_SECTION).push("NoCacheUpdate", "true");
    }
    if let Some(n) = args.max_threads {
        raw.section_mut(MAIN_SECTION).push("MaxThreads", n.to_string());
    }

    let hooks = HookBus::new();
    let config = config::load(&raw, &hooks)
        .with_context(|| format!("Invalid configuration in '{}'", args.config.display()))?;

    let report = Runner::new(config, hooks)
        .run(Utc::now())
        .await
        .context("Run aborted")?;

    if !report.feeds_failed.is_empty() {
        tracing::warn!(feeds = ?report.feeds_failed, "Some feeds could not be fetched");
    }
    if !report.handlers_failed.is_empty() {
        tracing::warn!(handlers = ?report.handlers_failed, "Some output handlers failed");
    }

    Ok(())
}
