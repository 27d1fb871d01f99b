//! One batch run: fetch everything, work out what is new, hand it to the
//! output handlers and persist the cache.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::cache::FeedCache;
use crate::config::Config;
use crate::feed::{build_client, fetch_all, FetchError, ParserRegistry};
use crate::hooks::{HookBus, HookEvent};
use crate::output::{build_handlers, dispatch, ChannelUpdate, OutputError, OutputRegistry};
use crate::registry::RegistryError;

/// Errors that stop a run before any feed is fetched.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Output(#[from] OutputError),

    #[error("Failed to set up HTTP client: {0}")]
    Client(#[from] FetchError),
}

/// Summary of a finished run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub feeds_fetched: usize,
    /// Sections of the feeds that failed, in declaration order.
    pub feeds_failed: Vec<String>,
    pub new_items: usize,
    pub handlers_succeeded: Vec<String>,
    pub handlers_failed: Vec<String>,
    pub pruned: usize,
    pub cache_entries: usize,
    pub cache_saved: bool,
}

pub struct Runner {
    config: Config,
    hooks: HookBus,
    parsers: ParserRegistry,
    outputs: OutputRegistry,
}

impl Runner {
    pub fn new(config: Config, hooks: HookBus) -> Self {
        Self {
            config,
            hooks,
            parsers: ParserRegistry::with_builtin(),
            outputs: OutputRegistry::with_builtin(),
        }
    }

    pub fn with_parsers(mut self, parsers: ParserRegistry) -> Self {
        self.parsers = parsers;
        self
    }

    pub fn with_outputs(mut self, outputs: OutputRegistry) -> Self {
        self.outputs = outputs;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Executes one run as of `now`.
    ///
    /// # Errors
    ///
    /// Only setup failures are errors: an unknown parser or output class, a
    /// handler section the sink rejects, or an HTTP client that cannot be
    /// built. Feed, sink and cache-save failures are logged and reflected in
    /// the returned [`RunReport`].
    pub async fn run(&self, now: DateTime<Utc>) -> Result<RunReport, RunError> {
        let config = &self.config;
        let settings = config.settings();

        let parser = self.parsers.get(&settings.parser)?;
        let mut handlers = build_handlers(&self.outputs, config.handlers(), settings)?;
        let client = build_client(settings)?;

        let mut cache = match &settings.cache_file {
            Some(path) => FeedCache::load(path).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Cache unreadable, starting with an empty cache");
                FeedCache::new()
            }),
            None => FeedCache::new(),
        };

        let results = fetch_all(&client, config, parser.as_ref(), &self.hooks).await;

        let mut report = RunReport::default();
        let mut updates = Vec::new();
        for fetched in results {
            let policy = &config.feeds()[fetched.index];
            let channel = match fetched.result {
                Ok(channel) => channel,
                Err(_) => {
                    report.feeds_failed.push(policy.section.clone());
                    continue;
                }
            };
            report.feeds_fetched += 1;

            let fresh = cache.filter_new(policy.url.as_str(), channel.items(), now);
            tracing::debug!(feed = %policy.url, new_items = fresh.len(), "Merged feed");
            if fresh.is_empty() {
                continue;
            }
            report.new_items += fresh.len();

            let mut channel = channel;
            channel.set_items(fresh);
            updates.push(ChannelUpdate::new(policy, channel));
        }

        if config.is_download_only() {
            tracing::info!(new_items = report.new_items, "No output handlers configured, download only");
        } else {
            let dispatched = dispatch(&mut handlers, &updates, &settings.display(), &self.hooks);
            report.handlers_succeeded = dispatched.succeeded;
            report.handlers_failed = dispatched.failed;
        }

        report.pruned = cache.prune(now, |url| config.retention_for(url));
        report.cache_entries = cache.len();

        match self.hooks.fire(&HookEvent::PreCacheSave { cache: &cache }) {
            Err(e) => tracing::warn!(error = %e, "PreCacheSave hook failed, cache not saved"),
            Ok(()) => report.cache_saved = self.save_cache(&cache),
        }

        tracing::info!(
            fetched = report.feeds_fetched,
            failed = report.feeds_failed.len(),
            new_items = report.new_items,
            pruned = report.pruned,
            cache_saved = report.cache_saved,
            "Run complete"
        );
        Ok(report)
    }

    fn save_cache(&self, cache: &FeedCache) -> bool {
        let settings = self.config.settings();
        if !settings.update_cache {
            tracing::debug!("Cache update disabled");
            return false;
        }
        let Some(path) = &settings.cache_file else {
            return false;
        };

        match cache.save(path, settings.total_cache_backups) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to save cache");
                false
            }
        }
    }
}
