//! Policy model: global defaults, per-feed policies and output handler specs.
//!
//! Everything here is built once by [`crate::config::load`] and read-only
//! afterwards.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use url::Url;

use crate::util::EditCommand;

pub const DEF_DAYS_TO_CACHE: u32 = 365;
pub const DEF_TOTAL_CACHE_BACKUPS: usize = 0;
pub const DEF_MAX_THREADS: usize = 5;
pub const DEF_FETCH_TIMEOUT_SECS: u64 = 30;
pub const DEF_SMTP_HOST: &str = "localhost";
pub const DEF_EMAIL_SUBJECT: &str = "feedpoll output";
pub const DEF_PARSER: &str = "feed-rs";

/// How long a seen item is remembered by the dedup cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionDays {
    Days(u32),
    /// Configured with the `NoLimit` sentinel; never evicted.
    Unbounded,
}

impl RetentionDays {
    pub fn window(self) -> Option<chrono::Duration> {
        match self {
            RetentionDays::Days(days) => Some(chrono::Duration::days(i64::from(days))),
            RetentionDays::Unbounded => None,
        }
    }

    /// True once `now - last_seen` is strictly longer than the window.
    pub fn is_expired(self, last_seen: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match self.window() {
            Some(window) => now.signed_duration_since(last_seen) > window,
            None => false,
        }
    }
}

impl Default for RetentionDays {
    fn default() -> Self {
        RetentionDays::Days(DEF_DAYS_TO_CACHE)
    }
}

impl fmt::Display for RetentionDays {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetentionDays::Days(days) => write!(f, "{days}"),
            RetentionDays::Unbounded => f.write_str("NoLimit"),
        }
    }
}

/// `feedpoll/<version> (+<repository>)`
pub fn default_user_agent() -> String {
    format!(
        "{}/{} (+{})",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        env!("CARGO_PKG_REPOSITORY")
    )
}

/// Values from the main configuration section.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalSettings {
    pub cache_file: Option<PathBuf>,
    pub total_cache_backups: usize,
    pub update_cache: bool,
    pub summary_only: bool,
    /// `None` means unlimited.
    pub max_summary_size: Option<usize>,
    pub default_retention: RetentionDays,
    /// Identifier looked up in the parser registry.
    pub parser: String,
    pub show_rss_version: bool,
    pub show_dates: bool,
    pub show_authors: bool,
    pub allow_embedded_html: bool,
    pub smtp_host: String,
    pub email_sender: Option<String>,
    pub email_subject: String,
    pub get_gzipped_feeds: bool,
    pub max_threads: usize,
    pub fetch_timeout: Duration,
    pub user_agent: String,
    /// Unrecognized main-section variables, in declaration order.
    pub extras: Vec<(String, String)>,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            cache_file: None,
            total_cache_backups: DEF_TOTAL_CACHE_BACKUPS,
            update_cache: true,
            summary_only: false,
            max_summary_size: None,
            default_retention: RetentionDays::default(),
            parser: DEF_PARSER.to_string(),
            show_rss_version: false,
            show_dates: false,
            show_authors: false,
            allow_embedded_html: false,
            smtp_host: DEF_SMTP_HOST.to_string(),
            email_sender: None,
            email_subject: DEF_EMAIL_SUBJECT.to_string(),
            get_gzipped_feeds: true,
            max_threads: DEF_MAX_THREADS,
            fetch_timeout: Duration::from_secs(DEF_FETCH_TIMEOUT_SECS),
            user_agent: default_user_agent(),
            extras: Vec::new(),
        }
    }
}

impl GlobalSettings {
    pub fn extra(&self, name: &str) -> Option<&str> {
        lookup_last(&self.extras, name)
    }

    pub fn display(&self) -> DisplayOptions {
        DisplayOptions {
            show_dates: self.show_dates,
            show_authors: self.show_authors,
            show_rss_version: self.show_rss_version,
        }
    }
}

/// Display flags handed to every output sink.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DisplayOptions {
    pub show_dates: bool,
    pub show_authors: bool,
    pub show_rss_version: bool,
}

/// Per-feed policy, seeded from [`GlobalSettings`] and overridden by the
/// feed's own section.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedPolicy {
    /// Name of the configuration section that declared the feed.
    pub section: String,
    /// Canonical feed URL.
    pub url: Url,
    pub enabled: bool,
    pub retention: RetentionDays,
    pub prune_urls: bool,
    pub summary_only: bool,
    pub max_summary_size: Option<usize>,
    pub show_authors: bool,
    pub allow_embedded_html: bool,
    pub ignore_duplicate_titles: bool,
    pub title_override: Option<String>,
    pub item_url_edit: Option<EditCommand>,
    pub forced_encoding: Option<String>,
    /// Applied to the raw payload in order, before parsing.
    pub preparse_edits: Vec<EditCommand>,
    pub user_agent: String,
}

impl FeedPolicy {
    pub fn new(section: &str, url: Url, settings: &GlobalSettings) -> Self {
        Self {
            section: section.to_string(),
            url,
            enabled: true,
            retention: settings.default_retention,
            prune_urls: false,
            summary_only: settings.summary_only,
            max_summary_size: settings.max_summary_size,
            show_authors: settings.show_authors,
            allow_embedded_html: settings.allow_embedded_html,
            ignore_duplicate_titles: false,
            title_override: None,
            item_url_edit: None,
            forced_encoding: None,
            preparse_edits: Vec::new(),
            user_agent: settings.user_agent.clone(),
        }
    }
}

/// A configured output handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputHandlerSpec {
    /// Section name; unique per configuration.
    pub name: String,
    /// Identifier looked up in the output registry.
    pub implementation: String,
    /// Every other variable of the section, verbatim and in order.
    pub extras: Vec<(String, String)>,
    pub disabled: bool,
}

impl OutputHandlerSpec {
    pub fn new(name: &str, implementation: &str) -> Self {
        Self {
            name: name.to_string(),
            implementation: implementation.to_string(),
            extras: Vec::new(),
            disabled: false,
        }
    }

    /// Last value given for `name`.
    pub fn extra(&self, name: &str) -> Option<&str> {
        lookup_last(&self.extras, name)
    }
}

/// The loaded configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub(crate) settings: GlobalSettings,
    pub(crate) feeds: Vec<FeedPolicy>,
    pub(crate) feed_index: HashMap<String, usize>,
    pub(crate) handlers: Vec<OutputHandlerSpec>,
}

impl Config {
    pub fn settings(&self) -> &GlobalSettings {
        &self.settings
    }

    /// All feeds in declaration order, including disabled ones.
    pub fn feeds(&self) -> &[FeedPolicy] {
        &self.feeds
    }

    pub fn enabled_feeds(&self) -> impl Iterator<Item = &FeedPolicy> {
        self.feeds.iter().filter(|f| f.enabled)
    }

    /// Looks up a feed by its canonical URL.
    pub fn feed_for(&self, url: &str) -> Option<&FeedPolicy> {
        self.feed_index.get(url).map(|&i| &self.feeds[i])
    }

    pub fn has_feed(&self, url: &str) -> bool {
        self.feed_index.contains_key(url)
    }

    /// Active output handlers in declaration order.
    pub fn handlers(&self) -> &[OutputHandlerSpec] {
        &self.handlers
    }

    pub fn is_download_only(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Retention for cache entries owned by `channel_url`; the global default
    /// when the feed is no longer configured.
    pub fn retention_for(&self, channel_url: &str) -> RetentionDays {
        self.feed_for(channel_url)
            .map_or(self.settings.default_retention, |f| f.retention)
    }
}

fn lookup_last<'a>(pairs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    pairs
        .iter()
        .rev()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_retention_boundary() {
        let now = Utc.with_ymd_and_hms(2024, 6, 30, 0, 0, 0).unwrap();
        let retention = RetentionDays::Days(30);

        let exactly = now - chrono::Duration::days(30);
        assert!(!retention.is_expired(exactly, now));

        let older = exactly - chrono::Duration::seconds(1);
        assert!(retention.is_expired(older, now));
    }

    #[test]
    fn test_unbounded_never_expires() {
        let now = Utc.with_ymd_and_hms(2024, 6, 30, 0, 0, 0).unwrap();
        let ancient = Utc.with_ymd_and_hms(1990, 1, 1, 0, 0, 0).unwrap();
        assert!(!RetentionDays::Unbounded.is_expired(ancient, now));
        assert_eq!(RetentionDays::Unbounded.to_string(), "NoLimit");
    }

    #[test]
    fn test_feed_policy_inherits_globals() {
        let settings = GlobalSettings {
            summary_only: true,
            max_summary_size: Some(120),
            default_retention: RetentionDays::Days(7),
            user_agent: "agent/1".to_string(),
            ..GlobalSettings::default()
        };
        let url = Url::parse("https://example.com/rss").unwrap();
        let policy = FeedPolicy::new("Feed example", url, &settings);

        assert!(policy.enabled);
        assert!(policy.summary_only);
        assert_eq!(policy.max_summary_size, Some(120));
        assert_eq!(policy.retention, RetentionDays::Days(7));
        assert_eq!(policy.user_agent, "agent/1");
    }

    #[test]
    fn test_default_user_agent_shape() {
        let agent = default_user_agent();
        assert!(agent.starts_with("feedpoll/"));
        assert!(agent.ends_with(')'));
        assert!(agent.contains("(+https://"));
        assert_eq!(
            agent,
            format!("feedpoll/{} (+{})", env!("CARGO_PKG_VERSION"), env!("CARGO_PKG_REPOSITORY"))
        );
    }

    #[test]
    fn test_handler_extra_last_wins() {
        let mut spec = OutputHandlerSpec::new("OutputHandlerText", "text");
        spec.extras.push(("Path".into(), "/tmp/a".into()));
        spec.extras.push(("Path".into(), "/tmp/b".into()));
        assert_eq!(spec.extra("Path"), Some("/tmp/b"));
        assert_eq!(spec.extra("Missing"), None);
    }
}
