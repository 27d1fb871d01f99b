//! Turns a [`RawConfig`] into a [`Config`].
//!
//! The main section is processed first so feed sections can be seeded from
//! its values. The remaining sections are then visited in declaration order
//! and classified by name prefix. Every variable that is assigned fires the
//! matching load-time hook; a hook error aborts the load like any other
//! configuration error.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use super::raw::{RawConfig, RawSection};
use super::settings::{
    default_user_agent, Config, FeedPolicy, GlobalSettings, OutputHandlerSpec, RetentionDays,
};
use super::ConfigError;
use crate::hooks::{HookBus, HookEvent};
use crate::util::{normalize_url, EditCommand};

pub const MAIN_SECTION: &str = "feedpoll";
pub const FEED_SECTION_PREFIX: &str = "Feed";
pub const OUTPUT_HANDLER_PREFIX: &str = "OutputHandler";
/// Day-count sentinel meaning "never evict".
pub const NO_LIMIT_VALUE: &str = "NoLimit";

const VAR_CACHE_FILE: &str = "CacheFile";
const VAR_TOTAL_CACHE_BACKUPS: &str = "TotalCacheBackups";
const VAR_NO_CACHE_UPDATE: &str = "NoCacheUpdate";
const VAR_SUMMARY_ONLY: &str = "SummaryOnly";
const VAR_MAX_SUMMARY_SIZE: &str = "MaxSummarySize";
const VAR_DAYS_TO_CACHE: &str = "DaysToCache";
const VAR_PARSER_CLASS: &str = "ParserClass";
const VAR_PRUNE_URLS: &str = "PruneURLs";
const VAR_SHOW_RSS_VERSION: &str = "ShowRSSVersion";
const VAR_SMTP_HOST: &str = "SMTPHost";
const VAR_EMAIL_SENDER: &str = "MailFrom";
const VAR_EMAIL_SUBJECT: &str = "MailSubject";
const VAR_SHOW_DATES: &str = "ShowDates";
const VAR_TITLE_OVERRIDE: &str = "TitleOverride";
const VAR_EDIT_ITEM_URL: &str = "EditItemURL";
const VAR_PREPARSE_EDIT: &str = "PreparseEdit";
const VAR_DISABLED: &str = "Disabled";
const VAR_SHOW_AUTHORS: &str = "ShowAuthors";
const VAR_FEED_URL: &str = "URL";
const VAR_CLASS: &str = "Class";
const VAR_GET_GZIPPED_FEEDS: &str = "GetGzippedFeeds";
const VAR_MAX_THREADS: &str = "MaxThreads";
const VAR_FETCH_TIMEOUT: &str = "FetchTimeout";
const VAR_IGNORE_DUP_TITLES: &str = "IgnoreDuplicateTitles";
const VAR_FORCE_ENCODING: &str = "ForceEncoding";
const VAR_FORCE_CHAR_ENCODING: &str = "ForceCharacterEncoding";
const VAR_USER_AGENT: &str = "UserAgent";
const VAR_ALLOW_EMBEDDED_HTML: &str = "AllowEmbeddedHTML";

/// Loads the policy model from `raw`, firing load-time hooks on `hooks`.
///
/// # Errors
///
/// Any [`ConfigError`]; the first error aborts the whole load.
pub fn load(raw: &RawConfig, hooks: &HookBus) -> Result<Config, ConfigError> {
    let main = raw
        .section(MAIN_SECTION)
        .ok_or_else(|| ConfigError::MissingSection(MAIN_SECTION.to_string()))?;

    let mut config = Config {
        settings: process_main_section(main, hooks)?,
        feeds: Vec::new(),
        feed_index: HashMap::new(),
        handlers: Vec::new(),
    };

    for section in raw.sections() {
        let name = section.name();
        if name == MAIN_SECTION {
            continue;
        }

        if name.starts_with(FEED_SECTION_PREFIX) {
            let policy = process_feed_section(section, &config.settings, hooks)?;
            add_feed(&mut config, policy);
        } else if name.starts_with(OUTPUT_HANDLER_PREFIX) {
            if let Some(handler) = process_output_handler_section(section, &config.settings, hooks)? {
                config.handlers.push(handler);
            }
        } else {
            process_unknown_section(section, &config.settings, hooks)?;
        }
    }

    tracing::info!(
        feeds = config.feeds.len(),
        handlers = config.handlers.len(),
        download_only = config.is_download_only(),
        "Loaded configuration"
    );
    Ok(config)
}

fn add_feed(config: &mut Config, policy: FeedPolicy) {
    let key = policy.url.to_string();
    if let Some(prev) = config.feed_index.insert(key, config.feeds.len()) {
        tracing::warn!(
            url = %policy.url,
            section = %policy.section,
            previous = %config.feeds[prev].section,
            "Feed URL configured more than once; later section wins lookups"
        );
    }
    config.feeds.push(policy);
}

fn process_main_section(section: &RawSection, hooks: &HookBus) -> Result<GlobalSettings, ConfigError> {
    let name = section.name();
    let mut settings = GlobalSettings::default();

    for (var, value) in section.entries() {
        match var {
            VAR_CACHE_FILE => {
                let path = PathBuf::from(value.trim());
                if path.is_dir() {
                    return Err(ConfigError::CacheFileIsDirectory(path.display().to_string()));
                }
                settings.cache_file = Some(path);
            }
            VAR_DAYS_TO_CACHE => settings.default_retention = parse_retention(name, var, value)?,
            VAR_TOTAL_CACHE_BACKUPS => {
                settings.total_cache_backups = parse_cardinal(name, var, value)?
            }
            VAR_NO_CACHE_UPDATE => settings.update_cache = !parse_bool(name, var, value)?,
            VAR_SUMMARY_ONLY => settings.summary_only = parse_bool(name, var, value)?,
            VAR_MAX_SUMMARY_SIZE => {
                settings.max_summary_size = Some(parse_cardinal(name, var, value)?)
            }
            VAR_SHOW_RSS_VERSION => settings.show_rss_version = parse_bool(name, var, value)?,
            VAR_SHOW_DATES => settings.show_dates = parse_bool(name, var, value)?,
            VAR_SHOW_AUTHORS => settings.show_authors = parse_bool(name, var, value)?,
            VAR_ALLOW_EMBEDDED_HTML => {
                settings.allow_embedded_html = parse_bool(name, var, value)?
            }
            VAR_GET_GZIPPED_FEEDS => settings.get_gzipped_feeds = parse_bool(name, var, value)?,
            VAR_PARSER_CLASS => settings.parser = value.trim().to_string(),
            VAR_SMTP_HOST => settings.smtp_host = value.trim().to_string(),
            VAR_EMAIL_SENDER => settings.email_sender = Some(value.trim().to_string()),
            VAR_EMAIL_SUBJECT => settings.email_subject = value.to_string(),
            VAR_MAX_THREADS => settings.max_threads = parse_positive(name, var, value)?,
            VAR_FETCH_TIMEOUT => {
                let secs = parse_positive(name, var, value)?;
                settings.fetch_timeout = Duration::from_secs(secs as u64);
            }
            VAR_USER_AGENT => {
                settings.user_agent = match value.trim() {
                    "" => default_user_agent(),
                    agent => agent.to_string(),
                }
            }
            _ => settings.extras.push((var.to_string(), value.to_string())),
        }

        hooks.fire(&HookEvent::MainSectionItem {
            section: name,
            variable: var,
            settings: &settings,
        })?;
    }

    Ok(settings)
}

fn process_feed_section(
    section: &RawSection,
    settings: &GlobalSettings,
    hooks: &HookBus,
) -> Result<FeedPolicy, ConfigError> {
    let name = section.name();
    let url_str = section
        .get(VAR_FEED_URL)
        .ok_or_else(|| ConfigError::MissingVariable {
            section: name.to_string(),
            variable: VAR_FEED_URL.to_string(),
        })?;
    let url = normalize_url(url_str).map_err(|e| ConfigError::BadFeedURL {
        section: name.to_string(),
        url: url_str.to_string(),
        reason: e.to_string(),
    })?;
    tracing::debug!(section = name, url = %url, "Configured feed");

    let mut policy = FeedPolicy::new(name, url, settings);

    for (var, value) in section.entries() {
        match var {
            // Already applied above; still reported to observers in place.
            VAR_FEED_URL => {}
            VAR_DAYS_TO_CACHE => policy.retention = parse_retention(name, var, value)?,
            VAR_PRUNE_URLS => policy.prune_urls = parse_bool(name, var, value)?,
            VAR_SUMMARY_ONLY => policy.summary_only = parse_bool(name, var, value)?,
            VAR_MAX_SUMMARY_SIZE => {
                policy.max_summary_size = Some(parse_cardinal(name, var, value)?)
            }
            VAR_DISABLED => policy.enabled = !parse_bool(name, var, value)?,
            VAR_IGNORE_DUP_TITLES => {
                policy.ignore_duplicate_titles = parse_bool(name, var, value)?
            }
            VAR_TITLE_OVERRIDE => policy.title_override = Some(value.to_string()),
            VAR_EDIT_ITEM_URL => policy.item_url_edit = Some(parse_edit(name, var, value)?),
            VAR_FORCE_ENCODING | VAR_FORCE_CHAR_ENCODING => {
                policy.forced_encoding = Some(value.trim().to_string())
            }
            VAR_USER_AGENT => policy.user_agent = value.trim().to_string(),
            VAR_SHOW_AUTHORS => policy.show_authors = parse_bool(name, var, value)?,
            VAR_ALLOW_EMBEDDED_HTML => {
                policy.allow_embedded_html = parse_bool(name, var, value)?
            }
            _ if var.starts_with(VAR_PREPARSE_EDIT) => {
                policy.preparse_edits.push(parse_edit(name, var, value)?)
            }
            _ => {}
        }

        hooks.fire(&HookEvent::FeedConfigItem {
            section: name,
            variable: var,
            settings,
            policy: &policy,
        })?;
    }

    Ok(policy)
}

/// Returns `None` for a disabled handler. Only its `Class` and `Disabled`
/// variables are reported to observers in that case.
fn process_output_handler_section(
    section: &RawSection,
    settings: &GlobalSettings,
    hooks: &HookBus,
) -> Result<Option<OutputHandlerSpec>, ConfigError> {
    let name = section.name();
    let class = section
        .get(VAR_CLASS)
        .ok_or_else(|| ConfigError::MissingVariable {
            section: name.to_string(),
            variable: VAR_CLASS.to_string(),
        })?;

    let mut handler = OutputHandlerSpec::new(name, class.trim());
    fire_handler_item(hooks, name, VAR_CLASS, settings, &handler)?;

    if let Some(value) = section.get(VAR_DISABLED) {
        handler.disabled = parse_bool(name, VAR_DISABLED, value)?;
        fire_handler_item(hooks, name, VAR_DISABLED, settings, &handler)?;
        if handler.disabled {
            tracing::debug!(handler = name, "Skipping disabled output handler");
            return Ok(None);
        }
    }

    for (var, value) in section.entries() {
        if var == VAR_CLASS || var == VAR_DISABLED {
            continue;
        }
        handler.extras.push((var.to_string(), value.to_string()));
        fire_handler_item(hooks, name, var, settings, &handler)?;
    }

    tracing::debug!(
        handler = name,
        implementation = %handler.implementation,
        "Configured output handler"
    );
    Ok(Some(handler))
}

fn fire_handler_item(
    hooks: &HookBus,
    section: &str,
    variable: &str,
    settings: &GlobalSettings,
    handler: &OutputHandlerSpec,
) -> Result<(), ConfigError> {
    hooks.fire(&HookEvent::OutputHandlerConfigItem {
        section,
        variable,
        settings,
        handler,
    })?;
    Ok(())
}

fn process_unknown_section(
    section: &RawSection,
    settings: &GlobalSettings,
    hooks: &HookBus,
) -> Result<(), ConfigError> {
    for (var, value) in section.entries() {
        hooks.fire(&HookEvent::UnknownSectionConfigItem {
            section: section.name(),
            variable: var,
            value,
            settings,
        })?;
    }
    Ok(())
}

// ============================================================================
// Typed value parsing
// ============================================================================

fn parse_bool(section: &str, variable: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(ConfigError::BadBooleanValue {
            section: section.to_string(),
            variable: variable.to_string(),
            value: value.to_string(),
        }),
    }
}

fn parse_cardinal(section: &str, variable: &str, value: &str) -> Result<usize, ConfigError> {
    let bad_number = || ConfigError::BadNumericValue {
        section: section.to_string(),
        variable: variable.to_string(),
        value: value.to_string(),
    };

    let n: i64 = value.trim().parse().map_err(|_| bad_number())?;
    if n < 0 {
        return Err(ConfigError::NegativeCardinal {
            section: section.to_string(),
            variable: variable.to_string(),
            value: value.to_string(),
        });
    }
    usize::try_from(n).map_err(|_| bad_number())
}

fn parse_positive(section: &str, variable: &str, value: &str) -> Result<usize, ConfigError> {
    match parse_cardinal(section, variable, value)? {
        0 => Err(ConfigError::BadPositiveValue {
            section: section.to_string(),
            variable: variable.to_string(),
            value: value.to_string(),
        }),
        n => Ok(n),
    }
}

fn parse_retention(section: &str, variable: &str, value: &str) -> Result<RetentionDays, ConfigError> {
    if value.trim().eq_ignore_ascii_case(NO_LIMIT_VALUE) {
        return Ok(RetentionDays::Unbounded);
    }
    let days = parse_cardinal(section, variable, value)?;
    u32::try_from(days)
        .map(RetentionDays::Days)
        .map_err(|_| ConfigError::BadNumericValue {
            section: section.to_string(),
            variable: variable.to_string(),
            value: value.to_string(),
        })
}

fn parse_edit(section: &str, variable: &str, value: &str) -> Result<EditCommand, ConfigError> {
    EditCommand::parse(value).map_err(|source| ConfigError::BadEditCommand {
        section: section.to_string(),
        variable: variable.to_string(),
        source,
    })
}

// ============================================================================
// Tests
// ============================================================================
