//! Configuration: the raw section store, the typed policy model, and the
//! loader that turns one into the other.
//!
//! ```ignore
//! let raw = RawConfig::load(Path::new("feedpoll.toml"))?;
//! let config = config::load(&raw, &hooks)?;
//! for feed in config.enabled_feeds() { /* ... */ }
//! ```

mod loader;
mod raw;
mod settings;

use thiserror::Error;

use crate::hooks::HookError;
use crate::util::EditError;

pub use loader::{
    load, FEED_SECTION_PREFIX, MAIN_SECTION, NO_LIMIT_VALUE, OUTPUT_HANDLER_PREFIX,
};
pub use raw::{RawConfig, RawSection};
pub use settings::{
    default_user_agent, Config, DisplayOptions, FeedPolicy, GlobalSettings, OutputHandlerSpec,
    RetentionDays, DEF_DAYS_TO_CACHE, DEF_MAX_THREADS,
};

// ============================================================================
// Error Types
// ============================================================================

/// Errors that abort a configuration load. No partial configuration is
/// returned alongside any of them.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// SEC-014: Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Variable \"{variable}\" in section \"{section}\" must be a scalar or a list of scalars")]
    UnsupportedValue { section: String, variable: String },

    #[error("The configuration is missing the required \"{0}\" section")]
    MissingSection(String),

    #[error("The configuration is missing required variable \"{variable}\" in section \"{section}\"")]
    MissingVariable { section: String, variable: String },

    #[error("Bad numeric value \"{value}\" for variable \"{variable}\" in section \"{section}\"")]
    BadNumericValue {
        section: String,
        variable: String,
        value: String,
    },

    #[error("Unexpected negative numeric value {value} for variable \"{variable}\" in section \"{section}\"")]
    NegativeCardinal {
        section: String,
        variable: String,
        value: String,
    },

    #[error("Variable \"{variable}\" in section \"{section}\" cannot be {value}; it must be a positive integer")]
    BadPositiveValue {
        section: String,
        variable: String,
        value: String,
    },

    #[error("Bad boolean value \"{value}\" for variable \"{variable}\" in section \"{section}\"")]
    BadBooleanValue {
        section: String,
        variable: String,
        value: String,
    },

    #[error("Section \"{section}\" specifies a bad feed URL \"{url}\": {reason}")]
    BadFeedURL {
        section: String,
        url: String,
        reason: String,
    },

    #[error("Bad edit command for variable \"{variable}\" in section \"{section}\": {source}")]
    BadEditCommand {
        section: String,
        variable: String,
        #[source]
        source: EditError,
    },

    #[error("Configured cache file \"{0}\" is a directory")]
    CacheFileIsDirectory(String),

    #[error("Configuration hook aborted the load: {0}")]
    Hook(#[from] HookError),
}
