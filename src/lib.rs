//! Batch RSS/Atom poller.
//!
//! A run loads the configuration into a typed policy model, fetches every
//! enabled feed with bounded concurrency, keeps only items that are not in
//! the dedup cache yet, hands those to the configured output sinks and saves
//! the cache. Observers registered on a [`hooks::HookBus`] see every
//! configuration variable and every processing step.
//!
//! ```ignore
//! let raw = RawConfig::load(Path::new("feedpoll.toml"))?;
//! let hooks = HookBus::new();
//! let config = config::load(&raw, &hooks)?;
//! let report = Runner::new(config, hooks).run(Utc::now()).await?;
//! ```

pub mod cache;
pub mod config;
pub mod feed;
pub mod hooks;
pub mod output;
pub mod registry;
pub mod run;
pub mod util;

pub use run::{RunError, RunReport, Runner};
