//! Feed retrieval and parsing.
//!
//! - [`parser`] - the [`FeedParser`] capability, its registry and the
//!   `feed-rs` backend
//! - [`minirss`] - a small RSS/Atom backend built directly on `quick-xml`
//! - [`policy`] - payload decoding, pre-parse edits and post-parse policy
//! - [`fetcher`] - bounded-concurrency fetch + parse of every enabled feed
//!
//! # Example
//!
//! ```ignore
//! let parser = ParserRegistry::with_builtin().get("feed-rs")?;
//! let client = build_client(config.settings())?;
//! let fetched = fetch_all(&client, &config, parser, &hooks).await;
//! ```

mod fetcher;
mod minirss;
mod parser;
mod policy;

use chrono::{DateTime, Utc};
use serde::Serialize;

pub use fetcher::{build_client, fetch_all, fetch_one, FetchError, FetchResult};
pub use minirss::MiniRssParser;
pub use parser::{item_key, FeedParser, FeedRsParser, ParseError, ParserRegistry};
pub use policy::{apply_policy, apply_preparse_edits, decode_payload, EncodingError};

/// One entry within a [`Channel`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Item {
    /// Stable identity across runs; see [`item_key`].
    pub key: String,
    pub title: Option<String>,
    pub link: Option<String>,
    pub summary: Option<String>,
    pub content: Option<String>,
    pub author: Option<String>,
    pub published: Option<DateTime<Utc>>,
}

/// Parsed channel metadata plus its current item set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Channel {
    pub title: Option<String>,
    pub description: Option<String>,
    pub link: Option<String>,
    pub published: Option<DateTime<Utc>>,
    pub copyright: Option<String>,
    pub author: Option<String>,
    /// Feed format as reported by the parser, e.g. `RSS 2.0` or `Atom`.
    pub format: String,
    items: Vec<Item>,
}

impl Channel {
    pub fn new(format: impl Into<String>) -> Self {
        Self {
            format: format.into(),
            ..Self::default()
        }
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn items_cloned(&self) -> Vec<Item> {
        self.items.clone()
    }

    /// Replaces the item collection wholesale.
    pub fn set_items(&mut self, items: Vec<Item>) {
        self.items = items;
    }

    pub fn items_mut(&mut self) -> &mut Vec<Item> {
        &mut self.items
    }

    pub fn into_items(self) -> Vec<Item> {
        self.items
    }
}
