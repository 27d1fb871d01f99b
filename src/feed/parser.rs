use std::sync::Arc;

use chrono::{DateTime, Utc};
use feed_rs::model::{self, FeedType};
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::{Channel, Item, MiniRssParser};
use crate::registry::RegistryError;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Malformed feed: {0}")]
    Malformed(String),

    #[error("Document is not an RSS or Atom feed (root element <{0}>)")]
    UnsupportedDocument(String),
}

/// A pluggable feed-parsing backend.
pub trait FeedParser: Send + Sync {
    /// Identifier used by the `ParserClass` setting.
    fn id(&self) -> &str;

    fn parse(&self, text: &str) -> Result<Channel, ParseError>;
}

/// Identifier → parser lookup. Built once at startup.
#[derive(Clone)]
pub struct ParserRegistry {
    parsers: Vec<Arc<dyn FeedParser>>,
}

impl ParserRegistry {
    pub fn empty() -> Self {
        Self {
            parsers: Vec::new(),
        }
    }

    /// Registry holding `feed-rs` and `minirss`.
    pub fn with_builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(FeedRsParser));
        registry.register(Arc::new(MiniRssParser));
        registry
    }

    /// Adds `parser`, replacing any parser already registered under its id.
    pub fn register(&mut self, parser: Arc<dyn FeedParser>) {
        self.parsers.retain(|p| p.id() != parser.id());
        self.parsers.push(parser);
    }

    pub fn ids(&self) -> Vec<String> {
        self.parsers.iter().map(|p| p.id().to_string()).collect()
    }

    pub fn get(&self, id: &str) -> Result<Arc<dyn FeedParser>, RegistryError> {
        self.parsers
            .iter()
            .find(|p| p.id() == id)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownParser {
                id: id.to_string(),
                available: self.ids(),
            })
    }
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

/// Full-featured backend on top of the `feed-rs` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeedRsParser;

impl FeedParser for FeedRsParser {
    fn id(&self) -> &str {
        "feed-rs"
    }

    fn parse(&self, text: &str) -> Result<Channel, ParseError> {
        // feed-rs invents ids (link hash or random UUID) for entries without
        // one; leave them empty so `item_key` derives a stable key instead.
        let feed = feed_rs::parser::Builder::new()
            .id_generator(|_, _, _| String::new())
            .build()
            .parse(text.as_bytes())
            .map_err(|e| ParseError::Malformed(e.to_string()))?;

        let mut channel = Channel::new(format_name(&feed.feed_type));
        channel.title = feed.title.map(|t| t.content);
        channel.description = feed.description.map(|t| t.content);
        channel.link = preferred_link(&feed.links);
        channel.published = feed.published.or(feed.updated);
        channel.copyright = feed.rights.map(|t| t.content);
        channel.author = first_author(&feed.authors);

        let items = feed.entries.into_iter().map(convert_entry).collect();
        channel.set_items(items);
        Ok(channel)
    }
}

fn format_name(feed_type: &FeedType) -> &'static str {
    match feed_type {
        FeedType::Atom => "Atom",
        FeedType::JSON => "JSON Feed",
        FeedType::RSS0 => "RSS 0.9x",
        FeedType::RSS1 => "RSS 1.0",
        FeedType::RSS2 => "RSS 2.0",
    }
}

fn first_author(people: &[model::Person]) -> Option<String> {
    people
        .iter()
        .map(|p| p.name.trim())
        .find(|name| !name.is_empty())
        .map(str::to_string)
}

/// The `alternate` (or rel-less) link, falling back to the first link that
/// is not the document's own `self` URL.
fn preferred_link(links: &[model::Link]) -> Option<String> {
    links
        .iter()
        .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
        .or_else(|| links.iter().find(|l| l.rel.as_deref() != Some("self")))
        .map(|l| l.href.clone())
}

fn convert_entry(entry: model::Entry) -> Item {
    let link = preferred_link(&entry.links);
    let published = entry.published.or(entry.updated);
    let title = entry.title.map(|t| t.content);
    let key = item_key(
        Some(entry.id.as_str()),
        link.as_deref(),
        title.as_deref().unwrap_or(""),
        published,
    );

    Item {
        key,
        title,
        link,
        summary: entry.summary.map(|s| s.content),
        content: entry.content.and_then(|c| c.body),
        author: first_author(&entry.authors),
        published,
    }
}

/// Stable identity for an item: its GUID when non-blank, else its link, else
/// the SHA-256 hex digest of `title|published`.
pub fn item_key(
    guid: Option<&str>,
    link: Option<&str>,
    title: &str,
    published: Option<DateTime<Utc>>,
) -> String {
    for candidate in [guid, link].into_iter().flatten() {
        let trimmed = candidate.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let input = format!(
        "{}|{}",
        title,
        published.map(|p| p.to_rfc3339()).unwrap_or_default()
    );
    let hash = Sha256::digest(input.as_bytes());
    format!("{:x}", hash)
}
