//! Minimal RSS 0.9x/2.0, RSS 1.0 and Atom reader built on `quick-xml`.
//!
//! Only the handful of elements the rest of the crate consumes are read.
//! Unknown elements and attributes are skipped, and text containing entities
//! `quick-xml` cannot resolve is kept verbatim rather than failing the feed.

use std::borrow::Cow;

use chrono::{DateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::parser::{item_key, FeedParser, ParseError};
use super::{Channel, Item};

/// SEC-003: Maximum element nesting depth accepted in a feed document.
const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy, Default)]
pub struct MiniRssParser;

impl FeedParser for MiniRssParser {
    fn id(&self) -> &str {
        "minirss"
    }

    fn parse(&self, text: &str) -> Result<Channel, ParseError> {
        parse_document(text)
    }
}

#[derive(Debug, Default)]
struct Fields {
    title: Option<String>,
    link: Option<String>,
    description: Option<String>,
    content: Option<String>,
    author: Option<String>,
    guid: Option<String>,
    published: Option<DateTime<Utc>>,
    updated: Option<DateTime<Utc>>,
    copyright: Option<String>,
}

impl Fields {
    fn assign(&mut self, element: &str, value: String) {
        match element {
            "title" => self.title = Some(value),
            "link" => {
                self.link.get_or_insert(value);
            }
            "description" | "summary" | "subtitle" => self.description = Some(value),
            "encoded" | "content" => self.content = Some(value),
            "author" | "creator" | "name" => {
                self.author.get_or_insert(value);
            }
            "guid" | "id" => self.guid = Some(value),
            "pubDate" | "published" | "date" => self.published = parse_date(&value),
            "updated" | "lastBuildDate" => self.updated = parse_date(&value),
            "copyright" | "rights" => self.copyright = Some(value),
            _ => {}
        }
    }

    fn into_item(self) -> Item {
        let published = self.published.or(self.updated);
        let key = item_key(
            self.guid.as_deref(),
            self.link.as_deref(),
            self.title.as_deref().unwrap_or(""),
            published,
        );
        Item {
            key,
            title: self.title,
            link: self.link,
            summary: self.description,
            content: self.content,
            author: self.author,
            published,
        }
    }

    fn into_channel(self, format: String, items: Vec<Item>) -> Channel {
        let mut channel = Channel::new(format);
        channel.title = self.title;
        channel.description = self.description;
        channel.link = self.link;
        channel.published = self.published.or(self.updated);
        channel.copyright = self.copyright;
        channel.author = self.author;
        channel.set_items(items);
        channel
    }
}

fn is_item(name: &str) -> bool {
    name == "item" || name == "entry"
}

fn is_container(name: &str) -> bool {
    is_item(name) || name == "channel" || name == "feed"
}

fn parse_document(text: &str) -> Result<Channel, ParseError> {
    // SEC-002: quick-xml never expands <!ENTITY> declarations; unresolved
    // entities surface as unescape errors and fall back to raw text.
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut format: Option<String> = None;
    let mut stack: Vec<String> = Vec::new();
    let mut channel = Fields::default();
    let mut current: Option<Fields> = None;
    let mut items = Vec::new();
    let mut text_buf = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = local_name(&e);
                if stack.is_empty() {
                    format = Some(detect_format(&name, &e, &reader)?);
                }
                if stack.len() >= MAX_DEPTH {
                    return Err(ParseError::Malformed(format!(
                        "nesting depth exceeds maximum of {MAX_DEPTH} levels"
                    )));
                }
                let in_container = stack.last().is_some_and(|p| is_container(p));
                if is_item(&name) {
                    current = Some(Fields::default());
                }
                if name == "link" && in_container {
                    if let Some(href) = link_href(&e, &reader) {
                        owner(&mut channel, &mut current).assign("link", href);
                    }
                }
                stack.push(name);
                text_buf.clear();
            }
            Ok(Event::Empty(e)) => {
                let name = local_name(&e);
                if stack.is_empty() {
                    format = Some(detect_format(&name, &e, &reader)?);
                }
                let in_container = stack.last().is_some_and(|p| is_container(p));
                if name == "link" && in_container {
                    if let Some(href) = link_href(&e, &reader) {
                        owner(&mut channel, &mut current).assign("link", href);
                    }
                }
            }
            Ok(Event::Text(t)) => {
                let text = t
                    .unescape()
                    .map(Cow::into_owned)
                    .unwrap_or_else(|_| String::from_utf8_lossy(&t).into_owned());
                text_buf.push_str(&text);
            }
            Ok(Event::CData(c)) => {
                text_buf.push_str(&String::from_utf8_lossy(&c));
            }
            Ok(Event::End(_)) => {
                let Some(name) = stack.pop() else {
                    return Err(ParseError::Malformed("unbalanced end tag".to_string()));
                };
                let value = std::mem::take(&mut text_buf);

                if is_item(&name) {
                    if let Some(fields) = current.take() {
                        items.push(fields.into_item());
                    }
                } else {
                    let parent = stack.last().map(String::as_str).unwrap_or("");
                    let owned_here =
                        is_container(parent) || (name == "name" && parent == "author");
                    let value = value.trim();
                    if owned_here && !value.is_empty() {
                        owner(&mut channel, &mut current).assign(&name, value.to_string());
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ParseError::Malformed(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    let Some(format) = format else {
        return Err(ParseError::Malformed("empty document".to_string()));
    };
    if !stack.is_empty() {
        return Err(ParseError::Malformed(format!("unclosed element <{}>", stack.join("><"))));
    }

    Ok(channel.into_channel(format, items))
}

fn owner<'a>(channel: &'a mut Fields, current: &'a mut Option<Fields>) -> &'a mut Fields {
    match current {
        Some(item) => item,
        None => channel,
    }
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

fn attribute(e: &BytesStart<'_>, reader: &Reader<&[u8]>, key: &[u8]) -> Option<String> {
    e.attributes()
        .filter_map(Result::ok)
        .find(|attr| attr.key.local_name().as_ref() == key)
        .and_then(|attr| {
            attr.decode_and_unescape_value(reader.decoder())
                .ok()
                .map(Cow::into_owned)
        })
}

/// `href` of an Atom link, when it is the alternate (default) relation.
fn link_href(e: &BytesStart<'_>, reader: &Reader<&[u8]>) -> Option<String> {
    let href = attribute(e, reader, b"href")?;
    match attribute(e, reader, b"rel").as_deref() {
        None | Some("alternate") => Some(href),
        Some(_) => None,
    }
}

fn detect_format(
    root: &str,
    e: &BytesStart<'_>,
    reader: &Reader<&[u8]>,
) -> Result<String, ParseError> {
    match root {
        "rss" => {
            let version = attribute(e, reader, b"version").unwrap_or_else(|| "2.0".to_string());
            Ok(format!("RSS {version}"))
        }
        "RDF" => Ok("RSS 1.0".to_string()),
        "feed" => Ok("Atom".to_string()),
        other => Err(ParseError::UnsupportedDocument(other.to_string())),
    }
}

fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value)
        .or_else(|_| DateTime::parse_from_rfc3339(value))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
