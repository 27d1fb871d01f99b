//! Per-feed transformations around the parser: payload decoding and
//! pre-parse edits before it, policy application after it.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use super::Channel;
use crate::config::FeedPolicy;
use crate::util::{prune_url, strip_html, truncate_chars, EditCommand};

static XML_DECL_ENCODING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^(\s*<\?xml[^>]*?)\s+encoding\s*=\s*["'][^"']*["']"#).unwrap()
});

/// Windows-1252 code points for bytes 0x80..=0x9F. Undefined positions map
/// through unchanged, as in ISO-8859-1.
const CP1252_HIGH: [char; 32] = [
    '\u{20AC}', '\u{81}', '\u{201A}', '\u{192}', '\u{201E}', '\u{2026}', '\u{2020}', '\u{2021}',
    '\u{2C6}', '\u{2030}', '\u{160}', '\u{2039}', '\u{152}', '\u{8D}', '\u{17D}', '\u{8F}',
    '\u{90}', '\u{2018}', '\u{2019}', '\u{201C}', '\u{201D}', '\u{2022}', '\u{2013}', '\u{2014}',
    '\u{2DC}', '\u{2122}', '\u{161}', '\u{203A}', '\u{153}', '\u{9D}', '\u{17E}', '\u{178}',
];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodingError {
    #[error("Unsupported character encoding \"{0}\"")]
    Unsupported(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Charset {
    Utf8,
    Latin1,
    Windows1252,
    Ascii,
}

impl Charset {
    fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Some(Charset::Utf8),
            "iso-8859-1" | "iso8859-1" | "latin1" | "latin-1" | "l1" => Some(Charset::Latin1),
            "windows-1252" | "cp1252" => Some(Charset::Windows1252),
            "us-ascii" | "ascii" => Some(Charset::Ascii),
            _ => None,
        }
    }

    fn decode(self, bytes: &[u8]) -> String {
        match self {
            Charset::Utf8 => String::from_utf8_lossy(strip_bom(bytes)).into_owned(),
            Charset::Latin1 => bytes.iter().map(|&b| char::from(b)).collect(),
            Charset::Windows1252 => bytes
                .iter()
                .map(|&b| match b {
                    0x80..=0x9F => CP1252_HIGH[usize::from(b - 0x80)],
                    _ => char::from(b),
                })
                .collect(),
            Charset::Ascii => bytes
                .iter()
                .map(|&b| if b.is_ascii() { char::from(b) } else { char::REPLACEMENT_CHARACTER })
                .collect(),
        }
    }
}

fn strip_bom(bytes: &[u8]) -> &[u8] {
    bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes)
}

/// Turns a raw payload into text.
///
/// With `forced` set, the payload is decoded with that encoding and the XML
/// declaration's `encoding` attribute is removed so the parser does not
/// second-guess it. Otherwise valid UTF-8 is taken as is, and anything else
/// is decoded with the charset the XML declaration names when it is one we
/// know, falling back to lossy UTF-8.
///
/// # Errors
///
/// [`EncodingError::Unsupported`] when `forced` names an unknown encoding.
pub fn decode_payload(bytes: &[u8], forced: Option<&str>) -> Result<String, EncodingError> {
    if let Some(label) = forced {
        let charset =
            Charset::from_label(label).ok_or_else(|| EncodingError::Unsupported(label.to_string()))?;
        let text = charset.decode(bytes);
        return Ok(XML_DECL_ENCODING_RE.replace(&text, "$1").into_owned());
    }

    let bytes = strip_bom(bytes);
    if let Ok(text) = std::str::from_utf8(bytes) {
        return Ok(text.to_string());
    }

    let declared = declared_charset(bytes).unwrap_or(Charset::Utf8);
    Ok(declared.decode(bytes))
}

fn declared_charset(bytes: &[u8]) -> Option<Charset> {
    static DECL_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r#"^\s*<\?xml[^>]*?encoding\s*=\s*["']([A-Za-z0-9._-]+)["']"#).unwrap()
    });

    let head = &bytes[..bytes.len().min(200)];
    let head = String::from_utf8_lossy(head);
    let caps = DECL_RE.captures(&head)?;
    Charset::from_label(&caps[1])
}

/// Applies `edits` to the decoded payload in order.
pub fn apply_preparse_edits(text: String, edits: &[EditCommand]) -> String {
    edits.iter().fold(text, |acc, edit| edit.apply(&acc).into_owned())
}

/// Applies the post-parse part of `policy` to `channel`, in this order:
/// title override, URL pruning, duplicate-title suppression, item URL
/// rewrite, summary-only, HTML stripping, summary truncation.
pub fn apply_policy(channel: &mut Channel, policy: &FeedPolicy) {
    if let Some(title) = &policy.title_override {
        channel.title = Some(title.clone());
    }

    if policy.prune_urls {
        if let Some(link) = &channel.link {
            channel.link = Some(prune_url(link));
        }
        for item in channel.items_mut() {
            if let Some(link) = &item.link {
                item.link = Some(prune_url(link));
            }
        }
    }

    if policy.ignore_duplicate_titles {
        let before = channel.items().len();
        let mut seen = HashSet::new();
        channel.items_mut().retain(|item| match &item.title {
            Some(title) => seen.insert(title.trim().to_string()),
            None => true,
        });
        let dropped = before - channel.items().len();
        if dropped > 0 {
            tracing::debug!(feed = %policy.url, dropped, "Dropped items with duplicate titles");
        }
    }

    if let Some(edit) = &policy.item_url_edit {
        for item in channel.items_mut() {
            if let Some(link) = &item.link {
                item.link = Some(edit.apply(link).into_owned());
            }
        }
    }

    for item in channel.items_mut() {
        if policy.summary_only {
            item.content = None;
        }

        if !policy.allow_embedded_html {
            for field in [&mut item.title, &mut item.summary, &mut item.content] {
                if let Some(text) = field.as_deref() {
                    *field = Some(strip_html(text).into_owned());
                }
            }
        }

        if let (Some(max), Some(summary)) = (policy.max_summary_size, item.summary.as_deref()) {
            item.summary = Some(truncate_chars(summary, max).into_owned());
        }
    }

    if !policy.allow_embedded_html {
        if let Some(description) = channel.description.as_deref() {
            channel.description = Some(strip_html(description).into_owned());
        }
    }
}
