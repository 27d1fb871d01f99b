//! Utility functions shared by the loader, the fetcher and the output sinks.
//!
//! - **URL normalization**: canonical feed URLs used as configuration and cache keys
//! - **Edit commands**: `s/regex/replacement/flags` text substitutions
//! - **Text processing**: HTML stripping, summary truncation and word wrapping
//!
//! # Examples
//!
//! ```
//! use feedpoll::util::{normalize_url, truncate_chars, EditCommand};
//!
//! let url = normalize_url("HTTP://Example.COM:80/feed.xml#top").unwrap();
//! assert_eq!(url.as_str(), "http://example.com/feed.xml");
//!
//! let edit = EditCommand::parse("s/http:/https:/").unwrap();
//! assert_eq!(edit.apply("http://example.com"), "https://example.com");
//!
//! assert_eq!(truncate_chars("Hello World", 8), "Hello...");
//! ```

mod edit;
mod text;
mod url;

pub use edit::{EditCommand, EditError};
pub use text::{display_width, strip_control_chars, strip_html, truncate_chars, wrap_text};
pub use url::{normalize_url, prune_url, UrlError};
