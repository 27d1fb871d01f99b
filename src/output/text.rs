use std::fmt::Write as _;
use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, Utc};

use super::{ChannelUpdate, OutputError, OutputSink};
use crate::config::{DisplayOptions, OutputHandlerSpec};
use crate::util::{strip_control_chars, wrap_text};

const HORIZONTAL_RULE: &str =
    "------------------------------------------------------------------------------";
const WRAP_COLUMNS: usize = 79;
const ITEM_INDENT: &str = "    ";
const SUMMARY_INDENT: &str = "        ";

/// Plain-text report, written to `Path` or stdout.
///
/// Honors an optional `Message` variable printed above the report. Nothing is
/// written when the run found no new items.
#[derive(Debug, Clone)]
pub struct TextSink {
    name: String,
    path: Option<PathBuf>,
    message: Option<String>,
}

impl TextSink {
    pub fn from_spec(spec: &OutputHandlerSpec) -> Result<Self, OutputError> {
        Ok(Self {
            name: spec.name.clone(),
            path: spec.extra("Path").map(PathBuf::from),
            message: spec.extra("Message").map(str::to_string),
        })
    }

    /// Renders the report. Empty when there are no new items.
    pub fn render(&self, updates: &[ChannelUpdate], display: &DisplayOptions) -> String {
        let total: usize = updates.iter().map(|u| u.channel.items().len()).sum();
        if total == 0 {
            return String::new();
        }

        let mut out = String::new();
        if let Some(message) = &self.message {
            let _ = writeln!(out, "{message}\n");
        }

        for update in updates {
            render_channel(&mut out, update, display);
        }

        let _ = writeln!(out, "\n{HORIZONTAL_RULE}");
        let _ = writeln!(out, "{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        out
    }
}

fn clean(s: &str) -> String {
    strip_control_chars(s.trim()).into_owned()
}

fn format_date(date: &DateTime<Utc>) -> String {
    date.to_rfc2822()
}

fn render_channel(out: &mut String, update: &ChannelUpdate, display: &DisplayOptions) {
    let channel = &update.channel;

    let _ = writeln!(out, "{HORIZONTAL_RULE}");
    let title = channel.title.as_deref().map_or_else(|| update.feed_url.clone(), clean);
    let _ = writeln!(out, "{title}");
    let link = channel.link.as_deref().unwrap_or(&update.feed_url);
    let _ = writeln!(out, "{}", clean(link));
    let _ = writeln!(out, "{} item(s)", channel.items().len());
    if display.show_dates {
        if let Some(date) = &channel.published {
            let _ = writeln!(out, "{}", format_date(date));
        }
    }
    if display.show_rss_version {
        let _ = writeln!(out, "(Format: {})", channel.format);
    }

    for item in channel.items() {
        out.push('\n');
        let title = item.title.as_deref().map_or_else(|| "(no title)".to_string(), clean);
        let _ = writeln!(out, "{ITEM_INDENT}{title}");
        if update.policy.show_authors {
            if let Some(author) = &item.author {
                let _ = writeln!(out, "{ITEM_INDENT}{}", clean(author));
            }
        }
        if let Some(link) = &item.link {
            let _ = writeln!(out, "{ITEM_INDENT}{}", clean(link));
        }
        if display.show_dates {
            if let Some(date) = &item.published {
                let _ = writeln!(out, "{ITEM_INDENT}{}", format_date(date));
            }
        }

        if let Some(summary) = item.summary.as_deref().filter(|s| !s.trim().is_empty()) {
            out.push('\n');
            let _ = writeln!(out, "{}", wrap_text(&clean(summary), WRAP_COLUMNS, SUMMARY_INDENT));
        }
    }
}

impl OutputSink for TextSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn deliver(
        &mut self,
        updates: &[ChannelUpdate],
        display: &DisplayOptions,
    ) -> Result<(), OutputError> {
        let report = self.render(updates, display);
        if report.is_empty() {
            tracing::debug!(handler = %self.name, "No new items, text output skipped");
            return Ok(());
        }

        match &self.path {
            Some(path) => std::fs::write(path, report.as_bytes()).map_err(|source| OutputError::Io {
                path: path.clone(),
                source,
            }),
            None => {
                let mut stdout = std::io::stdout().lock();
                stdout.write_all(report.as_bytes()).map_err(OutputError::Stdout)?;
                stdout.flush().map_err(OutputError::Stdout)
            }
        }
    }
}
