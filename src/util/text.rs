use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;
use unicode_width::UnicodeWidthStr;

/// Ellipsis appended to truncated summaries
const ELLIPSIS: &str = "...";

/// Line width handed to the HTML renderer; its line breaks are collapsed
/// afterwards, so this only needs to exceed any realistic paragraph.
const HTML_RENDER_WIDTH: usize = 1_000;

static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Calculates the display width of a string in terminal columns.
pub fn display_width(s: &str) -> usize {
    UnicodeWidthStr::width(s)
}

/// Renders HTML markup in a feed title or summary down to plain text.
///
/// Markup is dropped without decoration, every named and numeric character
/// reference is decoded, and all whitespace (including the renderer's line
/// breaks) collapses to single spaces. Text without a `<` or `&` is returned
/// borrowed. If the renderer fails the input is kept as is.
pub fn strip_html(s: &str) -> Cow<'_, str> {
    if !s.contains(['<', '&']) {
        return Cow::Borrowed(s);
    }

    match html2text::config::plain_no_decorate().string_from_read(s.as_bytes(), HTML_RENDER_WIDTH) {
        Ok(text) => Cow::Owned(WHITESPACE_RE.replace_all(text.trim(), " ").into_owned()),
        Err(e) => {
            tracing::debug!(error = %e, "HTML rendering failed, keeping markup");
            Cow::Borrowed(s)
        }
    }
}

/// Truncates `s` to at most `max_chars` characters.
///
/// When truncation is necessary the last three characters of the budget are
/// spent on "...". Budgets of three or fewer characters are filled with text
/// only.
///
/// # Examples
///
/// ```
/// use feedpoll::util::truncate_chars;
///
/// assert_eq!(truncate_chars("Short", 10), "Short");
/// assert_eq!(truncate_chars("Hello World", 8), "Hello...");
/// assert_eq!(truncate_chars("Test", 2), "Te");
/// ```
pub fn truncate_chars(s: &str, max_chars: usize) -> Cow<'_, str> {
    let Some((cut, _)) = s.char_indices().nth(max_chars) else {
        return Cow::Borrowed(s);
    };

    if max_chars <= ELLIPSIS.len() {
        return Cow::Owned(s[..cut].to_string());
    }

    let keep = max_chars - ELLIPSIS.len();
    let end = s.char_indices().nth(keep).map_or(s.len(), |(i, _)| i);
    Cow::Owned(format!("{}{}", s[..end].trim_end(), ELLIPSIS))
}

/// Word-wraps `s` so that no line exceeds `width` columns, prefixing each
/// line with `indent`.
///
/// Existing line breaks are kept. A single word wider than the available
/// space is placed on its own line unbroken.
pub fn wrap_text(s: &str, width: usize, indent: &str) -> String {
    let available = width.saturating_sub(display_width(indent)).max(1);
    let mut out = String::with_capacity(s.len() + s.len() / 8);

    for (n, paragraph) in s.lines().enumerate() {
        if n > 0 {
            out.push('\n');
        }
        out.push_str(indent);

        let mut line_width = 0;
        for word in paragraph.split_whitespace() {
            let word_width = display_width(word);
            if line_width > 0 && line_width + 1 + word_width > available {
                out.push('\n');
                out.push_str(indent);
                line_width = 0;
            }
            if line_width > 0 {
                out.push(' ');
                line_width += 1;
            }
            out.push_str(word);
            line_width += word_width;
        }
    }

    out
}

/// SEC-001: Strips terminal control characters and ANSI escape sequences.
///
/// Feed text is written verbatim to terminals and files by the text sink, so
/// remote content must not be able to emit escape sequences. Tab, newline and
/// carriage return are preserved.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    let is_control = |c: char| {
        c == '\u{1b}' || c == '\u{7f}' || (c < ' ' && c != '\t' && c != '\n' && c != '\r')
    };

    if !s.contains(is_control) {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\u{1b}' {
            match chars.peek() {
                // CSI: parameters until a final byte in 0x40..=0x7e
                Some('[') => {
                    chars.next();
                    for c in chars.by_ref() {
                        if ('\u{40}'..='\u{7e}').contains(&c) {
                            break;
                        }
                    }
                }
                // OSC: until BEL or ST
                Some(']') => {
                    chars.next();
                    while let Some(c) = chars.next() {
                        if c == '\u{07}' {
                            break;
                        }
                        if c == '\u{1b}' && chars.peek() == Some(&'\\') {
                            chars.next();
                            break;
                        }
                    }
                }
                _ => {}
            }
        } else if !is_control(c) {
            out.push(c);
        }
    }

    Cow::Owned(out)
}
