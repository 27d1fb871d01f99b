use std::borrow::Cow;

use regex::{Regex, RegexBuilder};
use thiserror::Error;

/// Errors produced while compiling an edit command.
#[derive(Debug, Error)]
pub enum EditError {
    #[error("Edit command must start with 's' followed by a delimiter: {0:?}")]
    NotSubstitution(String),

    #[error("Edit command {0:?} is missing a closing delimiter")]
    Unterminated(String),

    #[error("Unknown flag '{flag}' in edit command {command:?}")]
    UnknownFlag { command: String, flag: char },

    #[error("Bad regular expression in edit command {command:?}: {source}")]
    Regex {
        command: String,
        #[source]
        source: regex::Error,
    },
}

/// A compiled `s/regex/replacement/flags` substitution.
///
/// Any punctuation character may replace `/` as the delimiter; a delimiter
/// preceded by a backslash is taken literally. Supported flags are `g`
/// (replace every match instead of the first) and `i` (case-insensitive).
/// In the replacement, `\1`..`\9` and `$1`/`${name}` both refer to groups.
#[derive(Debug, Clone)]
pub struct EditCommand {
    source: String,
    regex: Regex,
    replacement: String,
    global: bool,
}

impl EditCommand {
    pub fn parse(command: &str) -> Result<Self, EditError> {
        let trimmed = command.trim();
        let mut chars = trimmed.chars();

        let delimiter = match (chars.next(), chars.next()) {
            (Some('s'), Some(d)) if !d.is_alphanumeric() && !d.is_whitespace() && d != '\\' => d,
            _ => return Err(EditError::NotSubstitution(command.to_string())),
        };

        let rest = chars.as_str();
        let (pattern, rest) = split_at_delimiter(rest, delimiter)
            .ok_or_else(|| EditError::Unterminated(command.to_string()))?;
        let (replacement, flags) = split_at_delimiter(rest, delimiter)
            .ok_or_else(|| EditError::Unterminated(command.to_string()))?;

        let mut global = false;
        let mut case_insensitive = false;
        for flag in flags.chars() {
            match flag {
                'g' => global = true,
                'i' => case_insensitive = true,
                other => {
                    return Err(EditError::UnknownFlag {
                        command: command.to_string(),
                        flag: other,
                    })
                }
            }
        }

        let regex = RegexBuilder::new(&pattern)
            .case_insensitive(case_insensitive)
            .build()
            .map_err(|source| EditError::Regex {
                command: command.to_string(),
                source,
            })?;

        Ok(Self {
            source: trimmed.to_string(),
            regex,
            replacement: convert_backreferences(&replacement),
            global,
        })
    }

    /// The command as written in the configuration.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn apply<'a>(&self, input: &'a str) -> Cow<'a, str> {
        if self.global {
            self.regex.replace_all(input, self.replacement.as_str())
        } else {
            self.regex.replace(input, self.replacement.as_str())
        }
    }
}

impl PartialEq for EditCommand {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for EditCommand {}

/// Splits `s` at the first unescaped `delimiter`, unescaping `\<delimiter>`
/// in the returned head. Other escapes are passed through for the regex.
fn split_at_delimiter(s: &str, delimiter: char) -> Option<(String, &str)> {
    let mut head = String::with_capacity(s.len());
    let mut iter = s.char_indices().peekable();

    while let Some((idx, c)) = iter.next() {
        if c == '\\' {
            match iter.peek() {
                Some(&(_, next)) if next == delimiter => {
                    head.push(next);
                    iter.next();
                }
                Some(&(_, next)) => {
                    head.push('\\');
                    head.push(next);
                    iter.next();
                }
                None => head.push('\\'),
            }
        } else if c == delimiter {
            return Some((head, &s[idx + c.len_utf8()..]));
        } else {
            head.push(c);
        }
    }

    None
}

/// Rewrites `\N` group references to the `${N}` syntax `regex` expects.
fn convert_backreferences(replacement: &str) -> String {
    let mut out = String::with_capacity(replacement.len());
    let mut chars = replacement.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.peek().copied() {
            Some(d) if d.is_ascii_digit() => {
                out.push_str("${");
                out.push(d);
                out.push('}');
                chars.next();
            }
            Some('\\') => {
                out.push('\\');
                chars.next();
            }
            Some('n') => {
                out.push('\n');
                chars.next();
            }
            _ => out.push('\\'),
        }
    }

    out
}
