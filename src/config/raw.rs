//! Ordered section → ordered name/value store, and its TOML reader.
//!
//! The loader only needs "sections in declaration order, each with its
//! variables in declaration order". A TOML document maps onto that directly:
//! every top-level table is a section, scalar values are kept as their
//! string form, and an array becomes one variable per element so repeatable
//! keys (`PreparseEdit`) can be written as a list.

use std::path::Path;

use super::ConfigError;

/// SEC-014: Maximum config file size (1 MB).
const MAX_FILE_SIZE: u64 = 1_048_576;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawSection {
    name: String,
    entries: Vec<(String, String)>,
}

impl RawSection {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Appends a variable. A repeated name is kept; later values win when
    /// the loader assigns them.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.entries.push((name.into(), value.into()));
        self
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Last value given for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawConfig {
    sections: Vec<RawSection>,
}

impl RawConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the section called `name`, creating it at the end if needed.
    pub fn section_mut(&mut self, name: &str) -> &mut RawSection {
        let idx = match self.sections.iter().position(|s| s.name == name) {
            Some(idx) => idx,
            None => {
                self.sections.push(RawSection {
                    name: name.to_string(),
                    entries: Vec::new(),
                });
                self.sections.len() - 1
            }
        };
        &mut self.sections[idx]
    }

    pub fn section(&self, name: &str) -> Option<&RawSection> {
        self.sections.iter().find(|s| s.name == name)
    }

    pub fn sections(&self) -> &[RawSection] {
        &self.sections
    }

    /// Reads a TOML configuration file.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::Io`] if the file cannot be read
    /// - [`ConfigError::TooLarge`] if it exceeds 1 MB
    /// - [`ConfigError::Parse`] / [`ConfigError::UnsupportedValue`] from [`RawConfig::from_toml_str`]
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // SEC-014: Check file size before reading to prevent memory exhaustion
        let meta = std::fs::metadata(path)?;
        if meta.len() > MAX_FILE_SIZE {
            return Err(ConfigError::TooLarge(format!(
                "Config file is {} bytes (max {} bytes)",
                meta.len(),
                MAX_FILE_SIZE
            )));
        }

        let content = std::fs::read_to_string(path)?;
        let raw = Self::from_toml_str(&content)?;
        tracing::debug!(
            path = %path.display(),
            sections = raw.sections.len(),
            "Read configuration file"
        );
        Ok(raw)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let table: toml::Table = content.parse()?;
        let mut raw = RawConfig::new();

        for (section_name, value) in table {
            let toml::Value::Table(vars) = value else {
                return Err(ConfigError::UnsupportedValue {
                    section: String::new(),
                    variable: section_name,
                });
            };

            let section = raw.section_mut(&section_name);
            for (var_name, value) in vars {
                match value {
                    toml::Value::Array(items) => {
                        for item in items {
                            let Some(s) = scalar_to_string(&item) else {
                                return Err(ConfigError::UnsupportedValue {
                                    section: section_name,
                                    variable: var_name,
                                });
                            };
                            section.push(var_name.clone(), s);
                        }
                    }
                    other => {
                        let Some(s) = scalar_to_string(&other) else {
                            return Err(ConfigError::UnsupportedValue {
                                section: section_name,
                                variable: var_name,
                            });
                        };
                        section.push(var_name, s);
                    }
                }
            }
        }

        Ok(raw)
    }
}

fn scalar_to_string(value: &toml::Value) -> Option<String> {
    match value {
        toml::Value::String(s) => Some(s.clone()),
        toml::Value::Integer(i) => Some(i.to_string()),
        toml::Value::Float(f) => Some(f.to_string()),
        toml::Value::Boolean(b) => Some(b.to_string()),
        toml::Value::Datetime(d) => Some(d.to_string()),
        toml::Value::Array(_) | toml::Value::Table(_) => None,
    }
}
