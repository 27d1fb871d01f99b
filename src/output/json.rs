use std::path::PathBuf;

use super::{ChannelUpdate, OutputError, OutputSink};
use crate::config::{DisplayOptions, OutputHandlerSpec};

/// Pretty-printed JSON array of channel updates, written to the required
/// `Path` variable. Unlike the text sink it always writes, so an empty run
/// leaves `[]` behind.
#[derive(Debug, Clone)]
pub struct JsonSink {
    name: String,
    path: PathBuf,
}

impl JsonSink {
    pub fn from_spec(spec: &OutputHandlerSpec) -> Result<Self, OutputError> {
        let path = spec.extra("Path").ok_or_else(|| OutputError::MissingVariable {
            handler: spec.name.clone(),
            variable: "Path".to_string(),
        })?;
        Ok(Self {
            name: spec.name.clone(),
            path: PathBuf::from(path),
        })
    }
}

impl OutputSink for JsonSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn deliver(
        &mut self,
        updates: &[ChannelUpdate],
        _display: &DisplayOptions,
    ) -> Result<(), OutputError> {
        let mut json = serde_json::to_string_pretty(updates)?;
        json.push('\n');
        std::fs::write(&self.path, json).map_err(|source| OutputError::Io {
            path: self.path.clone(),
            source,
        })
    }
}
