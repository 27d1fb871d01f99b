//! Output sinks and their dispatch.
//!
//! A sink receives every [`ChannelUpdate`] of a run (only channels with new
//! items, each holding only its new items) together with the global
//! [`DisplayOptions`]. Sinks are built up front from the configured
//! [`OutputHandlerSpec`]s through an [`OutputRegistry`], so an unknown class
//! or a missing required variable is reported before any feed is fetched.

mod json;
mod text;

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::config::{DisplayOptions, FeedPolicy, GlobalSettings, OutputHandlerSpec};
use crate::feed::Channel;
use crate::hooks::{HookBus, HookEvent};
use crate::registry::RegistryError;

pub use json::JsonSink;
pub use text::TextSink;

/// Errors from building or running an output handler. Building errors stop
/// the run; delivery errors only fail that handler.
#[derive(Debug, Error)]
pub enum OutputError {
    /// The handler's `Class` names no registered sink.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// A variable the sink cannot work without, such as the JSON `Path`.
    #[error("Output handler \"{handler}\" requires variable \"{variable}\"")]
    MissingVariable { handler: String, variable: String },

    /// Writing the configured output file failed.
    #[error("Failed to write output to '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write output to stdout: {0}")]
    Stdout(#[source] std::io::Error),

    /// Updates could not be rendered as JSON.
    #[error("Failed to serialize output: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// New items of one channel, as handed to sinks.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelUpdate {
    pub feed_url: String,
    pub section: String,
    pub channel: Channel,
    #[serde(skip)]
    pub policy: FeedPolicy,
}

impl ChannelUpdate {
    pub fn new(policy: &FeedPolicy, channel: Channel) -> Self {
        Self {
            feed_url: policy.url.to_string(),
            section: policy.section.clone(),
            channel,
            policy: policy.clone(),
        }
    }
}

/// A consumer of newly detected items.
pub trait OutputSink: Send {
    fn name(&self) -> &str;

    fn deliver(
        &mut self,
        updates: &[ChannelUpdate],
        display: &DisplayOptions,
    ) -> Result<(), OutputError>;
}

type OutputFactory = Box<
    dyn Fn(&OutputHandlerSpec, &GlobalSettings) -> Result<Box<dyn OutputSink>, OutputError>
        + Send
        + Sync,
>;

/// Output class identifier → sink factory.
pub struct OutputRegistry {
    factories: Vec<(String, OutputFactory)>,
}

impl OutputRegistry {
    pub fn empty() -> Self {
        Self {
            factories: Vec::new(),
        }
    }

    /// Registry holding the `text` and `json` sinks.
    pub fn with_builtin() -> Self {
        let mut registry = Self::empty();
        registry.register("text", |spec, _| Ok(Box::new(TextSink::from_spec(spec)?)));
        registry.register("json", |spec, _| Ok(Box::new(JsonSink::from_spec(spec)?)));
        registry
    }

    /// Adds a factory for `id`, replacing any factory already registered.
    pub fn register<F>(&mut self, id: &str, factory: F)
    where
        F: Fn(&OutputHandlerSpec, &GlobalSettings) -> Result<Box<dyn OutputSink>, OutputError>
            + Send
            + Sync
            + 'static,
    {
        self.factories.retain(|(existing, _)| existing != id);
        self.factories.push((id.to_string(), Box::new(factory)));
    }

    pub fn ids(&self) -> Vec<String> {
        self.factories.iter().map(|(id, _)| id.clone()).collect()
    }

    /// Builds the sink for `spec`.
    ///
    /// # Errors
    ///
    /// [`OutputError::Registry`] for an unknown class, or whatever the
    /// factory reports for a bad handler section.
    pub fn build(
        &self,
        spec: &OutputHandlerSpec,
        settings: &GlobalSettings,
    ) -> Result<Box<dyn OutputSink>, OutputError> {
        let (_, factory) = self
            .factories
            .iter()
            .find(|(id, _)| *id == spec.implementation)
            .ok_or_else(|| RegistryError::UnknownOutput {
                handler: spec.name.clone(),
                id: spec.implementation.clone(),
                available: self.ids(),
            })?;
        factory(spec, settings)
    }
}

impl Default for OutputRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

/// A built sink together with the section that configured it.
pub struct ActiveHandler {
    pub spec: OutputHandlerSpec,
    pub sink: Box<dyn OutputSink>,
}

/// Builds every configured handler, in declaration order.
pub fn build_handlers(
    registry: &OutputRegistry,
    specs: &[OutputHandlerSpec],
    settings: &GlobalSettings,
) -> Result<Vec<ActiveHandler>, OutputError> {
    specs
        .iter()
        .map(|spec| {
            let sink = registry.build(spec, settings)?;
            Ok(ActiveHandler {
                spec: spec.clone(),
                sink,
            })
        })
        .collect()
}

/// Per-handler outcome of a dispatch, in declaration order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
}

/// Hands `updates` to every handler in order. A failing handler is logged
/// and does not stop the ones after it. `PostDispatch` fires after each.
pub fn dispatch(
    handlers: &mut [ActiveHandler],
    updates: &[ChannelUpdate],
    display: &DisplayOptions,
    hooks: &HookBus,
) -> DispatchReport {
    let mut report = DispatchReport::default();

    for handler in handlers.iter_mut() {
        let name = handler.spec.name.as_str();
        let mut succeeded = match handler.sink.deliver(updates, display) {
            Ok(()) => {
                tracing::debug!(handler = name, channels = updates.len(), "Output delivered");
                true
            }
            Err(e) => {
                tracing::warn!(handler = name, error = %e, "Output handler failed");
                false
            }
        };

        if let Err(e) = hooks.fire(&HookEvent::PostDispatch {
            handler: &handler.spec,
            succeeded,
        }) {
            tracing::warn!(handler = name, error = %e, "PostDispatch hook failed");
            succeeded = false;
        }

        if succeeded {
            report.succeeded.push(name.to_string());
        } else {
            report.failed.push(name.to_string());
        }
    }

    report
}
