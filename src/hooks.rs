//! Extension-point dispatch for configuration and processing events.
//!
//! A [`HookBus`] is built once at startup, observers are registered against
//! one or more [`HookPoint`]s, and the bus is then passed by reference to the
//! loader, the fetcher, output dispatch and the run orchestrator. After
//! registration the bus is read-only, so fetch tasks fire it concurrently.
//!
//! For every firing, the observers registered against that point run in
//! registration order. Each observer either continues, stops the remaining
//! observers for that firing, or returns a fatal [`HookError`]. What a fatal
//! error means is up to the caller: load-time points abort the load, while
//! processing-time points only drop the feed or handler being processed.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::cache::FeedCache;
use crate::config::{FeedPolicy, GlobalSettings, OutputHandlerSpec};
use crate::feed::Channel;

/// Named extension points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPoint {
    MainSectionItem,
    FeedConfigItem,
    OutputHandlerConfigItem,
    UnknownSectionConfigItem,
    PreFetch,
    PostParse,
    PreCacheSave,
    PostDispatch,
}

impl HookPoint {
    /// Points fired while the configuration is being loaded.
    pub const LOAD_TIME: [HookPoint; 4] = [
        HookPoint::MainSectionItem,
        HookPoint::FeedConfigItem,
        HookPoint::OutputHandlerConfigItem,
        HookPoint::UnknownSectionConfigItem,
    ];

    pub fn is_load_time(self) -> bool {
        Self::LOAD_TIME.contains(&self)
    }
}

impl fmt::Display for HookPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Payload handed to observers. Borrowed from the firing site.
#[derive(Debug)]
pub enum HookEvent<'a> {
    MainSectionItem {
        section: &'a str,
        variable: &'a str,
        settings: &'a GlobalSettings,
    },
    FeedConfigItem {
        section: &'a str,
        variable: &'a str,
        settings: &'a GlobalSettings,
        policy: &'a FeedPolicy,
    },
    OutputHandlerConfigItem {
        section: &'a str,
        variable: &'a str,
        settings: &'a GlobalSettings,
        handler: &'a OutputHandlerSpec,
    },
    UnknownSectionConfigItem {
        section: &'a str,
        variable: &'a str,
        value: &'a str,
        settings: &'a GlobalSettings,
    },
    PreFetch {
        policy: &'a FeedPolicy,
    },
    PostParse {
        policy: &'a FeedPolicy,
        channel: &'a Channel,
    },
    PreCacheSave {
        cache: &'a FeedCache,
    },
    PostDispatch {
        handler: &'a OutputHandlerSpec,
        succeeded: bool,
    },
}

impl HookEvent<'_> {
    pub fn point(&self) -> HookPoint {
        match self {
            HookEvent::MainSectionItem { .. } => HookPoint::MainSectionItem,
            HookEvent::FeedConfigItem { .. } => HookPoint::FeedConfigItem,
            HookEvent::OutputHandlerConfigItem { .. } => HookPoint::OutputHandlerConfigItem,
            HookEvent::UnknownSectionConfigItem { .. } => HookPoint::UnknownSectionConfigItem,
            HookEvent::PreFetch { .. } => HookPoint::PreFetch,
            HookEvent::PostParse { .. } => HookPoint::PostParse,
            HookEvent::PreCacheSave { .. } => HookPoint::PreCacheSave,
            HookEvent::PostDispatch { .. } => HookPoint::PostDispatch,
        }
    }
}

/// What the bus should do after an observer returns normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookFlow {
    /// Run the next observer registered for this point.
    Continue,
    /// Skip the remaining observers for this firing only.
    Stop,
}

/// A fatal error raised by an observer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Hook '{observer}' failed at {point}: {message}")]
pub struct HookError {
    pub observer: String,
    pub point: HookPoint,
    pub message: String,
}

impl HookError {
    pub fn new(observer: impl Into<String>, point: HookPoint, message: impl Into<String>) -> Self {
        Self {
            observer: observer.into(),
            point,
            message: message.into(),
        }
    }
}

/// An observer of one or more extension points.
///
/// Observers are shared across fetch tasks and must not rely on being called
/// from a single thread.
pub trait HookObserver: Send + Sync {
    /// Name used in logs and error messages.
    fn name(&self) -> &str;

    fn on_event(&self, event: &HookEvent<'_>) -> Result<HookFlow, HookError>;
}

type ObserverFn = dyn Fn(&HookEvent<'_>) -> Result<HookFlow, HookError> + Send + Sync;

/// Adapts a closure into a [`HookObserver`].
pub struct FnObserver {
    name: String,
    f: Box<ObserverFn>,
}

impl FnObserver {
    pub fn new<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&HookEvent<'_>) -> Result<HookFlow, HookError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            f: Box::new(f),
        }
    }
}

impl HookObserver for FnObserver {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_event(&self, event: &HookEvent<'_>) -> Result<HookFlow, HookError> {
        (self.f)(event)
    }
}

/// Dispatcher for all extension points of one run.
#[derive(Default, Clone)]
pub struct HookBus {
    observers: HashMap<HookPoint, Vec<Arc<dyn HookObserver>>>,
}

impl HookBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `observer` for each of `points`, after any observer already
    /// registered there.
    pub fn register(&mut self, points: &[HookPoint], observer: Arc<dyn HookObserver>) {
        for point in points {
            tracing::debug!(point = %point, observer = observer.name(), "Registered hook observer");
            self.observers
                .entry(*point)
                .or_default()
                .push(Arc::clone(&observer));
        }
    }

    /// Shorthand for registering a closure.
    pub fn register_fn<F>(&mut self, points: &[HookPoint], name: &str, f: F)
    where
        F: Fn(&HookEvent<'_>) -> Result<HookFlow, HookError> + Send + Sync + 'static,
    {
        self.register(points, Arc::new(FnObserver::new(name, f)));
    }

    pub fn observer_count(&self, point: HookPoint) -> usize {
        self.observers.get(&point).map_or(0, Vec::len)
    }

    /// Fires `event` at the observers of its point.
    ///
    /// Returns the first fatal error, after which no further observer runs.
    pub fn fire(&self, event: &HookEvent<'_>) -> Result<(), HookError> {
        let point = event.point();
        let Some(observers) = self.observers.get(&point) else {
            return Ok(());
        };

        for observer in observers {
            match observer.on_event(event)? {
                HookFlow::Continue => {}
                HookFlow::Stop => {
                    tracing::trace!(point = %point, observer = observer.name(), "Hook short-circuited");
                    break;
                }
            }
        }

        Ok(())
    }
}

impl fmt::Debug for HookBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut counts: Vec<_> = self
            .observers
            .iter()
            .map(|(point, list)| (point.to_string(), list.len()))
            .collect();
        counts.sort();
        f.debug_struct("HookBus").field("observers", &counts).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recorder(
        log: &Arc<Mutex<Vec<String>>>,
        tag: &'static str,
        flow: HookFlow,
    ) -> impl Fn(&HookEvent<'_>) -> Result<HookFlow, HookError> + Send + Sync + 'static {
        let log = Arc::clone(log);
        move |_event| {
            log.lock().unwrap().push(tag.to_string());
            Ok(flow)
        }
    }

    fn fire_cache_save(bus: &HookBus) -> Result<(), HookError> {
        let cache = FeedCache::new();
        bus.fire(&HookEvent::PreCacheSave { cache: &cache })
    }

    #[test]
    fn test_observers_run_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut bus = HookBus::new();
        bus.register_fn(&[HookPoint::PreCacheSave], "a", recorder(&log, "a", HookFlow::Continue));
        bus.register_fn(&[HookPoint::PreCacheSave], "b", recorder(&log, "b", HookFlow::Continue));
        bus.register_fn(&[HookPoint::PreCacheSave], "c", recorder(&log, "c", HookFlow::Continue));

        fire_cache_save(&bus).unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_stop_short_circuits_single_firing() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut bus = HookBus::new();
        bus.register_fn(&[HookPoint::PreCacheSave], "a", recorder(&log, "a", HookFlow::Stop));
        bus.register_fn(&[HookPoint::PreCacheSave], "b", recorder(&log, "b", HookFlow::Continue));

        fire_cache_save(&bus).unwrap();
        fire_cache_save(&bus).unwrap();
        // "b" never runs, "a" runs on both firings
        assert_eq!(*log.lock().unwrap(), vec!["a", "a"]);
    }

    #[test]
    fn test_fatal_error_stops_dispatch() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut bus = HookBus::new();
        bus.register_fn(&[HookPoint::PreCacheSave], "boom", |event| {
            Err(HookError::new("boom", event.point(), "refused"))
        });
        bus.register_fn(&[HookPoint::PreCacheSave], "b", recorder(&log, "b", HookFlow::Continue));

        let err = fire_cache_save(&bus).unwrap_err();
        assert_eq!(err.observer, "boom");
        assert_eq!(err.point, HookPoint::PreCacheSave);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_unregistered_point_is_noop() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut bus = HookBus::new();
        bus.register_fn(&[HookPoint::PreFetch], "a", recorder(&log, "a", HookFlow::Continue));

        fire_cache_save(&bus).unwrap();
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(bus.observer_count(HookPoint::PreFetch), 1);
        assert_eq!(bus.observer_count(HookPoint::PreCacheSave), 0);
    }

    #[test]
    fn test_one_observer_many_points() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut bus = HookBus::new();
        bus.register_fn(
            &[HookPoint::PreCacheSave, HookPoint::PreFetch],
            "both",
            recorder(&log, "both", HookFlow::Continue),
        );
        assert_eq!(bus.observer_count(HookPoint::PreCacheSave), 1);
        assert_eq!(bus.observer_count(HookPoint::PreFetch), 1);
        assert!(HookPoint::MainSectionItem.is_load_time());
        assert!(!HookPoint::PreFetch.is_load_time());
    }
}
