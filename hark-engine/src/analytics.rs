//! Command analytics
//!
//! Commands flagged `analytics` report each resolved invocation to an
//! [`AnalyticsSink`] owned by the engine. Sinks are supplied at engine
//! construction and flushed on shutdown.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::context::InvocationContext;

/// One resolved invocation of an analytics-enabled command
#[derive(Debug, Clone, Serialize)]
pub struct AnalyticsEvent {
    pub timestamp: DateTime<Utc>,
    /// Full id of the command
    pub command: String,
    pub outcome: AnalyticsOutcome,
    pub user_id: String,
    pub channel_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
}

impl AnalyticsEvent {
    pub fn new(
        command: impl Into<String>,
        outcome: AnalyticsOutcome,
        ctx: &InvocationContext,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            command: command.into(),
            outcome,
            user_id: ctx.user_id.clone(),
            channel_id: ctx.channel_id.clone(),
            server_id: ctx.server_id.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnalyticsOutcome {
    Completed,
    Rejected,
    Denied,
}

#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error("Failed to serialize analytics event: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Analytics sink not available: {0}")]
    Unavailable(String),
}

/// Destination for analytics events.
///
/// # Example
///
/// ```rust
/// use hark_engine::analytics::{AnalyticsError, AnalyticsEvent, AnalyticsSink};
///
/// struct StdoutSink;
///
/// impl AnalyticsSink for StdoutSink {
///     fn record(&self, event: AnalyticsEvent) -> Result<(), AnalyticsError> {
///         println!("{}", serde_json::to_string(&event)?);
///         Ok(())
///     }
///
///     fn flush(&self) -> Result<(), AnalyticsError> {
///         Ok(())
///     }
/// }
/// ```
pub trait AnalyticsSink: Send + Sync {
    fn record(&self, event: AnalyticsEvent) -> Result<(), AnalyticsError>;

    fn flush(&self) -> Result<(), AnalyticsError>;
}

/// Keeps events in memory and tallies invocations per command
pub struct MemoryAnalyticsSink {
    events: RwLock<Vec<AnalyticsEvent>>,
    max_events: usize,
}

impl MemoryAnalyticsSink {
    /// Create a memory sink holding up to 1000 events
    pub fn new() -> Self {
        Self::with_capacity(1000)
    }

    pub fn with_capacity(max_events: usize) -> Self {
        Self {
            events: RwLock::new(Vec::with_capacity(max_events.min(1000))),
            max_events,
        }
    }

    pub fn events(&self) -> Vec<AnalyticsEvent> {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn count(&self) -> usize {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Invocations per command full id
    pub fn counts(&self) -> BTreeMap<String, usize> {
        let events = self.events.read().unwrap_or_else(PoisonError::into_inner);
        let mut counts = BTreeMap::new();
        for event in events.iter() {
            *counts.entry(event.command.clone()).or_insert(0) += 1;
        }
        counts
    }

    pub fn find_by_outcome(&self, outcome: AnalyticsOutcome) -> Vec<AnalyticsEvent> {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.outcome == outcome)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.events
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl Default for MemoryAnalyticsSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalyticsSink for MemoryAnalyticsSink {
    fn record(&self, event: AnalyticsEvent) -> Result<(), AnalyticsError> {
        let mut events = self.events.write().unwrap_or_else(PoisonError::into_inner);
        if events.len() >= self.max_events {
            events.remove(0);
        }
        events.push(event);
        Ok(())
    }

    fn flush(&self) -> Result<(), AnalyticsError> {
        Ok(())
    }
}

impl fmt::Debug for MemoryAnalyticsSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryAnalyticsSink")
            .field("count", &self.count())
            .field("max_events", &self.max_events)
            .finish()
    }
}

/// Discards all events
#[derive(Debug, Default)]
pub struct NullAnalyticsSink;

impl AnalyticsSink for NullAnalyticsSink {
    fn record(&self, _event: AnalyticsEvent) -> Result<(), AnalyticsError> {
        Ok(())
    }

    fn flush(&self) -> Result<(), AnalyticsError> {
        Ok(())
    }
}

/// Fans events out to several sinks
#[derive(Default)]
pub struct CompositeAnalyticsSink {
    sinks: Vec<Box<dyn AnalyticsSink>>,
}

impl CompositeAnalyticsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: impl AnalyticsSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }
}

impl AnalyticsSink for CompositeAnalyticsSink {
    fn record(&self, event: AnalyticsEvent) -> Result<(), AnalyticsError> {
        for sink in &self.sinks {
            sink.record(event.clone())?;
        }
        Ok(())
    }

    fn flush(&self) -> Result<(), AnalyticsError> {
        for sink in &self.sinks {
            sink.flush()?;
        }
        Ok(())
    }
}

impl fmt::Debug for CompositeAnalyticsSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeAnalyticsSink")
            .field("sink_count", &self.sinks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(command: &str, outcome: AnalyticsOutcome) -> AnalyticsEvent {
        AnalyticsEvent::new(command, outcome, &InvocationContext::direct("u", "dm"))
    }

    #[test]
    fn test_memory_sink_counts() {
        let sink = MemoryAnalyticsSink::new();
        sink.record(event("roll", AnalyticsOutcome::Completed)).unwrap();
        sink.record(event("roll", AnalyticsOutcome::Denied)).unwrap();
        sink.record(event("mod.ban", AnalyticsOutcome::Completed)).unwrap();

        assert_eq!(sink.count(), 3);
        assert_eq!(sink.counts()["roll"], 2);
        assert_eq!(sink.find_by_outcome(AnalyticsOutcome::Denied).len(), 1);

        sink.clear();
        assert_eq!(sink.count(), 0);
    }

    #[test]
    fn test_memory_sink_evicts_oldest() {
        let sink = MemoryAnalyticsSink::with_capacity(2);
        for command in ["a", "b", "c"] {
            sink.record(event(command, AnalyticsOutcome::Completed)).unwrap();
        }
        let commands: Vec<_> = sink.events().into_iter().map(|e| e.command).collect();
        assert_eq!(commands, vec!["b", "c"]);
    }

    #[test]
    fn test_event_serializes() {
        let json = serde_json::to_string(&event("roll", AnalyticsOutcome::Rejected)).unwrap();
        assert!(json.contains("\"outcome\":\"rejected\""));
        assert!(!json.contains("server_id"));
    }

    #[test]
    fn test_composite_fans_out() {
        let composite = CompositeAnalyticsSink::new()
            .with_sink(NullAnalyticsSink)
            .with_sink(MemoryAnalyticsSink::new());
        composite.record(event("roll", AnalyticsOutcome::Completed)).unwrap();
        composite.flush().unwrap();
    }
}
