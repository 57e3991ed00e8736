//! Tracing and logging support.
//!
//! The engine logs through `tracing`; this module wires a subscriber for
//! bot binaries and tests. Nothing here is required by the engine itself.

#[cfg(feature = "tracing")]
pub use tracing::{self, debug, error, info, instrument, trace, warn};

#[cfg(feature = "tracing")]
use tracing_subscriber::{
    layer::SubscriberExt, util::SubscriberInitExt, util::TryInitError, EnvFilter, Layer, Registry,
};

/// Tracing output format.
#[cfg(feature = "tracing")]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TracingFormat {
    /// Human-readable multi-line output
    #[default]
    Pretty,

    /// Single-line output
    Compact,

    /// One JSON object per event, for log shippers
    Json,
}

/// Tracing configuration.
#[cfg(feature = "tracing")]
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Filter directives such as `hark_engine=debug`.
    ///
    /// If None, uses RUST_LOG or defaults to "info".
    pub directives: Option<String>,

    pub format: TracingFormat,

    pub timestamps: bool,

    /// Include target module names
    pub target: bool,

    pub thread_ids: bool,
}

#[cfg(feature = "tracing")]
impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            directives: None,
            format: TracingFormat::Pretty,
            timestamps: true,
            target: true,
            thread_ids: false,
        }
    }
}

#[cfg(feature = "tracing")]
impl TracingConfig {
    /// Debug output for the command and session engines, info elsewhere
    pub fn verbose() -> Self {
        Self {
            directives: Some("info,hark=debug,hark_engine=debug".to_string()),
            format: TracingFormat::Compact,
            ..Default::default()
        }
    }

    fn filter(&self) -> EnvFilter {
        match &self.directives {
            Some(directives) => EnvFilter::new(directives),
            None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        }
    }

    fn layer(&self) -> Box<dyn Layer<Registry> + Send + Sync> {
        let base = tracing_subscriber::fmt::layer()
            .with_target(self.target)
            .with_thread_ids(self.thread_ids);

        match (self.format, self.timestamps) {
            (TracingFormat::Pretty, true) => base.pretty().boxed(),
            (TracingFormat::Pretty, false) => base.pretty().without_time().boxed(),
            (TracingFormat::Compact, true) => base.compact().boxed(),
            (TracingFormat::Compact, false) => base.compact().without_time().boxed(),
            (TracingFormat::Json, true) => base.json().boxed(),
            (TracingFormat::Json, false) => base.json().without_time().boxed(),
        }
    }
}

/// Initialize a subscriber with default settings.
///
/// Uses RUST_LOG for filtering, e.g. `RUST_LOG=hark_engine=debug`.
///
/// # Panics
///
/// Panics if a global subscriber is already set.
#[cfg(feature = "tracing")]
pub fn init_subscriber() {
    init_subscriber_with_config(TracingConfig::default());
}

/// Initialize a subscriber with custom configuration.
///
/// ```ignore
/// use hark::tracing_support::{init_subscriber_with_config, TracingConfig, TracingFormat};
///
/// init_subscriber_with_config(TracingConfig {
///     format: TracingFormat::Json,
///     ..Default::default()
/// });
/// ```
#[cfg(feature = "tracing")]
pub fn init_subscriber_with_config(config: TracingConfig) {
    if let Err(e) = try_init_subscriber(config) {
        panic!("failed to initialize tracing subscriber: {}", e);
    }
}

/// Like [`init_subscriber_with_config`] but reports an already-set subscriber.
#[cfg(feature = "tracing")]
pub fn try_init_subscriber(config: TracingConfig) -> Result<(), TryInitError> {
    tracing_subscriber::registry()
        .with(config.layer())
        .with(config.filter())
        .try_init()
}

// Fallback when tracing feature is disabled
#[cfg(not(feature = "tracing"))]
pub fn init_subscriber() {}
