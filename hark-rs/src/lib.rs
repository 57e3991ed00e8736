//! # hark: a command language for chat bots
//!
//! Turns free-form message text into a structured [`Block`]: a command path,
//! typed positional arguments, named flags and nested sub-invocations.
//!
//! ## Quick Start
//!
//! ```
//! use hark::{Block, Signature, Value};
//!
//! let block = Block::parse("!roll 2 {!dice d20} -loud", "!").unwrap();
//! assert_eq!(block.cmds, vec!["roll"]);
//! assert_eq!(block.args[0], Value::Num(2.0));
//! assert!(block.has_flag("loud"));
//!
//! let signature = Signature::parse(&["<count:number>", "[dice:block]"]).unwrap();
//! assert!(signature.check(&block.args).is_ok());
//! ```
//!
//! The registry, permission engine and session runtime live in
//! `hark-engine`; this crate only knows about text.

use std::fmt;

pub mod block;
pub mod config;
pub mod lexer;
pub mod params;
pub mod tracing_support;
pub mod value;

pub use block::{Block, BlockBuilder, PATH_DELIMITER};
pub use config::{ConfigError, EngineConfig};
pub use lexer::{tokenize, ParseError, Token, TokenKind};
pub use params::{ArgumentError, DeclarationError, Flag, ParamType, Parameter, Signature};
pub use value::{Code, Expr, Value, ValueKind};

// Re-export tracing itself (required for #[instrument] macro)
#[cfg(feature = "tracing")]
pub use tracing_support::tracing;

#[cfg(feature = "tracing")]
pub use tracing_support::{
    init_subscriber, init_subscriber_with_config, try_init_subscriber, TracingConfig,
    TracingFormat,
};

/// Result type for fallible hark operations.
pub type HarkResult<T> = Result<T, HarkError>;

// ============================================================================
// Error Types
// ============================================================================

/// Top-level error for the text layer.
///
/// Runtime errors (registry, permissions, sessions) are defined by
/// `hark-engine` and wrap this type.
#[derive(Debug, thiserror::Error)]
pub enum HarkError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Declaration(#[from] DeclarationError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

// ============================================================================
// Reply Types
// ============================================================================

/// Value produced by a command or session handler.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Reply {
    /// Nothing to send.
    #[default]
    Silent,

    Text(String),

    /// Structured payload for transports that render rich output.
    Json(serde_json::Value),
}

impl Reply {
    pub fn text(content: impl Into<String>) -> Self {
        Reply::Text(content.into())
    }

    pub fn is_silent(&self) -> bool {
        matches!(self, Reply::Silent)
    }

    /// Append a line, e.g. a session's closing reason
    pub fn append(self, line: &str) -> Self {
        match self {
            Reply::Silent => Reply::Text(line.to_string()),
            Reply::Text(text) if text.is_empty() => Reply::Text(line.to_string()),
            Reply::Text(text) => Reply::Text(format!("{}\n{}", text, line)),
            Reply::Json(value) => Reply::Text(format!("{}\n{}", value, line)),
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Silent => Ok(()),
            Reply::Text(s) => f.write_str(s),
            Reply::Json(v) => write!(f, "{}", v),
        }
    }
}

// ============================================================================
// Reply Conversion Trait
// ============================================================================

/// Conversion of handler return values into a [`Reply`].
pub trait IntoReply {
    fn into_reply(self) -> Reply;
}

impl IntoReply for Reply {
    fn into_reply(self) -> Reply {
        self
    }
}

impl IntoReply for String {
    fn into_reply(self) -> Reply {
        Reply::Text(self)
    }
}

impl IntoReply for &str {
    fn into_reply(self) -> Reply {
        Reply::Text(self.to_string())
    }
}

impl IntoReply for () {
    fn into_reply(self) -> Reply {
        Reply::Silent
    }
}

impl IntoReply for serde_json::Value {
    fn into_reply(self) -> Reply {
        Reply::Json(self)
    }
}

impl<T: IntoReply> IntoReply for Option<T> {
    fn into_reply(self) -> Reply {
        self.map(IntoReply::into_reply).unwrap_or_default()
    }
}

// ============================================================================
// Tests
// ============================================================================
