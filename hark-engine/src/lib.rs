//! hark-engine: command and session runtime for hark
//!
//! Turns chat messages into command invocations. Commands are registered from
//! [`CommandSpec`] descriptors and bound to compiled handlers through a
//! [`HandlerTable`]; sessions intercept non-command messages.
//!
//! ```ignore
//! use hark_engine::{CommandSpec, Engine, InvocationContext, Invocation};
//!
//! async fn roll(inv: Invocation) -> anyhow::Result<String> {
//!     Ok(format!("rolled {}", inv.arg()))
//! }
//!
//! let engine = Engine::builder()
//!     .command(CommandSpec::new("roll", "Roll dice").param("<dice>"))
//!     .handler("roll", roll)
//!     .build()?;
//!
//! let resolution = engine.handle("!roll 2d6", &InvocationContext::direct("u1", "dm")).await;
//! println!("{}", resolution.reply());
//! ```

pub mod analytics;
pub mod command;
pub mod context;
pub mod engine;
pub mod guard;
pub mod handler;
pub mod permission;
pub mod session;
pub mod store;

pub use analytics::{
    AnalyticsError, AnalyticsEvent, AnalyticsOutcome, AnalyticsSink, CompositeAnalyticsSink,
    MemoryAnalyticsSink, NullAnalyticsSink,
};
pub use command::{CommandId, CommandNode, CommandTree, RegistryError};
pub use context::InvocationContext;
pub use engine::{Engine, EngineBuilder, Outcome, Resolution, MAX_DEPTH};
pub use guard::Rejection;
pub use handler::{CommandHandler, HandlerTable, Invocation};
pub use permission::{AccessPolicy, Permission, PermissionError};
pub use session::{
    Message, Outbound, Session, SessionBuilder, SessionError, SessionHandler, SessionRegistry,
    SessionResolution, SessionState, SessionTimer, Trigger,
};
pub use store::{MemoryTableStore, StoreError, Table, TableStore};

pub use hark::{Block, ConfigError, EngineConfig, HarkError, IntoReply, Reply, Value};
pub use hark_api::{
    AccessList, CommandSpec, Grant, PermissionKind, PermissionSpec, SessionSettings, SessionSpec,
};
pub use hark_rs_macros::Handlers;

use thiserror::Error;

/// Errors surfaced by engine setup and runtime mutation.
///
/// Handler failures are not errors; they arrive as [`Rejection`] values.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Permission(#[from] PermissionError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Analytics(#[from] AnalyticsError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Hark(#[from] HarkError),
}
