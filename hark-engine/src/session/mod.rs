//! Session engine
//!
//! A session intercepts messages outside normal command syntax. Each message
//! passes through its resolver, which names an event (or nothing); a named
//! event with a handler claims the message. Sessions close on an explicit
//! request, after `max` uses, after `cancel` consecutive misses, or when the
//! registry tick finds them expired.
//!
//! Reserved event names: [`TICK`] runs on every registry tick, [`GOODBYE`]
//! runs on expiry and [`CLOSE`] runs whenever the session closes.

mod registry;
mod timer;

pub use registry::{SessionRegistry, SessionResolution};
pub use timer::{Outbound, SessionTimer};

use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hark::{Block, IntoReply, Reply};
use hark_api::{Grant, PermissionKind, SessionSettings, SessionSpec};
use thiserror::Error;
use tokio::time::Instant;

use crate::context::InvocationContext;
use crate::guard::{guarded, panic_message, Rejection};
use crate::permission::{AccessPolicy, Permission};

pub const TICK: &str = "tick";
pub const GOODBYE: &str = "goodbye";
pub const CLOSE: &str = "close";

pub const REASON_MAX_USES: &str = "max uses reached";
pub const REASON_CANCELED: &str = "canceled";
pub const REASON_EXPIRED: &str = "session expired";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("a session with id '{0}' is already open")]
    DuplicateId(String),

    #[error("session '{0}' cannot inherit its permission")]
    InheritPermission(String),

    #[error("session id must not be empty")]
    EmptyId,

    #[error("no open session '{0}'")]
    NotFound(String),

    #[error("session '{0}' is busy handling an event")]
    Busy(String),
}

/// An incoming message as seen by sessions.
#[derive(Debug, Clone)]
pub struct Message {
    pub text: String,
    pub block: Block,
    pub context: InvocationContext,
}

/// Why a session handler runs.
#[derive(Debug, Clone)]
pub struct Trigger {
    pub event: String,
    /// The message that produced the event, for resolver-named events
    pub message: Option<Message>,
    /// Closing reason, for [`CLOSE`]
    pub reason: Option<String>,
}

impl Trigger {
    fn message(event: String, message: Message) -> Self {
        Self {
            event,
            message: Some(message),
            reason: None,
        }
    }

    fn timer(event: &str) -> Self {
        Self {
            event: event.to_string(),
            message: None,
            reason: None,
        }
    }

    fn close(reason: Option<String>) -> Self {
        Self {
            event: CLOSE.to_string(),
            message: None,
            reason,
        }
    }
}

/// Mutable bookkeeping visible to resolvers and handlers.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub id: String,
    pub category: Option<String>,
    pub settings: SessionSettings,
    /// Free-form session data
    pub data: serde_json::Value,
    pub uses: u32,
    /// Consecutive messages the resolver did not match
    pub misses: u32,
    /// Start of the expiry clock
    pub started: Instant,
    pub opened_at: DateTime<Utc>,
    pub last_channel_id: Option<String>,
    pub enabled: bool,
    closing: Option<String>,
}

impl SessionState {
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.settings.expires > 0
            && now.saturating_duration_since(self.started) > Duration::from_secs(self.settings.expires)
    }

    /// Ask for the session to close once the running handler returns
    pub fn end(&mut self, reason: impl Into<String>) {
        self.closing = Some(reason.into());
    }
}

/// Maps a message to an event name, or `None` for a miss.
pub type Resolver =
    Arc<dyn Fn(&Message, &SessionState) -> anyhow::Result<Option<String>> + Send + Sync>;

#[async_trait]
pub trait SessionHandler: Send + Sync {
    async fn handle(&self, state: &mut SessionState, trigger: &Trigger) -> anyhow::Result<Reply>;
}

/// Adapts a synchronous closure into a [`SessionHandler`].
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F, R> SessionHandler for FnHandler<F>
where
    F: Fn(&mut SessionState, &Trigger) -> anyhow::Result<R> + Send + Sync + 'static,
    R: IntoReply + Send + 'static,
{
    async fn handle(&self, state: &mut SessionState, trigger: &Trigger) -> anyhow::Result<Reply> {
        (self.0)(state, trigger).map(IntoReply::into_reply)
    }
}

/// What happened when a session saw a message
#[derive(Debug)]
pub(crate) enum Resolved {
    /// Disabled, denied, no resolver, or the resolver failed
    Skipped,
    Claimed(Result<Reply, Rejection>),
    /// Not matched; carries the closing reply when this miss canceled the session
    Missed(Option<Reply>),
}

pub struct Session {
    state: SessionState,
    permission: Permission,
    resolver: Option<Resolver>,
    events: HashMap<String, Arc<dyn SessionHandler>>,
    closed: bool,
}

impl Session {
    pub fn builder(spec: SessionSpec) -> SessionBuilder {
        SessionBuilder::new(spec)
    }

    pub fn id(&self) -> &str {
        &self.state.id
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut SessionState {
        &mut self.state
    }

    pub fn permission(&self) -> &Permission {
        &self.permission
    }

    pub fn permission_mut(&mut self) -> &mut Permission {
        &mut self.permission
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn has_event(&self, event: &str) -> bool {
        self.events.contains_key(event)
    }

    pub(crate) fn check(&self, ctx: &InvocationContext, policy: &AccessPolicy) -> Grant {
        self.permission
            .check(ctx, policy)
            .unwrap_or_else(|e| Grant::deny(e.to_string()))
    }

    pub(crate) async fn resolve(&mut self, message: &Message, policy: &AccessPolicy) -> Resolved {
        if self.closed || !self.state.enabled {
            return Resolved::Skipped;
        }
        let Some(resolver) = self.resolver.clone() else {
            return Resolved::Skipped;
        };
        if !self.check(&message.context, policy).granted {
            return Resolved::Skipped;
        }

        self.state.last_channel_id = Some(message.context.channel_id.clone());

        let state = &self.state;
        let event = match catch_unwind(AssertUnwindSafe(|| resolver(message, state))) {
            Ok(Ok(event)) => event,
            Ok(Err(e)) => {
                tracing::warn!(session = %self.state.id, error = %e, "Session resolver failed");
                return Resolved::Skipped;
            }
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                tracing::error!(session = %self.state.id, panic = %reason, "Session resolver panicked");
                return Resolved::Skipped;
            }
        };

        let handler = event.and_then(|name| self.events.get(&name).cloned().map(|h| (name, h)));
        let Some((event, handler)) = handler else {
            return Resolved::Missed(self.miss().await);
        };

        self.state.uses += 1;
        self.state.misses = 0;
        if self.state.settings.reset {
            self.state.started = Instant::now();
        }

        tracing::debug!(session = %self.state.id, event = %event, uses = self.state.uses, "Session event");
        let trigger = Trigger::message(event, message.clone());
        let result = guarded(handler.handle(&mut self.state, &trigger)).await;
        if let Err(rejection) = &result {
            tracing::warn!(session = %self.state.id, %rejection, "Session handler failed");
        }

        let max = self.state.settings.max;
        let reason = match self.state.closing.take() {
            Some(reason) => Some(reason),
            None if max > 0 && self.state.uses >= max => Some(REASON_MAX_USES.to_string()),
            None => None,
        };

        match reason {
            Some(reason) => {
                let closing = self.close(Some(reason)).await;
                Resolved::Claimed(result.map(|reply| merge(reply, closing)))
            }
            None => Resolved::Claimed(result),
        }
    }

    async fn miss(&mut self) -> Option<Reply> {
        self.state.misses += 1;
        let cancel = self.state.settings.cancel;
        if cancel > 0 && self.state.misses >= cancel {
            Some(self.close(Some(REASON_CANCELED.to_string())).await)
        } else {
            None
        }
    }

    /// Run the periodic tick; on expiry say goodbye and close.
    pub(crate) async fn tick(&mut self, now: Instant) -> Option<Outbound> {
        if self.closed {
            return None;
        }

        let reply = if self.state.is_expired(now) {
            tracing::info!(session = %self.state.id, "Session expired");
            let goodbye = self.fire(GOODBYE, &Trigger::timer(GOODBYE)).await;
            let closing = self.close(Some(REASON_EXPIRED.to_string())).await;
            merge(goodbye, closing)
        } else if self.events.contains_key(TICK) && self.state.enabled {
            self.fire(TICK, &Trigger::timer(TICK)).await
        } else {
            return None;
        };

        if reply.is_silent() || self.state.settings.silent {
            return None;
        }
        Some(Outbound {
            session_id: self.state.id.clone(),
            channel_id: self.state.last_channel_id.clone(),
            reply,
        })
    }

    /// Fire the close event and mark the session closed.
    ///
    /// The reason is appended to the returned reply unless the session is silent.
    pub(crate) async fn close(&mut self, reason: Option<String>) -> Reply {
        if self.closed {
            return Reply::Silent;
        }
        self.closed = true;

        let trigger = Trigger::close(reason.clone());
        let mut reply = self.fire(CLOSE, &trigger).await;
        tracing::info!(session = %self.state.id, reason = ?reason, uses = self.state.uses, "Session closed");

        if self.state.settings.silent {
            return Reply::Silent;
        }
        if let Some(reason) = reason {
            reply = reply.append(&reason);
        }
        reply
    }

    /// Run a reserved event handler, logging failures.
    async fn fire(&mut self, event: &str, trigger: &Trigger) -> Reply {
        let Some(handler) = self.events.get(event).cloned() else {
            return Reply::Silent;
        };
        match guarded(handler.handle(&mut self.state, trigger)).await {
            Ok(reply) => reply,
            Err(rejection) => {
                tracing::warn!(session = %self.state.id, event, %rejection, "Session handler failed");
                Reply::Silent
            }
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut events: Vec<&String> = self.events.keys().collect();
        events.sort();
        f.debug_struct("Session")
            .field("id", &self.state.id)
            .field("uses", &self.state.uses)
            .field("misses", &self.state.misses)
            .field("events", &events)
            .field("closed", &self.closed)
            .finish()
    }
}

/// Join two replies line by line
fn merge(first: Reply, second: Reply) -> Reply {
    match (first, second) {
        (first, Reply::Silent) => first,
        (Reply::Silent, second) => second,
        (first, second) => first.append(&second.to_string()),
    }
}

/// Builds a [`Session`] from its spec plus compiled resolver and handlers.
pub struct SessionBuilder {
    spec: SessionSpec,
    resolver: Option<Resolver>,
    events: HashMap<String, Arc<dyn SessionHandler>>,
}

impl SessionBuilder {
    pub fn new(spec: SessionSpec) -> Self {
        Self {
            spec,
            resolver: None,
            events: HashMap::new(),
        }
    }

    pub fn resolver<F>(mut self, resolver: F) -> Self
    where
        F: Fn(&Message, &SessionState) -> anyhow::Result<Option<String>> + Send + Sync + 'static,
    {
        self.resolver = Some(Arc::new(resolver));
        self
    }

    pub fn on(mut self, event: impl Into<String>, handler: impl SessionHandler + 'static) -> Self {
        self.events.insert(event.into(), Arc::new(handler));
        self
    }

    /// Register a synchronous closure for an event
    pub fn on_fn<F, R>(self, event: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&mut SessionState, &Trigger) -> anyhow::Result<R> + Send + Sync + 'static,
        R: IntoReply + Send + 'static,
    {
        self.on(event, FnHandler(handler))
    }

    pub fn build(self) -> Result<Session, SessionError> {
        let spec = self.spec;
        if spec.id.trim().is_empty() {
            return Err(SessionError::EmptyId);
        }
        if spec.permission.kind == PermissionKind::Inherit {
            return Err(SessionError::InheritPermission(spec.id));
        }

        let last_channel_id = if spec.infer_channel {
            infer_channel(&spec)
        } else {
            None
        };

        Ok(Session {
            permission: Permission::new(spec.id.clone(), spec.permission),
            state: SessionState {
                id: spec.id,
                category: spec.category,
                settings: spec.settings,
                data: spec.data,
                uses: 0,
                misses: 0,
                started: Instant::now(),
                opened_at: Utc::now(),
                last_channel_id,
                enabled: true,
                closing: None,
            },
            resolver: self.resolver,
            events: self.events,
            closed: false,
        })
    }
}

/// The only channel listed, when exactly one server lists exactly one channel
fn infer_channel(spec: &SessionSpec) -> Option<String> {
    let mut servers = spec.permission.servers.values();
    match (servers.next(), servers.next()) {
        (Some(list), None) if list.channels.len() == 1 => list.channels.iter().next().cloned(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hark_api::{AccessList, PermissionSpec};

    fn message(text: &str) -> Message {
        Message {
            text: text.to_string(),
            block: Block::echo(text),
            context: InvocationContext::server("u1", "c1", "s1"),
        }
    }

    /// Matches "guess" messages, counts them in `data`
    fn guessing(settings: SessionSettings) -> Session {
        Session::builder(SessionSpec::new("guess").settings(settings))
            .resolver(|msg, _| Ok(msg.text.starts_with("guess").then(|| "guess".to_string())))
            .on_fn("guess", |state, _| Ok(format!("guess #{}", state.uses)))
            .build()
            .unwrap()
    }

    fn policy() -> AccessPolicy {
        AccessPolicy::default().strict(true)
    }

    #[tokio::test]
    async fn test_matched_event_claims() {
        let mut session = guessing(SessionSettings::new());
        match session.resolve(&message("guess 4"), &policy()).await {
            Resolved::Claimed(Ok(reply)) => assert_eq!(reply, Reply::text("guess #1")),
            other => panic!("expected a claim, got {:?}", other),
        }
        assert_eq!(session.state().uses, 1);
        assert_eq!(session.state().last_channel_id.as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn test_max_uses_closes_after_first_match() {
        let mut session = guessing(SessionSettings::new().max(1));
        match session.resolve(&message("guess 4"), &policy()).await {
            Resolved::Claimed(Ok(reply)) => {
                assert_eq!(reply, Reply::text("guess #1\nmax uses reached"))
            }
            other => panic!("expected a claim, got {:?}", other),
        }
        assert!(session.is_closed());
        assert!(matches!(
            session.resolve(&message("guess 5"), &policy()).await,
            Resolved::Skipped
        ));
    }

    #[tokio::test]
    async fn test_cancel_after_consecutive_misses() {
        let mut session = guessing(SessionSettings::new().cancel(2));
        assert!(matches!(
            session.resolve(&message("hello"), &policy()).await,
            Resolved::Missed(None)
        ));
        // a match resets the miss streak
        session.resolve(&message("guess 1"), &policy()).await;
        assert_eq!(session.state().misses, 0);

        session.resolve(&message("hi"), &policy()).await;
        match session.resolve(&message("bye"), &policy()).await {
            Resolved::Missed(Some(reply)) => assert_eq!(reply, Reply::text("canceled")),
            other => panic!("expected cancellation, got {:?}", other),
        }
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn test_denied_sessions_are_silent() {
        let mut session = Session::builder(
            SessionSpec::new("club")
                .permission(PermissionSpec::inclusive().server("s2", AccessList::new())),
        )
        .resolver(|_, _| Ok(Some("any".into())))
        .on_fn("any", |_, _| Ok("hi"))
        .build()
        .unwrap();

        // strict: s1 has no entry
        assert!(matches!(
            session.resolve(&message("x"), &policy()).await,
            Resolved::Skipped
        ));
        assert_eq!(session.state().uses, 0);
        assert!(session.state().last_channel_id.is_none());
    }

    #[tokio::test]
    async fn test_resolver_error_is_skipped() {
        let mut session = Session::builder(SessionSpec::new("broken"))
            .resolver(|_, _| Err(anyhow::anyhow!("bad state")))
            .build()
            .unwrap();
        assert!(matches!(
            session.resolve(&message("x"), &policy()).await,
            Resolved::Skipped
        ));
    }

    #[tokio::test]
    async fn test_resolver_panic_is_skipped() {
        let mut session = Session::builder(SessionSpec::new("fragile"))
            .resolver(|_, _| panic!("resolver bug"))
            .on_fn("any", |_, _| Ok("unreachable"))
            .build()
            .unwrap();
        assert!(matches!(
            session.resolve(&message("x"), &policy()).await,
            Resolved::Skipped
        ));
        assert!(!session.is_closed());
        assert_eq!(session.state().uses, 0);
    }

    #[tokio::test]
    async fn test_handler_can_end_session() {
        let mut session = Session::builder(SessionSpec::new("quiz"))
            .resolver(|_, _| Ok(Some("answer".into())))
            .on_fn("answer", |state, _| {
                state.end("correct!");
                Ok("you win")
            })
            .on_fn(CLOSE, |state, trigger| {
                state.data = serde_json::json!({ "closed_by": trigger.reason });
                Ok(())
            })
            .build()
            .unwrap();

        match session.resolve(&message("42"), &policy()).await {
            Resolved::Claimed(Ok(reply)) => assert_eq!(reply, Reply::text("you win\ncorrect!")),
            other => panic!("expected a claim, got {:?}", other),
        }
        assert!(session.is_closed());
        assert_eq!(session.state().data["closed_by"], "correct!");
    }

    #[tokio::test]
    async fn test_handler_failure_is_a_rejection() {
        let mut session = Session::builder(SessionSpec::new("oops"))
            .resolver(|_, _| Ok(Some("boom".into())))
            .on_fn("boom", |_, _| -> anyhow::Result<()> { anyhow::bail!("exploded") })
            .build()
            .unwrap();

        assert!(matches!(
            session.resolve(&message("x"), &policy()).await,
            Resolved::Claimed(Err(Rejection::Failed(_)))
        ));
        assert!(!session.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_expires_with_goodbye() {
        let mut session = Session::builder(
            SessionSpec::new("timed").settings(SessionSettings::new().expires(10)),
        )
        .on_fn(GOODBYE, |_, _| Ok("time is up"))
        .build()
        .unwrap();
        session.state_mut().last_channel_id = Some("c1".into());

        assert!(session.tick(Instant::now()).await.is_none());

        tokio::time::advance(Duration::from_secs(11)).await;
        let outbound = session.tick(Instant::now()).await.unwrap();
        assert_eq!(outbound.channel_id.as_deref(), Some("c1"));
        assert_eq!(outbound.reply, Reply::text("time is up\nsession expired"));
        assert!(session.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_restarts_expiry_on_events() {
        let mut session = guessing(SessionSettings::new().expires(10).reset());
        tokio::time::advance(Duration::from_secs(8)).await;
        assert!(matches!(
            session.resolve(&message("guess 1"), &policy()).await,
            Resolved::Claimed(Ok(_))
        ));
        tokio::time::advance(Duration::from_secs(8)).await;
        assert!(session.tick(Instant::now()).await.is_none());
        assert!(!session.is_closed());

        // without reset the clock keeps running from the open
        let mut session = guessing(SessionSettings::new().expires(10));
        tokio::time::advance(Duration::from_secs(8)).await;
        session.resolve(&message("guess 1"), &policy()).await;
        tokio::time::advance(Duration::from_secs(8)).await;
        let outbound = session.tick(Instant::now()).await.unwrap();
        assert_eq!(outbound.reply, Reply::text("session expired"));
        assert!(session.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_sessions_say_nothing() {
        let mut session = Session::builder(
            SessionSpec::new("quiet").settings(SessionSettings::new().expires(1).silent()),
        )
        .on_fn(GOODBYE, |_, _| Ok("bye"))
        .build()
        .unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(session.tick(Instant::now()).await.is_none());
        assert!(session.is_closed());
    }

    #[test]
    fn test_build_errors() {
        assert_eq!(
            Session::builder(SessionSpec::new("x").permission(PermissionSpec::inherit()))
                .build()
                .unwrap_err(),
            SessionError::InheritPermission("x".into())
        );
        assert_eq!(
            Session::builder(SessionSpec::new(" ")).build().unwrap_err(),
            SessionError::EmptyId
        );
    }

    #[test]
    fn test_infer_channel_is_opt_in() {
        let permission =
            PermissionSpec::inclusive().server("s1", AccessList::new().channel("only"));

        let spec = SessionSpec::new("a").permission(permission.clone());
        let session = Session::builder(spec.clone()).build().unwrap();
        assert!(session.state().last_channel_id.is_none());

        let session = Session::builder(spec.infer_channel()).build().unwrap();
        assert_eq!(session.state().last_channel_id.as_deref(), Some("only"));

        let two = permission.server("s2", AccessList::new().channel("other"));
        let session = Session::builder(SessionSpec::new("b").permission(two).infer_channel())
            .build()
            .unwrap();
        assert!(session.state().last_channel_id.is_none());
    }
}
