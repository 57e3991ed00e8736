//! Resolution pipeline
//!
//! [`Engine::handle`] runs one incoming message to completion:
//!
//! 1. parse the text into a [`Block`]
//! 2. offer the message to open sessions; a claim ends processing
//! 3. look the command path up in the registry
//! 4. validate (enabled, nsfw, permission, arguments) and invoke the handler
//!
//! Handler failures and panics come back as [`Rejection`] values inside the
//! [`Outcome`]; nothing a handler does escapes the pipeline.

use std::sync::Arc;

use hark::{Block, EngineConfig, ParseError, Reply};
use hark_api::{CommandSpec, Grant};
use tokio::sync::{mpsc, RwLock};

use crate::analytics::{AnalyticsEvent, AnalyticsOutcome, AnalyticsSink, NullAnalyticsSink};
use crate::command::{CommandId, CommandTree, RegistryError};
use crate::context::InvocationContext;
use crate::guard::{guarded, Rejection};
use crate::handler::{CommandHandler, HandlerTable, Invocation};
use crate::permission::{AccessPolicy, Permission, PermissionError};
use crate::session::{Message, Outbound, Session, SessionRegistry, SessionTimer};
use crate::store::{MemoryTableStore, Table, TableStore};
use crate::EngineError;

/// Nested invocations deeper than this are rejected
pub const MAX_DEPTH: usize = 16;

/// How a message was resolved
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Not a command and no session claimed it
    Ignored,
    /// Prefixed text that failed to parse
    Invalid(ParseError),
    /// Claimed by a session
    Session {
        session: String,
        result: Result<Reply, Rejection>,
    },
    Completed { command: String, reply: Reply },
    /// Granted, but the handler failed, panicked or was missing
    Rejected { command: String, rejection: Rejection },
    Denied { command: String, grant: Grant },
    /// The path matched several commands
    Listing { entries: Vec<String> },
}

impl Outcome {
    pub fn reply(&self) -> Reply {
        match self {
            Outcome::Ignored => Reply::Silent,
            Outcome::Invalid(e) => Reply::text(e.to_string()),
            Outcome::Session { result, .. } => match result {
                Ok(reply) => reply.clone(),
                Err(rejection) => Reply::text(rejection.to_string()),
            },
            Outcome::Completed { reply, .. } => reply.clone(),
            Outcome::Rejected { rejection, .. } => Reply::text(rejection.to_string()),
            Outcome::Denied { grant, .. } => Reply::text(grant.to_string()),
            Outcome::Listing { entries } => Reply::text(entries.join(", ")),
        }
    }

    /// Full id of the bound command, if exactly one matched
    pub fn command(&self) -> Option<&str> {
        match self {
            Outcome::Completed { command, .. }
            | Outcome::Rejected { command, .. }
            | Outcome::Denied { command, .. } => Some(command),
            _ => None,
        }
    }

    pub fn is_granted(&self) -> bool {
        matches!(
            self,
            Outcome::Completed { .. } | Outcome::Rejected { .. } | Outcome::Session { .. }
        )
    }
}

/// Result of one pass through the pipeline
#[derive(Debug, Clone)]
pub struct Resolution {
    /// The parsed block, absent when parsing failed
    pub block: Option<Block>,
    pub outcome: Outcome,
    /// Closing replies of sessions canceled along the way
    pub notices: Vec<Reply>,
}

impl Resolution {
    fn new(block: Option<Block>, outcome: Outcome) -> Self {
        Self {
            block,
            outcome,
            notices: Vec::new(),
        }
    }

    /// The outcome's reply followed by any session notices
    pub fn reply(&self) -> Reply {
        self.notices
            .iter()
            .fold(self.outcome.reply(), |reply, notice| {
                if notice.is_silent() {
                    reply
                } else {
                    reply.append(&notice.to_string())
                }
            })
    }
}

struct EngineInner {
    config: EngineConfig,
    policy: AccessPolicy,
    session_policy: AccessPolicy,
    commands: RwLock<CommandTree>,
    handlers: RwLock<HandlerTable>,
    sessions: SessionRegistry,
    analytics: Arc<dyn AnalyticsSink>,
    store: Arc<dyn TableStore>,
}

/// Command and session engine. Cheap to clone.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

/// Lookup result captured under the registry read lock
enum Bound {
    None,
    Many(Vec<String>),
    Denied { command: String, grant: Grant, analytics: bool },
    Listing { command: String, entries: Vec<String> },
    Run { command: String, handler_key: String, analytics: bool },
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn policy(&self) -> &AccessPolicy {
        &self.inner.policy
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.inner.sessions
    }

    pub fn table(&self, name: &str) -> Table {
        Table::new(self.inner.store.clone(), name)
    }

    /// Register a root command and return its full id.
    pub async fn register(&self, spec: &CommandSpec) -> Result<String, EngineError> {
        let mut tree = self.inner.commands.write().await;
        let id = tree.register(spec)?;
        Ok(tree.node(id).full_id.clone())
    }

    /// Register a command below `parent` (a full id).
    pub async fn register_under(
        &self,
        parent: &str,
        spec: &CommandSpec,
    ) -> Result<String, EngineError> {
        let mut tree = self.inner.commands.write().await;
        let parent = tree
            .find(parent)
            .ok_or_else(|| RegistryError::UnknownCommand(parent.to_string()))?;
        let id = tree.register_under(parent, spec)?;
        Ok(tree.node(id).full_id.clone())
    }

    pub async fn add_handler<H>(&self, key: impl Into<String>, handler: H)
    where
        H: CommandHandler + 'static,
    {
        self.inner.handlers.write().await.insert(key, handler);
    }

    pub async fn add_handlers(&self, table: HandlerTable) {
        self.inner.handlers.write().await.merge(table);
    }

    /// Full ids matching dot-path selectors; no selectors means all commands.
    pub async fn get<S: AsRef<str>>(&self, selectors: &[S]) -> Vec<String> {
        let tree = self.inner.commands.read().await;
        tree.get(selectors)
            .into_iter()
            .map(|id| tree.node(id).full_id.clone())
            .collect()
    }

    pub async fn contains(&self, full_id: &str) -> bool {
        self.inner.commands.read().await.find(full_id).is_some()
    }

    /// Edit a command's permission in place.
    pub async fn with_permission<R>(
        &self,
        full_id: &str,
        f: impl FnOnce(&mut Permission) -> Result<R, PermissionError>,
    ) -> Result<R, EngineError> {
        let mut tree = self.inner.commands.write().await;
        let id = find(&tree, full_id)?;
        Ok(f(&mut tree.node_mut(id).permission)?)
    }

    pub async fn set_enabled(&self, full_id: &str, enabled: bool) -> Result<(), EngineError> {
        let mut tree = self.inner.commands.write().await;
        let id = find(&tree, full_id)?;
        tree.node_mut(id).enabled = enabled;
        tracing::info!(command = %full_id, enabled, "Command toggled");
        Ok(())
    }

    pub async fn open_session(&self, session: Session) -> Result<(), EngineError> {
        Ok(self.inner.sessions.open(session).await?)
    }

    /// Run one incoming message through sessions and commands.
    pub async fn handle(&self, text: &str, ctx: &InvocationContext) -> Resolution {
        let parsed = Block::parse(text, &self.inner.config.prefix);

        let message = Message {
            text: text.to_string(),
            block: parsed.clone().unwrap_or_else(|_| Block::echo(text)),
            context: ctx.clone(),
        };
        let sessions = self
            .inner
            .sessions
            .resolve(&message, &self.inner.session_policy)
            .await;

        let mut resolution = match (sessions.claimed, parsed) {
            (Some((session, result)), parsed) => {
                Resolution::new(parsed.ok(), Outcome::Session { session, result })
            }
            (None, Err(e)) => {
                tracing::debug!(error = %e, "Unparseable command");
                Resolution::new(None, Outcome::Invalid(e))
            }
            (None, Ok(block)) if !block.is_command => Resolution::new(Some(block), Outcome::Ignored),
            (None, Ok(block)) => self.dispatch_at(&block, ctx, 0).await,
        };
        resolution.notices.extend(sessions.notices);
        resolution
    }

    /// Parse and dispatch text without session interception.
    pub(crate) async fn dispatch_text(
        &self,
        text: &str,
        ctx: &InvocationContext,
        depth: usize,
    ) -> Resolution {
        match Block::parse(text, &self.inner.config.prefix) {
            Err(e) => Resolution::new(None, Outcome::Invalid(e)),
            Ok(block) if !block.is_command => Resolution::new(Some(block), Outcome::Ignored),
            Ok(block) => self.dispatch_at(&block, ctx, depth).await,
        }
    }

    pub(crate) async fn dispatch_at(
        &self,
        block: &Block,
        ctx: &InvocationContext,
        depth: usize,
    ) -> Resolution {
        let resolution = |outcome| Resolution::new(Some(block.clone()), outcome);

        if depth > MAX_DEPTH {
            return resolution(Outcome::Rejected {
                command: block.cmd.to_lowercase(),
                rejection: Rejection::TooDeep(MAX_DEPTH),
            });
        }

        let (command, handler_key, analytics) = match self.bind(block, ctx).await {
            Bound::None => return resolution(Outcome::Ignored),
            Bound::Many(entries) => return resolution(Outcome::Listing { entries }),
            Bound::Denied {
                command,
                grant,
                analytics,
            } => {
                tracing::info!(command = %command, user = %ctx.user_id, reason = grant.reason(), "Command denied");
                if analytics {
                    self.record(&command, AnalyticsOutcome::Denied, ctx);
                }
                return resolution(Outcome::Denied { command, grant });
            }
            Bound::Listing { command, entries } => {
                let reply = Reply::text(entries.join(", "));
                return resolution(Outcome::Completed { command, reply });
            }
            Bound::Run {
                command,
                handler_key,
                analytics,
            } => (command, handler_key, analytics),
        };

        let handler = self.inner.handlers.read().await.get(&handler_key);
        let Some(handler) = handler else {
            tracing::warn!(command = %command, key = %handler_key, "No handler bound");
            return resolution(Outcome::Rejected {
                command,
                rejection: Rejection::MissingHandler(handler_key),
            });
        };

        tracing::debug!(command = %command, user = %ctx.user_id, depth, "Running command");
        let invocation = Invocation::new(
            block.clone(),
            ctx.clone(),
            command.clone(),
            self.clone(),
            depth,
        );
        let outcome = match guarded(handler.call(invocation)).await {
            Ok(reply) => {
                if analytics {
                    self.record(&command, AnalyticsOutcome::Completed, ctx);
                }
                Outcome::Completed { command, reply }
            }
            Err(rejection) => {
                tracing::warn!(command = %command, %rejection, "Command failed");
                if analytics {
                    self.record(&command, AnalyticsOutcome::Rejected, ctx);
                }
                Outcome::Rejected { command, rejection }
            }
        };
        resolution(outcome)
    }

    /// Look up and validate under the read lock, which is released on return.
    async fn bind(&self, block: &Block, ctx: &InvocationContext) -> Bound {
        let tree = self.inner.commands.read().await;
        let operator = self.inner.policy.is_operator(&ctx.user_id);

        let matches = tree.select(&block.cmds);
        let id: CommandId = match matches.as_slice() {
            [] => return Bound::None,
            [id] => *id,
            many => return Bound::Many(tree.listing(many, operator)),
        };

        let node = tree.node(id);
        let grant = tree.validate(id, block, ctx, &self.inner.policy);
        if !grant.granted {
            return Bound::Denied {
                command: node.full_id.clone(),
                grant,
                analytics: node.analytics,
            };
        }

        if node.generated {
            let siblings = node
                .parent()
                .map(|parent| tree.node(parent).children().to_vec())
                .unwrap_or_default();
            return Bound::Listing {
                command: node.full_id.clone(),
                entries: tree.listing(&siblings, operator),
            };
        }

        Bound::Run {
            command: node.full_id.clone(),
            handler_key: node.handler_key.clone(),
            analytics: node.analytics,
        }
    }

    fn record(&self, command: &str, outcome: AnalyticsOutcome, ctx: &InvocationContext) {
        if let Err(e) = self
            .inner
            .analytics
            .record(AnalyticsEvent::new(command, outcome, ctx))
        {
            tracing::warn!(command = %command, error = %e, "Failed to record analytics");
        }
    }

    /// Tick open sessions on the configured interval.
    pub fn spawn_timer(&self) -> (SessionTimer, mpsc::Receiver<Outbound>) {
        SessionTimer::spawn(self.inner.sessions.clone(), self.inner.config.tick_interval())
    }

    /// Close open sessions and flush analytics
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        for id in self.inner.sessions.ids().await {
            if let Err(e) = self.inner.sessions.close(&id, None).await {
                tracing::warn!(session = %id, error = %e, "Session not closed on shutdown");
            }
        }
        self.inner.analytics.flush()?;
        tracing::info!("Engine shut down");
        Ok(())
    }
}

fn find(tree: &CommandTree, full_id: &str) -> Result<CommandId, RegistryError> {
    tree.find(full_id)
        .ok_or_else(|| RegistryError::UnknownCommand(full_id.to_string()))
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("prefix", &self.inner.config.prefix)
            .field("sessions", &self.inner.sessions)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Engine`]
pub struct EngineBuilder {
    config: EngineConfig,
    commands: Vec<CommandSpec>,
    handlers: HandlerTable,
    analytics: Arc<dyn AnalyticsSink>,
    store: Arc<dyn TableStore>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            commands: Vec::new(),
            handlers: HandlerTable::new(),
            analytics: Arc::new(NullAnalyticsSink),
            store: Arc::new(MemoryTableStore::new()),
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn command(mut self, spec: CommandSpec) -> Self {
        self.commands.push(spec);
        self
    }

    pub fn commands(mut self, specs: impl IntoIterator<Item = CommandSpec>) -> Self {
        self.commands.extend(specs);
        self
    }

    pub fn handlers(mut self, table: HandlerTable) -> Self {
        self.handlers.merge(table);
        self
    }

    pub fn handler<H>(mut self, key: impl Into<String>, handler: H) -> Self
    where
        H: CommandHandler + 'static,
    {
        self.handlers.insert(key, handler);
        self
    }

    pub fn analytics(mut self, sink: Arc<dyn AnalyticsSink>) -> Self {
        self.analytics = sink;
        self
    }

    pub fn store(mut self, store: Arc<dyn TableStore>) -> Self {
        self.store = store;
        self
    }

    pub fn build(self) -> Result<Engine, EngineError> {
        self.config.validate()?;

        let mut tree = CommandTree::new(self.config.help_id.clone());
        for spec in &self.commands {
            tree.register(spec)?;
        }
        for (_, node) in tree.iter() {
            if !node.generated && !self.handlers.contains(&node.handler_key) {
                tracing::debug!(command = %node.full_id, key = %node.handler_key, "Command has no handler yet");
            }
        }

        let policy = AccessPolicy::from_config(&self.config);
        let session_policy = policy.clone().strict(self.config.strict_sessions);
        tracing::info!(
            prefix = %self.config.prefix,
            commands = tree.len(),
            handlers = self.handlers.len(),
            "Engine ready"
        );

        Ok(Engine {
            inner: Arc::new(EngineInner {
                config: self.config,
                policy,
                session_policy,
                commands: RwLock::new(tree),
                handlers: RwLock::new(self.handlers),
                sessions: SessionRegistry::new(),
                analytics: self.analytics,
                store: self.store,
            }),
        })
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hark_api::PermissionSpec;

    async fn echo(inv: Invocation) -> anyhow::Result<String> {
        Ok(inv.arg())
    }

    fn engine() -> Engine {
        Engine::builder()
            .command(CommandSpec::new("echo", "Repeat the arguments").param("[text...]"))
            .command(
                CommandSpec::new("admin", "Operator tools")
                    .permission(PermissionSpec::private())
                    .subcommand(CommandSpec::new("reload", "Reload")),
            )
            .handler("echo", echo)
            .build()
            .unwrap()
    }

    fn user() -> InvocationContext {
        InvocationContext::direct("u1", "dm")
    }

    #[tokio::test]
    async fn test_plain_text_is_ignored() {
        let resolution = engine().handle("hello there", &user()).await;
        assert!(matches!(resolution.outcome, Outcome::Ignored));
        assert!(resolution.reply().is_silent());
    }

    #[tokio::test]
    async fn test_command_runs() {
        let resolution = engine().handle("!echo hi there", &user()).await;
        assert_eq!(resolution.reply(), Reply::text("hi there"));
        assert_eq!(resolution.outcome.command(), Some("echo"));
    }

    #[tokio::test]
    async fn test_parse_error_is_invalid() {
        let resolution = engine().handle("!echo {unclosed", &user()).await;
        assert!(matches!(resolution.outcome, Outcome::Invalid(_)));
        assert!(resolution.block.is_none());
    }

    #[tokio::test]
    async fn test_unknown_command_is_ignored() {
        let resolution = engine().handle("!nope", &user()).await;
        assert!(matches!(resolution.outcome, Outcome::Ignored));
    }

    #[tokio::test]
    async fn test_inherited_denial() {
        let resolution = engine().handle("!admin.reload", &user()).await;
        match resolution.outcome {
            Outcome::Denied { command, grant } => {
                assert_eq!(command, "admin.reload");
                assert_eq!(grant.reason(), "only the bot operator can use this");
            }
            other => panic!("expected denial, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_handler_is_rejected() {
        let config = EngineConfig::default().with_operator("u1");
        let engine = Engine::builder()
            .config(config)
            .command(CommandSpec::new("admin", "Operator tools").permission(PermissionSpec::private()))
            .build()
            .unwrap();
        let resolution = engine.handle("!admin", &user()).await;
        assert!(matches!(
            resolution.outcome,
            Outcome::Rejected {
                rejection: Rejection::MissingHandler(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_toggle_and_unknown() {
        let engine = engine();
        engine.set_enabled("echo", false).await.unwrap();
        let resolution = engine.handle("!echo hi", &user()).await;
        assert_eq!(resolution.reply(), Reply::text("denied: this command is disabled"));

        assert!(matches!(
            engine.set_enabled("missing", true).await,
            Err(EngineError::Registry(RegistryError::UnknownCommand(_)))
        ));
    }
}
