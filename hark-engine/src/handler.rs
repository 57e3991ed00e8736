//! Command handler contract.
//!
//! Handlers are compiled functions bound to commands through a
//! [`HandlerTable`]. Any `Fn(Invocation) -> impl Future<Output = anyhow::Result<R>>`
//! with `R: IntoReply` is a handler, so plain async functions work:
//!
//! ```ignore
//! async fn ping(_inv: Invocation) -> anyhow::Result<&'static str> {
//!     Ok("pong")
//! }
//!
//! let table = HandlerTable::new().with("ping", ping);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use hark::{Block, IntoReply, Reply, Value};

use crate::context::InvocationContext;
use crate::engine::{Engine, Resolution};
use crate::session::SessionRegistry;
use crate::store::Table;

#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn call(&self, invocation: Invocation) -> anyhow::Result<Reply>;
}

#[async_trait]
impl<F, Fut, R> CommandHandler for F
where
    F: Fn(Invocation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    R: IntoReply + Send + 'static,
{
    async fn call(&self, invocation: Invocation) -> anyhow::Result<Reply> {
        (self)(invocation).await.map(IntoReply::into_reply)
    }
}

/// Handler key -> handler.
///
/// Keys are command full ids unless a command names its handler explicitly.
#[derive(Clone, Default)]
pub struct HandlerTable {
    handlers: HashMap<String, Arc<dyn CommandHandler>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<H>(&mut self, key: impl Into<String>, handler: H) -> &mut Self
    where
        H: CommandHandler + 'static,
    {
        self.handlers.insert(key.into().to_lowercase(), Arc::new(handler));
        self
    }

    pub fn with<H>(mut self, key: impl Into<String>, handler: H) -> Self
    where
        H: CommandHandler + 'static,
    {
        self.insert(key, handler);
        self
    }

    /// Merge another table; its entries win on conflict
    pub fn merge(&mut self, other: HandlerTable) {
        self.handlers.extend(other.handlers);
    }

    pub fn get(&self, key: &str) -> Option<Arc<dyn CommandHandler>> {
        self.handlers.get(&key.to_lowercase()).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.handlers.contains_key(&key.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.handlers.keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerTable")
            .field("keys", &self.keys())
            .finish()
    }
}

/// What a handler receives: the parsed block, the invoker and the engine.
#[derive(Clone)]
pub struct Invocation {
    pub block: Block,
    pub context: InvocationContext,
    /// Full id of the bound command
    pub command: String,
    engine: Engine,
    depth: usize,
}

impl Invocation {
    pub(crate) fn new(
        block: Block,
        context: InvocationContext,
        command: String,
        engine: Engine,
        depth: usize,
    ) -> Self {
        Self {
            block,
            context,
            command,
            engine,
            depth,
        }
    }

    pub fn args(&self) -> &[Value] {
        &self.block.args
    }

    /// Arguments joined into one string
    pub fn arg(&self) -> String {
        self.block.arg()
    }

    pub fn flag(&self, name: &str) -> Option<&Value> {
        self.block.flag(name)
    }

    pub fn has_flag(&self, name: &str) -> bool {
        self.block.has_flag(name)
    }

    pub fn cmd(&self) -> &str {
        &self.block.cmd
    }

    pub fn cmds(&self) -> &[String] {
        &self.block.cmds
    }

    /// Nesting depth; zero for a top-level message
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn sessions(&self) -> &SessionRegistry {
        self.engine.sessions()
    }

    pub fn table(&self, name: &str) -> Table {
        self.engine.table(name)
    }

    /// Dispatch a nested block as the same invoker.
    pub async fn run_block(&self, block: &Block) -> Resolution {
        self.engine
            .dispatch_at(block, &self.context, self.depth + 1)
            .await
    }

    /// Parse and dispatch text as the same invoker, without session interception.
    pub async fn run(&self, text: &str) -> Resolution {
        self.engine
            .dispatch_text(text, &self.context, self.depth + 1)
            .await
    }

    /// Run every nested block argument in order and collect the resolutions.
    pub async fn run_children(&self) -> Vec<Resolution> {
        let mut out = Vec::new();
        for child in self.block.children() {
            out.push(self.run_block(child).await);
        }
        out
    }
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("command", &self.command)
            .field("block", &self.block.text)
            .field("user_id", &self.context.user_id)
            .field("depth", &self.depth)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn ping(_inv: Invocation) -> anyhow::Result<&'static str> {
        Ok("pong")
    }

    #[test]
    fn test_table_keys_are_case_insensitive() {
        let table = HandlerTable::new().with("Fun.Ping", ping);
        assert!(table.contains("fun.ping"));
        assert!(table.get("FUN.PING").is_some());
        assert_eq!(table.keys(), vec!["fun.ping"]);
    }

    #[test]
    fn test_merge_overrides() {
        let mut table = HandlerTable::new().with("a", ping);
        table.merge(HandlerTable::new().with("a", ping).with("b", ping));
        assert_eq!(table.len(), 2);
    }
}
