//! hark-api: Shared descriptor types for the hark command engine
//!
//! This crate defines the declarative vocabulary shared between command
//! manifests and the engine: command descriptors, session settings,
//! permission descriptors and the `Grant` decision value.
//! Everything here is plain data and (de)serializes with serde, so command
//! trees can be declared in JSON and bound to compiled handlers by id.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Command descriptor consumed by the registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Command id (one path segment, e.g. "ban" in "mod.ban")
    pub id: String,

    /// Short description for listings
    #[serde(default)]
    pub about: String,

    /// Additional names the command answers to
    #[serde(default)]
    pub aliases: Vec<String>,

    /// Category used by `&category` selectors. Inherited by subcommands when unset.
    #[serde(default)]
    pub category: Option<String>,

    /// Parameter declarations (e.g. "<user>", "[reason...]")
    #[serde(default)]
    pub params: Vec<String>,

    /// Flag declarations (e.g. "-silent|s")
    #[serde(default)]
    pub flags: Vec<String>,

    /// Access control. Unset means `inherit` for subcommands and `public` for roots.
    #[serde(default)]
    pub permission: Option<PermissionSpec>,

    /// Nested subcommands
    #[serde(default)]
    pub subcommands: Vec<CommandSpec>,

    /// Disabled commands resolve but are always denied
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Hide from listings for everyone but the operator. Inherited when unset.
    #[serde(default)]
    pub suppress: Option<bool>,

    /// Report invocations to the analytics sink
    #[serde(default)]
    pub analytics: bool,

    /// Restrict to NSFW server channels. Inherited when unset.
    #[serde(default)]
    pub nsfw: Option<bool>,

    /// Handler key in the handler table (defaults to the command's full id)
    #[serde(default)]
    pub handler: Option<String>,
}

fn default_true() -> bool {
    true
}

impl CommandSpec {
    /// Create a new command spec
    pub fn new(id: impl Into<String>, about: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            about: about.into(),
            aliases: Vec::new(),
            category: None,
            params: Vec::new(),
            flags: Vec::new(),
            permission: None,
            subcommands: Vec::new(),
            enabled: true,
            suppress: None,
            analytics: false,
            nsfw: None,
            handler: None,
        }
    }

    /// Add an alias
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    /// Set the category
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Add a parameter declaration
    pub fn param(mut self, declaration: impl Into<String>) -> Self {
        self.params.push(declaration.into());
        self
    }

    /// Add a flag declaration
    pub fn flag(mut self, declaration: impl Into<String>) -> Self {
        self.flags.push(declaration.into());
        self
    }

    /// Set the permission descriptor
    pub fn permission(mut self, permission: PermissionSpec) -> Self {
        self.permission = Some(permission);
        self
    }

    /// Add a subcommand
    pub fn subcommand(mut self, cmd: CommandSpec) -> Self {
        self.subcommands.push(cmd);
        self
    }

    /// Mark as disabled
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Set suppression explicitly
    pub fn suppress(mut self, suppress: bool) -> Self {
        self.suppress = Some(suppress);
        self
    }

    /// Enable analytics reporting
    pub fn analytics(mut self) -> Self {
        self.analytics = true;
        self
    }

    /// Set NSFW restriction explicitly
    pub fn nsfw(mut self, nsfw: bool) -> Self {
        self.nsfw = Some(nsfw);
        self
    }

    /// Bind to a handler key other than the full id
    pub fn handler(mut self, key: impl Into<String>) -> Self {
        self.handler = Some(key.into());
        self
    }
}

// ============================================================================
// Permissions
// ============================================================================

/// Access-control policy type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionKind {
    /// Anyone, anywhere
    #[default]
    Public,
    /// Only the designated operator
    Private,
    /// Invokers holding the elevated role or permission bit on the server
    Privileged,
    /// Per-server allow list
    Inclusive,
    /// Per-server deny list
    Exclusive,
    /// Never granted by the check; routed directly by the transport
    DmOnly,
    /// Defer to the nearest ancestor that is not `inherit`
    Inherit,
}

impl PermissionKind {
    /// Whether this kind carries per-server allow/deny lists
    pub fn is_list_based(self) -> bool {
        matches!(self, Self::Inclusive | Self::Exclusive)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
            Self::Privileged => "privileged",
            Self::Inclusive => "inclusive",
            Self::Exclusive => "exclusive",
            Self::DmOnly => "dm_only",
            Self::Inherit => "inherit",
        }
    }
}

impl fmt::Display for PermissionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Users, roles and channels listed for one server
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessList {
    #[serde(default)]
    pub users: BTreeSet<String>,
    #[serde(default)]
    pub roles: BTreeSet<String>,
    #[serde(default)]
    pub channels: BTreeSet<String>,
}

impl AccessList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a user id
    pub fn user(mut self, id: impl Into<String>) -> Self {
        self.users.insert(id.into());
        self
    }

    /// Add a role id
    pub fn role(mut self, id: impl Into<String>) -> Self {
        self.roles.insert(id.into());
        self
    }

    /// Add a channel id
    pub fn channel(mut self, id: impl Into<String>) -> Self {
        self.channels.insert(id.into());
        self
    }

    /// True when no tier lists anything
    pub fn is_empty(&self) -> bool {
        self.users.is_empty() && self.roles.is_empty() && self.channels.is_empty()
    }

    /// Union every tier of `other` into this list
    pub fn extend(&mut self, other: &AccessList) {
        self.users.extend(other.users.iter().cloned());
        self.roles.extend(other.roles.iter().cloned());
        self.channels.extend(other.channels.iter().cloned());
    }

    /// Remove every member of `other` from this list
    pub fn subtract(&mut self, other: &AccessList) {
        self.users.retain(|u| !other.users.contains(u));
        self.roles.retain(|r| !other.roles.contains(r));
        self.channels.retain(|c| !other.channels.contains(c));
    }
}

/// Permission descriptor: a kind plus per-server lists for list-based kinds
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSpec {
    #[serde(rename = "type")]
    pub kind: PermissionKind,

    /// Server id -> access list (only meaningful for inclusive/exclusive)
    #[serde(default)]
    pub servers: BTreeMap<String, AccessList>,
}

impl PermissionSpec {
    pub fn new(kind: PermissionKind) -> Self {
        Self {
            kind,
            servers: BTreeMap::new(),
        }
    }

    pub fn public() -> Self {
        Self::new(PermissionKind::Public)
    }

    pub fn private() -> Self {
        Self::new(PermissionKind::Private)
    }

    pub fn privileged() -> Self {
        Self::new(PermissionKind::Privileged)
    }

    pub fn inclusive() -> Self {
        Self::new(PermissionKind::Inclusive)
    }

    pub fn exclusive() -> Self {
        Self::new(PermissionKind::Exclusive)
    }

    pub fn dm_only() -> Self {
        Self::new(PermissionKind::DmOnly)
    }

    pub fn inherit() -> Self {
        Self::new(PermissionKind::Inherit)
    }

    /// Attach an access list for a server
    pub fn server(mut self, server_id: impl Into<String>, list: AccessList) -> Self {
        self.servers.insert(server_id.into(), list);
        self
    }
}

// ============================================================================
// Grant
// ============================================================================

/// Authorization decision. A value, never an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub granted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Grant {
    /// A granted decision
    pub fn allow() -> Self {
        Self {
            granted: true,
            reason: None,
        }
    }

    /// A denied decision with a human-readable reason
    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            granted: false,
            reason: Some(reason.into()),
        }
    }

    pub fn is_granted(&self) -> bool {
        self.granted
    }

    /// Denial reason, or an empty string when granted
    pub fn reason(&self) -> &str {
        self.reason.as_deref().unwrap_or("")
    }
}

impl fmt::Display for Grant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.granted, &self.reason) {
            (true, _) => f.write_str("granted"),
            (false, Some(reason)) => write!(f, "denied: {}", reason),
            (false, None) => f.write_str("denied"),
        }
    }
}

// ============================================================================
// Sessions
// ============================================================================

/// Session bookkeeping limits. Zero disables a limit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Seconds of inactivity (or lifetime, without `reset`) before expiry
    #[serde(default)]
    pub expires: u64,

    /// Restart the expiry clock whenever an event fires
    #[serde(default)]
    pub reset: bool,

    /// Close after this many matched events
    #[serde(default)]
    pub max: u32,

    /// Close after this many consecutive unmatched messages
    #[serde(default)]
    pub cancel: u32,

    /// Suppress goodbye messages and close reasons
    #[serde(default)]
    pub silent: bool,
}

impl SessionSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expires(mut self, secs: u64) -> Self {
        self.expires = secs;
        self
    }

    pub fn reset(mut self) -> Self {
        self.reset = true;
        self
    }

    pub fn max(mut self, uses: u32) -> Self {
        self.max = uses;
        self
    }

    pub fn cancel(mut self, misses: u32) -> Self {
        self.cancel = misses;
        self
    }

    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }
}

/// Session descriptor; behaviour (resolver and events) is attached in code
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSpec {
    pub id: String,

    #[serde(default)]
    pub category: Option<String>,

    #[serde(default)]
    pub settings: SessionSettings,

    #[serde(default)]
    pub permission: PermissionSpec,

    /// Arbitrary state bag handed to event handlers
    #[serde(default)]
    pub data: serde_json::Value,

    /// Seed the last channel from a permission that names exactly one channel
    #[serde(default)]
    pub infer_channel: bool,
}

impl SessionSpec {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            category: None,
            settings: SessionSettings::default(),
            permission: PermissionSpec::public(),
            data: serde_json::Value::Null,
            infer_channel: false,
        }
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn settings(mut self, settings: SessionSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn permission(mut self, permission: PermissionSpec) -> Self {
        self.permission = permission;
        self
    }

    pub fn data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    pub fn infer_channel(mut self) -> Self {
        self.infer_channel = true;
        self
    }
}
