//! Command registry.
//!
//! Commands live in an arena ([`CommandTree`]) and refer to each other by
//! [`CommandId`]. A spec subtree is validated and flattened first; parent and
//! child links are set in a second pass, so nothing is added when any node
//! in the subtree is rejected.
//!
//! Selectors, matched one path segment at a time:
//!
//! - `*` matches a command and every descendant.
//! - `&name` matches every command (at any depth below) whose category is
//!   `name`, case-insensitively.
//! - anything else matches a command alias; the last segment selects the
//!   command itself, earlier ones descend into its subcommands.

use std::collections::HashSet;

use hark::{Block, DeclarationError, Flag, Signature, PATH_DELIMITER};
use hark_api::{CommandSpec, Grant, PermissionKind, PermissionSpec};
use thiserror::Error;

use crate::context::InvocationContext;
use crate::permission::{AccessPolicy, Permission, PermissionError};

pub const WILDCARD: &str = "*";
pub const CATEGORY_PREFIX: char = '&';

/// Characters that may not appear in ids, aliases or categories
pub const RESERVED: &[char] = &['.', '*', '&', '{', '}', ';', '"', '\\'];

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("{field} '{value}' contains a reserved character")]
    ReservedCharacter { field: &'static str, value: String },

    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("alias '{alias}' of '{command}' is already taken")]
    DuplicateAlias { alias: String, command: String },

    #[error("root command '{0}' cannot inherit its permission")]
    InheritAtRoot(String),

    #[error("invalid declaration on '{command}': {source}")]
    Declaration {
        command: String,
        #[source]
        source: DeclarationError,
    },

    #[error("unknown command '{0}'")]
    UnknownCommand(String),
}

/// Index of a node in its [`CommandTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandId(usize);

#[derive(Debug, Clone)]
pub struct CommandNode {
    pub id: String,
    /// Lower-cased, dot-joined id chain from the root
    pub full_id: String,
    pub about: String,
    /// Lower-cased, including the id itself
    pub aliases: Vec<String>,
    pub category: Option<String>,
    pub signature: Signature,
    pub flags: Vec<Flag>,
    pub permission: Permission,
    pub enabled: bool,
    pub suppress: bool,
    pub analytics: bool,
    pub nsfw: bool,
    /// Auto-appended subcommand listing
    pub generated: bool,
    /// Key into the handler table
    pub handler_key: String,
    parent: Option<CommandId>,
    children: Vec<CommandId>,
}

impl CommandNode {
    pub fn parent(&self) -> Option<CommandId> {
        self.parent
    }

    pub fn children(&self) -> &[CommandId] {
        &self.children
    }

    pub fn has_alias(&self, name: &str) -> bool {
        self.aliases.iter().any(|a| a.eq_ignore_ascii_case(name))
    }
}

/// Settings a child inherits unless its spec overrides them
#[derive(Clone, Default)]
struct Inherited {
    full_id: String,
    category: Option<String>,
    suppress: bool,
    nsfw: bool,
}

/// Flattened node waiting to be linked; `parent` indexes the pending list
struct Pending {
    node: CommandNode,
    parent: Option<usize>,
}

#[derive(Debug)]
pub struct CommandTree {
    nodes: Vec<CommandNode>,
    roots: Vec<CommandId>,
    help_id: String,
}

impl Default for CommandTree {
    fn default() -> Self {
        Self::new("help")
    }
}

impl CommandTree {
    pub fn new(help_id: impl Into<String>) -> Self {
        Self {
            nodes: Vec::new(),
            roots: Vec::new(),
            help_id: help_id.into().to_lowercase(),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn roots(&self) -> &[CommandId] {
        &self.roots
    }

    pub fn node(&self, id: CommandId) -> &CommandNode {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: CommandId) -> &mut CommandNode {
        &mut self.nodes[id.0]
    }

    pub fn iter(&self) -> impl Iterator<Item = (CommandId, &CommandNode)> {
        self.nodes.iter().enumerate().map(|(i, n)| (CommandId(i), n))
    }

    /// Look up a node by full id
    pub fn find(&self, full_id: &str) -> Option<CommandId> {
        let full_id = full_id.to_lowercase();
        self.iter()
            .find(|(_, n)| n.full_id == full_id)
            .map(|(id, _)| id)
    }

    /// Register a root command and its subcommands.
    pub fn register(&mut self, spec: &CommandSpec) -> Result<CommandId, RegistryError> {
        if spec.permission.as_ref().map(|p| p.kind) == Some(PermissionKind::Inherit) {
            return Err(RegistryError::InheritAtRoot(spec.id.clone()));
        }
        self.check_free(&self.roots, spec)?;
        self.insert(spec, None)
    }

    /// Register a command below an existing one. A generated help node
    /// sharing one of its names is replaced.
    pub fn register_under(
        &mut self,
        parent: CommandId,
        spec: &CommandSpec,
    ) -> Result<CommandId, RegistryError> {
        let siblings = &self.nodes[parent.0].children;
        self.check_free(siblings, spec)?;
        let replaced = siblings.iter().copied().find(|s| {
            let node = &self.nodes[s.0];
            node.generated && names(spec).any(|name| node.has_alias(name))
        });

        let top = self.insert(spec, Some(parent))?;
        match replaced {
            Some(help) => {
                self.remove_leaf(help);
                // the generated node is older, so everything inserted shifts down
                Ok(CommandId(top.0 - 1))
            }
            None => Ok(top),
        }
    }

    /// Drop a childless node and renumber the nodes after it.
    fn remove_leaf(&mut self, id: CommandId) {
        let removed = self.nodes.remove(id.0);
        tracing::debug!(command = %removed.full_id, "Generated node replaced");

        let shift = |c: &mut CommandId| {
            if c.0 > id.0 {
                c.0 -= 1;
            }
        };
        self.roots.retain(|r| *r != id);
        self.roots.iter_mut().for_each(shift);
        for node in &mut self.nodes {
            node.children.retain(|c| *c != id);
            node.children.iter_mut().for_each(shift);
            if let Some(parent) = node.parent.as_mut() {
                shift(parent);
            }
        }
    }

    /// Existing generated nodes never block a registration.
    fn check_free(&self, siblings: &[CommandId], spec: &CommandSpec) -> Result<(), RegistryError> {
        for name in names(spec) {
            let taken = siblings.iter().any(|s| {
                let node = &self.nodes[s.0];
                !node.generated && node.has_alias(name)
            });
            if taken {
                return Err(RegistryError::DuplicateAlias {
                    alias: name.to_lowercase(),
                    command: spec.id.clone(),
                });
            }
        }
        Ok(())
    }

    fn insert(
        &mut self,
        spec: &CommandSpec,
        parent: Option<CommandId>,
    ) -> Result<CommandId, RegistryError> {
        let inherited = match parent {
            Some(p) => {
                let node = &self.nodes[p.0];
                Inherited {
                    full_id: node.full_id.clone(),
                    category: node.category.clone(),
                    suppress: node.suppress,
                    nsfw: node.nsfw,
                }
            }
            None => Inherited::default(),
        };

        // first pass: validate and flatten
        let mut pending = Vec::new();
        flatten(spec, parent.is_some(), &inherited, None, &mut pending)?;

        // second pass: link
        let base = self.nodes.len();
        let mut ids = Vec::with_capacity(pending.len());
        for (i, mut p) in pending.into_iter().enumerate() {
            let id = CommandId(base + i);
            p.node.parent = match p.parent {
                Some(local) => Some(CommandId(base + local)),
                None => parent,
            };
            if let Some(parent) = p.node.parent {
                self.nodes[parent.0].children.push(id);
            }
            self.nodes.push(p.node);
            ids.push(id);
        }

        let top = CommandId(base);
        match parent {
            Some(parent) => {
                self.ensure_help(parent);
            }
            None => self.roots.push(top),
        }
        for id in ids {
            self.ensure_help(id);
        }

        tracing::info!(command = %self.nodes[top.0].full_id, nodes = self.nodes.len() - base, "Command registered");
        Ok(top)
    }

    /// Append the generated listing node when `id` has subcommands and none
    /// answers to the help id.
    fn ensure_help(&mut self, id: CommandId) {
        let node = &self.nodes[id.0];
        let real = node.children.iter().any(|c| !self.nodes[c.0].generated);
        let taken = node.children.iter().any(|c| self.nodes[c.0].has_alias(&self.help_id));
        if !real || taken {
            return;
        }

        let full_id = format!("{}{}{}", node.full_id, PATH_DELIMITER, self.help_id);
        let help = CommandNode {
            id: self.help_id.clone(),
            about: format!("List the subcommands of {}", node.full_id),
            aliases: vec![self.help_id.clone()],
            category: node.category.clone(),
            signature: Signature::default(),
            flags: Vec::new(),
            permission: Permission::new(full_id.clone(), PermissionSpec::inherit()),
            enabled: true,
            suppress: node.suppress,
            analytics: false,
            nsfw: node.nsfw,
            generated: true,
            handler_key: full_id.clone(),
            full_id,
            parent: Some(id),
            children: Vec::new(),
        };

        let help_id = CommandId(self.nodes.len());
        self.nodes.push(help);
        self.nodes[id.0].children.push(help_id);
    }

    /// Match one selector path starting at `id`.
    pub fn resolve_alias(&self, id: CommandId, path: &[String], depth: usize) -> Vec<CommandId> {
        let Some(segment) = path.get(depth) else {
            return Vec::new();
        };
        let node = &self.nodes[id.0];

        if segment == WILDCARD {
            let mut out = vec![id];
            for child in &node.children {
                out.extend(self.resolve_alias(*child, path, depth));
            }
            return out;
        }

        if let Some(category) = segment.strip_prefix(CATEGORY_PREFIX) {
            let mut out = Vec::new();
            let matches = node
                .category
                .as_deref()
                .is_some_and(|c| c.eq_ignore_ascii_case(category));
            if matches {
                out.push(id);
            }
            for child in &node.children {
                out.extend(self.resolve_alias(*child, path, depth));
            }
            return out;
        }

        if !node.has_alias(segment) {
            return Vec::new();
        }
        if depth + 1 == path.len() {
            return vec![id];
        }
        node.children
            .iter()
            .flat_map(|child| self.resolve_alias(*child, path, depth + 1))
            .collect()
    }

    /// Match a selector path against every root, de-duplicated in order.
    pub fn select(&self, path: &[String]) -> Vec<CommandId> {
        let mut seen = HashSet::new();
        self.roots
            .iter()
            .flat_map(|root| self.resolve_alias(*root, path, 0))
            .filter(|id| seen.insert(*id))
            .collect()
    }

    /// Aggregate dot-path selectors; no selectors means every command.
    pub fn get<S: AsRef<str>>(&self, selectors: &[S]) -> Vec<CommandId> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();

        let all = [WILDCARD];
        let selectors: Vec<&str> = if selectors.is_empty() {
            all.to_vec()
        } else {
            selectors.iter().map(AsRef::as_ref).collect()
        };

        for selector in selectors {
            let path: Vec<String> = selector.split(PATH_DELIMITER).map(str::to_string).collect();
            for id in self.select(&path) {
                if seen.insert(id) {
                    out.push(id);
                }
            }
        }
        out
    }

    /// Permission check with `inherit` resolved against ancestors.
    pub fn check_permission(
        &self,
        id: CommandId,
        ctx: &InvocationContext,
        policy: &AccessPolicy,
    ) -> Result<Grant, PermissionError> {
        let mut current = id;
        loop {
            let node = &self.nodes[current.0];
            if node.permission.kind() != PermissionKind::Inherit {
                return node.permission.check(ctx, policy);
            }
            match node.parent {
                Some(parent) => current = parent,
                None => return node.permission.check(ctx, policy),
            }
        }
    }

    /// Decide whether `block` may run `id`: enabled, nsfw, permission, then arguments.
    pub fn validate(
        &self,
        id: CommandId,
        block: &Block,
        ctx: &InvocationContext,
        policy: &AccessPolicy,
    ) -> Grant {
        let node = &self.nodes[id.0];
        if !node.enabled {
            return Grant::deny("this command is disabled");
        }
        if node.nsfw && (ctx.is_direct() || !ctx.nsfw_channel) {
            return Grant::deny("only available in nsfw channels");
        }

        let grant = match self.check_permission(id, ctx, policy) {
            Ok(grant) => grant,
            Err(e) => {
                tracing::error!(command = %node.full_id, error = %e, "Permission misconfigured");
                return Grant::deny(e.to_string());
            }
        };
        if !grant.granted {
            return grant;
        }

        match node.signature.check(&block.args) {
            Ok(()) => Grant::allow(),
            Err(e) => Grant::deny(e.to_string()),
        }
    }

    /// Sorted full ids, without generated nodes and, unless `operator`,
    /// without suppressed ones.
    pub fn listing(&self, ids: &[CommandId], operator: bool) -> Vec<String> {
        let mut entries: Vec<String> = ids
            .iter()
            .map(|id| &self.nodes[id.0])
            .filter(|n| !n.generated && (operator || !n.suppress))
            .map(|n| n.full_id.clone())
            .collect();
        entries.sort();
        entries.dedup();
        entries
    }
}

/// The id followed by every alias
fn names(spec: &CommandSpec) -> impl Iterator<Item = &String> {
    std::iter::once(&spec.id).chain(&spec.aliases)
}

fn check_name(field: &'static str, value: &str) -> Result<(), RegistryError> {
    if value.is_empty() {
        return Err(RegistryError::Empty(field));
    }
    if value
        .chars()
        .any(|c| c.is_whitespace() || RESERVED.contains(&c))
    {
        return Err(RegistryError::ReservedCharacter {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

fn flatten(
    spec: &CommandSpec,
    has_parent: bool,
    inherited: &Inherited,
    parent: Option<usize>,
    out: &mut Vec<Pending>,
) -> Result<(), RegistryError> {
    check_name("id", &spec.id)?;
    for alias in &spec.aliases {
        check_name("alias", alias)?;
    }
    if let Some(category) = &spec.category {
        check_name("category", category)?;
    }

    let id = spec.id.to_lowercase();
    let full_id = if inherited.full_id.is_empty() {
        id.clone()
    } else {
        format!("{}{}{}", inherited.full_id, PATH_DELIMITER, id)
    };

    let declaration = |source| RegistryError::Declaration {
        command: full_id.clone(),
        source,
    };
    let signature = Signature::parse(&spec.params).map_err(declaration)?;
    let flags = spec
        .flags
        .iter()
        .map(|f| f.parse::<Flag>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(declaration)?;

    let mut aliases = vec![id.clone()];
    for alias in &spec.aliases {
        let alias = alias.to_lowercase();
        if !aliases.contains(&alias) {
            aliases.push(alias);
        }
    }

    let permission = match &spec.permission {
        Some(p) if p.kind == PermissionKind::Inherit && !has_parent => {
            return Err(RegistryError::InheritAtRoot(full_id));
        }
        Some(p) => p.clone(),
        None if has_parent => PermissionSpec::inherit(),
        None => PermissionSpec::public(),
    };

    let node = CommandNode {
        id,
        about: spec.about.clone(),
        aliases,
        category: spec.category.clone().or_else(|| inherited.category.clone()),
        signature,
        flags,
        permission: Permission::new(full_id.clone(), permission),
        enabled: spec.enabled,
        suppress: spec.suppress.unwrap_or(inherited.suppress),
        analytics: spec.analytics,
        nsfw: spec.nsfw.unwrap_or(inherited.nsfw),
        generated: false,
        handler_key: spec.handler.clone().unwrap_or_else(|| full_id.clone()),
        full_id,
        parent: None,
        children: Vec::new(),
    };

    let inherited = Inherited {
        full_id: node.full_id.clone(),
        category: node.category.clone(),
        suppress: node.suppress,
        nsfw: node.nsfw,
    };
    let index = out.len();
    out.push(Pending { node, parent });

    let mut taken: Vec<String> = Vec::new();
    for sub in &spec.subcommands {
        for name in names(sub) {
            let name = name.to_lowercase();
            if taken.contains(&name) {
                return Err(RegistryError::DuplicateAlias {
                    alias: name,
                    command: sub.id.clone(),
                });
            }
            taken.push(name);
        }
        flatten(sub, true, &inherited, Some(index), out)?;
    }
    Ok(())
}
