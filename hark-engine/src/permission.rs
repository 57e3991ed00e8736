//! Permission engine.
//!
//! A [`Permission`] wraps a [`PermissionSpec`] and evaluates it against an
//! [`InvocationContext`] under an [`AccessPolicy`]. Evaluation never fails
//! with an error for a user: denials are [`Grant`] values. The only error is
//! evaluating `inherit` directly, which the command tree resolves by walking
//! to the nearest ancestor that is not `inherit`.
//!
//! Check order:
//!
//! 1. `public` grants, and the operator is granted everything.
//! 2. `private` denies everyone else.
//! 3. `privileged` needs a server plus the elevated bit or a privileged role.
//! 4. `dm_only` denies; direct routing is the transport's job.
//! 5. `inclusive`/`exclusive` grant when the server has no entry (unless the
//!    policy is strict), then check users, roles and channels in that order.

use hark::EngineConfig;
use hark_api::{AccessList, Grant, PermissionKind, PermissionSpec};
use thiserror::Error;

use crate::context::InvocationContext;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PermissionError {
    #[error("'{0}' inherits its permission but has no parent")]
    InheritWithoutParent(String),

    #[error("{0} permissions have no allow/deny lists")]
    NotListBased(PermissionKind),
}

/// Engine-wide inputs to a permission check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessPolicy {
    pub operator_id: Option<String>,
    pub privileged_roles: Vec<String>,
    /// Deny allow-list checks on servers without an entry
    pub strict: bool,
}

impl AccessPolicy {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            operator_id: config.operator_id.clone(),
            privileged_roles: config.privileged_roles.clone(),
            strict: false,
        }
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn is_operator(&self, user_id: &str) -> bool {
        self.operator_id.as_deref() == Some(user_id)
    }
}

/// A permission descriptor bound to its owner (a command full id or session id).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permission {
    owner: String,
    spec: PermissionSpec,
}

impl Permission {
    pub fn new(owner: impl Into<String>, spec: PermissionSpec) -> Self {
        Self {
            owner: owner.into(),
            spec,
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn kind(&self) -> PermissionKind {
        self.spec.kind
    }

    pub fn spec(&self) -> &PermissionSpec {
        &self.spec
    }

    /// Evaluate this permission alone.
    ///
    /// Returns an error for `inherit`, which only has meaning relative to a parent.
    pub fn check(
        &self,
        ctx: &InvocationContext,
        policy: &AccessPolicy,
    ) -> Result<Grant, PermissionError> {
        let kind = self.spec.kind;
        if kind == PermissionKind::Inherit {
            return Err(PermissionError::InheritWithoutParent(self.owner.clone()));
        }
        if kind == PermissionKind::Public || policy.is_operator(&ctx.user_id) {
            return Ok(Grant::allow());
        }

        let grant = match kind {
            PermissionKind::Private => Grant::deny("only the bot operator can use this"),
            PermissionKind::Privileged => check_privileged(ctx, policy),
            PermissionKind::DmOnly => Grant::deny("only available in direct messages"),
            PermissionKind::Inclusive | PermissionKind::Exclusive => self.check_lists(ctx, policy),
            PermissionKind::Public | PermissionKind::Inherit => Grant::allow(),
        };
        Ok(grant)
    }

    fn check_lists(&self, ctx: &InvocationContext, policy: &AccessPolicy) -> Grant {
        let inclusive = self.spec.kind == PermissionKind::Inclusive;
        let entry = ctx
            .server_id
            .as_ref()
            .and_then(|server| self.spec.servers.get(server));

        let Some(list) = entry else {
            if inclusive && policy.strict {
                return Grant::deny("not enabled on this server");
            }
            return Grant::allow();
        };

        let tiers = [
            (
                !list.users.is_empty(),
                list.users.contains(&ctx.user_id),
                "you are not allowed to use this",
                "you are blocked from using this",
            ),
            (
                !list.roles.is_empty(),
                ctx.roles.iter().any(|r| list.roles.contains(r)),
                "none of your roles are allowed to use this",
                "one of your roles is blocked from using this",
            ),
            (
                !list.channels.is_empty(),
                list.channels.contains(&ctx.channel_id),
                "not allowed in this channel",
                "blocked in this channel",
            ),
        ];

        for (listed, member, not_allowed, blocked) in tiers {
            if !listed {
                continue;
            }
            if inclusive && !member {
                return Grant::deny(not_allowed);
            }
            if !inclusive && member {
                return Grant::deny(blocked);
            }
        }
        Grant::allow()
    }

    /// Let `members` use this on `server`
    pub fn allow(&mut self, server: &str, members: &AccessList) -> Result<(), PermissionError> {
        match self.list_kind()? {
            PermissionKind::Inclusive => self.entry(server).extend(members),
            _ => self.shrink(server, members),
        }
        Ok(())
    }

    /// Stop `members` from using this on `server`
    pub fn deny(&mut self, server: &str, members: &AccessList) -> Result<(), PermissionError> {
        match self.list_kind()? {
            PermissionKind::Exclusive => self.entry(server).extend(members),
            _ => self.shrink(server, members),
        }
        Ok(())
    }

    /// Drop the entry for `server`. Returns whether one existed.
    pub fn clear(&mut self, server: &str) -> Result<bool, PermissionError> {
        self.list_kind()?;
        Ok(self.spec.servers.remove(server).is_some())
    }

    /// Swap allow-list and deny-list semantics, keeping the lists.
    pub fn invert(&mut self) -> Result<PermissionKind, PermissionError> {
        self.spec.kind = match self.list_kind()? {
            PermissionKind::Inclusive => PermissionKind::Exclusive,
            _ => PermissionKind::Inclusive,
        };
        Ok(self.spec.kind)
    }

    fn list_kind(&self) -> Result<PermissionKind, PermissionError> {
        if self.spec.kind.is_list_based() {
            Ok(self.spec.kind)
        } else {
            Err(PermissionError::NotListBased(self.spec.kind))
        }
    }

    fn entry(&mut self, server: &str) -> &mut AccessList {
        self.spec.servers.entry(server.to_string()).or_default()
    }

    fn shrink(&mut self, server: &str, members: &AccessList) {
        if let Some(list) = self.spec.servers.get_mut(server) {
            list.subtract(members);
        }
    }
}

fn check_privileged(ctx: &InvocationContext, policy: &AccessPolicy) -> Grant {
    if ctx.is_direct() {
        return Grant::deny("must be used in a server");
    }
    let has_role = policy.privileged_roles.iter().any(|r| ctx.has_role(r));
    if ctx.elevated || has_role {
        Grant::allow()
    } else {
        Grant::deny("requires an elevated role")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> AccessPolicy {
        AccessPolicy {
            operator_id: Some("op".into()),
            privileged_roles: vec!["admin".into()],
            strict: false,
        }
    }

    fn check(spec: PermissionSpec, ctx: &InvocationContext) -> Grant {
        Permission::new("cmd", spec).check(ctx, &policy()).unwrap()
    }

    fn guild(user: &str) -> InvocationContext {
        InvocationContext::server(user, "c1", "s1")
    }

    #[test]
    fn test_inherit_without_parent_is_an_error() {
        let perm = Permission::new("root", PermissionSpec::inherit());
        assert_eq!(
            perm.check(&guild("u"), &policy()),
            Err(PermissionError::InheritWithoutParent("root".into()))
        );
    }

    #[test]
    fn test_public_grants_everywhere() {
        assert!(check(PermissionSpec::public(), &guild("u")).granted);
        assert!(check(PermissionSpec::public(), &InvocationContext::direct("u", "dm")).granted);
    }

    #[test]
    fn test_private_only_grants_operator() {
        assert!(check(PermissionSpec::private(), &guild("op")).granted);
        for user in ["u", "admin", ""] {
            assert!(!check(PermissionSpec::private(), &guild(user)).granted);
        }
    }

    #[test]
    fn test_privileged() {
        let spec = PermissionSpec::privileged;
        assert!(check(spec(), &guild("u").elevated()).granted);
        assert!(check(spec(), &guild("u").role("admin")).granted);

        let denied = check(spec(), &guild("u").role("member"));
        assert_eq!(denied.reason(), "requires an elevated role");

        let dm = InvocationContext {
            elevated: true,
            ..InvocationContext::direct("u", "dm")
        };
        assert_eq!(check(spec(), &dm).reason(), "must be used in a server");
    }

    #[test]
    fn test_dm_only_always_denies() {
        let grant = check(PermissionSpec::dm_only(), &InvocationContext::direct("u", "dm"));
        assert!(!grant.granted);
    }

    #[test]
    fn test_inclusive_without_entry_grants_by_default() {
        let spec = PermissionSpec::inclusive().server("other", AccessList::new().user("x"));
        assert!(check(spec.clone(), &guild("u")).granted);

        let strict = policy().strict(true);
        let grant = Permission::new("cmd", spec).check(&guild("u"), &strict).unwrap();
        assert_eq!(grant.reason(), "not enabled on this server");
    }

    #[test]
    fn test_inclusive_tiers_short_circuit() {
        let list = AccessList::new().user("u").role("r").channel("c1");
        let spec = PermissionSpec::inclusive().server("s1", list);

        assert!(check(spec.clone(), &guild("u").role("r")).granted);
        assert_eq!(
            check(spec.clone(), &guild("v").role("r")).reason(),
            "you are not allowed to use this"
        );
        assert_eq!(
            check(spec.clone(), &guild("u")).reason(),
            "none of your roles are allowed to use this"
        );
        let elsewhere = InvocationContext::server("u", "c2", "s1").role("r");
        assert_eq!(check(spec, &elsewhere).reason(), "not allowed in this channel");
    }

    #[test]
    fn test_exclusive_tiers() {
        let spec = PermissionSpec::exclusive().server("s1", AccessList::new().user("bad").channel("c9"));
        assert!(check(spec.clone(), &guild("good")).granted);
        assert_eq!(check(spec.clone(), &guild("bad")).reason(), "you are blocked from using this");

        let c9 = InvocationContext::server("good", "c9", "s1");
        assert_eq!(check(spec, &c9).reason(), "blocked in this channel");
    }

    #[test]
    fn test_operator_bypasses_lists() {
        let spec = PermissionSpec::exclusive().server("s1", AccessList::new().user("op"));
        assert!(check(spec, &guild("op")).granted);
    }

    #[test]
    fn test_mutators_are_polarity_aware() {
        let mut perm = Permission::new("cmd", PermissionSpec::inclusive());
        perm.allow("s1", &AccessList::new().user("a").user("b")).unwrap();
        perm.deny("s1", &AccessList::new().user("a")).unwrap();
        let users = &perm.spec().servers["s1"].users;
        assert!(users.contains("b") && !users.contains("a"));

        // inverting keeps the lists but flips their meaning
        assert_eq!(perm.invert().unwrap(), PermissionKind::Exclusive);
        assert!(!perm.check(&guild("b"), &policy()).unwrap().granted);
        perm.allow("s1", &AccessList::new().user("b")).unwrap();
        assert!(perm.check(&guild("b"), &policy()).unwrap().granted);

        perm.deny("s2", &AccessList::new().role("r")).unwrap();
        assert!(perm.clear("s2").unwrap());
        assert!(!perm.clear("s2").unwrap());
    }

    #[test]
    fn test_mutators_reject_list_less_kinds() {
        for spec in [
            PermissionSpec::public(),
            PermissionSpec::private(),
            PermissionSpec::privileged(),
            PermissionSpec::dm_only(),
            PermissionSpec::inherit(),
        ] {
            let kind = spec.kind;
            let mut perm = Permission::new("cmd", spec);
            assert_eq!(
                perm.allow("s1", &AccessList::new()),
                Err(PermissionError::NotListBased(kind))
            );
            assert!(perm.invert().is_err());
            assert!(perm.clear("s1").is_err());
        }
    }
}
