//! Invoker identity supplied by the transport with every message.

use std::collections::BTreeSet;

/// Who sent a message, and where.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvocationContext {
    pub user_id: String,
    pub channel_id: String,
    /// `None` for direct messages
    pub server_id: Option<String>,
    /// Role ids the invoker holds on `server_id`
    pub roles: BTreeSet<String>,
    /// The invoker holds the platform's elevated permission bit on the server
    pub elevated: bool,
    /// The channel is flagged as nsfw by the platform
    pub nsfw_channel: bool,
}

impl InvocationContext {
    /// A direct-message context
    pub fn direct(user_id: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            channel_id: channel_id.into(),
            ..Default::default()
        }
    }

    /// A server-channel context
    pub fn server(
        user_id: impl Into<String>,
        channel_id: impl Into<String>,
        server_id: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            channel_id: channel_id.into(),
            server_id: Some(server_id.into()),
            ..Default::default()
        }
    }

    pub fn role(mut self, role_id: impl Into<String>) -> Self {
        self.roles.insert(role_id.into());
        self
    }

    pub fn elevated(mut self) -> Self {
        self.elevated = true;
        self
    }

    pub fn nsfw(mut self) -> Self {
        self.nsfw_channel = true;
        self
    }

    pub fn is_direct(&self) -> bool {
        self.server_id.is_none()
    }

    pub fn has_role(&self, role_id: &str) -> bool {
        self.roles.contains(role_id)
    }
}
