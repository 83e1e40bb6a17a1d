use serde::{Deserialize, Serialize};

/// Inbound auth headers the edge proxy is allowed to forward. The same names
/// are used verbatim when activities forward identity to the tool endpoint.
pub mod headers {
    pub const USER: &str = "x-auth-request-user";
    pub const EMAIL: &str = "x-auth-request-email";
    pub const GROUPS: &str = "x-auth-request-groups";
    pub const NAME: &str = "x-auth-request-preferred-username";
}

/// Caller identity as captured at the HTTP edge. Carried inside the message
/// payload so a restarted conversation instance can reprocess it without
/// reaching back into any request-local state.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthContext {
    pub user: Option<String>,
    pub email: Option<String>,
    pub groups: Option<String>,
    pub name: Option<String>,
}

impl AuthContext {
    pub fn is_anonymous(&self) -> bool {
        self.user.is_none() && self.email.is_none()
    }

    /// Header pairs forwarded on outbound tool invocations.
    pub fn header_pairs(&self) -> Vec<(&'static str, &str)> {
        let mut pairs = Vec::new();
        if let Some(user) = self.user.as_deref() {
            pairs.push((headers::USER, user));
        }
        if let Some(email) = self.email.as_deref() {
            pairs.push((headers::EMAIL, email));
        }
        if let Some(groups) = self.groups.as_deref() {
            pairs.push((headers::GROUPS, groups));
        }
        if let Some(name) = self.name.as_deref() {
            pairs.push((headers::NAME, name));
        }
        pairs
    }

    /// Prompt scaffolding describing the caller, injected as a transient
    /// developer turn ahead of the user's message.
    pub fn prompt_context(&self) -> String {
        let field = |value: &Option<String>| -> String {
            value.clone().unwrap_or_else(|| "unknown".to_string())
        };
        format!(
            "Requesting user: {} (name: {}, email: {}, groups: {})",
            field(&self.user),
            field(&self.name),
            field(&self.email),
            field(&self.groups),
        )
    }
}
