use thiserror::Error;

/// Lifecycle requests refused because of the member's own state.
///
/// Rejections never change persisted state. They are reported back to the
/// acting member as an ephemeral reply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    /// The member already holds an active grant.
    #[error("subject already holds active role '{role_name}'")]
    AlreadyActive {
        /// Name of the role currently held.
        role_name: String,
    },

    /// The member holds no active grant to remove.
    #[error("subject holds no active role")]
    NoActiveGrant,

    /// The acting member does not own the grant.
    #[error("acting subject does not own the grant")]
    NotOwner,

    /// The renewal request was already resolved.
    #[error("renewal request is no longer pending")]
    StaleRequest,

    /// The requested role is not part of the catalog.
    #[error("unknown role choice '{0}'")]
    UnknownRoleChoice(String),
}

impl Rejection {
    /// Returns the reply shown to the acting member.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::AlreadyActive { role_name } => format!(
                "You already hold the role **{role_name}**. Remove it before claiming another one."
            ),
            Self::NoActiveGrant => "You have no active role to remove.".to_owned(),
            Self::NotOwner => "This action is not available to you.".to_owned(),
            Self::StaleRequest => "This renewal request has already been resolved.".to_owned(),
            Self::UnknownRoleChoice(_) => "Unknown role.".to_owned(),
        }
    }
}
