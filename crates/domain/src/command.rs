use tenure_core::{AppError, AppResult};

use crate::GrantId;

/// Button identifier of the "remove my role" action.
pub const REMOVE_ROLE_CUSTOM_ID: &str = "remove_role";

const CLAIM_PREFIX: &str = "select_role_";
const RENEW_CONFIRM_PREFIX: &str = "renew_yes_";
const RENEW_DECLINE_PREFIX: &str = "renew_no_";

/// Answer given to a renewal prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewalAnswer {
    /// Keep the role for another duration.
    Confirm,
    /// Give the role up.
    Decline,
}

/// User-facing action decoded from an interactive component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundCommand {
    /// Claim a role from the catalog.
    ClaimRole {
        /// Catalog choice key.
        choice_key: String,
    },
    /// Give up the currently held role.
    RemoveOwnRole,
    /// Answer a renewal prompt.
    RespondToRenewal {
        /// Grant the prompt belongs to.
        grant_id: GrantId,
        /// The member's answer.
        answer: RenewalAnswer,
    },
}

impl InboundCommand {
    /// Decodes a component custom id.
    pub fn parse(custom_id: &str) -> AppResult<Self> {
        if custom_id == REMOVE_ROLE_CUSTOM_ID {
            return Ok(Self::RemoveOwnRole);
        }

        if let Some(choice_key) = custom_id.strip_prefix(CLAIM_PREFIX)
            && !choice_key.is_empty()
        {
            return Ok(Self::ClaimRole {
                choice_key: choice_key.to_owned(),
            });
        }

        if let Some(grant_id) = custom_id.strip_prefix(RENEW_CONFIRM_PREFIX) {
            return Ok(Self::RespondToRenewal {
                grant_id: GrantId::parse(grant_id)?,
                answer: RenewalAnswer::Confirm,
            });
        }

        if let Some(grant_id) = custom_id.strip_prefix(RENEW_DECLINE_PREFIX) {
            return Ok(Self::RespondToRenewal {
                grant_id: GrantId::parse(grant_id)?,
                answer: RenewalAnswer::Decline,
            });
        }

        Err(AppError::Validation(format!(
            "unrecognized component id '{custom_id}'"
        )))
    }

    /// Encodes the command as a component custom id.
    #[must_use]
    pub fn custom_id(&self) -> String {
        match self {
            Self::ClaimRole { choice_key } => format!("{CLAIM_PREFIX}{choice_key}"),
            Self::RemoveOwnRole => REMOVE_ROLE_CUSTOM_ID.to_owned(),
            Self::RespondToRenewal {
                grant_id,
                answer: RenewalAnswer::Confirm,
            } => format!("{RENEW_CONFIRM_PREFIX}{grant_id}"),
            Self::RespondToRenewal {
                grant_id,
                answer: RenewalAnswer::Decline,
            } => format!("{RENEW_DECLINE_PREFIX}{grant_id}"),
        }
    }
}
