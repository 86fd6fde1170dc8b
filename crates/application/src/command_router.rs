use tenure_core::AppError;
use tenure_domain::{ClaimRequest, InboundCommand};
use tracing::warn;

use crate::{GrantLifecycleService, RenewalOutcome};

const FAILURE_REPLY: &str = "Something went wrong, please try again later.";

/// Member who pressed a button, as authenticated by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    /// Platform user id.
    pub subject_id: String,
    /// Display name at the time of the interaction.
    pub display_name: String,
}

/// Maps inbound commands onto lifecycle operations and reply texts.
#[derive(Clone)]
pub struct CommandRouter {
    lifecycle: GrantLifecycleService,
}

impl CommandRouter {
    /// Creates a router over `lifecycle`.
    #[must_use]
    pub fn new(lifecycle: GrantLifecycleService) -> Self {
        Self { lifecycle }
    }

    /// Runs `command` for `actor` and returns the ephemeral reply.
    pub async fn dispatch(&self, actor: &Actor, command: InboundCommand) -> String {
        let result = match command {
            InboundCommand::ClaimRole { choice_key } => self
                .lifecycle
                .claim(ClaimRequest {
                    subject_id: actor.subject_id.clone(),
                    display_name: actor.display_name.clone(),
                    choice_key,
                })
                .await
                .map(|outcome| format!("Role **{}** granted!", outcome.grant.role_name)),
            InboundCommand::RemoveOwnRole => self
                .lifecycle
                .remove(actor.subject_id.as_str())
                .await
                .map(|outcome| format!("Role **{}** removed!", outcome.role_name)),
            InboundCommand::RespondToRenewal { grant_id, answer } => self
                .lifecycle
                .respond_to_renewal(grant_id, actor.subject_id.as_str(), answer)
                .await
                .map(|outcome| match outcome {
                    RenewalOutcome::Renewed {
                        role_name,
                        expires_at,
                        ..
                    } => format!(
                        "Role **{role_name}** renewed until {}!",
                        expires_at.format("%d.%m.%Y %H:%M UTC")
                    ),
                    RenewalOutcome::Declined { role_name, .. } => {
                        format!("Role **{role_name}** has been removed.")
                    }
                }),
        };

        match result {
            Ok(reply) => reply,
            Err(AppError::Rejected(rejection)) => rejection.user_message(),
            Err(error) => {
                warn!(
                    subject_id = %actor.subject_id,
                    error = %error,
                    "command failed"
                );
                FAILURE_REPLY.to_owned()
            }
        }
    }
}
