use std::sync::Arc;

use tenure_application::CommandRouter;

use crate::interactions::InteractionVerifier;

/// Shared state of the HTTP surface.
#[derive(Clone)]
pub struct BotState {
    pub command_router: CommandRouter,
    pub verifier: Arc<InteractionVerifier>,
}
