use std::sync::Arc;

use tenure_core::AppResult;
use tenure_domain::{InboundCommand, RoleCatalog};
use tokio::sync::Mutex;
use tracing::info;

use crate::{ActionStyle, ChatPlatform, MessageAction, OutgoingMessage};

/// Publishes and withdraws the role-selection message.
#[derive(Clone)]
pub struct RoleMenuService {
    platform: Arc<dyn ChatPlatform>,
    channel_id: String,
    catalog: RoleCatalog,
    posted_message_id: Arc<Mutex<Option<String>>>,
}

impl RoleMenuService {
    /// Creates a role menu for `catalog` in `channel_id`.
    #[must_use]
    pub fn new(
        platform: Arc<dyn ChatPlatform>,
        channel_id: impl Into<String>,
        catalog: RoleCatalog,
    ) -> Self {
        Self {
            platform,
            channel_id: channel_id.into(),
            catalog,
            posted_message_id: Arc::new(Mutex::new(None)),
        }
    }

    /// Builds the menu: one button per role plus a removal button.
    #[must_use]
    pub fn menu_message(&self) -> OutgoingMessage {
        let message = self
            .catalog
            .choices()
            .iter()
            .fold(OutgoingMessage::text("Choose a role:"), |message, choice| {
                message.with_action(MessageAction::new(
                    InboundCommand::ClaimRole {
                        choice_key: choice.key().to_owned(),
                    }
                    .custom_id(),
                    choice.role_name(),
                    ActionStyle::Primary,
                ))
            });

        message.with_action(MessageAction::new(
            InboundCommand::RemoveOwnRole.custom_id(),
            "Remove role",
            ActionStyle::Danger,
        ))
    }

    /// Posts the menu and remembers its id.
    pub async fn publish(&self) -> AppResult<String> {
        let message_id = self
            .platform
            .post_message(self.channel_id.as_str(), self.menu_message())
            .await?;
        info!(message_id = %message_id, "role menu published");
        *self.posted_message_id.lock().await = Some(message_id.clone());

        Ok(message_id)
    }

    /// Deletes the published menu, if any.
    pub async fn withdraw(&self) -> AppResult<()> {
        let Some(message_id) = self.posted_message_id.lock().await.take() else {
            return Ok(());
        };

        self.platform
            .delete_message(self.channel_id.as_str(), message_id.as_str())
            .await?;
        info!(message_id = %message_id, "role menu withdrawn");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use tenure_domain::RoleCatalog;

    use super::RoleMenuService;
    use crate::test_support::{FakePlatform, PlatformCall};

    #[tokio::test]
    async fn publishes_one_button_per_role_and_withdraws() {
        let platform = std::sync::Arc::new(FakePlatform::default());
        let Ok(catalog) = RoleCatalog::from_str("sandy=901:Sandy Shores,paleto=902:Paleto Bay")
        else {
            panic!("catalog should parse");
        };
        let menu = RoleMenuService::new(platform.clone(), "roles", catalog);

        let custom_ids: Vec<String> = menu
            .menu_message()
            .actions
            .into_iter()
            .map(|action| action.custom_id)
            .collect();
        assert_eq!(
            custom_ids,
            vec!["select_role_sandy", "select_role_paleto", "remove_role"]
        );

        let Ok(message_id) = menu.publish().await else {
            panic!("menu should be published");
        };
        assert!(menu.withdraw().await.is_ok());
        assert!(menu.withdraw().await.is_ok());

        let deletes: Vec<PlatformCall> = platform
            .calls()
            .await
            .into_iter()
            .filter(|call| matches!(call, PlatformCall::Delete { .. }))
            .collect();
        assert_eq!(
            deletes,
            vec![PlatformCall::Delete {
                channel_id: "roles".to_owned(),
                message_id,
            }]
        );
    }
}
