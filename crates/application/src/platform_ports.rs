use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tenure_core::AppResult;

/// Visual style of an interactive button.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionStyle {
    /// Highlighted action.
    Primary,
    /// Positive action.
    Success,
    /// Destructive action.
    Danger,
}

/// Interactive button attached to a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageAction {
    /// Identifier echoed back when the button is pressed.
    pub custom_id: String,
    /// Button label.
    pub label: String,
    /// Button style.
    pub style: ActionStyle,
}

impl MessageAction {
    /// Creates a button.
    #[must_use]
    pub fn new(custom_id: impl Into<String>, label: impl Into<String>, style: ActionStyle) -> Self {
        Self {
            custom_id: custom_id.into(),
            label: label.into(),
            style,
        }
    }
}

/// Message to post in a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    /// Message text.
    pub content: String,
    /// Buttons shown under the message.
    pub actions: Vec<MessageAction>,
}

impl OutgoingMessage {
    /// Creates a plain text message.
    #[must_use]
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            actions: Vec::new(),
        }
    }

    /// Appends one button.
    #[must_use]
    pub fn with_action(mut self, action: MessageAction) -> Self {
        self.actions.push(action);
        self
    }
}

/// Message read back from channel history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMessage {
    /// Message id.
    pub id: String,
    /// Author user id.
    pub author_id: String,
    /// Message text.
    pub content: String,
}

/// Chat platform capabilities used by the bot.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Gives a role to a member. Succeeds when the member already has it.
    async fn grant_role(&self, subject_id: &str, role_id: &str) -> AppResult<()>;

    /// Takes a role from a member.
    async fn revoke_role(&self, subject_id: &str, role_id: &str) -> AppResult<()>;

    /// Posts a message and returns its id.
    async fn post_message(&self, channel_id: &str, message: OutgoingMessage) -> AppResult<String>;

    /// Replaces the text of an existing message.
    async fn edit_message(&self, channel_id: &str, message_id: &str, content: &str)
    -> AppResult<()>;

    /// Deletes a message.
    async fn delete_message(&self, channel_id: &str, message_id: &str) -> AppResult<()>;

    /// Returns the member's current display name, when the member is known.
    async fn lookup_display_name(&self, subject_id: &str) -> AppResult<Option<String>>;

    /// Returns up to `limit` most recent messages of a channel, newest first.
    async fn recent_messages(&self, channel_id: &str, limit: usize)
    -> AppResult<Vec<ChannelMessage>>;

    /// Returns the bot's own user id.
    async fn current_user_id(&self) -> AppResult<String>;
}

/// Source of the current instant.
pub trait Clock: Send + Sync {
    /// Returns the current UTC instant.
    fn now(&self) -> DateTime<Utc>;
}
