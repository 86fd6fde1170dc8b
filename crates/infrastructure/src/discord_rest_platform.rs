use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tenure_application::{
    ActionStyle, ChannelMessage, ChatPlatform, MessageAction, OutgoingMessage,
};
use tenure_core::{AppError, AppResult};
use tokio::sync::OnceCell;
use tracing::debug;


const BUTTONS_PER_ROW: usize = 5;
const MAX_ROWS: usize = 5;
const MAX_HISTORY_LIMIT: usize = 100;

/// Discord REST implementation of the chat platform port.
pub struct DiscordRestPlatform {
    http_client: reqwest::Client,
    api_base_url: String,
    bot_token: String,
    guild_id: String,
    max_attempts: u8,
    retry_backoff_ms: u64,
    current_user_id: OnceCell<String>,
}

impl DiscordRestPlatform {
    /// Creates a platform client for one guild.
    #[must_use]
    pub fn new(
        http_client: reqwest::Client,
        api_base_url: impl Into<String>,
        bot_token: impl Into<String>,
        guild_id: impl Into<String>,
        max_attempts: u8,
        retry_backoff_ms: u64,
    ) -> Self {
        Self {
            http_client,
            api_base_url: api_base_url.into().trim_end_matches('/').to_owned(),
            bot_token: bot_token.into(),
            guild_id: guild_id.into(),
            max_attempts: max_attempts.max(1),
            retry_backoff_ms: retry_backoff_ms.max(50),
            current_user_id: OnceCell::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.api_base_url)
    }

    fn authorization(&self) -> String {
        format!("Bot {}", self.bot_token)
    }

    async fn send_with_retry<F>(&self, operation: &str, mut build: F) -> AppResult<reqwest::Response>
    where
        F: FnMut(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let mut attempt = 0_u8;
        let mut last_error: Option<String> = None;

        while attempt < self.max_attempts {
            attempt = attempt.saturating_add(1);
            let response = build(&self.http_client)
                .header(reqwest::header::AUTHORIZATION, self.authorization())
                .send()
                .await;

            let mut delay = self.retry_backoff_ms.saturating_mul(u64::from(attempt));
            match response {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) if response.status() == reqwest::StatusCode::NOT_FOUND => {
                    return Err(AppError::NotFound(format!(
                        "discord resource for '{operation}' was not found"
                    )));
                }
                Ok(response)
                    if response.status().is_server_error()
                        || response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS =>
                {
                    if let Some(retry_after_ms) = retry_after_ms(&response) {
                        delay = delay.max(retry_after_ms);
                    }
                    last_error = Some(format!(
                        "transient HTTP status {} for discord '{operation}'",
                        response.status()
                    ));
                }
                Ok(response) => {
                    let status = response.status();
                    let body = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "<response body unavailable>".to_owned());
                    return Err(AppError::Internal(format!(
                        "discord '{operation}' failed with status {status}: {body}"
                    )));
                }
                Err(error) => {
                    last_error = Some(format!("discord '{operation}' transport error: {error}"));
                }
            }

            if attempt < self.max_attempts {
                debug!(operation, attempt, delay_ms = delay, "retrying discord request");
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
        }

        Err(AppError::Internal(last_error.unwrap_or_else(|| {
            format!("discord '{operation}' exhausted retries")
        })))
    }

    async fn fetch_json<T, F>(&self, operation: &str, build: F) -> AppResult<T>
    where
        T: DeserializeOwned,
        F: FnMut(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        self.send_with_retry(operation, build)
            .await?
            .json::<T>()
            .await
            .map_err(|error| {
                AppError::Internal(format!(
                    "failed to decode discord '{operation}' response: {error}"
                ))
            })
    }
}

fn retry_after_ms(response: &reqwest::Response) -> Option<u64> {
    let seconds = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .parse::<f64>()
        .ok()?;
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }

    Some((seconds * 1000.0).ceil() as u64)
}

#[derive(Debug, Serialize)]
struct MessagePayload<'a> {
    content: &'a str,
    components: Vec<ActionRow<'a>>,
}

#[derive(Debug, Serialize)]
struct ActionRow<'a> {
    #[serde(rename = "type")]
    kind: u8,
    components: Vec<Button<'a>>,
}

#[derive(Debug, Serialize)]
struct Button<'a> {
    #[serde(rename = "type")]
    kind: u8,
    style: u8,
    label: &'a str,
    custom_id: &'a str,
}

fn button_style(style: ActionStyle) -> u8 {
    match style {
        ActionStyle::Primary => 1,
        ActionStyle::Success => 3,
        ActionStyle::Danger => 4,
    }
}

fn action_rows(actions: &[MessageAction]) -> AppResult<Vec<ActionRow<'_>>> {
    if actions.len() > BUTTONS_PER_ROW * MAX_ROWS {
        return Err(AppError::Validation(format!(
            "a message carries at most {} buttons, got {}",
            BUTTONS_PER_ROW * MAX_ROWS,
            actions.len()
        )));
    }

    Ok(actions
        .chunks(BUTTONS_PER_ROW)
        .map(|chunk| ActionRow {
            kind: 1,
            components: chunk
                .iter()
                .map(|action| Button {
                    kind: 2,
                    style: button_style(action.style),
                    label: action.label.as_str(),
                    custom_id: action.custom_id.as_str(),
                })
                .collect(),
        })
        .collect())
}

fn message_payload(message: &OutgoingMessage) -> AppResult<MessagePayload<'_>> {
    Ok(MessagePayload {
        content: message.content.as_str(),
        components: action_rows(message.actions.as_slice())?,
    })
}

#[derive(Debug, Deserialize)]
struct CreatedMessage {
    id: String,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    id: String,
    #[serde(default)]
    username: String,
    #[serde(default)]
    global_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MemberResponse {
    #[serde(default)]
    nick: Option<String>,
    #[serde(default)]
    user: Option<UserResponse>,
}

impl MemberResponse {
    fn display_name(self) -> Option<String> {
        let user = self.user;
        self.nick
            .filter(|nick| !nick.is_empty())
            .or_else(|| {
                user.as_ref()
                    .and_then(|user| user.global_name.clone())
                    .filter(|name| !name.is_empty())
            })
            .or_else(|| {
                user.map(|user| user.username)
                    .filter(|name| !name.is_empty())
            })
    }
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    id: String,
    author: UserResponse,
    #[serde(default)]
    content: String,
}

#[async_trait]
impl ChatPlatform for DiscordRestPlatform {
    async fn grant_role(&self, subject_id: &str, role_id: &str) -> AppResult<()> {
        let url = self.url(&format!(
            "/guilds/{}/members/{subject_id}/roles/{role_id}",
            self.guild_id
        ));
        self.send_with_retry("grant role", |client| client.put(url.as_str()))
            .await?;
        Ok(())
    }

    async fn revoke_role(&self, subject_id: &str, role_id: &str) -> AppResult<()> {
        let url = self.url(&format!(
            "/guilds/{}/members/{subject_id}/roles/{role_id}",
            self.guild_id
        ));
        self.send_with_retry("revoke role", |client| client.delete(url.as_str()))
            .await?;
        Ok(())
    }

    async fn post_message(&self, channel_id: &str, message: OutgoingMessage) -> AppResult<String> {
        let url = self.url(&format!("/channels/{channel_id}/messages"));
        let payload = message_payload(&message)?;
        let created: CreatedMessage = self
            .fetch_json("post message", |client| {
                client.post(url.as_str()).json(&payload)
            })
            .await?;
        Ok(created.id)
    }

    async fn edit_message(
        &self,
        channel_id: &str,
        message_id: &str,
        content: &str,
    ) -> AppResult<()> {
        let url = self.url(&format!("/channels/{channel_id}/messages/{message_id}"));
        let payload = serde_json::json!({ "content": content });
        self.send_with_retry("edit message", |client| {
            client.patch(url.as_str()).json(&payload)
        })
        .await?;
        Ok(())
    }

    async fn delete_message(&self, channel_id: &str, message_id: &str) -> AppResult<()> {
        let url = self.url(&format!("/channels/{channel_id}/messages/{message_id}"));
        match self
            .send_with_retry("delete message", |client| client.delete(url.as_str()))
            .await
        {
            Ok(_) | Err(AppError::NotFound(_)) => Ok(()),
            Err(error) => Err(error),
        }
    }

    async fn lookup_display_name(&self, subject_id: &str) -> AppResult<Option<String>> {
        let url = self.url(&format!("/guilds/{}/members/{subject_id}", self.guild_id));
        match self
            .fetch_json::<MemberResponse, _>("lookup member", |client| client.get(url.as_str()))
            .await
        {
            Ok(member) => Ok(member.display_name()),
            Err(AppError::NotFound(_)) => Ok(None),
            Err(error) => Err(error),
        }
    }

    async fn recent_messages(
        &self,
        channel_id: &str,
        limit: usize,
    ) -> AppResult<Vec<ChannelMessage>> {
        let url = self.url(&format!(
            "/channels/{channel_id}/messages?limit={}",
            limit.clamp(1, MAX_HISTORY_LIMIT)
        ));
        let messages: Vec<MessageResponse> = self
            .fetch_json("read channel history", |client| client.get(url.as_str()))
            .await?;

        Ok(messages
            .into_iter()
            .map(|message| ChannelMessage {
                id: message.id,
                author_id: message.author.id,
                content: message.content,
            })
            .collect())
    }

    async fn current_user_id(&self) -> AppResult<String> {
        self.current_user_id
            .get_or_try_init(|| async {
                let url = self.url("/users/@me");
                let user: UserResponse = self
                    .fetch_json("load current user", |client| client.get(url.as_str()))
                    .await?;
                Ok::<_, AppError>(user.id)
            })
            .await
            .cloned()
    }
}
