//! Discord HTTP interactions endpoint.
//!
//! Every request is authenticated with the application's Ed25519 public key
//! before its body is parsed.

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use tenure_application::Actor;
use tenure_core::AppError;
use tenure_domain::InboundCommand;
use tracing::{debug, warn};

use crate::error::ApiResult;
use crate::state::BotState;

#[cfg(test)]
mod tests;

const SIGNATURE_HEADER: &str = "x-signature-ed25519";
const TIMESTAMP_HEADER: &str = "x-signature-timestamp";

const INTERACTION_PING: u8 = 1;
const INTERACTION_MESSAGE_COMPONENT: u8 = 3;
const CALLBACK_PONG: u8 = 1;
const CALLBACK_CHANNEL_MESSAGE: u8 = 4;
const EPHEMERAL_FLAG: u64 = 1 << 6;

/// Verifies request signatures with the application's public key.
#[derive(Debug, Clone)]
pub struct InteractionVerifier {
    public_key: VerifyingKey,
}

impl InteractionVerifier {
    /// Parses the hex-encoded public key from the developer portal.
    pub fn from_hex(public_key: &str) -> Result<Self, AppError> {
        let bytes = hex::decode(public_key.trim()).map_err(|error| {
            AppError::Validation(format!("DISCORD_PUBLIC_KEY is not valid hex: {error}"))
        })?;
        let bytes = <[u8; 32]>::try_from(bytes.as_slice()).map_err(|_| {
            AppError::Validation("DISCORD_PUBLIC_KEY must be 32 bytes".to_owned())
        })?;
        let public_key = VerifyingKey::from_bytes(&bytes).map_err(|error| {
            AppError::Validation(format!("DISCORD_PUBLIC_KEY is not a valid key: {error}"))
        })?;

        Ok(Self { public_key })
    }

    /// Checks `signature` over `timestamp || body`.
    pub fn verify(&self, timestamp: &str, body: &[u8], signature: &str) -> Result<(), AppError> {
        let signature = hex::decode(signature)
            .ok()
            .and_then(|bytes| <[u8; 64]>::try_from(bytes.as_slice()).ok())
            .map(|bytes| Signature::from_bytes(&bytes))
            .ok_or_else(|| AppError::Unauthorized("malformed request signature".to_owned()))?;

        let mut message = Vec::with_capacity(timestamp.len() + body.len());
        message.extend_from_slice(timestamp.as_bytes());
        message.extend_from_slice(body);

        self.public_key
            .verify(message.as_slice(), &signature)
            .map_err(|_| AppError::Unauthorized("invalid request signature".to_owned()))
    }
}

#[derive(Debug, Deserialize)]
struct Interaction {
    #[serde(rename = "type")]
    kind: u8,
    #[serde(default)]
    data: Option<ComponentData>,
    #[serde(default)]
    member: Option<InteractionMember>,
    #[serde(default)]
    user: Option<InteractionUser>,
}

#[derive(Debug, Deserialize)]
struct ComponentData {
    custom_id: String,
}

#[derive(Debug, Deserialize)]
struct InteractionMember {
    #[serde(default)]
    nick: Option<String>,
    user: InteractionUser,
}

#[derive(Debug, Deserialize)]
struct InteractionUser {
    id: String,
    #[serde(default)]
    username: String,
    #[serde(default)]
    global_name: Option<String>,
}

impl Interaction {
    fn actor(&self) -> Option<Actor> {
        let (nick, user) = match (&self.member, &self.user) {
            (Some(member), _) => (member.nick.as_deref(), &member.user),
            (None, Some(user)) => (None, user),
            (None, None) => return None,
        };
        let display_name = nick
            .filter(|name| !name.is_empty())
            .or_else(|| user.global_name.as_deref().filter(|name| !name.is_empty()))
            .unwrap_or(user.username.as_str());

        Some(Actor {
            subject_id: user.id.clone(),
            display_name: display_name.to_owned(),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct InteractionResponse {
    #[serde(rename = "type")]
    kind: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<CallbackData>,
}

#[derive(Debug, Serialize)]
struct CallbackData {
    content: String,
    flags: u64,
}

impl InteractionResponse {
    fn pong() -> Self {
        Self {
            kind: CALLBACK_PONG,
            data: None,
        }
    }

    fn ephemeral(content: String) -> Self {
        Self {
            kind: CALLBACK_CHANNEL_MESSAGE,
            data: Some(CallbackData {
                content,
                flags: EPHEMERAL_FLAG,
            }),
        }
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, AppError> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized(format!("missing {name} header")))
}

pub async fn interactions_handler(
    State(state): State<BotState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<InteractionResponse>> {
    state.verifier.verify(
        header(&headers, TIMESTAMP_HEADER)?,
        body.as_ref(),
        header(&headers, SIGNATURE_HEADER)?,
    )?;

    let interaction: Interaction = serde_json::from_slice(body.as_ref()).map_err(|error| {
        AppError::Validation(format!("malformed interaction payload: {error}"))
    })?;

    match interaction.kind {
        INTERACTION_PING => Ok(Json(InteractionResponse::pong())),
        INTERACTION_MESSAGE_COMPONENT => {
            let custom_id = interaction
                .data
                .as_ref()
                .map(|data| data.custom_id.as_str())
                .ok_or_else(|| {
                    AppError::Validation("component interaction without data".to_owned())
                })?;
            let actor = interaction.actor().ok_or_else(|| {
                AppError::Validation("component interaction without a user".to_owned())
            })?;
            let command = InboundCommand::parse(custom_id).inspect_err(|error| {
                warn!(custom_id, error = %error, "unrecognized component interaction");
            })?;
            debug!(subject_id = %actor.subject_id, custom_id, "component interaction");

            let reply = state.command_router.dispatch(&actor, command).await;
            Ok(Json(InteractionResponse::ephemeral(reply)))
        }
        other => Err(AppError::Validation(format!("unsupported interaction type {other}")).into()),
    }
}
