use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue};
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signer, SigningKey};
use serde_json::{Value, json};
use tenure_application::{
    ChannelMessage, ChatPlatform, Clock, GrantRepository, OutgoingMessage,
};
use tenure_core::{AppError, AppResult};
use tenure_infrastructure::{InMemoryGrantAuditRepository, InMemoryGrantRepository};
use tokio::sync::Mutex;

use super::{InteractionVerifier, interactions_handler};
use crate::bot_config::BotConfig;
use crate::bot_router::health_handler;
use crate::bot_services::{BotPorts, build_services};
use crate::error::ApiError;
use crate::state::BotState;

const SIGNING_SEED: [u8; 32] = [7; 32];
const TIMESTAMP: &str = "1767225600";

#[derive(Default)]
struct RecordingPlatform {
    granted: Mutex<Vec<(String, String)>>,
    next_message_id: AtomicU64,
}

#[async_trait]
impl ChatPlatform for RecordingPlatform {
    async fn grant_role(&self, subject_id: &str, role_id: &str) -> AppResult<()> {
        self.granted
            .lock()
            .await
            .push((subject_id.to_owned(), role_id.to_owned()));
        Ok(())
    }

    async fn revoke_role(&self, _subject_id: &str, _role_id: &str) -> AppResult<()> {
        Ok(())
    }

    async fn post_message(&self, _channel_id: &str, _message: OutgoingMessage) -> AppResult<String> {
        Ok(self.next_message_id.fetch_add(1, Ordering::SeqCst).to_string())
    }

    async fn edit_message(
        &self,
        _channel_id: &str,
        _message_id: &str,
        _content: &str,
    ) -> AppResult<()> {
        Ok(())
    }

    async fn delete_message(&self, _channel_id: &str, _message_id: &str) -> AppResult<()> {
        Ok(())
    }

    async fn lookup_display_name(&self, _subject_id: &str) -> AppResult<Option<String>> {
        Ok(None)
    }

    async fn recent_messages(
        &self,
        _channel_id: &str,
        _limit: usize,
    ) -> AppResult<Vec<ChannelMessage>> {
        Ok(Vec::new())
    }

    async fn current_user_id(&self) -> AppResult<String> {
        Ok("bot".to_owned())
    }
}

struct WallClock;

impl Clock for WallClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

struct Fixture {
    state: BotState,
    repository: Arc<InMemoryGrantRepository>,
    platform: Arc<RecordingPlatform>,
}

fn signing_key() -> SigningKey {
    SigningKey::from_bytes(&SIGNING_SEED)
}

fn fixture() -> Fixture {
    let public_key = hex::encode(signing_key().verifying_key().to_bytes());
    let values: HashMap<&str, String> = HashMap::from([
        ("DATABASE_URL", "postgres://unused".to_owned()),
        ("DISCORD_BOT_TOKEN", "token".to_owned()),
        ("DISCORD_PUBLIC_KEY", public_key.clone()),
        ("GUILD_ID", "guild".to_owned()),
        ("ROLE_CHANNEL_ID", "roles".to_owned()),
        ("NOTIFICATION_CHANNEL_ID", "notifications".to_owned()),
        ("STATS_CHANNEL_ID", "stats".to_owned()),
        (
            "ROLE_CHOICES",
            "sandy=901:Sandy Shores,paleto=902:Paleto Bay".to_owned(),
        ),
    ]);
    let Ok(config) = BotConfig::from_lookup(|name| values.get(name).cloned()) else {
        panic!("test config should load");
    };

    let repository = Arc::new(InMemoryGrantRepository::new());
    let platform = Arc::new(RecordingPlatform::default());
    let Ok(services) = build_services(
        &config,
        BotPorts {
            repository: repository.clone(),
            audit_repository: Arc::new(InMemoryGrantAuditRepository::new()),
            platform: platform.clone(),
            clock: Arc::new(WallClock),
        },
    ) else {
        panic!("services should build");
    };
    let Ok(verifier) = InteractionVerifier::from_hex(public_key.as_str()) else {
        panic!("public key should parse");
    };

    Fixture {
        state: BotState {
            command_router: services.command_router,
            verifier: Arc::new(verifier),
        },
        repository,
        platform,
    }
}

fn signed_headers(body: &[u8]) -> HeaderMap {
    let mut message = TIMESTAMP.as_bytes().to_vec();
    message.extend_from_slice(body);
    let signature = hex::encode(signing_key().sign(message.as_slice()).to_bytes());

    let mut headers = HeaderMap::new();
    headers.insert("x-signature-timestamp", HeaderValue::from_static(TIMESTAMP));
    if let Ok(value) = HeaderValue::from_str(signature.as_str()) {
        headers.insert("x-signature-ed25519", value);
    }
    headers
}

async fn send(fixture: &Fixture, payload: Value) -> Result<Value, ApiError> {
    let body = payload.to_string().into_bytes();
    let headers = signed_headers(body.as_slice());
    interactions_handler(State(fixture.state.clone()), headers, Bytes::from(body))
        .await
        .map(|response| serde_json::to_value(&response.0).unwrap_or_default())
}

fn button_press(custom_id: &str) -> Value {
    json!({
        "type": 3,
        "data": {"custom_id": custom_id, "component_type": 2},
        "member": {
            "nick": null,
            "user": {"id": "100", "username": "sandy_1", "global_name": "Sandy"}
        }
    })
}

#[tokio::test]
async fn ping_is_answered_with_pong() {
    let fixture = fixture();
    let response = send(&fixture, json!({"type": 1})).await;
    assert!(matches!(response, Ok(ref value) if *value == json!({"type": 1})));
}

#[tokio::test]
async fn tampered_or_unsigned_requests_are_rejected() {
    let fixture = fixture();
    let body = json!({"type": 1}).to_string().into_bytes();
    let headers = signed_headers(body.as_slice());

    let tampered = interactions_handler(
        State(fixture.state.clone()),
        headers,
        Bytes::from(json!({"type": 2}).to_string()),
    )
    .await;
    assert!(matches!(tampered, Err(ApiError(AppError::Unauthorized(_)))));

    let unsigned =
        interactions_handler(State(fixture.state.clone()), HeaderMap::new(), Bytes::from(body))
            .await;
    assert!(matches!(unsigned, Err(ApiError(AppError::Unauthorized(_)))));
}

#[tokio::test]
async fn claim_button_grants_the_role_with_an_ephemeral_reply() {
    let fixture = fixture();

    let Ok(response) = send(&fixture, button_press("select_role_sandy")).await else {
        panic!("claim should be answered");
    };
    assert_eq!(response["type"], 4);
    assert_eq!(response["data"]["flags"], 64);
    assert_eq!(response["data"]["content"], "Role **Sandy Shores** granted!");

    let active = fixture.repository.find_active_by_subject("100").await;
    assert!(matches!(
        active,
        Ok(Some(ref grant)) if grant.subject_display_name == "Sandy" && grant.role_id == "901"
    ));
    assert_eq!(
        fixture.platform.granted.lock().await.clone(),
        vec![("100".to_owned(), "901".to_owned())]
    );

    let Ok(again) = send(&fixture, button_press("select_role_paleto")).await else {
        panic!("second claim should be answered");
    };
    assert!(
        again["data"]["content"]
            .as_str()
            .is_some_and(|content| content.starts_with("You already hold the role"))
    );
}

#[tokio::test]
async fn malformed_payloads_are_bad_requests() {
    let fixture = fixture();

    let body = b"not json".to_vec();
    let headers = signed_headers(body.as_slice());
    let malformed =
        interactions_handler(State(fixture.state.clone()), headers, Bytes::from(body)).await;
    assert!(matches!(malformed, Err(ApiError(AppError::Validation(_)))));

    let unknown = send(&fixture, button_press("open_shop")).await;
    assert!(matches!(unknown, Err(ApiError(AppError::Validation(_)))));
}

#[tokio::test]
async fn health_reports_ok() {
    let response = health_handler().await;
    assert_eq!(
        serde_json::to_value(&response.0).unwrap_or_default(),
        json!({"status": "ok"})
    );
}
