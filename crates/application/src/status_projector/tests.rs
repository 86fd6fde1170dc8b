use std::sync::atomic::Ordering;

use tenure_domain::ClaimRequest;

use super::StatusProjector;
use crate::test_support::{BOT_USER_ID, Harness, PlatformCall};
use crate::ChannelMessage;

const STATS_CHANNEL: &str = "stats";

fn projector(harness: &Harness) -> StatusProjector {
    StatusProjector::new(
        harness.repository.clone(),
        harness.platform.clone(),
        STATS_CHANNEL,
    )
}

async fn claim(harness: &Harness, subject_id: &str, display_name: &str, choice_key: &str) {
    let result = harness
        .service
        .claim(ClaimRequest {
            subject_id: subject_id.to_owned(),
            display_name: display_name.to_owned(),
            choice_key: choice_key.to_owned(),
        })
        .await;
    assert!(result.is_ok());
}

async fn status_writes(harness: &Harness) -> (usize, usize) {
    let calls = harness.platform.calls().await;
    let posts = calls
        .iter()
        .filter(|call| matches!(call, PlatformCall::Post { channel_id, .. } if channel_id == STATS_CHANNEL))
        .count();
    let edits = calls
        .iter()
        .filter(|call| matches!(call, PlatformCall::Edit { channel_id, .. } if channel_id == STATS_CHANNEL))
        .count();
    (posts, edits)
}

#[tokio::test]
async fn lists_active_grants_sorted_by_role_then_name() {
    let harness = Harness::new();
    claim(&harness, "1", "zoe", "sandy").await;
    claim(&harness, "2", "bob", "paleto").await;
    claim(&harness, "3", "amy", "sandy").await;
    claim(&harness, "4", "cid", "paleto").await;
    assert!(harness.service.remove("4").await.is_ok());
    harness
        .platform
        .display_names
        .lock()
        .await
        .insert("1".to_owned(), "Zoe Prime".to_owned());

    let projector = projector(&harness);
    projector.signal().await;
    projector.wait_idle().await;

    let calls = harness.platform.calls().await;
    let Some(PlatformCall::Post { message, .. }) = calls
        .iter()
        .find(|call| matches!(call, PlatformCall::Post { channel_id, .. } if channel_id == STATS_CHANNEL))
    else {
        panic!("status should be posted");
    };

    assert_eq!(
        message.content,
        "**📊 Active roles:**\n```\nbob - Paleto Bay\namy - Sandy Shores\nZoe Prime - Sandy Shores\n```"
    );
}

#[tokio::test]
async fn reuses_status_message_from_a_previous_run() {
    let harness = Harness::new();
    harness
        .platform
        .seed_message(
            STATS_CHANNEL,
            ChannelMessage {
                id: "old-status".to_owned(),
                author_id: BOT_USER_ID.to_owned(),
                content: "**📊 Active roles:**\nNo active roles".to_owned(),
            },
        )
        .await;
    harness
        .platform
        .seed_message(
            STATS_CHANNEL,
            ChannelMessage {
                id: "chatter".to_owned(),
                author_id: "someone".to_owned(),
                content: "Active roles are great".to_owned(),
            },
        )
        .await;

    let projector = projector(&harness);
    projector.signal().await;
    projector.wait_idle().await;

    assert_eq!(status_writes(&harness).await, (0, 1));
    assert_eq!(projector.message_id().await.as_deref(), Some("old-status"));
}

#[tokio::test]
async fn failed_edit_posts_a_fresh_message() {
    let harness = Harness::new();
    let projector = projector(&harness);
    projector.signal().await;
    projector.wait_idle().await;
    let first = projector.message_id().await;

    harness.platform.fail_edits.store(true, Ordering::SeqCst);
    projector.signal().await;
    projector.wait_idle().await;

    assert_eq!(status_writes(&harness).await, (2, 0));
    assert!(projector.message_id().await.is_some());
    assert_ne!(projector.message_id().await, first);
}

#[tokio::test]
async fn signals_during_a_refresh_collapse_into_one_follow_up() {
    let harness = Harness::new();
    let projector = projector(&harness);

    for _ in 0..5 {
        projector.signal().await;
    }
    projector.wait_idle().await;

    assert_eq!(status_writes(&harness).await, (1, 1));
}

#[tokio::test]
async fn retract_deletes_the_status_message() {
    let harness = Harness::new();
    let projector = projector(&harness);
    projector.signal().await;
    projector.wait_idle().await;
    let Some(message_id) = projector.message_id().await else {
        panic!("status should be posted");
    };

    assert!(projector.retract().await.is_ok());
    assert!(projector.message_id().await.is_none());
    assert!(harness.platform.calls().await.contains(&PlatformCall::Delete {
        channel_id: STATS_CHANNEL.to_owned(),
        message_id,
    }));
}
