// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Store contract tests against the PostgreSQL backend.
//!
//! These require a reachable database; set `TEST_DATABASE_URL` to run them.
//! The acquire tests exercise the `FOR UPDATE SKIP LOCKED` path that SQLite
//! cannot cover.

mod common;

use chrono::{Duration, Utc};

use common::TestContext;
use herald_core::domain::{CampaignStatus, NotificationStatus};
use herald_core::error::CoreError;
use herald_core::store::{CampaignStore, NotificationLedger, RecipientDirectory};

/// Seed `count` recipients and return their ids.
async fn seed_recipients(ctx: &TestContext, count: usize) -> Vec<i64> {
    let mut ids = Vec::with_capacity(count);
    for i in 0..count {
        let recipient = ctx
            .store
            .register("Alex", "Petrov", 30, &format!("r{i}@example.com"))
            .await
            .unwrap();
        ids.push(recipient.recipient_id);
    }
    ids
}

#[tokio::test]
async fn test_pg_add_and_duplicate_name() {
    skip_if_no_db!();
    let Some(ctx) = TestContext::new().await else {
        return;
    };

    let launch = Utc::now() + Duration::minutes(10);
    let campaign = ctx
        .store
        .add("black-friday", "30% off everything", launch)
        .await
        .unwrap();
    assert_eq!(campaign.status, CampaignStatus::Created);
    assert_eq!(
        ctx.campaign_status(campaign.campaign_id).await.as_deref(),
        Some("created")
    );

    let err = ctx
        .store
        .add("black-friday", "again", launch)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NameTaken { .. }));
}

#[tokio::test]
async fn test_pg_update_state_gate() {
    skip_if_no_db!();
    let Some(ctx) = TestContext::new().await else {
        return;
    };

    let campaign = ctx
        .store
        .add("draft", "content", Utc::now() - Duration::minutes(1))
        .await
        .unwrap();

    let updated = ctx
        .store
        .update(
            campaign.campaign_id,
            "draft-v2",
            "new content",
            Utc::now() - Duration::seconds(30),
        )
        .await
        .unwrap();
    assert_eq!(updated.name, "draft-v2");
    assert!(updated.updated_at >= campaign.updated_at);

    ctx.store.acquire().await.unwrap();

    let err = ctx
        .store
        .update(campaign.campaign_id, "draft-v3", "content", Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::InvalidCampaignState {
            operation: "update",
            ..
        }
    ));
}

#[tokio::test]
async fn test_pg_acquire_eligibility() {
    skip_if_no_db!();
    let Some(ctx) = TestContext::new().await else {
        return;
    };

    ctx.store
        .add("future", "content", Utc::now() + Duration::hours(4))
        .await
        .unwrap();
    let err = ctx.store.acquire().await.unwrap_err();
    assert!(matches!(err, CoreError::NoCampaignsDue));

    let due = ctx
        .store
        .add("due", "content", Utc::now() - Duration::minutes(1))
        .await
        .unwrap();
    let acquired = ctx.store.acquire().await.unwrap();
    assert_eq!(acquired.campaign_id, due.campaign_id);
    assert_eq!(acquired.status, CampaignStatus::Running);

    let err = ctx.store.acquire().await.unwrap_err();
    assert!(matches!(err, CoreError::NoCampaignsDue));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pg_concurrent_acquires_have_one_winner() {
    skip_if_no_db!();
    let Some(ctx) = TestContext::new().await else {
        return;
    };

    let campaign = ctx
        .store
        .add("contested", "content", Utc::now() - Duration::minutes(1))
        .await
        .unwrap();

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let store = ctx.store.clone();
        tasks.push(tokio::spawn(async move { store.acquire().await }));
    }

    let results = futures::future::join_all(tasks).await;
    let mut winners = 0;
    for result in results {
        match result.unwrap() {
            Ok(acquired) => {
                assert_eq!(acquired.campaign_id, campaign.campaign_id);
                winners += 1;
            }
            Err(CoreError::NoCampaignsDue) => {}
            Err(other) => panic!("unexpected acquire error: {other}"),
        }
    }

    assert_eq!(winners, 1, "exactly one concurrent acquire must win");
}

#[tokio::test]
async fn test_pg_fanout_and_completion_scenario() {
    skip_if_no_db!();
    let Some(ctx) = TestContext::new().await else {
        return;
    };

    // Black Friday: 4 recipients, 3 delivered (75%) -> failed
    let recipient_ids = seed_recipients(&ctx, 4).await;
    ctx.store
        .add("Black Friday", "content", Utc::now() - Duration::minutes(1))
        .await
        .unwrap();
    let campaign = ctx.store.acquire().await.unwrap();

    let notifications = ctx
        .store
        .add_many(campaign.campaign_id, &recipient_ids)
        .await
        .unwrap();
    assert_eq!(notifications.len(), 4);
    assert!(
        notifications
            .iter()
            .all(|n| n.status == NotificationStatus::Pending)
    );

    // A second fan-out for the same campaign is rejected atomically
    let err = ctx
        .store
        .add_many(campaign.campaign_id, &recipient_ids)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::DuplicateNotification { .. }));
    assert_eq!(ctx.notification_count(campaign.campaign_id).await, 4);

    for (i, recipient_id) in recipient_ids.iter().enumerate() {
        let status = if i < 3 {
            NotificationStatus::Delivered
        } else {
            NotificationStatus::Undelivered
        };
        ctx.store
            .record_outcome(campaign.campaign_id, *recipient_id, status)
            .await
            .unwrap();
    }

    let completed = ctx.store.complete(campaign.campaign_id).await.unwrap();
    assert_eq!(completed.status, CampaignStatus::Failed);
    assert_eq!(
        ctx.campaign_status(campaign.campaign_id).await.as_deref(),
        Some("failed")
    );
}

#[tokio::test]
async fn test_pg_complete_above_threshold() {
    skip_if_no_db!();
    let Some(ctx) = TestContext::new().await else {
        return;
    };

    // 10 of 12 delivered = 83.3% -> done
    let recipient_ids = seed_recipients(&ctx, 12).await;
    ctx.store
        .add("strong", "content", Utc::now() - Duration::minutes(1))
        .await
        .unwrap();
    let campaign = ctx.store.acquire().await.unwrap();
    ctx.store
        .add_many(campaign.campaign_id, &recipient_ids)
        .await
        .unwrap();

    for (i, recipient_id) in recipient_ids.iter().enumerate() {
        let status = if i < 10 {
            NotificationStatus::Delivered
        } else {
            NotificationStatus::Undelivered
        };
        ctx.store
            .record_outcome(campaign.campaign_id, *recipient_id, status)
            .await
            .unwrap();
    }

    let completed = ctx.store.complete(campaign.campaign_id).await.unwrap();
    assert_eq!(completed.status, CampaignStatus::Done);
}

#[tokio::test]
async fn test_pg_complete_preconditions() {
    skip_if_no_db!();
    let Some(ctx) = TestContext::new().await else {
        return;
    };

    let campaign = ctx
        .store
        .add("empty", "content", Utc::now() - Duration::minutes(1))
        .await
        .unwrap();

    // Not running yet
    let err = ctx.store.complete(campaign.campaign_id).await.unwrap_err();
    assert!(matches!(
        err,
        CoreError::InvalidCampaignState {
            operation: "complete",
            ..
        }
    ));

    // Running but no notifications
    ctx.store.acquire().await.unwrap();
    let err = ctx.store.complete(campaign.campaign_id).await.unwrap_err();
    assert!(matches!(err, CoreError::NoNotifications { .. }));
    assert_eq!(
        ctx.campaign_status(campaign.campaign_id).await.as_deref(),
        Some("running")
    );
}

#[tokio::test]
async fn test_pg_complete_next_sweep() {
    skip_if_no_db!();
    let Some(ctx) = TestContext::new().await else {
        return;
    };

    assert!(ctx.store.complete_next().await.unwrap().is_none());

    let recipient_ids = seed_recipients(&ctx, 2).await;
    ctx.store
        .add("sweepable", "content", Utc::now() - Duration::minutes(1))
        .await
        .unwrap();
    let campaign = ctx.store.acquire().await.unwrap();
    ctx.store
        .add_many(campaign.campaign_id, &recipient_ids)
        .await
        .unwrap();

    // One outcome still pending: not sweepable yet
    ctx.store
        .record_outcome(
            campaign.campaign_id,
            recipient_ids[0],
            NotificationStatus::Delivered,
        )
        .await
        .unwrap();
    assert!(ctx.store.complete_next().await.unwrap().is_none());

    ctx.store
        .record_outcome(
            campaign.campaign_id,
            recipient_ids[1],
            NotificationStatus::Delivered,
        )
        .await
        .unwrap();

    let swept = ctx.store.complete_next().await.unwrap().unwrap();
    assert_eq!(swept.campaign_id, campaign.campaign_id);
    assert_eq!(swept.status, CampaignStatus::Done);

    assert!(ctx.store.complete_next().await.unwrap().is_none());
}

#[tokio::test]
async fn test_pg_terminal_status_is_immutable() {
    skip_if_no_db!();
    let Some(ctx) = TestContext::new().await else {
        return;
    };

    let recipient_ids = seed_recipients(&ctx, 1).await;
    ctx.store
        .add("finished", "content", Utc::now() - Duration::minutes(1))
        .await
        .unwrap();
    let campaign = ctx.store.acquire().await.unwrap();
    ctx.store
        .add_many(campaign.campaign_id, &recipient_ids)
        .await
        .unwrap();
    ctx.store
        .record_outcome(
            campaign.campaign_id,
            recipient_ids[0],
            NotificationStatus::Delivered,
        )
        .await
        .unwrap();
    let completed = ctx.store.complete(campaign.campaign_id).await.unwrap();
    assert_eq!(completed.status, CampaignStatus::Done);

    assert!(ctx.store.run(campaign.campaign_id).await.is_err());
    assert!(
        ctx.store
            .update(campaign.campaign_id, "renamed", "c", Utc::now())
            .await
            .is_err()
    );
    assert!(ctx.store.complete(campaign.campaign_id).await.is_err());
    assert!(matches!(
        ctx.store.acquire().await.unwrap_err(),
        CoreError::NoCampaignsDue
    ));
    assert_eq!(
        ctx.campaign_status(campaign.campaign_id).await.as_deref(),
        Some("done")
    );
}

#[tokio::test]
async fn test_pg_cascade_delete() {
    skip_if_no_db!();
    let Some(ctx) = TestContext::new().await else {
        return;
    };

    let recipient_ids = seed_recipients(&ctx, 3).await;
    ctx.store
        .add("doomed", "content", Utc::now() - Duration::minutes(1))
        .await
        .unwrap();
    let campaign = ctx.store.acquire().await.unwrap();
    ctx.store
        .add_many(campaign.campaign_id, &recipient_ids)
        .await
        .unwrap();
    assert_eq!(ctx.notification_count(campaign.campaign_id).await, 3);

    ctx.store.delete(campaign.campaign_id).await.unwrap();
    assert_eq!(ctx.notification_count(campaign.campaign_id).await, 0);
    assert!(ctx.store.get(campaign.campaign_id).await.is_err());
}
