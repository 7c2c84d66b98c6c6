// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for herald-core PostgreSQL tests.
//!
//! Provides TestContext for connecting to the test database and starting
//! each test from a clean slate. Acquire and sweep operate on "any eligible
//! row", so tests sharing one database must not run interleaved; the context
//! holds a process-wide lock for its lifetime.

#![allow(dead_code)]

use sqlx::PgPool;
use tokio::sync::{Mutex, MutexGuard};

use herald_core::store::PostgresStore;

static DB_LOCK: Mutex<()> = Mutex::const_new(());

/// Test context that manages the database connection for Postgres tests.
pub struct TestContext {
    pub pool: PgPool,
    pub store: PostgresStore,
    _guard: MutexGuard<'static, ()>,
}

impl TestContext {
    /// Create a new test context.
    ///
    /// This sets up:
    /// 1. Database connection from TEST_DATABASE_URL
    /// 2. Schema via the embedded migrations
    /// 3. An empty campaigns/recipients/notifications state
    pub async fn new() -> Option<Self> {
        // 1. Get database URL from environment
        let database_url = std::env::var("TEST_DATABASE_URL").ok()?;

        // 2. Serialize tests against the shared database
        let guard = DB_LOCK.lock().await;

        // 3. Connect and ensure schema exists
        let pool = PgPool::connect(&database_url).await.ok()?;
        herald_core::migrations::run_postgres(&pool).await.ok()?;

        // 4. Clean slate, respecting foreign keys
        sqlx::query("DELETE FROM notifications")
            .execute(&pool)
            .await
            .ok();
        sqlx::query("DELETE FROM campaigns").execute(&pool).await.ok();
        sqlx::query("DELETE FROM recipients").execute(&pool).await.ok();

        let store = PostgresStore::new(pool.clone());

        Some(Self {
            pool,
            store,
            _guard: guard,
        })
    }

    /// Get campaign status straight from the database.
    pub async fn campaign_status(&self, campaign_id: i64) -> Option<String> {
        let row: Option<(String,)> =
            sqlx::query_as(r#"SELECT status::text FROM campaigns WHERE campaign_id = $1"#)
                .bind(campaign_id)
                .fetch_optional(&self.pool)
                .await
                .ok()?;
        row.map(|r| r.0)
    }

    /// Count notification rows for a campaign.
    pub async fn notification_count(&self, campaign_id: i64) -> i64 {
        let row: (i64,) =
            sqlx::query_as(r#"SELECT COUNT(*) FROM notifications WHERE campaign_id = $1"#)
                .bind(campaign_id)
                .fetch_one(&self.pool)
                .await
                .unwrap_or((0,));
        row.0
    }
}

/// Helper macro to skip tests if TEST_DATABASE_URL is not set.
#[macro_export]
macro_rules! skip_if_no_db {
    () => {
        if std::env::var("TEST_DATABASE_URL").is_err() {
            eprintln!("Skipping test: TEST_DATABASE_URL not set");
            return;
        }
    };
}
