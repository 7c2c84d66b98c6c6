// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL-backed store implementation.
//!
//! Acquisition and completion take a row-level lock on the campaign
//! (`SELECT ... FOR UPDATE SKIP LOCKED`) so that concurrent workers racing
//! for the same campaign resolve to exactly one winner without blocking
//! each other.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::debug;

use crate::domain::{Campaign, CampaignStatus, DeliveryStats, Notification, NotificationStatus, Recipient};
use crate::error::CoreError;

use super::{
    CampaignRecord, CampaignStore, NotificationLedger, NotificationRecord, RecipientDirectory,
    RecipientRecord, is_foreign_key_violation, is_unique_violation, stats_from_rows,
};

/// PostgreSQL-backed store implementation.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new Postgres-backed store from an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Aggregate notification counts within the given transaction, so the
    /// read is consistent with the campaign row lock held by the caller.
    async fn delivery_stats_in_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        campaign_id: i64,
    ) -> Result<DeliveryStats, CoreError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT status::text, COUNT(*)
            FROM notifications
            WHERE campaign_id = $1
            GROUP BY status
            "#,
        )
        .bind(campaign_id)
        .fetch_all(&mut **tx)
        .await?;

        Ok(stats_from_rows(rows))
    }

    /// Conclude a locked `running` campaign from its delivery stats.
    async fn conclude_in_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        campaign_id: i64,
        stats: DeliveryStats,
    ) -> Result<CampaignRecord, CoreError> {
        let outcome = stats.outcome();
        let record = sqlx::query_as::<_, CampaignRecord>(
            r#"
            UPDATE campaigns
            SET status = $2::campaign_status, updated_at = NOW()
            WHERE campaign_id = $1
            RETURNING campaign_id, name, content, status::text AS status,
                      launch_date, created_at, updated_at
            "#,
        )
        .bind(campaign_id)
        .bind(outcome.as_str())
        .fetch_one(&mut **tx)
        .await?;

        Ok(record)
    }
}

#[async_trait]
impl CampaignStore for PostgresStore {
    async fn add(
        &self,
        name: &str,
        content: &str,
        launch_date: DateTime<Utc>,
    ) -> Result<Campaign, CoreError> {
        let record = sqlx::query_as::<_, CampaignRecord>(
            r#"
            INSERT INTO campaigns (name, content, status, launch_date)
            VALUES ($1, $2, 'created', $3)
            RETURNING campaign_id, name, content, status::text AS status,
                      launch_date, created_at, updated_at
            "#,
        )
        .bind(name)
        .bind(content)
        .bind(launch_date)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                CoreError::NameTaken {
                    name: name.to_string(),
                }
            } else {
                e.into()
            }
        })?;

        record.try_into()
    }

    async fn get(&self, campaign_id: i64) -> Result<Campaign, CoreError> {
        let record = sqlx::query_as::<_, CampaignRecord>(
            r#"
            SELECT campaign_id, name, content, status::text AS status,
                   launch_date, created_at, updated_at
            FROM campaigns
            WHERE campaign_id = $1
            "#,
        )
        .bind(campaign_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(CoreError::CampaignNotFound { campaign_id })?;

        record.try_into()
    }

    async fn list(&self) -> Result<Vec<Campaign>, CoreError> {
        let records = sqlx::query_as::<_, CampaignRecord>(
            r#"
            SELECT campaign_id, name, content, status::text AS status,
                   launch_date, created_at, updated_at
            FROM campaigns
            ORDER BY campaign_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        records.into_iter().map(Campaign::try_from).collect()
    }

    async fn update(
        &self,
        campaign_id: i64,
        name: &str,
        content: &str,
        launch_date: DateTime<Utc>,
    ) -> Result<Campaign, CoreError> {
        let mut tx = self.pool.begin().await?;

        let current = sqlx::query_as::<_, CampaignRecord>(
            r#"
            SELECT campaign_id, name, content, status::text AS status,
                   launch_date, created_at, updated_at
            FROM campaigns
            WHERE campaign_id = $1
            FOR UPDATE
            "#,
        )
        .bind(campaign_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(CoreError::CampaignNotFound { campaign_id })?;

        let current: Campaign = current.try_into()?;
        if current.status != CampaignStatus::Created {
            return Err(CoreError::InvalidCampaignState {
                campaign_id,
                status: current.status,
                operation: "update",
            });
        }

        let record = sqlx::query_as::<_, CampaignRecord>(
            r#"
            UPDATE campaigns
            SET name = $2, content = $3, launch_date = $4, updated_at = NOW()
            WHERE campaign_id = $1
            RETURNING campaign_id, name, content, status::text AS status,
                      launch_date, created_at, updated_at
            "#,
        )
        .bind(campaign_id)
        .bind(name)
        .bind(content)
        .bind(launch_date)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                CoreError::NameTaken {
                    name: name.to_string(),
                }
            } else {
                CoreError::from(e)
            }
        })?;

        tx.commit().await?;
        record.try_into()
    }

    async fn delete(&self, campaign_id: i64) -> Result<(), CoreError> {
        let result = sqlx::query("DELETE FROM campaigns WHERE campaign_id = $1")
            .bind(campaign_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::CampaignNotFound { campaign_id });
        }

        Ok(())
    }

    async fn run(&self, campaign_id: i64) -> Result<Campaign, CoreError> {
        let mut tx = self.pool.begin().await?;

        let current = sqlx::query_as::<_, CampaignRecord>(
            r#"
            SELECT campaign_id, name, content, status::text AS status,
                   launch_date, created_at, updated_at
            FROM campaigns
            WHERE campaign_id = $1
            FOR UPDATE
            "#,
        )
        .bind(campaign_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(CoreError::CampaignNotFound { campaign_id })?;

        let current: Campaign = current.try_into()?;
        if current.status != CampaignStatus::Created {
            return Err(CoreError::InvalidCampaignState {
                campaign_id,
                status: current.status,
                operation: "run",
            });
        }

        let record = sqlx::query_as::<_, CampaignRecord>(
            r#"
            UPDATE campaigns
            SET status = 'running', launch_date = NOW(), updated_at = NOW()
            WHERE campaign_id = $1
            RETURNING campaign_id, name, content, status::text AS status,
                      launch_date, created_at, updated_at
            "#,
        )
        .bind(campaign_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        record.try_into()
    }

    async fn acquire(&self) -> Result<Campaign, CoreError> {
        let mut tx = self.pool.begin().await?;

        // SKIP LOCKED: a concurrent acquire holding the lock on this row
        // makes us move on to the next candidate instead of blocking.
        let candidate = sqlx::query_as::<_, CampaignRecord>(
            r#"
            SELECT campaign_id, name, content, status::text AS status,
                   launch_date, created_at, updated_at
            FROM campaigns
            WHERE status = 'created' AND launch_date <= NOW()
            ORDER BY launch_date
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(CoreError::NoCampaignsDue)?;

        let record = sqlx::query_as::<_, CampaignRecord>(
            r#"
            UPDATE campaigns
            SET status = 'running', updated_at = NOW()
            WHERE campaign_id = $1
            RETURNING campaign_id, name, content, status::text AS status,
                      launch_date, created_at, updated_at
            "#,
        )
        .bind(candidate.campaign_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(campaign_id = record.campaign_id, "Campaign acquired");
        record.try_into()
    }

    async fn complete(&self, campaign_id: i64) -> Result<Campaign, CoreError> {
        let mut tx = self.pool.begin().await?;

        let current = sqlx::query_as::<_, CampaignRecord>(
            r#"
            SELECT campaign_id, name, content, status::text AS status,
                   launch_date, created_at, updated_at
            FROM campaigns
            WHERE campaign_id = $1
            FOR UPDATE
            "#,
        )
        .bind(campaign_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(CoreError::CampaignNotFound { campaign_id })?;

        let current: Campaign = current.try_into()?;
        if current.status != CampaignStatus::Running {
            return Err(CoreError::InvalidCampaignState {
                campaign_id,
                status: current.status,
                operation: "complete",
            });
        }

        let stats = Self::delivery_stats_in_tx(&mut tx, campaign_id).await?;
        if stats.total() == 0 {
            return Err(CoreError::NoNotifications { campaign_id });
        }

        let record = Self::conclude_in_tx(&mut tx, campaign_id, stats).await?;
        tx.commit().await?;
        debug!(campaign_id, status = %record.status, "Campaign concluded");
        record.try_into()
    }

    async fn complete_next(&self) -> Result<Option<Campaign>, CoreError> {
        let mut tx = self.pool.begin().await?;

        let candidate = sqlx::query_as::<_, CampaignRecord>(
            r#"
            SELECT c.campaign_id, c.name, c.content, c.status::text AS status,
                   c.launch_date, c.created_at, c.updated_at
            FROM campaigns c
            WHERE c.status = 'running'
              AND EXISTS (
                  SELECT 1 FROM notifications n
                  WHERE n.campaign_id = c.campaign_id
              )
              AND NOT EXISTS (
                  SELECT 1 FROM notifications n
                  WHERE n.campaign_id = c.campaign_id AND n.status = 'pending'
              )
            LIMIT 1
            FOR UPDATE OF c SKIP LOCKED
            "#,
        )
        .fetch_optional(&mut *tx)
        .await?;

        let Some(candidate) = candidate else {
            return Ok(None);
        };

        let stats = Self::delivery_stats_in_tx(&mut tx, candidate.campaign_id).await?;
        let record = Self::conclude_in_tx(&mut tx, candidate.campaign_id, stats).await?;
        tx.commit().await?;
        debug!(campaign_id = record.campaign_id, status = %record.status, "Campaign concluded");

        Ok(Some(record.try_into()?))
    }
}

#[async_trait]
impl NotificationLedger for PostgresStore {
    async fn add_many(
        &self,
        campaign_id: i64,
        recipient_ids: &[i64],
    ) -> Result<Vec<Notification>, CoreError> {
        if recipient_ids.is_empty() {
            return Ok(Vec::new());
        }

        let records = sqlx::query_as::<_, NotificationRecord>(
            r#"
            INSERT INTO notifications (status, campaign_id, recipient_id)
            SELECT 'pending', $1::BIGINT, r FROM UNNEST($2::BIGINT[]) AS r
            RETURNING notification_id, status::text AS status, campaign_id, recipient_id
            "#,
        )
        .bind(campaign_id)
        .bind(recipient_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| translate_notification_insert_error(e, campaign_id))?;

        records.into_iter().map(Notification::try_from).collect()
    }

    async fn record_outcome(
        &self,
        campaign_id: i64,
        recipient_id: i64,
        status: NotificationStatus,
    ) -> Result<Notification, CoreError> {
        let record = sqlx::query_as::<_, NotificationRecord>(
            r#"
            UPDATE notifications
            SET status = $3::notification_status
            WHERE campaign_id = $1 AND recipient_id = $2
            RETURNING notification_id, status::text AS status, campaign_id, recipient_id
            "#,
        )
        .bind(campaign_id)
        .bind(recipient_id)
        .bind(status.as_str())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(CoreError::NotificationNotFound {
            campaign_id,
            recipient_id,
        })?;

        record.try_into()
    }

    async fn list_by_campaign(&self, campaign_id: i64) -> Result<Vec<Notification>, CoreError> {
        let records = sqlx::query_as::<_, NotificationRecord>(
            r#"
            SELECT notification_id, status::text AS status, campaign_id, recipient_id
            FROM notifications
            WHERE campaign_id = $1
            "#,
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await?;

        records.into_iter().map(Notification::try_from).collect()
    }

    async fn delivery_stats(&self, campaign_id: i64) -> Result<DeliveryStats, CoreError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT status::text, COUNT(*)
            FROM notifications
            WHERE campaign_id = $1
            GROUP BY status
            "#,
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(stats_from_rows(rows))
    }
}

/// Map constraint violations from the bulk notification insert to domain
/// errors: the unique pair constraint means the campaign was already
/// materialized; a foreign key names the missing side.
fn translate_notification_insert_error(err: sqlx::Error, campaign_id: i64) -> CoreError {
    if is_unique_violation(&err) {
        return CoreError::DuplicateNotification { campaign_id };
    }
    if is_foreign_key_violation(&err) {
        if let sqlx::Error::Database(db) = &err
            && db.constraint().is_some_and(|c| c.contains("recipient"))
        {
            // The offending recipient id is not reported by the driver.
            return CoreError::RecipientNotFound { recipient_id: 0 };
        }
        return CoreError::CampaignNotFound { campaign_id };
    }
    err.into()
}

#[async_trait]
impl RecipientDirectory for PostgresStore {
    async fn register(
        &self,
        name: &str,
        lastname: &str,
        age: i32,
        contact_email: &str,
    ) -> Result<Recipient, CoreError> {
        let record = sqlx::query_as::<_, RecipientRecord>(
            r#"
            INSERT INTO recipients (name, lastname, age, contact_email)
            VALUES ($1, $2, $3, $4)
            RETURNING recipient_id, name, lastname, age, contact_email
            "#,
        )
        .bind(name)
        .bind(lastname)
        .bind(age)
        .bind(contact_email)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                CoreError::EmailTaken {
                    contact_email: contact_email.to_string(),
                }
            } else {
                e.into()
            }
        })?;

        Ok(record.into())
    }

    async fn lookup(&self, recipient_id: i64) -> Result<Recipient, CoreError> {
        let record = sqlx::query_as::<_, RecipientRecord>(
            r#"
            SELECT recipient_id, name, lastname, age, contact_email
            FROM recipients
            WHERE recipient_id = $1
            "#,
        )
        .bind(recipient_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(CoreError::RecipientNotFound { recipient_id })?;

        Ok(record.into())
    }

    async fn fetch_all(&self) -> Result<Vec<Recipient>, CoreError> {
        let records = sqlx::query_as::<_, RecipientRecord>(
            r#"
            SELECT recipient_id, name, lastname, age, contact_email
            FROM recipients
            ORDER BY recipient_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(records.into_iter().map(Recipient::from).collect())
    }

    async fn update_details(
        &self,
        recipient_id: i64,
        name: &str,
        lastname: &str,
        age: i32,
        contact_email: &str,
    ) -> Result<Recipient, CoreError> {
        let record = sqlx::query_as::<_, RecipientRecord>(
            r#"
            UPDATE recipients
            SET name = $2, lastname = $3, age = $4, contact_email = $5
            WHERE recipient_id = $1
            RETURNING recipient_id, name, lastname, age, contact_email
            "#,
        )
        .bind(recipient_id)
        .bind(name)
        .bind(lastname)
        .bind(age)
        .bind(contact_email)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                CoreError::EmailTaken {
                    contact_email: contact_email.to_string(),
                }
            } else {
                CoreError::from(e)
            }
        })?
        .ok_or(CoreError::RecipientNotFound { recipient_id })?;

        Ok(record.into())
    }

    async fn remove(&self, recipient_id: i64) -> Result<(), CoreError> {
        let result = sqlx::query("DELETE FROM recipients WHERE recipient_id = $1")
            .bind(recipient_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::RecipientNotFound { recipient_id });
        }

        Ok(())
    }
}
