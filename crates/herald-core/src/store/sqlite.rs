//! SQLite-backed store implementation.
//!
//! SQLite has no `SELECT ... FOR UPDATE`, so the acquisition primitive is a
//! single conditional `UPDATE ... RETURNING` compare-and-swap: the status
//! guard in the WHERE clause makes a lost race an empty result instead of a
//! double acquisition. Timestamps that participate in comparisons are always
//! bound from the caller so the stored text format stays uniform.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use tracing::debug;

use crate::domain::{
    Campaign, CampaignStatus, DeliveryStats, Notification, NotificationStatus, Recipient,
};
use crate::error::CoreError;

use super::{
    CampaignRecord, CampaignStore, NotificationLedger, NotificationRecord, RecipientDirectory,
    RecipientRecord, is_foreign_key_violation, is_unique_violation, stats_from_rows,
};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

/// SQLite-backed store implementation.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a new SQLite store from an existing pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create and initialize a new SQLite store from a file path.
    ///
    /// This convenience constructor handles all setup:
    /// - Creates parent directories if they don't exist
    /// - Creates the database file if it doesn't exist
    /// - Connects to the database with sensible defaults
    /// - Runs all migrations
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file (e.g., ".data/herald.db")
    ///
    /// # Example
    ///
    /// ```ignore
    /// let store = SqliteStore::from_path(".data/herald.db").await?;
    /// ```
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();

        // Create parent directories if needed
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| CoreError::Database {
                operation: "create_dir".to_string(),
                details: format!("Failed to create directory {:?}: {}", parent, e),
            })?;
        }

        // Build connection URL
        let path_str = path.to_string_lossy();
        let url = format!("sqlite:{}?mode=rwc", path_str);

        // Create pool with reasonable defaults
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .map_err(|e| CoreError::Database {
                operation: "connect".to_string(),
                details: format!("Failed to connect to SQLite at {:?}: {}", path, e),
            })?;

        // Run migrations
        MIGRATOR.run(&pool).await.map_err(|e| CoreError::Database {
            operation: "migrate".to_string(),
            details: format!("Failed to run migrations: {}", e),
        })?;

        Ok(Self { pool })
    }

    async fn delivery_stats_in_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        campaign_id: i64,
    ) -> Result<DeliveryStats, CoreError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT status, COUNT(*)
            FROM notifications
            WHERE campaign_id = ?
            GROUP BY status
            "#,
        )
        .bind(campaign_id)
        .fetch_all(&mut **tx)
        .await?;

        Ok(stats_from_rows(rows))
    }

    /// Conclude a `running` campaign from its delivery stats. The status
    /// guard catches a concurrent writer that got there first.
    async fn conclude_in_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        campaign_id: i64,
        stats: DeliveryStats,
    ) -> Result<CampaignRecord, CoreError> {
        let outcome = stats.outcome();
        let record = sqlx::query_as::<_, CampaignRecord>(
            r#"
            UPDATE campaigns
            SET status = ?2, updated_at = ?3
            WHERE campaign_id = ?1 AND status = 'running'
            RETURNING campaign_id, name, content, status,
                      launch_date, created_at, updated_at
            "#,
        )
        .bind(campaign_id)
        .bind(outcome.as_str())
        .bind(Utc::now())
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(CoreError::InvalidCampaignState {
            campaign_id,
            status: CampaignStatus::Running,
            operation: "complete",
        })?;

        Ok(record)
    }
}

#[async_trait]
impl CampaignStore for SqliteStore {
    async fn add(
        &self,
        name: &str,
        content: &str,
        launch_date: DateTime<Utc>,
    ) -> Result<Campaign, CoreError> {
        let now = Utc::now();
        let record = sqlx::query_as::<_, CampaignRecord>(
            r#"
            INSERT INTO campaigns (name, content, status, launch_date, created_at, updated_at)
            VALUES (?1, ?2, 'created', ?3, ?4, ?4)
            RETURNING campaign_id, name, content, status,
                      launch_date, created_at, updated_at
            "#,
        )
        .bind(name)
        .bind(content)
        .bind(launch_date)
        .bind(now)
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
            SELECT campaign_id, name, content, status,
                   launch_date, created_at, updated_at
            FROM campaigns
            WHERE campaign_id = ?
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
            SELECT campaign_id, name, content, status,
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
            SELECT campaign_id, name, content, status,
                   launch_date, created_at, updated_at
            FROM campaigns
            WHERE campaign_id = ?
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
            SET name = ?2, content = ?3, launch_date = ?4, updated_at = ?5
            WHERE campaign_id = ?1
            RETURNING campaign_id, name, content, status,
                      launch_date, created_at, updated_at
            "#,
        )
        .bind(campaign_id)
        .bind(name)
        .bind(content)
        .bind(launch_date)
        .bind(Utc::now())
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
        let result = sqlx::query("DELETE FROM campaigns WHERE campaign_id = ?")
            .bind(campaign_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::CampaignNotFound { campaign_id });
        }

        Ok(())
    }

    async fn run(&self, campaign_id: i64) -> Result<Campaign, CoreError> {
        let now = Utc::now();
        let record = sqlx::query_as::<_, CampaignRecord>(
            r#"
            UPDATE campaigns
            SET status = 'running', launch_date = ?2, updated_at = ?2
            WHERE campaign_id = ?1 AND status = 'created'
            RETURNING campaign_id, name, content, status,
                      launch_date, created_at, updated_at
            "#,
        )
        .bind(campaign_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        match record {
            Some(record) => record.try_into(),
            // Zero rows: distinguish a missing campaign from a wrong status.
            None => {
                let current = self.get(campaign_id).await?;
                Err(CoreError::InvalidCampaignState {
                    campaign_id,
                    status: current.status,
                    operation: "run",
                })
            }
        }
    }

    async fn acquire(&self) -> Result<Campaign, CoreError> {
        let now = Utc::now();
        // Single-statement compare-and-swap: SQLite serializes writers, and
        // the status guard turns a lost race into an empty result.
        let record = sqlx::query_as::<_, CampaignRecord>(
            r#"
            UPDATE campaigns
            SET status = 'running', updated_at = ?2
            WHERE campaign_id = (
                SELECT campaign_id FROM campaigns
                WHERE status = 'created' AND launch_date <= ?1
                ORDER BY launch_date
                LIMIT 1
            )
            AND status = 'created'
            RETURNING campaign_id, name, content, status,
                      launch_date, created_at, updated_at
            "#,
        )
        .bind(now)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(CoreError::NoCampaignsDue)?;

        debug!(campaign_id = record.campaign_id, "Campaign acquired");
        record.try_into()
    }

    async fn complete(&self, campaign_id: i64) -> Result<Campaign, CoreError> {
        let mut tx = self.pool.begin().await?;

        let current = sqlx::query_as::<_, CampaignRecord>(
            r#"
            SELECT campaign_id, name, content, status,
                   launch_date, created_at, updated_at
            FROM campaigns
            WHERE campaign_id = ?
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
            SELECT c.campaign_id, c.name, c.content, c.status,
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
impl NotificationLedger for SqliteStore {
    async fn add_many(
        &self,
        campaign_id: i64,
        recipient_ids: &[i64],
    ) -> Result<Vec<Notification>, CoreError> {
        if recipient_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut tx = self.pool.begin().await?;
        let mut notifications = Vec::with_capacity(recipient_ids.len());

        for recipient_id in recipient_ids {
            let record = sqlx::query_as::<_, NotificationRecord>(
                r#"
                INSERT INTO notifications (status, campaign_id, recipient_id)
                VALUES ('pending', ?1, ?2)
                RETURNING notification_id, status, campaign_id, recipient_id
                "#,
            )
            .bind(campaign_id)
            .bind(recipient_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    CoreError::DuplicateNotification { campaign_id }
                } else if is_foreign_key_violation(&e) {
                    // SQLite does not report which key failed; the campaign
                    // is the side callers get wrong in practice.
                    CoreError::CampaignNotFound { campaign_id }
                } else {
                    CoreError::from(e)
                }
            })?;
            notifications.push(Notification::try_from(record)?);
        }

        tx.commit().await?;
        Ok(notifications)
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
            SET status = ?3
            WHERE campaign_id = ?1 AND recipient_id = ?2
            RETURNING notification_id, status, campaign_id, recipient_id
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
            SELECT notification_id, status, campaign_id, recipient_id
            FROM notifications
            WHERE campaign_id = ?
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
            SELECT status, COUNT(*)
            FROM notifications
            WHERE campaign_id = ?
            GROUP BY status
            "#,
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(stats_from_rows(rows))
    }
}

#[async_trait]
impl RecipientDirectory for SqliteStore {
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
            VALUES (?1, ?2, ?3, ?4)
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
            WHERE recipient_id = ?
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
            SET name = ?2, lastname = ?3, age = ?4, contact_email = ?5
            WHERE recipient_id = ?1
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
        let result = sqlx::query("DELETE FROM recipients WHERE recipient_id = ?")
            .bind(recipient_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::RecipientNotFound { recipient_id });
        }

        Ok(())
    }
}
