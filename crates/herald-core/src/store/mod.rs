//! Store interfaces and backends for herald-core.
//!
//! This module defines the persistence contracts for the campaign store,
//! the notification ledger, and the recipient directory, plus the backend
//! implementations. Row shapes
//! (`*Record`) are internal to the storage layer and are mapped into
//! [`crate::domain`] entities at the trait boundary.

pub mod postgres;
pub mod sqlite;

pub use self::postgres::PostgresStore;
pub use self::sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    Campaign, CampaignStatus, DeliveryStats, Notification, NotificationStatus, Recipient,
};
use crate::error::CoreError;

/// Campaign row from the persistence layer.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CampaignRecord {
    /// Database primary key.
    pub campaign_id: i64,
    /// Unique campaign name.
    pub name: String,
    /// Notification payload content.
    pub content: String,
    /// Current status (created, running, failed, done).
    pub status: String,
    /// When the campaign becomes eligible for acquisition.
    pub launch_date: DateTime<Utc>,
    /// When the row was created.
    pub created_at: DateTime<Utc>,
    /// When the row was last modified.
    pub updated_at: DateTime<Utc>,
}

/// Recipient row from the persistence layer.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RecipientRecord {
    /// Database primary key.
    pub recipient_id: i64,
    /// First name.
    pub name: String,
    /// Last name.
    pub lastname: String,
    /// Age in years.
    pub age: i32,
    /// Unique contact address.
    pub contact_email: String,
}

/// Notification row from the persistence layer.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct NotificationRecord {
    /// Database primary key.
    pub notification_id: i64,
    /// Current status (pending, sent, delivered, undelivered).
    pub status: String,
    /// Owning campaign.
    pub campaign_id: i64,
    /// Target recipient.
    pub recipient_id: i64,
}

impl TryFrom<CampaignRecord> for Campaign {
    type Error = CoreError;

    fn try_from(record: CampaignRecord) -> Result<Self, Self::Error> {
        let status = CampaignStatus::parse(&record.status).ok_or_else(|| CoreError::Database {
            operation: "decode".to_string(),
            details: format!(
                "unknown campaign status '{}' for campaign '{}'",
                record.status, record.campaign_id
            ),
        })?;
        Ok(Campaign {
            campaign_id: record.campaign_id,
            name: record.name,
            content: record.content,
            status,
            launch_date: record.launch_date,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }
}

impl From<RecipientRecord> for Recipient {
    fn from(record: RecipientRecord) -> Self {
        Recipient {
            recipient_id: record.recipient_id,
            name: record.name,
            lastname: record.lastname,
            age: record.age,
            contact_email: record.contact_email,
        }
    }
}

impl TryFrom<NotificationRecord> for Notification {
    type Error = CoreError;

    fn try_from(record: NotificationRecord) -> Result<Self, Self::Error> {
        let status =
            NotificationStatus::parse(&record.status).ok_or_else(|| CoreError::Database {
                operation: "decode".to_string(),
                details: format!(
                    "unknown notification status '{}' for notification '{}'",
                    record.status, record.notification_id
                ),
            })?;
        Ok(Notification {
            notification_id: record.notification_id,
            status,
            campaign_id: record.campaign_id,
            recipient_id: record.recipient_id,
        })
    }
}

/// Owner of campaign records and their status transitions.
///
/// All operations run as single transactions; a domain error rolls the
/// transaction back before propagating, so no partial transition is ever
/// left committed.
#[async_trait]
pub trait CampaignStore: Send + Sync {
    /// Create a campaign in `created` status.
    ///
    /// Fails with [`CoreError::NameTaken`] when the name already exists.
    /// Launch-date validation is the caller's responsibility
    /// ([`crate::domain::ensure_future_launch`]).
    async fn add(
        &self,
        name: &str,
        content: &str,
        launch_date: DateTime<Utc>,
    ) -> Result<Campaign, CoreError>;

    /// Fetch one campaign by id.
    async fn get(&self, campaign_id: i64) -> Result<Campaign, CoreError>;

    /// List all campaigns, any status.
    async fn list(&self) -> Result<Vec<Campaign>, CoreError>;

    /// Replace name, content, and launch date of a campaign.
    ///
    /// Permitted only while the campaign is still in `created` status;
    /// fails with [`CoreError::InvalidCampaignState`] otherwise. Bumps
    /// `updated_at`.
    async fn update(
        &self,
        campaign_id: i64,
        name: &str,
        content: &str,
        launch_date: DateTime<Utc>,
    ) -> Result<Campaign, CoreError>;

    /// Delete a campaign regardless of status. Cascade-deletes its
    /// notifications.
    async fn delete(&self, campaign_id: i64) -> Result<(), CoreError>;

    /// Administrative launch: flip a `created` campaign to `running` and
    /// stamp `launch_date = now()`. Terminal and already-running campaigns
    /// are rejected with [`CoreError::InvalidCampaignState`].
    async fn run(&self, campaign_id: i64) -> Result<Campaign, CoreError>;

    /// Acquire one eligible campaign (`created` and `launch_date <= now`),
    /// flipping it to `running` within a single atomic transaction.
    ///
    /// At most one caller ever receives a given campaign, even under
    /// concurrent acquires racing for the same row. When no campaign is
    /// eligible, fails with [`CoreError::NoCampaignsDue`], an expected
    /// polling outcome, not a fault.
    async fn acquire(&self) -> Result<Campaign, CoreError>;

    /// Evaluate completion for one `running` campaign.
    ///
    /// Requires at least one notification ([`CoreError::NoNotifications`])
    /// and `running` status ([`CoreError::InvalidCampaignState`]). Applies
    /// the delivered-fraction rule ([`DeliveryStats::outcome`]) and commits
    /// the terminal status. Irreversible.
    async fn complete(&self, campaign_id: i64) -> Result<Campaign, CoreError>;

    /// Sweep variant of [`complete`](Self::complete): find one `running`
    /// campaign whose notifications all have a final outcome (none
    /// `pending`, at least one row), conclude it, and return it. Returns
    /// `Ok(None)` when nothing is sweepable.
    async fn complete_next(&self) -> Result<Option<Campaign>, CoreError>;
}

/// Tracker of per-(campaign, recipient) delivery status.
#[async_trait]
pub trait NotificationLedger: Send + Sync {
    /// Materialize one `pending` notification per recipient, in one
    /// transaction.
    ///
    /// A second call for the same campaign violates the unique pair
    /// constraint and fails with [`CoreError::DuplicateNotification`];
    /// nothing partial is committed. An unknown campaign or recipient
    /// fails the foreign key and surfaces as the matching not-found error.
    async fn add_many(
        &self,
        campaign_id: i64,
        recipient_ids: &[i64],
    ) -> Result<Vec<Notification>, CoreError>;

    /// Record the delivery outcome for the unique (campaign, recipient)
    /// notification. Fails with [`CoreError::NotificationNotFound`] when
    /// the pair was never materialized.
    async fn record_outcome(
        &self,
        campaign_id: i64,
        recipient_id: i64,
        status: NotificationStatus,
    ) -> Result<Notification, CoreError>;

    /// All notifications for a campaign, any status, unspecified order.
    async fn list_by_campaign(&self, campaign_id: i64) -> Result<Vec<Notification>, CoreError>;

    /// Aggregate notification counts for a campaign, grouped by status.
    /// The empty case (`total() == 0`) is the caller's to handle.
    async fn delivery_stats(&self, campaign_id: i64) -> Result<DeliveryStats, CoreError>;
}

/// Provider of the recipient list. `fetch_all` is treated as a complete,
/// unpaginated snapshot per call.
#[async_trait]
pub trait RecipientDirectory: Send + Sync {
    /// Register a recipient. Fails with [`CoreError::EmailTaken`] when the
    /// contact address already exists.
    async fn register(
        &self,
        name: &str,
        lastname: &str,
        age: i32,
        contact_email: &str,
    ) -> Result<Recipient, CoreError>;

    /// Fetch one recipient by id.
    async fn lookup(&self, recipient_id: i64) -> Result<Recipient, CoreError>;

    /// The full recipient list.
    async fn fetch_all(&self) -> Result<Vec<Recipient>, CoreError>;

    /// Replace all mutable fields of a recipient.
    async fn update_details(
        &self,
        recipient_id: i64,
        name: &str,
        lastname: &str,
        age: i32,
        contact_email: &str,
    ) -> Result<Recipient, CoreError>;

    /// Remove a recipient. Cascade-deletes their notifications.
    async fn remove(&self, recipient_id: i64) -> Result<(), CoreError>;
}

/// Fold grouped (status, count) rows into [`DeliveryStats`].
pub(crate) fn stats_from_rows(rows: Vec<(String, i64)>) -> DeliveryStats {
    let mut stats = DeliveryStats::default();
    for (status, count) in rows {
        match status.as_str() {
            "pending" => stats.pending = count,
            "sent" => stats.sent = count,
            "delivered" => stats.delivered = count,
            "undelivered" => stats.undelivered = count,
            // Unreachable under the schema CHECK/enum constraints
            _ => {}
        }
    }
    stats
}

/// Whether a sqlx error is a unique-constraint violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// Whether a sqlx error is a foreign-key violation.
pub(crate) fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_foreign_key_violation())
}
