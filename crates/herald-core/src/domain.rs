// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Domain entities and state machine rules for campaign dispatch.
//!
//! These are the types the store boundary exposes to callers. The persisted
//! row shapes live in [`crate::store`] and are mapped into these entities at
//! the boundary; storage representation never leaks outward.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Lifecycle status of a campaign.
///
/// Transitions move strictly forward:
///
/// ```text
/// created ──▶ running ──▶ done
///                   └───▶ failed
/// ```
///
/// `done` and `failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    /// Scheduled but not yet launched.
    Created,
    /// Acquired by a dispatcher; notifications are being delivered.
    Running,
    /// Concluded with a delivered fraction at or below the threshold.
    Failed,
    /// Concluded with a delivered fraction above the threshold.
    Done,
}

impl CampaignStatus {
    /// Storage/wire form of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Failed => "failed",
            Self::Done => "done",
        }
    }

    /// Parse the storage form. Returns `None` for unknown values.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(Self::Created),
            "running" => Some(Self::Running),
            "failed" => Some(Self::Failed),
            "done" => Some(Self::Done),
            _ => None,
        }
    }

    /// Whether this status permits no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl std::fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery status of a single notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    /// Materialized but not yet handed to the delivery channel.
    Pending,
    /// Handed to the delivery channel, final outcome unknown.
    Sent,
    /// Confirmed delivered to the recipient.
    Delivered,
    /// Confirmed not delivered.
    Undelivered,
}

impl NotificationStatus {
    /// Storage/wire form of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Undelivered => "undelivered",
        }
    }

    /// Parse the storage form. Returns `None` for unknown values.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "sent" => Some(Self::Sent),
            "delivered" => Some(Self::Delivered),
            "undelivered" => Some(Self::Undelivered),
            _ => None,
        }
    }
}

impl std::fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A scheduled notification campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    /// Surrogate identifier.
    pub campaign_id: i64,
    /// Globally unique campaign name.
    pub name: String,
    /// Notification payload content. Opaque to the core.
    pub content: String,
    /// Current lifecycle status.
    pub status: CampaignStatus,
    /// Instant after which the campaign becomes eligible for acquisition.
    pub launch_date: DateTime<Utc>,
    /// When the campaign row was created.
    pub created_at: DateTime<Utc>,
    /// When the campaign row was last modified.
    pub updated_at: DateTime<Utc>,
}

/// A member of the recipient list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipient {
    /// Surrogate identifier.
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

/// One delivery attempt record for a (campaign, recipient) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    /// Surrogate identifier.
    pub notification_id: i64,
    /// Current delivery status.
    pub status: NotificationStatus,
    /// Owning campaign.
    pub campaign_id: i64,
    /// Target recipient.
    pub recipient_id: i64,
}

/// Aggregated notification counts for one campaign, grouped by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    /// Notifications not yet handed off.
    pub pending: i64,
    /// Notifications handed off without a final outcome.
    pub sent: i64,
    /// Notifications confirmed delivered.
    pub delivered: i64,
    /// Notifications confirmed undelivered.
    pub undelivered: i64,
}

impl DeliveryStats {
    /// Total number of notifications in the campaign.
    pub fn total(&self) -> i64 {
        self.pending + self.sent + self.delivered + self.undelivered
    }

    /// Fraction of notifications confirmed delivered. Zero when the
    /// campaign has no notifications; callers must treat that case
    /// separately (an empty campaign is never completable).
    pub fn delivered_fraction(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        self.delivered as f64 / total as f64
    }

    /// Whether every notification has a final outcome (no `pending` left).
    pub fn is_settled(&self) -> bool {
        self.pending == 0
    }

    /// The terminal status the completion rule assigns: `done` when the
    /// delivered fraction is strictly greater than 80%, `failed` otherwise.
    /// Exactly 80% does not qualify.
    pub fn outcome(&self) -> CampaignStatus {
        // Integer cross-multiplication: delivered/total > 4/5.
        if self.delivered * 5 > self.total() * 4 {
            CampaignStatus::Done
        } else {
            CampaignStatus::Failed
        }
    }
}

/// Reject a launch date that is not strictly in the future.
///
/// The stores do not re-validate temporal ordering; the boundary accepting
/// campaign input calls this before `add`/`update`.
pub fn ensure_future_launch(launch_date: DateTime<Utc>, now: DateTime<Utc>) -> Result<(), CoreError> {
    if launch_date <= now {
        return Err(CoreError::Validation {
            field: "launch_date".to_string(),
            message: format!("launch date {launch_date} is not in the future"),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_campaign_status_roundtrip() {
        for status in [
            CampaignStatus::Created,
            CampaignStatus::Running,
            CampaignStatus::Failed,
            CampaignStatus::Done,
        ] {
            assert_eq!(CampaignStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(CampaignStatus::parse("stopped"), None);
        assert_eq!(CampaignStatus::parse(""), None);
    }

    #[test]
    fn test_notification_status_roundtrip() {
        for status in [
            NotificationStatus::Pending,
            NotificationStatus::Sent,
            NotificationStatus::Delivered,
            NotificationStatus::Undelivered,
        ] {
            assert_eq!(NotificationStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(NotificationStatus::parse("bounced"), None);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!CampaignStatus::Created.is_terminal());
        assert!(!CampaignStatus::Running.is_terminal());
        assert!(CampaignStatus::Failed.is_terminal());
        assert!(CampaignStatus::Done.is_terminal());
    }

    #[test]
    fn test_outcome_above_threshold_is_done() {
        // 10 delivered + 2 undelivered = 83.3%
        let stats = DeliveryStats {
            delivered: 10,
            undelivered: 2,
            ..Default::default()
        };
        assert_eq!(stats.outcome(), CampaignStatus::Done);
    }

    #[test]
    fn test_outcome_exactly_eighty_percent_is_failed() {
        // 8 of 10 = 80.0% exactly; strictly-greater-than does not qualify
        let stats = DeliveryStats {
            delivered: 8,
            undelivered: 2,
            ..Default::default()
        };
        assert_eq!(stats.outcome(), CampaignStatus::Failed);

        // 4 of 5 is the same boundary
        let stats = DeliveryStats {
            delivered: 4,
            undelivered: 1,
            ..Default::default()
        };
        assert_eq!(stats.outcome(), CampaignStatus::Failed);
    }

    #[test]
    fn test_outcome_below_threshold_is_failed() {
        // 5 delivered + 5 undelivered = 50%
        let stats = DeliveryStats {
            delivered: 5,
            undelivered: 5,
            ..Default::default()
        };
        assert_eq!(stats.outcome(), CampaignStatus::Failed);

        // 3 of 4 = 75%, the scenario from the dispatch runbook
        let stats = DeliveryStats {
            delivered: 3,
            undelivered: 1,
            ..Default::default()
        };
        assert_eq!(stats.outcome(), CampaignStatus::Failed);
    }

    #[test]
    fn test_outcome_counts_pending_and_sent_in_total() {
        // 9 delivered of 11 total (one pending, one sent) = 81.8% -> done
        let stats = DeliveryStats {
            pending: 1,
            sent: 1,
            delivered: 9,
            undelivered: 0,
        };
        assert_eq!(stats.outcome(), CampaignStatus::Done);
        assert!(!stats.is_settled());
    }

    #[test]
    fn test_delivered_fraction_empty_is_zero() {
        let stats = DeliveryStats::default();
        assert_eq!(stats.total(), 0);
        assert_eq!(stats.delivered_fraction(), 0.0);
        assert!(stats.is_settled());
    }

    #[test]
    fn test_ensure_future_launch() {
        let now = Utc::now();
        assert!(ensure_future_launch(now + Duration::minutes(1), now).is_ok());

        let err = ensure_future_launch(now, now).unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");

        let err = ensure_future_launch(now - Duration::minutes(1), now).unwrap_err();
        assert!(err.to_string().contains("launch date"));
    }
}
