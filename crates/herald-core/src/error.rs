// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for herald-core.
//!
//! Provides a unified domain error with stable machine-readable codes.
//! Storage faults are wrapped, never surfaced raw, and every domain error
//! raised inside a store operation rolls the enclosing transaction back
//! before propagating.

use std::fmt;

use crate::domain::CampaignStatus;

/// Result type using CoreError
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core errors that can occur during store and ledger operations.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum CoreError {
    /// Campaign was not found in the database.
    CampaignNotFound {
        /// The campaign ID that was not found.
        campaign_id: i64,
    },

    /// Recipient was not found in the database.
    RecipientNotFound {
        /// The recipient ID that was not found.
        recipient_id: i64,
    },

    /// No notification exists for the (campaign, recipient) pair.
    NotificationNotFound {
        /// The campaign the outcome was reported for.
        campaign_id: i64,
        /// The recipient the outcome was reported for.
        recipient_id: i64,
    },

    /// Completion was requested for a campaign with no notifications.
    NoNotifications {
        /// The campaign ID.
        campaign_id: i64,
    },

    /// A campaign with this name already exists.
    NameTaken {
        /// The conflicting campaign name.
        name: String,
    },

    /// A recipient with this contact address already exists.
    EmailTaken {
        /// The conflicting contact address.
        contact_email: String,
    },

    /// Notifications for this campaign were already materialized for one
    /// or more of the requested recipients.
    DuplicateNotification {
        /// The campaign ID.
        campaign_id: i64,
    },

    /// The campaign is in a status that does not permit the operation.
    InvalidCampaignState {
        /// The campaign ID.
        campaign_id: i64,
        /// The status the campaign is actually in.
        status: CampaignStatus,
        /// The operation that was rejected.
        operation: &'static str,
    },

    /// No campaign is eligible for acquisition right now. An expected
    /// steady-state outcome under polling, not a fault.
    NoCampaignsDue,

    /// Input validation failed.
    Validation {
        /// The field that failed validation.
        field: String,
        /// The validation error message.
        message: String,
    },

    /// Database operation failed.
    Database {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },
}

impl CoreError {
    /// Get the stable error code string for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::CampaignNotFound { .. } => "CAMPAIGN_NOT_FOUND",
            Self::RecipientNotFound { .. } => "RECIPIENT_NOT_FOUND",
            Self::NotificationNotFound { .. } => "NOTIFICATION_NOT_FOUND",
            Self::NoNotifications { .. } => "NO_NOTIFICATIONS",
            Self::NameTaken { .. } => "NAME_TAKEN",
            Self::EmailTaken { .. } => "EMAIL_TAKEN",
            Self::DuplicateNotification { .. } => "DUPLICATE_NOTIFICATION",
            Self::InvalidCampaignState { .. } => "INVALID_CAMPAIGN_STATE",
            Self::NoCampaignsDue => "NO_CAMPAIGNS_DUE",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::Database { .. } => "DATABASE_ERROR",
        }
    }

    /// Whether this error maps to a 404-equivalent at an API boundary.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::CampaignNotFound { .. }
                | Self::RecipientNotFound { .. }
                | Self::NotificationNotFound { .. }
                | Self::NoNotifications { .. }
        )
    }

    /// Whether this error maps to a 409-equivalent at an API boundary.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::NameTaken { .. }
                | Self::EmailTaken { .. }
                | Self::DuplicateNotification { .. }
                | Self::InvalidCampaignState { .. }
        )
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CampaignNotFound { campaign_id } => {
                write!(f, "Campaign '{}' not found", campaign_id)
            }
            Self::RecipientNotFound { recipient_id } => {
                write!(f, "Recipient '{}' not found", recipient_id)
            }
            Self::NotificationNotFound {
                campaign_id,
                recipient_id,
            } => {
                write!(
                    f,
                    "No notification for recipient '{}' in campaign '{}'",
                    recipient_id, campaign_id
                )
            }
            Self::NoNotifications { campaign_id } => {
                write!(f, "There are no notifications in campaign '{}'", campaign_id)
            }
            Self::NameTaken { name } => {
                write!(f, "Campaign name '{}' already exists", name)
            }
            Self::EmailTaken { contact_email } => {
                write!(f, "A recipient with email '{}' already exists", contact_email)
            }
            Self::DuplicateNotification { campaign_id } => {
                write!(
                    f,
                    "Notifications for campaign '{}' already materialized",
                    campaign_id
                )
            }
            Self::InvalidCampaignState {
                campaign_id,
                status,
                operation,
            } => {
                write!(
                    f,
                    "Campaign '{}' with status '{}' does not permit '{}'",
                    campaign_id, status, operation
                )
            }
            Self::NoCampaignsDue => {
                write!(f, "No campaigns are due for acquisition")
            }
            Self::Validation { field, message } => {
                write!(f, "Validation error for '{}': {}", field, message)
            }
            Self::Database { operation, details } => {
                write!(f, "Database error during '{}': {}", operation, details)
            }
        }
    }
}

impl std::error::Error for CoreError {}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        CoreError::Database {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}
