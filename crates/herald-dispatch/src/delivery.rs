// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Delivery channel seam.
//!
//! The dispatcher hands each (campaign, recipient) pair to a [`Delivery`]
//! implementation and records the outcome it reports. The transport behind
//! the trait (SMTP, a message queue, a provider API) is not prescribed; the
//! only contract is that every call yields exactly one outcome, or an error
//! that leaves the notification `pending`.

use async_trait::async_trait;
use thiserror::Error;

use herald_core::domain::{Campaign, NotificationStatus, Recipient};

/// Final outcome reported by a delivery channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Handed to the transport, no delivery confirmation available.
    Sent,
    /// Confirmed delivered.
    Delivered,
    /// Confirmed not delivered (hard bounce, rejected address).
    Undelivered,
}

impl From<DeliveryOutcome> for NotificationStatus {
    fn from(outcome: DeliveryOutcome) -> Self {
        match outcome {
            DeliveryOutcome::Sent => NotificationStatus::Sent,
            DeliveryOutcome::Delivered => NotificationStatus::Delivered,
            DeliveryOutcome::Undelivered => NotificationStatus::Undelivered,
        }
    }
}

/// A delivery attempt that failed before producing any outcome. The
/// notification for the pair stays `pending` and blocks completion of its
/// campaign until an outcome is eventually recorded.
#[derive(Debug, Error)]
#[error("delivery to '{contact_email}' failed: {reason}")]
pub struct DeliveryError {
    /// The recipient address the attempt targeted.
    pub contact_email: String,
    /// Transport-level failure detail.
    pub reason: String,
}

/// Delivery channel consumed by the dispatcher.
#[async_trait]
pub trait Delivery: Send + Sync {
    /// Deliver one campaign notification to one recipient and report the
    /// outcome.
    async fn deliver(
        &self,
        campaign: &Campaign,
        recipient: &Recipient,
    ) -> Result<DeliveryOutcome, DeliveryError>;
}
