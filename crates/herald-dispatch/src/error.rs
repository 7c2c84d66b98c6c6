// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for herald-dispatch.

use thiserror::Error;

/// Dispatch errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Store or ledger operation failed.
    #[error("Core error: {0}")]
    Core(#[from] herald_core::error::CoreError),

    /// Delivery channel failed for one notification.
    #[error("Delivery error: {0}")]
    Delivery(#[from] crate::delivery::DeliveryError),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Result type using dispatch Error by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;
