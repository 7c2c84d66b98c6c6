// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Dispatcher configuration.

use std::time::Duration;

/// Configuration for the campaign dispatcher.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// How often to poll for due campaigns and sweepable completions.
    pub poll_interval: Duration,
    /// Maximum campaigns concluded per sweep pass (bounds one cycle's work).
    pub sweep_limit: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            sweep_limit: 10,
        }
    }
}

impl DispatcherConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `HERALD_DISPATCH_POLL_INTERVAL_SECS`: seconds between poll cycles (default: 10)
    /// - `HERALD_DISPATCH_SWEEP_LIMIT`: max completions per cycle (default: 10)
    pub fn from_env() -> Self {
        let poll_interval_secs = std::env::var("HERALD_DISPATCH_POLL_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10);

        let sweep_limit = std::env::var("HERALD_DISPATCH_SWEEP_LIMIT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10);

        Self {
            poll_interval: Duration::from_secs(poll_interval_secs),
            sweep_limit,
        }
    }
}
