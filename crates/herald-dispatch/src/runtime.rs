// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for herald-dispatch.
//!
//! This module provides [`DispatchRuntime`] which allows embedding the
//! campaign dispatcher into an existing tokio application instead of
//! running it as a dedicated worker binary.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use herald_core::store::PostgresStore;
//! use herald_dispatch::runtime::DispatchRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let pool = sqlx::PgPool::connect("postgres://...").await?;
//!     let store = Arc::new(PostgresStore::new(pool));
//!
//!     let runtime = DispatchRuntime::builder()
//!         .store(store.clone())
//!         .ledger(store.clone())
//!         .recipients(store)
//!         .delivery(Arc::new(MyEmailChannel::new()?))
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     // ... run your application ...
//!
//!     // Graceful shutdown
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info};

use herald_core::store::{CampaignStore, NotificationLedger, RecipientDirectory};

use crate::config::DispatcherConfig;
use crate::delivery::Delivery;
use crate::dispatcher::CampaignDispatcher;

/// Builder for creating a [`DispatchRuntime`].
#[derive(Default)]
pub struct DispatchRuntimeBuilder {
    store: Option<Arc<dyn CampaignStore>>,
    ledger: Option<Arc<dyn NotificationLedger>>,
    recipients: Option<Arc<dyn RecipientDirectory>>,
    delivery: Option<Arc<dyn Delivery>>,
    config: Option<DispatcherConfig>,
}

impl std::fmt::Debug for DispatchRuntimeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchRuntimeBuilder")
            .field("store", &self.store.as_ref().map(|_| "..."))
            .field("delivery", &self.delivery.as_ref().map(|_| "..."))
            .field("config", &self.config)
            .finish()
    }
}

impl DispatchRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the campaign store (required).
    pub fn store(mut self, store: Arc<dyn CampaignStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the notification ledger (required).
    pub fn ledger(mut self, ledger: Arc<dyn NotificationLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Set the recipient directory (required).
    pub fn recipients(mut self, recipients: Arc<dyn RecipientDirectory>) -> Self {
        self.recipients = Some(recipients);
        self
    }

    /// Set the delivery channel (required).
    pub fn delivery(mut self, delivery: Arc<dyn Delivery>) -> Self {
        self.delivery = Some(delivery);
        self
    }

    /// Set the dispatcher configuration.
    ///
    /// Default: [`DispatcherConfig::from_env`]
    pub fn config(mut self, config: DispatcherConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<DispatchRuntimeConfig> {
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("store is required"))?;
        let ledger = self
            .ledger
            .ok_or_else(|| anyhow::anyhow!("ledger is required"))?;
        let recipients = self
            .recipients
            .ok_or_else(|| anyhow::anyhow!("recipients is required"))?;
        let delivery = self
            .delivery
            .ok_or_else(|| anyhow::anyhow!("delivery is required"))?;

        Ok(DispatchRuntimeConfig {
            store,
            ledger,
            recipients,
            delivery,
            config: self.config.unwrap_or_else(DispatcherConfig::from_env),
        })
    }
}

/// Configuration for a [`DispatchRuntime`].
pub struct DispatchRuntimeConfig {
    store: Arc<dyn CampaignStore>,
    ledger: Arc<dyn NotificationLedger>,
    recipients: Arc<dyn RecipientDirectory>,
    delivery: Arc<dyn Delivery>,
    config: DispatcherConfig,
}

impl std::fmt::Debug for DispatchRuntimeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchRuntimeConfig")
            .field("config", &self.config)
            .finish()
    }
}

impl DispatchRuntimeConfig {
    /// Start the runtime, spawning the dispatcher loop as a background task.
    pub async fn start(self) -> Result<DispatchRuntime> {
        let dispatcher = Arc::new(CampaignDispatcher::new(
            self.store,
            self.ledger,
            self.recipients,
            self.delivery,
            self.config,
        ));
        let shutdown = dispatcher.shutdown_handle();

        let worker = dispatcher.clone();
        let handle = tokio::spawn(async move {
            worker.run().await;
        });

        info!("DispatchRuntime started");

        Ok(DispatchRuntime { handle, shutdown })
    }
}

/// A running dispatcher that can be embedded in an application.
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct DispatchRuntime {
    handle: JoinHandle<()>,
    shutdown: Arc<Notify>,
}

impl DispatchRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> DispatchRuntimeBuilder {
        DispatchRuntimeBuilder::new()
    }

    /// Gracefully shut down the runtime.
    ///
    /// This signals the dispatcher loop to stop and waits for the current
    /// cycle to finish.
    pub async fn shutdown(self) -> Result<()> {
        info!("DispatchRuntime shutting down...");

        self.shutdown.notify_one();

        match self.handle.await {
            Ok(()) => {
                info!("DispatchRuntime shutdown complete");
                Ok(())
            }
            Err(e) => {
                error!("DispatchRuntime worker task panicked: {}", e);
                Err(anyhow::anyhow!("dispatcher task panicked: {}", e))
            }
        }
    }

    /// Check if the runtime is still running.
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}
