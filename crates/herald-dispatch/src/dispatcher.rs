// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Campaign dispatcher worker.
//!
//! Polls the campaign store on a fixed interval. Each cycle tries to
//! acquire one due campaign and fan it out into per-recipient
//! notifications, then sweeps any running campaign whose notifications are
//! all resolved into its terminal status. Any number of dispatcher
//! processes may poll one shared database; single-winner semantics come
//! from the store's acquire, not from in-process coordination.
//!
//! Absence of work is not an error, and no single campaign's failure ever
//! stops the loop.

use std::sync::Arc;

use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use herald_core::domain::Campaign;
use herald_core::error::CoreError;
use herald_core::store::{CampaignStore, NotificationLedger, RecipientDirectory};

use crate::config::DispatcherConfig;
use crate::delivery::Delivery;
use crate::error::Result;

/// Background worker that drives the campaign lifecycle forward.
pub struct CampaignDispatcher {
    store: Arc<dyn CampaignStore>,
    ledger: Arc<dyn NotificationLedger>,
    recipients: Arc<dyn RecipientDirectory>,
    delivery: Arc<dyn Delivery>,
    config: DispatcherConfig,
    shutdown: Arc<Notify>,
}

impl CampaignDispatcher {
    /// Create a new dispatcher over explicitly passed collaborators.
    pub fn new(
        store: Arc<dyn CampaignStore>,
        ledger: Arc<dyn NotificationLedger>,
        recipients: Arc<dyn RecipientDirectory>,
        delivery: Arc<dyn Delivery>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            recipients,
            delivery,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the dispatcher loop.
    ///
    /// The loop exits only when the shutdown signal is received.
    pub async fn run(&self) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            sweep_limit = self.config.sweep_limit,
            "Campaign dispatcher started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Campaign dispatcher received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.poll_interval) => {
                    self.tick().await;
                }
            }
        }

        info!("Campaign dispatcher stopped");
    }

    /// One poll cycle: launch, then sweep. Errors are logged, never
    /// propagated; the next cycle starts fresh.
    pub async fn tick(&self) {
        match self.launch_due().await {
            Ok(Some(campaign)) => {
                info!(
                    campaign_id = campaign.campaign_id,
                    name = %campaign.name,
                    "Campaign fan-out finished"
                );
            }
            Ok(None) => debug!("No campaigns due for launch"),
            Err(e) => error!(error = %e, "Campaign launch cycle failed"),
        }

        match self.sweep_completions().await {
            Ok(0) => debug!("No campaigns ready for completion"),
            Ok(count) => info!(completed = count, "Campaigns concluded"),
            Err(e) => error!(error = %e, "Completion sweep failed"),
        }
    }

    /// Acquire one due campaign and fan it out: materialize a pending
    /// notification per recipient, then hand each pair to the delivery
    /// channel and record the outcome it reports.
    ///
    /// Returns `Ok(None)` when no campaign is eligible. A failed delivery
    /// call leaves its notification `pending`, which blocks the campaign's
    /// completion until an outcome is eventually recorded.
    async fn launch_due(&self) -> Result<Option<Campaign>> {
        let campaign = match self.store.acquire().await {
            Ok(campaign) => campaign,
            Err(CoreError::NoCampaignsDue) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        info!(
            campaign_id = campaign.campaign_id,
            name = %campaign.name,
            "Campaign acquired for launch"
        );

        let recipients = self.recipients.fetch_all().await?;
        if recipients.is_empty() {
            warn!(
                campaign_id = campaign.campaign_id,
                "Recipient list is empty; campaign stays running with no notifications"
            );
            return Ok(Some(campaign));
        }

        let recipient_ids: Vec<i64> = recipients.iter().map(|r| r.recipient_id).collect();
        self.ledger
            .add_many(campaign.campaign_id, &recipient_ids)
            .await?;
        debug!(
            campaign_id = campaign.campaign_id,
            count = recipients.len(),
            "Notifications materialized"
        );

        for recipient in &recipients {
            match self.delivery.deliver(&campaign, recipient).await {
                Ok(outcome) => {
                    if let Err(e) = self
                        .ledger
                        .record_outcome(
                            campaign.campaign_id,
                            recipient.recipient_id,
                            outcome.into(),
                        )
                        .await
                    {
                        error!(
                            campaign_id = campaign.campaign_id,
                            recipient_id = recipient.recipient_id,
                            error = %e,
                            "Failed to record delivery outcome"
                        );
                    }
                }
                Err(e) => {
                    warn!(
                        campaign_id = campaign.campaign_id,
                        recipient_id = recipient.recipient_id,
                        error = %e,
                        "Delivery failed; notification stays pending"
                    );
                }
            }
        }

        Ok(Some(campaign))
    }

    /// Conclude running campaigns whose notifications are all resolved,
    /// up to the configured per-cycle limit.
    async fn sweep_completions(&self) -> Result<u64> {
        let mut swept = 0u64;
        while swept < self.config.sweep_limit {
            match self.store.complete_next().await? {
                Some(campaign) => {
                    info!(
                        campaign_id = campaign.campaign_id,
                        name = %campaign.name,
                        status = %campaign.status,
                        "Campaign concluded"
                    );
                    swept += 1;
                }
                None => break,
            }
        }
        Ok(swept)
    }
}
