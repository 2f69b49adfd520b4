// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;
use tokio::sync::mpsc::Sender;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, debug_span, error, info};

use crate::metrics::MetricsSnapshot;
use crate::requests::RequestTable;
use crate::samplers::TraceHarvest;
use crate::services::TracerServices;

/// Everything accumulated for one application during one harvest window.
#[derive(Debug, Default)]
pub struct HarvestPayload {
    pub app_name: String,
    pub traces: TraceHarvest,
    pub metrics: MetricsSnapshot,
    pub requests: RequestTable,
}

impl HarvestPayload {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.traces.is_empty() && self.metrics.is_empty() && self.requests.is_empty()
    }
}

/// Periodically drains the samplers, the metric aggregator and the request merger, and
/// hands the result to a transport.
pub struct Harvester {
    services: Arc<TracerServices>,
    tx: Sender<HarvestPayload>,
    cancel_token: CancellationToken,
}

impl Harvester {
    #[must_use]
    pub fn new(
        services: Arc<TracerServices>,
        tx: Sender<HarvestPayload>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            services,
            tx,
            cancel_token,
        }
    }

    /// Drains one window.
    #[must_use]
    pub fn harvest_now(&self) -> HarvestPayload {
        let app_name = self.services.config.app_name.clone();
        let _span = debug_span!("harvest", app = %app_name).entered();
        let payload = HarvestPayload {
            traces: self.services.traces.harvest(&app_name),
            metrics: self.services.aggregator.harvest(),
            requests: self.services.requests.harvest(),
            app_name,
        };
        if payload.is_empty() {
            debug!("Nothing to harvest");
        } else {
            debug!(
                "Harvested {} traces and {} transaction scopes",
                payload.traces.unique().len(),
                payload.metrics.scoped.len()
            );
        }
        payload
    }

    /// Runs until cancelled, harvesting once more before returning.
    pub async fn run(self) {
        let mut harvest_interval = interval(self.services.config.harvest_interval);
        harvest_interval.tick().await; // discard first tick

        loop {
            tokio::select! {
                _ = harvest_interval.tick() => {
                    if !self.send(self.harvest_now()).await {
                        break;
                    }
                }
                () = self.cancel_token.cancelled() => {
                    info!("Harvester cancelled, running final harvest");
                    self.services.traces.stop();
                    self.send(self.harvest_now()).await;
                    break;
                }
            }
        }
    }

    async fn send(&self, payload: HarvestPayload) -> bool {
        if payload.is_empty() {
            return true;
        }
        match self.tx.send(payload).await {
            Ok(()) => true,
            Err(e) => {
                error!("Harvest receiver closed, stopping harvester: {e}");
                false
            }
        }
    }
}
