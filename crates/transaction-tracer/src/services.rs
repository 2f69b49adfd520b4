// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;
use tracing::debug;

use crate::clock::{Clock, GuidSource, MonotonicClock, RandomGuidSource};
use crate::config::TracerConfig;
use crate::error::ConfigError;
use crate::metrics::MetricAggregator;
use crate::requests::RequestMerger;
use crate::samplers::TransactionTraceService;
use crate::signature::CallSiteRegistry;

/// Everything a transaction needs once it finishes, shared by all transactions of an
/// application.
pub struct TracerServices {
    pub config: TracerConfig,
    pub clock: Arc<dyn Clock>,
    pub guids: Arc<dyn GuidSource>,
    pub call_sites: CallSiteRegistry,
    pub aggregator: MetricAggregator,
    pub requests: RequestMerger,
    pub traces: TransactionTraceService,
}

impl TracerServices {
    pub fn new(config: TracerConfig) -> Result<Arc<Self>, ConfigError> {
        Self::with_clock(config, Arc::new(MonotonicClock::new()))
    }

    pub fn with_clock(config: TracerConfig, clock: Arc<dyn Clock>) -> Result<Arc<Self>, ConfigError> {
        Self::with_sources(config, clock, Arc::new(RandomGuidSource))
    }

    pub fn with_sources(
        config: TracerConfig,
        clock: Arc<dyn Clock>,
        guids: Arc<dyn GuidSource>,
    ) -> Result<Arc<Self>, ConfigError> {
        config.validate()?;
        debug!(
            "Starting tracer services for {} (top_n={}, reservoir={}, threshold={:?})",
            config.app_name, config.top_n, config.reservoir_capacity, config.transaction_threshold
        );
        let traces = TransactionTraceService::new(&config);
        Ok(Arc::new(Self {
            config,
            clock,
            guids,
            call_sites: CallSiteRegistry::new(),
            aggregator: MetricAggregator::new(),
            requests: RequestMerger::new(),
            traces,
        }))
    }
}
