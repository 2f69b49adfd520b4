// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use crate::config::TracerConfig;
use crate::samplers::{
    KeyTransactionSampler, RandomReservoirSampler, SamplerKind, SyntheticsSampler,
    TopNSlowestSampler, TransactionSampler,
};
use crate::tracer::transaction::TransactionRecord;

/// Traces retained for one application during one harvest window.
#[derive(Debug, Clone, Default)]
pub struct TraceHarvest {
    pub slowest: Vec<Arc<TransactionRecord>>,
    pub random: Vec<Arc<TransactionRecord>>,
    pub synthetics: Vec<Arc<TransactionRecord>>,
    pub key_transactions: Vec<Arc<TransactionRecord>>,
}

impl TraceHarvest {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slowest.is_empty()
            && self.random.is_empty()
            && self.synthetics.is_empty()
            && self.key_transactions.is_empty()
    }

    /// Every retained record once, even when several samplers kept it.
    #[must_use]
    pub fn unique(&self) -> Vec<Arc<TransactionRecord>> {
        let mut seen = HashSet::new();
        self.slowest
            .iter()
            .chain(&self.key_transactions)
            .chain(&self.synthetics)
            .chain(&self.random)
            .filter(|record| seen.insert(record.guid.clone()))
            .cloned()
            .collect()
    }
}

/// Offers every finished transaction to each sampler.
pub struct TransactionTraceService {
    samplers: Vec<Arc<dyn TransactionSampler>>,
}

impl TransactionTraceService {
    #[must_use]
    pub fn new(config: &TracerConfig) -> Self {
        Self::with_samplers(vec![
            Arc::new(TopNSlowestSampler::new(
                config.transaction_threshold,
                config.top_n,
            )),
            Arc::new(RandomReservoirSampler::new(config.reservoir_capacity)),
            Arc::new(SyntheticsSampler::new(config.max_synthetics_per_harvest)),
            Arc::new(KeyTransactionSampler::new(config.key_transactions.clone())),
        ])
    }

    #[must_use]
    pub fn with_samplers(samplers: Vec<Arc<dyn TransactionSampler>>) -> Self {
        Self { samplers }
    }

    /// Returns whether any sampler retained the record.
    pub fn notice(&self, record: &Arc<TransactionRecord>) -> bool {
        let mut retained = false;
        for sampler in &self.samplers {
            if sampler.notice(record) {
                debug!("{} sampler retained {}", sampler.kind(), record.name);
                retained = true;
            }
        }
        retained
    }

    pub fn harvest(&self, app_name: &str) -> TraceHarvest {
        let mut harvest = TraceHarvest::default();
        for sampler in &self.samplers {
            let records = sampler.harvest(app_name);
            let target = match sampler.kind() {
                SamplerKind::Slowest => &mut harvest.slowest,
                SamplerKind::Random => &mut harvest.random,
                SamplerKind::Synthetics => &mut harvest.synthetics,
                SamplerKind::KeyTransaction => &mut harvest.key_transactions,
            };
            target.extend(records);
        }
        harvest
    }

    pub fn stop(&self) {
        for sampler in &self.samplers {
            sampler.stop();
        }
    }
}
