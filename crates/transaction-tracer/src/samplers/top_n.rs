// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;

use crate::samplers::{SamplerKind, TransactionSampler};
use crate::tracer::transaction::TransactionRecord;

/// Consecutive empty harvests after which the remembered names are forgotten.
const MAX_EMPTY_HARVESTS: u32 = 5;

struct Remembered {
    duration_nanos: u64,
    /// Harvest order, to forget the oldest of equally slow names first.
    seq: u64,
}

#[derive(Default)]
struct AppState {
    /// Slowest record of the current window.
    slowest: Option<Arc<TransactionRecord>>,
    /// Up to `top_n` harvested names with the slowest duration sent for each.
    remembered: HashMap<String, Remembered>,
    empty_harvests: u32,
}

/// Keeps the slowest transaction at or above a duration threshold, one per harvest.
///
/// The names of the last `top_n` harvested traces are remembered across harvests: a
/// remembered name is only sampled again when strictly slower than its previous trace,
/// so equally slow repeats keep the incumbent. Within a window a record replaces the
/// retained one only when strictly slower.
pub struct TopNSlowestSampler {
    threshold_nanos: u64,
    top_n: usize,
    seq: AtomicU64,
    stopped: AtomicBool,
    apps: Mutex<HashMap<String, AppState>>,
}

impl TopNSlowestSampler {
    #[must_use]
    pub fn new(threshold: Duration, top_n: usize) -> Self {
        Self {
            threshold_nanos: u64::try_from(threshold.as_nanos()).unwrap_or(u64::MAX),
            top_n,
            seq: AtomicU64::new(0),
            stopped: AtomicBool::new(false),
            apps: Mutex::new(HashMap::new()),
        }
    }

    fn remember(&self, state: &mut AppState, record: &TransactionRecord) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let entry = state
            .remembered
            .entry(record.name.clone())
            .or_insert(Remembered {
                duration_nanos: 0,
                seq,
            });
        entry.duration_nanos = entry.duration_nanos.max(record.duration_nanos);
        entry.seq = seq;

        if state.remembered.len() <= self.top_n {
            return;
        }
        let forgotten = state
            .remembered
            .iter()
            .min_by(|(_, a), (_, b)| {
                a.duration_nanos
                    .cmp(&b.duration_nanos)
                    .then(a.seq.cmp(&b.seq))
            })
            .map(|(name, _)| name.clone());
        if let Some(name) = forgotten {
            debug!("Slowest sampler forgetting {name}");
            state.remembered.remove(&name);
        }
    }
}

impl TransactionSampler for TopNSlowestSampler {
    fn kind(&self) -> SamplerKind {
        SamplerKind::Slowest
    }

    fn notice(&self, record: &Arc<TransactionRecord>) -> bool {
        if self.stopped.load(Ordering::Acquire)
            || self.top_n == 0
            || record.duration_nanos < self.threshold_nanos
        {
            return false;
        }

        let mut apps = self.apps.lock().unwrap_or_else(PoisonError::into_inner);
        let state = apps.entry(record.app_name.clone()).or_default();
        if state
            .remembered
            .get(&record.name)
            .is_some_and(|previous| record.duration_nanos <= previous.duration_nanos)
        {
            return false;
        }
        if let Some(slowest) = &state.slowest {
            if record.duration_nanos <= slowest.duration_nanos {
                return false;
            }
            debug!(
                "Slowest sampler replacing {} ({}ns) with {} ({}ns)",
                slowest.name, slowest.duration_nanos, record.name, record.duration_nanos
            );
        }
        state.slowest = Some(Arc::clone(record));
        true
    }

    fn harvest(&self, app_name: &str) -> Vec<Arc<TransactionRecord>> {
        let mut apps = self.apps.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(state) = apps.get_mut(app_name) else {
            return Vec::new();
        };
        match state.slowest.take() {
            Some(record) => {
                state.empty_harvests = 0;
                self.remember(state, &record);
                vec![record]
            }
            None => {
                state.empty_harvests += 1;
                if state.empty_harvests >= MAX_EMPTY_HARVESTS {
                    state.remembered.clear();
                    state.empty_harvests = 0;
                }
                Vec::new()
            }
        }
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }
}
