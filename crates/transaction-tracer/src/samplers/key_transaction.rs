// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

use crate::samplers::{SamplerKind, TransactionSampler};
use crate::tracer::transaction::TransactionRecord;
use crate::S_TO_NS;

struct Best {
    record: Arc<TransactionRecord>,
    score: f64,
}

/// Keeps the key transaction that exceeded its apdex threshold by the widest margin.
pub struct KeyTransactionSampler {
    apdex_thresholds: HashMap<String, f64>,
    stopped: AtomicBool,
    best: Mutex<HashMap<String, Best>>,
}

/// `duration / apdex_threshold`. A zero, negative or non-finite threshold always exceeds.
#[must_use]
pub fn score(duration_nanos: u64, apdex_threshold_secs: f64) -> f64 {
    if !apdex_threshold_secs.is_finite() || apdex_threshold_secs <= 0.0 {
        return f64::INFINITY;
    }
    #[allow(clippy::cast_precision_loss)]
    let duration_secs = duration_nanos as f64 / S_TO_NS as f64;
    duration_secs / apdex_threshold_secs
}

impl KeyTransactionSampler {
    #[must_use]
    pub fn new(apdex_thresholds: HashMap<String, f64>) -> Self {
        Self {
            apdex_thresholds,
            stopped: AtomicBool::new(false),
            best: Mutex::new(HashMap::new()),
        }
    }
}

impl TransactionSampler for KeyTransactionSampler {
    fn kind(&self) -> SamplerKind {
        SamplerKind::KeyTransaction
    }

    fn notice(&self, record: &Arc<TransactionRecord>) -> bool {
        if self.stopped.load(Ordering::Acquire) {
            return false;
        }
        let Some(apdex) = self.apdex_thresholds.get(&record.name) else {
            return false;
        };
        let score = score(record.duration_nanos, *apdex);

        let mut best = self.best.lock().unwrap_or_else(PoisonError::into_inner);
        match best.get(&record.app_name) {
            Some(incumbent) if score <= incumbent.score => false,
            _ => {
                debug!("Key transaction {} retained with score {}", record.name, score);
                best.insert(
                    record.app_name.clone(),
                    Best {
                        record: Arc::clone(record),
                        score,
                    },
                );
                true
            }
        }
    }

    fn harvest(&self, app_name: &str) -> Vec<Arc<TransactionRecord>> {
        self.best
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(app_name)
            .map(|best| vec![best.record])
            .unwrap_or_default()
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }
}
