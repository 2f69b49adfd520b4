// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::samplers::{SamplerKind, TransactionSampler};
use crate::tracer::transaction::TransactionRecord;

#[derive(Default)]
struct Window {
    names: HashSet<String>,
    records: Vec<Arc<TransactionRecord>>,
}

/// Keeps the first record of each transaction name per harvest window, for up to
/// `capacity` distinct names.
pub struct RandomReservoirSampler {
    capacity: usize,
    stopped: AtomicBool,
    windows: Mutex<HashMap<String, Window>>,
}

impl RandomReservoirSampler {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            stopped: AtomicBool::new(false),
            windows: Mutex::new(HashMap::new()),
        }
    }
}

impl TransactionSampler for RandomReservoirSampler {
    fn kind(&self) -> SamplerKind {
        SamplerKind::Random
    }

    fn notice(&self, record: &Arc<TransactionRecord>) -> bool {
        if self.stopped.load(Ordering::Acquire) || self.capacity == 0 {
            return false;
        }
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        let window = windows.entry(record.app_name.clone()).or_default();
        if window.names.len() >= self.capacity || window.names.contains(&record.name) {
            return false;
        }
        window.names.insert(record.name.clone());
        window.records.push(Arc::clone(record));
        true
    }

    fn harvest(&self, app_name: &str) -> Vec<Arc<TransactionRecord>> {
        self.windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(app_name)
            .map(|window| window.records)
            .unwrap_or_default()
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }
}
