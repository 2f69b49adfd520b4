// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crate::samplers::{SamplerKind, TransactionSampler};
use crate::tracer::transaction::TransactionRecord;

#[derive(Default)]
struct AppQueue {
    /// Accepted and not yet drained. Reserved before the push so the bound holds across
    /// producers.
    pending: AtomicUsize,
    queue: Mutex<VecDeque<Arc<TransactionRecord>>>,
}

/// Accepts traces of synthetic-monitor requests, at most `max_per_harvest` per window.
pub struct SyntheticsSampler {
    max_per_harvest: usize,
    stopped: AtomicBool,
    queues: RwLock<HashMap<String, Arc<AppQueue>>>,
}

impl SyntheticsSampler {
    #[must_use]
    pub fn new(max_per_harvest: usize) -> Self {
        Self {
            max_per_harvest,
            stopped: AtomicBool::new(false),
            queues: RwLock::new(HashMap::new()),
        }
    }

    fn queue(&self, app_name: &str) -> Arc<AppQueue> {
        if let Some(queue) = self
            .queues
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(app_name)
        {
            return Arc::clone(queue);
        }
        let mut queues = self.queues.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(queues.entry(app_name.to_string()).or_default())
    }

    /// Accepted records of `app_name` not yet harvested.
    #[must_use]
    pub fn pending(&self, app_name: &str) -> usize {
        self.queues
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(app_name)
            .map_or(0, |queue| queue.pending.load(Ordering::Acquire))
    }
}

impl TransactionSampler for SyntheticsSampler {
    fn kind(&self) -> SamplerKind {
        SamplerKind::Synthetics
    }

    fn notice(&self, record: &Arc<TransactionRecord>) -> bool {
        if self.stopped.load(Ordering::Acquire) || record.synthetics.is_none() {
            return false;
        }
        let queue = self.queue(&record.app_name);
        let max = self.max_per_harvest;
        let reserved = queue
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |pending| {
                (pending < max).then_some(pending + 1)
            })
            .is_ok();
        if reserved {
            queue
                .queue
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push_back(Arc::clone(record));
        }
        reserved
    }

    fn harvest(&self, app_name: &str) -> Vec<Arc<TransactionRecord>> {
        let Some(queue) = self
            .queues
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(app_name)
            .cloned()
        else {
            return Vec::new();
        };
        let drained: Vec<_> = {
            let mut items = queue.queue.lock().unwrap_or_else(PoisonError::into_inner);
            let count = items.len().min(self.max_per_harvest);
            items.drain(..count).collect()
        };
        // Only release what was popped: a producer between reserve and push keeps its slot.
        queue.pending.fetch_sub(drained.len(), Ordering::AcqRel);
        drained
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }
}
