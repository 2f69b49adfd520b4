// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tracing::debug;

use crate::metrics::stats::{merge_into, record_into, StatsMap, TransactionStats};

/// Point-in-time copy of one metric namespace, keyed by metric name.
pub type MetricTable = StatsMap;

/// Everything the aggregator held at harvest time.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    /// Transaction name to its scoped metrics.
    pub scoped: HashMap<String, MetricTable>,
    /// App-wide metrics, including a derived copy of every scoped metric.
    pub unscoped: MetricTable,
}

impl MetricsSnapshot {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scoped.is_empty() && self.unscoped.is_empty()
    }
}

#[derive(Default)]
struct Inner {
    scoped: HashMap<String, StatsMap>,
    unscoped: StatsMap,
}

impl Inner {
    fn unscoped_view(&self) -> StatsMap {
        let mut view = self.unscoped.clone();
        for metrics in self.scoped.values() {
            merge_into(&mut view, metrics);
        }
        view
    }
}

/// Scoped and unscoped response-time aggregates for one application.
///
/// Every mutation goes through a single mutex; reads take a copy while holding it.
#[derive(Default)]
pub struct MetricAggregator {
    inner: Mutex<Inner>,
}

impl MetricAggregator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one call under `scope`, or app-wide when `scope` is `None`.
    pub fn record(
        &self,
        scope: Option<&str>,
        metric_name: &str,
        duration_nanos: u64,
        exclusive_duration_nanos: u64,
    ) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let target = match scope {
            Some(scope) => inner.scoped.entry(scope.to_string()).or_default(),
            None => &mut inner.unscoped,
        };
        record_into(target, metric_name, duration_nanos, exclusive_duration_nanos);
    }

    /// Merges everything a finished transaction collected in one critical section.
    pub fn merge_transaction(&self, transaction_name: &str, stats: &TransactionStats) {
        if stats.is_empty() {
            return;
        }
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let scoped = inner
            .scoped
            .entry(transaction_name.to_string())
            .or_default();
        merge_into(scoped, stats.scoped());
        merge_into(&mut inner.unscoped, stats.unscoped());
        debug!(
            "Merged {} scoped and {} unscoped metrics for {}",
            stats.scoped().len(),
            stats.unscoped().len(),
            transaction_name
        );
    }

    /// Scoped metrics recorded under `scope` so far.
    #[must_use]
    pub fn snapshot(&self, scope: &str) -> MetricTable {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner
            .scoped
            .get(scope)
            .cloned()
            .unwrap_or_default()
    }

    /// App-wide view: every directly unscoped metric merged with every scoped one.
    #[must_use]
    pub fn snapshot_unscoped(&self) -> MetricTable {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.unscoped_view()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        *inner = Inner::default();
    }

    /// Swaps out everything accumulated since the previous harvest.
    pub fn harvest(&self) -> MetricsSnapshot {
        let drained = {
            let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *inner)
        };
        MetricsSnapshot {
            unscoped: drained.unscoped_view(),
            scoped: drained.scoped,
        }
    }
}
