// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde::Serialize;
use std::collections::HashMap;

/// Accumulated timing for one metric name.
///
/// Values only grow between harvests; nothing is ever subtracted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ResponseTimeStats {
    pub call_count: u64,
    pub total_time_nanos: u64,
    pub total_exclusive_time_nanos: u64,
    pub min_time_nanos: u64,
    pub max_time_nanos: u64,
    /// Sum of squared durations in seconds, for variance at the backend.
    pub sum_of_squares: f64,
}

impl ResponseTimeStats {
    pub fn record(&mut self, duration_nanos: u64, exclusive_duration_nanos: u64) {
        self.record_many(1, duration_nanos, exclusive_duration_nanos);
    }

    /// Records `count` calls whose durations sum to `duration_nanos`.
    pub fn record_many(&mut self, count: u64, duration_nanos: u64, exclusive_duration_nanos: u64) {
        if count == 0 {
            return;
        }
        let per_call = duration_nanos / count;
        if self.call_count == 0 {
            self.min_time_nanos = per_call;
            self.max_time_nanos = per_call;
        } else {
            self.min_time_nanos = self.min_time_nanos.min(per_call);
            self.max_time_nanos = self.max_time_nanos.max(per_call);
        }
        self.call_count = self.call_count.saturating_add(count);
        self.total_time_nanos = self.total_time_nanos.saturating_add(duration_nanos);
        self.total_exclusive_time_nanos = self
            .total_exclusive_time_nanos
            .saturating_add(exclusive_duration_nanos);
        let seconds = per_call as f64 / crate::S_TO_NS as f64;
        self.sum_of_squares += seconds * seconds * count as f64;
    }

    pub fn merge(&mut self, other: &ResponseTimeStats) {
        if other.call_count == 0 {
            return;
        }
        if self.call_count == 0 {
            *self = *other;
            return;
        }
        self.call_count = self.call_count.saturating_add(other.call_count);
        self.total_time_nanos = self.total_time_nanos.saturating_add(other.total_time_nanos);
        self.total_exclusive_time_nanos = self
            .total_exclusive_time_nanos
            .saturating_add(other.total_exclusive_time_nanos);
        self.min_time_nanos = self.min_time_nanos.min(other.min_time_nanos);
        self.max_time_nanos = self.max_time_nanos.max(other.max_time_nanos);
        self.sum_of_squares += other.sum_of_squares;
    }
}

/// Stats keyed by metric name.
///
/// Names are owned rather than interned: they include transaction and URI names of
/// unbounded cardinality, and an intern table would keep every one of them after harvest.
pub type StatsMap = HashMap<String, ResponseTimeStats>;

pub(crate) fn merge_into(target: &mut StatsMap, source: &StatsMap) {
    for (name, stats) in source {
        match target.get_mut(name) {
            Some(existing) => existing.merge(stats),
            None => {
                target.insert(name.clone(), *stats);
            }
        }
    }
}

pub(crate) fn record_into(
    target: &mut StatsMap,
    name: &str,
    duration_nanos: u64,
    exclusive_nanos: u64,
) {
    match target.get_mut(name) {
        Some(stats) => stats.record(duration_nanos, exclusive_nanos),
        None => {
            let mut stats = ResponseTimeStats::default();
            stats.record(duration_nanos, exclusive_nanos);
            target.insert(name.to_string(), stats);
        }
    }
}

/// Metrics collected by the tracers of one transaction while it runs.
///
/// Scoped entries are the per-call metrics (`Datastore/statement/...`, `External/host/lib`,
/// `Custom/...`); unscoped entries are the rollups (`Datastore/all`, `External/all`, ...).
#[derive(Debug, Clone, Default)]
pub struct TransactionStats {
    scoped: StatsMap,
    unscoped: StatsMap,
}

impl TransactionStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_scoped(&mut self, name: &str, duration_nanos: u64, exclusive_nanos: u64) {
        record_into(&mut self.scoped, name, duration_nanos, exclusive_nanos);
    }

    pub fn record_unscoped(&mut self, name: &str, duration_nanos: u64, exclusive_nanos: u64) {
        record_into(&mut self.unscoped, name, duration_nanos, exclusive_nanos);
    }

    #[must_use]
    pub fn scoped(&self) -> &StatsMap {
        &self.scoped
    }

    #[must_use]
    pub fn unscoped(&self) -> &StatsMap {
        &self.unscoped
    }

    #[must_use]
    pub fn scoped_call_count(&self, name: &str) -> u64 {
        self.scoped
            .get(name)
            .map_or(0, |stats| stats.call_count)
    }

    #[must_use]
    pub fn unscoped_call_count(&self, name: &str) -> u64 {
        self.unscoped
            .get(name)
            .map_or(0, |stats| stats.call_count)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scoped.is_empty() && self.unscoped.is_empty()
    }
}
