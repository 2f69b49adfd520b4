// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The logical unit of work a set of activities contributes to.
//!
//! A transaction stays open while at least one of its activities is running. When the
//! last one finishes, the collected metrics and trace trees are frozen into a
//! [`TransactionRecord`] and handed, in order, to the metric aggregator, the request merger
//! and the trace samplers.

use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use tracing::debug;

use crate::clock::{GuidSource, RandomGuidSource};
use crate::error::TracerError;
use crate::metrics::TransactionStats;
use crate::services::TracerServices;
use crate::tracer::activity::Activity;
use crate::tracer::attributes::Attributes;
use crate::tracer::ErrorInfo;

/// Synthetic monitor that issued a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyntheticsInfo {
    pub resource_id: String,
    pub job_id: String,
    pub monitor_id: String,
}

/// One node of a retained trace tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceSegment {
    pub name: String,
    /// Offset from the start of the transaction.
    pub start_offset_nanos: u64,
    pub duration_nanos: u64,
    pub exclusive_duration_nanos: u64,
    pub call_count: u64,
    pub guid: Option<String>,
    pub is_async: bool,
    pub attributes: Attributes,
    pub children: Vec<TraceSegment>,
}

impl TraceSegment {
    /// Number of segments in this subtree, this one included.
    #[must_use]
    pub fn segment_count(&self) -> usize {
        1 + self
            .children
            .iter()
            .map(TraceSegment::segment_count)
            .sum::<usize>()
    }
}

/// A finished transaction, as offered to the samplers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionRecord {
    pub guid: String,
    pub app_name: String,
    pub name: String,
    pub is_web: bool,
    pub start_epoch_millis: u64,
    pub duration_nanos: u64,
    pub trace: Option<TraceSegment>,
    pub synthetics: Option<SyntheticsInfo>,
    pub error: Option<ErrorInfo>,
}

impl TransactionRecord {
    /// A record with no trace tree, used by embedders replaying finished work.
    #[must_use]
    pub fn new(app_name: &str, name: &str, duration_nanos: u64) -> Self {
        Self {
            guid: RandomGuidSource.generate(),
            app_name: app_name.to_string(),
            name: name.to_string(),
            is_web: name.starts_with("WebTransaction"),
            start_epoch_millis: 0,
            duration_nanos,
            trace: None,
            synthetics: None,
            error: None,
        }
    }

    #[must_use]
    pub fn with_synthetics(mut self, synthetics: SyntheticsInfo) -> Self {
        self.synthetics = Some(synthetics);
        self
    }
}

/// What an activity leaves behind when it stops running for a transaction.
pub(crate) struct ActivityResult {
    pub(crate) primary: bool,
    pub(crate) root_duration_nanos: Option<u64>,
    pub(crate) tree: Option<TraceSegment>,
}

impl ActivityResult {
    /// An activity that moved away or was detached before its root finished.
    pub(crate) fn released() -> Self {
        Self {
            primary: false,
            root_duration_nanos: None,
            tree: None,
        }
    }
}

#[derive(Default)]
struct Inner {
    name: String,
    stats: TransactionStats,
    segment_names: Vec<String>,
    root_segment: Option<TraceSegment>,
    async_segments: Vec<TraceSegment>,
    root_duration_nanos: Option<u64>,
    running_activities: usize,
    started_activities: usize,
    finished: bool,
}

pub struct Transaction {
    guid: String,
    services: Arc<TracerServices>,
    is_web: bool,
    synthetics: Option<SyntheticsInfo>,
    start_nanos: u64,
    start_epoch_millis: u64,
    segment_count: AtomicUsize,
    stack_trace_count: AtomicUsize,
    error: OnceLock<ErrorInfo>,
    record: OnceLock<Arc<TransactionRecord>>,
    inner: Mutex<Inner>,
}

impl Transaction {
    #[must_use]
    pub fn new(services: &Arc<TracerServices>, name: &str, is_web: bool) -> Arc<Self> {
        Self::build(services, name, is_web, None)
    }

    #[must_use]
    pub fn new_synthetic(
        services: &Arc<TracerServices>,
        name: &str,
        is_web: bool,
        synthetics: SyntheticsInfo,
    ) -> Arc<Self> {
        Self::build(services, name, is_web, Some(synthetics))
    }

    fn build(
        services: &Arc<TracerServices>,
        name: &str,
        is_web: bool,
        synthetics: Option<SyntheticsInfo>,
    ) -> Arc<Self> {
        Arc::new(Self {
            guid: services.guids.generate(),
            services: Arc::clone(services),
            is_web,
            synthetics,
            start_nanos: services.clock.now_nanos(),
            start_epoch_millis: services.clock.epoch_millis(),
            segment_count: AtomicUsize::new(0),
            stack_trace_count: AtomicUsize::new(0),
            error: OnceLock::new(),
            record: OnceLock::new(),
            inner: Mutex::new(Inner {
                name: name.to_string(),
                ..Default::default()
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts a new activity. The first one is the primary activity whose root tracer
    /// times the whole transaction; later ones are asynchronous.
    ///
    /// Returns `None` once the transaction has finished.
    pub fn start_activity(self: &Arc<Self>) -> Option<Arc<Activity>> {
        let primary = {
            let mut inner = self.lock();
            if inner.finished {
                debug!("Not starting an activity on finished transaction {}", inner.name);
                return None;
            }
            inner.running_activities += 1;
            inner.started_activities += 1;
            inner.started_activities == 1
        };
        Some(Activity::new(Arc::clone(self), primary))
    }

    #[must_use]
    pub fn guid(&self) -> &str {
        &self.guid
    }

    #[must_use]
    pub fn name(&self) -> String {
        self.lock().name.clone()
    }

    /// Renames the transaction. Ignored once it has finished.
    pub fn set_name(&self, name: &str) -> bool {
        let mut inner = self.lock();
        if inner.finished {
            return false;
        }
        inner.name = name.to_string();
        true
    }

    #[must_use]
    pub fn is_web(&self) -> bool {
        self.is_web
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.lock().finished
    }

    #[must_use]
    pub fn synthetics(&self) -> Option<&SyntheticsInfo> {
        self.synthetics.as_ref()
    }

    /// Records the error of the transaction. The first one wins.
    pub fn notice_error(&self, error: ErrorInfo) -> bool {
        self.error.set(error).is_ok()
    }

    #[must_use]
    pub fn error(&self) -> Option<&ErrorInfo> {
        self.error.get()
    }

    /// The record dispatched when the transaction finished. `None` when no activity
    /// produced a trace before it finished.
    #[must_use]
    pub fn record(&self) -> Option<Arc<TransactionRecord>> {
        self.record.get().cloned()
    }

    #[must_use]
    pub fn services(&self) -> &Arc<TracerServices> {
        &self.services
    }

    pub(crate) fn start_nanos(&self) -> u64 {
        self.start_nanos
    }

    /// Takes one slot of the segment budget.
    pub(crate) fn claim_segment(&self) -> bool {
        self.segment_count.fetch_add(1, Ordering::Relaxed) < self.services.config.max_segments
    }

    /// Takes one slot of the stack-trace budget.
    pub(crate) fn claim_stack_trace(&self) -> bool {
        let max = self.services.config.max_stack_traces;
        self.stack_trace_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                (count < max).then_some(count + 1)
            })
            .is_ok()
    }

    /// Adds the metrics of one finished tracer.
    pub(crate) fn record_tracer_metrics(
        &self,
        scoped: &str,
        duration_nanos: u64,
        exclusive_nanos: u64,
        unscoped: &[String],
        segment_name: Option<&str>,
    ) -> Result<(), TracerError> {
        let mut inner = self.lock();
        if inner.finished {
            return Err(TracerError::TransactionFinished(inner.name.clone()));
        }
        inner
            .stats
            .record_scoped(scoped, duration_nanos, exclusive_nanos);
        for name in unscoped {
            inner
                .stats
                .record_unscoped(name, duration_nanos, duration_nanos);
        }
        if let Some(segment_name) = segment_name {
            inner.segment_names.push(segment_name.to_string());
        }
        Ok(())
    }

    /// Counts an activity moved onto this transaction.
    pub(crate) fn attach_activity(&self) -> bool {
        let mut inner = self.lock();
        if inner.finished {
            return false;
        }
        inner.running_activities += 1;
        inner.started_activities += 1;
        true
    }

    /// Called when an activity stops running for this transaction.
    pub(crate) fn activity_finished(&self, result: ActivityResult) {
        let finished = {
            let mut inner = self.lock();
            match result.tree {
                Some(tree) if result.primary => {
                    inner.root_segment = Some(tree);
                    inner.root_duration_nanos = result.root_duration_nanos;
                }
                Some(tree) => inner.async_segments.push(tree),
                None => {}
            }
            inner.running_activities = inner.running_activities.saturating_sub(1);
            if inner.running_activities > 0 || inner.finished {
                return;
            }
            let taken = std::mem::take(&mut *inner);
            inner.finished = true;
            inner.name = taken.name.clone();
            taken
        };
        self.dispatch(finished);
    }

    fn dispatch(&self, finished: Inner) {
        let Inner {
            name,
            mut stats,
            segment_names,
            root_segment,
            async_segments,
            root_duration_nanos,
            ..
        } = finished;
        if root_segment.is_none() && async_segments.is_empty() {
            // Every activity moved away or detached before a root tracer finished.
            debug!(
                "Transaction {} finished without a trace, keeping {} recorded metrics",
                name,
                stats.scoped().len() + stats.unscoped().len()
            );
            self.services.aggregator.merge_transaction(&name, &stats);
            self.services
                .requests
                .add_transaction(&name, self.is_web, &stats, &segment_names);
            return;
        }

        let duration_nanos = root_duration_nanos.unwrap_or_else(|| {
            self.services
                .clock
                .now_nanos()
                .saturating_sub(self.start_nanos)
        });

        let rollup = if self.is_web {
            "WebTransaction"
        } else {
            "OtherTransaction/all"
        };
        stats.record_unscoped(&name, duration_nanos, duration_nanos);
        stats.record_unscoped(rollup, duration_nanos, duration_nanos);

        let trace = match root_segment {
            Some(mut root) => {
                root.children.extend(async_segments);
                Some(root)
            }
            None => async_segments.into_iter().next(),
        };

        let record = Arc::new(TransactionRecord {
            guid: self.guid.clone(),
            app_name: self.services.config.app_name.clone(),
            name: name.clone(),
            is_web: self.is_web,
            start_epoch_millis: self.start_epoch_millis,
            duration_nanos,
            trace,
            synthetics: self.synthetics.clone(),
            error: self.error.get().cloned(),
        });
        debug!(
            "Transaction {} finished after {}ns with {} segments",
            name,
            duration_nanos,
            record.trace.as_ref().map_or(0, TraceSegment::segment_count)
        );

        self.services.aggregator.merge_transaction(&name, &stats);
        self.services
            .requests
            .add_transaction(&name, self.is_web, &stats, &segment_names);
        self.services.traces.notice(&record);
        // Only ever set here, after `finished` flipped under the lock.
        let _ = self.record.set(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::TracerConfig;
    use crate::signature::CallSite;
    use crate::tracer::flags::TracerFlags;
    use crate::tracer::Outcome;

    fn services(clock: &Arc<ManualClock>) -> Arc<TracerServices> {
        let config = TracerConfig {
            max_segments: 2,
            ..Default::default()
        };
        TracerServices::with_clock(config, clock.clone()).unwrap()
    }

    #[test]
    fn test_finishes_when_last_activity_finishes() {
        let clock = Arc::new(ManualClock::new(0));
        let services = services(&clock);
        let site = services.call_sites.intern(CallSite::new("Job", "run", "()V"));
        let transaction = Transaction::new(&services, "OtherTransaction/Job/run", false);

        let primary = transaction.start_activity().unwrap();
        let secondary = transaction.start_activity().unwrap();

        let root = primary
            .start_tracer(site, Some("OtherTransaction/Job/run"), TracerFlags::DEFAULT)
            .unwrap();
        let worker = secondary
            .start_tracer(site, Some("Custom/Job/worker"), TracerFlags::DEFAULT)
            .unwrap();

        clock.advance_millis(10);
        root.finish(Outcome::Return);
        assert!(!transaction.is_finished());

        clock.advance_millis(5);
        worker.finish(Outcome::Return);
        assert!(transaction.is_finished());
        assert!(transaction.start_activity().is_none());
        assert!(!transaction.set_name("OtherTransaction/Job/renamed"));

        let record = transaction.record().unwrap();
        assert_eq!(record.duration_nanos, 10 * crate::MS_TO_NS);
        let trace = record.trace.as_ref().unwrap();
        assert_eq!(trace.children.len(), 1);
        assert!(trace.children[0].is_async);
        assert_eq!(trace.children[0].name, "Custom/Job/worker");
    }

    #[test]
    fn test_segment_budget_and_first_error_wins() {
        let clock = Arc::new(ManualClock::new(0));
        let services = services(&clock);
        let transaction = Transaction::new(&services, "WebTransaction/Uri/a", true);

        assert!(transaction.claim_segment());
        assert!(transaction.claim_segment());
        assert!(!transaction.claim_segment());

        assert!(transaction.notice_error(ErrorInfo::new("IOError", "first")));
        assert!(!transaction.notice_error(ErrorInfo::new("IOError", "second")));
        assert_eq!(transaction.error().unwrap().message, "first");
    }

    #[test]
    fn test_transaction_without_trace_finishes_quietly() {
        let clock = Arc::new(ManualClock::new(0));
        let services = TracerServices::with_clock(
            TracerConfig {
                transaction_threshold: std::time::Duration::ZERO,
                ..Default::default()
            },
            clock.clone(),
        )
        .unwrap();
        let site = services.call_sites.intern(CallSite::new("Job", "run", "()V"));
        let first = Transaction::new(&services, "OtherTransaction/Job/first", false);
        let second = Transaction::new(&services, "OtherTransaction/Job/second", false);
        let second_root = second
            .start_activity()
            .unwrap()
            .start_tracer(site, Some("OtherTransaction/Job/second"), TracerFlags::DEFAULT)
            .unwrap();

        let moved = first.start_activity().unwrap();
        let root = moved
            .start_tracer(site, Some("Custom/Job/moved"), TracerFlags::DEFAULT)
            .unwrap();
        assert!(moved.reparent(&second));
        assert!(first.is_finished());
        assert!(first.record().is_none());

        clock.advance_millis(5);
        root.finish(Outcome::Return);
        second_root.finish(Outcome::Return);

        let unscoped = services.aggregator.snapshot_unscoped();
        assert!(!unscoped.contains_key("OtherTransaction/Job/first"));
        assert_eq!(unscoped["OtherTransaction/all"].call_count, 1);
        assert!(services.aggregator.snapshot("OtherTransaction/Job/first").is_empty());

        let harvest = services.traces.harvest(&services.config.app_name);
        let unique = harvest.unique();
        let names: Vec<&str> = unique.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["OtherTransaction/Job/second"]);
        assert_eq!(harvest.random.len(), 1);
    }

    #[test]
    fn test_renamed_transaction_reports_new_name() {
        let clock = Arc::new(ManualClock::new(0));
        let services = services(&clock);
        let site = services.call_sites.intern(CallSite::new("Servlet", "service", "()V"));
        let transaction = Transaction::new(&services, "WebTransaction/Uri/unknown", true);
        let activity = transaction.start_activity().unwrap();
        let root = activity
            .start_tracer(site, None, TracerFlags::DEFAULT | TracerFlags::DISPATCHER)
            .unwrap();

        assert!(transaction.set_name("WebTransaction/Uri/cart"));
        clock.advance_millis(3);
        root.finish(Outcome::Return);

        assert_eq!(transaction.record().unwrap().name, "WebTransaction/Uri/cart");
        let unscoped = services.aggregator.snapshot_unscoped();
        assert_eq!(unscoped["WebTransaction/Uri/cart"].call_count, 1);
        assert_eq!(unscoped["WebTransaction"].call_count, 1);
        assert_eq!(
            services.aggregator.snapshot("WebTransaction/Uri/cart")["Custom/Servlet/service"]
                .call_count,
            1
        );
    }
}
