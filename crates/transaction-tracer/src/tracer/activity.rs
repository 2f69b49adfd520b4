// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Activities: the tracer stacks of one logical thread of execution.
//!
//! An activity owns every tracer started on it in an arena indexed by [`TracerId`]. Parent
//! links are arena indices, so moving the activity to another transaction only swaps the
//! owner pointer and never rewrites the tree. All tracer state is guarded by the activity
//! lock, which serializes a child subtracting from its parent with the parent's own
//! finish.
//!
//! ## Finish sequence
//!
//! 1. Duration (negative clock deltas clamp to 0)
//! 2. Exclusive duration settled into `[0, duration]`
//! 3. Stack trace, if slow enough and the branch has none yet
//! 4. Parent notified
//! 5. Metrics recorded into the transaction
//! 6. Invocation target released, tracer popped
//!
//! Every step after the first is isolated: its error is logged and the next step runs.

use std::any::Any;
use std::backtrace::Backtrace;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

use crate::error::TracerError;
use crate::signature::CallSiteId;
use crate::tracer::attributes::{AttributeValue, Attributes};
use crate::tracer::external::ExternalParameters;
use crate::tracer::flags::TracerFlags;
use crate::tracer::transaction::{ActivityResult, TraceSegment, Transaction};
use crate::tracer::{log_error, ErrorInfo, Outcome, Tracer};

static NEXT_ACTIVITY_ID: AtomicU64 = AtomicU64::new(1);

/// Index of a tracer inside its activity.
pub type TracerId = usize;

pub(crate) struct TracerData {
    pub(crate) metric_name: String,
    pub(crate) segment_name: Option<String>,
    pub(crate) flags: TracerFlags,
    pub(crate) parent: Option<TracerId>,
    pub(crate) start_nanos: u64,
    pub(crate) finish_nanos: Option<u64>,
    pub(crate) duration_nanos: u64,
    /// Negative until the tracer finishes: children subtract before the own duration is
    /// added.
    pub(crate) exclusive_nanos: i64,
    pub(crate) child_count: u32,
    pub(crate) is_parent: bool,
    /// This tracer or one of its descendants captured a stack trace.
    pub(crate) branch_has_stack_trace: bool,
    pub(crate) attributes: Attributes,
    pub(crate) external: Option<ExternalParameters>,
    pub(crate) guid: Option<String>,
    pub(crate) invocation_target: Option<Box<dyn Any + Send>>,
}

impl TracerData {
    pub(crate) fn is_finished(&self) -> bool {
        self.finish_nanos.is_some()
    }

    pub(crate) fn exclusive_duration_nanos(&self) -> u64 {
        u64::try_from(self.exclusive_nanos).unwrap_or(0)
    }
}

struct State {
    transaction: Option<Arc<Transaction>>,
    primary: bool,
    tracers: Vec<TracerData>,
    stack: Vec<TracerId>,
    root: Option<TracerId>,
    done: bool,
}

pub struct Activity {
    id: u64,
    state: Mutex<State>,
}

impl Activity {
    pub(crate) fn new(transaction: Arc<Transaction>, primary: bool) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_ACTIVITY_ID.fetch_add(1, Ordering::Relaxed),
            state: Mutex::new(State {
                transaction: Some(transaction),
                primary,
                tracers: Vec::new(),
                stack: Vec::new(),
                root: None,
                done: false,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Current owner, `None` once detached.
    #[must_use]
    pub fn transaction(&self) -> Option<Arc<Transaction>> {
        self.lock().transaction.clone()
    }

    /// True once the root tracer has finished.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.lock().done
    }

    /// Number of running tracers.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.lock().stack.len()
    }

    /// The tracer on top of the stack.
    #[must_use]
    pub fn last_tracer(self: &Arc<Self>) -> Option<Tracer> {
        let top = self.lock().stack.last().copied()?;
        Some(Tracer::new(Arc::clone(self), top))
    }

    /// Starts a tracer as a child of the last running tracer.
    ///
    /// `metric_name` defaults to `Custom/{class}/{method}` of the call site. Returns `None`
    /// when the activity is detached or done, or when the last tracer is a leaf.
    pub fn start_tracer(
        self: &Arc<Self>,
        call_site: CallSiteId,
        metric_name: Option<&str>,
        flags: TracerFlags,
    ) -> Option<Tracer> {
        let mut state = self.lock();
        let Some(transaction) = state.transaction.clone() else {
            log_error("starting tracer", &TracerError::NoTransaction);
            return None;
        };
        if state.done {
            debug!("Activity {} already finished, not starting a tracer", self.id);
            return None;
        }

        let parent = state.stack.last().copied();
        if let Some(parent) = parent {
            if state.tracers.get(parent).is_some_and(|p| p.flags.is_leaf()) {
                return None;
            }
        }

        let services = transaction.services();
        let mut flags = flags;
        if flags.is_segment() && !transaction.claim_segment() {
            debug!(
                "Segment limit of {} reached, tracer excluded from the trace",
                services.config.max_segments
            );
            flags = flags.without(TracerFlags::TRANSACTION_TRACER_SEGMENT);
        }

        let metric_name = match metric_name {
            Some(name) => name.to_string(),
            None => services
                .call_sites
                .get(call_site)
                .map(|site| site.default_metric_name())
                .unwrap_or_else(|| {
                    warn!("Unknown call site {:?}", call_site);
                    "Custom/Unknown".to_string()
                }),
        };

        let mut attributes = Attributes::default();
        if parent.is_none() {
            attributes.put_agent(
                "activity.id",
                AttributeValue::Int(i64::try_from(self.id).unwrap_or(i64::MAX)),
                false,
            );
        }

        let id = state.tracers.len();
        state.tracers.push(TracerData {
            metric_name,
            segment_name: None,
            flags,
            parent,
            start_nanos: services.clock.now_nanos(),
            finish_nanos: None,
            duration_nanos: 0,
            exclusive_nanos: 0,
            child_count: 0,
            is_parent: false,
            branch_has_stack_trace: false,
            attributes,
            external: None,
            guid: None,
            invocation_target: None,
        });
        state.stack.push(id);
        if parent.is_none() {
            state.root = Some(id);
        }
        Some(Tracer::new(Arc::clone(self), id))
    }

    /// Moves this activity to `transaction`.
    ///
    /// The swap happens under the activity lock, so a finishing tracer sees either the old
    /// or the new owner, never both. The old owner may finish as a result.
    pub fn reparent(&self, transaction: &Arc<Transaction>) -> bool {
        let previous = {
            let mut state = self.lock();
            if state.done {
                warn!("Cannot reparent finished activity {}", self.id);
                return false;
            }
            if state
                .transaction
                .as_ref()
                .is_some_and(|current| Arc::ptr_eq(current, transaction))
            {
                return true;
            }
            if !transaction.attach_activity() {
                warn!(
                    "Cannot reparent activity {} onto finished transaction {}",
                    self.id,
                    transaction.name()
                );
                return false;
            }
            state.primary = false;
            state.transaction.replace(Arc::clone(transaction))
        };

        debug!("Activity {} reparented to {}", self.id, transaction.guid());
        if let Some(previous) = previous {
            previous.activity_finished(ActivityResult::released());
        }
        true
    }

    /// Drops the owning transaction. Tracers finishing afterwards have no side effects.
    pub fn detach(&self) {
        let (previous, done) = {
            let mut state = self.lock();
            (state.transaction.take(), state.done)
        };
        if let (Some(previous), false) = (previous, done) {
            debug!("Activity {} detached from {}", self.id, previous.guid());
            previous.activity_finished(ActivityResult::released());
        }
    }

    pub(crate) fn with_tracer<R>(&self, id: TracerId, f: impl FnOnce(&TracerData) -> R) -> Option<R> {
        self.lock().tracers.get(id).map(f)
    }

    /// Mutates a running tracer.
    pub(crate) fn update_tracer<R>(
        &self,
        id: TracerId,
        f: impl FnOnce(&mut TracerData, &Transaction) -> Result<R, TracerError>,
    ) -> Result<R, TracerError> {
        let mut state = self.lock();
        let transaction = state
            .transaction
            .clone()
            .ok_or(TracerError::NoTransaction)?;
        let data = state
            .tracers
            .get_mut(id)
            .ok_or(TracerError::UnknownTracer(id))?;
        if data.is_finished() {
            return Err(TracerError::AlreadyFinished(id));
        }
        f(data, transaction.as_ref())
    }

    /// Returns the GUID of a tracer, generating it on first request.
    pub(crate) fn tracer_guid(&self, id: TracerId) -> Option<String> {
        let mut state = self.lock();
        let transaction = state.transaction.clone();
        let data = state.tracers.get_mut(id)?;
        if let Some(guid) = &data.guid {
            return Some(guid.clone());
        }
        let guid = match transaction {
            Some(transaction) => transaction.services().guids.generate(),
            None => crate::clock::GuidSource::generate(&crate::clock::RandomGuidSource),
        };
        data.guid = Some(guid.clone());
        Some(guid)
    }

    pub(crate) fn finish_tracer(&self, id: TracerId, outcome: Outcome) -> Result<(), TracerError> {
        let completed = {
            let mut state = self.lock();
            let transaction = state
                .transaction
                .clone()
                .ok_or(TracerError::NoTransaction)?;
            let services = Arc::clone(transaction.services());
            let now = services.clock.now_nanos();
            let threshold = u64::try_from(services.config.stack_trace_threshold.as_nanos())
                .unwrap_or(u64::MAX);

            {
                let data = state
                    .tracers
                    .get_mut(id)
                    .ok_or(TracerError::UnknownTracer(id))?;
                if data.is_finished() {
                    return Err(TracerError::AlreadyFinished(id));
                }

                data.finish_nanos = Some(now);
                data.duration_nanos = now.checked_sub(data.start_nanos).unwrap_or_else(|| {
                    warn!(
                        "Negative duration for tracer {}, clamping to 0",
                        data.metric_name
                    );
                    0
                });
                settle_exclusive(data);

                if let Err(e) = capture_stack(data, &transaction, threshold) {
                    log_error("capturing stack trace", &e);
                }
                if let Outcome::Error(error) = outcome {
                    record_error(data, &transaction, error);
                }
            }

            if let Err(e) = notify_parent(&mut state.tracers, id) {
                log_error("notifying parent tracer", &e);
            }

            if let Some(data) = state.tracers.get_mut(id) {
                if let Err(e) = record_metrics(data, &transaction) {
                    log_error("recording metrics", &e);
                }
                data.invocation_target = None;
            }

            if let Err(e) = pop(&mut state.stack, id) {
                log_error("popping tracer", &e);
            }

            if state.root == Some(id) {
                state.done = true;
                let tree = build_tree(&state.tracers, id, transaction.start_nanos(), !state.primary);
                let root_duration_nanos = state.tracers.get(id).map(|root| root.duration_nanos);
                Some((
                    transaction,
                    ActivityResult {
                        primary: state.primary,
                        root_duration_nanos,
                        tree: Some(tree),
                    },
                ))
            } else {
                None
            }
        };

        if let Some((transaction, result)) = completed {
            debug!("Activity {} finished", self.id);
            transaction.activity_finished(result);
        }
        Ok(())
    }
}

fn settle_exclusive(data: &mut TracerData) {
    let duration = i64::try_from(data.duration_nanos).unwrap_or(i64::MAX);
    let exclusive = data.exclusive_nanos.saturating_add(duration);
    data.exclusive_nanos = if exclusive > duration {
        warn!(
            "Exclusive duration {} exceeds duration {} for tracer {}, resetting",
            exclusive, duration, data.metric_name
        );
        duration
    } else if exclusive < 0 {
        debug!(
            "Children of tracer {} outlasted it by {}ns, exclusive duration is 0",
            data.metric_name, -exclusive
        );
        0
    } else {
        exclusive
    };
}

fn capture_stack(
    data: &mut TracerData,
    transaction: &Transaction,
    threshold_nanos: u64,
) -> Result<(), TracerError> {
    if !data.flags.is_segment()
        || data.branch_has_stack_trace
        || data.duration_nanos < threshold_nanos
    {
        return Ok(());
    }
    if !transaction.claim_stack_trace() {
        return Err(TracerError::StackTraceBudgetExhausted);
    }
    let backtrace = Backtrace::force_capture().to_string();
    data.attributes
        .put_agent("backtrace", AttributeValue::String(backtrace), false);
    data.branch_has_stack_trace = true;
    Ok(())
}

fn record_error(data: &mut TracerData, transaction: &Transaction, error: ErrorInfo) {
    data.attributes
        .put_agent("error.class", error.class.as_str().into(), true);
    data.attributes
        .put_agent("error.message", error.message.as_str().into(), true);
    transaction.notice_error(error);
}

fn notify_parent(tracers: &mut [TracerData], id: TracerId) -> Result<(), TracerError> {
    let child = tracers.get(id).ok_or(TracerError::UnknownTracer(id))?;
    let Some(parent_id) = child.parent else {
        return Ok(());
    };
    let child_flags = child.flags;
    let child_duration = i64::try_from(child.duration_nanos).unwrap_or(i64::MAX);
    let branch_has_stack_trace = child.branch_has_stack_trace;

    let parent = tracers
        .get_mut(parent_id)
        .ok_or(TracerError::UnknownTracer(parent_id))?;
    if parent.is_finished() {
        warn!(
            "Tracer {} finished after its parent {}, parent left unchanged",
            id, parent.metric_name
        );
        return Ok(());
    }

    if branch_has_stack_trace {
        parent.branch_has_stack_trace = true;
    }
    if child_flags.is_metric_producer() {
        parent.child_count += 1;
    }
    if child_flags.is_metric_producer()
        && child_flags.is_segment()
        && parent.flags.is_metric_producer()
        && parent.flags.is_segment()
    {
        parent.exclusive_nanos = parent.exclusive_nanos.saturating_sub(child_duration);
        parent.is_parent = true;
    }
    Ok(())
}

fn record_metrics(data: &mut TracerData, transaction: &Transaction) -> Result<(), TracerError> {
    let services = transaction.services();
    let external = data
        .external
        .as_ref()
        .map(|external| external.metrics(transaction.is_web(), &services.config.host_name));

    let mut unscoped = Vec::new();
    if let Some(external) = external {
        if let Some(scoped) = external.scoped {
            data.metric_name = scoped;
        }
        data.segment_name = external.segment_name;
        for (key, value) in external.agent_attributes {
            data.attributes.put_agent(key, value, true);
        }
        unscoped = external.unscoped;
    }

    if !data.flags.is_metric_producer() {
        return Ok(());
    }
    transaction.record_tracer_metrics(
        &data.metric_name,
        data.duration_nanos,
        data.exclusive_duration_nanos(),
        &unscoped,
        data.segment_name.as_deref(),
    )
}

fn pop(stack: &mut Vec<TracerId>, id: TracerId) -> Result<(), TracerError> {
    match stack.last().copied() {
        Some(top) if top == id => {
            stack.pop();
            Ok(())
        }
        found => {
            stack.retain(|tracer| *tracer != id);
            Err(TracerError::StackInconsistent {
                expected: Some(id),
                found,
            })
        }
    }
}

fn build_tree(
    tracers: &[TracerData],
    root: TracerId,
    origin_nanos: u64,
    is_async: bool,
) -> TraceSegment {
    let mut children: Vec<Vec<TracerId>> = vec![Vec::new(); tracers.len()];
    for (id, tracer) in tracers.iter().enumerate() {
        if let Some(parent) = tracer.parent {
            if tracer.is_finished() {
                children[parent].push(id);
            }
        }
    }
    to_segment(tracers, &children, root, origin_nanos, is_async)
}

fn to_segment(
    tracers: &[TracerData],
    children: &[Vec<TracerId>],
    id: TracerId,
    origin_nanos: u64,
    is_async: bool,
) -> TraceSegment {
    let data = &tracers[id];
    TraceSegment {
        name: data
            .segment_name
            .clone()
            .unwrap_or_else(|| data.metric_name.clone()),
        start_offset_nanos: data.start_nanos.saturating_sub(origin_nanos),
        duration_nanos: data.duration_nanos,
        exclusive_duration_nanos: data.exclusive_duration_nanos(),
        call_count: 1,
        guid: data.guid.clone(),
        is_async: is_async || data.flags.is_async(),
        attributes: data.attributes.clone(),
        children: segment_children(tracers, children, id, origin_nanos, is_async),
    }
}

/// Children of `id` in the trace tree. Tracers outside the tree are skipped and their own
/// children lifted into their place.
fn segment_children(
    tracers: &[TracerData],
    children: &[Vec<TracerId>],
    id: TracerId,
    origin_nanos: u64,
    is_async: bool,
) -> Vec<TraceSegment> {
    let mut segments = Vec::new();
    for &child in &children[id] {
        if tracers[child].flags.is_segment() {
            segments.push(to_segment(tracers, children, child, origin_nanos, is_async));
        } else {
            segments.extend(segment_children(
                tracers,
                children,
                child,
                origin_nanos,
                is_async,
            ));
        }
    }
    segments
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::TracerConfig;
    use crate::signature::CallSite;
    use crate::TracerServices;
    use tracing_test::traced_test;

    struct Fixture {
        clock: Arc<ManualClock>,
        services: Arc<TracerServices>,
        site: CallSiteId,
    }

    fn fixture(config: TracerConfig) -> Fixture {
        let clock = Arc::new(ManualClock::new(1_000));
        let services = TracerServices::with_clock(config, clock.clone()).unwrap();
        let site = services.call_sites.intern(CallSite::new("Shop", "handle", "()V"));
        Fixture {
            clock,
            services,
            site,
        }
    }

    #[test]
    fn test_exclusive_duration_subtracts_children() {
        let f = fixture(TracerConfig::default());
        let transaction = Transaction::new(&f.services, "WebTransaction/Uri/cart", true);
        let activity = transaction.start_activity().unwrap();

        let root = activity
            .start_tracer(f.site, Some("Root"), TracerFlags::DEFAULT)
            .unwrap();
        f.clock.advance_nanos(100);
        let child = activity
            .start_tracer(f.site, Some("Child"), TracerFlags::DEFAULT)
            .unwrap();
        f.clock.advance_nanos(300);
        child.finish(Outcome::Return);
        let hidden = activity
            .start_tracer(f.site, Some("Hidden"), TracerFlags::GENERATE_SCOPED_METRIC)
            .unwrap();
        f.clock.advance_nanos(50);
        hidden.finish(Outcome::Return);
        f.clock.advance_nanos(50);
        root.finish(Outcome::Return);

        assert_eq!(child.duration_nanos(), Some(300));
        assert_eq!(child.exclusive_duration_nanos(), Some(300));
        assert_eq!(root.duration_nanos(), Some(500));
        // Only the segment child is subtracted.
        assert_eq!(root.exclusive_duration_nanos(), Some(200));
        assert_eq!(root.child_count(), Some(2));
        assert!(activity.is_done());
        assert_eq!(activity.depth(), 0);

        let trace = transaction.record().unwrap().trace.clone().unwrap();
        assert_eq!(trace.name, "Root");
        assert_eq!(trace.children.len(), 1);
        assert_eq!(trace.children[0].name, "Child");
        assert_eq!(trace.children[0].start_offset_nanos, 100);
    }

    #[test]
    #[traced_test]
    fn test_negative_duration_is_clamped() {
        let f = fixture(TracerConfig::default());
        let transaction = Transaction::new(&f.services, "WebTransaction/Uri/clock", true);
        let activity = transaction.start_activity().unwrap();
        let root = activity
            .start_tracer(f.site, Some("Root"), TracerFlags::DEFAULT)
            .unwrap();

        f.clock.set_nanos(10);
        root.finish(Outcome::Return);

        assert_eq!(root.duration_nanos(), Some(0));
        assert_eq!(root.exclusive_duration_nanos(), Some(0));
        assert!(logs_contain("Negative duration for tracer Root"));
    }

    #[test]
    fn test_finish_is_idempotent() {
        let f = fixture(TracerConfig::default());
        let transaction = Transaction::new(&f.services, "WebTransaction/Uri/twice", true);
        let activity = transaction.start_activity().unwrap();
        let root = activity
            .start_tracer(f.site, Some("Root"), TracerFlags::DEFAULT)
            .unwrap();
        f.clock.advance_nanos(40);
        let child = activity
            .start_tracer(f.site, Some("Child"), TracerFlags::DEFAULT)
            .unwrap();
        f.clock.advance_nanos(40);
        child.finish(Outcome::Return);
        child.finish(Outcome::Return);
        f.clock.advance_nanos(40);
        root.finish(Outcome::Return);
        root.finish(Outcome::Return);

        assert_eq!(root.exclusive_duration_nanos(), Some(80));
        assert_eq!(root.child_count(), Some(1));
        let scoped = f.services.aggregator.snapshot("WebTransaction/Uri/twice");
        assert_eq!(scoped["Child"].call_count, 1);
        assert_eq!(scoped["Root"].call_count, 1);
    }

    #[test]
    fn test_leaf_parent_blocks_children() {
        let f = fixture(TracerConfig::default());
        let transaction = Transaction::new(&f.services, "OtherTransaction/Job/leaf", false);
        let activity = transaction.start_activity().unwrap();
        let _root = activity
            .start_tracer(f.site, Some("Root"), TracerFlags::DEFAULT)
            .unwrap();
        let leaf = activity
            .start_tracer(f.site, Some("Leaf"), TracerFlags::DEFAULT | TracerFlags::LEAF)
            .unwrap();

        assert!(activity
            .start_tracer(f.site, Some("Nested"), TracerFlags::DEFAULT)
            .is_none());
        leaf.finish(Outcome::Return);
        assert!(activity
            .start_tracer(f.site, Some("Sibling"), TracerFlags::DEFAULT)
            .is_some());
    }

    #[test]
    fn test_segment_limit_clears_segment_flag() {
        let f = fixture(TracerConfig {
            max_segments: 2,
            ..Default::default()
        });
        let transaction = Transaction::new(&f.services, "OtherTransaction/Job/big", false);
        let activity = transaction.start_activity().unwrap();
        let root = activity
            .start_tracer(f.site, Some("Root"), TracerFlags::DEFAULT)
            .unwrap();
        for i in 0..3 {
            let child = activity
                .start_tracer(f.site, Some(&format!("Child{i}")), TracerFlags::DEFAULT)
                .unwrap();
            f.clock.advance_nanos(10);
            child.finish(Outcome::Return);
        }
        root.finish(Outcome::Return);

        let trace = transaction.record().unwrap().trace.clone().unwrap();
        assert_eq!(trace.segment_count(), 2);
        // Timing data is kept for the tracer excluded from the tree.
        let scoped = f.services.aggregator.snapshot("OtherTransaction/Job/big");
        assert_eq!(scoped["Child2"].call_count, 1);
        // Only the child in the tree was subtracted.
        assert_eq!(root.exclusive_duration_nanos(), Some(20));
    }

    #[test]
    fn test_stack_trace_captured_once_per_branch() {
        let f = fixture(TracerConfig {
            stack_trace_threshold: std::time::Duration::from_nanos(100),
            max_stack_traces: 1,
            ..Default::default()
        });
        let transaction = Transaction::new(&f.services, "WebTransaction/Uri/slow", true);
        let activity = transaction.start_activity().unwrap();
        let root = activity
            .start_tracer(f.site, Some("Root"), TracerFlags::DEFAULT)
            .unwrap();
        let slow = activity
            .start_tracer(f.site, Some("Slow"), TracerFlags::DEFAULT)
            .unwrap();
        f.clock.advance_nanos(200);
        slow.finish(Outcome::Return);
        let other = activity
            .start_tracer(f.site, Some("AlsoSlow"), TracerFlags::DEFAULT)
            .unwrap();
        f.clock.advance_nanos(200);
        other.finish(Outcome::Return);
        root.finish(Outcome::Return);

        assert!(slow.has_stack_trace());
        // Budget of one is spent.
        assert!(!other.has_stack_trace());
        // The branch already has one.
        assert!(!root.has_stack_trace());
    }

    #[test]
    #[traced_test]
    fn test_detached_activity_finishes_without_side_effects() {
        let f = fixture(TracerConfig::default());
        let transaction = Transaction::new(&f.services, "WebTransaction/Uri/gone", true);
        let activity = transaction.start_activity().unwrap();
        let root = activity
            .start_tracer(f.site, Some("Root"), TracerFlags::DEFAULT)
            .unwrap();

        activity.detach();
        assert!(transaction.is_finished());
        f.clock.advance_nanos(10);
        root.finish(Outcome::Return);

        assert!(!root.is_finished());
        assert!(logs_contain("Tracer is not attached to a transaction"));
        assert!(f
            .services
            .aggregator
            .snapshot("WebTransaction/Uri/gone")
            .get("Root")
            .is_none());
    }

    #[test]
    fn test_reparent_moves_metrics_to_new_owner() {
        let f = fixture(TracerConfig::default());
        let first = Transaction::new(&f.services, "OtherTransaction/Job/first", false);
        let second = Transaction::new(&f.services, "OtherTransaction/Job/second", false);
        let second_activity = second.start_activity().unwrap();
        let second_root = second_activity
            .start_tracer(f.site, Some("SecondRoot"), TracerFlags::DEFAULT)
            .unwrap();

        let activity = first.start_activity().unwrap();
        let root = activity
            .start_tracer(f.site, Some("Callback"), TracerFlags::DEFAULT)
            .unwrap();
        let child = activity
            .start_tracer(f.site, Some("Work"), TracerFlags::DEFAULT)
            .unwrap();

        assert!(activity.reparent(&second));
        assert!(first.is_finished());

        f.clock.advance_nanos(30);
        child.finish(Outcome::Return);
        f.clock.advance_nanos(10);
        root.finish(Outcome::Return);
        // Parent links survived the move.
        assert_eq!(root.exclusive_duration_nanos(), Some(10));
        assert!(!second.is_finished());

        second_root.finish(Outcome::Return);
        assert!(second.is_finished());
        let scoped = f.services.aggregator.snapshot("OtherTransaction/Job/second");
        assert_eq!(scoped["Work"].call_count, 1);
        assert_eq!(scoped["Callback"].call_count, 1);
        assert!(f
            .services
            .aggregator
            .snapshot("OtherTransaction/Job/first")
            .is_empty());

        let trace = second.record().unwrap().trace.clone().unwrap();
        assert_eq!(trace.name, "SecondRoot");
        assert_eq!(trace.children[0].name, "Callback");
        assert!(trace.children[0].is_async);
    }

    #[test]
    #[traced_test]
    fn test_out_of_order_finish_is_logged_and_recovered() {
        let f = fixture(TracerConfig::default());
        let transaction = Transaction::new(&f.services, "WebTransaction/Uri/order", true);
        let activity = transaction.start_activity().unwrap();
        let root = activity
            .start_tracer(f.site, Some("Root"), TracerFlags::DEFAULT)
            .unwrap();
        let a = activity
            .start_tracer(f.site, Some("A"), TracerFlags::DEFAULT)
            .unwrap();
        let b = activity
            .start_tracer(f.site, Some("B"), TracerFlags::DEFAULT)
            .unwrap();

        a.finish(Outcome::Return);
        assert!(logs_contain("Tracer stack inconsistent"));
        assert_eq!(activity.depth(), 2);
        b.finish(Outcome::Return);
        root.finish(Outcome::Return);
        assert!(transaction.is_finished());
    }

    #[test]
    fn test_error_outcome_is_recorded_once() {
        let f = fixture(TracerConfig::default());
        let transaction = Transaction::new(&f.services, "WebTransaction/Uri/fail", true);
        let activity = transaction.start_activity().unwrap();
        let root = activity
            .start_tracer(f.site, Some("Root"), TracerFlags::DEFAULT)
            .unwrap();
        let child = activity
            .start_tracer(f.site, Some("Child"), TracerFlags::DEFAULT)
            .unwrap();
        f.clock.advance_nanos(10);
        child.finish(Outcome::Error(ErrorInfo::new("SqlError", "deadlock")));
        f.clock.advance_nanos(10);
        root.finish(Outcome::Error(ErrorInfo::new("HttpError", "500")));

        // Accounting is identical for error completions.
        assert_eq!(root.exclusive_duration_nanos(), Some(10));
        let record = transaction.record().unwrap();
        assert_eq!(record.error.as_ref().unwrap().class, "SqlError");
    }
}
