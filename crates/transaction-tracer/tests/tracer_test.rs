// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use proptest::prelude::*;
use std::sync::Arc;
use std::thread;
use transaction_tracer::clock::ManualClock;
use transaction_tracer::requests::RequestKind;
use transaction_tracer::signature::{CallSite, CallSiteId};
use transaction_tracer::tracer::external::{DatastoreParameters, HttpParameters};
use transaction_tracer::tracer::flags::TracerFlags;
use transaction_tracer::{
    ExternalParameters, Outcome, Tracer, TracerConfig, TracerServices, Transaction,
};

fn services(clock: &Arc<ManualClock>) -> (Arc<TracerServices>, CallSiteId) {
    let services = TracerServices::with_clock(TracerConfig::default(), clock.clone())
        .expect("default config is valid");
    let site = services
        .call_sites
        .intern(CallSite::new("com.shop.OrderController", "list", "()V"));
    (services, site)
}

fn check_exclusive(tracer: &Tracer, children_nanos: u64) {
    let duration = tracer.duration_nanos().expect("finished");
    let exclusive = tracer.exclusive_duration_nanos().expect("finished");
    assert!(exclusive <= duration);
    assert_eq!(exclusive, duration - children_nanos);
}

proptest! {
    #[test]
    fn exclusive_durations_partition_the_root(
        ops in prop::collection::vec((any::<bool>(), 1u64..1_000), 1..60)
    ) {
        let clock = Arc::new(ManualClock::new(0));
        let (services, site) = services(&clock);
        let transaction = Transaction::new(&services, "WebTransaction/Uri/tree", true);
        let activity = transaction.start_activity().expect("new transaction");
        let root = activity
            .start_tracer(site, Some("Root"), TracerFlags::DEFAULT)
            .expect("root");

        let mut stack: Vec<(Tracer, u64)> = vec![(root.clone(), 0)];
        for (push, advance) in ops {
            clock.advance_nanos(advance);
            if push {
                let child = activity
                    .start_tracer(site, Some("Custom/node"), TracerFlags::DEFAULT)
                    .expect("child");
                stack.push((child, 0));
            } else if stack.len() > 1 {
                let (tracer, children_nanos) = stack.pop().expect("non-empty");
                tracer.finish(Outcome::Return);
                check_exclusive(&tracer, children_nanos);
                let parent = stack.last_mut().expect("root stays");
                parent.1 += tracer.duration_nanos().expect("finished");
            }
        }
        while let Some((tracer, children_nanos)) = stack.pop() {
            clock.advance_nanos(1);
            tracer.finish(Outcome::Return);
            check_exclusive(&tracer, children_nanos);
            if let Some(parent) = stack.last_mut() {
                parent.1 += tracer.duration_nanos().expect("finished");
            }
        }

        prop_assert!(transaction.is_finished());
        let scoped = services.aggregator.snapshot("WebTransaction/Uri/tree");
        let exclusive_total: u64 = scoped
            .values()
            .map(|stats| stats.total_exclusive_time_nanos)
            .sum();
        prop_assert_eq!(exclusive_total, root.duration_nanos().expect("finished"));
    }
}

fn order_request(services: &Arc<TracerServices>, site: CallSiteId, clock: &ManualClock) {
    let transaction = Transaction::new(services, "WebTransaction/Uri/orders", true);
    let activity = transaction.start_activity().expect("new transaction");
    let root = activity
        .start_tracer(site, None, TracerFlags::DEFAULT | TracerFlags::DISPATCHER)
        .expect("root");

    let query = activity
        .start_tracer(site, None, TracerFlags::DEFAULT | TracerFlags::LEAF)
        .expect("query");
    query.report_as_external(ExternalParameters::Datastore(DatastoreParameters {
        vendor: "Postgres".to_string(),
        collection: Some("orders".to_string()),
        operation: "select".to_string(),
        ..Default::default()
    }));
    clock.advance_millis(4);
    query.finish(Outcome::Return);

    let call = activity
        .start_tracer(site, None, TracerFlags::DEFAULT | TracerFlags::LEAF)
        .expect("call");
    call.report_as_external(ExternalParameters::Http(HttpParameters {
        library: "reqwest".to_string(),
        uri: "https://inventory.internal/stock".to_string(),
        procedure: "GET".to_string(),
        cross_process: None,
    }));
    clock.advance_millis(6);
    call.finish(Outcome::Return);

    clock.advance_millis(1);
    root.finish(Outcome::Return);
    assert!(transaction.is_finished());
}

#[test]
fn requests_merge_across_transactions() {
    let clock = Arc::new(ManualClock::new(0));
    let (services, site) = services(&clock);
    order_request(&services, site, &clock);
    order_request(&services, site, &clock);

    let mut rows = services
        .requests
        .get_requests_for_transaction("WebTransaction/Uri/orders");
    rows.sort_by(|a, b| a.metric_name.cmp(&b.metric_name));
    assert_eq!(rows.len(), 2);

    assert_eq!(rows[0].metric_name, "Datastore/statement/Postgres/orders/select");
    assert_eq!(rows[0].merge_count, 2);

    assert_eq!(rows[1].metric_name, "External/inventory.internal/reqwest");
    assert_eq!(rows[1].merge_count, 2);
    match &rows[1].kind {
        RequestKind::External(external) => {
            assert_eq!(external.host, "inventory.internal");
            assert_eq!(external.operation.as_deref(), Some("GET"));
        }
        RequestKind::Datastore(_) => panic!("expected an external row"),
    }

    let unscoped = services.aggregator.snapshot_unscoped();
    assert_eq!(unscoped["Datastore/all"].call_count, 2);
    assert_eq!(unscoped["Datastore/Postgres/allWeb"].call_count, 2);
    assert_eq!(unscoped["External/inventory.internal/all"].call_count, 2);
    assert_eq!(unscoped["WebTransaction"].call_count, 2);
}

#[test]
fn concurrent_activities_finish_the_transaction_once() {
    const WORKERS: usize = 8;
    let clock = Arc::new(ManualClock::new(0));
    let (services, site) = services(&clock);
    let transaction = Transaction::new(&services, "OtherTransaction/Job/fanout", false);
    let primary = transaction.start_activity().expect("new transaction");
    let root = primary
        .start_tracer(site, Some("OtherTransaction/Job/fanout"), TracerFlags::DEFAULT)
        .expect("root");

    let handles: Vec<_> = (0..WORKERS)
        .map(|i| {
            let activity = transaction.start_activity().expect("transaction is running");
            thread::spawn(move || {
                let tracer = activity
                    .start_tracer(site, Some("Custom/worker"), TracerFlags::DEFAULT)
                    .expect("worker root");
                tracer.set_attribute("worker", i64::try_from(i).unwrap_or_default(), true);
                tracer.finish(Outcome::Return);
            })
        })
        .collect();
    clock.advance_millis(2);
    root.finish(Outcome::Return);
    for handle in handles {
        handle.join().expect("worker thread");
    }

    assert!(transaction.is_finished());
    let record = transaction.record().expect("dispatched");
    let trace = record.trace.as_ref().expect("trace tree");
    assert_eq!(trace.children.len(), WORKERS);
    assert!(trace.children.iter().all(|child| child.is_async));
    let scoped = services.aggregator.snapshot("OtherTransaction/Job/fanout");
    assert_eq!(scoped["Custom/worker"].call_count, WORKERS as u64);
    assert_eq!(
        services.aggregator.snapshot_unscoped()["OtherTransaction/all"].call_count,
        1
    );
}

#[test]
fn reparented_activity_reports_to_new_owner() {
    let clock = Arc::new(ManualClock::new(0));
    let (services, site) = services(&clock);
    let origin = Transaction::new(&services, "OtherTransaction/Job/origin", false);
    let target = Transaction::new(&services, "OtherTransaction/Job/target", false);
    let target_activity = target.start_activity().expect("target");
    let target_root = target_activity
        .start_tracer(site, Some("TargetRoot"), TracerFlags::DEFAULT)
        .expect("target root");

    let activity = origin.start_activity().expect("origin");
    let callback = activity
        .start_tracer(site, Some("Custom/callback"), TracerFlags::DEFAULT)
        .expect("callback");
    assert!(activity.reparent(&target));
    assert!(origin.is_finished());
    assert!(origin.start_activity().is_none());

    clock.advance_millis(1);
    callback.finish(Outcome::Return);
    target_root.finish(Outcome::Return);

    assert!(target.is_finished());
    assert!(services
        .aggregator
        .snapshot("OtherTransaction/Job/target")
        .contains_key("Custom/callback"));
    // A finished activity cannot move again.
    assert!(!activity.reparent(&origin));
}
