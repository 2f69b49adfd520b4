// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-transaction request lists.
//!
//! When a transaction finishes its scoped metrics are matched against the request grammar
//! and the matches are merged into the rows already stored for that transaction name.
//! Before merging, each vendor (datastores) or host (externals) group is cross-checked
//! against the rollups recorded in the same finish cycle: `Datastore/{vendor}/all` and
//! `Datastore/{vendor}/allWeb|allOther` must count exactly the matched calls of that
//! vendor. A failing group is left out of the request list; the raw metrics are untouched.
//! A mismatch of the global `Datastore/all` rollup cannot be pinned on one vendor, so it
//! drops every datastore group of the transaction. Externals follow the same rule with
//! `External/{host}/all` and `External/all`.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, warn};

use crate::metrics::TransactionStats;
use crate::requests::grammar::{RequestKind, RequestRecord};

/// Request rows of every transaction name seen since the last harvest.
pub type RequestTable = HashMap<String, Vec<RequestRecord>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    Datastore,
    External,
}

impl Family {
    fn prefix(self) -> &'static str {
        match self {
            Family::Datastore => "Datastore",
            Family::External => "External",
        }
    }

    fn owns(self, record: &RequestRecord) -> bool {
        match self {
            Family::Datastore => record.is_datastore(),
            Family::External => record.is_external(),
        }
    }
}

fn web_suffix(is_web: bool) -> &'static str {
    if is_web {
        "allWeb"
    } else {
        "allOther"
    }
}

/// Groups of one family keyed by vendor or host. Values are the rows with their call counts.
type Groups = BTreeMap<String, Vec<RequestRecord>>;

fn collect_groups(family: Family, stats: &TransactionStats) -> Groups {
    let mut groups = Groups::new();
    for (name, metric) in stats.scoped() {
        let Some(mut record) = RequestRecord::parse(name.as_str()) else {
            continue;
        };
        if !family.owns(&record) || metric.call_count == 0 {
            continue;
        }
        record.merge_count = metric.call_count;
        groups
            .entry(record.group_key().to_string())
            .or_default()
            .push(record);
    }
    groups
}

fn group_total(records: &[RequestRecord]) -> u64 {
    records.iter().map(|record| record.merge_count).sum()
}

/// Applies the rollup cross-check and returns the surviving rows of one family.
fn validated(
    family: Family,
    transaction_name: &str,
    is_web: bool,
    stats: &TransactionStats,
) -> Vec<RequestRecord> {
    let groups = collect_groups(family, stats);
    if groups.is_empty() {
        return Vec::new();
    }

    let prefix = family.prefix();
    let suffix = web_suffix(is_web);
    let total: u64 = groups.values().map(|records| group_total(records)).sum();
    let all = stats.unscoped_call_count(&format!("{prefix}/all"));
    let all_web_or_other = stats.unscoped_call_count(&format!("{prefix}/{suffix}"));
    if all != total || all_web_or_other != total {
        warn!(
            "Dropping {} requests of {}: {}/all={} {}/{}={} but {} calls matched",
            prefix, transaction_name, prefix, all, prefix, suffix, all_web_or_other, total
        );
        return Vec::new();
    }

    let mut rows = Vec::new();
    for (key, records) in groups {
        let expected = group_total(&records);
        let group_all = stats.unscoped_call_count(&format!("{prefix}/{key}/all"));
        let consistent = match family {
            Family::Datastore => {
                group_all == expected
                    && stats.unscoped_call_count(&format!("{prefix}/{key}/{suffix}")) == expected
            }
            Family::External => group_all == expected,
        };
        if consistent {
            rows.extend(records);
        } else {
            warn!(
                "Dropping {} group {} of {}: rollups disagree with {} matched calls",
                prefix, key, transaction_name, expected
            );
        }
    }
    rows
}

/// Fills in the operation of external rows from segment names
/// `External/{host}/{library}/{operation}`.
fn attach_operations(rows: &mut [RequestRecord], segment_names: &[String]) {
    for row in rows {
        let RequestKind::External(external) = &mut row.kind else {
            continue;
        };
        if external.operation.is_some() || external.library.is_none() {
            continue;
        }
        let prefix = format!("{}/", row.metric_name);
        external.operation = segment_names
            .iter()
            .find_map(|name| name.strip_prefix(&prefix))
            .map(str::to_string);
    }
}

/// Structured request rows keyed by transaction name, retained until cleared or harvested.
#[derive(Default)]
pub struct RequestMerger {
    requests: Mutex<RequestTable>,
}

impl RequestMerger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Matches and merges the requests of one finished transaction.
    pub fn add_transaction(
        &self,
        transaction_name: &str,
        is_web: bool,
        stats: &TransactionStats,
        segment_names: &[String],
    ) {
        let mut rows = validated(Family::Datastore, transaction_name, is_web, stats);
        let mut externals = validated(Family::External, transaction_name, is_web, stats);
        attach_operations(&mut externals, segment_names);
        rows.append(&mut externals);
        if rows.is_empty() {
            return;
        }

        let mut requests = self.requests.lock().unwrap_or_else(PoisonError::into_inner);
        let stored = requests.entry(transaction_name.to_string()).or_default();
        for row in rows {
            match stored
                .iter_mut()
                .find(|existing| existing.metric_name == row.metric_name)
            {
                Some(existing) => {
                    existing.merge_count = existing.merge_count.saturating_add(row.merge_count);
                }
                None => stored.push(row),
            }
        }
        debug!(
            "Transaction {} now has {} request rows",
            transaction_name,
            stored.len()
        );
    }

    #[must_use]
    pub fn get_requests_for_transaction(&self, transaction_name: &str) -> Vec<RequestRecord> {
        let requests = self.requests.lock().unwrap_or_else(PoisonError::into_inner);
        requests
            .get(transaction_name)
            .cloned()
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Drains every stored row.
    pub fn harvest(&self) -> RequestTable {
        std::mem::take(&mut *self.requests.lock().unwrap_or_else(PoisonError::into_inner))
    }
}
