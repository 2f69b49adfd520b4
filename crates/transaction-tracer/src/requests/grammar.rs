// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Canonical metric-name grammar.
//!
//! The names recorded for datastore and external calls follow a small closed grammar:
//!
//! ```text
//! Datastore/statement/<vendor>/<table>/<operation>
//! Datastore/operation/<vendor>/<operation>
//! External/<host>/<library>[/<operation>]
//! ExternalTransaction/<host>/<transaction name>
//! ```
//!
//! Anything else is not a request. Rollups such as `External/<host>/all` are rejected too.

use serde::Serialize;

use patterns::{DATASTORE_OPERATION, DATASTORE_STATEMENT, EXTERNAL, EXTERNAL_TRANSACTION};

#[allow(clippy::expect_used)]
mod patterns {
    use lazy_static::lazy_static;
    use regex::Regex;

    lazy_static! {
        pub(super) static ref DATASTORE_STATEMENT: Regex =
            Regex::new(r"^Datastore/statement/([^/]+)/([^/]+)/([^/]+)$")
                .expect("failed creating regex");
        pub(super) static ref DATASTORE_OPERATION: Regex =
            Regex::new(r"^Datastore/operation/([^/]+)/([^/]+)$").expect("failed creating regex");
        pub(super) static ref EXTERNAL: Regex =
            Regex::new(r"^External/([^/]+)/([^/]+)(?:/(.+))?$").expect("failed creating regex");
        pub(super) static ref EXTERNAL_TRANSACTION: Regex =
            Regex::new(r"^ExternalTransaction/([^/]+)/(.+)$").expect("failed creating regex");
    }
}

/// Rollup suffix shared by every `*/all` metric.
const ROLLUP_SUFFIX: &str = "all";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatastoreRequest {
    pub vendor: String,
    pub table: Option<String>,
    pub operation: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExternalRequest {
    pub host: String,
    /// Client library, absent for cross-process calls.
    pub library: Option<String>,
    pub operation: Option<String>,
    /// Name of the remote transaction for cross-process calls.
    pub transaction_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RequestKind {
    Datastore(DatastoreRequest),
    External(ExternalRequest),
}

/// One displayed row of the request list of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestRecord {
    /// Canonical metric name, also the merge key.
    pub metric_name: String,
    #[serde(flatten)]
    pub kind: RequestKind,
    /// Number of calls collapsed into this row.
    pub merge_count: u64,
}

impl RequestRecord {
    /// Matches `metric_name` against the grammar. Returns `None` for anything else.
    #[must_use]
    pub fn parse(metric_name: &str) -> Option<Self> {
        let kind = parse_datastore(metric_name)
            .map(RequestKind::Datastore)
            .or_else(|| parse_external(metric_name).map(RequestKind::External))?;
        Some(Self {
            metric_name: metric_name.to_string(),
            kind,
            merge_count: 1,
        })
    }

    /// Vendor for datastore rows, host for external rows.
    #[must_use]
    pub fn group_key(&self) -> &str {
        match &self.kind {
            RequestKind::Datastore(datastore) => &datastore.vendor,
            RequestKind::External(external) => &external.host,
        }
    }

    #[must_use]
    pub fn is_datastore(&self) -> bool {
        matches!(self.kind, RequestKind::Datastore(_))
    }

    #[must_use]
    pub fn is_external(&self) -> bool {
        matches!(self.kind, RequestKind::External(_))
    }
}

fn parse_datastore(metric_name: &str) -> Option<DatastoreRequest> {
    if let Some(captures) = DATASTORE_STATEMENT.captures(metric_name) {
        return Some(DatastoreRequest {
            vendor: captures[1].to_string(),
            table: Some(captures[2].to_string()),
            operation: captures[3].to_string(),
        });
    }
    DATASTORE_OPERATION
        .captures(metric_name)
        .map(|captures| DatastoreRequest {
            vendor: captures[1].to_string(),
            table: None,
            operation: captures[2].to_string(),
        })
}

fn parse_external(metric_name: &str) -> Option<ExternalRequest> {
    if let Some(captures) = EXTERNAL_TRANSACTION.captures(metric_name) {
        return Some(ExternalRequest {
            host: captures[1].to_string(),
            library: None,
            operation: None,
            transaction_name: Some(captures[2].to_string()),
        });
    }
    let captures = EXTERNAL.captures(metric_name)?;
    if &captures[2] == ROLLUP_SUFFIX {
        return None;
    }
    Some(ExternalRequest {
        host: captures[1].to_string(),
        library: Some(captures[2].to_string()),
        operation: captures.get(3).map(|m| m.as_str().to_string()),
        transaction_name: None,
    })
}
