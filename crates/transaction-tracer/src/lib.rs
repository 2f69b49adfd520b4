// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # Transaction Tracer
//!
//! The transaction-tracing and metric-aggregation core of an application performance
//! monitoring agent.
//!
//! ## Overview
//!
//! For every unit of work intercepted by the embedding instrumentation layer (an HTTP
//! request, a background job, a datastore or outbound call) this crate:
//! - times each call frame and attributes *exclusive* time to the right frame, even when
//!   frames finish on other threads or their activity is reparented,
//! - rolls repeated external and datastore calls up into structured request records,
//! - aggregates scoped (per transaction) and unscoped (application wide) response-time
//!   metrics,
//! - offers every finished transaction to a set of trace samplers that decide which
//!   traces are worth keeping, within a fixed memory budget.
//!
//! ## Architecture
//!
//! - [`clock`]: monotonic timestamps and GUID generation
//! - [`signature`]: append-only call-site interning
//! - [`tracer`]: tracers, activities (tracer stacks) and transactions
//! - [`metrics`]: response-time stats and the metric aggregator
//! - [`requests`]: metric-name grammar and the per-transaction request merger
//! - [`samplers`]: the four transaction trace samplers and the trace service
//! - [`harvest`]: periodic drain of samplers, metrics and requests
//! - [`services`]: the dependency bundle handed to every transaction
//!
//! ```text
//! instrumentation → Activity::start_tracer → Tracer::finish ─┐
//!                                                            ↓
//!                           Transaction (last activity done) → TransactionRecord
//!                                                            ↓
//!                   MetricAggregator + RequestMerger + TransactionTraceService
//!                                                            ↓
//!                                     Harvester → HarvestPayload → transport
//! ```
//!
//! Nothing in this crate is allowed to fail the monitored application: public entry
//! points log and swallow every internal error.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]

/// Monotonic clock and GUID sources
pub mod clock;

/// Injected configuration and its validation
pub mod config;

/// Error types used inside the crate
pub mod error;

/// Periodic harvest of samplers, metrics and request records
pub mod harvest;

/// Logging infrastructure and tracing setup
pub mod logger;

/// Response-time statistics and the scoped/unscoped metric aggregator
pub mod metrics;

/// Canonical metric-name grammar and request merging
pub mod requests;

/// Transaction trace samplers
pub mod samplers;

/// Dependency bundle shared by every transaction
pub mod services;

/// Append-only call-site signature registry
pub mod signature;

/// Tracers, activities and transactions
pub mod tracer;

pub use config::TracerConfig;
pub use services::TracerServices;
pub use tracer::{
    activity::Activity,
    external::ExternalParameters,
    transaction::{Transaction, TransactionRecord},
    Outcome, Tracer,
};

/// Nanoseconds per second.
pub(crate) const S_TO_NS: u64 = 1_000_000_000;

/// Nanoseconds per millisecond.
pub(crate) const MS_TO_NS: u64 = 1_000_000;
