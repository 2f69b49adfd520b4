// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Transaction trace samplers.
//!
//! Each sampler independently decides whether a finished transaction is worth keeping,
//! within its own bounded window. Windows are kept per application and are drained by
//! `harvest(app_name)`.

use derive_more::Display;
use std::sync::Arc;

use crate::tracer::transaction::TransactionRecord;

pub mod key_transaction;
pub mod random;
pub mod service;
pub mod synthetics;
pub mod top_n;

pub use key_transaction::KeyTransactionSampler;
pub use random::RandomReservoirSampler;
pub use service::{TraceHarvest, TransactionTraceService};
pub use synthetics::SyntheticsSampler;
pub use top_n::TopNSlowestSampler;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum SamplerKind {
    #[display("slowest")]
    Slowest,
    #[display("random")]
    Random,
    #[display("synthetics")]
    Synthetics,
    #[display("key_transaction")]
    KeyTransaction,
}

/// A retention policy for finished transactions.
pub trait TransactionSampler: Send + Sync {
    fn kind(&self) -> SamplerKind;

    /// Offers a finished transaction. Returns whether it was retained.
    ///
    /// Safe to call from many threads at once. Never fails: records the sampler has no use
    /// for are simply not retained.
    fn notice(&self, record: &Arc<TransactionRecord>) -> bool;

    /// Drains and resets the window of one application.
    fn harvest(&self, app_name: &str) -> Vec<Arc<TransactionRecord>>;

    /// After this, `notice` always returns false.
    fn stop(&self);
}
