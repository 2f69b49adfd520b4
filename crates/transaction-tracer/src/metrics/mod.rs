// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

pub mod aggregator;
pub mod stats;

pub use aggregator::{MetricAggregator, MetricTable, MetricsSnapshot};
pub use stats::{ResponseTimeStats, StatsMap, TransactionStats};
