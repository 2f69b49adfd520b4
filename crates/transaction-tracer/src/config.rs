// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Tracer configuration.
//!
//! Loading configuration from files or the environment is the embedder's job. This crate
//! only receives an already-built [`TracerConfig`] (usually deserialized from the agent's
//! own config document) and validates it once at construction.
//!
//! ## Edge Cases and Behaviors
//!
//! - **Durations** are expressed in seconds and may be fractional (`0.5`)
//! - **Negative durations** are rejected at parse time
//! - **Key transaction thresholds** of zero, negative or non-finite values are accepted
//!   but every matching transaction is then treated as exceeding its threshold
//! - **`top_n = 0`** disables the slowest-transaction sampler

use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tracing::warn;

use crate::error::ConfigError;

const DEFAULT_MAX_SEGMENTS: usize = 3_000;
const DEFAULT_MAX_STACK_TRACES: usize = 20;
const DEFAULT_STACK_TRACE_THRESHOLD: Duration = Duration::from_millis(500);
const DEFAULT_TRANSACTION_THRESHOLD: Duration = Duration::from_secs(2);
const DEFAULT_TOP_N: usize = 20;
const DEFAULT_RESERVOIR_CAPACITY: usize = 10;
const DEFAULT_MAX_SYNTHETICS_PER_HARVEST: usize = 20;
const DEFAULT_MAX_CUSTOM_ATTRIBUTES: usize = 64;
const DEFAULT_MAX_ATTRIBUTE_KEY_BYTES: usize = 255;
const DEFAULT_MAX_ATTRIBUTE_VALUE_BYTES: usize = 255;
const DEFAULT_HARVEST_INTERVAL: Duration = Duration::from_secs(60);

/// Configuration injected into every component through [`crate::TracerServices`].
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct TracerConfig {
    /// Application name traces and metrics are reported under.
    pub app_name: String,
    /// Host name substituted for loopback datastore hosts.
    pub host_name: String,
    /// Maximum number of trace segments kept per transaction.
    pub max_segments: usize,
    /// Frames slower than this capture a stack trace.
    #[serde(deserialize_with = "deserialize_duration_from_seconds")]
    pub stack_trace_threshold: Duration,
    /// Maximum number of stack traces captured per transaction.
    pub max_stack_traces: usize,
    /// Transactions faster than this are ignored by the slowest-N sampler.
    #[serde(deserialize_with = "deserialize_duration_from_seconds")]
    pub transaction_threshold: Duration,
    /// Number of transaction names the slowest-N sampler remembers across harvests.
    pub top_n: usize,
    /// Number of distinct transaction names the reservoir sampler retains per harvest.
    pub reservoir_capacity: usize,
    /// Maximum synthetic-monitor traces accepted per harvest.
    pub max_synthetics_per_harvest: usize,
    /// Key transaction names mapped to their apdex threshold, in seconds.
    pub key_transactions: HashMap<String, f64>,
    /// Maximum number of custom attributes per tracer.
    pub max_custom_attributes: usize,
    /// Custom attribute keys longer than this are rejected.
    pub max_attribute_key_bytes: usize,
    /// Custom string attribute values are truncated to this many bytes.
    pub max_attribute_value_bytes: usize,
    /// How often the harvester drains samplers and metrics.
    #[serde(deserialize_with = "deserialize_duration_from_seconds")]
    pub harvest_interval: Duration,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            app_name: "My Application".to_string(),
            host_name: "localhost".to_string(),
            max_segments: DEFAULT_MAX_SEGMENTS,
            stack_trace_threshold: DEFAULT_STACK_TRACE_THRESHOLD,
            max_stack_traces: DEFAULT_MAX_STACK_TRACES,
            transaction_threshold: DEFAULT_TRANSACTION_THRESHOLD,
            top_n: DEFAULT_TOP_N,
            reservoir_capacity: DEFAULT_RESERVOIR_CAPACITY,
            max_synthetics_per_harvest: DEFAULT_MAX_SYNTHETICS_PER_HARVEST,
            key_transactions: HashMap::new(),
            max_custom_attributes: DEFAULT_MAX_CUSTOM_ATTRIBUTES,
            max_attribute_key_bytes: DEFAULT_MAX_ATTRIBUTE_KEY_BYTES,
            max_attribute_value_bytes: DEFAULT_MAX_ATTRIBUTE_VALUE_BYTES,
            harvest_interval: DEFAULT_HARVEST_INTERVAL,
        }
    }
}

impl TracerConfig {
    /// Parses and validates a JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.app_name.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "app_name cannot be empty".to_string(),
            ));
        }

        if self.max_attribute_key_bytes == 0 {
            return Err(ConfigError::InvalidConfig(
                "max_attribute_key_bytes must be greater than 0".to_string(),
            ));
        }

        if self.harvest_interval.is_zero() {
            return Err(ConfigError::InvalidConfig(
                "harvest_interval must be greater than 0".to_string(),
            ));
        }

        for (name, apdex) in &self.key_transactions {
            if !apdex.is_finite() || *apdex <= 0.0 {
                warn!(
                    "Key transaction '{}' has a degenerate apdex threshold {}, every trace will exceed it",
                    name, apdex
                );
            }
        }

        Ok(())
    }
}

/// Deserializes a duration given in (possibly fractional) seconds.
pub fn deserialize_duration_from_seconds<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Duration, D::Error> {
    struct DurationVisitor;
    impl serde::de::Visitor<'_> for DurationVisitor {
        type Value = Duration;
        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            write!(f, "a duration in seconds (integer or float)")
        }
        fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<Self::Value, E> {
            Ok(Duration::from_secs(v))
        }
        fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<Self::Value, E> {
            u64::try_from(v)
                .map(Duration::from_secs)
                .map_err(|_| E::custom("negative durations are not allowed"))
        }
        fn visit_f64<E: serde::de::Error>(self, v: f64) -> Result<Self::Value, E> {
            Duration::try_from_secs_f64(v)
                .map_err(|_| E::custom("durations must be finite and not negative"))
        }
    }
    deserializer.deserialize_any(DurationVisitor)
}
