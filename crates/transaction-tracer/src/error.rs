// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Errors raised while finishing or mutating a tracer.
///
/// None of these ever reach instrumented code: the public tracer entry points log them and
/// carry on with reduced fidelity.
#[derive(Debug, thiserror::Error)]
pub enum TracerError {
    #[error("Tracer is not attached to a transaction")]
    NoTransaction,

    #[error("Tracer {0} was already finished")]
    AlreadyFinished(usize),

    #[error("Tracer {0} does not belong to this activity")]
    UnknownTracer(usize),

    #[error("External parameters were already reported for this tracer")]
    ExternalAlreadyReported,

    #[error("Invalid URI '{uri}': {reason}")]
    InvalidUri { uri: String, reason: String },

    #[error("Attribute '{key}' rejected: {reason}")]
    AttributeRejected { key: String, reason: String },

    #[error("Tracer stack inconsistent: expected {expected:?} on top, found {found:?}")]
    StackInconsistent {
        expected: Option<usize>,
        found: Option<usize>,
    },

    #[error("Transaction {0} already finished")]
    TransactionFinished(String),

    #[error("Stack trace budget exhausted")]
    StackTraceBudgetExhausted,

    #[error("Panic while {0}")]
    Panicked(&'static str),
}

/// Errors raised while validating an injected configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Errors raised while installing the log subscriber.
#[derive(Debug, thiserror::Error)]
pub enum LoggerError {
    #[error("Invalid log filter '{0}'")]
    InvalidFilter(String),

    #[error("A global log subscriber is already installed")]
    AlreadyInstalled,
}
