// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log formatting for the tracer core.
//!
//! Every diagnostic the core emits goes through `tracing`. Embedders that already own a
//! subscriber need nothing from this module; standalone users can call [`init`] to get
//! lines of the form:
//!
//! ```text
//! APM_TRACER | LEVEL | [span_name{span_fields}:] message {event_fields}
//! ```
//!
//! # Examples
//!
//! ```text
//! APM_TRACER | WARN | Negative duration for tracer WebTransaction/Uri/cart, clamping to 0
//! APM_TRACER | DEBUG | harvest{app=checkout}: Harvested 3 traces and 2 transaction scopes
//! ```

use std::fmt;
use tracing_core::{Event, Subscriber};
use tracing_subscriber::fmt::{
    format::{self, FormatEvent, FormatFields},
    FmtContext, FormattedFields,
};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

use crate::error::LoggerError;

/// Prefix written in front of every log line.
pub const LOG_PREFIX: &str = "APM_TRACER";

/// Log formatter that prefixes messages with [`LOG_PREFIX`].
#[derive(Debug, Clone, Copy)]
pub struct Formatter;

impl<S, N> FormatEvent<S, N> for Formatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        write!(&mut writer, "{LOG_PREFIX} | {} | ", metadata.level())?;

        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                write!(writer, "{}", span.name())?;

                let ext = span.extensions();
                if let Some(fields) = ext.get::<FormattedFields<N>>() {
                    if !fields.is_empty() {
                        write!(writer, "{{{fields}}}")?;
                    }
                }
                write!(writer, ": ")?;
            }
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

/// Installs a global `fmt` subscriber using [`Formatter`].
///
/// `log_level` accepts any `EnvFilter` directive (`"debug"`,
/// `"transaction_tracer=trace"`, ...).
pub fn init(log_level: &str) -> Result<(), LoggerError> {
    let filter = EnvFilter::try_new(log_level)
        .map_err(|_| LoggerError::InvalidFilter(log_level.to_string()))?;

    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(filter)
        .event_format(Formatter)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|_| LoggerError::AlreadyInstalled)
}
