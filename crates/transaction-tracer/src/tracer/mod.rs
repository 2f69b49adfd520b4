// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Tracers, activities and transactions.
//!
//! A [`Tracer`] is a cheap handle on one timed call frame. Every operation on it is
//! infallible from the caller's point of view: internal errors are logged and the tracer
//! carries on with reduced fidelity.

use serde::Serialize;
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::error::TracerError;
use crate::tracer::activity::{Activity, TracerId};
use crate::tracer::attributes::{AttributeLimits, AttributeValue, Attributes};
use crate::tracer::external::ExternalParameters;
use crate::tracer::flags::TracerFlags;

pub mod activity;
pub mod attributes;
pub mod external;
pub mod flags;
pub mod transaction;

/// An error noticed by a tracer or transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorInfo {
    pub class: String,
    pub message: String,
}

impl ErrorInfo {
    #[must_use]
    pub fn new(class: &str, message: &str) -> Self {
        Self {
            class: class.to_string(),
            message: message.to_string(),
        }
    }
}

/// How a traced call frame completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Return,
    Error(ErrorInfo),
}

/// Handle on one timed call frame.
#[derive(Clone)]
pub struct Tracer {
    activity: Arc<Activity>,
    id: TracerId,
}

impl fmt::Debug for Tracer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracer")
            .field("activity", &self.activity.id())
            .field("id", &self.id)
            .finish()
    }
}

impl Tracer {
    pub(crate) fn new(activity: Arc<Activity>, id: TracerId) -> Self {
        Self { activity, id }
    }

    #[must_use]
    pub fn id(&self) -> TracerId {
        self.id
    }

    #[must_use]
    pub fn activity(&self) -> &Arc<Activity> {
        &self.activity
    }

    /// Starts a child of the last running tracer of the same activity.
    pub fn start_child(
        &self,
        call_site: crate::signature::CallSiteId,
        metric_name: Option<&str>,
        flags: TracerFlags,
    ) -> Option<Tracer> {
        self.activity.start_tracer(call_site, metric_name, flags)
    }

    /// Completes the frame. Only the first call has any effect.
    pub fn finish(&self, outcome: Outcome) {
        let result = catch_unwind(AssertUnwindSafe(|| {
            self.activity.finish_tracer(self.id, outcome)
        }))
        .unwrap_or(Err(TracerError::Panicked("finishing tracer")));
        if let Err(e) = result {
            log_error("finishing tracer", &e);
        }
    }

    /// Turns this tracer into an external, datastore, messaging or cloud call. The metric
    /// names are derived when the tracer finishes.
    pub fn report_as_external(&self, parameters: ExternalParameters) {
        if let Err(e) = parameters.validate() {
            // Still recorded, metric names fall back to an unknown host.
            warn!("Reporting external call with bad parameters: {}", e);
        }
        let result = self.activity.update_tracer(self.id, |data, _| {
            if data.external.is_some() {
                return Err(TracerError::ExternalAlreadyReported);
            }
            data.external = Some(parameters);
            Ok(())
        });
        if let Err(e) = result {
            log_error("reporting external call", &e);
        }
    }

    /// Sets a custom attribute (subject to the configured limits) or an agent attribute.
    pub fn set_attribute(&self, key: &str, value: impl Into<AttributeValue>, is_custom: bool) {
        let value = value.into();
        let result = self.activity.update_tracer(self.id, |data, transaction| {
            if is_custom {
                let limits = AttributeLimits::from(&transaction.services().config);
                data.attributes.put_custom(key, value, &limits)
            } else {
                data.attributes.put_agent(key, value, false);
                Ok(())
            }
        });
        if let Err(e) = result {
            log_error("setting attribute", &e);
        }
    }

    pub fn set_agent_attribute(&self, key: &str, value: impl Into<AttributeValue>, for_span: bool) {
        let value = value.into();
        let result = self.activity.update_tracer(self.id, |data, _| {
            data.attributes.put_agent(key, value, for_span);
            Ok(())
        });
        if let Err(e) = result {
            log_error("setting agent attribute", &e);
        }
    }

    /// Keeps `target` alive until the tracer finishes.
    pub fn set_invocation_target(&self, target: Box<dyn Any + Send>) {
        let result = self.activity.update_tracer(self.id, |data, _| {
            data.invocation_target = Some(target);
            Ok(())
        });
        if let Err(e) = result {
            log_error("setting invocation target", &e);
        }
    }

    /// Renames the metric this tracer records. Ignored once finished.
    pub fn set_metric_name(&self, metric_name: &str) {
        let result = self.activity.update_tracer(self.id, |data, _| {
            data.metric_name = metric_name.to_string();
            Ok(())
        });
        if let Err(e) = result {
            log_error("renaming tracer", &e);
        }
    }

    /// GUID of the tracer, generated on first request.
    #[must_use]
    pub fn guid(&self) -> String {
        self.activity.tracer_guid(self.id).unwrap_or_default()
    }

    #[must_use]
    pub fn metric_name(&self) -> String {
        self.activity
            .with_tracer(self.id, |data| data.metric_name.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn flags(&self) -> TracerFlags {
        self.activity
            .with_tracer(self.id, |data| data.flags)
            .unwrap_or_default()
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.activity
            .with_tracer(self.id, |data| data.is_finished())
            .unwrap_or(false)
    }

    /// `None` until finished.
    #[must_use]
    pub fn duration_nanos(&self) -> Option<u64> {
        self.activity
            .with_tracer(self.id, |data| data.is_finished().then_some(data.duration_nanos))
            .flatten()
    }

    /// `None` until finished.
    #[must_use]
    pub fn exclusive_duration_nanos(&self) -> Option<u64> {
        self.activity
            .with_tracer(self.id, |data| {
                data.is_finished().then(|| data.exclusive_duration_nanos())
            })
            .flatten()
    }

    /// Number of finished metric-producing children.
    #[must_use]
    pub fn child_count(&self) -> Option<u32> {
        self.activity.with_tracer(self.id, |data| data.child_count)
    }

    #[must_use]
    pub fn is_parent(&self) -> bool {
        self.activity
            .with_tracer(self.id, |data| data.is_parent)
            .unwrap_or(false)
    }

    /// True when this tracer captured a stack trace itself.
    #[must_use]
    pub fn has_stack_trace(&self) -> bool {
        self.activity
            .with_tracer(self.id, |data| data.attributes.agent().contains_key("backtrace"))
            .unwrap_or(false)
    }

    /// True while an invocation target is held, i.e. until the tracer finishes.
    #[must_use]
    pub fn holds_invocation_target(&self) -> bool {
        self.activity
            .with_tracer(self.id, |data| data.invocation_target.is_some())
            .unwrap_or(false)
    }

    #[must_use]
    pub fn attributes(&self) -> Attributes {
        self.activity
            .with_tracer(self.id, |data| data.attributes.clone())
            .unwrap_or_default()
    }
}

/// Logs an internal error at a level matching its severity.
pub(crate) fn log_error(operation: &str, e: &TracerError) {
    match e {
        TracerError::NoTransaction
        | TracerError::StackInconsistent { .. }
        | TracerError::UnknownTracer(_)
        | TracerError::Panicked(_) => error!("Error {}: {}", operation, e),
        TracerError::AlreadyFinished(_) | TracerError::StackTraceBudgetExhausted => {
            debug!("Skipped {}: {}", operation, e)
        }
        _ => warn!("Error {}: {}", operation, e),
    }
}
