// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Time and identifier sources used by every tracer.
//!
//! Tracers never read the system clock directly. They go through a [`Clock`] handed to
//! them by [`crate::TracerServices`], which lets tests drive time with a [`ManualClock`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Length of a tracer GUID in hex characters.
pub const GUID_LENGTH: usize = 16;

/// Monotonic timestamp source.
pub trait Clock: Send + Sync {
    /// Monotonic nanoseconds since an arbitrary, fixed origin.
    fn now_nanos(&self) -> u64;

    /// Wall-clock milliseconds since the Unix epoch, used only for display.
    fn epoch_millis(&self) -> u64;
}

/// Clock backed by [`Instant`], anchored when the clock is created.
#[derive(Debug)]
pub struct MonotonicClock {
    origin: Instant,
    origin_epoch_millis: u64,
}

impl MonotonicClock {
    #[must_use]
    pub fn new() -> Self {
        let origin_epoch_millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0);
        Self {
            origin: Instant::now(),
            origin_epoch_millis,
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_nanos(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }

    fn epoch_millis(&self) -> u64 {
        self.origin_epoch_millis + self.now_nanos() / crate::MS_TO_NS
    }
}

/// Clock whose time only moves when told to.
///
/// Time may be set backwards, which is how tests reproduce the negative durations some
/// platform clocks have been observed to produce.
#[derive(Debug, Default)]
pub struct ManualClock {
    nanos: AtomicU64,
}

impl ManualClock {
    #[must_use]
    pub fn new(start_nanos: u64) -> Self {
        Self {
            nanos: AtomicU64::new(start_nanos),
        }
    }

    pub fn set_nanos(&self, nanos: u64) {
        self.nanos.store(nanos, Ordering::Release);
    }

    pub fn advance_nanos(&self, nanos: u64) {
        self.nanos.fetch_add(nanos, Ordering::AcqRel);
    }

    pub fn advance_millis(&self, millis: u64) {
        self.advance_nanos(millis * crate::MS_TO_NS);
    }
}

impl Clock for ManualClock {
    fn now_nanos(&self) -> u64 {
        self.nanos.load(Ordering::Acquire)
    }

    fn epoch_millis(&self) -> u64 {
        self.now_nanos() / crate::MS_TO_NS
    }
}

/// Random identifier generator.
pub trait GuidSource: Send + Sync {
    fn generate(&self) -> String;
}

/// Generates 16 lower-case hex characters (64 random bits).
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomGuidSource;

impl GuidSource for RandomGuidSource {
    fn generate(&self) -> String {
        format!("{:016x}", fastrand::u64(..))
    }
}
