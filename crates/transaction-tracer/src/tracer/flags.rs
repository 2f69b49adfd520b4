// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::ops::{BitOr, BitOrAssign};

/// Classification bits of a tracer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TracerFlags(u8);

impl TracerFlags {
    pub const NONE: Self = Self(0);
    /// Participates in the retained trace tree.
    pub const TRANSACTION_TRACER_SEGMENT: Self = Self(1);
    /// Contributes scoped metrics (a metric producer).
    pub const GENERATE_SCOPED_METRIC: Self = Self(1 << 1);
    /// Nested calls are not traced.
    pub const LEAF: Self = Self(1 << 2);
    pub const ASYNC: Self = Self(1 << 3);
    /// Entry point of a web or background transaction.
    pub const DISPATCHER: Self = Self(1 << 4);
    pub const DEFAULT: Self = Self(Self::TRANSACTION_TRACER_SEGMENT.0 | Self::GENERATE_SCOPED_METRIC.0);

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub const fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    #[must_use]
    pub const fn is_segment(self) -> bool {
        self.contains(Self::TRANSACTION_TRACER_SEGMENT)
    }

    #[must_use]
    pub const fn is_metric_producer(self) -> bool {
        self.contains(Self::GENERATE_SCOPED_METRIC)
    }

    #[must_use]
    pub const fn is_leaf(self) -> bool {
        self.contains(Self::LEAF)
    }

    #[must_use]
    pub const fn is_async(self) -> bool {
        self.contains(Self::ASYNC)
    }
}

impl BitOr for TracerFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for TracerFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_flags() {
        let flags = TracerFlags::DEFAULT;
        assert!(flags.is_segment());
        assert!(flags.is_metric_producer());
        assert!(!flags.is_leaf());
        assert!(!flags.is_async());
    }

    #[test]
    fn test_without_clears_only_given_bits() {
        let flags = TracerFlags::DEFAULT | TracerFlags::LEAF;
        let cleared = flags.without(TracerFlags::TRANSACTION_TRACER_SEGMENT);
        assert!(!cleared.is_segment());
        assert!(cleared.is_metric_producer());
        assert!(cleared.is_leaf());
        assert_eq!(TracerFlags::NONE.without(TracerFlags::LEAF), TracerFlags::NONE);
    }
}
