// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Call-site identity interning.
//!
//! Instrumentation identifies each traced call site by a small integer so tracers do not
//! carry their class and method names around. The registry only ever grows: ids handed out
//! stay valid for the life of the process and no entry is ever removed, so readers never
//! race with a removal.

use std::collections::HashMap;
use std::fmt;
use std::sync::{PoisonError, RwLock};
use ustr::Ustr;

/// Index of a call site inside a [`CallSiteRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallSiteId(pub u32);

/// Identity of one instrumented call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallSite {
    pub class_name: Ustr,
    pub method_name: Ustr,
    pub descriptor: Ustr,
}

impl CallSite {
    #[must_use]
    pub fn new(class_name: &str, method_name: &str, descriptor: &str) -> Self {
        Self {
            class_name: Ustr::from(class_name),
            method_name: Ustr::from(method_name),
            descriptor: Ustr::from(descriptor),
        }
    }

    /// Default metric name for a frame with no explicit name: `Custom/{class}/{method}`.
    #[must_use]
    pub fn default_metric_name(&self) -> String {
        format!("Custom/{}/{}", self.class_name, self.method_name)
    }
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}{}", self.class_name, self.method_name, self.descriptor)
    }
}

#[derive(Default)]
struct Inner {
    sites: Vec<CallSite>,
    index: HashMap<CallSite, CallSiteId>,
}

/// Insert-only index of call sites.
#[derive(Default)]
pub struct CallSiteRegistry {
    inner: RwLock<Inner>,
}

impl CallSiteRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the id of `call_site`, registering it on first sight.
    pub fn intern(&self, call_site: CallSite) -> CallSiteId {
        {
            let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(id) = inner.index.get(&call_site) {
                return *id;
            }
        }

        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        // Another writer may have registered it between the two locks.
        if let Some(id) = inner.index.get(&call_site) {
            return *id;
        }
        let id = CallSiteId(u32::try_from(inner.sites.len()).unwrap_or(u32::MAX));
        inner.sites.push(call_site);
        inner.index.insert(call_site, id);
        id
    }

    #[must_use]
    pub fn get(&self, id: CallSiteId) -> Option<CallSite> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.sites.get(id.0 as usize).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .sites
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_intern_is_idempotent() {
        let registry = CallSiteRegistry::new();
        let first = registry.intern(CallSite::new("com.shop.Cart", "checkout", "()V"));
        let second = registry.intern(CallSite::new("com.shop.Cart", "checkout", "()V"));
        let other = registry.intern(CallSite::new("com.shop.Cart", "add", "(I)V"));

        assert_eq!(first, second);
        assert_ne!(first, other);
        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.get(other).map(|s| s.method_name.as_str().to_string()),
            Some("add".to_string())
        );
        assert!(registry.get(CallSiteId(99)).is_none());
    }

    #[test]
    fn test_default_metric_name() {
        let site = CallSite::new("com.shop.Cart", "checkout", "()V");
        assert_eq!(site.default_metric_name(), "Custom/com.shop.Cart/checkout");
        assert_eq!(site.to_string(), "com.shop.Cart.checkout()V");
    }

    #[test]
    fn test_concurrent_interning_hands_out_one_id_per_site() {
        let registry = Arc::new(CallSiteRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    (0..50)
                        .map(|i| registry.intern(CallSite::new("Worker", &format!("m{i}"), "()V")))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let results: Vec<Vec<CallSiteId>> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(registry.len(), 50);
        for ids in &results[1..] {
            assert_eq!(ids, &results[0]);
        }
    }
}
