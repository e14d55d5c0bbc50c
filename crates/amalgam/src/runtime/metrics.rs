//! Domain counters.
//!
//! Counting is off unless [`DomainConfig::metrics`](crate::DomainConfig::metrics)
//! is set. Registry sizes and the object-type count are always reported
//! since they come from the registry itself.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Snapshot of a domain's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Metrics {
    /// Mutations that committed a new composition.
    pub mutations: u64,
    /// Mutations that failed and left their object unchanged.
    pub failed_mutations: u64,
    /// Objects created over the domain's lifetime.
    pub objects_created: u64,
    /// Objects currently alive.
    pub live_objects: usize,
    /// Distinct compositions in the type cache.
    pub object_types: usize,
    /// Registered mixins.
    pub mixins: usize,
    /// Registered messages.
    pub messages: usize,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    enabled: bool,
    mutations: AtomicU64,
    failed_mutations: AtomicU64,
    objects_created: AtomicU64,
    live_objects: AtomicUsize,
}

impl Counters {
    pub(crate) fn new(enabled: bool) -> Self {
        Counters {
            enabled,
            ..Self::default()
        }
    }

    #[inline]
    pub(crate) fn mutation(&self, committed: bool) {
        if !self.enabled {
            return;
        }
        let counter = if committed {
            &self.mutations
        } else {
            &self.failed_mutations
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn object_created(&self) {
        if self.enabled {
            self.objects_created.fetch_add(1, Ordering::Relaxed);
            self.live_objects.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub(crate) fn object_destroyed(&self) {
        if self.enabled {
            self.live_objects.fetch_sub(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn snapshot(&self, object_types: usize, mixins: usize, messages: usize) -> Metrics {
        Metrics {
            mutations: self.mutations.load(Ordering::Relaxed),
            failed_mutations: self.failed_mutations.load(Ordering::Relaxed),
            objects_created: self.objects_created.load(Ordering::Relaxed),
            live_objects: self.live_objects.load(Ordering::Relaxed),
            object_types,
            mixins,
            messages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_counters_stay_zero() {
        let counters = Counters::new(false);
        counters.mutation(true);
        counters.object_created();
        assert_eq!(counters.snapshot(1, 2, 3), Metrics {
            object_types: 1,
            mixins: 2,
            messages: 3,
            ..Metrics::default()
        });
    }

    #[test]
    fn test_enabled_counters() {
        let counters = Counters::new(true);
        counters.mutation(true);
        counters.mutation(true);
        counters.mutation(false);
        counters.object_created();
        counters.object_created();
        counters.object_destroyed();

        let metrics = counters.snapshot(0, 0, 0);
        assert_eq!(metrics.mutations, 2);
        assert_eq!(metrics.failed_mutations, 1);
        assert_eq!(metrics.objects_created, 2);
        assert_eq!(metrics.live_objects, 1);
    }
}
