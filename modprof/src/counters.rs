//! Allocation counters and how they are obtained.
//!
//! Counting allocations needs cooperation from whatever allocator the process
//! runs with (typically a preloaded library that intercepts `malloc`/`free`),
//! so this crate never counts anything itself. Instead the allocator side
//! installs a [`CounterFactory`] once at startup with [`install_provider`],
//! and [`MemoryCounterService`](crate::MemoryCounterService) asks that factory
//! for one [`ResourceCounter`] per module it analyses.
//!
//! If nothing was installed, [`installed_provider`] returns `None` and the
//! memory counter service stays inactive for the lifetime of the process.
//!
//! # Counter semantics
//!
//! A counter only records allocations (and frees of blocks it recorded) while
//! it is enabled. Sizes are in bytes. The "maximum" values track the peak live
//! size since the last [`ResourceCounter::reset_maximum`], and
//! [`ResourceCounter::maximum_allocations`] is the number of live allocations
//! *at the time of that peak*, which is not necessarily the highest number of
//! live allocations ever seen.

use std::sync::{Arc, OnceLock};

/// An allocation counter belonging to a single module.
pub trait ResourceCounter: Send {
    fn enable(&mut self);
    fn disable(&mut self);
    fn is_enabled(&self) -> bool;

    /// Forgets everything recorded so far.
    fn reset(&mut self);

    /// Sets the maximum values to the current values, keeping everything else.
    fn reset_maximum(&mut self);

    fn current_size(&self) -> i64;
    fn maximum_size(&self) -> i64;

    /// Number of allocations still outstanding.
    fn current_allocations(&self) -> i64;

    /// Number of outstanding allocations when the size was at its maximum.
    fn maximum_allocations(&self) -> i64;
}

/// Hands out new counters. `None` means no more counters can be created
/// (e.g. the allocator side has run out of slots).
pub trait CounterFactory: Send + Sync {
    fn create_counter(&self) -> Option<Box<dyn ResourceCounter>>;
}

impl<F> CounterFactory for F
where
    F: Fn() -> Option<Box<dyn ResourceCounter>> + Send + Sync,
{
    fn create_counter(&self) -> Option<Box<dyn ResourceCounter>> {
        self()
    }
}

static PROVIDER: OnceLock<Arc<dyn CounterFactory>> = OnceLock::new();

/// Installs the process-wide counter factory. Only the first call has any
/// effect; it returns `false` if a provider was already installed.
pub fn install_provider(factory: Arc<dyn CounterFactory>) -> bool {
    let installed = PROVIDER.set(factory).is_ok();
    if !installed {
        really_warn!("install_provider: a counter provider is already installed, ignoring");
    }
    installed
}

/// The factory installed with [`install_provider`], if any.
pub fn installed_provider() -> Option<Arc<dyn CounterFactory>> {
    PROVIDER.get().cloned()
}
