//! Per-module allocation accounting.
//!
//! For each analysed module, the module's own [`ResourceCounter`] is enabled
//! for exactly the duration of each of its phases, so the counter only sees
//! the allocations (and frees) made by that module. At the end of each phase
//! the counter is disabled again and a `*MEMCOUNTER*` line is written with:
//!
//! * the live size and allocation count attributable to the module,
//! * the peak size reached during the phase and the allocation count at
//!   that peak,
//! * if the module has been sampled before, the previous step label and the
//!   size recorded there minus the size at the start of this phase.
//!
//! The last value is what lets an event's retained products be told apart
//! from the module's own growth: anything the framework frees on the module's
//! behalf between two phases shows up as the difference between the size
//! recorded at the end of one phase and the size found at the start of the
//! next.

use crate::config::MemoryCounterConfig;
use crate::counters::{self, CounterFactory};
use crate::hooks::ActivityHooks;
use crate::phase::{ComponentDescription, GlobalCounters, Phase, Scope};
use crate::registry::ComponentRegistry;
use crate::report::{memcounter_line, MemorySample, ReportSink};
use std::sync::Arc;

pub struct MemoryCounterService {
    factory: Option<Arc<dyn CounterFactory>>,
    registry: ComponentRegistry,
    counters: GlobalCounters,
    verbose: bool,
    sink: Arc<ReportSink>,
}

impl MemoryCounterService {
    /// Uses the counter provider installed for this process, see
    /// [`counters::install_provider`].
    pub fn new(config: &MemoryCounterConfig, sink: Arc<ReportSink>) -> Self {
        Self::with_factory(config, counters::installed_provider(), sink)
    }

    /// With `factory == None` the service logs why and then ignores every
    /// notification.
    pub fn with_factory(
        config: &MemoryCounterConfig,
        factory: Option<Arc<dyn CounterFactory>>,
        sink: Arc<ReportSink>,
    ) -> Self {
        if factory.is_none() {
            really_warn!(
                "MemoryCounter: no memory counter provider is installed. Is the job running \
                 under a counting allocator? MemoryCounter will not function without it."
            );
        } else if config.modules_to_analyse.is_empty() {
            info!(
                "MemoryCounter: the parameter \"modulesToAnalyse\" has not been set, \
                 so MemoryCounter will analyse all modules"
            );
        }

        MemoryCounterService {
            factory,
            registry: ComponentRegistry::new(config.modules_to_analyse.iter().cloned()),
            counters: GlobalCounters::starting_at(1),
            verbose: config.verbose,
            sink,
        }
    }

    pub fn is_active(&self) -> bool {
        self.factory.is_some()
    }

    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    pub fn counters(&self) -> &GlobalCounters {
        &self.counters
    }

    /// Registers `component` and starts counting its construction.
    pub fn construct(&self, component: &ComponentDescription) {
        if let Some(factory) = &self.factory {
            self.registry
                .register_if_eligible(component, factory.as_ref(), self.verbose);
        }
    }

    /// Starts counting for a phase other than construction.
    pub fn enable_counter(&self, component: &ComponentDescription, step: &str) {
        let entry = match self.registry.lookup(&component.label) {
            Some(entry) => entry,
            None => return,
        };
        let mut entry = entry.lock();
        let entry = &mut *entry;

        entry.counter.reset_maximum();
        if let Some(previous) = entry.previous_recorded_size.as_mut() {
            *previous -= entry.counter.current_size();
        }
        entry.counter.enable();

        if self.verbose {
            info!(
                "Enabling MemCounter for module \"{}\" in method {}.",
                component.label, step
            );
        }
    }

    /// Stops counting and reports the phase that just finished.
    pub fn disable_counter_and_report(&self, component: &ComponentDescription, step: &str) {
        let entry = match self.registry.lookup(&component.label) {
            Some(entry) => entry,
            None => return,
        };
        let mut entry = entry.lock();
        let entry = &mut *entry;

        entry.counter.disable();
        let sample = MemorySample {
            current_size: entry.counter.current_size(),
            maximum_size: entry.counter.maximum_size(),
            current_allocations: entry.counter.current_allocations(),
            maximum_allocations: entry.counter.maximum_allocations(),
        };

        let previous = match (&entry.previous_step, entry.previous_recorded_size) {
            (Some(step), Some(size)) => Some((step.as_str(), size)),
            _ => None,
        };
        self.sink
            .write_line(&memcounter_line(step, component, &sample, previous));

        entry.previous_recorded_size = Some(sample.current_size);
        entry.previous_step = Some(step.to_string());
    }
}

impl ActivityHooks for MemoryCounterService {
    fn phase_enter(&self, component: &ComponentDescription, phase: Phase) {
        if !self.is_active() {
            return;
        }
        match phase {
            Phase::Construction => self.construct(component),
            _ => self.enable_counter(component, &phase.step_label(&self.counters)),
        }
    }

    fn phase_exit(&self, component: &ComponentDescription, phase: Phase) {
        if !self.is_active() {
            return;
        }
        self.disable_counter_and_report(component, &phase.step_label(&self.counters));
    }

    fn processing_complete(&self, scope: Scope) {
        self.counters.complete(scope);
    }
}
