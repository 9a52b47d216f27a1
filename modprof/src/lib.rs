//! Instrumentation services that hook into the module lifecycle of a batch
//! processing framework and report, per module and per phase, how much memory
//! was allocated, how the process RSS evolved and how much CPU time was spent.
//!
//! The host framework drives everything through [`ActivityHooks`]: every
//! module phase (construction, begin/end of job, run, lumi-block, the event
//! itself, ...) is announced with a `phase_enter` and a `phase_exit` call, and
//! the end of each event/run/lumi-block with `processing_complete`. The
//! services in this crate are independent consumers of those calls:
//!
//! * [`MemoryCounterService`] enables an external allocation counter for the
//!   duration of each phase and reports what the module allocated.
//! * [`RssChecker`] samples the process RSS and virtual size at every boundary.
//! * [`ModuleTimer`] reports wall, user and system time per phase.
//! * [`DumpTrigger`] asks an out-of-process profiler to dump its state at
//!   configured events.
//!
//! All report lines are written to a [`ReportSink`] with a fixed marker token
//! (`*MEMCOUNTER*`, `*RSSDUMP*`, `*MODULETIMER*`) so that tools such as
//! `summarize` can pick them out of the rest of the job log.

#[macro_use]
extern crate log;

// HACK(eddyb) this is semantically `warn!` but uses `error!` because
// that's the only log level enabled by default - see also
// https://github.com/rust-lang/rust/issues/76824
macro_rules! really_warn {
    ($msg:literal $($rest:tt)*) => {
        error!(concat!("[WARNING] ", $msg) $($rest)*)
    }
}

pub mod config;
pub mod counters;
pub mod dump;
pub mod hooks;
pub mod memory_counter;
pub mod phase;
pub mod procstat;
pub mod registry;
pub mod report;
pub mod rss;
pub mod testing_common;
pub mod timer;

pub use crate::config::{DumpConfig, MemoryCounterConfig, ServicesConfig};
pub use crate::counters::{CounterFactory, ResourceCounter};
pub use crate::dump::{DumpSchedule, DumpTrigger};
pub use crate::hooks::{
    Activity, ActivityHooks, ActivityRegistry, HostSignal, ModuleCallingContext, StreamId,
    SINGLE_STREAM,
};
pub use crate::memory_counter::MemoryCounterService;
pub use crate::phase::{ComponentDescription, GlobalCounters, Phase, Scope, Transition};
pub use crate::procstat::{MemoryUse, ProcessStatistics, SampleError};
pub use crate::registry::{ComponentRegistry, RegistryEntry};
pub use crate::report::ReportSink;
pub use crate::rss::RssChecker;
pub use crate::timer::{Clock, CpuTimePoint, CpuTimes, ModuleTimer};
