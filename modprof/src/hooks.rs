//! Connecting services to the host framework.
//!
//! Services implement [`ActivityHooks`]. The host (or whatever glue sits
//! between it and this crate) reports what it is doing through an
//! [`ActivityRegistry`], which fans every notification out to all registered
//! services in registration order.
//!
//! Hosts come in two flavours. Older hosts run one event at a time and
//! announce module phases with the module description alone. Newer hosts run
//! several streams concurrently; they announce module phases with a calling
//! context and split run and lumi-block transitions into global and
//! per-stream ones. [`HostSignal`] covers the signals of both and
//! [`HostSignal::translate`] maps each onto an [`Activity`].

use crate::config::ServicesConfig;
use crate::dump::DumpTrigger;
use crate::memory_counter::MemoryCounterService;
use crate::phase::{ComponentDescription, Phase, Scope, Transition};
use crate::report::ReportSink;
use crate::rss::RssChecker;
use crate::timer::ModuleTimer;
use std::error::Error;
use std::sync::Arc;

/// Identifies one of the concurrent streams of a multi-stream host.
pub type StreamId = u32;

/// The stream single-stream hosts run on. Global transitions, which are not
/// tied to any stream, are reported on it as well.
pub const SINGLE_STREAM: StreamId = 0;

/// Something a service can be told about.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Activity<'a> {
    PhaseEnter {
        component: &'a ComponentDescription,
        phase: Phase,
        stream: StreamId,
    },
    PhaseExit {
        component: &'a ComponentDescription,
        phase: Phase,
        stream: StreamId,
    },
    ProcessingStarted { scope: Scope, stream: StreamId },
    ProcessingComplete { scope: Scope, stream: StreamId },
}

pub trait ActivityHooks: Send + Sync {
    fn phase_enter(&self, component: &ComponentDescription, phase: Phase);

    fn phase_exit(&self, component: &ComponentDescription, phase: Phase);

    fn processing_started(&self, _scope: Scope) {}

    /// Called once every module has finished with the event, run or
    /// lumi-block in `scope`.
    fn processing_complete(&self, scope: Scope);

    /// The `stream_*` calls also say which stream the activity happened on.
    /// Services that keep state between two calls override them; everyone
    /// else gets the stream-less call.
    fn stream_phase_enter(
        &self,
        _stream: StreamId,
        component: &ComponentDescription,
        phase: Phase,
    ) {
        self.phase_enter(component, phase)
    }

    fn stream_phase_exit(
        &self,
        _stream: StreamId,
        component: &ComponentDescription,
        phase: Phase,
    ) {
        self.phase_exit(component, phase)
    }

    fn stream_processing_started(&self, _stream: StreamId, scope: Scope) {
        self.processing_started(scope)
    }

    fn stream_processing_complete(&self, _stream: StreamId, scope: Scope) {
        self.processing_complete(scope)
    }

    fn on_activity(&self, activity: &Activity<'_>) {
        match *activity {
            Activity::PhaseEnter {
                component,
                phase,
                stream,
            } => self.stream_phase_enter(stream, component, phase),
            Activity::PhaseExit {
                component,
                phase,
                stream,
            } => self.stream_phase_exit(stream, component, phase),
            Activity::ProcessingStarted { scope, stream } => {
                self.stream_processing_started(stream, scope)
            }
            Activity::ProcessingComplete { scope, stream } => {
                self.stream_processing_complete(stream, scope)
            }
        }
    }
}

/// What multi-stream hosts pass along with a module phase.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModuleCallingContext {
    pub description: ComponentDescription,
    pub stream_id: u32,
}

/// A notification as the host sends it.
#[derive(Clone, Copy, Debug)]
pub enum HostSignal<'a> {
    /// Per-module signal from a single-stream host.
    Module {
        transition: Transition,
        phase: Phase,
        description: &'a ComponentDescription,
    },
    /// Per-module signal from a multi-stream host.
    ModuleInContext {
        transition: Transition,
        phase: Phase,
        context: &'a ModuleCallingContext,
    },

    PreProcessEvent,
    PostProcessEvent,
    PostEndLumi,
    PostEndRun,

    PreEvent { stream_id: StreamId },
    PostEvent { stream_id: StreamId },
    PostGlobalEndLumi,
    PostGlobalEndRun,
}

impl<'a> HostSignal<'a> {
    pub fn translate(&self) -> Activity<'a> {
        let (transition, phase, component, stream) = match *self {
            HostSignal::Module {
                transition,
                phase,
                description,
            } => (transition, phase, description, SINGLE_STREAM),
            HostSignal::ModuleInContext {
                transition,
                phase,
                context,
            } => (transition, phase, &context.description, context.stream_id),
            HostSignal::PreProcessEvent => return started(Scope::Event, SINGLE_STREAM),
            HostSignal::PreEvent { stream_id } => return started(Scope::Event, stream_id),
            HostSignal::PostProcessEvent => return complete(Scope::Event, SINGLE_STREAM),
            HostSignal::PostEvent { stream_id } => return complete(Scope::Event, stream_id),
            HostSignal::PostEndLumi | HostSignal::PostGlobalEndLumi => {
                return complete(Scope::Lumi, SINGLE_STREAM)
            }
            HostSignal::PostEndRun | HostSignal::PostGlobalEndRun => {
                return complete(Scope::Run, SINGLE_STREAM)
            }
        };

        match transition {
            Transition::Enter => Activity::PhaseEnter {
                component,
                phase,
                stream,
            },
            Transition::Exit => Activity::PhaseExit {
                component,
                phase,
                stream,
            },
        }
    }
}

fn started<'a>(scope: Scope, stream: StreamId) -> Activity<'a> {
    Activity::ProcessingStarted { scope, stream }
}

fn complete<'a>(scope: Scope, stream: StreamId) -> Activity<'a> {
    Activity::ProcessingComplete { scope, stream }
}

/// The services of one job.
#[derive(Default)]
pub struct ActivityRegistry {
    services: Vec<Arc<dyn ActivityHooks>>,
    dump_trigger: Option<Arc<DumpTrigger>>,
}

impl ActivityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds every service `config` asks for, all writing to the same sink.
    pub fn from_config(config: &ServicesConfig) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let sink = match &config.report_file {
            Some(path) => Arc::new(
                ReportSink::from_path(path)
                    .map_err(|e| format!("unable to open {}: {}", path.display(), e))?,
            ),
            None => Arc::new(ReportSink::stdout()),
        };
        Ok(Self::from_config_with_sink(config, sink))
    }

    pub fn from_config_with_sink(config: &ServicesConfig, sink: Arc<ReportSink>) -> Self {
        let mut registry = ActivityRegistry::new();

        if let Some(memory_counter) = &config.memory_counter {
            registry.register(Arc::new(MemoryCounterService::new(
                memory_counter,
                sink.clone(),
            )));
        }
        if config.check_rss {
            registry.register(Arc::new(RssChecker::new(sink.clone())));
        }
        if config.module_timer {
            registry.register(Arc::new(ModuleTimer::new(sink.clone())));
        }
        if let Some(dump) = &config.igprof_dump {
            let trigger = Arc::new(DumpTrigger::from_config(dump));
            registry.dump_trigger = Some(trigger.clone());
            registry.register(trigger);
        }

        registry
    }

    pub fn register(&mut self, service: Arc<dyn ActivityHooks>) {
        self.services.push(service);
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// The configured dump trigger, for explicit dump requests.
    pub fn dump_trigger(&self) -> Option<&Arc<DumpTrigger>> {
        self.dump_trigger.as_ref()
    }

    pub fn dispatch(&self, activity: &Activity<'_>) {
        for service in &self.services {
            service.on_activity(activity);
        }
    }

    pub fn deliver(&self, signal: &HostSignal<'_>) {
        self.dispatch(&signal.translate());
    }
}
