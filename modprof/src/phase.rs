use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// A module as the host framework describes it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ComponentDescription {
    /// The label the module was configured with. Unique within a job.
    pub label: String,
    /// The module's implementation type, for display only.
    pub type_name: String,
}

impl ComponentDescription {
    pub fn new(label: impl Into<String>, type_name: impl Into<String>) -> Self {
        ComponentDescription {
            label: label.into(),
            type_name: type_name.into(),
        }
    }
}

/// The processing scopes the host framework numbers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    Run,
    Lumi,
    Event,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Transition {
    Enter,
    Exit,
}

/// A module lifecycle phase. Every phase is announced by a matching
/// enter/exit pair.
///
/// The first eight are the phases of single-threaded hosts; the rest only
/// exist in hosts that run several streams concurrently, where run and
/// lumi-block transitions happen once globally and once per stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    Construction,
    BeginJob,
    BeginRun,
    BeginLumi,
    Event,
    EndLumi,
    EndRun,
    EndJob,

    BeginStream,
    EndStream,
    StreamBeginRun,
    StreamEndRun,
    StreamBeginLumi,
    StreamEndLumi,
    GlobalBeginRun,
    GlobalEndRun,
    GlobalBeginLumi,
    GlobalEndLumi,
}

impl Phase {
    pub const ALL: [Phase; 18] = [
        Phase::Construction,
        Phase::BeginJob,
        Phase::BeginRun,
        Phase::BeginLumi,
        Phase::Event,
        Phase::EndLumi,
        Phase::EndRun,
        Phase::EndJob,
        Phase::BeginStream,
        Phase::EndStream,
        Phase::StreamBeginRun,
        Phase::StreamEndRun,
        Phase::StreamBeginLumi,
        Phase::StreamEndLumi,
        Phase::GlobalBeginRun,
        Phase::GlobalEndRun,
        Phase::GlobalBeginLumi,
        Phase::GlobalEndLumi,
    ];

    /// Capitalised name, e.g. `StreamBeginRun`.
    pub fn title(self) -> &'static str {
        match self {
            Phase::Construction => "Construction",
            Phase::BeginJob => "BeginJob",
            Phase::BeginRun => "BeginRun",
            Phase::BeginLumi => "BeginLumi",
            Phase::Event => "Event",
            Phase::EndLumi => "EndLumi",
            Phase::EndRun => "EndRun",
            Phase::EndJob => "EndJob",
            Phase::BeginStream => "BeginStream",
            Phase::EndStream => "EndStream",
            Phase::StreamBeginRun => "StreamBeginRun",
            Phase::StreamEndRun => "StreamEndRun",
            Phase::StreamBeginLumi => "StreamBeginLumi",
            Phase::StreamEndLumi => "StreamEndLumi",
            Phase::GlobalBeginRun => "GlobalBeginRun",
            Phase::GlobalEndRun => "GlobalEndRun",
            Phase::GlobalBeginLumi => "GlobalBeginLumi",
            Phase::GlobalEndLumi => "GlobalEndLumi",
        }
    }

    /// The scope whose number identifies a particular occurrence of this
    /// phase, if any.
    pub fn scope(self) -> Option<Scope> {
        match self {
            Phase::BeginRun
            | Phase::EndRun
            | Phase::StreamBeginRun
            | Phase::StreamEndRun
            | Phase::GlobalBeginRun
            | Phase::GlobalEndRun => Some(Scope::Run),
            Phase::BeginLumi
            | Phase::EndLumi
            | Phase::StreamBeginLumi
            | Phase::StreamEndLumi
            | Phase::GlobalBeginLumi
            | Phase::GlobalEndLumi => Some(Scope::Lumi),
            Phase::Event => Some(Scope::Event),
            Phase::Construction
            | Phase::BeginJob
            | Phase::EndJob
            | Phase::BeginStream
            | Phase::EndStream => None,
        }
    }

    pub fn is_stream_era(self) -> bool {
        matches!(
            self,
            Phase::BeginStream
                | Phase::EndStream
                | Phase::StreamBeginRun
                | Phase::StreamEndRun
                | Phase::StreamBeginLumi
                | Phase::StreamEndLumi
                | Phase::GlobalBeginRun
                | Phase::GlobalEndRun
                | Phase::GlobalBeginLumi
                | Phase::GlobalEndLumi
        )
    }

    /// The step label used in `*MEMCOUNTER*` and `*MODULETIMER*` lines:
    /// `Construction`, `beginJob`, `beginRun3`, `event37`, ... for the classic
    /// phases and `ModuleStreamBeginRun` etc. for the stream-era ones.
    pub fn step_label(self, counters: &GlobalCounters) -> String {
        if self.is_stream_era() {
            return format!("Module{}", self.title());
        }

        let name = match self {
            Phase::Construction => return "Construction".to_string(),
            Phase::BeginJob => "beginJob",
            Phase::BeginRun => "beginRun",
            Phase::BeginLumi => "beginLumi",
            Phase::Event => "event",
            Phase::EndLumi => "endLumi",
            Phase::EndRun => "endRun",
            Phase::EndJob => "endJob",
            _ => unreachable!(),
        };

        match self.scope() {
            Some(scope) => format!("{}{}", name, counters.get(scope)),
            None => name.to_string(),
        }
    }

    /// The boundary label used in `*RSSDUMP*` lines, e.g. `Start_Event12` or
    /// `End_ModuleStreamBeginLumi3`.
    pub fn boundary_label(self, transition: Transition, counters: &GlobalCounters) -> String {
        let prefix = match transition {
            Transition::Enter => "Start",
            Transition::Exit => "End",
        };

        let module = if self.is_stream_era() { "Module" } else { "" };

        match self.scope() {
            Some(scope) => format!(
                "{}_{}{}{}",
                prefix,
                module,
                self.title(),
                counters.get(scope)
            ),
            None => format!("{}_{}{}", prefix, module, self.title()),
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title())
    }
}

/// Run, lumi-block and event numbers as seen by one service.
///
/// Each number only ever goes up, by one per `processing_complete`
/// notification of its scope. They are used to label report lines and
/// nothing else.
#[derive(Debug)]
pub struct GlobalCounters {
    run: AtomicU64,
    lumi: AtomicU64,
    event: AtomicU64,
}

impl GlobalCounters {
    /// All three numbers start at `base`.
    pub fn starting_at(base: u64) -> Self {
        GlobalCounters {
            run: AtomicU64::new(base),
            lumi: AtomicU64::new(base),
            event: AtomicU64::new(base),
        }
    }

    fn slot(&self, scope: Scope) -> &AtomicU64 {
        match scope {
            Scope::Run => &self.run,
            Scope::Lumi => &self.lumi,
            Scope::Event => &self.event,
        }
    }

    pub fn get(&self, scope: Scope) -> u64 {
        self.slot(scope).load(Ordering::SeqCst)
    }

    /// Advances `scope` and returns the number of the scope that just
    /// completed.
    pub fn complete(&self, scope: Scope) -> u64 {
        self.slot(scope).fetch_add(1, Ordering::SeqCst)
    }

    pub fn event_number(&self) -> u64 {
        self.get(Scope::Event)
    }
}
