use crate::hooks::ActivityHooks;
use crate::phase::{ComponentDescription, GlobalCounters, Phase, Scope, Transition};
use crate::procstat::{ProcessStatistics, SampleError};
use crate::report::{rssdump_line, ReportSink};
use std::sync::Arc;

/// Writes the process RSS, virtual size and system load at the start and end
/// of every module phase. Unlike the memory counter this needs nothing from
/// the allocator, but it measures the whole process rather than one module.
pub struct RssChecker {
    stats: ProcessStatistics,
    counters: GlobalCounters,
    sink: Arc<ReportSink>,
}

impl RssChecker {
    pub fn new(sink: Arc<ReportSink>) -> Self {
        Self::with_statistics(ProcessStatistics::current_process(), sink)
    }

    pub fn with_statistics(stats: ProcessStatistics, sink: Arc<ReportSink>) -> Self {
        RssChecker {
            stats,
            counters: GlobalCounters::starting_at(0),
            sink,
        }
    }

    pub fn counters(&self) -> &GlobalCounters {
        &self.counters
    }

    /// Takes one sample and writes it. Nothing is written if either reading
    /// fails.
    pub fn sample(
        &self,
        component: &ComponentDescription,
        phase: Phase,
        transition: Transition,
    ) -> Result<(), SampleError> {
        let memory = self.stats.memory_use()?;
        let load = self.stats.system_load()?;
        let boundary = phase.boundary_label(transition, &self.counters);
        self.sink
            .write_line(&rssdump_line(&boundary, component, &memory, load));
        Ok(())
    }

    fn sample_or_log(&self, component: &ComponentDescription, phase: Phase, transition: Transition) {
        if let Err(error) = self.sample(component, phase, transition) {
            error!(
                "CheckRSSService: no sample for module \"{}\" at {:?} {}: {}",
                component.label, transition, phase, error
            );
        }
    }
}

impl ActivityHooks for RssChecker {
    fn phase_enter(&self, component: &ComponentDescription, phase: Phase) {
        self.sample_or_log(component, phase, Transition::Enter);
    }

    fn phase_exit(&self, component: &ComponentDescription, phase: Phase) {
        self.sample_or_log(component, phase, Transition::Exit);
    }

    fn processing_complete(&self, scope: Scope) {
        self.counters.complete(scope);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing_common::LogCapture;
    use std::fs;
    use std::path::{Path, PathBuf};

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = Path::new("test-tmp").join("rss").join(name);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn checker(dir: &Path) -> (RssChecker, Arc<ReportSink>) {
        let sink = Arc::new(ReportSink::new_in_memory());
        let stats = ProcessStatistics::with_paths(dir.join("statm"), dir.join("loadavg"), 4);
        (RssChecker::with_statistics(stats, sink.clone()), sink)
    }

    #[test]
    fn one_line_per_boundary() {
        let dir = scratch_dir("one_line_per_boundary");
        fs::write(dir.join("statm"), "2500 1000 100 1 0 500 0").unwrap();
        fs::write(dir.join("loadavg"), "1.5 1.0 0.5 1/100 42").unwrap();
        let (checker, sink) = checker(&dir);
        let jets = ComponentDescription::new("jets", "JetProducer");

        checker.phase_enter(&jets, Phase::Event);
        checker.phase_exit(&jets, Phase::Event);
        checker.processing_complete(Scope::Event);
        checker.phase_enter(&jets, Phase::Event);

        assert_eq!(
            sink.take_lines(),
            vec![
                " *RSSDUMP* Start_Event0 jets JetProducer RSS/KiB 4000 Size/KiB 10000 Load 1.5",
                " *RSSDUMP* End_Event0 jets JetProducer RSS/KiB 4000 Size/KiB 10000 Load 1.5",
                " *RSSDUMP* Start_Event1 jets JetProducer RSS/KiB 4000 Size/KiB 10000 Load 1.5",
            ]
        );
    }

    #[test]
    fn stream_phases_are_labelled_as_module_phases() {
        let dir = scratch_dir("stream_phases_are_labelled_as_module_phases");
        fs::write(dir.join("statm"), "2500 1000 100 1 0 500 0").unwrap();
        fs::write(dir.join("loadavg"), "1.5 1.0 0.5 1/100 42").unwrap();
        let (checker, sink) = checker(&dir);
        let jets = ComponentDescription::new("jets", "JetProducer");

        checker.phase_enter(&jets, Phase::BeginStream);
        checker.phase_enter(&jets, Phase::StreamBeginRun);
        checker.phase_exit(&jets, Phase::GlobalEndLumi);

        let boundaries: Vec<String> = sink
            .take_lines()
            .iter()
            .map(|line| line.split(' ').nth(2).unwrap().to_string())
            .collect();
        assert_eq!(
            boundaries,
            vec![
                "Start_ModuleBeginStream",
                "Start_ModuleStreamBeginRun0",
                "End_ModuleGlobalEndLumi0",
            ]
        );
    }

    #[test]
    fn unreadable_statistics_are_an_error() {
        let dir = scratch_dir("unreadable_statistics_are_an_error");
        fs::write(dir.join("statm"), "2500 1000 100 1 0 500 0").unwrap();
        let (checker, sink) = checker(&dir);
        let jets = ComponentDescription::new("jets", "JetProducer");

        let result = checker.sample(&jets, Phase::BeginJob, Transition::Enter);
        assert!(matches!(result, Err(SampleError::Unreadable { .. })));
        assert!(sink.take_contents().is_empty());
    }

    #[test]
    fn hook_failures_are_logged_without_a_line() {
        let logs = LogCapture::start();
        let dir = scratch_dir("hook_failures_are_logged_without_a_line");
        let (checker, sink) = checker(&dir);
        let jets = ComponentDescription::new("jets", "JetProducer");

        checker.phase_enter(&jets, Phase::Construction);

        assert!(sink.take_contents().is_empty());
        assert_eq!(logs.count_containing("no sample for module \"jets\""), 1);
    }
}
