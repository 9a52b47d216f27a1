//! Prompting an external profiler to dump its profile.
//!
//! The profiler (igprof, run with `-D <file>`) watches a file and writes a
//! dump every time that file is touched. Since every dump goes to the same
//! path, each one is renamed right after it is written so the next dump does
//! not overwrite it.
//!
//! There is no way to find out when the profiler has finished writing, so
//! after touching the file we sleep for a fixed time and then move whatever
//! is there. If the profiler takes longer than that the rename fails (or
//! moves a partial dump); that is logged and otherwise ignored.

use crate::config::DumpConfig;
use crate::hooks::ActivityHooks;
use crate::phase::{ComponentDescription, GlobalCounters, Phase, Scope};
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

/// When and where dumps are made. Fixed once the trigger is built.
#[derive(Clone, Debug)]
pub struct DumpSchedule {
    pub watch_file: PathBuf,
    pub dump_file: PathBuf,
    pub module_name: String,
    pub event_start_numbers: FxHashSet<u64>,
    pub event_end_numbers: FxHashSet<u64>,
    pub sleep_after_touch: Duration,
}

impl From<&DumpConfig> for DumpSchedule {
    fn from(config: &DumpConfig) -> Self {
        DumpSchedule {
            watch_file: config.igprof_watch_file.clone(),
            dump_file: config.igprof_dump.clone(),
            module_name: config.module_name.clone(),
            event_start_numbers: config.event_start_numbers.iter().copied().collect(),
            event_end_numbers: config.event_end_numbers.iter().copied().collect(),
            sleep_after_touch: config.sleep_after_touch(),
        }
    }
}

pub struct DumpTrigger {
    schedule: DumpSchedule,
    counters: GlobalCounters,
    /// Number of `dump_now` calls, for unique file names. Also serializes
    /// dumps so two of them never race on the same dump file.
    user_dumps: Mutex<u64>,
}

impl DumpTrigger {
    pub fn new(schedule: DumpSchedule) -> Self {
        DumpTrigger {
            schedule,
            counters: GlobalCounters::starting_at(0),
            user_dumps: Mutex::new(0),
        }
    }

    pub fn from_config(config: &DumpConfig) -> Self {
        Self::new(DumpSchedule::from(config))
    }

    pub fn schedule(&self) -> &DumpSchedule {
        &self.schedule
    }

    pub fn event_number(&self) -> u64 {
        self.counters.event_number()
    }

    /// Asks for a dump right now. The dump file gets `suffix` appended, or
    /// `userDump<n>` if no suffix is given, `n` counting the calls so far.
    ///
    /// Returns the path the dump was moved to.
    pub fn dump_now(&self, suffix: Option<&str>) -> io::Result<PathBuf> {
        let mut user_dumps = self.user_dumps.lock();
        *user_dumps += 1;
        let suffix = match suffix {
            Some(suffix) if !suffix.is_empty() => suffix.to_string(),
            _ => format!("userDump{}", *user_dumps),
        };
        self.touch_and_move(&suffix)
    }

    /// Touches the watch file, waits, then moves the dump to
    /// `<dump_file><suffix>`. Failures are logged here; the result is only
    /// for callers that want to know.
    pub fn touch_and_move(&self, suffix: &str) -> io::Result<PathBuf> {
        let result = self.try_touch_and_move(suffix);
        if let Err(error) = &result {
            error!(
                "IgprofDump: unable to make igprof dump, got the error: {}",
                error
            );
        }
        result
    }

    fn try_touch_and_move(&self, suffix: &str) -> io::Result<PathBuf> {
        // Appending, so the file is created if needed but never truncated.
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.schedule.watch_file)
            .map_err(|e| {
                io::Error::new(
                    e.kind(),
                    format!("touching {}: {}", self.schedule.watch_file.display(), e),
                )
            })?;

        thread::sleep(self.schedule.sleep_after_touch);

        let destination = with_suffix(&self.schedule.dump_file, suffix);
        fs::rename(&self.schedule.dump_file, &destination).map_err(|e| {
            io::Error::new(
                e.kind(),
                format!(
                    "moving {} to {}: {}",
                    self.schedule.dump_file.display(),
                    destination.display(),
                    e
                ),
            )
        })?;
        Ok(destination)
    }

    /// Dumps if `component` is the configured module and the current event
    /// is one of the configured start (or end) events. Returns whether a dump
    /// was attempted.
    pub fn check_policy_trigger(&self, component: &str, is_event_start: bool) -> bool {
        if component != self.schedule.module_name {
            return false;
        }

        let event = self.counters.event_number();
        let (numbers, prefix) = if is_event_start {
            (&self.schedule.event_start_numbers, "StartEvent")
        } else {
            (&self.schedule.event_end_numbers, "EndEvent")
        };
        if !numbers.contains(&event) {
            return false;
        }

        let _serialize = self.user_dumps.lock();
        // Errors are already logged.
        let _ = self.touch_and_move(&format!("{}{}", prefix, event));
        true
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

impl ActivityHooks for DumpTrigger {
    fn phase_enter(&self, component: &ComponentDescription, phase: Phase) {
        if phase == Phase::Event {
            self.check_policy_trigger(&component.label, true);
        }
    }

    fn phase_exit(&self, component: &ComponentDescription, phase: Phase) {
        if phase == Phase::Event {
            self.check_policy_trigger(&component.label, false);
        }
    }

    fn processing_complete(&self, scope: Scope) {
        self.counters.complete(scope);
    }
}
