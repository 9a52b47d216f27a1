//! Where report lines end up, and what they look like.

use crate::phase::ComponentDescription;
use crate::procstat::MemoryUse;
use crate::timer::CpuTimes;
use parking_lot::Mutex;
use std::fmt::Debug;
use std::fs;
use std::io::{self, Write};
use std::path::Path;

pub const MEMCOUNTER_MARKER: &str = "*MEMCOUNTER*";
pub const MODULETIMER_MARKER: &str = "*MODULETIMER*";
pub const RSSDUMP_MARKER: &str = "*RSSDUMP*";

/// The values read from a module's counter at the end of a phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemorySample {
    pub current_size: i64,
    pub maximum_size: i64,
    pub current_allocations: i64,
    pub maximum_allocations: i64,
}

/// The `BackingStorage` is what the report lines get written to.
trait BackingStorage: Write + Send + Debug {
    fn drain_bytes(&mut self) -> Vec<u8>;
}

impl BackingStorage for fs::File {
    fn drain_bytes(&mut self) -> Vec<u8> {
        unimplemented!()
    }
}

#[derive(Debug)]
struct Stdout;

impl Write for Stdout {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stdout().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stdout().flush()
    }
}

impl BackingStorage for Stdout {
    fn drain_bytes(&mut self) -> Vec<u8> {
        unimplemented!()
    }
}

impl BackingStorage for Vec<u8> {
    fn drain_bytes(&mut self) -> Vec<u8> {
        let mut bytes = Vec::new();
        std::mem::swap(&mut bytes, self);
        bytes
    }
}

/// A line-oriented destination for report lines, shared by all services of
/// a job. Each line is written and flushed under one lock so lines from
/// concurrent streams never interleave.
#[derive(Debug)]
pub struct ReportSink {
    storage: Mutex<Box<dyn BackingStorage>>,
}

impl ReportSink {
    pub fn stdout() -> ReportSink {
        ReportSink {
            storage: Mutex::new(Box::new(Stdout)),
        }
    }

    pub fn new_in_memory() -> ReportSink {
        ReportSink {
            storage: Mutex::new(Box::new(Vec::new())),
        }
    }

    pub fn from_path(path: &Path) -> io::Result<ReportSink> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = fs::OpenOptions::new().create(true).append(true).open(path)?;

        Ok(ReportSink {
            storage: Mutex::new(Box::new(file)),
        })
    }

    /// Writes one line. Failing to write a report line must not disturb the
    /// job, so errors are logged and otherwise dropped.
    pub fn write_line(&self, line: &str) {
        let mut storage = self.storage.lock();
        let result = writeln!(storage, "{}", line).and_then(|_| storage.flush());
        if let Err(error) = result {
            error!("ReportSink: unable to write report line: {}", error);
        }
    }

    /// Takes everything written so far. This method is meant to be used for
    /// writing unit tests. It will panic if the sink does not write to memory.
    pub fn take_contents(&self) -> String {
        let bytes = self.storage.lock().drain_bytes();
        String::from_utf8(bytes).expect("report lines are always UTF-8")
    }

    /// Like [`ReportSink::take_contents`], split into lines.
    pub fn take_lines(&self) -> Vec<String> {
        self.take_contents().lines().map(str::to_string).collect()
    }
}

/// ` *MEMCOUNTER* <step>,<label>,<type>,<cur>,<max>,<curAllocs>,<maxAllocs>[,<prevStep>,<prevSize>]`
pub fn memcounter_line(
    step: &str,
    component: &ComponentDescription,
    sample: &MemorySample,
    previous: Option<(&str, i64)>,
) -> String {
    let mut line = format!(
        " {} {},{},{},{},{},{},{}",
        MEMCOUNTER_MARKER,
        step,
        component.label,
        component.type_name,
        sample.current_size,
        sample.maximum_size,
        sample.current_allocations,
        sample.maximum_allocations,
    );
    if let Some((previous_step, previous_size)) = previous {
        line.push_str(&format!(",{},{}", previous_step, previous_size));
    }
    line
}

/// ` *MODULETIMER* <step>,<label>,<type>,<real>,<user>,<system>`, times in
/// nanoseconds.
pub fn moduletimer_line(step: &str, label: &str, type_name: &str, elapsed: &CpuTimes) -> String {
    format!(
        " {} {},{},{},{},{},{}",
        MODULETIMER_MARKER,
        step,
        label,
        type_name,
        elapsed.real.as_nanos(),
        elapsed.user.as_nanos(),
        elapsed.system.as_nanos(),
    )
}

/// ` *RSSDUMP* <boundary> <label> <type> RSS/KiB <rss> Size/KiB <size> Load <load>`
pub fn rssdump_line(
    boundary: &str,
    component: &ComponentDescription,
    memory: &MemoryUse,
    load: f32,
) -> String {
    format!(
        " {} {} {} {} RSS/KiB {} Size/KiB {} Load {}",
        RSSDUMP_MARKER,
        boundary,
        component.label,
        component.type_name,
        memory.rss_kib,
        memory.size_kib,
        load,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn memcounter_line_without_previous_sample() {
        let component = ComponentDescription::new("tracks", "TrackProducer");
        let sample = MemorySample {
            current_size: 4096,
            maximum_size: 8192,
            current_allocations: 3,
            maximum_allocations: 7,
        };

        assert_eq!(
            memcounter_line("Construction", &component, &sample, None),
            " *MEMCOUNTER* Construction,tracks,TrackProducer,4096,8192,3,7"
        );
    }

    #[test]
    fn memcounter_line_with_previous_sample() {
        let component = ComponentDescription::new("tracks", "TrackProducer");
        let sample = MemorySample {
            current_size: 10,
            maximum_size: 20,
            current_allocations: 1,
            maximum_allocations: 2,
        };

        assert_eq!(
            memcounter_line("event2", &component, &sample, Some(("event1", -64))),
            " *MEMCOUNTER* event2,tracks,TrackProducer,10,20,1,2,event1,-64"
        );
    }

    #[test]
    fn moduletimer_line_in_nanoseconds() {
        let elapsed = CpuTimes {
            real: Duration::from_micros(3),
            user: Duration::from_nanos(2000),
            system: Duration::from_nanos(5),
        };

        assert_eq!(
            moduletimer_line("beginJob", "tracks", "TrackProducer", &elapsed),
            " *MODULETIMER* beginJob,tracks,TrackProducer,3000,2000,5"
        );
    }

    #[test]
    fn rssdump_line_layout() {
        let component = ComponentDescription::new("tracks", "TrackProducer");
        let memory = MemoryUse {
            rss_kib: 1200,
            size_kib: 5400,
        };

        assert_eq!(
            rssdump_line("Start_Event3", &component, &memory, 0.5),
            " *RSSDUMP* Start_Event3 tracks TrackProducer RSS/KiB 1200 Size/KiB 5400 Load 0.5"
        );
    }

    #[test]
    fn in_memory_sink_collects_lines() {
        let sink = ReportSink::new_in_memory();
        sink.write_line("first");
        sink.write_line("second");

        assert_eq!(sink.take_lines(), vec!["first", "second"]);
        assert!(sink.take_contents().is_empty());
    }
}
