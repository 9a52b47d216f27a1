use crate::hooks::{ActivityHooks, StreamId, SINGLE_STREAM};
use crate::phase::{ComponentDescription, GlobalCounters, Phase, Scope};
use crate::procstat::SampleError;
use crate::report::{moduletimer_line, ReportSink};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Wall clock, user and system time spent between two [`CpuTimePoint`]s.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CpuTimes {
    pub real: Duration,
    pub user: Duration,
    pub system: Duration,
}

/// A reading of the wall clock and of the CPU time used by the process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CpuTimePoint {
    pub real: Instant,
    pub user: Duration,
    pub system: Duration,
}

impl CpuTimePoint {
    pub fn now() -> Result<CpuTimePoint, SampleError> {
        let (user, system) = process_cpu_time()?;
        Ok(CpuTimePoint {
            real: Instant::now(),
            user,
            system,
        })
    }

    pub fn elapsed_since(&self, start: &CpuTimePoint) -> CpuTimes {
        CpuTimes {
            real: self.real.saturating_duration_since(start.real),
            user: self.user.saturating_sub(start.user),
            system: self.system.saturating_sub(start.system),
        }
    }
}

#[cfg(unix)]
fn process_cpu_time() -> Result<(Duration, Duration), SampleError> {
    fn to_duration(time: libc::timeval) -> Duration {
        Duration::from_secs(time.tv_sec as u64) + Duration::from_micros(time.tv_usec as u64)
    }

    let mut usage = std::mem::MaybeUninit::<libc::rusage>::zeroed();
    // SAFETY: `getrusage` only writes to the struct we hand it.
    let result = unsafe { libc::getrusage(libc::RUSAGE_SELF, usage.as_mut_ptr()) };
    if result != 0 {
        return Err(SampleError::CpuTime {
            source: io::Error::last_os_error(),
        });
    }
    // SAFETY: zero-initialised, and filled in by the successful call above.
    let usage = unsafe { usage.assume_init() };
    Ok((to_duration(usage.ru_utime), to_duration(usage.ru_stime)))
}

#[cfg(not(unix))]
fn process_cpu_time() -> Result<(Duration, Duration), SampleError> {
    Err(SampleError::CpuTime {
        source: io::Error::new(
            io::ErrorKind::Unsupported,
            "no per-process CPU time on this platform",
        ),
    })
}

pub type Clock = Box<dyn Fn() -> Result<CpuTimePoint, SampleError> + Send + Sync>;

type StartSlots = Mutex<FxHashMap<StreamId, CpuTimePoint>>;

/// Reports how long every module phase took, and how long each event took
/// as a whole.
///
/// Every stream has its own start slots, so phases running concurrently on
/// different streams are timed independently. Within a stream, module
/// phases do not overlap.
pub struct ModuleTimer {
    module_starts: StartSlots,
    event_starts: StartSlots,
    counters: GlobalCounters,
    clock: Clock,
    sink: Arc<ReportSink>,
}

impl ModuleTimer {
    pub fn new(sink: Arc<ReportSink>) -> Self {
        Self::with_clock(sink, Box::new(CpuTimePoint::now))
    }

    pub fn with_clock(sink: Arc<ReportSink>, clock: Clock) -> Self {
        ModuleTimer {
            module_starts: Mutex::new(FxHashMap::default()),
            event_starts: Mutex::new(FxHashMap::default()),
            counters: GlobalCounters::starting_at(1),
            clock,
            sink,
        }
    }

    pub fn counters(&self) -> &GlobalCounters {
        &self.counters
    }

    /// Starts timing a module phase on `stream`. If the clock cannot be
    /// read, any earlier start on that stream is dropped too, so the
    /// matching [`finish_phase`](Self::finish_phase) writes nothing.
    pub fn start_phase(&self, stream: StreamId) -> Result<(), SampleError> {
        self.mark_start(&self.module_starts, stream)
    }

    /// Writes the time since the last [`start_phase`](Self::start_phase) on
    /// `stream`. Returns `Ok(false)` without writing if there was none.
    pub fn finish_phase(
        &self,
        stream: StreamId,
        component: &ComponentDescription,
        phase: Phase,
    ) -> Result<bool, SampleError> {
        let times = match self.elapsed(&self.module_starts, stream)? {
            Some(times) => times,
            None => return Ok(false),
        };

        self.sink.write_line(&moduletimer_line(
            &phase.step_label(&self.counters),
            &component.label,
            &component.type_name,
            &times,
        ));
        Ok(true)
    }

    pub fn start_event(&self, stream: StreamId) -> Result<(), SampleError> {
        self.mark_start(&self.event_starts, stream)
    }

    /// Writes the `EVENT,EVENT` total for the event processed on `stream`,
    /// labelled with the current event number.
    pub fn finish_event(&self, stream: StreamId) -> Result<bool, SampleError> {
        let times = match self.elapsed(&self.event_starts, stream)? {
            Some(times) => times,
            None => return Ok(false),
        };

        let step = format!("event{}", self.counters.event_number());
        self.sink
            .write_line(&moduletimer_line(&step, "EVENT", "EVENT", &times));
        Ok(true)
    }

    fn mark_start(&self, slots: &StartSlots, stream: StreamId) -> Result<(), SampleError> {
        let reading = (self.clock)();
        let mut slots = slots.lock();
        match reading {
            Ok(now) => {
                slots.insert(stream, now);
                Ok(())
            }
            Err(error) => {
                slots.remove(&stream);
                Err(error)
            }
        }
    }

    fn elapsed(
        &self,
        slots: &StartSlots,
        stream: StreamId,
    ) -> Result<Option<CpuTimes>, SampleError> {
        let start = slots.lock().remove(&stream);
        let now = (self.clock)()?;
        Ok(start.map(|start| now.elapsed_since(&start)))
    }
}

impl ActivityHooks for ModuleTimer {
    fn phase_enter(&self, component: &ComponentDescription, phase: Phase) {
        self.stream_phase_enter(SINGLE_STREAM, component, phase);
    }

    fn phase_exit(&self, component: &ComponentDescription, phase: Phase) {
        self.stream_phase_exit(SINGLE_STREAM, component, phase);
    }

    fn processing_started(&self, scope: Scope) {
        self.stream_processing_started(SINGLE_STREAM, scope);
    }

    fn processing_complete(&self, scope: Scope) {
        self.stream_processing_complete(SINGLE_STREAM, scope);
    }

    fn stream_phase_enter(
        &self,
        stream: StreamId,
        component: &ComponentDescription,
        phase: Phase,
    ) {
        if let Err(error) = self.start_phase(stream) {
            error!(
                "ModuleTimer: no timing for module \"{}\" in {}: {}",
                component.label, phase, error
            );
        }
    }

    fn stream_phase_exit(
        &self,
        stream: StreamId,
        component: &ComponentDescription,
        phase: Phase,
    ) {
        match self.finish_phase(stream, component, phase) {
            Ok(true) => {}
            Ok(false) => warn!(
                "ModuleTimer: module \"{}\" left {} without a start time",
                component.label, phase
            ),
            Err(error) => error!(
                "ModuleTimer: no timing for module \"{}\" in {}: {}",
                component.label, phase, error
            ),
        }
    }

    fn stream_processing_started(&self, stream: StreamId, scope: Scope) {
        if scope == Scope::Event {
            if let Err(error) = self.start_event(stream) {
                error!("ModuleTimer: no timing for the event on stream {}: {}", stream, error);
            }
        }
    }

    fn stream_processing_complete(&self, stream: StreamId, scope: Scope) {
        if scope == Scope::Event {
            if let Err(error) = self.finish_event(stream) {
                error!("ModuleTimer: no timing for the event on stream {}: {}", stream, error);
            }
        }
        self.counters.complete(scope);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing_common::LogCapture;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    /// Every reading is 1ms of wall time, 600us of user time and 100us of
    /// system time after the previous one.
    fn stepping_clock() -> Clock {
        let base = Instant::now();
        let ticks = AtomicU64::new(0);
        Box::new(move || {
            let tick = ticks.fetch_add(1, Ordering::SeqCst);
            Ok(CpuTimePoint {
                real: base + Duration::from_millis(tick),
                user: Duration::from_micros(600 * tick),
                system: Duration::from_micros(100 * tick),
            })
        })
    }

    /// A stepping clock whose readings fail while `broken` is set.
    fn breakable_clock(broken: Arc<AtomicBool>) -> Clock {
        let inner = stepping_clock();
        Box::new(move || {
            if broken.load(Ordering::SeqCst) {
                Err(SampleError::CpuTime {
                    source: io::Error::new(io::ErrorKind::Other, "getrusage failed"),
                })
            } else {
                inner()
            }
        })
    }

    fn timer() -> (ModuleTimer, Arc<ReportSink>) {
        let sink = Arc::new(ReportSink::new_in_memory());
        (ModuleTimer::with_clock(sink.clone(), stepping_clock()), sink)
    }

    #[test]
    fn phase_times_in_nanoseconds() {
        let (timer, sink) = timer();
        let jets = ComponentDescription::new("jets", "JetProducer");

        timer.phase_enter(&jets, Phase::BeginJob);
        timer.phase_exit(&jets, Phase::BeginJob);

        assert_eq!(
            sink.take_lines(),
            vec![" *MODULETIMER* beginJob,jets,JetProducer,1000000,600000,100000"]
        );
    }

    #[test]
    fn event_totals_follow_module_lines() {
        let (timer, sink) = timer();
        let jets = ComponentDescription::new("jets", "JetProducer");

        for _ in 0..2 {
            timer.processing_started(Scope::Event);
            timer.phase_enter(&jets, Phase::Event);
            timer.phase_exit(&jets, Phase::Event);
            timer.processing_complete(Scope::Event);
        }

        assert_eq!(
            sink.take_lines(),
            vec![
                " *MODULETIMER* event1,jets,JetProducer,1000000,600000,100000",
                " *MODULETIMER* event1,EVENT,EVENT,3000000,1800000,300000",
                " *MODULETIMER* event2,jets,JetProducer,1000000,600000,100000",
                " *MODULETIMER* event2,EVENT,EVENT,3000000,1800000,300000",
            ]
        );
        assert_eq!(timer.counters().event_number(), 3);
    }

    #[test]
    fn exit_without_enter_writes_nothing() {
        let (timer, sink) = timer();
        let jets = ComponentDescription::new("jets", "JetProducer");

        assert!(!timer.finish_phase(SINGLE_STREAM, &jets, Phase::EndJob).unwrap());
        timer.phase_exit(&jets, Phase::EndJob);
        timer.processing_complete(Scope::Event);

        assert!(sink.take_contents().is_empty());
        assert_eq!(timer.counters().event_number(), 2);
    }

    #[test]
    fn interleaved_streams_are_timed_separately() {
        let (timer, sink) = timer();
        let jets = ComponentDescription::new("jets", "JetProducer");
        let tracks = ComponentDescription::new("tracks", "TrackProducer");

        timer.stream_processing_started(0, Scope::Event);
        timer.stream_phase_enter(0, &jets, Phase::Event);
        timer.stream_processing_started(1, Scope::Event);
        timer.stream_phase_enter(1, &tracks, Phase::Event);
        timer.stream_phase_exit(0, &jets, Phase::Event);
        timer.stream_phase_exit(1, &tracks, Phase::Event);
        timer.stream_processing_complete(0, Scope::Event);
        timer.stream_processing_complete(1, Scope::Event);

        assert_eq!(
            sink.take_lines(),
            vec![
                " *MODULETIMER* event1,jets,JetProducer,3000000,1800000,300000",
                " *MODULETIMER* event1,tracks,TrackProducer,2000000,1200000,200000",
                " *MODULETIMER* event1,EVENT,EVENT,6000000,3600000,600000",
                " *MODULETIMER* event2,EVENT,EVENT,5000000,3000000,500000",
            ]
        );
    }

    #[test]
    fn failed_clock_reading_is_an_error() {
        let broken = Arc::new(AtomicBool::new(false));
        let sink = Arc::new(ReportSink::new_in_memory());
        let timer = ModuleTimer::with_clock(sink.clone(), breakable_clock(broken.clone()));
        let jets = ComponentDescription::new("jets", "JetProducer");

        timer.start_phase(SINGLE_STREAM).unwrap();
        broken.store(true, Ordering::SeqCst);
        let result = timer.finish_phase(SINGLE_STREAM, &jets, Phase::BeginJob);
        assert!(matches!(result, Err(SampleError::CpuTime { .. })));

        assert!(matches!(
            timer.start_phase(SINGLE_STREAM),
            Err(SampleError::CpuTime { .. })
        ));
        broken.store(false, Ordering::SeqCst);
        assert!(!timer.finish_phase(SINGLE_STREAM, &jets, Phase::BeginJob).unwrap());

        assert!(sink.take_contents().is_empty());
    }

    #[test]
    fn hook_failures_are_logged_without_a_line() {
        let logs = LogCapture::start();
        let broken = Arc::new(AtomicBool::new(false));
        let sink = Arc::new(ReportSink::new_in_memory());
        let timer = ModuleTimer::with_clock(sink.clone(), breakable_clock(broken.clone()));
        let jets = ComponentDescription::new("jets", "JetProducer");

        timer.processing_started(Scope::Event);
        timer.phase_enter(&jets, Phase::Event);
        broken.store(true, Ordering::SeqCst);
        timer.phase_exit(&jets, Phase::Event);
        timer.processing_complete(Scope::Event);

        assert!(sink.take_contents().is_empty());
        assert_eq!(logs.count_containing("no timing for module \"jets\""), 1);
        assert_eq!(logs.count_containing("no timing for the event"), 1);
        assert_eq!(timer.counters().event_number(), 2);
    }

    #[test]
    fn real_clock_never_goes_backwards() {
        let first = CpuTimePoint::now().unwrap();
        let second = CpuTimePoint::now().unwrap();
        assert!(second.real >= first.real);
        assert!(second.user >= first.user);
        assert!(second.system >= first.system);
    }
}
