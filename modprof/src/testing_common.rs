//! Test doubles for the pieces the host process normally provides: a
//! scripted allocation counter and a logger that remembers what was logged.

use crate::counters::{CounterFactory, ResourceCounter};
use log::{Level, LevelFilter, Log, Metadata, Record};
use parking_lot::Mutex;
use std::cell::RefCell;
use std::sync::{Arc, Once};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CounterCall {
    Enable,
    Disable,
    Reset,
    ResetMaximum,
}

#[derive(Debug, Default)]
struct MockValues {
    calls: Vec<CounterCall>,
    enabled: bool,
    current_size: i64,
    maximum_size: i64,
    current_allocations: i64,
    maximum_allocations: i64,
}

/// The state behind a [`MockCounter`], shared with the test so it can script
/// what the counter reports and inspect how it was driven.
#[derive(Debug, Default)]
pub struct MockState {
    values: Mutex<MockValues>,
}

impl MockState {
    /// Every enable/disable/reset call in order.
    pub fn calls(&self) -> Vec<CounterCall> {
        self.values.lock().calls.clone()
    }

    /// Only the enable and disable calls, in order.
    pub fn toggles(&self) -> Vec<CounterCall> {
        self.calls()
            .into_iter()
            .filter(|call| matches!(call, CounterCall::Enable | CounterCall::Disable))
            .collect()
    }

    pub fn is_enabled(&self) -> bool {
        self.values.lock().enabled
    }

    /// Sets the live size and allocation count, raising the maxima if they
    /// are exceeded.
    pub fn set_current(&self, size: i64, allocations: i64) {
        let mut values = self.values.lock();
        values.current_size = size;
        values.current_allocations = allocations;
        if size > values.maximum_size {
            values.maximum_size = size;
            values.maximum_allocations = allocations;
        }
    }

    /// Sets a peak that has already been freed again.
    pub fn set_maximum(&self, size: i64, allocations: i64) {
        let mut values = self.values.lock();
        values.maximum_size = size;
        values.maximum_allocations = allocations;
    }
}

pub struct MockCounter {
    state: Arc<MockState>,
}

impl MockCounter {
    pub fn create() -> (MockCounter, Arc<MockState>) {
        let state = Arc::new(MockState::default());
        (
            MockCounter {
                state: state.clone(),
            },
            state,
        )
    }
}

impl ResourceCounter for MockCounter {
    fn enable(&mut self) {
        let mut values = self.state.values.lock();
        values.calls.push(CounterCall::Enable);
        values.enabled = true;
    }

    fn disable(&mut self) {
        let mut values = self.state.values.lock();
        values.calls.push(CounterCall::Disable);
        values.enabled = false;
    }

    fn is_enabled(&self) -> bool {
        self.state.values.lock().enabled
    }

    fn reset(&mut self) {
        let mut values = self.state.values.lock();
        values.calls.push(CounterCall::Reset);
        values.current_size = 0;
        values.maximum_size = 0;
        values.current_allocations = 0;
        values.maximum_allocations = 0;
    }

    fn reset_maximum(&mut self) {
        let mut values = self.state.values.lock();
        values.calls.push(CounterCall::ResetMaximum);
        values.maximum_size = values.current_size;
        values.maximum_allocations = values.current_allocations;
    }

    fn current_size(&self) -> i64 {
        self.state.values.lock().current_size
    }

    fn maximum_size(&self) -> i64 {
        self.state.values.lock().maximum_size
    }

    fn current_allocations(&self) -> i64 {
        self.state.values.lock().current_allocations
    }

    fn maximum_allocations(&self) -> i64 {
        self.state.values.lock().maximum_allocations
    }
}

/// Hands out [`MockCounter`]s, optionally only a limited number of them.
#[derive(Default)]
pub struct MockFactory {
    capacity: Option<usize>,
    states: Mutex<Vec<Arc<MockState>>>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        MockFactory {
            capacity: Some(capacity),
            states: Mutex::new(Vec::new()),
        }
    }

    pub fn created(&self) -> usize {
        self.states.lock().len()
    }

    /// State of the `index`th counter handed out.
    pub fn state(&self, index: usize) -> Arc<MockState> {
        self.states.lock()[index].clone()
    }
}

impl CounterFactory for MockFactory {
    fn create_counter(&self) -> Option<Box<dyn ResourceCounter>> {
        let mut states = self.states.lock();
        if let Some(capacity) = self.capacity {
            if states.len() >= capacity {
                return None;
            }
        }
        let (counter, state) = MockCounter::create();
        states.push(state);
        Some(Box::new(counter))
    }
}

thread_local! {
    static CAPTURED: RefCell<Vec<(Level, String)>> = RefCell::new(Vec::new());
}

struct CapturingLogger;

impl Log for CapturingLogger {
    fn enabled(&self, _: &Metadata<'_>) -> bool {
        true
    }

    fn log(&self, record: &Record<'_>) {
        CAPTURED.with(|captured| {
            captured
                .borrow_mut()
                .push((record.level(), record.args().to_string()))
        });
    }

    fn flush(&self) {}
}

static LOGGER: CapturingLogger = CapturingLogger;
static INSTALL_LOGGER: Once = Once::new();

/// Records log messages emitted on the current thread from now on. Services
/// log on the thread that drives them, so tests running in parallel do not
/// see each other's messages.
pub struct LogCapture {
    _private: (),
}

impl LogCapture {
    pub fn start() -> LogCapture {
        INSTALL_LOGGER.call_once(|| {
            if log::set_logger(&LOGGER).is_ok() {
                log::set_max_level(LevelFilter::Trace);
            }
        });
        CAPTURED.with(|captured| captured.borrow_mut().clear());
        LogCapture { _private: () }
    }

    /// Everything logged on this thread since `start` or the last `take`.
    pub fn take(&self) -> Vec<(Level, String)> {
        CAPTURED.with(|captured| std::mem::take(&mut *captured.borrow_mut()))
    }

    /// How many captured messages contain `needle`, without consuming them.
    pub fn count_containing(&self, needle: &str) -> usize {
        CAPTURED.with(|captured| {
            captured
                .borrow()
                .iter()
                .filter(|(_, message)| message.contains(needle))
                .count()
        })
    }
}
