//! Host scheduler adapter and a reference event loop
//!
//! The engine needs exactly two things from its host: a delayed callback
//! ([`HostScheduler::schedule_after`], cancellable) and a "run soon"
//! callback that does not block the current call stack
//! ([`HostScheduler::schedule_soon`]). Any event loop can provide them.
//!
//! [`EventLoop`] is a deterministic single-threaded host with microtask
//! and timer queues and virtual millisecond time. Tests, benchmarks and
//! the CLI drive Deferreds and LightIterators on it.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::time::Instant;

use tracing::{trace, warn};

use crate::error::{Error, Result};

/// A unit of host work. An `Err` escaping a task is reported as uncaught.
pub type Task = Box<dyn FnOnce() -> Result<()>>;

/// Handle returned by [`HostScheduler::schedule_after`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(pub u64);

impl fmt::Display for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timer({})", self.0)
    }
}

/// The two scheduling primitives the engine consumes from its host
pub trait HostScheduler {
    /// Run `task` no sooner than `delay_ms` from now.
    fn schedule_after(&self, delay_ms: u64, task: Task) -> TimerHandle;

    /// Forget a task scheduled with [`schedule_after`](Self::schedule_after).
    fn cancel_scheduled(&self, handle: TimerHandle);

    /// Run `task` as soon as possible, after the current call stack unwinds.
    fn schedule_soon(&self, task: Task);
}

/// A timer waiting for its virtual fire time
struct Macrotask {
    /// Unique task ID
    id: u64,
    /// The work to run
    task: Task,
    /// When the task should fire (virtual time in ms)
    fire_at: u64,
}

/// Result of running the event loop via [`EventLoop::run_until_idle`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunResult {
    /// Microtasks dequeued and processed
    pub microtasks_processed: usize,
    /// Timers dequeued and processed
    pub macrotasks_processed: usize,
    /// Loop iterations (each iteration = drain microtasks + one timer)
    pub iterations: usize,
    /// Virtual time when the loop finished
    pub final_time: u64,
}

/// Runtime statistics for the event loop
#[derive(Clone, Debug, Default)]
pub struct EventLoopStats {
    /// Total microtasks processed across all ticks
    pub total_microtasks: u64,
    /// Total timers processed across all ticks
    pub total_macrotasks: u64,
    /// Total number of ticks
    pub total_ticks: u64,
    /// Maximum microtasks drained in a single tick
    pub max_microtasks_per_tick: u64,
    /// Timers removed before they fired
    pub timers_cancelled: u64,
    /// Errors that escaped a task
    pub uncaught_errors: u64,
    /// Longest single task in wall-clock microseconds
    pub longest_task_us: u64,
}

/// Event loop configuration
#[derive(Debug, Clone)]
pub struct EventLoopConfig {
    /// Maximum microtasks to drain per tick (starvation protection)
    pub max_microtasks_per_tick: usize,
}

impl Default for EventLoopConfig {
    fn default() -> Self {
        Self {
            max_microtasks_per_tick: 10_000,
        }
    }
}

struct EventLoopState {
    /// Microtask queue (runs before any timer)
    microtask_queue: VecDeque<Task>,
    /// Timer queue
    macrotask_queue: Vec<Macrotask>,
    /// Current virtual time in milliseconds
    virtual_time: u64,
    /// Next timer ID
    next_timer_id: u64,
    /// Errors that escaped tasks, oldest first
    uncaught: Vec<Error>,
    config: EventLoopConfig,
    stats: EventLoopStats,
}

/// Deterministic single-threaded host
///
/// Share it as `Rc<EventLoop>`; tasks may schedule more work while they run.
pub struct EventLoop {
    state: RefCell<EventLoopState>,
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLoop {
    /// Create a new event loop
    pub fn new() -> Self {
        Self::with_config(EventLoopConfig::default())
    }

    /// Create an event loop with custom limits
    pub fn with_config(config: EventLoopConfig) -> Self {
        Self {
            state: RefCell::new(EventLoopState {
                microtask_queue: VecDeque::new(),
                macrotask_queue: Vec::new(),
                virtual_time: 0,
                next_timer_id: 1,
                uncaught: Vec::new(),
                config,
                stats: EventLoopStats::default(),
            }),
        }
    }

    /// Get current virtual time
    pub fn current_time(&self) -> u64 {
        self.state.borrow().virtual_time
    }

    /// Advance virtual time without running anything
    pub fn advance_time(&self, ms: u64) {
        let mut state = self.state.borrow_mut();
        state.virtual_time = state.virtual_time.saturating_add(ms);
    }

    /// Check if there are pending microtasks
    pub fn has_pending_microtasks(&self) -> bool {
        !self.state.borrow().microtask_queue.is_empty()
    }

    /// Check if there are pending timers
    pub fn has_pending_macrotasks(&self) -> bool {
        !self.state.borrow().macrotask_queue.is_empty()
    }

    /// Check if the event loop has any pending work
    pub fn has_pending_work(&self) -> bool {
        self.has_pending_microtasks() || self.has_pending_macrotasks()
    }

    /// Number of timers waiting to fire
    pub fn pending_timers(&self) -> usize {
        self.state.borrow().macrotask_queue.len()
    }

    /// Get the time of the next scheduled timer
    pub fn next_macrotask_time(&self) -> Option<u64> {
        self.state
            .borrow()
            .macrotask_queue
            .iter()
            .map(|t| t.fire_at)
            .min()
    }

    /// Runtime statistics
    pub fn stats(&self) -> EventLoopStats {
        self.state.borrow().stats.clone()
    }

    /// Get and clear errors that escaped tasks
    pub fn drain_uncaught(&self) -> Vec<Error> {
        std::mem::take(&mut self.state.borrow_mut().uncaught)
    }

    /// Drop all pending work
    pub fn clear(&self) {
        let mut state = self.state.borrow_mut();
        state.microtask_queue.clear();
        state.macrotask_queue.clear();
        state.uncaught.clear();
    }

    fn dequeue_microtask(&self) -> Option<Task> {
        self.state.borrow_mut().microtask_queue.pop_front()
    }

    /// Remove the earliest timer due at the current virtual time
    fn dequeue_ready_macrotask(&self) -> Option<Task> {
        let mut state = self.state.borrow_mut();
        let now = state.virtual_time;
        let idx = state
            .macrotask_queue
            .iter()
            .enumerate()
            .filter(|(_, t)| t.fire_at <= now)
            .min_by_key(|(_, t)| (t.fire_at, t.id))
            .map(|(i, _)| i)?;
        Some(state.macrotask_queue.remove(idx).task)
    }

    /// Run a task with no borrow held, recording any escaping error
    fn run_task(&self, task: Task) {
        let started = Instant::now();
        let outcome = task();
        let elapsed = started.elapsed().as_micros() as u64;

        let mut state = self.state.borrow_mut();
        state.stats.longest_task_us = state.stats.longest_task_us.max(elapsed);
        if let Err(err) = outcome {
            if err.is_stop() {
                return;
            }
            warn!(error = %err, time = state.virtual_time, "uncaught error in scheduled task");
            state.stats.uncaught_errors += 1;
            state.uncaught.push(err);
        }
    }

    /// Drain microtasks up to the per-tick limit. Returns how many ran.
    pub fn run_microtasks(&self) -> usize {
        let limit = self.state.borrow().config.max_microtasks_per_tick;
        let mut count = 0;
        while count < limit {
            let Some(task) = self.dequeue_microtask() else {
                break;
            };
            self.run_task(task);
            count += 1;
        }

        let mut state = self.state.borrow_mut();
        state.stats.total_microtasks += count as u64;
        state.stats.max_microtasks_per_tick = state.stats.max_microtasks_per_tick.max(count as u64);
        count
    }

    /// One tick: drain microtasks, then run at most one due timer.
    /// Returns `(microtasks, timers)` processed.
    pub fn tick(&self) -> (usize, usize) {
        let microtasks = self.run_microtasks();
        let timers = match self.dequeue_ready_macrotask() {
            Some(task) => {
                self.run_task(task);
                self.state.borrow_mut().stats.total_macrotasks += 1;
                1
            }
            None => 0,
        };
        self.state.borrow_mut().stats.total_ticks += 1;
        (microtasks, timers)
    }

    /// Run until no work remains, jumping virtual time to each next timer.
    pub fn run_until_idle(&self) -> RunResult {
        self.run_bounded(None)
    }

    /// Run for at most `ms` of virtual time from now.
    pub fn run_for(&self, ms: u64) -> RunResult {
        let deadline = self.current_time().saturating_add(ms);
        let result = self.run_bounded(Some(deadline));
        let mut state = self.state.borrow_mut();
        if state.virtual_time < deadline {
            state.virtual_time = deadline;
        }
        RunResult {
            final_time: state.virtual_time,
            ..result
        }
    }

    fn run_bounded(&self, deadline: Option<u64>) -> RunResult {
        let mut result = RunResult::default();
        loop {
            let (microtasks, timers) = self.tick();
            result.microtasks_processed += microtasks;
            result.macrotasks_processed += timers;
            if microtasks == 0 && timers == 0 {
                if self.has_pending_microtasks() {
                    continue;
                }
                match self.next_macrotask_time() {
                    Some(fire_at) if deadline.map_or(true, |d| fire_at <= d) => {
                        let mut state = self.state.borrow_mut();
                        if fire_at > state.virtual_time {
                            trace!(from = state.virtual_time, to = fire_at, "advancing virtual time");
                            state.virtual_time = fire_at;
                        }
                    }
                    _ => break,
                }
            }
            result.iterations += 1;
        }
        result.final_time = self.current_time();
        result
    }
}

impl HostScheduler for EventLoop {
    fn schedule_after(&self, delay_ms: u64, task: Task) -> TimerHandle {
        let mut state = self.state.borrow_mut();
        let id = state.next_timer_id;
        state.next_timer_id += 1;
        let fire_at = state.virtual_time.saturating_add(delay_ms);
        state.macrotask_queue.push(Macrotask { id, task, fire_at });
        TimerHandle(id)
    }

    fn cancel_scheduled(&self, handle: TimerHandle) {
        let mut state = self.state.borrow_mut();
        let before = state.macrotask_queue.len();
        state.macrotask_queue.retain(|t| t.id != handle.0);
        if state.macrotask_queue.len() < before {
            state.stats.timers_cancelled += 1;
        }
    }

    fn schedule_soon(&self, task: Task) {
        self.state.borrow_mut().microtask_queue.push_back(task);
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("EventLoop")
            .field("virtual_time", &state.virtual_time)
            .field("microtasks", &state.microtask_queue.len())
            .field("timers", &state.macrotask_queue.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    fn recorder() -> (Rc<RefCell<Vec<&'static str>>>, impl Fn(&'static str) -> Task) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = log.clone();
        let make = move |name: &'static str| -> Task {
            let sink = sink.clone();
            Box::new(move || {
                sink.borrow_mut().push(name);
                Ok(())
            })
        };
        (log, make)
    }

    #[test]
    fn test_event_loop_creation() {
        let el = EventLoop::new();
        assert_eq!(el.current_time(), 0);
        assert!(!el.has_pending_work());
    }

    #[test]
    fn test_microtasks_run_before_timers() {
        let el = EventLoop::new();
        let (log, task) = recorder();
        el.schedule_after(0, task("timer"));
        el.schedule_soon(task("micro"));
        el.run_until_idle();
        assert_eq!(*log.borrow(), vec!["micro", "timer"]);
    }

    #[test]
    fn test_timer_scheduling() {
        let el = EventLoop::new();
        let (log, task) = recorder();
        let id = el.schedule_after(100, task("late"));
        el.schedule_after(10, task("early"));
        assert_eq!(id, TimerHandle(1));

        // Not ready yet
        assert_eq!(el.tick(), (0, 0));

        let result = el.run_until_idle();
        assert_eq!(*log.borrow(), vec!["early", "late"]);
        assert_eq!(result.macrotasks_processed, 2);
        assert_eq!(result.final_time, 100);
    }

    #[test]
    fn test_equal_fire_times_are_fifo() {
        let el = EventLoop::new();
        let (log, task) = recorder();
        el.schedule_after(5, task("a"));
        el.schedule_after(5, task("b"));
        el.schedule_after(5, task("c"));
        el.run_until_idle();
        assert_eq!(*log.borrow(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_timer_cancellation() {
        let el = EventLoop::new();
        let (log, task) = recorder();
        let id = el.schedule_after(100, task("never"));
        el.cancel_scheduled(id);
        el.run_until_idle();
        assert!(log.borrow().is_empty());
        assert_eq!(el.stats().timers_cancelled, 1);
    }

    #[test]
    fn test_run_for_stops_at_deadline() {
        let el = EventLoop::new();
        let (log, task) = recorder();
        el.schedule_after(10, task("in"));
        el.schedule_after(50, task("out"));
        let result = el.run_for(20);
        assert_eq!(*log.borrow(), vec!["in"]);
        assert_eq!(result.final_time, 20);
        assert!(el.has_pending_macrotasks());
    }

    #[test]
    fn test_huge_delays_saturate() {
        let el = EventLoop::new();
        let (log, task) = recorder();
        el.advance_time(5);
        el.schedule_after(u64::MAX, task("far"));
        assert_eq!(el.next_macrotask_time(), Some(u64::MAX));
        el.run_for(u64::MAX);
        assert_eq!(el.current_time(), u64::MAX);
        assert_eq!(*log.borrow(), vec!["far"]);
        el.advance_time(1);
        assert_eq!(el.current_time(), u64::MAX);
    }

    #[test]
    fn test_uncaught_errors_are_collected() {
        let el = EventLoop::new();
        el.schedule_soon(Box::new(|| Err(Error::raised("boom"))));
        el.schedule_soon(Box::new(|| Err(Error::StopIteration)));
        el.run_until_idle();
        let errors = el.drain_uncaught();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].to_string(), "Error: boom");
        assert!(el.drain_uncaught().is_empty());
    }

    #[test]
    fn test_tasks_can_schedule_more_work() {
        let el = Rc::new(EventLoop::new());
        let count = Rc::new(RefCell::new(0));
        let (el2, count2) = (el.clone(), count.clone());
        el.schedule_soon(Box::new(move || {
            *count2.borrow_mut() += 1;
            let count3 = count2.clone();
            el2.schedule_after(5, Box::new(move || {
                *count3.borrow_mut() += 1;
                Ok(())
            }));
            Ok(())
        }));
        el.run_until_idle();
        assert_eq!(*count.borrow(), 2);
        assert_eq!(el.current_time(), 5);
    }

    #[test]
    fn test_microtask_starvation_guard() {
        let el = EventLoop::with_config(EventLoopConfig {
            max_microtasks_per_tick: 2,
        });
        let (log, task) = recorder();
        for _ in 0..5 {
            el.schedule_soon(task("m"));
        }
        assert_eq!(el.tick(), (2, 0));
        el.run_until_idle();
        assert_eq!(log.borrow().len(), 5);
        assert_eq!(el.stats().max_microtasks_per_tick, 2);
    }
}
