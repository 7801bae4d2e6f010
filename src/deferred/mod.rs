//! Deferred: a chainable future with cancellation and nested flattening
//!
//! A Deferred holds an ordered queue of [`ChainCell`]s. Once started with
//! [`Deferred::begin`] or [`Deferred::raise`] it drains that queue, running
//! each cell's success or failure callback against the current reply:
//!
//! - an `Ok` return becomes the next reply on the success branch;
//! - an `Err` flips the chain onto the failure branch, where a later
//!   `rescue`/`ensure` can observe and recover it;
//! - [`Error::StopIteration`] ends the chain cleanly;
//! - a returned [`Value::Deferred`] pauses the chain until that child
//!   settles and its result is adopted, so nested Deferreds never leak out
//!   as values.
//!
//! Asynchronous Deferreds (the default) run one cell per host turn, after
//! the configured speed delay. Synchronous ones drain in the caller's turn.
//!
//! A chain that ends on an unobserved failure re-throws the error to the
//! host after the speed delay, unless an errback is appended first.
//!
//! # Example
//! ```
//! use std::rc::Rc;
//! use deferlight::{Engine, EventLoop, Error, Value};
//!
//! let host = Rc::new(EventLoop::new());
//! let engine = Engine::new(host.clone());
//!
//! let d = engine.deferred();
//! d.then(|_| Err(Error::raised("boom")))
//!     .then(|_| Ok(Value::from("skipped")))
//!     .rescue(|e| Ok(Value::from(format!("recovered from {}", e))));
//! d.begin(1);
//! host.run_until_idle();
//! assert_eq!(
//!     d.reply().unwrap().unwrap(),
//!     Value::from("recovered from Error: boom")
//! );
//! ```

pub mod chain;
pub mod options;

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use rustc_hash::FxHashMap as HashMap;
use tracing::{debug, trace};

use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::event_loop::{Task, TimerHandle};
use crate::speed::Speed;
use crate::value::Value;

pub use chain::{ChainCell, Reply};
pub use options::{Condition, DeferredOptions, Hook, State};

/// Smallest polling delay used by `till`, so polling never pins virtual time.
const TILL_MIN_POLL_MS: u64 = 1;

static NEXT_DEFERRED_ID: AtomicU64 = AtomicU64::new(1);

/// What the drain loop is doing right now
enum Activity {
    /// Nothing queued with the host; `fire` may start a drain.
    Idle,
    /// A drain is queued with the host.
    Scheduled,
    /// A chain callback is on the stack.
    Running,
    /// Paused until a child Deferred settles.
    WaitingOnChild(Deferred),
}

/// A failure report waiting on the host's delayed-callback queue
struct PendingFailure {
    handle: TimerHandle,
}

struct Inner {
    id: u64,
    state: State,
    reply: Reply,
    chain: VecDeque<ChainCell>,
    speed: Speed,
    is_async: bool,
    cancellers: Vec<Hook>,
    stoppers: Vec<Hook>,
    storage: HashMap<String, Value>,
    activity: Activity,
    cancelled: bool,
    ended: bool,
    /// Whether the host has been handed a drain before
    fired_once: bool,
    /// The current failure has passed through an errback
    failure_observed: bool,
    /// The current failure has already been re-thrown to the host
    failure_reported: bool,
    pending_unhandled: Option<PendingFailure>,
}

impl Inner {
    fn is_unfired(&self) -> bool {
        self.state.contains(State::UNFIRED)
    }

    fn is_idle(&self) -> bool {
        matches!(self.activity, Activity::Idle)
    }

    /// Record the outcome of a step. `observed` marks failures an errback saw.
    fn record(&mut self, reply: Reply, observed: bool) {
        match &reply {
            Ok(_) => self.state = State::SUCCESS,
            Err(_) => {
                self.state = State::FAILURE;
                self.failure_observed = observed;
                if !observed {
                    self.failure_reported = false;
                }
            }
        }
        self.reply = reply;
    }
}

/// Handle to a Deferred. Clones share the same chain.
#[derive(Clone)]
pub struct Deferred {
    inner: Rc<RefCell<Inner>>,
    engine: Engine,
}

impl Deferred {
    /// A new unfired asynchronous Deferred
    pub fn new(engine: &Engine) -> Self {
        Self::with_options(engine, DeferredOptions::default())
    }

    /// A new unfired Deferred with options
    pub fn with_options(engine: &Engine, options: DeferredOptions) -> Self {
        let id = NEXT_DEFERRED_ID.fetch_add(1, Ordering::Relaxed);
        Self {
            inner: Rc::new(RefCell::new(Inner {
                id,
                state: State::UNFIRED,
                reply: Ok(Value::Undefined),
                chain: VecDeque::new(),
                speed: options.speed,
                is_async: options.is_async,
                cancellers: options.cancellers,
                stoppers: options.stoppers,
                storage: HashMap::default(),
                activity: Activity::Idle,
                cancelled: false,
                ended: false,
                fired_once: false,
                failure_observed: false,
                failure_reported: false,
                pending_unhandled: None,
            })),
            engine: engine.clone(),
        }
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    pub fn id(&self) -> u64 {
        self.inner.borrow().id
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn state(&self) -> State {
        self.inner.borrow().state
    }

    pub fn is_fired(&self) -> bool {
        self.state().intersects(State::FIRED)
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.borrow().cancelled
    }

    pub fn is_ended(&self) -> bool {
        self.inner.borrow().ended
    }

    /// Whether the chain is paused on a child Deferred
    pub fn is_waiting(&self) -> bool {
        matches!(self.inner.borrow().activity, Activity::WaitingOnChild(_))
    }

    /// Cells queued and not yet run
    pub fn pending_cells(&self) -> usize {
        self.inner.borrow().chain.len()
    }

    /// The current reply, or `None` before the Deferred fires
    pub fn reply(&self) -> Option<Reply> {
        let inner = self.inner.borrow();
        if inner.is_unfired() {
            None
        } else {
            Some(inner.reply.clone())
        }
    }

    pub fn ptr_eq(&self, other: &Deferred) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    // -----------------------------------------------------------------------
    // Chain building
    // -----------------------------------------------------------------------

    /// Append a success callback
    pub fn then<F>(&self, on_success: F) -> &Self
    where
        F: FnOnce(Value) -> Result<Value> + 'static,
    {
        self.push_cell(ChainCell::on_success(on_success))
    }

    /// Append a cell with both callbacks
    pub fn then_both<S, F>(&self, on_success: S, on_failure: F) -> &Self
    where
        S: FnOnce(Value) -> Result<Value> + 'static,
        F: FnOnce(Error) -> Result<Value> + 'static,
    {
        self.push_cell(ChainCell::new(Some(Box::new(on_success)), Some(Box::new(on_failure))))
    }

    /// Append a success callback that receives an array reply of exactly
    /// `arity` elements as separate arguments
    pub fn then_destructured<F>(&self, arity: usize, on_success: F) -> &Self
    where
        F: FnOnce(Vec<Value>) -> Result<Value> + 'static,
    {
        self.push_cell(ChainCell::destructured(arity, on_success))
    }

    /// Append a failure callback
    pub fn rescue<F>(&self, on_failure: F) -> &Self
    where
        F: FnOnce(Error) -> Result<Value> + 'static,
    {
        self.push_cell(ChainCell::on_failure(on_failure))
    }

    /// Append a callback run on either branch
    pub fn ensure<F>(&self, f: F) -> &Self
    where
        F: FnOnce(Reply) -> Result<Value> + 'static,
    {
        self.push_cell(ChainCell::on_settled(f))
    }

    /// Refuse further `then` calls; queued cells still run
    pub fn end(&self) -> &Self {
        self.inner.borrow_mut().ended = true;
        self
    }

    /// Suspend the chain for `seconds`, then continue with the same reply
    pub fn wait(&self, seconds: f64) -> &Self {
        self.wait_with(seconds, None)
    }

    /// Suspend the chain for `seconds`; continue with `value` when given
    pub fn wait_with(&self, seconds: f64, value: Option<Value>) -> &Self {
        let engine = self.engine.clone();
        self.then(move |reply| {
            let out = value.unwrap_or(reply);
            Ok(Value::Deferred(engine.sleep(seconds, out)))
        })
    }

    /// Suspend the chain until `condition` holds, then continue with the
    /// same reply. A falsy static condition never resumes.
    pub fn till(&self, condition: impl Into<Condition>) -> &Self {
        let mut condition = condition.into();
        let engine = self.engine.clone();
        let delay = self.speed().max(TILL_MIN_POLL_MS);
        self.then(move |reply| {
            if condition.check(&reply)? {
                return Ok(reply);
            }
            let gate = engine.deferred_with(DeferredOptions::new().sync());
            poll_condition(engine, gate.clone(), condition, reply, delay);
            Ok(Value::Deferred(gate))
        })
    }

    // -----------------------------------------------------------------------
    // Options
    // -----------------------------------------------------------------------

    /// Current step delay in milliseconds
    pub fn speed(&self) -> u64 {
        let speed = self.inner.borrow().speed;
        self.engine.speeds().delay(speed)
    }

    /// Change the step delay. Applies at once before the Deferred starts;
    /// afterwards it is queued as a pass-through chain step.
    pub fn set_speed(&self, speed: impl Into<Speed>) -> &Self {
        let speed = speed.into();
        if self.not_started() {
            self.inner.borrow_mut().speed = speed;
            return self;
        }
        let target = self.clone();
        self.then(move |reply| {
            target.inner.borrow_mut().speed = speed;
            Ok(reply)
        })
    }

    pub fn is_async(&self) -> bool {
        self.inner.borrow().is_async
    }

    /// Switch between host-scheduled and in-turn draining, with the same
    /// before/after-start behavior as [`set_speed`](Self::set_speed).
    pub fn set_async(&self, is_async: bool) -> &Self {
        if self.not_started() {
            self.inner.borrow_mut().is_async = is_async;
            return self;
        }
        let target = self.clone();
        self.then(move |reply| {
            target.inner.borrow_mut().is_async = is_async;
            Ok(reply)
        })
    }

    /// Register a hook run by `cancel()` before the Deferred fires
    pub fn canceller<F>(&self, f: F) -> &Self
    where
        F: FnOnce(&Deferred) + 'static,
    {
        self.inner.borrow_mut().cancellers.push(Box::new(f));
        self
    }

    /// Register a hook run by `cancel()` after the Deferred fired
    pub fn stopper<F>(&self, f: F) -> &Self
    where
        F: FnOnce(&Deferred) + 'static,
    {
        self.inner.borrow_mut().stoppers.push(Box::new(f));
        self
    }

    // -----------------------------------------------------------------------
    // Storage
    // -----------------------------------------------------------------------

    /// Read a scratch value
    pub fn data(&self, key: &str) -> Option<Value> {
        self.inner.borrow().storage.get(key).cloned()
    }

    /// Store a scratch value alongside the chain
    pub fn set_data(&self, key: impl Into<String>, value: impl Into<Value>) -> &Self {
        self.inner
            .borrow_mut()
            .storage
            .insert(key.into(), value.into());
        self
    }

    pub fn remove_data(&self, key: &str) -> Option<Value> {
        self.inner.borrow_mut().storage.remove(key)
    }

    // -----------------------------------------------------------------------
    // Firing
    // -----------------------------------------------------------------------

    /// Start the chain on the success branch.
    ///
    /// A Deferred argument is waited for and its result adopted instead.
    pub fn begin(&self, value: impl Into<Value>) -> &Self {
        match value.into() {
            Value::Deferred(source) => self.begin_from(source),
            value => self.settle(Ok(value), false),
        }
        self
    }

    /// Start the chain on the failure branch
    pub fn raise(&self, error: impl Into<Error>) -> &Self {
        self.settle(Err(error.into()), false);
        self
    }

    /// Cancel the Deferred. Calling it again has no further effect.
    ///
    /// Before firing, cancellers run; with none registered the Deferred
    /// fails with [`Error::Cancelled`]. After firing, stoppers run and the
    /// child currently awaited is cancelled too.
    pub fn cancel(&self) -> &Self {
        let (unfired, hooks, child) = {
            let mut inner = self.inner.borrow_mut();
            if inner.cancelled {
                return self;
            }
            inner.cancelled = true;
            let child = match &inner.activity {
                Activity::WaitingOnChild(child) => Some(child.clone()),
                _ => None,
            };
            if inner.is_unfired() {
                // An unfired Deferred waiting on its begin argument stops waiting
                inner.activity = Activity::Idle;
                (true, std::mem::take(&mut inner.cancellers), child)
            } else {
                (false, std::mem::take(&mut inner.stoppers), child)
            }
        };
        debug!(id = self.id(), unfired, hooks = hooks.len(), "cancelling deferred");

        let short_circuited = !hooks.is_empty();
        for hook in hooks {
            hook(self);
        }
        if let Some(child) = child {
            child.cancel();
        }
        if unfired && !short_circuited && self.state().contains(State::UNFIRED) {
            self.settle(Err(Error::cancelled()), true);
        }
        self
    }

    fn not_started(&self) -> bool {
        let inner = self.inner.borrow();
        inner.is_unfired() && inner.is_idle()
    }

    /// Wait for `source` before firing, then fire with its result
    fn begin_from(&self, source: Deferred) {
        if source.ptr_eq(self) {
            self.settle(Err(Error::type_error("a Deferred cannot begin with itself")), false);
            return;
        }
        {
            let mut inner = self.inner.borrow_mut();
            if !inner.is_unfired() || inner.cancelled || !inner.is_idle() {
                return;
            }
            inner.activity = Activity::WaitingOnChild(source.clone());
        }
        let this = self.clone();
        source.push_internal(ChainCell::on_settled(move |reply| {
            let waiting = matches!(this.inner.borrow().activity, Activity::WaitingOnChild(_));
            if waiting {
                this.inner.borrow_mut().activity = Activity::Idle;
                this.settle(reply.clone(), false);
            }
            reply
        }));
    }

    fn settle(&self, reply: Reply, forced: bool) {
        {
            let mut inner = self.inner.borrow_mut();
            if !inner.is_unfired() || (inner.cancelled && !forced) {
                return;
            }
            inner.cancellers.clear();
            inner.record(reply, false);
            debug!(id = inner.id, state = %inner.state, "deferred fired");
        }
        self.fire();
    }

    fn push_cell(&self, cell: ChainCell) -> &Self {
        {
            let inner = self.inner.borrow();
            if inner.ended || inner.cancelled {
                trace!(id = inner.id, "ignoring chain cell on closed deferred");
                return self;
            }
        }
        self.push_internal(cell);
        self
    }

    /// Append a cell even to an ended or cancelled Deferred; used for
    /// parent/child bookkeeping that must not be refused.
    pub(crate) fn push_internal(&self, cell: ChainCell) {
        let resume = {
            let mut inner = self.inner.borrow_mut();
            if cell.has_errback() {
                if let Some(pending) = inner.pending_unhandled.take() {
                    self.engine.host().cancel_scheduled(pending.handle);
                }
            }
            inner.chain.push_back(cell);
            inner.state.intersects(State::FIRED) && inner.is_idle()
        };
        if resume {
            self.fire();
        }
    }

    /// Hand the drain loop to the host, or run it now when synchronous
    fn fire(&self) {
        let scheduled = {
            let mut inner = self.inner.borrow_mut();
            if !inner.is_idle() {
                return;
            }
            if inner.is_async {
                inner.activity = Activity::Scheduled;
                let first = !inner.fired_once;
                inner.fired_once = true;
                Some((self.engine.speeds().delay(inner.speed), first))
            } else {
                None
            }
        };

        let Some((delay, first)) = scheduled else {
            self.drain();
            return;
        };
        let this = self.clone();
        let task: Task = Box::new(move || {
            this.inner.borrow_mut().activity = Activity::Idle;
            this.drain();
            Ok(())
        });
        if delay == 0 && first {
            self.engine.host().schedule_soon(task);
        } else {
            self.engine.host().schedule_after(delay, task);
        }
    }

    /// Run queued cells until the chain is empty, paused, or (when
    /// asynchronous) one cell has run.
    fn drain(&self) {
        loop {
            let (cell, reply, id) = {
                let mut inner = self.inner.borrow_mut();
                if !inner.is_idle() {
                    return;
                }
                if inner.cancelled && !inner.state.contains(State::FAILURE) {
                    if !inner.chain.is_empty() {
                        trace!(id = inner.id, dropped = inner.chain.len(), "cancelled chain discarded");
                        inner.chain.clear();
                    }
                    return;
                }
                let Some(cell) = inner.chain.pop_front() else {
                    break;
                };
                inner.activity = Activity::Running;
                let reply = std::mem::replace(&mut inner.reply, Ok(Value::Undefined));
                (cell, reply, inner.id)
            };

            let observes = reply.is_err() && cell.has_errback();
            let passes_through = reply.is_err() && !cell.has_errback();
            trace!(id, branch = if reply.is_ok() { "success" } else { "failure" }, "running chain cell");
            let mut outcome = cell.invoke(reply);

            // A settled synchronous child is adopted in place so nesting
            // does not grow the stack
            let mut adopted = false;
            if let Ok(Value::Deferred(child)) = &outcome {
                if !child.ptr_eq(self) {
                    if let Some(reply) = child.take_settled() {
                        trace!(id, child = child.id(), "nested deferred already settled");
                        outcome = reply;
                        adopted = true;
                    }
                }
            }

            let more = {
                let mut inner = self.inner.borrow_mut();
                inner.activity = Activity::Idle;
                match outcome {
                    other if adopted => {
                        inner.record(other, false);
                        inner.is_async
                    }
                    Ok(Value::Deferred(child)) if child.ptr_eq(self) => {
                        inner.record(
                            Err(Error::type_error("a chain step cannot wait on its own Deferred")),
                            false,
                        );
                        inner.is_async && !inner.chain.is_empty()
                    }
                    Ok(Value::Deferred(child)) => {
                        debug!(id, child = child.id(), "waiting on nested deferred");
                        inner.activity = Activity::WaitingOnChild(child.clone());
                        drop(inner);
                        self.adopt(child);
                        return;
                    }
                    Err(err) if err.is_stop() => {
                        debug!(id, dropped = inner.chain.len(), "chain stopped");
                        inner.chain.clear();
                        inner.ended = true;
                        inner.record(Ok(Value::Undefined), false);
                        return;
                    }
                    // the failure keeps its observed/reported marks
                    other if passes_through => {
                        inner.reply = other;
                        inner.is_async && !inner.chain.is_empty()
                    }
                    other => {
                        inner.record(other, observes);
                        inner.is_async && !inner.chain.is_empty()
                    }
                }
            };
            if more {
                self.fire();
                return;
            }
        }
        self.finish_chain();
    }

    /// The reply of a synchronous Deferred that has fired and has nothing
    /// left to run. Taking it counts as observing a failure.
    fn take_settled(&self) -> Option<Reply> {
        let mut inner = self.inner.try_borrow_mut().ok()?;
        if inner.is_async
            || inner.cancelled
            || !inner.state.intersects(State::FIRED)
            || !inner.is_idle()
            || !inner.chain.is_empty()
        {
            return None;
        }
        if let Some(pending) = inner.pending_unhandled.take() {
            self.engine.host().cancel_scheduled(pending.handle);
        }
        if inner.state.contains(State::FAILURE) {
            inner.failure_observed = true;
        }
        Some(inner.reply.clone())
    }

    /// Wait on `child` and resume with its result once it settles
    fn adopt(&self, child: Deferred) {
        let parent = self.clone();
        child.push_internal(ChainCell::on_settled(move |reply| {
            parent.resume_from_child(reply.clone());
            reply
        }));
    }

    fn resume_from_child(&self, reply: Reply) {
        {
            let mut inner = self.inner.borrow_mut();
            if !matches!(inner.activity, Activity::WaitingOnChild(_)) {
                return;
            }
            inner.activity = Activity::Idle;
            trace!(id = inner.id, ok = reply.is_ok(), "nested deferred settled");
            inner.record(reply, false);
        }
        self.fire();
    }

    /// Schedule a re-throw when the exhausted chain ends on an unobserved
    /// failure
    fn finish_chain(&self) {
        let mut inner = self.inner.borrow_mut();
        if !inner.state.contains(State::FAILURE)
            || inner.failure_observed
            || inner.failure_reported
            || inner.pending_unhandled.is_some()
        {
            return;
        }
        let error = match &inner.reply {
            Err(err) if !err.is_cancelled() => err.clone(),
            _ => return,
        };
        let delay = self.engine.speeds().delay(inner.speed);
        debug!(id = inner.id, delay, error = %error, "scheduling unhandled failure report");

        let target = Rc::downgrade(&self.inner);
        let handle = self.engine.host().schedule_after(
            delay,
            Box::new(move || {
                if let Some(inner) = target.upgrade() {
                    let mut inner = inner.borrow_mut();
                    inner.pending_unhandled = None;
                    inner.failure_reported = true;
                }
                Err(error)
            }),
        );
        inner.pending_unhandled = Some(PendingFailure { handle });
    }
}

/// Re-check `condition` on the host until it holds, then begin `gate`
fn poll_condition(engine: Engine, gate: Deferred, mut condition: Condition, reply: Value, delay: u64) {
    let host = engine.host().clone();
    host.schedule_after(
        delay,
        Box::new(move || {
            if gate.is_cancelled() {
                return Ok(());
            }
            match condition.check(&reply) {
                Ok(true) => {
                    gate.begin(reply);
                }
                Ok(false) => poll_condition(engine, gate, condition, reply, delay),
                Err(err) => {
                    gate.raise(err);
                }
            }
            Ok(())
        }),
    );
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_borrow() {
            Ok(inner) => write!(
                f,
                "Deferred#{}({}, cells={})",
                inner.id,
                inner.state,
                inner.chain.len()
            ),
            Err(_) => write!(f, "Deferred(<busy>)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_loop::{EventLoop, HostScheduler};
    use crate::speed::SpeedPreset;
    use std::cell::Cell;

    fn setup() -> (Rc<EventLoop>, Engine) {
        let host = Rc::new(EventLoop::new());
        let engine = Engine::new(host.clone());
        (host, engine)
    }

    fn number(v: &Value) -> f64 {
        v.as_number().unwrap_or(f64::NAN)
    }

    #[test]
    fn test_sync_chain_runs_in_turn() {
        let (_host, engine) = setup();
        let d = engine.deferred_with(DeferredOptions::new().sync());
        d.then(|v| Ok(Value::Number(number(&v) + 1.0)))
            .then(|v| Ok(Value::Number(number(&v) * 10.0)));
        d.begin(1);
        assert_eq!(d.reply().unwrap().unwrap(), Value::from(20));
        assert_eq!(d.pending_cells(), 0);
    }

    #[test]
    fn test_async_chain_waits_for_host() {
        let (host, engine) = setup();
        let d = engine.deferred();
        d.then(|v| Ok(Value::Number(number(&v) + 1.0)));
        d.begin(1);
        assert_eq!(d.pending_cells(), 1);
        assert!(host.has_pending_microtasks());
        host.run_until_idle();
        assert_eq!(d.reply().unwrap().unwrap(), Value::from(2));
    }

    #[test]
    fn test_async_runs_one_cell_per_turn() {
        let (host, engine) = setup();
        let d = engine.deferred_with(DeferredOptions::new().speed(10u64));
        d.then(Ok).then(Ok).then(Ok);
        d.begin(0);
        host.run_for(10);
        assert_eq!(d.pending_cells(), 2);
        host.run_for(10);
        assert_eq!(d.pending_cells(), 1);
    }

    #[test]
    fn test_speed_delays_each_step() {
        let (host, engine) = setup();
        let d = engine.deferred_with(DeferredOptions::new().speed(SpeedPreset::Slow));
        d.then(Ok).then(Ok);
        d.begin(0);
        host.run_until_idle();
        // slow = 36ms per turn: the first fire plus one re-schedule
        assert_eq!(host.current_time(), 72);
    }

    #[test]
    fn test_then_after_settle_continues() {
        let (host, engine) = setup();
        let d = engine.deferred();
        d.begin(5);
        host.run_until_idle();
        d.then(|v| Ok(Value::Number(number(&v) * 2.0)));
        host.run_until_idle();
        assert_eq!(d.reply().unwrap().unwrap(), Value::from(10));
    }

    #[test]
    fn test_end_refuses_new_cells() {
        let (host, engine) = setup();
        let d = engine.deferred();
        d.then(|_| Ok(Value::from(1))).end();
        d.then(|_| Ok(Value::from(2)));
        d.begin(0);
        host.run_until_idle();
        assert_eq!(d.reply().unwrap().unwrap(), Value::from(1));
        assert!(d.is_ended());
    }

    #[test]
    fn test_stop_ends_chain_cleanly() {
        let (host, engine) = setup();
        let ran = Rc::new(Cell::new(false));
        let flag = ran.clone();
        let d = engine.deferred();
        d.then(|_| Err(Error::StopIteration)).then(move |v| {
            flag.set(true);
            Ok(v)
        });
        d.begin(0);
        host.run_until_idle();
        assert!(!ran.get());
        assert_eq!(d.state(), State::SUCCESS);
        assert!(host.drain_uncaught().is_empty());
    }

    #[test]
    fn test_destructured_then() {
        let (host, engine) = setup();
        let d = engine.deferred();
        d.then_destructured(2, |args| {
            Ok(Value::Number(number(&args[0]) - number(&args[1])))
        });
        d.begin(Value::from(vec![10, 4]));
        host.run_until_idle();
        assert_eq!(d.reply().unwrap().unwrap(), Value::from(6));
    }

    #[test]
    fn test_cannot_wait_on_itself() {
        let (host, engine) = setup();
        let d = engine.deferred();
        let me = d.clone();
        d.then(move |_| Ok(Value::Deferred(me)));
        d.rescue(|e| Ok(Value::from(e.to_string())));
        d.begin(0);
        host.run_until_idle();
        let text = d.reply().unwrap().unwrap().to_string();
        assert!(text.starts_with("TypeError"));
    }

    #[test]
    fn test_storage() {
        let (_host, engine) = setup();
        let d = engine.deferred();
        d.set_data("k", 1);
        assert_eq!(d.data("k"), Some(Value::from(1)));
        assert_eq!(d.remove_data("k"), Some(Value::from(1)));
        assert_eq!(d.data("k"), None);
    }

    #[test]
    fn test_speed_accessor_after_start_is_queued() {
        let (host, engine) = setup();
        let d = engine.deferred();
        d.set_speed(SpeedPreset::Fast);
        assert_eq!(d.speed(), 12);
        d.begin(0);
        d.set_speed(SpeedPreset::Slow);
        assert_eq!(d.speed(), 12);
        host.run_until_idle();
        assert_eq!(d.speed(), 36);
    }

    #[test]
    fn test_set_async_before_start() {
        let (_host, engine) = setup();
        let d = engine.deferred();
        d.set_async(false);
        d.then(|_| Ok(Value::from("now")));
        d.begin(0);
        assert_eq!(d.reply().unwrap().unwrap(), Value::from("now"));
    }

    #[test]
    fn test_till_polls_until_true() {
        let (host, engine) = setup();
        let flag = Rc::new(Cell::new(false));
        let setter = flag.clone();
        host.schedule_after(
            30,
            Box::new(move || {
                setter.set(true);
                Ok(())
            }),
        );
        let d = engine.deferred();
        let probe = flag.clone();
        d.till(Condition::predicate(move |_| Ok(probe.get())))
            .then(|v| Ok(Value::from(format!("{}!", v))));
        d.begin("go");
        host.run_until_idle();
        assert_eq!(d.reply().unwrap().unwrap(), Value::from("go!"));
        assert!(host.current_time() >= 30);
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let (host, engine) = setup();
        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        let d = engine.deferred_with(DeferredOptions::new().canceller(move |_| {
            counter.set(counter.get() + 1);
        }));
        d.cancel();
        d.cancel();
        host.run_until_idle();
        assert_eq!(calls.get(), 1);
        assert_eq!(d.state(), State::UNFIRED);
    }
}
