//! LightIterator: cooperative bulk iteration
//!
//! A [`LightIterator`] pairs a loop [`Shape`] with a per-step callback and
//! an aggregation mode ([`Collect`]). It can be driven two ways:
//!
//! - [`LightIterator::run`] is the synchronous fast path: a tight loop
//!   over [`LightIterator::next`] with no scheduling at all;
//! - [`LightIterator::spawn`] hands the walk to the host in time-boxed
//!   slices (see [`slicing`]) and returns a [`Deferred`] that fires with
//!   the aggregate.
//!
//! In both modes a callback returning [`Error::StopIteration`] ends the
//! walk normally. On the sliced path a callback returning a
//! [`Value::Deferred`] suspends that step until the child settles; its
//! result is aggregated in place of the Deferred.
//!
//! The convenience helpers in [`helpers`] cover the usual loops
//! (`for_each`, `map`, `filter`, `reduce`, `every`, `some`, `repeat`,
//! `forever`, `iterate`, `items`, `zip`).

pub mod helpers;
pub mod shape;
pub mod slicing;

use std::fmt;

use indexmap::IndexMap;
use tracing::{debug, trace};

use crate::deferred::{ChainCell, Deferred, Reply};
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::event_loop::Task;
use crate::speed::Speed;
use crate::value::Value;

pub use shape::{ExternalIterator, IterAdapter, RepeatRange, Shape};
pub use slicing::{SlicePolicy, Timing};

use shape::Cursor;

/// Storage keys set on the returned Deferred after a sliced run
pub const SLICES_KEY: &str = "light_iterator.slices";
pub const ITERATIONS_KEY: &str = "light_iterator.iterations";
pub const YIELDS_KEY: &str = "light_iterator.yields";

/// Arguments for one callback invocation
#[derive(Debug)]
pub struct Visit<'a> {
    /// Element, pair, tuple or counter for this step
    pub value: Value,
    /// Index or key of the element
    pub key: Value,
    /// The collection being walked
    pub source: &'a Value,
    /// Set on the final step of bounded shapes
    pub last: bool,
    /// Running total for `reduce`; `undefined` otherwise
    pub accumulator: Value,
}

/// Outcome of one [`LightIterator::next`] call
#[derive(Debug)]
pub enum Step {
    /// A step ran; call `next` again
    Continue,
    /// The step returned a Deferred; call `resume` once it settles
    Await(Deferred),
    /// The walk is over; `take_result` holds the aggregate
    Done,
}

/// How callback results are folded into the final value
#[derive(Debug, Clone, PartialEq)]
pub enum Collect {
    /// Ignore results; the aggregate is the source itself
    ForEach,
    /// Collect every result (keyed for object sources)
    Map,
    /// Keep elements whose result is truthy (keyed for object sources)
    Filter,
    /// Thread an accumulator; without a seed the first element is used
    Reduce(Option<Value>),
    /// `true` unless a result is falsy; stops at the first falsy one
    Every,
    /// `false` unless a result is truthy; stops at the first truthy one
    Some,
    /// The last callback result
    Last,
}

/// Per-step callback
pub type StepFn<'f> = Box<dyn FnMut(Visit<'_>) -> Result<Value> + 'f>;

enum Gathered {
    Nothing,
    List(Vec<Value>),
    Keyed(IndexMap<String, Value>),
    Single(Option<Value>),
    Flag(bool),
}

/// A one-shot walk over a source with a callback
pub struct LightIterator<'f> {
    source: Value,
    cursor: Cursor,
    callback: StepFn<'f>,
    collect: Collect,
    gathered: Gathered,
    /// Key and value of a step suspended on a nested Deferred
    pending: Option<(Value, Value)>,
    suspend_nested: bool,
    calls: u64,
    done: bool,
}

impl<'f> LightIterator<'f> {
    /// Prepare a walk. Fails with a type error when `source` does not fit
    /// `shape`.
    pub fn new<F>(source: impl Into<Value>, shape: Shape, collect: Collect, callback: F) -> Result<Self>
    where
        F: FnMut(Visit<'_>) -> Result<Value> + 'f,
    {
        let source = source.into();
        let cursor = Cursor::new(shape, &source)?;
        let keyed = cursor.shape().is_keyed();
        let gathered = match &collect {
            Collect::ForEach => Gathered::Nothing,
            Collect::Map | Collect::Filter if keyed => Gathered::Keyed(IndexMap::new()),
            Collect::Map | Collect::Filter => Gathered::List(Vec::new()),
            Collect::Reduce(seed) => Gathered::Single(seed.clone()),
            Collect::Every => Gathered::Flag(true),
            Collect::Some => Gathered::Flag(false),
            Collect::Last => Gathered::Single(None),
        };
        Ok(Self {
            source,
            cursor,
            callback: Box::new(callback),
            collect,
            gathered,
            pending: None,
            suspend_nested: false,
            calls: 0,
            done: false,
        })
    }

    pub fn shape(&self) -> &Shape {
        self.cursor.shape()
    }

    /// Callback invocations so far
    pub fn calls(&self) -> u64 {
        self.calls
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Run one step
    pub fn next(&mut self) -> Result<Step> {
        if self.done {
            return Ok(Step::Done);
        }
        if self.pending.is_some() {
            return Err(Error::type_error("iterator step is still waiting on a Deferred"));
        }
        let Some((value, key, last)) = self.cursor.advance(&self.source)? else {
            self.done = true;
            return Ok(Step::Done);
        };

        let accumulator = match (&self.collect, &mut self.gathered) {
            (Collect::Reduce(_), Gathered::Single(acc)) => match acc {
                Some(acc) => acc.clone(),
                None => {
                    // No seed: the first element becomes the accumulator
                    *acc = Some(value);
                    return Ok(Step::Continue);
                }
            },
            _ => Value::Undefined,
        };

        self.calls += 1;
        let visit = Visit {
            value: value.clone(),
            key: key.clone(),
            source: &self.source,
            last,
            accumulator,
        };
        match (self.callback)(visit) {
            Ok(Value::Deferred(child)) if self.suspend_nested => {
                self.pending = Some((key, value));
                Ok(Step::Await(child))
            }
            Ok(result) => {
                self.gather(key, value, result);
                Ok(self.status())
            }
            Err(err) if err.is_stop() => {
                trace!(calls = self.calls, "iteration stopped by callback");
                self.done = true;
                Ok(Step::Done)
            }
            Err(err) => Err(err),
        }
    }

    /// Feed the settled reply of a suspended step back in
    pub fn resume(&mut self, reply: Reply) -> Result<()> {
        let Some((key, value)) = self.pending.take() else {
            return Err(Error::type_error("no iterator step is waiting on a Deferred"));
        };
        match reply {
            Ok(result) => {
                self.gather(key, value, result);
                Ok(())
            }
            Err(err) if err.is_stop() => {
                self.done = true;
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Drive the walk to completion in the caller's turn
    pub fn run(mut self) -> Result<Value> {
        loop {
            match self.next()? {
                Step::Continue => {}
                // No suspension on the fast path; the Deferred is the result
                Step::Await(child) => self.resume(Ok(Value::Deferred(child)))?,
                Step::Done => return Ok(self.take_result()),
            }
        }
    }

    /// The aggregate so far
    pub fn take_result(&mut self) -> Value {
        match std::mem::replace(&mut self.gathered, Gathered::Nothing) {
            Gathered::Nothing => self.source.clone(),
            Gathered::List(items) => Value::Array(items),
            Gathered::Keyed(map) => Value::Object(map),
            Gathered::Single(value) => value.unwrap_or_default(),
            Gathered::Flag(flag) => Value::Boolean(flag),
        }
    }

    fn status(&self) -> Step {
        if self.done {
            Step::Done
        } else {
            Step::Continue
        }
    }

    fn gather(&mut self, key: Value, value: Value, result: Value) {
        match &mut self.gathered {
            Gathered::Nothing => {}
            Gathered::List(items) => match self.collect {
                Collect::Filter if result.is_truthy() => items.push(value),
                Collect::Filter => {}
                _ => items.push(result),
            },
            Gathered::Keyed(map) => {
                let key = match key {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                match self.collect {
                    Collect::Filter if result.is_truthy() => {
                        map.insert(key, value);
                    }
                    Collect::Filter => {}
                    _ => {
                        map.insert(key, result);
                    }
                }
            }
            Gathered::Single(slot) => *slot = Some(result),
            Gathered::Flag(flag) => {
                let truthy = result.is_truthy();
                match self.collect {
                    Collect::Every if !truthy => {
                        *flag = false;
                        self.done = true;
                    }
                    Collect::Some if truthy => {
                        *flag = true;
                        self.done = true;
                    }
                    _ => {}
                }
            }
        }
    }
}

impl fmt::Debug for LightIterator<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LightIterator")
            .field("shape", self.cursor.shape())
            .field("collect", &self.collect)
            .field("calls", &self.calls)
            .field("done", &self.done)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Sliced driver
// ---------------------------------------------------------------------------

/// Options for asynchronous iteration
#[derive(Debug, Clone, Default)]
pub struct IterOptions {
    /// Slice budget; the engine's default interval when unset
    pub interval: Option<Speed>,
    /// Seed for the yield draw, for reproducible slicing
    pub seed: Option<u64>,
}

impl IterOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interval(mut self, interval: impl Into<Speed>) -> Self {
        self.interval = Some(interval.into());
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

impl LightIterator<'static> {
    /// Run the walk on the host in slices. The returned Deferred fires
    /// with the aggregate, or fails with the first callback error.
    ///
    /// Cancelling the returned Deferred aborts the walk before its next
    /// slice.
    pub fn spawn(mut self, engine: &Engine, options: IterOptions) -> Deferred {
        self.suspend_nested = true;
        let speed = options.interval.unwrap_or(engine.config().default_interval);
        let interval = engine.speeds().interval(speed);
        let out = engine.deferred();
        debug!(
            shape = self.shape().name(),
            interval,
            deferred = out.id(),
            "starting sliced iteration"
        );
        let driver = Driver {
            iter: self,
            policy: SlicePolicy::new(interval, options.seed),
            timing: Timing::default(),
            yields: 0,
            out: out.clone(),
            engine: engine.clone(),
        };
        driver.schedule(None);
        out
    }
}

/// Owns a walk between slices. Moved into each scheduled task.
struct Driver {
    iter: LightIterator<'static>,
    policy: SlicePolicy,
    timing: Timing,
    yields: u64,
    out: Deferred,
    engine: Engine,
}

impl Driver {
    /// Queue the next slice: soon, or after `rest` ms when yielding
    fn schedule(self, rest: Option<u64>) {
        let host = self.engine.host().clone();
        let task: Task = Box::new(move || self.run_slice());
        match rest {
            Some(ms) => {
                host.schedule_after(ms, task);
            }
            None => host.schedule_soon(task),
        }
    }

    fn run_slice(mut self) -> Result<()> {
        if self.out.is_cancelled() {
            debug!(deferred = self.out.id(), calls = self.iter.calls(), "iteration cancelled");
            return Err(Error::StopIteration);
        }
        self.timing.begin_slice();
        trace!(slice = self.timing.slices, calls = self.iter.calls(), "slice started");
        loop {
            let step = match self.iter.next() {
                Ok(step) => step,
                Err(err) => {
                    debug!(error = %err, "iteration failed");
                    self.out.raise(err);
                    return Ok(());
                }
            };
            match step {
                Step::Continue => {}
                Step::Await(child) => {
                    self.suspend(child);
                    return Ok(());
                }
                Step::Done => {
                    self.complete();
                    return Ok(());
                }
            }
            let diff = self.timing.diff();
            if self.policy.should_yield(diff) {
                let rest = self.policy.rest_delay(self.timing.risk(), diff);
                self.yields += 1;
                trace!(diff, rest, "slice yielding");
                self.schedule(Some(rest));
                return Ok(());
            }
        }
    }

    /// Park the walk on `child` and continue once it settles
    fn suspend(self, child: Deferred) {
        trace!(child = child.id(), "iteration step waiting on deferred");
        child.push_internal(ChainCell::on_settled(move |reply| {
            let mut driver = self;
            match driver.iter.resume(reply.clone()) {
                Ok(()) => driver.schedule(None),
                Err(err) => {
                    driver.out.raise(err);
                }
            }
            reply
        }));
    }

    fn complete(mut self) {
        let result = self.iter.take_result();
        debug!(
            slices = self.timing.slices,
            calls = self.iter.calls(),
            yields = self.yields,
            elapsed_ms = self.timing.risk(),
            "sliced iteration finished"
        );
        self.out
            .set_data(SLICES_KEY, Value::Number(self.timing.slices as f64))
            .set_data(ITERATIONS_KEY, Value::Number(self.iter.calls() as f64))
            .set_data(YIELDS_KEY, Value::Number(self.yields as f64));
        self.out.begin(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    use crate::event_loop::EventLoop;
    use crate::speed::SpeedPreset;

    fn numbers(n: i32) -> Value {
        Value::from((1..=n).collect::<Vec<_>>())
    }

    fn double(visit: Visit<'_>) -> Result<Value> {
        Ok(Value::Number(visit.value.as_number().unwrap_or(0.0) * 2.0))
    }

    #[test]
    fn test_next_reports_steps() {
        let mut iter = LightIterator::new(numbers(2), Shape::Array, Collect::Map, double).unwrap();
        assert!(matches!(iter.next().unwrap(), Step::Continue));
        assert!(matches!(iter.next().unwrap(), Step::Continue));
        assert!(matches!(iter.next().unwrap(), Step::Done));
        assert!(iter.is_done());
        assert_eq!(iter.take_result(), Value::from(vec![2, 4]));
    }

    #[test]
    fn test_keyed_map_over_object() {
        let src = Value::object([("a", Value::from(1)), ("b", Value::from(2))]);
        let out = LightIterator::new(src, Shape::Object, Collect::Map, double)
            .unwrap()
            .run()
            .unwrap();
        assert_eq!(out, Value::object([("a", Value::from(2)), ("b", Value::from(4))]));
    }

    #[test]
    fn test_every_short_circuits() {
        let mut iter = LightIterator::new(numbers(5), Shape::Array, Collect::Every, |v: Visit<'_>| {
            Ok(Value::Boolean(v.value.as_number().unwrap_or(0.0) < 2.0))
        })
        .unwrap();
        while !matches!(iter.next().unwrap(), Step::Done) {}
        assert_eq!(iter.calls(), 2);
        assert_eq!(iter.take_result(), Value::Boolean(false));
    }

    #[test]
    fn test_reduce_without_seed_uses_first() {
        let iter = LightIterator::new(numbers(4), Shape::Array, Collect::Reduce(None), |v: Visit<'_>| {
            Ok(Value::Number(
                v.accumulator.as_number().unwrap_or(0.0) + v.value.as_number().unwrap_or(0.0),
            ))
        })
        .unwrap();
        assert_eq!(iter.calls(), 0);
        assert_eq!(iter.run().unwrap(), Value::from(10));
    }

    #[test]
    fn test_callback_error_propagates() {
        let out = LightIterator::new(numbers(3), Shape::Array, Collect::ForEach, |_v: Visit<'_>| {
            Err(Error::raised("bad step"))
        })
        .unwrap()
        .run();
        assert_eq!(out.unwrap_err().to_string(), "Error: bad step");
    }

    #[test]
    fn test_spawn_resolves_and_records_slices() {
        let host = Rc::new(EventLoop::new());
        let engine = Engine::new(host.clone());
        let d = LightIterator::new(numbers(50), Shape::Array, Collect::Map, double)
            .unwrap()
            .spawn(&engine, IterOptions::new().interval(SpeedPreset::Limp).seed(7));
        host.run_until_idle();
        let result = d.reply().unwrap().unwrap();
        assert_eq!(result.len(), Some(50));
        // limp yields after every step
        assert_eq!(d.data(SLICES_KEY), Some(Value::from(51)));
        assert_eq!(d.data(ITERATIONS_KEY), Some(Value::from(50)));
    }

    #[test]
    fn test_spawn_waits_on_nested_deferred() {
        let host = Rc::new(EventLoop::new());
        let engine = Engine::new(host.clone());
        let inner = engine.clone();
        let d = LightIterator::new(numbers(3), Shape::Array, Collect::Map, move |v: Visit<'_>| {
            Ok(Value::Deferred(inner.sleep(0.01, v.value)))
        })
        .unwrap()
        .spawn(&engine, IterOptions::new());
        host.run_until_idle();
        assert_eq!(d.reply().unwrap().unwrap(), numbers(3));
        assert!(host.current_time() >= 30);
    }
}
