//! Engine: the host scheduler plus the immutable speed table
//!
//! Every Deferred and asynchronous LightIterator is created from an
//! [`Engine`]. Cloning an engine is cheap; clones share the host and the
//! configuration.
//!
//! # Example
//! ```
//! use std::rc::Rc;
//! use deferlight::{Engine, EventLoop, Value};
//!
//! let host = Rc::new(EventLoop::new());
//! let engine = Engine::new(host.clone());
//!
//! let d = engine.deferred();
//! d.then(|v| Ok(Value::Number(v.as_number().unwrap_or(0.0) * 2.0)));
//! d.begin(21);
//! host.run_until_idle();
//! assert_eq!(d.reply().unwrap().unwrap(), Value::Number(42.0));
//! ```

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::deferred::{Deferred, DeferredOptions};
use crate::error::{Error, Result};
use crate::event_loop::HostScheduler;
use crate::speed::{Speed, SpeedPreset, SpeedTable};
use crate::value::Value;

/// Settings injected into every Deferred and LightIterator
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Preset table shared by Deferred speeds and iterator intervals
    pub speeds: SpeedTable,
    /// Slice budget used by async iteration helpers when none is given
    pub default_interval: Speed,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            speeds: SpeedTable::default(),
            default_interval: Speed::Preset(SpeedPreset::Normal),
        }
    }
}

/// Handle bundling a host scheduler with engine configuration
#[derive(Clone)]
pub struct Engine {
    host: Rc<dyn HostScheduler>,
    config: Rc<EngineConfig>,
}

impl Engine {
    /// Create an engine with the default speed table
    pub fn new(host: Rc<dyn HostScheduler>) -> Self {
        Self::with_config(host, EngineConfig::default())
    }

    /// Create an engine with custom configuration
    pub fn with_config(host: Rc<dyn HostScheduler>, config: EngineConfig) -> Self {
        Self {
            host,
            config: Rc::new(config),
        }
    }

    pub fn host(&self) -> &Rc<dyn HostScheduler> {
        &self.host
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn speeds(&self) -> &SpeedTable {
        &self.config.speeds
    }

    /// A new unfired asynchronous Deferred
    pub fn deferred(&self) -> Deferred {
        Deferred::new(self)
    }

    /// A new unfired Deferred with options
    pub fn deferred_with(&self, options: DeferredOptions) -> Deferred {
        Deferred::with_options(self, options)
    }

    /// A Deferred already begun with `value`
    pub fn succeed(&self, value: impl Into<Value>) -> Deferred {
        let d = self.deferred();
        d.begin(value);
        d
    }

    /// A Deferred already raised with `error`
    pub fn fail(&self, error: impl Into<Error>) -> Deferred {
        let d = self.deferred();
        d.raise(error);
        d
    }

    /// A synchronous Deferred begun with `value` after `seconds`.
    ///
    /// Cancelling it before it fires removes the timer.
    pub fn sleep(&self, seconds: f64, value: Value) -> Deferred {
        let ms = (seconds.max(0.0) * 1000.0).round() as u64;
        let d = self.deferred_with(DeferredOptions::new().sync());
        let target = d.clone();
        let handle = self.host.schedule_after(
            ms,
            Box::new(move || {
                target.begin(value);
                Ok(())
            }),
        );
        let host = self.host.clone();
        d.canceller(move |_| host.cancel_scheduled(handle));
        d
    }

    /// A Deferred that fires with `undefined` after `seconds`
    pub fn wait(&self, seconds: f64) -> Deferred {
        let out = self.deferred();
        out.begin(self.sleep(seconds, Value::Undefined));
        out
    }

    /// Resolve with every result in input order; fail with the first failure.
    pub fn parallel(&self, items: Vec<Deferred>) -> Deferred {
        let out = self.deferred();
        if items.is_empty() {
            out.begin(Value::Array(Vec::new()));
            return out;
        }

        let results = Rc::new(RefCell::new(vec![Value::Undefined; items.len()]));
        let remaining = Rc::new(Cell::new(items.len()));
        for (index, item) in items.into_iter().enumerate() {
            let (out, results, remaining) = (out.clone(), results.clone(), remaining.clone());
            item.ensure(move |reply| {
                match &reply {
                    Ok(value) => {
                        results.borrow_mut()[index] = value.clone();
                        remaining.set(remaining.get() - 1);
                        if remaining.get() == 0 {
                            out.begin(Value::Array(results.take()));
                        }
                    }
                    Err(err) => {
                        out.raise(err.clone());
                    }
                }
                reply
            });
        }
        out
    }

    /// One Deferred running `steps` in order, begun with `undefined`
    pub fn chain(&self, steps: Vec<Box<dyn FnOnce(Value) -> Result<Value>>>) -> Deferred {
        let d = self.deferred();
        for step in steps {
            d.then(step);
        }
        d.begin(Value::Undefined);
        d
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine").field("config", &self.config).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_loop::EventLoop;

    fn setup() -> (Rc<EventLoop>, Engine) {
        let host = Rc::new(EventLoop::new());
        let engine = Engine::new(host.clone());
        (host, engine)
    }

    #[test]
    fn test_succeed_and_fail() {
        let (host, engine) = setup();
        let ok = engine.succeed(1);
        let bad = engine.fail("nope");
        bad.rescue(|_| Ok(Value::Null));
        host.run_until_idle();
        assert_eq!(ok.reply().unwrap().unwrap(), Value::from(1));
        assert_eq!(bad.reply().unwrap().unwrap(), Value::Null);
        assert!(host.drain_uncaught().is_empty());
    }

    #[test]
    fn test_sleep_fires_after_delay() {
        let (host, engine) = setup();
        let d = engine.sleep(0.25, Value::from("done"));
        host.run_for(200);
        assert!(!d.is_fired());
        host.run_until_idle();
        assert_eq!(d.reply().unwrap().unwrap(), Value::from("done"));
        assert_eq!(host.current_time(), 250);
    }

    #[test]
    fn test_cancelled_sleep_removes_timer() {
        let (host, engine) = setup();
        let d = engine.sleep(1.0, Value::Undefined);
        assert_eq!(host.pending_timers(), 1);
        d.cancel();
        assert_eq!(host.pending_timers(), 0);
        host.run_until_idle();
        assert!(!d.is_fired());
    }

    #[test]
    fn test_parallel_keeps_input_order() {
        let (host, engine) = setup();
        let slow = engine.sleep(0.05, Value::from("slow"));
        let fast = engine.succeed("fast");
        let all = engine.parallel(vec![slow, fast]);
        host.run_until_idle();
        assert_eq!(
            all.reply().unwrap().unwrap(),
            Value::from(vec!["slow", "fast"])
        );
    }

    #[test]
    fn test_parallel_fails_on_first_failure() {
        let (host, engine) = setup();
        let all = engine.parallel(vec![engine.succeed(1), engine.fail("bad")]);
        let seen = Rc::new(RefCell::new(None));
        let sink = seen.clone();
        all.rescue(move |e| {
            *sink.borrow_mut() = Some(e.to_string());
            Ok(Value::Undefined)
        });
        host.run_until_idle();
        assert_eq!(seen.borrow().as_deref(), Some("Error: bad"));
        assert!(host.drain_uncaught().is_empty());
    }

    #[test]
    fn test_chain_runs_steps() {
        let (host, engine) = setup();
        let d = engine.chain(vec![
            Box::new(|_| Ok(Value::from(1))),
            Box::new(|v| Ok(Value::Number(v.as_number().unwrap_or(0.0) + 1.0))),
        ]);
        host.run_until_idle();
        assert_eq!(d.reply().unwrap().unwrap(), Value::from(2));
    }
}
