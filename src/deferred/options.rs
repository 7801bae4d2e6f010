//! Deferred state flags and construction options

use std::fmt;

use bitflags::bitflags;

use crate::speed::Speed;
use crate::value::Value;

use super::Deferred;

bitflags! {
    /// Firing state of a Deferred.
    ///
    /// `SUCCESS` and `FAILURE` describe the outcome of the most recent chain
    /// step, not a terminal value; `FIRED` matches either.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct State: u8 {
        const UNFIRED = 0b001;
        const SUCCESS = 0b010;
        const FAILURE = 0b100;
        const FIRED = Self::SUCCESS.bits() | Self::FAILURE.bits();
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.contains(State::UNFIRED) {
            write!(f, "unfired")
        } else if self.contains(State::FAILURE) {
            write!(f, "failure")
        } else {
            write!(f, "success")
        }
    }
}

/// A cancellation or stop hook
pub type Hook = Box<dyn FnOnce(&Deferred)>;

/// Options accepted when constructing a Deferred
///
/// ```
/// use deferlight::deferred::DeferredOptions;
/// use deferlight::speed::SpeedPreset;
///
/// let opts = DeferredOptions::new().speed(SpeedPreset::Slow).sync();
/// assert!(!opts.is_async());
/// ```
pub struct DeferredOptions {
    pub(crate) speed: Speed,
    pub(crate) is_async: bool,
    pub(crate) cancellers: Vec<Hook>,
    pub(crate) stoppers: Vec<Hook>,
}

impl Default for DeferredOptions {
    fn default() -> Self {
        Self {
            speed: Speed::default(),
            is_async: true,
            cancellers: Vec::new(),
            stoppers: Vec::new(),
        }
    }
}

impl DeferredOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay between asynchronous steps
    pub fn speed(mut self, speed: impl Into<Speed>) -> Self {
        self.speed = speed.into();
        self
    }

    /// Run chain steps through the host scheduler (the default)
    pub fn with_async(mut self, is_async: bool) -> Self {
        self.is_async = is_async;
        self
    }

    /// Drain the chain synchronously in the caller's turn
    pub fn sync(self) -> Self {
        self.with_async(false)
    }

    /// Hook run by `cancel()` while the Deferred is still unfired
    pub fn canceller<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&Deferred) + 'static,
    {
        self.cancellers.push(Box::new(f));
        self
    }

    /// Hook run by `cancel()` once the Deferred has fired
    pub fn stopper<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&Deferred) + 'static,
    {
        self.stoppers.push(Box::new(f));
        self
    }

    pub fn is_async(&self) -> bool {
        self.is_async
    }

    pub fn get_speed(&self) -> Speed {
        self.speed
    }
}

impl fmt::Debug for DeferredOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredOptions")
            .field("speed", &self.speed)
            .field("async", &self.is_async)
            .field("cancellers", &self.cancellers.len())
            .field("stoppers", &self.stoppers.len())
            .finish()
    }
}

/// Predicate polled by `Deferred::till`
pub enum Condition {
    /// Re-evaluated with the chain's reply until it returns `true`
    Predicate(Box<dyn FnMut(&Value) -> crate::Result<bool>>),
    /// A fixed value; resumes at once when truthy
    Static(Value),
}

impl Condition {
    pub fn predicate<F>(f: F) -> Self
    where
        F: FnMut(&Value) -> crate::Result<bool> + 'static,
    {
        Condition::Predicate(Box::new(f))
    }

    pub(crate) fn check(&mut self, reply: &Value) -> crate::Result<bool> {
        match self {
            Condition::Predicate(f) => f(reply),
            Condition::Static(v) => Ok(v.is_truthy()),
        }
    }
}

impl From<bool> for Condition {
    fn from(b: bool) -> Self {
        Condition::Static(Value::Boolean(b))
    }
}

impl From<Value> for Condition {
    fn from(v: Value) -> Self {
        Condition::Static(v)
    }
}
