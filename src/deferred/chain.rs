//! Chain cells: one `{success, failure}` link of a Deferred chain

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::value::Value;

/// Callback run when the chain is on its success branch
pub type SuccessFn = Box<dyn FnOnce(Value) -> Result<Value>>;

/// Callback run when the chain is on its failure branch
pub type FailureFn = Box<dyn FnOnce(Error) -> Result<Value>>;

/// The current reply of a chain: a value on success, an error on failure
pub type Reply = std::result::Result<Value, Error>;

/// A single link in a Deferred chain
///
/// Either slot may be empty; an empty slot passes the reply through
/// unchanged.
pub struct ChainCell {
    pub(crate) success: Option<SuccessFn>,
    pub(crate) failure: Option<FailureFn>,
}

impl ChainCell {
    pub fn new(success: Option<SuccessFn>, failure: Option<FailureFn>) -> Self {
        Self { success, failure }
    }

    /// Cell with only a success callback
    pub fn on_success<F>(f: F) -> Self
    where
        F: FnOnce(Value) -> Result<Value> + 'static,
    {
        Self::new(Some(Box::new(f)), None)
    }

    /// Cell with only a failure callback
    pub fn on_failure<F>(f: F) -> Self
    where
        F: FnOnce(Error) -> Result<Value> + 'static,
    {
        Self::new(None, Some(Box::new(f)))
    }

    /// Cell running the same callback on either branch
    ///
    /// Only one of the two slots is ever consumed, so the callback is shared
    /// between them and taken by whichever runs.
    pub fn on_settled<F>(f: F) -> Self
    where
        F: FnOnce(Reply) -> Result<Value> + 'static,
    {
        let shared = Rc::new(RefCell::new(Some(f)));
        let on_failure = shared.clone();
        Self::new(
            Some(Box::new(move |value| {
                let taken = shared.borrow_mut().take();
                match taken {
                    Some(f) => f(Ok(value)),
                    None => Ok(value),
                }
            })),
            Some(Box::new(move |err| {
                let taken = on_failure.borrow_mut().take();
                match taken {
                    Some(f) => f(Err(err)),
                    None => Err(err),
                }
            })),
        )
    }

    /// Cell whose success callback receives an array reply spread into
    /// positional arguments.
    ///
    /// The spread only happens when the reply is an array of exactly `arity`
    /// elements; any other reply arrives as a single argument.
    pub fn destructured<F>(arity: usize, f: F) -> Self
    where
        F: FnOnce(Vec<Value>) -> Result<Value> + 'static,
    {
        Self::on_success(move |value| match value {
            Value::Array(items) if items.len() == arity => f(items),
            other => f(vec![other]),
        })
    }

    pub fn has_errback(&self) -> bool {
        self.failure.is_some()
    }

    /// Run the slot matching `reply`. Empty slots pass the reply through.
    pub(crate) fn invoke(self, reply: Reply) -> Reply {
        match reply {
            Ok(value) => match self.success {
                Some(f) => f(value),
                None => Ok(value),
            },
            Err(err) => match self.failure {
                Some(f) => f(err),
                None => Err(err),
            },
        }
    }
}

impl fmt::Debug for ChainCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainCell")
            .field("success", &self.success.is_some())
            .field("failure", &self.failure.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_slots_pass_through() {
        let cell = ChainCell::on_success(|v| Ok(v));
        let out = cell.invoke(Err(Error::raised("x")));
        assert_eq!(out.unwrap_err().to_string(), "Error: x");

        let cell = ChainCell::on_failure(|_| Ok(Value::Null));
        assert_eq!(cell.invoke(Ok(Value::from(1))).unwrap(), Value::from(1));
    }

    #[test]
    fn test_settled_runs_on_both_branches() {
        let cell = ChainCell::on_settled(|r| Ok(Value::Boolean(r.is_ok())));
        assert_eq!(cell.invoke(Ok(Value::Null)).unwrap(), Value::Boolean(true));
        let cell = ChainCell::on_settled(|r| Ok(Value::Boolean(r.is_ok())));
        assert_eq!(cell.invoke(Err(Error::raised("e"))).unwrap(), Value::Boolean(false));
    }

    #[test]
    fn test_destructured_only_spreads_exact_arity() {
        let cell = ChainCell::destructured(2, |args| Ok(Value::from(args.len())));
        assert_eq!(cell.invoke(Ok(Value::from(vec![1, 2]))).unwrap(), Value::from(2));

        let cell = ChainCell::destructured(2, |args| Ok(Value::from(args.len())));
        assert_eq!(cell.invoke(Ok(Value::from(vec![1, 2, 3]))).unwrap(), Value::from(1));
    }
}
