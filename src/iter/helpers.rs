//! Bulk-iteration helpers
//!
//! Each loop comes in two flavors:
//!
//! - a free function running the QuickIteration fast path and returning
//!   the aggregate directly;
//! - an [`Engine`] method running the same walk in slices and returning a
//!   [`Deferred`] of the aggregate.
//!
//! Callbacks may return anything convertible into a [`Value`], including
//! `()`. Returning `Err(Error::StopIteration)` ends the loop early without
//! an error. On the sliced path, returning a [`Deferred`] suspends that
//! step until it settles.
//!
//! ```
//! use deferlight::iter::helpers;
//! use deferlight::Value;
//!
//! let out = helpers::map(vec![1, 2, 3], |v, _key, _src| {
//!     Ok(Value::Number(v.as_number().unwrap_or(0.0) + 1.0))
//! })
//! .unwrap();
//! assert_eq!(out, Value::from(vec![2, 3, 4]));
//! ```

use crate::deferred::Deferred;
use crate::engine::Engine;
use crate::error::Result;
use crate::value::Value;

use super::{Collect, ExternalIterator, IterOptions, LightIterator, RepeatRange, Shape, Visit};

/// Adapt a `(value, key, source)` callback to the iterator's step form
fn element_step<F, R>(mut f: F) -> impl FnMut(Visit<'_>) -> Result<Value>
where
    F: FnMut(Value, Value, &Value) -> Result<R>,
    R: Into<Value>,
{
    move |visit: Visit<'_>| f(visit.value, visit.key, visit.source).map(Into::into)
}

fn reduce_step<F, R>(mut f: F) -> impl FnMut(Visit<'_>) -> Result<Value>
where
    F: FnMut(Value, Value, Value) -> Result<R>,
    R: Into<Value>,
{
    move |visit: Visit<'_>| f(visit.accumulator, visit.value, visit.key).map(Into::into)
}

fn repeat_step<F, R>(mut f: F) -> impl FnMut(Visit<'_>) -> Result<Value>
where
    F: FnMut(Value, bool) -> Result<R>,
    R: Into<Value>,
{
    move |visit: Visit<'_>| f(visit.value, visit.last).map(Into::into)
}

fn counter_step<F, R>(mut f: F) -> impl FnMut(Visit<'_>) -> Result<Value>
where
    F: FnMut(u64) -> Result<R>,
    R: Into<Value>,
{
    move |visit: Visit<'_>| {
        let i = visit.key.as_number().unwrap_or(0.0) as u64;
        f(i).map(Into::into)
    }
}

fn value_step<F, R>(mut f: F) -> impl FnMut(Visit<'_>) -> Result<Value>
where
    F: FnMut(Value) -> Result<R>,
    R: Into<Value>,
{
    move |visit: Visit<'_>| f(visit.value).map(Into::into)
}

fn identity(visit: Visit<'_>) -> Result<Value> {
    Ok(visit.value)
}

fn walk<F>(source: Value, shape: Shape, collect: Collect, step: F) -> Result<Value>
where
    F: FnMut(Visit<'_>) -> Result<Value>,
{
    LightIterator::new(source, shape, collect, step)?.run()
}

// ---------------------------------------------------------------------------
// QuickIteration
// ---------------------------------------------------------------------------

/// Call `f(value, key, source)` for each element; returns the source
pub fn for_each<F, R>(source: impl Into<Value>, f: F) -> Result<Value>
where
    F: FnMut(Value, Value, &Value) -> Result<R>,
    R: Into<Value>,
{
    let source = source.into();
    let shape = Shape::auto(&source);
    walk(source, shape, Collect::ForEach, element_step(f))
}

/// Collect `f(value, key, source)` for each element
pub fn map<F, R>(source: impl Into<Value>, f: F) -> Result<Value>
where
    F: FnMut(Value, Value, &Value) -> Result<R>,
    R: Into<Value>,
{
    let source = source.into();
    let shape = Shape::auto(&source);
    walk(source, shape, Collect::Map, element_step(f))
}

/// Keep the elements for which `f` returns a truthy value
pub fn filter<F, R>(source: impl Into<Value>, f: F) -> Result<Value>
where
    F: FnMut(Value, Value, &Value) -> Result<R>,
    R: Into<Value>,
{
    let source = source.into();
    let shape = Shape::auto(&source);
    walk(source, shape, Collect::Filter, element_step(f))
}

/// Fold with `f(accumulator, value, key)`. Without `initial` the first
/// element seeds the accumulator; an empty source then gives `undefined`.
pub fn reduce<F, R>(source: impl Into<Value>, initial: Option<Value>, f: F) -> Result<Value>
where
    F: FnMut(Value, Value, Value) -> Result<R>,
    R: Into<Value>,
{
    let source = source.into();
    let shape = Shape::auto(&source);
    walk(source, shape, Collect::Reduce(initial), reduce_step(f))
}

/// Whether `f` is truthy for every element
pub fn every<F, R>(source: impl Into<Value>, f: F) -> Result<bool>
where
    F: FnMut(Value, Value, &Value) -> Result<R>,
    R: Into<Value>,
{
    let source = source.into();
    let shape = Shape::auto(&source);
    walk(source, shape, Collect::Every, element_step(f)).map(|v| v.is_truthy())
}

/// Whether `f` is truthy for some element
pub fn some<F, R>(source: impl Into<Value>, f: F) -> Result<bool>
where
    F: FnMut(Value, Value, &Value) -> Result<R>,
    R: Into<Value>,
{
    let source = source.into();
    let shape = Shape::auto(&source);
    walk(source, shape, Collect::Some, element_step(f)).map(|v| v.is_truthy())
}

/// Call `f(i, last)` over a range; returns the last result
pub fn repeat<F, R>(range: impl Into<RepeatRange>, f: F) -> Result<Value>
where
    F: FnMut(Value, bool) -> Result<R>,
    R: Into<Value>,
{
    walk(Value::Undefined, Shape::Repeat(range.into()), Collect::Last, repeat_step(f))
}

/// Call `f(i)` until it returns the stop sentinel; returns the last result
pub fn forever<F, R>(f: F) -> Result<Value>
where
    F: FnMut(u64) -> Result<R>,
    R: Into<Value>,
{
    walk(Value::Undefined, Shape::Forever, Collect::Last, counter_step(f))
}

/// Pull every value out of `iter` into `f`; returns the last result
pub fn iterate<I, F, R>(iter: I, f: F) -> Result<Value>
where
    I: ExternalIterator + 'static,
    F: FnMut(Value) -> Result<R>,
    R: Into<Value>,
{
    walk(Value::Undefined, Shape::External(Box::new(iter)), Collect::Last, value_step(f))
}

/// `[[key, value], ...]` for an object or array
pub fn items(source: impl Into<Value>) -> Result<Value> {
    walk(source.into(), Shape::Items, Collect::Map, identity)
}

/// Map `f` over the `[key, value]` pairs of an object or array
pub fn items_with<F, R>(source: impl Into<Value>, f: F) -> Result<Value>
where
    F: FnMut(Value) -> Result<R>,
    R: Into<Value>,
{
    walk(source.into(), Shape::Items, Collect::Map, value_step(f))
}

/// Tuples of the i-th elements of each array, up to the shortest
pub fn zip(sources: Vec<Value>) -> Result<Value> {
    walk(Value::Array(sources), Shape::Zip, Collect::Map, identity)
}

/// Map `f` over zipped tuples
pub fn zip_with<F, R>(sources: Vec<Value>, f: F) -> Result<Value>
where
    F: FnMut(Value) -> Result<R>,
    R: Into<Value>,
{
    walk(Value::Array(sources), Shape::Zip, Collect::Map, value_step(f))
}

// ---------------------------------------------------------------------------
// Sliced variants
// ---------------------------------------------------------------------------

impl Engine {
    fn spawn_walk<F>(&self, source: Value, shape: Shape, collect: Collect, options: IterOptions, step: F) -> Deferred
    where
        F: FnMut(Visit<'_>) -> Result<Value> + 'static,
    {
        match LightIterator::new(source, shape, collect, step) {
            Ok(iter) => iter.spawn(self, options),
            Err(err) => self.fail(err),
        }
    }

    /// Sliced [`for_each`]
    pub fn for_each<F, R>(&self, source: impl Into<Value>, options: IterOptions, f: F) -> Deferred
    where
        F: FnMut(Value, Value, &Value) -> Result<R> + 'static,
        R: Into<Value> + 'static,
    {
        let source = source.into();
        let shape = Shape::auto(&source);
        self.spawn_walk(source, shape, Collect::ForEach, options, element_step(f))
    }

    /// Sliced [`map`]
    pub fn map<F, R>(&self, source: impl Into<Value>, options: IterOptions, f: F) -> Deferred
    where
        F: FnMut(Value, Value, &Value) -> Result<R> + 'static,
        R: Into<Value> + 'static,
    {
        let source = source.into();
        let shape = Shape::auto(&source);
        self.spawn_walk(source, shape, Collect::Map, options, element_step(f))
    }

    /// Sliced [`filter`]
    pub fn filter<F, R>(&self, source: impl Into<Value>, options: IterOptions, f: F) -> Deferred
    where
        F: FnMut(Value, Value, &Value) -> Result<R> + 'static,
        R: Into<Value> + 'static,
    {
        let source = source.into();
        let shape = Shape::auto(&source);
        self.spawn_walk(source, shape, Collect::Filter, options, element_step(f))
    }

    /// Sliced [`reduce`]
    pub fn reduce<F, R>(&self, source: impl Into<Value>, initial: Option<Value>, options: IterOptions, f: F) -> Deferred
    where
        F: FnMut(Value, Value, Value) -> Result<R> + 'static,
        R: Into<Value> + 'static,
    {
        let source = source.into();
        let shape = Shape::auto(&source);
        self.spawn_walk(source, shape, Collect::Reduce(initial), options, reduce_step(f))
    }

    /// Sliced [`every`]; fires with a boolean
    pub fn every<F, R>(&self, source: impl Into<Value>, options: IterOptions, f: F) -> Deferred
    where
        F: FnMut(Value, Value, &Value) -> Result<R> + 'static,
        R: Into<Value> + 'static,
    {
        let source = source.into();
        let shape = Shape::auto(&source);
        self.spawn_walk(source, shape, Collect::Every, options, element_step(f))
    }

    /// Sliced [`some`]; fires with a boolean
    pub fn some<F, R>(&self, source: impl Into<Value>, options: IterOptions, f: F) -> Deferred
    where
        F: FnMut(Value, Value, &Value) -> Result<R> + 'static,
        R: Into<Value> + 'static,
    {
        let source = source.into();
        let shape = Shape::auto(&source);
        self.spawn_walk(source, shape, Collect::Some, options, element_step(f))
    }

    /// Sliced [`repeat`]
    pub fn repeat<F, R>(&self, range: impl Into<RepeatRange>, options: IterOptions, f: F) -> Deferred
    where
        F: FnMut(Value, bool) -> Result<R> + 'static,
        R: Into<Value> + 'static,
    {
        self.spawn_walk(
            Value::Undefined,
            Shape::Repeat(range.into()),
            Collect::Last,
            options,
            repeat_step(f),
        )
    }

    /// Sliced [`forever`]
    pub fn forever<F, R>(&self, options: IterOptions, f: F) -> Deferred
    where
        F: FnMut(u64) -> Result<R> + 'static,
        R: Into<Value> + 'static,
    {
        self.spawn_walk(Value::Undefined, Shape::Forever, Collect::Last, options, counter_step(f))
    }

    /// Sliced [`iterate`]
    pub fn iterate<I, F, R>(&self, iter: I, options: IterOptions, f: F) -> Deferred
    where
        I: ExternalIterator + 'static,
        F: FnMut(Value) -> Result<R> + 'static,
        R: Into<Value> + 'static,
    {
        self.spawn_walk(
            Value::Undefined,
            Shape::External(Box::new(iter)),
            Collect::Last,
            options,
            value_step(f),
        )
    }

    /// Sliced [`items_with`]
    pub fn items<F, R>(&self, source: impl Into<Value>, options: IterOptions, f: F) -> Deferred
    where
        F: FnMut(Value) -> Result<R> + 'static,
        R: Into<Value> + 'static,
    {
        self.spawn_walk(source.into(), Shape::Items, Collect::Map, options, value_step(f))
    }

    /// Sliced [`zip_with`]
    pub fn zip<F, R>(&self, sources: Vec<Value>, options: IterOptions, f: F) -> Deferred
    where
        F: FnMut(Value) -> Result<R> + 'static,
        R: Into<Value> + 'static,
    {
        self.spawn_walk(Value::Array(sources), Shape::Zip, Collect::Map, options, value_step(f))
    }
}
