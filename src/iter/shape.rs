//! Loop shapes: how a LightIterator walks its source
//!
//! Each shape is a one-shot cursor. [`Cursor::advance`] yields the next
//! `(value, key, last)` triple or `None` when the walk is exhausted.

use std::fmt;

use crate::error::{Error, Result};
use crate::value::Value;

/// Anything with a `next` that can be walked by the external-iterator shape.
///
/// Exhaustion is signalled by `Ok(None)` or by [`Error::StopIteration`].
pub trait ExternalIterator {
    fn next(&mut self) -> Result<Option<Value>>;
}

/// Adapter turning a Rust iterator into an [`ExternalIterator`]
pub struct IterAdapter<I>(pub I);

impl<I> ExternalIterator for IterAdapter<I>
where
    I: Iterator<Item = Value>,
{
    fn next(&mut self) -> Result<Option<Value>> {
        Ok(self.0.next())
    }
}

// ---------------------------------------------------------------------------
// RepeatRange
// ---------------------------------------------------------------------------

/// Bounds of a repeat loop. `end` is exclusive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RepeatRange {
    pub begin: f64,
    pub end: f64,
    pub step: f64,
    /// Produce single-letter strings (by char code) instead of numbers
    pub letters: bool,
}

impl RepeatRange {
    pub fn new(begin: f64, end: f64, step: f64) -> Self {
        Self {
            begin,
            end,
            step,
            letters: false,
        }
    }

    /// Letters from `begin` up to, not including, `end`
    pub fn letters(begin: char, end: char) -> Self {
        let step = if end >= begin { 1.0 } else { -1.0 };
        Self {
            begin: begin as u32 as f64,
            end: end as u32 as f64,
            step,
            letters: true,
        }
    }

    /// Parse a count or a `{begin, end, step}` object.
    ///
    /// Endpoints may be numbers or single letters; `step` defaults to 1
    /// (or -1 when `end < begin`).
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Number(n) => Ok(Self::new(0.0, *n, 1.0)),
            Value::Object(map) => {
                let begin = map.get("begin").cloned().unwrap_or(Value::Number(0.0));
                let end = map
                    .get("end")
                    .cloned()
                    .ok_or_else(|| Error::type_error("repeat range needs an 'end'"))?;
                let letters = matches!(begin, Value::String(_)) || matches!(end, Value::String(_));
                let begin = endpoint(&begin)?;
                let end = endpoint(&end)?;
                let step = match map.get("step") {
                    Some(Value::Number(s)) => *s,
                    Some(other) => {
                        return Err(Error::type_error(format!("repeat step must be a number, got {}", other)))
                    }
                    None if end < begin => -1.0,
                    None => 1.0,
                };
                Ok(Self {
                    begin,
                    end,
                    step,
                    letters,
                })
            }
            other => Err(Error::type_error(format!("cannot repeat over {}", other))),
        }
    }

    /// Number of iterations the range produces
    pub fn count(&self) -> Result<u64> {
        if self.step == 0.0 || !self.step.is_finite() {
            return Err(Error::type_error("repeat step must be a non-zero finite number"));
        }
        let span = (self.end - self.begin) / self.step;
        if !span.is_finite() {
            return Err(Error::type_error("repeat range must be finite"));
        }
        Ok(span.ceil().max(0.0) as u64)
    }

    fn value_at(&self, index: u64) -> Value {
        let n = self.begin + self.step * index as f64;
        if self.letters {
            char::from_u32(n as u32)
                .map(|c| Value::String(c.to_string()))
                .unwrap_or(Value::Undefined)
        } else {
            Value::Number(n)
        }
    }
}

fn endpoint(value: &Value) -> Result<f64> {
    match value {
        Value::Number(n) => Ok(*n),
        Value::String(s) => {
            let mut chars = s.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Ok(c as u32 as f64),
                _ => Err(Error::type_error(format!("repeat endpoint '{}' is not a single letter", s))),
            }
        }
        other => Err(Error::type_error(format!("invalid repeat endpoint {}", other))),
    }
}

impl From<usize> for RepeatRange {
    fn from(n: usize) -> Self {
        Self::new(0.0, n as f64, 1.0)
    }
}

impl From<u32> for RepeatRange {
    fn from(n: u32) -> Self {
        Self::new(0.0, n as f64, 1.0)
    }
}

impl From<i32> for RepeatRange {
    fn from(n: i32) -> Self {
        Self::new(0.0, n as f64, 1.0)
    }
}

impl From<std::ops::Range<i64>> for RepeatRange {
    fn from(r: std::ops::Range<i64>) -> Self {
        Self::new(r.start as f64, r.end as f64, 1.0)
    }
}

// ---------------------------------------------------------------------------
// Shape
// ---------------------------------------------------------------------------

/// The loop pattern a LightIterator drives
pub enum Shape {
    /// By index over an array (or the characters of a string)
    Array,
    /// By key over an object, in insertion order
    Object,
    /// Counted loop with a `last` flag on the final step
    Repeat(RepeatRange),
    /// Until the callback raises the stop sentinel
    Forever,
    /// Pull values from an external iterator
    External(Box<dyn ExternalIterator>),
    /// `[key, value]` pairs of an object or array
    Items,
    /// i-th elements of several arrays, up to the shortest
    Zip,
}

impl Shape {
    /// Array shape for array-like sources, object shape otherwise
    pub fn auto(source: &Value) -> Shape {
        if source.is_array_like() {
            Shape::Array
        } else {
            Shape::Object
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Shape::Array => "array",
            Shape::Object => "object",
            Shape::Repeat(_) => "repeat",
            Shape::Forever => "forever",
            Shape::External(_) => "iterator",
            Shape::Items => "items",
            Shape::Zip => "zip",
        }
    }

    /// Whether aggregates over this shape are keyed objects
    pub(crate) fn is_keyed(&self) -> bool {
        matches!(self, Shape::Object)
    }
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Repeat(range) => write!(f, "Shape::Repeat({:?})", range),
            other => write!(f, "Shape::{}", other.name()),
        }
    }
}

// ---------------------------------------------------------------------------
// Cursor
// ---------------------------------------------------------------------------

/// One step's inputs: `(value, key, last)`
pub(crate) type Position = (Value, Value, bool);

/// Walk state for one traversal
pub(crate) struct Cursor {
    shape: Shape,
    index: u64,
    /// Characters of a string source, split once
    chars: Option<Vec<char>>,
    /// Iteration count for repeat, shortest length for zip
    limit: u64,
}

impl Cursor {
    /// Validate `source` against `shape` and prepare the walk
    pub(crate) fn new(shape: Shape, source: &Value) -> Result<Self> {
        let mut chars = None;
        let limit = match (&shape, source) {
            (Shape::Array, Value::Array(items)) => items.len() as u64,
            (Shape::Array, Value::String(s)) => {
                let split: Vec<char> = s.chars().collect();
                let len = split.len() as u64;
                chars = Some(split);
                len
            }
            (Shape::Object, Value::Object(map)) => map.len() as u64,
            (Shape::Items, Value::Object(map)) => map.len() as u64,
            (Shape::Items, Value::Array(items)) => items.len() as u64,
            (Shape::Repeat(range), _) => range.count()?,
            (Shape::Forever, _) | (Shape::External(_), _) => u64::MAX,
            (Shape::Zip, Value::Array(columns)) => {
                let mut shortest = if columns.is_empty() { 0 } else { usize::MAX };
                for column in columns {
                    match column {
                        Value::Array(items) => shortest = shortest.min(items.len()),
                        other => {
                            return Err(Error::type_error(format!("zip expects arrays, got {}", other)))
                        }
                    }
                }
                shortest as u64
            }
            (shape, other) => {
                return Err(Error::type_error(format!(
                    "cannot walk {:?} with the {} shape",
                    other,
                    shape.name()
                )))
            }
        };
        Ok(Self {
            shape,
            index: 0,
            chars,
            limit,
        })
    }

    pub(crate) fn shape(&self) -> &Shape {
        &self.shape
    }

    /// The next step, or `None` once exhausted
    pub(crate) fn advance(&mut self, source: &Value) -> Result<Option<Position>> {
        let i = self.index;
        if i >= self.limit {
            return Ok(None);
        }
        let last = self.limit != u64::MAX && i + 1 == self.limit;
        let key = Value::Number(i as f64);
        let idx = i as usize;
        let is_items = matches!(self.shape, Shape::Items);

        let position = match (&mut self.shape, source) {
            (Shape::Array, Value::Array(items)) => (items[idx].clone(), key, last),
            (Shape::Array, _) => {
                let c = self.chars.as_ref().map(|chars| chars[idx]).unwrap_or_default();
                (Value::String(c.to_string()), key, last)
            }
            (Shape::Object, Value::Object(map)) | (Shape::Items, Value::Object(map)) => {
                let Some((k, v)) = map.get_index(idx) else {
                    return Ok(None);
                };
                let key = Value::String(k.clone());
                if is_items {
                    (Value::Array(vec![key.clone(), v.clone()]), key, last)
                } else {
                    (v.clone(), key, last)
                }
            }
            (Shape::Items, Value::Array(items)) => {
                (Value::Array(vec![key.clone(), items[idx].clone()]), key, last)
            }
            (Shape::Repeat(range), _) => (range.value_at(i), key, last),
            (Shape::Forever, _) => (key.clone(), key, false),
            (Shape::External(iter), _) => match iter.next() {
                Ok(Some(value)) => (value, key, false),
                Ok(None) => return Ok(None),
                Err(err) if err.is_stop() => return Ok(None),
                Err(err) => return Err(err),
            },
            (Shape::Zip, Value::Array(columns)) => {
                let tuple = columns
                    .iter()
                    .map(|column| match column {
                        Value::Array(items) => items[idx].clone(),
                        _ => Value::Undefined,
                    })
                    .collect();
                (Value::Array(tuple), key, last)
            }
            _ => return Ok(None),
        };
        self.index += 1;
        Ok(Some(position))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn walk(shape: Shape, source: &Value) -> Vec<Position> {
        let mut cursor = Cursor::new(shape, source).unwrap();
        let mut out = Vec::new();
        while let Some(p) = cursor.advance(source).unwrap() {
            out.push(p);
        }
        out
    }

    #[test]
    fn test_array_positions() {
        let src = Value::from(vec![10, 20]);
        let steps = walk(Shape::Array, &src);
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0], (Value::from(10), Value::from(0), false));
        assert_eq!(steps[1], (Value::from(20), Value::from(1), true));
    }

    #[test]
    fn test_string_walks_chars() {
        let src = Value::from("hé");
        let steps = walk(Shape::auto(&src), &src);
        assert_eq!(steps[1].0, Value::from("é"));
    }

    #[test]
    fn test_object_and_items() {
        let src = Value::object([("a", Value::from(1)), ("b", Value::from(2))]);
        let steps = walk(Shape::auto(&src), &src);
        assert_eq!(steps[1], (Value::from(2), Value::from("b"), true));

        let pairs = walk(Shape::Items, &src);
        assert_eq!(pairs[0].0, Value::Array(vec![Value::from("a"), Value::from(1)]));
    }

    #[test]
    fn test_repeat_counts() {
        assert_eq!(RepeatRange::from(5usize).count().unwrap(), 5);
        assert_eq!(RepeatRange::new(0.0, 10.0, 3.0).count().unwrap(), 4);
        assert_eq!(RepeatRange::new(5.0, 0.0, -2.0).count().unwrap(), 3);
        assert_eq!(RepeatRange::new(0.0, 5.0, -1.0).count().unwrap(), 0);
        assert!(RepeatRange::new(0.0, 5.0, 0.0).count().is_err());
    }

    #[test]
    fn test_repeat_letters() {
        let range = RepeatRange::from_value(&Value::object([
            ("begin", Value::from("a")),
            ("end", Value::from("d")),
        ]))
        .unwrap();
        let steps = walk(Shape::Repeat(range), &Value::Undefined);
        let letters: Vec<String> = steps.iter().map(|p| p.0.to_string()).collect();
        assert_eq!(letters, vec!["a", "b", "c"]);
        assert!(steps[2].2);
    }

    #[test]
    fn test_zip_stops_at_shortest() {
        let src = Value::Array(vec![Value::from(vec![1, 2, 3]), Value::from(vec!["x", "y"])]);
        let steps = walk(Shape::Zip, &src);
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[1].0, Value::Array(vec![Value::from(2), Value::from("y")]));
    }

    #[test]
    fn test_external_iterator_stops_on_sentinel() {
        struct Countdown(u32);
        impl ExternalIterator for Countdown {
            fn next(&mut self) -> Result<Option<Value>> {
                if self.0 == 0 {
                    return Err(Error::StopIteration);
                }
                self.0 -= 1;
                Ok(Some(Value::from(self.0 as i32)))
            }
        }
        let steps = walk(Shape::External(Box::new(Countdown(3))), &Value::Undefined);
        assert_eq!(steps.len(), 3);
    }

    #[test]
    fn test_shape_mismatch_is_type_error() {
        let err = Cursor::new(Shape::Object, &Value::from(1)).err().unwrap();
        assert!(matches!(err, Error::TypeError(_)));
    }
}
