//! Deferlight: cooperative Deferred chains and time-sliced iteration
//!
//! Deferlight is a small execution engine for single-threaded hosts. It
//! provides two primitives that never block the host for long:
//!
//! - [`Deferred`], a chainable future with cancellation, nested-result
//!   flattening, speed-controlled stepping and unhandled-failure reporting;
//! - [`LightIterator`], a bulk-iteration driver that walks arrays, objects,
//!   ranges, generators and zipped sequences either in one tight loop or
//!   in small time-boxed slices.
//!
//! Both run on any host implementing [`HostScheduler`]. The bundled
//! [`EventLoop`] is a deterministic virtual-time host for tests, tools and
//! embedding.
//!
//! # Quick Start
//!
//! ```
//! use std::rc::Rc;
//! use deferlight::{Engine, EventLoop, IterOptions, Value};
//!
//! let host = Rc::new(EventLoop::new());
//! let engine = Engine::new(host.clone());
//!
//! let squares = engine.map(vec![1, 2, 3], IterOptions::new(), |v, _, _| {
//!     let n = v.as_number().unwrap_or(0.0);
//!     Ok(Value::Number(n * n))
//! });
//! squares.then(|v| Ok(Value::from(format!("squares: {}", v))));
//!
//! host.run_until_idle();
//! assert_eq!(
//!     squares.reply().unwrap().unwrap(),
//!     Value::from("squares: 1,4,9")
//! );
//! ```
//!
//! # Module Overview
//!
//! | Category | Modules |
//! |----------|---------|
//! | **Core** | [`deferred`], [`iter`], [`engine`] |
//! | **Host** | [`event_loop`] |
//! | **Data** | [`value`], [`speed`], [`error`](Error) |
// Clippy configuration for deferlight.
//
// - type_complexity: chain callbacks are boxed FnOnce/FnMut trait objects
// - new_without_default: option builders take required arguments
#![allow(clippy::type_complexity)]
#![allow(clippy::new_without_default)]

pub mod deferred;
pub mod engine;
pub mod event_loop;
pub mod iter;
pub mod prelude;
pub mod speed;
pub mod value;

mod error;

pub use deferred::{Condition, Deferred, DeferredOptions, State};
pub use engine::{Engine, EngineConfig};
pub use error::{Error, Result};
pub use event_loop::{EventLoop, EventLoopConfig, HostScheduler, RunResult, Task, TimerHandle};
pub use iter::{helpers, Collect, IterOptions, LightIterator, RepeatRange, Shape, Step, Visit};
pub use speed::{Speed, SpeedPreset, SpeedTable};
pub use value::Value;

/// Deferlight version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
