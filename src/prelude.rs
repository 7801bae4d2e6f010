//! Prelude module for convenient imports
//!
//! ```
//! use std::rc::Rc;
//! use deferlight::prelude::*;
//!
//! fn main() -> Result<()> {
//!     let host = Rc::new(EventLoop::new());
//!     let engine = Engine::new(host.clone());
//!     let d = engine.succeed(1);
//!     host.run_until_idle();
//!     assert_eq!(d.reply().unwrap()?, Value::from(1));
//!     Ok(())
//! }
//! ```

// Engine and host
pub use crate::engine::{Engine, EngineConfig};
pub use crate::event_loop::{EventLoop, HostScheduler, RunResult};

// Deferred chains
pub use crate::deferred::{Condition, Deferred, DeferredOptions, Reply, State};

// Iteration
pub use crate::iter::{helpers, Collect, ExternalIterator, IterAdapter, IterOptions, LightIterator, RepeatRange, Shape, Step, Visit};

// Values, errors and pacing
pub use crate::error::{Error, Result};
pub use crate::speed::{Speed, SpeedPreset, SpeedTable};
pub use crate::value::Value;
