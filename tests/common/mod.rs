//! Shared test helpers for integration tests

use std::cell::RefCell;
use std::rc::Rc;

use deferlight::{Engine, EngineConfig, EventLoop, Value};

/// An engine on a fresh virtual-time event loop
pub fn setup() -> (Rc<EventLoop>, Engine) {
    let host = Rc::new(EventLoop::new());
    let engine = Engine::new(host.clone());
    (host, engine)
}

/// Same as [`setup`] with custom engine configuration
#[allow(dead_code)]
pub fn setup_with(config: EngineConfig) -> (Rc<EventLoop>, Engine) {
    let host = Rc::new(EventLoop::new());
    let engine = Engine::with_config(host.clone(), config);
    (host, engine)
}

/// Shared call log for observing callback order
#[allow(dead_code)]
pub fn log() -> Rc<RefCell<Vec<String>>> {
    Rc::new(RefCell::new(Vec::new()))
}

/// Numeric view of a value, NaN when it is not a number
#[allow(dead_code)]
pub fn num(v: &Value) -> f64 {
    v.as_number().unwrap_or(f64::NAN)
}
