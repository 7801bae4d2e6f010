//! Adaptive time-slicing for asynchronous iteration
//!
//! A slice runs iterations back to back while tracking two numbers:
//!
//! - `diff`: milliseconds since the current slice began;
//! - `risk`: milliseconds since the whole traversal began.
//!
//! Once `diff` passes the configured interval the driver considers
//! yielding. The chance grows in steps as the overrun grows, so a slice
//! that is only slightly over budget usually absorbs a few more
//! iterations, and one far over budget always yields. After yielding, the
//! next slice is delayed a little longer the more total time the
//! traversal has consumed.

use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Overrun thresholds (ms past the interval) and the yield weight, out of
/// ten, that applies below each one. Past the last threshold the weight
/// is 10 and the slice always yields.
const AXIS_STEPS: [(f64, u8); 3] = [(8.0, 2), (36.0, 5), (48.0, 7)];
const AXIS_MAX: u8 = 10;

/// Upper bound on the extra delay after a yield
const MAX_REST_MS: u64 = 36;

/// Yield decisions for one traversal
#[derive(Debug, Clone)]
pub struct SlicePolicy {
    /// Slice budget in ms; negative means yield after every step
    interval: i64,
    rng: StdRng,
}

impl SlicePolicy {
    pub fn new(interval: i64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { interval, rng }
    }

    pub fn interval(&self) -> i64 {
        self.interval
    }

    /// Yield weight (0..=10) for a slice that has run `diff` ms
    pub fn axis(&self, diff: f64) -> u8 {
        let interval = self.interval as f64;
        if diff <= interval {
            return 0;
        }
        let over = diff - interval;
        AXIS_STEPS
            .iter()
            .find(|(limit, _)| over < *limit)
            .map(|(_, axis)| *axis)
            .unwrap_or(AXIS_MAX)
    }

    /// Decide with an explicit draw in `0..10`
    pub fn should_yield_with(&self, diff: f64, roll: u8) -> bool {
        if self.interval < 0 {
            return true;
        }
        roll < self.axis(diff)
    }

    /// Decide with a random draw
    pub fn should_yield(&mut self, diff: f64) -> bool {
        let roll = self.rng.gen_range(0..AXIS_MAX);
        self.should_yield_with(diff, roll)
    }

    /// Extra delay before the next slice, growing with `risk / diff`
    pub fn rest_delay(&self, risk: f64, diff: f64) -> u64 {
        let ratio = risk / diff.max(1.0);
        (ratio.max(0.0).sqrt().floor() as u64).min(MAX_REST_MS)
    }
}

/// Time bookkeeping for one traversal
#[derive(Debug, Clone)]
pub struct Timing {
    start: Instant,
    slice_start: Instant,
    /// Slices started so far
    pub slices: u64,
}

impl Default for Timing {
    fn default() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            slice_start: now,
            slices: 0,
        }
    }
}

impl Timing {
    pub fn begin_slice(&mut self) {
        self.slice_start = Instant::now();
        self.slices += 1;
    }

    /// Milliseconds since the traversal started
    pub fn risk(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Milliseconds since the current slice started
    pub fn diff(&self) -> f64 {
        self.slice_start.elapsed().as_secs_f64() * 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_axis_escalates_past_interval() {
        let policy = SlicePolicy::new(12, Some(1));
        assert_eq!(policy.axis(5.0), 0);
        assert_eq!(policy.axis(12.0), 0);
        assert_eq!(policy.axis(15.0), 2);
        assert_eq!(policy.axis(12.0 + 20.0), 5);
        assert_eq!(policy.axis(12.0 + 40.0), 7);
        assert_eq!(policy.axis(12.0 + 48.0), 10);
    }

    #[test]
    fn test_far_overrun_always_yields() {
        let policy = SlicePolicy::new(5, Some(1));
        for roll in 0..10 {
            assert!(policy.should_yield_with(200.0, roll));
            assert!(!policy.should_yield_with(1.0, roll));
        }
        assert!(policy.should_yield_with(6.0, 1));
        assert!(!policy.should_yield_with(6.0, 2));
    }

    #[test]
    fn test_negative_interval_yields_every_step() {
        let policy = SlicePolicy::new(-1, Some(1));
        assert!(policy.should_yield_with(0.0, 9));
    }

    #[test]
    fn test_seeded_policy_is_repeatable() {
        let mut a = SlicePolicy::new(0, Some(42));
        let mut b = SlicePolicy::new(0, Some(42));
        let left: Vec<bool> = (0..32).map(|_| a.should_yield(20.0)).collect();
        let right: Vec<bool> = (0..32).map(|_| b.should_yield(20.0)).collect();
        assert_eq!(left, right);
    }

    #[test]
    fn test_rest_grows_with_risk() {
        let policy = SlicePolicy::new(5, Some(1));
        assert_eq!(policy.rest_delay(10.0, 10.0), 1);
        assert!(policy.rest_delay(1000.0, 10.0) > policy.rest_delay(100.0, 10.0));
        assert_eq!(policy.rest_delay(1.0e9, 1.0), MAX_REST_MS);
    }
}
