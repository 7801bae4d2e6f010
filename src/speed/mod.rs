//! Speed presets shared by Deferred scheduling and LightIterator slicing
//!
//! A single ordered table of named presets maps each name to two numbers:
//! the delay a Deferred waits between asynchronous steps, and the slice
//! budget a LightIterator works for before it considers yielding. Both
//! columns are keyed by the same names so callers agree on relative pacing.
//!
//! The table is immutable once built and is injected through
//! [`Engine`](crate::engine::Engine); nothing here is global.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// SpeedPreset
// ---------------------------------------------------------------------------

/// Named pacing presets, slowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeedPreset {
    Limp,
    Doze,
    Slow,
    Normal,
    Fast,
    Rapid,
    Ninja,
}

impl SpeedPreset {
    /// Every preset in table order.
    pub const ALL: [SpeedPreset; 7] = [
        SpeedPreset::Limp,
        SpeedPreset::Doze,
        SpeedPreset::Slow,
        SpeedPreset::Normal,
        SpeedPreset::Fast,
        SpeedPreset::Rapid,
        SpeedPreset::Ninja,
    ];

    fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            SpeedPreset::Limp => "limp",
            SpeedPreset::Doze => "doze",
            SpeedPreset::Slow => "slow",
            SpeedPreset::Normal => "normal",
            SpeedPreset::Fast => "fast",
            SpeedPreset::Rapid => "rapid",
            SpeedPreset::Ninja => "ninja",
        }
    }
}

impl fmt::Display for SpeedPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SpeedPreset {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        SpeedPreset::ALL
            .iter()
            .copied()
            .find(|p| p.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::config(format!("unknown speed preset '{}'", s)))
    }
}

// ---------------------------------------------------------------------------
// Speed
// ---------------------------------------------------------------------------

/// A pacing request: a named preset or an explicit number of milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speed {
    Preset(SpeedPreset),
    Millis(u64),
}

impl Default for Speed {
    /// The fastest preset, which maps to a zero delay.
    fn default() -> Self {
        Speed::Preset(SpeedPreset::Ninja)
    }
}

impl From<SpeedPreset> for Speed {
    fn from(preset: SpeedPreset) -> Self {
        Speed::Preset(preset)
    }
}

impl From<u64> for Speed {
    fn from(ms: u64) -> Self {
        Speed::Millis(ms)
    }
}

impl FromStr for Speed {
    type Err = Error;

    /// Accepts a preset name or a plain millisecond count.
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().parse::<u64>() {
            Ok(ms) => Ok(Speed::Millis(ms)),
            Err(_) => s.parse::<SpeedPreset>().map(Speed::Preset),
        }
    }
}

impl fmt::Display for Speed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Speed::Preset(p) => write!(f, "{}", p),
            Speed::Millis(ms) => write!(f, "{}ms", ms),
        }
    }
}

// ---------------------------------------------------------------------------
// SpeedTable
// ---------------------------------------------------------------------------

/// Immutable preset table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeedTable {
    /// Deferred step delay in milliseconds, indexed by preset.
    delays: [u64; 7],
    /// LightIterator slice budget in milliseconds, indexed by preset.
    /// A negative budget yields after every step.
    intervals: [i64; 7],
}

impl Default for SpeedTable {
    fn default() -> Self {
        Self {
            delays: [1000, 100, 36, 18, 12, 6, 0],
            intervals: [-1, 0, 2, 5, 12, 36, 60],
        }
    }
}

/// On-disk form: partial maps of preset name to milliseconds.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct SpeedOverrides {
    #[serde(default)]
    delays: IndexMap<String, u64>,
    #[serde(default)]
    intervals: IndexMap<String, i64>,
}

impl SpeedTable {
    /// Delay a Deferred waits before an asynchronous step.
    pub fn delay(&self, speed: Speed) -> u64 {
        match speed {
            Speed::Preset(p) => self.delays[p.index()],
            Speed::Millis(ms) => ms,
        }
    }

    /// Slice budget for a LightIterator.
    pub fn interval(&self, speed: Speed) -> i64 {
        match speed {
            Speed::Preset(p) => self.intervals[p.index()],
            Speed::Millis(ms) => ms.min(i64::MAX as u64) as i64,
        }
    }

    /// Replace one preset's delay.
    pub fn with_delay(mut self, preset: SpeedPreset, ms: u64) -> Self {
        self.delays[preset.index()] = ms;
        self
    }

    /// Replace one preset's slice budget.
    pub fn with_interval(mut self, preset: SpeedPreset, ms: i64) -> Self {
        self.intervals[preset.index()] = ms;
        self
    }

    /// Iterate `(preset, delay, interval)` rows in table order.
    pub fn rows(&self) -> impl Iterator<Item = (SpeedPreset, u64, i64)> + '_ {
        SpeedPreset::ALL
            .iter()
            .map(move |&p| (p, self.delays[p.index()], self.intervals[p.index()]))
    }

    /// Build a table from JSON overrides applied on top of the defaults.
    ///
    /// ```
    /// use deferlight::speed::{SpeedPreset, SpeedTable, Speed};
    ///
    /// let table = SpeedTable::from_json(r#"{"delays": {"slow": 50}}"#).unwrap();
    /// assert_eq!(table.delay(Speed::Preset(SpeedPreset::Slow)), 50);
    /// ```
    pub fn from_json(text: &str) -> Result<Self> {
        let overrides: SpeedOverrides = serde_json::from_str(text)?;
        let mut table = SpeedTable::default();
        for (name, ms) in overrides.delays {
            let preset: SpeedPreset = name.parse()?;
            table.delays[preset.index()] = ms;
        }
        for (name, ms) in overrides.intervals {
            let preset: SpeedPreset = name.parse()?;
            table.intervals[preset.index()] = ms;
        }
        table.validate()?;
        Ok(table)
    }

    /// Load overrides from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&text)
    }

    /// Render the full table as JSON.
    pub fn to_json(&self) -> Result<String> {
        let out = SpeedOverrides {
            delays: self.rows().map(|(p, d, _)| (p.name().to_string(), d)).collect(),
            intervals: self.rows().map(|(p, _, i)| (p.name().to_string(), i)).collect(),
        };
        Ok(serde_json::to_string_pretty(&out)?)
    }

    /// Slower presets must never be faster than the ones after them.
    fn validate(&self) -> Result<()> {
        for pair in self.delays.windows(2) {
            if pair[0] < pair[1] {
                return Err(Error::config("delays must not increase from limp to ninja"));
            }
        }
        for pair in self.intervals.windows(2) {
            if pair[0] > pair[1] {
                return Err(Error::config("intervals must not decrease from limp to ninja"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let table = SpeedTable::default();
        assert_eq!(table.delay(Speed::default()), 0);
        assert_eq!(table.delay(SpeedPreset::Limp.into()), 1000);
        assert_eq!(table.interval(SpeedPreset::Normal.into()), 5);
        assert_eq!(table.interval(SpeedPreset::Limp.into()), -1);
        assert_eq!(table.delay(Speed::Millis(7)), 7);
    }

    #[test]
    fn test_parse_speed() {
        assert_eq!("fast".parse::<Speed>().unwrap(), Speed::Preset(SpeedPreset::Fast));
        assert_eq!("NINJA".parse::<Speed>().unwrap(), Speed::Preset(SpeedPreset::Ninja));
        assert_eq!("25".parse::<Speed>().unwrap(), Speed::Millis(25));
        assert!("warp".parse::<Speed>().is_err());
    }

    #[test]
    fn test_overrides_rejects_unknown_preset() {
        let err = SpeedTable::from_json(r#"{"delays": {"warp": 1}}"#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_overrides_must_stay_ordered() {
        let err = SpeedTable::from_json(r#"{"delays": {"ninja": 5000}}"#).unwrap_err();
        assert!(err.to_string().contains("delays"));
    }

    #[test]
    fn test_json_round_trip_of_defaults() {
        let json = SpeedTable::default().to_json().unwrap();
        assert_eq!(SpeedTable::from_json(&json).unwrap(), SpeedTable::default());
    }
}
