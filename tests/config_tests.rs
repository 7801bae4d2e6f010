//! Integration tests for speed table configuration

mod common;

use std::io::Write;

use common::setup_with;
use deferlight::{DeferredOptions, EngineConfig, Error, Speed, SpeedPreset, SpeedTable};
use pretty_assertions::assert_eq;

#[test]
fn test_load_overrides_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, r#"{{"delays": {{"slow": 40}}, "intervals": {{"fast": 15}}}}"#).unwrap();

    let table = SpeedTable::load(file.path()).unwrap();
    assert_eq!(table.delay(Speed::Preset(SpeedPreset::Slow)), 40);
    assert_eq!(table.interval(Speed::Preset(SpeedPreset::Fast)), 15);
    // untouched presets keep their defaults
    assert_eq!(table.delay(Speed::Preset(SpeedPreset::Normal)), 18);
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = SpeedTable::load(dir.path().join("absent.json")).unwrap_err();
    assert!(matches!(err, Error::Io { .. }));
}

#[test]
fn test_unknown_preset_is_config_error() {
    let err = SpeedTable::from_json(r#"{"delays": {"warp": 1}}"#).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn test_out_of_order_table_is_rejected() {
    let err = SpeedTable::from_json(r#"{"delays": {"ninja": 5000}}"#).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn test_engine_uses_injected_table() {
    let speeds = SpeedTable::default().with_delay(SpeedPreset::Fast, 25);
    let (host, engine) = setup_with(EngineConfig {
        speeds,
        ..EngineConfig::default()
    });
    let d = engine.deferred_with(DeferredOptions::new().speed(SpeedPreset::Fast));
    d.then(Ok);
    d.begin(1);
    host.run_until_idle();
    assert_eq!(d.speed(), 25);
    assert_eq!(host.current_time(), 25);
}

#[test]
fn test_speed_parses_names_and_numbers() {
    assert_eq!("Rapid".parse::<Speed>().unwrap(), Speed::Preset(SpeedPreset::Rapid));
    assert_eq!("250".parse::<Speed>().unwrap(), Speed::Millis(250));
    assert!("sideways".parse::<Speed>().is_err());
}
