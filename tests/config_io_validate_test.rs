use heliocharge::config::{Config, LoadPointConfig};
use heliocharge::loadpoint::{ChargeMode, Governance};
use std::fs;

#[test]
fn save_and_load_yaml_roundtrip() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let path = tmp_dir.path().join("config.yaml");

    let mut cfg = Config::default();
    cfg.controls.max_combined_current = Some(32.0);
    cfg.logging.file = path.with_extension("log").to_string_lossy().to_string();
    cfg.load_points.push(LoadPointConfig {
        vehicle_id: Some("WVW123".to_string()),
        connector_id: None,
        governance: Governance::VehicleManaged,
        priority: 2,
        ..LoadPointConfig::default()
    });

    cfg.save_to_file(&path).unwrap();
    let loaded = Config::from_file(&path).unwrap();

    assert_eq!(loaded.controls.max_combined_current, Some(32.0));
    assert_eq!(loaded.logging.file, cfg.logging.file);
    assert_eq!(loaded.load_points.len(), 1);
    assert_eq!(loaded.load_points[0].vehicle_id.as_deref(), Some("WVW123"));
    assert_eq!(loaded.load_points[0].governance, Governance::VehicleManaged);
    assert_eq!(loaded.load_points[0].priority, 2);
}

#[test]
fn minimal_load_point_yaml_uses_defaults() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    fs::write(
        tmp.path(),
        "load_points:\n  - connector_id: garage\n    governance: connector\n    min_current: 6\n    max_current: 32\n    min_phases: 1\n    max_phases: 3\n",
    )
    .unwrap();
    let cfg = Config::from_file(tmp.path()).unwrap();
    assert!(cfg.validate().is_ok());

    let lp = &cfg.load_points[0];
    assert_eq!(lp.mode, ChargeMode::Off);
    assert_eq!(lp.max_soc, 100.0);
    assert_eq!(lp.nominal_voltage, None);
    assert_eq!(cfg.controls.minutes_until_switch_on, 5);
}

#[test]
fn config_validation_errors() {
    let mut cfg = Config::default();
    cfg.controls.cycle_interval_ms = 0;
    assert!(cfg.validate().is_err());

    cfg = Config::default();
    cfg.controls.max_combined_current = Some(-1.0);
    assert!(cfg.validate().is_err());

    cfg = Config::default();
    cfg.controls.telemetry_max_age_seconds = 0;
    assert!(cfg.validate().is_err());

    cfg = Config::default();
    cfg.load_points.push(LoadPointConfig {
        vehicle_id: None,
        connector_id: None,
        ..LoadPointConfig::default()
    });
    assert!(cfg.validate().is_err());
}

#[test]
fn from_file_with_invalid_yaml_fails() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    fs::write(tmp.path(), b"controls: [unclosed").unwrap();
    let err = Config::from_file(tmp.path()).unwrap_err();
    let msg = format!("{}", err);
    assert!(msg.contains("Serialization error"));
}

#[test]
fn from_missing_file_is_io_error() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let err = Config::from_file(tmp_dir.path().join("absent.yaml")).unwrap_err();
    assert!(format!("{}", err).contains("I/O error"));
}
