//! Configuration management for Heliocharge
//!
//! This module handles loading, validation, and management of the application
//! configuration from YAML files.

use crate::error::{HelioError, Result};
use crate::loadpoint::{ChargeMode, Governance};
#[cfg(feature = "schema")]
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;

mod defaults;

/// Default band (percentage points) below the vehicle's own SoC limit in
/// which the vehicle is considered to have reached it.
pub const SOC_LIMIT_MIN_DIFFERENCE: f64 = 2.0;

/// Default tolerance (amps) before a load point is treated as under-drawing
/// its last commanded current.
pub const NOT_USED_TOLERANCE_A: f64 = 1.0;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(JsonSchema))]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// Allocation and hysteresis tuning
    pub controls: ControlsConfig,

    /// Home battery participation in the budget
    pub home_battery: HomeBatteryConfig,

    /// Static per-load-point bounds and priorities
    pub load_points: Vec<LoadPointConfig>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(JsonSchema))]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    pub level: String,

    /// Optional console-specific level (overrides `level` for console)
    pub console_level: Option<String>,

    /// Optional file-specific level (overrides `level` for file)
    pub file_level: Option<String>,

    /// Path to log file (or directory)
    pub file: String,

    /// Number of rotated files to keep
    pub backup_count: u32,

    /// Whether to log to console
    pub console_output: bool,

    /// Whether to use JSON format
    pub json_format: bool,
}

/// Allocation, hysteresis and safety tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(JsonSchema))]
#[serde(default)]
pub struct ControlsConfig {
    /// Interval between allocation cycles in milliseconds
    pub cycle_interval_ms: u64,

    /// Minutes the "should start" condition must hold before charging starts
    pub minutes_until_switch_on: u32,

    /// Minutes the "should stop" condition must hold before charging stops
    pub minutes_until_switch_off: u32,

    /// Minimum seconds between two phase switches of the same load point
    pub phase_switch_cooldown_seconds: u32,

    /// Extra margin (W) required before switching phase count
    pub phase_switch_hysteresis_watts: f64,

    /// Fixed offset (W) subtracted from the surplus before allocation.
    /// Positive keeps a margin of export, negative tolerates some import.
    pub power_buffer_w: f64,

    /// Combined current ceiling across all load points (A), if any
    pub max_combined_current: Option<f64>,

    /// Telemetry older than this is rejected and the cycle aborted
    pub telemetry_max_age_seconds: u32,

    /// Band below the vehicle SoC limit treated as "limit reached"
    pub soc_limit_min_difference: f64,

    /// Under-draw tolerance for usage reconciliation
    pub not_used_tolerance_a: f64,
}

/// Home battery participation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(JsonSchema))]
#[serde(default)]
pub struct HomeBatteryConfig {
    /// Below this SoC the battery keeps priority over charging
    pub min_soc: f64,

    /// Charging power (W) reserved for the battery while below `min_soc`
    pub reserve_w: f64,

    /// Above this SoC the battery may be discharged into load points
    pub discharge_min_soc: f64,

    /// Maximum discharge power (W) offered as extra allowance
    pub max_discharge_w: f64,
}

/// Static load point configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(JsonSchema))]
pub struct LoadPointConfig {
    /// Vehicle identifier (VIN or internal id)
    #[serde(default)]
    pub vehicle_id: Option<String>,

    /// Charging station connector identifier
    #[serde(default)]
    pub connector_id: Option<String>,

    /// Which side tracks the last commanded current
    pub governance: Governance,

    /// Lower value is served first
    #[serde(default)]
    pub priority: u32,

    /// Initial administrative mode
    #[serde(default)]
    pub mode: ChargeMode,

    /// Hardware minimum current (A)
    pub min_current: Option<f64>,

    /// Hardware maximum current (A)
    pub max_current: Option<f64>,

    /// Minimum phase count
    pub min_phases: Option<u8>,

    /// Maximum phase count
    pub max_phases: Option<u8>,

    /// SoC at which Auto charging stops
    #[serde(default = "default_max_soc")]
    pub max_soc: f64,

    /// Nominal voltage used when the load point does not report one
    #[serde(default)]
    pub nominal_voltage: Option<f64>,
}

fn default_max_soc() -> f64 {
    100.0
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from the first default location that exists
    pub fn load() -> Result<Self> {
        let default_paths = [
            "heliocharge.yaml",
            "/data/heliocharge.yaml",
            "/etc/heliocharge/config.yaml",
        ];

        for path in &default_paths {
            if Path::new(path).exists() {
                return Self::from_file(path);
            }
        }

        Ok(Config::default())
    }

    /// Save configuration to a YAML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Validate the configuration
    ///
    /// Per-load-point bounds are deliberately not checked here: a missing
    /// bound only disables that load point at allocation time.
    pub fn validate(&self) -> Result<()> {
        if self.controls.cycle_interval_ms == 0 {
            return Err(HelioError::validation(
                "controls.cycle_interval_ms",
                "Must be greater than 0",
            ));
        }

        if !self.controls.power_buffer_w.is_finite() {
            return Err(HelioError::validation(
                "controls.power_buffer_w",
                "Must be finite",
            ));
        }

        if let Some(cap) = self.controls.max_combined_current
            && !(cap.is_finite() && cap >= 0.0)
        {
            return Err(HelioError::validation(
                "controls.max_combined_current",
                "Must be a non-negative number",
            ));
        }

        if self.controls.telemetry_max_age_seconds == 0 {
            return Err(HelioError::validation(
                "controls.telemetry_max_age_seconds",
                "Must be greater than 0",
            ));
        }

        if self.controls.not_used_tolerance_a < 0.0 {
            return Err(HelioError::validation(
                "controls.not_used_tolerance_a",
                "Must not be negative",
            ));
        }

        if self.home_battery.max_discharge_w < 0.0 {
            return Err(HelioError::validation(
                "home_battery.max_discharge_w",
                "Must not be negative",
            ));
        }

        for (idx, lp) in self.load_points.iter().enumerate() {
            if lp.vehicle_id.is_none() && lp.connector_id.is_none() {
                return Err(HelioError::validation(
                    format!("load_points[{}]", idx),
                    "Either vehicle_id or connector_id must be set".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// JSON schema of the config file, for editors and config tooling
    #[cfg(feature = "schema")]
    pub fn json_schema() -> serde_json::Value {
        serde_json::to_value(schemars::schema_for!(Config)).unwrap_or(serde_json::Value::Null)
    }
}
