use super::*;

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            console_level: None,
            file_level: None,
            file: "/tmp/heliocharge.log".to_string(),
            backup_count: 5,
            console_output: true,
            json_format: false,
        }
    }
}

impl Default for ControlsConfig {
    fn default() -> Self {
        Self {
            cycle_interval_ms: 30_000,
            minutes_until_switch_on: 5,
            minutes_until_switch_off: 5,
            phase_switch_cooldown_seconds: 600,
            phase_switch_hysteresis_watts: 300.0,
            power_buffer_w: 0.0,
            max_combined_current: None,
            telemetry_max_age_seconds: 300,
            soc_limit_min_difference: SOC_LIMIT_MIN_DIFFERENCE,
            not_used_tolerance_a: NOT_USED_TOLERANCE_A,
        }
    }
}

impl Default for HomeBatteryConfig {
    fn default() -> Self {
        Self {
            min_soc: 20.0,
            reserve_w: 0.0,
            discharge_min_soc: 100.0,
            max_discharge_w: 0.0,
        }
    }
}

impl Default for LoadPointConfig {
    fn default() -> Self {
        Self {
            vehicle_id: None,
            connector_id: Some("connector-1".to_string()),
            governance: Governance::ConnectorManaged,
            priority: 0,
            mode: ChargeMode::Auto,
            min_current: Some(6.0),
            max_current: Some(16.0),
            min_phases: Some(1),
            max_phases: Some(3),
            max_soc: default_max_soc(),
            nominal_voltage: Some(230.0),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            controls: ControlsConfig::default(),
            home_battery: HomeBatteryConfig::default(),
            load_points: Vec::new(),
        }
    }
}
