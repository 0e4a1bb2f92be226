#![no_main]
use chrono::{TimeZone, Utc};
use heliocharge::allocation::{TargetChargeCommand, TargetCurrentCalculator};
use heliocharge::loadpoint::{
    ChargeMode, ChargingConstraints, ChargingPriority, Governance, LoadPoint, LoadPointId,
};
use libfuzzer_sys::fuzz_target;

fn f64_at(data: &[u8], idx: usize) -> f64 {
    let mut buf = [0u8; 8];
    for (i, b) in buf.iter_mut().enumerate() {
        *b = data.get(idx * 8 + i).copied().unwrap_or(0);
    }
    f64::from_le_bytes(buf)
}

fn bounded(x: f64, modulus: f64) -> f64 {
    if x.is_finite() { x.abs() % modulus } else { 0.0 }
}

fuzz_target!(|data: &[u8]| {
    let min_current = bounded(f64_at(data, 0), 64.0);
    let max_current = bounded(f64_at(data, 1), 64.0);
    let power_w = f64_at(data, 2);
    let voltage = bounded(f64_at(data, 3), 400.0);
    let phases = data.get(32).copied().unwrap_or(1) % 4;

    let constraints = ChargingConstraints {
        min_current,
        max_current,
        min_phases: 1,
        max_phases: 3,
        soc: None,
        max_soc: 100.0,
        vehicle_soc_limit: None,
        charge_start_allowed: true,
        is_charging: data.get(33).is_some_and(|b| b & 1 == 1),
    };
    let load_point = LoadPoint {
        id: LoadPointId::connector("fuzz"),
        plugged_in: true,
        at_home: true,
        governance: Governance::ConnectorManaged,
        priority: ChargingPriority(0),
        mode: ChargeMode::Auto,
        actual_current: 0.0,
        actual_phases: Some(phases),
        estimated_voltage: Some(voltage),
        vehicle_last_applied_current: None,
        connector_last_commanded_current: None,
    };
    let now = Utc.timestamp_opt(0, 0).single().unwrap_or_default();

    let calc = TargetCurrentCalculator::default();
    if let Ok(decision) = calc.get_target(&constraints, &load_point, power_w, false, now)
        && let TargetChargeCommand::Set {
            current: Some(c), ..
        } = decision.command
    {
        assert!(c >= min_current && c <= max_current, "{c} outside {min_current}..={max_current}");
    }
});
