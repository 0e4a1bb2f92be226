//! Shared power budget threaded through one allocation cycle

use serde::{Deserialize, Serialize};

/// Power still available for allocation this cycle
///
/// `remaining_controllable_power_w` is signed: positive is surplus still
/// exportable, negative means the site is already importing. The battery
/// discharge allowance is never negative and is consumed first.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PowerBudget {
    pub remaining_controllable_power_w: f64,
    pub extra_battery_discharge_allowance_w: f64,
}

impl PowerBudget {
    pub fn new(remaining_controllable_power_w: f64, extra_battery_discharge_allowance_w: f64) -> Self {
        Self {
            remaining_controllable_power_w,
            extra_battery_discharge_allowance_w: extra_battery_discharge_allowance_w.max(0.0),
        }
    }

    /// Everything a load point may be offered right now
    pub fn offerable_w(&self) -> f64 {
        self.remaining_controllable_power_w + self.extra_battery_discharge_allowance_w
    }
}

/// Deduct a load point's estimated usage from the budget.
///
/// Non-positive usage is a no-op. The allowance is drained before the primary
/// budget, and the primary budget may go (further) negative.
pub fn recalculate(mut budget: PowerBudget, estimated_usage_w: f64) -> PowerBudget {
    if !(estimated_usage_w > 0.0) {
        return budget;
    }
    let mut remaining = estimated_usage_w;
    if budget.extra_battery_discharge_allowance_w > 0.0 {
        let used = budget.extra_battery_discharge_allowance_w.min(remaining);
        budget.extra_battery_discharge_allowance_w -= used;
        remaining -= used;
    }
    if remaining > 0.0 {
        budget.remaining_controllable_power_w -= remaining;
    }
    budget
}
