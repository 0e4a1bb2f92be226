//! Charge current allocation core
//!
//! Pure decision layer: given a budget snapshot and the load points, decide
//! per load point whether to leave it alone, stop it, or set a current/phase
//! target. Nothing in here performs I/O or blocks.
//!
//! - `hysteresis`: time-based stability gate over boolean conditions
//! - `usage`: estimates how much of a new target a load point will really draw
//! - `target`: converts offered power into a bounded current target
//! - `budget`: the shared power budget and its deduction rule
//! - `phase`: cooldown-gated phase switching
//! - `allocator`: priority-ordered loop that threads the budget through all of the above

use crate::diagnostics::ChargeReason;
use serde::{Deserialize, Serialize};

pub mod allocator;
pub mod budget;
pub mod hysteresis;
pub mod phase;
pub mod target;
pub mod usage;

pub use allocator::{AllocationOutcome, AllocatorSettings, CancelFlag, PowerBudgetAllocator, SwitchMemory};
pub use budget::{PowerBudget, recalculate};
pub use hysteresis::{GateResult, TimeStampedCondition, is_relevant_and_fulfilled};
pub use target::TargetCurrentCalculator;
pub use usage::UsageReconciler;

/// What a load point should do this cycle
///
/// "Don't touch" is `NoChange`, never a zero current.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TargetChargeCommand {
    NoChange,
    Stop,
    /// `None` leaves that quantity as the load point currently has it
    Set {
        current: Option<f64>,
        phases: Option<u8>,
    },
}

impl TargetChargeCommand {
    pub fn set(current: f64, phases: u8) -> Self {
        TargetChargeCommand::Set {
            current: Some(current),
            phases: Some(phases),
        }
    }

    pub fn is_no_change(&self) -> bool {
        matches!(self, TargetChargeCommand::NoChange)
    }

    pub fn target_current(&self) -> Option<f64> {
        match self {
            TargetChargeCommand::Set { current, .. } => *current,
            _ => None,
        }
    }

    pub fn target_phases(&self) -> Option<u8> {
        match self {
            TargetChargeCommand::Set { phases, .. } => *phases,
            _ => None,
        }
    }
}

/// A command together with the reason it was chosen
#[derive(Debug, Clone, PartialEq)]
pub struct TargetDecision {
    pub command: TargetChargeCommand,
    pub reason: ChargeReason,
}

impl TargetDecision {
    pub fn no_change(reason: ChargeReason) -> Self {
        Self {
            command: TargetChargeCommand::NoChange,
            reason,
        }
    }

    pub fn stop(reason: ChargeReason) -> Self {
        Self {
            command: TargetChargeCommand::Stop,
            reason,
        }
    }
}
