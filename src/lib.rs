//! # Heliocharge - solar-aware EV charge current allocation
//!
//! Distributes the site's surplus power across several load points (vehicles
//! or charging connectors) once per control cycle, in priority order, with
//! start/stop hysteresis and battery-aware budgeting.
//!
//! ## Architecture
//!
//! - `allocation`: the pure per-cycle core (hysteresis gate, usage
//!   reconciliation, target current, budget bookkeeping, phase switching,
//!   the allocator itself)
//! - `loadpoint`: load point identity, state and constraints
//! - `telemetry`: provider and sink traits, starting budget derivation
//! - `controller`: the periodic run loop around the allocator
//! - `diagnostics`: per-load-point reasons and cycle reports
//! - `sim`: an in-memory site for the binary and for tests
//! - `config`: configuration management and validation
//! - `logging`: structured logging and tracing

pub mod allocation;
pub mod config;
pub mod controller;
pub mod diagnostics;
pub mod error;
pub mod loadpoint;
pub mod logging;
pub mod sim;
pub mod telemetry;

// Re-export commonly used types
pub use allocation::{PowerBudget, PowerBudgetAllocator, TargetChargeCommand};
pub use config::Config;
pub use controller::{ChargeController, ControllerCommand, ControllerIo};
pub use error::{HelioError, Result};
