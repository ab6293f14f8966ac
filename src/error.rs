//! Error types.
//!
//! Configuration problems stop a simulation from being created, trigger problems
//! leave the simulation untouched, and nothing that can happen while stepping is
//! reported as an error at all.

use thiserror::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{EventKind, Scenario, VehicleId};

/// The configuration is outside the supported range.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("vehicle count {count} is outside the supported range {min}..={max}")]
    VehicleCount { count: usize, min: usize, max: usize },

    #[error("time step {dt} s is outside the supported range (0, {max}]")]
    TimeStep { dt: f64, max: f64 },

    #[error("duration {seconds} s is outside the supported range [{min}, {max}]")]
    Duration { seconds: f64, min: f64, max: f64 },

    #[error("lane count {lanes} is outside the supported range {min}..={max}")]
    LaneCount { lanes: usize, min: usize, max: usize },

    #[error("{roles} roles were given for {vehicles} vehicles")]
    RoleCount { roles: usize, vehicles: usize },

    #[error("vehicle attribute '{name}' has invalid value {value}")]
    VehicleAttribute { name: &'static str, value: f64 },

    #[error("scheduled trigger is invalid: {0}")]
    Schedule(#[source] TriggerError),
}

/// A trigger request was rejected; the simulation is unchanged.
#[derive(Clone, Debug, Error, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TriggerError {
    #[error("{vehicle} does not exist (platoon has {count} vehicles)")]
    InvalidVehicleId { vehicle: VehicleId, count: usize },

    #[error("{vehicle} is already the source of a {existing:?} event")]
    AlreadyTriggered { vehicle: VehicleId, existing: EventKind },

    #[error("{kind:?} triggers are disabled in the {scenario:?} scenario")]
    ScenarioDisabled { kind: EventKind, scenario: Scenario },

    #[error("trigger time {time} is not a finite number")]
    InvalidTime { time: f64 },

    #[error("the simulation receiving triggers has been dropped")]
    Disconnected,
}

/// Errors of the handle-based API.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("unknown simulation handle")]
    UnknownHandle,

    #[error("simulation lock was poisoned by a panicking thread")]
    LockPoisoned,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Trigger(#[from] TriggerError),
}
