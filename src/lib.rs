pub use cgmath;
pub use config::{LaneLayout, Scenario, ScheduledTrigger, SimulationConfig};
pub use controller::{decide, ControllerParams, Evaluation};
pub use decision::{ActionKind, Decision, Rationale};
pub use error::{ConfigError, SimError, TriggerError};
pub use history::{FollowingViolation, HistoryEntry, RejectedTrigger, RunHistory, SafetyStats};
pub use registry::{Registry, SimulationHandle};
pub use safety::{Invariant, SafetyVerdict};
pub use scenario::{EventKind, ScenarioEvent, ScenarioFacts, ScenarioState, Trigger, TriggerSender};
pub use simulation::{Simulation, TickOutcome};
pub use state::PlatoonState;
pub use util::Interval;
pub use vehicle::{AccelerationClamp, Kinematics, LaneChange, Role, Vehicle, VehicleAttributes};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

mod config;
mod controller;
mod decision;
mod error;
mod history;
pub mod math;
mod registry;
pub mod safety;
mod scenario;
mod simulation;
mod state;
mod util;
mod vehicle;

/// Unique ID of a [Vehicle]; the vehicle's index in the platoon, front first.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct VehicleId(pub usize);

impl VehicleId {
    /// The index of the vehicle within the platoon.
    pub fn index(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for VehicleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "vehicle_{}", self.0)
    }
}
