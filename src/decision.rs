use crate::safety::Invariant;
use crate::VehicleId;
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The kind of action a vehicle takes for one tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ActionKind {
    Follow,
    EmergencyBrake,
    LaneChange,
    Yield,
}

impl ActionKind {
    /// Whether the action is a maneuver during which following distances may lapse.
    pub fn is_maneuver(self) -> bool {
        matches!(self, ActionKind::LaneChange | ActionKind::EmergencyBrake)
    }
}

/// Why a decision was taken.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Rationale {
    /// The vehicle is the source of an emergency and brakes.
    EmergencySource { responded_at: f64 },
    /// An emergency source ahead in the lane; braking.
    EmergencyBrake {
        source: VehicleId,
        collision_time: Option<f64>,
        responded_at: f64,
    },
    /// An emergency source ahead in the lane; moving out of its way.
    EmergencyLaneChange { source: VehicleId, responded_at: f64 },
    /// An active priority vehicle with a clear road.
    PriorityCruise,
    /// An active priority vehicle overtaking the vehicle blocking it.
    PriorityOvertake { blocker: VehicleId },
    /// An active priority vehicle stuck behind another one.
    PriorityBlocked { blocker: VehicleId },
    /// Moving out of the way of a priority vehicle.
    YieldLaneChange { priority: VehicleId, distance: f64 },
    /// Slowing down for a priority vehicle.
    YieldSlowdown { priority: VehicleId, distance: f64 },
    /// Keeping the safe time gap to the vehicle ahead.
    FollowLeader { leader: VehicleId, gap: f64 },
    /// Nothing ahead in the lane.
    FreeFlow,
    /// The chosen action failed its safety check and was replaced by maximum braking.
    SafetyFallback {
        rejected: ActionKind,
        violated: Invariant,
        /// The emergency the rejected action responded to, and when the response started.
        emergency: Option<(VehicleId, f64)>,
    },
}

impl Rationale {
    /// The emergency source the rationale responds to, and when the response started.
    pub fn emergency_response(&self) -> Option<(VehicleId, f64)> {
        match *self {
            Rationale::EmergencyBrake {
                source,
                responded_at,
                ..
            }
            | Rationale::EmergencyLaneChange {
                source,
                responded_at,
            } => Some((source, responded_at)),
            Rationale::SafetyFallback { emergency, .. } => emergency,
            _ => None,
        }
    }
}

impl fmt::Display for Rationale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rationale::EmergencySource { responded_at } => {
                write!(f, "emergency braking since {responded_at:.1}s")
            }
            Rationale::EmergencyBrake {
                source,
                collision_time: Some(ttc),
                ..
            } => write!(f, "{source} braking hard ahead, collision in {ttc:.1}s without response"),
            Rationale::EmergencyBrake { source, .. } => {
                write!(f, "holding position behind {source}")
            }
            Rationale::EmergencyLaneChange { source, .. } => {
                write!(f, "emergency lane change, {source} braking hard ahead")
            }
            Rationale::PriorityCruise => write!(f, "priority vehicle keeping its speed"),
            Rationale::PriorityOvertake { blocker } => write!(f, "overtaking {blocker}"),
            Rationale::PriorityBlocked { blocker } => write!(f, "following {blocker}, no lane to overtake"),
            Rationale::YieldLaneChange { priority, distance } => {
                write!(f, "yielding to priority vehicle {priority} ({distance:.1}m behind)")
            }
            Rationale::YieldSlowdown { priority, distance } => {
                write!(f, "making space for priority vehicle {priority} ({distance:.1}m behind)")
            }
            Rationale::FollowLeader { leader, gap } => write!(f, "following {leader} at {gap:.1}m"),
            Rationale::FreeFlow => write!(f, "no vehicle ahead"),
            Rationale::SafetyFallback {
                rejected, violated, ..
            } => {
                write!(f, "{rejected:?} would violate {violated:?}, braking")
            }
        }
    }
}

/// The action chosen for one vehicle at one tick.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Decision {
    /// The vehicle the decision is for.
    pub vehicle: VehicleId,
    pub kind: ActionKind,
    /// The commanded acceleration in m/s^2.
    pub acceleration: f64,
    /// The lane to move into, if any.
    pub target_lane: Option<usize>,
    pub rationale: Rationale,
    /// Set when no safe action existed and the vehicle brakes as hard as it can instead.
    pub degraded: bool,
}

impl Decision {
    /// Creates a decision which doesn't change lane.
    pub fn new(vehicle: VehicleId, kind: ActionKind, acceleration: f64, rationale: Rationale) -> Self {
        Self {
            vehicle,
            kind,
            acceleration,
            target_lane: None,
            rationale,
            degraded: false,
        }
    }

    /// Requests a move into `lane`.
    pub fn with_lane(self, lane: usize) -> Self {
        Self {
            target_lane: Some(lane),
            ..self
        }
    }

    /// Whether the decision responds to an emergency.
    pub fn is_emergency(&self) -> bool {
        self.kind == ActionKind::EmergencyBrake || self.rationale.emergency_response().is_some()
    }
}
