pub use self::acceleration::{AccelerationModel, ModelParams};
pub use self::dynamics::{AccelerationClamp, Kinematics};
use crate::math::{CubicFn, Point2d, Vector2d};
use crate::util::Interval;
use crate::{ActionKind, Decision, Rationale, VehicleId};
use cgmath::prelude::*;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

mod acceleration;
mod dynamics;

/// The lateral distance between adjacent lane centres, in m.
pub const LANE_WIDTH: f64 = 4.0;

/// Below this velocity a vehicle is considered stopped, in m/s.
const STOPPED_VEL: f64 = 0.1;

/// A simulated vehicle.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Vehicle {
    /// The vehicle's ID
    pub(crate) id: VehicleId,
    /// Half the vehicle's length in m.
    half_len: f64,
    /// Half the vehicle's width in m.
    half_wid: f64,
    /// The longitudinal position of the centre of the vehicle, in m.
    pos: f64,
    /// The velocity in m/s.
    vel: f64,
    /// The last applied acceleration in m/s^2.
    acc: f64,
    /// The lane the vehicle occupies.
    lane: usize,
    /// The vehicle's role in the scenario.
    role: Role,
    /// The kind of the last decision applied to the vehicle.
    last_action: Option<ActionKind>,
    /// Why the last decision was taken.
    rationale: Option<Rationale>,
    /// The lateral motion of the last lane change, if one was made.
    lane_change: Option<LaneChange>,
}

/// The attributes shared by all vehicles of a simulation.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct VehicleAttributes {
    /// The vehicle length in m.
    pub length: f64,
    /// The vehicle width in m.
    pub width: f64,
    /// The maximum velocity (V_max) in m/s.
    pub max_vel: f64,
    /// The maximum acceleration (A_max) in m/s^2.
    pub max_acc: f64,
    /// The maximum deceleration (A_min), a negative number in m/s^2.
    pub min_acc: f64,
}

impl Default for VehicleAttributes {
    fn default() -> Self {
        Self {
            length: 4.5,
            width: 1.8,
            max_vel: 30.0,
            max_acc: 2.0,
            min_acc: -6.0,
        }
    }
}

/// The role a vehicle plays in the scenario.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Role {
    #[default]
    Normal,
    Priority,
    EmergencySource,
}

/// The lateral motion of a lane change. The lane itself changes at once;
/// this only describes where the vehicle is drawn while it moves across.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LaneChange {
    /// The lane the vehicle left.
    pub from: usize,
    /// The simulation time at which the vehicle entered its new lane, in s.
    pub start_time: f64,
    /// The simulation time at which the lateral motion is complete, in s.
    pub end_time: f64,
    /// The lateral position over time.
    pub offset: CubicFn,
}

/// The lateral position of a lane's centre line.
pub fn lane_centre(lane: usize) -> f64 {
    lane as f64 * LANE_WIDTH
}

impl Vehicle {
    /// Creates a new vehicle.
    pub(crate) fn new(
        id: VehicleId,
        attributes: &VehicleAttributes,
        lane: usize,
        pos: f64,
        vel: f64,
        role: Role,
    ) -> Self {
        Self {
            id,
            half_len: 0.5 * attributes.length,
            half_wid: 0.5 * attributes.width,
            pos,
            vel,
            acc: 0.0,
            lane,
            role,
            last_action: None,
            rationale: None,
            lane_change: None,
        }
    }

    /// Gets the vehicle's ID.
    pub fn id(&self) -> VehicleId {
        self.id
    }

    /// The vehicle's length in m.
    pub fn length(&self) -> f64 {
        2.0 * self.half_len
    }

    /// The vehicle's width in m.
    pub fn width(&self) -> f64 {
        2.0 * self.half_wid
    }

    /// The longitudinal position of the centre of the vehicle in m.
    pub fn pos_mid(&self) -> f64 {
        self.pos
    }

    /// The longitudinal position of the rear of the vehicle in m.
    pub fn pos_rear(&self) -> f64 {
        self.pos - self.half_len
    }

    /// The longitudinal position of the front of the vehicle in m.
    pub fn pos_front(&self) -> f64 {
        self.pos + self.half_len
    }

    /// The longitudinal extent of the vehicle body.
    pub fn body(&self) -> Interval {
        Interval::disc(self.pos, self.half_len)
    }

    /// The vehicle's velocity in m/s.
    pub fn vel(&self) -> f64 {
        self.vel
    }

    /// The last applied acceleration in m/s^2.
    pub fn acc(&self) -> f64 {
        self.acc
    }

    /// The lane the vehicle occupies.
    pub fn lane(&self) -> usize {
        self.lane
    }

    /// The vehicle's role in the scenario.
    pub fn role(&self) -> Role {
        self.role
    }

    /// The kind of the last decision applied to the vehicle.
    pub fn last_action(&self) -> Option<ActionKind> {
        self.last_action
    }

    /// Why the vehicle took its last decision.
    pub fn rationale(&self) -> Option<&Rationale> {
        self.rationale.as_ref()
    }

    /// The lateral motion of the vehicle's last lane change.
    pub fn lane_change(&self) -> Option<&LaneChange> {
        self.lane_change.as_ref()
    }

    /// Whether the vehicle is stopped.
    pub fn has_stopped(&self) -> bool {
        self.vel < STOPPED_VEL
    }

    /// Whether the vehicle is still moving across from its previous lane at `time`.
    pub fn is_changing_lane(&self, time: f64) -> bool {
        self.lane_change.map_or(false, |lc| lc.end_time > time)
    }

    /// The simulation time at which the vehicle entered its current lane, in s,
    /// or `None` if it has never changed lane.
    pub fn lane_entered_at(&self) -> Option<f64> {
        self.lane_change.map(|lc| lc.start_time)
    }

    /// The bumper-to-bumper distance from this vehicle to `leader`, in m.
    pub fn gap_to(&self, leader: &Vehicle) -> f64 {
        leader.pos_rear() - self.pos_front()
    }

    /// The lateral position of the centre of the vehicle at `time`, in m.
    pub fn lateral_pos(&self, time: f64) -> f64 {
        self.lane_change
            .filter(|lc| lc.end_time > time)
            .map(|lc| lc.offset.y(time))
            .unwrap_or_else(|| lane_centre(self.lane))
    }

    /// The coordinates in world space of the centre of the vehicle at `time`.
    pub fn world_pos(&self, time: f64) -> Point2d {
        Point2d::new(self.pos, self.lateral_pos(time))
    }

    /// A unit vector in world space aligned with the vehicle's heading at `time`.
    pub fn direction(&self, time: f64) -> Vector2d {
        let lat_vel = self
            .lane_change
            .filter(|lc| lc.end_time > time)
            .map(|lc| lc.offset.dy(time))
            .unwrap_or(0.0);
        let dir = Vector2d::new(self.vel, lat_vel);
        if dir.magnitude2() > 0.0 {
            dir.normalize()
        } else {
            Vector2d::unit_x()
        }
    }

    /// The longitudinal and lateral extents of the vehicle in world space at `time`.
    pub fn footprint(&self, time: f64) -> [Interval; 2] {
        let centre = self.world_pos(time);
        [
            Interval::disc(centre.x, self.half_len),
            Interval::disc(centre.y, self.half_wid),
        ]
    }

    /// Returns a copy of the vehicle as it would be if it were in `lane`.
    pub(crate) fn in_lane(&self, lane: usize) -> Self {
        Self {
            lane,
            ..self.clone()
        }
    }

    pub(crate) fn set_role(&mut self, role: Role) {
        self.role = role;
    }

    /// Records the decision that was applied to the vehicle.
    pub(crate) fn record(&mut self, decision: &Decision) {
        self.last_action = Some(decision.kind);
        self.rationale = Some(decision.rationale.clone());
    }
}
