use super::{lane_centre, LaneChange, Vehicle, VehicleAttributes};
use crate::math::CubicFn;
use crate::safety::LANE_CHANGE_DURATION;
use crate::VehicleId;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// An acceleration request that had to be clamped before it could be applied.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AccelerationClamp {
    pub vehicle: VehicleId,
    /// The requested acceleration in m/s^2, which may not be finite.
    pub requested: f64,
    /// The acceleration actually applied in m/s^2.
    pub applied: f64,
}

/// Integrates vehicle motion over one fixed time step.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Kinematics {
    dt: f64,
    max_vel: f64,
    max_acc: f64,
    min_acc: f64,
}

impl Kinematics {
    /// Creates the kinematics for vehicles with the given attributes and time step `dt` in s.
    pub fn new(attributes: &VehicleAttributes, dt: f64) -> Self {
        Self {
            dt,
            max_vel: attributes.max_vel,
            max_acc: attributes.max_acc,
            min_acc: attributes.min_acc,
        }
    }

    /// Clamps an acceleration into [A_min, A_max].
    /// Non-finite requests are replaced by the maximum deceleration.
    pub fn clamp_acceleration(&self, vehicle: VehicleId, requested: f64) -> (f64, Option<AccelerationClamp>) {
        let applied = if requested.is_finite() {
            requested.clamp(self.min_acc, self.max_acc)
        } else {
            self.min_acc
        };
        // NaN compares unequal to everything, so it is always reported.
        let clamp = (applied != requested).then_some(AccelerationClamp {
            vehicle,
            requested,
            applied,
        });
        (applied, clamp)
    }

    /// Advances a vehicle by one time step.
    ///
    /// # Parameters
    /// * `vehicle` - The vehicle at the start of the step
    /// * `acceleration` - The commanded acceleration in m/s^2
    /// * `lane_target` - The lane the vehicle moves into, if a lane change was granted
    /// * `now` - The simulation time at the start of the step, in s
    pub fn advance(
        &self,
        vehicle: &Vehicle,
        acceleration: f64,
        lane_target: Option<usize>,
        now: f64,
    ) -> (Vehicle, Option<AccelerationClamp>) {
        let (acc, clamp) = self.clamp_acceleration(vehicle.id, acceleration);
        let mut next = vehicle.clone();

        // Forward Euler on the updated velocity, which slightly overestimates stopping distances
        let vel = (vehicle.vel + acc * self.dt).clamp(0.0, self.max_vel);
        next.vel = vel;
        next.pos = vehicle.pos + vel * self.dt;
        next.acc = acc;

        if let Some(lane) = lane_target.filter(|lane| *lane != vehicle.lane) {
            let end_time = now + LANE_CHANGE_DURATION;
            next.lane_change = Some(LaneChange {
                from: vehicle.lane,
                start_time: now,
                end_time,
                offset: CubicFn::from_ends(now, vehicle.lateral_pos(now), end_time, lane_centre(lane)),
            });
            next.lane = lane;
        }

        (next, clamp)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::Role;
    use assert_approx_eq::assert_approx_eq;

    fn setup() -> (Kinematics, Vehicle) {
        let attributes = VehicleAttributes::default();
        let vehicle = Vehicle::new(VehicleId(3), &attributes, 1, 100.0, 20.0, Role::Normal);
        (Kinematics::new(&attributes, 0.1), vehicle)
    }

    #[test]
    fn integrates_with_updated_velocity() {
        let (kin, veh) = setup();
        let (next, clamp) = kin.advance(&veh, 2.0, None, 0.0);
        assert!(clamp.is_none());
        assert_approx_eq!(next.vel(), 20.2);
        assert_approx_eq!(next.pos_mid(), 102.02);
        assert_approx_eq!(next.acc(), 2.0);
    }

    #[test]
    fn velocity_is_bounded() {
        let (kin, mut veh) = setup();
        for _ in 0..100 {
            veh = kin.advance(&veh, -6.0, None, 0.0).0;
            assert!(veh.vel() >= 0.0);
        }
        assert_eq!(veh.vel(), 0.0);
        let pos = veh.pos_mid();
        veh = kin.advance(&veh, -6.0, None, 0.0).0;
        assert_eq!(veh.pos_mid(), pos);

        for _ in 0..200 {
            veh = kin.advance(&veh, 2.0, None, 0.0).0;
            assert!(veh.vel() <= 30.0);
        }
        assert_approx_eq!(veh.vel(), 30.0);
    }

    #[test]
    fn out_of_range_acceleration_is_reported() {
        let (kin, veh) = setup();
        let (next, clamp) = kin.advance(&veh, -40.0, None, 0.0);
        let clamp = clamp.unwrap();
        assert_eq!(clamp.vehicle, VehicleId(3));
        assert_eq!(clamp.requested, -40.0);
        assert_eq!(clamp.applied, -6.0);
        assert_approx_eq!(next.vel(), 19.4);

        let (next, clamp) = kin.advance(&veh, f64::NAN, None, 0.0);
        assert_eq!(clamp.unwrap().applied, -6.0);
        assert_approx_eq!(next.acc(), -6.0);
    }

    #[test]
    fn lane_changes_at_the_step_boundary() {
        let (kin, veh) = setup();
        let (next, _) = kin.advance(&veh, 0.0, Some(2), 4.0);
        assert_eq!(next.lane(), 2);
        let lc = next.lane_change().unwrap();
        assert_eq!(lc.from, 1);
        assert_eq!(next.lane_entered_at(), Some(4.0));
        assert_approx_eq!(lc.end_time, 4.5);
        assert!(next.is_changing_lane(4.1));
        assert_approx_eq!(next.lateral_pos(4.0), 4.0);
        assert_approx_eq!(next.lateral_pos(4.5), 8.0);

        let (same, _) = kin.advance(&veh, 0.0, Some(1), 4.0);
        assert!(same.lane_change().is_none());
    }
}
