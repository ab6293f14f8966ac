//! The formal safety contract: pure checks that every decision is held against.
//!
//! Each check returns a [SafetyVerdict] whose `margin` says how far the checked
//! quantity is from its limit; a positive margin means the invariant holds.

use crate::util::Interval;
use crate::Vehicle;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The desired time gap between a vehicle and the one ahead, in s.
pub const SAFE_TIME_GAP: f64 = 2.5; // s

/// The minimum gap between two vehicles in the same lane, in m.
pub const MIN_DISTANCE: f64 = 10.0; // m

/// Extra spacing added to every distance requirement, in m.
pub const SAFETY_MARGIN: f64 = 0.3; // m

/// The longest allowed delay between an event and the response to it, in s.
pub const REACTION_TIME_BOUND: f64 = 1.0; // s

/// Priority vehicles further away than this are not yet visible, in m.
pub const VISIBILITY_RANGE: f64 = 50.0; // m

/// The time it takes a vehicle to move across into an adjacent lane, in s.
pub const LANE_CHANGE_DURATION: f64 = 0.5; // s

/// How far ahead a vehicle's path is projected when checking lane change clearance, in s.
pub const CLEARANCE_HORIZON: f64 = SAFE_TIME_GAP; // s

/// A formal safety invariant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Invariant {
    SafeFollowingDistance,
    ReactionTimeBound,
    LaneChangeClearance,
    YieldVisibilityBound,
}

/// The result of checking an invariant.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SafetyVerdict {
    /// The invariant that was checked.
    pub checked: Invariant,
    /// Whether the invariant holds.
    pub holds: bool,
    /// The distance to the invariant's limit, in the invariant's unit (m or s).
    /// Negative when violated, infinite when nothing constrains it.
    pub margin: f64,
    /// The violated invariant, if any.
    pub violated: Option<Invariant>,
}

impl SafetyVerdict {
    /// Creates a verdict which holds iff `margin` is positive.
    pub fn from_margin(checked: Invariant, margin: f64) -> Self {
        let holds = margin > 0.0;
        Self {
            checked,
            holds,
            margin,
            violated: (!holds).then_some(checked),
        }
    }

    /// A verdict for a check with nothing to check against.
    pub fn vacuous(checked: Invariant) -> Self {
        Self::from_margin(checked, f64::INFINITY)
    }
}

/// The gap a vehicle travelling at `vel` must keep to the vehicle ahead, in m.
pub fn required_gap(vel: f64) -> f64 {
    f64::max(MIN_DISTANCE, SAFE_TIME_GAP * vel) + SAFETY_MARGIN
}

/// The road a vehicle travelling at `vel` must have clear ahead of it, in m.
fn reach(vel: f64) -> f64 {
    f64::max(MIN_DISTANCE, CLEARANCE_HORIZON * vel)
}

/// Checks that `follower` keeps the required gap to `leader`.
pub fn safe_following_distance(leader: &Vehicle, follower: &Vehicle) -> SafetyVerdict {
    let margin = follower.gap_to(leader) - required_gap(follower.vel());
    SafetyVerdict::from_margin(Invariant::SafeFollowingDistance, margin)
}

/// Checks that a response at `response_time` came soon enough after an event at `event_time`.
pub fn reaction_time_bound(event_time: f64, response_time: f64) -> SafetyVerdict {
    let margin = REACTION_TIME_BOUND - (response_time - event_time);
    SafetyVerdict::from_margin(Invariant::ReactionTimeBound, margin)
}

/// Checks that `candidate` can move into the lane occupied by `target_lane_occupants`.
///
/// At the start and at the end of the lane change, with every vehicle projected at its
/// current velocity, the road the candidate needs ahead must keep clear of every occupant
/// by more than [SAFETY_MARGIN], and the road every occupant needs ahead must keep clear
/// of the candidate by the same margin. Vehicles level with the candidate never pass.
pub fn lane_change_clearance<'a>(
    target_lane_occupants: impl IntoIterator<Item = &'a Vehicle>,
    candidate: &Vehicle,
) -> SafetyVerdict {
    let margin = target_lane_occupants
        .into_iter()
        .filter(|occupant| occupant.id() != candidate.id())
        .flat_map(|occupant| {
            [0.0, LANE_CHANGE_DURATION].map(|t| clearance_at(occupant, candidate, t))
        })
        .fold(f64::INFINITY, f64::min);
    SafetyVerdict::from_margin(Invariant::LaneChangeClearance, margin)
}

/// The clearance between `candidate` and `occupant` after `t` seconds.
fn clearance_at(occupant: &Vehicle, candidate: &Vehicle, t: f64) -> f64 {
    let occ_body = occupant.body() + occupant.vel() * t;
    let cand_body = candidate.body() + candidate.vel() * t;

    if occupant.pos_mid() == candidate.pos_mid() {
        return cand_body.clearance_with(&occ_body).min(0.0);
    }

    let (behind, behind_vel, ahead) = if occupant.pos_mid() > candidate.pos_mid() {
        (cand_body, candidate.vel(), occ_body)
    } else {
        (occ_body, occupant.vel(), cand_body)
    };
    let sweep = Interval::new(behind.min, behind.max + reach(behind_vel));
    sweep.clearance_with(&ahead) - SAFETY_MARGIN
}

/// Checks that a priority vehicle at `distance` is close enough to be yielded to.
pub fn yield_visibility_bound(distance_to_priority_vehicle: f64) -> SafetyVerdict {
    let margin = VISIBILITY_RANGE - distance_to_priority_vehicle;
    SafetyVerdict::from_margin(Invariant::YieldVisibilityBound, margin)
}

/// The time until a gap closes if the follower keeps its velocity while the leader
/// accelerates at `leader_acc` (usually braking) until it stops.
/// Returns `None` if the gap never closes.
///
/// # Parameters
/// * `gap` - The current bumper-to-bumper gap in m
/// * `follower_vel` - The follower's velocity in m/s
/// * `leader_vel` - The leader's velocity in m/s
/// * `leader_acc` - The leader's acceleration in m/s^2
pub fn collision_time(gap: f64, follower_vel: f64, leader_vel: f64, leader_acc: f64) -> Option<f64> {
    if gap <= 0.0 {
        return Some(0.0);
    }
    if follower_vel <= 0.0 {
        return None;
    }
    if leader_acc >= 0.0 {
        let closing = follower_vel - leader_vel;
        return (closing > 0.0).then(|| gap / closing);
    }

    // Gap while the leader is still moving: gap + (vl - vf) t + acc t^2 / 2
    let stop_time = leader_vel.max(0.0) / -leader_acc;
    let a = 0.5 * leader_acc;
    let b = leader_vel - follower_vel;
    let discr = b * b - 4.0 * a * gap;
    let root = (-b - discr.sqrt()) / (2.0 * a);
    if root <= stop_time {
        return Some(root);
    }

    // The leader has stopped; the follower covers the rest at constant speed
    let gap_at_stop = gap + b * stop_time + a * stop_time * stop_time;
    Some(stop_time + gap_at_stop / follower_vel)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{Role, VehicleAttributes, VehicleId};
    use assert_approx_eq::assert_approx_eq;

    fn vehicle(id: usize, pos: f64, vel: f64) -> Vehicle {
        Vehicle::new(VehicleId(id), &VehicleAttributes::default(), 0, pos, vel, Role::Normal)
    }

    #[test]
    fn required_gap_switches_at_four_metres_per_second() {
        assert_approx_eq!(required_gap(0.0), 10.3);
        assert_approx_eq!(required_gap(4.0), 10.3);
        assert_approx_eq!(required_gap(20.0), 50.3);
    }

    #[test]
    fn following_distance() {
        let leader = vehicle(0, 100.0, 20.0);
        let close = vehicle(1, 100.0 - 4.5 - 40.0, 20.0);
        let far = vehicle(1, 100.0 - 4.5 - 60.0, 20.0);

        let verdict = safe_following_distance(&leader, &close);
        assert!(!verdict.holds);
        assert_eq!(verdict.violated, Some(Invariant::SafeFollowingDistance));
        assert_approx_eq!(verdict.margin, -10.3);

        let verdict = safe_following_distance(&leader, &far);
        assert!(verdict.holds);
        assert_eq!(verdict.violated, None);
        assert_approx_eq!(verdict.margin, 9.7);
    }

    #[test]
    fn slow_follower_only_needs_min_distance() {
        let leader = vehicle(0, 100.0, 0.0);
        let follower = vehicle(1, 100.0 - 4.5 - 11.0, 2.0);
        assert!(safe_following_distance(&leader, &follower).holds);
    }

    #[test]
    fn reaction_time() {
        assert!(reaction_time_bound(5.0, 5.0).holds);
        assert!(reaction_time_bound(5.0, 5.9).holds);
        assert!(!reaction_time_bound(5.0, 6.0).holds);
        assert_approx_eq!(reaction_time_bound(5.0, 5.4).margin, 0.6);
    }

    #[test]
    fn clearance_in_an_empty_lane() {
        let candidate = vehicle(0, 50.0, 20.0);
        let verdict = lane_change_clearance(std::iter::empty(), &candidate);
        assert!(verdict.holds);
        assert_eq!(verdict.margin, f64::INFINITY);
    }

    #[test]
    fn clearance_ahead_and_behind() {
        let candidate = vehicle(0, 100.0, 20.0);

        // Needs 50 m of road ahead at 20 m/s
        let ahead = vehicle(1, 100.0 + 4.5 + 49.0, 20.0);
        assert!(!lane_change_clearance([&ahead], &candidate).holds);
        let ahead = vehicle(1, 100.0 + 4.5 + 51.0, 20.0);
        assert!(lane_change_clearance([&ahead], &candidate).holds);

        // A slow vehicle ahead is fine now but not by the end of the lane change
        let slow = vehicle(1, 100.0 + 4.5 + 55.0, 10.0);
        let verdict = lane_change_clearance([&slow], &candidate);
        assert!(!verdict.holds);
        assert_approx_eq!(verdict.margin, 55.0 - 5.0 - 50.0 - SAFETY_MARGIN);

        // A vehicle behind needs its own road ahead
        let behind = vehicle(1, 100.0 - 4.5 - 30.0, 10.0);
        assert!(lane_change_clearance([&behind], &candidate).holds);
        let behind = vehicle(1, 100.0 - 4.5 - 30.0, 20.0);
        assert!(!lane_change_clearance([&behind], &candidate).holds);
    }

    #[test]
    fn identical_positions_never_clear() {
        let candidate = vehicle(0, 100.0, 0.0);
        let level = vehicle(1, 100.0, 0.0);
        let verdict = lane_change_clearance([&level], &candidate);
        assert!(!verdict.holds);
    }

    #[test]
    fn ignores_the_candidate_itself() {
        let candidate = vehicle(0, 100.0, 20.0);
        assert!(lane_change_clearance([&candidate], &candidate).holds);
    }

    #[test]
    fn visibility() {
        assert!(yield_visibility_bound(49.9).holds);
        assert!(!yield_visibility_bound(50.0).holds);
        assert!(!yield_visibility_bound(120.0).holds);
    }

    #[test]
    fn collision_times() {
        // Leader stops after 3.33 s having covered 33.3 m
        assert_approx_eq!(collision_time(75.0, 20.0, 20.0, -6.0).unwrap(), 5.416666, 1e-4);
        // Closing while the leader still moves
        assert_approx_eq!(collision_time(10.0, 20.0, 20.0, -6.0).unwrap(), 1.825742, 1e-4);
        // Constant speeds
        assert_approx_eq!(collision_time(30.0, 20.0, 10.0, 0.0).unwrap(), 3.0);
        assert_eq!(collision_time(30.0, 10.0, 20.0, 0.0), None);
        assert_eq!(collision_time(30.0, 0.0, 20.0, -6.0), None);
        assert_eq!(collision_time(-1.0, 0.0, 0.0, 0.0), Some(0.0));
        // Stopped leader
        assert_approx_eq!(collision_time(30.0, 10.0, 0.0, -6.0).unwrap(), 3.0);
    }
}
