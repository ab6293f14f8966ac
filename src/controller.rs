//! The rule-based decision controller.
//!
//! Each tick every vehicle is handed the same read-only [PlatoonState] and the
//! scenario facts, and picks exactly one action from an ordered table of rules.
//! The first rule whose guard matches produces the action; its safety verdict is
//! then checked, and an action that fails its check is replaced by maximum braking.

use crate::safety::{safe_following_distance, Invariant, SafetyVerdict};
use crate::vehicle::{AccelerationModel, ModelParams};
use crate::{
    ActionKind, Decision, Kinematics, PlatoonState, Rationale, ScenarioFacts, SimulationConfig,
    Vehicle, VehicleAttributes,
};
use arrayvec::ArrayVec;

mod rules;

/// The parameters shared by every decision of a simulation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ControllerParams {
    /// The time step in s.
    pub dt: f64,
    /// The number of lanes on the road.
    pub num_lanes: usize,
    pub attributes: VehicleAttributes,
    /// The velocity vehicles cruise at with nothing ahead, in m/s.
    pub free_flow_velocity: f64,
    /// The velocity an active priority vehicle aims for, in m/s.
    pub priority_velocity: f64,
}

impl ControllerParams {
    pub fn new(config: &SimulationConfig) -> Self {
        Self {
            dt: config.dt,
            num_lanes: config.num_lanes,
            attributes: config.attributes,
            free_flow_velocity: config.free_flow_velocity,
            priority_velocity: config.priority_velocity,
        }
    }

    /// The maximum deceleration, a negative number in m/s^2.
    pub fn min_acc(&self) -> f64 {
        self.attributes.min_acc
    }
}

/// A decision together with the verdict of the safety check it was held against.
#[derive(Clone, Debug, PartialEq)]
pub struct Evaluation {
    pub decision: Decision,
    pub verdict: SafetyVerdict,
}

/// Decides what `vehicle` does during the tick starting at `platoon.time()`.
///
/// Always returns a decision: when the chosen action fails its safety check,
/// the vehicle brakes as hard as it can instead and the decision is marked degraded.
pub fn decide(
    vehicle: &Vehicle,
    platoon: &PlatoonState,
    facts: &ScenarioFacts,
    params: &ControllerParams,
) -> Evaluation {
    let ctx = DecisionContext {
        vehicle,
        platoon,
        facts,
        params,
        now: platoon.time(),
    };

    let evaluation = rules::RULES
        .iter()
        .find(|rule| (rule.guard)(&ctx))
        .map(|rule| {
            log::trace!("{}: rule '{}' matched", vehicle.id(), rule.name);
            (rule.action)(&ctx)
        })
        .unwrap_or_else(|| rules::follow(&ctx));

    let evaluation = if evaluation.verdict.holds {
        evaluation
    } else {
        fallback(evaluation.decision, evaluation.verdict, params)
    };

    log::debug!(
        "{} at {:.1}s: {:?} {:.2} m/s^2 ({})",
        vehicle.id(),
        ctx.now,
        evaluation.decision.kind,
        evaluation.decision.acceleration,
        evaluation.decision.rationale
    );
    evaluation
}

/// Replaces a decision that failed `verdict` with maximum braking.
pub(crate) fn fallback(rejected: Decision, verdict: SafetyVerdict, params: &ControllerParams) -> Evaluation {
    log::warn!(
        "{}: {:?} rejected ({:?} margin {:.2}), braking",
        rejected.vehicle,
        rejected.kind,
        verdict.checked,
        verdict.margin
    );
    let rationale = Rationale::SafetyFallback {
        rejected: rejected.kind,
        violated: verdict.violated.unwrap_or(verdict.checked),
        emergency: rejected.rationale.emergency_response(),
    };
    let mut decision = Decision::new(
        rejected.vehicle,
        ActionKind::EmergencyBrake,
        params.min_acc(),
        rationale,
    );
    decision.degraded = true;
    Evaluation { decision, verdict }
}

/// Everything a rule may look at.
struct DecisionContext<'a> {
    vehicle: &'a Vehicle,
    platoon: &'a PlatoonState,
    facts: &'a ScenarioFacts<'a>,
    params: &'a ControllerParams,
    /// The time at the start of the tick, in s.
    now: f64,
}

impl<'a> DecisionContext<'a> {
    fn model(&self) -> AccelerationModel {
        AccelerationModel::new(&ModelParams {
            max_acceleration: self.params.attributes.max_acc,
            min_acceleration: self.params.attributes.min_acc,
            dt: self.params.dt,
        })
    }

    /// The car following acceleration the vehicle would have in `lane`, aiming for
    /// `target_vel`, and the vehicle it would follow there.
    fn follow_in_lane(&self, lane: usize, target_vel: f64) -> (f64, Option<&'a Vehicle>) {
        let vehicle = self.vehicle;
        let mut model = self.model();
        model.apply_free_flow(vehicle.vel(), target_vel);
        let leader = self.platoon.leader_in_lane(lane, vehicle);
        if let Some(leader) = leader {
            model.follow_vehicle(vehicle.gap_to(leader), vehicle.vel(), leader.vel());
        }
        (model.acc(), leader)
    }

    /// The car following acceleration in the vehicle's own lane.
    fn follow(&self, target_vel: f64) -> (f64, Option<&'a Vehicle>) {
        self.follow_in_lane(self.vehicle.lane(), target_vel)
    }

    /// Checks that after one step at `acc` the vehicle still keeps the required gap
    /// to `leader`, which is projected at its current velocity.
    fn following_verdict(&self, leader: Option<&Vehicle>, acc: f64) -> SafetyVerdict {
        match leader {
            Some(leader) => {
                let kinematics = Kinematics::new(&self.params.attributes, self.params.dt);
                let (leader_next, _) = kinematics.advance(leader, 0.0, None, self.now);
                let (next, _) = kinematics.advance(self.vehicle, acc, None, self.now);
                safe_following_distance(&leader_next, &next)
            }
            None => SafetyVerdict::vacuous(Invariant::SafeFollowingDistance),
        }
    }

    /// The lanes next to the vehicle's own, highest index first.
    fn adjacent_lanes(&self) -> ArrayVec<usize, 2> {
        let lane = self.vehicle.lane();
        let mut lanes = ArrayVec::new();
        if lane + 1 < self.params.num_lanes {
            lanes.push(lane + 1);
        }
        if lane > 0 {
            lanes.push(lane - 1);
        }
        lanes
    }

    /// Whether the vehicle may start a lane change this tick.
    fn can_change_lane(&self) -> bool {
        !self.vehicle.is_changing_lane(self.now)
    }

    /// Checks that the vehicle can move into `lane`.
    fn clearance(&self, lane: usize) -> SafetyVerdict {
        let candidate = self.vehicle.in_lane(lane);
        crate::safety::lane_change_clearance(self.platoon.lane_occupants(lane), &candidate)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::safety::Invariant;
    use crate::{EventKind, Role, Scenario, ScenarioEvent, VehicleId};
    use assert_approx_eq::assert_approx_eq;

    fn vehicle(id: usize, lane: usize, pos: f64, vel: f64) -> Vehicle {
        Vehicle::new(VehicleId(id), &Default::default(), lane, pos, vel, Role::Normal)
    }

    fn priority(id: usize, lane: usize, pos: f64, vel: f64) -> Vehicle {
        Vehicle::new(VehicleId(id), &Default::default(), lane, pos, vel, Role::Priority)
    }

    fn params(lanes: usize) -> ControllerParams {
        ControllerParams::new(&SimulationConfig::new(4, Scenario::Basic).with_lanes(lanes))
    }

    fn event(kind: EventKind, source: usize, time_fired: f64) -> ScenarioEvent {
        ScenarioEvent {
            kind,
            source: VehicleId(source),
            time_fired,
        }
    }

    /// Decides for vehicle `id` at time `now`.
    fn decide_for(
        id: usize,
        vehicles: Vec<Vehicle>,
        events: &[ScenarioEvent],
        lanes: usize,
        now: f64,
    ) -> Evaluation {
        let state = PlatoonState::new(now, 0, vehicles);
        let facts = ScenarioFacts::new(events);
        let vehicle = state.get(VehicleId(id)).unwrap();
        decide(vehicle, &state, &facts, &params(lanes))
    }

    #[test]
    fn free_flow() {
        let eval = decide_for(0, vec![vehicle(0, 0, 0.0, 20.0)], &[], 1, 0.0);
        assert_eq!(eval.decision.kind, ActionKind::Follow);
        assert_eq!(eval.decision.rationale, Rationale::FreeFlow);
        assert_approx_eq!(eval.decision.acceleration, 0.0);
        assert!(eval.verdict.holds);
        assert_eq!(eval.verdict.margin, f64::INFINITY);
    }

    #[test]
    fn follows_the_leader() {
        let vehicles = vec![vehicle(0, 0, 100.0, 20.0), vehicle(1, 0, 20.5, 20.0)];
        let eval = decide_for(1, vehicles, &[], 1, 0.0);
        assert_eq!(eval.decision.kind, ActionKind::Follow);
        assert!(matches!(
            eval.decision.rationale,
            Rationale::FollowLeader { leader: VehicleId(0), gap } if (gap - 75.0).abs() < 1e-9
        ));
        assert!(eval.verdict.holds);
        assert_eq!(eval.verdict.checked, Invariant::SafeFollowingDistance);
    }

    #[test]
    fn too_close_falls_back_to_braking() {
        let vehicles = vec![vehicle(0, 0, 100.0, 20.0), vehicle(1, 0, 75.5, 20.0)];
        let eval = decide_for(1, vehicles, &[], 1, 0.0);
        assert_eq!(eval.decision.kind, ActionKind::EmergencyBrake);
        assert_eq!(eval.decision.acceleration, -6.0);
        assert!(eval.decision.degraded);
        assert!(!eval.verdict.holds);
        assert_eq!(
            eval.decision.rationale,
            Rationale::SafetyFallback {
                rejected: ActionKind::Follow,
                violated: Invariant::SafeFollowingDistance,
                emergency: None,
            }
        );
    }

    #[test]
    fn emergency_source_brakes() {
        let events = [event(EventKind::EmergencyTriggered, 0, 5.0)];
        let eval = decide_for(0, vec![vehicle(0, 0, 100.0, 20.0)], &events, 1, 5.0);
        assert_eq!(eval.decision.kind, ActionKind::EmergencyBrake);
        assert_eq!(eval.decision.acceleration, -6.0);
        assert!(!eval.decision.degraded);
        assert_eq!(eval.verdict.checked, Invariant::ReactionTimeBound);
        assert_approx_eq!(eval.verdict.margin, 1.0);
    }

    #[test]
    fn brakes_for_an_emergency_ahead() {
        let events = [event(EventKind::EmergencyTriggered, 0, 5.0)];
        let vehicles = vec![
            vehicle(0, 0, 200.0, 20.0),
            vehicle(1, 0, 120.5, 20.0),
            vehicle(2, 0, 41.0, 20.0),
        ];
        let eval = decide_for(1, vehicles.clone(), &events, 1, 5.0);
        assert_eq!(eval.decision.kind, ActionKind::EmergencyBrake);
        assert!(eval.verdict.holds);
        match eval.decision.rationale {
            Rationale::EmergencyBrake {
                source,
                collision_time,
                responded_at,
            } => {
                assert_eq!(source, VehicleId(0));
                assert_approx_eq!(collision_time.unwrap(), 5.416666, 1e-4);
                assert_eq!(responded_at, 5.0);
            }
            other => panic!("unexpected rationale {:?}", other),
        }

        // Vehicles further back respond to the nearest source too
        let eval = decide_for(2, vehicles, &events, 1, 5.0);
        assert_eq!(eval.decision.kind, ActionKind::EmergencyBrake);
    }

    #[test]
    fn response_time_is_carried_forward() {
        let events = [event(EventKind::EmergencyTriggered, 0, 5.0)];
        let mut follower = vehicle(1, 0, 120.5, 20.0);
        follower.record(&Decision::new(
            VehicleId(1),
            ActionKind::EmergencyBrake,
            -6.0,
            Rationale::EmergencyBrake {
                source: VehicleId(0),
                collision_time: None,
                responded_at: 5.0,
            },
        ));
        let eval = decide_for(1, vec![vehicle(0, 0, 200.0, 0.0), follower], &events, 1, 9.0);
        assert_eq!(eval.decision.rationale.emergency_response(), Some((VehicleId(0), 5.0)));
        assert!(eval.verdict.holds);
    }

    #[test]
    fn changes_lane_away_from_an_emergency() {
        let events = [event(EventKind::EmergencyTriggered, 0, 5.0)];
        let vehicles = vec![vehicle(0, 1, 200.0, 20.0), vehicle(1, 1, 120.5, 20.0)];
        let eval = decide_for(1, vehicles, &events, 3, 5.0);
        assert_eq!(eval.decision.kind, ActionKind::LaneChange);
        assert_eq!(eval.decision.target_lane, Some(2));
        assert_approx_eq!(eval.decision.acceleration, 0.0);
        assert_eq!(eval.verdict.checked, Invariant::LaneChangeClearance);
        assert!(matches!(
            eval.decision.rationale,
            Rationale::EmergencyLaneChange { source: VehicleId(0), .. }
        ));
    }

    #[test]
    fn brakes_when_no_lane_is_clear() {
        let events = [event(EventKind::EmergencyTriggered, 0, 5.0)];
        let mut vehicles = vec![
            vehicle(0, 1, 200.0, 20.0),
            vehicle(1, 1, 120.5, 20.0),
            vehicle(2, 2, 120.5, 20.0),
        ];
        let eval = decide_for(1, vehicles.clone(), &events, 3, 5.0);
        assert_eq!(eval.decision.target_lane, Some(0));

        vehicles.push(vehicle(3, 0, 120.5, 20.0));
        let eval = decide_for(1, vehicles, &events, 3, 5.0);
        assert_eq!(eval.decision.kind, ActionKind::EmergencyBrake);
        assert_eq!(eval.decision.target_lane, None);
        assert!(!eval.decision.degraded);
    }

    #[test]
    fn priority_vehicle_overtakes() {
        let events = [event(EventKind::PriorityActivated, 1, 2.0)];
        let vehicles = vec![vehicle(0, 1, 144.5, 15.0), priority(1, 1, 100.0, 20.0)];
        let eval = decide_for(1, vehicles, &events, 3, 2.0);
        assert_eq!(eval.decision.kind, ActionKind::LaneChange);
        assert_eq!(eval.decision.target_lane, Some(2));
        assert_approx_eq!(eval.decision.acceleration, 2.0);
        assert_eq!(
            eval.decision.rationale,
            Rationale::PriorityOvertake {
                blocker: VehicleId(0)
            }
        );
    }

    #[test]
    fn priority_vehicle_cruises() {
        let events = [event(EventKind::PriorityActivated, 1, 2.0)];
        let eval = decide_for(1, vec![priority(1, 1, 100.0, 20.0)], &events, 3, 2.0);
        assert_eq!(eval.decision.kind, ActionKind::Follow);
        assert_eq!(eval.decision.rationale, Rationale::PriorityCruise);
        assert_approx_eq!(eval.decision.acceleration, 2.0);

        // Without its event a priority vehicle is an ordinary vehicle
        let eval = decide_for(1, vec![priority(1, 1, 100.0, 20.0)], &[], 3, 2.0);
        assert_eq!(eval.decision.rationale, Rationale::FreeFlow);
    }

    #[test]
    fn yields_in_a_single_lane() {
        let events = [event(EventKind::PriorityActivated, 1, 2.0)];
        let vehicles = vec![vehicle(0, 0, 100.0, 20.0), priority(1, 0, 60.0, 20.0)];
        let eval = decide_for(0, vehicles, &events, 1, 2.0);
        assert_eq!(eval.decision.kind, ActionKind::Yield);
        assert_eq!(eval.decision.target_lane, None);
        assert_approx_eq!(eval.decision.acceleration, -3.0);
        assert_eq!(
            eval.decision.rationale,
            Rationale::YieldSlowdown {
                priority: VehicleId(1),
                distance: 40.0
            }
        );
    }

    #[test]
    fn yields_by_changing_lane() {
        let events = [event(EventKind::PriorityActivated, 1, 2.0)];
        let vehicles = vec![vehicle(0, 1, 100.0, 20.0), priority(1, 1, 60.0, 20.0)];
        let eval = decide_for(0, vehicles, &events, 3, 2.0);
        assert_eq!(eval.decision.kind, ActionKind::Yield);
        assert_eq!(eval.decision.target_lane, Some(2));
        assert_approx_eq!(eval.decision.acceleration, -1.0);
        assert_eq!(eval.verdict.checked, Invariant::LaneChangeClearance);
    }

    #[test]
    fn yields_to_an_adjacent_lane() {
        let events = [event(EventKind::PriorityActivated, 1, 2.0)];
        let vehicles = vec![vehicle(0, 2, 100.0, 20.0), priority(1, 1, 60.0, 20.0)];
        let eval = decide_for(0, vehicles, &events, 3, 2.0);
        assert_eq!(eval.decision.kind, ActionKind::Yield);
        assert_eq!(eval.decision.target_lane, None);
        assert_approx_eq!(eval.decision.acceleration, -1.0);
    }

    #[test]
    fn slow_vehicles_stop_slowing_down() {
        let events = [event(EventKind::PriorityActivated, 1, 2.0)];
        let vehicles = vec![vehicle(0, 0, 100.0, 4.0), priority(1, 0, 60.0, 20.0)];
        let eval = decide_for(0, vehicles, &events, 1, 2.0);
        assert_eq!(eval.decision.kind, ActionKind::Yield);
        assert_approx_eq!(eval.decision.acceleration, 0.0);
    }

    #[test]
    fn only_visible_priority_vehicles_behind_are_yielded_to() {
        let events = [event(EventKind::PriorityActivated, 1, 2.0)];

        let far = vec![vehicle(0, 0, 100.0, 20.0), priority(1, 0, 50.0, 20.0)];
        let eval = decide_for(0, far, &events, 1, 2.0);
        assert_eq!(eval.decision.kind, ActionKind::Follow);

        let ahead = vec![vehicle(0, 0, 100.0, 20.0), priority(1, 0, 200.0, 20.0)];
        let eval = decide_for(0, ahead, &events, 1, 2.0);
        assert_eq!(eval.decision.kind, ActionKind::Follow);

        let two_lanes_away = vec![vehicle(0, 0, 100.0, 20.0), priority(1, 2, 60.0, 20.0)];
        let eval = decide_for(0, two_lanes_away, &events, 3, 2.0);
        assert_eq!(eval.decision.kind, ActionKind::Follow);
    }

    #[test]
    fn inactive_priority_vehicles_are_ignored() {
        let state = PlatoonState::new(
            1.0,
            10,
            vec![vehicle(0, 0, 100.0, 20.0), priority(1, 0, 70.0, 20.0)],
        );
        let vehicle = state.get(VehicleId(0)).unwrap();
        let eval = decide(vehicle, &state, &ScenarioFacts::none(), &params(1));
        assert_eq!(eval.decision.kind, ActionKind::Follow);
        assert_eq!(eval.decision.rationale, Rationale::FreeFlow);
    }

    #[test]
    fn emergencies_take_precedence() {
        let events = [
            event(EventKind::EmergencyTriggered, 0, 2.0),
            event(EventKind::PriorityActivated, 2, 2.0),
        ];
        let vehicles = vec![
            vehicle(0, 0, 200.0, 20.0),
            vehicle(1, 0, 120.5, 20.0),
            priority(2, 0, 90.0, 20.0),
        ];
        let eval = decide_for(1, vehicles.clone(), &events, 1, 2.0);
        assert_eq!(eval.decision.kind, ActionKind::EmergencyBrake);
        let eval = decide_for(2, vehicles, &events, 1, 2.0);
        assert_eq!(eval.decision.kind, ActionKind::EmergencyBrake);
    }
}
