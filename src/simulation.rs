use crate::controller::{decide, fallback, ControllerParams, Evaluation};
use crate::history::{FollowingViolation, HistoryEntry, RejectedTrigger, RunHistory};
use crate::safety::{lane_change_clearance, safe_following_distance, SafetyVerdict, SAFETY_MARGIN};
use crate::scenario::{ScenarioMachine, ScenarioState};
use crate::{
    ConfigError, Decision, Kinematics, PlatoonState, ScenarioEvent, SimulationConfig, Trigger,
    TriggerError, TriggerSender, Vehicle, VehicleId,
};
use itertools::Itertools;
use smallvec::SmallVec;

/// Tolerance when comparing the simulation time with the run duration, in s.
const TIME_EPSILON: f64 = 1e-9;

/// A platoon simulation.
#[derive(Debug)]
pub struct Simulation {
    config: SimulationConfig,
    params: ControllerParams,
    kinematics: Kinematics,
    /// The vehicles, indexed by ID.
    vehicles: Vec<Vehicle>,
    /// The number of ticks simulated so far.
    frame: usize,
    scenario: ScenarioMachine,
    history: RunHistory,
}

/// What happened during one tick.
#[derive(Clone, Debug, PartialEq)]
pub struct TickOutcome {
    /// The platoon at the end of the tick.
    pub state: PlatoonState,
    /// The decisions applied during the tick, by vehicle ID.
    pub decisions: Vec<Decision>,
    /// The verdicts the decisions were checked against, by vehicle ID.
    pub verdicts: Vec<SafetyVerdict>,
}

impl Simulation {
    /// Creates a new simulation, ready to run.
    pub fn new(config: SimulationConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        if !config.guarantees_hold() {
            log::warn!(
                "time step {} s differs from {} s, the reaction time guarantees do not apply",
                config.dt,
                crate::config::DEFAULT_DT
            );
        }
        let mut sim = Self {
            params: ControllerParams::new(&config),
            kinematics: Kinematics::new(&config.attributes, config.dt),
            vehicles: config.initial_vehicles(),
            frame: 0,
            scenario: ScenarioMachine::new(config.scenario, config.num_vehicles),
            history: RunHistory::new(config.guarantees_hold()),
            config,
        };
        sim.arm_schedule();
        Ok(sim)
    }

    /// The configuration of the simulation.
    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// The number of ticks simulated so far.
    pub fn frame(&self) -> usize {
        self.frame
    }

    /// The current simulation time in s.
    pub fn time(&self) -> f64 {
        self.frame as f64 * self.config.dt
    }

    /// Whether the run has reached its configured duration.
    pub fn is_finished(&self) -> bool {
        self.time() >= self.config.duration_seconds - TIME_EPSILON
    }

    /// Whether the run uses the time step the formal guarantees are stated for.
    pub fn guarantees_hold(&self) -> bool {
        self.config.guarantees_hold()
    }

    /// A snapshot of the platoon at the current time.
    pub fn platoon_state(&self) -> PlatoonState {
        PlatoonState::new(self.time(), self.frame, self.vehicles.clone())
    }

    /// Gets a reference to the vehicle with the given ID.
    pub fn get_vehicle(&self, vehicle_id: VehicleId) -> Option<&Vehicle> {
        self.vehicles.get(vehicle_id.index())
    }

    /// Returns an iterator over all the vehicles, by ID.
    pub fn iter_vehicles(&self) -> impl Iterator<Item = &Vehicle> {
        self.vehicles.iter()
    }

    /// The scenario events that have fired.
    pub fn events(&self) -> &[ScenarioEvent] {
        self.scenario.events()
    }

    /// The current states of the scenario.
    pub fn scenario_states(&self) -> SmallVec<[ScenarioState; 2]> {
        self.scenario.states()
    }

    /// The record of the run so far.
    pub fn history(&self) -> &RunHistory {
        &self.history
    }

    /// Queues an emergency on `vehicle`, to fire at the first tick at or after `time`.
    pub fn trigger_emergency(&mut self, vehicle: VehicleId, time: f64) -> Result<(), TriggerError> {
        self.request(Trigger::emergency(vehicle, time))
    }

    /// Queues the activation of priority vehicle `vehicle`, to fire at the first tick at or after `time`.
    pub fn activate_priority(&mut self, vehicle: VehicleId, time: f64) -> Result<(), TriggerError> {
        self.request(Trigger::priority(vehicle, time))
    }

    /// Gets a handle for queueing triggers from other threads.
    pub fn trigger_sender(&self) -> TriggerSender {
        self.scenario.sender()
    }

    /// Returns the simulation to the state it was created in, clearing all events.
    pub fn reset(&mut self) {
        self.vehicles = self.config.initial_vehicles();
        self.frame = 0;
        self.scenario.reset();
        self.history = RunHistory::new(self.config.guarantees_hold());
        self.arm_schedule();
        log::info!("simulation reset");
    }

    /// Runs the simulation until its configured duration is reached.
    pub fn run(&mut self) -> &RunHistory {
        while !self.is_finished() {
            self.advance_tick();
        }
        &self.history
    }

    /// Advances the simulation by one time step.
    pub fn advance_tick(&mut self) -> TickOutcome {
        let now = self.time();
        self.apply_due_events(now);

        // Every vehicle decides from the same snapshot
        let before = self.platoon_state();
        let facts = self.scenario.facts();
        let evaluations = self
            .vehicles
            .iter()
            .map(|vehicle| decide(vehicle, &before, &facts, &self.params))
            .collect::<Vec<_>>();
        let evaluations = self.grant_lane_changes(&before, evaluations);

        let mut clamps = vec![];
        let vehicles = self
            .vehicles
            .iter()
            .zip(&evaluations)
            .map(|(vehicle, eval)| {
                let decision = &eval.decision;
                let (mut next, clamp) =
                    self.kinematics
                        .advance(vehicle, decision.acceleration, decision.target_lane, now);
                if let Some(clamp) = clamp {
                    log::warn!(
                        "{}: acceleration {} clamped to {}",
                        clamp.vehicle,
                        clamp.requested,
                        clamp.applied
                    );
                    clamps.push(clamp);
                }
                next.record(decision);
                next
            })
            .collect::<Vec<_>>();
        self.vehicles = vehicles;
        self.frame += 1;

        let state = self.platoon_state();
        let (decisions, verdicts): (Vec<_>, Vec<_>) = evaluations
            .into_iter()
            .map(|eval| (eval.decision, eval.verdict))
            .unzip();
        let violations = following_violations(&state, &decisions);
        let collisions = collisions(&state);
        let degraded = decisions.iter().any(|decision| decision.degraded);

        self.history.push(HistoryEntry {
            frame: self.frame,
            time: state.time(),
            state: state.clone(),
            decisions: decisions.clone(),
            verdicts: verdicts.clone(),
            clamps,
            collisions,
            violations,
            degraded,
        });

        TickOutcome {
            state,
            decisions,
            verdicts,
        }
    }

    fn request(&mut self, trigger: Trigger) -> Result<(), TriggerError> {
        let (result, rejected) = self.scenario.request(trigger);
        self.record_rejected(rejected);
        match &result {
            Ok(()) => log::info!(
                "queued {:?} for {} at {:.2}s",
                trigger.kind,
                trigger.vehicle,
                trigger.time
            ),
            Err(err) => log::debug!("refused {:?} for {}: {}", trigger.kind, trigger.vehicle, err),
        }
        result
    }

    /// Queues the configured schedule.
    fn arm_schedule(&mut self) {
        for trigger in self.config.schedule.clone() {
            if let Err(err) = self.request(trigger) {
                log::warn!("scheduled trigger for {} dropped: {}", trigger.vehicle, err);
            }
        }
    }

    /// Fires the events due at `now` and gives their source vehicles their roles.
    fn apply_due_events(&mut self, now: f64) {
        let (fired, rejected) = self.scenario.apply_due(now);
        self.record_rejected(rejected);
        for event in &fired {
            log::info!("{:?} fired for {} at {:.2}s", event.kind, event.source, now);
            if let Some(vehicle) = self.vehicles.get_mut(event.source.index()) {
                vehicle.set_role(event.kind.role());
            }
        }
        self.history.record_events(&fired);
    }

    fn record_rejected(&mut self, rejected: Vec<RejectedTrigger>) {
        if !rejected.is_empty() {
            self.history.record_rejected(rejected);
        }
    }

    /// Checks the lane change requests again, in vehicle ID order, against the vehicles
    /// already moving into the same lane this tick. Refused requests brake instead.
    fn grant_lane_changes(&self, before: &PlatoonState, evaluations: Vec<Evaluation>) -> Vec<Evaluation> {
        let mut granted: Vec<Vehicle> = vec![];
        evaluations
            .into_iter()
            .map(|eval| {
                let Some(lane) = eval.decision.target_lane else {
                    return eval;
                };
                let Some(vehicle) = self.vehicles.get(eval.decision.vehicle.index()) else {
                    return eval;
                };
                let candidate = vehicle.in_lane(lane);
                let occupants = before
                    .lane(lane)
                    .iter()
                    .chain(granted.iter().filter(|other| other.lane() == lane));
                let verdict = lane_change_clearance(occupants, &candidate);
                if verdict.holds {
                    granted.push(candidate);
                    eval
                } else {
                    fallback(eval.decision, verdict, &self.params)
                }
            })
            .collect()
    }
}

/// Finds every same-lane pair closer than the safe following distance.
fn following_violations(state: &PlatoonState, decisions: &[Decision]) -> Vec<FollowingViolation> {
    let in_maneuver = |vehicle: &Vehicle| {
        vehicle.is_changing_lane(state.time())
            || decisions
                .get(vehicle.id().index())
                .map_or(false, |decision| decision.kind.is_maneuver())
    };
    state
        .follower_pairs()
        .filter_map(|(follower, leader)| {
            let verdict = safe_following_distance(leader, follower);
            (!verdict.holds).then(|| FollowingViolation {
                leader: leader.id(),
                follower: follower.id(),
                margin: verdict.margin,
                transient: in_maneuver(leader) || in_maneuver(follower),
            })
        })
        .inspect(|violation| {
            if !violation.transient {
                log::warn!(
                    "{} is {:.2}m short of the safe distance behind {}",
                    violation.follower,
                    -violation.margin,
                    violation.leader
                );
            }
        })
        .collect()
}

/// Finds every pair of vehicles whose bounding boxes, grown by the safety margin, overlap.
fn collisions(state: &PlatoonState) -> Vec<(VehicleId, VehicleId)> {
    let time = state.time();
    let mut pairs = state
        .iter()
        .tuple_combinations()
        .filter(|(a, b)| {
            let [a_lon, a_lat] = a.footprint(time);
            let [b_lon, b_lat] = b.footprint(time);
            a_lon.inflate(SAFETY_MARGIN).overlaps(&b_lon.inflate(SAFETY_MARGIN))
                && a_lat.inflate(SAFETY_MARGIN).overlaps(&b_lat.inflate(SAFETY_MARGIN))
        })
        .map(|(a, b)| (a.id().min(b.id()), a.id().max(b.id())))
        .collect::<Vec<_>>();
    pairs.sort();
    for (a, b) in &pairs {
        log::warn!("collision between {} and {} at {:.2}s", a, b, time);
    }
    pairs
}
