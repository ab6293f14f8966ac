use super::{DecisionContext, Evaluation};
use crate::safety::{collision_time, reaction_time_bound, required_gap, yield_visibility_bound};
use crate::{ActionKind, Decision, EventKind, Rationale, Role, ScenarioEvent, Vehicle};

/// Yielding vehicles slow down at least this much when they have room, in m/s^2.
const YIELD_ASIDE_DECEL: f64 = -1.0;

/// Yielding vehicles stuck in the priority vehicle's lane slow down at least this much, in m/s^2.
const YIELD_BLOCKED_DECEL: f64 = -3.0;

/// Yielding vehicles stop slowing down below this velocity, in m/s.
const YIELD_MIN_VELOCITY: f64 = 5.0;

/// A priority vehicle is blocked by a slower vehicle closer than this many required gaps.
const BLOCKING_FACTOR: f64 = 1.2;

/// A rule of the controller: when `guard` matches, `action` decides.
pub(super) struct Rule {
    pub name: &'static str,
    pub guard: fn(&DecisionContext) -> bool,
    pub action: fn(&DecisionContext) -> Evaluation,
}

/// The rules in priority order; the first one whose guard matches wins.
pub(super) static RULES: [Rule; 5] = [
    Rule {
        name: "emergency-source",
        guard: is_emergency_source,
        action: emergency_stop,
    },
    Rule {
        name: "emergency-ahead",
        guard: has_emergency_ahead,
        action: respond_to_emergency,
    },
    Rule {
        name: "priority-vehicle",
        guard: is_active_priority,
        action: drive_priority,
    },
    Rule {
        name: "yield-to-priority",
        guard: must_yield,
        action: make_way,
    },
    Rule {
        name: "follow",
        guard: always,
        action: follow,
    },
];

fn always(_: &DecisionContext) -> bool {
    true
}

fn is_emergency_source(ctx: &DecisionContext) -> bool {
    ctx.facts.emergency_for(ctx.vehicle.id()).is_some()
}

/// The vehicle's own emergency: brake as hard as possible for the rest of the run.
fn emergency_stop(ctx: &DecisionContext) -> Evaluation {
    let Some(event) = ctx.facts.emergency_for(ctx.vehicle.id()) else {
        return follow(ctx);
    };
    let responded_at = match ctx.vehicle.rationale() {
        Some(Rationale::EmergencySource { responded_at }) => *responded_at,
        _ => ctx.now,
    };
    Evaluation {
        decision: Decision::new(
            ctx.vehicle.id(),
            ActionKind::EmergencyBrake,
            ctx.params.min_acc(),
            Rationale::EmergencySource { responded_at },
        ),
        verdict: reaction_time_bound(event.time_fired, responded_at),
    }
}

/// An emergency source ahead in the vehicle's lane.
struct EmergencyAhead<'a> {
    source: &'a Vehicle,
    event: &'a ScenarioEvent,
    /// The time until the gap closes if the vehicle doesn't respond, in s.
    collision_time: Option<f64>,
}

fn has_emergency_ahead(ctx: &DecisionContext) -> bool {
    emergency_ahead(ctx).is_some()
}

/// Finds the nearest emergency source ahead in the lane, if the vehicle is on course to hit it.
fn emergency_ahead<'a>(ctx: &DecisionContext<'a>) -> Option<EmergencyAhead<'a>> {
    let vehicle = ctx.vehicle;
    let (source, event) = ctx
        .platoon
        .ahead_of(vehicle)
        .find_map(|other| ctx.facts.emergency_for(other.id()).map(|event| (other, event)))?;
    let collision_time = collision_time(
        vehicle.gap_to(source),
        vehicle.vel(),
        source.vel(),
        ctx.params.min_acc(),
    );
    (collision_time.is_some() || vehicle.has_stopped()).then_some(EmergencyAhead {
        source,
        event,
        collision_time,
    })
}

/// Moves out of the emergency source's lane if there is room, otherwise brakes as hard as possible.
fn respond_to_emergency(ctx: &DecisionContext) -> Evaluation {
    let Some(ahead) = emergency_ahead(ctx) else {
        return follow(ctx);
    };
    let id = ctx.vehicle.id();
    let source = ahead.source.id();

    // The response started at the first tick it was decided on
    let responded_at = ctx
        .vehicle
        .rationale()
        .and_then(Rationale::emergency_response)
        .filter(|(prev_source, _)| *prev_source == source)
        .map_or(ctx.now, |(_, responded_at)| responded_at);
    // Vehicles that moved in behind the source after the event are exposed from then on
    let exposed_at = ctx
        .vehicle
        .lane_entered_at()
        .map_or(ahead.event.time_fired, |entered| entered.max(ahead.event.time_fired));
    let reaction = reaction_time_bound(exposed_at, responded_at);

    if ctx.can_change_lane() {
        for lane in ctx.adjacent_lanes() {
            let clearance = ctx.clearance(lane);
            if !clearance.holds {
                continue;
            }
            let (acc, _) = ctx.follow_in_lane(lane, ctx.params.free_flow_velocity);
            let acc = f64::min(acc, 0.0);
            if acc > ctx.params.min_acc() {
                let decision = Decision::new(
                    id,
                    ActionKind::LaneChange,
                    acc,
                    Rationale::EmergencyLaneChange {
                        source,
                        responded_at,
                    },
                )
                .with_lane(lane);
                let verdict = if reaction.holds { clearance } else { reaction };
                return Evaluation { decision, verdict };
            }
        }
    }

    Evaluation {
        decision: Decision::new(
            id,
            ActionKind::EmergencyBrake,
            ctx.params.min_acc(),
            Rationale::EmergencyBrake {
                source,
                collision_time: ahead.collision_time,
                responded_at,
            },
        ),
        verdict: reaction,
    }
}

fn is_active_priority(ctx: &DecisionContext) -> bool {
    ctx.vehicle.role() == Role::Priority && ctx.facts.priority_for(ctx.vehicle.id()).is_some()
}

/// Whether `leader` holds up the priority vehicle.
fn is_blocking(ctx: &DecisionContext, leader: &Vehicle) -> bool {
    let vehicle = ctx.vehicle;
    vehicle.gap_to(leader) < BLOCKING_FACTOR * required_gap(vehicle.vel())
        && leader.vel() < ctx.params.priority_velocity
}

/// Drives an active priority vehicle at its target velocity, overtaking whatever blocks it.
fn drive_priority(ctx: &DecisionContext) -> Evaluation {
    let id = ctx.vehicle.id();
    let target_vel = ctx.params.priority_velocity;
    let (acc, leader) = ctx.follow(target_vel);

    let Some(blocker) = leader.filter(|leader| is_blocking(ctx, leader)) else {
        return Evaluation {
            decision: Decision::new(id, ActionKind::Follow, acc, Rationale::PriorityCruise),
            verdict: ctx.following_verdict(leader, acc),
        };
    };

    if ctx.can_change_lane() {
        for lane in ctx.adjacent_lanes() {
            let clearance = ctx.clearance(lane);
            if !clearance.holds {
                continue;
            }
            let (lane_acc, lane_leader) = ctx.follow_in_lane(lane, target_vel);
            let unblocked = lane_leader.map_or(true, |leader| !is_blocking(ctx, leader));
            if unblocked && lane_acc > acc {
                let decision = Decision::new(
                    id,
                    ActionKind::LaneChange,
                    lane_acc,
                    Rationale::PriorityOvertake {
                        blocker: blocker.id(),
                    },
                )
                .with_lane(lane);
                return Evaluation {
                    decision,
                    verdict: clearance,
                };
            }
        }
    }

    Evaluation {
        decision: Decision::new(
            id,
            ActionKind::Follow,
            acc,
            Rationale::PriorityBlocked {
                blocker: blocker.id(),
            },
        ),
        verdict: ctx.following_verdict(leader, acc),
    }
}

/// A visible priority vehicle behind or level with this one.
struct PriorityNearby<'a> {
    priority: &'a Vehicle,
    /// How far the priority vehicle is behind, in m.
    distance: f64,
}

fn must_yield(ctx: &DecisionContext) -> bool {
    priority_nearby(ctx).is_some()
}

/// Finds the nearest active priority vehicle behind in the same or an adjacent lane
/// which is close enough to be yielded to.
fn priority_nearby<'a>(ctx: &DecisionContext<'a>) -> Option<PriorityNearby<'a>> {
    let vehicle = ctx.vehicle;
    ctx.facts
        .events()
        .iter()
        .filter(|event| event.kind == EventKind::PriorityActivated && event.source != vehicle.id())
        .filter_map(|event| ctx.platoon.get(event.source))
        .filter(|priority| priority.lane().abs_diff(vehicle.lane()) <= 1)
        .map(|priority| PriorityNearby {
            priority,
            distance: vehicle.pos_mid() - priority.pos_mid(),
        })
        .filter(|nearby| nearby.distance >= 0.0 && yield_visibility_bound(nearby.distance).holds)
        .min_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then(a.priority.id().cmp(&b.priority.id()))
        })
}

/// Yields to a priority vehicle: leaves its lane if possible, otherwise slows down.
fn make_way(ctx: &DecisionContext) -> Evaluation {
    let Some(nearby) = priority_nearby(ctx) else {
        return follow(ctx);
    };
    let id = ctx.vehicle.id();
    let priority = nearby.priority.id();
    let distance = nearby.distance;
    let free_flow = ctx.params.free_flow_velocity;

    // Slowing down stops at the floor velocity
    let slow_down = |acc: f64, decel: f64| {
        if ctx.vehicle.vel() <= YIELD_MIN_VELOCITY {
            f64::min(acc, 0.0)
        } else {
            f64::min(acc, decel)
        }
    };

    let same_lane = nearby.priority.lane() == ctx.vehicle.lane();
    if same_lane && ctx.can_change_lane() {
        for lane in ctx.adjacent_lanes() {
            let clearance = ctx.clearance(lane);
            if clearance.holds {
                let (acc, _) = ctx.follow_in_lane(lane, free_flow);
                let decision = Decision::new(
                    id,
                    ActionKind::Yield,
                    slow_down(acc, YIELD_ASIDE_DECEL),
                    Rationale::YieldLaneChange { priority, distance },
                )
                .with_lane(lane);
                return Evaluation {
                    decision,
                    verdict: clearance,
                };
            }
        }
    }

    let decel = if same_lane {
        YIELD_BLOCKED_DECEL
    } else {
        YIELD_ASIDE_DECEL
    };
    let (acc, leader) = ctx.follow(free_flow);
    let acc = slow_down(acc, decel);
    Evaluation {
        decision: Decision::new(
            id,
            ActionKind::Yield,
            acc,
            Rationale::YieldSlowdown { priority, distance },
        ),
        verdict: ctx.following_verdict(leader, acc),
    }
}

/// Follows the vehicle ahead at the safe time gap, or cruises at the free flow velocity.
pub(super) fn follow(ctx: &DecisionContext) -> Evaluation {
    let (acc, leader) = ctx.follow(ctx.params.free_flow_velocity);
    let rationale = match leader {
        Some(leader) => Rationale::FollowLeader {
            leader: leader.id(),
            gap: ctx.vehicle.gap_to(leader),
        },
        None => Rationale::FreeFlow,
    };
    Evaluation {
        decision: Decision::new(ctx.vehicle.id(), ActionKind::Follow, acc, rationale),
        verdict: ctx.following_verdict(leader, acc),
    }
}
