use crate::safety::SafetyVerdict;
use crate::{AccelerationClamp, Decision, PlatoonState, ScenarioEvent, Trigger, TriggerError, VehicleId};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A same-lane pair of vehicles closer than the safe following distance after a tick.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FollowingViolation {
    pub leader: VehicleId,
    pub follower: VehicleId,
    /// How far the gap is from the required gap, a negative number in m.
    pub margin: f64,
    /// Set when either vehicle is in the middle of a lane change or emergency brake.
    pub transient: bool,
}

/// A trigger sent from another thread which was rejected when the queue was drained.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RejectedTrigger {
    pub trigger: Trigger,
    pub error: TriggerError,
}

/// The record of one tick.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HistoryEntry {
    /// The frame index after the tick.
    pub frame: usize,
    /// The simulation time after the tick, in s.
    pub time: f64,
    /// The platoon at the end of the tick.
    pub state: PlatoonState,
    /// The decisions applied during the tick, by vehicle ID.
    pub decisions: Vec<Decision>,
    /// The verdicts the decisions were checked against, by vehicle ID.
    pub verdicts: Vec<SafetyVerdict>,
    /// Accelerations that had to be clamped before they were applied.
    pub clamps: Vec<AccelerationClamp>,
    /// Pairs of vehicles whose bounding boxes overlapped at the end of the tick.
    pub collisions: Vec<(VehicleId, VehicleId)>,
    pub violations: Vec<FollowingViolation>,
    /// Set when any vehicle had no safe action and braked as hard as it could.
    pub degraded: bool,
}

/// The append-only record of a run.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RunHistory {
    entries: Vec<HistoryEntry>,
    events: Vec<ScenarioEvent>,
    rejected: Vec<RejectedTrigger>,
    /// Whether the run used the time step the formal guarantees are stated for.
    formal_guarantees: bool,
}

/// A summary of the safety record of a run.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SafetyStats {
    pub ticks: usize,
    /// The number of colliding pairs, summed over all ticks.
    pub collisions: usize,
    /// The number of ticks on which any vehicle responded to an emergency.
    pub emergency_ticks: usize,
    pub degraded_decisions: usize,
    /// Following violations outside of a maneuver.
    pub following_violations: usize,
    /// Following violations during a maneuver.
    pub transient_violations: usize,
    pub clamps: usize,
    /// The smallest following distance margin seen, in m; infinite if no vehicles shared a lane.
    pub min_following_margin: f64,
    /// 100 for a run without collisions, 20 less for every collision.
    pub safety_percentage: f64,
}

impl RunHistory {
    pub(crate) fn new(formal_guarantees: bool) -> Self {
        Self {
            formal_guarantees,
            ..Default::default()
        }
    }

    /// The entries, one per tick.
    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    /// The last entry.
    pub fn last(&self) -> Option<&HistoryEntry> {
        self.entries.last()
    }

    /// The scenario events that fired, in firing order.
    pub fn events(&self) -> &[ScenarioEvent] {
        &self.events
    }

    /// Triggers from other threads which were rejected.
    pub fn rejected(&self) -> &[RejectedTrigger] {
        &self.rejected
    }

    /// Whether the run used the time step the formal guarantees are stated for.
    pub fn formal_guarantees(&self) -> bool {
        self.formal_guarantees
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn push(&mut self, entry: HistoryEntry) {
        self.entries.push(entry);
    }

    pub(crate) fn record_events(&mut self, events: &[ScenarioEvent]) {
        self.events.extend_from_slice(events);
    }

    pub(crate) fn record_rejected(&mut self, rejected: Vec<RejectedTrigger>) {
        self.rejected.extend(rejected);
    }

    /// Summarises the safety record of the run.
    pub fn stats(&self) -> SafetyStats {
        let mut stats = SafetyStats {
            ticks: self.entries.len(),
            collisions: 0,
            emergency_ticks: 0,
            degraded_decisions: 0,
            following_violations: 0,
            transient_violations: 0,
            clamps: 0,
            min_following_margin: f64::INFINITY,
            safety_percentage: 100.0,
        };
        for entry in &self.entries {
            stats.collisions += entry.collisions.len();
            stats.clamps += entry.clamps.len();
            if entry.decisions.iter().any(Decision::is_emergency) {
                stats.emergency_ticks += 1;
            }
            stats.degraded_decisions += entry.decisions.iter().filter(|d| d.degraded).count();
            for violation in &entry.violations {
                if violation.transient {
                    stats.transient_violations += 1;
                } else {
                    stats.following_violations += 1;
                }
            }
            let margin = entry
                .state
                .follower_pairs()
                .map(|(follower, leader)| crate::safety::safe_following_distance(leader, follower).margin)
                .fold(f64::INFINITY, f64::min);
            stats.min_following_margin = stats.min_following_margin.min(margin);
        }
        stats.safety_percentage = f64::max(0.0, 100.0 - 20.0 * stats.collisions as f64);
        stats
    }

    /// Serialises the history to JSON.
    #[cfg(feature = "serde")]
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
