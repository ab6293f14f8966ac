//! Scenario events and the queue that feeds them into the simulation.
//!
//! Triggers never take effect immediately. They are queued in arrival order and
//! fire at the first tick boundary whose time has reached the requested time, so a
//! tick always sees the same set of events from start to end.

use crate::history::RejectedTrigger;
use crate::{Role, Scenario, TriggerError, VehicleId};
use crossbeam_channel::{unbounded, Receiver, Sender};
use smallvec::SmallVec;
use std::collections::VecDeque;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Tolerance when comparing a trigger time with the tick time, in s.
const TIME_EPSILON: f64 = 1e-9;

/// The kind of a scenario event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum EventKind {
    EmergencyTriggered,
    PriorityActivated,
}

impl EventKind {
    /// The role the source vehicle takes once the event fires.
    pub fn role(self) -> Role {
        match self {
            EventKind::EmergencyTriggered => Role::EmergencySource,
            EventKind::PriorityActivated => Role::Priority,
        }
    }
}

/// An event that has fired. Events stay active until the simulation is reset.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ScenarioEvent {
    pub kind: EventKind,
    pub source: VehicleId,
    /// The tick time at which the event fired, in s.
    pub time_fired: f64,
}

/// A request for an event to fire at or after `time`.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Trigger {
    pub kind: EventKind,
    pub vehicle: VehicleId,
    /// The requested time in s.
    pub time: f64,
}

impl Trigger {
    pub fn emergency(vehicle: VehicleId, time: f64) -> Self {
        Self {
            kind: EventKind::EmergencyTriggered,
            vehicle,
            time,
        }
    }

    pub fn priority(vehicle: VehicleId, time: f64) -> Self {
        Self {
            kind: EventKind::PriorityActivated,
            vehicle,
            time,
        }
    }
}

/// The state of the scenario.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ScenarioState {
    Basic,
    EmergencyArmed,
    EmergencyActive,
    PriorityArmed,
    PriorityActive,
}

/// The events active during a tick, handed to the controller.
#[derive(Clone, Copy, Debug)]
pub struct ScenarioFacts<'a> {
    events: &'a [ScenarioEvent],
}

impl<'a> ScenarioFacts<'a> {
    pub fn new(events: &'a [ScenarioEvent]) -> Self {
        Self { events }
    }

    /// A set of facts with no active events.
    pub fn none() -> Self {
        Self { events: &[] }
    }

    pub fn events(&self) -> &'a [ScenarioEvent] {
        self.events
    }

    /// The active event of the given kind whose source is `vehicle`.
    pub fn event_for(&self, vehicle: VehicleId, kind: EventKind) -> Option<&'a ScenarioEvent> {
        self.events
            .iter()
            .find(|event| event.source == vehicle && event.kind == kind)
    }

    pub fn emergency_for(&self, vehicle: VehicleId) -> Option<&'a ScenarioEvent> {
        self.event_for(vehicle, EventKind::EmergencyTriggered)
    }

    pub fn priority_for(&self, vehicle: VehicleId) -> Option<&'a ScenarioEvent> {
        self.event_for(vehicle, EventKind::PriorityActivated)
    }
}

/// Sends triggers to a simulation from another thread.
///
/// The vehicle ID is checked when sending; everything else is checked when the
/// simulation drains its queue at the next tick, where rejections are logged and
/// recorded in the run history.
#[derive(Clone, Debug)]
pub struct TriggerSender {
    tx: Sender<Trigger>,
    num_vehicles: usize,
}

impl TriggerSender {
    pub fn trigger_emergency(&self, vehicle: VehicleId, time: f64) -> Result<(), TriggerError> {
        self.send(Trigger::emergency(vehicle, time))
    }

    pub fn activate_priority(&self, vehicle: VehicleId, time: f64) -> Result<(), TriggerError> {
        self.send(Trigger::priority(vehicle, time))
    }

    pub fn send(&self, trigger: Trigger) -> Result<(), TriggerError> {
        if trigger.vehicle.index() >= self.num_vehicles {
            return Err(TriggerError::InvalidVehicleId {
                vehicle: trigger.vehicle,
                count: self.num_vehicles,
            });
        }
        self.tx.send(trigger).map_err(|_| TriggerError::Disconnected)
    }
}

/// Tracks which events are armed and which have fired.
#[derive(Debug)]
pub(crate) struct ScenarioMachine {
    scenario: Scenario,
    num_vehicles: usize,
    tx: Sender<Trigger>,
    rx: Receiver<Trigger>,
    /// Accepted triggers which have not fired yet, in arrival order.
    pending: VecDeque<Trigger>,
    /// Fired events, in firing order.
    events: Vec<ScenarioEvent>,
}

impl ScenarioMachine {
    pub fn new(scenario: Scenario, num_vehicles: usize) -> Self {
        let (tx, rx) = unbounded();
        Self {
            scenario,
            num_vehicles,
            tx,
            rx,
            pending: VecDeque::new(),
            events: vec![],
        }
    }

    pub fn sender(&self) -> TriggerSender {
        TriggerSender {
            tx: self.tx.clone(),
            num_vehicles: self.num_vehicles,
        }
    }

    pub fn events(&self) -> &[ScenarioEvent] {
        &self.events
    }

    pub fn facts(&self) -> ScenarioFacts<'_> {
        ScenarioFacts::new(&self.events)
    }

    pub fn pending(&self) -> impl Iterator<Item = &Trigger> {
        self.pending.iter()
    }

    /// Validates a trigger and queues it behind everything received so far.
    /// Returns the triggers from other threads that were rejected on the way.
    pub fn request(&mut self, trigger: Trigger) -> (Result<(), TriggerError>, Vec<RejectedTrigger>) {
        let rejected = self.collect();
        let result = self.validate(&trigger).map(|()| self.pending.push_back(trigger));
        (result, rejected)
    }

    /// Fires every queued trigger that is due at `now`.
    ///
    /// Returns the newly fired events, and the triggers from other threads that were rejected.
    pub fn apply_due(&mut self, now: f64) -> (Vec<ScenarioEvent>, Vec<RejectedTrigger>) {
        let rejected = self.collect();

        let (due, waiting): (VecDeque<_>, VecDeque<_>) = self
            .pending
            .drain(..)
            .partition(|trigger| trigger.time <= now + TIME_EPSILON);
        self.pending = waiting;

        let fired = due
            .into_iter()
            .map(|trigger| ScenarioEvent {
                kind: trigger.kind,
                source: trigger.vehicle,
                time_fired: now,
            })
            .collect::<Vec<_>>();
        self.events.extend(fired.iter().copied());
        (fired, rejected)
    }

    /// The current states; [ScenarioState::Basic] when nothing is armed or active.
    pub fn states(&self) -> SmallVec<[ScenarioState; 2]> {
        let mut states = SmallVec::new();
        for (kind, armed, active) in [
            (
                EventKind::EmergencyTriggered,
                ScenarioState::EmergencyArmed,
                ScenarioState::EmergencyActive,
            ),
            (
                EventKind::PriorityActivated,
                ScenarioState::PriorityArmed,
                ScenarioState::PriorityActive,
            ),
        ] {
            if self.events.iter().any(|event| event.kind == kind) {
                states.push(active);
            } else if self.pending.iter().any(|trigger| trigger.kind == kind) {
                states.push(armed);
            }
        }
        if states.is_empty() {
            states.push(ScenarioState::Basic);
        }
        states
    }

    /// Forgets all events and queued triggers, including ones still in flight from other threads.
    pub fn reset(&mut self) {
        self.rx.try_iter().for_each(drop);
        self.pending.clear();
        self.events.clear();
    }

    /// Moves triggers sent from other threads into the queue.
    fn collect(&mut self) -> Vec<RejectedTrigger> {
        let mut rejected = vec![];
        while let Ok(trigger) = self.rx.try_recv() {
            match self.validate(&trigger) {
                Ok(()) => self.pending.push_back(trigger),
                Err(error) => {
                    log::warn!("rejected {:?} trigger for {}: {}", trigger.kind, trigger.vehicle, error);
                    rejected.push(RejectedTrigger { trigger, error });
                }
            }
        }
        rejected
    }

    fn validate(&self, trigger: &Trigger) -> Result<(), TriggerError> {
        if !trigger.time.is_finite() {
            return Err(TriggerError::InvalidTime { time: trigger.time });
        }
        if trigger.vehicle.index() >= self.num_vehicles {
            return Err(TriggerError::InvalidVehicleId {
                vehicle: trigger.vehicle,
                count: self.num_vehicles,
            });
        }
        if self.scenario == Scenario::Basic {
            return Err(TriggerError::ScenarioDisabled {
                kind: trigger.kind,
                scenario: self.scenario,
            });
        }
        let existing = self
            .events
            .iter()
            .find(|event| event.source == trigger.vehicle)
            .map(|event| event.kind)
            .or_else(|| {
                self.pending
                    .iter()
                    .find(|pending| pending.vehicle == trigger.vehicle)
                    .map(|pending| pending.kind)
            });
        match existing {
            Some(existing) => Err(TriggerError::AlreadyTriggered {
                vehicle: trigger.vehicle,
                existing,
            }),
            None => Ok(()),
        }
    }
}
