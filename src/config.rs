use crate::safety::SAFE_TIME_GAP;
use crate::scenario::ScenarioMachine;
use crate::{ConfigError, Role, Trigger, Vehicle, VehicleAttributes, VehicleId};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The smallest supported platoon.
pub const MIN_VEHICLES: usize = 2;

/// The largest supported platoon.
pub const MAX_VEHICLES: usize = 8;

/// The time step for which the formal guarantees are stated, in s.
pub const DEFAULT_DT: f64 = 0.1; // s

/// The largest supported time step, in s.
pub const MAX_DT: f64 = 0.2; // s

/// The shortest supported run, in s.
pub const MIN_DURATION: f64 = 10.0; // s

/// The longest supported run, in s.
pub const MAX_DURATION: f64 = 60.0; // s

/// The largest supported number of lanes.
pub const MAX_LANES: usize = 3;

/// A trigger scheduled by the configuration.
pub type ScheduledTrigger = Trigger;

/// The scenario a simulation runs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Scenario {
    /// Plain car following; no events can be triggered.
    #[default]
    Basic,
    /// A vehicle brakes as hard as it can.
    Emergency,
    /// A priority vehicle is activated and the others make way.
    Priority,
}

impl Scenario {
    /// The triggers a scenario schedules unless told otherwise.
    pub fn default_schedule(self, num_vehicles: usize) -> Vec<ScheduledTrigger> {
        match self {
            Scenario::Basic => vec![],
            Scenario::Emergency => vec![Trigger::emergency(VehicleId(0), 3.0)],
            Scenario::Priority => vec![Trigger::priority(VehicleId(num_vehicles.saturating_sub(1)), 2.0)],
        }
    }
}

/// How vehicles are spread across the lanes at the start of a run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum LaneLayout {
    /// Every vehicle starts in the middle lane.
    #[default]
    SingleLane,
    /// The lead vehicle starts in the middle lane and the rest cycle through the lanes.
    Staggered,
}

/// The configuration of a simulation run.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SimulationConfig {
    /// The number of vehicles in the platoon.
    pub num_vehicles: usize,
    /// The time step in s.
    pub dt: f64,
    pub scenario: Scenario,
    /// The length of a run in s.
    pub duration_seconds: f64,
    /// The number of lanes on the road.
    pub num_lanes: usize,
    pub layout: LaneLayout,
    /// The velocity of every vehicle at the start of a run, in m/s.
    pub initial_velocity: f64,
    /// The bumper-to-bumper gap between consecutive vehicles at the start of a run, in m.
    pub initial_gap: f64,
    /// The velocity vehicles cruise at with nothing ahead, in m/s.
    pub free_flow_velocity: f64,
    /// The velocity an active priority vehicle aims for, in m/s.
    pub priority_velocity: f64,
    pub attributes: VehicleAttributes,
    /// The role of each vehicle at the start of a run, front first.
    /// Empty means every vehicle starts as [Role::Normal].
    pub roles: Vec<Role>,
    /// Triggers queued at the start of every run.
    pub schedule: Vec<ScheduledTrigger>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self::new(4, Scenario::Basic)
    }
}

impl SimulationConfig {
    /// Creates the default configuration for a platoon of `num_vehicles` running `scenario`.
    pub fn new(num_vehicles: usize, scenario: Scenario) -> Self {
        let attributes = VehicleAttributes::default();
        Self {
            num_vehicles,
            dt: DEFAULT_DT,
            scenario,
            duration_seconds: MAX_DURATION,
            num_lanes: MAX_LANES,
            layout: LaneLayout::SingleLane,
            initial_velocity: 20.0,
            initial_gap: SAFE_TIME_GAP * attributes.max_vel,
            free_flow_velocity: 20.0,
            priority_velocity: 25.0,
            attributes,
            roles: vec![],
            schedule: scenario.default_schedule(num_vehicles),
        }
    }

    pub fn with_dt(self, dt: f64) -> Self {
        Self { dt, ..self }
    }

    pub fn with_duration(self, duration_seconds: f64) -> Self {
        Self {
            duration_seconds,
            ..self
        }
    }

    pub fn with_lanes(self, num_lanes: usize) -> Self {
        Self { num_lanes, ..self }
    }

    pub fn with_layout(self, layout: LaneLayout) -> Self {
        Self { layout, ..self }
    }

    pub fn with_initial_velocity(self, initial_velocity: f64) -> Self {
        Self {
            initial_velocity,
            ..self
        }
    }

    pub fn with_initial_gap(self, initial_gap: f64) -> Self {
        Self {
            initial_gap,
            ..self
        }
    }

    pub fn with_free_flow_velocity(self, free_flow_velocity: f64) -> Self {
        Self {
            free_flow_velocity,
            ..self
        }
    }

    pub fn with_priority_velocity(self, priority_velocity: f64) -> Self {
        Self {
            priority_velocity,
            ..self
        }
    }

    pub fn with_attributes(self, attributes: VehicleAttributes) -> Self {
        Self { attributes, ..self }
    }

    pub fn with_roles(self, roles: Vec<Role>) -> Self {
        Self { roles, ..self }
    }

    pub fn with_schedule(self, schedule: Vec<ScheduledTrigger>) -> Self {
        Self { schedule, ..self }
    }

    /// Checks that every option is within its supported range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_VEHICLES..=MAX_VEHICLES).contains(&self.num_vehicles) {
            return Err(ConfigError::VehicleCount {
                count: self.num_vehicles,
                min: MIN_VEHICLES,
                max: MAX_VEHICLES,
            });
        }
        if !(self.dt > 0.0 && self.dt <= MAX_DT) {
            return Err(ConfigError::TimeStep {
                dt: self.dt,
                max: MAX_DT,
            });
        }
        if !(MIN_DURATION..=MAX_DURATION).contains(&self.duration_seconds) {
            return Err(ConfigError::Duration {
                seconds: self.duration_seconds,
                min: MIN_DURATION,
                max: MAX_DURATION,
            });
        }
        if !(1..=MAX_LANES).contains(&self.num_lanes) {
            return Err(ConfigError::LaneCount {
                lanes: self.num_lanes,
                min: 1,
                max: MAX_LANES,
            });
        }
        if !self.roles.is_empty() && self.roles.len() != self.num_vehicles {
            return Err(ConfigError::RoleCount {
                roles: self.roles.len(),
                vehicles: self.num_vehicles,
            });
        }

        let attrs = &self.attributes;
        let positive = [
            ("length", attrs.length),
            ("width", attrs.width),
            ("max_vel", attrs.max_vel),
            ("max_acc", attrs.max_acc),
            ("initial_gap", self.initial_gap),
            ("free_flow_velocity", self.free_flow_velocity),
            ("priority_velocity", self.priority_velocity),
        ];
        for (name, value) in positive {
            if !(value > 0.0 && value.is_finite()) {
                return Err(ConfigError::VehicleAttribute { name, value });
            }
        }
        if !(attrs.min_acc < 0.0 && attrs.min_acc.is_finite()) {
            return Err(ConfigError::VehicleAttribute {
                name: "min_acc",
                value: attrs.min_acc,
            });
        }
        if !(0.0..=attrs.max_vel).contains(&self.initial_velocity) {
            return Err(ConfigError::VehicleAttribute {
                name: "initial_velocity",
                value: self.initial_velocity,
            });
        }

        let mut machine = ScenarioMachine::new(self.scenario, self.num_vehicles);
        for trigger in &self.schedule {
            machine.request(*trigger).0.map_err(ConfigError::Schedule)?;
        }
        Ok(())
    }

    /// Returns a copy with the vehicle count, duration, lane count and time step
    /// brought into their supported ranges.
    pub fn clamped(&self) -> Self {
        let mut config = self.clone();
        config.num_vehicles = self.num_vehicles.clamp(MIN_VEHICLES, MAX_VEHICLES);
        config.num_lanes = self.num_lanes.clamp(1, MAX_LANES);
        config.duration_seconds = if self.duration_seconds.is_nan() {
            MAX_DURATION
        } else {
            self.duration_seconds.clamp(MIN_DURATION, MAX_DURATION)
        };
        if !(self.dt > 0.0 && self.dt <= MAX_DT) {
            config.dt = DEFAULT_DT;
        }
        if config.num_vehicles != self.num_vehicles {
            log::warn!(
                "clamped vehicle count {} to {}",
                self.num_vehicles,
                config.num_vehicles
            );
            if !self.roles.is_empty() {
                config.roles.resize(config.num_vehicles, Role::Normal);
            }
        }
        if config.num_lanes != self.num_lanes {
            log::warn!("clamped lane count {} to {}", self.num_lanes, config.num_lanes);
        }
        if config.duration_seconds != self.duration_seconds {
            log::warn!(
                "clamped duration {} s to {} s",
                self.duration_seconds,
                config.duration_seconds
            );
        }
        if config.dt != self.dt {
            log::warn!("replaced time step {} s with {} s", self.dt, config.dt);
        }
        config
    }

    /// Whether the run uses the time step the formal reaction time guarantees are stated for.
    pub fn guarantees_hold(&self) -> bool {
        (self.dt - DEFAULT_DT).abs() < 1e-12
    }

    /// The lane vehicle `index` starts in.
    pub(crate) fn initial_lane(&self, index: usize) -> usize {
        let middle = self.num_lanes / 2;
        match self.layout {
            LaneLayout::SingleLane => middle,
            LaneLayout::Staggered if index == 0 => middle,
            LaneLayout::Staggered => (index % MAX_LANES).min(self.num_lanes.saturating_sub(1)),
        }
    }

    /// The longitudinal position vehicle `index` starts at, in m; the lead vehicle is furthest ahead.
    pub(crate) fn initial_position(&self, index: usize) -> f64 {
        let spacing = self.initial_gap + self.attributes.length;
        self.num_vehicles.saturating_sub(index + 1) as f64 * spacing
    }

    /// The role vehicle `index` starts with.
    pub fn initial_role(&self, index: usize) -> Role {
        self.roles.get(index).copied().unwrap_or_default()
    }

    /// Creates the vehicles at the start of a run.
    pub(crate) fn initial_vehicles(&self) -> Vec<Vehicle> {
        (0..self.num_vehicles)
            .map(|index| {
                Vehicle::new(
                    VehicleId(index),
                    &self.attributes,
                    self.initial_lane(index),
                    self.initial_position(index),
                    self.initial_velocity,
                    self.initial_role(index),
                )
            })
            .collect()
    }
}
