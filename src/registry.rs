use crate::{
    RunHistory, SimError, Simulation, SimulationConfig, TickOutcome, TriggerSender, VehicleId,
};
use slotmap::SlotMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

slotmap::new_key_type! {
    /// Identifies a simulation held by a [Registry].
    pub struct SimulationHandle;
}

/// Holds independent simulations and hands out handles to them.
///
/// Each simulation sits behind its own lock: a tick holds the write lock until it
/// is complete, so readers never observe a half-updated platoon.
#[derive(Default)]
pub struct Registry {
    simulations: SlotMap<SimulationHandle, RwLock<Simulation>>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Default::default()
    }

    /// Creates a simulation. Nothing is created if the configuration is invalid.
    pub fn create_simulation(&mut self, config: SimulationConfig) -> Result<SimulationHandle, SimError> {
        let sim = Simulation::new(config)?;
        let handle = self.simulations.insert(RwLock::new(sim));
        log::info!("created simulation {:?}", handle);
        Ok(handle)
    }

    /// Removes a simulation, returning it.
    pub fn remove(&mut self, handle: SimulationHandle) -> Result<Simulation, SimError> {
        let lock = self.simulations.remove(handle).ok_or(SimError::UnknownHandle)?;
        lock.into_inner().map_err(|_| SimError::LockPoisoned)
    }

    /// The number of simulations held.
    pub fn len(&self) -> usize {
        self.simulations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.simulations.is_empty()
    }

    /// Advances a simulation by one time step.
    pub fn advance_tick(&self, handle: SimulationHandle) -> Result<TickOutcome, SimError> {
        Ok(self.write(handle)?.advance_tick())
    }

    /// Queues an emergency on `vehicle`, to fire at the first tick at or after `time`.
    pub fn trigger_emergency(
        &self,
        handle: SimulationHandle,
        vehicle: VehicleId,
        time: f64,
    ) -> Result<(), SimError> {
        Ok(self.write(handle)?.trigger_emergency(vehicle, time)?)
    }

    /// Queues the activation of priority vehicle `vehicle`, to fire at the first tick at or after `time`.
    pub fn activate_priority(
        &self,
        handle: SimulationHandle,
        vehicle: VehicleId,
        time: f64,
    ) -> Result<(), SimError> {
        Ok(self.write(handle)?.activate_priority(vehicle, time)?)
    }

    /// Returns a simulation to the state it was created in.
    pub fn reset(&self, handle: SimulationHandle) -> Result<(), SimError> {
        self.write(handle)?.reset();
        Ok(())
    }

    /// Gets a snapshot of a simulation's history.
    pub fn get_history(&self, handle: SimulationHandle) -> Result<RunHistory, SimError> {
        Ok(self.read(handle)?.history().clone())
    }

    /// Gets a handle for queueing triggers on a simulation without taking its lock.
    pub fn trigger_sender(&self, handle: SimulationHandle) -> Result<TriggerSender, SimError> {
        Ok(self.read(handle)?.trigger_sender())
    }

    /// Runs `f` with read access to a simulation.
    pub fn with_simulation<T>(
        &self,
        handle: SimulationHandle,
        f: impl FnOnce(&Simulation) -> T,
    ) -> Result<T, SimError> {
        let sim = self.read(handle)?;
        Ok(f(&sim))
    }

    fn read(&self, handle: SimulationHandle) -> Result<RwLockReadGuard<'_, Simulation>, SimError> {
        self.simulations
            .get(handle)
            .ok_or(SimError::UnknownHandle)?
            .read()
            .map_err(|_| SimError::LockPoisoned)
    }

    fn write(&self, handle: SimulationHandle) -> Result<RwLockWriteGuard<'_, Simulation>, SimError> {
        self.simulations
            .get(handle)
            .ok_or(SimError::UnknownHandle)?
            .write()
            .map_err(|_| SimError::LockPoisoned)
    }
}
