use crate::{Vehicle, VehicleId};
use itertools::Itertools;
use smallvec::SmallVec;
use std::cmp::{Ordering, Reverse};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A snapshot of every vehicle in the platoon at one instant.
///
/// Vehicles are ordered by lane, then by position from the back of the lane to
/// the front. Vehicles level with each other are ordered by descending ID, so
/// the vehicle with the lower ID counts as being ahead.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PlatoonState {
    /// The simulation time in s.
    time: f64,
    /// The frame index.
    frame: usize,
    vehicles: Vec<Vehicle>,
}

/// The order of vehicles within a lane, from the back to the front.
fn lane_order(a: &Vehicle, b: &Vehicle) -> Ordering {
    a.lane()
        .cmp(&b.lane())
        .then(a.pos_mid().total_cmp(&b.pos_mid()))
        .then(Reverse(a.id()).cmp(&Reverse(b.id())))
}

impl PlatoonState {
    pub(crate) fn new(time: f64, frame: usize, mut vehicles: Vec<Vehicle>) -> Self {
        vehicles.sort_by(lane_order);
        Self {
            time,
            frame,
            vehicles,
        }
    }

    /// The simulation time of the snapshot, in s.
    pub fn time(&self) -> f64 {
        self.time
    }

    /// The frame index of the snapshot.
    pub fn frame(&self) -> usize {
        self.frame
    }

    /// Gets the vehicle with the given ID.
    pub fn get(&self, id: VehicleId) -> Option<&Vehicle> {
        self.vehicles.iter().find(|veh| veh.id() == id)
    }

    /// Iterates over the vehicles in lane order.
    pub fn iter(&self) -> std::slice::Iter<'_, Vehicle> {
        self.vehicles.iter()
    }

    /// The number of vehicles.
    pub fn len(&self) -> usize {
        self.vehicles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vehicles.is_empty()
    }

    /// The vehicles in `lane`, from the back to the front.
    pub fn lane(&self, lane: usize) -> &[Vehicle] {
        let start = self.vehicles.partition_point(|veh| veh.lane() < lane);
        let end = self.vehicles.partition_point(|veh| veh.lane() <= lane);
        &self.vehicles[start..end]
    }

    /// The vehicles in `lane`, from the back to the front.
    pub fn lane_occupants(&self, lane: usize) -> SmallVec<[&Vehicle; 8]> {
        self.lane(lane).iter().collect()
    }

    /// The nearest vehicle ahead of `vehicle` in its own lane.
    pub fn leader_of(&self, vehicle: &Vehicle) -> Option<&Vehicle> {
        self.leader_in_lane(vehicle.lane(), vehicle)
    }

    /// The nearest vehicle in `lane` which is ahead of `vehicle`.
    pub fn leader_in_lane(&self, lane: usize, vehicle: &Vehicle) -> Option<&Vehicle> {
        self.lane(lane)
            .iter()
            .filter(|other| other.id() != vehicle.id())
            .find(|other| is_ahead(other, vehicle))
    }

    /// Iterates over the vehicles in `vehicle`'s lane which are ahead of it, nearest first.
    pub fn ahead_of<'a>(&'a self, vehicle: &'a Vehicle) -> impl Iterator<Item = &'a Vehicle> {
        self.lane(vehicle.lane())
            .iter()
            .filter(move |other| other.id() != vehicle.id() && is_ahead(other, vehicle))
    }

    /// Iterates over every `(follower, leader)` pair of adjacent vehicles sharing a lane.
    pub fn follower_pairs(&self) -> impl Iterator<Item = (&Vehicle, &Vehicle)> {
        self.vehicles
            .iter()
            .tuple_windows()
            .filter(|(follower, leader)| follower.lane() == leader.lane())
    }
}

/// Whether `other` is ahead of `vehicle`; at equal positions the lower ID is ahead.
fn is_ahead(other: &Vehicle, vehicle: &Vehicle) -> bool {
    match other.pos_mid().total_cmp(&vehicle.pos_mid()) {
        Ordering::Greater => true,
        Ordering::Equal => other.id() < vehicle.id(),
        Ordering::Less => false,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{Role, VehicleAttributes};

    fn vehicle(id: usize, lane: usize, pos: f64) -> Vehicle {
        Vehicle::new(VehicleId(id), &VehicleAttributes::default(), lane, pos, 20.0, Role::Normal)
    }

    fn state() -> PlatoonState {
        PlatoonState::new(
            0.0,
            0,
            vec![
                vehicle(0, 1, 200.0),
                vehicle(1, 1, 100.0),
                vehicle(2, 0, 150.0),
                vehicle(3, 1, 0.0),
                vehicle(4, 2, 50.0),
            ],
        )
    }

    #[test]
    fn ordered_by_lane_then_position() {
        let ids = state().iter().map(|veh| veh.id().0).collect::<Vec<_>>();
        assert_eq!(ids, [2, 3, 1, 0, 4]);
    }

    #[test]
    fn lanes() {
        let state = state();
        let ids = state.lane(1).iter().map(|veh| veh.id().0).collect::<Vec<_>>();
        assert_eq!(ids, [3, 1, 0]);
        assert_eq!(state.lane_occupants(0).len(), 1);
        assert!(state.lane(3).is_empty());
    }

    #[test]
    fn leaders() {
        let state = state();
        let veh3 = state.get(VehicleId(3)).unwrap();
        assert_eq!(state.leader_of(veh3).unwrap().id(), VehicleId(1));
        let veh0 = state.get(VehicleId(0)).unwrap();
        assert!(state.leader_of(veh0).is_none());
        assert_eq!(state.leader_in_lane(0, veh3).unwrap().id(), VehicleId(2));
        assert!(state.leader_in_lane(2, veh0).is_none());
        let ahead = state.ahead_of(veh3).map(|veh| veh.id().0).collect::<Vec<_>>();
        assert_eq!(ahead, [1, 0]);
    }

    #[test]
    fn level_vehicles_order_by_id() {
        let state = PlatoonState::new(0.0, 0, vec![vehicle(1, 0, 10.0), vehicle(0, 0, 10.0)]);
        let veh0 = state.get(VehicleId(0)).unwrap();
        let veh1 = state.get(VehicleId(1)).unwrap();
        assert_eq!(state.leader_of(veh1).unwrap().id(), VehicleId(0));
        assert!(state.leader_of(veh0).is_none());
    }

    #[test]
    fn pairs_stay_within_lanes() {
        let pairs = state()
            .follower_pairs()
            .map(|(f, l)| (f.id().0, l.id().0))
            .collect::<Vec<_>>();
        assert_eq!(pairs, [(3, 1), (1, 0)]);
    }
}
