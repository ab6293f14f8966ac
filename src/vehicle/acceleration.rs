use crate::safety::{required_gap, MIN_DISTANCE, SAFETY_MARGIN, SAFE_TIME_GAP};

/// The extra spacing the car following law aims for on top of the required gap, in m.
const FOLLOW_BUFFER: f64 = 1.0; // m

/// Gain on the gap error, in s^-2.
const GAP_GAIN: f64 = 0.3;

/// Gain on the velocity difference to the vehicle ahead, in s^-1.
const VEL_GAIN: f64 = 0.5;

/// Gain on the difference to the desired velocity, in s^-1.
const FREE_FLOW_GAIN: f64 = 0.5;

/// Spacing the one-step safety cap keeps on top of the required gap, in m.
const CAP_TOLERANCE: f64 = 1e-3; // m

/// The acceleration model of a vehicle.
///
/// Each constraint lowers the acceleration; the result is the most
/// restrictive of all constraints applied since the model was created.
#[derive(Clone, Debug)]
pub struct AccelerationModel {
    max_acc: f64,
    min_acc: f64,
    dt: f64,
    acc: f64,
}

/// The parameters of the acceleration model.
pub struct ModelParams {
    /// The vehicle's maximum acceleration in m/s<sup>2</sup>.
    pub max_acceleration: f64,
    /// The vehicle's maximum deceleration, a negative number in m/s<sup>2</sup>.
    pub min_acceleration: f64,
    /// The time step over which the acceleration will be applied, in s.
    pub dt: f64,
}

impl AccelerationModel {
    /// Creates a new acceleration model.
    pub fn new(params: &ModelParams) -> Self {
        AccelerationModel {
            max_acc: params.max_acceleration,
            min_acc: params.min_acceleration,
            dt: params.dt,
            acc: params.max_acceleration,
        }
    }

    /// Gets the acceleration of the vehicle, within the vehicle's limits.
    pub fn acc(&self) -> f64 {
        self.acc.clamp(self.min_acc, self.max_acc)
    }

    /// Limits the acceleration to at most `acc`.
    pub fn limit(&mut self, acc: f64) {
        self.acc = f64::min(self.acc, acc);
    }

    /// Calculates the acceleration needed to reach and hold the desired velocity.
    /// # Arguments
    /// * `vel` - The velocity of the simulated vehicle (m/s).
    /// * `target` - The desired velocity (m/s).
    pub fn apply_free_flow(&mut self, vel: f64, target: f64) {
        self.limit(FREE_FLOW_GAIN * (target - vel));
    }

    /// Calculates the acceleration needed to follow the vehicle ahead
    /// at the safe time gap.
    ///
    /// # Arguments
    /// * `net_dist` - The bumper-to-bumper distance to the vehicle ahead in metres.
    /// * `my_vel` - The velocity of the simulated vehicle (m/s).
    /// * `their_vel` - The vehicle ahead's velocity (m/s).
    pub fn follow_vehicle(&mut self, net_dist: f64, my_vel: f64, their_vel: f64) {
        let desired = required_gap(my_vel) + FOLLOW_BUFFER;
        let acc = GAP_GAIN * (net_dist - desired) + VEL_GAIN * (their_vel - my_vel);
        self.limit(acc);
        self.limit(self.safety_cap(net_dist, my_vel, their_vel));
    }

    /// The largest acceleration after which the required gap still holds at the end
    /// of the step, even if the vehicle ahead brakes as hard as it can during it.
    fn safety_cap(&self, net_dist: f64, my_vel: f64, their_vel: f64) -> f64 {
        let dt = self.dt;
        let slack = -self.min_acc * dt * dt;
        let base = net_dist + (their_vel - my_vel) * dt - slack - CAP_TOLERANCE;
        let time_gap_cap =
            (base - SAFE_TIME_GAP * my_vel - SAFETY_MARGIN) / (dt * dt + SAFE_TIME_GAP * dt);
        let min_dist_cap = (base - MIN_DISTANCE - SAFETY_MARGIN) / (dt * dt);
        f64::min(time_gap_cap, min_dist_cap)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn model() -> AccelerationModel {
        AccelerationModel::new(&ModelParams {
            max_acceleration: 2.0,
            min_acceleration: -6.0,
            dt: 0.1,
        })
    }

    #[test]
    fn free_flow() {
        let mut acc = model();
        acc.apply_free_flow(20.0, 20.0);
        assert_approx_eq!(acc.acc(), 0.0);

        let mut acc = model();
        acc.apply_free_flow(0.0, 20.0);
        assert_approx_eq!(acc.acc(), 2.0);

        let mut acc = model();
        acc.apply_free_flow(30.0, 20.0);
        assert_approx_eq!(acc.acc(), -5.0);
    }

    #[test]
    fn follow_at_equilibrium() {
        let mut acc = model();
        acc.follow_vehicle(required_gap(20.0) + FOLLOW_BUFFER, 20.0, 20.0);
        assert_approx_eq!(acc.acc(), 0.0);
    }

    #[test]
    fn closes_a_large_gap_gently() {
        let mut acc = model();
        acc.apply_free_flow(20.0, 20.0);
        acc.follow_vehicle(75.0, 20.0, 20.0);
        assert_approx_eq!(acc.acc(), 0.0);
    }

    #[test]
    fn brakes_when_too_close() {
        let mut acc = model();
        acc.follow_vehicle(30.0, 20.0, 20.0);
        assert_approx_eq!(acc.acc(), -6.0);
    }

    #[test]
    fn cap_keeps_the_required_gap() {
        // Closing fast on a slower vehicle from just outside the required gap
        let (my_vel, their_vel) = (20.0, 14.0);
        let gap = required_gap(my_vel) + 0.5;
        let mut acc = model();
        acc.follow_vehicle(gap, my_vel, their_vel);
        let a = acc.acc();
        assert!(a > -6.0);

        // Worst case: the vehicle ahead brakes maximally during the step
        let dt = 0.1;
        let my_next = my_vel + a * dt;
        let their_next = their_vel - 6.0 * dt;
        let next_gap = gap + their_next * dt - my_next * dt;
        assert!(next_gap >= required_gap(my_next) - 1e-9);
    }
}
