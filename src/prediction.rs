//! Monte-Carlo motion prediction for the probabilistic surrogate measures.
//!
//! Implements the two prediction schemes from Mohamed & Saunier,
//! "Motion prediction methods for surrogate safety analysis" (TRR 2386):
//! normal adaptation (per-step resampled control, yields mTTC/mPET) and
//! evasive action (one constant control per trajectory, yields P(UEA)).
//! Trajectories integrate a speed/heading state at 0.1-second steps, so
//! step counts divide by ten to convert back to seconds.

use glam::DVec2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Triangular};

use crate::error::{AnalysisError, Result};
use crate::geometry::segments_intersect_f64;
use crate::trj::Units;

/// Prediction steps per second.
const STEPS_PER_SECOND: f64 = 10.0;

/// Velocity in polar form. Adding a control (acceleration, steering)
/// keeps the norm non-negative.
#[derive(Debug, Clone, Copy, Default)]
pub struct NormAngle {
    pub norm: f64,
    /// Radians.
    pub angle: f64,
}

impl NormAngle {
    pub fn from_vec(v: DVec2) -> Self {
        let norm = v.length();
        let angle = if norm > 0.0 { v.y.atan2(v.x) } else { 0.0 };
        NormAngle { norm, angle }
    }

    pub fn to_vec(self) -> DVec2 {
        DVec2::new(self.norm * self.angle.cos(), self.norm * self.angle.sin())
    }

    fn apply(self, control: NormAngle) -> NormAngle {
        NormAngle {
            norm: (self.norm + control.norm).max(0.0),
            angle: self.angle + control.angle,
        }
    }
}

/// Initial state of one vehicle handed to the predictor.
#[derive(Debug, Clone, Copy)]
pub struct PredictedState {
    pub pos: DVec2,
    pub vel: DVec2,
}

/// Per-trajectory control policy.
#[derive(Debug, Clone, Copy)]
enum Control {
    /// Fresh acceleration/steering draw every step.
    Resampled {
        accel: Triangular<f64>,
        steer: Triangular<f64>,
    },
    /// One draw held for the whole trajectory.
    Constant(NormAngle),
}

/// One predicted trajectory, positions extended lazily as steps are
/// requested.
#[derive(Debug)]
struct PredictedTrajectory {
    max_speed: f64,
    control: Control,
    positions: Vec<DVec2>,
    states: Vec<NormAngle>,
}

impl PredictedTrajectory {
    fn new(init: PredictedState, max_speed: f64, control: Control) -> Self {
        PredictedTrajectory {
            max_speed,
            control,
            positions: vec![init.pos],
            states: vec![NormAngle::from_vec(init.vel)],
        }
    }

    fn pos(&mut self, step: usize, rng: &mut StdRng) -> DVec2 {
        while self.positions.len() <= step {
            let control = match self.control {
                Control::Resampled { accel, steer } => NormAngle {
                    norm: accel.sample(rng),
                    angle: steer.sample(rng),
                },
                Control::Constant(c) => c,
            };
            let cur = *self.states.last().unwrap_or(&NormAngle::default());
            let mut next = cur.apply(control);
            if next.norm > self.max_speed {
                next.norm = self.max_speed;
            }
            let next_pos = *self.positions.last().unwrap_or(&DVec2::ZERO) + next.to_vec();
            self.states.push(next);
            self.positions.push(next_pos);
        }
        self.positions[step]
    }
}

/// Which control policy a [`MotionPredictor`] runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    NormalAdaptation,
    EvasiveAction,
}

/// Unit-dependent physical limits for the predictors.
///
/// Speeds are per step, accelerations per step squared, steering in
/// radians per step.
#[derive(Debug, Clone, Copy)]
pub struct PredictionLimits {
    pub n_trajectories: usize,
    pub n_steps: usize,
    pub max_speed: f64,
    pub collision_threshold: f64,
    pub ttc_accel_max: f64,
    pub ttc_steering_max: f64,
    pub puea_accel_min: f64,
    pub puea_accel_max: f64,
    pub puea_steering_max: f64,
}

impl PredictionLimits {
    /// Limits for the given measurement units: 75 mph / 90 km/h speed
    /// caps and published acceleration bounds, rescaled to per-step
    /// quantities.
    pub fn for_units(units: Units) -> Self {
        let n_steps = 10usize;
        let rate = (n_steps * n_steps) as f64;
        let mut limits = PredictionLimits {
            n_trajectories: 100,
            n_steps,
            max_speed: 75.0 * 5280.0 / 3600.0 / n_steps as f64,
            collision_threshold: 6.0,
            ttc_accel_max: 6.56 / rate,
            ttc_steering_max: 0.2 / n_steps as f64,
            puea_accel_min: -29.86 / rate,
            puea_accel_max: 14.11 / rate,
            puea_steering_max: 0.5 / n_steps as f64,
        };
        if units == Units::Metric {
            limits.max_speed = 90.0 / 3.6 / n_steps as f64;
            limits.collision_threshold = 1.8;
            limits.ttc_accel_max = 2.0 / rate;
            limits.puea_accel_min = -9.1 / rate;
            limits.puea_accel_max = 4.3 / rate;
        }
        limits
    }
}

/// Monte-Carlo predictor for one strategy.
#[derive(Debug)]
pub struct MotionPredictor {
    strategy: Strategy,
    n_trajectories: usize,
    max_speed: f64,
    accel: Triangular<f64>,
    steer: Triangular<f64>,
    rng: StdRng,
}

impl MotionPredictor {
    pub fn new(
        strategy: Strategy,
        limits: &PredictionLimits,
        seed: u64,
    ) -> Result<MotionPredictor> {
        let (accel_min, accel_max, steer_max) = match strategy {
            Strategy::NormalAdaptation => (
                -limits.ttc_accel_max,
                limits.ttc_accel_max,
                limits.ttc_steering_max,
            ),
            Strategy::EvasiveAction => (
                limits.puea_accel_min,
                limits.puea_accel_max,
                limits.puea_steering_max,
            ),
        };
        let accel = Triangular::new(accel_min, accel_max, 0.0)
            .map_err(|e| AnalysisError::Config(format!("acceleration distribution: {e}")))?;
        let steer = Triangular::new(-steer_max, steer_max, 0.0)
            .map_err(|e| AnalysisError::Config(format!("steering distribution: {e}")))?;
        Ok(MotionPredictor {
            strategy,
            n_trajectories: limits.n_trajectories,
            max_speed: limits.max_speed,
            accel,
            steer,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    fn gen_trajectories(&mut self, state: PredictedState) -> Vec<PredictedTrajectory> {
        (0..self.n_trajectories)
            .map(|_| {
                let control = match self.strategy {
                    Strategy::NormalAdaptation => Control::Resampled {
                        accel: self.accel,
                        steer: self.steer,
                    },
                    Strategy::EvasiveAction => Control::Constant(NormAngle {
                        norm: self.accel.sample(&mut self.rng),
                        angle: self.steer.sample(&mut self.rng),
                    }),
                };
                PredictedTrajectory::new(state, self.max_speed, control)
            })
            .collect()
    }

    /// First step at which the two trajectories close within the
    /// threshold, if any within `n_steps`.
    fn detect_collision(
        t1: &mut PredictedTrajectory,
        t2: &mut PredictedTrajectory,
        threshold: f64,
        n_steps: usize,
        rng: &mut StdRng,
    ) -> Option<usize> {
        for step in 1..=n_steps {
            let d = (t1.pos(step, rng) - t2.pos(step, rng)).length();
            if d <= threshold {
                return Some(step);
            }
        }
        None
    }

    /// First crossing of the two predicted paths; yields the estimated
    /// encroachment time in steps.
    fn detect_crossing_zone(
        t1: &mut PredictedTrajectory,
        t2: &mut PredictedTrajectory,
        threshold: f64,
        n_steps: usize,
        rng: &mut StdRng,
    ) -> Option<f64> {
        for s1 in 0..n_steps {
            for s2 in 0..n_steps {
                let p11 = t1.pos(s1, rng);
                let p12 = t1.pos(s1 + 1, rng);
                let p21 = t2.pos(s2, rng);
                let p22 = t2.pos(s2 + 1, rng);
                if segments_intersect_f64(p11, p12, p21, p22) {
                    let delta_v = (p11 - p12 - p21 + p22).length();
                    let gap = s1.abs_diff(s2) as f64;
                    return Some((gap - threshold / delta_v).abs());
                }
            }
        }
        None
    }

    /// Mean time-to-collision and mean post-encroachment time, in
    /// seconds, over the trajectory cross product. Inputs that never
    /// collide (or cross) leave the corresponding output untouched.
    ///
    /// Normal-adaptation strategy only.
    pub fn calc_mttc_mpet(
        &mut self,
        state1: PredictedState,
        state2: PredictedState,
        threshold: f64,
        n_steps: usize,
        mttc: &mut f32,
        mpet: &mut f32,
    ) {
        assert_eq!(
            self.strategy,
            Strategy::NormalAdaptation,
            "mTTC/mPET requires the normal-adaptation predictor"
        );
        let mut trajs1 = self.gen_trajectories(state1);
        let mut trajs2 = self.gen_trajectories(state2);

        let mut sum_ttc = 0.0f64;
        let mut n_ttcs = 0u32;
        let mut sum_pet = 0.0f64;
        let mut n_pets = 0u32;

        for t1 in trajs1.iter_mut() {
            for t2 in trajs2.iter_mut() {
                match Self::detect_collision(t1, t2, threshold, n_steps, &mut self.rng) {
                    Some(step) => {
                        sum_ttc += step as f64;
                        n_ttcs += 1;
                    }
                    None => {
                        if let Some(pet) =
                            Self::detect_crossing_zone(t1, t2, threshold, n_steps, &mut self.rng)
                        {
                            sum_pet += pet;
                            n_pets += 1;
                        }
                    }
                }
            }
        }

        if n_ttcs != 0 {
            *mttc = (sum_ttc / n_ttcs as f64 / STEPS_PER_SECOND) as f32;
        }
        if n_pets != 0 {
            *mpet = (sum_pet / n_pets as f64 / STEPS_PER_SECOND) as f32;
        }
    }

    /// Probability of unsuccessful evasive action: the colliding fraction
    /// of the trajectory cross product.
    ///
    /// Evasive-action strategy only.
    pub fn calc_puea(
        &mut self,
        state1: PredictedState,
        state2: PredictedState,
        threshold: f64,
        n_steps: usize,
    ) -> f32 {
        assert_eq!(
            self.strategy,
            Strategy::EvasiveAction,
            "P(UEA) requires the evasive-action predictor"
        );
        let mut trajs1 = self.gen_trajectories(state1);
        let mut trajs2 = self.gen_trajectories(state2);

        let mut n_collisions = 0usize;
        for t1 in trajs1.iter_mut() {
            for t2 in trajs2.iter_mut() {
                if Self::detect_collision(t1, t2, threshold, n_steps, &mut self.rng).is_some() {
                    n_collisions += 1;
                }
            }
        }
        let n_samples = trajs1.len() * trajs2.len();
        n_collisions as f32 / n_samples as f32
    }

    pub fn reseed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    #[cfg(test)]
    fn sample_accel(&mut self) -> f64 {
        self.accel.sample(&mut self.rng)
    }
}

/// The predictor pair owned by each analysis worker.
#[derive(Debug)]
pub struct Predictors {
    pub normal_adaptation: MotionPredictor,
    pub evasive_action: MotionPredictor,
    pub collision_threshold: f64,
    pub n_steps: usize,
}

impl Predictors {
    pub fn new(limits: &PredictionLimits, seed: u64) -> Result<Predictors> {
        Ok(Predictors {
            normal_adaptation: MotionPredictor::new(Strategy::NormalAdaptation, limits, seed)?,
            evasive_action: MotionPredictor::new(
                Strategy::EvasiveAction,
                limits,
                seed.wrapping_add(1),
            )?,
            collision_threshold: limits.collision_threshold,
            n_steps: limits.n_steps,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn limits() -> PredictionLimits {
        PredictionLimits::for_units(Units::English)
    }

    #[test]
    fn unit_limits_scale_per_step() {
        let en = PredictionLimits::for_units(Units::English);
        assert_relative_eq!(en.max_speed, 11.0, epsilon = 1e-6);
        assert_relative_eq!(en.collision_threshold, 6.0);
        assert_relative_eq!(en.ttc_steering_max, 0.02);

        let me = PredictionLimits::for_units(Units::Metric);
        assert_relative_eq!(me.max_speed, 2.5, epsilon = 1e-6);
        assert_relative_eq!(me.collision_threshold, 1.8);
        assert_relative_eq!(me.puea_accel_min, -0.091, epsilon = 1e-6);
    }

    #[test]
    fn norm_angle_round_trip() {
        let v = DVec2::new(3.0, 4.0);
        let na = NormAngle::from_vec(v);
        assert_relative_eq!(na.norm, 5.0);
        let back = na.to_vec();
        assert_relative_eq!(back.x, 3.0, epsilon = 1e-9);
        assert_relative_eq!(back.y, 4.0, epsilon = 1e-9);
    }

    #[test]
    fn norm_angle_clamps_to_zero() {
        let na = NormAngle { norm: 1.0, angle: 0.0 };
        let braked = na.apply(NormAngle { norm: -5.0, angle: 0.0 });
        assert_relative_eq!(braked.norm, 0.0);
    }

    #[test]
    fn accel_samples_stay_in_bounds() {
        let l = limits();
        let mut p = MotionPredictor::new(Strategy::EvasiveAction, &l, 7).unwrap();
        for _ in 0..1000 {
            let a = p.sample_accel();
            assert!(a >= l.puea_accel_min && a <= l.puea_accel_max);
        }
    }

    #[test]
    fn head_on_vehicles_always_collide() {
        let l = limits();
        let mut p = MotionPredictor::new(Strategy::EvasiveAction, &l, 42).unwrap();
        // closing at 10 units/step from 20 units apart: inside the
        // 6-unit threshold by step 1..2 for any admissible control
        let s1 = PredictedState { pos: DVec2::new(0.0, 0.0), vel: DVec2::new(5.0, 0.0) };
        let s2 = PredictedState { pos: DVec2::new(20.0, 0.0), vel: DVec2::new(-5.0, 0.0) };
        let puea = p.calc_puea(s1, s2, l.collision_threshold, l.n_steps);
        assert_relative_eq!(puea, 1.0);
    }

    #[test]
    fn distant_parallel_vehicles_never_collide() {
        let l = limits();
        let mut p = MotionPredictor::new(Strategy::EvasiveAction, &l, 42).unwrap();
        let s1 = PredictedState { pos: DVec2::new(0.0, 0.0), vel: DVec2::new(1.0, 0.0) };
        let s2 = PredictedState { pos: DVec2::new(0.0, 500.0), vel: DVec2::new(1.0, 0.0) };
        let puea = p.calc_puea(s1, s2, l.collision_threshold, l.n_steps);
        assert_relative_eq!(puea, 0.0);
    }

    #[test]
    fn converging_vehicles_yield_mttc() {
        let l = limits();
        let mut p = MotionPredictor::new(Strategy::NormalAdaptation, &l, 42).unwrap();
        let s1 = PredictedState { pos: DVec2::new(0.0, 0.0), vel: DVec2::new(5.0, 0.0) };
        let s2 = PredictedState { pos: DVec2::new(30.0, 0.0), vel: DVec2::new(-5.0, 0.0) };
        let mut mttc = 99.0f32;
        let mut mpet = 99.0f32;
        p.calc_mttc_mpet(s1, s2, l.collision_threshold, l.n_steps, &mut mttc, &mut mpet);
        // roughly 3 steps to close 30 units at 10/step, reported in seconds
        assert!(mttc < 1.0, "mttc = {mttc}");
    }

    #[test]
    fn seeded_predictor_is_deterministic() {
        let l = limits();
        let s1 = PredictedState { pos: DVec2::new(0.0, 0.0), vel: DVec2::new(8.0, 0.5) };
        let s2 = PredictedState { pos: DVec2::new(60.0, 4.0), vel: DVec2::new(-8.0, 0.0) };
        let mut a = MotionPredictor::new(Strategy::EvasiveAction, &l, 99).unwrap();
        let mut b = MotionPredictor::new(Strategy::EvasiveAction, &l, 99).unwrap();
        let pa = a.calc_puea(s1, s2, l.collision_threshold, l.n_steps);
        let pb = b.calc_puea(s1, s2, l.collision_threshold, l.n_steps);
        assert_relative_eq!(pa, pb);
    }
}
