//! Per-vehicle-pair conflict event lifecycle.
//!
//! An event opens when two projected footprints first overlap, accumulates
//! one sample pair per analysis step, and tracks the running TTC/PET
//! minima. Once the pair stops colliding (or one vehicle leaves the
//! input) the event is closing; it closes when the PET search is
//! exhausted, confirming a conflict iff a PET below the threshold was
//! observed.
//!
//! Samples are copies of the store's snapshots, so window eviction never
//! invalidates an open event. Misuse of the pair protocol (mismatched
//! ids, out-of-order samples) panics rather than erroring: continuing
//! would corrupt every measure derived from the sample arrays.

use glam::DVec2;
use log::{debug, trace};

use crate::conflict::{Conflict, ConflictType};
use crate::error::Result;
use crate::prediction::{PredictedState, Predictors};
use crate::vehicle::{TrajectoryStore, VehicleSnapshot};

/// Sentinel for measures that were never observed.
pub const INVALID_SSM_VALUE: f32 = 99.0;

/// TTC sweep resolution in seconds.
const TTC_STEP_SIZE: f32 = 0.1;

/// Thresholds and flags shared by every event of one analysis run.
#[derive(Debug, Clone, Copy)]
pub struct EventParams {
    pub max_ttc: f32,
    pub max_pet: f32,
    pub rear_end_angle: f32,
    pub crossing_angle: f32,
    pub calc_puea: bool,
    /// Center-distance collision threshold for the Monte-Carlo search.
    pub collision_threshold: f64,
}

/// Lifecycle of a [`ConflictEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventState {
    /// Projected footprints still collide; TTC values keep updating.
    Open,
    /// No longer colliding; waiting for the PET search to finish.
    Closing,
    /// Closed with a PET below the threshold.
    Confirmed,
    /// Closed without a qualifying PET.
    Discarded,
}

/// One interaction between a fixed pair of vehicles.
#[derive(Debug)]
pub struct ConflictEvent {
    low_vid: u32,
    high_vid: u32,
    low_samples: Vec<VehicleSnapshot>,
    high_samples: Vec<VehicleSnapshot>,
    state: EventState,
    params: EventParams,
    total_steps: usize,

    /// Time of the last accepted sample pair.
    pre_time_step: f32,
    /// Time the event opened (minimum-TTC interval start).
    first_ttc: f32,
    last_ttc: f32,
    first_pet: f32,
    last_pet: f32,
    last_ttc_idx: isize,
    last_pet_idx: isize,
    pet_complete: bool,

    t_min_ttc: f32,
    ttc: f32,
    pet: f32,
    max_s: f32,
    x_min_pet: f32,
    y_min_pet: f32,
    z_min_pet: f32,
    first_vid: i32,
    second_vid: i32,

    // populated by close-out measure calculation
    dr: f32,
    max_d: f32,
    delta_s: f32,
    max_delta_v: f32,
    conflict_angle: f32,
    clock_angle: String,
    conflict_type: ConflictType,
    post_crash_v: f32,
    post_crash_heading: f32,
    first_link: i32,
    first_lane: i32,
    first_length: f32,
    first_width: f32,
    first_heading: f32,
    first_v_min_ttc: f32,
    first_delta_v: f32,
    first_csp: (f32, f32),
    first_cep: (f32, f32),
    second_link: i32,
    second_lane: i32,
    second_length: f32,
    second_width: f32,
    second_heading: f32,
    second_v_min_ttc: f32,
    second_delta_v: f32,
    second_csp: (f32, f32),
    second_cep: (f32, f32),
    puea: f32,
    m_ttc: f32,
    m_pet: f32,
}

impl ConflictEvent {
    /// Open an event from the first colliding sample pair.
    ///
    /// Panics if both snapshots carry the same vehicle id.
    pub fn new(params: EventParams, v1: VehicleSnapshot, v2: VehicleSnapshot) -> ConflictEvent {
        assert_ne!(
            v1.id, v2.id,
            "conflict event requires two distinct vehicles"
        );
        let (low_vid, high_vid) = if v1.id < v2.id { (v1.id, v2.id) } else { (v2.id, v1.id) };
        let mut ev = ConflictEvent {
            low_vid,
            high_vid,
            low_samples: Vec::new(),
            high_samples: Vec::new(),
            state: EventState::Open,
            params,
            total_steps: (params.max_ttc / TTC_STEP_SIZE) as usize + 1,
            pre_time_step: v1.time,
            first_ttc: 0.0,
            last_ttc: v1.time,
            first_pet: 0.0,
            last_pet: 0.0,
            last_ttc_idx: -1,
            last_pet_idx: -1,
            pet_complete: false,
            t_min_ttc: -1.0,
            ttc: INVALID_SSM_VALUE,
            pet: INVALID_SSM_VALUE,
            max_s: 0.0,
            x_min_pet: 0.0,
            y_min_pet: 0.0,
            z_min_pet: 0.0,
            first_vid: -1,
            second_vid: -1,
            dr: INVALID_SSM_VALUE,
            max_d: INVALID_SSM_VALUE,
            delta_s: 0.0,
            max_delta_v: 0.0,
            conflict_angle: 0.0,
            clock_angle: String::new(),
            conflict_type: ConflictType::Unclassified,
            post_crash_v: 0.0,
            post_crash_heading: 0.0,
            first_link: 0,
            first_lane: 0,
            first_length: 0.0,
            first_width: 0.0,
            first_heading: 0.0,
            first_v_min_ttc: 0.0,
            first_delta_v: 0.0,
            first_csp: (0.0, 0.0),
            first_cep: (0.0, 0.0),
            second_link: 0,
            second_lane: 0,
            second_length: 0.0,
            second_width: 0.0,
            second_heading: 0.0,
            second_v_min_ttc: 0.0,
            second_delta_v: 0.0,
            second_csp: (0.0, 0.0),
            second_cep: (0.0, 0.0),
            puea: 1.0,
            m_ttc: INVALID_SSM_VALUE,
            m_pet: INVALID_SSM_VALUE,
        };
        ev.add_sample(v1, v2);
        ev.first_ttc = ev.pre_time_step;
        debug!("event opened: pair ({low_vid}, {high_vid}) at t={}", v1.time);
        ev
    }

    pub fn pair(&self) -> (u32, u32) {
        (self.low_vid, self.high_vid)
    }

    pub fn state(&self) -> EventState {
        self.state
    }

    pub fn is_confirmed(&self) -> bool {
        self.state == EventState::Confirmed
    }

    /// Append a simultaneous sample pair.
    ///
    /// Panics if the snapshots are from different steps, are not strictly
    /// newer than the last pair, or carry ids other than this event's.
    pub fn add_sample(&mut self, v1: VehicleSnapshot, v2: VehicleSnapshot) {
        assert_eq!(
            v1.time, v2.time,
            "event samples must come from the same time step"
        );
        if let Some(last) = self.low_samples.last() {
            assert!(
                v1.time > last.time,
                "event samples out of order: {} <= {}",
                v1.time,
                last.time
            );
        }
        let (low, high) = if v1.id < v2.id { (v1, v2) } else { (v2, v1) };
        assert!(
            low.id == self.low_vid && high.id == self.high_vid,
            "sample pair ({}, {}) does not belong to event ({}, {})",
            low.id,
            high.id,
            self.low_vid,
            self.high_vid
        );
        self.pre_time_step = v1.time;
        self.low_samples.push(low);
        self.high_samples.push(high);
    }

    /// Advance the event to `t_current`.
    ///
    /// Catches samples up through the store's successor chain, runs the
    /// TTC sweep while open, then the PET search, then the closure check.
    /// Returns `Ok(false)` once the event has closed (confirmed or
    /// discarded).
    pub fn update(
        &mut self,
        store: &TrajectoryStore,
        t_current: f32,
        mut predictors: Option<&mut Predictors>,
    ) -> Result<bool> {
        let mut i_last = self.low_samples.len() as isize - 1;
        if i_last < 0 {
            return Ok(false);
        }

        // catch up to the analysis step; a vanished successor means the
        // pair is gone and the event starts closing
        while self.pre_time_step < t_current {
            let lo = self.low_samples[i_last as usize];
            let hi = self.high_samples[i_last as usize];
            match (store.successor(&lo), store.successor(&hi)) {
                (Some(lo_next), Some(hi_next)) => {
                    self.add_sample(*lo_next, *hi_next);
                    i_last += 1;
                }
                _ => {
                    if self.state == EventState::Open {
                        trace!(
                            "pair ({}, {}) left the input at t={}",
                            self.low_vid,
                            self.high_vid,
                            self.pre_time_step
                        );
                        self.state = EventState::Closing;
                    }
                    break;
                }
            }
        }

        let v_lo = self.low_samples[i_last as usize];
        let v_hi = self.high_samples[i_last as usize];

        if self.state == EventState::Open {
            self.ttc_sweep(store, &v_lo, &v_hi, t_current)?;
        }

        self.pet_search(&v_lo, &v_hi, i_last, t_current);

        if self.state == EventState::Closing {
            let exhausted = self.pet_complete
                || t_current - self.last_ttc >= self.params.max_pet
                || self.last_pet_idx >= self.last_ttc_idx;
            if exhausted {
                self.pet_complete = true;
                if self.pet < self.params.max_pet {
                    self.state = EventState::Confirmed;
                    self.calc_measures(predictors.as_deref_mut());
                    debug!(
                        "event ({}, {}) confirmed: TTC={} PET={}",
                        self.low_vid, self.high_vid, self.ttc, self.pet
                    );
                } else {
                    self.state = EventState::Discarded;
                }
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Sweep look-ahead times downward from the maximum, projecting both
    /// footprints, and keep the smallest time of the first contiguous
    /// colliding run. No collision at any look-ahead starts the closing
    /// phase.
    fn ttc_sweep(
        &mut self,
        store: &TrajectoryStore,
        v_lo: &VehicleSnapshot,
        v_hi: &VehicleSnapshot,
        t_current: f32,
    ) -> Result<()> {
        let mut is_collision = false;
        let mut step_ttc = INVALID_SSM_VALUE;
        let i_last = self.low_samples.len() as isize - 1;

        let mut ttc = self.params.max_ttc;
        while ttc > -0.01 {
            if ttc < 0.0 {
                ttc = 0.0;
            }
            let lo_proj = v_lo.project(store, ttc, self.params.max_pet)?;
            let hi_proj = v_hi.project(store, ttc, self.params.max_pet)?;
            if lo_proj.is_collided(&hi_proj) {
                is_collision = true;
                step_ttc = ttc;
                self.last_ttc = t_current;
                self.last_ttc_idx = i_last;
            } else if is_collision {
                break;
            }
            ttc -= TTC_STEP_SIZE;
        }

        if is_collision {
            if step_ttc < self.ttc {
                self.ttc = step_ttc;
                self.t_min_ttc = t_current;
            }
            self.max_s = self.max_s.max(v_lo.speed).max(v_hi.speed);
        } else {
            self.state = EventState::Closing;
        }
        Ok(())
    }

    /// Two-sided search for the latest arrival overlapping an earlier
    /// occupancy of the other vehicle. Indices at or before the last
    /// improvement are never rescanned for a better PET; a PET under
    /// 10 ms completes the search outright.
    fn pet_search(
        &mut self,
        v_lo: &VehicleSnapshot,
        v_hi: &VehicleSnapshot,
        i_last: isize,
        t_current: f32,
    ) {
        if !self.pet_complete
            && (self.pet == INVALID_SSM_VALUE || self.second_vid == self.high_vid as i32)
        {
            let start = (self.last_pet_idx + 1).max(0);
            for i in start..=i_last.min(self.last_ttc_idx) {
                let lo_prev = &self.low_samples[i as usize];
                if v_hi.is_collided(lo_prev) {
                    let pet = (v_hi.time - lo_prev.time).max(0.0);
                    if pet < self.pet {
                        self.pet = pet;
                        let c = lo_prev.center();
                        self.x_min_pet = c.x;
                        self.y_min_pet = c.y;
                        self.z_min_pet = lo_prev.center_z();
                        if pet < 0.01 {
                            self.pet_complete = true;
                        }
                        self.first_vid = self.low_vid as i32;
                        self.second_vid = self.high_vid as i32;
                        self.last_pet_idx = i;
                    }
                    if self.first_pet <= 0.0 {
                        self.first_pet = t_current;
                    }
                    self.last_pet = t_current;
                }
            }
        }
        if !self.pet_complete
            && (self.pet == INVALID_SSM_VALUE || self.second_vid == self.low_vid as i32)
        {
            let start = (self.last_pet_idx + 1).max(0);
            for i in start..=i_last.min(self.last_ttc_idx) {
                let hi_prev = &self.high_samples[i as usize];
                if v_lo.is_collided(hi_prev) {
                    let pet = (v_lo.time - hi_prev.time).max(0.0);
                    if pet < self.pet {
                        self.pet = pet;
                        let c = hi_prev.center();
                        self.x_min_pet = c.x;
                        self.y_min_pet = c.y;
                        self.z_min_pet = hi_prev.center_z();
                        if pet < 0.01 {
                            self.pet_complete = true;
                        }
                        self.first_vid = self.high_vid as i32;
                        self.second_vid = self.low_vid as i32;
                        self.last_pet_idx = i;
                    }
                    if self.first_pet <= 0.0 {
                        self.first_pet = t_current;
                    }
                    self.last_pet = t_current;
                }
            }
        }
    }

    /// Derive the remaining measures once the conflict is confirmed.
    fn calc_measures(&mut self, predictors: Option<&mut Predictors>) {
        // deceleration rate of the second (trailing) vehicle over the
        // encroachment interval
        if self.second_vid >= 0 {
            let sec = if self.second_vid == self.high_vid as i32 {
                &self.high_samples
            } else {
                &self.low_samples
            };
            let mut min_ar = INVALID_SSM_VALUE;
            for v in sec {
                if v.time > self.last_pet {
                    break;
                }
                let ar = v.acceleration;
                if ar < 0.0 && self.dr == INVALID_SSM_VALUE {
                    self.dr = ar;
                }
                if ar < min_ar {
                    min_ar = ar;
                }
            }
            if self.dr == INVALID_SSM_VALUE {
                self.dr = min_ar;
            }
            self.max_d = min_ar;
        }

        let (first, second) = if self.first_vid == self.high_vid as i32 {
            (&self.high_samples, &self.low_samples)
        } else {
            (&self.low_samples, &self.high_samples)
        };

        let mut m1 = 1.0f32;
        let mut m2 = 1.0f32;
        let mut final_first_link = 0;
        let mut final_first_lane = 0;
        let mut final_second_link = 0;
        let mut final_second_lane = 0;
        let mut v1st: Option<&VehicleSnapshot> = None;
        let mut v2nd: Option<&VehicleSnapshot> = None;

        for (f, s) in first.iter().zip(second.iter()) {
            v1st = Some(f);
            v2nd = Some(s);
            let t = f.time;
            if t == self.first_ttc {
                let fc = f.center();
                let sc = s.center();
                self.first_csp = (fc.x, fc.y);
                self.first_link = f.link;
                self.first_lane = f.lane as i32;
                self.second_csp = (sc.x, sc.y);
                self.second_link = s.link;
                self.second_lane = s.lane as i32;
                self.first_v_min_ttc = f.speed;
                self.second_v_min_ttc = s.speed;
                self.first_length = f.length;
                self.first_width = f.width;
                self.second_length = s.length;
                self.second_width = s.width;
                m1 = self.first_length * self.first_width;
                m2 = self.second_length * self.second_width;
            }
            if t == self.last_pet {
                final_first_link = f.link;
                final_first_lane = f.lane as i32;
                final_second_link = s.link;
                final_second_lane = s.lane as i32;
                let fc = f.center();
                let sc = s.center();
                self.first_cep = (fc.x, fc.y);
                self.second_cep = (sc.x, sc.y);
                break;
            }
        }

        // headings from start-to-end displacement; a stationary vehicle
        // falls back to its body axis
        let mut d_first = (
            self.first_cep.0 - self.first_csp.0,
            self.first_cep.1 - self.first_csp.1,
        );
        if d_first == (0.0, 0.0) {
            if let Some(v) = v1st {
                d_first = (v.front.x - v.rear.x, v.front.y - v.rear.y);
            }
        }
        self.first_heading = heading_degrees(d_first.0, d_first.1);

        let mut d_second = (
            self.second_cep.0 - self.second_csp.0,
            self.second_cep.1 - self.second_csp.1,
        );
        if d_second == (0.0, 0.0) {
            if let Some(v) = v2nd {
                d_second = (v.front.x - v.rear.x, v.front.y - v.rear.y);
            }
        }
        self.second_heading = heading_degrees(d_second.0, d_second.1);

        self.conflict_angle = self.second_heading - self.first_heading;
        if self.conflict_angle > 180.0 {
            self.conflict_angle -= 360.0;
        } else if self.conflict_angle < -180.0 {
            self.conflict_angle += 360.0;
        }
        let abs_angle = self.conflict_angle.abs();

        self.conflict_type = self.classify(
            abs_angle,
            final_first_link,
            final_first_lane,
            final_second_link,
            final_second_lane,
        );

        self.clock_angle = clock_angle_string(self.conflict_angle);

        // area-weighted momentum exchange at the minimum-TTC speeds
        let norm1 = (d_first.0 * d_first.0 + d_first.1 * d_first.1).sqrt();
        let norm2 = (d_second.0 * d_second.0 + d_second.1 * d_second.1).sqrt();
        let (vx1, vy1) = if norm1 > 0.0 {
            (
                self.first_v_min_ttc * d_first.0 / norm1,
                self.first_v_min_ttc * d_first.1 / norm1,
            )
        } else {
            (0.0, 0.0)
        };
        let (vx2, vy2) = if norm2 > 0.0 {
            (
                self.second_v_min_ttc * d_second.0 / norm2,
                self.second_v_min_ttc * d_second.1 / norm2,
            )
        } else {
            (0.0, 0.0)
        };

        let (pcx, pcy) = if m1 + m2 > 0.0 {
            (
                (m1 * vx1 + m2 * vx2) / (m1 + m2),
                (m1 * vy1 + m2 * vy2) / (m1 + m2),
            )
        } else {
            (0.0, 0.0)
        };
        self.post_crash_v = (pcx * pcx + pcy * pcy).sqrt();
        self.post_crash_heading = heading_degrees(pcx, pcy);

        self.first_delta_v = ((pcx - vx1).powi(2) + (pcy - vy1).powi(2)).sqrt();
        self.second_delta_v = ((pcx - vx2).powi(2) + (pcy - vy2).powi(2)).sqrt();
        self.max_delta_v = self.first_delta_v.max(self.second_delta_v);

        let dxs = vx1 - vx2;
        let dys = vy1 - vy2;
        self.delta_s = (dxs * dxs + dys * dys).sqrt();

        if self.params.calc_puea {
            if let Some(p) = predictors {
                let s1 = PredictedState {
                    pos: DVec2::new(self.first_csp.0 as f64, self.first_csp.1 as f64),
                    vel: DVec2::new(vx1 as f64, vy1 as f64),
                };
                let s2 = PredictedState {
                    pos: DVec2::new(self.second_csp.0 as f64, self.second_csp.1 as f64),
                    vel: DVec2::new(vx2 as f64, vy2 as f64),
                };
                p.normal_adaptation.calc_mttc_mpet(
                    s1,
                    s2,
                    self.params.collision_threshold,
                    self.total_steps,
                    &mut self.m_ttc,
                    &mut self.m_pet,
                );
                self.puea = p.evasive_action.calc_puea(
                    s1,
                    s2,
                    self.params.collision_threshold,
                    self.total_steps,
                );
            }
        }
    }

    /// Conflict-type decision from link/lane agreement at the start and
    /// end of the event, with the angle thresholds as the tie breaker.
    /// Unknown links (id 0) force the angle-only classification.
    fn classify(
        &self,
        abs_angle: f32,
        final_first_link: i32,
        final_first_lane: i32,
        final_second_link: i32,
        final_second_lane: i32,
    ) -> ConflictType {
        let by_angle = |rear_end_only: bool| {
            if abs_angle < self.params.rear_end_angle {
                ConflictType::RearEnd
            } else if !rear_end_only && abs_angle > self.params.crossing_angle {
                ConflictType::Crossing
            } else {
                ConflictType::LaneChange
            }
        };

        if self.first_link == 0
            || self.second_link == 0
            || final_first_link == 0
            || final_second_link == 0
        {
            return by_angle(false);
        }

        let same_start =
            self.first_link == self.second_link && self.first_lane == self.second_lane;
        let first_kept_link = self.first_link == final_first_link;
        let second_kept_link = self.second_link == final_second_link;
        let first_changed_lane = first_kept_link && self.first_lane != final_first_lane;
        let second_changed_lane = second_kept_link && self.second_lane != final_second_lane;

        if same_start {
            if first_kept_link
                && self.first_lane == final_first_lane
                && second_kept_link
                && self.second_lane == final_second_lane
            {
                ConflictType::RearEnd
            } else if first_changed_lane || second_changed_lane {
                ConflictType::LaneChange
            } else {
                by_angle(true)
            }
        } else if final_first_link == final_second_link
            && final_first_lane == final_second_lane
            && (first_changed_lane || second_changed_lane)
        {
            ConflictType::LaneChange
        } else {
            by_angle(false)
        }
    }

    pub fn ttc(&self) -> f32 {
        self.ttc
    }

    pub fn pet(&self) -> f32 {
        self.pet
    }

    pub fn first_vid(&self) -> i32 {
        if self.first_vid >= 0 {
            self.first_vid
        } else {
            self.low_vid as i32
        }
    }

    pub fn second_vid(&self) -> i32 {
        if self.second_vid >= 0 {
            self.second_vid
        } else {
            self.high_vid as i32
        }
    }

    /// Materialize the full measure record. Meaningful only once the
    /// event is confirmed.
    pub fn to_conflict(&self, trj_file: &str) -> Conflict {
        Conflict {
            trj_file: trj_file.to_owned(),
            t_min_ttc: self.t_min_ttc,
            x_min_pet: self.x_min_pet,
            y_min_pet: self.y_min_pet,
            z_min_pet: self.z_min_pet,
            ttc: self.ttc,
            pet: self.pet,
            max_s: self.max_s,
            delta_s: self.delta_s,
            dr: self.dr,
            max_d: self.max_d,
            max_delta_v: self.max_delta_v,
            conflict_angle: self.conflict_angle,
            clock_angle: self.clock_angle.clone(),
            conflict_type: self.conflict_type,
            post_crash_v: self.post_crash_v,
            post_crash_heading: self.post_crash_heading,
            first_vid: self.first_vid(),
            first_link: self.first_link,
            first_lane: self.first_lane,
            first_length: self.first_length,
            first_width: self.first_width,
            first_heading: self.first_heading,
            first_v_min_ttc: self.first_v_min_ttc,
            first_delta_v: self.first_delta_v,
            x_first_csp: self.first_csp.0,
            y_first_csp: self.first_csp.1,
            x_first_cep: self.first_cep.0,
            y_first_cep: self.first_cep.1,
            second_vid: self.second_vid(),
            second_link: self.second_link,
            second_lane: self.second_lane,
            second_length: self.second_length,
            second_width: self.second_width,
            second_heading: self.second_heading,
            second_v_min_ttc: self.second_v_min_ttc,
            second_delta_v: self.second_delta_v,
            x_second_csp: self.second_csp.0,
            y_second_csp: self.second_csp.1,
            x_second_cep: self.second_cep.0,
            y_second_cep: self.second_cep.1,
            puea: self.puea,
            m_ttc: self.m_ttc,
            m_pet: self.m_pet,
        }
    }
}

/// Displacement direction in degrees, normalized to [0, 360).
fn heading_degrees(dx: f32, dy: f32) -> f32 {
    let mut deg = dy.atan2(dx).to_degrees();
    if deg < 0.0 {
        deg += 360.0;
    }
    deg
}

/// Conflict angle rendered as a clock face seen from the first driver:
/// 12:00 is head-on, 6:00 directly behind.
fn clock_angle_string(conflict_angle: f32) -> String {
    let mut clock = 6.0 - conflict_angle / 30.0;
    if (0.0..1.0).contains(&clock) {
        clock += 12.0;
    }
    let hours = clock.floor() as i32;
    let minutes = ((60.0 * (clock - hours as f32) + 0.5) as i32).min(59);
    format!("{hours}:{minutes:02}")
}
