//! Vehicle footprints and the trailing window of time-step batches.
//!
//! A [`VehicleSnapshot`] is one vehicle at one time step: the oriented
//! rectangle spanned by its bumper points and width, plus its axis-aligned
//! bounding box. Snapshots never reference each other directly; the
//! temporal-successor relation is a lookup through [`TrajectoryStore`],
//! which owns the batches as an arena and evicts them from the front as
//! the analysis window advances.

use std::collections::HashMap;

use glam::Vec2;

use crate::error::{AnalysisError, Result};
use crate::geometry::{perp_offset, segments_intersect};
use crate::trj::VehicleRecord;

/// Vehicles whose centers are more than this many length-units apart in
/// elevation are on separate levels and can never collide.
const Z_LEVEL_SEPARATION: f32 = 5.0;

/// Corner order of the oriented rectangle.
const FRONT_LEFT: usize = 0;
const FRONT_RIGHT: usize = 1;
const REAR_RIGHT: usize = 2;
const REAR_LEFT: usize = 3;

/// One vehicle's geometric state at one time step.
#[derive(Debug, Clone, Copy)]
pub struct VehicleSnapshot {
    pub id: u32,
    pub link: i32,
    pub lane: i8,
    /// Seconds since the start of the recording.
    pub time: f32,
    /// Absolute index of the owning time-step batch.
    pub step_seq: u64,
    pub front: Vec2,
    pub rear: Vec2,
    pub front_z: f32,
    pub rear_z: f32,
    /// Length/width in distance units (feet or meters).
    pub length: f32,
    pub width: f32,
    pub speed: f32,
    pub acceleration: f32,
    /// Distance units per unit of X or Y.
    pub scale: f32,
    scaled_length: f32,
    scaled_width: f32,
    corners: [Vec2; 4],
    aabb_min: Vec2,
    aabb_max: Vec2,
}

impl VehicleSnapshot {
    pub fn new(record: &VehicleRecord, time: f32, step_seq: u64, scale: f32) -> Self {
        let mut v = VehicleSnapshot {
            id: record.id,
            link: record.link,
            lane: record.lane,
            time,
            step_seq,
            front: Vec2::ZERO,
            rear: Vec2::ZERO,
            front_z: record.front_z,
            rear_z: record.rear_z,
            length: record.length,
            width: record.width,
            speed: record.speed,
            acceleration: record.acceleration,
            scale,
            scaled_length: if scale > 0.0 { record.length / scale } else { 0.0 },
            scaled_width: if scale > 0.0 { record.width / scale } else { 0.0 },
            corners: [Vec2::ZERO; 4],
            aabb_min: Vec2::ZERO,
            aabb_max: Vec2::ZERO,
        };
        v.set_position(
            Vec2::new(record.front_x, record.front_y),
            Vec2::new(record.rear_x, record.rear_y),
        );
        v
    }

    /// Place the footprint from bumper midpoints, deriving the four
    /// oriented-rectangle corners and the bounding box.
    pub fn set_position(&mut self, front: Vec2, rear: Vec2) {
        self.front = front;
        self.rear = rear;

        let half_width = self.scaled_width / 2.0;
        let d = perp_offset(front, rear, half_width);
        self.corners[FRONT_RIGHT] = front + d;
        self.corners[FRONT_LEFT] = front - d;

        let d = perp_offset(rear, front, half_width);
        self.corners[REAR_LEFT] = rear + d;
        self.corners[REAR_RIGHT] = rear - d;

        self.aabb_min = self.corners[0];
        self.aabb_max = self.corners[0];
        for c in &self.corners[1..] {
            self.aabb_min = self.aabb_min.min(*c);
            self.aabb_max = self.aabb_max.max(*c);
        }
    }

    pub fn center(&self) -> Vec2 {
        self.rear + (self.front - self.rear) / 2.0
    }

    pub fn center_z(&self) -> f32 {
        self.rear_z + (self.front_z - self.rear_z) / 2.0
    }

    pub fn corners(&self) -> &[Vec2; 4] {
        &self.corners
    }

    pub fn aabb_min(&self) -> Vec2 {
        self.aabb_min
    }

    pub fn aabb_max(&self) -> Vec2 {
        self.aabb_max
    }

    fn center_distance(&self, other: &VehicleSnapshot) -> f32 {
        (self.center() - other.center()).length()
    }

    /// Exact oriented-rectangle overlap test.
    ///
    /// Rejects cheaply on z-level separation and disjoint bounding boxes,
    /// then runs all 16 edge-pair intersection tests. A rectangle fully
    /// containing the other without edge crossings does not occur at the
    /// sampled step sizes, so edge tests are sufficient.
    pub fn is_collided(&self, other: &VehicleSnapshot) -> bool {
        if (self.center_z() - other.center_z()).abs() > Z_LEVEL_SEPARATION {
            return false;
        }
        if self.aabb_max.x < other.aabb_min.x
            || self.aabb_min.x > other.aabb_max.x
            || self.aabb_max.y < other.aabb_min.y
            || self.aabb_min.y > other.aabb_max.y
        {
            return false;
        }

        for i in 0..4 {
            let a0 = self.corners[i];
            let a1 = self.corners[(i + 1) % 4];
            for j in 0..4 {
                let b0 = other.corners[j];
                let b1 = other.corners[(j + 1) % 4];
                if segments_intersect(a0, a1, b0, b1) {
                    return true;
                }
            }
        }
        false
    }

    /// Project this footprint `ttc` seconds ahead along its recorded
    /// trajectory chain.
    ///
    /// Walks successor snapshots accumulating travel distance until the
    /// look-ahead distance is consumed, then interpolates a footprint
    /// between the bounding snapshots. If the chain ends first:
    /// extrapolate along the last known heading while less than `max_pet`
    /// seconds have elapsed, otherwise return the last real snapshot
    /// unprojected.
    pub fn project(
        &self,
        store: &TrajectoryStore,
        ttc: f32,
        max_pet: f32,
    ) -> Result<VehicleSnapshot> {
        if self.scale <= 0.0 {
            return Err(AnalysisError::Input(
                "vehicle projection not possible: footprint scale is unspecified".into(),
            ));
        }
        let full_dist = ttc * self.speed / self.scale;
        let mut remn_dist = full_dist;

        let mut last = *self;
        while remn_dist > 0.0 {
            match store.successor(&last) {
                Some(next) => {
                    let step_dist = next.center_distance(&last);
                    if step_dist <= 0.0 {
                        return Ok(last);
                    } else if remn_dist > step_dist {
                        last = *next;
                        remn_dist -= step_dist;
                    } else {
                        let half_len = self.scaled_length / 2.0;
                        let rear_scale = (remn_dist - half_len) / step_dist;
                        let front_scale = (remn_dist + half_len) / step_dist;
                        let last_c = last.center();
                        let delta = next.center() - last_c;

                        let mut v = *self;
                        v.set_position(last_c + front_scale * delta, last_c + rear_scale * delta);
                        return Ok(v);
                    }
                }
                None => {
                    let proj_time = last.time - self.time;
                    if proj_time < max_pet {
                        let rem_time = ttc - proj_time;
                        let heading = (last.front - last.rear) / self.scaled_length;
                        let velocity = self.speed * heading;

                        let mut v = *self;
                        v.set_position(
                            last.front + rem_time * velocity,
                            last.rear + rem_time * velocity,
                        );
                        return Ok(v);
                    }
                    return Ok(last);
                }
            }
        }
        Ok(last)
    }
}

/// All vehicle snapshots read for one time step.
#[derive(Debug, Default)]
pub struct StepBatch {
    pub time: f32,
    pub step_seq: u64,
    by_id: HashMap<u32, usize>,
    snapshots: Vec<VehicleSnapshot>,
}

impl StepBatch {
    pub fn new(time: f32, step_seq: u64) -> Self {
        StepBatch {
            time,
            step_seq,
            by_id: HashMap::new(),
            snapshots: Vec::new(),
        }
    }

    /// Insert a snapshot; the first record wins on duplicate ids.
    pub fn add(&mut self, v: VehicleSnapshot) {
        if !self.by_id.contains_key(&v.id) {
            self.by_id.insert(v.id, self.snapshots.len());
            self.snapshots.push(v);
        }
    }

    pub fn get(&self, id: u32) -> Option<&VehicleSnapshot> {
        self.by_id.get(&id).map(|&i| &self.snapshots[i])
    }

    /// Snapshots in ingestion order.
    pub fn vehicles(&self) -> &[VehicleSnapshot] {
        &self.snapshots
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

/// Bounded trailing window of step batches.
///
/// Batches are pushed at the back as steps are read and popped from the
/// front once the analysis step has consumed them; the window never grows
/// past the maximum-PET horizon plus one read-ahead step. Successor lookup
/// replaces the next-pointer chain of a linked snapshot design.
#[derive(Debug, Default)]
pub struct TrajectoryStore {
    batches: std::collections::VecDeque<StepBatch>,
    /// Absolute step index of the front batch.
    base_seq: u64,
    next_seq: u64,
}

impl TrajectoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.batches.clear();
        self.base_seq = self.next_seq;
    }

    pub fn push(&mut self, mut batch: StepBatch) -> u64 {
        let seq = self.next_seq;
        batch.step_seq = seq;
        for v in batch.snapshots.iter_mut() {
            v.step_seq = seq;
        }
        if self.batches.is_empty() {
            self.base_seq = seq;
        }
        self.next_seq += 1;
        self.batches.push_back(batch);
        seq
    }

    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    pub fn front(&self) -> Option<&StepBatch> {
        self.batches.front()
    }

    pub fn back(&self) -> Option<&StepBatch> {
        self.batches.back()
    }

    pub fn pop_front(&mut self) {
        if self.batches.pop_front().is_some() {
            self.base_seq += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    pub fn batch_at(&self, step_seq: u64) -> Option<&StepBatch> {
        if step_seq < self.base_seq {
            return None;
        }
        self.batches.get((step_seq - self.base_seq) as usize)
    }

    /// The same vehicle one step later, if it is still in the input.
    pub fn successor(&self, v: &VehicleSnapshot) -> Option<&VehicleSnapshot> {
        self.batch_at(v.step_seq + 1).and_then(|b| b.get(v.id))
    }
}
