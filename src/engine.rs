//! Orchestration of a full analysis run.
//!
//! Records stream in one time step at a time; detection for a step only
//! runs once the read position is a full maximum-PET horizon ahead, so
//! footprint projections always have real trajectory data to walk. Each
//! detection step projects every vehicle a maximum-TTC ahead, buckets the
//! projections in the proximity grid, routes colliding pairs into their
//! events, then advances every open event and retires the closed ones.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use log::{debug, info, trace, warn};

use crate::config::AnalysisConfig;
use crate::conflict::Conflict;
use crate::error::{AnalysisError, Result};
use crate::event::{ConflictEvent, EventParams};
use crate::grid::ProximityGrid;
use crate::prediction::{PredictionLimits, Predictors};
use crate::summary::SafetySummary;
use crate::trj::{Dimensions, TrjRecord, Units, VehicleRecord};
use crate::vehicle::{StepBatch, TrajectoryStore, VehicleSnapshot};

/// Grid cell edge in distance units, divided by the scale to get cells
/// in x-y units.
const CELL_SIZE_ENGLISH: f32 = 50.0;
const CELL_SIZE_METRIC: f32 = 15.0;

/// Surrogate-conflict detection over one or more trajectory sources.
pub struct ConflictEngine {
    config: AnalysisConfig,
    event_params: EventParams,
    dims: Option<Dimensions>,
    observed_bounds: Option<(i32, i32, i32, i32)>,
    grid: Option<ProximityGrid>,
    predictors: Option<Predictors>,

    store: TrajectoryStore,
    events: BTreeMap<(u32, u32), ConflictEvent>,
    pending: Option<StepBatch>,
    read_time: f32,
    analysis_time: f32,
    source: String,

    conflicts: Vec<Conflict>,
    per_source: BTreeMap<String, Vec<Conflict>>,
    summary: SafetySummary,
    analysis_seconds: f64,
}

impl ConflictEngine {
    pub fn new(config: AnalysisConfig) -> Result<ConflictEngine> {
        config.validate()?;
        let event_params = EventParams {
            max_ttc: config.max_ttc,
            max_pet: config.max_pet,
            rear_end_angle: config.rear_end_angle,
            crossing_angle: config.crossing_angle,
            calc_puea: config.probabilistic,
            collision_threshold: 0.0,
        };
        Ok(ConflictEngine {
            config,
            event_params,
            dims: None,
            observed_bounds: None,
            grid: None,
            predictors: None,
            store: TrajectoryStore::new(),
            events: BTreeMap::new(),
            pending: None,
            read_time: -1.0,
            analysis_time: -1.0,
            source: String::new(),
            conflicts: Vec::new(),
            per_source: BTreeMap::new(),
            summary: SafetySummary::new(),
            analysis_seconds: 0.0,
        })
    }

    /// Run detection over one record stream. Conflicts and summary
    /// aggregates accumulate across successive sources.
    pub fn analyze_source<I>(&mut self, name: &str, records: I) -> Result<()>
    where
        I: IntoIterator<Item = Result<TrjRecord>>,
    {
        let started = Instant::now();
        self.begin_source(name);

        for record in records {
            match record? {
                TrjRecord::Format(format) => {
                    debug!("{name}: format version {}", format.version);
                }
                TrjRecord::Dimensions(dims) => self.apply_dimensions(dims)?,
                TrjRecord::TimeStep(t) => self.set_time_step(t)?,
                TrjRecord::Vehicle(rec) => self.add_vehicle(rec)?,
            }
        }

        // analyze the final read step, then force every surviving event
        // through its closure check
        self.analyze_one_step()?;
        self.flush_events()?;

        self.analysis_seconds += started.elapsed().as_secs_f64();
        info!(
            "{name}: {} conflicts confirmed",
            self.per_source.get(name).map_or(0, Vec::len)
        );
        Ok(())
    }

    fn begin_source(&mut self, name: &str) {
        self.source = name.to_owned();
        self.store.clear();
        self.events.clear();
        self.pending = None;
        self.read_time = -1.0;
        self.analysis_time = -1.0;
    }

    fn apply_dimensions(&mut self, dims: Dimensions) -> Result<()> {
        dims.validate()?;
        self.observed_bounds = Some(match self.observed_bounds {
            Some((x0, y0, x1, y1)) => (
                x0.min(dims.min_x),
                y0.min(dims.min_y),
                x1.max(dims.max_x),
                y1.max(dims.max_y),
            ),
            None => (dims.min_x, dims.min_y, dims.max_x, dims.max_y),
        });
        let cell = match dims.units {
            Units::English => (CELL_SIZE_ENGLISH / dims.scale) as i32,
            Units::Metric => (CELL_SIZE_METRIC / dims.scale) as i32,
        };
        self.grid = Some(ProximityGrid::new(
            dims.min_x, dims.min_y, dims.max_x, dims.max_y, cell,
        )?);

        if self.config.probabilistic {
            let limits = PredictionLimits::for_units(dims.units);
            self.event_params.collision_threshold = limits.collision_threshold;
            let seed = self.config.seed.unwrap_or_else(rand::random);
            self.predictors = Some(Predictors::new(&limits, seed)?);
        }
        self.dims = Some(dims);
        Ok(())
    }

    fn set_time_step(&mut self, t: f32) -> Result<()> {
        self.analyze_one_step()?;
        if t % 100.0 == 0.0 {
            debug!("{}: reading t={t}", self.source);
        }
        self.pending = Some(StepBatch::new(t, 0));
        Ok(())
    }

    fn add_vehicle(&mut self, rec: VehicleRecord) -> Result<()> {
        let dims = self.dims.ok_or_else(|| {
            AnalysisError::Input("vehicle record before observation area dimensions".into())
        })?;
        let batch = self.pending.as_mut().ok_or_else(|| {
            AnalysisError::Input("vehicle record before any time step".into())
        })?;

        let cx = (rec.front_x + rec.rear_x) / 2.0;
        let cy = (rec.front_y + rec.rear_y) / 2.0;
        if cx < dims.min_x as f32
            || cx > dims.max_x as f32
            || cy < dims.min_y as f32
            || cy > dims.max_y as f32
        {
            trace!("vehicle {} outside the observation area, dropped", rec.id);
            return Ok(());
        }

        batch.add(VehicleSnapshot::new(&rec, batch.time, 0, dims.scale));
        Ok(())
    }

    /// Commit the pending step and run detection for every step that has
    /// a full look-ahead horizon of data behind it.
    fn analyze_one_step(&mut self) -> Result<()> {
        let batch = match self.pending.take() {
            Some(b) => b,
            None => return Ok(()),
        };
        self.read_time = batch.time;
        if self.store.is_empty() {
            self.analysis_time = self.read_time - 1.0;
        }
        self.store.push(batch);

        while self.read_time - self.analysis_time >= self.event_params.max_pet {
            let front_time = match self.store.front() {
                Some(b) => b.time,
                None => break,
            };
            self.analysis_time = front_time;
            self.detect_conflicts()?;
            self.store.pop_front();
        }
        Ok(())
    }

    /// One detection pass over the oldest buffered step.
    fn detect_conflicts(&mut self) -> Result<()> {
        let grid = self.grid.as_mut().ok_or_else(|| {
            AnalysisError::Input("time step data before observation area dimensions".into())
        })?;
        grid.clear();

        let front = match self.store.front() {
            Some(b) => b,
            None => return Ok(()),
        };
        if !front.is_empty() {
            let vehicles = front.vehicles();
            let max_ttc = self.event_params.max_ttc;
            let max_pet = self.event_params.max_pet;
            let event_params = self.event_params;
            let store = &self.store;

            let next = AtomicUsize::new(0);
            let grid_mx = Mutex::new(grid);
            let events_mx = Mutex::new(&mut self.events);

            let workers = self.config.workers.min(vehicles.len()).max(1);
            let results = crossbeam::thread::scope(|s| {
                let handles: Vec<_> = (0..workers)
                    .map(|_| {
                        s.spawn(|_| -> Result<()> {
                            loop {
                                let i = next.fetch_add(1, Ordering::Relaxed);
                                if i >= vehicles.len() {
                                    return Ok(());
                                }
                                let v = &vehicles[i];
                                let proj = v.project(store, max_ttc, max_pet)?;
                                let crashes = grid_mx.lock().unwrap().insert(&proj);
                                for other_id in crashes {
                                    let actual = match front.get(other_id) {
                                        Some(a) => *a,
                                        None => continue,
                                    };
                                    let key =
                                        (v.id.min(other_id), v.id.max(other_id));
                                    let mut events = events_mx.lock().unwrap();
                                    match events.entry(key) {
                                        Entry::Occupied(mut e) => {
                                            e.get_mut().add_sample(actual, *v);
                                        }
                                        Entry::Vacant(slot) => {
                                            slot.insert(ConflictEvent::new(
                                                event_params,
                                                actual,
                                                *v,
                                            ));
                                        }
                                    }
                                }
                            }
                        })
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|h| h.join().unwrap())
                    .collect::<Vec<Result<()>>>()
            })
            .unwrap();
            for r in results {
                r?;
            }
        }

        self.update_events(self.analysis_time)
    }

    /// Advance every event to `t_current`, retiring the ones that close.
    fn update_events(&mut self, t_current: f32) -> Result<()> {
        let mut closed = Vec::new();
        for (key, event) in self.events.iter_mut() {
            if !event.update(&self.store, t_current, self.predictors.as_mut())? {
                closed.push(*key);
            }
        }
        for key in closed {
            if let Some(event) = self.events.remove(&key) {
                if event.is_confirmed() {
                    let conflict = event.to_conflict(&self.source);
                    self.summary.record(&self.source, &conflict);
                    self.per_source
                        .entry(self.source.clone())
                        .or_default()
                        .push(conflict.clone());
                    self.conflicts.push(conflict);
                } else {
                    trace!("event {key:?} discarded");
                }
            }
        }
        Ok(())
    }

    /// Close out events still open when the source ends.
    ///
    /// Walks the remaining trailing window step by step so open events
    /// keep sweeping TTC/PET over the data they already have, then drives
    /// any survivors past their closure horizon with an unreachable
    /// update time. No new events open during the flush.
    fn flush_events(&mut self) -> Result<()> {
        if !self.events.is_empty() {
            debug!(
                "{}: flushing {} events at end of input",
                self.source,
                self.events.len()
            );
        }
        while let Some(t) = self.store.front().map(|b| b.time) {
            if self.events.is_empty() {
                break;
            }
            self.analysis_time = t;
            self.update_events(t)?;
            self.store.pop_front();
        }
        if !self.events.is_empty() {
            self.update_events(f32::MAX)?;
        }
        if !self.events.is_empty() {
            warn!(
                "{}: {} events survived the end-of-input flush",
                self.source,
                self.events.len()
            );
            self.events.clear();
        }
        self.store.clear();
        Ok(())
    }

    /// Every confirmed conflict, across all analyzed sources.
    pub fn conflicts(&self) -> &[Conflict] {
        &self.conflicts
    }

    pub fn conflicts_for(&self, source: &str) -> &[Conflict] {
        self.per_source.get(source).map_or(&[], Vec::as_slice)
    }

    pub fn summary(&self) -> &SafetySummary {
        &self.summary
    }

    /// Union of every observation area seen so far, as
    /// `(min_x, min_y, max_x, max_y)` in scaled units.
    pub fn observed_bounds(&self) -> Option<(i32, i32, i32, i32)> {
        self.observed_bounds
    }

    /// Wall-clock seconds spent inside `analyze_source`.
    pub fn analysis_seconds(&self) -> f64 {
        self.analysis_seconds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::ConflictType;
    use crate::trj::{Endian, InputFormat, VehicleRecord};

    fn header(min: i32, max: i32) -> Vec<Result<TrjRecord>> {
        vec![
            Ok(TrjRecord::Format(InputFormat {
                endian: Endian::Little,
                version: 1.04,
                z_option: false,
            })),
            Ok(TrjRecord::Dimensions(Dimensions {
                units: Units::English,
                scale: 1.0,
                min_x: min,
                min_y: min,
                max_x: max,
                max_y: max,
            })),
        ]
    }

    fn vehicle(
        id: u32,
        link: i32,
        front: (f32, f32),
        rear: (f32, f32),
        speed: f32,
    ) -> TrjRecord {
        TrjRecord::Vehicle(VehicleRecord {
            id,
            link,
            lane: 1,
            front_x: front.0,
            front_y: front.1,
            rear_x: rear.0,
            rear_y: rear.1,
            length: 10.0,
            width: 6.0,
            speed,
            acceleration: 0.0,
            front_z: 0.0,
            rear_z: 0.0,
        })
    }

    fn engine() -> ConflictEngine {
        let mut config = AnalysisConfig::default();
        config.workers = 2;
        ConflictEngine::new(config).unwrap()
    }

    /// Follower overtaking a slow leader in the same lane.
    fn rear_end_records() -> Vec<Result<TrjRecord>> {
        let mut records = header(-100, 1000);
        let mut t = 0.0f32;
        while t <= 12.01 {
            records.push(Ok(TrjRecord::TimeStep(t)));
            let leader = 50.0 + 20.0 * t;
            let follower = 30.0 * t;
            records.push(Ok(vehicle(1, 1, (leader + 5.0, 0.0), (leader - 5.0, 0.0), 20.0)));
            records.push(Ok(vehicle(2, 1, (follower + 5.0, 0.0), (follower - 5.0, 0.0), 30.0)));
            t += 0.5;
        }
        records
    }

    #[test]
    fn rear_end_scenario_confirms_conflict() {
        let mut eng = engine();
        eng.analyze_source("rear_end.trj", rear_end_records()).unwrap();
        let conflicts = eng.conflicts();
        assert_eq!(conflicts.len(), 1);
        let c = &conflicts[0];
        assert_eq!(c.conflict_type, ConflictType::RearEnd);
        assert!(c.ttc <= 1.5, "TTC {} above the threshold", c.ttc);
        assert!(c.ttc >= 0.0);
        // the bumper gap is 40 - 10t at closing speed 10, so the recorded
        // minimum TTC must track gap/speed at its own timestamp to within
        // one sweep step; the pair meets at t=4, where both reach zero
        let kinematic_ttc = ((40.0 - 10.0 * c.t_min_ttc) / 10.0_f32).max(0.0);
        assert!(
            (c.ttc - kinematic_ttc).abs() <= 0.1 + 1e-4,
            "TTC {} at t={} disagrees with kinematic {}",
            c.ttc,
            c.t_min_ttc,
            kinematic_ttc
        );
        assert!(c.ttc <= 0.1, "minimum TTC {} should reach zero", c.ttc);
        assert!(c.pet < 5.0);
        assert!(c.pet >= 0.0);
        assert_eq!(c.max_s, 30.0);
        // one of the pair leads, the other trails
        let ids = [c.first_vid, c.second_vid];
        assert!(ids.contains(&1) && ids.contains(&2));
        assert_eq!(c.trj_file, "rear_end.trj");
    }

    #[test]
    fn crossing_scenario_classifies_by_angle() {
        // perpendicular paths through the origin on different links,
        // arriving 0.6 s apart
        let mut records = header(-300, 300);
        let mut t = 0.0f32;
        while t <= 12.01 {
            records.push(Ok(TrjRecord::TimeStep(t)));
            let x = 10.0 * t - 50.0;
            let y = 10.0 * t - 56.0;
            records.push(Ok(vehicle(1, 1, (x + 5.0, 0.0), (x - 5.0, 0.0), 10.0)));
            records.push(Ok(vehicle(2, 2, (0.0, y + 5.0), (0.0, y - 5.0), 10.0)));
            t += 0.5;
        }
        let mut eng = engine();
        eng.analyze_source("crossing.trj", records).unwrap();
        let conflicts = eng.conflicts();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].conflict_type, ConflictType::Crossing);
        assert!((conflicts[0].conflict_angle.abs() - 90.0).abs() < 1.0);
    }

    #[test]
    fn distant_vehicles_produce_no_conflicts() {
        let mut records = header(-100, 1000);
        let mut t = 0.0f32;
        while t <= 8.01 {
            records.push(Ok(TrjRecord::TimeStep(t)));
            records.push(Ok(vehicle(1, 1, (5.0, 0.0), (-5.0, 0.0), 0.0)));
            records.push(Ok(vehicle(2, 1, (505.0, 200.0), (495.0, 200.0), 0.0)));
            t += 0.5;
        }
        let mut eng = engine();
        eng.analyze_source("quiet.trj", records).unwrap();
        assert!(eng.conflicts().is_empty());
        assert_eq!(eng.summary().all.total(), 0);
    }

    #[test]
    fn out_of_bounds_vehicles_are_dropped_silently() {
        let mut records = header(0, 100);
        records.push(Ok(TrjRecord::TimeStep(0.0)));
        records.push(Ok(vehicle(1, 1, (605.0, 0.0), (595.0, 0.0), 10.0)));
        let mut eng = engine();
        eng.analyze_source("oob.trj", records).unwrap();
        assert!(eng.conflicts().is_empty());
    }

    #[test]
    fn vehicle_before_header_is_an_input_error() {
        let records = vec![
            Ok(TrjRecord::TimeStep(0.0)),
            Ok(vehicle(1, 1, (5.0, 0.0), (-5.0, 0.0), 10.0)),
        ];
        let mut eng = engine();
        assert!(eng.analyze_source("broken.trj", records).is_err());
    }

    #[test]
    fn summary_tracks_conflicts_per_source() {
        let mut eng = engine();
        eng.analyze_source("a.trj", rear_end_records()).unwrap();
        eng.analyze_source("b.trj", rear_end_records()).unwrap();
        assert_eq!(eng.conflicts().len(), 2);
        assert_eq!(eng.conflicts_for("a.trj").len(), 1);
        assert_eq!(eng.conflicts_for("b.trj").len(), 1);
        let summary = eng.summary();
        assert_eq!(summary.all.total(), 2);
        assert_eq!(summary.all.count_of(ConflictType::RearEnd), 2);
        assert_eq!(summary.per_source["a.trj"].total(), 1);
    }

    #[test]
    fn observed_bounds_union_across_sources() {
        let mut eng = engine();
        assert_eq!(eng.observed_bounds(), None);
        eng.analyze_source("a.trj", header(-100, 1000)).unwrap();
        assert_eq!(eng.observed_bounds(), Some((-100, -100, 1000, 1000)));
        eng.analyze_source("b.trj", header(-200, 500)).unwrap();
        assert_eq!(eng.observed_bounds(), Some((-200, -200, 1000, 1000)));
    }

    #[test]
    fn truncated_input_still_flushes_open_events() {
        // cut the rear-end scenario short right after the interaction
        // begins; the flush must still close and confirm the event
        let mut records = rear_end_records();
        records.truncate(2 + 3 * 17); // header + steps up to t = 8.0
        let mut eng = engine();
        eng.analyze_source("truncated.trj", records).unwrap();
        assert_eq!(eng.conflicts().len(), 1);
    }
}
