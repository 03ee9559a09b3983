//! Uniform spatial hash over the observation area.
//!
//! Projected footprints are bucketed into fixed-size square cells; only
//! co-occupants of a shared cell are tested with the exact rectangle
//! overlap, so each insert touches O(cells spanned) instead of O(vehicles).

use std::collections::BTreeMap;

use glam::Vec2;

use crate::error::{AnalysisError, Result};
use crate::vehicle::VehicleSnapshot;

/// Upper bound on the cell count, roughly 500 square miles at 50-foot
/// cells. Exceeding it means the recorded dimensions are implausible.
const MAX_CELLS: i64 = 5_575_680;

#[derive(Debug, Default)]
struct Cell {
    occupants: Vec<VehicleSnapshot>,
}

/// Grid of square cells covering the (expanded) observation area.
#[derive(Debug)]
pub struct ProximityGrid {
    /// Bounds as recorded in the input, before expansion.
    orig_min: Vec2,
    orig_max: Vec2,
    /// Bounds expanded outward to a whole number of cells.
    min: Vec2,
    cell_size: i32,
    nx: i32,
    ny: i32,
    cells: Vec<Cell>,
    used: Vec<usize>,
}

impl ProximityGrid {
    pub fn new(min_x: i32, min_y: i32, max_x: i32, max_y: i32, cell_size: i32) -> Result<Self> {
        let size = cell_size as f64;
        let min_x_exp = (min_x as f64 / size).floor() as i64 * cell_size as i64;
        let min_y_exp = (min_y as f64 / size).floor() as i64 * cell_size as i64;
        let max_x_exp = (max_x as f64 / size).ceil() as i64 * cell_size as i64;
        let max_y_exp = (max_y as f64 / size).ceil() as i64 * cell_size as i64;

        if min_x_exp >= max_x_exp {
            return Err(AnalysisError::Config(
                "zone width is too small; x-axis dimensions may be invalid".into(),
            ));
        }
        if min_y_exp >= max_y_exp {
            return Err(AnalysisError::Config(
                "zone height is too small; y-axis dimensions may be invalid".into(),
            ));
        }
        if cell_size < 1 {
            return Err(AnalysisError::Config(
                "analysis zone size is too small; dimensions are scaled with too many \
                 feet/meters per unit X or Y"
                    .into(),
            ));
        }

        let nx = ((max_x_exp - min_x_exp) / cell_size as i64) as i64;
        let ny = ((max_y_exp - min_y_exp) / cell_size as i64) as i64;
        if nx * ny > MAX_CELLS {
            return Err(AnalysisError::Config("safety analysis zone is too large".into()));
        }

        let mut cells = Vec::new();
        cells.resize_with((nx * ny) as usize, Cell::default);
        Ok(ProximityGrid {
            orig_min: Vec2::new(min_x as f32, min_y as f32),
            orig_max: Vec2::new(max_x as f32, max_y as f32),
            min: Vec2::new(min_x_exp as f32, min_y_exp as f32),
            cell_size,
            nx: nx as i32,
            ny: ny as i32,
            cells,
            used: Vec::new(),
        })
    }

    fn cell_index(&self, ix: i32, iy: i32) -> usize {
        (ix * self.ny + iy) as usize
    }

    /// Insert a projected footprint, returning the ids of already-present
    /// occupants whose rectangles overlap it.
    ///
    /// Footprints whose center lies outside the recorded (unexpanded)
    /// observation area are ignored entirely.
    pub fn insert(&mut self, v: &VehicleSnapshot) -> Vec<u32> {
        let c = v.center();
        if c.x < self.orig_min.x
            || c.x > self.orig_max.x
            || c.y < self.orig_min.y
            || c.y > self.orig_max.y
        {
            return Vec::new();
        }

        let size = self.cell_size as f32;
        let ix_min = (((v.aabb_min().x - self.min.x) / size).floor() as i32).max(0);
        let ix_max = (((v.aabb_max().x - self.min.x) / size).floor() as i32).min(self.nx - 1);
        let iy_min = (((v.aabb_min().y - self.min.y) / size).floor() as i32).max(0);
        let iy_max = (((v.aabb_max().y - self.min.y) / size).floor() as i32).min(self.ny - 1);

        // BTreeMap keyed by id so multi-cell co-occupants dedup and the
        // candidate order is stable across runs.
        let mut crashes: BTreeMap<u32, ()> = BTreeMap::new();
        for ix in ix_min..=ix_max {
            for iy in iy_min..=iy_max {
                let idx = self.cell_index(ix, iy);
                self.used.push(idx);
                let cell = &mut self.cells[idx];
                for other in &cell.occupants {
                    if v.is_collided(other) {
                        crashes.insert(other.id, ());
                    }
                }
                cell.occupants.push(*v);
            }
        }
        crashes.into_keys().collect()
    }

    /// Empty only the cells touched since the last clear.
    pub fn clear(&mut self) {
        for idx in self.used.drain(..) {
            self.cells[idx].occupants.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trj::VehicleRecord;

    fn snapshot(id: u32, front: (f32, f32), rear: (f32, f32)) -> VehicleSnapshot {
        let rec = VehicleRecord {
            id,
            link: 1,
            lane: 1,
            front_x: front.0,
            front_y: front.1,
            rear_x: rear.0,
            rear_y: rear.1,
            length: 12.0,
            width: 6.0,
            speed: 30.0,
            acceleration: 0.0,
            front_z: 0.0,
            rear_z: 0.0,
        };
        VehicleSnapshot::new(&rec, 0.0, 0, 1.0)
    }

    #[test]
    fn bounds_expand_to_whole_cells() {
        // 3..97 with cell 50 expands to 0..100, 2x2 cells
        let grid = ProximityGrid::new(3, 3, 97, 97, 50).unwrap();
        assert_eq!(grid.nx, 2);
        assert_eq!(grid.ny, 2);
    }

    #[test]
    fn degenerate_area_is_a_config_error() {
        assert!(matches!(
            ProximityGrid::new(100, 0, 100, 500, 50),
            Err(AnalysisError::Config(_))
        ));
        assert!(matches!(
            ProximityGrid::new(0, 0, 500, 500, 0),
            Err(AnalysisError::Config(_))
        ));
    }

    #[test]
    fn oversized_area_is_a_config_error() {
        assert!(matches!(
            ProximityGrid::new(0, 0, 2_000_000, 2_000_000, 1),
            Err(AnalysisError::Config(_))
        ));
    }

    #[test]
    fn overlapping_occupants_reported() {
        let mut grid = ProximityGrid::new(0, 0, 500, 500, 50).unwrap();
        assert!(grid.insert(&snapshot(1, (110.0, 100.0), (98.0, 100.0))).is_empty());
        let hits = grid.insert(&snapshot(2, (112.0, 101.0), (100.0, 101.0)));
        assert_eq!(hits, vec![1]);
    }

    #[test]
    fn same_cell_without_overlap_is_not_a_hit() {
        let mut grid = ProximityGrid::new(0, 0, 500, 500, 50).unwrap();
        grid.insert(&snapshot(1, (112.0, 105.0), (100.0, 105.0)));
        let hits = grid.insert(&snapshot(2, (112.0, 130.0), (100.0, 130.0)));
        assert!(hits.is_empty());
    }

    #[test]
    fn out_of_bounds_center_is_ignored() {
        let mut grid = ProximityGrid::new(0, 0, 500, 500, 50).unwrap();
        assert!(grid.insert(&snapshot(1, (606.0, 100.0), (594.0, 100.0))).is_empty());
        // the overlapping in-bounds vehicle sees nothing
        let hits = grid.insert(&snapshot(2, (606.0, 100.0), (594.0, 100.0)));
        assert!(hits.is_empty());
    }

    #[test]
    fn clear_resets_touched_cells() {
        let mut grid = ProximityGrid::new(0, 0, 500, 500, 50).unwrap();
        grid.insert(&snapshot(1, (110.0, 100.0), (98.0, 100.0)));
        grid.clear();
        let hits = grid.insert(&snapshot(2, (110.0, 100.0), (98.0, 100.0)));
        assert!(hits.is_empty());
    }

    #[test]
    fn straddling_vehicle_found_from_either_cell() {
        let mut grid = ProximityGrid::new(0, 0, 500, 500, 50).unwrap();
        // spans the cell boundary at x=100
        grid.insert(&snapshot(1, (106.0, 20.0), (94.0, 20.0)));
        let hits = grid.insert(&snapshot(2, (100.0, 21.0), (88.0, 21.0)));
        assert_eq!(hits, vec![1]);
    }
}
