//! Spatial partitioning grid for sample-point queries.

use bevy::prelude::*;
use std::collections::HashMap;

/// Spatial hash of streamline sample points.
///
/// Cells are `cell_size` wide and keyed relative to `origin`, so points
/// outside the world domain still hash to valid (negative) cells.
#[derive(Clone, Debug, Default)]
pub struct GridStorage {
    pub cell_size: f32,
    pub origin: Vec2,
    cells: HashMap<(i32, i32), Vec<Vec2>>,
    len: usize,
}

impl GridStorage {
    pub fn new(origin: Vec2, cell_size: f32) -> Self {
        Self {
            cell_size,
            origin,
            cells: HashMap::new(),
            len: 0,
        }
    }

    /// Convert world position to cell coordinates.
    pub fn to_cell(&self, pos: Vec2) -> (i32, i32) {
        let local = (pos - self.origin) / self.cell_size;
        (local.x.floor() as i32, local.y.floor() as i32)
    }

    /// Insert a sample.
    pub fn add_sample(&mut self, pos: Vec2) {
        let cell = self.to_cell(pos);
        self.cells.entry(cell).or_default().push(pos);
        self.len += 1;
    }

    pub fn add_polyline(&mut self, points: &[Vec2]) {
        for &p in points {
            self.add_sample(p);
        }
    }

    /// Merge every sample of another grid into this one.
    pub fn add_all(&mut self, other: &GridStorage) {
        for samples in other.cells.values() {
            for &p in samples {
                self.add_sample(p);
            }
        }
    }

    /// Clear all entries.
    pub fn clear(&mut self) {
        self.cells.clear();
        self.len = 0;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// True when no stored sample lies strictly closer than `sqrt(d_sq)`.
    pub fn is_valid_sample(&self, pos: Vec2, d_sq: f32) -> bool {
        let reach = d_sq.sqrt();
        let min_cell = self.to_cell(pos - Vec2::splat(reach));
        let max_cell = self.to_cell(pos + Vec2::splat(reach));

        for cx in min_cell.0..=max_cell.0 {
            for cy in min_cell.1..=max_cell.1 {
                let far = self
                    .query_cell((cx, cy))
                    .iter()
                    .all(|sample| sample.distance_squared(pos) >= d_sq);
                if !far {
                    return false;
                }
            }
        }

        true
    }

    /// Samples in every cell overlapping the square of half-width `radius`.
    ///
    /// This is a broad phase; callers filter by exact distance.
    pub fn query_radius(&self, center: Vec2, radius: f32) -> Vec<Vec2> {
        let min_cell = self.to_cell(center - Vec2::splat(radius));
        let max_cell = self.to_cell(center + Vec2::splat(radius));

        let mut result = Vec::new();

        for cx in min_cell.0..=max_cell.0 {
            for cy in min_cell.1..=max_cell.1 {
                result.extend_from_slice(self.query_cell((cx, cy)));
            }
        }

        result
    }

    /// Query samples in a cell.
    pub fn query_cell(&self, cell: (i32, i32)) -> &[Vec2] {
        self.cells.get(&cell).map(|v| v.as_slice()).unwrap_or(&[])
    }
}
