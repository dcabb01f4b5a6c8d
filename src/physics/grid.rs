//! Per-type uniform grid used as the broad phase of the force pass.
//!
//! One grid exists per particle type. Each tick it is cleared and refilled
//! from the particle positions, then queried once per (particle, type) pair.
//! Buckets hold global particle indices; the cell a particle landed in is
//! written back onto the particle so queries can start from it.
//!
//! Queries are conservative: every particle that is truly within the query
//! radius is returned, plus some that are not. In wrap mode each returned
//! neighbour carries the world offset (0 or a multiple of the canvas size)
//! that moves it onto the same side of the torus seam as the query particle.

use std::sync::atomic::{AtomicUsize, Ordering};

use log::warn;
use rayon::prelude::*;

use super::config::Bounds;
use super::integrator::wrap_coordinate;
use super::{ConfigError, Particle, Position};

/// Lower bound on slots per cell for fixed-size storage.
pub const MIN_CELL_CAPACITY: usize = 100;

/// Densest packing of equal circles in the plane.
const CIRCLE_PACKING_DENSITY: f64 = 0.9069;

/// Slots per cell for fixed-size storage: 1.5x the number of balls of
/// `ball_radius` that fit a cell at hexagonal packing, and at least
/// [`MIN_CELL_CAPACITY`].
pub fn cell_capacity(cell_size: f64, ball_radius: f64) -> usize {
    if ball_radius <= 0.0 {
        return MIN_CELL_CAPACITY;
    }
    let packed = cell_size * cell_size * CIRCLE_PACKING_DENSITY
        / (std::f64::consts::PI * ball_radius * ball_radius);
    MIN_CELL_CAPACITY.max((1.5 * packed).ceil() as usize)
}

/// Bucket storage behind a [`UniformGrid`].
pub trait CellStorage: Send + Sync + Sized {
    fn allocate(cell_count: usize, cell_capacity: usize) -> Self;

    fn clear(&mut self);

    /// Appends `index` to `cell`. Returns `false` when the entry was dropped.
    fn push(&mut self, cell: usize, index: usize) -> bool;

    fn len(&self, cell: usize) -> usize;

    fn for_each<F: FnMut(usize)>(&self, cell: usize, f: F);

    /// Inserts `base + k` into `cells[k]` for every assigned slot and returns
    /// the number of dropped entries.
    fn fill(&mut self, cells: &[Option<usize>], base: usize) -> usize {
        let mut dropped = 0;
        for (k, cell) in cells.iter().enumerate() {
            if let Some(cell) = *cell {
                if !self.push(cell, base + k) {
                    dropped += 1;
                }
            }
        }
        dropped
    }
}

/// One growable vector per cell. Never drops.
#[derive(Debug, Clone, Default)]
pub struct DynamicCells {
    cells: Vec<Vec<usize>>,
}

impl CellStorage for DynamicCells {
    fn allocate(cell_count: usize, _cell_capacity: usize) -> Self {
        Self {
            cells: vec![Vec::new(); cell_count],
        }
    }

    fn clear(&mut self) {
        for cell in &mut self.cells {
            cell.clear();
        }
    }

    fn push(&mut self, cell: usize, index: usize) -> bool {
        self.cells[cell].push(index);
        true
    }

    fn len(&self, cell: usize) -> usize {
        self.cells[cell].len()
    }

    fn for_each<F: FnMut(usize)>(&self, cell: usize, f: F) {
        self.cells[cell].iter().copied().for_each(f);
    }
}

/// A single slab of `cell_count * capacity` slots with one atomic counter
/// per cell, so a rebuild can insert from many threads at once. Entries past
/// a cell's capacity are dropped.
#[derive(Debug)]
pub struct SlabCells {
    slots: Vec<AtomicUsize>,
    counts: Vec<AtomicUsize>,
    capacity: usize,
}

impl SlabCells {
    /// Thread-safe insert. Callers must not read buckets until every
    /// concurrent insert has returned.
    pub fn insert(&self, cell: usize, index: usize) -> bool {
        let slot = self.counts[cell].fetch_add(1, Ordering::Relaxed);
        if slot >= self.capacity {
            self.counts[cell].fetch_sub(1, Ordering::Relaxed);
            return false;
        }
        self.slots[cell * self.capacity + slot].store(index, Ordering::Relaxed);
        true
    }
}

impl CellStorage for SlabCells {
    fn allocate(cell_count: usize, cell_capacity: usize) -> Self {
        let capacity = cell_capacity.max(1);
        Self {
            slots: (0..cell_count * capacity).map(|_| AtomicUsize::new(0)).collect(),
            counts: (0..cell_count).map(|_| AtomicUsize::new(0)).collect(),
            capacity,
        }
    }

    fn clear(&mut self) {
        for count in &mut self.counts {
            *count.get_mut() = 0;
        }
    }

    fn push(&mut self, cell: usize, index: usize) -> bool {
        self.insert(cell, index)
    }

    fn len(&self, cell: usize) -> usize {
        self.counts[cell].load(Ordering::Relaxed).min(self.capacity)
    }

    fn for_each<F: FnMut(usize)>(&self, cell: usize, mut f: F) {
        let start = cell * self.capacity;
        for slot in &self.slots[start..start + self.len(cell)] {
            f(slot.load(Ordering::Relaxed));
        }
    }

    fn fill(&mut self, cells: &[Option<usize>], base: usize) -> usize {
        let storage = &*self;
        cells
            .par_iter()
            .enumerate()
            .filter(|(k, cell)| match cell {
                Some(cell) => !storage.insert(*cell, base + k),
                None => false,
            })
            .count()
    }
}

/// A neighbour candidate and the world offset to add to its position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub index: usize,
    pub offset: Position,
}

/// A cell touched by a neighbourhood walk.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellVisit {
    pub x: usize,
    pub y: usize,
    /// Squared distance in cells from the query cell, before wrapping.
    pub distance_squared: i64,
    pub offset: Position,
}

/// Result of [`UniformGrid::nearby_cells`].
#[derive(Debug, Clone, Default)]
pub struct CellNeighborhood {
    pub radius_cells: i64,
    pub cells: Vec<CellVisit>,
    pub skipped: Vec<CellVisit>,
}

/// Counters from one [`UniformGrid::rebuild`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RebuildReport {
    pub inserted: usize,
    pub healed: usize,
    pub outside: usize,
    pub dropped: usize,
}

impl std::ops::AddAssign for RebuildReport {
    fn add_assign(&mut self, other: Self) {
        self.inserted += other.inserted;
        self.healed += other.healed;
        self.outside += other.outside;
        self.dropped += other.dropped;
    }
}

#[derive(Debug)]
pub struct UniformGrid<S: CellStorage = DynamicCells> {
    cell_size: f64,
    bounds: Bounds,
    width: usize,
    height: usize,
    // The last row/column is narrower than a cell, so a wrapped search needs
    // one extra ring to reach across the seam.
    inexact_fit: bool,
    storage: S,
    dropped: usize,
}

impl<S: CellStorage> UniformGrid<S> {
    pub fn new(
        cell_size: f64,
        canvas_width: f64,
        canvas_height: f64,
        particle_count_hint: usize,
    ) -> Result<Self, ConfigError> {
        let capacity = MIN_CELL_CAPACITY.min(particle_count_hint.max(1));
        Self::with_cell_capacity(cell_size, canvas_width, canvas_height, capacity)
    }

    pub fn with_cell_capacity(
        cell_size: f64,
        canvas_width: f64,
        canvas_height: f64,
        cell_capacity: usize,
    ) -> Result<Self, ConfigError> {
        if !(cell_size.is_finite() && cell_size > 0.0) {
            return Err(ConfigError::InvalidCellSize(cell_size));
        }
        let canvas_ok = canvas_width.is_finite()
            && canvas_height.is_finite()
            && canvas_width > 0.0
            && canvas_height > 0.0;
        if !canvas_ok {
            return Err(ConfigError::CanvasTooSmall {
                width: canvas_width,
                height: canvas_height,
                diameter: 0.0,
            });
        }

        let width = ((canvas_width / cell_size).ceil() as usize).max(1);
        let height = ((canvas_height / cell_size).ceil() as usize).max(1);
        let inexact_fit = canvas_width % cell_size != 0.0 || canvas_height % cell_size != 0.0;

        Ok(Self {
            cell_size,
            bounds: Bounds::new(canvas_width, canvas_height),
            width,
            height,
            inexact_fit,
            storage: S::allocate(width * height, cell_capacity),
            dropped: 0,
        })
    }

    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn inexact_fit(&self) -> bool {
        self.inexact_fit
    }

    /// Entries dropped by `add` since the last `clear`.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn cell_len(&self, x: usize, y: usize) -> usize {
        self.storage.len(y * self.width + x)
    }

    /// Cell coordinates of `position`. A position on the far wall belongs to
    /// the last column or row.
    pub fn cell_of(&self, position: &Position) -> (i64, i64) {
        (
            axis_cell(position.x, self.cell_size, self.bounds.width, self.width),
            axis_cell(position.y, self.cell_size, self.bounds.height, self.height),
        )
    }

    fn cell_index(&self, (x, y): (i64, i64)) -> Option<usize> {
        let inside = x >= 0 && y >= 0 && (x as usize) < self.width && (y as usize) < self.height;
        inside.then(|| y as usize * self.width + x as usize)
    }

    /// Records the cell of `particle` on it and returns the bucket, or flags
    /// it outside. Non-finite positions never get a bucket.
    fn locate(&self, particle: &mut Particle) -> Option<usize> {
        particle.cell = self.cell_of(&particle.position);
        let finite = particle.position.x.is_finite() && particle.position.y.is_finite();
        let cell = if finite { self.cell_index(particle.cell) } else { None };
        particle.outside = cell.is_none();
        cell
    }

    pub fn clear(&mut self) {
        self.storage.clear();
        self.dropped = 0;
    }

    /// Buckets `particle` under global index `index` and records its cell on
    /// it. Returns `false` when the particle is off the grid (it is then
    /// flagged outside) or its bucket is full.
    pub fn add(&mut self, index: usize, particle: &mut Particle) -> bool {
        let Some(cell) = self.locate(particle) else {
            return false;
        };
        if self.storage.push(cell, index) {
            return true;
        }
        self.dropped += 1;
        warn!(
            "grid cell ({}, {}) is full, particle {} left out of this tick's neighbour lists",
            particle.cell.0, particle.cell.1, particle.id
        );
        false
    }

    /// Clears the grid and re-adds `particles`, whose global indices start at
    /// `base`. Positions off the canvas are first brought back: wrapped in
    /// torus mode, clamped otherwise.
    pub fn rebuild(
        &mut self,
        particles: &mut [Particle],
        base: usize,
        wrap: bool,
        parallel: bool,
    ) -> RebuildReport {
        self.clear();

        let healed = AtomicUsize::new(0);
        let assign = |particle: &mut Particle| -> Option<usize> {
            if heal_position(&mut particle.position, self.bounds, wrap) {
                healed.fetch_add(1, Ordering::Relaxed);
            }
            self.locate(particle)
        };
        let cells: Vec<Option<usize>> = if parallel {
            particles.par_iter_mut().map(assign).collect()
        } else {
            particles.iter_mut().map(assign).collect()
        };

        let outside = cells.iter().filter(|cell| cell.is_none()).count();
        let dropped = self.storage.fill(&cells, base);
        self.dropped = dropped;

        RebuildReport {
            inserted: cells.len() - outside - dropped,
            healed: healed.into_inner(),
            outside,
            dropped,
        }
    }

    /// Collects every particle bucketed in cells around `particle`'s cell
    /// that may lie within `radius`.
    pub fn nearby(&self, particle: &Particle, radius: f64, wrap: bool, out: &mut Vec<Neighbor>) {
        out.clear();
        let radius_cells = self.radius_cells(radius, wrap);
        self.walk_cells(particle.cell, radius_cells, wrap, |visit, included| {
            if included {
                let cell = visit.y * self.width + visit.x;
                self.storage.for_each(cell, |index| {
                    out.push(Neighbor {
                        index,
                        offset: visit.offset,
                    })
                });
            }
        });
    }

    /// The cells `nearby` would visit from `(cell_x, cell_y)`, and the ones
    /// its prefilter would skip.
    pub fn nearby_cells(&self, cell_x: i64, cell_y: i64, radius: f64, wrap: bool) -> CellNeighborhood {
        let radius_cells = self.radius_cells(radius, wrap);
        let mut neighborhood = CellNeighborhood {
            radius_cells,
            ..Default::default()
        };
        self.walk_cells((cell_x, cell_y), radius_cells, wrap, |visit, included| {
            if included {
                neighborhood.cells.push(visit);
            } else {
                neighborhood.skipped.push(visit);
            }
        });
        neighborhood
    }

    fn radius_cells(&self, radius: f64, wrap: bool) -> i64 {
        let radius_cells = (radius / self.cell_size).ceil() as i64;
        if wrap && self.inexact_fit {
            radius_cells + 1
        } else {
            radius_cells
        }
    }

    fn walk_cells<F: FnMut(CellVisit, bool)>(
        &self,
        (cx, cy): (i64, i64),
        radius_cells: i64,
        wrap: bool,
        mut visit: F,
    ) {
        let limit = (radius_cells as f64 + 1.5).powi(2);
        let (width, height) = (self.width as i64, self.height as i64);

        if !wrap {
            let start_x = (cx - radius_cells).max(0);
            let end_x = (cx + radius_cells).min(width - 1);
            let start_y = (cy - radius_cells).max(0);
            let end_y = (cy + radius_cells).min(height - 1);
            for y in start_y..=end_y {
                let dy = y - cy;
                for x in start_x..=end_x {
                    let dx = x - cx;
                    let distance_squared = dx * dx + dy * dy;
                    let cell = CellVisit {
                        x: x as usize,
                        y: y as usize,
                        distance_squared,
                        offset: Position::zeros(),
                    };
                    visit(cell, distance_squared as f64 <= limit);
                }
            }
            return;
        }

        for dy in -radius_cells..=radius_cells {
            let actual_y = cy + dy;
            let y = actual_y.rem_euclid(height);
            let offset_y = actual_y.div_euclid(height) as f64 * self.bounds.height;
            for dx in -radius_cells..=radius_cells {
                let actual_x = cx + dx;
                let x = actual_x.rem_euclid(width);
                let offset_x = actual_x.div_euclid(width) as f64 * self.bounds.width;
                let distance_squared = dx * dx + dy * dy;
                let cell = CellVisit {
                    x: x as usize,
                    y: y as usize,
                    distance_squared,
                    offset: Position::new(offset_x, offset_y),
                };
                visit(cell, distance_squared as f64 <= limit);
            }
        }
    }
}

fn axis_cell(coordinate: f64, cell_size: f64, extent: f64, cells: usize) -> i64 {
    let cell = (coordinate / cell_size).floor() as i64;
    if coordinate == extent {
        cell.min(cells as i64 - 1)
    } else {
        cell
    }
}

/// Brings a stray position back onto the canvas. Returns whether it moved.
/// Non-finite positions are left alone for the corruption check to report.
pub fn heal_position(position: &mut Position, bounds: Bounds, wrap: bool) -> bool {
    if !(position.x.is_finite() && position.y.is_finite()) {
        return false;
    }
    if wrap {
        let inside = (0.0..bounds.width).contains(&position.x) && (0.0..bounds.height).contains(&position.y);
        if inside {
            return false;
        }
        position.x = wrap_coordinate(position.x, bounds.width);
        position.y = wrap_coordinate(position.y, bounds.height);
    } else {
        if bounds.contains(position) {
            return false;
        }
        position.x = position.x.max(0.0).min(bounds.width);
        position.y = position.y.max(0.0).min(bounds.height);
    }
    true
}
