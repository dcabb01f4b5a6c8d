use std::ops::Range;

use nalgebra::Vector2;
use rand::rngs::StdRng;
use rand::Rng;

pub mod collision;
pub mod config;
pub mod error;
pub mod force;
pub mod grid;
pub mod integrator;
pub mod mouse;
pub mod pipeline;

pub use config::{Bounds, ForceMode, InteractionRules, SimulationConfig};
pub use error::{ConfigError, Phase, SimulationError};
pub use grid::{CellStorage, DynamicCells, Neighbor, SlabCells, UniformGrid};
pub use mouse::MouseForce;
pub use pipeline::{Diagnostics, Simulation};

pub type Position = Vector2<f64>;
pub type Velocity = Vector2<f64>;

#[derive(Debug, Clone)]
pub struct Particle {
    pub id: u64,
    pub position: Position,
    pub velocity: Velocity,
    pub type_id: usize,
    /// Cell coordinates assigned by the last grid insertion.
    pub cell: (i64, i64),
    /// Set when the last grid insertion found the particle off the grid.
    pub outside: bool,
}

impl Particle {
    pub fn new(id: u64, type_id: usize, position: Position) -> Self {
        Self {
            id,
            position,
            velocity: Velocity::zeros(),
            type_id,
            cell: (0, 0),
            outside: false,
        }
    }
}

/// Every particle of the run, stored contiguously by type.
///
/// A type group is the slice `particles[ranges[t]]`, so the flattened order
/// (type-major, then insertion order) is stable for the whole run.
#[derive(Debug, Clone, Default)]
pub struct ParticleGroups {
    particles: Vec<Particle>,
    ranges: Vec<Range<usize>>,
}

impl ParticleGroups {
    /// Seeds `counts[t]` particles of each type with the given position setter.
    /// Ids are handed out monotonically from zero.
    pub fn seeded(
        counts: &[usize],
        bounds: Bounds,
        setter: &dyn PositionSetter,
        rng: &mut StdRng,
    ) -> Self {
        let n_types = counts.len();
        let mut next_id = 0;
        let groups = counts
            .iter()
            .enumerate()
            .map(|(type_id, &count)| {
                (0..count)
                    .map(|_| {
                        let mut position = Position::zeros();
                        setter.set_position(&mut position, type_id, n_types, bounds, rng);
                        let particle = Particle::new(next_id, type_id, position);
                        next_id += 1;
                        particle
                    })
                    .collect()
            })
            .collect();
        Self::from_groups(groups)
    }

    /// Builds groups from explicit particles; `groups[t]` become type `t`.
    /// The type ids of the particles are overwritten to match.
    pub fn from_groups(groups: Vec<Vec<Particle>>) -> Self {
        let mut particles = Vec::with_capacity(groups.iter().map(Vec::len).sum());
        let mut ranges = Vec::with_capacity(groups.len());
        for (type_id, group) in groups.into_iter().enumerate() {
            let start = particles.len();
            particles.extend(group.into_iter().map(|mut p| {
                p.type_id = type_id;
                p
            }));
            ranges.push(start..particles.len());
        }
        Self { particles, ranges }
    }

    pub fn type_count(&self) -> usize {
        self.ranges.len()
    }

    pub fn len(&self) -> usize {
        self.particles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    pub fn all(&self) -> &[Particle] {
        &self.particles
    }

    pub fn all_mut(&mut self) -> &mut [Particle] {
        &mut self.particles
    }

    pub fn range(&self, type_id: usize) -> Range<usize> {
        self.ranges[type_id].clone()
    }

    pub fn group(&self, type_id: usize) -> &[Particle] {
        &self.particles[self.range(type_id)]
    }

    pub fn counts(&self) -> Vec<usize> {
        self.ranges.iter().map(|r| r.len()).collect()
    }
}

/// Square KxK table indexed `[acted-on type][acting type]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    data: Vec<Vec<f64>>,
    size: usize,
}

impl Matrix {
    pub fn new(size: usize) -> Self {
        Self::filled(size, 0.0)
    }

    pub fn filled(size: usize, value: f64) -> Self {
        Self {
            data: vec![vec![value; size]; size],
            size,
        }
    }

    /// Adopts explicit rows, rejecting anything that is not square.
    pub fn from_rows(name: &'static str, rows: Vec<Vec<f64>>) -> Result<Self, ConfigError> {
        let size = rows.len();
        if let Some(bad) = rows.iter().find(|row| row.len() != size) {
            return Err(ConfigError::MatrixShape {
                name,
                rows: size,
                cols: bad.len(),
                expected: size,
            });
        }
        Ok(Self { data: rows, size })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.data[i][j]
    }

    pub fn set(&mut self, i: usize, j: usize, value: f64) {
        self.data[i][j] = value;
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.data
    }

    /// Fills every entry uniformly from `range`.
    pub fn randomize(&mut self, range: Range<f64>, rng: &mut StdRng) {
        self.data.iter_mut().for_each(|row| {
            row.iter_mut().for_each(|value| {
                *value = rng.gen_range(range.clone());
            });
        });
    }
}

pub trait PositionSetter: Send + Sync {
    fn set_position(
        &self,
        position: &mut Position,
        type_id: usize,
        n_types: usize,
        bounds: Bounds,
        rng: &mut StdRng,
    );
}

pub trait MatrixGenerator: Send + Sync {
    fn generate(&self, size: usize, rng: &mut StdRng) -> Matrix;
}

/// Distance kept between freshly seeded particles and the canvas edges.
pub const SEED_MARGIN: f64 = 50.0;

pub struct RandomPositionSetter;

impl PositionSetter for RandomPositionSetter {
    fn set_position(&self, position: &mut Position, _type_id: usize, _n_types: usize, bounds: Bounds, rng: &mut StdRng) {
        let margin_x = SEED_MARGIN.min(bounds.width / 2.0);
        let margin_y = SEED_MARGIN.min(bounds.height / 2.0);
        position.x = margin_x + rng.gen::<f64>() * (bounds.width - 2.0 * margin_x);
        position.y = margin_y + rng.gen::<f64>() * (bounds.height - 2.0 * margin_y);
    }
}

pub struct CenterPositionSetter;

impl PositionSetter for CenterPositionSetter {
    fn set_position(&self, position: &mut Position, _type_id: usize, _n_types: usize, bounds: Bounds, rng: &mut StdRng) {
        let scale = 0.3 * bounds.min_side();
        let center = bounds.center();
        position.x = center.x + rng.gen_range(-1.0..1.0) * scale;
        position.y = center.y + rng.gen_range(-1.0..1.0) * scale;
    }
}

pub struct UniformCirclePositionSetter;

impl PositionSetter for UniformCirclePositionSetter {
    fn set_position(&self, position: &mut Position, _type_id: usize, _n_types: usize, bounds: Bounds, rng: &mut StdRng) {
        let max_radius = 0.45 * bounds.min_side();
        let angle = rng.gen_range(0.0..2.0 * std::f64::consts::PI);
        let radius = max_radius * rng.gen::<f64>().sqrt();
        *position = bounds.center() + Vector2::new(angle.cos(), angle.sin()) * radius;
    }
}

pub struct RingPositionSetter;

impl PositionSetter for RingPositionSetter {
    fn set_position(&self, position: &mut Position, _type_id: usize, _n_types: usize, bounds: Bounds, rng: &mut StdRng) {
        let side = bounds.min_side();
        let angle = rng.gen_range(0.0..2.0 * std::f64::consts::PI);
        let radius = 0.35 * side + 0.01 * side * rng.gen_range(-1.0..1.0);
        *position = bounds.center() + Vector2::new(angle.cos(), angle.sin()) * radius;
    }
}

pub struct ColorBattlePositionSetter;

impl PositionSetter for ColorBattlePositionSetter {
    fn set_position(&self, position: &mut Position, type_id: usize, n_types: usize, bounds: Bounds, rng: &mut StdRng) {
        let side = bounds.min_side();
        let center_angle = type_id as f64 / n_types.max(1) as f64 * 2.0 * std::f64::consts::PI;
        let center = bounds.center() + Vector2::new(center_angle.cos(), center_angle.sin()) * 0.25 * side;

        let angle = rng.gen_range(0.0..2.0 * std::f64::consts::PI);
        let radius = rng.gen::<f64>() * 0.05 * side;
        *position = center + Vector2::new(angle.cos(), angle.sin()) * radius;
    }
}

pub struct SpiralPositionSetter;

impl PositionSetter for SpiralPositionSetter {
    fn set_position(&self, position: &mut Position, _type_id: usize, _n_types: usize, bounds: Bounds, rng: &mut StdRng) {
        let max_rotations = 2.0;
        let f: f64 = rng.gen();
        let angle = max_rotations * 2.0 * std::f64::consts::PI * f;

        let spread = 0.5 * f.min(0.2);
        let radius = (0.9 * f + spread * rng.gen_range(-1.0..1.0) * spread) * 0.45 * bounds.min_side();
        *position = bounds.center() + Vector2::new(angle.cos(), angle.sin()) * radius;
    }
}

pub fn position_setter_by_name(name: &str) -> Result<Box<dyn PositionSetter>, ConfigError> {
    Ok(match name {
        "Random" => Box::new(RandomPositionSetter),
        "Center" => Box::new(CenterPositionSetter),
        "UniformCircle" => Box::new(UniformCirclePositionSetter),
        "Ring" => Box::new(RingPositionSetter),
        "ColorBattle" => Box::new(ColorBattlePositionSetter),
        "Spiral" => Box::new(SpiralPositionSetter),
        _ => {
            return Err(ConfigError::UnknownName {
                kind: "position setter",
                name: name.to_string(),
            })
        }
    })
}

pub struct RandomMatrixGenerator;

impl MatrixGenerator for RandomMatrixGenerator {
    fn generate(&self, size: usize, rng: &mut StdRng) -> Matrix {
        let mut matrix = Matrix::new(size);
        matrix.randomize(-1.0..1.0, rng);
        matrix
    }
}

pub struct SymmetryMatrixGenerator;

impl MatrixGenerator for SymmetryMatrixGenerator {
    fn generate(&self, size: usize, rng: &mut StdRng) -> Matrix {
        let mut matrix = RandomMatrixGenerator.generate(size, rng);
        for i in 0..size {
            for j in i..size {
                let value = matrix.get(j, i);
                matrix.set(i, j, value);
            }
        }
        matrix
    }
}

pub struct ChainsMatrixGenerator;

impl MatrixGenerator for ChainsMatrixGenerator {
    fn generate(&self, size: usize, _rng: &mut StdRng) -> Matrix {
        chain_matrix(size, 1.0, -1.0)
    }
}

pub struct Chains2MatrixGenerator;

impl MatrixGenerator for Chains2MatrixGenerator {
    fn generate(&self, size: usize, _rng: &mut StdRng) -> Matrix {
        chain_matrix(size, 0.2, -1.0)
    }
}

pub struct Chains3MatrixGenerator;

impl MatrixGenerator for Chains3MatrixGenerator {
    fn generate(&self, size: usize, _rng: &mut StdRng) -> Matrix {
        chain_matrix(size, 0.2, 0.0)
    }
}

// Self-attraction 1, ring neighbours `neighbour`, everything else `rest`.
fn chain_matrix(size: usize, neighbour: f64, rest: f64) -> Matrix {
    let mut matrix = Matrix::new(size);
    for i in 0..size {
        for j in 0..size {
            let value = if j == i {
                1.0
            } else if j == (i + 1) % size || j == (i + size - 1) % size {
                neighbour
            } else {
                rest
            };
            matrix.set(i, j, value);
        }
    }
    matrix
}

pub struct SnakesMatrixGenerator;

impl MatrixGenerator for SnakesMatrixGenerator {
    fn generate(&self, size: usize, _rng: &mut StdRng) -> Matrix {
        let mut matrix = Matrix::new(size);
        for i in 0..size {
            matrix.set(i, i, 1.0);
            matrix.set(i, (i + 1) % size, 0.2);
        }
        matrix
    }
}

pub struct ZeroMatrixGenerator;

impl MatrixGenerator for ZeroMatrixGenerator {
    fn generate(&self, size: usize, _rng: &mut StdRng) -> Matrix {
        Matrix::new(size)
    }
}

pub fn matrix_generator_by_name(name: &str) -> Result<Box<dyn MatrixGenerator>, ConfigError> {
    Ok(match name {
        "Random" => Box::new(RandomMatrixGenerator),
        "Symmetry" => Box::new(SymmetryMatrixGenerator),
        "Chains" => Box::new(ChainsMatrixGenerator),
        "Chains2" => Box::new(Chains2MatrixGenerator),
        "Chains3" => Box::new(Chains3MatrixGenerator),
        "Snakes" => Box::new(SnakesMatrixGenerator),
        "Zero" => Box::new(ZeroMatrixGenerator),
        _ => {
            return Err(ConfigError::UnknownName {
                kind: "matrix generator",
                name: name.to_string(),
            })
        }
    })
}
