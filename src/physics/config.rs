use std::ops::Range;

use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use super::{ConfigError, Matrix, MatrixGenerator, Position};

/// Canvas extent; the world spans `[0, width] x [0, height]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub width: f64,
    pub height: f64,
}

impl Bounds {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    pub fn min_side(&self) -> f64 {
        self.width.min(self.height)
    }

    pub fn center(&self) -> Position {
        Position::new(self.width / 2.0, self.height / 2.0)
    }

    pub fn contains(&self, position: &Position) -> bool {
        (0.0..=self.width).contains(&position.x) && (0.0..=self.height).contains(&position.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForceMode {
    /// Neighbour search through the per-type uniform grids.
    Grid,
    /// Every particle against every particle; small-N reference path.
    Direct,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub canvas_width: f64,
    pub canvas_height: f64,
    /// Used for collisions and wall reflection only, never for force cutoffs.
    pub ball_radius: f64,
    pub cell_size: f64,
    /// Time for friction to halve a particle's velocity.
    pub t_half: f64,
    pub dt: f64,
    pub wrap: bool,
    pub restitution: f64,
    pub force_mode: ForceMode,
    pub parallel: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            canvas_width: 1280.0,
            canvas_height: 720.0,
            ball_radius: 3.0,
            cell_size: 60.0,
            t_half: 0.040,
            dt: 1.0 / 144.0,
            wrap: false,
            restitution: 0.8,
            force_mode: ForceMode::Grid,
            parallel: true,
        }
    }
}

impl SimulationConfig {
    pub fn bounds(&self) -> Bounds {
        Bounds::new(self.canvas_width, self.canvas_height)
    }

    /// Per-tick velocity multiplier, `0.5^(dt / t_half)`.
    pub fn friction_factor(&self) -> f64 {
        friction_factor(self.dt, self.t_half)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.cell_size.is_finite() && self.cell_size > 0.0) {
            return Err(ConfigError::InvalidCellSize(self.cell_size));
        }
        if !(self.ball_radius.is_finite() && self.ball_radius >= 0.0) {
            return Err(ConfigError::InvalidBallRadius(self.ball_radius));
        }
        let diameter = 2.0 * self.ball_radius;
        let canvas_ok = self.canvas_width.is_finite()
            && self.canvas_height.is_finite()
            && self.canvas_width > 0.0
            && self.canvas_height > 0.0
            && self.canvas_width >= diameter
            && self.canvas_height >= diameter;
        if !canvas_ok {
            return Err(ConfigError::CanvasTooSmall {
                width: self.canvas_width,
                height: self.canvas_height,
                diameter,
            });
        }
        if !(self.dt.is_finite() && self.dt > 0.0) {
            return Err(ConfigError::InvalidTimeStep(self.dt));
        }
        if !(self.t_half.is_finite() && self.t_half > 0.0) {
            return Err(ConfigError::InvalidHalfLife(self.t_half));
        }
        if !(0.0..=1.0).contains(&self.restitution) {
            return Err(ConfigError::InvalidRestitution(self.restitution));
        }
        Ok(())
    }
}

pub fn friction_factor(dt: f64, t_half: f64) -> f64 {
    0.5_f64.powf(dt / t_half)
}

/// Cutoffs drawn uniformly from `range`; an empty range fills with its start.
pub fn random_distances(types: usize, range: Range<f64>, rng: &mut StdRng) -> Matrix {
    if range.is_empty() {
        return Matrix::filled(types, range.start);
    }
    let mut distances = Matrix::new(types);
    distances.randomize(range, rng);
    distances
}

/// Gain and cutoff tables for every ordered pair of types.
#[derive(Debug, Clone, PartialEq)]
pub struct InteractionRules {
    pub forces: Matrix,
    pub distances: Matrix,
}

impl InteractionRules {
    pub fn new(forces: Matrix, distances: Matrix) -> Result<Self, ConfigError> {
        let rules = Self { forces, distances };
        rules.validate(rules.forces.size())?;
        Ok(rules)
    }

    /// Gains from `generator`, cutoffs drawn uniformly from `distance_range`.
    pub fn generate(
        types: usize,
        generator: &dyn MatrixGenerator,
        distance_range: Range<f64>,
        rng: &mut StdRng,
    ) -> Result<Self, ConfigError> {
        let forces = generator.generate(types, rng);
        let distances = random_distances(types, distance_range, rng);
        Self::new(forces, distances)
    }

    pub fn type_count(&self) -> usize {
        self.forces.size()
    }

    pub fn validate(&self, types: usize) -> Result<(), ConfigError> {
        if types == 0 {
            return Err(ConfigError::NoTypes);
        }
        for (name, matrix) in [("force", &self.forces), ("distance", &self.distances)] {
            if matrix.size() != types {
                return Err(ConfigError::MatrixShape {
                    name,
                    rows: matrix.size(),
                    cols: matrix.size(),
                    expected: types,
                });
            }
        }
        for i in 0..types {
            for j in 0..types {
                let distance = self.distances.get(i, j);
                if !(distance.is_finite() && distance > 0.0) {
                    return Err(ConfigError::InvalidDistance(i, j, distance));
                }
                let gain = self.forces.get(i, j);
                if !gain.is_finite() {
                    return Err(ConfigError::InvalidGain(i, j, gain));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::ZeroMatrixGenerator;
    use rand::SeedableRng;

    #[test]
    fn default_config_is_valid() {
        assert_eq!(SimulationConfig::default().validate(), Ok(()));
    }

    #[test]
    fn friction_halves_after_one_half_life() {
        let f = friction_factor(0.01, 0.04);
        assert!((f.powi(4) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn rejects_degenerate_configs() {
        let base = SimulationConfig::default();

        let zero_cell = SimulationConfig { cell_size: 0.0, ..base.clone() };
        assert_eq!(zero_cell.validate(), Err(ConfigError::InvalidCellSize(0.0)));

        let negative_cell = SimulationConfig { cell_size: -4.0, ..base.clone() };
        assert!(negative_cell.validate().is_err());

        let tiny = SimulationConfig { canvas_width: 5.0, ball_radius: 3.0, ..base.clone() };
        assert!(matches!(tiny.validate(), Err(ConfigError::CanvasTooSmall { .. })));

        let bouncy = SimulationConfig { restitution: 1.5, ..base.clone() };
        assert_eq!(bouncy.validate(), Err(ConfigError::InvalidRestitution(1.5)));

        let frozen = SimulationConfig { t_half: 0.0, ..base };
        assert_eq!(frozen.validate(), Err(ConfigError::InvalidHalfLife(0.0)));
    }

    #[test]
    fn rules_reject_non_positive_distance() {
        let mut distances = Matrix::filled(2, 40.0);
        distances.set(1, 0, 0.0);
        let err = InteractionRules::new(Matrix::new(2), distances).unwrap_err();
        assert_eq!(err, ConfigError::InvalidDistance(1, 0, 0.0));
    }

    #[test]
    fn rules_reject_mismatched_shapes() {
        let err = InteractionRules::new(Matrix::new(2), Matrix::filled(3, 10.0)).unwrap_err();
        assert!(matches!(err, ConfigError::MatrixShape { name: "distance", .. }));
    }

    #[test]
    fn generated_distances_stay_in_range() {
        let mut rng = StdRng::seed_from_u64(9);
        let rules = InteractionRules::generate(4, &ZeroMatrixGenerator, 30.0..90.0, &mut rng).unwrap();
        for row in rules.distances.rows() {
            assert!(row.iter().all(|d| (30.0..90.0).contains(d)));
        }
    }
}
