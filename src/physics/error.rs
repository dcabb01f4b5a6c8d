use thiserror::Error;

use super::{Position, Velocity};

/// A configuration the pipeline refuses to run with.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("cell size must be a positive finite number, got {0}")]
    InvalidCellSize(f64),
    #[error("canvas {width}x{height} is smaller than the particle diameter {diameter}")]
    CanvasTooSmall { width: f64, height: f64, diameter: f64 },
    #[error("ball radius must be finite and non-negative, got {0}")]
    InvalidBallRadius(f64),
    #[error("time step must be positive and finite, got {0}")]
    InvalidTimeStep(f64),
    #[error("friction half-life must be positive and finite, got {0}")]
    InvalidHalfLife(f64),
    #[error("restitution must lie in [0, 1], got {0}")]
    InvalidRestitution(f64),
    #[error("{name} matrix is {rows}x{cols}, expected {expected}x{expected}")]
    MatrixShape {
        name: &'static str,
        rows: usize,
        cols: usize,
        expected: usize,
    },
    #[error("interaction distance for types ({0}, {1}) must be positive and finite, got {2}")]
    InvalidDistance(usize, usize, f64),
    #[error("gain for types ({0}, {1}) must be finite, got {2}")]
    InvalidGain(usize, usize, f64),
    #[error("expected {expected} particle counts, got {found}")]
    TypeCountMismatch { expected: usize, found: usize },
    #[error("particle {0} has a non-finite position or velocity")]
    NonFiniteParticle(u64),
    #[error("at least one particle type is required")]
    NoTypes,
    #[error("unknown {kind} `{name}`")]
    UnknownName { kind: &'static str, name: String },
}

/// Pipeline stage a numerical fault was detected after.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Velocity,
    MouseField,
    Integration,
    Collision,
    Rebuild,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Velocity => "velocity update",
            Phase::MouseField => "mouse field",
            Phase::Integration => "integration",
            Phase::Collision => "collision resolution",
            Phase::Rebuild => "grid rebuild",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimulationError {
    #[error("simulation is not runnable: {0}")]
    NotRunnable(#[from] ConfigError),
    #[error(
        "non-finite state in particle {id} after {phase}: position ({}, {}), velocity ({}, {})",
        .position.x, .position.y, .velocity.x, .velocity.y
    )]
    NumericalCorruption {
        phase: Phase,
        id: u64,
        position: Position,
        velocity: Velocity,
    },
}
