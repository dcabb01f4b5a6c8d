//! Particle-life simulation: typed particles attract and repel each other
//! through an asymmetric force matrix, on a bounded or toroidal canvas.

pub mod app_settings;
pub mod physics;
pub mod scheduler;
pub mod snapshot;

pub use app_settings::{AppSettings, SettingsError};
pub use physics::{Simulation, SimulationConfig, SimulationError};
pub use scheduler::{Command, SchedulerConfig, SimulationHandle};
pub use snapshot::{Frame, ParticleInstance};
