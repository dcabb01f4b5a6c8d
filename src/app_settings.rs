use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;

use crate::physics::config::random_distances;
use crate::physics::{
    matrix_generator_by_name, position_setter_by_name, CellStorage, ConfigError, InteractionRules,
    Matrix, MatrixGenerator, ParticleGroups, Simulation, SimulationConfig,
};
use crate::scheduler::SchedulerConfig;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// How particles are seeded at start-up.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticleSettings {
    /// Particles per type; its length is the number of types.
    pub counts: Vec<usize>,
    /// Seed for positions and random tables. Drawn from entropy when absent.
    pub seed: Option<u64>,
    /// Name of the method used to set initial particle positions
    pub position_setter: String,
}

impl Default for ParticleSettings {
    fn default() -> Self {
        Self {
            counts: vec![300; 3],
            seed: None,
            position_setter: "Random".to_string(),
        }
    }
}

/// Interaction tables: either explicit or generated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleSettings {
    /// Name of the gain matrix generator, used when `forces` is absent.
    pub generator: String,
    pub forces: Option<Vec<Vec<f64>>>,
    pub distances: Option<Vec<Vec<f64>>>,
    /// Range random interaction distances are drawn from.
    pub min_distance: f64,
    pub max_distance: f64,
}

impl Default for RuleSettings {
    fn default() -> Self {
        Self {
            generator: "Random".to_string(),
            forces: None,
            distances: None,
            min_distance: 30.0,
            max_distance: 90.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// Growable buckets, never drop an entry.
    #[default]
    Dynamic,
    /// Fixed-capacity buckets filled in parallel.
    Slab,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    #[serde(flatten)]
    pub scheduler: SchedulerConfig,
    pub storage: StorageKind,
}

/// Application settings, read from `settings.toml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub simulation: SimulationConfig,
    pub particles: ParticleSettings,
    pub rules: RuleSettings,
    pub run: RunSettings,
}

impl AppSettings {
    pub const SETTINGS_FILE: &'static str = "settings.toml";

    /// Loads settings from `path`, or returns default settings if the file doesn't exist
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&contents).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    pub fn rng(&self) -> StdRng {
        match self.particles.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }

    /// Explicit matrices win over the generator; missing distances are drawn
    /// from the configured range.
    pub fn build_rules(&self, rng: &mut StdRng) -> Result<InteractionRules, ConfigError> {
        let types = self.particles.counts.len();
        let forces = match &self.rules.forces {
            Some(rows) => Matrix::from_rows("force", rows.clone())?,
            None => matrix_generator_by_name(&self.rules.generator)?.generate(types, rng),
        };
        let distances = match &self.rules.distances {
            Some(rows) => Matrix::from_rows("distance", rows.clone())?,
            None => random_distances(types, self.rules.min_distance..self.rules.max_distance, rng),
        };
        let rules = InteractionRules { forces, distances };
        rules.validate(types)?;
        Ok(rules)
    }

    pub fn build_particles(&self, rng: &mut StdRng) -> Result<ParticleGroups, ConfigError> {
        let setter = position_setter_by_name(&self.particles.position_setter)?;
        Ok(ParticleGroups::seeded(
            &self.particles.counts,
            self.simulation.bounds(),
            setter.as_ref(),
            rng,
        ))
    }

    pub fn build_simulation<S: CellStorage>(&self) -> Result<Simulation<S>, ConfigError> {
        let mut rng = self.rng();
        let rules = self.build_rules(&mut rng)?;
        let particles = self.build_particles(&mut rng)?;
        Simulation::with_storage(self.simulation.clone(), rules, particles)
    }
}
