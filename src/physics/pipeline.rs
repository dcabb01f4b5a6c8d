//! One simulation tick: forces, velocities, pointer field, positions,
//! collisions, grid rebuild.

use std::time::{Duration, Instant};

use log::{error, info, warn};
use rand::rngs::StdRng;
use rayon::prelude::*;

use super::collision::CollisionResolver;
use super::force::{force, FORCE_SCALE};
use super::grid::{cell_capacity, RebuildReport};
use super::integrator::{advance_position, apply_velocity};
use super::{
    CellStorage, ConfigError, DynamicCells, ForceMode, InteractionRules, MouseForce, Neighbor,
    Particle, ParticleGroups, Phase, PositionSetter, SimulationConfig, SimulationError,
    UniformGrid, Velocity,
};
use crate::snapshot::Frame;

/// Counters and timings of the last completed tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Diagnostics {
    pub tick: u64,
    pub neighbor_queries: usize,
    pub force_evaluations: usize,
    /// Candidates rejected by the exact distance check.
    pub skipped_candidates: usize,
    pub collisions: usize,
    pub rebuild: RebuildReport,
    pub force_time: Duration,
    pub integration_time: Duration,
    pub collision_time: Duration,
    pub rebuild_time: Duration,
    pub total_time: Duration,
}

#[derive(Debug, Clone, Copy, Default)]
struct ForceCounters {
    queries: usize,
    evaluations: usize,
    skipped: usize,
}

impl std::ops::Add for ForceCounters {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            queries: self.queries + other.queries,
            evaluations: self.evaluations + other.evaluations,
            skipped: self.skipped + other.skipped,
        }
    }
}

/// The whole simulation state, owned in one place.
///
/// `step` takes `&mut self`, so two ticks can never overlap and
/// reconfiguration can only happen between ticks.
#[derive(Debug)]
pub struct Simulation<S: CellStorage = DynamicCells> {
    config: SimulationConfig,
    rules: InteractionRules,
    particles: ParticleGroups,
    grids: Vec<UniformGrid<S>>,
    forces: Vec<Velocity>,
    friction_factor: f64,
    mouse: Option<MouseForce>,
    diagnostics: Diagnostics,
    fault: Option<SimulationError>,
    tick: u64,
    /// Particles were edited from outside since the last rebuild.
    dirty: bool,
}

impl Simulation {
    pub fn new(
        config: SimulationConfig,
        rules: InteractionRules,
        particles: ParticleGroups,
    ) -> Result<Self, ConfigError> {
        Self::with_storage(config, rules, particles)
    }

    /// Seeds `counts[t]` particles of each type and builds the simulation.
    pub fn seeded(
        config: SimulationConfig,
        rules: InteractionRules,
        counts: &[usize],
        setter: &dyn PositionSetter,
        rng: &mut StdRng,
    ) -> Result<Self, ConfigError> {
        let particles = ParticleGroups::seeded(counts, config.bounds(), setter, rng);
        Self::new(config, rules, particles)
    }
}

impl<S: CellStorage> Simulation<S> {
    pub fn with_storage(
        config: SimulationConfig,
        rules: InteractionRules,
        particles: ParticleGroups,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        check_type_count(&rules, &particles)?;
        rules.validate(particles.type_count())?;
        check_particles(&particles)?;

        let mut simulation = Self {
            friction_factor: config.friction_factor(),
            grids: build_grids(&config, &particles)?,
            forces: vec![Velocity::zeros(); particles.len()],
            config,
            rules,
            particles,
            mouse: None,
            diagnostics: Diagnostics::default(),
            fault: None,
            tick: 0,
            dirty: false,
        };
        simulation.diagnostics.rebuild = simulation.rebuild_grids();
        info!(
            "simulation ready: {} particles in {} types on {}x{}",
            simulation.particles.len(),
            simulation.particles.type_count(),
            simulation.config.canvas_width,
            simulation.config.canvas_height
        );
        Ok(simulation)
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn rules(&self) -> &InteractionRules {
        &self.rules
    }

    pub fn particles(&self) -> &ParticleGroups {
        &self.particles
    }

    /// Direct access for tools and tests. The grids are rebuilt from the
    /// edited state before the next force pass.
    pub fn particles_mut(&mut self) -> &mut ParticleGroups {
        self.dirty = true;
        &mut self.particles
    }

    pub fn grids(&self) -> &[UniformGrid<S>] {
        &self.grids
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn friction_factor(&self) -> f64 {
        self.friction_factor
    }

    pub fn mouse(&self) -> Option<MouseForce> {
        self.mouse
    }

    pub fn is_runnable(&self) -> bool {
        self.fault.is_none()
    }

    /// Why `step` currently refuses to run, if it does.
    pub fn fault(&self) -> Option<&SimulationError> {
        self.fault.as_ref()
    }

    pub fn frame(&self) -> Frame {
        Frame::capture(self.tick, self.particles.all(), &self.diagnostics)
    }

    /// Advances the world by one time step.
    pub fn step(&mut self) -> Result<&Diagnostics, SimulationError> {
        if let Some(fault) = &self.fault {
            return Err(fault.clone());
        }
        let started = Instant::now();
        let mut diagnostics = Diagnostics {
            tick: self.tick + 1,
            ..Default::default()
        };

        if self.dirty {
            self.diagnostics.rebuild = self.rebuild_grids();
            self.check_finite(Phase::Rebuild)?;
            self.dirty = false;
        }

        let phase = Instant::now();
        let counters = self.accumulate_forces();
        diagnostics.neighbor_queries = counters.queries;
        diagnostics.force_evaluations = counters.evaluations;
        diagnostics.skipped_candidates = counters.skipped;
        diagnostics.force_time = phase.elapsed();

        let phase = Instant::now();
        self.update_velocities();
        self.check_finite(Phase::Velocity)?;

        if let Some(mouse) = self.mouse {
            let friction_factor = self.friction_factor;
            for particle in self.particles.all_mut() {
                mouse.apply(particle, friction_factor);
            }
            self.check_finite(Phase::MouseField)?;
        }

        self.update_positions();
        self.check_finite(Phase::Integration)?;
        diagnostics.integration_time = phase.elapsed();

        let phase = Instant::now();
        let resolver = CollisionResolver {
            bounds: self.config.bounds(),
            ball_radius: self.config.ball_radius,
            restitution: self.config.restitution,
            friction_factor: self.friction_factor,
            wrap: self.config.wrap,
        };
        diagnostics.collisions = resolver.resolve(self.particles.all_mut());
        self.check_finite(Phase::Collision)?;
        diagnostics.collision_time = phase.elapsed();

        let phase = Instant::now();
        diagnostics.rebuild = self.rebuild_grids();
        self.check_finite(Phase::Rebuild)?;
        diagnostics.rebuild_time = phase.elapsed();

        self.tick += 1;
        diagnostics.total_time = started.elapsed();
        self.diagnostics = diagnostics;
        Ok(&self.diagnostics)
    }

    fn accumulate_forces(&mut self) -> ForceCounters {
        let n = self.particles.len();
        self.forces.clear();
        self.forces.resize(n, Velocity::zeros());
        if n == 0 {
            return ForceCounters::default();
        }

        let particles = &self.particles;
        let grids = &self.grids;
        let rules = &self.rules;
        let config = &self.config;
        let work = |start: usize, chunk: &mut [Velocity]| {
            let mut neighbors = Vec::new();
            let mut counters = ForceCounters::default();
            for (k, slot) in chunk.iter_mut().enumerate() {
                let i = start + k;
                *slot = match config.force_mode {
                    ForceMode::Grid => {
                        grid_force(i, particles, grids, rules, config.wrap, &mut neighbors, &mut counters)
                    }
                    ForceMode::Direct => direct_force(i, particles, rules, config, &mut counters),
                };
            }
            counters
        };

        if self.config.parallel {
            let chunk_size = (n / num_cpus::get()).max(1);
            self.forces
                .par_chunks_mut(chunk_size)
                .enumerate()
                .map(|(chunk_index, chunk)| work(chunk_index * chunk_size, chunk))
                .reduce(ForceCounters::default, |a, b| a + b)
        } else {
            work(0, &mut self.forces)
        }
    }

    fn update_velocities(&mut self) {
        let (dt, friction_factor) = (self.config.dt, self.friction_factor);
        let forces = &self.forces;
        let particles = self.particles.all_mut();
        if self.config.parallel {
            particles
                .par_iter_mut()
                .zip(forces.par_iter())
                .for_each(|(particle, force)| apply_velocity(particle, force, dt, friction_factor));
        } else {
            for (particle, force) in particles.iter_mut().zip(forces) {
                apply_velocity(particle, force, dt, friction_factor);
            }
        }
    }

    fn update_positions(&mut self) {
        let (dt, wrap) = (self.config.dt, self.config.wrap);
        let (bounds, radius) = (self.config.bounds(), self.config.ball_radius);
        let particles = self.particles.all_mut();
        if self.config.parallel {
            particles
                .par_iter_mut()
                .for_each(|particle| advance_position(particle, dt, wrap, bounds, radius));
        } else {
            for particle in particles {
                advance_position(particle, dt, wrap, bounds, radius);
            }
        }
    }

    fn rebuild_grids(&mut self) -> RebuildReport {
        let mut report = RebuildReport::default();
        for (type_id, grid) in self.grids.iter_mut().enumerate() {
            let range = self.particles.range(type_id);
            let base = range.start;
            report += grid.rebuild(
                &mut self.particles.all_mut()[range],
                base,
                self.config.wrap,
                self.config.parallel,
            );
        }
        if report.healed > 0 {
            warn!("moved {} particles back onto the canvas", report.healed);
        }
        if report.dropped > 0 {
            warn!(
                "{} particles did not fit their grid cell and are ignored as neighbours this tick",
                report.dropped
            );
        }
        report
    }

    fn check_finite(&mut self, phase: Phase) -> Result<(), SimulationError> {
        let Some(bad) = self.particles.all().iter().find(|p| !is_finite(p)) else {
            return Ok(());
        };
        let fault = SimulationError::NumericalCorruption {
            phase,
            id: bad.id,
            position: bad.position,
            velocity: bad.velocity,
        };
        error!("tick {} aborted: {}", self.tick + 1, fault);
        self.fault = Some(fault.clone());
        Err(fault)
    }

    /// Applies `change` to the configuration and revalidates everything.
    ///
    /// An invalid result is kept but leaves the simulation not runnable until
    /// a later change makes it valid again.
    fn reconfigure<F>(&mut self, regrid: bool, change: F) -> Result<(), ConfigError>
    where
        F: FnOnce(&mut SimulationConfig),
    {
        change(&mut self.config);
        let validated = self
            .config
            .validate()
            .and_then(|_| self.rules.validate(self.particles.type_count()));
        let result = match validated {
            Ok(()) if regrid => build_grids(&self.config, &self.particles).map(|grids| {
                self.grids = grids;
            }),
            other => other,
        };

        match result {
            Ok(()) => {
                self.friction_factor = self.config.friction_factor();
                if matches!(self.fault, Some(SimulationError::NotRunnable(_))) {
                    info!("configuration valid again, resuming");
                    self.fault = None;
                }
                if regrid && self.fault.is_none() {
                    self.diagnostics.rebuild = self.rebuild_grids();
                }
                Ok(())
            }
            Err(err) => {
                warn!("rejected configuration: {err}");
                if !matches!(self.fault, Some(SimulationError::NumericalCorruption { .. })) {
                    self.fault = Some(SimulationError::NotRunnable(err.clone()));
                }
                Err(err)
            }
        }
    }

    pub fn set_config(&mut self, config: SimulationConfig) -> Result<(), ConfigError> {
        self.reconfigure(true, |current| *current = config)
    }

    pub fn set_wrap(&mut self, wrap: bool) -> Result<(), ConfigError> {
        self.reconfigure(true, |config| config.wrap = wrap)
    }

    pub fn set_cell_size(&mut self, cell_size: f64) -> Result<(), ConfigError> {
        self.reconfigure(true, |config| config.cell_size = cell_size)
    }

    pub fn set_ball_radius(&mut self, ball_radius: f64) -> Result<(), ConfigError> {
        self.reconfigure(true, |config| config.ball_radius = ball_radius)
    }

    pub fn set_restitution(&mut self, restitution: f64) -> Result<(), ConfigError> {
        self.reconfigure(false, |config| config.restitution = restitution)
    }

    pub fn set_half_life(&mut self, t_half: f64) -> Result<(), ConfigError> {
        self.reconfigure(false, |config| config.t_half = t_half)
    }

    pub fn set_time_step(&mut self, dt: f64) -> Result<(), ConfigError> {
        self.reconfigure(false, |config| config.dt = dt)
    }

    pub fn set_force_mode(&mut self, force_mode: ForceMode) -> Result<(), ConfigError> {
        self.reconfigure(false, |config| config.force_mode = force_mode)
    }

    pub fn set_parallel(&mut self, parallel: bool) -> Result<(), ConfigError> {
        self.reconfigure(false, |config| config.parallel = parallel)
    }

    /// New canvas size. Particles left outside are brought back by the
    /// rebuild that follows.
    pub fn resize(&mut self, width: f64, height: f64) -> Result<(), ConfigError> {
        info!("canvas resized to {width}x{height}");
        self.reconfigure(true, |config| {
            config.canvas_width = width;
            config.canvas_height = height;
        })
    }

    /// Replaces the interaction tables; the type count must not change.
    pub fn set_rules(&mut self, rules: InteractionRules) -> Result<(), ConfigError> {
        check_type_count(&rules, &self.particles)?;
        self.rules = rules;
        self.reconfigure(false, |_| {})
    }

    pub fn set_mouse(&mut self, mouse: Option<MouseForce>) {
        self.mouse = mouse;
    }

    /// Starts over with new particles and rules, clearing any fault.
    pub fn reset(&mut self, rules: InteractionRules, particles: ParticleGroups) -> Result<(), ConfigError> {
        check_type_count(&rules, &particles)?;
        rules.validate(particles.type_count())?;
        check_particles(&particles)?;
        self.config.validate()?;
        self.grids = build_grids(&self.config, &particles)?;
        self.forces = vec![Velocity::zeros(); particles.len()];
        self.rules = rules;
        self.particles = particles;
        self.fault = None;
        self.dirty = false;
        self.tick = 0;
        self.diagnostics = Diagnostics::default();
        self.friction_factor = self.config.friction_factor();
        self.diagnostics.rebuild = self.rebuild_grids();
        info!("simulation reset with {} particles", self.particles.len());
        Ok(())
    }

    /// Ids of the particles of each type inside the interaction radius of
    /// particle `id`, as seen by the force pass.
    pub fn interaction_partners(&self, id: u64) -> Option<Vec<Vec<u64>>> {
        let index = self.particles.all().iter().position(|p| p.id == id)?;
        let particle = &self.particles.all()[index];
        let mut neighbors = Vec::new();
        let partners: Vec<Vec<u64>> = self
            .grids
            .iter()
            .enumerate()
            .map(|(type_id, grid)| {
                let radius = self.rules.distances.get(particle.type_id, type_id);
                grid.nearby(particle, radius, self.config.wrap, &mut neighbors);
                neighbors
                    .iter()
                    .filter(|n| n.index != index)
                    .filter_map(|n| {
                        let other = &self.particles.all()[n.index];
                        let d = other.position + n.offset - particle.position;
                        (d.norm_squared() <= radius * radius).then_some(other.id)
                    })
                    .collect::<Vec<u64>>()
            })
            .collect();
        Some(partners)
    }
}

fn check_type_count(rules: &InteractionRules, particles: &ParticleGroups) -> Result<(), ConfigError> {
    if rules.type_count() != particles.type_count() {
        return Err(ConfigError::TypeCountMismatch {
            expected: rules.type_count(),
            found: particles.type_count(),
        });
    }
    Ok(())
}

fn check_particles(particles: &ParticleGroups) -> Result<(), ConfigError> {
    match particles.all().iter().find(|p| !is_finite(p)) {
        Some(bad) => Err(ConfigError::NonFiniteParticle(bad.id)),
        None => Ok(()),
    }
}

fn build_grids<S: CellStorage>(
    config: &SimulationConfig,
    particles: &ParticleGroups,
) -> Result<Vec<UniformGrid<S>>, ConfigError> {
    let capacity = cell_capacity(config.cell_size, config.ball_radius);
    (0..particles.type_count())
        .map(|type_id| {
            // a cell never holds more than the whole group
            let group_capacity = capacity.min(particles.range(type_id).len().max(1));
            UniformGrid::with_cell_capacity(
                config.cell_size,
                config.canvas_width,
                config.canvas_height,
                group_capacity,
            )
        })
        .collect()
}

fn is_finite(particle: &Particle) -> bool {
    particle.position.iter().all(|v| v.is_finite()) && particle.velocity.iter().all(|v| v.is_finite())
}

fn grid_force<S: CellStorage>(
    i: usize,
    particles: &ParticleGroups,
    grids: &[UniformGrid<S>],
    rules: &InteractionRules,
    wrap: bool,
    neighbors: &mut Vec<Neighbor>,
    counters: &mut ForceCounters,
) -> Velocity {
    let all = particles.all();
    let a = &all[i];
    let mut total = Velocity::zeros();

    for (type_id, grid) in grids.iter().enumerate() {
        let radius = rules.distances.get(a.type_id, type_id);
        let gain = rules.forces.get(a.type_id, type_id);
        let radius_sq = radius * radius;

        grid.nearby(a, radius, wrap, neighbors);
        counters.queries += 1;

        let mut sum = Velocity::zeros();
        for neighbor in neighbors.iter() {
            if neighbor.index == i {
                continue;
            }
            let d = all[neighbor.index].position + neighbor.offset - a.position;
            let distance_sq = d.norm_squared();
            if distance_sq == 0.0 || distance_sq >= radius_sq {
                counters.skipped += 1;
                continue;
            }
            let distance = distance_sq.sqrt();
            sum += d * (force(distance / radius, gain) / distance);
            counters.evaluations += 1;
        }
        total += sum * (radius * FORCE_SCALE);
    }

    total
}

/// Every particle against every particle, over the nine torus images in
/// wrap mode.
fn direct_force(
    i: usize,
    particles: &ParticleGroups,
    rules: &InteractionRules,
    config: &SimulationConfig,
    counters: &mut ForceCounters,
) -> Velocity {
    let all = particles.all();
    let a = &all[i];
    let images: &[f64] = if config.wrap { &[-1.0, 0.0, 1.0] } else { &[0.0] };
    let mut total = Velocity::zeros();

    for type_id in 0..particles.type_count() {
        let radius = rules.distances.get(a.type_id, type_id);
        let gain = rules.forces.get(a.type_id, type_id);
        let radius_sq = radius * radius;
        counters.queries += 1;

        let mut sum = Velocity::zeros();
        for j in particles.range(type_id) {
            if j == i {
                continue;
            }
            for &ix in images {
                for &iy in images {
                    let offset = Velocity::new(ix * config.canvas_width, iy * config.canvas_height);
                    let d = all[j].position + offset - a.position;
                    let distance_sq = d.norm_squared();
                    if distance_sq == 0.0 || distance_sq >= radius_sq {
                        continue;
                    }
                    let distance = distance_sq.sqrt();
                    sum += d * (force(distance / radius, gain) / distance);
                    counters.evaluations += 1;
                }
            }
        }
        total += sum * (radius * FORCE_SCALE);
    }

    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::{Matrix, Position};

    fn rules(types: usize, gain: f64, distance: f64) -> InteractionRules {
        InteractionRules::new(Matrix::filled(types, gain), Matrix::filled(types, distance)).unwrap()
    }

    fn still_config() -> SimulationConfig {
        SimulationConfig {
            canvas_width: 200.0,
            canvas_height: 200.0,
            cell_size: 20.0,
            ball_radius: 0.0,
            parallel: false,
            ..Default::default()
        }
    }

    fn pair(a: Position, b: Position) -> ParticleGroups {
        ParticleGroups::from_groups(vec![vec![Particle::new(0, 0, a), Particle::new(1, 0, b)]])
    }

    #[test]
    fn close_pair_repels() {
        let particles = pair(Position::new(100.0, 100.0), Position::new(104.0, 100.0));
        let mut sim = Simulation::new(still_config(), rules(1, 1.0, 40.0), particles).unwrap();
        sim.step().unwrap();
        let all = sim.particles().all();
        assert!(all[0].velocity.x < 0.0);
        assert!(all[1].velocity.x > 0.0);
        assert!((all[0].velocity + all[1].velocity).norm() < 1e-9);
    }

    #[test]
    fn force_is_scaled_by_radius() {
        // r_norm = 0.15 gives force -0.5, scaled by 40 * 10
        let particles = pair(Position::new(100.0, 100.0), Position::new(106.0, 100.0));
        let config = SimulationConfig { dt: 0.001, ..still_config() };
        let mut sim = Simulation::new(config.clone(), rules(1, 0.0, 40.0), particles).unwrap();
        sim.step().unwrap();
        let expected = -200.0 * config.dt;
        assert!((sim.particles().all()[0].velocity.x - expected).abs() < 1e-9);
    }

    #[test]
    fn counts_evaluations_and_queries() {
        let particles = pair(Position::new(100.0, 100.0), Position::new(110.0, 100.0));
        let mut sim = Simulation::new(still_config(), rules(1, 0.5, 30.0), particles).unwrap();
        let diagnostics = sim.step().unwrap().clone();
        assert_eq!(diagnostics.tick, 1);
        assert_eq!(diagnostics.neighbor_queries, 2);
        assert_eq!(diagnostics.force_evaluations, 2);
        assert_eq!(sim.tick(), 1);
    }

    #[test]
    fn invalid_setter_blocks_until_fixed() {
        let particles = pair(Position::new(50.0, 50.0), Position::new(150.0, 150.0));
        let mut sim = Simulation::new(still_config(), rules(1, 0.0, 30.0), particles).unwrap();

        assert!(sim.set_cell_size(0.0).is_err());
        assert!(!sim.is_runnable());
        assert!(matches!(sim.step(), Err(SimulationError::NotRunnable(ConfigError::InvalidCellSize(_)))));

        sim.set_cell_size(25.0).unwrap();
        assert!(sim.is_runnable());
        assert!(sim.step().is_ok());
        assert_eq!(sim.grids()[0].width(), 8);
    }

    #[test]
    fn rules_with_other_type_count_are_refused() {
        let particles = pair(Position::new(50.0, 50.0), Position::new(150.0, 150.0));
        let mut sim = Simulation::new(still_config(), rules(1, 0.0, 30.0), particles).unwrap();
        let err = sim.set_rules(rules(2, 0.0, 30.0)).unwrap_err();
        assert_eq!(err, ConfigError::TypeCountMismatch { expected: 2, found: 1 });
        assert!(sim.is_runnable());
    }

    #[test]
    fn half_life_updates_friction_factor() {
        let particles = pair(Position::new(50.0, 50.0), Position::new(150.0, 150.0));
        let mut sim = Simulation::new(still_config(), rules(1, 0.0, 30.0), particles).unwrap();
        sim.set_time_step(0.01).unwrap();
        sim.set_half_life(0.01).unwrap();
        assert!((sim.friction_factor() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn corruption_sticks_until_reset() {
        let particles = pair(Position::new(50.0, 50.0), Position::new(150.0, 150.0));
        let mut sim = Simulation::new(still_config(), rules(1, 0.0, 30.0), particles).unwrap();
        sim.particles_mut().all_mut()[1].velocity.x = f64::NAN;

        let err = sim.step().unwrap_err();
        assert!(matches!(err, SimulationError::NumericalCorruption { id: 1, phase: Phase::Rebuild, .. }));
        assert!(sim.step().is_err());
        assert!(sim.set_restitution(0.5).is_ok());
        assert!(!sim.is_runnable());

        let fresh = pair(Position::new(50.0, 50.0), Position::new(150.0, 150.0));
        sim.reset(rules(1, 0.0, 30.0), fresh).unwrap();
        assert!(sim.step().is_ok());
    }

    #[test]
    fn edited_particles_are_seen_by_the_next_force_pass() {
        let particles = pair(Position::new(50.0, 50.0), Position::new(150.0, 100.0));
        let mut sim = Simulation::new(still_config(), rules(1, 1.0, 30.0), particles).unwrap();
        sim.particles_mut().all_mut()[0].position = Position::new(140.0, 100.0);

        let evaluations = sim.step().unwrap().force_evaluations;
        assert_eq!(evaluations, 2);
        // 10 apart at radius 30 is past the repulsive core, so they attract
        let all = sim.particles().all();
        assert!(all[0].velocity.x > 0.0);
        assert!(all[1].velocity.x < 0.0);
    }

    #[test]
    fn non_finite_input_is_rejected() {
        let bad = pair(Position::new(f64::NAN, 50.0), Position::new(150.0, 150.0));
        let err = Simulation::new(still_config(), rules(1, 0.0, 30.0), bad.clone()).unwrap_err();
        assert_eq!(err, ConfigError::NonFiniteParticle(0));

        let good = pair(Position::new(50.0, 50.0), Position::new(150.0, 150.0));
        let mut sim = Simulation::new(still_config(), rules(1, 0.0, 30.0), good).unwrap();
        assert_eq!(sim.reset(rules(1, 0.0, 30.0), bad), Err(ConfigError::NonFiniteParticle(0)));
        assert!(sim.step().is_ok());
        assert_eq!(sim.particles().all()[0].position, Position::new(50.0, 50.0));
    }

    #[test]
    fn runaway_mouse_field_is_caught() {
        let particles = pair(Position::new(50.0, 100.0), Position::new(150.0, 100.0));
        let mut sim = Simulation::new(still_config(), rules(1, 0.0, 10.0), particles).unwrap();
        sim.set_mouse(Some(MouseForce::new(Position::new(100.0, 100.0), f64::INFINITY)));

        let err = sim.step().unwrap_err();
        assert!(matches!(err, SimulationError::NumericalCorruption { phase: Phase::MouseField, .. }));
        assert_eq!(sim.tick(), 0);
    }

    #[test]
    fn mouse_pulls_particles_in() {
        let particles = pair(Position::new(50.0, 100.0), Position::new(150.0, 100.0));
        let mut sim = Simulation::new(still_config(), rules(1, 0.0, 10.0), particles).unwrap();
        sim.set_mouse(Some(MouseForce::new(Position::new(100.0, 100.0), 5.0)));
        sim.step().unwrap();
        let all = sim.particles().all();
        assert!(all[0].velocity.x > 0.0);
        assert!(all[1].velocity.x < 0.0);
    }

    #[test]
    fn partners_respect_interaction_radius() {
        let particles = ParticleGroups::from_groups(vec![
            vec![Particle::new(0, 0, Position::new(100.0, 100.0))],
            vec![
                Particle::new(1, 1, Position::new(120.0, 100.0)),
                Particle::new(2, 1, Position::new(160.0, 100.0)),
            ],
        ]);
        let sim = Simulation::new(still_config(), rules(2, 0.0, 30.0), particles).unwrap();
        let partners = sim.interaction_partners(0).unwrap();
        assert_eq!(partners, vec![Vec::<u64>::new(), vec![1]]);
        assert!(sim.interaction_partners(99).is_none());
    }
}
