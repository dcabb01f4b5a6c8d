//! Fixed-rate stepping loop with a command queue.
//!
//! The loop owns the [`Simulation`] and runs on the tokio runtime:
//! - an interval with [`MissedTickBehavior::Skip`] fires the ticks, so an
//!   overrunning tick drops later triggers instead of queueing them
//! - each tick runs on the blocking pool with the simulation moved in and back
//! - commands wait in an unbounded channel and are applied between ticks
//! - every completed tick is published as a [`Frame`] on a watch channel

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::physics::{
    CellStorage, DynamicCells, InteractionRules, MouseForce, ParticleGroups, Simulation,
    SimulationError,
};
use crate::snapshot::Frame;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Target time between ticks, in milliseconds.
    pub tick_interval_ms: f64,
    /// Quiet period after the last resize before ticking resumes.
    pub resize_debounce_ms: u64,
    /// Stop on its own after this many ticks.
    pub tick_limit: Option<u64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000.0 / 60.0,
            resize_debounce_ms: 500,
            tick_limit: None,
        }
    }
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(self.tick_interval_ms.max(0.1) / 1000.0)
    }

    pub fn resize_debounce(&self) -> Duration {
        Duration::from_millis(self.resize_debounce_ms)
    }
}

/// Requests applied to the running simulation between ticks.
#[derive(Debug, Clone)]
pub enum Command {
    SetRules(InteractionRules),
    SetWrap(bool),
    SetCellSize(f64),
    SetBallRadius(f64),
    SetRestitution(f64),
    SetHalfLife(f64),
    SetTimeStep(f64),
    SetMouse(Option<MouseForce>),
    Resize { width: f64, height: f64 },
    Reset { rules: InteractionRules, particles: ParticleGroups },
    SetTickInterval(Duration),
    Pause,
    Resume,
    Shutdown,
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("the simulation loop has stopped")]
    Closed,
    #[error("a simulation step panicked: {0}")]
    StepPanicked(#[from] tokio::task::JoinError),
}

/// Totals over the lifetime of one loop.
#[derive(Debug, Clone, Default)]
pub struct SchedulerReport {
    pub ticks: u64,
    pub dropped_triggers: u64,
    pub rejected_commands: u64,
    pub last_error: Option<SimulationError>,
}

/// What the loop hands back when it stops.
#[derive(Debug)]
pub struct Finished<S: CellStorage = DynamicCells> {
    pub simulation: Simulation<S>,
    pub report: SchedulerReport,
}

pub struct SimulationHandle<S: CellStorage = DynamicCells> {
    commands: mpsc::UnboundedSender<Command>,
    frames: watch::Receiver<Arc<Frame>>,
    task: JoinHandle<Result<Finished<S>, SchedulerError>>,
}

impl<S: CellStorage + 'static> SimulationHandle<S> {
    pub fn send(&self, command: Command) -> Result<(), SchedulerError> {
        self.commands.send(command).map_err(|_| SchedulerError::Closed)
    }

    pub fn pause(&self) -> Result<(), SchedulerError> {
        self.send(Command::Pause)
    }

    pub fn resume(&self) -> Result<(), SchedulerError> {
        self.send(Command::Resume)
    }

    /// A receiver that sees every frame published from now on.
    pub fn frames(&self) -> watch::Receiver<Arc<Frame>> {
        self.frames.clone()
    }

    pub fn latest(&self) -> Arc<Frame> {
        self.frames.borrow().clone()
    }

    /// Stops the loop after the tick in flight and returns the simulation.
    pub async fn shutdown(self) -> Result<Finished<S>, SchedulerError> {
        // the loop may already be gone after hitting its tick limit
        let _ = self.commands.send(Command::Shutdown);
        self.task.await?
    }

    /// Waits for the loop to stop by itself.
    pub async fn join(self) -> Result<Finished<S>, SchedulerError> {
        self.task.await?
    }
}

/// Starts the loop on the current tokio runtime.
pub fn spawn<S: CellStorage + 'static>(
    simulation: Simulation<S>,
    config: SchedulerConfig,
) -> SimulationHandle<S> {
    let (commands, receiver) = mpsc::unbounded_channel();
    let (publisher, frames) = watch::channel(Arc::new(simulation.frame()));
    let task = tokio::spawn(run(simulation, config, receiver, publisher));
    SimulationHandle {
        commands,
        frames,
        task,
    }
}

/// Tick-rate tracking over a rolling window.
struct Clock {
    last_time: Instant,
    dt_history: Vec<f64>,
    target_rate: f64,
}

impl Clock {
    const WINDOW: usize = 60;

    fn new(target_rate: f64) -> Self {
        Self {
            last_time: Instant::now(),
            dt_history: Vec::with_capacity(Self::WINDOW),
            target_rate,
        }
    }

    fn tick(&mut self) {
        let now = Instant::now();
        self.dt_history.push(now.duration_since(self.last_time).as_secs_f64());
        self.last_time = now;
        if self.dt_history.len() > Self::WINDOW {
            self.dt_history.remove(0);
        }
    }

    fn average_rate(&self) -> f64 {
        if self.dt_history.is_empty() {
            return self.target_rate;
        }
        let average = self.dt_history.iter().sum::<f64>() / self.dt_history.len() as f64;
        if average > 0.0 {
            1.0 / average
        } else {
            self.target_rate
        }
    }
}

struct PendingResize {
    width: f64,
    height: f64,
    deadline: Instant,
}

/// Loop control state.
struct Loop {
    pause: bool,
    resize: Option<PendingResize>,
    tick_interval: Duration,
}

impl Loop {
    fn new(tick_interval: Duration) -> Self {
        Self {
            pause: false,
            resize: None,
            tick_interval,
        }
    }

    fn resizing(&self, now: Instant) -> bool {
        self.resize.as_ref().is_some_and(|pending| now < pending.deadline)
    }
}

fn ticker(period: Duration) -> time::Interval {
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

async fn run<S: CellStorage + 'static>(
    mut simulation: Simulation<S>,
    config: SchedulerConfig,
    mut commands: mpsc::UnboundedReceiver<Command>,
    frames: watch::Sender<Arc<Frame>>,
) -> Result<Finished<S>, SchedulerError> {
    let mut control = Loop::new(config.tick_interval());
    let mut interval = ticker(control.tick_interval);
    let mut clock = Clock::new(1.0 / control.tick_interval.as_secs_f64());
    let mut report = SchedulerReport::default();
    let mut last_scheduled: Option<Instant> = None;
    let mut last_log = Instant::now();

    info!(
        "simulation loop started, {:.2} ms per tick",
        control.tick_interval.as_secs_f64() * 1000.0
    );

    loop {
        tokio::select! {
            biased;

            command = commands.recv() => {
                let Some(command) = command else {
                    info!("all handles dropped, stopping simulation loop");
                    break;
                };
                if matches!(command, Command::Shutdown) {
                    info!("shutdown requested after {} ticks", report.ticks);
                    break;
                }
                if let Some(period) = apply(&mut simulation, &mut control, &mut report, command, &config) {
                    interval = ticker(period);
                    last_scheduled = None;
                }
            }

            scheduled = interval.tick() => {
                if let Some(previous) = last_scheduled {
                    let periods = (scheduled - previous).as_nanos() / control.tick_interval.as_nanos().max(1);
                    report.dropped_triggers += (periods as u64).saturating_sub(1);
                }
                last_scheduled = Some(scheduled);

                let now = Instant::now();
                if control.resizing(now) {
                    continue;
                }
                if let Some(pending) = control.resize.take() {
                    if simulation.resize(pending.width, pending.height).is_err() {
                        report.rejected_commands += 1;
                    }
                }
                if control.pause || !simulation.is_runnable() {
                    continue;
                }

                let (returned, result) = tokio::task::spawn_blocking(move || {
                    let result = simulation.step().map(|_| ());
                    (simulation, result)
                })
                .await?;
                simulation = returned;

                match result {
                    Ok(()) => {
                        report.ticks += 1;
                        clock.tick();
                        frames.send_replace(Arc::new(simulation.frame()));
                    }
                    Err(err) => {
                        error!("simulation halted: {err}");
                        report.last_error = Some(err);
                    }
                }

                if last_log.elapsed() >= Duration::from_secs(1) {
                    let diagnostics = simulation.diagnostics();
                    debug!(
                        "tick {}: {:.1} ticks/s, {} force evaluations, {} collisions, step {:.2} ms, {} dropped triggers",
                        diagnostics.tick,
                        clock.average_rate(),
                        diagnostics.force_evaluations,
                        diagnostics.collisions,
                        diagnostics.total_time.as_secs_f64() * 1000.0,
                        report.dropped_triggers
                    );
                    last_log = Instant::now();
                }

                if config.tick_limit.is_some_and(|limit| simulation.tick() >= limit) {
                    info!("tick limit of {} reached", simulation.tick());
                    break;
                }
            }
        }
    }

    Ok(Finished { simulation, report })
}

/// Applies one command. Returns the new tick period when it changed.
fn apply<S: CellStorage>(
    simulation: &mut Simulation<S>,
    control: &mut Loop,
    report: &mut SchedulerReport,
    command: Command,
    config: &SchedulerConfig,
) -> Option<Duration> {
    let result = match command {
        Command::SetRules(rules) => simulation.set_rules(rules),
        Command::SetWrap(wrap) => simulation.set_wrap(wrap),
        Command::SetCellSize(cell_size) => simulation.set_cell_size(cell_size),
        Command::SetBallRadius(radius) => simulation.set_ball_radius(radius),
        Command::SetRestitution(restitution) => simulation.set_restitution(restitution),
        Command::SetHalfLife(t_half) => simulation.set_half_life(t_half),
        Command::SetTimeStep(dt) => simulation.set_time_step(dt),
        Command::SetMouse(mouse) => {
            simulation.set_mouse(mouse);
            Ok(())
        }
        Command::Reset { rules, particles } => simulation.reset(rules, particles),
        Command::Resize { width, height } => {
            control.resize = Some(PendingResize {
                width,
                height,
                deadline: Instant::now() + config.resize_debounce(),
            });
            Ok(())
        }
        Command::SetTickInterval(period) => {
            if period.is_zero() {
                warn!("ignoring zero tick interval");
                report.rejected_commands += 1;
                return None;
            }
            info!("tick interval set to {:.2} ms", period.as_secs_f64() * 1000.0);
            control.tick_interval = period;
            return Some(period);
        }
        Command::Pause => {
            info!("paused at tick {}", simulation.tick());
            control.pause = true;
            Ok(())
        }
        Command::Resume => {
            info!("resumed at tick {}", simulation.tick());
            control.pause = false;
            Ok(())
        }
        Command::Shutdown => Ok(()),
    };

    if result.is_err() {
        report.rejected_commands += 1;
    }
    None
}
