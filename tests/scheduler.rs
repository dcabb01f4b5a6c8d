use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::watch;
use tokio::time::{sleep, timeout};

use particle_life_sim::physics::{
    InteractionRules, ParticleGroups, RandomMatrixGenerator, RandomPositionSetter, Simulation,
    SimulationConfig,
};
use particle_life_sim::scheduler::{self, Command, SchedulerConfig};
use particle_life_sim::Frame;

fn small_simulation() -> Simulation {
    let config = SimulationConfig {
        canvas_width: 200.0,
        canvas_height: 200.0,
        cell_size: 25.0,
        parallel: false,
        ..Default::default()
    };
    let mut rng = StdRng::seed_from_u64(12);
    let rules = InteractionRules::generate(2, &RandomMatrixGenerator, 20.0..40.0, &mut rng).unwrap();
    let particles = ParticleGroups::seeded(&[20, 20], config.bounds(), &RandomPositionSetter, &mut rng);
    Simulation::new(config, rules, particles).unwrap()
}

fn fast(tick_limit: Option<u64>) -> SchedulerConfig {
    SchedulerConfig {
        tick_interval_ms: 1.0,
        resize_debounce_ms: 150,
        tick_limit,
    }
}

async fn wait_for_tick(frames: &mut watch::Receiver<Arc<Frame>>, tick: u64) -> u64 {
    let frame = timeout(Duration::from_secs(5), frames.wait_for(|frame| frame.tick >= tick))
        .await
        .expect("ticks stalled")
        .expect("loop stopped");
    frame.tick
}

#[tokio::test]
async fn stops_at_tick_limit() {
    let handle = scheduler::spawn(small_simulation(), fast(Some(5)));
    let frames = handle.frames();

    let finished = timeout(Duration::from_secs(5), handle.join())
        .await
        .expect("loop did not stop")
        .unwrap();
    assert_eq!(finished.simulation.tick(), 5);
    assert_eq!(finished.report.ticks, 5);
    assert_eq!(frames.borrow().tick, 5);
}

#[tokio::test]
async fn commands_apply_between_ticks() {
    let handle = scheduler::spawn(small_simulation(), fast(None));
    let mut frames = handle.frames();
    let seen = wait_for_tick(&mut frames, 2).await;

    handle.send(Command::SetWrap(true)).unwrap();
    handle.send(Command::SetRestitution(0.3)).unwrap();
    handle.send(Command::SetHalfLife(0.08)).unwrap();
    wait_for_tick(&mut frames, seen + 2).await;

    let finished = handle.shutdown().await.unwrap();
    let config = finished.simulation.config();
    assert!(config.wrap);
    assert_eq!(config.restitution, 0.3);
    assert_eq!(config.t_half, 0.08);
    assert_eq!(finished.report.rejected_commands, 0);
}

#[tokio::test]
async fn rejected_commands_halt_until_fixed() {
    let handle = scheduler::spawn(small_simulation(), fast(None));
    let mut frames = handle.frames();
    wait_for_tick(&mut frames, 1).await;

    handle.send(Command::SetCellSize(-1.0)).unwrap();
    handle.send(Command::SetTickInterval(Duration::ZERO)).unwrap();
    sleep(Duration::from_millis(30)).await;
    let stalled = handle.latest().tick;
    sleep(Duration::from_millis(30)).await;
    assert_eq!(handle.latest().tick, stalled);

    handle.send(Command::SetCellSize(20.0)).unwrap();
    wait_for_tick(&mut frames, stalled + 1).await;

    let finished = handle.shutdown().await.unwrap();
    assert_eq!(finished.report.rejected_commands, 2);
    assert!(finished.simulation.is_runnable());
}

#[tokio::test]
async fn pause_stops_frames() {
    let handle = scheduler::spawn(small_simulation(), fast(None));
    let mut frames = handle.frames();
    wait_for_tick(&mut frames, 2).await;

    handle.pause().unwrap();
    sleep(Duration::from_millis(30)).await;
    let paused_at = handle.latest().tick;
    sleep(Duration::from_millis(50)).await;
    assert_eq!(handle.latest().tick, paused_at);

    handle.resume().unwrap();
    wait_for_tick(&mut frames, paused_at + 1).await;
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn resize_waits_for_quiet_period() {
    let handle = scheduler::spawn(small_simulation(), fast(None));
    let mut frames = handle.frames();
    wait_for_tick(&mut frames, 2).await;

    handle
        .send(Command::Resize {
            width: 160.0,
            height: 120.0,
        })
        .unwrap();
    sleep(Duration::from_millis(30)).await;
    let held_at = handle.latest().tick;
    sleep(Duration::from_millis(60)).await;
    assert_eq!(handle.latest().tick, held_at);

    wait_for_tick(&mut frames, held_at + 1).await;
    let finished = handle.shutdown().await.unwrap();
    let config = finished.simulation.config();
    assert_eq!((config.canvas_width, config.canvas_height), (160.0, 120.0));
    for p in finished.simulation.particles().all() {
        assert!(p.position.x <= 160.0 && p.position.y <= 120.0);
    }
}
