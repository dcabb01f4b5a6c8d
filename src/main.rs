use std::error::Error;

use log::{error, info};

use particle_life_sim::app_settings::{AppSettings, StorageKind};
use particle_life_sim::physics::{CellStorage, DynamicCells, SlabCells};
use particle_life_sim::scheduler;

async fn run<S: CellStorage + 'static>(settings: AppSettings) -> Result<(), Box<dyn Error>> {
    let simulation = settings.build_simulation::<S>()?;
    let handle = scheduler::spawn(simulation, settings.run.scheduler);

    // the frame channel closes when the loop stops by itself
    let mut frames = handle.frames();
    let stopped = async { while frames.changed().await.is_ok() {} };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("interrupt received");
        }
        _ = stopped => {}
    }

    let finished = handle.shutdown().await?;
    let report = finished.report;
    info!(
        "stopped after {} ticks ({} dropped triggers, {} rejected commands)",
        report.ticks, report.dropped_triggers, report.rejected_commands
    );
    if let Some(err) = report.last_error {
        error!("last simulation error: {err}");
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| AppSettings::SETTINGS_FILE.to_string());
    let settings = match AppSettings::load(&path) {
        Ok(settings) => settings,
        Err(err) => {
            error!("{err}");
            std::process::exit(1);
        }
    };
    info!(
        "{} types, {} particles, {:?} storage",
        settings.particles.counts.len(),
        settings.particles.counts.iter().sum::<usize>(),
        settings.run.storage
    );

    let result = match settings.run.storage {
        StorageKind::Dynamic => run::<DynamicCells>(settings).await,
        StorageKind::Slab => run::<SlabCells>(settings).await,
    };
    if let Err(err) = result {
        error!("{err}");
        std::process::exit(1);
    }
}
