//! # frame_loop — Pulse demo
//!
//! A small simulation wired through the full runtime:
//!
//! 1. Startup seeds the world with a `Simulation` resource.
//! 2. `integrate` advances it every frame; `report` runs on a 50 ms period.
//! 3. `emitter` publishes a `Collision` event per frame; `responder` reads
//!    the previous frame's collisions and cancels the loud ones.
//! 4. A watchdog thread cancels the run after half a second.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use pulse_app::{Access, App, CancelToken, LogDiagnostics, Stage, SystemMeta};

#[derive(Debug)]
struct Simulation {
    step: u64,
    energy: f64,
}

#[derive(Debug, Clone)]
struct Collision {
    step: u64,
    impulse: f64,
}

fn main() -> Result<()> {
    // Structured logging; tune with e.g. RUST_LOG=frame_loop=debug.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("frame_loop=info".parse()?))
        .init();

    info!("frame_loop demo starting");

    let mut app = App::new();
    app.set_diagnostics(Arc::new(LogDiagnostics));

    app.add_system(Stage::Startup, "seed", SystemMeta::new(), |_, world| {
        world.insert_resource(Simulation {
            step: 0,
            energy: 100.0,
        });
    });

    app.add_system(
        Stage::Update,
        "integrate",
        SystemMeta::new().with_access(Access::new().resource_write::<Simulation>()),
        |_, world| {
            if let Some(mut sim) = world.resource_mut::<Simulation>() {
                sim.step += 1;
                sim.energy *= 0.999;
            }
        },
    );

    app.add_system(
        Stage::Update,
        "report",
        SystemMeta::new()
            .after("integrate")
            .every(Duration::from_millis(50))
            .with_access(Access::new().resource_read::<Simulation>()),
        |_, world| {
            if let Some(sim) = world.resource::<Simulation>() {
                info!(step = sim.step, energy = sim.energy, "simulation report");
            }
        },
    );

    let collisions = app.events().writer_for::<Collision>();
    app.add_system(
        Stage::Update,
        "emitter",
        SystemMeta::new()
            .after("integrate")
            .with_access(
                Access::new()
                    .resource_read::<Simulation>()
                    .event_write::<Collision>(),
            ),
        move |_, world| {
            if let Some(sim) = world.resource::<Simulation>() {
                collisions.emit(Collision {
                    step: sim.step,
                    impulse: (sim.step % 7) as f64,
                });
            }
        },
    );

    let responses = app.events().reader_for::<Collision>();
    app.add_system(
        Stage::PostUpdate,
        "responder",
        SystemMeta::new().with_access(Access::new().event_read::<Collision>()),
        move |_, _| {
            responses.for_each(|collision| {
                if collision.impulse > 5.0 {
                    info!(step = collision.step, impulse = collision.impulse, "cancelling loud collision");
                    collision.cancel();
                }
                true
            });
        },
    );

    // Keep the frame loop from spinning hot.
    app.add_system(Stage::PostUpdate, "pace", SystemMeta::new(), |_, _| {
        std::thread::sleep(Duration::from_millis(10));
    });

    // The driver owns cancellation; here a watchdog stands in for a real
    // signal handler.
    let cancel = CancelToken::new();
    let stopper = cancel.clone();
    std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(500));
        stopper.cancel();
    });

    app.run(&cancel)?;

    info!("frame_loop demo finished");
    Ok(())
}
