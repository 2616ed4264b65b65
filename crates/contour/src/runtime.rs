//! Tick loop
//!
//! A shared [`EngineHandle`] plus a tokio task that ticks it at the
//! configured rate. Hosts keep a clone of the handle to register streams and
//! run reloads; the lock serializes them with the tick.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::clock::ClockSource;
use crate::engine::{Engine, Snapshot};

/// Shared access to one engine.
#[derive(Clone)]
pub struct EngineHandle {
    engine: Arc<Mutex<Engine>>,
}

impl EngineHandle {
    pub fn new(engine: Engine) -> Self {
        Self {
            engine: Arc::new(Mutex::new(engine)),
        }
    }

    /// Lock the engine. A panic on another thread does not poison it for
    /// good: a reload that unwinds aborts its own bracket, so the engine is
    /// still consistent between calls.
    pub fn lock(&self) -> MutexGuard<'_, Engine> {
        self.engine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut Engine) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Snapshot>> {
        self.lock().subscribe()
    }
}

/// A running tick task.
pub struct TickLoop {
    shutdown: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl TickLoop {
    /// Stop ticking, release every voice, and wait for the task to finish.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        // The task may already be gone; joining still reports how it ended
        let _ = self.shutdown.send(());
        self.task.await?;
        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Start `handle`'s engine on `preferred` (or the monotonic fallback) and
/// tick it until [`TickLoop::shutdown`]. Must be called inside a tokio
/// runtime.
pub fn spawn_tick_loop(handle: EngineHandle, preferred: Option<Box<dyn ClockSource>>) -> TickLoop {
    let period = handle.with(|engine| {
        engine.start(preferred);
        Duration::from_secs_f64(engine.config().tick_period_secs())
    });
    let (shutdown, mut shutdown_rx) = broadcast::channel(1);

    let task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!("Tick loop running every {:?}", period);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    handle.with(|engine| engine.tick_now());
                }
                _ = shutdown_rx.recv() => {
                    debug!("tick loop shutting down");
                    break;
                }
            }
        }

        handle.with(Engine::stop);
    });

    TickLoop { shutdown, task }
}
