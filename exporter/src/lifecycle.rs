use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tokio::time;
use tracing::{info, warn};

/// Fires the shared cancellation. Cheap to clone, every clone drives the
/// same signal.
#[derive(Clone)]
pub struct ShutdownTrigger {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownTrigger {
    pub fn trigger(&self) { self.tx.send_replace(true); }
}

/// Observer side of the shared cancellation, handed to every actor.
#[derive(Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    /// Resolves once the shutdown has been triggered, immediately if it
    /// already was. Losing every trigger counts as a shutdown.
    pub async fn cancelled(&mut self) {
        let _ = self.rx.wait_for(|stopping| *stopping).await;
    }
}

pub fn shutdown_channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx: Arc::new(tx) }, Shutdown { rx })
}

type Actor = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// Runs actors concurrently; the first one to return stops all the others.
pub struct Group {
    actors:       Vec<(&'static str, Actor)>,
    trigger:      ShutdownTrigger,
    shutdown:     Shutdown,
    grace_period: Duration,
}

impl Group {
    pub fn new(grace_period: Duration) -> Self {
        let (trigger, shutdown) = shutdown_channel();
        Self { actors: Vec::new(), trigger, shutdown, grace_period }
    }

    pub fn trigger(&self) -> ShutdownTrigger { self.trigger.clone() }

    /// The actor must return soon after its [`Shutdown`] is cancelled.
    pub fn add<F, Fut>(&mut self, name: &'static str, actor: F)
    where
        F: FnOnce(Shutdown) -> Fut,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.actors.push((name, Box::pin(actor(self.shutdown.clone()))));
    }

    /// Block until every actor has returned, or until the grace period
    /// following the first return elapsed, at which point the stragglers
    /// are aborted. The outcome is the one of the first actor to return.
    pub async fn run(self) -> anyhow::Result<()> {
        let Self { actors, trigger, grace_period, .. } = self;

        let mut running = JoinSet::new();
        for (name, actor) in actors {
            running.spawn(async move { (name, actor.await) });
        }

        let first = match running.join_next().await {
            Some(joined) => outcome(joined),
            None => return Ok(()),
        };
        trigger.trigger();

        let drain = async {
            while let Some(joined) = running.join_next().await {
                if let Err(err) = outcome(joined) {
                    warn!("{:?}", err);
                }
            }
        };
        if time::timeout(grace_period, drain).await.is_err() {
            warn!(
                "Actors still running after the grace period of {:?}, \
                 aborting them",
                grace_period
            );
            running.abort_all();
        }

        first
    }
}

fn outcome(
    joined: Result<(&'static str, anyhow::Result<()>), JoinError>,
) -> anyhow::Result<()> {
    match joined {
        Ok((name, Ok(()))) => {
            info!("Actor {} stopped", name);
            Ok(())
        }
        Ok((name, Err(err))) => Err(err.context(format!("Actor {name} failed"))),
        Err(err) => Err(anyhow!(err).context("Actor panicked or was aborted")),
    }
}

#[cfg(unix)]
pub async fn termination_signal() -> io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT");
        }
    }
    Ok(())
}

#[cfg(not(unix))]
pub async fn termination_signal() -> io::Result<()> {
    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C");
    Ok(())
}

/// Signal actor: returns cleanly on `termination` or when a sibling stops
/// first.
pub async fn wait_for_signal<F>(
    termination: F,
    mut shutdown: Shutdown,
) -> anyhow::Result<()>
where
    F: Future<Output = io::Result<()>>,
{
    tokio::select! {
        res = termination => res.map_err(|err| {
            anyhow!(err).context("Failed to listen for termination signals")
        }),
        _ = shutdown.cancelled() => Ok(()),
    }
}
