use std::net::SocketAddr;
use std::time::Duration;

use actix_web::dev::Server;
use actix_web::{web, App, HttpServer};
use anyhow::Context;
use helper::pool::Pool;
use helper::prom_metrics::PooledMetrics;
use prometheus::Registry;

use crate::handler::{health, metrics};
use crate::lifecycle::Shutdown;

/// Encoder buffers kept around between scrapes.
const POOLED_ENCODERS: usize = 4;

pub struct MetricsServer {
    server:      Server,
    local_addrs: Vec<SocketAddr>,
}

impl MetricsServer {
    /// Bind the listener right away so a taken port fails the startup.
    ///
    /// Signals are left to the lifecycle group; `grace_period` bounds how
    /// long in-flight scrapes are waited for once stopping.
    pub fn bind(
        addr: SocketAddr,
        registry: Registry,
        grace_period: Duration,
    ) -> anyhow::Result<Self> {
        let registry = web::Data::new(registry);
        let pool = web::Data::new(Pool::<PooledMetrics>::new(POOLED_ENCODERS));

        let server = HttpServer::new(move || {
            App::new()
                .app_data(registry.clone())
                .app_data(pool.clone())
                .route("/metrics", web::get().to(metrics))
                .route("/health", web::get().to(health))
        })
        .disable_signals()
        .shutdown_timeout(grace_period.as_secs())
        .bind(addr)
        .with_context(|| format!("Failed to bind the metrics server on {addr}"))?;

        let local_addrs = server.addrs();
        Ok(Self { server: server.run(), local_addrs })
    }

    pub fn local_addrs(&self) -> &[SocketAddr] { &self.local_addrs }

    /// Serve until the server fails or `shutdown` fires; in the latter case
    /// stop accepting and drain the in-flight requests first.
    pub async fn serve(self, mut shutdown: Shutdown) -> anyhow::Result<()> {
        let handle = self.server.handle();
        let server = self.server;
        tokio::pin!(server);

        info!("Serving metrics on {:?}", self.local_addrs);
        tokio::select! {
            res = &mut server => {
                return res.context("Metrics server stopped unexpectedly");
            }
            _ = shutdown.cancelled() => {}
        }

        info!("Stopping the metrics server");
        handle.stop(true).await;
        server.await.context("Metrics server failed while stopping")?;
        info!("Metrics server stopped");
        Ok(())
    }
}
