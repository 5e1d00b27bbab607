//! UDP server for the memcached protocols

mod transport;
mod worker;

pub use transport::Transport;

use crate::config::ServerConfig;
use crate::engine::RequestEngine;
use crate::metrics::Metrics;
use crate::storage::Cache;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use worker::Worker;

/// Main server struct
pub struct Server<T = UdpSocket> {
    config: ServerConfig,
    transport: Arc<T>,
    cache: Arc<Cache>,
    metrics: Arc<Metrics>,
    cancel_token: CancellationToken,
}

impl Server<UdpSocket> {
    /// Bind a UDP socket on the configured address
    pub async fn bind(
        config: ServerConfig,
        cache: Arc<Cache>,
        metrics: Arc<Metrics>,
        cancel_token: CancellationToken,
    ) -> anyhow::Result<Self> {
        let addr: SocketAddr = config.listen_addr.parse()?;
        let socket = UdpSocket::bind(addr).await?;
        info!("Server listening on {}/udp", socket.local_addr()?);

        Ok(Self::with_transport(
            config,
            Arc::new(socket),
            cache,
            metrics,
            cancel_token,
        ))
    }
}

impl<T: Transport> Server<T> {
    /// Create a server over an already open transport
    pub fn with_transport(
        config: ServerConfig,
        transport: Arc<T>,
        cache: Arc<Cache>,
        metrics: Arc<Metrics>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            config,
            transport,
            cache,
            metrics,
            cancel_token,
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.transport.local_addr()
    }

    /// Run the workers until the cancel token fires
    pub async fn run(self) -> anyhow::Result<()> {
        let workers = self.config.effective_workers();
        info!("Starting {} workers", workers);

        let mut tasks = JoinSet::new();
        for id in 0..workers {
            let engine = RequestEngine::new(
                Arc::clone(&self.cache),
                Arc::clone(&self.metrics),
                self.cancel_token.clone(),
                self.config.send_buffer_size,
            );
            let worker = Worker::new(
                id,
                Arc::clone(&self.transport),
                engine,
                self.config.recv_buffer_size,
                self.cancel_token.clone(),
            );
            tasks.spawn(worker.run());
        }

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!("Worker task failed: {}", e);
                // Take the rest of the server down with it
                self.cancel_token.cancel();
            }
        }

        info!("Server shutting down");
        Ok(())
    }
}
