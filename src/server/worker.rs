//! Receive/process/send loop of one worker

use super::transport::Transport;
use crate::engine::{Processed, RequestEngine};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// One worker: a request engine and a receive buffer over a shared transport
pub(crate) struct Worker<T> {
    id: usize,
    transport: Arc<T>,
    engine: RequestEngine,
    recv_buf: Vec<u8>,
    cancel_token: CancellationToken,
}

impl<T: Transport> Worker<T> {
    pub(crate) fn new(
        id: usize,
        transport: Arc<T>,
        engine: RequestEngine,
        recv_buffer_size: usize,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            id,
            transport,
            engine,
            recv_buf: vec![0; recv_buffer_size],
            cancel_token,
        }
    }

    /// Serve datagrams until cancelled
    pub(crate) async fn run(mut self) {
        debug!(worker = self.id, "Worker started");

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    break;
                }
                result = self.transport.recv_from(&mut self.recv_buf) => {
                    match result {
                        Ok((n, peer)) => {
                            match self.engine.process(&self.recv_buf[..n]) {
                                Processed::Reply(reply) => {
                                    if let Err(e) = self.transport.send_to(&reply, peer).await {
                                        debug!(worker = self.id, %peer, "Send error: {}", e);
                                    }
                                }
                                Processed::Dropped(reason) => {
                                    trace!(worker = self.id, %peer, "No reply: {}", reason);
                                }
                                Processed::Quit => break,
                            }
                        }
                        Err(e) => {
                            // Transient on UDP (e.g. ICMP port unreachable surfacing on recv)
                            debug!(worker = self.id, "Receive error: {}", e);
                        }
                    }
                }
            }
        }

        debug!(worker = self.id, "Worker stopped");
    }
}
