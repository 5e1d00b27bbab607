//! Per-worker request engine
//!
//! Turns one datagram into at most one reply datagram:
//!
//! ```text
//! Idle ─▶ EnvelopeCheck ─▶ Decode ─▶ Execute ─▶ Encode ─▶ Done
//!              │              │
//!              └──── drop ────┴──────────────────────────▶ Done
//! ```
//!
//! A cancelled shutdown token moves the engine to `Quit` before any further
//! work. The engine never performs I/O; the worker owning it does.

use crate::CacheError;
use crate::ProtocolError;
use crate::metrics::Metrics;
use crate::protocol::{CommandKind, ENVELOPE_LEN, Envelope, Reply, Request, ResponseWriter, parse};
use crate::storage::Cache;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Where the engine is in handling the current datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    EnvelopeCheck,
    Decode,
    Execute,
    Encode,
    Done,
    Quit,
}

/// Why a datagram got no reply
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    #[error("Datagram shorter than the 8-byte frame header")]
    ShortEnvelope,

    #[error("Request spans {count} datagrams")]
    Fragmented { count: u16 },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Outcome of [`RequestEngine::process`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Processed {
    /// Reply datagram, frame header included
    Reply(Bytes),
    Dropped(DropReason),
    /// Shutdown was requested; the worker should stop
    Quit,
}

/// Request state machine, one per worker
pub struct RequestEngine {
    cache: Arc<Cache>,
    metrics: Arc<Metrics>,
    cancel_token: CancellationToken,
    response: ResponseWriter,
    state: State,
}

impl RequestEngine {
    pub fn new(
        cache: Arc<Cache>,
        metrics: Arc<Metrics>,
        cancel_token: CancellationToken,
        send_buffer_size: usize,
    ) -> Self {
        Self {
            cache,
            metrics,
            cancel_token,
            response: ResponseWriter::new(send_buffer_size),
            state: State::Idle,
        }
    }

    /// State reached by the last call to [`RequestEngine::process`]
    pub fn state(&self) -> State {
        self.state
    }

    /// Handle one received datagram
    pub fn process(&mut self, datagram: &[u8]) -> Processed {
        if self.quitting() {
            return Processed::Quit;
        }

        self.state = State::Idle;
        self.response.clear();
        self.metrics.datagrams_received.inc();
        self.metrics.bytes_read.inc_by(datagram.len() as u64);

        self.state = State::EnvelopeCheck;
        let Some(envelope) = Envelope::decode(datagram) else {
            return self.discard(DropReason::ShortEnvelope);
        };
        if envelope.is_fragmented() {
            return self.discard(DropReason::Fragmented {
                count: envelope.count,
            });
        }

        self.state = State::Decode;
        let request = match parse(&datagram[ENVELOPE_LEN..]) {
            Ok(request) => request,
            Err(e) => {
                self.metrics.protocol_errors.inc();
                return self.discard(DropReason::Protocol(e));
            }
        };

        if self.quitting() {
            return Processed::Quit;
        }

        self.state = State::Execute;
        let start = Instant::now();
        let found;
        let reply = match request.command {
            CommandKind::Get => {
                self.metrics.cmd_get.inc();
                match self.cache.find(request.key) {
                    Ok(entry) => {
                        self.metrics.get_hits.inc();
                        found = entry;
                        Reply::Value(found.value())
                    }
                    Err(e) => {
                        self.metrics.get_misses.inc();
                        Reply::Error(e)
                    }
                }
            }
            CommandKind::Set => {
                self.metrics.cmd_set.inc();
                self.execute_set(&request)
            }
        };
        self.metrics
            .cmd_latency
            .observe(start.elapsed().as_secs_f64());

        self.state = State::Encode;
        self.response.envelope(&Envelope::reply(envelope.request_id));
        self.response.reply(&request, &reply);
        let out = self.response.take();
        self.metrics.bytes_written.inc_by(out.len() as u64);

        self.state = State::Done;
        Processed::Reply(out)
    }

    fn execute_set(&self, request: &Request<'_>) -> Reply<'static> {
        let value = request.value.unwrap_or_default();
        match self.cache.replace(request.key, value) {
            Ok(()) => {
                self.metrics.set_stored.inc();
                self.metrics.observe_allocator(self.cache.allocator());
                Reply::Stored
            }
            Err(e) => {
                if e == CacheError::OutOfMemory {
                    self.metrics.set_not_stored.inc();
                }
                trace!(key_len = request.key.len(), value_len = value.len(), "SET failed: {}", e);
                Reply::Error(e)
            }
        }
    }

    fn quitting(&mut self) -> bool {
        if self.cancel_token.is_cancelled() {
            self.state = State::Quit;
        }
        self.state == State::Quit
    }

    fn discard(&mut self, reason: DropReason) -> Processed {
        self.metrics.datagrams_dropped.inc();
        trace!(state = ?self.state, "Dropping datagram: {}", reason);
        self.state = State::Done;
        Processed::Dropped(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::protocol::binary::{HEADER_LEN, Header, status, tests::request};
    use crate::storage::{BucketAllocator, ShardedIndex};

    fn cache(pages: usize) -> Arc<Cache> {
        let config = CacheConfig {
            page_size: 4096,
            min_item_size: 256,
            growth_factor: 2.0,
            max_classes: 4,
            shard_bits: 4,
            ..CacheConfig::default()
        };
        Arc::new(Cache::from_parts(
            BucketAllocator::with_budget(&config, pages * 4096).unwrap(),
            ShardedIndex::new(config.shard_bits),
        ))
    }

    fn engine_with(cache: Arc<Cache>) -> (RequestEngine, Arc<Metrics>, CancellationToken) {
        let metrics = Arc::new(Metrics::new());
        let token = CancellationToken::new();
        let engine = RequestEngine::new(cache, Arc::clone(&metrics), token.clone(), 1024);
        (engine, metrics, token)
    }

    fn engine() -> RequestEngine {
        engine_with(cache(16)).0
    }

    fn frame(request_id: u16, count: u16, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(ENVELOPE_LEN + payload.len());
        out.extend_from_slice(&request_id.to_be_bytes());
        out.extend_from_slice(&0u16.to_be_bytes());
        out.extend_from_slice(&count.to_be_bytes());
        out.extend_from_slice(&0u16.to_be_bytes());
        out.extend_from_slice(payload);
        out
    }

    fn reply_payload(processed: Processed) -> Bytes {
        match processed {
            Processed::Reply(bytes) => bytes.slice(ENVELOPE_LEN..),
            other => panic!("expected a reply, got {other:?}"),
        }
    }

    #[test]
    fn test_set_then_get() {
        let mut engine = engine();

        let stored = engine.process(&frame(1, 1, b"set foo 0 0 3\r\nbar\r\n"));
        assert_eq!(reply_payload(stored).as_ref(), b"STORED\r\n");
        assert_eq!(engine.state(), State::Done);

        let got = engine.process(&frame(2, 1, b"get foo\r\n"));
        assert_eq!(reply_payload(got).as_ref(), b"VALUE foo 0 3\r\nbar\r\nEND\r\n");
    }

    #[test]
    fn test_get_missing() {
        let mut engine = engine();
        let got = engine.process(&frame(1, 1, b"get nope\r\n"));
        assert_eq!(reply_payload(got).as_ref(), b"NOT_FOUND\r\n");
    }

    #[test]
    fn test_reply_envelope_echoes_request_id() {
        let mut engine = engine();
        let Processed::Reply(out) = engine.process(&frame(0xabcd, 1, b"get x\r\n")) else {
            panic!("expected a reply");
        };
        assert_eq!(&out[..ENVELOPE_LEN], &[0xab, 0xcd, 0, 0, 0, 1, 0, 0]);
    }

    #[test]
    fn test_short_envelope_dropped() {
        let (mut engine, metrics, _token) = engine_with(cache(16));
        assert_eq!(
            engine.process(&[0, 1, 0, 0, 0]),
            Processed::Dropped(DropReason::ShortEnvelope)
        );
        assert_eq!(engine.state(), State::Done);
        assert_eq!(metrics.datagrams_dropped.get(), 1);
    }

    #[test]
    fn test_fragmented_dropped() {
        let mut engine = engine();
        assert_eq!(
            engine.process(&frame(1, 2, b"get foo\r\n")),
            Processed::Dropped(DropReason::Fragmented { count: 2 })
        );
    }

    #[test]
    fn test_protocol_errors_dropped() {
        let (mut engine, metrics, _token) = engine_with(cache(16));

        let unsupported = engine.process(&frame(1, 1, b"delete foo\r\n"));
        assert!(matches!(
            unsupported,
            Processed::Dropped(DropReason::Protocol(ref e)) if e.is_unsupported()
        ));

        let malformed = engine.process(&frame(1, 1, b"set foo 0 0\r\n"));
        assert!(matches!(malformed, Processed::Dropped(DropReason::Protocol(_))));

        assert_eq!(metrics.protocol_errors.get(), 2);
        assert_eq!(metrics.datagrams_dropped.get(), 2);
        assert_eq!(metrics.cmd_set.get(), 0);
    }

    #[test]
    fn test_binary_set_and_get() {
        let mut engine = engine();

        let set = request(0x01, &[0; 8], b"key", b"value", 7);
        let out = reply_payload(engine.process(&frame(1, 1, &set)));
        let header = Header::decode(&out).unwrap();
        assert_eq!(header.status, status::NO_ERROR);
        assert_eq!(header.opcode, 0x01);
        assert_eq!(header.opaque, 7);

        let get = request(0x00, &[], b"key", b"", 8);
        let out = reply_payload(engine.process(&frame(2, 1, &get)));
        let header = Header::decode(&out).unwrap();
        assert_eq!(header.status, status::NO_ERROR);
        assert_eq!(header.body_len, 5);
        assert_eq!(&out[HEADER_LEN..], b"value");

        let miss = request(0x00, &[], b"other", b"", 9);
        let out = reply_payload(engine.process(&frame(3, 1, &miss)));
        assert_eq!(Header::decode(&out).unwrap().status, status::KEY_NOT_FOUND);
    }

    #[test]
    fn test_binary_get_with_truncated_value_dropped() {
        let (mut engine, metrics, _token) = engine_with(cache(16));
        engine.process(&frame(1, 1, b"set foo 0 0 3\r\nbar\r\n"));

        let mut get = request(0x00, &[], b"foo", b"", 0);
        get[8..12].copy_from_slice(&8u32.to_be_bytes());
        assert!(matches!(
            engine.process(&frame(2, 1, &get)),
            Processed::Dropped(DropReason::Protocol(ProtocolError::Truncated { section: "value", .. }))
        ));
        assert_eq!(metrics.protocol_errors.get(), 1);
        assert_eq!(metrics.cmd_get.get(), 0);
    }

    #[test]
    fn test_out_of_memory_is_not_stored() {
        // Budget covers only the first page of each class; the 2048 class holds two
        let (mut engine, metrics, _token) = engine_with(cache(4));
        let value = vec![b'x'; 2000];
        let mut set = b"set k 0 0 2000\r\n".to_vec();
        set.extend_from_slice(&value);

        for _ in 0..2 {
            assert_eq!(
                reply_payload(engine.process(&frame(1, 1, &set))).as_ref(),
                b"STORED\r\n"
            );
        }
        assert_eq!(
            reply_payload(engine.process(&frame(1, 1, &set))).as_ref(),
            b"NOT_STORED\r\n"
        );
        assert_eq!(metrics.set_not_stored.get(), 1);

        // Previous value is still served
        let got = reply_payload(engine.process(&frame(2, 1, b"get k\r\n")));
        assert!(got.starts_with(b"VALUE k 0 2000\r\n"));
    }

    #[test]
    fn test_too_large_is_server_error() {
        let mut engine = engine();
        let mut set = b"set big 0 0 3000\r\n".to_vec();
        set.extend_from_slice(&[b'x'; 3000]);
        assert_eq!(
            reply_payload(engine.process(&frame(1, 1, &set))).as_ref(),
            b"SERVER ERROR 5\r\n"
        );
    }

    #[test]
    fn test_quit_after_cancel() {
        let (mut engine, _metrics, token) = engine_with(cache(16));
        token.cancel();
        assert_eq!(engine.process(&frame(1, 1, b"get foo\r\n")), Processed::Quit);
        assert_eq!(engine.state(), State::Quit);
        // Stays quit
        assert_eq!(engine.process(&frame(2, 1, b"get foo\r\n")), Processed::Quit);
    }

    #[test]
    fn test_metrics_counted() {
        let (mut engine, metrics, _token) = engine_with(cache(16));
        engine.process(&frame(1, 1, b"set a 0 0 1\r\nx\r\n"));
        engine.process(&frame(2, 1, b"get a\r\n"));
        engine.process(&frame(3, 1, b"get b\r\n"));

        assert_eq!(metrics.cmd_set.get(), 1);
        assert_eq!(metrics.set_stored.get(), 1);
        assert_eq!(metrics.cmd_get.get(), 2);
        assert_eq!(metrics.get_hits.get(), 1);
        assert_eq!(metrics.get_misses.get(), 1);
        assert_eq!(metrics.datagrams_received.get(), 3);
        assert!(metrics.pages_assigned.get() >= 4);
    }
}
