//! udp_tester - time binary GET/SET round trips against a bucketcache server
//!
//! SET stores `<key>.<n>` for n in `0..count`; GET fetches `<key>` itself.
//! Every reply is decoded and logged with its latency, and the average is
//! reported once the run ends or is interrupted.

use bucketcache::protocol::binary::{Response, decode_response, encode_request};
use bucketcache::protocol::{CommandKind, ENVELOPE_LEN, Envelope};
use bytes::BytesMut;
use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::runtime::Builder;
use tracing::{debug, info, warn};

#[derive(Parser, Debug)]
#[command(name = "udp_tester")]
#[command(about = "Send binary GET/SET requests to a bucketcache server and time the replies")]
#[command(version)]
struct Cli {
    /// Operation to send
    #[arg(value_enum, ignore_case = true)]
    op: Op,

    /// Key, suffixed with ".<n>" for every SET
    key: String,

    /// Value to store (SET only)
    value: Option<String>,

    /// Server address
    #[arg(long, default_value = "127.0.0.1:11211")]
    server: SocketAddr,

    /// Number of requests [default: 100000 for SET, 1 for GET]
    #[arg(long)]
    count: Option<usize>,

    /// How long to wait for each reply, in milliseconds
    #[arg(long, default_value_t = 1000)]
    timeout_ms: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Op {
    Get,
    Set,
}

impl From<Op> for CommandKind {
    fn from(op: Op) -> Self {
        match op {
            Op::Get => CommandKind::Get,
            Op::Set => CommandKind::Set,
        }
    }
}

/// Latency totals over a run
#[derive(Debug, Default)]
struct Summary {
    replies: u64,
    timeouts: u64,
    total: Duration,
}

impl Summary {
    fn record(&mut self, elapsed: Duration) {
        self.replies += 1;
        self.total += elapsed;
    }

    fn average(&self) -> Option<Duration> {
        (self.replies > 0).then(|| self.total / self.replies as u32)
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    if cli.op == Op::Set && cli.value.is_none() {
        anyhow::bail!("SET needs a value");
    }

    let runtime = Builder::new_current_thread().enable_all().build()?;
    let summary = runtime.block_on(run(&cli))?;

    match summary.average() {
        Some(avg) => info!(
            replies = summary.replies,
            timeouts = summary.timeouts,
            avg_us = avg.as_micros() as u64,
            "Average round trip"
        ),
        None => warn!(timeouts = summary.timeouts, "No replies received"),
    }
    Ok(())
}

async fn run(cli: &Cli) -> anyhow::Result<Summary> {
    let command = CommandKind::from(cli.op);
    let count = cli.count.unwrap_or(match cli.op {
        Op::Set => 100_000,
        Op::Get => 1,
    });
    let value: &[u8] = match cli.op {
        Op::Set => cli.value.as_deref().unwrap_or_default().as_bytes(),
        Op::Get => &[],
    };
    let timeout = Duration::from_millis(cli.timeout_ms);

    let local: SocketAddr = if cli.server.is_ipv4() {
        "0.0.0.0:0".parse()?
    } else {
        "[::]:0".parse()?
    };
    let socket = UdpSocket::bind(local).await?;
    socket.connect(cli.server).await?;
    info!(server = %cli.server, ?command, count, "Sending requests");

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut out = BytesMut::with_capacity(1024);
    let mut buf = vec![0u8; 65536];
    let mut summary = Summary::default();

    for i in 0..count {
        let key = match cli.op {
            Op::Set => format!("{}.{i}", cli.key),
            Op::Get => cli.key.clone(),
        };
        // Request ids wrap; the opaque carries the full sequence number
        let request_id = i as u16;

        out.clear();
        Envelope::request(request_id).encode(&mut out);
        encode_request(&mut out, command, &[], key.as_bytes(), value, i as u32);

        let start = Instant::now();
        socket.send(&out).await?;

        tokio::select! {
            biased;
            _ = &mut shutdown => {
                info!(sent = i + 1, "Interrupted");
                break;
            }
            reply = tokio::time::timeout(timeout, recv_reply(&socket, request_id, &mut buf)) => {
                match reply {
                    Ok(len) => {
                        let elapsed = start.elapsed();
                        summary.record(elapsed);
                        report(&key, &buf[ENVELOPE_LEN..len?], elapsed);
                    }
                    Err(_) => {
                        summary.timeouts += 1;
                        warn!(key = %key, timeout_ms = cli.timeout_ms, "No reply");
                    }
                }
            }
        }
    }

    Ok(summary)
}

/// Receive until the reply to `request_id` arrives, returning its length
///
/// Late replies to earlier, timed out requests are skipped.
async fn recv_reply(socket: &UdpSocket, request_id: u16, buf: &mut [u8]) -> std::io::Result<usize> {
    loop {
        let len = socket.recv(buf).await?;
        match Envelope::decode(&buf[..len]) {
            Some(envelope) if envelope.request_id == request_id => return Ok(len),
            Some(envelope) => debug!(request_id = envelope.request_id, "Skipping stale reply"),
            None => debug!(len, "Skipping runt datagram"),
        }
    }
}

fn report(key: &str, payload: &[u8], elapsed: Duration) {
    match decode_response(payload) {
        Ok(Response { header, value, .. }) => {
            info!(
                key,
                opcode = header.opcode,
                status = header.status,
                body_len = header.body_len,
                opaque = header.opaque,
                elapsed_us = elapsed.as_micros() as u64,
                "Reply"
            );
            if !value.is_empty() {
                debug!(value = %String::from_utf8_lossy(value), "Value");
            }
        }
        Err(e) => warn!(key, error = %e, "Undecodable reply"),
    }
}
