//! UDP round trips against a running server.

use bucketcache::config::{CacheConfig, ServerConfig};
use bucketcache::protocol::CommandKind;
use bucketcache::protocol::binary::{decode_response, encode_request, status};
use bytes::BytesMut;
use bucketcache::metrics::Metrics;
use bucketcache::server::Server;
use bucketcache::storage::Cache;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

struct TestServer {
    addr: SocketAddr,
    metrics: Arc<Metrics>,
    cancel_token: CancellationToken,
    handle: tokio::task::JoinHandle<anyhow::Result<()>>,
}

async fn start_server(workers: usize) -> TestServer {
    let cache_config = CacheConfig {
        memory_limit_mb: 32,
        shard_bits: 10,
        ..CacheConfig::default()
    };
    let server_config = ServerConfig {
        listen_addr: "127.0.0.1:0".to_string(),
        workers,
        ..ServerConfig::default()
    };

    let cache = Arc::new(Cache::new(&cache_config).unwrap());
    let metrics = Arc::new(Metrics::new());
    let cancel_token = CancellationToken::new();
    let server = Server::bind(
        server_config,
        cache,
        Arc::clone(&metrics),
        cancel_token.clone(),
    )
    .await
    .unwrap();
    let addr = server.local_addr().unwrap();

    TestServer {
        addr,
        metrics,
        cancel_token,
        handle: tokio::spawn(server.run()),
    }
}

fn frame(request_id: u16, payload: &[u8]) -> Vec<u8> {
    let mut out = request_id.to_be_bytes().to_vec();
    out.extend_from_slice(&[0, 0, 0, 1, 0, 0]);
    out.extend_from_slice(payload);
    out
}

async fn round_trip(client: &UdpSocket, server: SocketAddr, request_id: u16, payload: &[u8]) -> Vec<u8> {
    client.send_to(&frame(request_id, payload), server).await.unwrap();
    let mut buf = vec![0u8; 65536];
    let (n, from) = tokio::time::timeout(Duration::from_secs(5), client.recv_from(&mut buf))
        .await
        .expect("reply timed out")
        .unwrap();
    assert_eq!(from, server);
    assert_eq!(&buf[..2], &request_id.to_be_bytes());
    assert_eq!(&buf[2..8], &[0, 0, 0, 1, 0, 0]);
    buf[8..n].to_vec()
}

#[tokio::test]
async fn test_set_get_over_udp() {
    let server = start_server(2).await;
    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    assert_eq!(
        round_trip(&client, server.addr, 1, b"set foo 0 0 3\r\nbar\r\n").await,
        b"STORED\r\n"
    );
    assert_eq!(
        round_trip(&client, server.addr, 2, b"get foo\r\n").await,
        b"VALUE foo 0 3\r\nbar\r\nEND\r\n"
    );
    assert_eq!(
        round_trip(&client, server.addr, 3, b"get missing\r\n").await,
        b"NOT_FOUND\r\n"
    );

    server.cancel_token.cancel();
    server.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_malformed_datagram_gets_no_reply() {
    let server = start_server(1).await;
    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    client
        .send_to(&frame(9, b"bogus\r\n"), server.addr)
        .await
        .unwrap();

    // The next valid request is the first thing answered
    assert_eq!(
        round_trip(&client, server.addr, 10, b"get foo\r\n").await,
        b"NOT_FOUND\r\n"
    );
    assert_eq!(server.metrics.protocol_errors.get(), 1);
    assert_eq!(server.metrics.datagrams_dropped.get(), 1);

    server.cancel_token.cancel();
    server.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_binary_over_udp() {
    let server = start_server(1).await;
    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    let mut set = vec![0u8; 24];
    set[0] = 0x80;
    set[1] = 0x01;
    set[2..4].copy_from_slice(&1u16.to_be_bytes());
    set[4] = 8;
    set[8..12].copy_from_slice(&(8u32 + 1 + 2).to_be_bytes());
    set.extend_from_slice(&[0; 8]);
    set.extend_from_slice(b"k");
    set.extend_from_slice(b"hi");

    let out = round_trip(&client, server.addr, 1, &set).await;
    assert_eq!(out.len(), 24);
    assert_eq!(out[0], 0x81);
    assert_eq!(out[1], 0x01);
    assert_eq!(&out[6..8], &[0, 0]);

    assert_eq!(
        round_trip(&client, server.addr, 2, b"get k\r\n").await,
        b"VALUE k 0 2\r\nhi\r\nEND\r\n"
    );

    server.cancel_token.cancel();
    server.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_binary_packet_builders_over_udp() {
    let server = start_server(2).await;
    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    for i in 0..3u32 {
        let mut set = BytesMut::new();
        let key = format!("key.{i}");
        encode_request(&mut set, CommandKind::Set, &[], key.as_bytes(), b"value", i);
        let out = round_trip(&client, server.addr, i as u16, &set).await;
        let resp = decode_response(&out).unwrap();
        assert_eq!(resp.header.status, status::NO_ERROR);
        assert_eq!(resp.header.opaque, i);
    }

    let mut get = BytesMut::new();
    encode_request(&mut get, CommandKind::Get, &[], b"key.1", b"", 99);
    let out = round_trip(&client, server.addr, 7, &get).await;
    let resp = decode_response(&out).unwrap();
    assert_eq!(resp.header.status, status::NO_ERROR);
    assert_eq!(resp.header.opaque, 99);
    assert_eq!(resp.value, b"value");

    let mut miss = BytesMut::new();
    encode_request(&mut miss, CommandKind::Get, &[], b"key", b"", 100);
    let out = round_trip(&client, server.addr, 8, &miss).await;
    assert_eq!(decode_response(&out).unwrap().header.status, status::KEY_NOT_FOUND);

    server.cancel_token.cancel();
    server.handle.await.unwrap().unwrap();
}
