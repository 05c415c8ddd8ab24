//! Live relay integration tests.
//!
//! A real listener on 127.0.0.1, a raw chunked publisher, and reqwest
//! subscribers reading the streamed response bodies.

use std::net::SocketAddr;
use std::time::Duration;

use ntrip_caster::AllowAll;

use super::test_utils::{spawn_caster, wait_until, RawPublisher, TEST_TIMEOUT};

fn url(addr: SocketAddr, path: &str) -> String {
    format!("http://{}{}", addr, path)
}

/// Read from a streaming response until `expected` bytes have arrived.
async fn read_exactly(response: &mut reqwest::Response, expected: usize) -> Vec<u8> {
    let mut received = Vec::new();
    while received.len() < expected {
        let chunk = tokio::time::timeout(Duration::from_secs(5), response.chunk())
            .await
            .expect("timed out waiting for relayed data")
            .unwrap()
            .expect("stream ended early");
        received.extend_from_slice(&chunk);
    }
    received
}

/// Whether the response stream ends (cleanly or not) within five seconds.
async fn stream_ends(response: &mut reqwest::Response) -> bool {
    let drain = async {
        loop {
            match response.chunk().await {
                Ok(Some(_)) => continue,
                Ok(None) | Err(_) => return,
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), drain).await.is_ok()
}

#[tokio::test]
async fn test_publish_fan_out_and_teardown() {
    let (caster, addr) = spawn_caster(AllowAll, TEST_TIMEOUT).await;

    let mut publisher = RawPublisher::connect(addr, "/S1").await;
    assert_eq!(publisher.read_status().await, 200);
    assert!(caster.get_mountpoint("/S1").is_some());

    let mut first = reqwest::get(url(addr, "/S1")).await.unwrap();
    let mut second = reqwest::get(url(addr, "/S1")).await.unwrap();
    assert_eq!(first.status(), 200);
    assert_eq!(second.status(), 200);
    assert_eq!(
        first.headers().get("content-type").unwrap(),
        "application/octet-stream"
    );

    let mount = caster.get_mountpoint("/S1").unwrap();
    assert_eq!(mount.subscriber_count(), 2);

    assert!(publisher.send(b"abc").await);
    assert_eq!(read_exactly(&mut first, 3).await, b"abc");
    assert_eq!(read_exactly(&mut second, 3).await, b"abc");

    assert!(publisher.send(b"\xd3\x00\x13").await);
    assert_eq!(read_exactly(&mut first, 3).await, b"\xd3\x00\x13");
    assert_eq!(read_exactly(&mut second, 3).await, b"\xd3\x00\x13");
    assert_eq!(mount.bytes_relayed(), 6);

    publisher.finish().await;

    assert!(stream_ends(&mut first).await);
    assert!(stream_ends(&mut second).await);
    assert!(publisher.wait_for_response_end().await);

    assert!(wait_until(|| caster.get_mountpoint("/S1").is_none()).await);
    let response = reqwest::get(url(addr, "/S1")).await.unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_second_publisher_conflicts() {
    let (caster, addr) = spawn_caster(AllowAll, TEST_TIMEOUT).await;

    let mut publisher = RawPublisher::connect(addr, "/S1").await;
    assert_eq!(publisher.read_status().await, 200);

    let mut rival = RawPublisher::connect(addr, "/S1").await;
    assert_eq!(rival.read_status().await, 409);

    // The first source keeps relaying.
    let mut subscriber = reqwest::get(url(addr, "/S1")).await.unwrap();
    assert!(publisher.send(b"still here").await);
    assert_eq!(read_exactly(&mut subscriber, 10).await, b"still here");

    caster.delete_mountpoint("/S1");
    assert!(stream_ends(&mut subscriber).await);
}

#[tokio::test]
async fn test_silent_source_times_out() {
    let (caster, addr) = spawn_caster(AllowAll, Duration::from_millis(500)).await;

    let mut publisher = RawPublisher::connect(addr, "/QUIET").await;
    assert_eq!(publisher.read_status().await, 200);

    let mut subscriber = reqwest::get(url(addr, "/QUIET")).await.unwrap();
    assert_eq!(subscriber.status(), 200);

    assert!(stream_ends(&mut subscriber).await);
    assert!(publisher.wait_for_response_end().await);
    assert!(wait_until(|| caster.get_mountpoint("/QUIET").is_none()).await);

    // The path is free again.
    let mut next = RawPublisher::connect(addr, "/QUIET").await;
    assert_eq!(next.read_status().await, 200);
    caster.delete_mountpoint("/QUIET");
}

#[tokio::test]
async fn test_disconnected_subscriber_is_dropped() {
    let (caster, addr) = spawn_caster(AllowAll, TEST_TIMEOUT).await;

    let mut publisher = RawPublisher::connect(addr, "/S1").await;
    assert_eq!(publisher.read_status().await, 200);

    let mut staying = reqwest::get(url(addr, "/S1")).await.unwrap();
    let leaving = reqwest::get(url(addr, "/S1")).await.unwrap();

    let mount = caster.get_mountpoint("/S1").unwrap();
    assert_eq!(mount.subscriber_count(), 2);

    drop(leaving);

    // Keep data flowing so the caster notices the closed socket.
    let mut received = 0;
    let mut dropped = false;
    for _ in 0..100 {
        assert!(publisher.send(b"x").await);
        received += read_exactly(&mut staying, 1).await.len();
        if mount.subscriber_count() == 1 {
            dropped = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(dropped, "disconnected subscriber was never deregistered");
    assert!(received > 0);

    // The remaining subscriber is unaffected.
    assert!(publisher.send(b"yz").await);
    assert_eq!(read_exactly(&mut staying, 2).await, b"yz");

    caster.delete_mountpoint("/S1");
}

#[tokio::test]
async fn test_remote_address_is_recorded() {
    let (caster, addr) = spawn_caster(AllowAll, TEST_TIMEOUT).await;

    let mut publisher = RawPublisher::connect(addr, "/S1").await;
    assert_eq!(publisher.read_status().await, 200);

    let mount = caster.get_mountpoint("/S1").unwrap();
    let request = mount.source().request();
    assert!(request.remote_addr().unwrap().ip().is_loopback());
    assert_eq!(request.ntrip_version(), Some("Ntrip/2.0"));
    assert_eq!(request.user_agent(), Some("NTRIP test-publisher"));

    caster.delete_mountpoint("/S1");
}
