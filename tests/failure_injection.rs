//! Failure injection tests: dead origins, broken cache directories, shutdown.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

mod common;

#[tokio::test]
async fn unreachable_origin_gets_400() {
    let port = common::closed_port().await;
    let proxy = common::start_proxy(|_| {}, None).await;

    let request = format!("GET http://127.0.0.1:{}/ HTTP/1.1\r\n\r\n", port);
    let response = common::send_raw(proxy.addr, request.as_bytes()).await;
    assert_eq!(response, b"HTTP/1.1 400 Bad Request\r\n\r\n".to_vec());

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn tunnel_to_closed_port_gets_500() {
    let port = common::closed_port().await;
    let proxy = common::start_proxy(|_| {}, None).await;

    let request = format!("CONNECT 127.0.0.1:{} HTTP/1.1\r\n\r\n", port);
    let response = common::send_raw(proxy.addr, request.as_bytes()).await;
    assert_eq!(response, b"HTTP/1.1 500 Internal Server Error\r\n\r\n".to_vec());

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn cache_write_failure_still_delivers_response() {
    let origin = common::start_fixed_origin("uncacheable").await;
    let proxy = common::start_proxy(|_| {}, None).await;
    std::fs::remove_dir_all(proxy.cache_path()).unwrap();

    let request = format!("GET http://{}/x HTTP/1.1\r\n\r\n", origin.addr);
    let first = common::send_raw(proxy.addr, request.as_bytes()).await;
    assert_eq!(first, common::ok_response(b"uncacheable"));

    // Nothing was stored, so the origin is asked again.
    let second = common::send_raw(proxy.addr, request.as_bytes()).await;
    assert_eq!(second, first);
    assert_eq!(origin.hits(), 2);

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn origin_error_status_is_relayed_unchanged() {
    const NOT_FOUND: &[u8] = b"HTTP/1.1 404 Not Found\r\nContent-Length: 4\r\n\r\nnope";
    let origin = common::start_origin(|_| NOT_FOUND.to_vec()).await;
    let proxy = common::start_proxy(|_| {}, None).await;

    let url = format!("http://{}/missing", origin.addr);
    let request = format!("GET {} HTTP/1.1\r\n\r\n", url);
    let response = common::send_raw(proxy.addr, request.as_bytes()).await;
    assert_eq!(response, NOT_FOUND.to_vec());

    // Error responses are cached like any other non-empty response.
    let cached = std::fs::read(
        proxy
            .cache_path()
            .join(forward_proxy::cache::CacheKey::for_target(&url).as_str()),
    )
    .unwrap();
    assert_eq!(cached, NOT_FOUND.to_vec());

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn empty_origin_response_is_not_cached() {
    let origin = common::start_origin(|_| Vec::new()).await;
    let proxy = common::start_proxy(|_| {}, None).await;

    let url = format!("http://{}/empty", origin.addr);
    let request = format!("GET {} HTTP/1.1\r\n\r\n", url);
    let response = common::send_raw(proxy.addr, request.as_bytes()).await;
    assert!(response.is_empty());

    let path = proxy
        .cache_path()
        .join(forward_proxy::cache::CacheKey::for_target(&url).as_str());
    assert!(!path.exists());

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn oversized_body_gets_413() {
    let origin = common::start_fixed_origin("never").await;
    let proxy = common::start_proxy(|c| c.limits.max_body_bytes = 16, None).await;

    let request = format!(
        "POST http://{}/upload HTTP/1.1\r\nContent-Length: 64\r\n\r\n{}",
        origin.addr,
        "x".repeat(64)
    );
    let response = common::send_raw(proxy.addr, request.as_bytes()).await;
    assert_eq!(response, b"HTTP/1.1 413 Payload Too Large\r\n\r\n".to_vec());
    assert_eq!(origin.hits(), 0);

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn client_that_never_finishes_its_head_times_out() {
    let proxy = common::start_proxy(|c| c.timeouts.io_secs = 1, None).await;

    let mut stream = TcpStream::connect(proxy.addr).await.unwrap();
    stream.write_all(b"GET http://a.example/ HTTP/1.1\r\n").await.unwrap();

    let mut response = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut response))
        .await
        .expect("proxy kept the idle connection open")
        .unwrap();
    assert_eq!(response, b"HTTP/1.1 400 Bad Request\r\n\r\n".to_vec());

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn shutdown_drains_and_stops_accepting() {
    // An origin that accepts and then stays silent keeps a tunnel open.
    let silent = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let silent_addr = silent.local_addr().unwrap();
    let _holder = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = silent.accept().await {
            held.push(socket);
        }
    });

    let proxy = common::start_proxy(|_| {}, None).await;
    let mut client = TcpStream::connect(proxy.addr).await.unwrap();
    let connect = format!("CONNECT {} HTTP/1.1\r\n\r\n", silent_addr);
    client.write_all(connect.as_bytes()).await.unwrap();
    let mut ack = [0u8; 39];
    client.read_exact(&mut ack).await.unwrap();
    assert!(ack.starts_with(b"HTTP/1.1 200"));

    proxy.shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(5), proxy.task)
        .await
        .expect("server did not finish after the grace period")
        .unwrap();

    assert!(TcpStream::connect(proxy.addr).await.is_err());
}
