//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use forward_proxy::cache::CacheStore;
use forward_proxy::config::ProxyConfig;
use forward_proxy::lifecycle::Shutdown;
use forward_proxy::net::listener::Listener;
use forward_proxy::net::tls::UpstreamTls;
use forward_proxy::ProxyServer;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A proxy running on an ephemeral port with its own cache directory.
pub struct TestProxy {
    pub addr: SocketAddr,
    pub cache_dir: TempDir,
    pub shutdown: Shutdown,
    pub task: JoinHandle<()>,
}

impl TestProxy {
    pub fn cache_path(&self) -> std::path::PathBuf {
        self.cache_dir.path().join("cache")
    }
}

/// Config with short timeouts and the cache under `cache_root`.
pub fn test_config(cache_root: &TempDir) -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.cache.directory = cache_root.path().join("cache");
    config.timeouts.connect_secs = 2;
    config.timeouts.io_secs = 5;
    config.timeouts.shutdown_grace_secs = 1;
    config.tunnel.upstream_tls = false;
    config
}

/// Start a proxy; `configure` may adjust the test config first.
pub async fn start_proxy<F>(configure: F, tls: Option<UpstreamTls>) -> TestProxy
where
    F: FnOnce(&mut ProxyConfig),
{
    let cache_dir = TempDir::new().unwrap();
    let mut config = test_config(&cache_dir);
    configure(&mut config);

    let cache = if config.cache.enabled {
        Some(Arc::new(CacheStore::open(&config.cache.directory).await.unwrap()))
    } else {
        None
    };
    let server = ProxyServer::new(&config, cache, tls);
    let listener = Listener::bind(&config.listener).await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    let task = tokio::spawn(server.run(listener, server_shutdown));

    TestProxy {
        addr,
        cache_dir,
        shutdown,
        task,
    }
}

/// A mock origin that counts hits and hands every received request to the test.
pub struct MockOrigin {
    pub addr: SocketAddr,
    pub hits: Arc<AtomicU32>,
    pub requests: mpsc::UnboundedReceiver<Vec<u8>>,
    task: JoinHandle<()>,
}

impl MockOrigin {
    pub fn hits(&self) -> u32 {
        self.hits.load(Ordering::SeqCst)
    }

    /// Stop accepting; later connects are refused.
    pub async fn stop(self) {
        self.task.abort();
        let _ = self.task.await;
    }
}

/// Start an origin that answers every request with `respond(hit_number)`.
pub async fn start_origin<F>(respond: F) -> MockOrigin
where
    F: Fn(u32) -> Vec<u8> + Send + Sync + 'static,
{
    start_delayed_origin(Duration::ZERO, respond).await
}

/// Like [`start_origin`], but each response is held back by `delay`.
pub async fn start_delayed_origin<F>(delay: Duration, respond: F) -> MockOrigin
where
    F: Fn(u32) -> Vec<u8> + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicU32::new(0));
    let (tx, requests) = mpsc::unbounded_channel();
    let respond = Arc::new(respond);

    let counter = hits.clone();
    let task = tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            let tx = tx.clone();
            let respond = respond.clone();
            tokio::spawn(async move {
                let request = read_request(&mut socket).await;
                let _ = tx.send(request);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                let _ = socket.write_all(&respond(n)).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    MockOrigin {
        addr,
        hits,
        requests,
        task,
    }
}

/// Origin returning the same 200 response with `body` every time.
pub async fn start_fixed_origin(body: &'static str) -> MockOrigin {
    start_origin(move |_| ok_response(body.as_bytes())).await
}

pub fn ok_response(body: &[u8]) -> Vec<u8> {
    let mut out = format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    )
    .into_bytes();
    out.extend_from_slice(body);
    out
}

/// Read a request head plus its Content-Length body.
async fn read_request(socket: &mut TcpStream) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        if let Some(head_end) = find(&buf, b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
            let length = head
                .lines()
                .find_map(|l| {
                    let (name, value) = l.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())?
                })
                .unwrap_or(0);
            if buf.len() >= head_end + 4 + length {
                return buf;
            }
        }
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return buf,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
}

pub fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Send raw bytes to the proxy and collect everything until it closes.
pub async fn send_raw(proxy: SocketAddr, request: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(proxy).await.unwrap();
    stream.write_all(request).await.unwrap();
    let mut response = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), stream.read_to_end(&mut response))
        .await
        .expect("proxy did not close the connection")
        .unwrap();
    response
}

/// A port nothing listens on.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}
