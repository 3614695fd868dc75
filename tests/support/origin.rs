use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

type Responder = dyn Fn(&str) -> Vec<u8> + Send + Sync;

/// Plain HTTP origin that counts the requests it serves and records their raw bytes.
pub struct StubOrigin {
    addr: SocketAddr,
    hits: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<Vec<u8>>>>,
    handle: JoinHandle<()>,
}

impl StubOrigin {
    /// Answers every request with `respond(path)`.
    pub async fn spawn<F>(respond: F) -> Result<Self>
    where
        F: Fn(&str) -> Vec<u8> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
        let addr = listener.local_addr()?;
        let hits = Arc::new(AtomicUsize::new(0));
        let requests = Arc::new(Mutex::new(Vec::new()));
        let respond: Arc<Responder> = Arc::new(respond);

        let task_hits = hits.clone();
        let task_requests = requests.clone();
        let handle = tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => break,
                };
                let hits = task_hits.clone();
                let requests = task_requests.clone();
                let respond = respond.clone();
                tokio::spawn(async move {
                    let _ = handle_connection(stream, hits, requests, respond).await;
                });
            }
        });

        Ok(Self {
            addr,
            hits,
            requests,
            handle,
        })
    }

    pub async fn fixed(response: Vec<u8>) -> Result<Self> {
        Self::spawn(move |_| response.clone()).await
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{path}", self.port())
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<Vec<u8>> {
        self.requests.lock().unwrap().clone()
    }
}

impl Drop for StubOrigin {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    hits: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<Vec<u8>>>>,
    respond: Arc<Responder>,
) -> Result<()> {
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];
    let head_end = loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        data.extend_from_slice(&buf[..n]);
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&data[..head_end]).into_owned();
    let body_len = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.trim()
                .eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        })
        .unwrap_or(0);
    while data.len() < head_end + body_len {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
    }

    hits.fetch_add(1, Ordering::SeqCst);
    let path = head.split_whitespace().nth(1).unwrap_or("/").to_string();
    requests.lock().unwrap().push(data);

    let response = respond(&path);
    stream.write_all(&response).await?;
    stream.shutdown().await.ok();
    Ok(())
}

pub fn http_ok(body: &[u8]) -> Vec<u8> {
    let mut response = format!("HTTP/1.0 200 OK\r\nContent-Length: {}\r\n\r\n", body.len()).into_bytes();
    response.extend_from_slice(body);
    response
}

/// A `200 OK` response whose total size, head included, is exactly `total` bytes.
pub fn response_of_size(total: usize, fill: u8) -> Vec<u8> {
    for digits in 1..=9 {
        let head_len = "HTTP/1.0 200 OK\r\nContent-Length: \r\n\r\n".len() + digits;
        if total < head_len {
            break;
        }
        let body_len = total - head_len;
        if body_len.to_string().len() == digits {
            let response = http_ok(&vec![fill; body_len]);
            debug_assert_eq!(response.len(), total);
            return response;
        }
    }
    panic!("cannot build a response of exactly {total} bytes");
}
