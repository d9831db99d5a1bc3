//! Common test utilities for driver tests
//!
//! Provides shared helpers for:
//! - Building raw SCSP response frames
//! - Running a scripted SCSP server on a plaintext local socket
//! - A scripted in-memory transport with latency and in-flight tracking

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sqlitecloud::protocol::{DecodeOptions, Frame, ResponseReader, Result, ROWSET_CHUNKS_END};
use sqlitecloud::{ConnectionConfig, Transport};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ============================================================================
// Frame builders
// ============================================================================

pub fn string_frame(s: &str) -> Vec<u8> {
    format!("+{} {}", s.len(), s).into_bytes()
}

pub fn int_frame(v: i64) -> Vec<u8> {
    format!(":{} ", v).into_bytes()
}

pub fn error_frame(codes: &str, message: &str) -> Vec<u8> {
    let body = format!("{} {}", codes, message);
    format!("-{} {}", body.len(), body).into_bytes()
}

fn column_names(columns: &[&str]) -> String {
    columns.iter().map(|c| format!("+{} {}", c.len(), c)).collect()
}

fn text_cells(rows: &[Vec<&str>]) -> String {
    rows.iter()
        .flatten()
        .map(|v| format!("+{} {}", v.len(), v))
        .collect()
}

/// Version 1 single-frame rowset of text cells.
pub fn rowset_frame(columns: &[&str], rows: &[Vec<&str>]) -> Vec<u8> {
    let body = format!(
        "0:1 {} {} {}{}",
        rows.len(),
        columns.len(),
        column_names(columns),
        text_cells(rows)
    );
    format!("*{} {}", body.len(), body).into_bytes()
}

/// Chunked rowset of one text column: chunk 1 carries the metadata, later
/// chunks only rows, terminated by the sentinel.
pub fn chunked_rowset(column: &str, values: &[String], chunk_size: usize) -> Vec<u8> {
    let mut stream = Vec::new();
    for (i, chunk) in values.chunks(chunk_size).enumerate() {
        let index = i + 1;
        let mut body = format!("{}:1 {} 1 ", index, chunk.len());
        if index == 1 {
            body.push_str(&column_names(&[column]));
        }
        for v in chunk {
            body.push_str(&format!("+{} {}", v.len(), v));
        }
        stream.extend(format!("/{} {}", body.len(), body).into_bytes());
    }
    stream.extend_from_slice(ROWSET_CHUNKS_END);
    stream
}

/// 147 keywords, first `REINDEX`, last `PRIMARY`.
pub fn keywords() -> Vec<String> {
    let mut words = vec!["REINDEX".to_string()];
    words.extend((1..146).map(|i| format!("KEYWORD_{:03}", i)));
    words.push("PRIMARY".to_string());
    words
}

/// Text of a request frame: the SQL for plain commands, the first array
/// element for parameterized ones.
pub fn request_sql(frame: &Frame) -> String {
    match frame {
        Frame::Array(items) => items
            .first()
            .and_then(Frame::as_str)
            .unwrap_or_default()
            .to_string(),
        other => other.as_str().unwrap_or_default().to_string(),
    }
}

// ============================================================================
// Scripted SCSP server
// ============================================================================

pub enum Reply {
    /// Write the bytes in pieces of at most `split` bytes, after `delay`
    Bytes {
        data: Vec<u8>,
        delay: Duration,
        split: usize,
    },
    /// Never answer
    Silent,
    /// Drop the socket
    Close,
}

impl Reply {
    pub fn bytes(data: Vec<u8>) -> Self {
        Reply::Bytes {
            data,
            delay: Duration::ZERO,
            split: usize::MAX,
        }
    }

    pub fn ok() -> Self {
        Reply::bytes(string_frame("OK"))
    }

    pub fn delayed(data: Vec<u8>, delay: Duration) -> Self {
        Reply::Bytes {
            data,
            delay,
            split: usize::MAX,
        }
    }

    pub fn split(data: Vec<u8>, split: usize) -> Self {
        Reply::Bytes {
            data,
            delay: Duration::ZERO,
            split,
        }
    }
}

pub struct MockServer {
    pub addr: SocketAddr,
    /// Every request frame received, handshake included
    pub requests: Arc<Mutex<Vec<Frame>>>,
}

impl MockServer {
    /// Serve a single connection. The handshake batch is answered with
    /// `OK`; every later request goes to `handler`.
    pub async fn start<F>(handler: F) -> Self
    where
        F: Fn(&Frame) -> Reply + Send + Sync + 'static,
    {
        Self::start_with_handshake(Reply::ok(), handler).await
    }

    pub async fn start_with_handshake<F>(handshake: Reply, handler: F) -> Self
    where
        F: Fn(&Frame) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&requests);

        tokio::spawn(async move {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let mut reader = ResponseReader::new(DecodeOptions::default());
            let mut buf = vec![0u8; 4096];
            let mut handshake = Some(handshake);

            loop {
                let request = loop {
                    match reader.next_frame() {
                        Ok(Some(frame)) => break frame,
                        Ok(None) => {}
                        Err(_) => return,
                    }
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => reader.feed(&buf[..n]),
                    }
                };
                log.lock().unwrap().push(request.clone());

                let reply = match handshake.take() {
                    Some(reply) => reply,
                    None => handler(&request),
                };
                match reply {
                    Reply::Bytes { data, delay, split } => {
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                        for piece in data.chunks(split.max(1)) {
                            if socket.write_all(piece).await.is_err() {
                                return;
                            }
                            let _ = socket.flush().await;
                            tokio::task::yield_now().await;
                        }
                    }
                    Reply::Silent => {
                        let _ = socket.read(&mut buf).await;
                        return;
                    }
                    Reply::Close => return,
                }
            }
        });

        Self { addr, requests }
    }

    pub fn config(&self) -> ConnectionConfig {
        ConnectionConfig::builder(&self.addr.ip().to_string())
            .port(self.addr.port())
            .insecure(true)
            .auth("admin", "s3cret")
            .timeout_ms(2_000)
            .build()
    }

    pub fn request_sqls(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(request_sql)
            .collect()
    }
}

// ============================================================================
// Scripted transport
// ============================================================================

/// In-memory transport answering each request after a per-request latency
/// taken from the SQL text (`SLEEP <ms> ...`), tracking concurrency.
#[derive(Clone, Default)]
pub struct LatencyTransport {
    pub in_flight: Arc<AtomicUsize>,
    pub max_in_flight: Arc<AtomicUsize>,
    pub sent: Arc<Mutex<Vec<String>>>,
}

#[async_trait::async_trait]
impl Transport for LatencyTransport {
    async fn connect(&mut self, _config: &ConnectionConfig) -> Result<()> {
        Ok(())
    }

    async fn send_raw(&mut self, request: &[u8]) -> Result<Frame> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let mut reader = ResponseReader::new(DecodeOptions::default());
        reader.feed(request);
        let sql = reader.next_frame()?.map(|f| request_sql(&f)).unwrap_or_default();
        self.sent.lock().unwrap().push(sql.clone());

        let delay = sql
            .strip_prefix("SLEEP ")
            .and_then(|rest| rest.split_whitespace().next())
            .and_then(|ms| ms.parse::<u64>().ok())
            .unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(delay)).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(Frame::Text(sql))
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn is_open(&self) -> bool {
        true
    }
}
