//! Reference endpoints speaking the harness wire protocols.
//!
//! Used by the CLI (`serve-echo`, `serve-broker`) and by tests that need a
//! healthy, slow or connection-dropping target.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A running local endpoint. The accept loop is aborted on drop.
pub struct LocalEndpoint {
    addr: SocketAddr,
    accepted: Arc<AtomicU64>,
    task: JoinHandle<()>,
}

impl LocalEndpoint {
    /// Returns the bound address.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Returns the address as a scenario endpoint string.
    #[must_use]
    pub fn endpoint(&self) -> String {
        self.addr.to_string()
    }

    /// Returns the number of accepted connections.
    #[must_use]
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }
}

impl Drop for LocalEndpoint {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve<F, Fut>(addr: &str, name: &'static str, handler: F) -> std::io::Result<LocalEndpoint>
where
    F: Fn(u64, TcpStream) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::io::Result<()>> + Send + 'static,
{
    let listener = TcpListener::bind(addr).await?;
    let local = listener.local_addr()?;
    let accepted = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&accepted);
    tracing::info!(endpoint = name, addr = %local, "listening");

    let task = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let index = counter.fetch_add(1, Ordering::Relaxed);
                    let conn = handler(index, stream);
                    tokio::spawn(async move {
                        if let Err(e) = conn.await {
                            tracing::debug!(endpoint = name, %peer, error = %e, "connection ended");
                        }
                    });
                }
                Err(e) => {
                    tracing::warn!(endpoint = name, error = %e, "accept failed");
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    });

    Ok(LocalEndpoint {
        addr: local,
        accepted,
        task,
    })
}

async fn echo_lines(stream: TcpStream, delay: Duration) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
    }
    Ok(())
}

/// Starts a `SOCKET_STREAM` echo endpoint.
///
/// # Errors
/// Returns an error if the address cannot be bound.
pub async fn echo(addr: &str) -> std::io::Result<LocalEndpoint> {
    serve(addr, "echo", |_, stream| echo_lines(stream, Duration::ZERO)).await
}

/// Starts an echo endpoint that waits `delay` before every reply.
///
/// # Errors
/// Returns an error if the address cannot be bound.
pub async fn slow_echo(addr: &str, delay: Duration) -> std::io::Result<LocalEndpoint> {
    serve(addr, "slow-echo", move |_, stream| echo_lines(stream, delay)).await
}

/// Starts an echo endpoint that drops every `reject_every`-th connection
/// right after accepting it (`2` rejects half of all connections).
///
/// # Errors
/// Returns an error if the address cannot be bound.
pub async fn flaky_echo(addr: &str, reject_every: u64) -> std::io::Result<LocalEndpoint> {
    let every = reject_every.max(1);
    serve(addr, "flaky-echo", move |index, stream| async move {
        if index % every == every - 1 {
            drop(stream);
            return Ok(());
        }
        echo_lines(stream, Duration::ZERO).await
    })
    .await
}

type Subscribers = Arc<parking_lot::Mutex<HashMap<String, Vec<mpsc::UnboundedSender<String>>>>>;

async fn broker_conn(stream: TcpStream, subscribers: Subscribers) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let outbound = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            if writer.write_all(line.as_bytes()).await.is_err()
                || writer.write_all(b"\n").await.is_err()
            {
                break;
            }
        }
    });

    let mut lines = BufReader::new(reader).lines();
    let result = async {
        while let Some(line) = lines.next_line().await? {
            if let Some(topic) = line.strip_prefix("SUB ") {
                subscribers
                    .lock()
                    .entry(topic.trim().to_string())
                    .or_default()
                    .push(tx.clone());
                let _ = tx.send("OK".to_string());
            } else if let Some(rest) = line.strip_prefix("PUB ") {
                let Some((topic, payload)) = rest.split_once(' ') else {
                    let _ = tx.send("ERR malformed PUB".to_string());
                    continue;
                };
                let message = format!("MSG {topic} {payload}");
                if let Some(subs) = subscribers.lock().get_mut(topic) {
                    subs.retain(|s| s.send(message.clone()).is_ok());
                }
            } else if line == "PING" {
                let _ = tx.send("PONG".to_string());
            } else {
                let _ = tx.send("ERR unknown command".to_string());
            }
        }
        Ok::<(), std::io::Error>(())
    }
    .await;

    outbound.abort();
    result
}

/// Starts a `PUBSUB` broker endpoint.
///
/// # Errors
/// Returns an error if the address cannot be bound.
pub async fn broker(addr: &str) -> std::io::Result<LocalEndpoint> {
    let subscribers: Subscribers = Arc::default();
    serve(addr, "broker", move |_, stream| {
        broker_conn(stream, Arc::clone(&subscribers))
    })
    .await
}
