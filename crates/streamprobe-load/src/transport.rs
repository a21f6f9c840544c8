//! Protocol transports over line-framed TCP.
//!
//! - `SOCKET_STREAM`: one JSON [`Frame`] per line; the endpoint answers each
//!   frame with one line.
//! - `PUBSUB`: `SUB <topic>` is answered with `OK`; `PUB <topic> <json>` is
//!   fanned out by the broker as `MSG <topic> <json>` to every subscriber,
//!   including the publisher.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use streamprobe_core::{Protocol, Scenario};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use crate::error::{LoadError, TransportError};

/// Longest line a transport accepts from a peer, newline included.
pub const MAX_FRAME_BYTES: u64 = 16 * 1024 * 1024;

/// One emitted message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    /// Per-session message sequence number.
    pub seq: u64,
    /// Emitting session.
    pub session: u32,
    /// Payload kind.
    pub kind: String,
    /// Payload body.
    pub body: String,
}

impl Frame {
    fn encode(&self) -> Result<String, TransportError> {
        serde_json::to_string(self).map_err(|e| TransportError::protocol(e.to_string()))
    }
}

/// Resolved target of a run.
#[derive(Debug, Clone)]
pub struct Endpoint {
    /// Protocol spoken.
    pub protocol: Protocol,
    /// Resolved socket address.
    pub addr: SocketAddr,
    /// Pub/sub topic.
    pub topic: String,
    /// Timeout of connect and handshake.
    pub operation_timeout: Duration,
}

impl Endpoint {
    /// Resolves a scenario's endpoint.
    ///
    /// # Errors
    /// Returns `LoadError::Resolve` if the address cannot be resolved.
    pub async fn resolve(scenario: &Scenario) -> crate::error::Result<Self> {
        let address = scenario.address();
        let mut addrs = tokio::net::lookup_host(address)
            .await
            .map_err(|e| LoadError::resolve(&scenario.endpoint, e.to_string()))?;
        let addr = addrs
            .next()
            .ok_or_else(|| LoadError::resolve(&scenario.endpoint, "no addresses found"))?;
        Ok(Self {
            protocol: scenario.protocol,
            addr,
            topic: scenario.topic().to_string(),
            operation_timeout: scenario.session.operation_timeout,
        })
    }
}

/// Runs `fut` under a timeout, mapping expiry to [`TransportError::Timeout`].
pub async fn with_timeout<T, F>(
    operation: &'static str,
    after: Duration,
    fut: F,
) -> Result<T, TransportError>
where
    F: Future<Output = Result<T, TransportError>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout { operation, after }),
    }
}

/// An open protocol connection.
#[async_trait]
pub trait Transport: Send {
    /// Sends one frame.
    async fn send(&mut self, frame: &Frame) -> Result<(), TransportError>;

    /// Receives the reply addressed to this session.
    async fn recv(&mut self) -> Result<Value, TransportError>;

    /// Closes the connection. Errors are ignored.
    async fn close(&mut self);
}

/// Opens transports for sessions.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Opens a connection for `session`.
    async fn connect(&self, session: u32) -> Result<Box<dyn Transport>, TransportError>;
}

/// Line reader/writer pair over a TCP stream.
struct LineChannel {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    line: String,
    max_line: u64,
}

impl LineChannel {
    fn new(stream: TcpStream) -> Self {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(error = %e, "cannot set TCP_NODELAY");
        }
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
            line: String::new(),
            max_line: MAX_FRAME_BYTES,
        }
    }

    async fn write_line(&mut self, line: &str) -> Result<(), TransportError> {
        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');
        self.writer.write_all(&buf).await?;
        Ok(())
    }

    async fn read_line(&mut self) -> Result<String, TransportError> {
        self.line.clear();
        let n = (&mut self.reader)
            .take(self.max_line)
            .read_line(&mut self.line)
            .await?;
        if n == 0 {
            return Err(TransportError::Closed);
        }
        if n as u64 >= self.max_line && !self.line.ends_with('\n') {
            return Err(TransportError::Oversized(self.max_line));
        }
        Ok(self.line.trim_end().to_string())
    }

    async fn shutdown(&mut self) {
        let _ = self.writer.shutdown().await;
    }
}

fn parse_reply(line: &str) -> Result<Value, TransportError> {
    serde_json::from_str(line).map_err(|e| TransportError::protocol(format!("reply is not JSON: {e}")))
}

/// `SOCKET_STREAM` transport.
pub struct StreamTransport {
    channel: LineChannel,
}

#[async_trait]
impl Transport for StreamTransport {
    async fn send(&mut self, frame: &Frame) -> Result<(), TransportError> {
        let line = frame.encode()?;
        self.channel.write_line(&line).await
    }

    async fn recv(&mut self) -> Result<Value, TransportError> {
        let line = self.channel.read_line().await?;
        parse_reply(&line)
    }

    async fn close(&mut self) {
        self.channel.shutdown().await;
    }
}

/// `PUBSUB` transport.
///
/// Every session subscribes to the shared topic, so it also sees other
/// sessions' messages; `recv` skips those.
pub struct PubSubTransport {
    channel: LineChannel,
    topic: String,
    session: u32,
}

impl PubSubTransport {
    async fn subscribe(&mut self) -> Result<(), TransportError> {
        self.channel.write_line(&format!("SUB {}", self.topic)).await?;
        let ack = self.channel.read_line().await?;
        if ack != "OK" {
            return Err(TransportError::protocol(format!("subscribe rejected: {ack}")));
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for PubSubTransport {
    async fn send(&mut self, frame: &Frame) -> Result<(), TransportError> {
        let payload = frame.encode()?;
        self.channel
            .write_line(&format!("PUB {} {payload}", self.topic))
            .await
    }

    async fn recv(&mut self) -> Result<Value, TransportError> {
        loop {
            let line = self.channel.read_line().await?;
            let Some(rest) = line.strip_prefix("MSG ") else {
                return Err(TransportError::protocol(format!("unexpected broker line: {line}")));
            };
            let Some((topic, payload)) = rest.split_once(' ') else {
                return Err(TransportError::protocol("MSG without payload"));
            };
            if topic != self.topic {
                continue;
            }
            let value = parse_reply(payload)?;
            if value.get("session").and_then(Value::as_u64) == Some(u64::from(self.session)) {
                return Ok(value);
            }
        }
    }

    async fn close(&mut self) {
        self.channel.shutdown().await;
    }
}

/// TCP connector for both protocols.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    endpoint: Endpoint,
}

impl TcpConnector {
    /// Creates a connector for a resolved endpoint.
    #[must_use]
    pub const fn new(endpoint: Endpoint) -> Self {
        Self { endpoint }
    }

    /// Returns the endpoint.
    #[must_use]
    pub const fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, session: u32) -> Result<Box<dyn Transport>, TransportError> {
        let timeout = self.endpoint.operation_timeout;
        let stream = with_timeout("connect", timeout, async {
            TcpStream::connect(self.endpoint.addr)
                .await
                .map_err(TransportError::from)
        })
        .await?;
        let channel = LineChannel::new(stream);

        match self.endpoint.protocol {
            Protocol::SocketStream => Ok(Box::new(StreamTransport { channel })),
            Protocol::PubSub => {
                let mut transport = PubSubTransport {
                    channel,
                    topic: self.endpoint.topic.clone(),
                    session,
                };
                with_timeout("subscribe", timeout, transport.subscribe()).await?;
                Ok(Box::new(transport))
            }
        }
    }
}
