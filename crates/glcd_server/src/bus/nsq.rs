//! NSQ bus backend.
//!
//! Speaks the nsqd TCP protocol (V2) directly:
//!
//! * consumers send `SUB` then `RDY`, answer `_heartbeat_` with `NOP` and
//!   `FIN` each message once it has been handed to the hub
//! * producers send `PUB` and wait for `OK`
//!
//! Producers for the topic are discovered by polling nsqlookupd's
//! `/lookup` endpoint. Without a lookupd, or while it knows no producers,
//! the consumer connects to the configured home nsqd.

use super::{Bus, Destination};
use crate::config::HubConfig;
use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Protocol magic sent once after connecting
pub const MAGIC_V2: &[u8; 4] = b"  V2";

const FRAME_TYPE_RESPONSE: u32 = 0;
const FRAME_TYPE_ERROR: u32 = 1;
const FRAME_TYPE_MESSAGE: u32 = 2;

const HEARTBEAT: &[u8] = b"_heartbeat_";
const OK: &[u8] = b"OK";

/// Frames larger than this are treated as a protocol error
const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// How long a `PUB` or `SUB` may wait for nsqd's `OK`
pub const ACK_TIMEOUT: Duration = Duration::from_secs(5);
const RECONNECT_DELAY_FIRST: Duration = Duration::from_secs(1);
const RECONNECT_DELAY_MAX: Duration = Duration::from_secs(30);

/// A decoded nsqd frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Response(Vec<u8>),
    Error(Vec<u8>),
    Message(NsqMessage),
}

/// A message delivered by nsqd.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NsqMessage {
    /// Nanoseconds since the epoch when nsqd received it
    pub timestamp: i64,
    pub attempts: u16,
    pub id: [u8; 16],
    pub body: Vec<u8>,
}

impl Frame {
    /// Decodes a frame body given its type.
    pub fn decode(frame_type: u32, data: Vec<u8>) -> anyhow::Result<Self> {
        match frame_type {
            FRAME_TYPE_RESPONSE => Ok(Frame::Response(data)),
            FRAME_TYPE_ERROR => Ok(Frame::Error(data)),
            FRAME_TYPE_MESSAGE => NsqMessage::decode(&data).map(Frame::Message),
            other => bail!("unknown frame type {other}"),
        }
    }

    fn is_heartbeat(&self) -> bool {
        matches!(self, Frame::Response(data) if data == HEARTBEAT)
    }
}

impl NsqMessage {
    const HEADER_LEN: usize = 8 + 2 + 16;

    fn decode(data: &[u8]) -> anyhow::Result<Self> {
        if data.len() < Self::HEADER_LEN {
            bail!("message frame too short ({} bytes)", data.len());
        }
        let mut timestamp = [0u8; 8];
        timestamp.copy_from_slice(&data[0..8]);
        let mut attempts = [0u8; 2];
        attempts.copy_from_slice(&data[8..10]);
        let mut id = [0u8; 16];
        id.copy_from_slice(&data[10..26]);

        Ok(Self {
            timestamp: i64::from_be_bytes(timestamp),
            attempts: u16::from_be_bytes(attempts),
            id,
            body: data[Self::HEADER_LEN..].to_vec(),
        })
    }
}

/// Reads one `<size><type><data>` frame.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> anyhow::Result<Frame> {
    let size = reader.read_u32().await?;
    if !(4..=MAX_FRAME_SIZE).contains(&size) {
        bail!("invalid frame size {size}");
    }
    let frame_type = reader.read_u32().await?;
    let mut data = vec![0u8; (size - 4) as usize];
    reader.read_exact(&mut data).await?;
    Frame::decode(frame_type, data)
}

/// Encodes a single-line command such as `RDY 32\n`.
pub fn command(line: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(line.len() + 1);
    buf.extend_from_slice(line.as_bytes());
    buf.push(b'\n');
    buf
}

/// Encodes `FIN <id>\n`.
pub fn finish(id: &[u8; 16]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + id.len() + 1);
    buf.extend_from_slice(b"FIN ");
    buf.extend_from_slice(id);
    buf.push(b'\n');
    buf
}

/// Encodes `PUB <topic>\n<size><body>`.
pub fn publish_command(topic: &str, body: &[u8]) -> anyhow::Result<Vec<u8>> {
    let size = u32::try_from(body.len()).context("message body too large")?;
    let mut buf = Vec::with_capacity(5 + topic.len() + 4 + body.len());
    buf.extend_from_slice(b"PUB ");
    buf.extend_from_slice(topic.as_bytes());
    buf.push(b'\n');
    buf.extend_from_slice(&size.to_be_bytes());
    buf.extend_from_slice(body);
    Ok(buf)
}

async fn connect(address: &str) -> anyhow::Result<TcpStream> {
    let mut stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(address))
        .await
        .map_err(|_| anyhow!("timed out connecting to nsqd {address}"))?
        .with_context(|| format!("connecting to nsqd {address}"))?;
    stream.set_nodelay(true)?;
    stream.write_all(MAGIC_V2).await?;
    Ok(stream)
}

/// Waits for the `OK` answering a command, replying to heartbeats on the way.
async fn expect_ok<S: AsyncRead + AsyncWrite + Unpin>(stream: &mut S) -> anyhow::Result<()> {
    loop {
        match read_frame(stream).await? {
            frame if frame.is_heartbeat() => stream.write_all(&command("NOP")).await?,
            Frame::Response(data) if data == OK => return Ok(()),
            Frame::Response(data) => {
                bail!("unexpected response {:?}", String::from_utf8_lossy(&data))
            }
            Frame::Error(data) => bail!("nsqd error: {}", String::from_utf8_lossy(&data)),
            Frame::Message(_) => bail!("unexpected message frame"),
        }
    }
}

/// Writes `frame` and waits up to `limit` for the `OK`.
async fn send_and_confirm(
    stream: &mut TcpStream,
    frame: &[u8],
    limit: Duration,
) -> anyhow::Result<()> {
    tokio::time::timeout(limit, async {
        stream.write_all(frame).await?;
        expect_ok(stream).await
    })
    .await
    .map_err(|_| anyhow!("no acknowledgement from nsqd within {limit:?}"))?
}

/// NSQ connection settings.
#[derive(Debug, Clone)]
pub struct NsqConfig {
    /// Home nsqd `host:port`
    pub nsqd_address: String,
    /// nsqlookupd HTTP address, `host:port` or a full URL
    pub lookupd_address: Option<String>,
    pub max_in_flight: u32,
    pub lookupd_poll_interval: Duration,
    /// Upper bound on waiting for nsqd to acknowledge a command
    pub ack_timeout: Duration,
}

impl From<&HubConfig> for NsqConfig {
    fn from(config: &HubConfig) -> Self {
        Self {
            nsqd_address: config.nsqd_address.clone(),
            lookupd_address: config.lookupd_address.clone(),
            max_in_flight: config.max_in_flight,
            lookupd_poll_interval: config.lookupd_poll_interval,
            ack_timeout: ACK_TIMEOUT,
        }
    }
}

/// A cached publishing connection to one nsqd.
struct Producer {
    address: String,
    ack_timeout: Duration,
    stream: Mutex<Option<TcpStream>>,
}

impl Producer {
    fn new(address: String, ack_timeout: Duration) -> Self {
        Self {
            address,
            ack_timeout,
            stream: Mutex::new(None),
        }
    }

    /// Publishes over the cached connection, reconnecting once if it has
    /// gone stale.
    ///
    /// A peer that does not acknowledge within the ack timeout loses its
    /// cached connection and the publish fails without a retry.
    async fn publish(&self, topic: &str, body: &[u8]) -> anyhow::Result<()> {
        let frame = publish_command(topic, body)?;
        let mut guard = self.stream.lock().await;

        for attempt in 0..2 {
            let reused = guard.is_some();
            if !reused {
                debug!(address = %self.address, "Opening producer connection");
                *guard = Some(connect(&self.address).await?);
            }
            let Some(stream) = guard.as_mut() else {
                continue;
            };

            match send_and_confirm(stream, &frame, self.ack_timeout).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    *guard = None;
                    let io_failure = err.downcast_ref::<std::io::Error>().is_some();
                    if attempt == 0 && reused && io_failure {
                        debug!(address = %self.address, "Producer connection went stale: {}", err);
                        continue;
                    }
                    return Err(err.context(format!("publishing to {topic} on {}", self.address)));
                }
            }
        }
        Err(anyhow!("publishing to {topic} on {} failed", self.address))
    }
}

/// Bus backend talking to nsqd and nsqlookupd.
#[derive(Clone)]
pub struct NsqBus {
    config: NsqConfig,
    producers: Arc<DashMap<String, Arc<Producer>>>,
    http: reqwest::Client,
}

impl NsqBus {
    pub fn new(config: NsqConfig) -> Self {
        Self {
            config,
            producers: Arc::new(DashMap::new()),
            http: reqwest::Client::new(),
        }
    }

    fn producer(&self, address: &str) -> Arc<Producer> {
        self.producers
            .entry(address.to_string())
            .or_insert_with(|| {
                Arc::new(Producer::new(address.to_string(), self.config.ack_timeout))
            })
            .clone()
    }

    /// Asks nsqlookupd which nsqd instances carry `topic`.
    ///
    /// A topic lookupd has never seen yields an empty list.
    pub async fn lookup(&self, lookupd: &str, topic: &str) -> anyhow::Result<Vec<String>> {
        let base = if lookupd.starts_with("http://") || lookupd.starts_with("https://") {
            lookupd.trim_end_matches('/').to_string()
        } else {
            format!("http://{lookupd}")
        };

        let response = self
            .http
            .get(format!("{base}/lookup"))
            .query(&[("topic", topic)])
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let body = response.error_for_status()?.bytes().await?;
        parse_lookup(&body)
    }

    /// Addresses the consumer should be connected to right now.
    async fn discover(&self, topic: &str) -> Vec<String> {
        if let Some(lookupd) = &self.config.lookupd_address {
            match self.lookup(lookupd, topic).await {
                Ok(found) if !found.is_empty() => return found,
                Ok(_) => debug!(topic, "lookupd knows no producers yet"),
                Err(err) => warn!(topic, "nsqlookupd query failed: {:#}", err),
            }
        }
        vec![self.config.nsqd_address.clone()]
    }

    async fn run_consumer(
        self,
        topic: String,
        channel: String,
        tx: mpsc::Sender<Vec<u8>>,
        shutdown: CancellationToken,
    ) {
        let mut connections: HashMap<String, (CancellationToken, JoinHandle<()>)> = HashMap::new();

        loop {
            let wanted: HashSet<String> = self.discover(&topic).await.into_iter().collect();

            connections.retain(|address, (token, handle)| {
                let keep = wanted.contains(address) && !handle.is_finished();
                if !keep {
                    info!(%address, "Dropping nsqd connection");
                    token.cancel();
                }
                keep
            });

            for address in wanted {
                if connections.contains_key(&address) {
                    continue;
                }
                info!(%address, %topic, %channel, "📡 Connecting consumer to nsqd");
                let token = shutdown.child_token();
                let handle = tokio::spawn(consume_with_retry(
                    address.clone(),
                    topic.clone(),
                    channel.clone(),
                    self.config.max_in_flight,
                    tx.clone(),
                    token.clone(),
                ));
                connections.insert(address, (token, handle));
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tx.closed() => break,
                _ = tokio::time::sleep(self.config.lookupd_poll_interval) => {}
            }
        }

        for (_, (token, handle)) in connections {
            token.cancel();
            let _ = handle.await;
        }
        debug!(%topic, "Consumer stopped");
    }
}

/// Keeps one nsqd connection alive until cancelled.
async fn consume_with_retry(
    address: String,
    topic: String,
    channel: String,
    max_in_flight: u32,
    tx: mpsc::Sender<Vec<u8>>,
    cancel: CancellationToken,
) {
    let mut delay = RECONNECT_DELAY_FIRST;
    loop {
        let result = tokio::select! {
            _ = cancel.cancelled() => return,
            result = consume(&address, &topic, &channel, max_in_flight, &tx) => result,
        };
        match result {
            Ok(()) => return,
            Err(err) => {
                warn!(%address, "nsqd connection lost: {:#}; retrying in {:?}", err, delay);
            }
        }
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
        delay = (delay * 2).min(RECONNECT_DELAY_MAX);
    }
}

/// Runs one consumer connection. Returns `Ok` once the hub stops listening.
async fn consume(
    address: &str,
    topic: &str,
    channel: &str,
    max_in_flight: u32,
    tx: &mpsc::Sender<Vec<u8>>,
) -> anyhow::Result<()> {
    let mut stream = connect(address).await?;
    send_and_confirm(
        &mut stream,
        &command(&format!("SUB {topic} {channel}")),
        ACK_TIMEOUT,
    )
    .await
    .context("subscribing")?;
    stream
        .write_all(&command(&format!("RDY {max_in_flight}")))
        .await?;

    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    loop {
        match read_frame(&mut reader).await? {
            frame if frame.is_heartbeat() => writer.write_all(&command("NOP")).await?,
            Frame::Response(data) => {
                debug!(%address, "nsqd response: {}", String::from_utf8_lossy(&data));
            }
            Frame::Error(data) => {
                error!(%address, "nsqd error: {}", String::from_utf8_lossy(&data));
            }
            Frame::Message(message) => {
                if tx.send(message.body).await.is_err() {
                    return Ok(());
                }
                writer.write_all(&finish(&message.id)).await?;
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct LookupProducer {
    broadcast_address: String,
    tcp_port: u16,
}

#[derive(Debug, Default, Deserialize)]
struct LookupData {
    #[serde(default)]
    producers: Vec<LookupProducer>,
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(default)]
    producers: Option<Vec<LookupProducer>>,
    /// Pre-1.0 nsqlookupd wraps the payload in `data`
    #[serde(default)]
    data: Option<LookupData>,
}

/// Extracts `host:port` producer addresses from a `/lookup` response body.
pub fn parse_lookup(body: &[u8]) -> anyhow::Result<Vec<String>> {
    let response: LookupResponse =
        serde_json::from_slice(body).context("invalid nsqlookupd response")?;
    let producers = response
        .producers
        .or_else(|| response.data.map(|d| d.producers))
        .unwrap_or_default();
    Ok(producers
        .into_iter()
        .map(|p| format!("{}:{}", p.broadcast_address, p.tcp_port))
        .collect())
}

#[async_trait]
impl Bus for NsqBus {
    async fn publish(&self, destination: &Destination, body: Vec<u8>) -> anyhow::Result<()> {
        let address = destination
            .address
            .as_deref()
            .unwrap_or(&self.config.nsqd_address);
        self.producer(address).publish(&destination.topic, &body).await
    }

    async fn subscribe(
        &self,
        topic: &str,
        channel: &str,
        shutdown: CancellationToken,
    ) -> anyhow::Result<mpsc::Receiver<Vec<u8>>> {
        let capacity = usize::try_from(self.config.max_in_flight.max(1)).unwrap_or(1);
        let (tx, rx) = mpsc::channel(capacity);
        tokio::spawn(self.clone().run_consumer(
            topic.to_string(),
            channel.to_string(),
            tx,
            shutdown,
        ));
        Ok(rx)
    }
}
