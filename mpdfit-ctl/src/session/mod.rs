//! One managed control session with a daemon
//!
//! [`SessionClient`] owns the TCP connection, caches the last status
//! snapshot, and keeps the rolling ping and play-offset windows that the
//! sync controller reads. Every round trip is bounded by the configured
//! timeout. A transport failure drops the connection; the next
//! [`SessionClient::check_connection`] reconnects.

mod protocol;
mod status;

pub use protocol::{quote, Pair};
pub use status::{DaemonStatus, PlaybackState};

use std::time::{Duration, Instant};

use tokio::net::TcpStream;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

use mpdfit_common::config::{DaemonAddress, DEFAULT_TIMEOUT_SECS};
use mpdfit_common::time::format_seconds;
use mpdfit_common::{Error, Result, RollingStatistics, StatsByCategory};

use crate::track::{file_type_of, QueuedTrack, Track};
use protocol::{parse_queue_entry, parse_track, split_records, Connection};

/// Samples kept in the ping window
pub const PING_WINDOW: usize = 10;

/// Samples kept in the initial play offset window and per file type
pub const OFFSET_WINDOW: usize = 20;

/// Pings taken by [`SessionClient::connect`] to seed the ping window
pub const DEFAULT_PING_SAMPLES: usize = 5;

/// `max_difference` is this multiple of the average ping
const MAX_DIFFERENCE_FACTOR: f64 = 5.0;

/// How to reach and talk to one daemon
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub address: DaemonAddress,
    pub password: Option<String>,
    /// Bound on every round trip
    pub timeout: Duration,
    pub ping_samples: usize,
    pub ping_interval: Duration,
}

impl SessionSettings {
    pub fn new(address: DaemonAddress) -> Self {
        let password = address.password.clone();
        Self {
            address,
            password,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            ping_samples: DEFAULT_PING_SAMPLES,
            ping_interval: Duration::from_millis(100),
        }
    }

    pub fn with_password(mut self, password: Option<String>) -> Self {
        self.password = password;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_ping_sampling(mut self, samples: usize, interval: Duration) -> Self {
        self.ping_samples = samples;
        self.ping_interval = interval;
        self
    }
}

/// Outcome of [`SessionClient::check_connection`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionHealth {
    /// Ping answered
    Healthy,
    /// Ping failed, reconnect succeeded
    Recovered,
    /// Ping failed and so did the reconnect
    Unrecoverable,
}

impl ConnectionHealth {
    pub fn is_usable(&self) -> bool {
        !matches!(self, ConnectionHealth::Unrecoverable)
    }
}

pub struct SessionClient {
    settings: SessionSettings,
    conn: Option<Connection<TcpStream>>,
    status: Option<DaemonStatus>,
    song: Option<u32>,
    elapsed: Option<f64>,
    pings: RollingStatistics,
    initial_play_offsets: RollingStatistics,
    file_type_adjustments: StatsByCategory,
    max_difference: f64,
    batch: Option<Vec<String>>,
    span: Span,
}

impl SessionClient {
    /// Client for `settings`; no I/O until [`SessionClient::connect`]
    pub fn new(settings: SessionSettings) -> Self {
        let span = info_span!(
            "session",
            host = %settings.address.host,
            port = settings.address.port
        );
        Self {
            settings,
            conn: None,
            status: None,
            song: None,
            elapsed: None,
            pings: RollingStatistics::new("pings", PING_WINDOW),
            initial_play_offsets: RollingStatistics::new("initial_play_offsets", OFFSET_WINDOW),
            file_type_adjustments: StatsByCategory::new(OFFSET_WINDOW),
            max_difference: 0.0,
            batch: None,
            span,
        }
    }

    pub fn address(&self) -> &DaemonAddress {
        &self.settings.address
    }

    pub fn host(&self) -> &str {
        &self.settings.address.host
    }

    /// Fixed latency from `HOST:PORT/LATENCY`, overriding measurements
    pub fn latency_override(&self) -> Option<f64> {
        self.settings.address.latency
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Daemon version from the greeting
    pub fn daemon_version(&self) -> Option<&str> {
        self.conn.as_ref().map(|c| c.version())
    }

    /// Last status snapshot, `None` when unknown
    pub fn status(&self) -> Option<&DaemonStatus> {
        self.status.as_ref()
    }

    /// Cached queue position of the current song
    pub fn current_song(&self) -> Option<u32> {
        self.song
    }

    /// Cached seconds into the current song
    pub fn elapsed(&self) -> Option<f64> {
        self.elapsed
    }

    pub fn pings(&self) -> &RollingStatistics {
        &self.pings
    }

    pub fn initial_play_offsets(&self) -> &RollingStatistics {
        &self.initial_play_offsets
    }

    pub fn file_type_adjustments(&self) -> &StatsByCategory {
        &self.file_type_adjustments
    }

    /// Five times the average ping after the last connect
    pub fn max_difference(&self) -> f64 {
        self.max_difference
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Record how far off a synchronized start landed
    pub fn record_play_offset(&mut self, file_type: Option<&str>, offset: f64) {
        self.initial_play_offsets.insert(offset);
        if let Some(file_type) = file_type {
            self.file_type_adjustments.insert(file_type, offset);
        }
    }

    /// Open the session, authenticate, and seed the ping window
    ///
    /// Cached status is reset first. The rolling windows survive.
    pub async fn connect(&mut self) -> Result<()> {
        let span = self.span.clone();
        async move {
            self.conn = None;
            self.status = None;
            self.song = None;
            self.elapsed = None;

            let addr = self.settings.address.socket_addr();
            let host = self.host().to_string();
            let timeout = self.settings.timeout;
            debug!(addr = %addr, "Connecting");

            let connecting = tokio::time::timeout(timeout, TcpStream::connect(&addr)).await;
            let stream = match connecting {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => return Err(Error::connection(&host, e)),
                Err(_) => {
                    return Err(Error::Timeout {
                        host,
                        seconds: timeout.as_secs(),
                    })
                }
            };
            let greeting = tokio::time::timeout(timeout, Connection::handshake(stream, &host)).await;
            let conn = match greeting {
                Ok(conn) => conn?,
                Err(_) => {
                    return Err(Error::Timeout {
                        host,
                        seconds: timeout.as_secs(),
                    })
                }
            };
            self.conn = Some(conn);

            if let Some(password) = self.settings.password.clone() {
                self.query(&format!("password {}", quote(&password))).await?;
                debug!("Authenticated");
            }

            self.test_ping().await?;
            info!(
                version = self.daemon_version().unwrap_or("unknown"),
                ping = %format_seconds(self.pings.average()),
                max_difference = %format_seconds(self.max_difference),
                "Connected"
            );
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Close the session; the connection is gone even if saying goodbye fails
    pub async fn disconnect(&mut self) -> Result<()> {
        let span = self.span.clone();
        async move {
            let Some(mut conn) = self.conn.take() else {
                return Ok(());
            };
            debug!("Disconnecting");
            match tokio::time::timeout(self.settings.timeout, conn.close()).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout {
                    host: self.host().to_string(),
                    seconds: self.settings.timeout.as_secs(),
                }),
            }
        }
        .instrument(span)
        .await
    }

    /// Time one `ping` round trip and record it
    pub async fn ping(&mut self) -> Result<f64> {
        let started = Instant::now();
        self.query("ping").await?;
        let seconds = started.elapsed().as_secs_f64();
        self.pings.insert(seconds);
        Ok(seconds)
    }

    async fn test_ping(&mut self) -> Result<()> {
        for sample in 0..self.settings.ping_samples {
            if sample > 0 {
                tokio::time::sleep(self.settings.ping_interval).await;
            }
            self.ping().await?;
        }
        self.max_difference = self.pings.average() * MAX_DIFFERENCE_FACTOR;
        debug!(pings = %self.pings, "Ping window seeded");
        Ok(())
    }

    /// Ping, and on failure reconnect once
    pub async fn check_connection(&mut self) -> ConnectionHealth {
        let span = self.span.clone();
        async move {
            let failure = match self.ping().await {
                Ok(_) => return ConnectionHealth::Healthy,
                Err(e) => e,
            };
            warn!(error = %failure, "Connection seems down; reconnecting");

            if let Err(e) = self.disconnect().await {
                debug!(error = %e, "Disconnect before reconnect failed");
            }

            match self.connect().await {
                Ok(()) => {
                    info!("Reconnected");
                    ConnectionHealth::Recovered
                }
                Err(e) => {
                    error!(error = %e, "Reconnect failed");
                    ConnectionHealth::Unrecoverable
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Fetch and cache the daemon status
    ///
    /// Empty or malformed responses and transport faults are logged and
    /// routed into [`SessionClient::check_connection`]; the result is then
    /// `None`.
    pub async fn refresh_status(&mut self) -> Option<DaemonStatus> {
        let span = self.span.clone();
        async move {
            let parsed = match self.query("status").await {
                Ok(pairs) => DaemonStatus::from_pairs(&pairs),
                Err(e) => Err(e),
            };
            match parsed {
                Ok(status) => {
                    self.song = status.song;
                    self.elapsed = status.elapsed;
                    self.status = Some(status.clone());
                    Some(status)
                }
                Err(e) => {
                    error!(error = %e, "Could not read daemon status");
                    self.status = None;
                    let health = self.check_connection().await;
                    debug!(?health, "Connection checked after bad status");
                    None
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Start a command batch
    ///
    /// Commands issued through [`SessionClient::seek_to`],
    /// [`SessionClient::play`] and friends are queued until
    /// [`SessionClient::commit_batch`].
    pub fn begin_batch(&mut self) -> Result<()> {
        if self.batch.is_some() {
            return Err(Error::BatchAlreadyOpen);
        }
        self.batch = Some(Vec::new());
        Ok(())
    }

    /// Drop a pending batch without sending it, returning how many commands
    /// it held
    pub fn abandon_batch(&mut self) -> usize {
        self.batch.take().map_or(0, |commands| commands.len())
    }

    pub fn in_batch(&self) -> bool {
        self.batch.is_some()
    }

    /// Begin a batch, closing a stale one first if needed
    pub fn open_batch(&mut self) -> Result<()> {
        match self.begin_batch() {
            Err(Error::BatchAlreadyOpen) => {
                let dropped = self.abandon_batch();
                warn!(
                    parent: &self.span,
                    dropped,
                    "Stale command batch left open; closing it and retrying"
                );
                self.begin_batch()
            }
            other => other,
        }
    }

    /// Send the pending batch as one command list
    pub async fn commit_batch(&mut self) -> Result<()> {
        let commands = self
            .batch
            .take()
            .ok_or_else(|| Error::Protocol("no command batch to commit".to_string()))?;
        if commands.is_empty() {
            return Ok(());
        }

        let span = self.span.clone();
        async move {
            debug!(commands = commands.len(), "Committing command batch");
            let timeout = self.settings.timeout;
            let host = self.host().to_string();
            let conn = self
                .conn
                .as_mut()
                .ok_or_else(|| Error::connection(&host, "not connected"))?;
            let result = match tokio::time::timeout(timeout, conn.request_list(&commands)).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout {
                    host,
                    seconds: timeout.as_secs(),
                }),
            };
            self.settle(result)
        }
        .instrument(span)
        .await
    }

    /// Replace the queue with `tracks` in a single batch
    pub async fn apply_playlist(&mut self, tracks: &[Track]) -> Result<()> {
        if tracks.is_empty() {
            return Err(Error::InvalidInput("refusing to load an empty playlist".to_string()));
        }
        self.open_batch()?;
        self.execute("clear".to_string());
        for track in tracks {
            self.execute(format!("add {}", quote(track.path())));
        }
        self.commit_batch().await?;
        info!(parent: &self.span, tracks = tracks.len(), "Queue replaced");
        Ok(())
    }

    /// Seek within the queue
    ///
    /// The cached position is updated before the command goes out. Negative
    /// elapsed values are clamped to 0.
    pub async fn seek_to(&mut self, song: u32, elapsed: f64) -> Result<()> {
        let elapsed = elapsed.max(0.0);
        self.song = Some(song);
        self.elapsed = Some(elapsed);
        self.send(format!("seek {} {}", song, format_seconds(elapsed))).await
    }

    pub async fn play(&mut self) -> Result<()> {
        self.send("play".to_string()).await
    }

    pub async fn pause(&mut self) -> Result<()> {
        self.send("pause 1".to_string()).await
    }

    pub async fn stop(&mut self) -> Result<()> {
        self.send("stop".to_string()).await
    }

    /// The current queue (`playlistinfo`)
    pub async fn queue(&mut self) -> Result<Vec<QueuedTrack>> {
        let pairs = self.query("playlistinfo").await?;
        Ok(split_records(pairs, "file")
            .iter()
            .filter_map(|record| parse_queue_entry(record))
            .collect())
    }

    /// Delete queue entries by song id in one batch
    pub async fn delete_ids(&mut self, ids: &[u32]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.open_batch()?;
        for id in ids {
            self.execute(format!("deleteid {}", id));
        }
        self.commit_batch().await
    }

    /// Database search on one tag, e.g. `search artist "Queen"`
    pub async fn search(&mut self, field: &str, query: &str) -> Result<Vec<Track>> {
        let pairs = self.query(&format!("search {} {}", field, quote(query))).await?;
        Ok(split_records(pairs, "file")
            .iter()
            .filter_map(|record| parse_track(record))
            .collect())
    }

    /// The song at the current queue position
    pub async fn current_track(&mut self) -> Result<Option<Track>> {
        let pairs = self.query("currentsong").await?;
        Ok(split_records(pairs, "file")
            .first()
            .and_then(|record| parse_track(record)))
    }

    /// Lowercased extension of the current song's file
    pub async fn current_file_type(&mut self) -> Result<Option<String>> {
        Ok(self
            .current_track()
            .await?
            .and_then(|track| file_type_of(track.path())))
    }

    /// Queue into the open batch, or run now
    async fn send(&mut self, command: String) -> Result<()> {
        if self.batch.is_some() {
            self.execute(command);
            return Ok(());
        }
        self.query(&command).await.map(|_| ())
    }

    fn execute(&mut self, command: String) {
        if let Some(batch) = self.batch.as_mut() {
            batch.push(command);
        }
    }

    /// One round trip returning response pairs
    async fn query(&mut self, command: &str) -> Result<Vec<Pair>> {
        if self.batch.is_some() {
            return Err(Error::Protocol(format!(
                "`{}` returns data and cannot run inside a command batch",
                command
            )));
        }
        let timeout = self.settings.timeout;
        let host = self.host().to_string();
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| Error::connection(&host, "not connected"))?;
        let result = match tokio::time::timeout(timeout, conn.request(command)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                host,
                seconds: timeout.as_secs(),
            }),
        };
        self.settle(result)
    }

    /// Drop the connection after a fault that leaves the stream unusable
    fn settle<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_transient() {
                debug!(parent: &self.span, error = %e, "Dropping connection");
                self.conn = None;
            }
        }
        result
    }
}

impl std::fmt::Debug for SessionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionClient")
            .field("address", &self.settings.address)
            .field("connected", &self.is_connected())
            .field("status", &self.status)
            .field("pings", &self.pings.to_string())
            .finish()
    }
}
