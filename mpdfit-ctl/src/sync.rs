//! Synchronized playback across daemons
//!
//! One reference session defines the true position. Each follower starts
//! playback seeked ahead of the reference by an estimate of its start-up
//! delay, so audio lines up once the follower is actually playing. The
//! estimate comes from, in order: the follower's fixed latency override,
//! the rolling average of its past start offsets, or its average ping.
//!
//! Followers are started concurrently on their own tasks. A failing
//! follower is reported and left idle without affecting the others.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, info, warn, Instrument};

use mpdfit_common::time::format_seconds;
use mpdfit_common::{Error, Result};

use crate::session::SessionClient;
use crate::track::Track;

/// Session shared between the controller and its follower tasks
pub type SharedSession = Arc<Mutex<SessionClient>>;

/// Reference polls made while waiting for a known elapsed time
pub const DEFAULT_POLL_ATTEMPTS: usize = 10;

/// Pause between those polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowerState {
    Idle,
    /// First synchronized start in progress
    Starting,
    Synchronized,
    /// Synchronized start of an already synchronized follower
    Resyncing,
}

/// A follower session plus its sync bookkeeping
#[derive(Debug)]
pub struct Follower {
    client: SessionClient,
    state: FollowerState,
    played_since_last_playlist_update: bool,
    queue_loaded: bool,
    load_error: Option<Error>,
}

impl Follower {
    pub fn new(client: SessionClient) -> Self {
        Self {
            client,
            state: FollowerState::Idle,
            played_since_last_playlist_update: false,
            queue_loaded: true,
            load_error: None,
        }
    }

    pub fn client(&self) -> &SessionClient {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut SessionClient {
        &mut self.client
    }

    pub fn state(&self) -> FollowerState {
        self.state
    }

    pub fn played_since_last_playlist_update(&self) -> bool {
        self.played_since_last_playlist_update
    }

    /// False after the last [`SyncController::load_playlist`] failed here
    pub fn queue_loaded(&self) -> bool {
        self.queue_loaded
    }

    /// Seconds to seek ahead of the reference
    pub fn adjust_by(&self) -> f64 {
        if let Some(latency) = self.client.latency_override() {
            debug!(latency, "Adjusting by fixed latency");
            latency
        } else if !self.client.initial_play_offsets().is_empty() {
            debug!("Adjusting by average initial play offset");
            self.client.initial_play_offsets().average()
        } else {
            debug!("Adjusting by average ping");
            self.client.pings().average()
        }
    }
}

/// What one follower start did
#[derive(Debug, Clone, PartialEq)]
pub struct StartOutcome {
    /// Whether the start was seeked against the reference
    pub initial: bool,
    pub adjust_by: f64,
    /// `(song, elapsed)` the follower was seeked to
    pub seek: Option<(u32, f64)>,
    /// Offset recorded after the start, when it could be measured
    pub measured_offset: Option<f64>,
}

/// Per-follower results of [`SyncController::start_all`], in follower order
#[derive(Debug)]
pub struct SyncReport {
    pub results: Vec<(String, Result<StartOutcome>)>,
}

impl SyncReport {
    pub fn all_ok(&self) -> bool {
        self.results.iter().all(|(_, result)| result.is_ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &Error)> {
        self.results
            .iter()
            .filter_map(|(host, result)| result.as_ref().err().map(|e| (host.as_str(), e)))
    }
}

#[derive(Debug, Clone, Copy)]
struct PollSettings {
    attempts: usize,
    interval: Duration,
}

pub struct SyncController {
    reference: SharedSession,
    followers: Vec<Arc<Mutex<Follower>>>,
    poll: PollSettings,
}

impl SyncController {
    pub fn new(reference: SharedSession) -> Self {
        Self {
            reference,
            followers: Vec::new(),
            poll: PollSettings {
                attempts: DEFAULT_POLL_ATTEMPTS,
                interval: DEFAULT_POLL_INTERVAL,
            },
        }
    }

    /// Override how long to wait for the reference's elapsed time
    pub fn with_polling(mut self, attempts: usize, interval: Duration) -> Self {
        self.poll = PollSettings { attempts, interval };
        self
    }

    pub fn reference(&self) -> &SharedSession {
        &self.reference
    }

    /// Add a follower and return its index
    pub fn add_follower(&mut self, client: SessionClient) -> usize {
        self.followers.push(Arc::new(Mutex::new(Follower::new(client))));
        self.followers.len() - 1
    }

    pub fn follower(&self, index: usize) -> Option<&Arc<Mutex<Follower>>> {
        self.followers.get(index)
    }

    pub fn follower_count(&self) -> usize {
        self.followers.len()
    }

    pub async fn follower_state(&self, index: usize) -> Option<FollowerState> {
        match self.followers.get(index) {
            Some(follower) => Some(follower.lock().await.state()),
            None => None,
        }
    }

    /// Forget that followers have played the current queue
    pub async fn playlist_updated(&self) {
        for follower in &self.followers {
            follower.lock().await.played_since_last_playlist_update = false;
        }
    }

    /// Load `tracks` on every follower concurrently
    ///
    /// A follower whose load fails keeps its stale queue and is not started
    /// by later calls; the load error is reported by the next start. Returns
    /// the number of followers that loaded the playlist.
    pub async fn load_playlist(&self, tracks: &[Track]) -> usize {
        let tracks: Arc<[Track]> = tracks.into();
        let mut tasks = JoinSet::new();
        for follower in &self.followers {
            let follower = Arc::clone(follower);
            let tracks = Arc::clone(&tracks);
            tasks.spawn(async move {
                let mut follower = follower.lock().await;
                let result = follower.client.apply_playlist(&tracks).await;
                follower.played_since_last_playlist_update = false;
                match result {
                    Ok(()) => {
                        follower.queue_loaded = true;
                        follower.load_error = None;
                        true
                    }
                    Err(e) => {
                        warn!(
                            follower = %follower.client.address(),
                            error = %e,
                            "Could not load playlist on follower"
                        );
                        follower.state = FollowerState::Idle;
                        follower.queue_loaded = false;
                        follower.load_error = Some(e);
                        false
                    }
                }
            });
        }

        let mut loaded = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(true) => loaded += 1,
                Ok(false) => {}
                Err(e) => std::panic::resume_unwind(e.into_panic()),
            }
        }
        debug!(loaded, followers = self.followers.len(), "Follower playlists loaded");
        loaded
    }

    /// Start one follower
    pub async fn start_follower(&self, index: usize, initial: bool) -> Result<StartOutcome> {
        let follower = self.followers.get(index).cloned().ok_or_else(|| {
            Error::InvalidInput(format!("no follower with index {}", index))
        })?;
        let mut follower = follower.lock().await;
        start(&mut follower, &self.reference, initial, self.poll).await
    }

    /// Start every follower concurrently
    ///
    /// A follower that has not played since the last playlist update gets a
    /// synchronized start; the others just resume.
    pub async fn start_all(&self) -> SyncReport {
        let mut tasks = JoinSet::new();
        for (index, follower) in self.followers.iter().enumerate() {
            let follower = Arc::clone(follower);
            let reference = Arc::clone(&self.reference);
            let poll = self.poll;
            tasks.spawn(async move {
                let mut follower = follower.lock().await;
                let host = follower.client.address().to_string();
                let initial = !follower.played_since_last_playlist_update;
                let result = start(&mut follower, &reference, initial, poll).await;
                (index, host, result)
            });
        }

        let mut results: Vec<(usize, String, Result<StartOutcome>)> = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(entry) => results.push(entry),
                Err(e) => std::panic::resume_unwind(e.into_panic()),
            }
        }
        results.sort_by_key(|(index, _, _)| *index);

        let report = SyncReport {
            results: results
                .into_iter()
                .map(|(_, host, result)| (host, result))
                .collect(),
        };
        for (host, e) in report.failures() {
            warn!(follower = host, error = %e, "Follower failed to start");
        }
        report
    }
}

async fn start(
    follower: &mut Follower,
    reference: &SharedSession,
    initial: bool,
    poll: PollSettings,
) -> Result<StartOutcome> {
    let span = follower.client.span().clone();
    async move {
        if !follower.queue_loaded {
            follower.state = FollowerState::Idle;
            return Err(follower.load_error.take().unwrap_or_else(|| {
                Error::InvalidInput("playlist was not loaded on this follower".to_string())
            }));
        }

        let result = if initial {
            follower.state = if follower.state == FollowerState::Synchronized {
                FollowerState::Resyncing
            } else {
                FollowerState::Starting
            };
            synchronized_start(follower, reference, poll).await
        } else {
            debug!("Resuming without seek");
            follower.client.play().await.map(|()| StartOutcome {
                initial: false,
                adjust_by: 0.0,
                seek: None,
                measured_offset: None,
            })
        };

        match result {
            Ok(outcome) => {
                follower.state = FollowerState::Synchronized;
                follower.played_since_last_playlist_update = true;
                Ok(outcome)
            }
            Err(e) => {
                follower.state = FollowerState::Idle;
                Err(e)
            }
        }
    }
    .instrument(span)
    .await
}

async fn synchronized_start(
    follower: &mut Follower,
    reference: &SharedSession,
    poll: PollSettings,
) -> Result<StartOutcome> {
    let adjust_by = follower.adjust_by();
    debug!(adjust_by = %format_seconds(adjust_by), "Adjusting initial play");

    reference.lock().await.refresh_status().await;

    let mut seek = queue_start(follower, reference, adjust_by, poll).await?;
    if let Err(e) = follower.client.commit_batch().await {
        if !e.is_transient() {
            return Err(e);
        }
        warn!(error = %e, "Start failed; checking connection");
        if !follower.client.check_connection().await.is_usable() {
            return Err(e);
        }
        seek = queue_start(follower, reference, adjust_by, poll).await?;
        follower.client.commit_batch().await?;
    }

    let measured_offset = match seek {
        Some(_) => measure_offset(follower, reference, adjust_by).await,
        None => None,
    };
    info!(
        adjust_by = %format_seconds(adjust_by),
        seek = ?seek,
        "Follower started"
    );

    Ok(StartOutcome {
        initial: true,
        adjust_by,
        seek,
        measured_offset,
    })
}

/// Open the follower batch and queue the seek and play commands
async fn queue_start(
    follower: &mut Follower,
    reference: &SharedSession,
    adjust_by: f64,
    poll: PollSettings,
) -> Result<Option<(u32, f64)>> {
    follower.client.open_batch()?;

    let mut seek = None;
    if adjust_by > 0.0 {
        match reference_position(reference, poll).await {
            Some((song, elapsed)) => {
                let target = elapsed + adjust_by;
                follower.client.seek_to(song, target).await?;
                seek = follower.client.current_song().zip(follower.client.elapsed());
                debug!(song, elapsed = %format_seconds(target), "Seek queued");
            }
            None => warn!(
                polls = poll.attempts,
                "Reference position still unknown; starting without seek"
            ),
        }
    }

    follower.client.play().await?;
    Ok(seek)
}

/// Poll the reference until both its song and elapsed time are known
async fn reference_position(reference: &SharedSession, poll: PollSettings) -> Option<(u32, f64)> {
    for attempt in 0..=poll.attempts {
        if attempt > 0 {
            tokio::time::sleep(poll.interval).await;
            reference.lock().await.refresh_status().await;
        }
        let session = reference.lock().await;
        if let (Some(song), Some(elapsed)) = (session.current_song(), session.elapsed()) {
            return Some((song, elapsed));
        }
        debug!(attempt, "Reference elapsed time unknown");
    }
    None
}

/// Compare follower and reference positions after a start and record the
/// offset the next start should use
async fn measure_offset(
    follower: &mut Follower,
    reference: &SharedSession,
    adjust_by: f64,
) -> Option<f64> {
    let reference_elapsed = {
        let mut session = reference.lock().await;
        session.refresh_status().await.and_then(|s| s.elapsed)
    };
    let follower_elapsed = follower.client.refresh_status().await.and_then(|s| s.elapsed);

    let (Some(reference_elapsed), Some(follower_elapsed)) = (reference_elapsed, follower_elapsed) else {
        debug!("Could not measure start offset");
        return None;
    };

    let offset = adjust_by + (reference_elapsed - follower_elapsed);
    let file_type = match follower.client.current_file_type().await {
        Ok(file_type) => file_type,
        Err(e) => {
            debug!(error = %e, "Could not read current file type");
            None
        }
    };
    follower.client.record_play_offset(file_type.as_deref(), offset);
    debug!(
        offset = %format_seconds(offset),
        file_type = file_type.as_deref().unwrap_or("unknown"),
        offsets = %follower.client.initial_play_offsets(),
        "Recorded start offset"
    );
    Some(offset)
}
