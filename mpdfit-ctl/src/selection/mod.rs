//! Duration-constrained track selection
//!
//! Two modes share one engine:
//! - **build** ([`SelectionEngine::build`]) adds random tracks from a pool
//!   until the playlist lands within the tolerance band around the target.
//! - **trim** ([`SelectionEngine::trim`]) removes random entries from an
//!   existing queue until it is no longer than the target.
//!
//! Both restart from scratch when a pass ends outside the band, up to a fixed
//! number of attempts. The engine is synchronous and owns its random source,
//! so tests can seed it.

mod build;
mod trim;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use mpdfit_common::config::DEFAULT_TOLERANCE_SECS;
use mpdfit_common::{Error, Result};

use crate::track::{Playlist, Pool, QueuedTrack};

/// Restarts allowed before trimming gives up
pub const DEFAULT_TRIM_RETRIES: u32 = 20;

/// How a build run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionOutcome {
    /// Playlist duration is within tolerance of the target
    WithinTolerance,
    /// Attempt bound reached; the closest playlist found is returned
    Degraded,
}

/// Result of [`SelectionEngine::build`]
#[derive(Debug, Clone)]
pub struct Selection {
    pub playlist: Playlist,
    /// Attempts made, starting at 1
    pub attempts: usize,
    pub outcome: SelectionOutcome,
    /// Whether tracks could repeat because the pool was too short
    pub allow_duplicates: bool,
}

impl Selection {
    pub fn is_degraded(&self) -> bool {
        self.outcome == SelectionOutcome::Degraded
    }
}

/// Result of [`SelectionEngine::trim`]
#[derive(Debug, Clone)]
pub struct Trim {
    /// Queue entries to delete, in the order they were picked
    pub delete: Vec<QueuedTrack>,
    pub original_secs: i64,
    pub remaining_secs: i64,
    /// Passes thrown away for overshooting the band
    pub restarts: u32,
}

/// Randomized bounded-retry selector
pub struct SelectionEngine<R = StdRng> {
    rng: R,
    tolerance_secs: i64,
    trim_retry_limit: u32,
}

impl SelectionEngine<StdRng> {
    /// Engine seeded from OS entropy with the default tolerance
    pub fn from_entropy() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Deterministic engine for reproducible runs
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }
}

impl<R: Rng> SelectionEngine<R> {
    pub fn with_rng(rng: R) -> Self {
        Self {
            rng,
            tolerance_secs: DEFAULT_TOLERANCE_SECS,
            trim_retry_limit: DEFAULT_TRIM_RETRIES,
        }
    }

    pub fn with_tolerance(mut self, tolerance_secs: i64) -> Self {
        self.tolerance_secs = tolerance_secs;
        self
    }

    pub fn with_trim_retry_limit(mut self, limit: u32) -> Self {
        self.trim_retry_limit = limit;
        self
    }

    pub fn tolerance_secs(&self) -> i64 {
        self.tolerance_secs
    }

    /// Every pool track once, in random order
    pub fn shuffle_all(&mut self, pool: &Pool) -> Playlist {
        let mut tracks = pool.tracks().to_vec();
        tracks.shuffle(&mut self.rng);
        Playlist::from_tracks(tracks)
    }

    fn check_request(&self, target_secs: i64) -> Result<()> {
        if target_secs <= 0 {
            return Err(Error::InvalidInput(format!(
                "target duration must be positive, got {} seconds",
                target_secs
            )));
        }
        if self.tolerance_secs < 0 {
            return Err(Error::InvalidInput(format!(
                "tolerance must not be negative, got {} seconds",
                self.tolerance_secs
            )));
        }
        Ok(())
    }
}
