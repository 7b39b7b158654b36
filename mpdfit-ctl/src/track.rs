//! Track, pool and playlist types
//!
//! A [`Track`] is identified by its path alone, so the same file reported by
//! two different searches collapses to one pool entry. [`Playlist`] keeps its
//! total duration in step with every mutation and exposes no operation that
//! could bypass it.

use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};

use tracing::debug;

/// One file in the daemon's database
#[derive(Debug, Clone)]
pub struct Track {
    path: String,
    duration_secs: i64,
}

impl Track {
    pub fn new(path: impl Into<String>, duration_secs: i64) -> Self {
        Self {
            path: path.into(),
            duration_secs,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Duration as reported by the daemon. May be zero or negative for
    /// broken files; [`Pool::from_tracks`] drops those.
    pub fn duration_secs(&self) -> i64 {
        self.duration_secs
    }

    /// Lowercased file extension, used to group seek statistics
    pub fn file_type(&self) -> Option<String> {
        file_type_of(&self.path)
    }
}

impl PartialEq for Track {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for Track {}

impl Hash for Track {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path.hash(state);
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.path.rsplit('/').next().unwrap_or(&self.path);
        write!(f, "{} ({}s)", name, self.duration_secs)
    }
}

/// Lowercased extension of `path`, if it has one
pub fn file_type_of(path: &str) -> Option<String> {
    let name = path.rsplit('/').next()?;
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// An entry of the daemon's current queue
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedTrack {
    /// Daemon-assigned song id, stable across queue edits
    pub id: u32,
    /// Position in the queue when it was fetched
    pub position: u32,
    pub track: Track,
}

impl QueuedTrack {
    pub fn duration_secs(&self) -> i64 {
        self.track.duration_secs()
    }
}

/// Candidate tracks for selection
///
/// Deduplicated by path, first occurrence wins. Tracks with a non-positive
/// duration are rejected at construction.
#[derive(Debug, Clone, Default)]
pub struct Pool {
    tracks: Vec<Track>,
    total_duration: i64,
}

impl Pool {
    pub fn from_tracks<I: IntoIterator<Item = Track>>(tracks: I) -> Self {
        let mut seen = HashSet::new();
        let mut kept = Vec::new();
        let mut rejected = 0usize;

        for track in tracks {
            if track.duration_secs() <= 0 {
                debug!(path = %track.path(), duration = track.duration_secs(), "Dropping track with invalid duration");
                rejected += 1;
                continue;
            }
            if seen.insert(track.path().to_string()) {
                kept.push(track);
            }
        }

        if rejected > 0 {
            debug!(rejected, "Tracks with non-positive durations removed from pool");
        }

        let total_duration = kept.iter().map(Track::duration_secs).sum();
        Self {
            tracks: kept,
            total_duration,
        }
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Sum of all durations in seconds
    pub fn total_duration(&self) -> i64 {
        self.total_duration
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn contains(&self, track: &Track) -> bool {
        self.tracks.contains(track)
    }
}

/// Ordered tracks with a running total duration
///
/// Duplicates are allowed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Playlist {
    tracks: Vec<Track>,
    duration: i64,
}

impl Playlist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from existing tracks, summing once
    pub fn from_tracks(tracks: Vec<Track>) -> Self {
        let duration = tracks.iter().map(Track::duration_secs).sum();
        Self { tracks, duration }
    }

    pub fn push(&mut self, track: Track) {
        self.duration += track.duration_secs();
        self.tracks.push(track);
    }

    pub fn extend<I: IntoIterator<Item = Track>>(&mut self, tracks: I) {
        for track in tracks {
            self.push(track);
        }
    }

    /// Remove and return the track at `index`, or `None` when out of range
    pub fn remove(&mut self, index: usize) -> Option<Track> {
        if index >= self.tracks.len() {
            return None;
        }
        let track = self.tracks.remove(index);
        self.duration -= track.duration_secs();
        Some(track)
    }

    /// Total duration in seconds
    pub fn duration(&self) -> i64 {
        self.duration
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Track> {
        self.tracks.iter()
    }

    /// Number of times `track` appears
    pub fn count(&self, track: &Track) -> usize {
        self.tracks.iter().filter(|t| *t == track).count()
    }

    pub fn into_tracks(self) -> Vec<Track> {
        self.tracks
    }
}

impl<'a> IntoIterator for &'a Playlist {
    type Item = &'a Track;
    type IntoIter = std::slice::Iter<'a, Track>;

    fn into_iter(self) -> Self::IntoIter {
        self.tracks.iter()
    }
}
