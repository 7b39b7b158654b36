//! Typed view of the daemon's `status` response

use std::fmt;
use std::str::FromStr;

use mpdfit_common::{Error, Result};

use super::protocol::Pair;

/// Player state reported by `status`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

impl FromStr for PlaybackState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "stop" => Ok(PlaybackState::Stopped),
            "play" => Ok(PlaybackState::Playing),
            "pause" => Ok(PlaybackState::Paused),
            other => Err(Error::Protocol(format!("unknown playback state: {:?}", other))),
        }
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PlaybackState::Stopped => "stopped",
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
        };
        f.write_str(s)
    }
}

/// Snapshot of one `status` round trip
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DaemonStatus {
    pub state: PlaybackState,
    /// Queue position of the current song
    pub song: Option<u32>,
    pub song_id: Option<u32>,
    /// Seconds into the current song
    pub elapsed: Option<f64>,
    /// Length of the current song in seconds
    pub duration: Option<f64>,
    pub playlist_length: u32,
    pub playlist_version: Option<u32>,
    pub repeat: bool,
    pub random: bool,
    pub single: bool,
    pub consume: bool,
}

impl DaemonStatus {
    /// Parse a `status` response
    ///
    /// An empty response, or one missing `state` or `playlistlength`, is a
    /// [`Error::Protocol`].
    pub fn from_pairs(pairs: &[Pair]) -> Result<Self> {
        if pairs.is_empty() {
            return Err(Error::Protocol("empty status response".to_string()));
        }

        let get = |key: &str| {
            pairs
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        };

        let state = get("state")
            .ok_or_else(|| Error::Protocol("status response has no state".to_string()))?
            .parse()?;
        let playlist_length = get("playlistlength")
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| Error::Protocol("status response has no playlistlength".to_string()))?;

        // Older daemons only send `time: elapsed:total` with whole seconds
        let legacy_time = get("time").and_then(|v| v.split_once(':'));
        let elapsed = get("elapsed")
            .and_then(parse_seconds)
            .or_else(|| legacy_time.and_then(|(e, _)| parse_seconds(e)));
        let duration = get("duration")
            .and_then(parse_seconds)
            .or_else(|| legacy_time.and_then(|(_, d)| parse_seconds(d)));

        let flag = |key: &str| get(key).map_or(false, |v| v == "1");

        Ok(Self {
            state,
            song: get("song").and_then(|v| v.parse().ok()),
            song_id: get("songid").and_then(|v| v.parse().ok()),
            elapsed,
            duration,
            playlist_length,
            playlist_version: get("playlist").and_then(|v| v.parse().ok()),
            repeat: flag("repeat"),
            random: flag("random"),
            single: flag("single"),
            consume: flag("consume"),
        })
    }

    pub fn is_playing(&self) -> bool {
        self.state == PlaybackState::Playing
    }
}

fn parse_seconds(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}
