//! Additive selection: grow a playlist towards the target duration

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, trace, warn};

use mpdfit_common::{Error, Result};

use super::{Selection, SelectionEngine, SelectionOutcome};
use crate::track::{Playlist, Pool, Track};

impl<R: Rng> SelectionEngine<R> {
    /// Pick tracks from `pool` until the playlist is within tolerance of
    /// `target_secs`
    ///
    /// When the whole pool is shorter than the band, every track goes in
    /// once and the remainder is filled with repeats. Otherwise each track is
    /// used at most once. A pass that runs out of fitting tracks outside the
    /// band starts over; after `pool.len()` attempts the closest playlist
    /// seen is returned as [`SelectionOutcome::Degraded`].
    pub fn build(&mut self, pool: &Pool, target_secs: i64) -> Result<Selection> {
        self.check_request(target_secs)?;
        if pool.is_empty() {
            return Err(Error::NoTracks("selection pool is empty".to_string()));
        }

        let tolerance = self.tolerance_secs;
        let allow_duplicates = pool.total_duration() < target_secs - tolerance;
        if allow_duplicates {
            debug!(
                pool_secs = pool.total_duration(),
                target_secs,
                "Pool shorter than target; allowing duplicate tracks"
            );
        } else {
            debug!("Not allowing duplicate tracks");
        }

        let fresh_playlist = || {
            if allow_duplicates {
                Playlist::from_tracks(pool.tracks().to_vec())
            } else {
                Playlist::new()
            }
        };

        let max_attempts = pool.len();
        let mut attempts = 1usize;
        let mut working: Vec<Track> = pool.tracks().to_vec();
        let mut playlist = fresh_playlist();
        let mut best: Option<Playlist> = None;

        loop {
            let remaining = target_secs - playlist.duration();
            let fits: Vec<usize> = working
                .iter()
                .enumerate()
                .filter(|(_, track)| track.duration_secs() <= remaining)
                .map(|(index, _)| index)
                .collect();

            if let Some(&index) = fits.choose(&mut self.rng) {
                let track = if allow_duplicates {
                    working[index].clone()
                } else {
                    working.remove(index)
                };
                trace!(track = %track, remaining, candidates = fits.len(), "Adding track");
                playlist.push(track);
                continue;
            }

            let distance = (target_secs - playlist.duration()).abs();
            if distance <= tolerance {
                debug!(attempts, duration = playlist.duration(), "Playlist within tolerance");
                return Ok(Selection {
                    playlist,
                    attempts,
                    outcome: SelectionOutcome::WithinTolerance,
                    allow_duplicates,
                });
            }

            let closer = best
                .as_ref()
                .map_or(true, |b| distance < (target_secs - b.duration()).abs());
            if closer {
                best = Some(playlist.clone());
            }

            if attempts >= max_attempts {
                let playlist = best.unwrap_or(playlist);
                warn!(
                    attempts,
                    tolerance,
                    duration = playlist.duration(),
                    target_secs,
                    "Could not build a playlist within tolerance; using the closest one found"
                );
                return Ok(Selection {
                    playlist,
                    attempts,
                    outcome: SelectionOutcome::Degraded,
                    allow_duplicates,
                });
            }

            debug!(
                attempts,
                duration = playlist.duration(),
                remaining,
                "No fitting tracks left outside tolerance; starting over"
            );
            attempts += 1;
            working = pool.tracks().to_vec();
            playlist = fresh_playlist();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    fn pool_of(durations: &[i64]) -> Pool {
        Pool::from_tracks(
            durations
                .iter()
                .enumerate()
                .map(|(i, &d)| Track::new(format!("track{:03}.flac", i), d)),
        )
    }

    fn resum(playlist: &Playlist) -> i64 {
        playlist.iter().map(Track::duration_secs).sum()
    }

    #[test]
    fn test_five_equal_tracks_hit_target_exactly() {
        let pool = pool_of(&[200, 200, 200, 200, 200]);
        for seed in 0..20 {
            let mut engine = SelectionEngine::seeded(seed);
            let selection = engine.build(&pool, 600).unwrap();

            assert_eq!(selection.outcome, SelectionOutcome::WithinTolerance);
            assert!(!selection.allow_duplicates);
            assert_eq!(selection.playlist.len(), 3);
            assert_eq!(selection.playlist.duration(), 600);
            assert_eq!(selection.attempts, 1);

            let unique: HashSet<_> = selection.playlist.iter().collect();
            assert_eq!(unique.len(), 3);
        }
    }

    #[test]
    fn test_short_pool_repeats_tracks() {
        let pool = pool_of(&[100, 100]);
        let mut engine = SelectionEngine::seeded(7);
        let selection = engine.build(&pool, 600).unwrap();

        assert!(selection.allow_duplicates);
        assert_eq!(selection.outcome, SelectionOutcome::WithinTolerance);
        let duration = selection.playlist.duration();
        assert!((570..=630).contains(&duration), "duration {}", duration);
        for track in pool.tracks() {
            assert!(selection.playlist.count(track) >= 1);
        }
        assert!(selection.playlist.len() > pool.len());
    }

    #[test]
    fn test_short_pool_always_contains_whole_pool() {
        let pool = pool_of(&[95, 130, 42, 61]);
        for seed in 0..50 {
            let mut engine = SelectionEngine::seeded(seed);
            let selection = engine.build(&pool, 1800).unwrap();
            assert!(selection.allow_duplicates);
            for track in pool.tracks() {
                assert!(selection.playlist.count(track) >= 1, "seed {}", seed);
            }
        }
    }

    #[test]
    fn test_within_tolerance_or_degraded_after_pool_len_attempts() {
        let mut rng = StdRng::seed_from_u64(42);
        for round in 0..200 {
            let len = rng.gen_range(1..15);
            let durations: Vec<i64> = (0..len).map(|_| rng.gen_range(30..700)).collect();
            let pool = pool_of(&durations);
            let target = rng.gen_range(60..4000);

            let mut engine = SelectionEngine::seeded(round);
            let selection = engine.build(&pool, target).unwrap();

            assert_eq!(selection.playlist.duration(), resum(&selection.playlist));
            match selection.outcome {
                SelectionOutcome::WithinTolerance => {
                    assert!((selection.playlist.duration() - target).abs() <= 30);
                    assert!(selection.attempts <= pool.len());
                }
                SelectionOutcome::Degraded => {
                    assert_eq!(selection.attempts, pool.len(), "round {}", round);
                }
            }
        }
    }

    #[test]
    fn test_unique_mode_never_repeats() {
        let pool = pool_of(&[180, 240, 215, 300, 199, 262, 175, 410, 233, 187]);
        for seed in 0..30 {
            let mut engine = SelectionEngine::seeded(seed);
            let selection = engine.build(&pool, 900).unwrap();
            assert!(!selection.allow_duplicates);
            let unique: HashSet<_> = selection.playlist.iter().collect();
            assert_eq!(unique.len(), selection.playlist.len());
        }
    }

    #[test]
    fn test_negative_duration_never_selected() {
        let pool = Pool::from_tracks(vec![
            Track::new("broken.mp3", -100),
            Track::new("a.mp3", 120),
            Track::new("b.mp3", 150),
        ]);
        let broken = Track::new("broken.mp3", -100);
        for seed in 0..20 {
            let mut engine = SelectionEngine::seeded(seed);
            let selection = engine.build(&pool, 900).unwrap();
            assert_eq!(selection.playlist.count(&broken), 0);
        }
    }

    #[test]
    fn test_target_shorter_than_every_track_uses_retry_branch() {
        // Nothing ever fits, so every attempt ends with an empty playlist
        let pool = pool_of(&[300, 400, 500]);
        let mut engine = SelectionEngine::seeded(1);
        let selection = engine.build(&pool, 100).unwrap();

        assert_eq!(selection.outcome, SelectionOutcome::Degraded);
        assert_eq!(selection.attempts, 3);
        assert!(selection.playlist.is_empty());
    }

    #[test]
    fn test_unreachable_band_degrades_to_closest() {
        // Repeats of one 100s track stop at 700, 50s short of the target
        let pool = pool_of(&[100]);
        let mut engine = SelectionEngine::seeded(3);
        let selection = engine.build(&pool, 750).unwrap();

        assert!(selection.is_degraded());
        assert_eq!(selection.attempts, 1);
        assert_eq!(selection.playlist.duration(), 700);
    }

    #[test]
    fn test_rejects_non_positive_target() {
        let pool = pool_of(&[100]);
        let mut engine = SelectionEngine::seeded(0);
        assert!(matches!(engine.build(&pool, 0), Err(Error::InvalidInput(_))));
        assert!(matches!(engine.build(&pool, -60), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_rejects_empty_pool() {
        let mut engine = SelectionEngine::seeded(0);
        let err = engine.build(&Pool::default(), 600).unwrap_err();
        assert!(err.is_no_tracks());
    }

    #[test]
    fn test_custom_tolerance() {
        let pool = pool_of(&[100, 100, 100]);
        let mut engine = SelectionEngine::seeded(0).with_tolerance(0);
        let selection = engine.build(&pool, 200).unwrap();
        assert_eq!(selection.playlist.duration(), 200);
        assert_eq!(engine.tolerance_secs(), 0);
    }

    #[test]
    fn test_shuffle_all_keeps_every_track() {
        let pool = pool_of(&[10, 20, 30, 40]);
        let mut engine = SelectionEngine::seeded(9);
        let playlist = engine.shuffle_all(&pool);
        assert_eq!(playlist.len(), 4);
        assert_eq!(playlist.duration(), 100);
        for track in pool.tracks() {
            assert_eq!(playlist.count(track), 1);
        }
    }
}
