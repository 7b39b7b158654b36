//! The `build` and `trim` workflows
//!
//! These tie catalog search, selection and the sessions together. Neither
//! prints anything; the binary renders the returned reports.

use rand::Rng;
use tracing::{debug, info};

use mpdfit_common::time::format_hms;
use mpdfit_common::{Error, Result};

use crate::catalog::{search_pool, SearchPredicate};
use crate::selection::SelectionEngine;
use crate::session::SessionClient;
use crate::sync::{SyncController, SyncReport};
use crate::track::{Playlist, QueuedTrack};

/// Inputs for [`build`]
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub predicates: Vec<SearchPredicate>,
    /// Desired duration; `None` queues the whole pool shuffled
    pub target_secs: Option<i64>,
    /// Only choose tracks; leave the daemons alone
    pub print_only: bool,
}

impl BuildRequest {
    /// Reject requests that no daemon could satisfy
    pub fn validate(&self) -> Result<()> {
        if self.predicates.is_empty() {
            return Err(Error::InvalidInput("no search predicates given".to_string()));
        }
        if let Some(target_secs) = self.target_secs {
            check_target(target_secs)?;
        }
        Ok(())
    }
}

/// A target duration must be positive
pub fn check_target(target_secs: i64) -> Result<()> {
    if target_secs <= 0 {
        return Err(Error::InvalidInput(format!(
            "target duration must be positive, got {} seconds",
            target_secs
        )));
    }
    Ok(())
}

#[derive(Debug)]
pub struct BuildReport {
    pub playlist: Playlist,
    pub target_secs: Option<i64>,
    pub pool_tracks: usize,
    pub pool_secs: i64,
    pub attempts: usize,
    pub degraded: bool,
    pub allow_duplicates: bool,
    /// Follower start results, when the queue was loaded
    pub sync: Option<SyncReport>,
}

impl BuildReport {
    /// Human-readable summary
    pub fn summary(&self) -> Vec<String> {
        let duration = self.playlist.duration();
        let mut lines = Vec::new();
        match self.target_secs {
            Some(target) => lines.push(format!(
                "New playlist duration: {} of {} desired seconds ({})",
                duration,
                target,
                format_hms(duration)
            )),
            None => lines.push(format!(
                "New playlist duration: {} seconds ({})",
                duration,
                format_hms(duration)
            )),
        }
        let percent = if self.pool_tracks == 0 {
            0
        } else {
            self.playlist.len() * 100 / self.pool_tracks
        };
        lines.push(format!(
            "Used {} ({}%) of {} tracks",
            self.playlist.len(),
            percent,
            self.pool_tracks
        ));
        if self.allow_duplicates {
            lines.push("Matching tracks were shorter than the target, so some repeat".to_string());
        }
        if self.degraded {
            lines.push(format!(
                "Gave up after {} attempts; using the closest playlist found",
                self.attempts
            ));
        }
        lines
    }
}

/// Search, select, and load the result on every daemon
///
/// The reference is loaded and started first; followers are loaded and then
/// started in sync with it. A follower whose load fails is not started and
/// its error appears in [`BuildReport::sync`].
pub async fn build<R: Rng>(
    engine: &mut SelectionEngine<R>,
    controller: &SyncController,
    request: &BuildRequest,
) -> Result<BuildReport> {
    request.validate()?;

    let pool = {
        let mut reference = controller.reference().lock().await;
        search_pool(&mut reference, &request.predicates).await?
    };

    let mut report = match request.target_secs {
        Some(target_secs) => {
            let selection = engine.build(&pool, target_secs)?;
            debug!(attempts = selection.attempts, "Selection finished");
            BuildReport {
                degraded: selection.is_degraded(),
                attempts: selection.attempts,
                allow_duplicates: selection.allow_duplicates,
                playlist: selection.playlist,
                target_secs: Some(target_secs),
                pool_tracks: pool.len(),
                pool_secs: pool.total_duration(),
                sync: None,
            }
        }
        None => {
            debug!("No target duration; using the whole pool");
            BuildReport {
                playlist: engine.shuffle_all(&pool),
                target_secs: None,
                pool_tracks: pool.len(),
                pool_secs: pool.total_duration(),
                attempts: 1,
                degraded: false,
                allow_duplicates: false,
                sync: None,
            }
        }
    };

    if request.print_only {
        return Ok(report);
    }

    {
        let mut reference = controller.reference().lock().await;
        reference.apply_playlist(report.playlist.tracks()).await?;
        reference.play().await?;
    }

    if controller.follower_count() > 0 {
        controller.load_playlist(report.playlist.tracks()).await;
        report.sync = Some(controller.start_all().await);
    }

    info!(
        tracks = report.playlist.len(),
        duration = report.playlist.duration(),
        "Playlist loaded"
    );
    Ok(report)
}

#[derive(Debug)]
pub struct TrimReport {
    pub deleted: Vec<QueuedTrack>,
    pub original_secs: i64,
    pub remaining_secs: i64,
    pub target_secs: i64,
    pub restarts: u32,
}

impl TrimReport {
    pub fn summary(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .deleted
            .iter()
            .map(|entry| format!("Deleted: {}", entry.track.path()))
            .collect();
        lines.push(format!(
            "New queue duration: {} of {} desired seconds ({}), was {}",
            self.remaining_secs,
            self.target_secs,
            format_hms(self.remaining_secs),
            format_hms(self.original_secs)
        ));
        lines
    }
}

/// Shorten the daemon's queue to `target_secs`
pub async fn trim<R: Rng>(
    engine: &mut SelectionEngine<R>,
    client: &mut SessionClient,
    target_secs: i64,
) -> Result<TrimReport> {
    check_target(target_secs)?;
    let queue = client.queue().await?;
    let trim = engine.trim(&queue, target_secs)?;

    if trim.delete.is_empty() {
        info!(
            duration = trim.original_secs,
            target_secs,
            "Queue already short enough"
        );
    } else {
        let ids: Vec<u32> = trim.delete.iter().map(|entry| entry.id).collect();
        client.delete_ids(&ids).await?;
        for entry in &trim.delete {
            info!(path = %entry.track.path(), "Deleted from queue");
        }
        info!(
            deleted = trim.delete.len(),
            duration = trim.remaining_secs,
            restarts = trim.restarts,
            "Queue trimmed"
        );
    }

    Ok(TrimReport {
        deleted: trim.delete,
        original_secs: trim.original_secs,
        remaining_secs: trim.remaining_secs,
        target_secs,
        restarts: trim.restarts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::Track;

    fn report(durations: &[i64], target: Option<i64>, pool_tracks: usize) -> BuildReport {
        BuildReport {
            playlist: Playlist::from_tracks(
                durations
                    .iter()
                    .enumerate()
                    .map(|(i, &d)| Track::new(format!("t{}.mp3", i), d))
                    .collect(),
            ),
            target_secs: target,
            pool_tracks,
            pool_secs: 0,
            attempts: 1,
            degraded: false,
            allow_duplicates: false,
            sync: None,
        }
    }

    #[test]
    fn test_request_validation() {
        let request = |target_secs| BuildRequest {
            predicates: vec![SearchPredicate::new(crate::catalog::SearchField::Genre, "rock")],
            target_secs,
            print_only: false,
        };
        assert!(request(Some(600)).validate().is_ok());
        assert!(request(None).validate().is_ok());
        assert!(matches!(request(Some(0)).validate(), Err(Error::InvalidInput(_))));
        assert!(matches!(request(Some(-60)).validate(), Err(Error::InvalidInput(_))));

        let empty = BuildRequest {
            predicates: Vec::new(),
            ..request(Some(600))
        };
        assert!(matches!(empty.validate(), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_build_summary() {
        let lines = report(&[200, 200, 200], Some(600), 5).summary();
        assert_eq!(lines[0], "New playlist duration: 600 of 600 desired seconds (0:10:00)");
        assert_eq!(lines[1], "Used 3 (60%) of 5 tracks");
        assert_eq!(lines.len(), 2);
    }

    #[test]
    fn test_build_summary_degraded_without_target() {
        let mut r = report(&[3700], None, 1);
        r.degraded = true;
        r.attempts = 4;
        let lines = r.summary();
        assert_eq!(lines[0], "New playlist duration: 3700 seconds (1:01:40)");
        assert_eq!(lines[1], "Used 1 (100%) of 1 tracks");
        assert!(lines[2].contains("4 attempts"));
    }

    #[test]
    fn test_trim_summary_lists_deleted_paths() {
        let report = TrimReport {
            deleted: vec![QueuedTrack {
                id: 4,
                position: 2,
                track: Track::new("a/b.flac", 100),
            }],
            original_secs: 500,
            remaining_secs: 400,
            target_secs: 400,
            restarts: 0,
        };
        let lines = report.summary();
        assert_eq!(lines[0], "Deleted: a/b.flac");
        assert_eq!(
            lines[1],
            "New queue duration: 400 of 400 desired seconds (0:06:40), was 0:08:20"
        );
    }
}
