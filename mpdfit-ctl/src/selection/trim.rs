//! Subtractive selection: shorten an existing queue to the target duration

use rand::Rng;
use tracing::{debug, error, trace};

use mpdfit_common::{Error, Result};

use super::{SelectionEngine, Trim};
use crate::track::QueuedTrack;

impl<R: Rng> SelectionEngine<R> {
    /// Choose queue entries to delete so the rest is no longer than
    /// `target_secs`
    ///
    /// Entries are removed at random while the queue is longer than the
    /// target. A pass that ends more than the tolerance below the target is
    /// discarded and the queue restored; after the retry limit the trim fails
    /// with [`Error::TargetUnreachable`]. Entries without a positive duration
    /// are never deleted and do not count towards the total.
    pub fn trim(&mut self, queue: &[QueuedTrack], target_secs: i64) -> Result<Trim> {
        self.check_request(target_secs)?;

        let candidates: Vec<&QueuedTrack> =
            queue.iter().filter(|entry| entry.duration_secs() > 0).collect();
        let original_secs: i64 = candidates.iter().map(|entry| entry.duration_secs()).sum();

        debug!(original_secs, target_secs, entries = queue.len(), "Trimming queue");

        let tolerance = self.tolerance_secs;
        let mut restarts = 0u32;
        let mut working = candidates.clone();
        let mut duration = original_secs;
        let mut delete: Vec<QueuedTrack> = Vec::new();

        while duration > target_secs {
            // duration > target > 0 means at least one positive entry is left
            let index = self.rng.gen_range(0..working.len());
            let entry = working.remove(index);
            duration -= entry.duration_secs();
            trace!(track = %entry.track, duration, "Removing entry");
            delete.push(entry.clone());

            if duration < target_secs && target_secs - duration > tolerance {
                restarts += 1;
                debug!(restarts, duration, "Overshot the tolerance band; starting over");

                if restarts > self.trim_retry_limit {
                    error!(
                        restarts,
                        target_secs,
                        "No combination of removals reached the target duration"
                    );
                    return Err(Error::TargetUnreachable(format!(
                        "could not trim {}s queue to within {}s of {}s after {} restarts",
                        original_secs, tolerance, target_secs, self.trim_retry_limit
                    )));
                }

                working = candidates.clone();
                duration = original_secs;
                delete.clear();
            }
        }

        Ok(Trim {
            delete,
            original_secs,
            remaining_secs: duration,
            restarts,
        })
    }
}
