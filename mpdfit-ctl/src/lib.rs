//! mpdfit - duration-constrained queue curation for MPD
//!
//! Builds a queue whose total length lands near a requested duration, or
//! trims the current queue down to one, and starts follower daemons in sync
//! with a reference daemon.

pub mod catalog;
pub mod commands;
pub mod selection;
pub mod session;
pub mod sync;
pub mod track;

pub use selection::{Selection, SelectionEngine, SelectionOutcome, Trim};
pub use session::{ConnectionHealth, SessionClient, SessionSettings};
pub use sync::{FollowerState, SyncController, SyncReport};
pub use track::{Playlist, Pool, QueuedTrack, Track};
