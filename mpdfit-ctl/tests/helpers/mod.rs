//! Test helpers for mpdfit-ctl integration tests
//!
//! - FakeMpd: in-process daemon speaking the MPD line protocol

#![allow(dead_code)]

pub mod fake_mpd;

pub use fake_mpd::{FakeMpd, FakeSong, Fault};
