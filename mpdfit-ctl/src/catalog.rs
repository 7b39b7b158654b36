//! Building a selection pool from daemon searches

use std::fmt;
use std::str::FromStr;

use tracing::{debug, info};

use mpdfit_common::{Error, Result};

use crate::session::SessionClient;
use crate::track::{Pool, Track};

/// Tag a search matches against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchField {
    Any,
    Artist,
    Album,
    Title,
    Genre,
}

impl SearchField {
    /// Tag name on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchField::Any => "any",
            SearchField::Artist => "artist",
            SearchField::Album => "album",
            SearchField::Title => "title",
            SearchField::Genre => "genre",
        }
    }
}

impl fmt::Display for SearchField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchField {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "any" => Ok(SearchField::Any),
            "artist" => Ok(SearchField::Artist),
            "album" => Ok(SearchField::Album),
            "title" => Ok(SearchField::Title),
            "genre" => Ok(SearchField::Genre),
            other => Err(Error::InvalidInput(format!("unknown search field: {}", other))),
        }
    }
}

/// One `search <field> "<query>"`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchPredicate {
    pub field: SearchField,
    pub query: String,
}

impl SearchPredicate {
    pub fn new(field: SearchField, query: impl Into<String>) -> Self {
        Self {
            field,
            query: query.into(),
        }
    }
}

impl fmt::Display for SearchPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={:?}", self.field, self.query)
    }
}

/// Run every predicate and pool the union of the matches
///
/// Matches are deduplicated by path in the order they arrive. Tracks with
/// unusable durations are dropped by [`Pool::from_tracks`].
pub async fn search_pool(client: &mut SessionClient, predicates: &[SearchPredicate]) -> Result<Pool> {
    if predicates.is_empty() {
        return Err(Error::InvalidInput("no search terms given".to_string()));
    }

    let mut found: Vec<Track> = Vec::new();
    for predicate in predicates {
        let tracks = client
            .search(predicate.field.as_str(), &predicate.query)
            .await?;
        debug!(predicate = %predicate, matches = tracks.len(), "Search finished");
        found.extend(tracks);
    }

    let pool = Pool::from_tracks(found);
    if pool.is_empty() {
        let terms: Vec<String> = predicates.iter().map(ToString::to_string).collect();
        return Err(Error::NoTracks(format!("nothing matched {}", terms.join(", "))));
    }

    info!(
        tracks = pool.len(),
        total_secs = pool.total_duration(),
        "Selection pool ready"
    );
    Ok(pool)
}
