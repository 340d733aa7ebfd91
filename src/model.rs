use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

pub const SCHEMA_VERSION: u32 = 3;
pub const MAX_SESSION_LOG: usize = 1_000;
pub const UNKNOWN_ARTIST: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtistRef {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlbumRef {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// What the host reports about the item that is playing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackInfo {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub artists: Vec<ArtistRef>,
    #[serde(default)]
    pub album: Option<AlbumRef>,
    /// Nominal length. Zero when the host did not report one.
    #[serde(default)]
    pub duration_ms: u64,
}

impl TrackInfo {
    pub fn primary_artist(&self) -> Option<&ArtistRef> {
        self.artists.first()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayCounters {
    #[serde(default)]
    pub play_count: u64,
    #[serde(default)]
    pub total_minutes: f64,
    pub first_played_at: i64,
    pub last_played_at: i64,
}

impl PlayCounters {
    pub fn starting_at(at: i64) -> Self {
        Self {
            play_count: 0,
            total_minutes: 0.0,
            first_played_at: at,
            last_played_at: at,
        }
    }

    pub fn credit(&mut self, minutes: f64, at: i64) {
        self.play_count = self.play_count.saturating_add(1);
        self.total_minutes += sanitize_minutes(minutes);
        self.last_played_at = at.max(self.first_played_at);
    }
}

pub(crate) fn sanitize_minutes(minutes: f64) -> f64 {
    if minutes.is_finite() && minutes > 0.0 {
        minutes
    } else {
        0.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackRecord {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(flatten)]
    pub counters: PlayCounters,
    #[serde(default)]
    pub duration_ms: u64,
}

/// Artists and albums carry the same shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRecord {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(flatten)]
    pub counters: PlayCounters,
}

pub type ArtistRecord = EntityRecord;
pub type AlbumRecord = EntityRecord;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyBucket {
    pub date: String,
    #[serde(default)]
    pub track_count: u64,
    #[serde(default)]
    pub total_minutes: f64,
    #[serde(default)]
    pub unique_track_ids: BTreeSet<String>,
    #[serde(default)]
    pub unique_artist_ids: BTreeSet<String>,
}

impl DailyBucket {
    pub fn new(date: impl Into<String>) -> Self {
        Self {
            date: date.into(),
            track_count: 0,
            total_minutes: 0.0,
            unique_track_ids: BTreeSet::new(),
            unique_artist_ids: BTreeSet::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionLogEntry {
    pub timestamp: i64,
    pub track_id: String,
    #[serde(default)]
    pub track_name: String,
    #[serde(default = "unknown_artist")]
    pub primary_artist_name: String,
    #[serde(default)]
    pub minutes_listened: f64,
    pub date: String,
}

fn unknown_artist() -> String {
    UNKNOWN_ARTIST.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    #[serde(default = "current_schema_version")]
    pub schema_version: u32,
    pub created_at: i64,
    pub last_updated_at: i64,
    #[serde(default)]
    pub total_playtime_minutes: f64,
    #[serde(default)]
    pub total_track_plays: u64,
    #[serde(default)]
    pub migration_completed: bool,
}

fn current_schema_version() -> u32 {
    SCHEMA_VERSION
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateState {
    #[serde(default)]
    pub tracks: HashMap<String, TrackRecord>,
    #[serde(default)]
    pub artists: HashMap<String, ArtistRecord>,
    #[serde(default)]
    pub albums: HashMap<String, AlbumRecord>,
    #[serde(default)]
    pub sessions: VecDeque<SessionLogEntry>,
    #[serde(default)]
    pub daily_stats: BTreeMap<String, DailyBucket>,
    pub metadata: Metadata,
}

impl AggregateState {
    pub fn new(now: i64) -> Self {
        Self {
            tracks: HashMap::new(),
            artists: HashMap::new(),
            albums: HashMap::new(),
            sessions: VecDeque::new(),
            daily_stats: BTreeMap::new(),
            metadata: Metadata {
                schema_version: SCHEMA_VERSION,
                created_at: now,
                last_updated_at: now,
                total_playtime_minutes: 0.0,
                total_track_plays: 0,
                migration_completed: false,
            },
        }
    }

    /// Empty state after a user reset. Nothing is left to migrate from.
    pub fn cleared(now: i64) -> Self {
        let mut state = Self::new(now);
        state.metadata.migration_completed = true;
        state
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
            && self.artists.is_empty()
            && self.albums.is_empty()
            && self.sessions.is_empty()
            && self.daily_stats.is_empty()
    }
}
