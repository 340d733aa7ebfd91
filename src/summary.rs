use crate::model::{AggregateState, DailyBucket, PlayCounters, SessionLogEntry};
use std::cmp::Ordering;

pub const DEFAULT_TOP_COUNT: usize = 10;
const DEFAULT_RECENT_COUNT: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummarySort {
    Plays,
    Minutes,
}

impl SummarySort {
    pub fn label(self) -> &'static str {
        match self {
            Self::Plays => "plays",
            Self::Minutes => "minutes",
        }
    }

    pub fn toggle(self) -> Self {
        match self {
            Self::Plays => Self::Minutes,
            Self::Minutes => Self::Plays,
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "plays" | "play" => Some(Self::Plays),
            "minutes" | "listen" | "time" => Some(Self::Minutes),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SummaryQuery {
    pub sort: SummarySort,
    pub top: usize,
    pub recent: usize,
    /// Day to report the bucket for, `YYYY-MM-DD`.
    pub day: Option<String>,
}

impl Default for SummaryQuery {
    fn default() -> Self {
        Self {
            sort: SummarySort::Plays,
            top: DEFAULT_TOP_COUNT,
            recent: DEFAULT_RECENT_COUNT,
            day: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TopItem {
    pub id: String,
    pub name: String,
    pub play_count: u64,
    pub total_minutes: f64,
    pub last_played_at: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatsSummary {
    pub track_count: usize,
    pub artist_count: usize,
    pub album_count: usize,
    pub total_plays: u64,
    pub total_minutes: f64,
    pub total_hours: u64,
    pub top_tracks: Vec<TopItem>,
    pub top_artists: Vec<TopItem>,
    pub top_albums: Vec<TopItem>,
    pub recent: Vec<SessionLogEntry>,
    pub day: Option<DailyBucket>,
}

pub fn summarize(state: &AggregateState, query: &SummaryQuery) -> StatsSummary {
    let total_minutes = state.metadata.total_playtime_minutes;
    StatsSummary {
        track_count: state.tracks.len(),
        artist_count: state.artists.len(),
        album_count: state.albums.len(),
        total_plays: state.metadata.total_track_plays,
        total_minutes,
        total_hours: (total_minutes / 60.0).round().max(0.0) as u64,
        top_tracks: top_items(
            state
                .tracks
                .values()
                .map(|record| (&record.id, &record.name, &record.counters)),
            query,
        ),
        top_artists: top_items(
            state
                .artists
                .values()
                .map(|record| (&record.id, &record.name, &record.counters)),
            query,
        ),
        top_albums: top_items(
            state
                .albums
                .values()
                .map(|record| (&record.id, &record.name, &record.counters)),
            query,
        ),
        recent: state
            .sessions
            .iter()
            .rev()
            .take(query.recent)
            .cloned()
            .collect(),
        day: query
            .day
            .as_ref()
            .and_then(|day| state.daily_stats.get(day))
            .cloned(),
    }
}

fn top_items<'a>(
    records: impl Iterator<Item = (&'a String, &'a String, &'a PlayCounters)>,
    query: &SummaryQuery,
) -> Vec<TopItem> {
    let mut items: Vec<TopItem> = records
        .map(|(id, name, counters)| TopItem {
            id: id.clone(),
            name: name.clone(),
            play_count: counters.play_count,
            total_minutes: counters.total_minutes,
            last_played_at: counters.last_played_at,
        })
        .collect();
    items.sort_by(|a, b| compare_items(a, b, query.sort));
    items.truncate(query.top);
    items
}

fn compare_items(a: &TopItem, b: &TopItem, sort: SummarySort) -> Ordering {
    let by_minutes = b.total_minutes.total_cmp(&a.total_minutes);
    let primary = match sort {
        SummarySort::Plays => b.play_count.cmp(&a.play_count).then(by_minutes),
        SummarySort::Minutes => by_minutes.then(b.play_count.cmp(&a.play_count)),
    };
    primary.then_with(|| {
        a.name
            .to_ascii_lowercase()
            .cmp(&b.name.to_ascii_lowercase())
            .then_with(|| a.id.cmp(&b.id))
    })
}
