use super::{MigrationOutcome, StatsBackend};
use crate::model::{
    AggregateState, DailyBucket, EntityRecord, Metadata, PlayCounters, SessionLogEntry,
    TrackRecord,
};
use crate::store::KeyValueStore;
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};

pub(crate) const TRACKS_KEY: &str = "spinstats_db_tracks";
pub(crate) const ARTISTS_KEY: &str = "spinstats_db_artists";
pub(crate) const ALBUMS_KEY: &str = "spinstats_db_albums";
const DAILY_KEY: &str = "spinstats_db_daily";
const SESSIONS_KEY: &str = "spinstats_db_sessions";
const META_KEY: &str = "spinstats_db_meta";

/// One stored artist, album or track row. Every counter is optional so rows
/// written by older releases still load.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRow {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub plays: Option<u64>,
    #[serde(default)]
    pub minutes: Option<f64>,
    #[serde(default)]
    pub first_played: Option<i64>,
    #[serde(default)]
    pub last_played: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
}

impl EntityRow {
    pub fn counters(&self, now: i64) -> PlayCounters {
        let last_played_at = self.last_played.unwrap_or(now);
        PlayCounters {
            play_count: self.plays.unwrap_or(0),
            total_minutes: self
                .minutes
                .filter(|minutes| minutes.is_finite() && *minutes > 0.0)
                .unwrap_or(0.0),
            first_played_at: self.first_played.unwrap_or(last_played_at).min(last_played_at),
            last_played_at,
        }
    }

    pub fn into_track(self, now: i64) -> TrackRecord {
        TrackRecord {
            counters: self.counters(now),
            duration_ms: self.duration.unwrap_or(0),
            name: self.name.unwrap_or_default(),
            id: self.id,
        }
    }

    pub fn into_entity(self, now: i64) -> EntityRecord {
        EntityRecord {
            counters: self.counters(now),
            name: self.name.unwrap_or_default(),
            id: self.id,
        }
    }

    fn from_counters(id: &str, name: &str, counters: &PlayCounters) -> Self {
        Self {
            id: id.to_string(),
            name: Some(name.to_string()),
            plays: Some(counters.play_count),
            minutes: Some(counters.total_minutes),
            first_played: Some(counters.first_played_at),
            last_played: Some(counters.last_played_at),
            duration: None,
        }
    }

    pub fn from_track(record: &TrackRecord) -> Self {
        Self {
            duration: Some(record.duration_ms).filter(|duration| *duration > 0),
            ..Self::from_counters(&record.id, &record.name, &record.counters)
        }
    }

    pub fn from_entity(record: &EntityRecord) -> Self {
        Self::from_counters(&record.id, &record.name, &record.counters)
    }
}

/// Track, artist and album rows read from the per-entity layout.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LegacyCollections {
    pub tracks: Vec<EntityRow>,
    pub artists: Vec<EntityRow>,
    pub albums: Vec<EntityRow>,
}

impl LegacyCollections {
    /// `None` when none of the collections exist in `store`.
    pub fn read<S: KeyValueStore + ?Sized>(store: &S) -> Result<Option<Self>> {
        let tracks = read_rows(store, TRACKS_KEY)?;
        let artists = read_rows(store, ARTISTS_KEY)?;
        let albums = read_rows(store, ALBUMS_KEY)?;
        if tracks.is_none() && artists.is_none() && albums.is_none() {
            return Ok(None);
        }
        Ok(Some(Self {
            tracks: tracks.unwrap_or_default(),
            artists: artists.unwrap_or_default(),
            albums: albums.unwrap_or_default(),
        }))
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty() && self.artists.is_empty() && self.albums.is_empty()
    }
}

/// Collections are stored as `id -> row` objects; plain arrays are accepted too.
/// Rows that do not decode are skipped.
fn read_rows<S: KeyValueStore + ?Sized>(store: &S, key: &str) -> Result<Option<Vec<EntityRow>>> {
    let Some(raw) = store
        .get(key)
        .with_context(|| format!("failed to read {key}"))?
    else {
        return Ok(None);
    };
    let value: Value =
        serde_json::from_str(&raw).with_context(|| format!("failed to parse {key}"))?;
    let items: Vec<Value> = match value {
        Value::Object(map) => map
            .into_iter()
            .map(|(id, mut row)| {
                if let Some(fields) = row.as_object_mut() {
                    fields.entry("id").or_insert(Value::String(id));
                }
                row
            })
            .collect(),
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        _ => anyhow::bail!("{key} is neither an object nor an array"),
    };

    let mut rows = Vec::with_capacity(items.len());
    for item in items {
        match serde_json::from_value::<EntityRow>(item) {
            Ok(row) if !row.id.is_empty() => rows.push(row),
            Ok(_) => {}
            Err(err) => tracing::warn!(key, error = %err, "skipping malformed row"),
        }
    }
    Ok(Some(rows))
}

fn read_json<S: KeyValueStore, T: DeserializeOwned>(store: &S, key: &str) -> Result<Option<T>> {
    let Some(raw) = store
        .get(key)
        .with_context(|| format!("failed to read {key}"))?
    else {
        return Ok(None);
    };
    let value = serde_json::from_str(&raw).with_context(|| format!("failed to parse {key}"))?;
    Ok(Some(value))
}

fn write_json<S: KeyValueStore, T: Serialize>(store: &mut S, key: &str, value: &T) -> Result<()> {
    let json = serde_json::to_string(value).with_context(|| format!("failed to encode {key}"))?;
    store
        .set(key, &json)
        .with_context(|| format!("failed to write {key}"))
}

/// Keeps each record type in its own collection. There is no consolidated
/// document, no backup rotation and nothing to migrate from.
#[derive(Debug)]
pub struct EntityBackend<S> {
    store: S,
}

impl<S: KeyValueStore> EntityBackend<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_inner(self) -> S {
        self.store
    }
}

impl<S: KeyValueStore> StatsBackend for EntityBackend<S> {
    fn name(&self) -> &'static str {
        "entity"
    }

    fn load(&mut self, now: i64) -> Result<AggregateState> {
        let mut state = AggregateState::new(now);
        state.metadata.migration_completed = true;

        let Some(collections) = LegacyCollections::read(&self.store)? else {
            return Ok(state);
        };
        state.tracks = collections
            .tracks
            .into_iter()
            .map(|row| (row.id.clone(), row.into_track(now)))
            .collect::<HashMap<_, _>>();
        state.artists = collections
            .artists
            .into_iter()
            .map(|row| (row.id.clone(), row.into_entity(now)))
            .collect();
        state.albums = collections
            .albums
            .into_iter()
            .map(|row| (row.id.clone(), row.into_entity(now)))
            .collect();
        state.daily_stats = read_json::<_, BTreeMap<String, DailyBucket>>(&self.store, DAILY_KEY)?
            .unwrap_or_default();
        state.sessions = read_json::<_, VecDeque<SessionLogEntry>>(&self.store, SESSIONS_KEY)?
            .unwrap_or_default();
        if let Some(metadata) = read_json::<_, Metadata>(&self.store, META_KEY)? {
            state.metadata = metadata;
        }

        state.metadata.migration_completed = true;
        state.metadata.last_updated_at = now;
        state.recount_totals();
        tracing::info!(
            tracks = state.tracks.len(),
            artists = state.artists.len(),
            albums = state.albums.len(),
            "loaded per-entity stats"
        );
        Ok(state)
    }

    fn save(&mut self, state: &mut AggregateState, now: i64) -> Result<()> {
        state.metadata.last_updated_at = now;

        let tracks: BTreeMap<&str, EntityRow> = state
            .tracks
            .values()
            .map(|record| (record.id.as_str(), EntityRow::from_track(record)))
            .collect();
        let artists: BTreeMap<&str, EntityRow> = state
            .artists
            .values()
            .map(|record| (record.id.as_str(), EntityRow::from_entity(record)))
            .collect();
        let albums: BTreeMap<&str, EntityRow> = state
            .albums
            .values()
            .map(|record| (record.id.as_str(), EntityRow::from_entity(record)))
            .collect();

        write_json(&mut self.store, TRACKS_KEY, &tracks)?;
        write_json(&mut self.store, ARTISTS_KEY, &artists)?;
        write_json(&mut self.store, ALBUMS_KEY, &albums)?;
        write_json(&mut self.store, DAILY_KEY, &state.daily_stats)?;
        write_json(&mut self.store, SESSIONS_KEY, &state.sessions)?;
        write_json(&mut self.store, META_KEY, &state.metadata)?;
        Ok(())
    }

    fn clear(&mut self, state: &mut AggregateState, now: i64) -> Result<()> {
        *state = AggregateState::cleared(now);
        self.save(state, now)
    }

    fn migrate(&mut self, state: &mut AggregateState, _now: i64) -> MigrationOutcome {
        state.metadata.migration_completed = true;
        MigrationOutcome::AlreadyCompleted
    }
}
