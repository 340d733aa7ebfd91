//! Versioned decoding of the consolidated document.
//!
//! Older documents are rewritten step by step on the raw JSON value until they
//! reach [`SCHEMA_VERSION`], then deserialized into the typed state.

use crate::model::{AggregateState, SCHEMA_VERSION};
use anyhow::{Context, Result, bail};
use serde_json::{Map, Value};

pub const OLDEST_SUPPORTED_VERSION: u32 = 2;

pub struct SchemaUpgrade {
    pub from: u32,
    pub upgrade: fn(&mut Value) -> Result<()>,
}

pub const SCHEMA_UPGRADES: &[SchemaUpgrade] = &[SchemaUpgrade {
    from: 2,
    upgrade: upgrade_v2_to_v3,
}];

pub fn decode_document(raw: &str) -> Result<AggregateState> {
    let mut value: Value = serde_json::from_str(raw).context("stats document is not valid JSON")?;
    let from = upgrade_value(&mut value)?;
    let state: AggregateState = serde_json::from_value(value)
        .with_context(|| format!("stats document (schema v{from}) does not match v{SCHEMA_VERSION}"))?;
    if from < SCHEMA_VERSION {
        tracing::info!(from, to = SCHEMA_VERSION, "upgraded stats document schema");
    }
    Ok(state)
}

/// Bring `value` up to the current schema. Returns the version it started at.
pub fn upgrade_value(value: &mut Value) -> Result<u32> {
    if !value.is_object() {
        bail!("stats document root must be an object");
    }

    let original = detect_version(value);
    if original > SCHEMA_VERSION {
        bail!("stats document schema v{original} is newer than supported v{SCHEMA_VERSION}");
    }
    if original < OLDEST_SUPPORTED_VERSION {
        bail!("stats document schema v{original} is too old to upgrade");
    }

    let mut version = original;
    while version < SCHEMA_VERSION {
        let Some(step) = SCHEMA_UPGRADES.iter().find(|step| step.from == version) else {
            bail!("no upgrade path from schema v{version}");
        };
        (step.upgrade)(value).with_context(|| format!("failed to upgrade schema v{version}"))?;
        version += 1;
    }

    if let Some(metadata) = value.get_mut("metadata").and_then(Value::as_object_mut) {
        metadata.insert(String::from("schemaVersion"), Value::from(SCHEMA_VERSION));
    }
    Ok(original)
}

/// Documents without `schemaVersion` predate it and carry a semver string.
pub fn detect_version(value: &Value) -> u32 {
    let metadata = value.get("metadata");
    if let Some(version) = metadata
        .and_then(|metadata| metadata.get("schemaVersion"))
        .and_then(Value::as_u64)
    {
        return u32::try_from(version).unwrap_or(u32::MAX);
    }
    metadata
        .and_then(|metadata| metadata.get("version"))
        .and_then(Value::as_str)
        .and_then(|version| version.split('.').next())
        .and_then(|major| major.trim().parse::<u32>().ok())
        .unwrap_or(OLDEST_SUPPORTED_VERSION)
}

fn upgrade_v2_to_v3(doc: &mut Value) -> Result<()> {
    let Some(root) = doc.as_object_mut() else {
        bail!("stats document root must be an object");
    };

    let mut metadata = match root.remove("metadata") {
        Some(Value::Object(metadata)) => metadata,
        _ => Map::new(),
    };
    rename_key(&mut metadata, "created", "createdAt");
    rename_key(&mut metadata, "lastUpdated", "lastUpdatedAt");
    rename_key(&mut metadata, "totalPlaytime", "totalPlaytimeMinutes");
    rename_key(&mut metadata, "totalTracks", "totalTrackPlays");
    metadata.remove("version");
    let fallback = metadata
        .get("lastUpdatedAt")
        .or_else(|| metadata.get("createdAt"))
        .and_then(Value::as_i64)
        .unwrap_or(0);
    metadata
        .entry("createdAt")
        .or_insert_with(|| Value::from(fallback));
    metadata
        .entry("lastUpdatedAt")
        .or_insert_with(|| Value::from(fallback));

    for (collection, is_track) in [("tracks", true), ("artists", false), ("albums", false)] {
        let Some(records) = root.get_mut(collection).and_then(Value::as_object_mut) else {
            root.insert(collection.to_string(), Value::Object(Map::new()));
            continue;
        };
        records.retain(|_, record| record.is_object());
        for (id, record) in records.iter_mut() {
            if let Some(record) = record.as_object_mut() {
                upgrade_v2_record(id, record, is_track, fallback);
            }
        }
    }

    if let Some(days) = root.get_mut("dailyStats").and_then(Value::as_object_mut) {
        days.retain(|_, bucket| bucket.is_object());
        for (date, bucket) in days.iter_mut() {
            if let Some(bucket) = bucket.as_object_mut() {
                bucket
                    .entry("date")
                    .or_insert_with(|| Value::from(date.clone()));
                rename_key(bucket, "tracks", "trackCount");
                rename_key(bucket, "minutes", "totalMinutes");
                rename_key(bucket, "uniqueTracks", "uniqueTrackIds");
                rename_key(bucket, "uniqueArtists", "uniqueArtistIds");
                for key in ["uniqueTrackIds", "uniqueArtistIds"] {
                    let ids = bucket.remove(key).map(string_array).unwrap_or_default();
                    bucket.insert(key.to_string(), Value::Array(ids));
                }
            }
        }
    }

    if let Some(sessions) = root.get_mut("sessions").and_then(Value::as_array_mut) {
        sessions.retain(|entry| entry.get("trackId").is_some_and(Value::is_string));
        for entry in sessions.iter_mut() {
            if let Some(entry) = entry.as_object_mut() {
                rename_key(entry, "artistName", "primaryArtistName");
                rename_key(entry, "minutes", "minutesListened");
                entry
                    .entry("timestamp")
                    .or_insert_with(|| Value::from(fallback));
                entry.entry("date").or_insert_with(|| Value::from(""));
            }
        }
    }

    root.insert(String::from("metadata"), Value::Object(metadata));
    Ok(())
}

fn upgrade_v2_record(id: &str, record: &mut Map<String, Value>, is_track: bool, fallback: i64) {
    record
        .entry("id")
        .or_insert_with(|| Value::from(id.to_string()));
    rename_key(record, "plays", "playCount");
    rename_key(record, "minutes", "totalMinutes");
    rename_key(record, "firstPlayed", "firstPlayedAt");
    rename_key(record, "lastPlayed", "lastPlayedAt");
    if is_track {
        rename_key(record, "duration", "durationMs");
    }
    record.remove("sessions");
    record.remove("topTracks");

    let last = record
        .get("lastPlayedAt")
        .and_then(Value::as_i64)
        .unwrap_or(fallback);
    let first = record
        .get("firstPlayedAt")
        .and_then(Value::as_i64)
        .unwrap_or(last)
        .min(last);
    record.insert(String::from("lastPlayedAt"), Value::from(last));
    record.insert(String::from("firstPlayedAt"), Value::from(first));
}

fn rename_key(object: &mut Map<String, Value>, from: &str, to: &str) {
    if let Some(value) = object.remove(from) {
        object.entry(to).or_insert(value);
    }
}

fn string_array(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.into_iter().filter(Value::is_string).collect(),
        _ => Vec::new(),
    }
}
