use super::entity::LegacyCollections;
use super::{MigrationOutcome, StatsBackend, schema};
use crate::clock;
use crate::export::ExportDocument;
use crate::model::AggregateState;
use crate::store::KeyValueStore;
use anyhow::{Context, Result};
use serde::Serialize;

pub const DATA_KEY: &str = "spinstats_data";
pub const UNREADABLE_KEY: &str = "spinstats_data_unreadable";
pub const BACKUP_PREFIX: &str = "spinstats_backup_";
pub const EXPORT_KEY: &str = "spinstats_export";
pub const BACKUP_RETENTION_DAYS: usize = 7;

#[derive(Serialize)]
struct BackupSnapshot<'a> {
    date: String,
    timestamp: i64,
    data: &'a AggregateState,
}

/// Stores the whole aggregate as one document, with one backup per calendar
/// day and an exportable copy alongside it.
#[derive(Debug)]
pub struct DocumentBackend<S> {
    store: S,
}

impl<S: KeyValueStore> DocumentBackend<S> {
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

    /// Dates of the retained backups, oldest first.
    pub fn backup_dates(&self) -> Result<Vec<String>> {
        let keys = self
            .store
            .keys_with_prefix(BACKUP_PREFIX)
            .context("failed to list backups")?;
        Ok(keys
            .into_iter()
            .filter_map(|key| key.strip_prefix(BACKUP_PREFIX).map(str::to_string))
            .collect())
    }

    fn read_document(&mut self, now: i64) -> Result<AggregateState> {
        let Some(raw) = self
            .store
            .get(DATA_KEY)
            .context("failed to read stats document")?
        else {
            tracing::info!("no stats document found, starting fresh");
            return Ok(AggregateState::new(now));
        };

        match schema::decode_document(&raw) {
            Ok(mut state) => {
                state.metadata.last_updated_at = now;
                tracing::info!(tracks = state.tracks.len(), "loaded stats document");
                Ok(state)
            }
            Err(err) => {
                tracing::error!(error = %format!("{err:#}"), "stats document is unreadable, starting fresh");
                if let Err(err) = self.store.set(UNREADABLE_KEY, &raw) {
                    tracing::warn!(error = %err, "failed to preserve unreadable stats document");
                }
                Ok(AggregateState::new(now))
            }
        }
    }

    fn write_backup(&mut self, state: &AggregateState, now: i64) -> Result<()> {
        let date = clock::date_key(now);
        let key = format!("{BACKUP_PREFIX}{date}");
        let snapshot = BackupSnapshot {
            date,
            timestamp: now,
            data: state,
        };
        let json = serde_json::to_string(&snapshot).context("failed to encode backup")?;
        self.store
            .set(&key, &json)
            .with_context(|| format!("failed to write {key}"))
    }

    fn prune_backups(&mut self) -> Result<()> {
        let keys = self
            .store
            .keys_with_prefix(BACKUP_PREFIX)
            .context("failed to list backups")?;
        if keys.len() <= BACKUP_RETENTION_DAYS {
            return Ok(());
        }
        let stale = keys.len() - BACKUP_RETENTION_DAYS;
        for key in &keys[..stale] {
            self.store
                .remove(key)
                .with_context(|| format!("failed to remove {key}"))?;
            tracing::debug!(key = %key, "pruned stale backup");
        }
        Ok(())
    }

    fn write_export_copy(&mut self, state: &AggregateState, now: i64) -> Result<()> {
        let json = serde_json::to_string(&ExportDocument::new(state, now))
            .context("failed to encode export copy")?;
        self.store
            .set(EXPORT_KEY, &json)
            .context("failed to write export copy")
    }
}

impl<S: KeyValueStore> StatsBackend for DocumentBackend<S> {
    fn name(&self) -> &'static str {
        "document"
    }

    fn load(&mut self, now: i64) -> Result<AggregateState> {
        let mut state = self.read_document(now)?;
        if !state.metadata.migration_completed {
            let outcome = self.migrate(&mut state, now);
            if matches!(outcome, MigrationOutcome::Migrated { .. })
                && let Err(err) = self.save(&mut state, now)
            {
                tracing::error!(error = %format!("{err:#}"), "failed to save migrated stats");
            }
        }
        Ok(state)
    }

    fn save(&mut self, state: &mut AggregateState, now: i64) -> Result<()> {
        state.metadata.last_updated_at = now;
        let document = serde_json::to_string(state).context("failed to encode stats document")?;
        self.store
            .set(DATA_KEY, &document)
            .context("failed to write stats document")?;

        if let Err(err) = self.write_backup(state, now) {
            tracing::warn!(error = %format!("{err:#}"), "failed to write daily backup");
        }
        if let Err(err) = self.prune_backups() {
            tracing::warn!(error = %format!("{err:#}"), "failed to prune old backups");
        }
        if let Err(err) = self.write_export_copy(state, now) {
            tracing::warn!(error = %format!("{err:#}"), "failed to write export copy");
        }
        Ok(())
    }

    fn clear(&mut self, state: &mut AggregateState, now: i64) -> Result<()> {
        *state = AggregateState::cleared(now);
        self.save(state, now)?;
        tracing::info!("cleared all stats");
        Ok(())
    }

    fn migrate(&mut self, state: &mut AggregateState, now: i64) -> MigrationOutcome {
        if state.metadata.migration_completed {
            return MigrationOutcome::AlreadyCompleted;
        }
        state.metadata.migration_completed = true;

        let collections = match LegacyCollections::read(&self.store) {
            Ok(Some(collections)) if !collections.is_empty() => collections,
            Ok(_) => {
                tracing::info!("no per-entity stats to migrate");
                return MigrationOutcome::NothingToMigrate;
            }
            Err(err) => {
                let message = format!("{err:#}");
                tracing::error!(error = %message, "per-entity stats migration failed");
                return MigrationOutcome::Failed(message);
            }
        };

        let (tracks, artists, albums) = (
            collections.tracks.len(),
            collections.artists.len(),
            collections.albums.len(),
        );
        for row in collections.tracks {
            state.tracks.insert(row.id.clone(), row.into_track(now));
        }
        for row in collections.artists {
            state.artists.insert(row.id.clone(), row.into_entity(now));
        }
        for row in collections.albums {
            state.albums.insert(row.id.clone(), row.into_entity(now));
        }
        state.recount_totals();

        tracing::info!(tracks, artists, albums, "migrated per-entity stats");
        MigrationOutcome::Migrated {
            tracks,
            artists,
            albums,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::entity::{ALBUMS_KEY, ARTISTS_KEY, TRACKS_KEY};
    use crate::store::MemoryStore;

    const DAY: i64 = 86_400_000;
    const START: i64 = 1_710_072_000_000;

    #[test]
    fn missing_document_loads_default_and_completes_migration() {
        let mut backend = DocumentBackend::new(MemoryStore::new());
        let state = backend.load(START).expect("load");

        assert!(state.is_empty());
        assert!(state.metadata.migration_completed);
        assert_eq!(state.metadata.created_at, START);
    }

    #[test]
    fn save_writes_document_backup_and_export_copy() {
        let mut backend = DocumentBackend::new(MemoryStore::new());
        let mut state = backend.load(START).expect("load");

        backend.save(&mut state, START + 5).expect("save");

        let store = backend.store();
        assert!(store.get(DATA_KEY).expect("get").is_some());
        assert!(store.get(EXPORT_KEY).expect("get").is_some());
        assert_eq!(
            backend.backup_dates().expect("dates"),
            vec![String::from("2024-03-10")]
        );
        assert_eq!(state.metadata.last_updated_at, START + 5);
    }

    #[test]
    fn keeps_only_last_seven_daily_backups() {
        let mut backend = DocumentBackend::new(MemoryStore::new());
        let mut state = backend.load(START).expect("load");

        for day in 0..10 {
            backend.save(&mut state, START + day * DAY).expect("save");
        }

        let dates = backend.backup_dates().expect("dates");
        assert_eq!(dates.len(), BACKUP_RETENTION_DAYS);
        assert_eq!(dates.first().map(String::as_str), Some("2024-03-13"));
        assert_eq!(dates.last().map(String::as_str), Some("2024-03-19"));
    }

    #[test]
    fn migration_imports_legacy_rows_once() {
        let mut store = MemoryStore::new();
        store
            .set(
                TRACKS_KEY,
                r#"{"t1":{"id":"t1","name":"One","plays":4,"minutes":10.0,"lastPlayed":2000,"firstPlayed":1000}}"#,
            )
            .expect("set");
        store
            .set(ARTISTS_KEY, r#"[{"id":"a1","name":"Artist","plays":4}]"#)
            .expect("set");
        store.set(ALBUMS_KEY, "[]").expect("set");

        let mut backend = DocumentBackend::new(store);
        let mut state = backend.load(START).expect("load");

        let track = &state.tracks["t1"];
        assert_eq!(track.counters.play_count, 4);
        assert_eq!(track.counters.first_played_at, 1_000);
        assert_eq!(state.artists["a1"].counters.last_played_at, START);
        assert_eq!(state.metadata.total_track_plays, 4);
        assert!(state.metadata.migration_completed);

        assert_eq!(
            backend.migrate(&mut state, START + 1),
            MigrationOutcome::AlreadyCompleted
        );
        assert_eq!(state.tracks["t1"].counters.play_count, 4);

        let reloaded = backend.load(START + 2).expect("reload");
        assert_eq!(reloaded.tracks["t1"].counters.play_count, 4);
        assert_eq!(reloaded.metadata.total_track_plays, 4);
    }

    #[test]
    fn broken_legacy_store_still_marks_migration_complete() {
        let mut store = MemoryStore::new();
        store.set(TRACKS_KEY, "{not json").expect("set");
        let mut backend = DocumentBackend::new(store);
        let mut state = AggregateState::new(START);

        let outcome = backend.migrate(&mut state, START);

        assert!(matches!(outcome, MigrationOutcome::Failed(_)));
        assert!(state.metadata.migration_completed);
        assert!(state.tracks.is_empty());
    }

    #[test]
    fn unreadable_document_is_preserved() {
        let mut store = MemoryStore::new();
        store.set(DATA_KEY, "{\"tracks\": 12").expect("set");
        let mut backend = DocumentBackend::new(store);

        let state = backend.load(START).expect("load");

        assert!(state.is_empty());
        assert_eq!(
            backend.store().get(UNREADABLE_KEY).expect("get").as_deref(),
            Some("{\"tracks\": 12")
        );
    }

    #[test]
    fn clear_then_load_yields_empty_migrated_state() {
        let mut backend = DocumentBackend::new(MemoryStore::new());
        let mut state = backend.load(START).expect("load");
        state.record_listen(
            &crate::model::TrackInfo {
                id: String::from("a"),
                name: String::from("A"),
                artists: Vec::new(),
                album: None,
                duration_ms: 180_000,
            },
            1.5,
            START,
        );
        backend.save(&mut state, START).expect("save");

        backend.clear(&mut state, START + 10).expect("clear");
        assert!(state.is_empty());
        let loaded = backend.load(START + 20).expect("load");

        assert!(loaded.is_empty());
        assert!(loaded.metadata.migration_completed);
        assert_eq!(loaded.metadata.total_track_plays, 0);
    }

    #[test]
    fn failed_main_write_reports_error() {
        let mut backend = DocumentBackend::new(MemoryStore::with_quota(16));
        let mut state = AggregateState::cleared(START);

        assert!(backend.save(&mut state, START).is_err());
        assert!(backend.store().get(DATA_KEY).expect("get").is_none());
    }
}
