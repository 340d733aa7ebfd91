//! Loading and saving the aggregate state.
//!
//! Two interchangeable backends implement [`StatsBackend`]: a consolidated
//! document with dated backups and a one-time import from the per-entity
//! layout, and the per-entity layout itself.

mod document;
mod entity;
pub mod schema;

pub use document::{BACKUP_PREFIX, BACKUP_RETENTION_DAYS, DATA_KEY, DocumentBackend, EXPORT_KEY};
pub use entity::{EntityBackend, EntityRow, LegacyCollections};

use crate::model::AggregateState;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    AlreadyCompleted,
    NothingToMigrate,
    Migrated {
        tracks: usize,
        artists: usize,
        albums: usize,
    },
    Failed(String),
}

pub trait StatsBackend {
    fn name(&self) -> &'static str;

    /// Read the persisted state, or a fresh one when nothing is stored yet.
    fn load(&mut self, now: i64) -> Result<AggregateState>;

    fn save(&mut self, state: &mut AggregateState, now: i64) -> Result<()>;

    /// Reset `state` to empty, then persist the reset. `state` is reset even
    /// when the write fails.
    fn clear(&mut self, state: &mut AggregateState, now: i64) -> Result<()>;

    /// Import records from the legacy layout at most once.
    fn migrate(&mut self, state: &mut AggregateState, now: i64) -> MigrationOutcome;
}

impl<B: StatsBackend + ?Sized> StatsBackend for Box<B> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn load(&mut self, now: i64) -> Result<AggregateState> {
        (**self).load(now)
    }

    fn save(&mut self, state: &mut AggregateState, now: i64) -> Result<()> {
        (**self).save(state, now)
    }

    fn clear(&mut self, state: &mut AggregateState, now: i64) -> Result<()> {
        (**self).clear(state, now)
    }

    fn migrate(&mut self, state: &mut AggregateState, now: i64) -> MigrationOutcome {
        (**self).migrate(state, now)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Document,
    Entity,
}

impl BackendKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Entity => "entity",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "document" | "doc" => Some(Self::Document),
            "entity" | "entities" => Some(Self::Entity),
            _ => None,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
