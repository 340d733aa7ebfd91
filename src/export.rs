use crate::clock;
use crate::model::AggregateState;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const EXPORT_FILE_PREFIX: &str = "spinstats-export-";

/// A full, self-describing snapshot meant to leave the application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportDocument {
    pub export_date: String,
    pub version: String,
    pub schema_version: u32,
    pub stats: AggregateState,
}

impl ExportDocument {
    pub fn new(state: &AggregateState, now: i64) -> Self {
        Self {
            export_date: clock::iso_timestamp(now),
            version: env!("CARGO_PKG_VERSION").to_string(),
            schema_version: state.metadata.schema_version,
            stats: state.clone(),
        }
    }

    pub fn to_pretty_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("failed to encode export document")
    }
}

pub fn export_file_name(now: i64) -> String {
    format!("{EXPORT_FILE_PREFIX}{}.json", clock::date_key(now))
}

/// Write a human-readable export into `dir` and return the file path.
pub fn export_to_dir(state: &AggregateState, dir: &Path, now: i64) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    let path = dir.join(export_file_name(now));
    let json = ExportDocument::new(state, now).to_pretty_json()?;
    fs::write(&path, json).with_context(|| format!("failed to write {}", path.display()))?;
    tracing::info!(path = %path.display(), "exported stats");
    Ok(path)
}
