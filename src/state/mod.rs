//! Checkpoint state: per (stream, location) bookmarks plus the currently-syncing marker.
//!
//! Every mutation is flushed immediately, both as a `STATE` message on the output stream
//! and, when a state file is configured, as an atomic rewrite of that file.

use crate::messages::{EmitError, Emitter};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("Failed to read state file '{0}'")]
    Read(PathBuf, #[source] io::Error),

    #[error("Failed to parse state file '{0}'")]
    Parse(PathBuf, #[source] serde_json::Error),

    #[error("Failed to write state file '{0}'")]
    Write(PathBuf, #[source] io::Error),

    #[error(transparent)]
    Emit(#[from] EmitError),
}

/// The persisted sync state.
///
/// Serializes as `{"bookmarks": {stream: {location: value}}, "currently_syncing": stream}`,
/// with `currently_syncing` omitted when no stream is in flight.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    #[serde(default)]
    pub bookmarks: BTreeMap<String, BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currently_syncing: Option<String>,
}

impl SyncState {
    pub fn bookmark(&self, stream: &str, location: &str) -> Option<&str> {
        self.bookmarks
            .get(stream)
            .and_then(|locations| locations.get(location))
            .map(String::as_str)
    }
}

/// Owns the [`SyncState`] for a run and writes it through on every change.
///
/// Each mutation emits a `STATE` line through the given [`Emitter`] and, for a store
/// created with [`StateStore::load`], rewrites the state file atomically.
///
/// # Examples
///
/// ```
/// use darksky_tap::{Emitter, StateStore};
///
/// let mut store = StateStore::default();
/// let mut emitter = Emitter::new(Vec::new());
///
/// assert_eq!(store.get_bookmark("forecast", "38.8,-105.0", "2020-01-01"), "2020-01-01");
/// store
///     .write_bookmark(&mut emitter, "forecast", "38.8,-105.0", "2020-01-03T00:00:00Z")
///     .unwrap();
/// assert_eq!(
///     store.get_bookmark("forecast", "38.8,-105.0", "2020-01-01"),
///     "2020-01-03T00:00:00Z"
/// );
/// ```
#[derive(Debug, Default)]
pub struct StateStore {
    state: SyncState,
    path: Option<PathBuf>,
}

impl StateStore {
    /// A store that only emits `STATE` messages and never touches the filesystem.
    pub fn in_memory(state: SyncState) -> Self {
        Self { state, path: None }
    }

    /// Loads the state from `path`, which also becomes the persistence target.
    ///
    /// # Arguments
    ///
    /// * `path` - State file from a previous run. A missing or blank file starts from an
    ///            empty state.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Read`] if the file exists but cannot be read and
    /// [`StateError::Parse`] if it is not a valid state document.
    pub fn load(path: &Path) -> Result<Self, StateError> {
        let state = match std::fs::read(path) {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => SyncState::default(),
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| StateError::Parse(path.to_path_buf(), e))?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!("No state file at {}, starting fresh", path.display());
                SyncState::default()
            }
            Err(e) => return Err(StateError::Read(path.to_path_buf(), e)),
        };
        Ok(Self {
            state,
            path: Some(path.to_path_buf()),
        })
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    pub fn into_state(self) -> SyncState {
        self.state
    }

    /// Returns the bookmark for (`stream`, `location`), or `default` when any level is missing.
    pub fn get_bookmark(&self, stream: &str, location: &str, default: &str) -> String {
        self.state
            .bookmark(stream, location)
            .unwrap_or(default)
            .to_string()
    }

    /// Sets the bookmark for (`stream`, `location`) and persists the whole state.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Write`] if the state file cannot be replaced and
    /// [`StateError::Emit`] if the `STATE` line cannot be written.
    pub fn write_bookmark<W: Write>(
        &mut self,
        emitter: &mut Emitter<W>,
        stream: &str,
        location: &str,
        value: &str,
    ) -> Result<(), StateError> {
        self.state
            .bookmarks
            .entry(stream.to_string())
            .or_default()
            .insert(location.to_string(), value.to_string());
        info!(
            "Write state for Stream: {}, Location: {}, value: {}",
            stream, location, value
        );
        self.persist(emitter)
    }

    pub fn currently_syncing(&self) -> Option<&str> {
        self.state.currently_syncing.as_deref()
    }

    /// Marks `stream` as in flight, or removes the marker entirely when `None`.
    pub fn set_currently_syncing<W: Write>(
        &mut self,
        emitter: &mut Emitter<W>,
        stream: Option<&str>,
    ) -> Result<(), StateError> {
        self.state.currently_syncing = stream.map(str::to_string);
        self.persist(emitter)
    }

    fn persist<W: Write>(&self, emitter: &mut Emitter<W>) -> Result<(), StateError> {
        if let Some(path) = &self.path {
            write_atomically(path, &self.state)?;
        }
        emitter.write_state(&self.state)?;
        Ok(())
    }
}

// Sibling temp file, then rename over `path`.
fn write_atomically(path: &Path, state: &SyncState) -> Result<(), StateError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let to_err = |e: io::Error| StateError::Write(path.to_path_buf(), e);

    let mut file = NamedTempFile::new_in(dir).map_err(to_err)?;
    serde_json::to_writer_pretty(&mut file, state).map_err(|e| to_err(e.into()))?;
    file.write_all(b"\n").map_err(to_err)?;
    file.as_file().sync_all().map_err(to_err)?;
    file.persist(path).map_err(|e| to_err(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use tempfile::tempdir;

    fn emitted(emitter: Emitter<Vec<u8>>) -> Vec<Value> {
        String::from_utf8(emitter.into_inner())
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn test_get_bookmark_defaults() {
        let store = StateStore::default();
        assert_eq!(store.get_bookmark("forecast", "1,2", "2020-01-01"), "2020-01-01");

        let mut state = SyncState::default();
        state
            .bookmarks
            .entry("forecast".into())
            .or_default()
            .insert("1,2".into(), "2020-02-01T00:00:00Z".into());
        let store = StateStore::in_memory(state);
        assert_eq!(
            store.get_bookmark("forecast", "1,2", "2020-01-01"),
            "2020-02-01T00:00:00Z"
        );
        assert_eq!(store.get_bookmark("forecast", "3,4", "2020-01-01"), "2020-01-01");
        assert_eq!(store.get_bookmark("other", "1,2", "2020-01-01"), "2020-01-01");
    }

    #[test]
    fn test_write_bookmark_emits_state() {
        let mut store = StateStore::default();
        let mut emitter = Emitter::new(Vec::new());

        store
            .write_bookmark(&mut emitter, "forecast", "38.8,-105.0", "2020-01-03T00:00:00Z")
            .unwrap();
        store
            .write_bookmark(&mut emitter, "forecast", "38.8,-105.0", "2020-01-03T00:00:00Z")
            .unwrap();

        let messages = emitted(emitter);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0], messages[1]);
        assert_eq!(
            messages[1],
            json!({
                "type": "STATE",
                "value": {"bookmarks": {"forecast": {"38.8,-105.0": "2020-01-03T00:00:00Z"}}}
            })
        );
    }

    #[test]
    fn test_currently_syncing_is_removed_when_cleared() {
        let mut store = StateStore::default();
        let mut emitter = Emitter::new(Vec::new());

        store
            .set_currently_syncing(&mut emitter, Some("forecast"))
            .unwrap();
        assert_eq!(store.currently_syncing(), Some("forecast"));
        store.set_currently_syncing(&mut emitter, None).unwrap();
        assert_eq!(store.currently_syncing(), None);

        let messages = emitted(emitter);
        assert_eq!(messages[0]["value"]["currently_syncing"], json!("forecast"));
        assert!(messages[1]["value"].get("currently_syncing").is_none());
    }

    #[test]
    fn test_state_file_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");

        let mut store = StateStore::load(&path).unwrap();
        assert_eq!(store.state(), &SyncState::default());

        let mut emitter = Emitter::new(Vec::new());
        store
            .write_bookmark(&mut emitter, "forecast", "38.8,-105.0", "2020-01-03T00:00:00Z")
            .unwrap();
        store
            .write_bookmark(&mut emitter, "forecast", "40.7,-74.0", "2020-01-02T00:00:00Z")
            .unwrap();
        store
            .set_currently_syncing(&mut emitter, Some("forecast"))
            .unwrap();

        let reloaded = StateStore::load(&path).unwrap();
        assert_eq!(reloaded.state(), store.state());
        assert_eq!(
            reloaded.get_bookmark("forecast", "40.7,-74.0", "x"),
            "2020-01-02T00:00:00Z"
        );
        assert_eq!(reloaded.currently_syncing(), Some("forecast"));
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(StateStore::load(&path), Err(StateError::Parse(..))));
    }

    #[test]
    fn test_deserialize_singer_state() {
        let state: SyncState = serde_json::from_value(json!({
            "currently_syncing": "forecast",
            "bookmarks": {"forecast": {"1,2": "2020-01-05T00:00:00Z"}}
        }))
        .unwrap();
        assert_eq!(state.bookmark("forecast", "1,2"), Some("2020-01-05T00:00:00Z"));
        assert_eq!(state.currently_syncing.as_deref(), Some("forecast"));
    }
}
