//! Session and reference persistence
//!
//! JSON files under the data directory (default `coaching_data/`):
//!
//! - `sessions_index.json` — list of session index entries
//! - `<session_id>.json` — a full `SessionState`
//! - `<track>_<car>_references.json` — reference laps keyed by type
//! - `reference_data/corner_references.json` — all corner references
//!
//! Writes are write-through but off the hot path: a failed write is logged,
//! the state stays in memory, and the engine retries at session close.

use orc_core::error::CoachError;
use orc_core::model::{CornerReference, ReferenceKind, ReferenceLap, SessionState};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// One row of `sessions_index.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionIndexEntry {
    pub session_id: String,
    pub track_name: String,
    pub car_name: String,
    pub start_time: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_lap_time: Option<f64>,
    #[serde(default)]
    pub baseline_established: bool,
}

/// Learned values restored when a session starts on a known (track, car).
#[derive(Debug, Clone, Default)]
pub struct TrackBaseline {
    pub baseline_established: bool,
    pub best_lap_time: Option<f64>,
    pub consistency_threshold: f64,
    pub shift_bands: BTreeMap<i8, (f64, f64)>,
    pub corner_tables: BTreeMap<String, orc_core::model::CornerStats>,
}

pub struct SessionStore {
    data_dir: PathBuf,
}

impl SessionStore {
    pub fn new(data_dir: PathBuf) -> Result<Self, CoachError> {
        std::fs::create_dir_all(data_dir.join("reference_data"))?;
        Ok(Self { data_dir })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    // === Sessions ===

    /// Persist a session and update the index. Lap telemetry snapshots are
    /// stripped; everything learned from them is already in the aggregates.
    pub fn save_session(&self, session: &SessionState) -> Result<(), CoachError> {
        let mut trimmed = session.clone();
        for lap in &mut trimmed.laps {
            lap.samples.clear();
        }

        let path = self.session_path(&trimmed.session_id);
        write_json(&path, &trimmed)?;
        self.update_index(&trimmed)?;
        info!(session = %trimmed.session_id, "session persisted");
        Ok(())
    }

    pub fn load_session(&self, session_id: &str) -> Result<SessionState, CoachError> {
        read_json(&self.session_path(session_id))
    }

    pub fn load_index(&self) -> Vec<SessionIndexEntry> {
        read_json(&self.data_dir.join("sessions_index.json")).unwrap_or_default()
    }

    fn update_index(&self, session: &SessionState) -> Result<(), CoachError> {
        let mut index = self.load_index();
        let entry = SessionIndexEntry {
            session_id: session.session_id.clone(),
            track_name: session.track_name.clone(),
            car_name: session.car_name.clone(),
            start_time: session.start_time,
            end_time: session.end_time,
            best_lap_time: session.best_lap_time_s,
            baseline_established: session.baseline_established,
        };
        match index.iter_mut().find(|e| e.session_id == entry.session_id) {
            Some(existing) => *existing = entry,
            None => index.push(entry),
        }
        write_json(&self.data_dir.join("sessions_index.json"), &index)
    }

    /// Most recent prior sessions for a (track, car) pair, newest first.
    pub fn find_previous_sessions(
        &self,
        track_name: &str,
        car_name: &str,
        limit: usize,
    ) -> Vec<SessionIndexEntry> {
        let mut entries: Vec<SessionIndexEntry> = self
            .load_index()
            .into_iter()
            .filter(|e| e.track_name == track_name && e.car_name == car_name)
            .collect();
        entries.sort_by(|a, b| b.start_time.total_cmp(&a.start_time));
        entries.truncate(limit);
        entries
    }

    /// Learned baseline for a (track, car) pair, read-through from the most
    /// recent session that established one.
    pub fn get_track_baseline(&self, track_name: &str, car_name: &str) -> Option<TrackBaseline> {
        let previous = self.find_previous_sessions(track_name, car_name, 10);
        let best_lap_time = previous
            .iter()
            .filter_map(|e| e.best_lap_time)
            .fold(None::<f64>, |acc, t| Some(acc.map_or(t, |a| a.min(t))));

        let established = previous.iter().find(|e| e.baseline_established)?;
        let session = self.load_session(&established.session_id).ok()?;
        Some(TrackBaseline {
            baseline_established: true,
            best_lap_time,
            consistency_threshold: session.consistency_threshold,
            shift_bands: session.shift_bands,
            corner_tables: session.corner_tables,
        })
    }

    /// Drop the learned baseline for a pair: reference files are removed
    /// and index entries demoted. Sessions themselves are kept.
    pub fn reset_baseline(&self, track_name: &str, car_name: &str) -> Result<(), CoachError> {
        let mut index = self.load_index();
        for entry in index
            .iter_mut()
            .filter(|e| e.track_name == track_name && e.car_name == car_name)
        {
            entry.baseline_established = false;
        }
        write_json(&self.data_dir.join("sessions_index.json"), &index)?;

        let refs = self.references_path(track_name, car_name);
        if refs.exists() {
            std::fs::remove_file(&refs)?;
        }
        info!(track = track_name, car = car_name, "baseline reset");
        Ok(())
    }

    // === Reference laps ===

    pub fn save_references(
        &self,
        track_name: &str,
        car_name: &str,
        references: &BTreeMap<ReferenceKind, ReferenceLap>,
    ) -> Result<(), CoachError> {
        // Keyed by the type's string form on disk.
        let map: BTreeMap<&str, &ReferenceLap> =
            references.iter().map(|(k, v)| (k.as_str(), v)).collect();
        write_json(&self.references_path(track_name, car_name), &map)
    }

    pub fn load_references(
        &self,
        track_name: &str,
        car_name: &str,
    ) -> BTreeMap<ReferenceKind, ReferenceLap> {
        let path = self.references_path(track_name, car_name);
        let raw: BTreeMap<String, ReferenceLap> = match read_json(&path) {
            Ok(map) => map,
            Err(_) => return BTreeMap::new(),
        };
        raw.into_values().map(|lap| (lap.kind, lap)).collect()
    }

    // === Corner references ===

    pub fn save_corner_references(&self, corners: &[CornerReference]) -> Result<(), CoachError> {
        #[derive(Serialize)]
        struct File<'a> {
            corners: &'a [CornerReference],
        }
        write_json(
            &self.data_dir.join("reference_data").join("corner_references.json"),
            &File { corners },
        )
    }

    pub fn load_corner_references(&self) -> Vec<CornerReference> {
        #[derive(Deserialize)]
        struct File {
            #[serde(default)]
            corners: Vec<CornerReference>,
        }
        read_json::<File>(&self.data_dir.join("reference_data").join("corner_references.json"))
            .map(|f| f.corners)
            .unwrap_or_default()
    }

    // === Paths ===

    fn session_path(&self, session_id: &str) -> PathBuf {
        self.data_dir.join(format!("{}.json", sanitize(session_id)))
    }

    fn references_path(&self, track_name: &str, car_name: &str) -> PathBuf {
        self.data_dir
            .join(format!("{}_{}_references.json", sanitize(track_name), sanitize(car_name)))
    }
}

/// File-name-safe form of a track/car/session identifier.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
        .collect()
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), CoachError> {
    let json = serde_json::to_string_pretty(value)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    // Write through a temp file so a crash cannot leave a torn JSON file.
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, CoachError> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

/// Log-and-continue wrapper for write-through callers on the hot path.
pub fn persist_or_warn(result: Result<(), CoachError>, what: &str) {
    if let Err(e) = result {
        warn!(error = %e, what, "persistence write failed; state retained in memory");
    }
}
