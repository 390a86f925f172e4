//! Per-device bounded request history, used by the rate limiter to tell
//! `burst` activity from steady-state `period` activity.
//!
//! Persisted as JSON (not the original pickle format — see DESIGN.md) via
//! write-temp-then-rename so a crash mid-write never corrupts the file on
//! disk.

use std::{
    collections::{HashMap, VecDeque},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    pub username: String,
    pub timestamp: i64,
}

/// Each device's log is a deque capped at `capacity`; `log` pushes to the
/// back and evicts from the front once full, `rotate` moves the front
/// element to the back without evicting (used to walk the history without
/// losing it, mirroring the original's `deque.rotate(-1)`).
pub struct RequestLog {
    path: PathBuf,
    capacity: usize,
    by_device: HashMap<String, VecDeque<Entry>>,
}

#[derive(Default, Serialize, Deserialize)]
struct OnDisk {
    by_device: HashMap<String, Vec<Entry>>,
}

impl RequestLog {
    pub fn load(path: &Path, capacity: usize) -> Self {
        let by_device = match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<OnDisk>(&contents) {
                Ok(data) => data
                    .by_device
                    .into_iter()
                    .map(|(device, entries)| (device, VecDeque::from(entries)))
                    .collect(),
                Err(e) => {
                    warn!(path = %path.display(), err = %e, "request log is corrupt, starting empty");
                    HashMap::new()
                }
            },
            Err(_) => {
                warn!(path = %path.display(), "no request log on disk yet, starting empty");
                HashMap::new()
            }
        };

        Self {
            path: path.to_path_buf(),
            capacity,
            by_device,
        }
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let data = OnDisk {
            by_device: self
                .by_device
                .iter()
                .map(|(device, entries)| (device.clone(), entries.iter().cloned().collect()))
                .collect(),
        };
        let serialized = serde_json::to_vec_pretty(&data)?;

        let tmp_path = self.path.with_extension("json.tmp");
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&tmp_path, serialized)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    /// Appends `username` for `device`, evicting the oldest entry once the
    /// log for that device reaches `capacity`.
    pub fn log(&mut self, device: &str, username: &str, timestamp: i64) {
        let entries = self.by_device.entry(device.to_string()).or_default();
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(Entry {
            username: username.to_string(),
            timestamp,
        });
    }

    /// Moves the oldest entry for `device` to the back of its log, in
    /// place, and returns it. A no-op returning `None` on an empty log.
    pub fn rotate(&mut self, device: &str) -> Option<Entry> {
        let entries = self.by_device.get_mut(device)?;
        let front = entries.pop_front()?;
        entries.push_back(front.clone());
        Some(front)
    }

    pub fn head(&self, device: &str) -> Option<&Entry> {
        self.by_device.get(device).and_then(|entries| entries.front())
    }

    pub fn is_full(&self, device: &str) -> bool {
        self.by_device
            .get(device)
            .map(|entries| entries.len() >= self.capacity)
            .unwrap_or(false)
    }

    pub fn len_for(&self, device: &str) -> usize {
        self.by_device.get(device).map(VecDeque::len).unwrap_or(0)
    }

    pub fn usernames_of(&self, device: &str) -> Vec<String> {
        self.by_device
            .get(device)
            .map(|entries| entries.iter().map(|e| e.username.clone()).collect())
            .unwrap_or_default()
    }

    /// Snapshot of a device's full entry history, oldest first.
    pub fn entries_of(&self, device: &str) -> Vec<Entry> {
        self.by_device
            .get(device)
            .map(|entries| entries.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_evicts_oldest_once_full() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = RequestLog::load(&dir.path().join("request_log.json"), 2);

        log.log("device-a", "alice", 1);
        log.log("device-a", "bob", 2);
        log.log("device-a", "carol", 3);

        assert_eq!(log.usernames_of("device-a"), vec!["bob", "carol"]);
    }

    #[test]
    fn rotate_cycles_without_losing_entries() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = RequestLog::load(&dir.path().join("request_log.json"), 3);
        log.log("device-a", "alice", 1);
        log.log("device-a", "bob", 2);

        let rotated = log.rotate("device-a").unwrap();
        assert_eq!(rotated.username, "alice");
        assert_eq!(log.usernames_of("device-a"), vec!["bob", "alice"]);
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("request_log.json");
        let mut log = RequestLog::load(&path, 3);
        log.log("device-a", "alice", 100);
        log.save().unwrap();

        let reloaded = RequestLog::load(&path, 3);
        assert_eq!(reloaded.usernames_of("device-a"), vec!["alice"]);
    }

    #[test]
    fn missing_file_starts_empty_without_error() {
        let dir = tempfile::tempdir().unwrap();
        let log = RequestLog::load(&dir.path().join("nope.json"), 3);
        assert!(log.usernames_of("device-a").is_empty());
    }
}
