//! Management of a directory of drone state files.
//!
//! Works on the raw files written by the agent (`drone_state_<id>.json`).
//! Unreadable files are reported, never fatal.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use dronesim_core::record::{drone_id_from_file_name, PersistedState};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One state file and its parsed record, if it parsed.
#[derive(Debug)]
pub struct StateEntry {
    pub file_name: String,
    pub path: PathBuf,
    pub record: Result<PersistedState, String>,
}

/// Backup file layout written by `export` and read by `import`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Backup {
    pub export_time: DateTime<Utc>,
    pub states: Vec<BackupEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupEntry {
    pub filename: String,
    pub data: Value,
}

/// State file paths in `dir`, sorted by name. A missing directory is empty.
pub fn state_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("failed to read {}", dir.display())),
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let is_state = name
            .to_str()
            .and_then(drone_id_from_file_name)
            .is_some();
        if is_state && entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn read_json(path: &Path) -> Result<Value> {
    let raw = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_slice(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

pub fn list(dir: &Path) -> Result<Vec<StateEntry>> {
    let entries = state_files(dir)?
        .into_iter()
        .map(|path| {
            let record = read_json(&path)
                .and_then(|value| Ok(serde_json::from_value::<PersistedState>(value)?))
                .map_err(|e| format!("{e:#}"));
            StateEntry {
                file_name: file_name(&path),
                path,
                record,
            }
        })
        .collect();
    Ok(entries)
}

/// Delete every state file. Returns the deleted paths.
pub fn clean_all(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut removed = Vec::new();
    for path in state_files(dir)? {
        match fs::remove_file(&path) {
            Ok(()) => removed.push(path),
            Err(e) => tracing::warn!("Failed to delete {}: {}", path.display(), e),
        }
    }
    Ok(removed)
}

/// When a state file was last saved: its `savedAt`, else the file mtime.
pub fn saved_at(path: &Path) -> Result<DateTime<Utc>> {
    let from_record = read_json(path).ok().and_then(|value| {
        value
            .get("savedAt")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc))
    });
    if let Some(saved) = from_record {
        return Ok(saved);
    }
    let modified: SystemTime = fs::metadata(path)
        .and_then(|m| m.modified())
        .with_context(|| format!("failed to stat {}", path.display()))?;
    Ok(modified.into())
}

/// Delete state files saved more than `max_age` before `now`.
pub fn clean_old(dir: &Path, max_age: Duration, now: DateTime<Utc>) -> Result<Vec<PathBuf>> {
    let cutoff = now - max_age;
    let mut removed = Vec::new();
    for path in state_files(dir)? {
        let saved = match saved_at(&path) {
            Ok(saved) => saved,
            Err(e) => {
                tracing::warn!("Skipping {}: {:#}", path.display(), e);
                continue;
            }
        };
        if saved >= cutoff {
            continue;
        }
        match fs::remove_file(&path) {
            Ok(()) => {
                tracing::debug!("Deleted {} (saved {})", path.display(), saved);
                removed.push(path);
            }
            Err(e) => tracing::warn!("Failed to delete {}: {}", path.display(), e),
        }
    }
    Ok(removed)
}

/// Collect every readable state file into a backup.
pub fn export(dir: &Path, at: DateTime<Utc>) -> Result<Backup> {
    let mut states = Vec::new();
    for path in state_files(dir)? {
        match read_json(&path) {
            Ok(data) => states.push(BackupEntry {
                filename: file_name(&path),
                data,
            }),
            Err(e) => tracing::warn!("Skipping {}: {:#}", path.display(), e),
        }
    }
    Ok(Backup {
        export_time: at,
        states,
    })
}

pub fn write_backup(path: &Path, backup: &Backup) -> Result<()> {
    let body = serde_json::to_vec_pretty(backup)?;
    fs::write(path, body).with_context(|| format!("failed to write {}", path.display()))
}

pub fn read_backup(path: &Path) -> Result<Backup> {
    let raw = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_slice(&raw).with_context(|| format!("invalid backup file {}", path.display()))
}

/// Restore backup entries into `dir`, overwriting existing files.
///
/// Entries are written by bare file name only; anything that is not a state
/// file name is skipped. Returns the written paths.
pub fn import(dir: &Path, backup: &Backup) -> Result<Vec<PathBuf>> {
    if backup.states.is_empty() {
        bail!("backup contains no states");
    }
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;

    let mut written = Vec::new();
    for entry in &backup.states {
        let name = Path::new(&entry.filename)
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| drone_id_from_file_name(n).is_some());
        let Some(name) = name else {
            tracing::warn!("Skipping backup entry with unexpected name {:?}", entry.filename);
            continue;
        };
        if entry.data.is_null() {
            tracing::warn!("Skipping empty backup entry {}", name);
            continue;
        }

        let path = dir.join(name);
        let body = serde_json::to_vec_pretty(&entry.data)?;
        match fs::write(&path, body) {
            Ok(()) => written.push(path),
            Err(e) => tracing::warn!("Failed to import {}: {}", path.display(), e),
        }
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use dronesim_core::record::state_file_name;
    use dronesim_core::VehicleState;

    fn write_record(dir: &Path, drone_id: &str, saved_at: DateTime<Utc>) -> PathBuf {
        let record = PersistedState::capture(drone_id, &VehicleState::on_ground(41.8, 123.4, 90.0), saved_at);
        let path = dir.join(state_file_name(drone_id));
        fs::write(&path, serde_json::to_vec(&record).unwrap()).unwrap();
        path
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn lists_only_state_files() {
        let dir = tempfile::tempdir().unwrap();
        write_record(dir.path(), "b", now());
        write_record(dir.path(), "a", now());
        fs::write(dir.path().join("notes.txt"), "hi").unwrap();
        fs::write(dir.path().join("drone_state_c.json"), "{broken").unwrap();

        let entries = list(dir.path()).unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.file_name.as_str()).collect();
        assert_eq!(
            names,
            ["drone_state_a.json", "drone_state_b.json", "drone_state_c.json"]
        );
        assert_eq!(entries[0].record.as_ref().unwrap().drone_id, "a");
        assert!(entries[2].record.is_err());
    }

    #[test]
    fn missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(list(&dir.path().join("nope")).unwrap().is_empty());
    }

    #[test]
    fn clean_all_keeps_other_files() {
        let dir = tempfile::tempdir().unwrap();
        write_record(dir.path(), "a", now());
        write_record(dir.path(), "b", now());
        fs::write(dir.path().join("notes.txt"), "hi").unwrap();

        assert_eq!(clean_all(dir.path()).unwrap().len(), 2);
        assert!(state_files(dir.path()).unwrap().is_empty());
        assert!(dir.path().join("notes.txt").exists());
    }

    #[test]
    fn clean_old_uses_saved_at() {
        let dir = tempfile::tempdir().unwrap();
        let stale = write_record(dir.path(), "old", now() - Duration::days(10));
        let fresh = write_record(dir.path(), "new", now() - Duration::days(2));

        let removed = clean_old(dir.path(), Duration::days(7), now()).unwrap();
        assert_eq!(removed, vec![stale.clone()]);
        assert!(!stale.exists());
        assert!(fresh.exists());
    }

    #[test]
    fn clean_old_falls_back_to_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drone_state_x.json");
        fs::write(&path, "{}").unwrap();

        // Just written, so younger than a day by mtime
        let removed = clean_old(dir.path(), Duration::days(1), Utc::now()).unwrap();
        assert!(removed.is_empty());

        let removed = clean_old(dir.path(), Duration::days(1), Utc::now() + Duration::days(2)).unwrap();
        assert_eq!(removed, vec![path]);
    }

    #[test]
    fn export_then_import_restores_files() {
        let src = tempfile::tempdir().unwrap();
        write_record(src.path(), "a", now());
        write_record(src.path(), "b", now());
        fs::write(src.path().join("drone_state_bad.json"), "{broken").unwrap();

        let backup = export(src.path(), now()).unwrap();
        assert_eq!(backup.states.len(), 2);

        let backup_file = src.path().join("backup.json");
        write_backup(&backup_file, &backup).unwrap();
        let raw: Value = serde_json::from_slice(&fs::read(&backup_file).unwrap()).unwrap();
        assert!(raw["exportTime"].is_string());
        assert_eq!(raw["states"][0]["filename"], "drone_state_a.json");

        let dst = tempfile::tempdir().unwrap();
        let written = import(dst.path(), &read_backup(&backup_file).unwrap()).unwrap();
        assert_eq!(written.len(), 2);

        let restored = list(dst.path()).unwrap();
        assert_eq!(restored[1].record.as_ref().unwrap().drone_id, "b");
    }

    #[test]
    fn import_rejects_path_escapes_and_empty_backups() {
        let dst = tempfile::tempdir().unwrap();
        let backup = Backup {
            export_time: now(),
            states: vec![
                BackupEntry {
                    filename: "../../etc/drone_state_a.json".to_string(),
                    data: serde_json::json!({"droneId": "a"}),
                },
                BackupEntry {
                    filename: "passwd".to_string(),
                    data: serde_json::json!({}),
                },
            ],
        };
        let written = import(dst.path(), &backup).unwrap();
        assert_eq!(written, vec![dst.path().join("drone_state_a.json")]);

        let empty = Backup {
            export_time: now(),
            states: Vec::new(),
        };
        assert!(import(dst.path(), &empty).is_err());
    }
}
