//! Snapshot cache for parsed workbooks.
//!
//! Parsing the authorization workbook is the slow part of a run, so the
//! parsed table is serialized next to the source file. The snapshot is
//! valid iff its modification time is strictly newer than the source's;
//! touching the source invalidates it. Writing the snapshot is best-effort
//! and never fails a run.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Snapshot artifact path: `<source>.cache.json`, colocated with the source.
pub fn snapshot_path(source: &Path) -> PathBuf {
    let mut name = source.as_os_str().to_os_string();
    name.push(".cache.json");
    PathBuf::from(name)
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// A snapshot is usable only when it is strictly newer than its source.
pub fn snapshot_is_valid(source: &Path, snapshot: &Path) -> bool {
    match (modified(source), modified(snapshot)) {
        (Some(source_mtime), Some(snapshot_mtime)) => snapshot_mtime > source_mtime,
        _ => false,
    }
}

/// Load the cached table for `source`, if present, valid and readable.
///
/// Any failure (stale, missing, unreadable, undecodable) silently falls
/// back to a full re-parse by returning `None`.
pub fn load_snapshot<T: DeserializeOwned>(source: &Path) -> Option<T> {
    let snapshot = snapshot_path(source);
    if !snapshot_is_valid(source, &snapshot) {
        return None;
    }

    let bytes = match fs::read(&snapshot) {
        Ok(bytes) => bytes,
        Err(e) => {
            log::warn!("unreadable snapshot {}: {}", snapshot.display(), e);
            return None;
        }
    };

    match serde_json::from_slice(&bytes) {
        Ok(value) => {
            log::info!("loaded parsed table from {}", snapshot.display());
            Some(value)
        }
        Err(e) => {
            log::warn!("invalid snapshot {}: {}", snapshot.display(), e);
            None
        }
    }
}

/// Write the snapshot for `source`. Failures are logged and swallowed.
pub fn store_snapshot<T: Serialize>(source: &Path, value: &T) {
    let snapshot = snapshot_path(source);
    let result = serde_json::to_vec(value)
        .map_err(std::io::Error::other)
        .and_then(|bytes| fs::write(&snapshot, bytes));

    match result {
        Ok(()) => log::debug!("wrote snapshot {}", snapshot.display()),
        Err(e) => log::warn!("could not write snapshot {}: {}", snapshot.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    // Filesystem mtime granularity can be coarse; keep writes clearly apart.
    const MTIME_GAP: Duration = Duration::from_millis(150);

    #[test]
    fn test_snapshot_path_is_next_to_source() {
        let path = snapshot_path(Path::new("/data/datos.xlsx"));
        assert_eq!(path, Path::new("/data/datos.xlsx.cache.json"));
    }

    #[test]
    fn test_snapshot_newer_than_source_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("datos.xlsx");
        fs::write(&source, b"workbook bytes").unwrap();

        sleep(MTIME_GAP);
        store_snapshot(&source, &vec!["a".to_string(), "b".to_string()]);

        let cached: Option<Vec<String>> = load_snapshot(&source);
        assert_eq!(cached, Some(vec!["a".to_string(), "b".to_string()]));
    }

    #[test]
    fn test_touching_source_invalidates_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("datos.xlsx");
        fs::write(&source, b"v1").unwrap();

        sleep(MTIME_GAP);
        store_snapshot(&source, &vec![1u32, 2, 3]);
        assert!(snapshot_is_valid(&source, &snapshot_path(&source)));

        sleep(MTIME_GAP);
        fs::write(&source, b"v2").unwrap();

        assert!(!snapshot_is_valid(&source, &snapshot_path(&source)));
        let cached: Option<Vec<u32>> = load_snapshot(&source);
        assert_eq!(cached, None);
    }

    #[test]
    fn test_missing_snapshot_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("datos.xlsx");
        fs::write(&source, b"workbook").unwrap();

        let cached: Option<Vec<u32>> = load_snapshot(&source);
        assert_eq!(cached, None);
    }

    #[test]
    fn test_corrupt_snapshot_falls_back_to_reparse() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("datos.xlsx");
        fs::write(&source, b"workbook").unwrap();

        sleep(MTIME_GAP);
        fs::write(snapshot_path(&source), b"not json at all").unwrap();

        let cached: Option<Vec<u32>> = load_snapshot(&source);
        assert_eq!(cached, None);
    }

    #[test]
    fn test_store_snapshot_failure_is_swallowed() {
        // Unwritable location: parent directory does not exist.
        let source = Path::new("/nonexistent-dir/datos.xlsx");
        store_snapshot(source, &vec![1u32]);
    }
}
