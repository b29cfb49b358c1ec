//! Startup replay of `resource_original_values.txt` (§6 "Persisted state",
//! §11). Grounded on `AuxRoutines::writeSysFsDefaults`: a newline-delimited
//! `path,value` file, written back to sysfs on startup so the machine
//! returns to a known baseline after a crash. A missing file, a line with
//! no comma, or a non-integer value is logged and skipped; it never aborts
//! startup.

use log::{trace, warn};
use std::path::Path;

/// Parses `path,value` pairs out of the file at `path`. Lines that don't
/// parse are skipped individually, matching the original's per-token
/// `try`/`catch` around `stoi`.
#[must_use]
pub fn read_pairs(path: &Path) -> Vec<(String, i32)> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!("failed to open persisted state file {path:?}: {e}");
            return Vec::new();
        }
    };

    contents
        .lines()
        .filter_map(|line| {
            let (node, value) = line.split_once(',')?;
            if node.is_empty() {
                return None;
            }
            value.trim().parse::<i32>().ok().map(|v| (node.to_string(), v))
        })
        .collect()
}

/// Replays every `(sysfs_path, value)` pair by writing `value` back to
/// `sysfs_path`. A write failure is logged and the replay continues with
/// the remaining pairs (same non-fatal policy as a sysfs apply failure,
/// §4.3 "Failure semantics").
pub fn replay(path: &Path) {
    for (node, value) in read_pairs(path) {
        match std::fs::write(&node, value.to_string()) {
            Ok(()) => trace!("replayed default {value} to {node}"),
            Err(e) => warn!("failed to replay default {value} to {node}: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_pairs() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("values.txt");
        std::fs::write(&file, "/sys/a,100\n/sys/b,200\n").unwrap();
        let pairs = read_pairs(&file);
        assert_eq!(
            pairs,
            vec![("/sys/a".to_string(), 100), ("/sys/b".to_string(), 200)]
        );
    }

    #[test]
    fn skips_malformed_lines() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("values.txt");
        std::fs::write(&file, "no_comma_here\n,100\n/sys/c,not_a_number\n/sys/d,5\n").unwrap();
        let pairs = read_pairs(&file);
        assert_eq!(pairs, vec![("/sys/d".to_string(), 5)]);
    }

    #[test]
    fn missing_file_yields_empty_without_panicking() {
        let pairs = read_pairs(Path::new("/nonexistent/path/values.txt"));
        assert!(pairs.is_empty());
    }
}
