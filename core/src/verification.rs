//! Verification and Evidence: compares the verification root before and
//! after an executor run to produce `VerifiedFile` records, preferring
//! git-porcelain status when available and falling back to a deterministic
//! directory walk otherwise.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Command;

use tracing::debug;
use walkdir::WalkDir;

use crate::domain::{DetectionMethod, TaskType, VerifiedFile};
use crate::errors::VerificationError;

/// A snapshot of the verification root taken before or after an executor
/// run, cheap enough to hold two of in memory for the duration of a task.
pub enum Snapshot {
    Git(Vec<String>),
    Walk(BTreeMap<String, (i64, u64)>),
}

fn is_git_repo(root: &Path) -> bool {
    Command::new("git")
        .arg("rev-parse")
        .arg("--is-inside-work-tree")
        .current_dir(root)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn git_status(root: &Path) -> Vec<String> {
    let output = Command::new("git").arg("status").arg("--porcelain=v1").current_dir(root).output();
    match output {
        Ok(out) if out.status.success() => String::from_utf8_lossy(&out.stdout)
            .lines()
            .map(|l| l.to_string())
            .collect(),
        _ => Vec::new(),
    }
}

fn walk_snapshot(root: &Path) -> BTreeMap<String, (i64, u64)> {
    let mut map = BTreeMap::new();
    for entry in WalkDir::new(root).sort_by_file_name().into_iter().filter_map(Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.path().components().any(|c| c.as_os_str() == ".git") {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        let modified = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        map.insert(relative.to_string_lossy().to_string(), (modified, meta.len()));
    }
    map
}

/// Take a before/after snapshot pair of `root`, choosing git or walkdir as
/// the oracle: when the verification root is a git work tree its porcelain
/// status is authoritative, otherwise a sorted directory walk stands in.
pub fn snapshot(root: &Path) -> Snapshot {
    if is_git_repo(root) {
        Snapshot::Git(git_status(root))
    } else {
        Snapshot::Walk(walk_snapshot(root))
    }
}

/// Diff a `before`/`after` snapshot pair into the set of `VerifiedFile`
/// records attributable to the task that ran in between.
pub fn diff(before: Snapshot, after: Snapshot, now_ms: i64) -> Vec<VerifiedFile> {
    match (before, after) {
        (Snapshot::Git(_), Snapshot::Git(after_lines)) => after_lines
            .into_iter()
            .filter_map(|line| parse_porcelain_line(&line))
            .map(|(path, exists)| VerifiedFile {
                path,
                exists,
                detected_at: now_ms,
                detection_method: DetectionMethod::GitStatus,
            })
            .collect(),
        (Snapshot::Walk(before_map), Snapshot::Walk(after_map)) => {
            let mut changed = Vec::new();
            for (path, after_meta) in &after_map {
                match before_map.get(path) {
                    Some(before_meta) if before_meta == after_meta => continue,
                    _ => changed.push(VerifiedFile {
                        path: path.clone(),
                        exists: true,
                        detected_at: now_ms,
                        detection_method: DetectionMethod::Walkdir,
                    }),
                }
            }
            for path in before_map.keys() {
                if !after_map.contains_key(path) {
                    changed.push(VerifiedFile {
                        path: path.clone(),
                        exists: false,
                        detected_at: now_ms,
                        detection_method: DetectionMethod::Walkdir,
                    });
                }
            }
            changed.sort_by(|a, b| a.path.cmp(&b.path));
            changed
        }
        // Oracle changed between before/after snapshots (e.g. git was
        // initialized mid-run); treat as no detectable change rather than
        // guess.
        _ => Vec::new(),
    }
}

fn parse_porcelain_line(line: &str) -> Option<(String, bool)> {
    if line.len() < 4 {
        return None;
    }
    let status = &line[0..2];
    let path = line[3..].trim().to_string();
    let deleted = status.contains('D');
    Some((path, !deleted))
}

/// Apply the outcome policy: an IMPLEMENTATION task with no verified changes
/// is INCOMPLETE with reason `no_file_changes_verified`; READ_INFO tasks may
/// legitimately have no changes.
pub fn apply_outcome_policy(task_type: TaskType, verified: &[VerifiedFile]) -> Result<(), VerificationError> {
    if task_type == TaskType::Implementation && verified.is_empty() {
        debug!("apply_outcome_policy: no file changes verified for IMPLEMENTATION task");
        return Err(VerificationError::NoFileChangesVerified);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn walkdir_detects_new_file() {
        let temp = TempDir::new().unwrap();
        let before = walk_snapshot(temp.path());
        fs::write(temp.path().join("README.md"), "# Test").unwrap();
        let after = walk_snapshot(temp.path());

        let changes = diff(Snapshot::Walk(before), Snapshot::Walk(after), 100);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].path, "README.md");
        assert!(changes[0].exists);
    }

    #[test]
    fn walkdir_detects_deleted_file() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("foo.txt"), "hi").unwrap();
        let before = walk_snapshot(temp.path());
        fs::remove_file(temp.path().join("foo.txt")).unwrap();
        let after = walk_snapshot(temp.path());

        let changes = diff(Snapshot::Walk(before), Snapshot::Walk(after), 100);
        assert_eq!(changes.len(), 1);
        assert!(!changes[0].exists);
    }

    #[test]
    fn no_changes_implementation_is_rejected() {
        let result = apply_outcome_policy(TaskType::Implementation, &[]);
        assert!(matches!(result, Err(VerificationError::NoFileChangesVerified)));
    }

    #[test]
    fn no_changes_read_info_is_allowed() {
        let result = apply_outcome_policy(TaskType::ReadInfo, &[]);
        assert!(result.is_ok());
    }
}
