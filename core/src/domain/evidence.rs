use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use super::verified_file::VerifiedFile;

/// Immutable, timestamped, content-addressed record of a significant
/// transition. The `hash` field is computed over the remaining payload and
/// never recomputed after construction, so two evidence records are equal
/// iff their payload was.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceRecord {
    pub hash: String,
    pub task_id: String,
    pub recorded_at: i64,
    pub outcome: String,
    pub execution_mode: String,
    pub verified_files: Vec<VerifiedFile>,
    pub stdout_tail: String,
    pub stderr_tail: String,
    pub reason: Option<String>,
}

impl EvidenceRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        task_id: impl Into<String>,
        recorded_at: i64,
        outcome: impl Into<String>,
        execution_mode: impl Into<String>,
        verified_files: Vec<VerifiedFile>,
        stdout_tail: impl Into<String>,
        stderr_tail: impl Into<String>,
        reason: Option<String>,
    ) -> Self {
        let task_id = task_id.into();
        let outcome = outcome.into();
        let execution_mode = execution_mode.into();
        let stdout_tail = stdout_tail.into();
        let stderr_tail = stderr_tail.into();

        let mut hasher = DefaultHasher::new();
        task_id.hash(&mut hasher);
        outcome.hash(&mut hasher);
        execution_mode.hash(&mut hasher);
        stdout_tail.hash(&mut hasher);
        stderr_tail.hash(&mut hasher);
        reason.hash(&mut hasher);
        for vf in &verified_files {
            vf.path.hash(&mut hasher);
            vf.exists.hash(&mut hasher);
        }
        let hash = format!("{:016x}", hasher.finish());

        Self {
            hash,
            task_id,
            recorded_at,
            outcome,
            execution_mode,
            verified_files,
            stdout_tail,
            stderr_tail,
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_payloads_hash_identically() {
        let a = EvidenceRecord::new("task_1", 100, "COMPLETE", "live", vec![], "", "", None);
        let b = EvidenceRecord::new("task_1", 200, "COMPLETE", "live", vec![], "", "", None);
        assert_eq!(a.hash, b.hash, "hash covers payload, not recorded_at");
    }

    #[test]
    fn different_outcomes_hash_differently() {
        let a = EvidenceRecord::new("task_1", 100, "COMPLETE", "live", vec![], "", "", None);
        let b = EvidenceRecord::new("task_1", 100, "ERROR", "live", vec![], "", "", None);
        assert_ne!(a.hash, b.hash);
    }
}
