use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    GitStatus,
    Walkdir,
}

impl std::fmt::Display for DetectionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DetectionMethod::GitStatus => write!(f, "git_status"),
            DetectionMethod::Walkdir => write!(f, "walkdir"),
        }
    }
}

/// A single file-system effect attributed to a task, produced by the
/// verification pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifiedFile {
    pub path: String,
    pub exists: bool,
    pub detected_at: i64,
    pub detection_method: DetectionMethod,
}
