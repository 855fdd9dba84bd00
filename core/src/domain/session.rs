use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::id::{new_id, IdKind};

/// How the verification root is selected at session open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectMode {
    /// The current working directory.
    Cwd,
    /// A fresh OS temp directory seeded with a minimal project skeleton.
    Temp,
    /// A caller-supplied path, which must already exist.
    Fixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Running,
    Paused,
    Completed,
    Failed,
}

/// The unit of user work: one project root, one verification root, one
/// lifecycle from open to close.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub project_path: PathBuf,
    pub verification_root: PathBuf,
    pub project_mode: ProjectMode,
    pub status: SessionStatus,
    pub current_task_id: Option<String>,
    pub last_task_id: Option<String>,
}

impl Session {
    pub fn new(project_path: PathBuf, verification_root: PathBuf, project_mode: ProjectMode) -> Self {
        Self {
            session_id: new_id(IdKind::Session),
            project_path,
            verification_root,
            project_mode,
            status: SessionStatus::Idle,
            current_task_id: None,
            last_task_id: None,
        }
    }
}
