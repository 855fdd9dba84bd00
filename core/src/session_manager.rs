//! Session Manager: opens and closes the unit of user work, resolves the
//! verification root by `ProjectMode`, and enforces single-session-per-
//! project-root via an advisory PID lock file.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::Config;
use crate::domain::{EventRecord, EventSource, ProjectMode, Session, SessionStatus};
use crate::errors::SessionError;
use crate::eventlog::EventBus;

/// Caller-specified policy for what `close` does with outstanding tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosePolicy {
    WaitForAll,
    CancelOutstanding,
}

pub struct SessionManager {
    pub session: Session,
    lock_path: PathBuf,
    restricted_mode: bool,
}

impl SessionManager {
    /// Open a session: resolve the verification root, validate project
    /// structure, take the advisory lock, and emit `session.start`.
    pub fn open(
        project_path: PathBuf,
        mode: ProjectMode,
        fixed_path: Option<PathBuf>,
        config: &Config,
        events: &EventBus,
        now_ms: i64,
    ) -> Result<Self, SessionError> {
        let verification_root = Self::resolve_verification_root(&project_path, mode, fixed_path.as_deref())?;
        let lock_path = verification_root.join(&config.session.project_dir_name).join("forge.lock");

        Self::acquire_lock(&lock_path)?;

        let restricted_mode = !Self::validate_project_structure(&verification_root, &config.session.project_dir_name);
        if restricted_mode {
            debug!(?verification_root, "project structure invalid, entering restricted mode");
        }

        let mut session = Session::new(project_path, verification_root, mode);
        session.status = SessionStatus::Running;

        events.emit(
            EventRecord::new(
                EventSource::Session,
                serde_json::json!({"event": "session.start", "mode": format!("{mode:?}")}),
            )
            .with_session(session.session_id.clone()),
        );
        info!(session_id = %session.session_id, ?mode, now_ms, "session opened");

        Ok(Self {
            session,
            lock_path,
            restricted_mode,
        })
    }

    pub fn is_restricted(&self) -> bool {
        self.restricted_mode
    }

    fn resolve_verification_root(
        project_path: &Path,
        mode: ProjectMode,
        fixed_path: Option<&Path>,
    ) -> Result<PathBuf, SessionError> {
        match mode {
            ProjectMode::Cwd => Ok(project_path.to_path_buf()),
            ProjectMode::Temp => {
                let dir = std::env::temp_dir().join(format!("forge-session-{}", uuid::Uuid::now_v7()));
                fs::create_dir_all(&dir).map_err(|e| SessionError::InvalidProjectStructure(e.to_string()))?;
                fs::create_dir_all(dir.join(".claude")).ok();
                Ok(dir)
            }
            ProjectMode::Fixed => {
                let path = fixed_path.ok_or_else(|| SessionError::InvalidProjectStructure("fixed mode requires a path".into()))?;
                if !path.exists() {
                    return Err(SessionError::FixedPathMissing(path.to_path_buf()));
                }
                Ok(path.to_path_buf())
            }
        }
    }

    /// Presence of the configured project directory is sufficient to leave
    /// restricted mode; required files beneath it are checked loosely since
    /// the admin-layer content format is out of scope here.
    fn validate_project_structure(root: &Path, project_dir_name: &str) -> bool {
        root.join(project_dir_name).is_dir()
    }

    fn acquire_lock(lock_path: &Path) -> Result<(), SessionError> {
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent).map_err(|e| SessionError::PersistFailed(e.to_string()))?;
        }
        if lock_path.exists() {
            return Err(SessionError::AlreadyLocked(lock_path.to_path_buf()));
        }
        fs::write(lock_path, std::process::id().to_string()).map_err(|e| SessionError::PersistFailed(e.to_string()))
    }

    /// Close the session: the caller is responsible for having already
    /// quiesced the worker per `policy` before calling this (the worker
    /// itself lives above the session manager to keep the ownership tree
    /// acyclic).
    pub fn close(&mut self, policy: ClosePolicy, events: &EventBus) -> Result<(), SessionError> {
        debug!(?policy, "SessionManager::close");
        let _ = fs::remove_file(&self.lock_path);
        self.session.status = SessionStatus::Completed;

        events.emit(
            EventRecord::new(EventSource::Session, serde_json::json!({"event": "session.end"}))
                .with_session(self.session.session_id.clone()),
        );
        info!(session_id = %self.session.session_id, "session closed");
        Ok(())
    }

    pub fn mark_failed(&mut self, reason: &str, events: &EventBus) {
        self.session.status = SessionStatus::Failed;
        events.emit(
            EventRecord::new(
                EventSource::Session,
                serde_json::json!({"event": "session.failed", "reason": reason}),
            )
            .with_session(self.session.session_id.clone()),
        );
        let _ = fs::remove_file(&self.lock_path);
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.lock_path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn temp_mode_seeds_a_project_skeleton() {
        let config = Config::default();
        let events = EventBus::with_default_capacity();
        let manager = SessionManager::open(PathBuf::from("."), ProjectMode::Temp, None, &config, &events, 100).unwrap();
        assert!(manager.session.verification_root.join(".claude").is_dir());
        assert!(!manager.is_restricted());
    }

    #[test]
    fn fixed_mode_requires_existing_path() {
        let config = Config::default();
        let events = EventBus::with_default_capacity();
        let missing = PathBuf::from("/nonexistent/forge/path/xyz");
        let result = SessionManager::open(missing.clone(), ProjectMode::Fixed, Some(missing), &config, &events, 100);
        assert!(matches!(result, Err(SessionError::FixedPathMissing(_))));
    }

    #[test]
    fn cwd_mode_without_claude_dir_is_restricted() {
        let temp = TempDir::new().unwrap();
        let config = Config::default();
        let events = EventBus::with_default_capacity();
        let manager = SessionManager::open(temp.path().to_path_buf(), ProjectMode::Cwd, None, &config, &events, 100).unwrap();
        assert!(manager.is_restricted());
    }

    #[test]
    fn second_session_on_same_root_fails_to_lock() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join(".claude")).unwrap();
        let config = Config::default();
        let events = EventBus::with_default_capacity();

        let _first = SessionManager::open(temp.path().to_path_buf(), ProjectMode::Cwd, None, &config, &events, 100).unwrap();
        let second = SessionManager::open(temp.path().to_path_buf(), ProjectMode::Cwd, None, &config, &events, 100);
        assert!(matches!(second, Err(SessionError::AlreadyLocked(_))));
    }
}
