//! Event Bus and persisted trace log.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::domain::EventRecord;
use crate::redact::Redactor;

/// Default broadcast channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 10_000;

/// In-process fan-out of events to live subscribers (the REPL's tail view,
/// the evidence writer). Persistence is a separate concern, handled by
/// `EventLogger`.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EventRecord>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Fire-and-forget emit; a send failure just means there are currently
    /// no subscribers, which is not an error.
    pub fn emit(&self, event: EventRecord) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Persists every event on the bus to a per-session JSONL file, replaying
/// it on open to build the `parentEventId` index used by `get_related`.
pub struct EventLogger {
    session_dir: PathBuf,
    writer: BufWriter<std::fs::File>,
    by_id: HashMap<String, EventRecord>,
    children: HashMap<String, Vec<String>>,
    redactor: Redactor,
}

impl EventLogger {
    /// `redactor` is applied to every event's payload immediately before it
    /// is written or indexed — the last point before persistence, so a
    /// caller emitting an already-redacted payload (e.g. `worker::emit_evidence`)
    /// just gets a harmless no-op re-scan here, not a gap.
    pub fn open(session_dir: impl AsRef<Path>, redactor: Redactor) -> std::io::Result<Self> {
        let session_dir = session_dir.as_ref().to_path_buf();
        fs::create_dir_all(&session_dir)?;
        let log_path = session_dir.join("events.jsonl");

        let mut by_id = HashMap::new();
        let mut children: HashMap<String, Vec<String>> = HashMap::new();
        if log_path.exists() {
            let file = std::fs::File::open(&log_path)?;
            for line in BufReader::new(file).lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                if let Ok(event) = serde_json::from_str::<EventRecord>(&line) {
                    if let Some(parent) = &event.parent_event_id {
                        children.entry(parent.clone()).or_default().push(event.id.clone());
                    }
                    by_id.insert(event.id.clone(), event);
                }
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&log_path)?;
        debug!(?session_dir, replayed = by_id.len(), "EventLogger::open");

        Ok(Self {
            session_dir,
            writer: BufWriter::new(file),
            by_id,
            children,
            redactor,
        })
    }

    pub fn record(&mut self, mut event: EventRecord) -> std::io::Result<()> {
        event.payload = self.redactor.redact_value(&event.payload);

        let line = serde_json::to_string(&event)?;
        writeln!(self.writer, "{}", line)?;
        self.writer.flush()?;

        if let Some(parent) = &event.parent_event_id {
            self.children.entry(parent.clone()).or_default().push(event.id.clone());
        }
        self.by_id.insert(event.id.clone(), event);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&EventRecord> {
        self.by_id.get(id)
    }

    pub fn get_related(&self, id: &str) -> Vec<&EventRecord> {
        self.children
            .get(id)
            .into_iter()
            .flatten()
            .filter_map(|child_id| self.by_id.get(child_id))
            .collect()
    }

    pub fn query(&self, predicate: impl Fn(&EventRecord) -> bool) -> Vec<&EventRecord> {
        self.by_id.values().filter(|e| predicate(e)).collect()
    }

    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }
}

/// Subscribe `bus` and persist every event into `logger` until the channel
/// closes or lags beyond recovery. `logger` is shared behind a mutex rather
/// than owned outright so callers (the REPL's `/logs`) can query the same
/// index concurrently.
pub async fn run_persister(logger: Arc<tokio::sync::Mutex<EventLogger>>, bus: Arc<EventBus>) {
    let mut rx = bus.subscribe();
    loop {
        match rx.recv().await {
            Ok(event) => {
                if let Err(err) = logger.lock().await.record(event) {
                    warn!(error = %err, "run_persister failed to persist event");
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(skipped = n, "run_persister lagged behind the event bus");
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!("run_persister: bus closed, exiting");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EventSource;
    use tempfile::TempDir;

    #[test]
    fn record_and_get_roundtrips() {
        let temp = TempDir::new().unwrap();
        let mut logger = EventLogger::open(temp.path(), Redactor::new(&[])).unwrap();
        let event = EventRecord::new(EventSource::Task, serde_json::json!({"state": "RUNNING"}));
        let id = event.id.clone();
        logger.record(event).unwrap();
        assert!(logger.get(&id).is_some());
    }

    #[test]
    fn get_related_follows_parent_links() {
        let temp = TempDir::new().unwrap();
        let mut logger = EventLogger::open(temp.path(), Redactor::new(&[])).unwrap();
        let parent = EventRecord::new(EventSource::Session, serde_json::json!({}));
        let parent_id = parent.id.clone();
        logger.record(parent).unwrap();

        let child = EventRecord::new(EventSource::Task, serde_json::json!({})).with_parent(parent_id.clone());
        logger.record(child).unwrap();

        let related = logger.get_related(&parent_id);
        assert_eq!(related.len(), 1);
    }

    #[test]
    fn reopen_replays_existing_events() {
        let temp = TempDir::new().unwrap();
        let id = {
            let mut logger = EventLogger::open(temp.path(), Redactor::new(&[])).unwrap();
            let event = EventRecord::new(EventSource::Task, serde_json::json!({}));
            let id = event.id.clone();
            logger.record(event).unwrap();
            id
        };

        let logger = EventLogger::open(temp.path(), Redactor::new(&[])).unwrap();
        assert!(logger.get(&id).is_some());
    }

    #[test]
    fn record_redacts_sensitive_payload_keys_before_persisting() {
        let temp = TempDir::new().unwrap();
        let redactor = Redactor::new(&["(?i)api_key".to_string()]);
        let mut logger = EventLogger::open(temp.path(), redactor).unwrap();
        let event = EventRecord::new(EventSource::Task, serde_json::json!({"api_key": "sk-live-abc", "ok": "fine"}));
        let id = event.id.clone();
        logger.record(event).unwrap();

        let stored = logger.get(&id).unwrap();
        assert_eq!(stored.payload["api_key"], "***REDACTED***");
        assert_eq!(stored.payload["ok"], "fine");

        let contents = fs::read_to_string(temp.path().join("events.jsonl")).unwrap();
        assert!(!contents.contains("sk-live-abc"));
    }

    #[tokio::test]
    async fn bus_emit_reaches_subscriber() {
        let bus = EventBus::with_default_capacity();
        let mut rx = bus.subscribe();
        bus.emit(EventRecord::new(EventSource::Command, serde_json::json!({"cmd": "/tasks"})));
        let received = rx.recv().await.unwrap();
        assert_eq!(received.source, EventSource::Command);
    }

    #[tokio::test]
    async fn persister_writes_emitted_events_into_the_shared_logger() {
        let temp = TempDir::new().unwrap();
        let logger = Arc::new(tokio::sync::Mutex::new(EventLogger::open(temp.path(), Redactor::new(&[])).unwrap()));
        let bus = Arc::new(EventBus::with_default_capacity());

        let persister = tokio::spawn(run_persister(logger.clone(), bus.clone()));
        bus.emit(EventRecord::new(EventSource::Task, serde_json::json!({"state": "RUNNING"})));

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(logger.lock().await.query(|_| true).len(), 1);

        persister.abort();
    }
}
