//! The Clarification Broker: a small actor owning a one-slot mailbox,
//! implemented as an oneshot reply channel routed through an mpsc-driven
//! actor loop.

use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::domain::ClarificationType;
use crate::errors::{BrokerError, SupervisorError};
use crate::queue::TaskQueue;
use crate::supervisor::ResponseHandle;

/// A single parked clarification, awaiting the user's reply.
struct PendingClarification {
    task_id: String,
    context_hash: u64,
    reply_tx: oneshot::Sender<String>,
}

enum BrokerCommand {
    Ask {
        task_id: String,
        question: String,
        reason: Option<String>,
        context_hash: u64,
        reply_tx: oneshot::Sender<Result<oneshot::Receiver<String>, BrokerError>>,
    },
    Respond {
        task_id: Option<String>,
        answer: String,
        reply_tx: oneshot::Sender<Result<String, BrokerError>>,
    },
    Close {
        reply_tx: oneshot::Sender<()>,
    },
}

/// Handle cloned by callers that need to talk to the broker actor.
#[derive(Clone)]
pub struct ClarificationBroker {
    tx: mpsc::Sender<BrokerCommand>,
}

fn hash_question(question: &str, context: &Option<serde_json::Value>) -> u64 {
    let mut hasher = DefaultHasher::new();
    question.hash(&mut hasher);
    if let Some(ctx) = context {
        ctx.to_string().hash(&mut hasher);
    }
    hasher.finish()
}

impl ClarificationBroker {
    /// Spawn the broker actor, wired against `queue` for the state
    /// transitions it owns (AWAITING_RESPONSE / RUNNING / ERROR).
    pub fn spawn(queue: std::sync::Arc<TaskQueue>, history_window: usize) -> Self {
        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(Self::run(queue, history_window, rx));
        Self { tx }
    }

    async fn run(queue: std::sync::Arc<TaskQueue>, history_window: usize, mut rx: mpsc::Receiver<BrokerCommand>) {
        let mut pending: Option<PendingClarification> = None;
        // (question+context hash, answer) pairs, most recent last.
        let mut history: VecDeque<(u64, String)> = VecDeque::with_capacity(history_window);

        while let Some(cmd) = rx.recv().await {
            match cmd {
                BrokerCommand::Ask {
                    task_id,
                    question,
                    reason,
                    context_hash,
                    reply_tx,
                } => {
                    if let Some(answer) = history.iter().find(|(h, _)| *h == context_hash).map(|(_, a)| a.clone()) {
                        debug!(task_id, "Broker::Ask auto-resolved from history");
                        let (resolved_tx, resolved_rx) = oneshot::channel();
                        let _ = resolved_tx.send(answer);
                        let _ = reply_tx.send(Ok(resolved_rx));
                        continue;
                    }

                    // The actor loop can't block on one command without starving
                    // the rest, so a same-task re-ask while already pending fails
                    // fast the same way a different-task overlap does; callers are
                    // expected to await their first ask to completion first.
                    if let Some(existing) = &pending {
                        let _ = reply_tx.send(Err(BrokerError::OverlappingClarification {
                            pending_task_id: existing.task_id.clone(),
                        }));
                        continue;
                    }

                    if let Err(err) = queue.mark_awaiting_response(&task_id, question.clone(), reason).await {
                        warn!(task_id, error = %err, "Broker::Ask failed to mark task awaiting response");
                    }

                    let (resolve_tx, resolve_rx) = oneshot::channel();
                    pending = Some(PendingClarification {
                        task_id: task_id.clone(),
                        context_hash,
                        reply_tx: resolve_tx,
                    });
                    let _ = reply_tx.send(Ok(resolve_rx));
                }
                BrokerCommand::Respond { task_id, answer, reply_tx } => {
                    let target_matches = match (&pending, &task_id) {
                        (Some(p), Some(explicit)) => &p.task_id == explicit,
                        (Some(_), None) => true,
                        (None, _) => false,
                    };

                    if !target_matches {
                        let _ = reply_tx.send(Err(BrokerError::NoPendingClarification {
                            task_id: task_id.unwrap_or_default(),
                        }));
                        continue;
                    }

                    let Some(p) = pending.take() else {
                        let _ = reply_tx.send(Err(BrokerError::NoPendingClarification {
                            task_id: task_id.unwrap_or_default(),
                        }));
                        continue;
                    };

                    let resolved_task_id = p.task_id.clone();
                    let context_hash = p.context_hash;
                    let _ = p.reply_tx.send(answer.clone());

                    if let Err(err) = queue.resolve_clarification(&resolved_task_id, answer.clone()).await {
                        warn!(task_id = %resolved_task_id, error = %err, "Broker::Respond failed to resolve clarification");
                    }

                    if history.len() == history_window {
                        history.pop_front();
                    }
                    history.push_back((context_hash, answer.clone()));

                    let _ = reply_tx.send(Ok(resolved_task_id));
                }
                BrokerCommand::Close { reply_tx } => {
                    if let Some(p) = pending.take() {
                        drop(p.reply_tx);
                        if let Err(err) = queue.transition(&p.task_id, crate::domain::TaskState::Error).await {
                            warn!(task_id = %p.task_id, error = %err, "Broker::Close failed to mark task ERROR");
                        }
                    }
                    let _ = reply_tx.send(());
                }
            }
        }
    }

    /// Called on an executor's `askUser`. Returns a receiver the caller
    /// awaits for the user's eventual reply.
    pub async fn ask_user(
        &self,
        task_id: impl Into<String>,
        question: impl Into<String>,
        _options: Vec<String>,
        context: Option<serde_json::Value>,
        reason: Option<String>,
    ) -> Result<oneshot::Receiver<String>, BrokerError> {
        let question = question.into();
        let context_hash = hash_question(&question, &context);
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self
            .tx
            .send(BrokerCommand::Ask {
                task_id: task_id.into(),
                question,
                reason,
                context_hash,
                reply_tx,
            })
            .await;
        reply_rx.await.unwrap_or(Err(BrokerError::SessionClosed))
    }

    /// Called when the user issues `respond`, with an explicit task id or
    /// `None` to resolve the sole AWAITING_RESPONSE task implicitly.
    pub async fn respond(&self, task_id: Option<String>, answer: impl Into<String>) -> Result<String, BrokerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self
            .tx
            .send(BrokerCommand::Respond {
                task_id,
                answer: answer.into(),
                reply_tx,
            })
            .await;
        reply_rx.await.unwrap_or(Err(BrokerError::SessionClosed))
    }

    /// Reject any pending clarification with `SessionClosed` and mark its
    /// task ERROR.
    pub async fn close(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self.tx.send(BrokerCommand::Close { reply_tx }).await;
        let _ = reply_rx.await;
    }
}

/// Binds a broker handle to one task id, so an `Executor` can raise a
/// mid-run clarification without knowing about the broker's wider API.
/// This is what turns a `SupervisorOutcome`-level "clarify" result into a
/// real round-trip: the executor's `invoke` awaits `ask_user` itself and
/// resumes with the answer, instead of returning early.
pub struct BrokerResponseHandle {
    broker: ClarificationBroker,
    task_id: String,
}

impl BrokerResponseHandle {
    pub fn new(broker: ClarificationBroker, task_id: impl Into<String>) -> Self {
        Self {
            broker,
            task_id: task_id.into(),
        }
    }
}

#[async_trait]
impl ResponseHandle for BrokerResponseHandle {
    async fn ask_user(&self, question: String, options: Vec<String>, context: Option<serde_json::Value>) -> Result<String, SupervisorError> {
        let reply_rx = self
            .broker
            .ask_user(self.task_id.clone(), question, options, context, None)
            .await
            .map_err(|e| SupervisorError::ClarificationFailed(e.to_string()))?;
        reply_rx
            .await
            .map_err(|_| SupervisorError::ClarificationFailed("clarification channel closed before a reply arrived".to_string()))
    }
}

/// Resolve a numeric shortcut (`"2"` -> `options[1]`) for SELECT_ONE and
/// CONFIRM clarifications.
pub fn resolve_numeric_shortcut(kind: ClarificationType, answer: &str, options: &[String]) -> Option<String> {
    if !matches!(kind, ClarificationType::SelectOne | ClarificationType::Confirm) {
        return None;
    }
    let index: usize = answer.trim().parse().ok()?;
    index.checked_sub(1).and_then(|i| options.get(i)).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn fixed_now() -> i64 {
        1_000
    }

    #[tokio::test]
    async fn ask_then_respond_round_trips() {
        let queue = Arc::new(TaskQueue::new(fixed_now));
        let task_id = queue.enqueue("implement thing").await;
        queue.transition(&task_id, crate::domain::TaskState::Running).await.unwrap();

        let broker = ClarificationBroker::spawn(queue.clone(), 50);
        let rx = broker
            .ask_user(task_id.clone(), "Which format?", vec!["json".into(), "yaml".into()], None, None)
            .await
            .unwrap();

        let task = queue.find(&task_id).await.unwrap();
        assert_eq!(task.state, crate::domain::TaskState::AwaitingResponse);

        broker.respond(None, "json").await.unwrap();
        let answer = tokio::time::timeout(Duration::from_secs(1), rx).await.unwrap().unwrap();
        assert_eq!(answer, "json");

        let task = queue.find(&task_id).await.unwrap();
        assert_eq!(task.state, crate::domain::TaskState::Running);
        assert_eq!(task.user_response.as_deref(), Some("json"));
    }

    #[tokio::test]
    async fn overlapping_ask_from_different_task_fails_fast() {
        let queue = Arc::new(TaskQueue::new(fixed_now));
        let t1 = queue.enqueue("task one").await;
        let t2 = queue.enqueue("task two").await;
        queue.transition(&t1, crate::domain::TaskState::Running).await.unwrap();
        queue.transition(&t2, crate::domain::TaskState::Running).await.unwrap();

        let broker = ClarificationBroker::spawn(queue.clone(), 50);
        let _rx = broker.ask_user(t1, "Q1?", vec![], None, None).await.unwrap();

        let err = broker.ask_user(t2, "Q2?", vec![], None, None).await.unwrap_err();
        assert!(matches!(err, BrokerError::OverlappingClarification { .. }));
    }

    #[tokio::test]
    async fn close_rejects_pending_with_session_closed() {
        let queue = Arc::new(TaskQueue::new(fixed_now));
        let task_id = queue.enqueue("task").await;
        queue.transition(&task_id, crate::domain::TaskState::Running).await.unwrap();

        let broker = ClarificationBroker::spawn(queue.clone(), 50);
        let rx = broker.ask_user(task_id.clone(), "Q?", vec![], None, None).await.unwrap();

        broker.close().await;
        assert!(rx.await.is_err());

        let task = queue.find(&task_id).await.unwrap();
        assert_eq!(task.state, crate::domain::TaskState::Error);
    }

    #[test]
    fn numeric_shortcut_resolves_select_one() {
        let options = vec!["json".to_string(), "yaml".to_string()];
        let resolved = resolve_numeric_shortcut(ClarificationType::SelectOne, "1", &options);
        assert_eq!(resolved.as_deref(), Some("json"));
    }

    #[test]
    fn numeric_shortcut_ignored_for_free_text() {
        let options = vec!["json".to_string()];
        assert_eq!(resolve_numeric_shortcut(ClarificationType::FreeText, "1", &options), None);
    }

    #[tokio::test]
    async fn broker_response_handle_round_trips_through_ask_user() {
        let queue = Arc::new(TaskQueue::new(fixed_now));
        let task_id = queue.enqueue("implement thing").await;
        queue.transition(&task_id, crate::domain::TaskState::Running).await.unwrap();

        let broker = ClarificationBroker::spawn(queue.clone(), 50);
        let handle = BrokerResponseHandle::new(broker.clone(), task_id.clone());

        let ask = tokio::spawn(async move { handle.ask_user("Which format?".to_string(), vec!["json".to_string()], None).await });

        // Give the broker actor a moment to mark the task AWAITING_RESPONSE
        // before the respond races it.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(queue.find(&task_id).await.unwrap().state, crate::domain::TaskState::AwaitingResponse);

        broker.respond(Some(task_id.clone()), "json").await.unwrap();
        let answer = ask.await.unwrap().unwrap();
        assert_eq!(answer, "json");
        assert_eq!(queue.find(&task_id).await.unwrap().state, crate::domain::TaskState::Running);
    }
}
