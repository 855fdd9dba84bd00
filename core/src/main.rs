use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use eyre::{Context, Result};
use tracing::{debug, info};

use forgebench::cli::{self, Cli, Mode};
use forgebench::clarification::ClarificationBroker;
use forgebench::config::Config;
use forgebench::domain::ProjectMode;
use forgebench::durable_store::DurableStore;
use forgebench::eventlog::{EventBus, EventLogger};
use forgebench::queue::TaskQueue;
use forgebench::redact::Redactor;
use forgebench::repl::ReplSession;
use forgebench::session_manager::{ClosePolicy, SessionManager};
use forgebench::supervisor::{Executor, ProcessExecutor, StubBehavior, StubExecutor, Supervisor};
use forgebench::worker::TaskWorker;

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Writes to the session's log directory, ANSI-free; level priority is
/// CLI `--log-level` unless `FORGE_TRACE=1` forces `trace`.
fn setup_logging(log_dir: &std::path::Path, cli_log_level: &str, trace_enabled: bool) -> Result<()> {
    std::fs::create_dir_all(log_dir).context("failed to create log directory")?;
    let log_file = std::fs::File::create(log_dir.join("forge.log")).context("failed to create log file")?;

    let directive = if trace_enabled { "trace" } else { cli_log_level };
    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::try_new(directive).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")))
        .init();

    info!(directive, "logging initialized");
    Ok(())
}

fn build_executor(config: &forgebench::config::ExecutorConfig) -> Arc<dyn Executor> {
    match config.recovery_scenario.as_deref() {
        Some("timeout") => Arc::new(StubExecutor::new(StubBehavior::SleepThenComplete {
            sleep: Duration::from_millis(config.hard_timeout_ms + 1_000),
        })),
        Some("blocked") => Arc::new(StubExecutor::new(StubBehavior::BlockOnInput {
            reason: "executor_blocked".to_string(),
        })),
        Some("error") => Arc::new(StubExecutor::new(StubBehavior::ExitNonZero { code: 1 })),
        Some("clarify") => Arc::new(StubExecutor::new(StubBehavior::AskUser {
            question: "Which format should the output use?".to_string(),
            options: vec!["json".to_string(), "yaml".to_string()],
        })),
        Some("complete") => Arc::new(StubExecutor::new(StubBehavior::CompleteImmediately {
            stdout: "stub run complete".to_string(),
        })),
        _ => Arc::new(ProcessExecutor::new(config.default_executor.clone(), Vec::new())),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref());
    config.apply_env_overrides();

    let project_path = std::env::current_dir().context("failed to resolve current directory")?;
    let fixed_path = cli.project_path.clone();
    let project_mode: ProjectMode = cli.project_mode.into();

    let events = Arc::new(EventBus::with_default_capacity());

    let mut session_manager = SessionManager::open(project_path, project_mode, fixed_path, &config, &events, now_ms())
        .context("failed to open session")?;
    let verification_root = session_manager.session.verification_root.clone();
    let session_id = session_manager.session.session_id.clone();

    let log_dir = verification_root.join(&config.session.project_dir_name).join("logs");
    setup_logging(&log_dir, &cli.log_level, config.logging.trace_enabled)?;

    if session_manager.is_restricted() {
        debug!("running in restricted mode: project structure incomplete");
    }

    let redactor = Arc::new(Redactor::new(&config.redaction.credential_key_patterns));

    let event_logger = Arc::new(tokio::sync::Mutex::new(
        EventLogger::open(
            verification_root.join(&config.session.project_dir_name).join("sessions").join(&session_id),
            (*redactor).clone(),
        )
        .context("failed to open event logger")?,
    ));
    let logger_handle = tokio::spawn(forgebench::eventlog::run_persister(event_logger.clone(), events.clone()));

    let durable_store = Arc::new(
        DurableStore::open(&config.store.state_dir, &config.store.default_namespace).context("failed to open durable store")?,
    );
    let recovery = durable_store.recover_on_restart();
    info!(?recovery, "durable store recovered prior state");
    durable_store.recover_stale_tasks(now_ms(), config.store.stale_task_age_ms);

    let queue = Arc::new(TaskQueue::new(now_ms));
    let recovered_tasks: Vec<_> = durable_store.get_all_items().iter().map(|item| item.to_task()).collect();
    if !recovered_tasks.is_empty() {
        info!(count = recovered_tasks.len(), "seeding queue with tasks recovered from durable store");
    }
    queue.seed(recovered_tasks).await;
    let broker = ClarificationBroker::spawn(queue.clone(), config.clarification.history_window);

    let executor = build_executor(&config.executor);
    let supervisor = Arc::new(Supervisor::new(
        executor,
        config.executor.default_executor.clone(),
        Duration::from_millis(config.executor.hard_timeout_ms),
        Duration::from_millis(config.executor.grace_window_ms),
        config.executor.output_capture_bytes,
    ));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let worker = TaskWorker::new(
        queue.clone(),
        supervisor,
        broker.clone(),
        durable_store.clone(),
        events.clone(),
        redactor,
        verification_root,
        session_id,
        queue.notify_handle(),
        now_ms,
    );
    let worker_handle = tokio::spawn(worker.run(shutdown_rx));

    let exit_code = match cli.mode() {
        Mode::Batch { task, timeout_ms } => run_batch(&queue, &task, timeout_ms).await,
        Mode::Interactive => {
            let repl = ReplSession::new(queue.clone(), broker.clone());
            repl.run(event_logger.clone()).await.context("interactive session failed")?;
            0
        }
    };

    let _ = shutdown_tx.send(true);
    let _ = worker_handle.await;
    broker.close().await;

    session_manager
        .close(
            if config.session.wait_for_all_on_close {
                ClosePolicy::WaitForAll
            } else {
                ClosePolicy::CancelOutstanding
            },
            &events,
        )
        .ok();

    drop(events);
    let _ = logger_handle.await;

    std::process::exit(exit_code);
}

async fn run_batch(queue: &Arc<TaskQueue>, task: &str, timeout_ms: Option<u64>) -> i32 {
    let task_id = queue.enqueue_with_timeout(task, timeout_ms).await;
    debug!(%task_id, ?timeout_ms, "run_batch: enqueued task");

    loop {
        if let Some(found) = queue.find(&task_id).await {
            if found.is_terminal() {
                return cli::exit_code_for(&[found.state]);
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
