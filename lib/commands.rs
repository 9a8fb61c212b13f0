use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::attendance::MysqlAttendanceStore;
use crate::cli::{Cli, Command};
use crate::config::{Config, ConfigError};
use crate::db::{build_db_pool, run_migrations, verify_connectivity, DbError, DbPool};
use crate::export::{
    ExportCoordinator, ExportRunError, JsonFileCheckpointStore, MergeWriter, MysqlRowFetcher,
    MYSQL_SOURCES,
};
use crate::hr_feed::{FeedError, ZohoClient};
use crate::ingest::{DedupIngestEngine, IngestError};
use crate::logging::{format_error_report, init_logging};
use crate::push::{push_unsynced, PushError};
use crate::reconcile::{reconcile, ReconcileError};
use crate::remote_store::{DriveCredentials, DriveStore, StoreError};
use crate::retry::RetryPolicy;
use crate::run_lock::{RunLock, RunLockError};

pub const EXIT_OK: i32 = 0;
pub const EXIT_RUNTIME_ERROR: i32 = 1;
pub const EXIT_INVALID_CONFIG: i32 = 2;

const SERVICE_NAME: &str = "attendance_sync";
const DB_POOL_MAX_SIZE: usize = 2;
const HTTP_TIMEOUT: Duration = Duration::from_secs(20);

/// One unit of work in the `all` sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Ingest,
    Backup,
    Reconcile,
    Push,
}

impl Step {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ingest => "ingest",
            Self::Backup => "backup",
            Self::Reconcile => "reconcile",
            Self::Push => "push",
        }
    }
}

/// A failing critical step is logged and the sequence moves on; a failing optional step ends
/// the sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Criticality {
    Critical,
    Optional,
}

pub const ALL_STEPS: [(Step, Criticality); 4] = [
    (Step::Ingest, Criticality::Critical),
    (Step::Backup, Criticality::Critical),
    (Step::Reconcile, Criticality::Optional),
    (Step::Push, Criticality::Optional),
];

#[derive(Error, Debug)]
pub enum StepError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("remote store setup failed: {0}")]
    RemoteStore(#[from] StoreError),

    #[error(transparent)]
    Export(#[from] ExportRunError),

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error("HR feed halted ingest: {0}")]
    Feed(#[from] FeedError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error(transparent)]
    Push(#[from] PushError),

    #[error("cancelled")]
    Cancelled,
}

/// Failures that stop a run before any step starts.
#[derive(Error, Debug)]
pub enum StartupError {
    #[error(transparent)]
    RunLock(#[from] RunLockError),

    #[error(transparent)]
    Db(#[from] DbError),
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SequenceReport {
    pub succeeded: Vec<Step>,
    pub failed: Vec<Step>,
    /// Optional step whose failure ended the sequence.
    pub stopped_at: Option<Step>,
    pub cancelled: bool,
}

/// Runs `steps` in order under the critical/optional rule.
pub async fn run_sequence<F, Fut>(
    steps: &[(Step, Criticality)],
    cancel: &CancellationToken,
    mut run_step: F,
) -> SequenceReport
where
    F: FnMut(Step) -> Fut,
    Fut: Future<Output = Result<(), StepError>>,
{
    let mut report = SequenceReport::default();

    for &(step, criticality) in steps {
        if cancel.is_cancelled() {
            warn!(event = "sequence_cancelled", next_step = step.as_str());
            report.cancelled = true;
            break;
        }

        info!(event = "step_starting", step = step.as_str());
        match run_step(step).await {
            Ok(()) => {
                info!(event = "step_completed", step = step.as_str());
                report.succeeded.push(step);
            }
            Err(err) => {
                let error_report = format_error_report(&err);
                error!(
                    event = "step_failed",
                    step = step.as_str(),
                    critical = criticality == Criticality::Critical,
                    error = %err,
                    error_report = %error_report,
                    "step failed"
                );
                report.failed.push(step);
                if criticality == Criticality::Optional {
                    warn!(
                        event = "sequence_stopped",
                        step = step.as_str(),
                        "optional step failed; skipping the remaining steps"
                    );
                    report.stopped_at = Some(step);
                    break;
                }
                warn!(
                    event = "critical_step_failed_continuing",
                    step = step.as_str(),
                    "critical step failed; continuing with the next step"
                );
            }
        }
    }

    report
}

/// Everything a step needs, resolved once per process.
pub struct StepContext {
    pub config: Config,
    pub pool: DbPool,
    pub http: reqwest::Client,
    pub cancel: CancellationToken,
}

impl StepContext {
    pub async fn run_step(&self, step: Step) -> Result<(), StepError> {
        match step {
            Step::Ingest => self.ingest().await,
            Step::Backup => self.backup().await,
            Step::Reconcile => self.reconcile().await,
            Step::Push => self.push().await,
        }
    }

    async fn backup(&self) -> Result<(), StepError> {
        let export = &self.config.export;
        let credentials = DriveCredentials::from_file(&self.config.drive.credentials_path)?;
        let store = DriveStore::new(
            self.http.clone(),
            credentials,
            RetryPolicy::with_attempts(export.remote_retry_attempts),
        );

        let coordinator = ExportCoordinator::new(
            MysqlRowFetcher::new(self.pool.clone()),
            MergeWriter::new(store, self.config.drive.folder_id.clone()),
            JsonFileCheckpointStore::new(&export.checkpoint_path),
            export.clone(),
        )
        .with_cancellation(self.cancel.clone());

        let summary = coordinator.run().await?;
        if summary.cancelled_count() > 0 {
            return Err(StepError::Cancelled);
        }
        Ok(())
    }

    async fn ingest(&self) -> Result<(), StepError> {
        let hr_api = self.config.require_hr_api()?;
        let engine = DedupIngestEngine::new(
            ZohoClient::new(self.http.clone(), hr_api),
            MysqlAttendanceStore::new(self.pool.clone()),
            hr_api.lookback_days,
        )
        .with_cancellation(self.cancel.clone());

        let summary = engine.run(chrono::Local::now().naive_local()).await?;
        if let Some(err) = summary.feed_error {
            return Err(StepError::Feed(err));
        }
        if summary.cancelled {
            return Err(StepError::Cancelled);
        }
        Ok(())
    }

    async fn reconcile(&self) -> Result<(), StepError> {
        let store = MysqlAttendanceStore::new(self.pool.clone());
        reconcile(&store, self.config.reconcile_window_secs).await?;
        Ok(())
    }

    async fn push(&self) -> Result<(), StepError> {
        let hr_api = self.config.require_hr_api()?;
        let client = ZohoClient::new(self.http.clone(), hr_api);
        let store = MysqlAttendanceStore::new(self.pool.clone());
        let summary = push_unsynced(&client, &store, &self.cancel).await?;
        if summary.cancelled {
            return Err(StepError::Cancelled);
        }
        Ok(())
    }
}

fn report_startup_failure(event: &'static str, err: &(dyn std::error::Error + 'static)) {
    let error_report = format_error_report(err);
    error!(
        event,
        error = %err,
        error_report = %error_report,
        "run could not start"
    );
    eprintln!("{err}");
    eprintln!("{error_report}");
}

async fn connect_database(config: &Config) -> Result<DbPool, DbError> {
    let pool = build_db_pool(&config.db_url, DB_POOL_MAX_SIZE)?;
    verify_connectivity(&pool).await?;
    let applied = run_migrations(&config.db_url).await?;
    info!(event = "migrations_applied", applied, "database schema is current");
    Ok(pool)
}

fn warn_unqueryable_sources(config: &Config) {
    for source in config
        .export
        .sources
        .iter()
        .filter(|source| !MYSQL_SOURCES.contains(&source.as_str()))
    {
        warn!(
            event = "export_source_unknown",
            source = %source,
            "no query is defined for this source; it will fail every backup"
        );
    }
}

/// Runs one invocation and returns the process exit code.
///
/// 0: finished (individual source/step failures are logged), 1: the run could not start or a
/// single-step command failed, 2: invalid configuration.
pub async fn run(cli: Cli, cancel: CancellationToken) -> i32 {
    let command = cli.command();
    let (logging_context, _logging_guard) =
        init_logging(SERVICE_NAME, command.as_str(), &cli.log_level);
    let run_span = tracing::info_span!(
        "sync_run",
        service = %logging_context.service,
        environment = %logging_context.environment,
        mode = %logging_context.mode,
        run_id = %logging_context.run_id,
        build_version = %logging_context.build_version,
        build_commit = %logging_context.build_commit
    );
    let _run_guard = run_span.enter();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            report_startup_failure("config_invalid", &err);
            return EXIT_INVALID_CONFIG;
        }
    };
    if command == Command::All || command == Command::Backup {
        warn_unqueryable_sources(&config);
    }

    let _run_lock = match RunLock::acquire(&config.run_lock_path, &logging_context.run_id) {
        Ok(lock) => lock,
        Err(err) => {
            report_startup_failure("run_lock_unavailable", &StartupError::from(err));
            return EXIT_RUNTIME_ERROR;
        }
    };

    let pool = match connect_database(&config).await {
        Ok(pool) => pool,
        Err(err) => {
            report_startup_failure("database_unavailable", &StartupError::from(err));
            return EXIT_RUNTIME_ERROR;
        }
    };

    let http = match reqwest::Client::builder().timeout(HTTP_TIMEOUT).build() {
        Ok(http) => http,
        Err(err) => {
            report_startup_failure("http_client_build_failed", &err);
            return EXIT_RUNTIME_ERROR;
        }
    };

    let context = StepContext {
        config,
        pool,
        http,
        cancel: cancel.clone(),
    };

    let single = match command {
        Command::All => {
            let report = run_sequence(&ALL_STEPS, &cancel, |step| context.run_step(step)).await;
            info!(
                event = "sequence_completed",
                succeeded = report.succeeded.len(),
                failed = report.failed.len(),
                stopped_at = report.stopped_at.map(Step::as_str),
                cancelled = report.cancelled,
                "run finished"
            );
            return EXIT_OK;
        }
        Command::Backup => Step::Backup,
        Command::Ingest => Step::Ingest,
        Command::Reconcile => Step::Reconcile,
        Command::Push => Step::Push,
    };

    match context.run_step(single).await {
        Ok(()) => {
            info!(event = "run_completed", step = single.as_str());
            EXIT_OK
        }
        Err(StepError::Config(err)) => {
            report_startup_failure("config_invalid", &err);
            EXIT_INVALID_CONFIG
        }
        Err(err) => {
            report_startup_failure("step_failed", &err);
            EXIT_RUNTIME_ERROR
        }
    }
}
