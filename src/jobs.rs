//! Background jobs for catalog download and bulk file import.
//!
//! Long-running ingestion is offloaded so interactive handlers stay
//! responsive. The contract: at most one job per kind at a time (a second
//! request is rejected, not queued, because both would race on the same
//! store), coarse three-stage progress, cooperative cancellation checked
//! between stages, and exactly one completion event published back to the
//! orchestration loop. Because the persist stage is a single transaction,
//! cancellation or failure always leaves the store in its pre-job or
//! fully-post-job state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::download::{self, SearchField};
use crate::error::TrackerError;
use crate::registry;
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    Download,
    Import,
}

impl JobKind {
    pub fn label(&self) -> &'static str {
        match self {
            JobKind::Download => "download",
            JobKind::Import => "import",
        }
    }
}

/// The three coarse stages every ingestion job reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetch,
    Transform,
    Persist,
}

#[derive(Debug, Clone, Copy)]
pub struct Progress {
    pub stage: Stage,
    pub stages_done: u32,
    pub stages_total: u32,
}

impl Progress {
    fn at(stage: Stage, stages_done: u32) -> Self {
        Progress {
            stage,
            stages_done,
            stages_total: 3,
        }
    }
}

/// Terminal result of a job, consumed by the orchestration loop
#[derive(Debug)]
pub enum JobOutcome {
    Completed { kind: JobKind, count: usize },
    Failed { kind: JobKind, message: String },
    Cancelled { kind: JobKind },
}

/// Caller-side handle: progress observation and cancellation
pub struct JobHandle {
    kind: JobKind,
    cancel: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
    pub progress: watch::Receiver<Progress>,
}

impl JobHandle {
    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }
}

struct JobSlot {
    cancel: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
}

/// Tracks the single allowed in-flight job per kind
pub struct JobManager {
    slots: HashMap<JobKind, JobSlot>,
}

impl JobManager {
    pub fn new() -> Self {
        JobManager {
            slots: HashMap::new(),
        }
    }

    pub fn is_running(&self, kind: JobKind) -> bool {
        self.slots
            .get(&kind)
            .map(|slot| !slot.finished.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    pub(crate) fn try_claim(
        &mut self,
        kind: JobKind,
    ) -> Result<(Arc<AtomicBool>, Arc<AtomicBool>), TrackerError> {
        if self.is_running(kind) {
            return Err(TrackerError::Busy(kind.label()));
        }
        let cancel = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));
        self.slots.insert(
            kind,
            JobSlot {
                cancel: Arc::clone(&cancel),
                finished: Arc::clone(&finished),
            },
        );
        Ok((cancel, finished))
    }

    /// Spawn a catalog download feeding the shared ingestion pipeline.
    /// The search term is validated before the slot is claimed or any
    /// request is made.
    pub fn start_download(
        &mut self,
        base_url: String,
        field: SearchField,
        term: String,
        db_path: String,
        outcome_tx: mpsc::UnboundedSender<JobOutcome>,
    ) -> Result<JobHandle, TrackerError> {
        download::validate_term(&term)?;
        let (cancel, finished) = self.try_claim(JobKind::Download)?;
        let (progress_tx, progress_rx) = watch::channel(Progress::at(Stage::Fetch, 0));

        let handle = JobHandle {
            kind: JobKind::Download,
            cancel: Arc::clone(&cancel),
            finished: Arc::clone(&finished),
            progress: progress_rx,
        };

        tokio::spawn(async move {
            let outcome = run_download(&base_url, field, &term, &db_path, &cancel, &progress_tx)
                .await;
            finished.store(true, Ordering::SeqCst);
            if outcome_tx.send(outcome).is_err() {
                warn!("job outcome channel closed before delivery");
            }
        });

        Ok(handle)
    }

    /// Spawn a bulk file import through the same pipeline.
    pub fn start_import(
        &mut self,
        file_path: String,
        db_path: String,
        outcome_tx: mpsc::UnboundedSender<JobOutcome>,
    ) -> Result<JobHandle, TrackerError> {
        let (cancel, finished) = self.try_claim(JobKind::Import)?;
        let (progress_tx, progress_rx) = watch::channel(Progress::at(Stage::Fetch, 0));

        let handle = JobHandle {
            kind: JobKind::Import,
            cancel: Arc::clone(&cancel),
            finished: Arc::clone(&finished),
            progress: progress_rx,
        };

        tokio::spawn(async move {
            let outcome = run_import(&file_path, &db_path, &cancel, &progress_tx).await;
            finished.store(true, Ordering::SeqCst);
            if outcome_tx.send(outcome).is_err() {
                warn!("job outcome channel closed before delivery");
            }
        });

        Ok(handle)
    }
}

impl Default for JobManager {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_download(
    base_url: &str,
    field: SearchField,
    term: &str,
    db_path: &str,
    cancel: &Arc<AtomicBool>,
    progress: &watch::Sender<Progress>,
) -> JobOutcome {
    let kind = JobKind::Download;

    let text = match download::fetch_tle(base_url, field, term).await {
        Ok(text) => text,
        Err(e) => return failed(kind, e),
    };
    let _ = progress.send(Progress::at(Stage::Transform, 1));

    finish_ingestion(kind, text, db_path, cancel, progress).await
}

async fn run_import(
    file_path: &str,
    db_path: &str,
    cancel: &Arc<AtomicBool>,
    progress: &watch::Sender<Progress>,
) -> JobOutcome {
    let kind = JobKind::Import;

    let text = match tokio::fs::read_to_string(file_path).await {
        Ok(text) => text,
        Err(e) => {
            return failed(
                kind,
                TrackerError::Validation(format!("error reading file {}: {}", file_path, e)),
            )
        }
    };
    let _ = progress.send(Progress::at(Stage::Transform, 1));

    finish_ingestion(kind, text, db_path, cancel, progress).await
}

/// Shared transform + persist tail of both ingestion jobs
async fn finish_ingestion(
    kind: JobKind,
    text: String,
    db_path: &str,
    cancel: &Arc<AtomicBool>,
    progress: &watch::Sender<Progress>,
) -> JobOutcome {
    if cancel.load(Ordering::SeqCst) {
        return cancelled(kind);
    }

    let records = match registry::records_from_text(&text, Utc::now()) {
        Ok(records) => records,
        Err(e) => return failed(kind, e),
    };
    let _ = progress.send(Progress::at(Stage::Persist, 2));

    if cancel.load(Ordering::SeqCst) {
        return cancelled(kind);
    }

    // A background task cannot share the interactive store handle, so the
    // persist stage opens its own connection against the same database.
    let db_path = db_path.to_string();
    let persisted = tokio::task::spawn_blocking(move || -> Result<usize, TrackerError> {
        let mut store = Store::open(&db_path)?;
        store.upsert_batch(&records)
    })
    .await;

    let count = match persisted {
        Ok(Ok(count)) => count,
        Ok(Err(e)) => return failed(kind, e),
        Err(e) => return failed(kind, TrackerError::Storage(format!("persist task: {}", e))),
    };
    let _ = progress.send(Progress::at(Stage::Persist, 3));

    info!("{} job complete: {} records", kind.label(), count);
    JobOutcome::Completed { kind, count }
}

fn failed(kind: JobKind, error: TrackerError) -> JobOutcome {
    warn!("{} job failed: {}", kind.label(), error);
    JobOutcome::Failed {
        kind,
        message: error.to_string(),
    }
}

fn cancelled(kind: JobKind) -> JobOutcome {
    info!("{} job cancelled", kind.label());
    JobOutcome::Cancelled { kind }
}
