//! Blocking packaging jobs.
//!
//! Compression and file splitting run on tokio's blocking pool. A job talks
//! back to the async side only through [`WorkerEvent`] messages; it never
//! touches shared state.

use std::io::Read;
use std::path::PathBuf;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::PackageEvent;
use crate::error::PackageError;

/// Progress is reported once per this many steps across the whole package.
const PROGRESS_STEPS: u64 = 20;

/// Messages sent from a blocking job to the coordinator side.
#[derive(Debug)]
pub(crate) enum WorkerEvent {
    Progress {
        done: u64,
        total: u64,
        current: String,
    },
    Finished(Vec<PathBuf>),
    Failed(PackageError),
}

/// Handle a blocking job uses to report progress and observe cancellation.
pub(crate) struct WorkerContext {
    events: mpsc::Sender<WorkerEvent>,
    cancel: CancellationToken,
    done: u64,
    total: u64,
    last_step: u64,
    current: String,
}

impl WorkerContext {
    /// Marks the start of a new input file; always reported.
    pub fn begin_item(&mut self, name: &str) {
        self.current = name.to_string();
        self.emit();
    }

    /// Adds processed bytes; reported only when a new 5% step is reached.
    pub fn advance(&mut self, bytes: u64) {
        self.done = self.done.saturating_add(bytes);
        let step = if self.total == 0 {
            PROGRESS_STEPS
        } else {
            (self.done.min(self.total) as u128 * PROGRESS_STEPS as u128 / self.total as u128) as u64
        };
        if step > self.last_step {
            self.last_step = step;
            self.emit();
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn check_cancelled(&self) -> Result<(), PackageError> {
        if self.cancel.is_cancelled() {
            Err(PackageError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn emit(&self) {
        let _ = self.events.blocking_send(WorkerEvent::Progress {
            done: self.done,
            total: self.total,
            current: self.current.clone(),
        });
    }
}

/// Reader that fails once the token is cancelled, so long copies stop promptly.
pub(crate) struct CancelAwareReader<R> {
    inner: R,
    cancel: CancellationToken,
}

impl<R> CancelAwareReader<R> {
    pub fn new(inner: R, cancel: CancellationToken) -> Self {
        Self { inner, cancel }
    }
}

impl<R: Read> Read for CancelAwareReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.cancel.is_cancelled() {
            return Err(std::io::Error::other("packaging cancelled"));
        }
        self.inner.read(buf)
    }
}

/// Byte offset of a job within the whole package, for overall progress.
#[derive(Debug, Clone, Copy)]
pub(crate) struct JobSpan {
    pub offset: u64,
    pub total: u64,
}

/// Runs `job` on the blocking pool, forwarding its progress as
/// [`PackageEvent`]s, and returns the paths it produced.
pub(crate) async fn run_blocking<F>(
    span: JobSpan,
    cancel: CancellationToken,
    forward: &mpsc::Sender<PackageEvent>,
    job: F,
) -> Result<Vec<PathBuf>, PackageError>
where
    F: FnOnce(&mut WorkerContext) -> Result<Vec<PathBuf>, PackageError> + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel(64);

    let handle = tokio::task::spawn_blocking(move || {
        let mut ctx = WorkerContext {
            events: tx,
            cancel,
            done: span.offset,
            total: span.total,
            last_step: 0,
            current: String::new(),
        };
        let event = match job(&mut ctx) {
            Ok(paths) => WorkerEvent::Finished(paths),
            Err(_) if ctx.cancel.is_cancelled() => WorkerEvent::Failed(PackageError::Cancelled),
            Err(e) => WorkerEvent::Failed(e),
        };
        let _ = ctx.events.blocking_send(event);
    });

    let mut outcome = None;
    while let Some(event) = rx.recv().await {
        match event {
            WorkerEvent::Progress {
                done,
                total,
                current,
            } => {
                let _ = forward
                    .send(PackageEvent::Progress {
                        done,
                        total,
                        current,
                    })
                    .await;
            }
            WorkerEvent::Finished(paths) => outcome = Some(Ok(paths)),
            WorkerEvent::Failed(e) => outcome = Some(Err(e)),
        }
    }

    handle
        .await
        .map_err(|e| PackageError::Worker(e.to_string()))?;

    outcome.unwrap_or_else(|| {
        debug!("packaging worker exited without reporting");
        Err(PackageError::Worker("worker exited without a result".into()))
    })
}
