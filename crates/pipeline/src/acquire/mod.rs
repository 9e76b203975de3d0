//! Source acquisition.
//!
//! One [`Acquire`] implementation per source kind; [`SourceAcquirer`]
//! dispatches a request to the one matching its kind. Acquirers write into
//! the request's workspace and report download progress through the
//! request's notifier.

mod direct;
mod streaming;
mod torrent;

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use courier_protocol::{
    AcquiredPayload, Fetcher, MediaResolver, Phase, ProgressFn, SourceKind, TorrentDaemon,
    TransferRequest,
};
use courier_transfer::{
    RateLimitedNotifier, SpeedCalculator, format_duration, format_size, format_speed,
};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::AcquireConfig;
use crate::error::AcquisitionError;

pub use direct::DirectSource;
pub use streaming::StreamingSource;
pub use torrent::TorrentSource;

/// Boxed future returned by [`Acquire::acquire`].
pub type AcquireFuture<'a> =
    Pin<Box<dyn Future<Output = Result<AcquiredPayload, AcquisitionError>> + Send + 'a>>;

/// Request-scoped handles an acquirer works with.
pub struct AcquireContext<'a> {
    /// Request token, for log correlation.
    pub token: &'a str,
    /// Directory the payload is written into. Owned by the request.
    pub dest: &'a Path,
    pub notifier: &'a RateLimitedNotifier,
    /// Request cancellation. Acquirers stop at their next suspension point.
    pub cancel: &'a CancellationToken,
}

/// Acquires the payload behind one kind of locator.
pub trait Acquire: Send + Sync {
    fn acquire<'a>(&'a self, locator: &'a str, ctx: &'a AcquireContext<'a>) -> AcquireFuture<'a>;
}

/// Dispatches requests to the acquirer for their source kind.
#[derive(Default)]
pub struct SourceAcquirer {
    direct: Option<Box<dyn Acquire>>,
    streaming: Option<Box<dyn Acquire>>,
    torrent: Option<Box<dyn Acquire>>,
}

impl SourceAcquirer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables direct URLs.
    pub fn with_fetcher(mut self, fetcher: Arc<dyn Fetcher>, config: &AcquireConfig) -> Self {
        self.direct = Some(Box::new(DirectSource::new(fetcher, config)));
        self
    }

    /// Enables streaming-site URLs.
    pub fn with_resolver(mut self, resolver: Arc<dyn MediaResolver>) -> Self {
        self.streaming = Some(Box::new(StreamingSource::new(resolver)));
        self
    }

    /// Enables magnet links.
    pub fn with_torrent_daemon(mut self, daemon: Arc<dyn TorrentDaemon>, config: &AcquireConfig) -> Self {
        self.torrent = Some(Box::new(TorrentSource::new(daemon, config)));
        self
    }

    /// Acquires the payload of `request` into `ctx.dest`.
    pub async fn acquire(
        &self,
        request: &TransferRequest,
        ctx: &AcquireContext<'_>,
    ) -> Result<AcquiredPayload, AcquisitionError> {
        let kind = request.source();
        let source = match kind {
            SourceKind::DirectUrl => self.direct.as_deref(),
            SourceKind::StreamingUrl => self.streaming.as_deref(),
            SourceKind::TorrentMagnet => self.torrent.as_deref(),
        }
        .ok_or_else(|| AcquisitionError::invalid(format!("{kind} sources are not enabled")))?;

        debug!(request = ctx.token, source = %kind, "acquiring");
        let payload = source.acquire(request.locator(), ctx).await?;
        info!(
            request = ctx.token,
            source = %kind,
            items = payload.items.len(),
            bytes = payload.total_size_bytes,
            skipped = payload.skipped.len(),
            "payload acquired"
        );
        Ok(payload)
    }
}

/// Runs `work` with a byte-progress callback whose updates are forwarded to
/// `notifier` as download progress.
///
/// The callback only stores the latest value; a separate reporter drains it,
/// so slow or throttled edits never stall the transfer itself.
pub(crate) async fn with_byte_progress<T, F, Fut>(notifier: &RateLimitedNotifier, work: F) -> T
where
    F: FnOnce(ProgressFn) -> Fut,
    Fut: Future<Output = T>,
{
    let (tx, mut rx) = watch::channel((0u64, None::<u64>));
    let progress: ProgressFn = Arc::new(move |done, total| {
        tx.send_replace((done, total));
    });

    let finished = CancellationToken::new();
    let run = async {
        let out = work(progress).await;
        finished.cancel();
        out
    };
    let report = async {
        tokio::select! {
            _ = finished.cancelled() => {}
            _ = forward_progress(&mut rx, notifier) => {}
        }
    };

    let (out, ()) = tokio::join!(run, report);
    out
}

async fn forward_progress(rx: &mut watch::Receiver<(u64, Option<u64>)>, notifier: &RateLimitedNotifier) {
    let mut speed = SpeedCalculator::default();
    while rx.changed().await.is_ok() {
        let (done, total) = *rx.borrow_and_update();
        speed.record(done);
        let percent = match total {
            Some(t) if t > 0 => (done as f64 * 100.0 / t as f64).min(100.0),
            _ => 0.0,
        };
        notifier
            .report(Phase::Download, percent, &byte_details(done, total, &speed))
            .await;
    }
}

fn byte_details(done: u64, total: Option<u64>, speed: &SpeedCalculator) -> String {
    let rate = format_speed(speed.bytes_per_second());
    match total {
        Some(total) => {
            let eta = speed
                .eta(total.saturating_sub(done))
                .map(format_duration)
                .unwrap_or_else(|| "?".into());
            format!(
                "💾 {} / {}\n⚡ Speed: {rate}\n⏱ ETA: {eta}",
                format_size(done),
                format_size(total)
            )
        }
        None => format!("💾 {}\n⚡ Speed: {rate}", format_size(done)),
    }
}

/// Resolves to a cancellation error as soon as `cancel` fires.
pub(crate) async fn or_cancelled<T>(
    cancel: &CancellationToken,
    work: impl Future<Output = Result<T, AcquisitionError>>,
) -> Result<T, AcquisitionError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(AcquisitionError::cancelled()),
        out = work => out,
    }
}

/// Sleeps for `ms` milliseconds.
pub(crate) async fn pause_ms(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}
