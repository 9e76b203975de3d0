//! Per-request delivery state machine.
//!
//! A request moves `Idle → Acquiring → Planning → (Packaging) → Delivering →
//! Done`, or to `Failed` from any active state. Every request works inside
//! its own [`RequestWorkspace`], which is removed on every exit path.

use std::sync::Arc;

use courier_packager::{PackageEvent, Packager, PartitionPlan, Strategy, direct_units, plan};
use courier_protocol::{
    AcquiredPayload, ChatId, DeliveryUnit, MediaTool, MessagingTransport, Phase, TransferRequest,
    UnitKind,
};
use courier_transfer::{RateLimitedNotifier, format_size, render_progress};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::acquire::{AcquireContext, SourceAcquirer};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::workspace::RequestWorkspace;

const MAX_SKIPPED_LISTED: usize = 20;

/// Lifecycle state of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    Idle,
    Acquiring,
    Planning,
    Packaging,
    Delivering,
    Done,
    Failed,
}

/// Events emitted while requests run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryEvent {
    StateChanged { request: String, state: DeliveryState },
    UnitSent { request: String, index: usize, total: usize },
}

/// Summary of a successful delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub request: String,
    pub strategy: Strategy,
    pub units_sent: usize,
    pub bytes_sent: u64,
    /// Payload entries skipped during acquisition.
    pub skipped: Vec<String>,
}

/// Drives requests from acquisition through delivery.
pub struct DeliveryCoordinator {
    transport: Arc<dyn MessagingTransport>,
    acquirer: SourceAcquirer,
    media_tool: Option<Arc<dyn MediaTool>>,
    config: PipelineConfig,
    events_tx: mpsc::Sender<DeliveryEvent>,
    events_rx: Option<mpsc::Receiver<DeliveryEvent>>,
}

impl DeliveryCoordinator {
    pub fn new(
        transport: Arc<dyn MessagingTransport>,
        acquirer: SourceAcquirer,
        config: PipelineConfig,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(256);
        Self {
            transport,
            acquirer,
            media_tool: None,
            config,
            events_tx,
            events_rx: Some(events_rx),
        }
    }

    /// Enables playable segmentation of oversized media.
    pub fn with_media_tool(mut self, tool: Arc<dyn MediaTool>) -> Self {
        self.media_tool = Some(tool);
        self
    }

    /// Takes the event receiver. Can only be called once.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<DeliveryEvent>> {
        self.events_rx.take()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs `request` to completion.
    ///
    /// On failure the user gets exactly one error message in the chat and
    /// the error is returned for logging. The request workspace is removed
    /// before this returns, whatever the outcome.
    pub async fn run(
        &self,
        request: &TransferRequest,
        cancel: CancellationToken,
    ) -> Result<DeliveryReport, PipelineError> {
        let token = request.token();
        let chat = request.chat_id();
        let mut tracker = StateTracker::new(token, &self.events_tx);

        let status = match self.transport.send_text(chat, "⏳ Working on it...").await {
            Ok(id) => id,
            Err(e) => {
                tracker.enter(DeliveryState::Failed);
                error!(request = token, error = %e, "could not send status message");
                return Err(e.into());
            }
        };
        let notifier = RateLimitedNotifier::new(
            Arc::clone(&self.transport),
            chat,
            status,
            self.config.notifier.clone(),
        );

        let result = match RequestWorkspace::create(&self.config.scratch_root, token).await {
            Ok(workspace) => {
                let result = self
                    .execute(request, &workspace, &notifier, &cancel, &mut tracker)
                    .await;
                let dir = workspace.path().to_path_buf();
                if let Err(e) = workspace.cleanup().await {
                    warn!(request = token, dir = %dir.display(), error = %e, "failed to remove workspace");
                }
                result
            }
            Err(e) => Err(e.into()),
        };

        match result {
            Ok(report) => {
                tracker.enter(DeliveryState::Done);
                notifier
                    .announce(&format!(
                        "✅ Delivered {} part(s), {}",
                        report.units_sent,
                        format_size(report.bytes_sent)
                    ))
                    .await;
                if let Some(text) = skipped_report(&report.skipped)
                    && let Err(e) = self.transport.send_text(chat, &text).await
                {
                    warn!(request = token, error = %e, "could not send skipped-file report");
                }
                info!(
                    request = token,
                    strategy = ?report.strategy,
                    units = report.units_sent,
                    bytes = report.bytes_sent,
                    "request delivered"
                );
                Ok(report)
            }
            Err(e) => {
                let phase = tracker.state;
                tracker.enter(DeliveryState::Failed);
                match &e {
                    PipelineError::Cancelled => info!(request = token, ?phase, "request cancelled"),
                    _ => error!(request = token, ?phase, error = %e, "request failed"),
                }
                if let Err(te) = self.transport.send_text(chat, &e.user_message()).await {
                    warn!(request = token, error = %te, "could not send failure message");
                }
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        request: &TransferRequest,
        workspace: &RequestWorkspace,
        notifier: &RateLimitedNotifier,
        cancel: &CancellationToken,
        tracker: &mut StateTracker<'_>,
    ) -> Result<DeliveryReport, PipelineError> {
        let token = request.token();

        tracker.enter(DeliveryState::Acquiring);
        let source_dir = workspace.source_dir();
        let ctx = AcquireContext {
            token,
            dest: &source_dir,
            notifier,
            cancel,
        };
        let payload = self.acquirer.acquire(request, &ctx).await?;

        tracker.enter(DeliveryState::Planning);
        let plan = plan(&payload, &self.config.plan_options())?;
        info!(
            request = token,
            strategy = ?plan.strategy,
            groups = plan.groups.len(),
            bytes = plan.total_bytes(),
            "plan ready"
        );

        let units = if plan.strategy == Strategy::Direct {
            direct_units(&plan)
        } else {
            tracker.enter(DeliveryState::Packaging);
            self.package(&plan, &payload, workspace, notifier, cancel).await?
        };

        tracker.enter(DeliveryState::Delivering);
        let bytes_sent = self
            .deliver(request.chat_id(), token, &units, plan.unit_size_ceiling, notifier, cancel)
            .await?;

        Ok(DeliveryReport {
            request: token.to_string(),
            strategy: plan.strategy,
            units_sent: units.len(),
            bytes_sent,
            skipped: payload.skipped,
        })
    }

    async fn package(
        &self,
        plan: &PartitionPlan,
        payload: &AcquiredPayload,
        workspace: &RequestWorkspace,
        notifier: &RateLimitedNotifier,
        cancel: &CancellationToken,
    ) -> Result<Vec<DeliveryUnit>, PipelineError> {
        notifier
            .announce(&render_progress(Phase::Package, 0.0, &payload.title))
            .await;

        let mut packager = Packager::new(cancel.clone());
        if let Some(tool) = &self.media_tool {
            packager = packager.with_media_tool(Arc::clone(tool));
        }

        let out_dir = workspace.output_dir();
        let (tx, mut rx) = mpsc::channel(64);
        let work = packager.package(plan, &payload.title, &out_dir, tx);
        let forward = async {
            while let Some(PackageEvent::Progress {
                done,
                total,
                current,
            }) = rx.recv().await
            {
                let percent = if total > 0 {
                    done as f64 * 100.0 / total as f64
                } else {
                    0.0
                };
                let details = format!(
                    "🗂 {current}\n💾 {} / {}",
                    format_size(done),
                    format_size(total)
                );
                notifier.report(Phase::Package, percent, &details).await;
            }
        };

        let (units, ()) = tokio::join!(work, forward);
        Ok(units?)
    }

    async fn deliver(
        &self,
        chat: ChatId,
        token: &str,
        units: &[DeliveryUnit],
        ceiling: u64,
        notifier: &RateLimitedNotifier,
        cancel: &CancellationToken,
    ) -> Result<u64, PipelineError> {
        let total = units.len();
        let mut bytes_sent = 0u64;

        for unit in units {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }

            let size = tokio::fs::metadata(&unit.path).await?.len();
            if size > ceiling {
                return Err(PipelineError::Packaging(courier_packager::PackageError::Oversized {
                    path: unit.path.clone(),
                    size,
                    ceiling,
                }));
            }

            let percent = (unit.sequence_index - 1) as f64 * 100.0 / total as f64;
            let details = format!(
                "📎 {}\n📦 Part {} of {total} ({})",
                unit.caption,
                unit.sequence_index,
                format_size(size)
            );
            notifier.report(Phase::Upload, percent, &details).await;

            let send = async {
                match unit.kind {
                    UnitKind::Document => self.transport.send_document(chat, &unit.path, &unit.caption).await,
                    UnitKind::Video => self.transport.send_video(chat, &unit.path, &unit.caption).await,
                }
            };
            let sent = tokio::select! {
                _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                sent = send => sent,
            };

            if let Err(e) = sent {
                error!(
                    request = token,
                    part = unit.sequence_index,
                    total,
                    error = %e,
                    "unit delivery failed"
                );
                return Err(if total > 1 {
                    PipelineError::PartialDelivery {
                        part: unit.sequence_index,
                        total,
                        source: e,
                    }
                } else {
                    PipelineError::Transport(e)
                });
            }

            bytes_sent += size;
            let _ = self.events_tx.try_send(DeliveryEvent::UnitSent {
                request: token.to_string(),
                index: unit.sequence_index,
                total,
            });
            debug!(request = token, part = unit.sequence_index, total, bytes = size, "unit sent");

            if let Err(e) = tokio::fs::remove_file(&unit.path).await {
                warn!(request = token, path = %unit.path.display(), error = %e, "failed to remove sent unit");
            }
        }

        Ok(bytes_sent)
    }
}

/// Tracks the current state of one request and publishes transitions.
struct StateTracker<'a> {
    token: &'a str,
    state: DeliveryState,
    events: &'a mpsc::Sender<DeliveryEvent>,
}

impl<'a> StateTracker<'a> {
    fn new(token: &'a str, events: &'a mpsc::Sender<DeliveryEvent>) -> Self {
        Self {
            token,
            state: DeliveryState::Idle,
            events,
        }
    }

    fn enter(&mut self, state: DeliveryState) {
        debug!(request = self.token, from = ?self.state, to = ?state, "state change");
        self.state = state;
        let _ = self.events.try_send(DeliveryEvent::StateChanged {
            request: self.token.to_string(),
            state,
        });
    }
}

fn skipped_report(skipped: &[String]) -> Option<String> {
    if skipped.is_empty() {
        return None;
    }
    let mut text = format!("⚠️ Skipped {} file(s):", skipped.len());
    for name in skipped.iter().take(MAX_SKIPPED_LISTED) {
        text.push_str("\n• ");
        text.push_str(name);
    }
    if skipped.len() > MAX_SKIPPED_LISTED {
        text.push_str(&format!("\n… and {} more", skipped.len() - MAX_SKIPPED_LISTED));
    }
    Some(text)
}
