//! Wires the pipeline to concrete services and runs one request.

use std::path::PathBuf;
use std::sync::Arc;

use courier_pipeline::{
    DeliveryCoordinator, DeliveryEvent, DeliveryReport, Intake, SessionStore, SourceAcquirer,
};
use courier_protocol::{ChatId, SourceKind};
use courier_services::{Ffmpeg, HttpFetcher, QbitClient, YtDlp};

use crate::config::AppConfig;
use crate::transport::ConsoleTransport;

/// One invocation of the runner.
pub struct Invocation {
    pub source: String,
    pub kind: Option<SourceKind>,
    pub out_dir: PathBuf,
    pub chat: ChatId,
}

/// Builds the acquirer for every source kind the configuration enables.
fn build_acquirer(config: &AppConfig) -> anyhow::Result<SourceAcquirer> {
    let acquire = &config.pipeline.acquire;
    let mut acquirer = SourceAcquirer::new()
        .with_fetcher(Arc::new(HttpFetcher::new()?), acquire)
        .with_resolver(Arc::new(YtDlp::new(&config.tools.yt_dlp)));

    let qbit = &config.qbittorrent;
    if qbit.enabled {
        let client = QbitClient::new(&qbit.base_url, &qbit.username, &qbit.password)?;
        acquirer = acquirer.with_torrent_daemon(Arc::new(client), acquire);
    }
    Ok(acquirer)
}

/// Runs `invocation` until it is delivered, fails, or is cancelled with Ctrl-C.
pub async fn run(config: AppConfig, invocation: Invocation) -> anyhow::Result<DeliveryReport> {
    let sessions = Arc::new(SessionStore::default());
    let intake = Intake::new(&config.pipeline.acquire.streaming_domains)?;

    // A kind flag behaves like the bot's /torrent or /youtube command
    // followed by the locator message.
    if let Some(kind) = invocation.kind {
        sessions.begin_awaiting(invocation.chat, kind);
    }
    let hint = sessions.take_awaiting(invocation.chat);
    let request = intake.request(&invocation.source, hint, invocation.chat)?;
    tracing::info!(
        request = request.token(),
        source = %request.source(),
        "request accepted"
    );

    let transport = Arc::new(ConsoleTransport::new(&invocation.out_dir));
    let acquirer = build_acquirer(&config)?;
    let media_tool = Arc::new(Ffmpeg::new(&config.tools.ffmpeg, &config.tools.ffprobe));
    let mut coordinator =
        DeliveryCoordinator::new(transport, acquirer, config.pipeline).with_media_tool(media_tool);

    if let Some(mut events) = coordinator.take_events() {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    DeliveryEvent::StateChanged { request, state } => {
                        tracing::debug!(request = %request, ?state, "state changed");
                    }
                    DeliveryEvent::UnitSent {
                        request,
                        index,
                        total,
                    } => {
                        tracing::debug!(request = %request, index, total, "unit sent");
                    }
                }
            }
        });
    }

    let cancel = sessions.register_active(&request);
    let chat = invocation.chat;
    let interrupt = Arc::clone(&sessions);
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let outcome = interrupt.cancel_chat(chat);
            tracing::warn!(cancelled = outcome.cancelled_requests, "interrupted, cancelling");
        }
    });

    let result = coordinator.run(&request, cancel).await;
    sessions.finish(request.token());
    watcher.abort();

    Ok(result?)
}
