use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use courier_protocol::{
    AcquiredPayload, PayloadItem, Phase, TorrentDaemon, TorrentFile, TorrentFilter, TorrentInfo,
    parse_info_hash,
};
use courier_transfer::{copy_with_progress, format_size, format_speed, validate_relative_path};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Acquire, AcquireContext, AcquireFuture, or_cancelled, pause_ms};
use crate::config::AcquireConfig;
use crate::error::{AcquisitionError, AcquisitionErrorKind};

/// Magnet links through a torrent daemon.
///
/// The daemon does the peer-to-peer work; this source adds the magnet, polls
/// until the torrent completes and copies the finished files into the
/// request workspace.
pub struct TorrentSource {
    daemon: Arc<dyn TorrentDaemon>,
    config: AcquireConfig,
}

impl TorrentSource {
    pub fn new(daemon: Arc<dyn TorrentDaemon>, config: &AcquireConfig) -> Self {
        Self {
            daemon,
            config: config.clone(),
        }
    }

    async fn download(&self, magnet: &str, ctx: &AcquireContext<'_>) -> Result<AcquiredPayload, AcquisitionError> {
        let hash = parse_info_hash(magnet)
            .ok_or_else(|| AcquisitionError::invalid("the magnet link has no valid xt=urn:btih: hash"))?;

        let finished = or_cancelled(ctx.cancel, self.add_and_wait(magnet, &hash, ctx)).await?;

        ctx.notifier.announce("✅ Download complete! Collecting files...").await;
        let files = self.daemon.list_files(&hash).await?;
        let payload = self.collect(&finished, files, ctx).await?;

        if self.config.remove_torrent_after_copy
            && let Err(e) = self.daemon.delete_torrent(&hash, true).await
        {
            warn!(request = ctx.token, hash = %hash, error = %e, "failed to remove torrent from daemon");
        }
        Ok(payload)
    }

    async fn add_and_wait(
        &self,
        magnet: &str,
        hash: &str,
        ctx: &AcquireContext<'_>,
    ) -> Result<TorrentInfo, AcquisitionError> {
        ctx.notifier.announce("🔍 Adding torrent...").await;
        self.daemon
            .add_magnet(magnet, self.config.daemon_save_path.as_deref())
            .await?;

        let added = self.lookup(hash).await?;
        info!(request = ctx.token, hash, name = %added.name, "torrent added");
        ctx.notifier
            .announce(&format!(
                "✅ Torrent added!\n📥 Name: {}\n💾 Size: {}\n⏳ Starting download...",
                added.name,
                format_size(added.size_bytes)
            ))
            .await;

        let limit = Duration::from_secs(self.config.torrent_timeout_secs);
        tokio::time::timeout(limit, self.wait_for_completion(hash, ctx))
            .await
            .map_err(|_| {
                AcquisitionError::new(
                    AcquisitionErrorKind::SourceTimeout,
                    format!("torrent did not finish within {}s", limit.as_secs()),
                )
            })?
    }

    /// Finds a just-added torrent, which the daemon may list only after a delay.
    async fn lookup(&self, hash: &str) -> Result<TorrentInfo, AcquisitionError> {
        let filter = TorrentFilter::by_hash(hash);
        let attempts = self.config.torrent_lookup_retries.max(1);
        for attempt in 1..=attempts {
            if let Some(found) = find(self.daemon.list_torrents(&filter).await?, hash) {
                return Ok(found);
            }
            debug!(hash, attempt, "torrent not listed yet");
            if attempt < attempts {
                pause_ms(self.config.torrent_lookup_delay_ms).await;
            }
        }
        Err(AcquisitionError::not_found(
            "the torrent was added but does not show up in the daemon's list; it may still be processing",
        ))
    }

    async fn wait_for_completion(&self, hash: &str, ctx: &AcquireContext<'_>) -> Result<TorrentInfo, AcquisitionError> {
        let filter = TorrentFilter::by_hash(hash);
        let mut ticker = tokio::time::interval(Duration::from_millis(self.config.torrent_poll_interval_ms.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let Some(torrent) = find(self.daemon.list_torrents(&filter).await?, hash) else {
                return Err(AcquisitionError::not_found("the torrent was removed from the daemon"));
            };

            ctx.notifier
                .report(Phase::Download, torrent.progress * 100.0, &torrent_details(&torrent))
                .await;

            if torrent.is_complete() {
                info!(request = ctx.token, hash, "torrent complete");
                return Ok(torrent);
            }
        }
    }

    async fn collect(
        &self,
        torrent: &TorrentInfo,
        files: Vec<TorrentFile>,
        ctx: &AcquireContext<'_>,
    ) -> Result<AcquiredPayload, AcquisitionError> {
        let root = self
            .config
            .local_download_root
            .clone()
            .unwrap_or_else(|| PathBuf::from(&torrent.save_path));
        let dest = ctx.dest.to_path_buf();
        let token = ctx.token.to_string();
        let cancel = ctx.cancel.clone();

        // Awaited to the end even when cancelled, so nothing writes into the
        // workspace after this returns.
        let (items, skipped) =
            tokio::task::spawn_blocking(move || copy_files(&root, &dest, &files, &token, &cancel))
            .await
            .map_err(|e| AcquisitionError::new(AcquisitionErrorKind::NetworkFailure, e.to_string()))??;

        if items.is_empty() {
            return Err(AcquisitionError::not_found(
                "none of the torrent's files could be read",
            ));
        }

        let mut payload = AcquiredPayload::new(torrent.name.clone(), items, ctx.dest.to_path_buf());
        payload.skipped = skipped;
        Ok(payload)
    }
}

impl Acquire for TorrentSource {
    fn acquire<'a>(&'a self, locator: &'a str, ctx: &'a AcquireContext<'a>) -> AcquireFuture<'a> {
        Box::pin(self.download(locator, ctx))
    }
}

fn find(torrents: Vec<TorrentInfo>, hash: &str) -> Option<TorrentInfo> {
    torrents.into_iter().find(|t| t.hash.eq_ignore_ascii_case(hash))
}

fn torrent_details(t: &TorrentInfo) -> String {
    format!(
        "{}\n⚡ Speed: {}\n💾 Size: {}\n🌱 Seeds: {}\n👥 Peers: {}\n📊 Status: {}",
        t.name,
        format_speed(t.download_speed_bps as f64),
        format_size(t.size_bytes),
        t.num_seeds,
        t.num_peers,
        t.state
    )
}

/// Copies the torrent's files from `root` into `dest`, keeping their relative
/// layout. Unreadable or unsafe entries are skipped and returned by name.
fn copy_files(
    root: &Path,
    dest: &Path,
    files: &[TorrentFile],
    token: &str,
    cancel: &CancellationToken,
) -> Result<(Vec<PayloadItem>, Vec<String>), AcquisitionError> {
    let mut items = Vec::new();
    let mut skipped = Vec::new();

    for file in files {
        if cancel.is_cancelled() {
            return Err(AcquisitionError::cancelled());
        }
        if let Err(e) = validate_relative_path(&file.name) {
            warn!(request = token, file = %file.name, error = %e, "skipping unsafe torrent path");
            skipped.push(file.name.clone());
            continue;
        }

        let source = root.join(&file.name);
        let mut reader = match File::open(&source).and_then(|f| f.metadata().map(|m| (f, m))) {
            Ok((f, meta)) if meta.is_file() => f,
            Ok(_) => {
                warn!(request = token, file = %source.display(), "not a regular file, skipping");
                skipped.push(file.name.clone());
                continue;
            }
            Err(e) => {
                warn!(request = token, file = %source.display(), error = %e, "cannot read torrent file, skipping");
                skipped.push(file.name.clone());
                continue;
            }
        };

        let target = dest.join(&file.name);
        let copied = copy_one(&mut reader, &target).map_err(|e| {
            AcquisitionError::new(
                AcquisitionErrorKind::NetworkFailure,
                format!("copying {} failed: {e}", file.name),
            )
        })?;
        debug!(request = token, file = %file.name, bytes = copied, "copied");
        items.push(PayloadItem::new(target, file.name.clone(), copied));
    }

    Ok((items, skipped))
}

fn copy_one(reader: &mut File, target: &Path) -> std::io::Result<u64> {
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut out = BufWriter::new(File::create(target)?);
    let copied = copy_with_progress(reader, &mut out, u64::MAX, &mut |_| {})?;
    out.into_inner().map_err(|e| e.into_error())?.sync_all()?;
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockDaemon, RecordingTransport, torrent};
    use courier_protocol::{MessageId, ServiceError};
    use courier_transfer::{NotifierConfig, RateLimitedNotifier};
    use tokio_util::sync::CancellationToken;

    const HASH: &str = "abcdef0123456789abcdef0123456789abcdef01";
    const MAGNET: &str = "magnet:?xt=urn:btih:ABCDEF0123456789ABCDEF0123456789ABCDEF01&dn=Show";

    fn config(root: &Path) -> AcquireConfig {
        AcquireConfig {
            local_download_root: Some(root.to_path_buf()),
            ..AcquireConfig::default()
        }
    }

    fn seed_files(root: &Path) -> Vec<TorrentFile> {
        std::fs::create_dir_all(root.join("Show")).unwrap();
        std::fs::write(root.join("Show/e1.mkv"), vec![1u8; 300]).unwrap();
        std::fs::write(root.join("Show/e2.mkv"), vec![2u8; 200]).unwrap();
        vec![
            TorrentFile {
                name: "Show/e1.mkv".into(),
                size_bytes: 300,
                progress: 1.0,
            },
            TorrentFile {
                name: "Show/e2.mkv".into(),
                size_bytes: 200,
                progress: 1.0,
            },
        ]
    }

    #[tokio::test(start_paused = true)]
    async fn polls_until_complete_then_copies_and_removes() {
        let daemon_root = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        let files = seed_files(daemon_root.path());

        let daemon = MockDaemon::new(
            vec![
                vec![],
                vec![torrent(HASH, 0.0)],
                vec![torrent(HASH, 0.4)],
                vec![torrent(HASH, 1.0)],
            ],
            files,
        );
        let source = TorrentSource::new(daemon.clone(), &config(daemon_root.path()));
        let transport = RecordingTransport::new();
        let n = RateLimitedNotifier::new(transport.clone(), 1, MessageId(1), NotifierConfig::default());
        let ctx = AcquireContext {
            token: "t",
            dest: dest.path(),
            notifier: &n,
            cancel: &CancellationToken::new(),
        };

        let payload = source.download(MAGNET, &ctx).await.unwrap();

        assert_eq!(payload.title, "Some Torrent");
        assert_eq!(payload.items.len(), 2);
        assert_eq!(payload.total_size_bytes, 500);
        assert!(dest.path().join("Show/e1.mkv").is_file());
        assert!(payload.skipped.is_empty());

        assert_eq!(daemon.added(), vec![MAGNET.to_string()]);
        assert_eq!(daemon.deleted(), vec![(HASH.to_string(), true)]);
        assert!(transport.edits().iter().any(|e| e.contains("🌱 Seeds: 5")));
    }

    #[tokio::test(start_paused = true)]
    async fn unreadable_files_are_skipped_not_fatal() {
        let daemon_root = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        let mut files = seed_files(daemon_root.path());
        files.push(TorrentFile {
            name: "Show/missing.nfo".into(),
            size_bytes: 10,
            progress: 1.0,
        });
        files.push(TorrentFile {
            name: "../escape.txt".into(),
            size_bytes: 10,
            progress: 1.0,
        });

        let daemon = MockDaemon::new(vec![vec![torrent(HASH, 1.0)]], files);
        let source = TorrentSource::new(daemon, &config(daemon_root.path()));
        let transport = RecordingTransport::new();
        let n = RateLimitedNotifier::new(transport, 1, MessageId(1), NotifierConfig::default());
        let ctx = AcquireContext {
            token: "t",
            dest: dest.path(),
            notifier: &n,
            cancel: &CancellationToken::new(),
        };

        let payload = source.download(MAGNET, &ctx).await.unwrap();
        assert_eq!(payload.items.len(), 2);
        assert_eq!(payload.skipped, vec!["Show/missing.nfo".to_string(), "../escape.txt".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn never_listed_is_not_found_after_retries() {
        let dest = tempfile::tempdir().unwrap();
        let daemon = MockDaemon::new(vec![vec![], vec![], vec![]], vec![]);
        let source = TorrentSource::new(daemon.clone(), &AcquireConfig::default());
        let transport = RecordingTransport::new();
        let n = RateLimitedNotifier::new(transport, 1, MessageId(1), NotifierConfig::default());
        let ctx = AcquireContext {
            token: "t",
            dest: dest.path(),
            notifier: &n,
            cancel: &CancellationToken::new(),
        };

        let start = tokio::time::Instant::now();
        let err = source.download(MAGNET, &ctx).await.unwrap_err();
        assert_eq!(err.kind, AcquisitionErrorKind::NotFound);
        assert_eq!(daemon.list_calls(), 3);
        assert!(start.elapsed() >= Duration::from_secs(4));
        assert!(daemon.deleted().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn missing_hash_is_invalid() {
        let dest = tempfile::tempdir().unwrap();
        let daemon = MockDaemon::new(vec![], vec![]);
        let source = TorrentSource::new(daemon.clone(), &AcquireConfig::default());
        let transport = RecordingTransport::new();
        let n = RateLimitedNotifier::new(transport, 1, MessageId(1), NotifierConfig::default());
        let ctx = AcquireContext {
            token: "t",
            dest: dest.path(),
            notifier: &n,
            cancel: &CancellationToken::new(),
        };

        let err = source.download("magnet:?dn=nohash", &ctx).await.unwrap_err();
        assert_eq!(err.kind, AcquisitionErrorKind::InvalidSource);
        assert!(daemon.added().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_torrent_times_out() {
        let dest = tempfile::tempdir().unwrap();
        let daemon = MockDaemon::new(vec![vec![torrent(HASH, 0.1)]], vec![]);
        let cfg = AcquireConfig {
            torrent_timeout_secs: 60,
            ..AcquireConfig::default()
        };
        let source = TorrentSource::new(daemon, &cfg);
        let transport = RecordingTransport::new();
        let n = RateLimitedNotifier::new(transport, 1, MessageId(1), NotifierConfig::default());
        let ctx = AcquireContext {
            token: "t",
            dest: dest.path(),
            notifier: &n,
            cancel: &CancellationToken::new(),
        };

        let err = source.download(MAGNET, &ctx).await.unwrap_err();
        assert_eq!(err.kind, AcquisitionErrorKind::SourceTimeout);
    }

    #[tokio::test(start_paused = true)]
    async fn daemon_errors_surface_as_acquisition_errors() {
        let dest = tempfile::tempdir().unwrap();
        let daemon = MockDaemon::new(vec![], vec![]);
        daemon.fail_add(ServiceError::Unauthorized);
        let source = TorrentSource::new(daemon, &AcquireConfig::default());
        let transport = RecordingTransport::new();
        let n = RateLimitedNotifier::new(transport, 1, MessageId(1), NotifierConfig::default());
        let ctx = AcquireContext {
            token: "t",
            dest: dest.path(),
            notifier: &n,
            cancel: &CancellationToken::new(),
        };

        let err = source.download(MAGNET, &ctx).await.unwrap_err();
        assert_eq!(err.kind, AcquisitionErrorKind::NetworkFailure);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_polling() {
        let dest = tempfile::tempdir().unwrap();
        let daemon = MockDaemon::new(vec![vec![torrent(HASH, 0.1)]], vec![]);
        let source = TorrentSource::new(daemon.clone(), &AcquireConfig::default());
        let transport = RecordingTransport::new();
        let n = RateLimitedNotifier::new(transport, 1, MessageId(1), NotifierConfig::default());
        let cancel = CancellationToken::new();
        let ctx = AcquireContext {
            token: "t",
            dest: dest.path(),
            notifier: &n,
            cancel: &cancel,
        };

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            trigger.cancel();
        });

        let err = source.download(MAGNET, &ctx).await.unwrap_err();
        assert_eq!(err.kind, AcquisitionErrorKind::Cancelled);
        assert!(daemon.deleted().is_empty());
    }
}
