//! Courier command-line runner.
//!
//! Runs one transfer request end to end: the source is acquired, packaged
//! under the attachment ceiling and "delivered" by copying every unit into
//! the output directory.

mod app;
mod config;
mod transport;

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use courier_protocol::SourceKind;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "courier-cli", version, about = "Fetch a URL or magnet link and deliver it in size-bounded parts")]
struct Args {
    /// URL or magnet link.
    source: String,

    /// Treat the source as this kind instead of guessing from it.
    #[arg(long, value_enum)]
    kind: Option<KindArg>,

    /// Configuration file (defaults to the per-user location).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory receiving the delivered parts.
    #[arg(long, default_value = ".")]
    out: PathBuf,

    /// Chat id used in logs and messages.
    #[arg(long, default_value_t = 0)]
    chat: i64,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum KindArg {
    Direct,
    Streaming,
    Torrent,
}

impl From<KindArg> for SourceKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Direct => SourceKind::DirectUrl,
            KindArg::Streaming => SourceKind::StreamingUrl,
            KindArg::Torrent => SourceKind::TorrentMagnet,
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting courier");

    let config = config::AppConfig::load(args.config.as_deref())?;

    let invocation = app::Invocation {
        source: args.source,
        kind: args.kind.map(SourceKind::from),
        out_dir: args.out,
        chat: args.chat,
    };

    let rt = tokio::runtime::Runtime::new()?;
    let report = rt.block_on(app::run(config, invocation))?;

    tracing::info!(
        units = report.units_sent,
        bytes = report.bytes_sent,
        skipped = report.skipped.len(),
        "delivery finished"
    );
    Ok(())
}
