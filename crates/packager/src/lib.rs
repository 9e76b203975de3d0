//! Partition planning and packaging.
//!
//! [`planner::plan`] decides how an acquired payload is cut into units that
//! each fit under the transport's attachment ceiling; [`Packager`] carries
//! the plan out on disk. CPU-heavy steps (compression, splitting) run on the
//! blocking pool and report back through typed events.
//!
//! # Strategies
//!
//! - **Direct**: the single file is sent unchanged
//! - **SplitRaw**: byte-range parts `name.001`, `name.002`, ...
//! - **ArchiveSingle / ArchiveMultiVolume**: streamed Deflate ZIPs, one per group
//! - **TranscodeSegment**: playable time segments cut by stream copy
//!
//! Every unit returned by [`Packager::package`] has been checked on disk
//! against the plan's ceiling.

mod archive;
pub mod error;
pub mod planner;
mod segment;
mod worker;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use courier_protocol::{DeliveryUnit, MediaTool, PayloadItem, UnitKind};
use courier_transfer::{sanitize_file_name, split_file};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use error::PackageError;
pub use planner::{GroupKind, PartitionPlan, PlanError, PlanGroup, PlanOptions, Strategy, plan};

use worker::{JobSpan, run_blocking};

/// Progress emitted while packaging, at most once per input file or 5% of bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageEvent {
    Progress {
        done: u64,
        total: u64,
        /// Input file (or segment) currently being processed.
        current: String,
    },
}

/// Executes partition plans.
pub struct Packager {
    media_tool: Option<Arc<dyn MediaTool>>,
    cancel: CancellationToken,
}

impl Packager {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            media_tool: None,
            cancel,
        }
    }

    /// Enables media segmentation. Without a tool, segment groups fall back
    /// to raw splitting.
    pub fn with_media_tool(mut self, tool: Arc<dyn MediaTool>) -> Self {
        self.media_tool = Some(tool);
        self
    }

    /// Packages every group of `plan` into `out_dir`.
    ///
    /// `out_dir` is owned by the packager for the duration of the call: on
    /// any failure it is removed together with everything written so far.
    pub async fn package(
        &self,
        plan: &PartitionPlan,
        title: &str,
        out_dir: &Path,
        events: mpsc::Sender<PackageEvent>,
    ) -> Result<Vec<DeliveryUnit>, PackageError> {
        match self.package_groups(plan, title, out_dir, &events).await {
            Ok(produced) => {
                info!(
                    strategy = ?plan.strategy,
                    units = produced.len(),
                    "packaging finished"
                );
                Ok(into_units(produced))
            }
            Err(e) => {
                if let Err(rm) = tokio::fs::remove_dir_all(out_dir).await
                    && rm.kind() != std::io::ErrorKind::NotFound
                {
                    warn!(dir = %out_dir.display(), error = %rm, "failed to remove packaging output");
                }
                Err(e)
            }
        }
    }

    async fn package_groups(
        &self,
        plan: &PartitionPlan,
        title: &str,
        out_dir: &Path,
        events: &mpsc::Sender<PackageEvent>,
    ) -> Result<Vec<(PathBuf, UnitKind)>, PackageError> {
        tokio::fs::create_dir_all(out_dir).await?;

        let ceiling = plan.unit_size_ceiling;
        let total = plan.total_bytes();
        let base = sanitize_file_name(title, "payload");
        let archive_count = plan
            .groups
            .iter()
            .filter(|g| g.kind == GroupKind::Archive)
            .count();

        let mut produced = Vec::new();
        // Base names of split and segmented items; two items may share a file name.
        let mut taken = HashSet::new();
        let mut archive_index = 0;
        let mut offset = 0u64;

        for group in &plan.groups {
            if self.cancel.is_cancelled() {
                return Err(PackageError::Cancelled);
            }
            let span = JobSpan { offset, total };
            debug!(kind = ?group.kind, items = group.items.len(), "packaging group");

            match group.kind {
                GroupKind::Direct => {
                    produced.extend(group.items.iter().map(|i| (i.local_path.clone(), kind_of(i))));
                }
                GroupKind::Archive => {
                    archive_index += 1;
                    let name = if archive_count == 1 {
                        format!("{base}.zip")
                    } else {
                        format!("{base}.part{archive_index}.zip")
                    };
                    let items = group.items.clone();
                    let path = out_dir.join(name);
                    let paths = run_blocking(span, self.cancel.clone(), events, move |ctx| {
                        archive::write_archive(&items, &path, ceiling, ctx)
                    })
                    .await?;
                    produced.extend(paths.into_iter().map(|p| (p, UnitKind::Document)));
                }
                GroupKind::SplitRaw { part_size } => {
                    for item in &group.items {
                        let name = archive::claim_name(output_name(item), &mut taken);
                        let paths = self
                            .split(item, name, part_size.min(ceiling), out_dir, span, events)
                            .await?;
                        produced.extend(paths.into_iter().map(|p| (p, UnitKind::Document)));
                    }
                }
                GroupKind::Transcode { segments } => {
                    for item in &group.items {
                        let name = archive::claim_name(output_name(item), &mut taken);
                        match &self.media_tool {
                            Some(tool) => {
                                let units = segment::segment_media(
                                    tool.as_ref(),
                                    item,
                                    &name,
                                    segments,
                                    out_dir,
                                    ceiling,
                                    span,
                                    &self.cancel,
                                    events,
                                )
                                .await?;
                                produced.extend(units);
                            }
                            None => {
                                warn!(
                                    file = %item.display_name,
                                    "no media tool configured, splitting raw instead"
                                );
                                let paths =
                                    self.split(item, name, ceiling, out_dir, span, events).await?;
                                produced.extend(paths.into_iter().map(|p| (p, UnitKind::Document)));
                            }
                        }
                    }
                }
            }

            offset += group.size_bytes();
        }

        for (path, _) in &produced {
            let size = tokio::fs::metadata(path).await?.len();
            if size > ceiling {
                return Err(PackageError::Oversized {
                    path: path.clone(),
                    size,
                    ceiling,
                });
            }
        }

        Ok(produced)
    }

    async fn split(
        &self,
        item: &PayloadItem,
        base: String,
        part_size: u64,
        out_dir: &Path,
        span: JobSpan,
        events: &mpsc::Sender<PackageEvent>,
    ) -> Result<Vec<PathBuf>, PackageError> {
        let source = item.local_path.clone();
        let display = item.display_name.clone();
        let dir = out_dir.to_path_buf();

        run_blocking(span, self.cancel.clone(), events, move |ctx| {
            ctx.begin_item(&display);
            Ok(split_file(&source, part_size, &dir, &base, &mut |n| ctx.advance(n))?)
        })
        .await
    }
}

/// Units for a [`Strategy::Direct`] plan: the payload files themselves.
pub fn direct_units(plan: &PartitionPlan) -> Vec<DeliveryUnit> {
    into_units(
        plan.groups
            .iter()
            .flat_map(|g| g.items.iter())
            .map(|i| (i.local_path.clone(), kind_of(i)))
            .collect(),
    )
}

/// File name the outputs of a split or segmented item are derived from.
fn output_name(item: &PayloadItem) -> String {
    item.local_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| sanitize_file_name(&item.display_name, "part"))
}

fn kind_of(item: &PayloadItem) -> UnitKind {
    if item.is_media() {
        UnitKind::Video
    } else {
        UnitKind::Document
    }
}

fn into_units(produced: Vec<(PathBuf, UnitKind)>) -> Vec<DeliveryUnit> {
    let total = produced.len();
    produced
        .into_iter()
        .enumerate()
        .map(|(i, (path, kind))| {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            DeliveryUnit {
                caption: DeliveryUnit::part_caption(&name, i + 1, total),
                path,
                sequence_index: i + 1,
                sequence_total: total,
                kind,
            }
        })
        .collect()
}
