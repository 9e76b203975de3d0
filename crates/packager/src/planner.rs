//! Partition planning.
//!
//! [`plan`] is pure: it looks only at the item sizes already recorded in the
//! payload and the configured ceiling, and always returns the same plan for
//! the same input.

use courier_protocol::{AcquiredPayload, PayloadItem};

/// How a plan delivers its payload, summarized over all groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// One item that already fits; sent as-is.
    Direct,
    /// Byte-range parts of oversized files.
    SplitRaw,
    /// Everything fits in one archive.
    ArchiveSingle,
    /// Several archives, possibly alongside split or direct items.
    ArchiveMultiVolume,
    /// Playable media cut into time segments.
    TranscodeSegment,
}

/// What the packager does with one group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupKind {
    /// Send the single item unchanged.
    Direct,
    /// Pack all items into one archive.
    Archive,
    /// Cut the single item into parts of at most `part_size` bytes.
    SplitRaw { part_size: u64 },
    /// Cut the single media item into `segments` time slices by stream copy.
    Transcode { segments: u32 },
}

/// One group of items packaged together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanGroup {
    pub kind: GroupKind,
    pub items: Vec<PayloadItem>,
}

impl PlanGroup {
    pub fn size_bytes(&self) -> u64 {
        self.items.iter().map(|i| i.size_bytes).sum()
    }
}

/// Immutable partitioning decision for one payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionPlan {
    pub strategy: Strategy,
    pub unit_size_ceiling: u64,
    pub groups: Vec<PlanGroup>,
}

impl PartitionPlan {
    /// Total bytes the packager will read.
    pub fn total_bytes(&self) -> u64 {
        self.groups.iter().map(PlanGroup::size_bytes).sum()
    }
}

/// Planner tuning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlanOptions {
    /// Maximum size of one delivered attachment, in bytes.
    pub ceiling: u64,
    /// Fraction of the ceiling an archive group may fill.
    pub safety_margin: f64,
    /// Assumed compressed size as a fraction of the original.
    pub compression_estimate: f64,
    /// Cut oversized media into playable segments instead of raw parts.
    pub prefer_playable_media: bool,
}

impl PlanOptions {
    pub fn new(ceiling: u64) -> Self {
        Self {
            ceiling,
            safety_margin: 0.9,
            compression_estimate: 0.9,
            prefer_playable_media: true,
        }
    }
}

/// Reasons no plan can be produced.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlanError {
    #[error("payload has no items")]
    EmptyPayload,

    #[error("unit size ceiling must be greater than zero")]
    ZeroCeiling,

    #[error("{name} must be in (0, 1], got {value}")]
    InvalidFactor { name: &'static str, value: f64 },
}

/// Computes the partition plan for `payload`.
pub fn plan(payload: &AcquiredPayload, options: &PlanOptions) -> Result<PartitionPlan, PlanError> {
    if payload.items.is_empty() {
        return Err(PlanError::EmptyPayload);
    }
    if options.ceiling == 0 {
        return Err(PlanError::ZeroCeiling);
    }
    check_factor("safety_margin", options.safety_margin)?;
    check_factor("compression_estimate", options.compression_estimate)?;

    let ceiling = options.ceiling;

    if let [item] = payload.items.as_slice() {
        if item.size_bytes <= ceiling {
            return Ok(single(Strategy::Direct, GroupKind::Direct, item, ceiling));
        }
        let kind = oversized_kind(item, options);
        let strategy = match kind {
            GroupKind::Transcode { .. } => Strategy::TranscodeSegment,
            _ => Strategy::SplitRaw,
        };
        return Ok(single(strategy, kind, item, ceiling));
    }

    let limit = scale(ceiling, options.safety_margin);

    let mut sorted: Vec<&PayloadItem> = payload.items.iter().collect();
    sorted.sort_by(|a, b| b.size_bytes.cmp(&a.size_bytes));

    let mut groups = Vec::new();
    let mut current: Vec<PayloadItem> = Vec::new();
    let mut current_estimate = 0u64;

    for item in sorted {
        if item.size_bytes > ceiling {
            groups.push(PlanGroup {
                kind: oversized_kind(item, options),
                items: vec![item.clone()],
            });
            continue;
        }

        let estimate = scale(item.size_bytes, options.compression_estimate);
        if estimate > limit {
            // Fits as-is but could not be archived under the margin.
            groups.push(PlanGroup {
                kind: GroupKind::Direct,
                items: vec![item.clone()],
            });
            continue;
        }

        if !current.is_empty() && current_estimate + estimate > limit {
            groups.push(PlanGroup {
                kind: GroupKind::Archive,
                items: std::mem::take(&mut current),
            });
            current_estimate = 0;
        }
        current.push(item.clone());
        current_estimate += estimate;
    }
    if !current.is_empty() {
        groups.push(PlanGroup {
            kind: GroupKind::Archive,
            items: current,
        });
    }

    Ok(PartitionPlan {
        strategy: summarize(&groups),
        unit_size_ceiling: ceiling,
        groups,
    })
}

fn single(strategy: Strategy, kind: GroupKind, item: &PayloadItem, ceiling: u64) -> PartitionPlan {
    PartitionPlan {
        strategy,
        unit_size_ceiling: ceiling,
        groups: vec![PlanGroup {
            kind,
            items: vec![item.clone()],
        }],
    }
}

fn oversized_kind(item: &PayloadItem, options: &PlanOptions) -> GroupKind {
    if options.prefer_playable_media && item.is_media() {
        let per_segment = scale(options.ceiling, options.safety_margin).max(1);
        let segments = item.size_bytes.div_ceil(per_segment);
        GroupKind::Transcode {
            segments: u32::try_from(segments).unwrap_or(u32::MAX),
        }
    } else {
        GroupKind::SplitRaw {
            part_size: options.ceiling,
        }
    }
}

fn summarize(groups: &[PlanGroup]) -> Strategy {
    let archives = groups
        .iter()
        .filter(|g| g.kind == GroupKind::Archive)
        .count();
    let all_transcode = groups
        .iter()
        .all(|g| matches!(g.kind, GroupKind::Transcode { .. }));

    match (groups.len(), archives) {
        (1, 1) => Strategy::ArchiveSingle,
        (_, 0) if all_transcode => Strategy::TranscodeSegment,
        (_, 0) => Strategy::SplitRaw,
        _ => Strategy::ArchiveMultiVolume,
    }
}

fn check_factor(name: &'static str, value: f64) -> Result<(), PlanError> {
    if value.is_finite() && value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(PlanError::InvalidFactor { name, value })
    }
}

/// `bytes * factor` in integer arithmetic at per-mille resolution, so that
/// boundary comparisons do not depend on float rounding.
fn scale(bytes: u64, factor: f64) -> u64 {
    let permille = (factor * 1000.0).round() as u128;
    u64::try_from(bytes as u128 * permille / 1000).unwrap_or(u64::MAX)
}
