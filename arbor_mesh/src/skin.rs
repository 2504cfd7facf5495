// Branch-skin aggregation.
//
// A `Skin` is the continuous surface over a root branch plus its chain of
// follow-up branches. The chain is meshed as one surface, so positions along
// it are expressed in a skin-relative [0, 1] space; each member branch owns a
// contiguous sub-range proportional to its (effective) length. A broken
// branch ends the chain: its follow-ups are not part of the skin.
//
// Skins are created once per root branch and cached in the `BuildContext`.
// Every pass clears the segment list and geometry buffers and re-registers
// the builder ranges (they depend on the config), but keeps the chain and
// sub-ranges, so callers must `clear_reference_skins()` after a
// structural skeleton change.
//
// Queries: skin position -> (branch, branch position), the reverse, and
// "does skin position P belong to branch B". All are linear scans over the
// chain, which is short in practice.
//
// See also: `sampler.rs` which fills `segments`, `stitch.rs` which fills
// `buffers`, `context.rs` which owns the cache.

use glam::Vec3;
use smallvec::SmallVec;
use tracing::warn;

use crate::buffers::SkinBuffers;
use crate::builders::{Builder, RangePlacement};
use crate::skeleton::Skeleton;
use crate::types::{BranchId, BuilderTag};

/// The part of a skin that belongs to one branch: `[from, to)`, except the
/// last member which also owns `to == 1`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SubRange {
    pub branch: BranchId,
    pub from: f32,
    pub to: f32,
    /// Normalized branch position where the skin leaves this branch (the
    /// break position for a broken branch, else 1).
    pub branch_end: f32,
}

impl SubRange {
    fn to_branch_position(&self, skin_position: f32) -> f32 {
        let span = self.to - self.from;
        if span <= f32::EPSILON {
            return 0.0;
        }
        ((skin_position - self.from) / span).clamp(0.0, 1.0) * self.branch_end
    }

    fn to_skin_position(&self, branch_position: f32) -> f32 {
        let local = if self.branch_end > f32::EPSILON {
            (branch_position / self.branch_end).clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.from + (self.to - self.from) * local
    }
}

/// An interval of the skin owned by a non-default builder.
#[derive(Clone, Debug)]
pub struct BuilderRange {
    pub builder: Builder,
    pub from: f32,
    pub to: f32,
    /// Skin positions where the shape tapers into the default surface.
    pub caps: (Option<f32>, Option<f32>),
    /// Set for ranges that come from a single branch (custom shapes).
    pub branch: Option<BranchId>,
}

impl BuilderRange {
    pub fn contains(&self, position: f32) -> bool {
        position >= self.from && position <= self.to
    }

    pub fn placement(&self, position: f32) -> RangePlacement {
        let span = self.to - self.from;
        let local = if span > f32::EPSILON {
            ((position - self.from) / span).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let mut cap_weight: f32 = 1.0;
        if let Some(cap) = self.caps.0 {
            let len = cap - self.from;
            if len > f32::EPSILON {
                cap_weight = cap_weight.min((position - self.from) / len);
            }
        }
        if let Some(cap) = self.caps.1 {
            let len = self.to - cap;
            if len > f32::EPSILON {
                cap_weight = cap_weight.min((self.to - position) / len);
            }
        }
        RangePlacement {
            local,
            cap_weight: cap_weight.clamp(0.0, 1.0),
        }
    }
}

/// One cross-section sample along a skin.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Segment {
    pub branch: BranchId,
    pub center: Vec3,
    pub direction: Vec3,
    pub normal: Vec3,
    pub sides: u16,
    pub girth: f32,
    pub branch_position: f32,
    pub skin_position: f32,
    pub builder: BuilderTag,
    /// Index into `Skin::ranges` when a non-default builder owns the segment.
    pub range: Option<usize>,
}

/// The meshed surface over a root branch and its follow-up chain.
#[derive(Clone, Debug)]
pub struct Skin {
    /// The root branch of the chain.
    pub id: BranchId,
    pub level: u32,
    /// Total (unscaled) chain length.
    pub length: f32,
    pub sub_ranges: SmallVec<[SubRange; 4]>,
    pub ranges: Vec<BuilderRange>,
    pub min_sides: u16,
    pub max_sides: u16,
    pub min_avg_girth: f32,
    pub max_avg_girth: f32,
    pub segments: Vec<Segment>,
    pub buffers: SkinBuffers,
}

impl Skin {
    /// Walk the follow-up chain from `root` and register one sub-range per
    /// member. Returns `None` if `root` is not in the skeleton.
    pub fn aggregate(skeleton: &Skeleton, root: BranchId) -> Option<Self> {
        let root_branch = skeleton.branch(root)?;
        let mut members: SmallVec<[(BranchId, f32, f32); 4]> = SmallVec::new();
        let mut current = Some(root);
        while let Some(id) = current {
            let Some(branch) = skeleton.branch(id) else {
                warn!(%id, "follow-up chain references a missing branch, truncating skin");
                break;
            };
            members.push((id, branch.effective_length(), branch.end_position()));
            current = if branch.is_broken() { None } else { branch.follow_up };
        }

        let total: f32 = members.iter().map(|m| m.1).sum();
        let mut sub_ranges = SmallVec::new();
        let mut from = 0.0;
        for (i, &(branch, length, branch_end)) in members.iter().enumerate() {
            let share = if total > f32::EPSILON {
                length / total
            } else {
                1.0 / members.len() as f32
            };
            let to = if i + 1 == members.len() { 1.0 } else { from + share };
            sub_ranges.push(SubRange {
                branch,
                from,
                to,
                branch_end,
            });
            from = to;
        }

        Some(Self {
            id: root,
            level: root_branch.level,
            length: total,
            sub_ranges,
            ranges: Vec::new(),
            min_sides: 3,
            max_sides: 3,
            min_avg_girth: 0.0,
            max_avg_girth: 0.0,
            segments: Vec::new(),
            buffers: SkinBuffers::default(),
        })
    }

    /// Drop everything a generation pass produces.
    pub fn clear(&mut self) {
        self.ranges.clear();
        self.segments.clear();
        self.buffers.clear();
    }

    /// Register a builder range. Inverted, empty or out-of-bounds ranges are
    /// skipped.
    pub fn add_range(&mut self, range: BuilderRange) -> bool {
        let valid = range.from.is_finite()
            && range.to.is_finite()
            && range.from >= 0.0
            && range.to <= 1.0
            && range.from < range.to;
        if !valid {
            warn!(skin = %self.id, from = range.from, to = range.to, "skipping malformed builder range");
            return false;
        }
        self.ranges.push(range);
        true
    }

    /// The first range containing `position`.
    pub fn range_at(&self, position: f32) -> Option<usize> {
        self.ranges.iter().position(|r| r.contains(position))
    }

    pub fn members(&self) -> impl Iterator<Item = BranchId> + '_ {
        self.sub_ranges.iter().map(|s| s.branch)
    }

    pub fn sub_range(&self, branch: BranchId) -> Option<&SubRange> {
        self.sub_ranges.iter().find(|s| s.branch == branch)
    }

    /// Translate a skin position to the owning branch and its branch position.
    pub fn to_branch(&self, skin_position: f32) -> Option<(BranchId, f32)> {
        let p = skin_position.clamp(0.0, 1.0);
        let last = self.sub_ranges.len().checked_sub(1)?;
        self.sub_ranges
            .iter()
            .enumerate()
            .find(|(i, s)| p >= s.from && (p < s.to || *i == last))
            .map(|(_, s)| (s.branch, s.to_branch_position(p)))
    }

    /// Translate a branch position to a skin position, if the branch is part
    /// of this skin.
    pub fn to_skin(&self, branch: BranchId, branch_position: f32) -> Option<f32> {
        self.sub_range(branch)
            .map(|s| s.to_skin_position(branch_position))
    }

    /// Branch position on `branch` for a skin position, clamped to the
    /// branch's sub-range.
    pub fn branch_position(&self, branch: BranchId, skin_position: f32) -> Option<f32> {
        self.sub_range(branch)
            .map(|s| s.to_branch_position(skin_position))
    }

    /// Whether `skin_position` lies in `branch`'s sub-range.
    pub fn contains(&self, skin_position: f32, branch: BranchId) -> bool {
        self.to_branch(skin_position)
            .is_some_and(|(owner, _)| owner == branch)
    }

    /// Index of the last segment at or before `skin_position`, and the
    /// interpolation factor towards the next one.
    pub fn segment_at(&self, skin_position: f32) -> Option<(usize, f32)> {
        if self.segments.is_empty() {
            return None;
        }
        let upper = self
            .segments
            .partition_point(|s| s.skin_position <= skin_position);
        if upper == 0 {
            return Some((0, 0.0));
        }
        let i = upper - 1;
        let Some(next) = self.segments.get(i + 1) else {
            return Some((i, 0.0));
        };
        let a = self.segments[i].skin_position;
        let span = next.skin_position - a;
        let f = if span > f32::EPSILON {
            ((skin_position - a) / span).clamp(0.0, 1.0)
        } else {
            0.0
        };
        Some((i, f))
    }

    /// Girth at a skin position, interpolated between sampled segments.
    pub fn girth_at(&self, skin_position: f32) -> Option<f32> {
        let (i, f) = self.segment_at(skin_position)?;
        let a = self.segments[i].girth;
        let b = self.segments.get(i + 1).map_or(a, |s| s.girth);
        Some(a + (b - a) * f)
    }

    /// Center and direction at a skin position.
    pub fn frame_at(&self, skin_position: f32) -> Option<(Vec3, Vec3)> {
        let (i, f) = self.segment_at(skin_position)?;
        let a = &self.segments[i];
        let b = self.segments.get(i + 1).unwrap_or(a);
        let direction = a
            .direction
            .lerp(b.direction, f)
            .try_normalize()
            .unwrap_or(a.direction);
        Some((a.center.lerp(b.center, f), direction))
    }

    /// Largest sampled girth.
    pub fn max_girth(&self) -> f32 {
        self.segments.iter().map(|s| s.girth).fold(0.0, f32::max)
    }
}
