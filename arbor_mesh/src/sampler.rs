// Segment sampling: from branch curves to an ordered list of cross-sections.
//
// For each branch of a skin, in chain order, the sampler merges two sources
// of positions:
//
// - curve samples from `BranchCurve::sample()` at the active angle tolerance;
// - "relevant" forced positions: child-branch attachments and builder-range
//   boundaries, collected in a `RelevantPositions` set.
//
// Forced positions carry a priority and are inserted with a minimum spacing.
// A new position within spacing of its nearest existing one averages with it
// (equal priority), replaces it (higher priority) or is dropped (lower
// priority). A moved position is resolved again against its new neighbours.
// Positions within spacing of the fixed endpoints 0 and 1 are always dropped.
// Curve samples within spacing of a forced position give way to it, so a
// child attached at 0.4 gets a ring at exactly 0.4.
//
// A fractured branch ends at its break position: later samples are dropped
// and the break becomes the endpoint. Only the skin's first branch emits a
// segment at position 0; follow-ups start after the shared joint, which the
// previous branch already emitted at its position 1.
//
// Ring normals are parallel-transported from segment to segment across the
// whole skin (not reset per branch), so rings stay aligned across joints.
// Segments whose center coincides with the previous one are elided.
//
// Builder ranges are registered here too (`register_ranges()`), since they
// feed both the forced positions and the per-segment builder choice.

use smallvec::SmallVec;
use tracing::{debug, warn};

use crate::builders::{
    Builder, DefaultBuilder, SegmentBuilder, ShapeBuilder, SideContext, TrunkFlareBuilder,
};
use crate::config::MeshConfig;
use crate::skeleton::{Branch, Skeleton, orthonormalize, transport_normal};
use crate::skin::{BuilderRange, Segment, Skin};
use crate::types::BuilderTag;

/// Two segment centers closer than this (after scaling) are one segment.
const MIN_SEGMENT_DISTANCE: f32 = 1e-5;

/// Priority of a forced sample position. Higher wins a spacing conflict.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Relevance {
    ChildAttachment,
    RangeBoundary,
}

/// Sorted set of forced sample positions on one branch.
#[derive(Clone, Debug)]
pub struct RelevantPositions {
    entries: SmallVec<[(f32, Relevance); 8]>,
    spacing: f32,
}

impl RelevantPositions {
    pub fn new(spacing: f32) -> Self {
        Self {
            entries: SmallVec::new(),
            spacing: spacing.max(0.0),
        }
    }

    /// Insert a forced position. Returns whether the set changed.
    ///
    /// The new position is matched against its nearest conflicting entry.
    /// A merged or moved position is checked again, so no two entries ever
    /// end up closer than the spacing.
    pub fn insert(&mut self, position: f32, relevance: Relevance) -> bool {
        if !position.is_finite()
            || position < self.spacing
            || position > 1.0 - self.spacing
            || position <= 0.0
            || position >= 1.0
        {
            return false;
        }
        let mut position = position;
        let mut changed = false;
        while let Some(index) = self.nearest_conflict(position) {
            let (existing, existing_relevance) = self.entries[index];
            match relevance.cmp(&existing_relevance) {
                std::cmp::Ordering::Less => return changed,
                std::cmp::Ordering::Equal => position = 0.5 * (existing + position),
                std::cmp::Ordering::Greater => {}
            }
            self.entries.remove(index);
            changed = true;
        }
        let at = self.entries.partition_point(|(p, _)| *p < position);
        self.entries.insert(at, (position, relevance));
        true
    }

    fn nearest_conflict(&self, position: f32) -> Option<usize> {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, (p, _))| (i, (*p - position).abs()))
            .filter(|(_, distance)| *distance < self.spacing)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(i, _)| i)
    }

    pub fn positions(&self) -> impl Iterator<Item = f32> + '_ {
        self.entries.iter().map(|(p, _)| *p)
    }
}

/// Merge curve samples with forced positions on one branch.
///
/// `end` truncates the branch (break position, else 1). The result is sorted,
/// strictly increasing and ends at `end`; it starts at 0 only when
/// `include_start` is set.
pub fn merge_positions(
    curve_samples: &[f32],
    forced: &RelevantPositions,
    end: f32,
    include_start: bool,
) -> Vec<f32> {
    let spacing = forced.spacing;
    let end = end.clamp(0.0, 1.0);
    let mut merged: Vec<f32> = curve_samples
        .iter()
        .copied()
        .filter(|&p| p > 0.0 && p < end - spacing)
        .filter(|&p| forced.positions().all(|f| (f - p).abs() >= spacing))
        .collect();
    merged.extend(forced.positions().filter(|&p| p < end - spacing));
    merged.sort_by(f32::total_cmp);
    merged.dedup();
    if include_start {
        merged.insert(0, 0.0);
    }
    if end > 0.0 || !include_start {
        merged.push(end);
    }
    merged
}

/// Register this pass's builder ranges on `skin`: custom shapes of member
/// branches first, then the trunk flare of a level-0 skin.
pub fn register_ranges(skin: &mut Skin, skeleton: &Skeleton, config: &MeshConfig) {
    skin.ranges.clear();
    let members: SmallVec<[_; 4]> = skin.members().collect();
    for id in members {
        let Some(shape) = skeleton.branch(id).and_then(|b| b.shape.as_ref()) else {
            continue;
        };
        let (Some(from), Some(to)) = (skin.to_skin(id, shape.from), skin.to_skin(id, shape.to))
        else {
            continue;
        };
        let caps = if shape.cap_length > 0.0 {
            let mid = 0.5 * (shape.from + shape.to);
            let lo = (shape.from + shape.cap_length).min(mid);
            let hi = (shape.to - shape.cap_length).max(mid);
            (skin.to_skin(id, lo), skin.to_skin(id, hi))
        } else {
            (None, None)
        };
        skin.add_range(BuilderRange {
            builder: Builder::Shape(ShapeBuilder {
                profile: shape.clone(),
            }),
            from,
            to,
            caps,
            branch: Some(id),
        });
    }

    if skin.level == 0 && config.trunk_flare.enabled {
        skin.add_range(BuilderRange {
            builder: Builder::TrunkFlare(TrunkFlareBuilder {
                config: config.trunk_flare.clone(),
            }),
            from: 0.0,
            to: config.trunk_flare.range.min(1.0),
            caps: (None, None),
            branch: None,
        });
    }
}

/// Collect the forced positions of one member branch.
fn relevant_positions(skin: &Skin, skeleton: &Skeleton, branch: &Branch, spacing: f32) -> RelevantPositions {
    let mut relevant = RelevantPositions::new(spacing);
    for &child in &branch.children {
        match skeleton.branch(child) {
            Some(c) => {
                relevant.insert(c.position_on_parent, Relevance::ChildAttachment);
            }
            None => warn!(parent = %branch.id, %child, "child link to a missing branch"),
        }
    }
    for range in &skin.ranges {
        for bound in [range.from, range.to] {
            match skin.to_branch(bound) {
                Some((owner, position)) if owner == branch.id => {
                    relevant.insert(position, Relevance::RangeBoundary);
                }
                _ => {}
            }
        }
    }
    relevant
}

/// Fill `skin.segments` for this pass. Expects the skin's side bounds,
/// girth bounds and ranges to be set.
pub fn sample_skin(skin: &mut Skin, skeleton: &Skeleton, config: &MeshConfig) {
    skin.segments.clear();
    let tolerance = config.angle_tolerance();
    let spacing = config.min_sample_spacing.max(0.0);
    let scale = config.scale;
    let mut segments: Vec<Segment> = Vec::new();

    for (member_index, sub) in skin.sub_ranges.iter().enumerate() {
        let Some(branch) = skeleton.branch(sub.branch) else {
            warn!(skin = %skin.id, branch = %sub.branch, "skin member missing from skeleton");
            continue;
        };
        let relevant = relevant_positions(skin, skeleton, branch, spacing);
        let positions = merge_positions(
            &branch.curve.sample(tolerance),
            &relevant,
            sub.branch_end,
            member_index == 0,
        );

        for position in positions {
            let point = branch.curve.eval(position);
            let center = point.point * scale;
            let direction = point.tangent;
            let normal = match segments.last() {
                Some(prev) => transport_normal(prev.normal, prev.direction, direction),
                None => orthonormalize(point.normal, direction),
            };
            let coincident = segments
                .last()
                .is_some_and(|prev| prev.center.distance(center) < MIN_SEGMENT_DISTANCE * scale.max(1.0));
            if coincident {
                debug!(skin = %skin.id, branch = %branch.id, position, "eliding zero-length segment");
                continue;
            }

            let local = (position / sub.branch_end.max(f32::EPSILON)).clamp(0.0, 1.0);
            let skin_position = sub.from + (sub.to - sub.from) * local;
            let girth = branch.girth_at(position);
            let range = skin.range_at(skin_position);
            let side_ctx = SideContext {
                girth,
                min_sides: skin.min_sides,
                max_sides: skin.max_sides,
                min_avg_girth: skin.min_avg_girth,
                max_avg_girth: skin.max_avg_girth,
            };
            let (builder, sides) = match range.map(|r| &skin.ranges[r].builder) {
                Some(b) => (b.tag(), b.as_segment_builder().side_count(&side_ctx)),
                None => (BuilderTag::Default, DefaultBuilder.side_count(&side_ctx)),
            };

            segments.push(Segment {
                branch: branch.id,
                center,
                direction,
                normal,
                sides: sides.max(3),
                girth: girth * scale,
                branch_position: position,
                skin_position,
                builder,
                range,
            });
        }
    }

    debug!(skin = %skin.id, segments = segments.len(), "sampled skin");
    skin.segments = segments;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skeleton::{BranchCurve, GirthProfile, ShapeProfile};
    use crate::types::BranchId;
    use glam::Vec3;

    fn uniform_skin(skeleton: &Skeleton, root: BranchId, sides: u16) -> Skin {
        let mut skin = Skin::aggregate(skeleton, root).unwrap();
        skin.min_sides = sides;
        skin.max_sides = sides;
        skin.min_avg_girth = 0.0;
        skin.max_avg_girth = 1.0;
        skin
    }

    #[test]
    fn relevant_positions_resolve_conflicts() {
        let mut set = RelevantPositions::new(0.05);
        assert!(!set.insert(0.01, Relevance::RangeBoundary));
        assert!(!set.insert(0.99, Relevance::RangeBoundary));
        assert!(set.insert(0.4, Relevance::ChildAttachment));
        assert!(set.insert(0.42, Relevance::ChildAttachment));
        assert_eq!(set.positions().count(), 1);
        assert!((set.positions().next().unwrap() - 0.41).abs() < 1e-6);
        assert!(set.insert(0.43, Relevance::RangeBoundary));
        assert_eq!(set.positions().collect::<Vec<_>>(), vec![0.43]);
        assert!(!set.insert(0.44, Relevance::ChildAttachment));
        assert!(set.insert(0.2, Relevance::ChildAttachment));
        assert_eq!(set.positions().collect::<Vec<_>>(), vec![0.2, 0.43]);
    }

    fn assert_spaced(set: &RelevantPositions) {
        let positions: Vec<f32> = set.positions().collect();
        for pair in positions.windows(2) {
            assert!(pair[1] - pair[0] >= set.spacing - 1e-6, "{positions:?}");
        }
    }

    #[test]
    fn merged_position_is_rechecked_against_neighbours() {
        let mut set = RelevantPositions::new(0.05);
        assert!(set.insert(0.40, Relevance::ChildAttachment));
        assert!(set.insert(0.46, Relevance::ChildAttachment));
        assert!(set.insert(0.44, Relevance::ChildAttachment));
        assert_spaced(&set);

        let mut set = RelevantPositions::new(0.05);
        for p in [0.30, 0.36, 0.42] {
            assert!(set.insert(p, Relevance::ChildAttachment));
        }
        assert!(set.insert(0.325, Relevance::ChildAttachment));
        assert_spaced(&set);
        let positions: Vec<f32> = set.positions().collect();
        assert_eq!(positions.len(), 2);
        assert!((positions[0] - 0.33625).abs() < 1e-5);
        assert!((positions[1] - 0.42).abs() < 1e-6);
    }

    #[test]
    fn conflict_resolves_against_nearest_entry() {
        let mut set = RelevantPositions::new(0.05);
        assert!(set.insert(0.30, Relevance::RangeBoundary));
        assert!(set.insert(0.37, Relevance::ChildAttachment));
        // Within spacing of both; the closer child attachment absorbs it.
        assert!(set.insert(0.345, Relevance::ChildAttachment));
        let positions: Vec<f32> = set.positions().collect();
        assert_eq!(positions.len(), 2);
        assert!((positions[0] - 0.30).abs() < 1e-6);
        assert!((positions[1] - 0.3575).abs() < 1e-5);
        assert_spaced(&set);
    }

    #[test]
    fn forced_position_replaces_nearby_curve_sample() {
        let samples: Vec<f32> = (0..=10).map(|i| i as f32 / 10.0).collect();
        let mut forced = RelevantPositions::new(0.02);
        forced.insert(0.4, Relevance::ChildAttachment);
        let merged = merge_positions(&samples, &forced, 1.0, true);
        assert_eq!(merged.len(), 11);
        assert!(merged.contains(&0.4));
        assert!(merged.windows(2).all(|w| w[0] < w[1]));

        let mut forced = RelevantPositions::new(0.02);
        forced.insert(0.45, Relevance::ChildAttachment);
        let merged = merge_positions(&samples, &forced, 1.0, false);
        assert_eq!(merged.len(), 11);
        assert_eq!(merged[0], 0.1);
        assert!(merged.contains(&0.45));
        assert_eq!(*merged.last().unwrap(), 1.0);
    }

    #[test]
    fn break_truncates_samples() {
        let samples: Vec<f32> = (0..=10).map(|i| i as f32 / 10.0).collect();
        let forced = RelevantPositions::new(0.02);
        let merged = merge_positions(&samples, &forced, 0.55, true);
        assert_eq!(merged, vec![0.0, 0.1, 0.2, 0.3, 0.4, 0.5, 0.55]);
    }

    #[test]
    fn child_attachment_gets_a_segment() {
        let mut skeleton = Skeleton::new();
        let trunk = skeleton.add_root(
            BranchCurve::straight(Vec3::ZERO, Vec3::Y * 10.0, 11),
            GirthProfile::constant(1.0),
        );
        skeleton
            .add_child(
                trunk,
                0.37,
                BranchCurve::straight(Vec3::Y * 3.7, Vec3::new(3.0, 5.0, 0.0), 2),
                GirthProfile::constant(0.2),
            )
            .unwrap();
        let mut skin = uniform_skin(&skeleton, trunk, 6);
        sample_skin(&mut skin, &skeleton, &MeshConfig::default());
        assert!(skin.segments.iter().any(|s| s.branch_position == 0.37));
        assert!(
            skin.segments
                .windows(2)
                .all(|w| w[0].skin_position < w[1].skin_position)
        );
        assert!(skin.segments.iter().all(|s| s.sides == 6));
    }

    #[test]
    fn follow_up_continues_skin_positions() {
        let mut skeleton = Skeleton::new();
        let a = skeleton.add_root(
            BranchCurve::straight(Vec3::ZERO, Vec3::Y * 5.0, 3),
            GirthProfile::constant(0.5),
        );
        let b = skeleton
            .add_follow_up(
                a,
                BranchCurve::straight(Vec3::Y * 5.0, Vec3::Y * 10.0, 3),
                GirthProfile::constant(0.4),
            )
            .unwrap();
        let mut skin = uniform_skin(&skeleton, a, 5);
        sample_skin(&mut skin, &skeleton, &MeshConfig::default());
        let positions: Vec<f32> = skin.segments.iter().map(|s| s.skin_position).collect();
        assert_eq!(positions.len(), 5);
        assert_eq!(positions[0], 0.0);
        assert!((positions[2] - 0.5).abs() < 1e-4);
        assert_eq!(positions[4], 1.0);
        assert_eq!(skin.segments[2].branch, a);
        assert_eq!(skin.segments[3].branch, b);
        // Normals are transported, not reset, across the joint.
        assert!(skin.segments[2].normal.distance(skin.segments[3].normal) < 1e-4);
    }

    #[test]
    fn scale_applies_to_centers_and_girth() {
        let mut skeleton = Skeleton::new();
        let a = skeleton.add_root(
            BranchCurve::straight(Vec3::ZERO, Vec3::Y * 2.0, 2),
            GirthProfile::constant(0.5),
        );
        let mut skin = uniform_skin(&skeleton, a, 4);
        let config = MeshConfig {
            scale: 3.0,
            ..MeshConfig::default()
        };
        sample_skin(&mut skin, &skeleton, &config);
        let tip = skin.segments.last().unwrap();
        assert!((tip.center.y - 6.0).abs() < 1e-3);
        assert!((tip.girth - 1.5).abs() < 1e-6);
    }

    #[test]
    fn ranges_pick_builders_and_force_boundaries() {
        let mut skeleton = Skeleton::new();
        let a = skeleton.add_root(
            BranchCurve::straight(Vec3::ZERO, Vec3::Y * 10.0, 2),
            GirthProfile::constant(0.5),
        );
        skeleton
            .set_shape(
                a,
                ShapeProfile {
                    radial: vec![1.0, 1.3, 1.0, 1.3, 1.0],
                    from: 0.5,
                    to: 0.8,
                    cap_length: 0.05,
                },
            )
            .unwrap();
        let mut config = MeshConfig::default();
        config.trunk_flare.enabled = true;
        config.trunk_flare.range = 0.2;
        let mut skin = uniform_skin(&skeleton, a, 6);
        register_ranges(&mut skin, &skeleton, &config);
        assert_eq!(skin.ranges.len(), 2);
        sample_skin(&mut skin, &skeleton, &config);

        let at = |p: f32| {
            skin.segments
                .iter()
                .find(|s| (s.skin_position - p).abs() < 1e-5)
                .copied()
                .unwrap()
        };
        assert_eq!(at(0.0).builder, BuilderTag::TrunkFlare);
        assert_eq!(at(0.2).builder, BuilderTag::TrunkFlare);
        assert_eq!(at(0.5).builder, BuilderTag::Shape);
        assert_eq!(at(0.5).sides, 5);
        assert_eq!(at(0.8).builder, BuilderTag::Shape);
        assert_eq!(at(1.0).builder, BuilderTag::Default);
        assert_eq!(at(1.0).sides, 6);
    }

    #[test]
    fn broken_trunk_ends_at_break() {
        let mut skeleton = Skeleton::new();
        let a = skeleton.add_root(
            BranchCurve::straight(Vec3::ZERO, Vec3::Y * 10.0, 11),
            GirthProfile::constant(0.5),
        );
        skeleton.set_broken(a, 0.65).unwrap();
        let mut skin = uniform_skin(&skeleton, a, 4);
        sample_skin(&mut skin, &skeleton, &MeshConfig::default());
        let last = skin.segments.last().unwrap();
        assert_eq!(last.branch_position, 0.65);
        assert_eq!(last.skin_position, 1.0);
        assert!((last.center.y - 6.5).abs() < 1e-2);
    }
}
