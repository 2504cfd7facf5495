// Wind meta builder: compound-branch analysis and sway weights.
//
// A compound branch is a chain of directly continuing branches (a branch and
// its follow-ups) treated as one unit for distance accounting. Compounds are
// discovered with a worklist: one starts at every skeleton root (the "main"
// compounds, i.e. trunks) and at every ramification child; follow-ups extend
// the compound they continue.
//
// Per member branch the table records:
//
// - `local_distance`: distance from the compound's origin to the member base;
// - `origin_distance`: distance from the skeleton root to the member base,
//   along the structure;
// - `trunk_distance`: distance from the trunk to the member base (0 on the
//   trunk itself).
//
// Sway phases desynchronize siblings. Every child compound of a trunk opens a
// new phase group; deeper compounds inherit their parent's group so a limb
// and its twigs sway together. A group's phase is drawn from `ArborRng` seeded
// by the wind seed and forked by the group id, so phases are reproducible
// and independent of traversal order. Trunks use phase 0.
//
// `weight(branch, position)` returns the two animation weights written to
// `uv2`: the primary amplitude (origin distance over the largest origin
// distance, through the primary response curve, times the spread) and the
// secondary weight (trunk distance over the largest trunk distance, through
// the secondary curve; 0 on the trunk).

use arbor_prng::ArborRng;
use glam::{Vec2, Vec4};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::collections::VecDeque;
use tracing::{debug, warn};

use crate::config::WindConfig;
use crate::context::BuildContext;
use crate::mesh::TreeMesh;
use crate::skeleton::Skeleton;
use crate::types::BranchId;

#[derive(Clone, Debug, PartialEq)]
pub struct CompoundBranch {
    /// True for compounds that start at a skeleton root.
    pub main: bool,
    pub members: SmallVec<[BranchId; 4]>,
    /// Total (scaled) length of the members.
    pub length: f32,
    pub phase_group: u32,
    pub phase: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CompoundMember {
    pub compound: usize,
    pub local_distance: f32,
    pub origin_distance: f32,
    pub trunk_distance: f32,
    /// Full (scaled) branch length; branch positions are relative to it.
    pub length: f32,
}

/// A compound waiting to be walked.
struct PendingCompound {
    start: BranchId,
    origin_distance: f32,
    trunk_distance: f32,
    parent: Option<usize>,
}

#[derive(Clone, Debug, Default)]
pub struct CompoundTable {
    compounds: Vec<CompoundBranch>,
    members: FxHashMap<BranchId, CompoundMember>,
    max_origin_distance: f32,
    max_trunk_distance: f32,
}

impl CompoundTable {
    pub fn build(skeleton: &Skeleton, config: &WindConfig, scale: f32) -> Self {
        let mut table = CompoundTable::default();
        let mut next_group = 1u32;
        let mut queue: VecDeque<PendingCompound> = skeleton
            .roots()
            .iter()
            .map(|&start| PendingCompound {
                start,
                origin_distance: 0.0,
                trunk_distance: 0.0,
                parent: None,
            })
            .collect();

        while let Some(pending) = queue.pop_front() {
            let index = table.compounds.len();
            let main = pending.parent.is_none();
            let phase_group = match pending.parent.map(|p| &table.compounds[p]) {
                None => 0,
                Some(parent) if parent.main => {
                    next_group += 1;
                    next_group - 1
                }
                Some(parent) => parent.phase_group,
            };

            let mut members = SmallVec::new();
            let mut local = 0.0;
            let mut current = Some(pending.start);
            while let Some(id) = current {
                if table.members.contains_key(&id) {
                    warn!(%id, "branch reached twice during compound analysis");
                    break;
                }
                let Some(branch) = skeleton.branch(id) else {
                    warn!(%id, "compound chain references a missing branch");
                    break;
                };
                let length = branch.length() * scale;
                let origin_distance = pending.origin_distance + local;
                let trunk_distance = if main { 0.0 } else { pending.trunk_distance + local };
                table.members.insert(
                    id,
                    CompoundMember {
                        compound: index,
                        local_distance: local,
                        origin_distance,
                        trunk_distance,
                        length,
                    },
                );
                let end = branch.end_position();
                table.max_origin_distance = table.max_origin_distance.max(origin_distance + length * end);
                if !main {
                    table.max_trunk_distance = table.max_trunk_distance.max(trunk_distance + length * end);
                }
                for &child in &branch.children {
                    let Some(c) = skeleton.branch(child) else {
                        continue;
                    };
                    let along = c.position_on_parent * length;
                    queue.push_back(PendingCompound {
                        start: child,
                        origin_distance: origin_distance + along,
                        trunk_distance: if main { 0.0 } else { trunk_distance + along },
                        parent: Some(index),
                    });
                }
                members.push(id);
                local += length;
                current = if branch.is_broken() { None } else { branch.follow_up };
            }

            let phase = if phase_group == 0 {
                0.0
            } else {
                ArborRng::new(config.seed).fork(phase_group as u64).next_f32()
            };
            table.compounds.push(CompoundBranch {
                main,
                members,
                length: local,
                phase_group,
                phase,
            });
        }

        debug!(
            compounds = table.compounds.len(),
            max_origin = table.max_origin_distance,
            max_trunk = table.max_trunk_distance,
            "compound analysis done"
        );
        table
    }

    pub fn compounds(&self) -> &[CompoundBranch] {
        &self.compounds
    }

    pub fn member(&self, branch: BranchId) -> Option<&CompoundMember> {
        self.members.get(&branch)
    }

    pub fn compound_of(&self, branch: BranchId) -> Option<&CompoundBranch> {
        self.compounds.get(self.member(branch)?.compound)
    }

    pub fn phase(&self, branch: BranchId) -> f32 {
        self.compound_of(branch).map_or(0.0, |c| c.phase)
    }

    /// (primary, secondary) sway weight at a branch position.
    pub fn weight(&self, branch: BranchId, position: f32, config: &WindConfig) -> Vec2 {
        let (Some(member), Some(compound)) = (self.member(branch), self.compound_of(branch)) else {
            return Vec2::ZERO;
        };
        let along = position.clamp(0.0, 1.0) * member.length;
        let primary = if self.max_origin_distance > f32::EPSILON {
            config
                .primary_curve
                .evaluate((member.origin_distance + along) / self.max_origin_distance)
                * config.spread
        } else {
            0.0
        };
        let secondary = if compound.main || self.max_trunk_distance <= f32::EPSILON {
            0.0
        } else {
            config
                .secondary_curve
                .evaluate((member.trunk_distance + along) / self.max_trunk_distance)
        };
        Vec2::new(primary, secondary)
    }
}

/// Write `uv2`, `uv3` and `colors` for every skin of the last pass.
pub fn apply(mesh: &mut TreeMesh, table: &CompoundTable, ctx: &BuildContext, skeleton: &Skeleton) {
    let config = &ctx.config().wind;
    let max_level = skeleton.max_level();
    for span in &mesh.skins {
        let Some(skin) = ctx.skin_for(span.root) else {
            continue;
        };
        let first = span.vertex_offset as usize;
        for v in first..first + span.vertex_count as usize {
            let branch = mesh.vertices.branches[v];
            let position = match skin.segments.get(mesh.vertices.segments[v] as usize) {
                Some(s) if s.branch == branch => s.branch_position,
                // Re-emitted joint rings belong to the next branch of the chain.
                Some(s) => skin.branch_position(branch, s.skin_position).unwrap_or(0.0),
                None => 0.0,
            };
            let weight = table.weight(branch, position, config);
            let phase = table.phase(branch);
            let level = skeleton.branch(branch).map_or(0, |b| b.level);
            let level_ratio = if max_level > 0 {
                level as f32 / max_level as f32
            } else {
                0.0
            };
            mesh.uv2[v] = weight;
            mesh.uv3[v] = Vec2::new(phase, level_ratio);
            mesh.colors[v] = Vec4::new(weight.x.min(1.0), weight.y, phase, 1.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MeshConfig, ResponseCurve};
    use crate::skeleton::{BranchCurve, GirthProfile};
    use glam::Vec3;

    /// Trunk (4) + follow-up (4); limb on the trunk at 0.5 (length 5) with a
    /// twig at its tip region; second limb on the follow-up.
    fn tree() -> (Skeleton, [BranchId; 5]) {
        let mut s = Skeleton::new();
        let trunk = s.add_root(
            BranchCurve::straight(Vec3::ZERO, Vec3::Y * 4.0, 2),
            GirthProfile::constant(0.5),
        );
        let top = s
            .add_follow_up(
                trunk,
                BranchCurve::straight(Vec3::Y * 4.0, Vec3::Y * 8.0, 2),
                GirthProfile::constant(0.4),
            )
            .unwrap();
        let limb = s
            .add_child(
                trunk,
                0.5,
                BranchCurve::straight(Vec3::Y * 2.0, Vec3::new(5.0, 2.0, 0.0), 2),
                GirthProfile::constant(0.2),
            )
            .unwrap();
        let twig = s
            .add_child(
                limb,
                0.8,
                BranchCurve::straight(Vec3::new(4.0, 2.0, 0.0), Vec3::new(4.0, 4.0, 0.0), 2),
                GirthProfile::constant(0.05),
            )
            .unwrap();
        let other = s
            .add_child(
                top,
                0.5,
                BranchCurve::straight(Vec3::Y * 6.0, Vec3::new(-3.0, 6.0, 0.0), 2),
                GirthProfile::constant(0.2),
            )
            .unwrap();
        (s, [trunk, top, limb, twig, other])
    }

    #[test]
    fn compounds_follow_continuations() {
        let (s, [trunk, top, limb, twig, other]) = tree();
        let table = CompoundTable::build(&s, &WindConfig::default(), 1.0);
        assert_eq!(table.compounds().len(), 4);
        let main = table.compound_of(trunk).unwrap();
        assert!(main.main);
        assert_eq!(main.members.as_slice(), &[trunk, top]);
        assert!((main.length - 8.0).abs() < 1e-3);

        let m = table.member(top).unwrap();
        assert!((m.local_distance - 4.0).abs() < 1e-3);
        assert!((m.origin_distance - 4.0).abs() < 1e-3);
        assert_eq!(m.trunk_distance, 0.0);

        let l = table.member(limb).unwrap();
        assert!((l.origin_distance - 2.0).abs() < 1e-3);
        assert_eq!(l.trunk_distance, 0.0);
        let t = table.member(twig).unwrap();
        assert!((t.origin_distance - 6.0).abs() < 1e-3);
        assert!((t.trunk_distance - 4.0).abs() < 1e-3);
        let o = table.member(other).unwrap();
        assert!((o.origin_distance - 6.0).abs() < 1e-3);
    }

    #[test]
    fn phase_groups_split_at_the_trunk() {
        let (s, [trunk, top, limb, twig, other]) = tree();
        let table = CompoundTable::build(&s, &WindConfig::default(), 1.0);
        assert_eq!(table.phase(trunk), 0.0);
        assert_eq!(table.phase(top), 0.0);
        let limb_group = table.compound_of(limb).unwrap().phase_group;
        let twig_group = table.compound_of(twig).unwrap().phase_group;
        let other_group = table.compound_of(other).unwrap().phase_group;
        assert_eq!(limb_group, twig_group);
        assert_ne!(limb_group, other_group);
        assert_eq!(table.phase(limb), table.phase(twig));
        assert_ne!(table.phase(limb), table.phase(other));
        assert!((0.0..1.0).contains(&table.phase(limb)));

        let again = CompoundTable::build(&s, &WindConfig::default(), 1.0);
        assert_eq!(again.phase(other), table.phase(other));
    }

    #[test]
    fn weights_grow_outward() {
        let (s, [trunk, _, limb, twig, _]) = tree();
        let config = WindConfig {
            primary_curve: ResponseCurve::Linear,
            ..WindConfig::default()
        };
        let table = CompoundTable::build(&s, &config, 1.0);
        assert_eq!(table.weight(trunk, 0.0, &config), Vec2::ZERO);
        let base = table.weight(limb, 0.0, &config);
        let tip = table.weight(limb, 1.0, &config);
        assert!(tip.x > base.x);
        assert_eq!(base.y, 0.0);
        assert!(tip.y > 0.0);
        let twig_tip = table.weight(twig, 1.0, &config);
        // The twig tip is the farthest point from the trunk.
        assert!((twig_tip.y - 1.0).abs() < 1e-5);
        assert_eq!(table.weight(trunk, 1.0, &config).y, 0.0);
        assert_eq!(table.weight(BranchId(99), 0.5, &config), Vec2::ZERO);
    }

    #[test]
    fn spread_scales_primary() {
        let (s, [_, _, limb, _, _]) = tree();
        let config = WindConfig::default();
        let doubled = WindConfig {
            spread: 2.0,
            ..WindConfig::default()
        };
        let table = CompoundTable::build(&s, &config, 1.0);
        let a = table.weight(limb, 1.0, &config);
        let b = table.weight(limb, 1.0, &doubled);
        assert!((b.x - 2.0 * a.x).abs() < 1e-6);
    }

    #[test]
    fn mesh_channels_are_filled() {
        let (s, [_, _, limb, _, _]) = tree();
        let mut ctx = BuildContext::new(MeshConfig::default());
        let mesh = ctx.build(&s).unwrap();
        let trunk_span = mesh.skins[0];
        for v in trunk_span.vertex_offset..trunk_span.vertex_offset + trunk_span.vertex_count {
            assert_eq!(mesh.uv2[v as usize].y, 0.0);
            assert_eq!(mesh.uv3[v as usize], Vec2::ZERO);
        }
        let limb_span = mesh.branch_span(limb).unwrap();
        let v = limb_span.vertex_offset as usize;
        assert!(mesh.uv3[v].x > 0.0);
        assert!((mesh.uv3[v].y - 0.5).abs() < 1e-6);
        assert_eq!(mesh.colors[v].z, mesh.uv3[v].x);
        assert_eq!(mesh.colors[v].w, 1.0);
    }
}
