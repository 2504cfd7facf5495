// Procedural skeleton growth.
//
// Grows a `Skeleton` from a `TreeProfile` with an energy budget: the trunk
// bud starts with `initial_energy`, every curve node costs `energy_per_node`,
// and a branch stops after `nodes_per_branch` nodes or when its energy runs
// out. Energy left at a full branch's tip continues as a follow-up branch (so
// long trunks become continuation chains, meshed as one skin). At eligible
// nodes a branch may split: the child takes `split_energy_ratio` of the
// energy remaining at that node and leaves at `split_angle` around a random
// azimuth.
//
// Direction evolves node by node: a coherent random deflection (blended with
// the previous node's deflection by `deflection_coherence`) plus a vertical
// pull of `gravitropism`. Girth is `sqrt(energy · energy_to_girth)` at both
// ends of a branch, so a follow-up starts exactly as thick as its
// predecessor's tip.
//
// Buds are processed with a FIFO worklist, so branch ids are in
// parent-before-child order. Growth stops adding branches at `MAX_BRANCHES`.
//
// See also: `skeleton.rs` for the model being built, `config.rs` for the
// `TreeProfile` presets, the `arbor_generate` binary which drives it.
//
// **Critical constraint: determinism.** All randomness comes from the
// `ArborRng` passed by the caller; the same profile and seed always give the
// same skeleton.

use arbor_prng::ArborRng;
use glam::{Quat, Vec3};
use std::collections::VecDeque;
use std::f32::consts::TAU;
use tracing::{debug, warn};

use crate::config::TreeProfile;
use crate::skeleton::{BranchCurve, GirthProfile, Skeleton, Sprout};
use crate::types::BranchId;

/// Hard cap on the number of grown branches.
pub const MAX_BRANCHES: usize = 4096;

/// How a bud connects to the branch it grows from.
#[derive(Clone, Copy, Debug)]
enum Attachment {
    Root,
    Child { parent: BranchId, position: f32 },
    FollowUp { parent: BranchId },
}

/// A branch waiting to be grown.
#[derive(Clone, Copy, Debug)]
struct Bud {
    attachment: Attachment,
    start: Vec3,
    direction: Vec3,
    /// Deflection carried over from the previous node, for coherence.
    deflection: Vec3,
    energy: f32,
    level: u32,
}

/// A split decided while walking a branch's nodes.
struct Split {
    node: usize,
    start: Vec3,
    direction: Vec3,
    energy: f32,
}

fn girth_for(profile: &TreeProfile, energy: f32) -> f32 {
    (energy.max(0.0) * profile.girth.energy_to_girth)
        .sqrt()
        .max(profile.girth.min_girth)
}

/// Rotate `direction` away from itself by `angle`, around a random azimuth.
fn split_direction(direction: Vec3, angle: f32, rng: &mut ArborRng) -> Vec3 {
    let azimuth = rng.range_f32(0.0, TAU);
    let side = Quat::from_axis_angle(direction, azimuth) * direction.any_orthonormal_vector();
    let axis = direction.cross(side).try_normalize().unwrap_or(side);
    (Quat::from_axis_angle(axis, angle) * direction)
        .try_normalize()
        .unwrap_or(direction)
}

pub fn grow_skeleton(profile: &TreeProfile, rng: &mut ArborRng) -> Skeleton {
    let growth = &profile.growth;
    let split = &profile.split;
    let curvature = &profile.curvature;
    let spacing = growth.node_spacing.max(f32::EPSILON);
    let per_node = growth.energy_per_node.max(f32::EPSILON);
    let coherence = curvature.deflection_coherence.clamp(0.0, 1.0);

    let mut skeleton = Skeleton::new();
    let mut queue = VecDeque::new();
    queue.push_back(Bud {
        attachment: Attachment::Root,
        start: Vec3::ZERO,
        direction: Vec3::Y,
        deflection: Vec3::ZERO,
        energy: growth.initial_energy,
        level: 0,
    });

    while let Some(bud) = queue.pop_front() {
        if skeleton.len() >= MAX_BRANCHES {
            warn!(pending = queue.len() + 1, "branch cap reached, dropping buds");
            break;
        }
        let is_root = matches!(bud.attachment, Attachment::Root);
        if !is_root && bud.energy < growth.min_energy {
            continue;
        }
        let affordable = (bud.energy / per_node).floor() as u32;
        let node_count = affordable.min(growth.nodes_per_branch).max(1);

        // --- Nodes ---
        let mut nodes = Vec::with_capacity(node_count as usize + 1);
        let mut directions = Vec::with_capacity(node_count as usize + 1);
        let mut position = bud.start;
        let mut direction = bud.direction;
        let mut deflection = bud.deflection;
        nodes.push(position);
        directions.push(direction);
        for _ in 0..node_count {
            let random = Vec3::new(rng.signed_f32(1.0), rng.signed_f32(1.0), rng.signed_f32(1.0));
            deflection = deflection.lerp(random, 1.0 - coherence);
            let bent = direction
                + deflection * curvature.random_deflection
                + Vec3::Y * curvature.gravitropism;
            direction = bent.try_normalize().unwrap_or(direction);
            position += direction * spacing;
            nodes.push(position);
            directions.push(direction);
        }

        // --- Break ---
        let break_position = if bud.level > 0 && rng.random_bool(split.break_chance as f64) {
            Some(rng.range_f32(0.5, 0.95))
        } else {
            None
        };

        // --- Splits ---
        let mut energy = bud.energy;
        let mut splits = Vec::new();
        for node in 1..node_count as usize {
            energy -= per_node;
            let progress = node as f32 / node_count as f32;
            if progress < split.min_progress_for_split
                || bud.level >= growth.max_level
                || break_position.is_some_and(|b| progress >= b)
            {
                continue;
            }
            if !rng.random_bool(split.split_chance as f64) {
                continue;
            }
            let angle = split.split_angle + rng.signed_f32(split.split_angle_variance);
            let child_energy = energy.max(0.0) * split.split_energy_ratio.clamp(0.0, 1.0);
            energy -= child_energy;
            splits.push(Split {
                node,
                start: nodes[node],
                direction: split_direction(directions[node], angle, rng),
                energy: child_energy,
            });
        }
        energy = (energy - per_node).max(0.0);

        // --- Branch ---
        let girth = GirthProfile {
            base: girth_for(profile, bud.energy),
            tip: girth_for(profile, energy),
            exponent: profile.girth.taper_exponent,
        };
        let curve = match BranchCurve::new(nodes) {
            Ok(curve) => curve,
            Err(e) => {
                warn!(error = %e, "skipping degenerate bud");
                continue;
            }
        };
        let added = match bud.attachment {
            Attachment::Root => Ok(skeleton.add_root(curve, girth)),
            Attachment::Child { parent, position } => skeleton.add_child(parent, position, curve, girth),
            Attachment::FollowUp { parent } => skeleton.add_follow_up(parent, curve, girth),
        };
        let id = match added {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "skipping bud that could not be attached");
                continue;
            }
        };
        if let Some(position) = break_position {
            if let Err(e) = skeleton.set_broken(id, position) {
                warn!(%id, error = %e, "ignoring break");
            }
        }

        // --- Sprouts ---
        if bud.level >= growth.max_level {
            let end = break_position.unwrap_or(1.0);
            for k in 0..node_count {
                let sprout = Sprout {
                    position: end * (k as f32 + 0.5) / node_count as f32,
                    angle: rng.range_f32(0.0, TAU),
                };
                if let Err(e) = skeleton.add_sprout(id, sprout) {
                    warn!(%id, error = %e, "ignoring sprout");
                }
            }
        }

        for s in splits {
            queue.push_back(Bud {
                attachment: Attachment::Child {
                    parent: id,
                    position: s.node as f32 / node_count as f32,
                },
                start: s.start,
                direction: s.direction,
                deflection: Vec3::ZERO,
                energy: s.energy,
                level: bud.level + 1,
            });
        }
        if break_position.is_none()
            && node_count == growth.nodes_per_branch
            && energy >= growth.min_energy
        {
            queue.push_back(Bud {
                attachment: Attachment::FollowUp { parent: id },
                start: position,
                direction,
                deflection,
                energy,
                level: bud.level,
            });
        }
    }

    debug!(
        branches = skeleton.len(),
        max_level = skeleton.max_level(),
        "grew skeleton"
    );
    skeleton
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MeshConfig;
    use crate::context::BuildContext;

    fn grow(profile: &TreeProfile, seed: u64) -> Skeleton {
        grow_skeleton(profile, &mut ArborRng::new(seed))
    }

    #[test]
    fn deterministic_growth() {
        let a = grow(&TreeProfile::oak(), 42);
        let b = grow(&TreeProfile::oak(), 42);
        assert_eq!(a.len(), b.len());
        for (x, y) in a.branches().iter().zip(b.branches()) {
            assert_eq!(x.curve.nodes(), y.curve.nodes());
            assert_eq!(x.girth, y.girth);
            assert_eq!(x.parent, y.parent);
        }
    }

    #[test]
    fn seeds_change_the_tree() {
        let a = grow(&TreeProfile::oak(), 1);
        let b = grow(&TreeProfile::oak(), 2);
        let differs = a.len() != b.len()
            || a.branches()
                .iter()
                .zip(b.branches())
                .any(|(x, y)| x.curve.nodes() != y.curve.nodes());
        assert!(differs);
    }

    #[test]
    fn structure_is_consistent() {
        let profile = TreeProfile::oak();
        let skeleton = grow(&profile, 7);
        assert_eq!(skeleton.roots().len(), 1);
        assert!(skeleton.len() > 1);
        assert!(skeleton.len() <= MAX_BRANCHES);
        for branch in skeleton.branches() {
            assert!(branch.level <= profile.growth.max_level);
            assert!((0.0..=1.0).contains(&branch.position_on_parent));
            assert!(branch.girth.base >= branch.girth.tip);
            assert!(branch.girth.tip >= profile.girth.min_girth);
            if let Some(next) = branch.follow_up {
                let next = skeleton.branch(next).unwrap();
                assert_eq!(next.level, branch.level);
                assert_eq!(next.girth.base, branch.girth.tip);
                assert_eq!(next.curve.start(), branch.curve.end());
            }
            for &child in &branch.children {
                assert!(child.index() > branch.id.index());
                assert_eq!(skeleton.branch(child).unwrap().level, branch.level + 1);
            }
        }
    }

    #[test]
    fn trunk_grows_upward() {
        let skeleton = grow(&TreeProfile::conifer(), 3);
        let trunk = skeleton.branch(skeleton.roots()[0]).unwrap();
        assert_eq!(trunk.curve.start(), Vec3::ZERO);
        assert!(trunk.curve.end().y > 0.0);
    }

    #[test]
    fn sprouts_only_on_deepest_level() {
        let profile = TreeProfile::sapling();
        let skeleton = grow(&profile, 11);
        for branch in skeleton.branches() {
            if branch.level < profile.growth.max_level {
                assert!(branch.sprouts.is_empty());
            }
            for sprout in &branch.sprouts {
                assert!(sprout.position <= branch.end_position());
            }
        }
    }

    #[test]
    fn broken_branches_have_no_follow_up() {
        let mut profile = TreeProfile::oak();
        profile.split.break_chance = 1.0;
        let skeleton = grow(&profile, 5);
        for branch in skeleton.branches().iter().filter(|b| b.level > 0) {
            assert!(branch.is_broken());
            assert!(branch.follow_up.is_none());
        }
    }

    #[test]
    fn starved_trunk_still_grows() {
        let mut profile = TreeProfile::sapling();
        profile.growth.initial_energy = 0.0;
        let skeleton = grow(&profile, 0);
        assert_eq!(skeleton.len(), 1);
        assert_eq!(skeleton.branches()[0].curve.nodes().len(), 2);
    }

    #[test]
    fn grown_tree_meshes() {
        let skeleton = grow(&TreeProfile::sapling(), 9);
        let mut ctx = BuildContext::new(MeshConfig::default());
        let mesh = ctx.build(&skeleton).unwrap();
        assert!(mesh.triangle_count() > 0);
        assert_eq!(mesh.positions.len(), mesh.vertex_count());
    }
}
