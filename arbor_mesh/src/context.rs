// Build context: one meshing session over a skeleton.
//
// `BuildContext` owns everything that used to be process-wide state: the
// configuration, the skin cache (`FxHashMap<BranchId, Skin>`, keyed by skin
// root), the branch -> skin-root owner map and the build order. Separate
// contexts share nothing, which is what lets `build_forest()` mesh several
// skeletons on the rayon pool.
//
// A pass (`build()`) runs, in order:
//
// 1. skin discovery: a breadth-first worklist from the skeleton roots; each
//    skin root is aggregated once (or taken from the cache), its members are
//    registered in the owner map and their children queued. The resulting
//    order has every parent skin before its children.
// 2. per skin: clear, set side/girth bounds, register builder ranges, sample
//    segments, build rings, face normals, seam welding (soft mode);
// 3. junction normal blending for child skins (soft mode, depth-limited);
// 4. assembly into a `TreeMesh`, then the UV and wind meta builders.
//
// The cache is never invalidated automatically. After a structural change to
// the skeleton (lengths, girth, links) the caller must invoke
// `clear_reference_skins()`; reusing a stale skin is wrong output, not a
// crash.
//
// See also: `skin.rs`, `sampler.rs`, `stitch.rs`, `normals.rs`, `mesh.rs`,
// `uv_meta.rs`, `wind_meta.rs` for the stages themselves.

use glam::{Quat, Vec3};
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use tracing::{debug, info, instrument, warn};

use crate::config::MeshConfig;
use crate::mesh::TreeMesh;
use crate::normals::{Junction, blend_junction, face_normals, weld_duplicates};
use crate::sampler::{register_ranges, sample_skin};
use crate::skeleton::{Skeleton, orthonormalize};
use crate::skin::Skin;
use crate::stitch::build_skin;
use crate::types::{BranchId, NormalMode};
use crate::uv_meta;
use crate::wind_meta::{self, CompoundTable};

/// Surface placement of a sprout (leaf, fruit, twig card).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SproutAnchor {
    pub branch: BranchId,
    /// Point on the branch surface.
    pub position: Vec3,
    /// Outward surface normal at `position`.
    pub normal: Vec3,
    /// Branch direction at `position`.
    pub direction: Vec3,
}

pub struct BuildContext {
    config: MeshConfig,
    skins: FxHashMap<BranchId, Skin>,
    owners: FxHashMap<BranchId, BranchId>,
    order: Vec<BranchId>,
}

impl BuildContext {
    pub fn new(config: MeshConfig) -> Self {
        Self {
            config,
            skins: FxHashMap::default(),
            owners: FxHashMap::default(),
            order: Vec::new(),
        }
    }

    pub fn config(&self) -> &MeshConfig {
        &self.config
    }

    /// Replace the configuration. Cached skins stay valid: everything that
    /// depends on the config is recomputed every pass.
    pub fn set_config(&mut self, config: MeshConfig) {
        self.config = config;
    }

    /// Drop every cached skin. Required after a structural skeleton change.
    pub fn clear_reference_skins(&mut self) {
        self.skins.clear();
        self.owners.clear();
        self.order.clear();
    }

    pub fn skin_count(&self) -> usize {
        self.skins.len()
    }

    /// The skin rooted at `root`.
    pub fn skin_for(&self, root: BranchId) -> Option<&Skin> {
        self.skins.get(&root)
    }

    /// The skin `branch` was meshed into during the last pass.
    pub fn skin_of(&self, branch: BranchId) -> Option<&Skin> {
        self.owners.get(&branch).and_then(|root| self.skins.get(root))
    }

    /// Skins of the last pass in build order.
    pub fn skins(&self) -> impl Iterator<Item = &Skin> + '_ {
        self.order.iter().filter_map(|root| self.skins.get(root))
    }

    /// Interpolated girth of the skin rooted at `root`.
    pub fn girth_at(&self, root: BranchId, skin_position: f32) -> Option<f32> {
        self.skin_for(root)?.girth_at(skin_position)
    }

    /// The parent skin of a child skin and the skin position on the parent
    /// where it is attached. `None` for root skins.
    pub fn attachment(&self, skeleton: &Skeleton, skin: &Skin) -> Option<(&Skin, f32)> {
        let root = skeleton.branch(skin.id)?;
        let parent = root.parent?;
        if root.is_follow_up {
            return None;
        }
        let parent_skin = self.skin_of(parent)?;
        let position = parent_skin.to_skin(parent, root.position_on_parent)?;
        Some((parent_skin, position))
    }

    /// Surface anchors of `branch`'s sprouts, from the last pass. Sprouts past
    /// a break are skipped.
    pub fn sprout_anchors(&self, skeleton: &Skeleton, branch: BranchId) -> Vec<SproutAnchor> {
        let (Some(b), Some(skin)) = (skeleton.branch(branch), self.skin_of(branch)) else {
            return Vec::new();
        };
        b.sprouts
            .iter()
            .filter(|s| s.position <= b.end_position())
            .filter_map(|sprout| {
                let skin_position = skin.to_skin(branch, sprout.position)?;
                let (center, direction) = skin.frame_at(skin_position)?;
                let girth = skin.girth_at(skin_position)?;
                let point = b.curve.eval(sprout.position);
                let radial = Quat::from_axis_angle(point.tangent, sprout.angle) * point.normal;
                let normal = orthonormalize(radial, direction);
                Some(SproutAnchor {
                    branch,
                    position: center + normal * girth,
                    normal,
                    direction,
                })
            })
            .collect()
    }

    /// Discover skins breadth-first from the roots.
    fn collect_skins(&mut self, skeleton: &Skeleton) {
        self.order.clear();
        self.owners.clear();
        let mut queue: VecDeque<BranchId> = skeleton.roots().iter().copied().collect();
        while let Some(root) = queue.pop_front() {
            if self.owners.contains_key(&root) {
                warn!(%root, "branch reached twice, skipping");
                continue;
            }
            if !self.skins.contains_key(&root) {
                match Skin::aggregate(skeleton, root) {
                    Some(skin) => {
                        self.skins.insert(root, skin);
                    }
                    None => {
                        warn!(%root, "skin root missing from skeleton");
                        continue;
                    }
                }
            }
            let Some(skin) = self.skins.get(&root) else {
                continue;
            };
            self.order.push(root);
            for sub in &skin.sub_ranges {
                self.owners.insert(sub.branch, root);
                let Some(branch) = skeleton.branch(sub.branch) else {
                    continue;
                };
                for &child in &branch.children {
                    match skeleton.branch(child) {
                        Some(c) if c.position_on_parent <= sub.branch_end => queue.push_back(child),
                        Some(_) => debug!(%child, parent = %branch.id, "child beyond break, not meshed"),
                        None => warn!(%child, parent = %branch.id, "child link to a missing branch"),
                    }
                }
            }
        }
    }

    /// Smallest and largest average girth over the meshed branches.
    fn girth_bounds(&self, skeleton: &Skeleton) -> (f32, f32) {
        let mut bounds: Option<(f32, f32)> = None;
        for &id in self.owners.keys() {
            let Some(branch) = skeleton.branch(id) else {
                continue;
            };
            let g = branch.girth.average();
            bounds = Some(match bounds {
                Some((lo, hi)) => (lo.min(g), hi.max(g)),
                None => (g, g),
            });
        }
        bounds.unwrap_or((0.0, 0.0))
    }

    fn junction(&self, skeleton: &Skeleton, skin: &Skin) -> Option<Junction> {
        let (parent, position) = self.attachment(skeleton, skin)?;
        let (parent_center, parent_direction) = parent.frame_at(position)?;
        Some(Junction {
            parent_center,
            parent_direction,
            parent_girth: parent.girth_at(position)?,
            scale: self.config.scale,
        })
    }

    /// Run a full generation pass. Returns `None` only when the skeleton has
    /// no root branch; every other defect is skipped and logged.
    #[instrument(skip_all, fields(branches = skeleton.len()))]
    pub fn build(&mut self, skeleton: &Skeleton) -> Option<TreeMesh> {
        if skeleton.roots().is_empty() {
            warn!("skeleton has no root branch, nothing to mesh");
            return None;
        }
        info!(mode = ?self.config.normal_mode, quality = ?self.config.quality, "mesh pass started");

        // --- Skins ---
        self.collect_skins(skeleton);
        let (min_sides, max_sides) = self.config.side_bounds();
        if (min_sides, max_sides) != (self.config.min_sides, self.config.max_sides) {
            warn!(
                min = self.config.min_sides,
                max = self.config.max_sides,
                min_sides,
                max_sides,
                "side-count bounds clamped"
            );
        }
        let (min_avg_girth, max_avg_girth) = self.girth_bounds(skeleton);
        let soft = self.config.normal_mode == NormalMode::Soft;

        for root in &self.order {
            let Some(skin) = self.skins.get_mut(root) else {
                continue;
            };
            skin.clear();
            skin.min_sides = min_sides;
            skin.max_sides = max_sides;
            skin.min_avg_girth = min_avg_girth;
            skin.max_avg_girth = max_avg_girth;
            register_ranges(skin, skeleton, &self.config);
            sample_skin(skin, skeleton, &self.config);
            build_skin(skin, self.config.normal_mode, self.config.ring_rotation);
            face_normals(&mut skin.buffers);
            if soft {
                weld_duplicates(&mut skin.buffers.vertices);
            }
            debug!(
                skin = %skin.id,
                segments = skin.segments.len(),
                vertices = skin.buffers.vertices.len(),
                triangles = skin.buffers.triangles.len(),
                "skin built"
            );
        }

        // --- Junction normals ---
        let blend = &self.config.normal_blend;
        if soft && blend.enabled && blend.max_depth > 0 {
            let junctions: Vec<(BranchId, Junction)> = self
                .skins()
                .filter(|s| s.level >= 1 && s.level <= blend.max_depth)
                .filter_map(|s| Some((s.id, self.junction(skeleton, s)?)))
                .collect();
            for (root, junction) in junctions {
                if let Some(skin) = self.skins.get_mut(&root) {
                    blend_junction(skin, &junction);
                }
            }
        }

        // --- Assembly and meta channels ---
        let mut mesh = TreeMesh::assemble(self.skins());
        uv_meta::apply(&mut mesh, self, skeleton);
        let compounds = CompoundTable::build(skeleton, &self.config.wind, self.config.scale);
        wind_meta::apply(&mut mesh, &compounds, self, skeleton);

        info!(
            skins = mesh.skins.len(),
            vertices = mesh.vertex_count(),
            triangles = mesh.triangle_count(),
            "mesh pass finished"
        );
        Some(mesh)
    }
}

/// Mesh several independent skeletons in parallel, one context each.
pub fn build_forest(skeletons: &[Skeleton], config: &MeshConfig) -> Vec<Option<TreeMesh>> {
    skeletons
        .par_iter()
        .map(|skeleton| BuildContext::new(config.clone()).build(skeleton))
        .collect()
}
