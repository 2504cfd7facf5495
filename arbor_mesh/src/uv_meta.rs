// UV meta builder: continuous-length bark coordinates (`uv0`).
//
// Runs after assembly and reads only the per-vertex bookkeeping (segment,
// radial fraction, role) plus the owning skin's segment list.
//
// V follows the surface length: per skin, an accumulated length is advanced
// from segment to segment by the distance between segment centers. With girth
// sensitivity on, each increment is scaled by `maxGirth / localGirth` (local
// girth clamped to a floor), which stretches V on thin parts so the texel
// density around the branch stays roughly constant. The accumulated length is
// divided by the skin's perimeter (`2π · maxGirth`) and multiplied by the
// tiling factor.
//
// U is the radial fraction, so the wrap vertex gets 1.0 and the seam is
// continuous, plus an optional `twist · length` displacement for helical
// bark. Tip-center vertices get U = 0.5.
//
// Skins are processed in build order (parents first). With parent-offset
// inheritance, a child skin starts at the parent's accumulated length at
// its attachment point instead of zero.

use glam::Vec2;
use rustc_hash::FxHashMap;
use std::f32::consts::TAU;

use crate::config::UvConfig;
use crate::context::BuildContext;
use crate::mesh::TreeMesh;
use crate::skeleton::Skeleton;
use crate::skin::Skin;
use crate::types::{BranchId, VertexRole};

/// Accumulated surface length at every segment of `skin`, starting at
/// `start`. Non-decreasing.
pub fn accumulate_lengths(skin: &Skin, config: &UvConfig, scale: f32, start: f32) -> Vec<f32> {
    let max_girth = skin.max_girth();
    let floor = (config.girth_floor * scale).max(f32::EPSILON);
    let mut acc = Vec::with_capacity(skin.segments.len());
    let mut total = start;
    for (i, segment) in skin.segments.iter().enumerate() {
        if i > 0 {
            let prev = &skin.segments[i - 1];
            let mut delta = prev.center.distance(segment.center);
            if config.girth_sensitive {
                let local = (0.5 * (prev.girth + segment.girth)).max(floor);
                delta *= max_girth.max(floor) / local;
            }
            total += delta;
        }
        acc.push(total);
    }
    acc
}

/// Accumulated length at a skin position, interpolated between segments.
fn length_at(skin: &Skin, acc: &[f32], skin_position: f32) -> Option<f32> {
    let (i, f) = skin.segment_at(skin_position)?;
    let a = *acc.get(i)?;
    let b = acc.get(i + 1).copied().unwrap_or(a);
    Some(a + (b - a) * f)
}

/// Write `mesh.uv0` for every skin of the last pass.
pub fn apply(mesh: &mut TreeMesh, ctx: &BuildContext, skeleton: &Skeleton) {
    let config = &ctx.config().uv;
    let scale = ctx.config().scale;
    let mut lengths: FxHashMap<BranchId, Vec<f32>> = FxHashMap::default();

    for span in &mesh.skins {
        let Some(skin) = ctx.skin_for(span.root) else {
            continue;
        };
        let start = if config.inherit_parent_offset {
            ctx.attachment(skeleton, skin)
                .and_then(|(parent, position)| length_at(parent, lengths.get(&parent.id)?, position))
                .unwrap_or(0.0)
        } else {
            0.0
        };
        let acc = accumulate_lengths(skin, config, scale, start);
        let perimeter = TAU * skin.max_girth();
        let perimeter = if perimeter > f32::EPSILON { perimeter } else { 1.0 };

        let first = span.vertex_offset as usize;
        for v in first..first + span.vertex_count as usize {
            let segment = mesh.vertices.segments[v] as usize;
            let length = acc.get(segment).copied().unwrap_or(start);
            let u = match mesh.vertices.roles[v] {
                VertexRole::TipCenter => 0.5,
                VertexRole::Ring => mesh.vertices.radial_fractions[v] + config.twist * length,
            };
            mesh.uv0[v] = Vec2::new(u, length / perimeter * config.v_tiling);
        }
        lengths.insert(span.root, acc);
    }
}
