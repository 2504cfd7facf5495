// Mesh assembly: all skins into one buffer.
//
// `TreeMesh::assemble()` concatenates the per-skin buffers in build order
// (parents before children). Vertex indices in triangle records are offset
// into the shared buffer and face indices are made unique across skins;
// segment indices in the merged vertex table stay skin-local, which is what
// the meta builders need to look segments up in the owning skin.
//
// Output channels:
//
// - `uv0`: bark texture coordinates (`uv_meta.rs`);
// - `uv1`: normalized structure coordinates (radial fraction, skin position),
//   filled here;
// - `uv2`: wind weights (primary, secondary) (`wind_meta.rs`);
// - `uv3`: (wind phase, hierarchy level / max level) (`wind_meta.rs`);
// - `colors`: RGBA (primary clamped to 1, secondary, phase, 1).
//
// Every skin gets a `SkinSpan` into the shared buffers and every branch a
// `BranchSpan`; the ring builder emits each branch's vertices and triangles
// contiguously, so a span is a plain `[offset, offset + count)` range.
// `split_skins()` cuts the buffer back into one self-contained mesh per skin.

use glam::{Vec2, Vec3, Vec4};
use rustc_hash::FxHashMap;

use crate::buffers::{TriangleRecord, VertexTable};
use crate::skin::Skin;
use crate::types::BranchId;

/// Where one skin lives in the shared buffers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SkinSpan {
    pub root: BranchId,
    pub level: u32,
    pub vertex_offset: u32,
    pub vertex_count: u32,
    /// Offset and count in `indices` (3 per triangle).
    pub index_offset: u32,
    pub index_count: u32,
}

/// Where one branch lives in the shared buffers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BranchSpan {
    pub skin: BranchId,
    pub vertex_offset: u32,
    pub vertex_count: u32,
    pub index_offset: u32,
    pub index_count: u32,
}

impl BranchSpan {
    fn include_vertex(&mut self, index: u32) {
        let end = (self.vertex_offset + self.vertex_count).max(index + 1);
        self.vertex_offset = self.vertex_offset.min(index);
        self.vertex_count = end - self.vertex_offset;
    }

    fn include_triangle(&mut self, triangle: u32) {
        let first = triangle * 3;
        if self.index_count == 0 {
            self.index_offset = first;
            self.index_count = 3;
            return;
        }
        let end = (self.index_offset + self.index_count).max(first + 3);
        self.index_offset = self.index_offset.min(first);
        self.index_count = end - self.index_offset;
    }
}

/// The finished surface of a whole skeleton.
#[derive(Clone, Debug, Default)]
pub struct TreeMesh {
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub indices: Vec<u32>,
    pub uv0: Vec<Vec2>,
    pub uv1: Vec<Vec2>,
    pub uv2: Vec<Vec2>,
    pub uv3: Vec<Vec2>,
    pub colors: Vec<Vec4>,
    pub vertices: VertexTable,
    pub triangles: Vec<TriangleRecord>,
    pub skins: Vec<SkinSpan>,
    pub branch_spans: FxHashMap<BranchId, BranchSpan>,
}

/// One skin cut out of a `TreeMesh`, with indices rebased to zero.
#[derive(Clone, Debug)]
pub struct SkinMesh {
    pub root: BranchId,
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub indices: Vec<u32>,
    pub uv0: Vec<Vec2>,
    pub uv1: Vec<Vec2>,
    pub uv2: Vec<Vec2>,
    pub uv3: Vec<Vec2>,
    pub colors: Vec<Vec4>,
}

impl TreeMesh {
    /// Concatenate skins in the given order. Meta channels other than `uv1`
    /// are zero-filled for the meta builders to overwrite.
    pub fn assemble<'a>(skins: impl IntoIterator<Item = &'a Skin>) -> Self {
        let mut mesh = TreeMesh::default();
        let mut face_offset = 0u32;
        for skin in skins {
            let buffers = &skin.buffers;
            let vertex_offset = mesh.vertices.len() as u32;
            let index_offset = mesh.indices.len() as u32;
            let triangle_offset = mesh.triangles.len() as u32;
            mesh.vertices.extend_from(&buffers.vertices);

            for i in 0..buffers.vertices.len() {
                let segment = buffers.vertices.segments[i] as usize;
                let skin_position = skin.segments.get(segment).map_or(0.0, |s| s.skin_position);
                mesh.uv1
                    .push(Vec2::new(buffers.vertices.radial_fractions[i], skin_position));
                let branch = buffers.vertices.branches[i];
                mesh.branch_spans
                    .entry(branch)
                    .or_insert(BranchSpan {
                        skin: skin.id,
                        vertex_offset: vertex_offset + i as u32,
                        vertex_count: 0,
                        index_offset: 0,
                        index_count: 0,
                    })
                    .include_vertex(vertex_offset + i as u32);
            }

            for (t, tri) in buffers.triangles.iter().enumerate() {
                let shifted = TriangleRecord {
                    face: tri.face + face_offset,
                    segment: tri.segment,
                    vertices: tri.vertices.map(|v| v + vertex_offset),
                };
                mesh.indices.extend_from_slice(&shifted.vertices);
                mesh.triangles.push(shifted);
                if let Some(segment) = skin.segments.get(tri.segment as usize) {
                    if let Some(span) = mesh.branch_spans.get_mut(&segment.branch) {
                        span.include_triangle(triangle_offset + t as u32);
                    }
                }
            }
            face_offset += buffers.face_count();

            mesh.skins.push(SkinSpan {
                root: skin.id,
                level: skin.level,
                vertex_offset,
                vertex_count: buffers.vertices.len() as u32,
                index_offset,
                index_count: mesh.indices.len() as u32 - index_offset,
            });
        }

        mesh.positions = mesh.vertices.positions.clone();
        mesh.normals = mesh.vertices.normals.clone();
        let count = mesh.positions.len();
        mesh.uv0 = vec![Vec2::ZERO; count];
        mesh.uv2 = vec![Vec2::ZERO; count];
        mesh.uv3 = vec![Vec2::ZERO; count];
        mesh.colors = vec![Vec4::W; count];
        mesh
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn skin_span(&self, root: BranchId) -> Option<&SkinSpan> {
        self.skins.iter().find(|s| s.root == root)
    }

    /// Vertex and index span of one branch.
    pub fn branch_span(&self, branch: BranchId) -> Option<&BranchSpan> {
        self.branch_spans.get(&branch)
    }

    /// One self-contained mesh per skin, in build order.
    pub fn split_skins(&self) -> Vec<SkinMesh> {
        self.skins
            .iter()
            .map(|span| {
                let v = span.vertex_offset as usize..(span.vertex_offset + span.vertex_count) as usize;
                let i = span.index_offset as usize..(span.index_offset + span.index_count) as usize;
                SkinMesh {
                    root: span.root,
                    positions: self.positions[v.clone()].to_vec(),
                    normals: self.normals[v.clone()].to_vec(),
                    indices: self.indices[i].iter().map(|&x| x - span.vertex_offset).collect(),
                    uv0: self.uv0[v.clone()].to_vec(),
                    uv1: self.uv1[v.clone()].to_vec(),
                    uv2: self.uv2[v.clone()].to_vec(),
                    uv3: self.uv3[v.clone()].to_vec(),
                    colors: self.colors[v].to_vec(),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skeleton::{BranchCurve, GirthProfile, Skeleton};
    use crate::skin::Segment;
    use crate::stitch::build_skin;
    use crate::types::{BuilderTag, NormalMode};

    fn built_skin(skeleton: &Skeleton, root: BranchId, owners: &[u32], y0: f32) -> Skin {
        let mut skin = Skin::aggregate(skeleton, root).unwrap();
        let n = owners.len();
        skin.segments = owners
            .iter()
            .enumerate()
            .map(|(i, &b)| Segment {
                branch: BranchId(b),
                center: Vec3::new(0.0, y0 + i as f32, 0.0),
                direction: Vec3::Y,
                normal: Vec3::X,
                sides: 5,
                girth: 0.3,
                branch_position: i as f32 / (n - 1) as f32,
                skin_position: i as f32 / (n - 1) as f32,
                builder: BuilderTag::Default,
                range: None,
            })
            .collect();
        build_skin(&mut skin, NormalMode::Soft, 0.0);
        skin
    }

    fn two_skins() -> (Skin, Skin) {
        let mut skeleton = Skeleton::new();
        let a = skeleton.add_root(
            BranchCurve::straight(Vec3::ZERO, Vec3::Y * 2.0, 2),
            GirthProfile::constant(0.3),
        );
        skeleton
            .add_follow_up(
                a,
                BranchCurve::straight(Vec3::Y * 2.0, Vec3::Y * 3.0, 2),
                GirthProfile::constant(0.3),
            )
            .unwrap();
        let c = skeleton
            .add_child(
                a,
                0.5,
                BranchCurve::straight(Vec3::Y, Vec3::new(1.0, 2.0, 0.0), 2),
                GirthProfile::constant(0.1),
            )
            .unwrap();
        (
            built_skin(&skeleton, a, &[0, 0, 0, 1], 0.0),
            built_skin(&skeleton, c, &[2, 2], 1.0),
        )
    }

    #[test]
    fn assemble_offsets_indices_and_faces() {
        let (trunk, child) = two_skins();
        let mesh = TreeMesh::assemble([&trunk, &child]);
        let trunk_vertices = trunk.buffers.vertices.len() as u32;
        assert_eq!(mesh.vertex_count(), trunk_vertices as usize + child.buffers.vertices.len());
        assert_eq!(mesh.skins.len(), 2);
        let child_span = mesh.skin_span(child.id).unwrap();
        assert_eq!(child_span.vertex_offset, trunk_vertices);
        let child_indices = &mesh.indices[child_span.index_offset as usize..];
        assert!(child_indices.iter().all(|&i| i >= trunk_vertices));
        let faces: std::collections::HashSet<u32> = mesh.triangles.iter().map(|t| t.face).collect();
        assert_eq!(faces.len() as u32, trunk.buffers.face_count() + child.buffers.face_count());
        assert_eq!(mesh.uv0.len(), mesh.vertex_count());
        assert_eq!(mesh.colors[0], Vec4::W);
    }

    #[test]
    fn branch_spans_are_contiguous_and_disjoint() {
        let (trunk, child) = two_skins();
        let mesh = TreeMesh::assemble([&trunk, &child]);
        let a = mesh.branch_span(BranchId(0)).unwrap();
        let b = mesh.branch_span(BranchId(1)).unwrap();
        let c = mesh.branch_span(BranchId(2)).unwrap();
        assert_eq!(a.vertex_offset, 0);
        assert_eq!(a.vertex_offset + a.vertex_count, b.vertex_offset);
        assert_eq!(b.vertex_offset + b.vertex_count, c.vertex_offset);
        assert_eq!(a.index_offset + a.index_count, b.index_offset);
        assert_eq!(b.skin, BranchId(0));
        assert_eq!(c.skin, BranchId(2));
        for span in [a, b, c] {
            let range = span.vertex_offset..span.vertex_offset + span.vertex_count;
            assert!(range.clone().all(|v| mesh.vertices.branches[v as usize] == mesh.vertices.branches[range.start as usize]));
        }
        assert!(mesh.branch_span(BranchId(9)).is_none());
    }

    #[test]
    fn uv1_carries_structure_coordinates() {
        let (trunk, child) = two_skins();
        let mesh = TreeMesh::assemble([&trunk, &child]);
        assert_eq!(mesh.uv1[0], Vec2::new(0.0, 0.0));
        assert_eq!(mesh.uv1[5], Vec2::new(1.0, 0.0));
        let last_trunk_ring = trunk.buffers.vertices.len() - 2;
        assert_eq!(mesh.uv1[last_trunk_ring].y, 1.0);
    }

    #[test]
    fn split_skins_rebases_indices() {
        let (trunk, child) = two_skins();
        let mesh = TreeMesh::assemble([&trunk, &child]);
        let parts = mesh.split_skins();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].positions.len(), trunk.buffers.vertices.len());
        assert_eq!(parts[1].root, child.id);
        assert_eq!(parts[1].indices, child.buffers.indices().collect::<Vec<_>>());
        assert_eq!(parts[1].positions, child.buffers.vertices.positions);
    }
}
