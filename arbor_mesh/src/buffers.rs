// Per-skin geometry buffers and per-vertex bookkeeping.
//
// `VertexTable` is a struct-of-arrays: one column per attribute, all columns
// grown together through `push()` so they can never drift out of step. Each
// vertex records the segment it belongs to, its radial index and radial
// fraction on that segment's ring, the branch that owns it, and, for ring
// wrap vertices, the index of the earlier vertex it duplicates. The normal
// finisher uses the duplicate links to weld normals; the UV and wind meta
// builders read the rest.
//
// `TriangleRecord` keeps the polygon face index (a quad contributes two
// triangles with the same face index), the owning segment, and the three
// vertex indices. Triangles whose indices are not yet in the vertex table are
// rejected at insertion time.

use glam::Vec3;
use tracing::warn;

use crate::types::{BranchId, VertexRole};

/// One vertex as seen by callers; the table stores these column-wise.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VertexRecord {
    pub position: Vec3,
    /// Index into the owning skin's segment list.
    pub segment: u32,
    pub branch: BranchId,
    /// 0..sides on the ring; `sides` for the wrap duplicate.
    pub radial_index: u16,
    /// `radial_index / sides`, so the wrap duplicate has 1.0.
    pub radial_fraction: f32,
    /// Earlier vertex at the same location whose normal must match.
    pub duplicate_of: Option<u32>,
    pub role: VertexRole,
}

/// Struct-of-arrays vertex storage.
#[derive(Clone, Debug, Default)]
pub struct VertexTable {
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub segments: Vec<u32>,
    pub branches: Vec<BranchId>,
    pub radial_indices: Vec<u16>,
    pub radial_fractions: Vec<f32>,
    pub duplicates: Vec<Option<u32>>,
    pub roles: Vec<VertexRole>,
}

impl VertexTable {
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Append a vertex and return its index. Normals start at zero and are
    /// filled in by the normal finisher.
    pub fn push(&mut self, record: VertexRecord) -> u32 {
        let index = self.positions.len() as u32;
        debug_assert!(record.duplicate_of.is_none_or(|d| d < index));
        self.positions.push(record.position);
        self.normals.push(Vec3::ZERO);
        self.segments.push(record.segment);
        self.branches.push(record.branch);
        self.radial_indices.push(record.radial_index);
        self.radial_fractions.push(record.radial_fraction);
        self.duplicates.push(record.duplicate_of);
        self.roles.push(record.role);
        index
    }

    pub fn clear(&mut self) {
        self.positions.clear();
        self.normals.clear();
        self.segments.clear();
        self.branches.clear();
        self.radial_indices.clear();
        self.radial_fractions.clear();
        self.duplicates.clear();
        self.roles.clear();
    }

    /// Append all of `other`, shifting its indices by the current length.
    pub fn extend_from(&mut self, other: &VertexTable) {
        let offset = self.len() as u32;
        self.positions.extend_from_slice(&other.positions);
        self.normals.extend_from_slice(&other.normals);
        self.segments.extend_from_slice(&other.segments);
        self.branches.extend_from_slice(&other.branches);
        self.radial_indices.extend_from_slice(&other.radial_indices);
        self.radial_fractions.extend_from_slice(&other.radial_fractions);
        self.duplicates
            .extend(other.duplicates.iter().map(|d| d.map(|i| i + offset)));
        self.roles.extend_from_slice(&other.roles);
    }
}

/// One emitted triangle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TriangleRecord {
    /// Polygon face index; both halves of a quad share it.
    pub face: u32,
    pub segment: u32,
    pub vertices: [u32; 3],
}

/// Geometry produced for one skin.
#[derive(Clone, Debug, Default)]
pub struct SkinBuffers {
    pub vertices: VertexTable,
    pub triangles: Vec<TriangleRecord>,
    next_face: u32,
}

impl SkinBuffers {
    pub fn clear(&mut self) {
        self.vertices.clear();
        self.triangles.clear();
        self.next_face = 0;
    }

    /// Reserve the next face index.
    pub fn next_face(&mut self) -> u32 {
        let face = self.next_face;
        self.next_face += 1;
        face
    }

    pub fn face_count(&self) -> u32 {
        self.next_face
    }

    /// Append a triangle. Returns false (and drops it) if any index is past
    /// the end of the vertex table.
    pub fn push_triangle(&mut self, face: u32, segment: u32, vertices: [u32; 3]) -> bool {
        let count = self.vertices.len() as u32;
        if vertices.iter().any(|&v| v >= count) {
            warn!(?vertices, count, "dropping triangle with out-of-range vertex index");
            return false;
        }
        self.triangles.push(TriangleRecord {
            face,
            segment,
            vertices,
        });
        true
    }

    /// Flat index buffer (3 per triangle).
    pub fn indices(&self) -> impl Iterator<Item = u32> + '_ {
        self.triangles.iter().flat_map(|t| t.vertices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring_vertex(segment: u32, radial_index: u16, duplicate_of: Option<u32>) -> VertexRecord {
        VertexRecord {
            position: Vec3::new(radial_index as f32, segment as f32, 0.0),
            segment,
            branch: BranchId(0),
            radial_index,
            radial_fraction: radial_index as f32 / 4.0,
            duplicate_of,
            role: VertexRole::Ring,
        }
    }

    #[test]
    fn columns_grow_together() {
        let mut table = VertexTable::default();
        let a = table.push(ring_vertex(0, 0, None));
        let b = table.push(ring_vertex(0, 4, Some(a)));
        assert_eq!((a, b), (0, 1));
        assert_eq!(table.len(), 2);
        assert_eq!(table.normals.len(), 2);
        assert_eq!(table.duplicates.len(), 2);
        assert_eq!(table.duplicates[1], Some(0));
        assert_eq!(table.radial_fractions[1], 1.0);
        table.clear();
        assert!(table.is_empty());
        assert!(table.roles.is_empty());
    }

    #[test]
    fn extend_shifts_duplicate_links() {
        let mut first = VertexTable::default();
        first.push(ring_vertex(0, 0, None));
        let mut second = VertexTable::default();
        let a = second.push(ring_vertex(0, 0, None));
        second.push(ring_vertex(0, 4, Some(a)));
        first.extend_from(&second);
        assert_eq!(first.len(), 3);
        assert_eq!(first.duplicates[2], Some(1));
    }

    #[test]
    fn out_of_range_triangles_are_rejected() {
        let mut buffers = SkinBuffers::default();
        buffers.vertices.push(ring_vertex(0, 0, None));
        buffers.vertices.push(ring_vertex(0, 1, None));
        buffers.vertices.push(ring_vertex(1, 0, None));
        let face = buffers.next_face();
        assert!(buffers.push_triangle(face, 1, [0, 1, 2]));
        assert!(!buffers.push_triangle(face, 1, [0, 1, 3]));
        assert_eq!(buffers.triangles.len(), 1);
        assert_eq!(buffers.indices().collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(buffers.face_count(), 1);
        buffers.clear();
        assert_eq!(buffers.face_count(), 0);
    }
}
