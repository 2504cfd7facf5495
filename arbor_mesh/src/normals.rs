// Normal finisher.
//
// Three passes over a skin's buffers, run after ring construction:
//
// 1. `face_normals()`: area-weighted accumulation of triangle normals onto
//    their vertices, then normalization. In hard mode every face owns its
//    vertices, so this alone yields flat shading.
// 2. `weld_duplicates()`: soft mode only. Vertices linked by `duplicate_of`
//    (ring wrap seams) are grouped by the root of their link chain; every
//    member gets the normalized sum of the group, so the pair ends up with
//    bit-identical normals and the seam disappears.
// 3. `blend_junction()`: soft mode only, for child skins up to the
//    configured hierarchy depth. Near the attachment the child's normals are
//    pulled towards the parent's surface normal with weight
//    `cos(childGirth / parentGirth · π/2)`, fading out linearly over twice the
//    parent girth along the child. Thin children blend strongly; a child as
//    thick as its parent does not blend at all. The blend target is the
//    parent's radial surface normal at the join, not its axis direction.
//
// The junction needs the parent skin's frame at the attachment point, which
// the `BuildContext` resolves before calling in (see `Junction`).

use glam::Vec3;
use std::f32::consts::FRAC_PI_2;

use crate::buffers::{SkinBuffers, VertexTable};
use crate::skin::Skin;

/// Normal used when a vertex has no non-degenerate adjacent face.
const FALLBACK_NORMAL: Vec3 = Vec3::Y;

/// Recompute vertex normals from the triangulation.
pub fn face_normals(buffers: &mut SkinBuffers) {
    let normals = &mut buffers.vertices.normals;
    normals.fill(Vec3::ZERO);
    let positions = &buffers.vertices.positions;
    for tri in &buffers.triangles {
        let [a, b, c] = tri.vertices.map(|i| i as usize);
        // Cross product length is twice the triangle area: area weighting.
        let n = (positions[b] - positions[a]).cross(positions[c] - positions[a]);
        normals[a] += n;
        normals[b] += n;
        normals[c] += n;
    }
    for n in normals.iter_mut() {
        *n = n.try_normalize().unwrap_or(FALLBACK_NORMAL);
    }
}

/// Give every duplicate group one shared normal.
pub fn weld_duplicates(vertices: &mut VertexTable) {
    let count = vertices.len();
    let mut roots: Vec<u32> = Vec::with_capacity(count);
    let mut sums = vec![Vec3::ZERO; count];
    let mut sizes = vec![0u32; count];
    for i in 0..count {
        // Links always point backwards, so the partner's root is known.
        let root = match vertices.duplicates[i] {
            Some(d) if (d as usize) < i => roots[d as usize],
            _ => i as u32,
        };
        roots.push(root);
        sums[root as usize] += vertices.normals[i];
        sizes[root as usize] += 1;
    }
    for i in 0..count {
        let root = roots[i] as usize;
        if sizes[root] > 1 {
            vertices.normals[i] = sums[root].try_normalize().unwrap_or(FALLBACK_NORMAL);
        }
    }
}

/// Parent frame at a child skin's attachment point.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Junction {
    pub parent_center: Vec3,
    /// Unit parent direction at the attachment.
    pub parent_direction: Vec3,
    /// Parent girth at the attachment (scaled).
    pub parent_girth: f32,
    /// Uniform scale of the pass, to turn skin length into distance.
    pub scale: f32,
}

impl Junction {
    /// Blend strength for a child of base girth `child_girth`.
    pub fn blend_factor(&self, child_girth: f32) -> f32 {
        if self.parent_girth <= f32::EPSILON {
            return 0.0;
        }
        let ratio = (child_girth / self.parent_girth).clamp(0.0, 1.0);
        (ratio * FRAC_PI_2).cos().max(0.0)
    }

    /// Parent surface normal facing `position`.
    pub fn surface_normal(&self, position: Vec3) -> Option<Vec3> {
        let offset = position - self.parent_center;
        (offset - self.parent_direction * offset.dot(self.parent_direction)).try_normalize()
    }
}

/// Pull the child skin's normals near its base towards the parent surface.
pub fn blend_junction(skin: &mut Skin, junction: &Junction) {
    let Some(first) = skin.segments.first() else {
        return;
    };
    let blend = junction.blend_factor(first.girth);
    let threshold = 2.0 * junction.parent_girth;
    if blend <= 0.0 || threshold <= f32::EPSILON {
        return;
    }
    // Probe one parent girth along the child so children based on the parent
    // axis still resolve a side.
    let probe = first.center + first.direction * junction.parent_girth;
    let Some(parent_normal) = junction.surface_normal(probe) else {
        return;
    };
    let skin_length = skin.length * junction.scale;
    let vertices = &mut skin.buffers.vertices;
    for i in 0..vertices.len() {
        let Some(segment) = skin.segments.get(vertices.segments[i] as usize) else {
            continue;
        };
        let distance = segment.skin_position * skin_length;
        let fade = (1.0 - distance / threshold).clamp(0.0, 1.0);
        if fade <= 0.0 {
            continue;
        }
        let n = vertices.normals[i];
        vertices.normals[i] = n
            .lerp(parent_normal, blend * fade)
            .try_normalize()
            .unwrap_or(n);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffers::VertexRecord;
    use crate::skeleton::{BranchCurve, GirthProfile, Skeleton};
    use crate::skin::Segment;
    use crate::stitch::build_skin;
    use crate::types::{BranchId, BuilderTag, NormalMode, VertexRole};

    fn vertex(position: Vec3, duplicate_of: Option<u32>) -> VertexRecord {
        VertexRecord {
            position,
            segment: 0,
            branch: BranchId(0),
            radial_index: 0,
            radial_fraction: 0.0,
            duplicate_of,
            role: VertexRole::Ring,
        }
    }

    fn cylinder(mode: NormalMode, sides: u16) -> Skin {
        let mut skeleton = Skeleton::new();
        let root = skeleton.add_root(
            BranchCurve::straight(Vec3::ZERO, Vec3::X * 4.0, 2),
            GirthProfile::constant(0.5),
        );
        let mut skin = Skin::aggregate(&skeleton, root).unwrap();
        skin.segments = (0..3)
            .map(|i| Segment {
                branch: root,
                center: Vec3::X * (2.0 * i as f32),
                direction: Vec3::X,
                normal: Vec3::Y,
                sides,
                girth: 0.5,
                branch_position: i as f32 / 2.0,
                skin_position: i as f32 / 2.0,
                builder: BuilderTag::Default,
                range: None,
            })
            .collect();
        build_skin(&mut skin, mode, 0.0);
        face_normals(&mut skin.buffers);
        skin
    }

    #[test]
    fn face_normals_are_area_weighted() {
        let mut buffers = SkinBuffers::default();
        for p in [Vec3::ZERO, Vec3::X, Vec3::Y, Vec3::new(0.0, 0.0, 0.1)] {
            buffers.vertices.push(vertex(p, None));
        }
        let face = buffers.next_face();
        buffers.push_triangle(face, 0, [0, 1, 2]);
        let face = buffers.next_face();
        buffers.push_triangle(face, 0, [0, 3, 1]);
        face_normals(&mut buffers);
        let n = buffers.vertices.normals[0];
        // The large +Z face dominates the small +Y face.
        assert!(n.z > n.y && n.y > 0.0);
        assert_eq!(buffers.vertices.normals[2], Vec3::Z);
    }

    #[test]
    fn isolated_vertices_get_fallback() {
        let mut buffers = SkinBuffers::default();
        buffers.vertices.push(vertex(Vec3::ZERO, None));
        face_normals(&mut buffers);
        assert_eq!(buffers.vertices.normals[0], FALLBACK_NORMAL);
    }

    #[test]
    fn welded_seam_is_bit_identical() {
        let mut skin = cylinder(NormalMode::Soft, 7);
        let v = &skin.buffers.vertices;
        // Before welding, the wrap vertex only sees the faces on its side.
        assert_ne!(v.normals[0], v.normals[7]);
        weld_duplicates(&mut skin.buffers.vertices);
        let v = &skin.buffers.vertices;
        for i in 0..v.len() {
            if let Some(d) = v.duplicates[i] {
                assert_eq!(v.normals[i], v.normals[d as usize]);
            }
        }
        // Ring vertex 0 is at +Y; the welded normal stays perpendicular to
        // the axis and close to radial.
        assert!(v.normals[7].x.abs() < 1e-4);
        assert!(v.normals[7].y > 0.95);
    }

    #[test]
    fn weld_follows_chains() {
        let mut table = VertexTable::default();
        table.push(vertex(Vec3::ZERO, None));
        table.push(vertex(Vec3::ZERO, Some(0)));
        table.push(vertex(Vec3::ZERO, Some(1)));
        table.normals = vec![Vec3::X, Vec3::Y, Vec3::Z];
        weld_duplicates(&mut table);
        let expected = Vec3::ONE.normalize();
        assert!(table.normals.iter().all(|n| *n == table.normals[0]));
        assert!(table.normals[0].distance(expected) < 1e-6);
    }

    #[test]
    fn hard_normals_are_flat() {
        let skin = cylinder(NormalMode::Hard, 6);
        let v = &skin.buffers.vertices;
        for tri in &skin.buffers.triangles {
            let [a, b, c] = tri.vertices.map(|i| v.positions[i as usize]);
            let face = (b - a).cross(c - a).normalize();
            for &i in &tri.vertices {
                assert!(v.normals[i as usize].distance(face) < 1e-4);
            }
        }
    }

    #[test]
    fn blend_factor_follows_girth_ratio() {
        let junction = Junction {
            parent_center: Vec3::ZERO,
            parent_direction: Vec3::Y,
            parent_girth: 1.0,
            scale: 1.0,
        };
        assert!((junction.blend_factor(0.0) - 1.0).abs() < 1e-6);
        assert!(junction.blend_factor(1.0).abs() < 1e-6);
        assert!(junction.blend_factor(2.0).abs() < 1e-6);
        assert!((junction.blend_factor(0.5) - (0.5 * FRAC_PI_2).cos()).abs() < 1e-6);
    }

    #[test]
    fn junction_blend_fades_along_child() {
        // Child along +X leaving the surface of a vertical parent of girth
        // 1.5 whose axis passes through x = -1.5.
        let mut skin = cylinder(NormalMode::Soft, 6);
        weld_duplicates(&mut skin.buffers.vertices);
        let before = skin.buffers.vertices.normals.clone();
        let junction = Junction {
            parent_center: Vec3::new(-1.5, 0.0, 0.0),
            parent_direction: Vec3::Y,
            parent_girth: 1.5,
            scale: 1.0,
        };
        blend_junction(&mut skin, &junction);
        let v = &skin.buffers.vertices;
        // Rings sit at distances 0, 2 and 4 from the join; the threshold is 3.
        let base_top = 1; // ring 0, radial index 1
        assert!(v.normals[base_top].x > before[base_top].x);
        let far = 14; // ring 2
        assert_eq!(v.normals[far], before[far]);
        for i in 0..v.len() {
            assert!((v.normals[i].length() - 1.0).abs() < 1e-4);
            if let Some(d) = v.duplicates[i] {
                assert_eq!(v.normals[i], v.normals[d as usize]);
            }
        }
    }
}
