// Ring builder and stitcher: segments to vertices and triangles.
//
// Walks a skin's segment list pairwise (base, top). Each segment gets a ring
// of `sides` polygon points plus a wrap point that repeats point 0, placed at
// angles `ring_rotation + k * 2π/sides` around the segment direction and
// scaled radially by the segment's builder. Consecutive rings are connected by
// a `stitch_plan()`:
//
// - equal side counts: one quad per radial step;
// - unequal side counts: `max` steps over the larger ring with a moving
//   pointer into the smaller one. A step closes a quad (consuming one wedge of
//   the smaller ring) once the larger ring's angular position has reached the
//   midpoint of the current smaller wedge, and a lone triangle otherwise. The
//   midpoint test is evaluated in exact integer form,
//   `2·min·(step+1) ≥ max·(2·wedge+1)`, which closes every smaller wedge
//   exactly once. The same plan with `min == max` yields the all-quads case.
//
// The last segment is capped: 3 and 4 sides get a fixed fan without a
// center, larger rings get a center vertex and a full triangle fan.
//
// Vertex sharing depends on `NormalMode`:
//
// - Soft: ring vertices are shared between the faces of both adjoining
//   stitches. Every ring has `sides + 1` vertices; the wrap vertex records
//   `duplicate_of` = vertex 0 so the normal finisher can weld the seam. When
//   the owning branch changes between base and top (a follow-up joint), the
//   base ring is re-emitted under the new branch ("force new base vertices")
//   so smoothing never bleeds across branches and per-branch vertex spans
//   stay contiguous.
// - Hard: every face gets fresh vertices (4 per quad, 3 per triangle).
//
// Winding is counter-clockwise seen from outside. With the ring basis
// (normal, direction × normal) a base quad (b_i, b_i+1, t_i+1, t_i) faces
// outward; when the top ring is the larger one the plan is expressed on the
// swapped rings and each polygon is reversed.
//
// Face indices advance once per stitch step, once per tip-fan triangle and
// once for a 4-sided cap.

use glam::Vec3;
use smallvec::SmallVec;
use std::f32::consts::TAU;

use crate::buffers::{SkinBuffers, VertexRecord};
use crate::builders::{DefaultBuilder, RangePlacement, SegmentBuilder};
use crate::skin::{BuilderRange, Segment, Skin};
use crate::types::{BranchId, NormalMode, VertexRole};

// ---------------------------------------------------------------------------
// Stitch plan
// ---------------------------------------------------------------------------

/// Which of the two rings a plan vertex refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RingSide {
    Base,
    Top,
}

/// A ring vertex reference: ring and radial index (0..=sides, where `sides`
/// is the wrap point).
pub type RingRef = (RingSide, u16);

/// One step of a stitch: a quad or a lone triangle, outward-wound.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StitchStep {
    Quad([RingRef; 4]),
    Triangle([RingRef; 3]),
}

impl StitchStep {
    pub fn is_quad(&self) -> bool {
        matches!(self, StitchStep::Quad(_))
    }
}

/// Stitch plan between a base ring of `base_sides` and a top ring of
/// `top_sides`. Always `max(base_sides, top_sides)` steps, of which exactly
/// `min(base_sides, top_sides)` are quads.
pub fn stitch_plan(base_sides: u16, top_sides: u16) -> Vec<StitchStep> {
    let invert = top_sides > base_sides;
    let (large, small) = if invert {
        (RingSide::Top, RingSide::Base)
    } else {
        (RingSide::Base, RingSide::Top)
    };
    let max = base_sides.max(top_sides);
    let min = base_sides.min(top_sides);
    let (max_w, min_w) = (max as u32, min as u32);

    let mut steps = Vec::with_capacity(max as usize);
    let mut t: u16 = 0;
    for b in 0..max {
        let closes_wedge = t < min && 2 * min_w * (b as u32 + 1) >= max_w * (2 * t as u32 + 1);
        if closes_wedge {
            let quad = [(large, b), (large, b + 1), (small, t + 1), (small, t)];
            steps.push(StitchStep::Quad(if invert { reversed4(quad) } else { quad }));
            t += 1;
        } else {
            let tri = [(large, b), (large, b + 1), (small, t)];
            steps.push(StitchStep::Triangle(if invert { reversed3(tri) } else { tri }));
        }
    }
    steps
}

fn reversed4([a, b, c, d]: [RingRef; 4]) -> [RingRef; 4] {
    [d, c, b, a]
}

fn reversed3([a, b, c]: [RingRef; 3]) -> [RingRef; 3] {
    [c, b, a]
}

// ---------------------------------------------------------------------------
// Ring geometry
// ---------------------------------------------------------------------------

/// Ring points of one segment: `sides + 1` points, the last equal to the
/// first.
#[derive(Clone, Debug)]
pub struct RingGeometry {
    pub segment: u32,
    pub sides: u16,
    pub points: SmallVec<[Vec3; 16]>,
}

impl RingGeometry {
    pub fn new(segment_index: u32, segment: &Segment, ranges: &[BuilderRange], ring_rotation: f32) -> Self {
        let sides = segment.sides.max(3);
        let range = segment.range.and_then(|r| ranges.get(r));
        let placement = range.map_or(RangePlacement::default(), |r| r.placement(segment.skin_position));
        let builder: &dyn SegmentBuilder = match range {
            Some(r) => r.builder.as_segment_builder(),
            None => &DefaultBuilder,
        };
        let binormal = segment.direction.cross(segment.normal);
        let step = TAU / sides as f32;
        let mut points: SmallVec<[Vec3; 16]> = (0..sides)
            .map(|k| {
                let theta = ring_rotation + k as f32 * step;
                let radial = segment.normal * theta.cos() + binormal * theta.sin();
                let scale = builder.radial_scale(k as f32 / sides as f32, &placement);
                segment.center + radial * segment.girth * scale
            })
            .collect();
        points.push(points[0]);
        Self {
            segment: segment_index,
            sides,
            points,
        }
    }

    pub fn fraction(&self, k: u16) -> f32 {
        k as f32 / self.sides as f32
    }
}

// ---------------------------------------------------------------------------
// Emission
// ---------------------------------------------------------------------------

/// Vertex indices of an emitted soft ring (`sides + 1` entries).
type RingIndices = SmallVec<[u32; 17]>;

fn emit_ring(buffers: &mut SkinBuffers, ring: &RingGeometry, branch: BranchId) -> RingIndices {
    let mut indices = RingIndices::new();
    for k in 0..=ring.sides {
        let duplicate_of = if k == ring.sides { indices.first().copied() } else { None };
        let index = buffers.vertices.push(VertexRecord {
            position: ring.points[k as usize],
            segment: ring.segment,
            branch,
            radial_index: k,
            radial_fraction: ring.fraction(k),
            duplicate_of,
            role: VertexRole::Ring,
        });
        indices.push(index);
    }
    indices
}

fn emit_fresh(buffers: &mut SkinBuffers, ring: &RingGeometry, k: u16, branch: BranchId) -> u32 {
    buffers.vertices.push(VertexRecord {
        position: ring.points[k as usize],
        segment: ring.segment,
        branch,
        radial_index: k,
        radial_fraction: ring.fraction(k),
        duplicate_of: None,
        role: VertexRole::Ring,
    })
}

fn emit_center(buffers: &mut SkinBuffers, position: Vec3, segment: u32, branch: BranchId) -> u32 {
    buffers.vertices.push(VertexRecord {
        position,
        segment,
        branch,
        radial_index: 0,
        radial_fraction: 0.5,
        duplicate_of: None,
        role: VertexRole::TipCenter,
    })
}

/// Push a polygon (3 or 4 vertices) as one face.
fn push_polygon(buffers: &mut SkinBuffers, segment: u32, vertices: &[u32]) {
    let face = buffers.next_face();
    match *vertices {
        [a, b, c] => {
            buffers.push_triangle(face, segment, [a, b, c]);
        }
        [a, b, c, d] => {
            buffers.push_triangle(face, segment, [a, b, c]);
            buffers.push_triangle(face, segment, [a, c, d]);
        }
        _ => {}
    }
}

/// Triangulate the gap between `base` and `top` following `stitch_plan()`.
fn stitch(
    buffers: &mut SkinBuffers,
    mode: NormalMode,
    base: (&RingGeometry, &RingIndices),
    top: (&RingGeometry, &RingIndices),
    branch: BranchId,
) {
    let segment = top.0.segment;
    for step in stitch_plan(base.0.sides, top.0.sides) {
        let refs: SmallVec<[RingRef; 4]> = match step {
            StitchStep::Quad(q) => q.into_iter().collect(),
            StitchStep::Triangle(t) => t.into_iter().collect(),
        };
        let vertices: SmallVec<[u32; 4]> = refs
            .iter()
            .map(|&(side, k)| {
                let (ring, indices) = match side {
                    RingSide::Base => base,
                    RingSide::Top => top,
                };
                match mode {
                    NormalMode::Soft => indices[k as usize],
                    NormalMode::Hard => emit_fresh(buffers, ring, k, branch),
                }
            })
            .collect();
        push_polygon(buffers, segment, &vertices);
    }
}

/// Close the last ring.
fn cap_tip(
    buffers: &mut SkinBuffers,
    mode: NormalMode,
    ring: &RingGeometry,
    indices: &RingIndices,
    center: Vec3,
    branch: BranchId,
) {
    let segment = ring.segment;
    let vertex = |buffers: &mut SkinBuffers, k: u16| match mode {
        NormalMode::Soft => indices[k as usize],
        NormalMode::Hard => emit_fresh(buffers, ring, k, branch),
    };
    match ring.sides {
        3 => {
            let v: SmallVec<[u32; 3]> = (0..3).map(|k| vertex(buffers, k)).collect();
            push_polygon(buffers, segment, &v);
        }
        4 => {
            let v: SmallVec<[u32; 4]> = (0..4).map(|k| vertex(buffers, k)).collect();
            push_polygon(buffers, segment, &v);
        }
        sides => {
            let shared_center = match mode {
                NormalMode::Soft => Some(emit_center(buffers, center, segment, branch)),
                NormalMode::Hard => None,
            };
            for k in 0..sides {
                let a = vertex(buffers, k);
                let b = vertex(buffers, k + 1);
                let c = shared_center.unwrap_or_else(|| emit_center(buffers, center, segment, branch));
                push_polygon(buffers, segment, &[a, b, c]);
            }
        }
    }
}

/// Fill `skin.buffers` from `skin.segments`.
pub fn build_skin(skin: &mut Skin, mode: NormalMode, ring_rotation: f32) {
    let Skin {
        segments,
        ranges,
        buffers,
        ..
    } = skin;
    buffers.clear();
    let Some(first) = segments.first() else {
        return;
    };

    let mut base = RingGeometry::new(0, first, ranges.as_slice(), ring_rotation);
    let mut base_owner = first.branch;
    let mut base_indices = match mode {
        NormalMode::Soft => emit_ring(buffers, &base, base_owner),
        NormalMode::Hard => RingIndices::new(),
    };

    for (i, segment) in segments.iter().enumerate().skip(1) {
        let top = RingGeometry::new(i as u32, segment, ranges.as_slice(), ring_rotation);
        let owner = segment.branch;
        if mode == NormalMode::Soft && owner != base_owner {
            base_indices = emit_ring(buffers, &base, owner);
        }
        let top_indices = match mode {
            NormalMode::Soft => emit_ring(buffers, &top, owner),
            NormalMode::Hard => RingIndices::new(),
        };
        stitch(buffers, mode, (&base, &base_indices), (&top, &top_indices), owner);
        base = top;
        base_indices = top_indices;
        base_owner = owner;
    }

    let center = segments[base.segment as usize].center;
    cap_tip(buffers, mode, &base, &base_indices, center, base_owner);
}
