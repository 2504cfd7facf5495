// Branch skeleton: the input model the mesher consumes.
//
// A `Skeleton` is an arena of `Branch`es indexed by `BranchId`. Each branch
// has a centerline (`BranchCurve`), a girth function (`GirthProfile`), a
// parent link with the normalized attachment position on the parent, a list
// of ramification children, and at most one follow-up: a child that
// continues the parent geometrically and is meshed into the same skin.
//
// `BranchCurve` is a Catmull-Rom spline through its nodes with an arc-length
// table, so every position in this crate is a normalized *length* position
// (0 = base, 1 = tip), not a spline parameter. The table also carries
// rotation-minimizing normals (parallel transport) so rings don't twist
// along a bent branch.
//
// Sampling (`BranchCurve::sample`) returns every node position plus adaptive
// midpoint subdivisions wherever the tangent turns by more than the angle
// tolerance. A straight three-node branch therefore yields exactly three
// samples regardless of tolerance.
//
// See also: `tree_gen.rs` which grows skeletons procedurally, `skin.rs` which
// aggregates follow-up chains, `sampler.rs` which turns curve samples into
// segments.

use glam::{Quat, Vec3};
use smallvec::SmallVec;

use crate::types::BranchId;

/// Errors from building a skeleton with inconsistent links.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SkeletonError {
    #[error("unknown branch {0}")]
    UnknownBranch(BranchId),

    #[error("attachment position {0} is outside [0, 1]")]
    InvalidPosition(f32),

    #[error("a curve needs at least two nodes, got {0}")]
    TooFewNodes(usize),

    #[error("{0} already has a follow-up branch")]
    FollowUpTaken(BranchId),
}

/// Arc-length subdivisions per spline span in the lookup table.
const TABLE_STEPS: usize = 16;

/// Maximum midpoint-subdivision depth when sampling a span.
const MAX_SAMPLE_DEPTH: u32 = 6;

/// Fallback direction for degenerate (zero-length) curves.
const FALLBACK_UP: Vec3 = Vec3::Y;

/// A point on a branch centerline.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CurvePoint {
    /// Normalized length position, 0 = base, 1 = tip.
    pub position: f32,
    pub point: Vec3,
    /// Unit forward direction.
    pub tangent: Vec3,
    /// Unit vector perpendicular to `tangent`.
    pub normal: Vec3,
}

#[derive(Clone, Copy, Debug)]
struct ArcEntry {
    /// Spline parameter, 0..=span_count.
    t: f32,
    /// Normalized arc length at `t`.
    s: f32,
    normal: Vec3,
}

/// Catmull-Rom centerline with an arc-length table.
#[derive(Clone, Debug)]
pub struct BranchCurve {
    nodes: Vec<Vec3>,
    table: Vec<ArcEntry>,
    length: f32,
}

impl BranchCurve {
    pub fn new(nodes: Vec<Vec3>) -> Result<Self, SkeletonError> {
        if nodes.len() < 2 {
            return Err(SkeletonError::TooFewNodes(nodes.len()));
        }
        let mut curve = Self {
            nodes,
            table: Vec::new(),
            length: 0.0,
        };
        curve.rebuild_table();
        Ok(curve)
    }

    /// A straight curve from `start` to `end` with `node_count` evenly spaced
    /// nodes (at least two).
    pub fn straight(start: Vec3, end: Vec3, node_count: usize) -> Self {
        let count = node_count.max(2);
        let nodes = (0..count)
            .map(|i| start.lerp(end, i as f32 / (count - 1) as f32))
            .collect();
        let mut curve = Self {
            nodes,
            table: Vec::new(),
            length: 0.0,
        };
        curve.rebuild_table();
        curve
    }

    pub fn nodes(&self) -> &[Vec3] {
        &self.nodes
    }

    pub fn length(&self) -> f32 {
        self.length
    }

    pub fn start(&self) -> Vec3 {
        self.nodes[0]
    }

    pub fn end(&self) -> Vec3 {
        self.nodes[self.nodes.len() - 1]
    }

    fn span_count(&self) -> usize {
        self.nodes.len() - 1
    }

    /// Control points of span `i` with reflected phantom ends.
    fn span_points(&self, i: usize) -> [Vec3; 4] {
        let p1 = self.nodes[i];
        let p2 = self.nodes[i + 1];
        let p0 = if i == 0 { p1 * 2.0 - p2 } else { self.nodes[i - 1] };
        let p3 = if i + 2 < self.nodes.len() {
            self.nodes[i + 2]
        } else {
            p2 * 2.0 - p1
        };
        [p0, p1, p2, p3]
    }

    fn split_param(&self, t: f32) -> (usize, f32) {
        let spans = self.span_count();
        let t = t.clamp(0.0, spans as f32);
        let i = (t.floor() as usize).min(spans - 1);
        (i, t - i as f32)
    }

    fn point_at_param(&self, t: f32) -> Vec3 {
        let (i, u) = self.split_param(t);
        let [p0, p1, p2, p3] = self.span_points(i);
        let u2 = u * u;
        let u3 = u2 * u;
        0.5 * ((2.0 * p1)
            + (p2 - p0) * u
            + (2.0 * p0 - 5.0 * p1 + 4.0 * p2 - p3) * u2
            + (3.0 * p1 - p0 - 3.0 * p2 + p3) * u3)
    }

    fn tangent_at_param(&self, t: f32) -> Vec3 {
        let (i, u) = self.split_param(t);
        let [p0, p1, p2, p3] = self.span_points(i);
        let u2 = u * u;
        let d = 0.5
            * ((p2 - p0)
                + 2.0 * (2.0 * p0 - 5.0 * p1 + 4.0 * p2 - p3) * u
                + 3.0 * (3.0 * p1 - p0 - 3.0 * p2 + p3) * u2);
        d.try_normalize()
            .or_else(|| (p2 - p1).try_normalize())
            .unwrap_or(FALLBACK_UP)
    }

    fn rebuild_table(&mut self) {
        let steps = self.span_count() * TABLE_STEPS;
        let mut table = Vec::with_capacity(steps + 1);
        let mut acc = 0.0;
        let mut prev_point = self.point_at_param(0.0);
        let mut prev_tangent = self.tangent_at_param(0.0);
        let mut normal = prev_tangent.any_orthonormal_vector();
        table.push(ArcEntry {
            t: 0.0,
            s: 0.0,
            normal,
        });
        for k in 1..=steps {
            let t = k as f32 / TABLE_STEPS as f32;
            let point = self.point_at_param(t);
            let tangent = self.tangent_at_param(t);
            acc += point.distance(prev_point);
            normal = transport_normal(normal, prev_tangent, tangent);
            table.push(ArcEntry { t, s: acc, normal });
            prev_point = point;
            prev_tangent = tangent;
        }
        self.length = acc;
        if acc > f32::EPSILON {
            for entry in &mut table {
                entry.s /= acc;
            }
        } else {
            // Degenerate curve: fall back to uniform parameterization.
            for entry in &mut table {
                entry.s = entry.t / self.span_count() as f32;
            }
        }
        self.table = table;
    }

    /// Index of the table entry at or before normalized length `s`.
    fn table_index(&self, s: f32) -> usize {
        let upper = self.table.partition_point(|e| e.s <= s);
        upper.saturating_sub(1).min(self.table.len() - 2)
    }

    fn param_at(&self, position: f32) -> (f32, Vec3) {
        let s = position.clamp(0.0, 1.0);
        let i = self.table_index(s);
        let (a, b) = (self.table[i], self.table[i + 1]);
        let span = b.s - a.s;
        let f = if span > f32::EPSILON {
            ((s - a.s) / span).clamp(0.0, 1.0)
        } else {
            0.0
        };
        (a.t + (b.t - a.t) * f, a.normal.lerp(b.normal, f))
    }

    fn position_of_param(&self, t: f32) -> f32 {
        let upper = self.table.partition_point(|e| e.t <= t);
        let i = upper.saturating_sub(1).min(self.table.len() - 2);
        let (a, b) = (self.table[i], self.table[i + 1]);
        let f = ((t - a.t) / (b.t - a.t)).clamp(0.0, 1.0);
        a.s + (b.s - a.s) * f
    }

    /// Evaluate the curve at a normalized length position.
    pub fn eval(&self, position: f32) -> CurvePoint {
        let position = position.clamp(0.0, 1.0);
        let (t, approx_normal) = self.param_at(position);
        let tangent = self.tangent_at_param(t);
        let normal = orthonormalize(approx_normal, tangent);
        CurvePoint {
            position,
            point: self.point_at_param(t),
            tangent,
            normal,
        }
    }

    /// Normalized positions of every node plus adaptive subdivisions where
    /// the tangent turns by more than `angle_tolerance` radians. Sorted,
    /// starting at 0 and ending at 1.
    pub fn sample(&self, angle_tolerance: f32) -> Vec<f32> {
        let tolerance = angle_tolerance.max(1e-3);
        let mut params = vec![0.0f32];
        for span in 0..self.span_count() {
            let mut stack: SmallVec<[(f32, f32, u32); 8]> = SmallVec::new();
            let mut span_params: SmallVec<[f32; 16]> = SmallVec::new();
            stack.push((span as f32, span as f32 + 1.0, 0));
            while let Some((a, b, depth)) = stack.pop() {
                let angle = self.tangent_at_param(a).angle_between(self.tangent_at_param(b));
                if angle > tolerance && depth < MAX_SAMPLE_DEPTH {
                    let mid = 0.5 * (a + b);
                    stack.push((mid, b, depth + 1));
                    stack.push((a, mid, depth + 1));
                } else {
                    span_params.push(b);
                }
            }
            params.extend(span_params);
        }
        let mut positions: Vec<f32> = params.into_iter().map(|t| self.position_of_param(t)).collect();
        positions.sort_by(f32::total_cmp);
        positions.dedup_by(|a, b| (*a - *b).abs() < 1e-6);
        if let Some(last) = positions.last_mut() {
            *last = 1.0;
        }
        positions[0] = 0.0;
        positions
    }
}

/// Rotate `normal` by the minimal rotation taking `from` to `to`, then
/// re-orthonormalize against `to`.
pub fn transport_normal(normal: Vec3, from: Vec3, to: Vec3) -> Vec3 {
    let rotated = if from.dot(to) > 0.999_999 {
        normal
    } else {
        Quat::from_rotation_arc(from, to) * normal
    };
    orthonormalize(rotated, to)
}

/// Component of `v` perpendicular to unit `axis`, normalized. Falls back to an
/// arbitrary perpendicular when `v` is (anti)parallel to `axis`.
pub fn orthonormalize(v: Vec3, axis: Vec3) -> Vec3 {
    (v - axis * v.dot(axis))
        .try_normalize()
        .unwrap_or_else(|| axis.any_orthonormal_vector())
}

/// Girth (radius) as a function of normalized position.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GirthProfile {
    pub base: f32,
    pub tip: f32,
    /// Shape of the taper; 1 is linear, larger values thin out faster.
    pub exponent: f32,
}

impl GirthProfile {
    pub fn constant(girth: f32) -> Self {
        Self {
            base: girth,
            tip: girth,
            exponent: 1.0,
        }
    }

    pub fn tapered(base: f32, tip: f32) -> Self {
        Self {
            base,
            tip,
            exponent: 1.0,
        }
    }

    pub fn at(&self, position: f32) -> f32 {
        let remaining = (1.0 - position.clamp(0.0, 1.0)).powf(self.exponent.max(0.01));
        (self.tip + (self.base - self.tip) * remaining).max(0.0)
    }

    /// Mean girth over five evenly spaced samples.
    pub fn average(&self) -> f32 {
        (0..5).map(|i| self.at(i as f32 * 0.25)).sum::<f32>() / 5.0
    }
}

/// A secondary decoration (leaf, fruit, twig card) anchored on a branch.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sprout {
    pub position: f32,
    /// Angle around the branch, measured from the curve normal.
    pub angle: f32,
}

/// Custom cross-section over part of a branch.
#[derive(Clone, Debug, PartialEq)]
pub struct ShapeProfile {
    /// Radial scale at evenly spaced angles; its length is the ring side
    /// count used inside the range.
    pub radial: Vec<f32>,
    /// Branch-relative range the shape covers.
    pub from: f32,
    pub to: f32,
    /// Branch-relative length over which the shape blends back to a circle
    /// at each end of the range.
    pub cap_length: f32,
}

impl ShapeProfile {
    /// Radial scale at a fraction of the full turn, interpolated and wrapped.
    pub fn scale_at(&self, fraction: f32) -> f32 {
        let n = self.radial.len();
        if n == 0 {
            return 1.0;
        }
        let x = fraction.rem_euclid(1.0) * n as f32;
        let i = (x.floor() as usize) % n;
        let f = x - x.floor();
        let a = self.radial[i];
        let b = self.radial[(i + 1) % n];
        a + (b - a) * f
    }
}

/// One branch of the skeleton.
#[derive(Clone, Debug)]
pub struct Branch {
    pub id: BranchId,
    pub parent: Option<BranchId>,
    /// Normalized attachment position on the parent.
    pub position_on_parent: f32,
    /// 0 for roots and their follow-ups; children are one deeper.
    pub level: u32,
    /// Ramifications only; the follow-up is stored separately.
    pub children: SmallVec<[BranchId; 4]>,
    pub follow_up: Option<BranchId>,
    /// True when this branch is its parent's follow-up.
    pub is_follow_up: bool,
    pub curve: BranchCurve,
    pub girth: GirthProfile,
    /// Normalized position of a fracture; the branch ends there.
    pub break_position: Option<f32>,
    pub sprouts: Vec<Sprout>,
    pub shape: Option<ShapeProfile>,
}

impl Branch {
    pub fn length(&self) -> f32 {
        self.curve.length()
    }

    /// Normalized position where the branch actually ends.
    pub fn end_position(&self) -> f32 {
        self.break_position.unwrap_or(1.0).clamp(0.0, 1.0)
    }

    /// Length up to the break, if any.
    pub fn effective_length(&self) -> f32 {
        self.length() * self.end_position()
    }

    pub fn girth_at(&self, position: f32) -> f32 {
        self.girth.at(position)
    }

    pub fn is_broken(&self) -> bool {
        self.break_position.is_some()
    }
}

/// Arena of branches.
#[derive(Clone, Debug, Default)]
pub struct Skeleton {
    branches: Vec<Branch>,
    roots: SmallVec<[BranchId; 2]>,
}

impl Skeleton {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, mut branch: Branch) -> BranchId {
        let id = BranchId(self.branches.len() as u32);
        branch.id = id;
        self.branches.push(branch);
        id
    }

    fn new_branch(curve: BranchCurve, girth: GirthProfile) -> Branch {
        Branch {
            id: BranchId(0),
            parent: None,
            position_on_parent: 0.0,
            level: 0,
            children: SmallVec::new(),
            follow_up: None,
            is_follow_up: false,
            curve,
            girth,
            break_position: None,
            sprouts: Vec::new(),
            shape: None,
        }
    }

    pub fn add_root(&mut self, curve: BranchCurve, girth: GirthProfile) -> BranchId {
        let id = self.push(Self::new_branch(curve, girth));
        self.roots.push(id);
        id
    }

    /// Attach a ramification at `position` on `parent`.
    pub fn add_child(
        &mut self,
        parent: BranchId,
        position: f32,
        curve: BranchCurve,
        girth: GirthProfile,
    ) -> Result<BranchId, SkeletonError> {
        if !(0.0..=1.0).contains(&position) {
            return Err(SkeletonError::InvalidPosition(position));
        }
        let level = self.get(parent)?.level + 1;
        let mut branch = Self::new_branch(curve, girth);
        branch.parent = Some(parent);
        branch.position_on_parent = position;
        branch.level = level;
        let id = self.push(branch);
        self.branches[parent.index()].children.push(id);
        Ok(id)
    }

    /// Attach a continuation at the tip of `parent`.
    pub fn add_follow_up(
        &mut self,
        parent: BranchId,
        curve: BranchCurve,
        girth: GirthProfile,
    ) -> Result<BranchId, SkeletonError> {
        let parent_branch = self.get(parent)?;
        if parent_branch.follow_up.is_some() {
            return Err(SkeletonError::FollowUpTaken(parent));
        }
        let level = parent_branch.level;
        let mut branch = Self::new_branch(curve, girth);
        branch.parent = Some(parent);
        branch.position_on_parent = 1.0;
        branch.level = level;
        branch.is_follow_up = true;
        let id = self.push(branch);
        self.branches[parent.index()].follow_up = Some(id);
        Ok(id)
    }

    pub fn set_broken(&mut self, id: BranchId, position: f32) -> Result<(), SkeletonError> {
        if !(0.0..=1.0).contains(&position) {
            return Err(SkeletonError::InvalidPosition(position));
        }
        self.get_mut(id)?.break_position = Some(position);
        Ok(())
    }

    pub fn add_sprout(&mut self, id: BranchId, sprout: Sprout) -> Result<(), SkeletonError> {
        if !(0.0..=1.0).contains(&sprout.position) {
            return Err(SkeletonError::InvalidPosition(sprout.position));
        }
        self.get_mut(id)?.sprouts.push(sprout);
        Ok(())
    }

    pub fn set_shape(&mut self, id: BranchId, shape: ShapeProfile) -> Result<(), SkeletonError> {
        self.get_mut(id)?.shape = Some(shape);
        Ok(())
    }

    pub fn get(&self, id: BranchId) -> Result<&Branch, SkeletonError> {
        self.branches
            .get(id.index())
            .ok_or(SkeletonError::UnknownBranch(id))
    }

    fn get_mut(&mut self, id: BranchId) -> Result<&mut Branch, SkeletonError> {
        self.branches
            .get_mut(id.index())
            .ok_or(SkeletonError::UnknownBranch(id))
    }

    pub fn branch(&self, id: BranchId) -> Option<&Branch> {
        self.branches.get(id.index())
    }

    pub fn branches(&self) -> &[Branch] {
        &self.branches
    }

    pub fn roots(&self) -> &[BranchId] {
        &self.roots
    }

    pub fn len(&self) -> usize {
        self.branches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }

    /// Deepest hierarchy level in the skeleton.
    pub fn max_level(&self) -> u32 {
        self.branches.iter().map(|b| b.level).max().unwrap_or(0)
    }
}
