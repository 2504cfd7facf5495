// Small shared types: branch identifiers and the enums that select
// meshing behavior.
//
// `BranchId` is an arena index into `Skeleton::branches`. It is also the key
// of every id-keyed table in the crate (skin cache, compound members, branch
// spans), so it derives `Hash` and `Ord` and serializes as a bare integer.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a branch within one `Skeleton`. Assigned in insertion order,
/// never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BranchId(pub u32);

impl BranchId {
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for BranchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "branch#{}", self.0)
    }
}

/// Shading topology of the generated surface.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum NormalMode {
    /// Ring vertices are shared between adjoining faces; normals are smoothed
    /// across faces, wrap seams and branch joins.
    #[default]
    Soft,
    /// Every face gets its own vertices; flat shading, no normal blending.
    Hard,
}

/// Curve sampling quality tier. Each tier has its own angle tolerance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Quality {
    Preview,
    #[default]
    Final,
}

/// Which builder owns a segment. The stitcher never looks at this; it only
/// matters for side-count selection and polygon sampling.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BuilderTag {
    #[default]
    Default,
    TrunkFlare,
    Shape,
}

/// What a vertex in the vertex table represents.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum VertexRole {
    /// One of the polygon vertices of a segment ring.
    #[default]
    Ring,
    /// The center vertex of a tip fan.
    TipCenter,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_id_serializes_as_integer() {
        let json = serde_json::to_string(&BranchId(7)).unwrap();
        assert_eq!(json, "7");
        let back: BranchId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, BranchId(7));
    }

    #[test]
    fn branch_id_display() {
        assert_eq!(BranchId(3).to_string(), "branch#3");
        assert_eq!(BranchId(3).index(), 3);
    }
}
