// Arbor branch-skin mesher.
//
// Turns a branch skeleton (a hierarchy of curved, tapered branches) into a
// single triangle mesh suitable for real-time rendering: one continuous
// "skin" per chain of continuing branches, rings of vertices sampled along
// the skin, stitched between rings of different resolution, with normals,
// bark UVs and wind-animation metadata.
//
// Architecture (one generation pass, in order):
// - skeleton.rs: Input model (arena of branches, Catmull-Rom curves with
//   arc-length tables, girth profiles, sprouts, custom shapes)
// - skin.rs: Aggregation of follow-up chains into skins, position mapping
//   between branch and skin space, builder ranges
// - builders.rs: Per-range cross-section policies (default circle, trunk
//   flare, custom shape)
// - sampler.rs: Relevant-position collection and ring segment sampling
// - stitch.rs: Ring construction and dynamic stitching between rings of
//   different side counts, tip caps
// - normals.rs: Face normals, seam welding, parent/child junction blending
// - mesh.rs: Assembly of all skins into a `TreeMesh`, per-skin and
//   per-branch spans
// - uv_meta.rs: Continuous-length bark UVs (`uv0`)
// - wind_meta.rs: Compound-branch analysis and sway weights (`uv2`, `uv3`,
//   `colors`)
// - context.rs: `BuildContext`, which owns the config and skin cache and
//   runs the pass; `build_forest()` for parallel batches
// - tree_gen.rs: Procedural skeleton growth from a `TreeProfile`
// - config.rs, types.rs, buffers.rs: Configuration, shared enums and ids,
//   per-skin vertex/triangle buffers
//
// A pass is deterministic: the same skeleton and config always produce the
// same mesh, bit for bit.

pub mod buffers;
pub mod builders;
pub mod config;
pub mod context;
pub mod mesh;
pub mod normals;
pub mod sampler;
pub mod skeleton;
pub mod skin;
pub mod stitch;
pub mod tree_gen;
pub mod types;
pub mod uv_meta;
pub mod wind_meta;

pub use config::{ConfigError, MeshConfig, TreeProfile};
pub use context::{BuildContext, build_forest};
pub use mesh::{SkinMesh, TreeMesh};
pub use skeleton::{Branch, BranchCurve, GirthProfile, Skeleton, SkeletonError};
pub use tree_gen::grow_skeleton;
pub use types::{BranchId, NormalMode, Quality};
