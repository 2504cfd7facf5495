// Data-driven mesher and tree-growth configuration.
//
// `MeshConfig` holds every tunable parameter of a generation pass: polygon
// side-count bounds, ring rotation, shading mode, curve tolerances for the
// two quality tiers, uniform scale, and the nested parameter groups for the
// trunk flare builder, cross-branch normal blending, UV mapping and wind
// weighting. It is plain serde data with a `Default` impl; every struct is
// `#[serde(default)]` so a JSON file only needs the fields it changes.
//
// `TreeProfile` drives `tree_gen::grow_skeleton()`. Like the mesher config it
// is grouped into nested sub-structs (`GrowthParams`, `SplitParams`,
// `CurvatureParams`, `GirthParams`) with named presets (`oak()`, `conifer()`,
// `sapling()`) that tune the same parameter set.
//
// Validation is separate from parsing: `MeshConfig::validate()` reports
// configurations the mesher would have to clamp (min sides above max sides,
// non-positive tolerances or scale). The mesher itself never fails on a bad
// config; it clamps and logs.
//
// See also: `context.rs` which owns a `MeshConfig` per build session,
// `wind_meta.rs` for `ResponseCurve` consumers, `tree_gen.rs` for the grower.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::types::{NormalMode, Quality};

/// Errors surfaced while loading or checking a configuration. The mesher
/// itself never returns these.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("min_sides ({min}) must be >= 3 and <= max_sides ({max})")]
    InvalidSides { min: u16, max: u16 },

    #[error("{field} must be positive, got {value}")]
    NonPositive { field: &'static str, value: f32 },
}

// ---------------------------------------------------------------------------
// Response curves
// ---------------------------------------------------------------------------

/// Maps a normalized input in [0, 1] to a weight. Inputs outside the range
/// are clamped first.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum ResponseCurve {
    #[default]
    Linear,
    /// `x^exponent`.
    Power { exponent: f32 },
    /// Hermite smoothstep `3x² - 2x³`.
    SmoothStep,
    /// Piecewise-linear through `[x, y]` control points sorted by x.
    /// Values before the first / after the last point hold the end value.
    Points(Vec<[f32; 2]>),
}

impl ResponseCurve {
    pub fn evaluate(&self, x: f32) -> f32 {
        let x = if x.is_nan() { 0.0 } else { x.clamp(0.0, 1.0) };
        match self {
            ResponseCurve::Linear => x,
            ResponseCurve::Power { exponent } => x.powf(exponent.max(0.0)),
            ResponseCurve::SmoothStep => x * x * (3.0 - 2.0 * x),
            ResponseCurve::Points(points) => {
                let Some(first) = points.first() else {
                    return x;
                };
                if x <= first[0] {
                    return first[1];
                }
                for pair in points.windows(2) {
                    let (a, b) = (pair[0], pair[1]);
                    if x <= b[0] {
                        let span = b[0] - a[0];
                        if span <= f32::EPSILON {
                            return b[1];
                        }
                        let t = (x - a[0]) / span;
                        return a[1] + (b[1] - a[1]) * t;
                    }
                }
                points[points.len() - 1][1]
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Mesher configuration
// ---------------------------------------------------------------------------

/// Root displacement applied by the trunk-flare builder over the base of
/// every level-0 skin.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrunkFlareConfig {
    pub enabled: bool,
    /// Skin-relative extent of the flare range, starting at the base.
    pub range: f32,
    /// Maximum outward displacement as a fraction of girth.
    pub strength: f32,
    /// Number of root buttresses around the trunk.
    pub lobes: u32,
    /// Exponent of the fade from the base (t = 0) to the range end (t = 1).
    pub falloff: f32,
}

impl Default for TrunkFlareConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            range: 0.12,
            strength: 0.35,
            lobes: 5,
            falloff: 2.0,
        }
    }
}

/// Smooth normal transition where a child branch leaves its parent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalBlendConfig {
    pub enabled: bool,
    /// Deepest hierarchy level whose joins get blended (1 = children of the
    /// trunk only). 0 disables blending.
    pub max_depth: u32,
}

impl Default for NormalBlendConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_depth: 2,
        }
    }
}

/// Continuous-length bark UV mapping.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UvConfig {
    /// Compensate texture stretch by dividing length increments by local girth.
    pub girth_sensitive: bool,
    /// Lower bound for the girth used by the compensation.
    pub girth_floor: f32,
    /// Length-proportional U displacement, for twisted bark.
    pub twist: f32,
    /// Number of texture repeats per perimeter length along V.
    pub v_tiling: f32,
    /// Start child branches at the parent's accumulated length at the
    /// attachment point instead of zero.
    pub inherit_parent_offset: bool,
}

impl Default for UvConfig {
    fn default() -> Self {
        Self {
            girth_sensitive: false,
            girth_floor: 0.05,
            twist: 0.0,
            v_tiling: 1.0,
            inherit_parent_offset: true,
        }
    }
}

/// Wind animation weighting.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindConfig {
    /// Seed for per-phase-group sway phases.
    pub seed: u64,
    /// User multiplier on the primary amplitude.
    pub spread: f32,
    /// Response curve of the primary (distance from root) weight.
    pub primary_curve: ResponseCurve,
    /// Response curve of the secondary (distance from trunk) weight.
    pub secondary_curve: ResponseCurve,
}

impl Default for WindConfig {
    fn default() -> Self {
        Self {
            seed: 0x5eed,
            spread: 1.0,
            primary_curve: ResponseCurve::Power { exponent: 2.0 },
            secondary_curve: ResponseCurve::Linear,
        }
    }
}

/// All parameters of a generation pass.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// Side count used for the thinnest branches (clamped to >= 3).
    pub min_sides: u16,
    /// Side count used for the thickest branches.
    pub max_sides: u16,
    /// Angular offset (radians) of the first vertex of every ring.
    pub ring_rotation: f32,
    pub normal_mode: NormalMode,
    pub quality: Quality,
    /// Maximum tangent deviation (degrees) between curve samples, preview tier.
    pub angle_tolerance_preview: f32,
    /// Maximum tangent deviation (degrees) between curve samples, final tier.
    pub angle_tolerance_final: f32,
    /// Minimum spacing between forced sample positions, as a fraction of the
    /// branch length.
    pub min_sample_spacing: f32,
    /// Uniform scale applied to positions and girth.
    pub scale: f32,
    pub trunk_flare: TrunkFlareConfig,
    pub normal_blend: NormalBlendConfig,
    pub uv: UvConfig,
    pub wind: WindConfig,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            min_sides: 4,
            max_sides: 12,
            ring_rotation: 0.0,
            normal_mode: NormalMode::Soft,
            quality: Quality::Final,
            angle_tolerance_preview: 20.0,
            angle_tolerance_final: 8.0,
            min_sample_spacing: 0.02,
            scale: 1.0,
            trunk_flare: TrunkFlareConfig::default(),
            normal_blend: NormalBlendConfig::default(),
            uv: UvConfig::default(),
            wind: WindConfig::default(),
        }
    }
}

impl MeshConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Check for values the mesher would have to clamp.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_sides < 3 || self.min_sides > self.max_sides {
            return Err(ConfigError::InvalidSides {
                min: self.min_sides,
                max: self.max_sides,
            });
        }
        let positive = [
            ("angle_tolerance_preview", self.angle_tolerance_preview),
            ("angle_tolerance_final", self.angle_tolerance_final),
            ("scale", self.scale),
            ("uv.girth_floor", self.uv.girth_floor),
        ];
        for (field, value) in positive {
            if value.is_nan() || value <= 0.0 {
                return Err(ConfigError::NonPositive { field, value });
            }
        }
        Ok(())
    }

    /// Angle tolerance of the active quality tier, in radians.
    pub fn angle_tolerance(&self) -> f32 {
        let degrees = match self.quality {
            Quality::Preview => self.angle_tolerance_preview,
            Quality::Final => self.angle_tolerance_final,
        };
        degrees.max(0.1).to_radians()
    }

    /// Side-count bounds after clamping: both >= 3 and min <= max.
    pub fn side_bounds(&self) -> (u16, u16) {
        let min = self.min_sides.max(3);
        (min, self.max_sides.max(min))
    }
}

// ---------------------------------------------------------------------------
// Tree profile: nested parameter groups for the skeleton grower
// ---------------------------------------------------------------------------

/// Energy budget and step size of branch growth.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GrowthParams {
    /// Energy given to the trunk. Each node consumes `energy_per_node`.
    pub initial_energy: f32,
    /// Distance between curve nodes.
    pub node_spacing: f32,
    pub energy_per_node: f32,
    /// Nodes per branch before the remainder continues as a follow-up branch.
    pub nodes_per_branch: u32,
    /// Branches with less energy than this are not grown.
    pub min_energy: f32,
    /// Maximum hierarchy level.
    pub max_level: u32,
}

/// When and how branches split into children.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SplitParams {
    /// Probability of a child at each eligible node.
    pub split_chance: f32,
    /// Fraction of the remaining energy handed to a new child.
    pub split_energy_ratio: f32,
    /// Angle (radians) between parent and child direction.
    pub split_angle: f32,
    pub split_angle_variance: f32,
    /// Fraction of a branch's nodes before children may appear.
    pub min_progress_for_split: f32,
    /// Probability that a finished branch is fractured.
    pub break_chance: f32,
}

/// How branch direction evolves between nodes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CurvatureParams {
    /// Positive grows upward, negative droops.
    pub gravitropism: f32,
    /// Maximum random deflection (radians) per node.
    pub random_deflection: f32,
    /// Correlation between successive deflections (0 = independent).
    pub deflection_coherence: f32,
}

/// Radius as a function of energy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GirthParams {
    /// `girth = sqrt(energy * energy_to_girth)`.
    pub energy_to_girth: f32,
    pub min_girth: f32,
    /// Exponent of the base-to-tip taper.
    pub taper_exponent: f32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TreeProfile {
    pub growth: GrowthParams,
    pub split: SplitParams,
    pub curvature: CurvatureParams,
    pub girth: GirthParams,
}

impl TreeProfile {
    /// Broad deciduous tree: wide splits, several levels.
    pub fn oak() -> Self {
        Self {
            growth: GrowthParams {
                initial_energy: 120.0,
                node_spacing: 1.0,
                energy_per_node: 2.0,
                nodes_per_branch: 6,
                min_energy: 4.0,
                max_level: 3,
            },
            split: SplitParams {
                split_chance: 0.35,
                split_energy_ratio: 0.35,
                split_angle: 0.9,
                split_angle_variance: 0.3,
                min_progress_for_split: 0.25,
                break_chance: 0.05,
            },
            curvature: CurvatureParams {
                gravitropism: 0.08,
                random_deflection: 0.25,
                deflection_coherence: 0.6,
            },
            girth: GirthParams {
                energy_to_girth: 0.004,
                min_girth: 0.03,
                taper_exponent: 1.2,
            },
        }
    }

    /// Tall straight trunk with short near-horizontal children.
    pub fn conifer() -> Self {
        Self {
            growth: GrowthParams {
                initial_energy: 140.0,
                node_spacing: 1.2,
                energy_per_node: 2.0,
                nodes_per_branch: 10,
                min_energy: 3.0,
                max_level: 2,
            },
            split: SplitParams {
                split_chance: 0.6,
                split_energy_ratio: 0.12,
                split_angle: 1.35,
                split_angle_variance: 0.1,
                min_progress_for_split: 0.1,
                break_chance: 0.0,
            },
            curvature: CurvatureParams {
                gravitropism: 0.2,
                random_deflection: 0.05,
                deflection_coherence: 0.9,
            },
            girth: GirthParams {
                energy_to_girth: 0.003,
                min_girth: 0.02,
                taper_exponent: 1.0,
            },
        }
    }

    /// Small young tree; cheap enough for tests and previews.
    pub fn sapling() -> Self {
        Self {
            growth: GrowthParams {
                initial_energy: 30.0,
                node_spacing: 0.5,
                energy_per_node: 1.5,
                nodes_per_branch: 5,
                min_energy: 3.0,
                max_level: 2,
            },
            split: SplitParams {
                split_chance: 0.4,
                split_energy_ratio: 0.3,
                split_angle: 0.8,
                split_angle_variance: 0.2,
                min_progress_for_split: 0.2,
                break_chance: 0.0,
            },
            curvature: CurvatureParams {
                gravitropism: 0.1,
                random_deflection: 0.2,
                deflection_coherence: 0.5,
            },
            girth: GirthParams {
                energy_to_girth: 0.002,
                min_girth: 0.02,
                taper_exponent: 1.0,
            },
        }
    }

    pub fn by_name(name: &str) -> Option<Self> {
        match name {
            "oak" => Some(Self::oak()),
            "conifer" => Some(Self::conifer()),
            "sapling" => Some(Self::sapling()),
            _ => None,
        }
    }
}
