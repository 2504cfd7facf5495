// Segment builders: who decides the polygon of a segment.
//
// Every segment is owned by exactly one builder, selected by the skin range
// its position falls in (or `Default` outside all ranges). A builder has two
// capabilities, expressed by the `SegmentBuilder` trait:
//
// - side-count policy: how many polygon sides the segment's ring gets;
// - polygon sampler: the radial scale at each angular position of the ring.
//
// The ring builder and stitcher only ever see the resulting side counts and
// ring points, so they stay builder-agnostic. New builders only have to
// implement the trait and add a `Builder` variant.
//
// Builders:
// - `DefaultBuilder`: circle, sides interpolated between the skin's min/max
//   by girth normalized against the whole structure's average-girth range.
// - `TrunkFlareBuilder`: root buttresses at the trunk base; always max sides.
// - `ShapeBuilder`: a branch's custom `ShapeProfile`, blended back to a circle
//   near the range caps.

use std::f32::consts::TAU;

use crate::config::TrunkFlareConfig;
use crate::skeleton::ShapeProfile;
use crate::types::BuilderTag;

/// Inputs to a side-count decision.
#[derive(Clone, Copy, Debug)]
pub struct SideContext {
    pub girth: f32,
    pub min_sides: u16,
    pub max_sides: u16,
    /// Smallest and largest average branch girth in the structure.
    pub min_avg_girth: f32,
    pub max_avg_girth: f32,
}

/// Where a segment sits inside its builder range.
#[derive(Clone, Copy, Debug, Default)]
pub struct RangePlacement {
    /// 0 at the range start, 1 at the range end.
    pub local: f32,
    /// 0 at a cap position, rising to 1 one cap length inside the range.
    pub cap_weight: f32,
}

pub trait SegmentBuilder {
    fn tag(&self) -> BuilderTag;

    fn side_count(&self, ctx: &SideContext) -> u16;

    /// Radial scale at `fraction` (0..1) of the full turn.
    fn radial_scale(&self, fraction: f32, placement: &RangePlacement) -> f32;
}

/// Girth-proportional side count between the skin bounds, never below 3.
pub fn girth_side_count(ctx: &SideContext) -> u16 {
    let min = ctx.min_sides.max(3);
    let max = ctx.max_sides.max(min);
    let span = ctx.max_avg_girth - ctx.min_avg_girth;
    let t = if span > f32::EPSILON {
        ((ctx.girth - ctx.min_avg_girth) / span).clamp(0.0, 1.0)
    } else {
        1.0
    };
    let sides = min as f32 + (max - min) as f32 * t;
    (sides.round() as u16).clamp(min, max)
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultBuilder;

impl SegmentBuilder for DefaultBuilder {
    fn tag(&self) -> BuilderTag {
        BuilderTag::Default
    }

    fn side_count(&self, ctx: &SideContext) -> u16 {
        girth_side_count(ctx)
    }

    fn radial_scale(&self, _fraction: f32, _placement: &RangePlacement) -> f32 {
        1.0
    }
}

#[derive(Clone, Debug)]
pub struct TrunkFlareBuilder {
    pub config: TrunkFlareConfig,
}

impl SegmentBuilder for TrunkFlareBuilder {
    fn tag(&self) -> BuilderTag {
        BuilderTag::TrunkFlare
    }

    fn side_count(&self, ctx: &SideContext) -> u16 {
        ctx.max_sides.max(ctx.min_sides).max(3)
    }

    fn radial_scale(&self, fraction: f32, placement: &RangePlacement) -> f32 {
        let fade = (1.0 - placement.local.clamp(0.0, 1.0)).powf(self.config.falloff.max(0.0));
        let lobe = (self.config.lobes as f32 * fraction * TAU).cos().max(0.0);
        1.0 + self.config.strength * fade * lobe
    }
}

#[derive(Clone, Debug)]
pub struct ShapeBuilder {
    pub profile: ShapeProfile,
}

impl SegmentBuilder for ShapeBuilder {
    fn tag(&self) -> BuilderTag {
        BuilderTag::Shape
    }

    fn side_count(&self, _ctx: &SideContext) -> u16 {
        (self.profile.radial.len() as u16).max(3)
    }

    fn radial_scale(&self, fraction: f32, placement: &RangePlacement) -> f32 {
        let w = placement.cap_weight.clamp(0.0, 1.0);
        1.0 + (self.profile.scale_at(fraction) - 1.0) * w
    }
}

/// Tagged builder variant stored on a skin range.
#[derive(Clone, Debug)]
pub enum Builder {
    Default(DefaultBuilder),
    TrunkFlare(TrunkFlareBuilder),
    Shape(ShapeBuilder),
}

impl Builder {
    pub fn as_segment_builder(&self) -> &dyn SegmentBuilder {
        match self {
            Builder::Default(b) => b,
            Builder::TrunkFlare(b) => b,
            Builder::Shape(b) => b,
        }
    }

    pub fn tag(&self) -> BuilderTag {
        self.as_segment_builder().tag()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(girth: f32) -> SideContext {
        SideContext {
            girth,
            min_sides: 4,
            max_sides: 12,
            min_avg_girth: 0.1,
            max_avg_girth: 1.1,
        }
    }

    #[test]
    fn side_count_follows_girth() {
        assert_eq!(girth_side_count(&ctx(0.0)), 4);
        assert_eq!(girth_side_count(&ctx(0.1)), 4);
        assert_eq!(girth_side_count(&ctx(0.6)), 8);
        assert_eq!(girth_side_count(&ctx(1.1)), 12);
        assert_eq!(girth_side_count(&ctx(5.0)), 12);
    }

    #[test]
    fn side_count_clamps_degenerate_bounds() {
        let c = SideContext {
            min_sides: 1,
            max_sides: 2,
            ..ctx(0.5)
        };
        assert_eq!(girth_side_count(&c), 3);
        let uniform = SideContext {
            min_avg_girth: 0.5,
            max_avg_girth: 0.5,
            ..ctx(0.5)
        };
        assert_eq!(girth_side_count(&uniform), 12);
    }

    #[test]
    fn trunk_flare_fades_out() {
        let flare = TrunkFlareBuilder {
            config: TrunkFlareConfig {
                enabled: true,
                strength: 0.5,
                lobes: 4,
                falloff: 1.0,
                ..TrunkFlareConfig::default()
            },
        };
        let base = RangePlacement {
            local: 0.0,
            cap_weight: 1.0,
        };
        let top = RangePlacement {
            local: 1.0,
            cap_weight: 1.0,
        };
        assert!((flare.radial_scale(0.0, &base) - 1.5).abs() < 1e-6);
        assert!((flare.radial_scale(0.0, &top) - 1.0).abs() < 1e-6);
        // Between lobes there is no displacement.
        assert!((flare.radial_scale(0.125, &base) - 1.0).abs() < 1e-5);
        assert_eq!(flare.side_count(&ctx(0.0)), 12);
    }

    #[test]
    fn shape_blends_to_circle_at_caps() {
        let shape = Builder::Shape(ShapeBuilder {
            profile: ShapeProfile {
                radial: vec![2.0; 5],
                from: 0.0,
                to: 1.0,
                cap_length: 0.1,
            },
        });
        let b = shape.as_segment_builder();
        assert_eq!(shape.tag(), BuilderTag::Shape);
        assert_eq!(b.side_count(&ctx(1.0)), 5);
        let at_cap = RangePlacement {
            local: 0.0,
            cap_weight: 0.0,
        };
        let inside = RangePlacement {
            local: 0.5,
            cap_weight: 1.0,
        };
        assert_eq!(b.radial_scale(0.3, &at_cap), 1.0);
        assert_eq!(b.radial_scale(0.3, &inside), 2.0);
    }
}
