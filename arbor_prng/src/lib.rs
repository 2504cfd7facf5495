// Deterministic, portable pseudo-random number generator for arbor.
//
// Implements xoshiro256++ (Blackman & Vigna, 2019) with SplitMix64 seeding.
// Hand-rolled so that a given seed produces the same skeleton and the same
// wind phases on every platform and compiler version.
//
// Consumers:
// - `arbor_mesh::tree_gen` draws branch splits, deflections and lengths.
// - `arbor_mesh::wind_meta` draws one sway phase per phase group.
//
// Streams that must not disturb each other (e.g. the phase of a new branch
// group vs. the growth of the next branch) are separated with `fork()`, which
// derives an independent generator from the parent state plus a stream tag.
//
// **Critical constraint: determinism.** No floating-point arithmetic in the
// core generator and no OS entropy anywhere in this crate.

use serde::{Deserialize, Serialize};

/// Xoshiro256++ PRNG. Every random decision in arbor goes through one of
/// these, seeded from a caller-supplied `u64`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArborRng {
    s: [u64; 4],
}

impl ArborRng {
    /// Create a new generator seeded from a `u64`.
    ///
    /// SplitMix64 expands the seed into the 256-bit state, so nearby seeds
    /// still produce unrelated streams.
    pub fn new(seed: u64) -> Self {
        let mut sm = seed;
        Self {
            s: [
                splitmix64(&mut sm),
                splitmix64(&mut sm),
                splitmix64(&mut sm),
                splitmix64(&mut sm),
            ],
        }
    }

    /// Derive an independent generator for a sub-stream.
    ///
    /// Advances `self` by one step. Two forks with different `stream` tags
    /// taken from the same parent state are independent in practice.
    pub fn fork(&mut self, stream: u64) -> Self {
        let base = self.next_u64();
        Self::new(base ^ stream.wrapping_mul(0x9e37_79b9_7f4a_7c15))
    }

    /// Generate the next `u64` in the sequence.
    pub fn next_u64(&mut self) -> u64 {
        let result = (self.s[0].wrapping_add(self.s[3]))
            .rotate_left(23)
            .wrapping_add(self.s[0]);

        let t = self.s[1] << 17;

        self.s[2] ^= self.s[0];
        self.s[3] ^= self.s[1];
        self.s[1] ^= self.s[2];
        self.s[0] ^= self.s[3];

        self.s[2] ^= t;
        self.s[3] = self.s[3].rotate_left(45);

        result
    }

    /// Generate a uniform `f32` in [0, 1) from the upper 24 bits.
    pub fn next_f32(&mut self) -> f32 {
        (self.next_u64() >> 40) as f32 / (1u64 << 24) as f32
    }

    /// Generate a uniform `f64` in [0, 1) from the upper 53 bits.
    pub fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Uniform value in `[low, high)`. Returns `low` when the range is empty,
    /// which lets tree profiles set a variance of zero.
    pub fn range_f32(&mut self, low: f32, high: f32) -> f32 {
        if high <= low {
            return low;
        }
        low + self.next_f32() * (high - low)
    }

    /// Uniform value in `[-amplitude, amplitude)`.
    pub fn signed_f32(&mut self, amplitude: f32) -> f32 {
        self.range_f32(-amplitude, amplitude)
    }

    /// Uniform integer in `[low, high)` via rejection sampling (no modulo
    /// bias). Panics if `low >= high`.
    pub fn range_u64(&mut self, low: u64, high: u64) -> u64 {
        assert!(low < high, "range_u64: low must be less than high");
        let range = high - low;
        if range.is_power_of_two() {
            return low + (self.next_u64() & (range - 1));
        }
        let threshold = range.wrapping_neg() % range;
        loop {
            let r = self.next_u64();
            if r >= threshold {
                return low + (r % range);
            }
        }
    }

    /// Return `true` with probability `p`. `p <= 0` is always false,
    /// `p >= 1` always true.
    pub fn random_bool(&mut self, p: f64) -> bool {
        self.next_f64() < p
    }
}

/// SplitMix64, used only to expand a single `u64` seed into xoshiro state.
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}
