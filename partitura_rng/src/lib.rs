// Seeded pseudo-random source for composition runs.
//
// xoshiro256++ (Blackman & Vigna, 2019) expanded from a single u64 seed via
// SplitMix64. Every random decision a composition script makes (which
// instrument speaks next, which opening, which pitch, which duration) draws
// from one `ComposeRng`, so a piece is reproducible from its seed alone.
//
// On top of the raw generator this crate provides the selection primitives
// the placement loop needs: uniform choice from a slice and weighted choice
// with caller-supplied weights. Both return `None` on an empty (or all-zero)
// candidate set rather than panicking, because an empty candidate list is a
// normal outcome of constraint filtering.
//
// **Determinism.** The integer core uses no floating point. Float helpers
// derive from the upper bits of a `u64` and are platform-independent.

use serde::{Deserialize, Serialize};

/// The random source threaded through a composition run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ComposeRng {
    s: [u64; 4],
}

impl ComposeRng {
    /// Seed a new generator. Equal seeds give equal streams.
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

    /// Seed from the wall clock, for runs that don't ask for a seed.
    /// Returns the seed too so it can be reported and replayed.
    pub fn from_clock() -> (Self, u64) {
        let seed = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0x5eed);
        (Self::new(seed), seed)
    }

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

    /// Uniform `f64` in [0, 1), built from the top 53 bits.
    pub fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Uniform integer in `[low, high)` with rejection sampling.
    ///
    /// Panics if `low >= high`.
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

    /// Uniform `usize` in `[low, high)`. Panics if `low >= high`.
    pub fn range_usize(&mut self, low: usize, high: usize) -> usize {
        self.range_u64(low as u64, high as u64) as usize
    }

    /// Uniform `usize` in `[low, high]`. Panics if `low > high`.
    pub fn range_usize_inclusive(&mut self, low: usize, high: usize) -> usize {
        assert!(low <= high, "range_usize_inclusive: low must be <= high");
        self.range_u64(low as u64, high as u64 + 1) as usize
    }

    /// `true` with probability `p`. `p <= 0` never, `p >= 1` always.
    pub fn random_bool(&mut self, p: f64) -> bool {
        self.next_f64() < p
    }

    /// Pick one element uniformly. `None` for an empty slice.
    pub fn choose<'a, T>(&mut self, options: &'a [T]) -> Option<&'a T> {
        if options.is_empty() {
            return None;
        }
        let i = self.range_usize(0, options.len());
        options.get(i)
    }

    /// Pick an index with probability proportional to its weight.
    ///
    /// Negative and non-finite weights count as zero. Returns `None` when
    /// there are no candidates or every weight is zero. Extra weights beyond
    /// the candidate count are ignored; missing weights count as zero.
    fn weighted_index(&mut self, weights: &[f64]) -> Option<usize> {
        let clean = |w: f64| if w.is_finite() && w > 0.0 { w } else { 0.0 };
        let total: f64 = weights.iter().map(|&w| clean(w)).sum();
        if total <= 0.0 {
            return None;
        }
        let target = self.next_f64() * total;
        let mut cumulative = 0.0;
        let mut last_positive = None;
        for (i, &w) in weights.iter().enumerate() {
            let w = clean(w);
            if w == 0.0 {
                continue;
            }
            cumulative += w;
            last_positive = Some(i);
            if target < cumulative {
                return Some(i);
            }
        }
        // Float accumulation can leave target a hair above the final sum.
        last_positive
    }

    /// Weighted choice over `options` with a parallel `weights` slice.
    pub fn weighted_choice<'a, T>(&mut self, options: &'a [T], weights: &[f64]) -> Option<&'a T> {
        let n = options.len().min(weights.len());
        self.weighted_index(&weights[..n]).and_then(|i| options.get(i))
    }

}

/// SplitMix64 step, used only to expand the seed.
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}
