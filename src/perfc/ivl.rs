// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{Error, Result};
use std::sync::{Arc, OnceLock};

/// Maximum number of histogram bucket bounds
pub const PERFC_IVL_MAX: usize = 32;

/// A strictly increasing vector of histogram bucket bounds plus a
/// precomputed `ilog2(sample) -> first candidate bucket` map.
///
/// A sample lands in the first bucket whose bound exceeds it; samples at or
/// above the last bound land in the overflow bucket `bound_count()`.
pub struct LatencyIvl {
    bounds: Vec<u64>,
    map: [u8; 64],
}

impl LatencyIvl {
    /// Builds an interval vector from `bounds`.
    ///
    /// # Errors
    ///
    /// Fails with `BadArgument` unless `bounds` is non-empty, at most
    /// [`PERFC_IVL_MAX`] long, and strictly increasing.
    pub fn new(bounds: &[u64]) -> Result<Arc<Self>> {
        if bounds.is_empty() || bounds.len() > PERFC_IVL_MAX {
            return Err(Error::BadArgument("bad interval bound count"));
        }

        if bounds.windows(2).any(|w| w[0] >= w[1]) {
            return Err(Error::BadArgument("interval bounds must increase"));
        }

        let mut map = [0u8; 64];

        // For each power of two, remember the first bucket whose bound it
        // could fall below, so recording skips the buckets it cannot hit
        let mut i = 0;
        let mut j = 0;

        while i < map.len() && j < bounds.len() {
            #[allow(clippy::indexing_slicing, clippy::cast_possible_truncation)]
            {
                map[i] = j as u8;
            }

            if (1u64 << i) < *bounds.get(j).unwrap_or(&u64::MAX) {
                i += 1;
            } else {
                j += 1;
            }
        }

        let j = j.min(bounds.len() - 1);

        #[allow(clippy::indexing_slicing, clippy::cast_possible_truncation)]
        while i < map.len() {
            map[i] = j as u8;
            i += 1;
        }

        Ok(Arc::new(Self {
            bounds: bounds.to_vec(),
            map,
        }))
    }

    /// Number of bounds (the histogram has one more bucket than bounds).
    #[must_use]
    pub fn bound_count(&self) -> usize {
        self.bounds.len()
    }

    /// The bound vector.
    #[must_use]
    pub fn bounds(&self) -> &[u64] {
        &self.bounds
    }

    /// Bucket index for `sample`.
    #[must_use]
    pub fn bucket(&self, sample: u64) -> usize {
        if sample == 0 {
            return 0;
        }

        let ilog2 = (sample & 0x7fff_ffff_ffff_ffff).max(1).ilog2() as usize;

        let mut i = usize::from(*self.map.get(ilog2).unwrap_or(&0));

        while i < self.bounds.len() && sample >= *self.bounds.get(i).unwrap_or(&u64::MAX) {
            i += 1;
        }

        i
    }
}

/// The default latency bound vector.
///
/// The first ten bounds run from 100 ns to 1 us with a 100 ns step; the
/// remaining bounds start at 1 us with a power-of-two step through index 23
/// and a power-of-four step after that, each rounded down to one or two
/// significant digits.
#[must_use]
#[allow(clippy::expect_used)]
pub fn default_ivl() -> Arc<LatencyIvl> {
    static DEFAULT: OnceLock<Arc<LatencyIvl>> = OnceLock::new();

    DEFAULT
        .get_or_init(|| {
            let mut boundv = Vec::with_capacity(PERFC_IVL_MAX);
            let mut bound = 100u64;

            for i in 0..PERFC_IVL_MAX as u64 {
                if i < 9 {
                    boundv.push(bound * (i + 1));
                    continue;
                }

                if bound == 100 {
                    bound = 1_000;
                }

                let mut b = bound;
                let mut mult = 1u64;
                while b > 30 {
                    b /= 10;
                    mult *= 10;
                }

                boundv.push(b * mult);
                bound *= if i < 23 { 2 } else { 4 };
            }

            LatencyIvl::new(&boundv).expect("default bounds are well-formed")
        })
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    #[allow(clippy::unwrap_used, clippy::indexing_slicing)]
    fn default_bounds_shape() {
        let ivl = default_ivl();
        let bounds = ivl.bounds();

        assert_eq!(PERFC_IVL_MAX, bounds.len());

        // 100ns..1us with 100ns step
        assert_eq!(&[100, 200, 300, 400, 500, 600, 700, 800, 900], &bounds[..9]);
        assert_eq!(1_000, bounds[9]);

        // rounded to 1-2 significant digits, strictly increasing
        assert_eq!(30_000, bounds[14]);
        assert!(bounds.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn bucket_indexing() {
        let ivl = LatencyIvl::new(&[100, 200, 400, 800]).unwrap();

        assert_eq!(0, ivl.bucket(0));
        assert_eq!(0, ivl.bucket(99));

        // a sample equal to bound k lands in bucket k + 1
        assert_eq!(1, ivl.bucket(100));
        assert_eq!(2, ivl.bucket(200));
        assert_eq!(3, ivl.bucket(400));

        // overflow bucket
        assert_eq!(4, ivl.bucket(800));
        assert_eq!(4, ivl.bucket(1 << 40));
    }

    #[test]
    fn rejects_bad_bounds() {
        assert!(LatencyIvl::new(&[]).is_err());
        assert!(LatencyIvl::new(&[5, 5]).is_err());
        assert!(LatencyIvl::new(&[5, 4]).is_err());
        assert!(LatencyIvl::new(&vec![1; PERFC_IVL_MAX + 1]).is_err());
    }
}
