// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Float canonicalization for deterministic hashing.
//!
//! These are projections used when computing fingerprints. Stored geometry is
//! never rewritten.

use crate::object::Point3;

/// Canonical IEEE-754 bit pattern of `x` for hashing.
///
/// `-0.0` and `0.0` map to the same bits, and every NaN payload maps to the
/// quiet NaN returned by [`f64::NAN`]. All other values hash by their exact
/// bits, so geometry that differs in the last ulp is different geometry.
pub fn canonical_f64_bits(x: f64) -> u64 {
    if x == 0.0 {
        0
    } else if x.is_nan() {
        f64::NAN.to_bits()
    } else {
        x.to_bits()
    }
}

/// Returns `true` when every coordinate of `p` is finite.
pub fn is_finite_point(p: &Point3) -> bool {
    p.iter().all(|c| c.is_finite())
}
