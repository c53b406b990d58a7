// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shape model and normalization for CadView.
//!
//! A scripting client hands over geometry as a [`CadObject`]. The normalizer
//! ([`normalize`]) classifies it into a [`ShapeKind`] and wraps it in an
//! immutable [`ShapeDescriptor`] carrying a content [`Fingerprint`].
//!
//! # Fingerprint Policy
//!
//! The fingerprint is `BLAKE3(domain || kind || canonical geometry || params)`.
//! Floats are hashed by their bit pattern after canonicalization (`-0.0` folds
//! into `0.0`, every NaN folds into one pattern), so the same geometry and the
//! same tessellation parameters always yield the same fingerprint, across calls
//! and across processes. Display options never enter the hash: two entries that
//! differ only in color share one tessellation.
#![forbid(unsafe_code)]

mod canon;
mod descriptor;
mod fingerprint;
mod object;
mod params;

pub use canon::{canonical_f64_bits, is_finite_point};
pub use descriptor::{
    classify, fingerprint_of, normalize, NormalizeError, ShapeDescriptor, ShapeKind,
};
pub use fingerprint::{Fingerprint, FingerprintHasher};
pub use object::{CadObject, Edge, Face, MeshData, Point3, Solid};
pub use params::TessParams;
