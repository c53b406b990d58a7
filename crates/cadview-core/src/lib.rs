// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Incremental show pipeline for CadView.
//!
//! [`Viewer::show`] runs, per call:
//!
//! 1. normalize every object and validate its options (errors here leave
//!    the stack untouched);
//! 2. upsert the objects into the port's [`ObjectStack`] and take a delivery
//!    ticket under the same lock;
//! 3. resolve meshes through the shared [`TessCache`](cadview_cache::TessCache),
//!    reporting `Reference`, `Tessellating` and a terminal status per object;
//! 4. deliver the stack once every earlier call on the port has delivered.
//!
//! Stack order always equals the order calls mutated it, and the viewer sees
//! stack states in that same order.

mod pool;
mod progress;
mod sequencer;
mod session;
mod stack;
mod viewer;

pub use pool::TessPool;
pub use progress::{
    CollectingReporter, NullReporter, ObjectStatus, ProgressEvent, ProgressReporter,
    SymbolReporter, TracingReporter,
};
pub use session::{Delivery, ViewerSession};
pub use stack::{ObjectStack, StackEntry};
pub use viewer::{ObjectOptions, ObjectReport, ShowObject, ShowReport, ShowRequest, Viewer};

use cadview_app_core::OptionsError;
use cadview_geom::NormalizeError;
use cadview_session::{ChannelError, PortError};
use thiserror::Error;

/// Errors raised by [`Viewer`] calls.
///
/// Tessellation failures are not here: they are per object and reported in
/// [`ShowReport`].
#[derive(Debug, Error)]
pub enum ShowError {
    /// An object could not be classified.
    #[error(transparent)]
    Normalize(#[from] NormalizeError),
    /// Display options or configuration out of range.
    #[error(transparent)]
    InvalidOptions(#[from] OptionsError),
    /// No usable viewer port.
    #[error(transparent)]
    Port(#[from] PortError),
    /// Channel failure on a call that has no stack to fall back on.
    #[error(transparent)]
    Channel(#[from] ChannelError),
}
