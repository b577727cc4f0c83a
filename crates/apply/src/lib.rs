//! kstate apply: reconcile desired definitions against live cluster state.
//!
//! [`reconcile`] decides and performs the action for one definition, [`reconcile_batch`]
//! drives a list of them in order, [`diff`] is the directional structural diff used to
//! decide whether a live object still needs patching.

#![forbid(unsafe_code)]

pub mod diff;
mod lookup;
pub mod manifest;
mod reconcile;

pub use diff::{diff, DiffReport, DiffSummary};
pub use lookup::{lookup, LookupQuery};
pub use reconcile::{reconcile, reconcile_batch, reconcile_one};
