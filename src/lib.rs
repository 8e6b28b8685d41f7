// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

//! Conflation of target road datasets onto a shared reference network.
//!
//! Candidate matches from a map matcher claim intervals of reference
//! geometries. Overlapping claims from different paths are detected, resolved
//! by trimming, and the surviving intervals are merged back into continuous
//! per-path geometries.

#![deny(
    clippy::mutable_key_type,
    clippy::map_entry,
    clippy::boxed_local,
    clippy::let_unit_value,
    clippy::redundant_allocation,
    clippy::bool_comparison,
    clippy::bind_instead_of_map,
    clippy::vec_box,
    clippy::while_let_loop,
    clippy::useless_asref,
    clippy::repeat_once,
    clippy::deref_addrof,
    clippy::suspicious_map,
    clippy::single_char_pattern,
    clippy::for_kv_map,
    clippy::let_and_return,
    clippy::iter_nth,
    clippy::iter_cloned_collect,
    clippy::match_result_ok,
    clippy::cmp_owned,
    clippy::cmp_null,
    clippy::op_ref
)]

pub mod assembler;
pub mod config;
pub mod disputes;
pub mod error;
pub mod geometry_utils;
pub mod merger;
pub mod model;
pub mod pipeline;
pub mod store;

#[cfg(test)]
mod test_fixtures;

pub use config::ConflationConfig;
pub use error::ConflationError;
pub use model::{
    AssignedMatch, CandidateMatch, Interval, MatchKey, ReferenceGeometry, TargetEdge,
};
pub use pipeline::{ConflationOutput, ConflationStats, Conflator};
pub use store::{ConflationStore, InMemoryStore, ReferenceLookup};
