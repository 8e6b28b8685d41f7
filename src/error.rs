// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConflationError {
    #[error("candidate match record is missing field '{0}'")]
    MissingField(&'static str),
    #[error("invalid interval [{start}, {end}) for match {key}")]
    InvalidInterval { key: String, start: f64, end: f64 },
    #[error(
        "interval [{start}, {end}) of match {key} exceeds reference '{reference_id}' of length {length}"
    )]
    IntervalOutOfRange {
        key: String,
        reference_id: String,
        start: f64,
        end: f64,
        length: f64,
    },
    #[error("unknown reference geometry '{0}'")]
    UnknownReference(String),
    #[error("reference geometry '{id}' is malformed: {reason}")]
    MalformedReference { id: String, reason: String },
    #[error("duplicate candidate match {0}")]
    DuplicateMatch(String),
    #[error("invalid configuration value for {key}: '{value}'")]
    InvalidConfig { key: String, value: String },
    #[error("Error serializing feature properties: {0}")]
    Serialization(#[from] serde_json::Error),
}
