// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

use crate::error::ConflationError;
use serde::{Deserialize, Serialize};

/// Tolerances and thresholds for dispute resolution and path merging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConflationConfig {
    /// Interval lengths and overlaps at or below this (in reference measure units) count as zero
    pub interval_epsilon: f64,
    /// Two match endpoints closer than this are contiguous (meters)
    pub contiguity_tolerance_m: f64,
    /// Endpoint proximity that makes two matches of a path adjacency candidates (meters)
    pub endpoint_tolerance_m: f64,
    /// Largest gap bridged when merging two matches (meters)
    pub max_gap_m: f64,
}

impl Default for ConflationConfig {
    fn default() -> Self {
        Self {
            interval_epsilon: 1e-6,
            contiguity_tolerance_m: 0.5,
            endpoint_tolerance_m: 10.0,
            max_gap_m: 25.0,
        }
    }
}

impl ConflationConfig {
    pub const ENV_INTERVAL_EPSILON: &'static str = "CONFLATION_INTERVAL_EPSILON";
    pub const ENV_CONTIGUITY_TOLERANCE_M: &'static str = "CONFLATION_CONTIGUITY_TOLERANCE_M";
    pub const ENV_ENDPOINT_TOLERANCE_M: &'static str = "CONFLATION_ENDPOINT_TOLERANCE_M";
    pub const ENV_MAX_GAP_M: &'static str = "CONFLATION_MAX_GAP_M";

    /// Reads overrides from the environment (a `.env` file is honoured).
    /// Unset keys keep their defaults.
    pub fn from_env() -> Result<Self, ConflationError> {
        Self::from_lookup(|key| dotenvy::var(key).ok())
    }

    /// Same as [`ConflationConfig::from_env`] with an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConflationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        let fields: [(&str, &mut f64); 4] = [
            (Self::ENV_INTERVAL_EPSILON, &mut config.interval_epsilon),
            (
                Self::ENV_CONTIGUITY_TOLERANCE_M,
                &mut config.contiguity_tolerance_m,
            ),
            (
                Self::ENV_ENDPOINT_TOLERANCE_M,
                &mut config.endpoint_tolerance_m,
            ),
            (Self::ENV_MAX_GAP_M, &mut config.max_gap_m),
        ];

        for (key, slot) in fields {
            if let Some(raw) = lookup(key) {
                *slot = raw
                    .trim()
                    .parse::<f64>()
                    .map_err(|_| ConflationError::InvalidConfig {
                        key: key.to_string(),
                        value: raw.clone(),
                    })?;
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConflationError> {
        let fields = [
            (Self::ENV_INTERVAL_EPSILON, self.interval_epsilon),
            (Self::ENV_CONTIGUITY_TOLERANCE_M, self.contiguity_tolerance_m),
            (Self::ENV_ENDPOINT_TOLERANCE_M, self.endpoint_tolerance_m),
            (Self::ENV_MAX_GAP_M, self.max_gap_m),
        ];

        for (key, value) in fields {
            if !value.is_finite() || value < 0.0 {
                return Err(ConflationError::InvalidConfig {
                    key: key.to_string(),
                    value: value.to_string(),
                });
            }
        }

        Ok(())
    }
}
