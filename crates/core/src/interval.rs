//! The fixed set of rotation intervals.
//!
//! Rotation cadence is never an arbitrary number of seconds: it is always
//! one of the [`RotationInterval`] variants, so an invalid interval cannot
//! be represented once parsed.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// How long each item stays on the display before the next one is shown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub enum RotationInterval {
    OneMinute,
    #[default]
    TwoMinutes,
    FiveMinutes,
}

impl RotationInterval {
    /// Every allowed interval, shortest first.
    pub const ALL: [RotationInterval; 3] = [
        RotationInterval::OneMinute,
        RotationInterval::TwoMinutes,
        RotationInterval::FiveMinutes,
    ];

    pub fn as_secs(self) -> u64 {
        match self {
            RotationInterval::OneMinute => 60,
            RotationInterval::TwoMinutes => 120,
            RotationInterval::FiveMinutes => 300,
        }
    }

    pub fn as_duration(self) -> Duration {
        Duration::from_secs(self.as_secs())
    }

    /// Human-readable label shown next to the interval.
    pub fn label(self) -> &'static str {
        match self {
            RotationInterval::OneMinute => "1 minute",
            RotationInterval::TwoMinutes => "2 minutes",
            RotationInterval::FiveMinutes => "5 minutes",
        }
    }

    /// Parse a number of seconds, rejecting anything outside the set.
    pub fn from_secs(secs: u64) -> Result<Self, CoreError> {
        Self::ALL
            .into_iter()
            .find(|i| i.as_secs() == secs)
            .ok_or_else(|| {
                let allowed: Vec<String> =
                    Self::ALL.iter().map(|i| i.as_secs().to_string()).collect();
                CoreError::Validation(format!(
                    "Invalid rotation interval {secs}s. Allowed: {}",
                    allowed.join(", ")
                ))
            })
    }
}

impl TryFrom<u64> for RotationInterval {
    type Error = CoreError;

    fn try_from(secs: u64) -> Result<Self, Self::Error> {
        Self::from_secs(secs)
    }
}

impl From<RotationInterval> for u64 {
    fn from(interval: RotationInterval) -> Self {
        interval.as_secs()
    }
}
