//! Yard configuration.

use std::error::Error;
use std::fmt;

use crate::sampler::Sampler;

/// Settings for a simulated yard.
#[derive(Clone, Debug)]
pub struct YardSettings {
    /// Length of the girder axis.
    pub width: f64,
    /// Height limit that applies where no location overrides it; also
    /// the hoist travel level (cranes cruise at `height - capacity`).
    pub height: usize,
    /// Settle delay in seconds inserted after every travel leg and
    /// collision re-evaluation.
    pub reaction_time: f64,
    /// Crane girder speed, sampled once per travel.
    pub girder_speed: Sampler,
    /// Crane hoist speed, sampled once per hoist move.
    pub hoist_speed: Sampler,
    /// Duration of a pickup or dropoff manipulation.
    pub manipulation_time: Sampler,
    /// Seed for all randomness in the yard.
    pub seed: u64,
}

impl Default for YardSettings {
    fn default() -> Self {
        Self {
            width: 100.0,
            height: 8,
            reaction_time: 0.2,
            girder_speed: Sampler::Triangular {
                low: 1.0,
                high: 3.0,
                mode: 2.0,
            },
            hoist_speed: Sampler::Triangular {
                low: 1.0,
                high: 3.0,
                mode: 2.0,
            },
            manipulation_time: Sampler::Triangular {
                low: 5.0,
                high: 10.0,
                mode: 7.5,
            },
            seed: 42,
        }
    }
}

impl YardSettings {
    /// Check the settings describe a buildable yard.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if !(self.width > 0.0) || !self.width.is_finite() {
            return Err(SettingsError::NonPositiveWidth(self.width));
        }
        if self.height == 0 {
            return Err(SettingsError::ZeroHeight);
        }
        if self.reaction_time < 0.0 || !self.reaction_time.is_finite() {
            return Err(SettingsError::NegativeReactionTime(self.reaction_time));
        }
        for (name, sampler) in [
            ("girder_speed", &self.girder_speed),
            ("hoist_speed", &self.hoist_speed),
            ("manipulation_time", &self.manipulation_time),
        ] {
            sampler
                .validate()
                .map_err(|reason| SettingsError::InvalidSampler { name, reason })?;
        }
        Ok(())
    }
}

/// Errors from [`YardSettings::validate`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SettingsError {
    /// The girder length must be positive and finite.
    NonPositiveWidth(f64),
    /// The yard height must be at least one block.
    ZeroHeight,
    /// The reaction time must be non-negative and finite.
    NegativeReactionTime(f64),
    /// A sampler's parameters are out of range.
    InvalidSampler {
        /// Which setting.
        name: &'static str,
        /// What is wrong with it.
        reason: &'static str,
    },
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonPositiveWidth(w) => write!(f, "yard width must be positive, got {w}"),
            Self::ZeroHeight => write!(f, "yard height must be at least 1"),
            Self::NegativeReactionTime(t) => {
                write!(f, "reaction time must be non-negative, got {t}")
            }
            Self::InvalidSampler { name, reason } => write!(f, "invalid {name}: {reason}"),
        }
    }
}

impl Error for SettingsError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_validate() {
        YardSettings::default().validate().unwrap();
    }

    #[test]
    fn zero_width_is_rejected() {
        let s = YardSettings {
            width: 0.0,
            ..YardSettings::default()
        };
        assert_eq!(s.validate().unwrap_err(), SettingsError::NonPositiveWidth(0.0));
    }

    #[test]
    fn bad_sampler_is_named() {
        let s = YardSettings {
            hoist_speed: Sampler::Constant(-1.0),
            ..YardSettings::default()
        };
        match s.validate().unwrap_err() {
            SettingsError::InvalidSampler { name, .. } => assert_eq!(name, "hoist_speed"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
