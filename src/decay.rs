//! Confidence decay - exponential aging of relation confidence toward a floor

use crate::clock::MILLIS_PER_DAY;
use crate::config::EngineConfig;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Decay `confidence` by its age relative to `now`.
///
/// `decayed = max(min_confidence, confidence * 2^(-age_days / half_life_days))`
///
/// A missing confidence stays missing. Age is clamped at zero and the result
/// never drops below `min_confidence`, even for a confidence that started
/// beneath it. A non-positive half-life disables decay.
pub fn decay(
    confidence: Option<f64>,
    valid_from: i64,
    now: i64,
    half_life_days: f64,
    min_confidence: f64,
) -> Option<f64> {
    let confidence = confidence?;
    if half_life_days.is_nan() || half_life_days <= 0.0 {
        return Some(confidence.max(min_confidence));
    }

    let age_days = now.saturating_sub(valid_from).max(0) as f64 / MILLIS_PER_DAY as f64;
    let decayed = confidence * (-age_days / half_life_days).exp2();
    Some(decayed.max(min_confidence))
}

/// Parameters for a decayed view of the graph.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecayOptions {
    /// Instant the decay is computed against
    pub reference_time: i64,
    pub half_life_days: f64,
    pub min_confidence: f64,
}

impl DecayOptions {
    /// Fill unspecified parameters from the engine configuration
    pub fn resolve(
        config: &EngineConfig,
        now: i64,
        reference_time: Option<i64>,
        half_life_days: Option<f64>,
        min_confidence: Option<f64>,
    ) -> Result<Self> {
        let options = Self {
            reference_time: reference_time.unwrap_or(now),
            half_life_days: half_life_days.unwrap_or(config.half_life_days),
            min_confidence: min_confidence.unwrap_or(config.min_confidence),
        };
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.half_life_days.is_finite() && self.half_life_days > 0.0) {
            return Err(Error::invalid_input("halfLifeDays must be a positive number"));
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(Error::invalid_input("minConfidence must be within [0, 1]"));
        }
        Ok(())
    }

    pub fn apply(&self, confidence: Option<f64>, valid_from: i64) -> Option<f64> {
        decay(
            confidence,
            valid_from,
            self.reference_time,
            self.half_life_days,
            self.min_confidence,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const NOW: i64 = 1_700_000_000_000;

    #[test]
    fn test_thirty_days_with_fourteen_day_half_life() {
        let valid_from = NOW - 30 * MILLIS_PER_DAY;
        let decayed = decay(Some(0.9), valid_from, NOW, 14.0, 0.05).unwrap();
        let expected = 0.9 * 2f64.powf(-30.0 / 14.0);
        assert!((decayed - expected).abs() < 1e-12);
        assert!((decayed - 0.194).abs() < 0.001);
    }

    #[test]
    fn test_one_half_life_halves() {
        let decayed = decay(Some(0.8), NOW - 14 * MILLIS_PER_DAY, NOW, 14.0, 0.0).unwrap();
        assert!((decayed - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_missing_confidence_passes_through() {
        assert_eq!(decay(None, 0, NOW, 14.0, 0.05), None);
    }

    #[test]
    fn test_floor_applies_to_old_relations() {
        let decayed = decay(Some(0.9), 0, NOW, 1.0, 0.05).unwrap();
        assert_eq!(decayed, 0.05);
    }

    #[test]
    fn test_confidence_below_floor_is_raised() {
        let decayed = decay(Some(0.01), NOW - 30 * MILLIS_PER_DAY, NOW, 14.0, 0.05).unwrap();
        assert_eq!(decayed, 0.05);
        assert_eq!(decay(Some(0.01), NOW, NOW, 14.0, 0.05), Some(0.05));
        assert_eq!(decay(Some(0.01), 0, NOW, 0.0, 0.05), Some(0.05));
    }

    #[test]
    fn test_extreme_reference_time_saturates() {
        assert_eq!(decay(Some(0.8), NOW, i64::MIN, 14.0, 0.1), Some(0.8));
        assert_eq!(decay(Some(0.8), i64::MIN, i64::MAX, 14.0, 0.1), Some(0.1));
    }

    #[test]
    fn test_future_valid_from_does_not_inflate() {
        assert_eq!(decay(Some(0.5), NOW + MILLIS_PER_DAY, NOW, 14.0, 0.1), Some(0.5));
    }

    #[test]
    fn test_resolve_uses_config_defaults() {
        let config = EngineConfig::default();
        let options = DecayOptions::resolve(&config, NOW, None, Some(14.0), None).unwrap();
        assert_eq!(options.reference_time, NOW);
        assert_eq!(options.half_life_days, 14.0);
        assert_eq!(options.min_confidence, config.min_confidence);

        assert!(DecayOptions::resolve(&config, NOW, None, Some(0.0), None).is_err());
        assert!(DecayOptions::resolve(&config, NOW, None, None, Some(-0.1)).is_err());
    }

    proptest! {
        #[test]
        fn prop_identity_at_age_zero(confidence in 0.0f64..=1.0, min in 0.0f64..=1.0, half_life in 0.1f64..365.0) {
            let decayed = decay(Some(confidence), NOW, NOW, half_life, min).unwrap();
            prop_assert_eq!(decayed, confidence.max(min));
        }

        #[test]
        fn prop_monotonic_and_floored(
            confidence in 0.0f64..=1.0,
            min in 0.0f64..=1.0,
            half_life in 0.1f64..365.0,
            age_a in 0i64..(3_650 * MILLIS_PER_DAY),
            age_b in 0i64..(3_650 * MILLIS_PER_DAY),
        ) {
            let (younger, older) = if age_a <= age_b { (age_a, age_b) } else { (age_b, age_a) };
            let d_young = decay(Some(confidence), NOW - younger, NOW, half_life, min).unwrap();
            let d_old = decay(Some(confidence), NOW - older, NOW, half_life, min).unwrap();
            prop_assert!(d_old <= d_young);
            prop_assert!(d_old >= min);
            prop_assert!(d_young <= confidence.max(min));
        }
    }
}
