//! Analysis thresholds and runtime settings.

use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, Result};

fn default_max_ttc() -> f32 {
    1.5
}

fn default_max_pet() -> f32 {
    5.0
}

fn default_rear_end_angle() -> f32 {
    30.0
}

fn default_crossing_angle() -> f32 {
    80.0
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| (n.get() / 2).max(1))
        .unwrap_or(1)
}

/// Thresholds controlling conflict detection and classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnalysisConfig {
    /// Maximum time-to-collision in seconds; conflicts require a TTC at
    /// or below this. Valid range 0..=5.
    #[serde(default = "default_max_ttc")]
    pub max_ttc: f32,
    /// Maximum post-encroachment time in seconds; also sizes the
    /// trailing trajectory window. Valid range 0..=10.
    #[serde(default = "default_max_pet")]
    pub max_pet: f32,
    /// Conflict angles below this (degrees) classify as rear end.
    #[serde(default = "default_rear_end_angle")]
    pub rear_end_angle: f32,
    /// Conflict angles above this (degrees) classify as crossing.
    #[serde(default = "default_crossing_angle")]
    pub crossing_angle: f32,
    /// Compute the Monte-Carlo measures P(UEA), mTTC and mPET.
    #[serde(default)]
    pub probabilistic: bool,
    /// Worker threads for the per-step detection pass.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Fixed RNG seed for the Monte-Carlo predictors; omit for a fresh
    /// seed per run.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        AnalysisConfig {
            max_ttc: default_max_ttc(),
            max_pet: default_max_pet(),
            rear_end_angle: default_rear_end_angle(),
            crossing_angle: default_crossing_angle(),
            probabilistic: false,
            workers: default_workers(),
            seed: None,
        }
    }
}

impl AnalysisConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=5.0).contains(&self.max_ttc) {
            return Err(AnalysisError::Config(format!(
                "max TTC {} outside 0..=5 seconds",
                self.max_ttc
            )));
        }
        if !(0.0..=10.0).contains(&self.max_pet) {
            return Err(AnalysisError::Config(format!(
                "max PET {} outside 0..=10 seconds",
                self.max_pet
            )));
        }
        if !(0.0..=180.0).contains(&self.rear_end_angle)
            || !(0.0..=180.0).contains(&self.crossing_angle)
        {
            return Err(AnalysisError::Config(
                "classification angles must lie in 0..=180 degrees".into(),
            ));
        }
        if self.rear_end_angle > self.crossing_angle {
            return Err(AnalysisError::Config(format!(
                "rear-end angle {} exceeds crossing angle {}",
                self.rear_end_angle, self.crossing_angle
            )));
        }
        if self.workers == 0 {
            return Err(AnalysisError::Config("worker count must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let c = AnalysisConfig::default();
        assert!(c.validate().is_ok());
        assert_eq!(c.max_ttc, 1.5);
        assert_eq!(c.max_pet, 5.0);
        assert!(!c.probabilistic);
        assert!(c.workers >= 1);
    }

    #[test]
    fn out_of_range_thresholds_rejected() {
        let mut c = AnalysisConfig::default();
        c.max_ttc = 5.5;
        assert!(c.validate().is_err());

        let mut c = AnalysisConfig::default();
        c.max_pet = -1.0;
        assert!(c.validate().is_err());

        let mut c = AnalysisConfig::default();
        c.rear_end_angle = 120.0;
        c.crossing_angle = 80.0;
        assert!(c.validate().is_err());

        let mut c = AnalysisConfig::default();
        c.workers = 0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let c: AnalysisConfig = serde_json::from_str(r#"{"max_ttc": 2.0}"#).unwrap();
        assert_eq!(c.max_ttc, 2.0);
        assert_eq!(c.max_pet, 5.0);
        assert_eq!(c.crossing_angle, 80.0);
    }

    #[test]
    fn unknown_fields_rejected() {
        let r = serde_json::from_str::<AnalysisConfig>(r#"{"max_ttcc": 2.0}"#);
        assert!(r.is_err());
    }
}
