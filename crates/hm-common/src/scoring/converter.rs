use thiserror::Error;

/// Highest score of the bounded scale.
pub const MAX_SCORE: u8 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum ScoreDomainError {
    #[error("score {0} is outside [0, 100]")]
    ScoreOutOfRange(f64),
    #[error("hiring count {0} must be finite and non-negative")]
    InvalidHiringCount(f64),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ThresholdConfigError {
    #[error("hiring thresholds must be finite, got {0}")]
    NotFinite(f64),
    #[error("hiring thresholds must satisfy 0 < H50 < H60 < H80 < H100 and H100 > 1, got {h50}/{h60}/{h80}/{h100}")]
    NotIncreasing { h50: f64, h60: f64, h80: f64, h100: f64 },
    #[error("invalid value for {name}: {value}")]
    InvalidEnv { name: &'static str, value: String },
}

/// Hiring counts reached at scores 50, 60, 80 and 100 (score 0 ↔ 0 hirings).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreThresholds {
    h50: f64,
    h60: f64,
    h80: f64,
    h100: f64,
}

impl Default for ScoreThresholds {
    fn default() -> Self {
        Self {
            h50: 1.0,
            h60: 3.0,
            h80: 10.0,
            h100: 100.0,
        }
    }
}

impl ScoreThresholds {
    pub fn new(h50: f64, h60: f64, h80: f64, h100: f64) -> Result<Self, ThresholdConfigError> {
        for value in [h50, h60, h80, h100] {
            if !value.is_finite() {
                return Err(ThresholdConfigError::NotFinite(value));
            }
        }

        // log10(H100) divides the top segment, so H100 must exceed 1.
        if !(0.0 < h50 && h50 < h60 && h60 < h80 && h80 < h100 && h100 > 1.0) {
            return Err(ThresholdConfigError::NotIncreasing { h50, h60, h80, h100 });
        }

        Ok(Self { h50, h60, h80, h100 })
    }

    /// Reads `HM_SCORE_{50,60,80,100}_HIRINGS`, falling back to the defaults.
    pub fn from_env() -> Result<Self, ThresholdConfigError> {
        fn read(name: &'static str, default: f64) -> Result<f64, ThresholdConfigError> {
            match std::env::var(name) {
                Ok(raw) => raw
                    .trim()
                    .parse::<f64>()
                    .map_err(|_| ThresholdConfigError::InvalidEnv { name, value: raw }),
                Err(_) => Ok(default),
            }
        }

        let defaults = Self::default();
        Self::new(
            read("HM_SCORE_50_HIRINGS", defaults.h50)?,
            read("HM_SCORE_60_HIRINGS", defaults.h60)?,
            read("HM_SCORE_80_HIRINGS", defaults.h80)?,
            read("HM_SCORE_100_HIRINGS", defaults.h100)?,
        )
    }

    pub fn h50(&self) -> f64 {
        self.h50
    }

    pub fn h60(&self) -> f64 {
        self.h60
    }

    pub fn h80(&self) -> f64 {
        self.h80
    }

    pub fn h100(&self) -> f64 {
        self.h100
    }
}

/// Converts between raw hiring counts and the bounded 0-100 score.
///
/// Four segments: linear on [0,50], [50,60], [60,80], logarithmic on [80,100]
/// so the long tail of very large recruiters is compressed.
///
/// Domain policy: scores above 100 and negative or non-finite hiring counts
/// are rejected with `ScoreDomainError`. Hiring counts above H100 are in
/// domain and saturate at 100.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScoreConverter {
    thresholds: ScoreThresholds,
}

impl ScoreConverter {
    pub fn new(thresholds: ScoreThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &ScoreThresholds {
        &self.thresholds
    }

    pub fn score_to_hiring_count(&self, score: u8) -> Result<f64, ScoreDomainError> {
        if score > MAX_SCORE {
            return Err(ScoreDomainError::ScoreOutOfRange(score as f64));
        }
        Ok(self.hirings_at(score as f64))
    }

    pub fn hiring_count_to_score(&self, hiring_count: f64) -> Result<u8, ScoreDomainError> {
        let score = self.hiring_count_to_score_f64(hiring_count)?;
        Ok(score.round().clamp(0.0, MAX_SCORE as f64) as u8)
    }

    /// Unrounded inverse, useful when re-deriving sort keys.
    pub fn hiring_count_to_score_f64(&self, hiring_count: f64) -> Result<f64, ScoreDomainError> {
        if !hiring_count.is_finite() || hiring_count < 0.0 {
            return Err(ScoreDomainError::InvalidHiringCount(hiring_count));
        }

        let t = &self.thresholds;
        let score = if hiring_count <= t.h50 {
            50.0 * hiring_count / t.h50
        } else if hiring_count <= t.h60 {
            50.0 + 10.0 * (hiring_count - t.h50) / (t.h60 - t.h50)
        } else if hiring_count <= t.h80 {
            60.0 + 20.0 * (hiring_count - t.h60) / (t.h80 - t.h60)
        } else if hiring_count <= t.h100 {
            80.0 + 20.0 / t.h100.log10() * (1.0 + hiring_count - t.h80).log10()
        } else {
            MAX_SCORE as f64
        };

        Ok(score.min(MAX_SCORE as f64))
    }

    /// Validates a raw index value that is already expressed as a score.
    pub fn checked_score(&self, raw: f64) -> Result<u8, ScoreDomainError> {
        if !raw.is_finite() || !(0.0..=MAX_SCORE as f64).contains(&raw) {
            return Err(ScoreDomainError::ScoreOutOfRange(raw));
        }
        Ok(raw.round() as u8)
    }

    fn hirings_at(&self, score: f64) -> f64 {
        if score <= 50.0 {
            self.linear_0_50(score)
        } else if score <= 60.0 {
            self.linear_50_60(score)
        } else if score <= 80.0 {
            self.linear_60_80(score)
        } else {
            self.log_80_100(score)
        }
    }

    fn linear_0_50(&self, score: f64) -> f64 {
        self.thresholds.h50 * score / 50.0
    }

    fn linear_50_60(&self, score: f64) -> f64 {
        let t = &self.thresholds;
        t.h50 + (score - 50.0) / 10.0 * (t.h60 - t.h50)
    }

    fn linear_60_80(&self, score: f64) -> f64 {
        let t = &self.thresholds;
        t.h60 + (score - 60.0) / 20.0 * (t.h80 - t.h60)
    }

    fn log_80_100(&self, score: f64) -> f64 {
        let t = &self.thresholds;
        t.h80 - 1.0 + 10f64.powf((score - 80.0) / 20.0 * t.h100.log10())
    }
}

/// Star rating shown next to a result: 0.0 to 5.0, one decimal.
pub fn stars_for_score(score: u8) -> f64 {
    let stars = score.min(MAX_SCORE) as f64 / 20.0;
    (stars * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const EPS: f64 = 1e-9;

    #[test]
    fn round_trips_reference_scores() {
        let converter = ScoreConverter::default();
        for score in [0u8, 10, 25, 50, 60, 70, 80, 90, 100] {
            let hirings = converter.score_to_hiring_count(score).unwrap();
            assert_eq!(
                converter.hiring_count_to_score(hirings).unwrap(),
                score,
                "score {score} -> {hirings} hirings"
            );
        }
    }

    #[test]
    fn segments_agree_at_breakpoints() {
        let converter = ScoreConverter::default();
        let t = converter.thresholds();

        assert!((converter.linear_0_50(50.0) - converter.linear_50_60(50.0)).abs() < EPS);
        assert!((converter.linear_50_60(60.0) - converter.linear_60_80(60.0)).abs() < EPS);
        assert!((converter.linear_60_80(80.0) - converter.log_80_100(80.0)).abs() < EPS);

        assert!((converter.score_to_hiring_count(50).unwrap() - t.h50()).abs() < EPS);
        assert!((converter.score_to_hiring_count(60).unwrap() - t.h60()).abs() < EPS);
        assert!((converter.score_to_hiring_count(80).unwrap() - t.h80()).abs() < EPS);
    }

    #[test]
    fn known_values_with_default_thresholds() {
        let converter = ScoreConverter::default();
        assert_eq!(converter.score_to_hiring_count(0).unwrap(), 0.0);
        assert!((converter.score_to_hiring_count(25).unwrap() - 0.5).abs() < EPS);
        assert!((converter.score_to_hiring_count(90).unwrap() - 19.0).abs() < 1e-6);
        assert!((converter.score_to_hiring_count(100).unwrap() - 109.0).abs() < 1e-6);
        assert_eq!(converter.hiring_count_to_score(5_000.0).unwrap(), 100);
    }

    #[test]
    fn rejects_out_of_domain_values() {
        let converter = ScoreConverter::default();
        assert_eq!(
            converter.score_to_hiring_count(101),
            Err(ScoreDomainError::ScoreOutOfRange(101.0))
        );
        assert!(matches!(
            converter.hiring_count_to_score(-1.0),
            Err(ScoreDomainError::InvalidHiringCount(_))
        ));
        assert!(converter.hiring_count_to_score(f64::NAN).is_err());
        assert!(converter.checked_score(100.5).is_err());
        assert_eq!(converter.checked_score(42.4).unwrap(), 42);
    }

    #[test]
    fn thresholds_must_increase() {
        assert!(ScoreThresholds::new(1.0, 3.0, 10.0, 100.0).is_ok());
        assert!(matches!(
            ScoreThresholds::new(1.0, 1.0, 10.0, 100.0),
            Err(ThresholdConfigError::NotIncreasing { .. })
        ));
        assert!(ScoreThresholds::new(0.0, 3.0, 10.0, 100.0).is_err());
        assert!(matches!(
            ScoreThresholds::new(1.0, 3.0, 10.0, f64::INFINITY),
            Err(ThresholdConfigError::NotFinite(_))
        ));
    }

    #[test]
    fn stars_scale_with_score() {
        assert_eq!(stars_for_score(0), 0.0);
        assert_eq!(stars_for_score(50), 2.5);
        assert_eq!(stars_for_score(74), 3.7);
        assert_eq!(stars_for_score(100), 5.0);
    }

    proptest! {
        #[test]
        fn hirings_never_decrease(score in 0u8..100) {
            let converter = ScoreConverter::default();
            let low = converter.score_to_hiring_count(score).unwrap();
            let high = converter.score_to_hiring_count(score + 1).unwrap();
            prop_assert!(high >= low);
        }

        #[test]
        fn every_score_round_trips(score in 0u8..=100) {
            let converter = ScoreConverter::default();
            let hirings = converter.score_to_hiring_count(score).unwrap();
            prop_assert_eq!(converter.hiring_count_to_score(hirings).unwrap(), score);
        }

        #[test]
        fn inverse_stays_bounded(hirings in 0.0f64..1.0e6) {
            let converter = ScoreConverter::default();
            let score = converter.hiring_count_to_score_f64(hirings).unwrap();
            prop_assert!((0.0..=100.0).contains(&score));
        }
    }
}
