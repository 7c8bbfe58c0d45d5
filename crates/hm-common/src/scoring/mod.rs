pub mod converter;

pub use converter::{
    stars_for_score, ScoreConverter, ScoreDomainError, ScoreThresholds, ThresholdConfigError,
    MAX_SCORE,
};
