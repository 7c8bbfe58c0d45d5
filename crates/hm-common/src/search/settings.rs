use serde::Serialize;
use strum::{AsRefStr, EnumString};
use thiserror::Error;

use crate::scoring::{ScoreConverter, ScoreThresholds, ThresholdConfigError};

/// Fixed edges of the distance histogram, in km.
pub const DISTANCE_BUCKET_EDGES_KM: [u32; 5] = [10, 30, 50, 100, 3000];

/// Hard ceiling for any configured page size.
pub const PAGE_SIZE_CEILING: usize = 100;

/// What the per-occupation values stored in the index are.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, EnumString, AsRefStr)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub enum ScoreRepresentation {
    #[default]
    Score,
    HiringCount,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SettingsError {
    #[error("invalid value for {name}: {value}")]
    InvalidEnv { name: &'static str, value: String },
    #[error(transparent)]
    Thresholds(#[from] ThresholdConfigError),
    #[error("inconsistent search settings: {0}")]
    Inconsistent(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchSettings {
    pub default_distance_km: u32,
    pub max_distance_km: u32,
    pub default_page_size: usize,
    pub max_page_size: usize,
    /// Size codes `<=` this are "small".
    pub small_max_size_code: u8,
    /// Size codes `>=` this are "big".
    pub big_min_size_code: u8,
    /// Radii tried, in order, when results are scarce.
    pub alternative_distances_km: Vec<u32>,
    pub max_alternative_occupations: usize,
    /// Bucket cap of the industry histogram.
    pub industry_facet_size: usize,
    pub representation: ScoreRepresentation,
    pub thresholds: ScoreThresholds,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            default_distance_km: 10,
            max_distance_km: 3000,
            default_page_size: 20,
            max_page_size: PAGE_SIZE_CEILING,
            small_max_size_code: 12,
            big_min_size_code: 21,
            alternative_distances_km: vec![30, 50, 3000],
            max_alternative_occupations: 5,
            industry_facet_size: 100,
            representation: ScoreRepresentation::Score,
            thresholds: ScoreThresholds::default(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, SettingsError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| SettingsError::InvalidEnv { name, value: raw }),
        Err(_) => Ok(default),
    }
}

impl SearchSettings {
    /// Reads `HM_*` overrides on top of the defaults, then validates.
    pub fn from_env() -> Result<Self, SettingsError> {
        let defaults = Self::default();

        let alternative_distances_km = match std::env::var("HM_ALTERNATIVE_DISTANCES_KM") {
            Ok(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(|item| item.parse::<u32>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|_| SettingsError::InvalidEnv {
                    name: "HM_ALTERNATIVE_DISTANCES_KM",
                    value: raw.clone(),
                })?,
            Err(_) => defaults.alternative_distances_km,
        };

        let representation = env_parse("HM_SCORE_REPRESENTATION", defaults.representation)?;

        let settings = Self {
            default_distance_km: env_parse("HM_DEFAULT_DISTANCE_KM", defaults.default_distance_km)?,
            max_distance_km: env_parse("HM_MAX_DISTANCE_KM", defaults.max_distance_km)?,
            default_page_size: env_parse("HM_DEFAULT_PAGE_SIZE", defaults.default_page_size)?,
            max_page_size: env_parse("HM_MAX_PAGE_SIZE", defaults.max_page_size)?,
            small_max_size_code: env_parse("HM_SMALL_MAX_SIZE_CODE", defaults.small_max_size_code)?,
            big_min_size_code: env_parse("HM_BIG_MIN_SIZE_CODE", defaults.big_min_size_code)?,
            alternative_distances_km,
            max_alternative_occupations: env_parse(
                "HM_MAX_ALTERNATIVE_OCCUPATIONS",
                defaults.max_alternative_occupations,
            )?,
            industry_facet_size: env_parse("HM_INDUSTRY_FACET_SIZE", defaults.industry_facet_size)?,
            representation,
            thresholds: ScoreThresholds::from_env()?,
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        let fail = |message: String| Err(SettingsError::Inconsistent(message));

        if self.default_distance_km == 0 || self.default_distance_km > self.max_distance_km {
            return fail(format!(
                "default distance {} must be within 1..={}",
                self.default_distance_km, self.max_distance_km
            ));
        }
        if self.max_page_size == 0 || self.max_page_size > PAGE_SIZE_CEILING {
            return fail(format!("max page size must be within 1..={PAGE_SIZE_CEILING}"));
        }
        if self.default_page_size == 0 || self.default_page_size > self.max_page_size {
            return fail(format!(
                "default page size {} must be within 1..={}",
                self.default_page_size, self.max_page_size
            ));
        }
        if self.small_max_size_code >= self.big_min_size_code {
            return fail(format!(
                "small size max {} must be below big size min {}",
                self.small_max_size_code, self.big_min_size_code
            ));
        }
        if self.alternative_distances_km.windows(2).any(|pair| pair[0] >= pair[1]) {
            return fail("alternative distances must be strictly increasing".into());
        }
        Ok(())
    }

    pub fn converter(&self) -> ScoreConverter {
        ScoreConverter::new(self.thresholds)
    }
}
