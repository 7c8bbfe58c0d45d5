//! Document field names shared by the query builder and the index backends.

pub const SIRET: &str = "siret";
pub const INDUSTRY: &str = "naf";
pub const HEADCOUNT: &str = "headcount";
pub const LOCATION: &str = "location";
pub const DEPARTMENT: &str = "department";

pub const SCORE: &str = "score";
pub const APPRENTICESHIP_SCORE: &str = "score_alternance";
pub const SCORES_BY_OCCUPATION: &str = "scores_by_rome";
pub const APPRENTICESHIP_SCORES_BY_OCCUPATION: &str = "scores_alternance_by_rome";
pub const BOOSTED_OCCUPATIONS: &str = "boosted_romes";
pub const BOOSTED_APPRENTICESHIP_OCCUPATIONS: &str = "boosted_alternance_romes";

pub const FLAG_JUNIOR: &str = "flag_junior";
pub const FLAG_SENIOR: &str = "flag_senior";
pub const FLAG_HANDICAP: &str = "flag_handicap";
pub const FLAG_APPRENTICESHIP: &str = "flag_alternance";
pub const FLAG_IMMERSION: &str = "flag_pmsmp";

/// `scores_by_rome.D1101`
pub fn nested(prefix: &str, code: &str) -> String {
    format!("{prefix}.{code}")
}

/// Splits `prefix.code` back into its parts.
pub fn split_nested(field: &str) -> Option<(&str, &str)> {
    field.split_once('.')
}
