use std::collections::BTreeMap;

use tracing::{debug, warn};

use super::OccupationIndustryPair;

/// Knobs of the mutual-relevance pruning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimplifyConfig {
    /// Links within an entity's top-K partners are always kept.
    pub top_k: usize,
    /// A link beyond top-K survives when the partner ranks it within its own top-N.
    pub top_n: usize,
    pub max_iterations: usize,
    /// Occupation codes starting with one of these prefixes never lose a link.
    pub protected_prefixes: Vec<String>,
}

impl Default for SimplifyConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            top_n: 4,
            max_iterations: 20,
            protected_prefixes: Vec::new(),
        }
    }
}

impl SimplifyConfig {
    /// `HM_MAPPING_TOP_K`, `HM_MAPPING_TOP_N`, `HM_MAPPING_MAX_ITERATIONS`,
    /// `HM_MAPPING_PROTECTED_PREFIXES` (comma separated).
    pub fn from_env() -> Self {
        fn parse_usize(key: &str, default: usize) -> usize {
            std::env::var(key)
                .ok()
                .and_then(|raw| raw.trim().parse().ok())
                .filter(|value| *value > 0)
                .unwrap_or(default)
        }

        let defaults = Self::default();
        Self {
            top_k: parse_usize("HM_MAPPING_TOP_K", defaults.top_k),
            top_n: parse_usize("HM_MAPPING_TOP_N", defaults.top_n),
            max_iterations: parse_usize("HM_MAPPING_MAX_ITERATIONS", defaults.max_iterations),
            protected_prefixes: std::env::var("HM_MAPPING_PROTECTED_PREFIXES")
                .map(|raw| {
                    raw.split(',')
                        .map(|prefix| prefix.trim().to_ascii_uppercase())
                        .filter(|prefix| !prefix.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    /// Adds prefixes shipped with the reference data to the configured ones.
    pub fn with_protected_prefixes<I, S>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for prefix in prefixes {
            let prefix = prefix.as_ref().trim().to_ascii_uppercase();
            if !prefix.is_empty() && !self.protected_prefixes.contains(&prefix) {
                self.protected_prefixes.push(prefix);
            }
        }
        self
    }

    fn is_protected(&self, occupation_code: &str) -> bool {
        self.protected_prefixes
            .iter()
            .any(|prefix| occupation_code.starts_with(prefix.as_str()))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimplifyReport {
    pub iterations: usize,
    pub dropped: usize,
    pub converged: bool,
}

type Links = BTreeMap<String, BTreeMap<String, f64>>;

/// Prunes weakly relevant occupation↔industry links until a full pass drops
/// nothing.
///
/// A link beyond an entity's top-K partners is dropped unless the partner
/// itself ranks the entity within its top-N. Each entity's best link can never
/// be dropped (rank 0 on both sides), so nobody is orphaned.
pub fn simplify_pairs(
    pairs: &[OccupationIndustryPair],
    config: &SimplifyConfig,
) -> (Vec<OccupationIndustryPair>, SimplifyReport) {
    let top_k = config.top_k.max(1);
    let top_n = config.top_n.max(1);

    let mut by_occupation: Links = BTreeMap::new();
    let mut by_industry: Links = BTreeMap::new();
    for pair in pairs {
        by_occupation
            .entry(pair.occupation_code.clone())
            .or_default()
            .insert(pair.industry_code.clone(), pair.weight);
        by_industry
            .entry(pair.industry_code.clone())
            .or_default()
            .insert(pair.occupation_code.clone(), pair.weight);
    }

    let mut report = SimplifyReport::default();

    while report.iterations < config.max_iterations {
        report.iterations += 1;
        let mut dropped = 0;

        // Occupation side.
        let occupations: Vec<String> = by_occupation.keys().cloned().collect();
        for occupation in occupations {
            if config.is_protected(&occupation) {
                continue;
            }
            for industry in beyond_top(&by_occupation[&occupation], top_k) {
                if !ranks_within(&by_industry[&industry], &occupation, top_n) {
                    unlink(&mut by_occupation, &mut by_industry, &occupation, &industry);
                    dropped += 1;
                }
            }
        }

        // Industry side.
        let industries: Vec<String> = by_industry.keys().cloned().collect();
        for industry in industries {
            for occupation in beyond_top(&by_industry[&industry], top_k) {
                if config.is_protected(&occupation) {
                    continue;
                }
                if !ranks_within(&by_occupation[&occupation], &industry, top_n) {
                    unlink(&mut by_occupation, &mut by_industry, &occupation, &industry);
                    dropped += 1;
                }
            }
        }

        debug!(iteration = report.iterations, dropped, "mapping simplification pass");
        report.dropped += dropped;

        if dropped == 0 {
            report.converged = true;
            break;
        }
    }

    if !report.converged {
        warn!(
            iterations = report.iterations,
            "mapping simplification stopped before reaching a fixed point"
        );
    }

    let simplified = by_occupation
        .into_iter()
        .flat_map(|(occupation, industries)| {
            industries
                .into_iter()
                .map(move |(industry, weight)| OccupationIndustryPair {
                    occupation_code: occupation.clone(),
                    industry_code: industry,
                    weight,
                })
        })
        .collect();

    (simplified, report)
}

/// Partners ranked below the first `k`, best first.
fn beyond_top(partners: &BTreeMap<String, f64>, k: usize) -> Vec<String> {
    let mut ranked: Vec<(&String, f64)> = partners.iter().map(|(code, w)| (code, *w)).collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    ranked.into_iter().skip(k).map(|(code, _)| code.clone()).collect()
}

/// Whether `code` is among the best `n` entries of `partners`
/// (weight desc, code asc on ties).
fn ranks_within(partners: &BTreeMap<String, f64>, code: &str, n: usize) -> bool {
    let Some(&weight) = partners.get(code) else {
        return false;
    };
    let better = partners
        .iter()
        .filter(|(other, w)| **w > weight || (**w == weight && other.as_str() < code))
        .count();
    better < n
}

fn unlink(by_occupation: &mut Links, by_industry: &mut Links, occupation: &str, industry: &str) {
    if let Some(industries) = by_occupation.get_mut(occupation) {
        industries.remove(industry);
    }
    if let Some(occupations) = by_industry.get_mut(industry) {
        occupations.remove(occupation);
    }
}
