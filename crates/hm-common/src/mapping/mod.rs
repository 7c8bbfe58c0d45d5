//! Occupation (ROME) ↔ industry (NAF) relevance mapping.

pub mod mobility;
pub mod simplify;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

pub use mobility::related_occupations;
pub use simplify::{simplify_pairs, SimplifyConfig, SimplifyReport};

/// One raw observation: `weight` hirings of `occupation_code` in `industry_code`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OccupationIndustryPair {
    pub occupation_code: String,
    pub industry_code: String,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MappingError {
    #[error("line {line}: expected `occupation_code,industry_code,weight`")]
    MalformedRow { line: usize },
    #[error("line {line}: invalid weight {value:?}")]
    InvalidWeight { line: usize, value: String },
}

/// Parses `occupation_code,industry_code,weight` rows (`;` also accepted).
/// Blank lines, `#` comments and a leading header row are skipped.
pub fn parse_pairs_csv(text: &str) -> Result<Vec<OccupationIndustryPair>, MappingError> {
    let mut pairs = Vec::new();
    for (index, raw) in text.lines().enumerate() {
        let line = index + 1;
        let row = raw.trim();
        if row.is_empty() || row.starts_with('#') {
            continue;
        }

        let columns: Vec<&str> = row.split([',', ';']).map(str::trim).collect();
        let [occupation, industry, weight] = columns.as_slice() else {
            return Err(MappingError::MalformedRow { line });
        };
        if pairs.is_empty() && line == 1 && weight.parse::<f64>().is_err() {
            continue;
        }

        let weight = weight.parse::<f64>().map_err(|_| MappingError::InvalidWeight {
            line,
            value: (*weight).to_string(),
        })?;
        pairs.push(OccupationIndustryPair {
            occupation_code: occupation.to_ascii_uppercase(),
            industry_code: industry.to_ascii_uppercase(),
            weight,
        });
    }
    Ok(pairs)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedCode {
    pub code: String,
    pub weight: f64,
}

/// Bidirectional lookup, each side sorted by weight desc then code asc.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OccupationIndustryMapping {
    by_occupation: HashMap<String, Vec<WeightedCode>>,
    by_industry: HashMap<String, Vec<WeightedCode>>,
}

impl OccupationIndustryMapping {
    /// Builds the lookup from raw pairs. Duplicate pairs have their weights
    /// summed; non-positive or non-finite weights are ignored.
    pub fn from_pairs(pairs: &[OccupationIndustryPair]) -> Self {
        let merged = merge_pairs(pairs);

        let mut by_occupation: HashMap<String, Vec<WeightedCode>> = HashMap::new();
        let mut by_industry: HashMap<String, Vec<WeightedCode>> = HashMap::new();
        for pair in &merged {
            by_occupation
                .entry(pair.occupation_code.clone())
                .or_default()
                .push(WeightedCode {
                    code: pair.industry_code.clone(),
                    weight: pair.weight,
                });
            by_industry
                .entry(pair.industry_code.clone())
                .or_default()
                .push(WeightedCode {
                    code: pair.occupation_code.clone(),
                    weight: pair.weight,
                });
        }

        for list in by_occupation.values_mut().chain(by_industry.values_mut()) {
            list.sort_by(|a, b| b.weight.total_cmp(&a.weight).then_with(|| a.code.cmp(&b.code)));
        }

        Self {
            by_occupation,
            by_industry,
        }
    }

    /// Merges, prunes weak links, then builds the lookup.
    pub fn simplified(pairs: &[OccupationIndustryPair], config: &SimplifyConfig) -> (Self, SimplifyReport) {
        let merged = merge_pairs(pairs);
        let (kept, report) = simplify_pairs(&merged, config);
        info!(
            input = merged.len(),
            kept = kept.len(),
            iterations = report.iterations,
            converged = report.converged,
            "occupation/industry mapping simplified"
        );
        (Self::from_pairs(&kept), report)
    }

    pub fn industries_for_occupation(&self, occupation_code: &str) -> &[WeightedCode] {
        self.by_occupation
            .get(occupation_code)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn occupations_for_industry(&self, industry_code: &str) -> &[WeightedCode] {
        self.by_industry
            .get(industry_code)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn knows_occupation(&self, occupation_code: &str) -> bool {
        self.by_occupation.contains_key(occupation_code)
    }

    pub fn occupation_count(&self) -> usize {
        self.by_occupation.len()
    }

    pub fn link_count(&self) -> usize {
        self.by_occupation.values().map(Vec::len).sum()
    }
}

fn merge_pairs(pairs: &[OccupationIndustryPair]) -> Vec<OccupationIndustryPair> {
    let mut merged: HashMap<(&str, &str), f64> = HashMap::new();
    for pair in pairs {
        if !pair.weight.is_finite() || pair.weight <= 0.0 {
            continue;
        }
        *merged
            .entry((pair.occupation_code.as_str(), pair.industry_code.as_str()))
            .or_default() += pair.weight;
    }

    let mut out: Vec<OccupationIndustryPair> = merged
        .into_iter()
        .map(|((occupation, industry), weight)| OccupationIndustryPair {
            occupation_code: occupation.to_string(),
            industry_code: industry.to_string(),
            weight,
        })
        .collect();
    out.sort_by(|a, b| {
        a.occupation_code
            .cmp(&b.occupation_code)
            .then_with(|| a.industry_code.cmp(&b.industry_code))
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(occupation: &str, industry: &str, weight: f64) -> OccupationIndustryPair {
        OccupationIndustryPair {
            occupation_code: occupation.into(),
            industry_code: industry.into(),
            weight,
        }
    }

    #[test]
    fn lookups_are_sorted_by_weight() {
        let mapping = OccupationIndustryMapping::from_pairs(&[
            pair("D1101", "4711D", 20.0),
            pair("D1101", "1013A", 80.0),
            pair("D1101", "4722Z", 80.0),
            pair("D1106", "4711D", 300.0),
        ]);

        let codes: Vec<&str> = mapping
            .industries_for_occupation("D1101")
            .iter()
            .map(|w| w.code.as_str())
            .collect();
        assert_eq!(codes, vec!["1013A", "4722Z", "4711D"]);

        let occupations: Vec<&str> = mapping
            .occupations_for_industry("4711D")
            .iter()
            .map(|w| w.code.as_str())
            .collect();
        assert_eq!(occupations, vec!["D1106", "D1101"]);
    }

    #[test]
    fn duplicates_merge_and_bad_weights_drop() {
        let mapping = OccupationIndustryMapping::from_pairs(&[
            pair("D1101", "4711D", 2.0),
            pair("D1101", "4711D", 3.0),
            pair("D1101", "1013A", 0.0),
            pair("D1101", "4722Z", f64::NAN),
        ]);

        let industries = mapping.industries_for_occupation("D1101");
        assert_eq!(industries.len(), 1);
        assert_eq!(industries[0].weight, 5.0);
        assert_eq!(mapping.link_count(), 1);
    }

    #[test]
    fn parses_csv_rows() {
        let text = "rome,naf,weight\nD1101,4711d,12.5\n# comment\n\nD1106;4711D;3\n";
        let pairs = parse_pairs_csv(text).unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].industry_code, "4711D");
        assert_eq!(pairs[1].weight, 3.0);

        assert_eq!(
            parse_pairs_csv("D1101,4711D"),
            Err(MappingError::MalformedRow { line: 1 })
        );
        assert!(matches!(
            parse_pairs_csv("D1101,4711D,1\nD1102,4711D,lots"),
            Err(MappingError::InvalidWeight { line: 2, .. })
        ));
    }

    #[test]
    fn unknown_codes_have_no_partners() {
        let mapping = OccupationIndustryMapping::default();
        assert!(mapping.industries_for_occupation("Z9999").is_empty());
        assert!(mapping.occupations_for_industry("0000Z").is_empty());
        assert!(!mapping.knows_occupation("Z9999"));
    }
}
