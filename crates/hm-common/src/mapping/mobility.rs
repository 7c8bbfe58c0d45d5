use std::collections::HashMap;

use super::{OccupationIndustryMapping, WeightedCode};

/// Occupations hired by the same industries as `occupation_code`.
///
/// Each candidate accumulates, for every shared industry, the product of the
/// two relative weights (share of the source occupation in that industry times
/// share of the industry for the candidate). Result is best first, without the
/// source itself or any `exclude` code, truncated to `limit`.
pub fn related_occupations(
    mapping: &OccupationIndustryMapping,
    occupation_code: &str,
    exclude: &[String],
    limit: usize,
) -> Vec<WeightedCode> {
    let industries = mapping.industries_for_occupation(occupation_code);
    let source_total: f64 = industries.iter().map(|w| w.weight).sum();
    if source_total <= 0.0 || limit == 0 {
        return Vec::new();
    }

    let mut affinity: HashMap<&str, f64> = HashMap::new();
    for industry in industries {
        let source_share = industry.weight / source_total;
        let occupations = mapping.occupations_for_industry(&industry.code);
        let industry_total: f64 = occupations.iter().map(|w| w.weight).sum();
        if industry_total <= 0.0 {
            continue;
        }

        for candidate in occupations {
            if candidate.code == occupation_code || exclude.iter().any(|code| *code == candidate.code) {
                continue;
            }
            *affinity.entry(candidate.code.as_str()).or_default() +=
                source_share * candidate.weight / industry_total;
        }
    }

    let mut ranked: Vec<WeightedCode> = affinity
        .into_iter()
        .map(|(code, weight)| WeightedCode {
            code: code.to_string(),
            weight,
        })
        .collect();
    ranked.sort_by(|a, b| b.weight.total_cmp(&a.weight).then_with(|| a.code.cmp(&b.code)));
    ranked.truncate(limit);
    ranked
}
