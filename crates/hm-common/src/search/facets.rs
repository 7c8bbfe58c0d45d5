use serde::Serialize;
use tracing::warn;

use super::query::Aggregation;
use super::settings::DISTANCE_BUCKET_EDGES_KM;
use crate::index::Bucket;
use crate::reference::{parse_headcount_code, ReferenceData};

pub const SMALL_BUCKET: &str = "small";
pub const BIG_BUCKET: &str = "big";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FacetCount {
    pub key: String,
    pub label: String,
    pub count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Facets {
    pub industries: Vec<FacetCount>,
    pub sizes: Vec<FacetCount>,
    pub distances: Vec<FacetCount>,
}

impl Facets {
    pub fn is_empty(&self) -> bool {
        self.industries.is_empty() && self.sizes.is_empty() && self.distances.is_empty()
    }
}

/// Industry buckets with their display label. Unknown codes keep the code as label.
pub fn industry_facets(buckets: &[Bucket], reference: &ReferenceData) -> Vec<FacetCount> {
    buckets
        .iter()
        .map(|bucket| {
            let label = match reference.industry_label(&bucket.key) {
                Some(label) => label.to_string(),
                None => {
                    warn!(industry = %bucket.key, "industry facet without label");
                    bucket.key.clone()
                }
            };
            FacetCount {
                key: bucket.key.clone(),
                label,
                count: bucket.doc_count,
            }
        })
        .collect()
}

/// Collapses raw headcount buckets into exactly two: small and big.
/// Codes strictly between the two thresholds are dropped.
pub fn size_facets(buckets: &[Bucket], small_max: u8, big_min: u8) -> Vec<FacetCount> {
    let mut small = 0;
    let mut big = 0;
    for bucket in buckets {
        match parse_headcount_code(&bucket.key) {
            Some(code) if code <= small_max => small += bucket.doc_count,
            Some(code) if code >= big_min => big += bucket.doc_count,
            Some(_) => {}
            None => warn!(key = %bucket.key, "unrecognized headcount bucket"),
        }
    }

    vec![
        FacetCount {
            key: SMALL_BUCKET.into(),
            label: "Moins de 50 salariés".into(),
            count: small,
        },
        FacetCount {
            key: BIG_BUCKET.into(),
            label: "Plus de 50 salariés".into(),
            count: big,
        },
    ]
}

fn distance_label(edge_km: u32) -> String {
    if Some(&edge_km) == DISTANCE_BUCKET_EDGES_KM.last() {
        "France entière".to_string()
    } else {
        format!("Moins de {edge_km} km")
    }
}

/// Labels known distance buckets; anything else is logged and skipped.
pub fn distance_facets(buckets: &[Bucket]) -> Vec<FacetCount> {
    buckets
        .iter()
        .filter_map(|bucket| {
            let edge = DISTANCE_BUCKET_EDGES_KM
                .iter()
                .find(|edge| Aggregation::distance_bucket_key(**edge) == bucket.key);
            match edge {
                Some(edge) => Some(FacetCount {
                    key: bucket.key.clone(),
                    label: distance_label(*edge),
                    count: bucket.doc_count,
                }),
                None => {
                    warn!(key = %bucket.key, "unrecognized distance bucket");
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::mapping::OccupationIndustryMapping;
    use crate::reference::ContactModeTable;

    fn bucket(key: &str, doc_count: u64) -> Bucket {
        Bucket {
            key: key.into(),
            doc_count,
        }
    }

    #[test]
    fn size_buckets_collapse_into_small_and_big() {
        let buckets = [bucket("00", 5), bucket("01", 3), bucket("21", 10), bucket("41", 2)];
        let facets = size_facets(&buckets, 12, 21);

        assert_eq!(facets.len(), 2);
        assert_eq!((facets[0].key.as_str(), facets[0].count), ("small", 8));
        assert_eq!((facets[1].key.as_str(), facets[1].count), ("big", 12));
    }

    #[test]
    fn intermediate_and_garbage_size_codes_are_ignored() {
        let buckets = [bucket("12", 1), bucket("15", 7), bucket("abc", 3), bucket("53", 2)];
        let facets = size_facets(&buckets, 12, 21);
        assert_eq!(facets[0].count, 1);
        assert_eq!(facets[1].count, 2);
    }

    #[test]
    fn distance_buckets_are_labelled_or_skipped() {
        let buckets = [bucket("less_10_km", 3), bucket("less_42_km", 9), bucket("less_3000_km", 30)];
        let facets = distance_facets(&buckets);

        assert_eq!(facets.len(), 2);
        assert_eq!(facets[0].label, "Moins de 10 km");
        assert_eq!(facets[1].label, "France entière");
        assert_eq!(facets[1].count, 30);
    }

    #[test]
    fn industry_labels_fall_back_to_code() {
        let reference = ReferenceData::new(
            HashMap::new(),
            HashMap::from([("4711D".to_string(), "Supermarchés".to_string())]),
            OccupationIndustryMapping::default(),
            ContactModeTable::default(),
        );
        let facets = industry_facets(&[bucket("4711D", 4), bucket("9999Z", 1)], &reference);
        assert_eq!(facets[0].label, "Supermarchés");
        assert_eq!(facets[1].label, "9999Z");
    }
}
