use std::collections::HashMap;

use serde::Serialize;
use tracing::{error, instrument};

use super::builder::{DISTANCE_AGGREGATION, INDUSTRY_AGGREGATION, SIZE_AGGREGATION};
use super::criteria::SearchCriteria;
use super::facets::{distance_facets, industry_facets, size_facets, Facets};
use super::settings::{ScoreRepresentation, SearchSettings};
use super::SearchError;
use crate::index::{Bucket, IndexHit, IndexResponse, RecordStore};
use crate::reference::{headcount_label, ReferenceData};
use crate::scoring::{stars_for_score, ScoreConverter};
use crate::Company;

/// One enriched result row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedCompany {
    /// 1-based position across pages.
    pub position: usize,
    pub company: Company,
    pub distance_km: Option<f64>,
    pub matched_occupation: Option<String>,
    pub boosted: bool,
    pub score: u8,
    pub hiring_potential: f64,
    pub stars: f64,
    pub contact_mode: String,
    pub industry_label: Option<String>,
    pub size_label: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AssembledPage {
    pub companies: Vec<RankedCompany>,
    pub facets: Facets,
}

/// Requested code with the highest value on this hit. Ties keep the
/// earliest code in request order.
pub fn best_matching_occupation<'a>(hit: &IndexHit, requested: &'a [String]) -> Option<(&'a str, f64)> {
    requested
        .iter()
        .filter_map(|code| hit.scores.get(code).map(|value| (code.as_str(), *value)))
        .fold(None, |best, (code, value)| match best {
            Some((_, best_value)) if best_value >= value => best,
            _ => Some((code, value)),
        })
}

fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Joins index hits with system-of-record companies and decorates them.
#[derive(Debug, Clone, Copy)]
pub struct ResultAssembler<'a> {
    settings: &'a SearchSettings,
    reference: &'a ReferenceData,
    converter: ScoreConverter,
}

impl<'a> ResultAssembler<'a> {
    pub fn new(settings: &'a SearchSettings, reference: &'a ReferenceData) -> Self {
        Self {
            settings,
            reference,
            converter: settings.converter(),
        }
    }

    /// Loads the hit records from `store`, then [`join`](Self::join)s them.
    #[instrument(skip_all, fields(hits = response.hits.len()))]
    pub async fn assemble<S: RecordStore>(
        &self,
        store: &S,
        response: &IndexResponse,
        criteria: &SearchCriteria,
        geo_sort_index: Option<usize>,
    ) -> Result<AssembledPage, SearchError> {
        let ids: Vec<String> = response.hits.iter().map(|hit| hit.id.clone()).collect();
        let records = if ids.is_empty() {
            HashMap::new()
        } else {
            store.fetch_by_ids(&ids).await?
        };
        self.join(response, records, criteria, geo_sort_index)
    }

    /// Keeps index order. Any hit without a record fails the whole page.
    pub fn join(
        &self,
        response: &IndexResponse,
        mut records: HashMap<String, Company>,
        criteria: &SearchCriteria,
        geo_sort_index: Option<usize>,
    ) -> Result<AssembledPage, SearchError> {
        let missing: Vec<String> = response
            .hits
            .iter()
            .filter(|hit| !records.contains_key(&hit.id))
            .map(|hit| hit.id.clone())
            .collect();
        if !missing.is_empty() {
            error!(
                missing = ?missing,
                hits = response.hits.len(),
                "index hits missing from the system of record"
            );
            return Err(SearchError::DataConsistency { missing });
        }

        let first_position = criteria.window().from();
        let mut companies = Vec::with_capacity(response.hits.len());
        for (i, hit) in response.hits.iter().enumerate() {
            let Some(company) = records.remove(&hit.id) else {
                // Duplicate ids in one page: the first occurrence took the record.
                return Err(SearchError::DataConsistency {
                    missing: vec![hit.id.clone()],
                });
            };
            companies.push(self.enrich(first_position + i, hit, company, criteria, geo_sort_index)?);
        }

        Ok(AssembledPage {
            companies,
            facets: self.facets(response, criteria),
        })
    }

    fn enrich(
        &self,
        position: usize,
        hit: &IndexHit,
        company: Company,
        criteria: &SearchCriteria,
        geo_sort_index: Option<usize>,
    ) -> Result<RankedCompany, SearchError> {
        let requested = criteria.occupation_codes();
        let matched = best_matching_occupation(hit, requested);

        let (score, hiring_potential) = match matched {
            Some((_, raw)) => match self.settings.representation {
                ScoreRepresentation::Score => {
                    let score = self.converter.checked_score(raw)?;
                    (score, self.converter.score_to_hiring_count(score)?)
                }
                ScoreRepresentation::HiringCount => (self.converter.hiring_count_to_score(raw)?, raw),
            },
            None => (0, 0.0),
        };

        let boosted = matched.is_some_and(|(code, _)| hit.boosted.contains(code));

        let distance_km = geo_sort_index
            .and_then(|idx| hit.sort.get(idx))
            .and_then(|value| value.as_f64())
            .or_else(|| {
                let origin = criteria.origin()?;
                company.location.map(|location| origin.distance_km(&location))
            })
            .map(round_one_decimal);

        let contact_occupation = matched
            .map(|(code, _)| code)
            .or_else(|| requested.first().map(String::as_str))
            .unwrap_or_default();
        let contact_mode = self
            .reference
            .contact_modes()
            .resolve(company.contact_mode.as_deref(), &company.industry_code, contact_occupation)
            .to_string();

        Ok(RankedCompany {
            position,
            distance_km,
            matched_occupation: matched.map(|(code, _)| code.to_string()),
            boosted,
            score,
            hiring_potential,
            stars: stars_for_score(score),
            contact_mode,
            industry_label: self.reference.industry_label(&company.industry_code).map(String::from),
            size_label: headcount_label(company.size_code).map(String::from),
            company,
        })
    }

    fn facets(&self, response: &IndexResponse, criteria: &SearchCriteria) -> Facets {
        let requested = criteria.facets();
        let buckets = |name: &str| -> Vec<Bucket> { response.aggregations.get(name).cloned().unwrap_or_default() };

        Facets {
            industries: if requested.industry {
                industry_facets(&buckets(INDUSTRY_AGGREGATION), self.reference)
            } else {
                Vec::new()
            },
            sizes: if requested.size {
                size_facets(
                    &buckets(SIZE_AGGREGATION),
                    self.settings.small_max_size_code,
                    self.settings.big_min_size_code,
                )
            } else {
                Vec::new()
            },
            distances: distance_facets(&buckets(DISTANCE_AGGREGATION)),
        }
    }
}
