use std::collections::BTreeMap;

use super::criteria::{AudienceFilter, CampaignFilter, HiringType, SearchCriteria, SizeFilter, SortMode};
use super::query::{
    Aggregation, Filter, Pagination, RangeBounds, ScoringStage, SortKey, SortOrder, SourceFields,
    StructuredQuery, TermValue,
};
use super::settings::{SearchSettings, DISTANCE_BUCKET_EDGES_KM};
use crate::clock::DailySeed;
use crate::index::fields;

pub const INDUSTRY_AGGREGATION: &str = "naf";
pub const SIZE_AGGREGATION: &str = "headcount";
pub const DISTANCE_AGGREGATION: &str = "distance";

/// Enough buckets to cover every INSEE headcount code.
const SIZE_AGGREGATION_BUCKETS: usize = 64;

/// Index fields that depend on the hiring-type context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextFields {
    pub score: &'static str,
    pub scores_by_occupation: &'static str,
    pub boosted: &'static str,
}

impl ContextFields {
    pub fn for_hiring_type(hiring_type: HiringType) -> Self {
        match hiring_type {
            HiringType::Standard => Self {
                score: fields::SCORE,
                scores_by_occupation: fields::SCORES_BY_OCCUPATION,
                boosted: fields::BOOSTED_OCCUPATIONS,
            },
            HiringType::Apprenticeship => Self {
                score: fields::APPRENTICESHIP_SCORE,
                scores_by_occupation: fields::APPRENTICESHIP_SCORES_BY_OCCUPATION,
                boosted: fields::BOOSTED_APPRENTICESHIP_OCCUPATIONS,
            },
        }
    }
}

/// Turns validated criteria into a [`StructuredQuery`].
#[derive(Debug, Clone, Copy)]
pub struct RankingQueryBuilder<'a> {
    settings: &'a SearchSettings,
    seed: DailySeed,
}

impl<'a> RankingQueryBuilder<'a> {
    pub fn new(settings: &'a SearchSettings, seed: DailySeed) -> Self {
        Self { settings, seed }
    }

    pub fn build(&self, criteria: &SearchCriteria) -> StructuredQuery {
        let context = ContextFields::for_hiring_type(criteria.hiring_type());
        let (scoring, sort) = self.ranking(criteria, context);
        let window = criteria.window();

        StructuredQuery {
            filters: self.filters(criteria, context),
            scoring,
            sort,
            pagination: Pagination {
                offset: window.offset(),
                size: window.size(),
            },
            aggregations: self.aggregations(criteria),
            source: SourceFields {
                scores_field: context.scores_by_occupation.to_string(),
                boosted_field: context.boosted.to_string(),
            },
        }
    }

    fn filters(&self, criteria: &SearchCriteria, context: ContextFields) -> Vec<Filter> {
        let mut filters = vec![Filter::Range {
            field: context.score.to_string(),
            bounds: RangeBounds::gt(0.0),
        }];

        if !criteria.industry_codes().is_empty() {
            filters.push(Filter::Terms {
                field: fields::INDUSTRY.to_string(),
                values: criteria.industry_codes().to_vec(),
            });
        }

        match criteria.size() {
            SizeFilter::Any => {}
            SizeFilter::Small => filters.push(Filter::Range {
                field: fields::HEADCOUNT.to_string(),
                bounds: RangeBounds::lte(f64::from(self.settings.small_max_size_code)),
            }),
            SizeFilter::Big => filters.push(Filter::Range {
                field: fields::HEADCOUNT.to_string(),
                bounds: RangeBounds::gte(f64::from(self.settings.big_min_size_code)),
            }),
        }

        let audience_flag = match criteria.audience() {
            AudienceFilter::All => None,
            AudienceFilter::Junior => Some(fields::FLAG_JUNIOR),
            AudienceFilter::Senior => Some(fields::FLAG_SENIOR),
            AudienceFilter::Handicap => Some(fields::FLAG_HANDICAP),
        };
        if let Some(flag) = audience_flag {
            filters.push(flag_filter(flag));
        }

        filters.push(Filter::Bool {
            should: criteria
                .occupation_codes()
                .iter()
                .map(|code| Filter::Range {
                    field: fields::nested(context.scores_by_occupation, code),
                    bounds: RangeBounds::gt(0.0),
                })
                .collect(),
            minimum_should_match: 1,
        });

        if let Some(origin) = criteria.origin() {
            filters.push(Filter::GeoDistance {
                field: fields::LOCATION.to_string(),
                origin,
                distance_km: f64::from(criteria.distance_km()),
            });
        }

        if !criteria.departments().is_empty() {
            filters.push(Filter::Terms {
                field: fields::DEPARTMENT.to_string(),
                values: criteria.departments().to_vec(),
            });
        }

        match criteria.campaign() {
            Some(CampaignFilter::ApprenticeshipOnly) => filters.push(flag_filter(fields::FLAG_APPRENTICESHIP)),
            Some(CampaignFilter::ImmersionOnly) => filters.push(flag_filter(fields::FLAG_IMMERSION)),
            None => {}
        }

        filters
    }

    fn ranking(&self, criteria: &SearchCriteria, context: ContextFields) -> (Vec<ScoringStage>, Vec<SortKey>) {
        let max_of_scores = ScoringStage::MaxOfFields {
            fields: criteria
                .occupation_codes()
                .iter()
                .map(|code| fields::nested(context.scores_by_occupation, code))
                .collect(),
        };
        let geo_or_department = match criteria.origin() {
            Some(origin) => SortKey::GeoDistance {
                field: fields::LOCATION.to_string(),
                origin,
            },
            None => SortKey::Field {
                field: fields::DEPARTMENT.to_string(),
                order: SortOrder::Asc,
                missing_last: true,
            },
        };

        match criteria.sort() {
            SortMode::Blended | SortMode::Score => {
                let mut scoring = vec![max_of_scores];
                if criteria.sort() == SortMode::Blended {
                    scoring.push(ScoringStage::DailyRandom { seed: self.seed });
                }

                let mut sort: Vec<SortKey> = criteria
                    .occupation_codes()
                    .iter()
                    .map(|code| SortKey::Field {
                        field: fields::nested(context.boosted, code),
                        order: SortOrder::Desc,
                        missing_last: true,
                    })
                    .collect();
                sort.push(SortKey::Score);
                sort.push(geo_or_department);
                (scoring, sort)
            }
            SortMode::Distance if criteria.origin().is_some() => (Vec::new(), vec![geo_or_department]),
            SortMode::Distance => (vec![max_of_scores], vec![geo_or_department, SortKey::Score]),
        }
    }

    fn aggregations(&self, criteria: &SearchCriteria) -> BTreeMap<String, Aggregation> {
        let facets = criteria.facets();
        let mut aggregations = BTreeMap::new();

        if facets.industry {
            aggregations.insert(
                INDUSTRY_AGGREGATION.to_string(),
                Aggregation::Terms {
                    field: fields::INDUSTRY.to_string(),
                    size: self.settings.industry_facet_size,
                },
            );
        }
        if facets.size {
            aggregations.insert(
                SIZE_AGGREGATION.to_string(),
                Aggregation::Terms {
                    field: fields::HEADCOUNT.to_string(),
                    size: SIZE_AGGREGATION_BUCKETS,
                },
            );
        }
        if let Some(origin) = criteria.origin() {
            if facets.distance && criteria.distance_km() < self.settings.max_distance_km {
                aggregations.insert(
                    DISTANCE_AGGREGATION.to_string(),
                    Aggregation::DistanceRanges {
                        field: fields::LOCATION.to_string(),
                        origin,
                        edges_km: DISTANCE_BUCKET_EDGES_KM.to_vec(),
                    },
                );
            }
        }

        aggregations
    }
}

fn flag_filter(flag: &str) -> Filter {
    Filter::Term {
        field: flag.to_string(),
        value: TermValue::Bool(true),
    }
}
