use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

use super::fields;
use super::{Bucket, IndexError, IndexHit, IndexResponse, RecordStore, SearchIndex, SortValue, StoreError};
use crate::search::query::{
    Aggregation, Filter, ScoringStage, SortKey, SortOrder, StructuredQuery, TermValue,
};
use crate::{Company, CompanyScoreEntry, GeoPoint};

#[derive(Debug, Clone, PartialEq)]
enum FieldValue {
    Number(f64),
    Text(String),
    Bool(bool),
    Geo(GeoPoint),
    Missing,
}

impl FieldValue {
    fn bucket_key(&self) -> Option<String> {
        match self {
            FieldValue::Number(n) if n.fract() == 0.0 => Some(format!("{}", *n as i64)),
            FieldValue::Number(n) => Some(n.to_string()),
            FieldValue::Text(text) => Some(text.clone()),
            FieldValue::Bool(flag) => Some(flag.to_string()),
            FieldValue::Geo(_) | FieldValue::Missing => None,
        }
    }

    fn into_sort_value(self) -> SortValue {
        match self {
            FieldValue::Number(n) => SortValue::Number(n),
            FieldValue::Bool(flag) => SortValue::Number(if flag { 1.0 } else { 0.0 }),
            FieldValue::Text(text) => SortValue::Text(text),
            FieldValue::Geo(_) | FieldValue::Missing => SortValue::Missing,
        }
    }
}

/// Stored values as the backend sees them: a stored 0 still exists.
fn stored(map: &BTreeMap<String, f64>, code: &str) -> FieldValue {
    map.get(code).map_or(FieldValue::Missing, |value| FieldValue::Number(*value))
}

fn field_value(entry: &CompanyScoreEntry, field: &str) -> FieldValue {
    if let Some((prefix, code)) = fields::split_nested(field) {
        return match prefix {
            fields::SCORES_BY_OCCUPATION => stored(&entry.occupation_scores, code),
            fields::APPRENTICESHIP_SCORES_BY_OCCUPATION => {
                stored(&entry.apprenticeship_occupation_scores, code)
            }
            fields::BOOSTED_OCCUPATIONS if entry.boosted_occupations.contains(code) => FieldValue::Bool(true),
            fields::BOOSTED_APPRENTICESHIP_OCCUPATIONS
                if entry.boosted_apprenticeship_occupations.contains(code) =>
            {
                FieldValue::Bool(true)
            }
            _ => FieldValue::Missing,
        };
    }

    match field {
        fields::SIRET => FieldValue::Text(entry.siret.clone()),
        fields::INDUSTRY => FieldValue::Text(entry.industry_code.clone()),
        fields::HEADCOUNT => FieldValue::Number(f64::from(entry.size_code)),
        fields::DEPARTMENT => FieldValue::Text(entry.department.clone()),
        fields::LOCATION => entry.location.map(FieldValue::Geo).unwrap_or(FieldValue::Missing),
        fields::SCORE => FieldValue::Number(f64::from(entry.score)),
        fields::APPRENTICESHIP_SCORE => FieldValue::Number(f64::from(entry.apprenticeship_score)),
        fields::FLAG_JUNIOR => FieldValue::Bool(entry.flags.junior),
        fields::FLAG_SENIOR => FieldValue::Bool(entry.flags.senior),
        fields::FLAG_HANDICAP => FieldValue::Bool(entry.flags.handicap),
        fields::FLAG_APPRENTICESHIP => FieldValue::Bool(entry.apprenticeship_campaign),
        fields::FLAG_IMMERSION => FieldValue::Bool(entry.immersion_campaign),
        _ => FieldValue::Missing,
    }
}

fn matches(entry: &CompanyScoreEntry, filter: &Filter) -> bool {
    match filter {
        Filter::Term { field, value } => match (field_value(entry, field), value) {
            (FieldValue::Bool(actual), TermValue::Bool(expected)) => actual == *expected,
            (actual, TermValue::Text(expected)) => actual.bucket_key().as_deref() == Some(expected.as_str()),
            _ => false,
        },
        Filter::Terms { field, values } => field_value(entry, field)
            .bucket_key()
            .is_some_and(|key| values.iter().any(|value| *value == key)),
        Filter::Range { field, bounds } => match field_value(entry, field) {
            FieldValue::Number(n) => bounds.contains(n),
            _ => false,
        },
        Filter::Exists { field } => field_value(entry, field) != FieldValue::Missing,
        Filter::GeoDistance {
            field,
            origin,
            distance_km,
        } => match field_value(entry, field) {
            FieldValue::Geo(point) => origin.distance_km(&point) <= *distance_km,
            _ => false,
        },
        Filter::Bool {
            should,
            minimum_should_match,
        } => should.iter().filter(|inner| matches(entry, inner)).count() >= *minimum_should_match,
    }
}

fn relevance(entry: &CompanyScoreEntry, stages: &[ScoringStage]) -> f64 {
    stages.iter().fold(0.0, |current, stage| match stage {
        ScoringStage::MaxOfFields { fields } => fields
            .iter()
            .filter_map(|field| match field_value(entry, field) {
                FieldValue::Number(n) => Some(n),
                _ => None,
            })
            .fold(0.0, f64::max),
        ScoringStage::DailyRandom { seed } => current * seed.factor_for(&entry.siret),
    })
}

fn sort_values(entry: &CompanyScoreEntry, keys: &[SortKey], score: f64) -> Vec<SortValue> {
    keys.iter()
        .map(|key| match key {
            SortKey::Field { field, .. } => field_value(entry, field).into_sort_value(),
            SortKey::Score => SortValue::Number(score),
            SortKey::GeoDistance { field, origin } => match field_value(entry, field) {
                FieldValue::Geo(point) => SortValue::Number(origin.distance_km(&point)),
                _ => SortValue::Missing,
            },
        })
        .collect()
}

fn compare_present(a: &SortValue, b: &SortValue) -> Ordering {
    match (a, b) {
        (SortValue::Number(x), SortValue::Number(y)) => x.total_cmp(y),
        (SortValue::Text(x), SortValue::Text(y)) => x.cmp(y),
        (SortValue::Number(_), SortValue::Text(_)) => Ordering::Less,
        (SortValue::Text(_), SortValue::Number(_)) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

fn compare_key(key: &SortKey, a: &SortValue, b: &SortValue) -> Ordering {
    let (order, missing_last) = match key {
        SortKey::Field {
            order, missing_last, ..
        } => (*order, *missing_last),
        SortKey::Score => (SortOrder::Desc, true),
        SortKey::GeoDistance { .. } => (SortOrder::Asc, true),
    };

    match (a, b) {
        (SortValue::Missing, SortValue::Missing) => Ordering::Equal,
        (SortValue::Missing, _) if missing_last => Ordering::Greater,
        (SortValue::Missing, _) => Ordering::Less,
        (_, SortValue::Missing) if missing_last => Ordering::Less,
        (_, SortValue::Missing) => Ordering::Greater,
        _ => match order {
            SortOrder::Asc => compare_present(a, b),
            SortOrder::Desc => compare_present(b, a),
        },
    }
}

fn aggregate(matching: &[&CompanyScoreEntry], aggregation: &Aggregation) -> Vec<Bucket> {
    match aggregation {
        Aggregation::Terms { field, size } => {
            let mut counts: HashMap<String, u64> = HashMap::new();
            for entry in matching {
                if let Some(key) = field_value(entry, field).bucket_key() {
                    *counts.entry(key).or_default() += 1;
                }
            }
            let mut buckets: Vec<Bucket> = counts
                .into_iter()
                .map(|(key, doc_count)| Bucket { key, doc_count })
                .collect();
            buckets.sort_by(|a, b| b.doc_count.cmp(&a.doc_count).then_with(|| a.key.cmp(&b.key)));
            buckets.truncate(*size);
            buckets
        }
        Aggregation::DistanceRanges {
            field,
            origin,
            edges_km,
        } => edges_km
            .iter()
            .map(|edge| Bucket {
                key: Aggregation::distance_bucket_key(*edge),
                doc_count: matching
                    .iter()
                    .filter(|entry| match field_value(entry, field) {
                        FieldValue::Geo(point) => origin.distance_km(&point) < f64::from(*edge),
                        _ => false,
                    })
                    .count() as u64,
            })
            .collect(),
    }
}

/// Evaluates structured queries against documents held in memory.
#[derive(Debug, Default)]
pub struct InMemoryIndex {
    entries: Vec<CompanyScoreEntry>,
    count_calls: AtomicUsize,
    search_calls: AtomicUsize,
}

impl InMemoryIndex {
    pub fn new(entries: Vec<CompanyScoreEntry>) -> Self {
        Self {
            entries,
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn count_calls(&self) -> usize {
        self.count_calls.load(AtomicOrdering::Relaxed)
    }

    pub fn search_calls(&self) -> usize {
        self.search_calls.load(AtomicOrdering::Relaxed)
    }

    fn matching(&self, query: &StructuredQuery) -> Vec<&CompanyScoreEntry> {
        self.entries
            .iter()
            .filter(|entry| query.filters.iter().all(|filter| matches(entry, filter)))
            .collect()
    }

    /// Synchronous evaluation behind [`SearchIndex::search`].
    pub fn evaluate(&self, query: &StructuredQuery) -> IndexResponse {
        let matching = self.matching(query);

        let mut ranked: Vec<(&CompanyScoreEntry, f64, Vec<SortValue>)> = matching
            .iter()
            .map(|entry| {
                let score = relevance(entry, &query.scoring);
                (*entry, score, sort_values(entry, &query.sort, score))
            })
            .collect();

        ranked.sort_by(|(_, _, a), (_, _, b)| {
            query
                .sort
                .iter()
                .zip(a.iter().zip(b.iter()))
                .map(|(key, (x, y))| compare_key(key, x, y))
                .find(|ordering| ordering.is_ne())
                .unwrap_or(Ordering::Equal)
        });

        let hits = ranked
            .into_iter()
            .skip(query.pagination.offset)
            .take(query.pagination.size)
            .map(|(entry, score, sort)| IndexHit {
                id: entry.siret.clone(),
                score: (!query.scoring.is_empty()).then_some(score),
                sort,
                scores: source_scores(entry, &query.source.scores_field),
                boosted: source_boosted(entry, &query.source.boosted_field),
            })
            .collect();

        let aggregations = query
            .aggregations
            .iter()
            .map(|(name, aggregation)| (name.clone(), aggregate(&matching, aggregation)))
            .collect();

        IndexResponse {
            total: matching.len() as u64,
            hits,
            aggregations,
        }
    }
}

fn source_scores(entry: &CompanyScoreEntry, field: &str) -> BTreeMap<String, f64> {
    let map = if field == fields::APPRENTICESHIP_SCORES_BY_OCCUPATION {
        &entry.apprenticeship_occupation_scores
    } else {
        &entry.occupation_scores
    };
    map.iter()
        .filter(|(_, value)| **value > 0.0)
        .map(|(code, value)| (code.clone(), *value))
        .collect()
}

fn source_boosted(entry: &CompanyScoreEntry, field: &str) -> BTreeSet<String> {
    if field == fields::BOOSTED_APPRENTICESHIP_OCCUPATIONS {
        entry.boosted_apprenticeship_occupations.clone()
    } else {
        entry.boosted_occupations.clone()
    }
}

impl SearchIndex for InMemoryIndex {
    async fn count(&self, query: &StructuredQuery) -> Result<u64, IndexError> {
        self.count_calls.fetch_add(1, AtomicOrdering::Relaxed);
        Ok(self.matching(query).len() as u64)
    }

    async fn search(&self, query: &StructuredQuery) -> Result<IndexResponse, IndexError> {
        self.search_calls.fetch_add(1, AtomicOrdering::Relaxed);
        Ok(self.evaluate(query))
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    companies: HashMap<String, Company>,
}

impl InMemoryStore {
    pub fn new(companies: impl IntoIterator<Item = Company>) -> Self {
        Self {
            companies: companies
                .into_iter()
                .map(|company| (company.siret.clone(), company))
                .collect(),
        }
    }

    pub fn get(&self, siret: &str) -> Option<&Company> {
        self.companies.get(siret)
    }
}

impl RecordStore for InMemoryStore {
    async fn fetch_by_ids(&self, ids: &[String]) -> Result<HashMap<String, Company>, StoreError> {
        Ok(ids
            .iter()
            .filter_map(|id| self.companies.get(id).map(|company| (id.clone(), company.clone())))
            .collect())
    }
}
