//! Typed structured query and its Elasticsearch wire form.

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};

use crate::clock::DailySeed;
use crate::GeoPoint;

/// Max over the requested per-occupation score fields, 0 when none is set.
const MAX_OF_FIELDS_SCRIPT: &str = "double best = 0; \
for (String f : params.fields) { \
  if (doc.containsKey(f) && doc[f].size() > 0) { best = Math.max(best, doc[f].value); } \
} \
return best;";

#[derive(Debug, Clone, PartialEq)]
pub enum TermValue {
    Bool(bool),
    Text(String),
}

impl TermValue {
    fn to_json(&self) -> Value {
        match self {
            TermValue::Bool(value) => Value::Bool(*value),
            TermValue::Text(value) => Value::String(value.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RangeBounds {
    pub gt: Option<f64>,
    pub gte: Option<f64>,
    pub lt: Option<f64>,
    pub lte: Option<f64>,
}

impl RangeBounds {
    pub fn gt(value: f64) -> Self {
        Self {
            gt: Some(value),
            ..Self::default()
        }
    }

    pub fn gte(value: f64) -> Self {
        Self {
            gte: Some(value),
            ..Self::default()
        }
    }

    pub fn lte(value: f64) -> Self {
        Self {
            lte: Some(value),
            ..Self::default()
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        self.gt.map_or(true, |bound| value > bound)
            && self.gte.map_or(true, |bound| value >= bound)
            && self.lt.map_or(true, |bound| value < bound)
            && self.lte.map_or(true, |bound| value <= bound)
    }

    fn to_json(self) -> Value {
        let mut out = Map::new();
        for (name, bound) in [("gt", self.gt), ("gte", self.gte), ("lt", self.lt), ("lte", self.lte)] {
            if let Some(bound) = bound {
                out.insert(name.into(), json!(bound));
            }
        }
        Value::Object(out)
    }
}

/// One predicate of the filter list. All top-level filters must match.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Term { field: String, value: TermValue },
    Terms { field: String, values: Vec<String> },
    Range { field: String, bounds: RangeBounds },
    Exists { field: String },
    GeoDistance { field: String, origin: GeoPoint, distance_km: f64 },
    Bool { should: Vec<Filter>, minimum_should_match: usize },
}

impl Filter {
    pub fn field(&self) -> Option<&str> {
        match self {
            Filter::Term { field, .. }
            | Filter::Terms { field, .. }
            | Filter::Range { field, .. }
            | Filter::Exists { field }
            | Filter::GeoDistance { field, .. } => Some(field),
            Filter::Bool { .. } => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Filter::Term { field, value } => json!({ "term": { field: value.to_json() } }),
            Filter::Terms { field, values } => json!({ "terms": { field: values } }),
            Filter::Range { field, bounds } => json!({ "range": { field: bounds.to_json() } }),
            Filter::Exists { field } => json!({ "exists": { "field": field } }),
            Filter::GeoDistance {
                field,
                origin,
                distance_km,
            } => json!({
                "geo_distance": {
                    "distance": format!("{distance_km}km"),
                    field: geo_json(origin),
                }
            }),
            Filter::Bool {
                should,
                minimum_should_match,
            } => json!({
                "bool": {
                    "should": should.iter().map(Filter::to_json).collect::<Vec<_>>(),
                    "minimum_should_match": minimum_should_match,
                }
            }),
        }
    }
}

/// Relevance stages applied in order on top of the filtered set.
#[derive(Debug, Clone, PartialEq)]
pub enum ScoringStage {
    /// Replace relevance by the max of the given numeric fields (missing → 0).
    MaxOfFields { fields: Vec<String> },
    /// Multiply relevance by a per-document factor in `[0, 1)` seeded per day.
    DailyRandom { seed: DailySeed },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    fn as_str(self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SortKey {
    Field {
        field: String,
        order: SortOrder,
        missing_last: bool,
    },
    /// Relevance produced by the scoring stages, descending.
    Score,
    /// Distance to `origin` in km, ascending. Its value is echoed on each hit.
    GeoDistance { field: String, origin: GeoPoint },
}

impl SortKey {
    fn to_json(&self) -> Value {
        match self {
            SortKey::Field {
                field,
                order,
                missing_last,
            } => json!({
                field: {
                    "order": order.as_str(),
                    "missing": if *missing_last { "_last" } else { "_first" },
                }
            }),
            SortKey::Score => json!({ "_score": { "order": "desc" } }),
            SortKey::GeoDistance { field, origin } => json!({
                "_geo_distance": {
                    field: geo_json(origin),
                    "order": "asc",
                    "unit": "km",
                    "distance_type": "arc",
                }
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Aggregation {
    Terms { field: String, size: usize },
    /// Cumulative `[0, edge)` buckets keyed `less_{edge}_km`.
    DistanceRanges {
        field: String,
        origin: GeoPoint,
        edges_km: Vec<u32>,
    },
}

impl Aggregation {
    pub fn distance_bucket_key(edge_km: u32) -> String {
        format!("less_{edge_km}_km")
    }

    fn to_json(&self) -> Value {
        match self {
            Aggregation::Terms { field, size } => json!({ "terms": { "field": field, "size": size } }),
            Aggregation::DistanceRanges {
                field,
                origin,
                edges_km,
            } => json!({
                "geo_distance": {
                    "field": field,
                    "origin": geo_json(origin),
                    "unit": "km",
                    "ranges": edges_km
                        .iter()
                        .map(|edge| json!({ "key": Self::distance_bucket_key(*edge), "to": edge }))
                        .collect::<Vec<_>>(),
                }
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pagination {
    pub offset: usize,
    pub size: usize,
}

/// Per-hit document fields the assembler needs back from the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFields {
    pub scores_field: String,
    pub boosted_field: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructuredQuery {
    pub filters: Vec<Filter>,
    pub scoring: Vec<ScoringStage>,
    pub sort: Vec<SortKey>,
    pub pagination: Pagination,
    pub aggregations: BTreeMap<String, Aggregation>,
    pub source: SourceFields,
}

impl StructuredQuery {
    /// Same filters, nothing else.
    pub fn count_only(&self) -> Self {
        Self {
            filters: self.filters.clone(),
            scoring: Vec::new(),
            sort: Vec::new(),
            pagination: Pagination::default(),
            aggregations: BTreeMap::new(),
            source: self.source.clone(),
        }
    }

    /// Position of the geo-distance key within each hit's sort values.
    pub fn geo_sort_index(&self) -> Option<usize> {
        self.sort
            .iter()
            .position(|key| matches!(key, SortKey::GeoDistance { .. }))
    }

    pub fn to_count_body(&self) -> Value {
        json!({ "query": self.filter_query() })
    }

    pub fn to_search_body(&self) -> Value {
        let mut body = Map::new();
        body.insert("query".into(), self.scored_query());
        body.insert("track_total_hits".into(), Value::Bool(true));
        body.insert("from".into(), json!(self.pagination.offset));
        body.insert("size".into(), json!(self.pagination.size));
        body.insert(
            "_source".into(),
            json!([self.source.scores_field, self.source.boosted_field]),
        );
        if !self.sort.is_empty() {
            body.insert(
                "sort".into(),
                Value::Array(self.sort.iter().map(SortKey::to_json).collect()),
            );
        }
        if !self.aggregations.is_empty() {
            let aggs: Map<String, Value> = self
                .aggregations
                .iter()
                .map(|(name, agg)| (name.clone(), agg.to_json()))
                .collect();
            body.insert("aggs".into(), Value::Object(aggs));
        }
        Value::Object(body)
    }

    fn filter_query(&self) -> Value {
        json!({
            "bool": {
                "filter": self.filters.iter().map(Filter::to_json).collect::<Vec<_>>(),
            }
        })
    }

    fn scored_query(&self) -> Value {
        self.scoring
            .iter()
            .fold(self.filter_query(), |inner, stage| match stage {
                ScoringStage::MaxOfFields { fields } => json!({
                    "function_score": {
                        "query": inner,
                        "functions": [{
                            "script_score": {
                                "script": {
                                    "lang": "painless",
                                    "source": MAX_OF_FIELDS_SCRIPT,
                                    "params": { "fields": fields },
                                }
                            }
                        }],
                        "boost_mode": "replace",
                    }
                }),
                ScoringStage::DailyRandom { seed } => json!({
                    "function_score": {
                        "query": inner,
                        "functions": [{
                            "random_score": { "seed": seed.value(), "field": "_seq_no" }
                        }],
                        "boost_mode": "multiply",
                    }
                }),
            })
    }
}

fn geo_json(point: &GeoPoint) -> Value {
    json!({ "lat": point.lat, "lon": point.lon })
}
