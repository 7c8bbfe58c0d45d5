use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, instrument};

use super::{Bucket, IndexError, IndexHit, IndexResponse, SearchIndex, SortValue};
use crate::logging::log_if_slow;
use crate::search::query::{SourceFields, StructuredQuery};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElasticConfig {
    pub base_url: String,
    pub index_name: String,
    pub timeout: Duration,
}

impl ElasticConfig {
    pub fn new(base_url: impl Into<String>, index_name: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            index_name: index_name.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Overrides the request timeout from `HM_INDEX_TIMEOUT_MS`.
    pub fn with_env_timeout(mut self) -> Self {
        if let Some(ms) = std::env::var("HM_INDEX_TIMEOUT_MS")
            .ok()
            .and_then(|raw| raw.trim().parse::<u64>().ok())
            .filter(|ms| *ms > 0)
        {
            self.timeout = Duration::from_millis(ms);
        }
        self
    }
}

/// Elasticsearch-compatible HTTP client. Failures are returned as-is;
/// retrying is left to the caller.
#[derive(Debug, Clone)]
pub struct ElasticIndex {
    client: reqwest::Client,
    config: ElasticConfig,
}

impl ElasticIndex {
    pub fn new(config: ElasticConfig) -> Result<Self, IndexError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| IndexError::Transport(format!("index http client: {err}")))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ElasticConfig {
        &self.config
    }

    fn endpoint(&self, action: &str) -> String {
        format!(
            "{}/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.index_name,
            action
        )
    }

    /// Cluster reachability check for readiness probes.
    pub async fn ping(&self) -> Result<(), IndexError> {
        let response = self
            .client
            .get(self.config.base_url.trim_end_matches('/'))
            .send()
            .await
            .map_err(|err| IndexError::Transport(err.to_string()))?;
        if !response.status().is_success() {
            return Err(IndexError::Status {
                status: response.status().as_u16(),
                body: String::new(),
            });
        }
        Ok(())
    }

    async fn post(&self, action: &str, body: &Value) -> Result<Value, IndexError> {
        let response = self
            .client
            .post(self.endpoint(action))
            .json(body)
            .send()
            .await
            .map_err(|err| IndexError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IndexError::Status {
                status: status.as_u16(),
                body: body.chars().take(512).collect(),
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|err| IndexError::Decode(err.to_string()))
    }
}

impl SearchIndex for ElasticIndex {
    #[instrument(skip(self, query), fields(index = %self.config.index_name))]
    async fn count(&self, query: &StructuredQuery) -> Result<u64, IndexError> {
        let started = Instant::now();
        let response = self.post("_count", &query.to_count_body()).await;
        log_if_slow("index.count", started);
        parse_count(&response?)
    }

    #[instrument(skip(self, query), fields(index = %self.config.index_name))]
    async fn search(&self, query: &StructuredQuery) -> Result<IndexResponse, IndexError> {
        let started = Instant::now();
        let response = self.post("_search", &query.to_search_body()).await;
        log_if_slow("index.search", started);
        let parsed = parse_search_response(&response?, &query.source)?;
        debug!(total = parsed.total, hits = parsed.hits.len(), "index search");
        Ok(parsed)
    }
}

pub fn parse_count(body: &Value) -> Result<u64, IndexError> {
    body.get("count")
        .and_then(Value::as_u64)
        .ok_or_else(|| IndexError::Decode("missing `count`".into()))
}

pub fn parse_search_response(body: &Value, source: &SourceFields) -> Result<IndexResponse, IndexError> {
    let hits = body
        .get("hits")
        .ok_or_else(|| IndexError::Decode("missing `hits`".into()))?;

    let total = match hits.get("total") {
        Some(Value::Number(n)) => n.as_u64(),
        Some(total) => total.get("value").and_then(Value::as_u64),
        None => None,
    }
    .ok_or_else(|| IndexError::Decode("missing `hits.total`".into()))?;

    let hits = hits
        .get("hits")
        .and_then(Value::as_array)
        .map(|raw| raw.iter().map(|hit| parse_hit(hit, source)).collect::<Result<Vec<_>, _>>())
        .transpose()?
        .unwrap_or_default();

    let aggregations = body
        .get("aggregations")
        .and_then(Value::as_object)
        .map(|aggs| {
            aggs.iter()
                .map(|(name, agg)| (name.clone(), parse_buckets(agg)))
                .collect()
        })
        .unwrap_or_default();

    Ok(IndexResponse {
        total,
        hits,
        aggregations,
    })
}

fn parse_hit(hit: &Value, source: &SourceFields) -> Result<IndexHit, IndexError> {
    let id = hit
        .get("_id")
        .and_then(Value::as_str)
        .ok_or_else(|| IndexError::Decode("hit without `_id`".into()))?
        .to_string();

    let sort = hit
        .get("sort")
        .and_then(Value::as_array)
        .map(|values| values.iter().map(sort_value).collect())
        .unwrap_or_default();

    let doc = hit.get("_source");
    let scores: BTreeMap<String, f64> = doc
        .and_then(|doc| doc.get(&source.scores_field))
        .and_then(Value::as_object)
        .map(|scores| {
            scores
                .iter()
                .filter_map(|(code, value)| value.as_f64().filter(|v| *v > 0.0).map(|v| (code.clone(), v)))
                .collect()
        })
        .unwrap_or_default();

    let boosted: BTreeSet<String> = match doc.and_then(|doc| doc.get(&source.boosted_field)) {
        Some(Value::Object(flags)) => flags
            .iter()
            .filter(|(_, flag)| !matches!(flag, Value::Bool(false) | Value::Null))
            .map(|(code, _)| code.clone())
            .collect(),
        Some(Value::Array(codes)) => codes.iter().filter_map(Value::as_str).map(String::from).collect(),
        _ => BTreeSet::new(),
    };

    Ok(IndexHit {
        id,
        score: hit.get("_score").and_then(Value::as_f64),
        sort,
        scores,
        boosted,
    })
}

fn sort_value(value: &Value) -> SortValue {
    match value {
        Value::Number(n) => n.as_f64().map(SortValue::Number).unwrap_or(SortValue::Missing),
        Value::String(s) => SortValue::Text(s.clone()),
        Value::Bool(b) => SortValue::Number(if *b { 1.0 } else { 0.0 }),
        _ => SortValue::Missing,
    }
}

fn parse_buckets(agg: &Value) -> Vec<Bucket> {
    agg.get("buckets")
        .and_then(Value::as_array)
        .map(|buckets| {
            buckets
                .iter()
                .filter_map(|bucket| {
                    let key = match bucket.get("key")? {
                        Value::String(key) => key.clone(),
                        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
                            (Some(int), _) => int.to_string(),
                            (None, Some(float)) if float.fract() == 0.0 => format!("{}", float as i64),
                            _ => n.to_string(),
                        },
                        _ => return None,
                    };
                    let doc_count = bucket.get("doc_count").and_then(Value::as_u64)?;
                    Some(Bucket { key, doc_count })
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn source() -> SourceFields {
        SourceFields {
            scores_field: "scores_by_rome".into(),
            boosted_field: "boosted_romes".into(),
        }
    }

    #[test]
    fn parses_hits_sort_values_and_source() {
        let body = json!({
            "hits": {
                "total": { "value": 42, "relation": "eq" },
                "hits": [
                    {
                        "_id": "12345678900011",
                        "_score": 37.5,
                        "sort": [1, 37.5, 3.21],
                        "_source": {
                            "scores_by_rome": { "D1101": 80, "D1106": 20.5, "D1102": 0 },
                            "boosted_romes": { "D1101": true }
                        }
                    },
                    {
                        "_id": "98765432100022",
                        "_score": null,
                        "sort": [null, 12.0, "57"],
                        "_source": { "boosted_romes": ["D1106"] }
                    }
                ]
            }
        });

        let response = parse_search_response(&body, &source()).unwrap();
        assert_eq!(response.total, 42);
        assert_eq!(response.hits.len(), 2);

        let first = &response.hits[0];
        assert_eq!(first.scores.get("D1101"), Some(&80.0));
        assert_eq!(first.scores.get("D1102"), None);
        assert!(first.boosted.contains("D1101"));
        assert_eq!(first.sort[2], SortValue::Number(3.21));

        let second = &response.hits[1];
        assert_eq!(second.score, None);
        assert_eq!(second.sort[0], SortValue::Missing);
        assert_eq!(second.sort[2], SortValue::Text("57".into()));
        assert!(second.boosted.contains("D1106"));
        assert!(second.scores.is_empty());
    }

    #[test]
    fn parses_aggregation_buckets() {
        let body = json!({
            "hits": { "total": 3, "hits": [] },
            "aggregations": {
                "naf": { "buckets": [{ "key": "4711D", "doc_count": 2 }] },
                "headcount": { "buckets": [{ "key": 21, "doc_count": 1 }, { "key": 11.0, "doc_count": 4 }] },
                "distance": { "buckets": [{ "key": "less_10_km", "doc_count": 3 }] }
            }
        });

        let response = parse_search_response(&body, &source()).unwrap();
        assert_eq!(response.total, 3);
        assert_eq!(response.aggregations["naf"][0].key, "4711D");
        assert_eq!(response.aggregations["headcount"][0].key, "21");
        assert_eq!(response.aggregations["headcount"][1].key, "11");
        assert_eq!(response.aggregations["distance"][0].doc_count, 3);
    }

    #[test]
    fn rejects_malformed_bodies() {
        assert!(matches!(
            parse_search_response(&json!({}), &source()),
            Err(IndexError::Decode(_))
        ));
        assert!(parse_search_response(&json!({ "hits": { "total": 1, "hits": [{ "_score": 1 }] } }), &source()).is_err());
        assert_eq!(parse_count(&json!({ "count": 7 })).unwrap(), 7);
        assert!(parse_count(&json!({ "error": "boom" })).is_err());
    }

    #[test]
    fn endpoint_joins_base_and_index() {
        let index = ElasticIndex::new(ElasticConfig::new("http://localhost:9200/", "companies")).unwrap();
        assert_eq!(index.endpoint("_search"), "http://localhost:9200/companies/_search");
    }
}
