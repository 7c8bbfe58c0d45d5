//! Search index and system-of-record seams.

pub mod elastic;
pub mod fields;
pub mod memory;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;

use thiserror::Error;

use crate::search::query::StructuredQuery;
use crate::Company;

pub use elastic::{ElasticConfig, ElasticIndex};
pub use memory::{InMemoryIndex, InMemoryStore};

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("index request failed: {0}")]
    Transport(String),
    #[error("index returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("unexpected index response: {0}")]
    Decode(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to get store connection: {0}")]
    Pool(String),
    #[error("store query failed: {0}")]
    Query(String),
    #[error("failed to map company row: {0}")]
    Mapping(String),
}

/// One value of a hit's sort tuple, in sort-key order.
#[derive(Debug, Clone, PartialEq)]
pub enum SortValue {
    Number(f64),
    Text(String),
    Missing,
}

impl SortValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SortValue::Number(value) => Some(*value),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexHit {
    pub id: String,
    pub score: Option<f64>,
    pub sort: Vec<SortValue>,
    /// Per-occupation values of the requested hiring-type context.
    pub scores: BTreeMap<String, f64>,
    pub boosted: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bucket {
    pub key: String,
    pub doc_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexResponse {
    pub total: u64,
    pub hits: Vec<IndexHit>,
    pub aggregations: BTreeMap<String, Vec<Bucket>>,
}

/// Full-text/geo index holding one `CompanyScoreEntry` per company.
pub trait SearchIndex: Send + Sync {
    fn count(&self, query: &StructuredQuery) -> impl Future<Output = Result<u64, IndexError>> + Send;

    fn search(
        &self,
        query: &StructuredQuery,
    ) -> impl Future<Output = Result<IndexResponse, IndexError>> + Send;
}

/// System of record holding full company records.
pub trait RecordStore: Send + Sync {
    /// Records keyed by SIRET. Unknown ids are simply absent from the map.
    fn fetch_by_ids(
        &self,
        ids: &[String],
    ) -> impl Future<Output = Result<HashMap<String, Company>, StoreError>> + Send;
}
