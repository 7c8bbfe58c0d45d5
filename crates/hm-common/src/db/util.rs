#![allow(async_fn_in_trait)]

use std::time::Instant;

use deadpool_postgres::GenericClient;
use tokio_postgres::types::ToSql;
use tokio_postgres::Row;

use crate::logging::log_if_slow;

/// Query helpers that report slow statements through [`log_if_slow`].
/// Statements are prepared once per connection and cached.
pub trait TimedClientExt: GenericClient {
    async fn timed_query_cached(
        &self,
        statement: &str,
        params: &[&(dyn ToSql + Sync)],
        label: &str,
    ) -> Result<Vec<Row>, tokio_postgres::Error> {
        let started = Instant::now();
        let prepared = self.prepare_cached(statement).await?;
        let result = self.query(&prepared, params).await;
        log_if_slow(label, started);
        result
    }

    async fn timed_query_opt_cached(
        &self,
        statement: &str,
        params: &[&(dyn ToSql + Sync)],
        label: &str,
    ) -> Result<Option<Row>, tokio_postgres::Error> {
        let started = Instant::now();
        let prepared = self.prepare_cached(statement).await?;
        let result = self.query_opt(&prepared, params).await;
        log_if_slow(label, started);
        result
    }
}

impl<T: GenericClient + ?Sized> TimedClientExt for T {}
