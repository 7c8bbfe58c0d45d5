//! PostgreSQL system of record.

pub mod companies;
pub mod pool;
pub mod util;

pub use companies::fetch_company;
pub use pool::{create_pool_from_url, DbPoolError, PgPool};
pub use util::TimedClientExt;
