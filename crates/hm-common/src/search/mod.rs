//! Search criteria, ranking query construction, result assembly and the
//! per-request fetcher that ties them together.

pub mod assembler;
pub mod builder;
pub mod criteria;
pub mod error;
pub mod facets;
pub mod fetcher;
pub mod query;
pub mod settings;

pub use assembler::{AssembledPage, RankedCompany, ResultAssembler};
pub use builder::RankingQueryBuilder;
pub use criteria::{
    AudienceFilter, CampaignFilter, FacetRequest, HiringType, PageWindow, SearchCriteria,
    SearchCriteriaBuilder, SizeFilter, SortMode,
};
pub use error::SearchError;
pub use facets::{FacetCount, Facets};
pub use fetcher::{
    AlternativeDistance, AlternativeOccupation, FetchState, FetcherOverrides, HiddenMarketFetcher,
    SearchContext, SearchOutcome,
};
pub use query::StructuredQuery;
pub use settings::{ScoreRepresentation, SearchSettings, SettingsError};

use crate::clock::Clock;
use crate::index::{RecordStore, SearchIndex};

/// Runs one search with today's ranking seed.
pub async fn run_search<I, S>(
    criteria: SearchCriteria,
    settings: &SearchSettings,
    clock: &dyn Clock,
    ctx: &SearchContext<'_, I, S>,
) -> Result<SearchOutcome, SearchError>
where
    I: SearchIndex,
    S: RecordStore,
{
    HiddenMarketFetcher::new(criteria, settings, clock.daily_seed())
        .run(ctx)
        .await
}

/// Eligible-company count for `criteria`, without fetching any page.
pub async fn count_companies<I: SearchIndex>(
    criteria: SearchCriteria,
    settings: &SearchSettings,
    clock: &dyn Clock,
    index: &I,
) -> Result<u64, SearchError> {
    HiddenMarketFetcher::new(criteria, settings, clock.daily_seed())
        .count(index)
        .await
}
