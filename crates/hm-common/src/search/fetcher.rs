//! Per-request search lifecycle: count, window adjustment, fetch, suggestions.

use serde::Serialize;
use tracing::{debug, instrument};

use super::assembler::{RankedCompany, ResultAssembler};
use super::builder::{RankingQueryBuilder, INDUSTRY_AGGREGATION, SIZE_AGGREGATION};
use super::criteria::{FacetRequest, PageWindow, SearchCriteria, SizeFilter};
use super::facets::{industry_facets, size_facets, Facets};
use super::query::{Pagination, StructuredQuery};
use super::settings::SearchSettings;
use super::SearchError;
use crate::clock::DailySeed;
use crate::index::{Bucket, RecordStore, SearchIndex};
use crate::mapping::related_occupations;
use crate::reference::ReferenceData;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchState {
    Init,
    Counting,
    PageAdjust,
    Fetching,
    Suggesting,
    Done,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlternativeOccupation {
    pub code: String,
    pub label: String,
    pub count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AlternativeDistance {
    pub distance_km: u32,
    pub count: u64,
}

/// Fields a variant fetcher may replace. `None` keeps the original value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetcherOverrides {
    pub occupation_codes: Option<Vec<String>>,
    pub distance_km: Option<u32>,
    pub industry_codes: Option<Vec<String>>,
    pub size: Option<SizeFilter>,
    pub window: Option<PageWindow>,
    pub facets: Option<FacetRequest>,
}

impl FetcherOverrides {
    fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// External collaborators of one search.
#[derive(Debug, Clone, Copy)]
pub struct SearchContext<'a, I, S> {
    pub index: &'a I,
    pub store: &'a S,
    pub reference: &'a ReferenceData,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchOutcome {
    pub total: u64,
    pub window: PageWindow,
    pub companies: Vec<RankedCompany>,
    pub facets: Facets,
    pub alternative_occupations: Vec<AlternativeOccupation>,
    pub alternative_distances: Vec<AlternativeDistance>,
}

/// State of one search request. Never shared across requests.
#[derive(Debug, Clone, PartialEq)]
pub struct HiddenMarketFetcher<'a> {
    criteria: SearchCriteria,
    settings: &'a SearchSettings,
    seed: DailySeed,
    state: FetchState,
    company_count: Option<u64>,
    window: PageWindow,
    alternative_occupations: Vec<AlternativeOccupation>,
    alternative_distances: Vec<AlternativeDistance>,
}

impl<'a> HiddenMarketFetcher<'a> {
    pub fn new(criteria: SearchCriteria, settings: &'a SearchSettings, seed: DailySeed) -> Self {
        let window = criteria.window();
        Self {
            criteria,
            settings,
            seed,
            state: FetchState::Init,
            company_count: None,
            window,
            alternative_occupations: Vec::new(),
            alternative_distances: Vec::new(),
        }
    }

    pub fn criteria(&self) -> &SearchCriteria {
        &self.criteria
    }

    pub fn state(&self) -> FetchState {
        self.state
    }

    pub fn company_count(&self) -> Option<u64> {
        self.company_count
    }

    pub fn window(&self) -> PageWindow {
        self.window
    }

    pub fn alternative_occupations(&self) -> &[AlternativeOccupation] {
        &self.alternative_occupations
    }

    pub fn alternative_distances(&self) -> &[AlternativeDistance] {
        &self.alternative_distances
    }

    /// Copy of this fetcher with some criteria replaced. Any override
    /// invalidates what was already computed, so the copy starts over.
    pub fn clone_with(&self, overrides: FetcherOverrides) -> Self {
        let reset = !overrides.is_empty();
        let FetcherOverrides {
            occupation_codes,
            distance_km,
            industry_codes,
            size,
            window,
            facets,
        } = overrides;

        let mut criteria = self.criteria.clone();
        if let Some(codes) = occupation_codes {
            criteria = criteria.with_occupation_codes(codes);
        }
        if let Some(distance_km) = distance_km {
            criteria = criteria.with_distance_km(distance_km);
        }
        if let Some(codes) = industry_codes {
            criteria = criteria.with_industry_codes(codes);
        }
        if let Some(size) = size {
            criteria = criteria.with_size(size);
        }
        if let Some(window) = window {
            criteria = criteria.with_window(window);
        }
        if let Some(facets) = facets {
            criteria = criteria.with_facets(facets);
        }

        if reset {
            return Self::new(criteria, self.settings, self.seed);
        }
        Self {
            criteria,
            settings: self.settings,
            seed: self.seed,
            state: self.state,
            company_count: self.company_count,
            window: self.window,
            alternative_occupations: self.alternative_occupations.clone(),
            alternative_distances: self.alternative_distances.clone(),
        }
    }

    fn transition(&mut self, next: FetchState) {
        debug!(from = ?self.state, to = ?next, "fetcher state");
        self.state = next;
    }

    fn query(&self) -> StructuredQuery {
        RankingQueryBuilder::new(self.settings, self.seed).build(&self.criteria.with_window(self.window))
    }

    /// Number of eligible companies, ignoring pagination.
    #[instrument(skip_all)]
    pub async fn count<I: SearchIndex>(&mut self, index: &I) -> Result<u64, SearchError> {
        self.transition(FetchState::Counting);
        let count = index.count(&self.query().count_only()).await?;
        self.company_count = Some(count);
        Ok(count)
    }

    /// Repairs a window that no longer fits the count. Stale windows starting
    /// past the last result go back to the first page.
    pub fn adjust_window(&mut self) -> PageWindow {
        let count = self.company_count.unwrap_or_default() as usize;
        let adjusted = if self.window.from() > count {
            PageWindow::first_page(self.settings.default_page_size)
        } else if self.window.to() > count + 1 {
            self.window.with_to(count + 1)
        } else {
            self.window
        };

        if adjusted != self.window {
            self.transition(FetchState::PageAdjust);
            debug!(
                from = self.window.from(),
                to = self.window.to(),
                new_from = adjusted.from(),
                new_to = adjusted.to(),
                count,
                "page window adjusted"
            );
            self.window = adjusted;
        }
        self.window
    }

    /// Runs the whole lifecycle and returns the page.
    #[instrument(skip_all, fields(occupations = ?self.criteria.occupation_codes()))]
    pub async fn run<I, S>(&mut self, ctx: &SearchContext<'_, I, S>) -> Result<SearchOutcome, SearchError>
    where
        I: SearchIndex,
        S: RecordStore,
    {
        let total = self.count(ctx.index).await?;
        self.adjust_window();

        self.transition(FetchState::Fetching);
        let (companies, facets) = if total == 0 {
            (Vec::new(), Facets::default())
        } else {
            let query = self.query();
            let response = ctx.index.search(&query).await?;
            let page = ResultAssembler::new(self.settings, ctx.reference)
                .assemble(ctx.store, &response, &self.criteria.with_window(self.window), query.geo_sort_index())
                .await?;
            let mut facets = page.facets;
            self.refine_facets(ctx, &mut facets).await?;
            (page.companies, facets)
        };

        // Compared with the requested page, not the window clamped to the count.
        if self.criteria.suggestions() && total <= self.criteria.window().size() as u64 {
            self.transition(FetchState::Suggesting);
            self.alternative_occupations = self.suggest_occupations(ctx).await?;
            self.alternative_distances = self.suggest_distances(ctx.index, total).await?;
        }

        self.transition(FetchState::Done);
        Ok(SearchOutcome {
            total,
            window: self.window,
            companies,
            facets,
            alternative_occupations: self.alternative_occupations.clone(),
            alternative_distances: self.alternative_distances.clone(),
        })
    }

    /// Recomputes a histogram without its own filter, so active filters
    /// still show the values the user can switch to.
    async fn refine_facets<I, S>(&self, ctx: &SearchContext<'_, I, S>, facets: &mut Facets) -> Result<(), SearchError>
    where
        I: SearchIndex,
        S: RecordStore,
    {
        let requested = self.criteria.facets();

        if requested.industry && !self.criteria.industry_codes().is_empty() {
            let variant = self.clone_with(FetcherOverrides {
                industry_codes: Some(Vec::new()),
                facets: Some(FacetRequest {
                    industry: true,
                    ..FacetRequest::default()
                }),
                ..FetcherOverrides::default()
            });
            let buckets = variant.histogram(ctx.index, INDUSTRY_AGGREGATION).await?;
            facets.industries = industry_facets(&buckets, ctx.reference);
        }

        if requested.size && self.criteria.size() != SizeFilter::Any {
            let variant = self.clone_with(FetcherOverrides {
                size: Some(SizeFilter::Any),
                facets: Some(FacetRequest {
                    size: true,
                    ..FacetRequest::default()
                }),
                ..FetcherOverrides::default()
            });
            let buckets = variant.histogram(ctx.index, SIZE_AGGREGATION).await?;
            facets.sizes = size_facets(&buckets, self.settings.small_max_size_code, self.settings.big_min_size_code);
        }

        Ok(())
    }

    async fn histogram<I: SearchIndex>(&self, index: &I, aggregation: &str) -> Result<Vec<Bucket>, SearchError> {
        let mut query = self.query();
        query.scoring.clear();
        query.sort.clear();
        query.pagination = Pagination { offset: 0, size: 0 };
        let mut response = index.search(&query).await?;
        Ok(response.aggregations.remove(aggregation).unwrap_or_default())
    }

    async fn suggest_occupations<I, S>(
        &self,
        ctx: &SearchContext<'_, I, S>,
    ) -> Result<Vec<AlternativeOccupation>, SearchError>
    where
        I: SearchIndex,
        S: RecordStore,
    {
        let limit = self.settings.max_alternative_occupations;
        if limit == 0 {
            return Ok(Vec::new());
        }

        let requested = self.criteria.occupation_codes();
        let mut candidates: Vec<String> = Vec::new();
        for code in requested {
            for related in related_occupations(ctx.reference.mapping(), code, requested, limit) {
                if !candidates.contains(&related.code) {
                    candidates.push(related.code);
                }
            }
        }

        let mut alternatives = Vec::new();
        for code in candidates {
            let count = self
                .clone_with(FetcherOverrides {
                    occupation_codes: Some(vec![code.clone()]),
                    ..FetcherOverrides::default()
                })
                .count(ctx.index)
                .await?;
            if count > 0 {
                let label = ctx.reference.occupation_label(&code).unwrap_or(&code).to_string();
                alternatives.push(AlternativeOccupation { code, label, count });
            }
        }

        alternatives.sort_by(|a, b| b.count.cmp(&a.count));
        alternatives.truncate(limit);
        Ok(alternatives)
    }

    /// Wider radii, kept only while each one finds strictly more companies.
    async fn suggest_distances<I: SearchIndex>(
        &self,
        index: &I,
        baseline: u64,
    ) -> Result<Vec<AlternativeDistance>, SearchError> {
        if self.criteria.origin().is_none() {
            return Ok(Vec::new());
        }

        let current = self.criteria.distance_km();
        let mut best = baseline;
        let mut alternatives = Vec::new();
        for &distance_km in self.settings.alternative_distances_km.iter().filter(|d| **d > current) {
            let count = self
                .clone_with(FetcherOverrides {
                    distance_km: Some(distance_km),
                    ..FetcherOverrides::default()
                })
                .count(index)
                .await?;
            if count > best {
                alternatives.push(AlternativeDistance { distance_km, count });
                best = count;
            }
        }
        Ok(alternatives)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashMap};

    use super::*;
    use crate::index::{InMemoryIndex, InMemoryStore};
    use crate::mapping::{OccupationIndustryMapping, OccupationIndustryPair};
    use crate::reference::ContactModeTable;
    use crate::search::criteria::{SearchCriteriaBuilder, SortMode};
    use crate::{Company, CompanyScoreEntry, GeoPoint};

    const METZ: (f64, f64) = (49.119, 6.176);

    fn pair(occupation: &str, industry: &str, weight: f64) -> OccupationIndustryPair {
        OccupationIndustryPair {
            occupation_code: occupation.into(),
            industry_code: industry.into(),
            weight,
        }
    }

    fn reference() -> ReferenceData {
        ReferenceData::new(
            HashMap::from([
                ("D1101".to_string(), "Boucherie".to_string()),
                ("D1106".to_string(), "Vente en alimentation".to_string()),
                ("D1102".to_string(), "Boulangerie".to_string()),
            ]),
            HashMap::from([
                ("4711D".to_string(), "Supermarchés".to_string()),
                ("4722Z".to_string(), "Boucheries".to_string()),
            ]),
            OccupationIndustryMapping::from_pairs(&[
                pair("D1101", "4711D", 10.0),
                pair("D1101", "4722Z", 30.0),
                pair("D1106", "4711D", 50.0),
                pair("D1102", "4722Z", 2.0),
            ]),
            ContactModeTable::default(),
        )
    }

    /// Company `km_north` kilometres north of Metz.
    fn entry(siret: &str, km_north: f64, occupation: &str, score: f64) -> CompanyScoreEntry {
        CompanyScoreEntry {
            siret: siret.into(),
            industry_code: "4711D".into(),
            size_code: 11,
            location: Some(GeoPoint::new(METZ.0 + km_north / 111.2, METZ.1)),
            department: "57".into(),
            score: 80,
            occupation_scores: BTreeMap::from([(occupation.to_string(), score)]),
            ..CompanyScoreEntry::default()
        }
    }

    fn store_for(entries: &[CompanyScoreEntry]) -> InMemoryStore {
        InMemoryStore::new(entries.iter().map(|entry| Company {
            siret: entry.siret.clone(),
            name: format!("Company {}", entry.siret),
            industry_code: entry.industry_code.clone(),
            size_code: entry.size_code,
            department: entry.department.clone(),
            location: entry.location,
            ..Company::default()
        }))
    }

    fn seed() -> DailySeed {
        DailySeed::parse("2024-03-15").unwrap()
    }

    #[tokio::test]
    async fn stale_window_resets_to_first_page() {
        let settings = SearchSettings::default();
        let reference = reference();
        let entries: Vec<_> = (0..15).map(|i| entry(&format!("{i:014}"), 1.0, "D1101", 50.0)).collect();
        let index = InMemoryIndex::new(entries.clone());
        let store = store_for(&entries);
        let criteria = SearchCriteriaBuilder::new(&settings, &reference)
            .occupation_codes(["D1101"])
            .origin(METZ.0, METZ.1)
            .sort(SortMode::Score)
            .window(50, 70)
            .build()
            .unwrap();

        let mut fetcher = HiddenMarketFetcher::new(criteria, &settings, seed());
        let outcome = fetcher
            .run(&SearchContext {
                index: &index,
                store: &store,
                reference: &reference,
            })
            .await
            .unwrap();

        assert_eq!(outcome.total, 15);
        assert_eq!((outcome.window.from(), outcome.window.to()), (1, 20));
        assert_eq!(outcome.companies.len(), 15);
        assert_eq!(outcome.companies[0].position, 1);
        assert_eq!(fetcher.state(), FetchState::Done);
    }

    #[tokio::test]
    async fn window_end_is_clamped_to_count_plus_one() {
        let settings = SearchSettings::default();
        let reference = reference();
        let entries: Vec<_> = (0..15).map(|i| entry(&format!("{i:014}"), 1.0, "D1101", 50.0)).collect();
        let index = InMemoryIndex::new(entries);
        let criteria = SearchCriteriaBuilder::new(&settings, &reference)
            .occupation_codes(["D1101"])
            .origin(METZ.0, METZ.1)
            .window(11, 40)
            .build()
            .unwrap();

        let mut fetcher = HiddenMarketFetcher::new(criteria, &settings, seed());
        fetcher.count(&index).await.unwrap();
        let window = fetcher.adjust_window();
        assert_eq!((window.from(), window.to()), (11, 16));
        assert_eq!(fetcher.state(), FetchState::PageAdjust);
    }

    #[tokio::test]
    async fn empty_count_skips_the_search() {
        let settings = SearchSettings::default();
        let reference = reference();
        let index = InMemoryIndex::new(vec![entry("far", 400.0, "D1101", 50.0)]);
        let store = InMemoryStore::default();
        let criteria = SearchCriteriaBuilder::new(&settings, &reference)
            .occupation_codes(["D1101"])
            .origin(METZ.0, METZ.1)
            .build()
            .unwrap();

        let outcome = HiddenMarketFetcher::new(criteria, &settings, seed())
            .run(&SearchContext {
                index: &index,
                store: &store,
                reference: &reference,
            })
            .await
            .unwrap();

        assert_eq!(outcome.total, 0);
        assert!(outcome.companies.is_empty());
        assert_eq!(index.search_calls(), 0);
        assert_eq!(index.count_calls(), 1);
    }

    #[tokio::test]
    async fn clone_without_overrides_is_identical() {
        let settings = SearchSettings {
            default_page_size: 15,
            ..SearchSettings::default()
        };
        let reference = reference();
        let criteria = SearchCriteriaBuilder::new(&settings, &reference)
            .occupation_codes(["D1101", "D1106"])
            .origin(METZ.0, METZ.1)
            .departments(["57", "54"])
            .distance_km(50)
            .size(SizeFilter::Big)
            .sort(SortMode::Distance)
            .audience(crate::search::criteria::AudienceFilter::Senior)
            .hiring_type(crate::search::criteria::HiringType::Apprenticeship)
            .campaign(Some(crate::search::criteria::CampaignFilter::ImmersionOnly))
            .window(3, 9)
            .industry_codes(["4711D"])
            .facets(FacetRequest::all())
            .suggestions(true)
            .build()
            .unwrap();
        let index = InMemoryIndex::default();

        let mut fetcher = HiddenMarketFetcher::new(criteria, &settings, seed());
        fetcher.count(&index).await.unwrap();
        fetcher.adjust_window();

        assert_eq!(fetcher.clone_with(FetcherOverrides::default()), fetcher);
        assert_eq!(fetcher.clone(), fetcher);
    }

    #[tokio::test]
    async fn clone_with_override_starts_over() {
        let settings = SearchSettings::default();
        let reference = reference();
        let criteria = SearchCriteriaBuilder::new(&settings, &reference)
            .occupation_codes(["D1101"])
            .origin(METZ.0, METZ.1)
            .build()
            .unwrap();
        let mut fetcher = HiddenMarketFetcher::new(criteria, &settings, seed());
        fetcher.count(&InMemoryIndex::default()).await.unwrap();

        let wider = fetcher.clone_with(FetcherOverrides {
            distance_km: Some(50),
            ..FetcherOverrides::default()
        });
        assert_eq!(wider.criteria().distance_km(), 50);
        assert_eq!(wider.state(), FetchState::Init);
        assert_eq!(wider.company_count(), None);
        assert_eq!(fetcher.criteria().distance_km(), 10);
    }

    #[tokio::test]
    async fn scarce_results_produce_suggestions() {
        let settings = SearchSettings::default();
        let reference = reference();
        let entries = vec![
            entry("00000000000001", 2.0, "D1101", 60.0),
            entry("00000000000002", 5.0, "D1101", 40.0),
            entry("00000000000003", 20.0, "D1101", 40.0),
            entry("00000000000004", 200.0, "D1101", 40.0),
            entry("00000000000005", 300.0, "D1101", 40.0),
            entry("00000000000006", 3.0, "D1106", 70.0),
            entry("00000000000007", 4.0, "D1102", 70.0),
        ];
        let index = InMemoryIndex::new(entries.clone());
        let store = store_for(&entries);
        let criteria = SearchCriteriaBuilder::new(&settings, &reference)
            .occupation_codes(["D1101"])
            .origin(METZ.0, METZ.1)
            .suggestions(true)
            .build()
            .unwrap();

        let outcome = HiddenMarketFetcher::new(criteria, &settings, seed())
            .run(&SearchContext {
                index: &index,
                store: &store,
                reference: &reference,
            })
            .await
            .unwrap();

        assert_eq!(outcome.total, 2);
        assert_eq!(
            outcome.alternative_distances,
            vec![
                AlternativeDistance { distance_km: 30, count: 3 },
                AlternativeDistance { distance_km: 3000, count: 5 },
            ]
        );
        let codes: Vec<&str> = outcome.alternative_occupations.iter().map(|a| a.code.as_str()).collect();
        assert!(codes.contains(&"D1106"));
        assert!(codes.contains(&"D1102"));
        assert!(!codes.contains(&"D1101"));
        assert!(outcome.alternative_occupations.iter().all(|a| a.count == 1));
    }

    #[tokio::test]
    async fn clamped_window_still_offers_suggestions() {
        let settings = SearchSettings::default();
        let reference = reference();
        let mut entries: Vec<_> = (0..15).map(|i| entry(&format!("{i:014}"), 1.0, "D1101", 50.0)).collect();
        entries.push(entry("00000000000100", 20.0, "D1101", 50.0));
        entries.push(entry("00000000000101", 2.0, "D1106", 50.0));
        let index = InMemoryIndex::new(entries.clone());
        let store = store_for(&entries);
        let criteria = SearchCriteriaBuilder::new(&settings, &reference)
            .occupation_codes(["D1101"])
            .origin(METZ.0, METZ.1)
            .window(11, 30)
            .suggestions(true)
            .build()
            .unwrap();

        let outcome = HiddenMarketFetcher::new(criteria, &settings, seed())
            .run(&SearchContext {
                index: &index,
                store: &store,
                reference: &reference,
            })
            .await
            .unwrap();

        assert_eq!(outcome.total, 15);
        assert_eq!((outcome.window.from(), outcome.window.to()), (11, 16));
        assert_eq!(
            outcome.alternative_distances,
            vec![AlternativeDistance { distance_km: 30, count: 16 }]
        );
        let codes: Vec<&str> = outcome.alternative_occupations.iter().map(|a| a.code.as_str()).collect();
        assert_eq!(codes, vec!["D1106"]);
        assert!(index.count_calls() > 1);
    }

    #[tokio::test]
    async fn active_industry_filter_still_lists_other_industries() {
        let settings = SearchSettings::default();
        let reference = reference();
        let mut butcher = entry("00000000000002", 3.0, "D1101", 50.0);
        butcher.industry_code = "4722Z".into();
        let entries = vec![entry("00000000000001", 2.0, "D1101", 50.0), butcher];
        let index = InMemoryIndex::new(entries.clone());
        let store = store_for(&entries);
        let criteria = SearchCriteriaBuilder::new(&settings, &reference)
            .occupation_codes(["D1101"])
            .origin(METZ.0, METZ.1)
            .industry_codes(["4711D"])
            .facets(FacetRequest {
                industry: true,
                ..FacetRequest::default()
            })
            .build()
            .unwrap();

        let outcome = HiddenMarketFetcher::new(criteria, &settings, seed())
            .run(&SearchContext {
                index: &index,
                store: &store,
                reference: &reference,
            })
            .await
            .unwrap();

        assert_eq!(outcome.total, 1);
        let mut keys: Vec<&str> = outcome.facets.industries.iter().map(|f| f.key.as_str()).collect();
        keys.sort_unstable();
        assert_eq!(keys, vec!["4711D", "4722Z"]);
        assert_eq!(index.search_calls(), 2);
    }
}
