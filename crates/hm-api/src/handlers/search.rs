use std::time::Instant;

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use hm_common::reference::ReferenceData;
use hm_common::search::criteria::parse_choice;
use hm_common::search::{
    count_companies, run_search, AudienceFilter, CampaignFilter, FacetRequest, HiringType,
    SearchContext, SearchCriteria, SearchCriteriaBuilder, SearchOutcome, SearchSettings, SizeFilter,
    SortMode,
};
use hm_metrics::{record_empty_search, record_search, record_suggestions, SearchKind};

use super::pagination::resolve_window;
use crate::error::ApiError;
use crate::SharedState;

/// Raw query string. Everything is a string so that malformed values are
/// reported through [`ApiError`] instead of an extractor rejection.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchParams {
    #[serde(alias = "rome_codes", alias = "occupation")]
    pub occupations: Option<String>,
    #[serde(alias = "lat")]
    pub latitude: Option<String>,
    #[serde(alias = "lon")]
    pub longitude: Option<String>,
    pub departments: Option<String>,
    #[serde(alias = "d")]
    pub distance: Option<String>,
    pub headcount: Option<String>,
    pub sort: Option<String>,
    pub audience: Option<String>,
    pub hiring_type: Option<String>,
    pub campaign: Option<String>,
    #[serde(alias = "naf_codes")]
    pub industries: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub page: Option<String>,
    pub page_size: Option<String>,
    pub facets: Option<String>,
    pub suggestions: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CountResponse {
    pub total: u64,
}

fn split_list(raw: Option<&str>) -> Vec<String> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_coordinate(name: &str, raw: &str) -> Result<f64, ApiError> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .ok_or_else(|| ApiError::BadRequest(format!("{name} must be a number")))
}

fn parse_flag(name: &str, raw: Option<&str>) -> Result<bool, ApiError> {
    match raw.map(|raw| raw.trim().to_ascii_lowercase()).as_deref() {
        None | Some("") | Some("0") | Some("false") | Some("no") => Ok(false),
        Some("1") | Some("true") | Some("yes") => Ok(true),
        Some(_) => Err(ApiError::BadRequest(format!("{name} must be a boolean"))),
    }
}

fn parse_facets(raw: Option<&str>) -> Result<FacetRequest, ApiError> {
    let mut facets = FacetRequest::default();
    for item in split_list(raw) {
        match item.to_ascii_lowercase().as_str() {
            "all" => facets = FacetRequest::all(),
            "industry" | "naf" => facets.industry = true,
            "size" | "headcount" => facets.size = true,
            "distance" => facets.distance = true,
            other => return Err(ApiError::BadRequest(format!("unknown facet `{other}`"))),
        }
    }
    Ok(facets)
}

/// Validates the query string into search criteria.
pub fn criteria_from_params(
    params: &SearchParams,
    settings: &SearchSettings,
    reference: &ReferenceData,
) -> Result<SearchCriteria, ApiError> {
    let mut builder = SearchCriteriaBuilder::new(settings, reference)
        .occupation_codes(split_list(params.occupations.as_deref()))
        .departments(split_list(params.departments.as_deref()))
        .industry_codes(split_list(params.industries.as_deref()))
        .sort(SortMode::parse_or_default(params.sort.as_deref()))
        .facets(parse_facets(params.facets.as_deref())?)
        .suggestions(parse_flag("suggestions", params.suggestions.as_deref())?);

    match (params.latitude.as_deref(), params.longitude.as_deref()) {
        (Some(lat), Some(lon)) => {
            builder = builder.origin(parse_coordinate("latitude", lat)?, parse_coordinate("longitude", lon)?);
        }
        (None, None) => {}
        _ => return Err(ApiError::BadRequest("latitude and longitude must be given together".into())),
    }

    if let Some(raw) = params.distance.as_deref() {
        let distance = raw
            .trim()
            .parse::<u32>()
            .map_err(|_| ApiError::BadRequest("distance must be a whole number of km".into()))?;
        builder = builder.distance_km(distance);
    }
    if let Some(raw) = params.headcount.as_deref() {
        builder = builder.size(parse_choice::<SizeFilter>("headcount", raw)?);
    }
    if let Some(raw) = params.audience.as_deref() {
        builder = builder.audience(parse_choice::<AudienceFilter>("audience", raw)?);
    }
    if let Some(raw) = params.hiring_type.as_deref() {
        builder = builder.hiring_type(parse_choice::<HiringType>("hiring_type", raw)?);
    }
    if let Some(raw) = params.campaign.as_deref().filter(|raw| !raw.trim().is_empty()) {
        builder = builder.campaign(Some(parse_choice::<CampaignFilter>("campaign", raw)?));
    }

    if let Some((from, to)) = resolve_window(
        params.from.as_deref(),
        params.to.as_deref(),
        params.page.as_deref(),
        params.page_size.as_deref(),
        settings.default_page_size,
    )? {
        builder = builder.window(from, to);
    }

    Ok(builder.build()?)
}

async fn execute_search(state: &SharedState, params: &SearchParams) -> Result<SearchOutcome, ApiError> {
    let criteria = criteria_from_params(params, &state.settings, &state.reference)?;
    let ctx = SearchContext {
        index: &state.index,
        store: &state.pool,
        reference: state.reference.as_ref(),
    };
    Ok(run_search(criteria, &state.settings, state.clock.as_ref(), &ctx).await?)
}

pub async fn search(
    State(state): State<SharedState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchOutcome>, ApiError> {
    let started = Instant::now();
    let result = execute_search(&state, &params).await;

    match &result {
        Ok(outcome) => {
            record_search(SearchKind::Search, "ok", started.elapsed());
            if outcome.total == 0 {
                record_empty_search();
            }
            record_suggestions(outcome.alternative_occupations.len(), outcome.alternative_distances.len());
        }
        Err(err) => record_search(SearchKind::Search, err.outcome(), started.elapsed()),
    }
    result.map(Json)
}

pub async fn count(
    State(state): State<SharedState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<CountResponse>, ApiError> {
    let started = Instant::now();
    let result = async {
        let criteria = criteria_from_params(&params, &state.settings, &state.reference)?;
        let total = count_companies(criteria, &state.settings, state.clock.as_ref(), &state.index).await?;
        Ok::<_, ApiError>(CountResponse { total })
    }
    .await;

    let outcome = match &result {
        Ok(_) => "ok",
        Err(err) => err.outcome(),
    };
    record_search(SearchKind::Count, outcome, started.elapsed());
    result.map(Json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_reference;

    fn params(pairs: &[(&str, &str)]) -> SearchParams {
        let query = pairs
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        let uri: axum::http::Uri = format!("/api/search?{query}").parse().unwrap();
        Query::<SearchParams>::try_from_uri(&uri).unwrap().0
    }

    #[test]
    fn builds_criteria_from_query_string() {
        let settings = SearchSettings::default();
        let reference = test_reference();
        let criteria = criteria_from_params(
            &params(&[
                ("rome_codes", "d1101,D1106"),
                ("lat", "49.119"),
                ("lon", "6.176"),
                ("distance", "30"),
                ("headcount", "small"),
                ("sort", "distance"),
                ("page", "2"),
                ("facets", "naf,size"),
            ]),
            &settings,
            &reference,
        )
        .unwrap();

        assert_eq!(criteria.occupation_codes().to_vec(), vec!["D1101".to_string(), "D1106".to_string()]);
        assert_eq!(criteria.distance_km(), 30);
        assert_eq!(criteria.size(), SizeFilter::Small);
        assert_eq!(criteria.sort(), SortMode::Distance);
        assert_eq!((criteria.window().from(), criteria.window().to()), (21, 40));
        assert!(criteria.facets().industry && criteria.facets().size && !criteria.facets().distance);
    }

    #[test]
    fn unknown_sort_falls_back_to_default() {
        let settings = SearchSettings::default();
        let reference = test_reference();
        let criteria = criteria_from_params(
            &params(&[("occupations", "D1101"), ("departments", "57"), ("sort", "random")]),
            &settings,
            &reference,
        )
        .unwrap();
        assert_eq!(criteria.sort(), SortMode::Blended);
    }

    #[test]
    fn rejects_invalid_input() {
        let settings = SearchSettings::default();
        let reference = test_reference();
        let reject = |pairs: &[(&str, &str)]| {
            matches!(
                criteria_from_params(&params(pairs), &settings, &reference),
                Err(ApiError::BadRequest(_))
            )
        };

        assert!(reject(&[("occupations", "D1101"), ("lat", "north"), ("lon", "6.1")]));
        assert!(reject(&[("occupations", "D1101"), ("lat", "49.1")]));
        assert!(reject(&[("occupations", "D1101"), ("departments", "57"), ("headcount", "huge")]));
        assert!(reject(&[("occupations", "D1101"), ("departments", "57"), ("from", "30"), ("to", "10")]));
        assert!(reject(&[("occupations", "D1101"), ("departments", "57"), ("page_size", "500")]));
        assert!(reject(&[("occupations", "Z9999"), ("departments", "57")]));
        assert!(reject(&[("departments", "57")]));
    }
}
