use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use strum::{AsRefStr, Display, EnumString};
use tracing::warn;

use super::settings::SearchSettings;
use super::SearchError;
use crate::reference::ReferenceData;
use crate::GeoPoint;

static OCCUPATION_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-N][0-9]{4}$").expect("valid occupation code regex"));
static DEPARTMENT_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([0-9]{2}|2[AB]|9[78][0-9])$").expect("valid department regex"));

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, EnumString, AsRefStr, Display)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub enum SortMode {
    /// Max score × daily shuffle, boosts first.
    #[default]
    #[strum(to_string = "blended", serialize = "smart")]
    Blended,
    Distance,
    Score,
}

impl SortMode {
    /// Unknown or empty values fall back to the default mode.
    pub fn parse_or_default(raw: Option<&str>) -> Self {
        match raw.map(str::trim).filter(|raw| !raw.is_empty()) {
            None => Self::default(),
            Some(raw) => Self::from_str(raw).unwrap_or_else(|_| {
                warn!(sort = raw, "unknown sort mode, using default");
                Self::default()
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, EnumString, AsRefStr, Display)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub enum SizeFilter {
    #[default]
    Any,
    Small,
    Big,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, EnumString, AsRefStr, Display)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub enum AudienceFilter {
    #[default]
    #[strum(to_string = "all", serialize = "none")]
    All,
    Junior,
    Senior,
    #[strum(to_string = "handicap", serialize = "disability")]
    Handicap,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, EnumString, AsRefStr, Display)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub enum HiringType {
    #[default]
    #[strum(to_string = "standard", serialize = "dpae")]
    Standard,
    #[strum(to_string = "apprenticeship", serialize = "alternance")]
    Apprenticeship,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, EnumString, AsRefStr, Display)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub enum CampaignFilter {
    ApprenticeshipOnly,
    ImmersionOnly,
}

/// Parses a query-string value into one of the criteria enums.
pub fn parse_choice<T: FromStr>(name: &str, raw: &str) -> Result<T, SearchError> {
    T::from_str(raw.trim())
        .map_err(|_| SearchError::invalid(format!("unrecognized {name} `{raw}`")))
}

/// 1-based inclusive result window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageWindow {
    from: usize,
    to: usize,
}

impl PageWindow {
    pub fn new(from: usize, to: usize, max_page_size: usize) -> Result<Self, SearchError> {
        if from == 0 {
            return Err(SearchError::invalid("`from` starts at 1"));
        }
        if to < from {
            return Err(SearchError::invalid(format!("`to` ({to}) is before `from` ({from})")));
        }
        let window = Self { from, to };
        if window.size() > max_page_size {
            return Err(SearchError::invalid(format!(
                "page size {} exceeds {max_page_size}",
                window.size()
            )));
        }
        Ok(window)
    }

    pub fn first_page(page_size: usize) -> Self {
        Self {
            from: 1,
            to: page_size.max(1),
        }
    }

    pub fn from(&self) -> usize {
        self.from
    }

    pub fn to(&self) -> usize {
        self.to
    }

    pub fn size(&self) -> usize {
        self.to - self.from + 1
    }

    pub fn offset(&self) -> usize {
        self.from - 1
    }

    pub(crate) fn with_to(self, to: usize) -> Self {
        Self {
            from: self.from,
            to: to.max(self.from),
        }
    }
}

/// Which histograms to compute alongside the results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FacetRequest {
    pub industry: bool,
    pub size: bool,
    pub distance: bool,
}

impl FacetRequest {
    pub fn all() -> Self {
        Self {
            industry: true,
            size: true,
            distance: true,
        }
    }

    pub fn any(&self) -> bool {
        self.industry || self.size || self.distance
    }
}

/// Validated, immutable search request. Built with [`SearchCriteriaBuilder`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchCriteria {
    origin: Option<GeoPoint>,
    departments: Vec<String>,
    occupation_codes: Vec<String>,
    distance_km: u32,
    size: SizeFilter,
    sort: SortMode,
    audience: AudienceFilter,
    hiring_type: HiringType,
    campaign: Option<CampaignFilter>,
    window: PageWindow,
    industry_codes: Vec<String>,
    facets: FacetRequest,
    suggestions: bool,
}

impl SearchCriteria {
    pub fn origin(&self) -> Option<GeoPoint> {
        self.origin
    }

    pub fn departments(&self) -> &[String] {
        &self.departments
    }

    pub fn occupation_codes(&self) -> &[String] {
        &self.occupation_codes
    }

    pub fn distance_km(&self) -> u32 {
        self.distance_km
    }

    pub fn size(&self) -> SizeFilter {
        self.size
    }

    pub fn sort(&self) -> SortMode {
        self.sort
    }

    pub fn audience(&self) -> AudienceFilter {
        self.audience
    }

    pub fn hiring_type(&self) -> HiringType {
        self.hiring_type
    }

    pub fn campaign(&self) -> Option<CampaignFilter> {
        self.campaign
    }

    pub fn window(&self) -> PageWindow {
        self.window
    }

    pub fn industry_codes(&self) -> &[String] {
        &self.industry_codes
    }

    pub fn facets(&self) -> FacetRequest {
        self.facets
    }

    pub fn suggestions(&self) -> bool {
        self.suggestions
    }

    pub(crate) fn with_occupation_codes(&self, codes: Vec<String>) -> Self {
        Self {
            occupation_codes: codes,
            ..self.clone()
        }
    }

    pub(crate) fn with_distance_km(&self, distance_km: u32) -> Self {
        Self {
            distance_km,
            ..self.clone()
        }
    }

    pub(crate) fn with_industry_codes(&self, industry_codes: Vec<String>) -> Self {
        Self {
            industry_codes,
            ..self.clone()
        }
    }

    pub(crate) fn with_size(&self, size: SizeFilter) -> Self {
        Self { size, ..self.clone() }
    }

    pub(crate) fn with_facets(&self, facets: FacetRequest) -> Self {
        Self {
            facets,
            ..self.clone()
        }
    }

    pub(crate) fn with_window(&self, window: PageWindow) -> Self {
        Self {
            window,
            ..self.clone()
        }
    }
}

/// Collects raw request values; [`build`](Self::build) validates them
/// against the settings and reference tables.
#[derive(Debug, Clone)]
pub struct SearchCriteriaBuilder<'a> {
    settings: &'a SearchSettings,
    reference: &'a ReferenceData,
    origin: Option<(f64, f64)>,
    departments: Vec<String>,
    occupation_codes: Vec<String>,
    distance_km: Option<u32>,
    size: SizeFilter,
    sort: SortMode,
    audience: AudienceFilter,
    hiring_type: HiringType,
    campaign: Option<CampaignFilter>,
    window: Option<(usize, usize)>,
    industry_codes: Vec<String>,
    facets: FacetRequest,
    suggestions: bool,
}

impl<'a> SearchCriteriaBuilder<'a> {
    pub fn new(settings: &'a SearchSettings, reference: &'a ReferenceData) -> Self {
        Self {
            settings,
            reference,
            origin: None,
            departments: Vec::new(),
            occupation_codes: Vec::new(),
            distance_km: None,
            size: SizeFilter::default(),
            sort: SortMode::default(),
            audience: AudienceFilter::default(),
            hiring_type: HiringType::default(),
            campaign: None,
            window: None,
            industry_codes: Vec::new(),
            facets: FacetRequest::default(),
            suggestions: false,
        }
    }

    pub fn origin(mut self, lat: f64, lon: f64) -> Self {
        self.origin = Some((lat, lon));
        self
    }

    pub fn departments<I, S>(mut self, departments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.departments = departments.into_iter().map(Into::into).collect();
        self
    }

    pub fn occupation_codes<I, S>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.occupation_codes = codes.into_iter().map(Into::into).collect();
        self
    }

    pub fn distance_km(mut self, distance_km: u32) -> Self {
        self.distance_km = Some(distance_km);
        self
    }

    pub fn size(mut self, size: SizeFilter) -> Self {
        self.size = size;
        self
    }

    pub fn sort(mut self, sort: SortMode) -> Self {
        self.sort = sort;
        self
    }

    pub fn audience(mut self, audience: AudienceFilter) -> Self {
        self.audience = audience;
        self
    }

    pub fn hiring_type(mut self, hiring_type: HiringType) -> Self {
        self.hiring_type = hiring_type;
        self
    }

    pub fn campaign(mut self, campaign: Option<CampaignFilter>) -> Self {
        self.campaign = campaign;
        self
    }

    pub fn window(mut self, from: usize, to: usize) -> Self {
        self.window = Some((from, to));
        self
    }

    pub fn industry_codes<I, S>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.industry_codes = codes.into_iter().map(Into::into).collect();
        self
    }

    pub fn facets(mut self, facets: FacetRequest) -> Self {
        self.facets = facets;
        self
    }

    pub fn suggestions(mut self, suggestions: bool) -> Self {
        self.suggestions = suggestions;
        self
    }

    pub fn build(self) -> Result<SearchCriteria, SearchError> {
        let occupation_codes = self.validated_occupations()?;
        let departments = self.validated_departments()?;
        let industry_codes = self.validated_industries()?;

        let origin = match self.origin {
            Some((lat, lon)) => {
                let point = GeoPoint::new(lat, lon);
                if !point.is_valid() {
                    return Err(SearchError::invalid(format!("invalid coordinates ({lat}, {lon})")));
                }
                Some(point)
            }
            None => None,
        };
        if origin.is_none() && departments.is_empty() {
            return Err(SearchError::invalid("either coordinates or departments are required"));
        }

        let distance_km = self.distance_km.unwrap_or(self.settings.default_distance_km);
        if distance_km == 0 || distance_km > self.settings.max_distance_km {
            return Err(SearchError::invalid(format!(
                "distance must be within 1..={} km",
                self.settings.max_distance_km
            )));
        }

        let window = match self.window {
            Some((from, to)) => PageWindow::new(from, to, self.settings.max_page_size)?,
            None => PageWindow::first_page(self.settings.default_page_size),
        };

        Ok(SearchCriteria {
            origin,
            departments,
            occupation_codes,
            distance_km,
            size: self.size,
            sort: self.sort,
            audience: self.audience,
            hiring_type: self.hiring_type,
            campaign: self.campaign,
            window,
            industry_codes,
            facets: self.facets,
            suggestions: self.suggestions,
        })
    }

    fn validated_occupations(&self) -> Result<Vec<String>, SearchError> {
        let mut codes: Vec<String> = Vec::with_capacity(self.occupation_codes.len());
        for raw in &self.occupation_codes {
            let code = raw.trim().to_ascii_uppercase();
            if !OCCUPATION_CODE.is_match(&code) {
                return Err(SearchError::invalid(format!("malformed occupation code `{raw}`")));
            }
            if !self.reference.knows_occupation(&code) {
                return Err(SearchError::invalid(format!("unknown occupation code `{code}`")));
            }
            if !codes.contains(&code) {
                codes.push(code);
            }
        }
        if codes.is_empty() {
            return Err(SearchError::invalid("at least one occupation code is required"));
        }
        Ok(codes)
    }

    fn validated_departments(&self) -> Result<Vec<String>, SearchError> {
        let mut departments: Vec<String> = Vec::with_capacity(self.departments.len());
        for raw in &self.departments {
            let department = raw.trim().to_ascii_uppercase();
            if !DEPARTMENT_CODE.is_match(&department) {
                return Err(SearchError::invalid(format!("unrecognized department `{raw}`")));
            }
            if !departments.contains(&department) {
                departments.push(department);
            }
        }
        Ok(departments)
    }

    fn validated_industries(&self) -> Result<Vec<String>, SearchError> {
        let mut industries: Vec<String> = Vec::with_capacity(self.industry_codes.len());
        for raw in &self.industry_codes {
            let code = raw.trim().to_ascii_uppercase();
            if !self.reference.knows_industry(&code) {
                return Err(SearchError::invalid(format!("unknown industry code `{raw}`")));
            }
            if !industries.contains(&code) {
                industries.push(code);
            }
        }
        Ok(industries)
    }
}
