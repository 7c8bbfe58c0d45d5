pub mod clock;
pub mod db;
pub mod index;
pub mod logging;
pub mod mapping;
pub mod reference;
pub mod scoring;
pub mod search;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

const EARTH_RADIUS_KM: f64 = 6_371.0;

/// WGS84 coordinates in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }

    /// Great-circle (haversine) distance in kilometres.
    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        let d_lat = (other.lat - self.lat).to_radians();
        let d_lon = (other.lon - self.lon).to_radians();
        let a = (d_lat / 2.0).sin().powi(2)
            + self.lat.to_radians().cos() * other.lat.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudienceFlags {
    pub junior: bool,
    pub senior: bool,
    pub handicap: bool,
}

/// Index-side view of one company, replaced wholesale by each re-indexing run.
///
/// Per-occupation maps hold either bounded scores or raw hiring counts
/// depending on `ScoreRepresentation`. Occupations the company is not
/// eligible for are absent from the maps (a stored 0 is treated as absent).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompanyScoreEntry {
    pub siret: String,
    pub industry_code: String,
    pub size_code: u8,
    pub location: Option<GeoPoint>,
    pub department: String,
    pub score: u8,
    pub apprenticeship_score: u8,
    pub occupation_scores: BTreeMap<String, f64>,
    pub apprenticeship_occupation_scores: BTreeMap<String, f64>,
    pub boosted_occupations: BTreeSet<String>,
    pub boosted_apprenticeship_occupations: BTreeSet<String>,
    pub flags: AudienceFlags,
    pub apprenticeship_campaign: bool,
    pub immersion_campaign: bool,
    pub contact_mode: Option<String>,
}

/// System-of-record view of a company, joined onto index hits.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Company {
    pub siret: String,
    pub name: String,
    pub brand: Option<String>,
    pub industry_code: String,
    pub size_code: u8,
    pub city: String,
    pub zipcode: String,
    pub department: String,
    pub location: Option<GeoPoint>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub contact_mode: Option<String>,
    pub flags: AudienceFlags,
}

impl Company {
    /// Brand name when present, legal name otherwise.
    pub fn display_name(&self) -> &str {
        self.brand
            .as_deref()
            .filter(|brand| !brand.trim().is_empty())
            .unwrap_or(&self.name)
    }
}
