//! Static reference tables shared read-only by every request.

pub mod contact;
pub mod headcount;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::mapping::{
    parse_pairs_csv, MappingError, OccupationIndustryMapping, OccupationIndustryPair,
    SimplifyConfig,
};

pub use contact::{ContactModeRule, ContactModeTable, DEFAULT_CONTACT_MODE};
pub use headcount::{headcount_label, parse_headcount_code};

#[derive(Debug, Error)]
pub enum ReferenceDataError {
    #[error("cannot read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid reference bundle: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid occupation/industry pairs: {0}")]
    Pairs(#[from] MappingError),
    #[error("reference bundle has no occupation/industry pairs")]
    NoPairs,
}

/// On-disk JSON layout of the reference data.
///
/// Pairs are given inline or as a CSV file resolved relative to the bundle.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReferenceBundle {
    pub occupations: HashMap<String, String>,
    pub industries: HashMap<String, String>,
    pub pairs: Vec<OccupationIndustryPair>,
    pub pairs_csv: Option<PathBuf>,
    pub contact_modes: Vec<ContactModeRule>,
    /// Occupation code prefixes whose links survive simplification.
    pub protected_prefixes: Vec<String>,
}

impl ReferenceBundle {
    pub fn from_json_str(raw: &str) -> Result<Self, ReferenceDataError> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Labels, the simplified occupation/industry mapping and contact rules.
/// Built once at startup and shared behind an `Arc`.
#[derive(Debug, Clone, Default)]
pub struct ReferenceData {
    occupation_labels: HashMap<String, String>,
    industry_labels: HashMap<String, String>,
    mapping: OccupationIndustryMapping,
    contact_modes: ContactModeTable,
}

impl ReferenceData {
    pub fn new(
        occupation_labels: HashMap<String, String>,
        industry_labels: HashMap<String, String>,
        mapping: OccupationIndustryMapping,
        contact_modes: ContactModeTable,
    ) -> Self {
        Self {
            occupation_labels,
            industry_labels,
            mapping,
            contact_modes,
        }
    }

    /// Simplifies the bundle's pairs and assembles the tables. `base_dir`
    /// resolves a relative `pairs_csv`.
    pub fn from_bundle(
        bundle: ReferenceBundle,
        base_dir: Option<&Path>,
        simplify: &SimplifyConfig,
    ) -> Result<Self, ReferenceDataError> {
        let mut pairs = bundle.pairs;
        if let Some(csv) = bundle.pairs_csv {
            let path = match base_dir {
                Some(dir) if csv.is_relative() => dir.join(csv),
                _ => csv,
            };
            let text = std::fs::read_to_string(&path)
                .map_err(|source| ReferenceDataError::Io { path, source })?;
            pairs.extend(parse_pairs_csv(&text)?);
        }
        if pairs.is_empty() {
            return Err(ReferenceDataError::NoPairs);
        }

        let simplify = simplify.clone().with_protected_prefixes(&bundle.protected_prefixes);
        let (mapping, _) = OccupationIndustryMapping::simplified(&pairs, &simplify);
        Ok(Self::new(
            bundle.occupations,
            bundle.industries,
            mapping,
            ContactModeTable::from_rules(&bundle.contact_modes),
        ))
    }

    pub fn occupation_label(&self, code: &str) -> Option<&str> {
        self.occupation_labels.get(code).map(String::as_str)
    }

    pub fn industry_label(&self, code: &str) -> Option<&str> {
        self.industry_labels.get(code).map(String::as_str)
    }

    /// Known either by label or by having mapped industries.
    pub fn knows_occupation(&self, code: &str) -> bool {
        self.occupation_labels.contains_key(code) || self.mapping.knows_occupation(code)
    }

    pub fn knows_industry(&self, code: &str) -> bool {
        self.industry_labels.contains_key(code)
    }

    pub fn mapping(&self) -> &OccupationIndustryMapping {
        &self.mapping
    }

    pub fn contact_modes(&self) -> &ContactModeTable {
        &self.contact_modes
    }
}

/// Reads and assembles the bundle at `path`.
pub fn load_reference_file(
    path: &Path,
    simplify: &SimplifyConfig,
) -> Result<Arc<ReferenceData>, ReferenceDataError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ReferenceDataError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let bundle = ReferenceBundle::from_json_str(&raw)?;
    let data = ReferenceData::from_bundle(bundle, path.parent(), simplify)?;

    info!(
        path = %path.display(),
        occupations = data.occupation_labels.len(),
        industries = data.industry_labels.len(),
        links = data.mapping.link_count(),
        contact_rules = data.contact_modes.len(),
        "reference data loaded"
    );
    Ok(Arc::new(data))
}
