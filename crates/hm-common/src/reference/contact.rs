use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub const DEFAULT_CONTACT_MODE: &str = "Envoyer un CV et une lettre de motivation";

/// How to approach companies of an industry prefix for an occupation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactModeRule {
    /// First two characters of the NAF code.
    pub industry_prefix: String,
    pub occupation_code: String,
    pub mode: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactModeTable {
    exact: HashMap<(String, String), String>,
    first_for_prefix: HashMap<String, String>,
}

impl ContactModeTable {
    /// Earlier rules win over later ones for both lookups.
    pub fn from_rules(rules: &[ContactModeRule]) -> Self {
        let mut table = Self::default();
        for rule in rules {
            let prefix = industry_prefix(&rule.industry_prefix).to_string();
            table
                .exact
                .entry((prefix.clone(), rule.occupation_code.clone()))
                .or_insert_with(|| rule.mode.clone());
            table
                .first_for_prefix
                .entry(prefix)
                .or_insert_with(|| rule.mode.clone());
        }
        table
    }

    /// Explicit company mode, then (prefix, occupation), then first rule of the
    /// prefix, then [`DEFAULT_CONTACT_MODE`].
    pub fn resolve<'a>(
        &'a self,
        explicit: Option<&'a str>,
        industry_code: &str,
        occupation_code: &str,
    ) -> &'a str {
        if let Some(mode) = explicit.map(str::trim).filter(|mode| !mode.is_empty()) {
            return mode;
        }

        let prefix = industry_prefix(industry_code);
        self.exact
            .get(&(prefix.to_string(), occupation_code.to_string()))
            .or_else(|| self.first_for_prefix.get(prefix))
            .map(String::as_str)
            .unwrap_or(DEFAULT_CONTACT_MODE)
    }

    pub fn len(&self) -> usize {
        self.exact.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty()
    }
}

fn industry_prefix(code: &str) -> &str {
    code.get(..2).unwrap_or(code)
}
