use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;

use hm_common::db::fetch_company;
use hm_common::reference::headcount_label;
use hm_common::Company;

use crate::error::ApiError;
use crate::SharedState;

#[derive(Debug, Clone, Serialize)]
pub struct CompanyDetail {
    #[serde(flatten)]
    pub company: Company,
    pub display_name: String,
    pub industry_label: Option<String>,
    pub size_label: Option<&'static str>,
}

fn validate_siret(raw: &str) -> Result<&str, ApiError> {
    let siret = raw.trim();
    if siret.len() == 14 && siret.bytes().all(|b| b.is_ascii_digit()) {
        Ok(siret)
    } else {
        Err(ApiError::BadRequest("siret must be 14 digits".into()))
    }
}

pub async fn get_company(
    State(state): State<SharedState>,
    Path(siret): Path<String>,
) -> Result<Json<CompanyDetail>, ApiError> {
    let siret = validate_siret(&siret)?;
    let company = fetch_company(&state.pool, siret)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("company {siret} not found")))?;

    Ok(Json(CompanyDetail {
        display_name: company.display_name().to_string(),
        industry_label: state.reference.industry_label(&company.industry_code).map(String::from),
        size_label: headcount_label(company.size_code),
        company,
    }))
}
