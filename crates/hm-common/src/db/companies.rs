use std::collections::HashMap;
use std::time::Instant;

use tokio_postgres::Row;
use tracing::{instrument, warn};

use super::util::TimedClientExt;
use super::PgPool;
use crate::index::{RecordStore, StoreError};
use crate::logging::log_if_slow;
use crate::reference::parse_headcount_code;
use crate::{AudienceFlags, Company, GeoPoint};

const SELECT_BY_IDS: &str = "SELECT siret, raisonsociale, enseigne, codenaf, trancheeffectif, ville, codepostal, \
     departement, coordinates_y, coordinates_x, email, tel, website, contact_mode, \
     flag_junior, flag_senior, flag_handicap \
     FROM etablissements WHERE siret = ANY($1)";

const SELECT_ONE: &str = "SELECT siret, raisonsociale, enseigne, codenaf, trancheeffectif, ville, codepostal, \
     departement, coordinates_y, coordinates_x, email, tel, website, contact_mode, \
     flag_junior, flag_senior, flag_handicap \
     FROM etablissements WHERE siret = $1";

fn location_from(lat: Option<f64>, lon: Option<f64>) -> Option<GeoPoint> {
    let point = GeoPoint::new(lat?, lon?);
    point.is_valid().then_some(point)
}

/// Blank strings in the legacy table mean "not provided".
fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn size_code_from(siret: &str, raw: Option<&str>) -> u8 {
    match raw.map(str::trim).filter(|raw| !raw.is_empty()) {
        None => 0,
        Some(raw) => parse_headcount_code(raw).unwrap_or_else(|| {
            warn!(siret, headcount = raw, "unknown headcount code, treated as 0");
            0
        }),
    }
}

fn company_from_row(row: &Row) -> Result<Company, StoreError> {
    let get_err = |e: tokio_postgres::Error| StoreError::Mapping(e.to_string());

    let siret: String = row.try_get("siret").map_err(get_err)?;
    let headcount: Option<String> = row.try_get("trancheeffectif").map_err(get_err)?;
    let flag = |column: &str| -> Result<bool, StoreError> {
        Ok(row.try_get::<_, Option<bool>>(column).map_err(get_err)?.unwrap_or(false))
    };

    Ok(Company {
        size_code: size_code_from(&siret, headcount.as_deref()),
        name: row.try_get("raisonsociale").map_err(get_err)?,
        brand: non_blank(row.try_get("enseigne").map_err(get_err)?),
        industry_code: row.try_get("codenaf").map_err(get_err)?,
        city: row.try_get::<_, Option<String>>("ville").map_err(get_err)?.unwrap_or_default(),
        zipcode: row.try_get::<_, Option<String>>("codepostal").map_err(get_err)?.unwrap_or_default(),
        department: row.try_get::<_, Option<String>>("departement").map_err(get_err)?.unwrap_or_default(),
        location: location_from(
            row.try_get("coordinates_y").map_err(get_err)?,
            row.try_get("coordinates_x").map_err(get_err)?,
        ),
        email: non_blank(row.try_get("email").map_err(get_err)?),
        phone: non_blank(row.try_get("tel").map_err(get_err)?),
        website: non_blank(row.try_get("website").map_err(get_err)?),
        contact_mode: non_blank(row.try_get("contact_mode").map_err(get_err)?),
        flags: AudienceFlags {
            junior: flag("flag_junior")?,
            senior: flag("flag_senior")?,
            handicap: flag("flag_handicap")?,
        },
        siret,
    })
}

impl RecordStore for PgPool {
    #[instrument(skip_all, fields(ids = ids.len()))]
    async fn fetch_by_ids(&self, ids: &[String]) -> Result<HashMap<String, Company>, StoreError> {
        let started = Instant::now();
        let client = self.get().await.map_err(|e| StoreError::Pool(e.to_string()))?;
        let rows = client
            .timed_query_cached(SELECT_BY_IDS, &[&ids], "companies.fetch_by_ids")
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        let companies = rows
            .iter()
            .map(|row| company_from_row(row).map(|company| (company.siret.clone(), company)))
            .collect::<Result<HashMap<_, _>, _>>()?;
        log_if_slow("store.fetch_by_ids", started);
        Ok(companies)
    }
}

/// Single company by SIRET, `None` when unknown.
#[instrument(skip(pool))]
pub async fn fetch_company(pool: &PgPool, siret: &str) -> Result<Option<Company>, StoreError> {
    let client = pool.get().await.map_err(|e| StoreError::Pool(e.to_string()))?;
    let row = client
        .timed_query_opt_cached(SELECT_ONE, &[&siret], "companies.fetch_company")
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;
    row.as_ref().map(company_from_row).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_requires_both_valid_coordinates() {
        assert_eq!(location_from(Some(49.1), Some(6.2)), Some(GeoPoint::new(49.1, 6.2)));
        assert_eq!(location_from(None, Some(6.2)), None);
        assert_eq!(location_from(Some(149.1), Some(6.2)), None);
    }

    #[test]
    fn blank_columns_become_none() {
        assert_eq!(non_blank(Some("  ".into())), None);
        assert_eq!(non_blank(Some("contact@example.fr".into())).as_deref(), Some("contact@example.fr"));
    }

    #[test]
    fn headcount_codes_tolerate_legacy_formats() {
        assert_eq!(size_code_from("1", Some("21")), 21);
        assert_eq!(size_code_from("1", Some("NN")), 0);
        assert_eq!(size_code_from("1", None), 0);
    }
}
