use crate::error::ApiError;

/// Highest page number accepted before the window overflows.
const MAX_PAGE: usize = 10_000;

fn parse_positive(name: &str, raw: Option<&str>) -> Result<Option<usize>, ApiError> {
    match raw.map(str::trim).filter(|raw| !raw.is_empty()) {
        None => Ok(None),
        Some(raw) => match raw.parse::<usize>() {
            Ok(value) if value > 0 => Ok(Some(value)),
            _ => Err(ApiError::BadRequest(format!("{name} must be a positive integer"))),
        },
    }
}

/// Resolves the 1-based `(from, to)` window from either `from`/`to` or
/// `page`/`page_size`. `None` means the default first page.
pub fn resolve_window(
    from: Option<&str>,
    to: Option<&str>,
    page: Option<&str>,
    page_size: Option<&str>,
    default_page_size: usize,
) -> Result<Option<(usize, usize)>, ApiError> {
    let from = parse_positive("from", from)?;
    let to = parse_positive("to", to)?;
    let page = parse_positive("page", page)?;
    let page_size = parse_positive("page_size", page_size)?;

    match (from, to) {
        (Some(from), Some(to)) => return Ok(Some((from, to))),
        (Some(_), None) | (None, Some(_)) => {
            return Err(ApiError::BadRequest("from and to must be given together".into()))
        }
        (None, None) => {}
    }

    if page.is_none() && page_size.is_none() {
        return Ok(None);
    }
    let page = page.unwrap_or(1);
    if page > MAX_PAGE {
        return Err(ApiError::BadRequest(format!("page must be at most {MAX_PAGE}")));
    }
    let size = page_size.unwrap_or(default_page_size);
    let to = page
        .checked_mul(size)
        .ok_or_else(|| ApiError::BadRequest("page_size is too large".into()))?;
    Ok(Some((to - size + 1, to)))
}
