//! Catalog download collaborator.
//!
//! Fetches element sets from the public catalog service as TLE text; the
//! response body feeds the same ingestion pipeline as a file import.

use std::time::Duration;

use tracing::info;

use crate::error::TrackerError;

/// Catalog query field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchField {
    CatNr,
    IntDes,
    Group,
    Name,
}

impl SearchField {
    pub fn query_key(&self) -> &'static str {
        match self {
            SearchField::CatNr => "CATNR",
            SearchField::IntDes => "INTDES",
            SearchField::Group => "GROUP",
            SearchField::Name => "NAME",
        }
    }
}

/// Boundary check applied before any HTTP request is made.
pub fn validate_term(term: &str) -> Result<(), TrackerError> {
    if term.trim().is_empty() {
        return Err(TrackerError::Validation(
            "search term must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// GET the catalog endpoint and return the TLE text body.
///
/// Transport failures and non-success statuses surface as connectivity
/// errors and leave all local state untouched; there is no automatic
/// retry.
pub async fn fetch_tle(
    base_url: &str,
    field: SearchField,
    term: &str,
) -> Result<String, TrackerError> {
    validate_term(term)?;

    info!(
        "downloading element sets: {}={} from {}",
        field.query_key(),
        term,
        base_url
    );

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| TrackerError::Connectivity(format!("failed to create HTTP client: {}", e)))?;

    let response = client
        .get(base_url)
        .query(&[(field.query_key(), term), ("FORMAT", "TLE")])
        .send()
        .await
        .map_err(|e| TrackerError::Connectivity(format!("download failed: {}", e)))?;

    if !response.status().is_success() {
        return Err(TrackerError::Connectivity(format!(
            "catalog returned status {}",
            response.status()
        )));
    }

    response
        .text()
        .await
        .map_err(|e| TrackerError::Connectivity(format!("failed to read response body: {}", e)))
}
