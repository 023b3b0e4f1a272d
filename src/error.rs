//! Crate-wide error taxonomy

/// Errors surfaced by the tracking core
#[derive(Debug, Clone)]
pub enum TrackerError {
    /// Catalog service unreachable or returned a non-success status
    Connectivity(String),
    /// Input rejected at the boundary, before touching the store
    Validation(String),
    /// Persistence layer failure
    Storage(String),
    /// Catalog id absent from the current registry
    NotFound(i64),
    /// Orbit model construction or evaluation failure
    Propagation(String),
    /// A background job of this kind is already running
    Busy(&'static str),
}

impl std::fmt::Display for TrackerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackerError::Connectivity(msg) => write!(f, "Connectivity error: {}", msg),
            TrackerError::Validation(msg) => write!(f, "Validation error: {}", msg),
            TrackerError::Storage(msg) => write!(f, "Storage error: {}", msg),
            TrackerError::NotFound(id) => write!(f, "Satellite {} not found", id),
            TrackerError::Propagation(msg) => write!(f, "Propagation error: {}", msg),
            TrackerError::Busy(kind) => write!(f, "A {} job is already running", kind),
        }
    }
}

impl std::error::Error for TrackerError {}

impl From<rusqlite::Error> for TrackerError {
    fn from(e: rusqlite::Error) -> Self {
        TrackerError::Storage(e.to_string())
    }
}
