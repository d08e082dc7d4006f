// src/error.rs
// Crate-wide error type. Mirrors the CouchDB error shape from spec §7:
// { status, name, message, error: true }.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ViewError>;

#[derive(Debug, Error)]
pub enum ViewError {
    /// Inverted key range, or include_docs combined with an effective reduce.
    #[error("{0}")]
    QueryParseError(String),

    /// Missing design document or named view.
    #[error("{0}")]
    NotFound(String),

    /// Non-numeric input reached `_sum`/`_stats` at reduce time.
    #[error("{0}")]
    InvalidValue(String),

    /// Source DB or secondary store I/O failure (changes feed, get, bulkDocs).
    #[error("source I/O error: {0}")]
    SourceIo(String),

    /// User-supplied map/reduce source raised at evaluation time.
    #[error("map/reduce error: {0}")]
    MapReduce(String),

    /// On-disk secondary-store state failed an invariant check.
    #[error("index corruption: {0}")]
    Corruption(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ViewError {
    /// HTTP-style status code, per spec §7's taxonomy table.
    pub fn status(&self) -> u16 {
        match self {
            ViewError::QueryParseError(_) => 400,
            ViewError::NotFound(_) => 404,
            ViewError::InvalidValue(_) => 500,
            ViewError::SourceIo(_) => 500,
            ViewError::MapReduce(_) => 500,
            ViewError::Corruption(_) => 500,
            ViewError::Json(_) => 500,
        }
    }

    /// Canonical error name, as surfaced to callers alongside `status`.
    pub fn name(&self) -> &'static str {
        match self {
            ViewError::QueryParseError(_) => "query_parse_error",
            ViewError::NotFound(_) => "not_found",
            ViewError::InvalidValue(_) => "invalid_value",
            ViewError::SourceIo(_) => "source_error",
            ViewError::MapReduce(_) => "map_reduce_error",
            ViewError::Corruption(_) => "corruption",
            ViewError::Json(_) => "serialization_error",
        }
    }

    /// The `{status, name, message, error: true}` wire shape from spec §6.
    pub fn to_error_value(&self) -> serde_json::Value {
        serde_json::json!({
            "status": self.status(),
            "name": self.name(),
            "message": self.to_string(),
            "error": true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_parse_error_is_400() {
        let e = ViewError::QueryParseError("startkey > endkey".into());
        assert_eq!(e.status(), 400);
        assert_eq!(e.name(), "query_parse_error");
    }

    #[test]
    fn not_found_is_404() {
        let e = ViewError::NotFound("design/foo/view/bar".into());
        assert_eq!(e.status(), 404);
    }

    #[test]
    fn error_value_has_error_true() {
        let e = ViewError::InvalidValue("non-numeric sum input".into());
        let v = e.to_error_value();
        assert_eq!(v["error"], serde_json::Value::Bool(true));
        assert_eq!(v["status"], 500);
        assert_eq!(v["name"], "invalid_value");
    }
}
