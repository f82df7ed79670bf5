//! Error kinds shared across the engine and its HTTP edge.
//!
//! Each variant names the HTTP status it maps to at the edge; the mapping
//! itself lives in `agentctld::server` so the status/body pairing exists
//! in exactly one place.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("authentication error")]
    Auth,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("repository not found: {0}")]
    RepoNotFound(String),
    #[error("provisioning failed: {0}")]
    Provisioning(String),
    #[error("sequence error: {0}")]
    Sequence(String),
    #[error("overloaded: {0}")]
    Overload(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// The HTTP status code this error kind maps to at the edge.
    pub fn status_code(&self) -> u16 {
        match self {
            EngineError::Validation(_) => 400,
            EngineError::Sequence(_) => 400,
            EngineError::Auth => 401,
            EngineError::NotFound(_) | EngineError::RepoNotFound(_) => 404,
            EngineError::Conflict(_) => 409,
            EngineError::Overload(_) => 503,
            EngineError::Timeout(_) => 504,
            EngineError::Provisioning(_) | EngineError::Internal(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_error_handling_design() {
        assert_eq!(EngineError::Validation("x".into()).status_code(), 400);
        assert_eq!(EngineError::Auth.status_code(), 401);
        assert_eq!(EngineError::NotFound("x".into()).status_code(), 404);
        assert_eq!(EngineError::Conflict("x".into()).status_code(), 409);
        assert_eq!(EngineError::Timeout("x".into()).status_code(), 504);
        assert_eq!(EngineError::Overload("x".into()).status_code(), 503);
        assert_eq!(EngineError::Provisioning("x".into()).status_code(), 500);
        assert_eq!(EngineError::Internal("x".into()).status_code(), 500);
    }
}
