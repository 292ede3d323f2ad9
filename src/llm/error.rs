//! Typed errors for backend operations
//!
//! Lets callers tell failure modes apart (auth, quota, missing image, ...)
//! without string matching.

use thiserror::Error;

/// Backend operation errors
///
/// - `Unauthorized` (401/403) - API key missing or rejected
/// - `RateLimited` (429) - quota exceeded
/// - `BadRequest` (400) - malformed request
/// - `ServiceError` (5xx) - server-side issue
/// - `Network` - connection/timeout
/// - `NoImageReturned` - an image was required but the response had none
/// - `Other` - catch-all
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The inner string may contain the quota reset hint if the API gave one.
    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Service error: {0}")]
    ServiceError(String),

    #[error("Network error: {0}")]
    Network(String),

    /// Image generation or editing finished without an image part.
    #[error("The backend returned no image")]
    NoImageReturned,

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl LlmError {
    /// Convert HTTP status code and error body into a typed error
    pub fn from_http_status(status: reqwest::StatusCode, error_text: String) -> Self {
        match status.as_u16() {
            401 | 403 => LlmError::Unauthorized(error_text),
            429 => LlmError::RateLimited(error_text),
            400 => LlmError::BadRequest(error_text),
            500..=599 => LlmError::ServiceError(error_text),
            _ => LlmError::Other(anyhow::anyhow!("HTTP {}: {}", status, error_text)),
        }
    }

    /// Convert transport errors into a typed error
    pub fn from_network_error(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            LlmError::Network(format!("Request timeout: {}", e))
        } else if e.is_connect() {
            LlmError::Network(format!("Connection failed: {}", e))
        } else if let Some(status) = e.status() {
            let error_text = e.to_string();
            Self::from_http_status(status, error_text)
        } else {
            LlmError::Other(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_http_status() {
        let err = LlmError::from_http_status(
            reqwest::StatusCode::FORBIDDEN,
            "API key not valid".to_string(),
        );
        assert!(matches!(err, LlmError::Unauthorized(_)));

        let err = LlmError::from_http_status(
            reqwest::StatusCode::TOO_MANY_REQUESTS,
            "RESOURCE_EXHAUSTED".to_string(),
        );
        assert!(matches!(err, LlmError::RateLimited(_)));

        let err = LlmError::from_http_status(
            reqwest::StatusCode::BAD_REQUEST,
            "Search tool is not supported with file input".to_string(),
        );
        assert!(matches!(err, LlmError::BadRequest(_)));

        let err = LlmError::from_http_status(
            reqwest::StatusCode::SERVICE_UNAVAILABLE,
            "overloaded".to_string(),
        );
        assert!(matches!(err, LlmError::ServiceError(_)));

        let err = LlmError::from_http_status(reqwest::StatusCode::IM_A_TEAPOT, String::new());
        assert!(matches!(err, LlmError::Other(_)));
    }

    #[test]
    fn test_no_image_message() {
        let err = LlmError::NoImageReturned;
        assert_eq!(err.to_string(), "The backend returned no image");
    }

    #[test]
    fn test_convert_to_anyhow() {
        let anyhow_err: anyhow::Error = LlmError::Network("reset".to_string()).into();
        assert!(anyhow_err.to_string().contains("Network error"));
    }
}
