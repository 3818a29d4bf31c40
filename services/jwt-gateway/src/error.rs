use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Body returned for every rejected request, whatever check failed.
pub const FORBIDDEN_BODY: &str = "forbidden: token is invalid";

pub type VerifyResult<T> = Result<T, VerificationError>;
pub type KeyStoreResult<T> = Result<T, KeyStoreError>;

/// Reasons a presented token is refused. All of them collapse to the same
/// 403 response; the variant only shows up in logs and metrics.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VerificationError {
    #[error("malformed token: {0}")]
    MalformedToken(String),
    #[error("no public key registered for issuer '{0}'")]
    UnknownIssuer(String),
    #[error("signature verification failed: {0}")]
    InvalidSignature(String),
    #[error("token expired at {expires_at}")]
    TokenExpired { expires_at: i64 },
    #[error("token expires in {remaining_secs}s, policy allows at most {max_secs}s")]
    ExpirationTooFar { remaining_secs: i64, max_secs: i64 },
}

impl VerificationError {
    /// Stable label used for log fields and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            VerificationError::MalformedToken(_) => "malformed_token",
            VerificationError::UnknownIssuer(_) => "unknown_issuer",
            VerificationError::InvalidSignature(_) => "invalid_signature",
            VerificationError::TokenExpired { .. } => "token_expired",
            VerificationError::ExpirationTooFar { .. } => "expiration_too_far",
        }
    }
}

impl IntoResponse for VerificationError {
    fn into_response(self) -> Response {
        forbidden()
    }
}

pub(crate) fn forbidden() -> Response {
    let mut response = (StatusCode::FORBIDDEN, FORBIDDEN_BODY).into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

/// Failures of the key store or the configuration source behind it.
#[derive(Debug, Error)]
pub enum KeyStoreError {
    #[error("failed to fetch key document: {0}")]
    Fetch(String),
    #[error("failed to read key document: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse key document: {0}")]
    Decode(String),
    #[error("namespace '{0}' not present in key document")]
    MissingNamespace(String),
    #[error("failed to parse public key for issuer '{0}': {1}")]
    KeyParse(String, String),
    #[error("key snapshot is stale (last refresh {age_secs}s ago)")]
    Stale { age_secs: i64 },
}

impl From<serde_json::Error> for KeyStoreError {
    fn from(value: serde_json::Error) -> Self {
        Self::Decode(value.to_string())
    }
}
