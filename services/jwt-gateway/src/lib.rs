//! JWT gateway filter.
//!
//! Reads a signed token from a configurable request header, resolves the
//! issuer's RSA public key from a refreshed key store, verifies signature and
//! lifetime, and forwards the request with the verified issuer in `x-app-id`.
//! Every failure is answered with the same 403.

pub mod claims;
pub mod config;
pub mod error;
pub mod filter;
pub mod key_source;
pub mod key_store;
pub mod metrics;
pub mod verifier;

#[cfg(test)]
mod test_keys;

pub use claims::Claims;
pub use config::{GatewayConfig, KeySourceLocation, VerificationPolicy, APP_ID_HEADER};
pub use error::{KeyStoreError, VerificationError, VerifyResult, FORBIDDEN_BODY};
pub use filter::{jwt_filter_middleware, ClaimsExt, FilterOutcome, JwtFilter};
pub use key_source::{
    parse_key_document, spawn_key_refresh, start_key_store, FileKeySource, HttpKeySource, KeySource,
};
pub use key_store::{split_path, KeyLookup, KeyRecord, SnapshotKeyStore};
pub use metrics::FilterMetrics;
pub use verifier::JwtVerifier;
