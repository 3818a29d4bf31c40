use std::collections::HashSet;
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, Algorithm, Validation};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::claims::Claims;
use crate::config::VerificationPolicy;
use crate::error::{VerificationError, VerifyResult};
use crate::key_store::KeyLookup;

const RSA_ALGORITHMS: [Algorithm; 6] = [
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
];

#[derive(Debug, Deserialize)]
struct UnverifiedIssuer {
    #[serde(default)]
    iss: Option<Value>,
}

/// Verifies tokens against issuer keys resolved through a [`KeyLookup`].
#[derive(Clone)]
pub struct JwtVerifier {
    keys: Arc<dyn KeyLookup>,
    policy: VerificationPolicy,
}

impl JwtVerifier {
    pub fn new(keys: Arc<dyn KeyLookup>, policy: VerificationPolicy) -> Self {
        Self { keys, policy }
    }

    pub fn policy(&self) -> &VerificationPolicy {
        &self.policy
    }

    pub fn verify(&self, token: &str) -> VerifyResult<Claims> {
        self.verify_at(token, Utc::now())
    }

    /// Verify `token` as if the current time were `now`.
    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> VerifyResult<Claims> {
        let header = decode_header(token)
            .map_err(|err| VerificationError::MalformedToken(err.to_string()))?;

        // Only a hint for key selection until the signature checks out.
        let claimed_issuer = peek_issuer(token)?;

        let record = match self.keys.lookup(&claimed_issuer) {
            Ok(Some(record)) => record,
            Ok(None) => return Err(VerificationError::UnknownIssuer(claimed_issuer)),
            Err(err) => {
                warn!(issuer = %claimed_issuer, error = %err, "issuer key lookup failed, rejecting");
                return Err(VerificationError::UnknownIssuer(claimed_issuer));
            }
        };

        if !RSA_ALGORITHMS.contains(&header.alg) {
            return Err(VerificationError::InvalidSignature(format!(
                "algorithm {:?} is not accepted for RSA issuer keys",
                header.alg
            )));
        }

        let mut validation = Validation::new(header.alg);
        // Lifetime is enforced below against `now`, without the library's leeway.
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims = HashSet::from(["iss".to_string()]);
        validation.set_issuer(&[claimed_issuer.as_str()]);

        let data = decode::<Value>(token, record.decoding_key(), &validation)
            .map_err(map_decode_error)?;
        let claims = Claims::try_from(data.claims)?;

        self.check_lifetime(&claims, now)?;

        debug!(issuer = %claims.issuer, "verified token");
        Ok(claims)
    }

    fn check_lifetime(&self, claims: &Claims, now: DateTime<Utc>) -> VerifyResult<()> {
        let exp = claims.expires_at_unix();
        let now = now.timestamp();
        let leeway = i64::try_from(self.policy.leeway.as_secs()).unwrap_or(i64::MAX);
        if exp.saturating_add(leeway) <= now {
            return Err(VerificationError::TokenExpired { expires_at: exp });
        }

        let max_secs = i64::try_from(self.policy.max_expiration_interval.as_secs()).unwrap_or(i64::MAX);
        let remaining_secs = exp - now;
        if remaining_secs > max_secs {
            return Err(VerificationError::ExpirationTooFar {
                remaining_secs,
                max_secs,
            });
        }
        Ok(())
    }
}

/// Read `iss` from the payload segment without checking the signature.
fn peek_issuer(token: &str) -> VerifyResult<String> {
    let mut segments = token.split('.');
    let (Some(_), Some(payload), Some(signature), None) =
        (segments.next(), segments.next(), segments.next(), segments.next())
    else {
        return Err(VerificationError::MalformedToken(
            "expected three dot-separated segments".into(),
        ));
    };
    if payload.is_empty() || signature.is_empty() {
        return Err(VerificationError::MalformedToken("empty token segment".into()));
    }

    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|err| VerificationError::MalformedToken(format!("payload encoding: {err}")))?;
    let unverified: UnverifiedIssuer = serde_json::from_slice(&bytes)
        .map_err(|err| VerificationError::MalformedToken(format!("payload json: {err}")))?;

    match unverified.iss {
        Some(Value::String(issuer)) if !issuer.is_empty() => Ok(issuer),
        _ => Err(VerificationError::MalformedToken("missing issuer".into())),
    }
}

fn map_decode_error(err: jsonwebtoken::errors::Error) -> VerificationError {
    match err.kind() {
        ErrorKind::InvalidToken
        | ErrorKind::Json(_)
        | ErrorKind::Utf8(_)
        | ErrorKind::MissingRequiredClaim(_) => VerificationError::MalformedToken(err.to_string()),
        // Signature bytes, key/algorithm mismatch and crypto failures.
        _ => VerificationError::InvalidSignature(err.to_string()),
    }
}
