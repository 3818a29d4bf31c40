use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::HeaderValue;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::Router;
use tracing::{debug, warn};

use crate::claims::Claims;
use crate::config::{VerificationPolicy, APP_ID_HEADER};
use crate::error::{forbidden, VerificationError, VerifyResult};
use crate::key_store::KeyLookup;
use crate::metrics::FilterMetrics;
use crate::verifier::JwtVerifier;

/// What the filter decided for a request that was not rejected.
#[derive(Debug, Clone)]
pub enum FilterOutcome {
    /// Filter disabled; request untouched.
    Bypassed,
    /// Token verified; identity header set.
    Admitted(Claims),
}

/// Gateway stage that admits a request only when its token verifies.
#[derive(Clone)]
pub struct JwtFilter {
    verifier: JwtVerifier,
    metrics: Option<FilterMetrics>,
}

impl JwtFilter {
    pub fn new(policy: VerificationPolicy, keys: Arc<dyn KeyLookup>) -> Self {
        Self {
            verifier: JwtVerifier::new(keys, policy),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: FilterMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn policy(&self) -> &VerificationPolicy {
        self.verifier.policy()
    }

    pub fn verifier(&self) -> &JwtVerifier {
        &self.verifier
    }

    /// Run the filter against `request`, rewriting its identity header on success.
    ///
    /// A missing, empty or non-UTF-8 token header is verified as an empty token
    /// and fails like any other malformed token.
    pub fn admit<B>(&self, request: &mut Request<B>) -> VerifyResult<FilterOutcome> {
        let policy = self.verifier.policy();
        if !policy.enabled {
            if let Some(metrics) = &self.metrics {
                metrics.record_bypass();
            }
            return Ok(FilterOutcome::Bypassed);
        }

        let token = request
            .headers()
            .get(policy.header_key.as_str())
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();

        let result = self.verifier.verify(token).and_then(|claims| {
            let value = HeaderValue::from_str(&claims.issuer).map_err(|_| {
                VerificationError::MalformedToken("issuer is not a valid header value".into())
            })?;
            Ok((claims, value))
        });

        match result {
            Ok((claims, value)) => {
                // insert() drops every caller-supplied value for the header.
                request.headers_mut().insert(APP_ID_HEADER, value);
                request.extensions_mut().insert(claims.clone());
                if let Some(metrics) = &self.metrics {
                    metrics.record_admitted();
                }
                debug!(issuer = %claims.issuer, "request admitted");
                Ok(FilterOutcome::Admitted(claims))
            }
            Err(err) => {
                request.headers_mut().remove(APP_ID_HEADER);
                if let Some(metrics) = &self.metrics {
                    metrics.record_rejected(&err);
                }
                warn!(
                    kind = err.kind(),
                    error = %err,
                    header = %policy.header_key,
                    "failed to validate JWT"
                );
                Err(err)
            }
        }
    }

    /// Put the filter in front of every route of `router`.
    pub fn protect<S>(self: Arc<Self>, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        router.layer(middleware::from_fn_with_state(self, jwt_filter_middleware))
    }
}

/// axum middleware entry point, for use with
/// [`axum::middleware::from_fn_with_state`].
pub async fn jwt_filter_middleware(
    State(filter): State<Arc<JwtFilter>>,
    mut request: Request,
    next: Next,
) -> Response {
    match filter.admit(&mut request) {
        Ok(_) => next.run(request).await,
        Err(_) => forbidden(),
    }
}

/// Access verified claims from a request that passed the filter.
pub trait ClaimsExt {
    fn verified_claims(&self) -> Option<&Claims>;
}

impl<B> ClaimsExt for Request<B> {
    fn verified_claims(&self) -> Option<&Claims> {
        self.extensions().get::<Claims>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_store::SnapshotKeyStore;
    use crate::test_keys::{issue_token, KEY_A};
    use axum::body::Body;
    use chrono::Utc;
    use serde_json::json;

    fn filter(policy: VerificationPolicy) -> JwtFilter {
        let store = SnapshotKeyStore::new();
        store.insert_rsa_pem("app-1", &KEY_A.public_pem).unwrap();
        JwtFilter::new(policy, Arc::new(store))
    }

    fn request_with(headers: &[(&str, &str)]) -> Request<Body> {
        let mut builder = Request::builder().uri("/rpc");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(Body::empty()).unwrap()
    }

    fn valid_token() -> String {
        let exp = Utc::now().timestamp() + 120;
        issue_token(&KEY_A.encoding, json!({ "iss": "app-1", "exp": exp }))
    }

    #[test]
    fn disabled_filter_leaves_request_alone() {
        let filter = filter(VerificationPolicy::default());
        let mut request = request_with(&[(APP_ID_HEADER, "spoofed")]);
        let outcome = filter.admit(&mut request).unwrap();
        assert!(matches!(outcome, FilterOutcome::Bypassed));
        assert_eq!(request.headers().get(APP_ID_HEADER).unwrap(), "spoofed");
        assert!(request.verified_claims().is_none());
    }

    #[test]
    fn admitted_request_carries_verified_issuer() {
        let filter = filter(VerificationPolicy::enabled());
        let token = valid_token();
        let mut request = request_with(&[("x-jwt", token.as_str()), (APP_ID_HEADER, "spoofed")]);
        let outcome = filter.admit(&mut request).unwrap();
        assert!(matches!(outcome, FilterOutcome::Admitted(ref c) if c.issuer == "app-1"));
        let values: Vec<_> = request.headers().get_all(APP_ID_HEADER).iter().collect();
        assert_eq!(values, vec!["app-1"]);
        assert_eq!(request.verified_claims().unwrap().issuer, "app-1");
    }

    #[test]
    fn missing_or_empty_header_is_malformed() {
        let filter = filter(VerificationPolicy::enabled());
        for headers in [vec![], vec![("x-jwt", "")]] {
            let mut request = request_with(&headers);
            let err = filter.admit(&mut request).unwrap_err();
            assert_eq!(err.kind(), "malformed_token");
        }
    }

    #[test]
    fn bearer_prefix_is_not_stripped() {
        let filter = filter(VerificationPolicy::enabled());
        let value = format!("Bearer {}", valid_token());
        let mut request = request_with(&[("x-jwt", value.as_str())]);
        assert!(filter.admit(&mut request).is_err());
    }

    #[test]
    fn custom_header_key_is_honoured() {
        let filter = filter(VerificationPolicy::enabled().with_header_key("x-auth-token"));
        let token = valid_token();
        let mut request = request_with(&[("x-auth-token", token.as_str())]);
        assert!(filter.admit(&mut request).is_ok());

        let mut request = request_with(&[("x-jwt", token.as_str())]);
        assert!(filter.admit(&mut request).is_err());
    }

    #[test]
    fn rejection_strips_spoofed_identity_and_counts_kind() {
        let metrics = FilterMetrics::new().unwrap();
        let filter = filter(VerificationPolicy::enabled()).with_metrics(metrics.clone());
        let mut request = request_with(&[("x-jwt", "garbage"), (APP_ID_HEADER, "spoofed")]);
        assert!(filter.admit(&mut request).is_err());
        assert!(request.headers().get(APP_ID_HEADER).is_none());
        assert_eq!(metrics.count("malformed_token"), 1);
        assert_eq!(metrics.count("admitted"), 0);
    }
}
