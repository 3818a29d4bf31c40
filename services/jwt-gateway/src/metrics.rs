use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

use crate::error::VerificationError;

#[derive(Clone)]
pub struct FilterMetrics {
    registry: Registry,
    requests: IntCounterVec,
}

impl FilterMetrics {
    pub fn new() -> prometheus::Result<Self> {
        Self::with_registry(Registry::new())
    }

    /// Register the filter counters on an existing registry.
    pub fn with_registry(registry: Registry) -> prometheus::Result<Self> {
        let requests = IntCounterVec::new(
            Opts::new(
                "jwt_gateway_requests_total",
                "Requests seen by the JWT filter grouped by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(requests.clone()))?;
        Ok(Self { registry, requests })
    }

    pub fn record_bypass(&self) {
        self.requests.with_label_values(&["bypassed"]).inc();
    }

    pub fn record_admitted(&self) {
        self.requests.with_label_values(&["admitted"]).inc();
    }

    pub fn record_rejected(&self, err: &VerificationError) {
        self.requests.with_label_values(&[err.kind()]).inc();
    }

    pub fn count(&self, outcome: &str) -> u64 {
        self.requests.with_label_values(&[outcome]).get()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn render(&self) -> anyhow::Result<Response> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        let response = Response::builder()
            .status(StatusCode::OK)
            .header(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            )
            .body(Body::from(buffer))?;
        Ok(response)
    }
}
