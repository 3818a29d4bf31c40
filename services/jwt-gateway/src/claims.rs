use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{VerificationError, VerifyResult};

/// Trusted view of a token, produced only after signature and lifetime checks.
#[derive(Debug, Clone, Serialize)]
pub struct Claims {
    pub issuer: String,
    pub expires_at: DateTime<Utc>,
    pub issued_at: Option<DateTime<Utc>>,
    pub subject: Option<String>,
    pub raw: serde_json::Value,
}

impl Claims {
    pub fn expires_at_unix(&self) -> i64 {
        self.expires_at.timestamp()
    }
}

#[derive(Debug, Deserialize)]
struct ClaimsRepr {
    iss: String,
    exp: i64,
    #[serde(default)]
    iat: Option<i64>,
    #[serde(default)]
    sub: Option<String>,
}

impl TryFrom<ClaimsRepr> for Claims {
    type Error = VerificationError;

    fn try_from(value: ClaimsRepr) -> VerifyResult<Self> {
        let expires_at = Utc
            .timestamp_opt(value.exp, 0)
            .single()
            .ok_or_else(|| VerificationError::MalformedToken(format!("exp out of range: {}", value.exp)))?;

        let issued_at = match value.iat {
            Some(iat) => Some(
                Utc.timestamp_opt(iat, 0)
                    .single()
                    .ok_or_else(|| VerificationError::MalformedToken(format!("iat out of range: {iat}")))?,
            ),
            None => None,
        };

        Ok(Self {
            issuer: value.iss,
            expires_at,
            issued_at,
            subject: value.sub,
            raw: serde_json::Value::Null,
        })
    }
}

impl TryFrom<serde_json::Value> for Claims {
    type Error = VerificationError;

    fn try_from(value: serde_json::Value) -> VerifyResult<Self> {
        let repr: ClaimsRepr = serde_json::from_value(value.clone())
            .map_err(|err| VerificationError::MalformedToken(err.to_string()))?;
        let mut claims = Claims::try_from(repr)?;
        claims.raw = value;
        Ok(claims)
    }
}
