//! Token extraction and verification.
//!
//! Tokens are HS256 JWTs issued by the ERP login flow. Claims are loosely
//! typed on the wire (ids as numbers or strings, `is_admin` as bool, 0/1 or
//! "1"), so decoding goes through [`RawClaims`] and is normalized once into
//! an [`Identity`].

use axum::http::{header::AUTHORIZATION, HeaderMap};
use axum_extra::extract::cookie::CookieJar;
use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Deserializer, Serialize};

use crate::auth::error::AuthError;
use crate::config::AuthConfig;

/// Startup failure building the signing keys.
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("JWT secret is not configured (set JWT_SECRET)")]
    MissingSecret,
}

/// Authenticated caller, attached to request extensions by `authenticate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub id: i64,
    pub email: Option<String>,
    pub name: Option<String>,
    pub role: String,
    pub sector: Option<String>,
    pub is_admin: bool,
}

/// Wire form of the token payload.
#[derive(Debug, Deserialize)]
struct RawClaims {
    #[serde(default)]
    id: Option<FlexId>,
    #[serde(default, rename = "userId")]
    user_id: Option<FlexId>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default, alias = "nome")]
    name: Option<String>,
    #[serde(default)]
    role: Option<String>,
    #[serde(default, alias = "setor")]
    sector: Option<String>,
    #[serde(default, deserialize_with = "flag")]
    is_admin: bool,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FlexId {
    Number(i64),
    Text(String),
}

impl FlexId {
    fn as_i64(&self) -> Option<i64> {
        match self {
            FlexId::Number(n) => Some(*n),
            FlexId::Text(s) => s.trim().parse().ok(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FlexFlag {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

/// Accepts `true`, `1` and `"1"`/`"true"` as set; anything else is unset.
fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<FlexFlag>::deserialize(deserializer)?;
    Ok(match value {
        Some(FlexFlag::Bool(b)) => b,
        Some(FlexFlag::Int(n)) => n == 1,
        Some(FlexFlag::Float(f)) => f == 1.0,
        Some(FlexFlag::Text(s)) => {
            let s = s.trim();
            s == "1" || s.eq_ignore_ascii_case("true")
        }
        None => false,
    })
}

impl TryFrom<RawClaims> for Identity {
    type Error = AuthError;

    fn try_from(raw: RawClaims) -> Result<Self, Self::Error> {
        let id = raw
            .id
            .as_ref()
            .or(raw.user_id.as_ref())
            .and_then(FlexId::as_i64)
            .ok_or(AuthError::Invalid)?;

        Ok(Identity {
            id,
            email: raw.email,
            name: raw.name,
            role: raw.role.unwrap_or_default().trim().to_lowercase(),
            sector: raw.sector,
            is_admin: raw.is_admin,
        })
    }
}

/// Payload written by [`JwtKeys::sign`].
#[derive(Debug, Serialize)]
struct SignedClaims<'a> {
    id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    nome: Option<&'a str>,
    role: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    setor: Option<&'a str>,
    is_admin: bool,
    iat: i64,
    exp: i64,
}

/// HS256 signing and verification keys.
#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl std::fmt::Debug for JwtKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtKeys").finish_non_exhaustive()
    }
}

impl JwtKeys {
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp"]);

        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// Build from config. Strength checks already ran in config validation.
    pub fn from_config(config: &AuthConfig) -> Result<Self, KeyError> {
        match config.jwt_secret.as_deref() {
            Some(secret) if !secret.is_empty() => Ok(Self::new(secret.as_bytes())),
            _ => Err(KeyError::MissingSecret),
        }
    }

    /// Verify signature and expiry and decode the caller.
    pub fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        let data = decode::<RawClaims>(token, &self.decoding, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => {
                    tracing::debug!(error = %e, "Token rejected");
                    AuthError::Invalid
                }
            }
        })?;

        Identity::try_from(data.claims)
    }

    /// Issue a token for `identity` valid for `ttl_secs`. Used by the CLI and tests.
    pub fn sign(&self, identity: &Identity, ttl_secs: i64) -> Result<String, jsonwebtoken::errors::Error> {
        let now = Utc::now().timestamp();
        let claims = SignedClaims {
            id: identity.id,
            email: identity.email.as_deref(),
            nome: identity.name.as_deref(),
            role: &identity.role,
            setor: identity.sector.as_deref(),
            is_admin: identity.is_admin,
            iat: now,
            exp: now + ttl_secs,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
    }
}

/// Pull the raw token from the bearer header, falling back to cookies in order.
///
/// Front-end code sometimes sends `Bearer null` or `Bearer undefined`; those
/// are treated as absent.
pub fn extract_token(headers: &HeaderMap, cookie_names: &[String]) -> Option<String> {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty() && *t != "null" && *t != "undefined");

    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    let jar = CookieJar::from_headers(headers);
    cookie_names
        .iter()
        .filter_map(|name| jar.get(name))
        .map(|cookie| cookie.value().to_string())
        .find(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    fn identity(role: &str) -> Identity {
        Identity {
            id: 5,
            email: Some("vendedor@erp.local".into()),
            name: Some("Vendedor".into()),
            role: role.into(),
            sector: None,
            is_admin: false,
        }
    }

    fn raw_token(payload: serde_json::Value) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            &payload,
            &EncodingKey::from_secret(SECRET),
        )
        .unwrap()
    }

    fn future_exp() -> i64 {
        Utc::now().timestamp() + 3600
    }

    #[test]
    fn test_sign_and_verify() {
        let keys = JwtKeys::new(SECRET);
        let token = keys.sign(&identity("comercial"), 3600).unwrap();
        assert_eq!(keys.verify(&token).unwrap(), identity("comercial"));
    }

    #[test]
    fn test_expired_token() {
        let keys = JwtKeys::new(SECRET);
        let token = keys.sign(&identity("comercial"), -10).unwrap();
        assert_eq!(keys.verify(&token), Err(AuthError::Expired));
    }

    #[test]
    fn test_wrong_secret_is_invalid() {
        let keys = JwtKeys::new(SECRET);
        let other = JwtKeys::new(b"another-secret-another-secret-xx");
        let token = other.sign(&identity("comercial"), 3600).unwrap();
        assert_eq!(keys.verify(&token), Err(AuthError::Invalid));
        assert_eq!(keys.verify("not-a-jwt"), Err(AuthError::Invalid));
    }

    #[test]
    fn test_non_hs256_rejected() {
        let keys = JwtKeys::new(SECRET);
        let token = encode(
            &Header::new(Algorithm::HS512),
            &serde_json::json!({"id": 1, "exp": future_exp()}),
            &EncodingKey::from_secret(SECRET),
        )
        .unwrap();
        assert_eq!(keys.verify(&token), Err(AuthError::Invalid));
    }

    #[test]
    fn test_user_id_alias_and_string_id() {
        let keys = JwtKeys::new(SECRET);

        let token = raw_token(serde_json::json!({"userId": "42", "role": "rh", "exp": future_exp()}));
        assert_eq!(keys.verify(&token).unwrap().id, 42);

        let token = raw_token(serde_json::json!({"id": 7, "nome": "Ana", "exp": future_exp()}));
        let identity = keys.verify(&token).unwrap();
        assert_eq!(identity.id, 7);
        assert_eq!(identity.name.as_deref(), Some("Ana"));
        assert_eq!(identity.role, "");
    }

    #[test]
    fn test_missing_id_is_invalid() {
        let keys = JwtKeys::new(SECRET);
        let token = raw_token(serde_json::json!({"role": "admin", "exp": future_exp()}));
        assert_eq!(keys.verify(&token), Err(AuthError::Invalid));
    }

    #[test]
    fn test_is_admin_encodings() {
        let keys = JwtKeys::new(SECRET);
        for (value, expected) in [
            (serde_json::json!(true), true),
            (serde_json::json!(1), true),
            (serde_json::json!("1"), true),
            (serde_json::json!("true"), true),
            (serde_json::json!(false), false),
            (serde_json::json!(0), false),
            (serde_json::json!("0"), false),
            (serde_json::Value::Null, false),
        ] {
            let token = raw_token(serde_json::json!({"id": 1, "is_admin": value, "exp": future_exp()}));
            assert_eq!(keys.verify(&token).unwrap().is_admin, expected, "{value}");
        }
    }

    #[test]
    fn test_audience_claim_tolerated() {
        let keys = JwtKeys::new(SECRET);
        let token = raw_token(serde_json::json!({"id": 3, "aud": "aluforce", "exp": future_exp()}));
        assert_eq!(keys.verify(&token).unwrap().id, 3);
    }

    #[test]
    fn test_missing_secret() {
        let config = AuthConfig::default();
        assert!(matches!(JwtKeys::from_config(&config), Err(KeyError::MissingSecret)));
    }

    #[test]
    fn test_extract_prefers_bearer() {
        let cookies = vec!["authToken".to_string(), "token".to_string()];
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        headers.insert("cookie", HeaderValue::from_static("authToken=fromcookie"));
        assert_eq!(extract_token(&headers, &cookies).as_deref(), Some("abc"));
    }

    #[test]
    fn test_extract_ignores_placeholder_bearer() {
        let cookies = vec!["authToken".to_string(), "token".to_string()];
        for placeholder in ["Bearer null", "Bearer undefined", "Bearer "] {
            let mut headers = HeaderMap::new();
            headers.insert(AUTHORIZATION, HeaderValue::from_static(placeholder));
            headers.insert("cookie", HeaderValue::from_static("other=1; token=xyz"));
            assert_eq!(extract_token(&headers, &cookies).as_deref(), Some("xyz"), "{placeholder}");
        }
    }

    #[test]
    fn test_extract_cookie_order_and_absence() {
        let cookies = vec!["authToken".to_string(), "token".to_string()];
        let mut headers = HeaderMap::new();
        headers.insert("cookie", HeaderValue::from_static("token=second; authToken=first"));
        assert_eq!(extract_token(&headers, &cookies).as_deref(), Some("first"));

        assert_eq!(extract_token(&HeaderMap::new(), &cookies), None);
    }
}
