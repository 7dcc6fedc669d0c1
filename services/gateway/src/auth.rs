//! Bearer-token authentication gate
//!
//! Validates the `Authorization` header, verifies the JWT against the
//! configured key and algorithm, and attaches the resulting claims and
//! client identity to the request context. Touches no shared state.

use std::fmt;

use axum::http::{HeaderMap, header};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::AuthConfig;
use crate::context::RequestContext;
use crate::error::{GatewayError, GatewayResult};
use crate::routes::RouteRule;

/// Paths that skip authentication and rate limiting entirely
pub const PUBLIC_PATHS: &[&str] = &["/", "/health", "/docs", "/openapi.json", "/favicon.ico"];

const BEARER_PREFIX: &str = "Bearer ";

/// Verified JWT claims
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthClaims {
    pub sub: String,
    pub exp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<u64>,
    /// Issuer-defined payload fields
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Rate-limiter key for a caller
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ClientIdentity {
    /// `sub` claim of a verified token
    Subject(String),
    /// Remote address, for routes that do not require a token
    Address(String),
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Subject(sub) => write!(f, "sub:{sub}"),
            Self::Address(addr) => write!(f, "addr:{addr}"),
        }
    }
}

/// Authentication gate state
pub struct AuthGate {
    decoding_key: DecodingKey,
    validation: Validation,
    public_paths: Vec<String>,
}

impl fmt::Debug for AuthGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthGate")
            .field("algorithms", &self.validation.algorithms)
            .field("public_paths", &self.public_paths)
            .finish_non_exhaustive()
    }
}

impl AuthGate {
    /// Build the gate; `metrics_path` joins the bypass list when metrics are exposed
    pub fn new(config: &AuthConfig, metrics_path: Option<&str>) -> GatewayResult<Self> {
        let algorithm: Algorithm = config.algorithm.parse().map_err(|_| {
            GatewayError::Config(format!("unknown JWT algorithm '{}'", config.algorithm))
        })?;

        let key = config.verification_key.as_bytes();
        let decoding_key = match algorithm {
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => DecodingKey::from_secret(key),
            Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512 => DecodingKey::from_rsa_pem(key).map_err(key_error)?,
            Algorithm::ES256 | Algorithm::ES384 => DecodingKey::from_ec_pem(key).map_err(key_error)?,
            Algorithm::EdDSA => DecodingKey::from_ed_pem(key).map_err(key_error)?,
        };

        let mut validation = Validation::new(algorithm);
        validation.leeway = config.leeway_seconds;
        validation.set_required_spec_claims(&["exp", "sub"]);
        if let Some(issuer) = &config.issuer {
            validation.set_issuer(&[issuer]);
        }
        match &config.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }

        let mut public_paths: Vec<String> = PUBLIC_PATHS.iter().map(|p| (*p).to_string()).collect();
        if let Some(path) = metrics_path {
            public_paths.push(path.to_string());
        }

        Ok(Self {
            decoding_key,
            validation,
            public_paths,
        })
    }

    /// Check if a path bypasses authentication and rate limiting
    #[must_use] pub fn is_public_path(&self, path: &str) -> bool {
        self.public_paths.iter().any(|public| public == path)
    }

    /// Pull the token out of `Authorization: Bearer <token>`
    pub fn extract_bearer(headers: &HeaderMap) -> GatewayResult<&str> {
        let value = headers
            .get(header::AUTHORIZATION)
            .ok_or(GatewayError::MissingOrMalformedCredential)?
            .to_str()
            .map_err(|_| GatewayError::MissingOrMalformedCredential)?;

        let token = value
            .strip_prefix(BEARER_PREFIX)
            .map(str::trim)
            .ok_or(GatewayError::MissingOrMalformedCredential)?;
        if token.is_empty() {
            return Err(GatewayError::MissingOrMalformedCredential);
        }
        Ok(token)
    }

    /// Verify signature, algorithm and expiry of a token
    pub fn verify(&self, token: &str) -> GatewayResult<AuthClaims> {
        match decode::<AuthClaims>(token, &self.decoding_key, &self.validation) {
            Ok(token_data) => Ok(token_data.claims),
            Err(e) => match e.kind() {
                ErrorKind::ExpiredSignature => Err(GatewayError::ExpiredCredential),
                _ => Err(GatewayError::InvalidCredential {
                    reason: e.to_string(),
                }),
            },
        }
    }

    /// Establish the caller's identity and attach it to the context.
    ///
    /// Public paths and rules that do not require a token are identified by
    /// remote address; everything else, including requests that match no
    /// rule, must present a valid bearer token.
    pub fn authenticate(
        &self,
        ctx: &mut RequestContext,
        rule: Option<&RouteRule>,
    ) -> GatewayResult<ClientIdentity> {
        let anonymous = self.is_public_path(&ctx.path) || rule.is_some_and(|r| !r.require_auth);
        if anonymous {
            let identity = ClientIdentity::Address(ctx.client_address().to_string());
            ctx.identity = Some(identity.clone());
            return Ok(identity);
        }

        let claims = Self::extract_bearer(&ctx.headers)
            .and_then(|token| self.verify(token))
            .inspect_err(|e| {
                warn!(
                    path = %ctx.path,
                    client_ip = %ctx.client_address(),
                    request_id = %ctx.request_id,
                    reason = %e,
                    "Authentication failed"
                );
            })?;

        debug!(subject = %claims.sub, path = %ctx.path, "Authenticated request");
        let identity = ClientIdentity::Subject(claims.sub.clone());
        ctx.identity = Some(identity.clone());
        ctx.claims = Some(claims);
        Ok(identity)
    }
}

fn key_error(e: jsonwebtoken::errors::Error) -> GatewayError {
    GatewayError::Config(format!("auth.verification_key is not a valid PEM key: {e}"))
}
