//! Authentication middleware.
//!
//! A request carries its token as `Authorization: Bearer <token>` or as a
//! `token` cookie. The token's SHA-256 hash selects a token record, whose role
//! becomes the caller identity passed explicitly into every service call.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::{Request, State};
use axum::http::HeaderValue;
use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::middleware::Next;
use axum::response::Response;
use depot_core::Role;
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use tracing::Instrument;
use uuid::Uuid;

/// Maximum length for trace IDs.
/// Longer trace IDs are truncated to prevent log bloat and potential log injection.
const MAX_TRACE_ID_LEN: usize = 128;

/// Request and response header carrying the correlation id.
pub const TRACE_ID_HEADER: &str = "x-trace-id";

/// Name of the cookie accepted in place of a bearer token.
pub const TOKEN_COOKIE: &str = "token";

/// Trace ID for request correlation.
#[derive(Clone, Debug)]
pub struct TraceId(pub String);

impl TraceId {
    /// Generate a new random trace ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create a trace ID from a client-provided value, keeping at most
    /// `MAX_TRACE_ID_LEN` printable ASCII characters.
    pub fn from_client(value: &str) -> Self {
        let sanitized: String = value
            .chars()
            .take(MAX_TRACE_ID_LEN)
            .filter(|c| c.is_ascii_graphic() || *c == ' ')
            .collect();

        if sanitized.is_empty() {
            Self::new()
        } else {
            Self(sanitized)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TraceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Caller identity resolved from a valid token.
#[derive(Clone, Debug)]
pub struct AuthenticatedRole {
    pub token_id: Uuid,
    pub role: Role,
}

/// Extract bearer token from Authorization header.
/// Per RFC 6750, the "Bearer" scheme is case-insensitive.
fn extract_bearer_token(req: &Request) -> Option<&str> {
    req.headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            if v.len() >= 7 && v[..7].eq_ignore_ascii_case("bearer ") {
                Some(v[7..].trim())
            } else {
                None
            }
        })
}

/// Extract the token cookie, if any.
fn extract_cookie_token(req: &Request) -> Option<&str> {
    req.headers()
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == TOKEN_COOKIE)
        .map(|(_, value)| value.trim_matches('"'))
}

/// Extract trace ID from X-Trace-Id header or generate a new one.
fn extract_or_generate_trace_id(req: &Request) -> TraceId {
    req.headers()
        .get(TRACE_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(TraceId::from_client)
        .unwrap_or_else(TraceId::new)
}

/// Hash a token secret for storage lookup.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Generate a random token secret: 32 bytes, URL-safe base64.
pub fn generate_token_secret() -> String {
    use base64::Engine;
    use rand::RngCore;

    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Authentication middleware that resolves the caller's role and sets up
/// trace context.
///
/// Requests without a token pass through unauthenticated; handlers decide
/// with [`require_auth`]. A presented token that is unknown or revoked is
/// rejected outright.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let trace_id = extract_or_generate_trace_id(&req);
    let trace_id_str = trace_id.0.clone();
    req.extensions_mut().insert(trace_id);

    let token = extract_bearer_token(&req)
        .or_else(|| extract_cookie_token(&req))
        .filter(|t| !t.is_empty())
        .map(hash_token);

    if let Some(token_hash) = token {
        let token_row = state
            .metadata
            .get_token_by_hash(&token_hash)
            .await?
            .ok_or_else(|| ApiError::Unauthorized("invalid token".to_string()))?;
        if token_row.is_revoked() {
            return Err(ApiError::Unauthorized("token revoked".to_string()));
        }

        let role = state
            .metadata
            .get_role(token_row.role_id)
            .await?
            .ok_or_else(|| ApiError::Unauthorized("token role no longer exists".to_string()))?;

        let metadata = state.metadata.clone();
        let token_id = token_row.token_id;
        tokio::spawn(async move {
            let _ = metadata
                .touch_token(token_id, OffsetDateTime::now_utc())
                .await;
        });

        req.extensions_mut().insert(AuthenticatedRole {
            token_id,
            role: role.into(),
        });
    }

    let mut response = next
        .run(req)
        .instrument(tracing::info_span!("request", trace_id = %trace_id_str))
        .await;
    if let Ok(value) = HeaderValue::from_str(&trace_id_str) {
        response.headers_mut().insert(TRACE_ID_HEADER, value);
    }

    Ok(response)
}

/// Require authentication (token must be present).
pub fn require_auth(req: &Request) -> ApiResult<&AuthenticatedRole> {
    req.extensions()
        .get::<AuthenticatedRole>()
        .ok_or_else(|| ApiError::Unauthorized("authentication required".to_string()))
}
