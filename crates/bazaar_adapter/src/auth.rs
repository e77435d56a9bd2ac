#![forbid(unsafe_code)]

//! HS256 bearer-token verification for `/v1` routes.

use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;
use bazaar_kernel_contracts::records::OwnerId;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

use crate::error::ApiError;
use crate::AppState;

pub const JWT_AUDIENCE_DEFAULT: &str = "authenticated";

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
}

pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl std::fmt::Debug for JwtVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtVerifier").finish_non_exhaustive()
    }
}

impl JwtVerifier {
    pub fn hs256(secret: &str, audience: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.algorithms = vec![Algorithm::HS256];
        validation.set_audience(&[audience]);
        validation.set_required_spec_claims(&["exp", "aud", "sub"]);
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    pub fn verify(&self, token: &str) -> Result<OwnerId, ApiError> {
        let claims = decode::<Claims>(token, &self.key, &self.validation)
            .map_err(|e| {
                tracing::debug!(error = %e, "bearer token rejected");
                ApiError::Unauthorized("invalid or expired token".to_string())
            })?
            .claims;
        OwnerId::new(claims.sub)
            .map_err(|_| ApiError::Unauthorized("token subject is invalid".to_string()))
    }
}

/// Verifies the bearer token and stores the caller's [`OwnerId`] in request
/// extensions.
pub async fn require_bearer(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::Unauthorized("missing bearer token".to_string()))?;
    let owner = state.verifier.verify(token)?;
    req.extensions_mut().insert(owner);
    Ok(next.run(req).await)
}
