// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Request authentication.
//!
//! ## Copayer requests
//!
//! | Header | Content |
//! |--------|---------|
//! | `x-identity` | Copayer id |
//! | `x-signature` | Signature of `<method>\|<path?query>\|<body>` by a request key |
//! | `x-session` | Session token from `POST /v1/login` (instead of a signature) |
//!
//! `<method>` is lowercase; requests without a body sign `{}`.
//!
//! ## Operator requests
//!
//! `Authorization: Bearer <OPERATOR_TOKEN>`. Operator routes are disabled when
//! no token is configured.
//!
//! ```rust,ignore
//! async fn get_wallet(CopayerAuth(service): CopayerAuth) -> Result<Json<Wallet>, ApiError> {
//!     Ok(Json(service.get_wallet().await?))
//! }
//! ```

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{FromRequest, FromRequestParts, OriginalUri, Request},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use serde::de::DeserializeOwned;

use crate::context::AppContext;
use crate::error::{ApiError, ErrorBody, ServiceError};
use crate::service::{AuthProof, Credentials, WalletService};

pub const IDENTITY_HEADER: &str = "x-identity";
pub const SIGNATURE_HEADER: &str = "x-signature";
pub const SESSION_HEADER: &str = "x-session";

const EMPTY_BODY: &str = "{}";

#[derive(Debug)]
pub enum AuthError {
    /// No identity header, or neither a signature nor a session.
    MissingCredentials,
    /// A header is present but not valid text.
    InvalidHeader(&'static str),
    /// The body could not be read or parsed.
    InvalidBody(String),
    /// Operator routes are not enabled.
    OperatorDisabled,
    /// Wrong operator token.
    InvalidOperatorToken,
    /// Credential verification failed.
    Service(ServiceError),
}

impl AuthError {
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::MissingCredentials | AuthError::InvalidOperatorToken => "NOT_AUTHORIZED",
            AuthError::InvalidHeader(_) => "INVALID_HEADER",
            AuthError::InvalidBody(_) => "INVALID_ARGUMENT",
            AuthError::OperatorDisabled => "OPERATOR_DISABLED",
            AuthError::Service(_) => "NOT_AUTHORIZED",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::MissingCredentials | AuthError::InvalidHeader(_) | AuthError::InvalidOperatorToken => {
                StatusCode::UNAUTHORIZED
            }
            AuthError::InvalidBody(_) => StatusCode::BAD_REQUEST,
            AuthError::OperatorDisabled => StatusCode::FORBIDDEN,
            AuthError::Service(_) => StatusCode::UNAUTHORIZED,
        }
    }
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::MissingCredentials => write!(f, "Missing x-identity and x-signature or x-session headers"),
            AuthError::InvalidHeader(name) => write!(f, "Invalid {name} header"),
            AuthError::InvalidBody(msg) => write!(f, "Invalid request body: {msg}"),
            AuthError::OperatorDisabled => write!(f, "Operator endpoints are disabled"),
            AuthError::InvalidOperatorToken => write!(f, "Invalid operator token"),
            AuthError::Service(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for AuthError {}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        match self {
            // Storage or lock failures during lookup keep their own status.
            AuthError::Service(e) => ApiError::from(e).into_response(),
            other => {
                let body = Json(ErrorBody {
                    code: other.error_code().to_string(),
                    message: other.to_string(),
                });
                (other.status_code(), body).into_response()
            }
        }
    }
}

/// The text a client signs for a request.
pub fn signed_message(method: &Method, uri: &Uri, body: &str) -> String {
    let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or_else(|| uri.path());
    let body = if body.is_empty() { EMPTY_BODY } else { body };
    format!("{}|{}|{}", method.as_str().to_lowercase(), path, body)
}

/// The URI the client addressed, before any router nesting stripped a prefix.
fn request_uri(parts: &Parts) -> Uri {
    parts
        .extensions
        .get::<OriginalUri>()
        .map(|original| original.0.clone())
        .unwrap_or_else(|| parts.uri.clone())
}

fn header<'a>(headers: &'a HeaderMap, name: &'static str) -> Result<Option<&'a str>, AuthError> {
    headers
        .get(name)
        .map(|v| v.to_str().map_err(|_| AuthError::InvalidHeader(name)))
        .transpose()
}

/// Credentials carried by the request headers, bound to `message`.
pub fn credentials(headers: &HeaderMap, message: String) -> Result<Credentials, AuthError> {
    let copayer_id = header(headers, IDENTITY_HEADER)?.ok_or(AuthError::MissingCredentials)?;
    let proof = match (header(headers, SIGNATURE_HEADER)?, header(headers, SESSION_HEADER)?) {
        (Some(signature), _) => AuthProof::Signature {
            message,
            signature: signature.to_string(),
        },
        (None, Some(token)) => AuthProof::Session(token.to_string()),
        (None, None) => return Err(AuthError::MissingCredentials),
    };
    Ok(Credentials {
        copayer_id: copayer_id.to_string(),
        proof,
    })
}

async fn authenticate(ctx: &Arc<AppContext>, creds: Credentials) -> Result<WalletService, AuthError> {
    WalletService::authenticate(ctx.clone(), &creds)
        .await
        .map_err(AuthError::Service)
}

// =============================================================================
// Extractors
// =============================================================================

/// Authenticated copayer for requests without a body.
pub struct CopayerAuth(pub WalletService);

impl FromRequestParts<Arc<AppContext>> for CopayerAuth {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, ctx: &Arc<AppContext>) -> Result<Self, Self::Rejection> {
        let message = signed_message(&parts.method, &request_uri(parts), EMPTY_BODY);
        let creds = credentials(&parts.headers, message)?;
        Ok(CopayerAuth(authenticate(ctx, creds).await?))
    }
}

/// Authenticated copayer plus a JSON body covered by the signature.
pub struct SignedJson<T>(pub WalletService, pub T);

impl<T> FromRequest<Arc<AppContext>> for SignedJson<T>
where
    T: DeserializeOwned,
{
    type Rejection = AuthError;

    async fn from_request(req: Request, ctx: &Arc<AppContext>) -> Result<Self, Self::Rejection> {
        let (parts, body) = req.into_parts();
        let bytes = Bytes::from_request(Request::from_parts(parts.clone(), body), ctx)
            .await
            .map_err(|e| AuthError::InvalidBody(e.to_string()))?;
        let text = std::str::from_utf8(&bytes).map_err(|e| AuthError::InvalidBody(e.to_string()))?;

        let creds = credentials(&parts.headers, signed_message(&parts.method, &request_uri(&parts), text))?;
        let service = authenticate(ctx, creds).await?;

        let raw = if text.trim().is_empty() { EMPTY_BODY } else { text };
        let value = serde_json::from_str(raw).map_err(|e| AuthError::InvalidBody(e.to_string()))?;
        Ok(SignedJson(service, value))
    }
}

/// Operator access via bearer token.
pub struct Operator;

impl FromRequestParts<Arc<AppContext>> for Operator {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, ctx: &Arc<AppContext>) -> Result<Self, Self::Rejection> {
        let Some(expected) = ctx.config.operator_token.as_deref() else {
            return Err(AuthError::OperatorDisabled);
        };
        let provided = header(&parts.headers, AUTHORIZATION.as_str())?
            .and_then(|h| h.strip_prefix("Bearer "))
            .ok_or(AuthError::MissingCredentials)?;
        if provided != expected {
            return Err(AuthError::InvalidOperatorToken);
        }
        Ok(Operator)
    }
}
