// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Error taxonomy shared by the service layer and the HTTP edge.
//!
//! ## Kinds
//!
//! | Kind | Type | HTTP |
//! |------|------|------|
//! | Client error (bad input, invalid transition) | [`ServiceError::Client`] | 4xx with stable code |
//! | Lock contention | [`ServiceError::LockTimeout`] | 503, retryable |
//! | Explorer failure | [`ServiceError::Explorer`] | 503, retryable |
//! | Storage failure / invariant violation | [`ServiceError::Storage`], [`ServiceError::Invariant`] | 500, generic message |

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::explorer::ExplorerError;
use crate::storage::StorageError;

// =============================================================================
// Error Codes
// =============================================================================

/// Stable machine-readable codes returned to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidArgument,
    NotAuthorized,
    WalletNotFound,
    WalletAlreadyExists,
    WalletFull,
    WalletNotComplete,
    WalletNeedScan,
    CopayerNotFound,
    CopayerRegistered,
    CopayerInWallet,
    CopayerVoted,
    TooManyKeys,
    InvalidAddress,
    MainAddressGapReached,
    TxNotFound,
    TxNotPending,
    TxNotAccepted,
    TxAlreadyBroadcasted,
    TxCannotCreate,
    TxCannotRemove,
    TxMaxSizeExceeded,
    InsufficientFunds,
    InsufficientFundsForFee,
    LockedFunds,
    DustAmount,
    UnavailableUtxos,
    BadSignatures,
    OrderNotFound,
    PairNotSupported,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::NotAuthorized => "NOT_AUTHORIZED",
            Self::WalletNotFound => "WALLET_NOT_FOUND",
            Self::WalletAlreadyExists => "WALLET_ALREADY_EXISTS",
            Self::WalletFull => "WALLET_FULL",
            Self::WalletNotComplete => "WALLET_NOT_COMPLETE",
            Self::WalletNeedScan => "WALLET_NEED_SCAN",
            Self::CopayerNotFound => "COPAYER_NOT_FOUND",
            Self::CopayerRegistered => "COPAYER_REGISTERED",
            Self::CopayerInWallet => "COPAYER_IN_WALLET",
            Self::CopayerVoted => "COPAYER_VOTED",
            Self::TooManyKeys => "TOO_MANY_KEYS",
            Self::InvalidAddress => "INVALID_ADDRESS",
            Self::MainAddressGapReached => "MAIN_ADDRESS_GAP_REACHED",
            Self::TxNotFound => "TX_NOT_FOUND",
            Self::TxNotPending => "TX_NOT_PENDING",
            Self::TxNotAccepted => "TX_NOT_ACCEPTED",
            Self::TxAlreadyBroadcasted => "TX_ALREADY_BROADCASTED",
            Self::TxCannotCreate => "TX_CANNOT_CREATE",
            Self::TxCannotRemove => "TX_CANNOT_REMOVE",
            Self::TxMaxSizeExceeded => "TX_MAX_SIZE_EXCEEDED",
            Self::InsufficientFunds => "INSUFFICIENT_FUNDS",
            Self::InsufficientFundsForFee => "INSUFFICIENT_FUNDS_FOR_FEE",
            Self::LockedFunds => "LOCKED_FUNDS",
            Self::DustAmount => "DUST_AMOUNT",
            Self::UnavailableUtxos => "UNAVAILABLE_UTXOS",
            Self::BadSignatures => "BAD_SIGNATURES",
            Self::OrderNotFound => "ORDER_NOT_FOUND",
            Self::PairNotSupported => "PAIR_NOT_SUPPORTED",
        }
    }

    /// Default human-readable message for the code.
    pub fn default_message(&self) -> &'static str {
        match self {
            Self::InvalidArgument => "Invalid argument",
            Self::NotAuthorized => "Not authorized",
            Self::WalletNotFound => "Wallet not found",
            Self::WalletAlreadyExists => "Wallet already exists",
            Self::WalletFull => "Wallet full",
            Self::WalletNotComplete => "Wallet is not complete",
            Self::WalletNeedScan => "Wallet needs complete rescan",
            Self::CopayerNotFound => "Copayer not found",
            Self::CopayerRegistered => "Copayer ID already registered on server",
            Self::CopayerInWallet => "Copayer already in wallet",
            Self::CopayerVoted => "Copayer already voted on this transaction proposal",
            Self::TooManyKeys => "Too many keys registered",
            Self::InvalidAddress => "Invalid address",
            Self::MainAddressGapReached => "Maximum number of consecutive addresses without activity reached",
            Self::TxNotFound => "Transaction proposal not found",
            Self::TxNotPending => "The transaction proposal is not pending",
            Self::TxNotAccepted => "The transaction proposal is not accepted",
            Self::TxAlreadyBroadcasted => "The transaction proposal is already broadcasted",
            Self::TxCannotCreate => "Cannot create TX proposal during backoff time",
            Self::TxCannotRemove => "Cannot remove this tx proposal during locktime",
            Self::TxMaxSizeExceeded => "TX exceeds maximum allowed size",
            Self::InsufficientFunds => "Insufficient funds",
            Self::InsufficientFundsForFee => "Insufficient funds for fee",
            Self::LockedFunds => "Funds are locked by pending transaction proposals",
            Self::DustAmount => "Amount below dust threshold",
            Self::UnavailableUtxos => "Unavailable unspent outputs",
            Self::BadSignatures => "Bad signatures",
            Self::OrderNotFound => "Order not found",
            Self::PairNotSupported => "Coin pair not supported",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::NotAuthorized => StatusCode::UNAUTHORIZED,
            Self::WalletNotFound
            | Self::CopayerNotFound
            | Self::TxNotFound
            | Self::OrderNotFound => StatusCode::NOT_FOUND,
            Self::WalletAlreadyExists | Self::CopayerRegistered | Self::CopayerInWallet => {
                StatusCode::CONFLICT
            }
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Service Error
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{code}: {message}")]
    Client { code: ErrorCode, message: String },

    #[error("could not acquire lock on {0}")]
    LockTimeout(String),

    #[error("explorer error: {0}")]
    Explorer(#[from] ExplorerError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("invariant violated: {0}")]
    Invariant(String),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

impl ServiceError {
    /// Client error carrying the code's default message.
    pub fn client(code: ErrorCode) -> Self {
        Self::Client {
            code,
            message: code.default_message().to_string(),
        }
    }

    pub fn client_msg(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Client {
            code,
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::client_msg(ErrorCode::InvalidArgument, message)
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        Self::Invariant(message.into())
    }

    /// Client error code, if this is a client error.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Client { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn is_code(&self, expected: ErrorCode) -> bool {
        self.code() == Some(expected)
    }

    /// Whether a caller may retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockTimeout(_) | Self::Explorer(_))
    }
}

// =============================================================================
// API Error
// =============================================================================

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
}

#[derive(Serialize, ToSchema)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, ErrorCode::InvalidArgument.as_str(), message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, ErrorCode::NotAuthorized.as_str(), message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE", message)
    }

    pub fn internal() -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL",
            "Internal server error",
        )
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Client { code, message } => Self::new(code.status(), code.as_str(), message),
            ServiceError::LockTimeout(key) => {
                tracing::warn!(lock_key = %key, "Lock acquisition timed out");
                Self::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "LOCK_TIMEOUT",
                    "Wallet is busy, please retry",
                )
            }
            ServiceError::Explorer(e) => {
                tracing::warn!(error = %e, "Explorer request failed");
                Self::service_unavailable("Blockchain explorer unavailable, please retry")
            }
            ServiceError::Storage(e) => {
                tracing::error!(error = %e, "Storage failure");
                Self::internal()
            }
            ServiceError::Invariant(msg) => {
                tracing::error!(invariant = %msg, "Invariant violated");
                Self::internal()
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            code: self.code,
            message: self.message,
        });
        (self.status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[test]
    fn client_errors_map_to_4xx_with_code() {
        let api: ApiError = ServiceError::client(ErrorCode::CopayerVoted).into();
        assert_eq!(api.status, StatusCode::BAD_REQUEST);
        assert_eq!(api.code, "COPAYER_VOTED");

        let api: ApiError = ServiceError::client(ErrorCode::TxNotFound).into();
        assert_eq!(api.status, StatusCode::NOT_FOUND);

        let api: ApiError = ServiceError::client(ErrorCode::NotAuthorized).into();
        assert_eq!(api.status, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn server_errors_hide_details() {
        let api: ApiError = ServiceError::invariant("missing walletId").into();
        assert_eq!(api.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(api.message, "Internal server error");

        let lock: ApiError = ServiceError::LockTimeout("w1".into()).into();
        assert_eq!(lock.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(lock.code, "LOCK_TIMEOUT");
    }

    #[test]
    fn retryable_classification() {
        assert!(ServiceError::LockTimeout("k".into()).is_retryable());
        assert!(!ServiceError::client(ErrorCode::WalletFull).is_retryable());
        assert!(ServiceError::client(ErrorCode::WalletFull).is_code(ErrorCode::WalletFull));
    }

    #[test]
    fn error_code_serializes_screaming_snake() {
        let json = serde_json::to_string(&ErrorCode::MainAddressGapReached).unwrap();
        assert_eq!(json, r#""MAIN_ADDRESS_GAP_REACHED""#);
        assert_eq!(ErrorCode::MainAddressGapReached.as_str(), "MAIN_ADDRESS_GAP_REACHED");
    }

    #[tokio::test]
    async fn into_response_returns_code_and_message() {
        let response = ApiError::bad_request("bad data").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body_bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(body_bytes.to_vec()).unwrap();
        assert_eq!(body, r#"{"code":"INVALID_ARGUMENT","message":"bad data"}"#);
    }
}
