// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Wallet lifecycle and per-copayer settings.
//!
//! Creation and joining are unauthenticated: the wallet key signature inside
//! the join request is what admits a copayer. Everything else runs as the
//! authenticated copayer.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::auth::{CopayerAuth, SignedJson};
use crate::context::AppContext;
use crate::error::{ApiError, ErrorBody};
use crate::models::{Preferences, Wallet};
use crate::service::wallet::{AddAccessOpts, JoinWalletResult, PreferencesOpts, PushSubOpts};
use crate::service::{CreateWalletOpts, JoinWalletOpts, ScanOpts, WalletService, WalletStatusInfo};

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateWalletResponse {
    pub wallet_id: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SessionResponse {
    pub token: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TxConfirmationRequest {
    pub txid: String,
}

#[utoipa::path(
    post,
    path = "/v1/wallets",
    request_body = CreateWalletOpts,
    tag = "Wallets",
    responses(
        (status = 201, body = CreateWalletResponse),
        (status = 400, body = ErrorBody)
    )
)]
pub async fn create_wallet(
    State(ctx): State<Arc<AppContext>>,
    Json(opts): Json<CreateWalletOpts>,
) -> Result<(StatusCode, Json<CreateWalletResponse>), ApiError> {
    let wallet_id = WalletService::anonymous(ctx).create_wallet(opts).await?;
    Ok((StatusCode::CREATED, Json(CreateWalletResponse { wallet_id })))
}

#[utoipa::path(
    post,
    path = "/v1/wallets/{wallet_id}/copayers",
    params(("wallet_id" = String, Path, description = "Wallet to join")),
    request_body = JoinWalletOpts,
    tag = "Wallets",
    responses(
        (status = 201, body = JoinWalletResult),
        (status = 400, body = ErrorBody),
        (status = 404, body = ErrorBody)
    )
)]
pub async fn join_wallet(
    State(ctx): State<Arc<AppContext>>,
    Path(wallet_id): Path<String>,
    Json(mut opts): Json<JoinWalletOpts>,
) -> Result<(StatusCode, Json<JoinWalletResult>), ApiError> {
    opts.wallet_id = wallet_id;
    let result = WalletService::anonymous(ctx).join_wallet(opts).await?;
    Ok((StatusCode::CREATED, Json(result)))
}

#[utoipa::path(
    get,
    path = "/v1/wallets",
    tag = "Wallets",
    responses(
        (status = 200, body = WalletStatusInfo),
        (status = 401, body = ErrorBody)
    )
)]
pub async fn get_status(CopayerAuth(service): CopayerAuth) -> Result<Json<WalletStatusInfo>, ApiError> {
    Ok(Json(service.get_status().await?))
}

#[utoipa::path(
    delete,
    path = "/v1/wallets",
    tag = "Wallets",
    responses((status = 204), (status = 401, body = ErrorBody))
)]
pub async fn remove_wallet(CopayerAuth(service): CopayerAuth) -> Result<StatusCode, ApiError> {
    service.remove_wallet().await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/v1/wallets/scan",
    request_body = ScanOpts,
    tag = "Wallets",
    responses((status = 202, description = "Scan started"), (status = 401, body = ErrorBody))
)]
pub async fn start_scan(
    SignedJson(service, opts): SignedJson<ScanOpts>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let started = service.start_scan(opts).await?;
    Ok((StatusCode::ACCEPTED, Json(started)))
}

#[utoipa::path(
    post,
    path = "/v1/copayers/access",
    request_body = AddAccessOpts,
    tag = "Wallets",
    responses((status = 200, body = Wallet), (status = 400, body = ErrorBody))
)]
pub async fn add_access(SignedJson(service, opts): SignedJson<AddAccessOpts>) -> Result<Json<Wallet>, ApiError> {
    Ok(Json(service.add_access(opts).await?))
}

// =============================================================================
// Preferences
// =============================================================================

#[utoipa::path(
    get,
    path = "/v1/preferences",
    tag = "Preferences",
    responses((status = 200, body = Preferences), (status = 401, body = ErrorBody))
)]
pub async fn get_preferences(CopayerAuth(service): CopayerAuth) -> Result<Json<Option<Preferences>>, ApiError> {
    Ok(Json(service.get_preferences().await?))
}

#[utoipa::path(
    put,
    path = "/v1/preferences",
    request_body = PreferencesOpts,
    tag = "Preferences",
    responses((status = 200, body = Preferences), (status = 400, body = ErrorBody))
)]
pub async fn save_preferences(
    SignedJson(service, opts): SignedJson<PreferencesOpts>,
) -> Result<Json<Preferences>, ApiError> {
    Ok(Json(service.save_preferences(opts).await?))
}

// =============================================================================
// Sessions
// =============================================================================

#[utoipa::path(
    post,
    path = "/v1/login",
    tag = "Sessions",
    responses((status = 200, body = SessionResponse), (status = 401, body = ErrorBody))
)]
pub async fn login(SignedJson(service, _): SignedJson<Value>) -> Result<Json<SessionResponse>, ApiError> {
    let token = service.login().await?;
    Ok(Json(SessionResponse { token }))
}

#[utoipa::path(
    post,
    path = "/v1/logout",
    tag = "Sessions",
    responses((status = 204), (status = 401, body = ErrorBody))
)]
pub async fn logout(SignedJson(service, _): SignedJson<Value>) -> Result<StatusCode, ApiError> {
    service.logout().await?;
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// Subscriptions
// =============================================================================

#[utoipa::path(
    post,
    path = "/v1/pushnotifications/subscriptions",
    request_body = PushSubOpts,
    tag = "Subscriptions",
    responses((status = 204), (status = 400, body = ErrorBody))
)]
pub async fn push_subscribe(SignedJson(service, opts): SignedJson<PushSubOpts>) -> Result<StatusCode, ApiError> {
    service.push_notifications_subscribe(opts).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    delete,
    path = "/v1/pushnotifications/subscriptions/{token}",
    params(("token" = String, Path, description = "Device token")),
    tag = "Subscriptions",
    responses((status = 204), (status = 401, body = ErrorBody))
)]
pub async fn push_unsubscribe(
    CopayerAuth(service): CopayerAuth,
    Path(token): Path<String>,
) -> Result<StatusCode, ApiError> {
    service.push_notifications_unsubscribe(&token).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/v1/txconfirmations",
    request_body = TxConfirmationRequest,
    tag = "Subscriptions",
    responses((status = 204), (status = 400, body = ErrorBody))
)]
pub async fn tx_confirmation_subscribe(
    SignedJson(service, request): SignedJson<TxConfirmationRequest>,
) -> Result<StatusCode, ApiError> {
    service.tx_confirmation_subscribe(&request.txid).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    delete,
    path = "/v1/txconfirmations/{txid}",
    params(("txid" = String, Path, description = "Watched transaction")),
    tag = "Subscriptions",
    responses((status = 204), (status = 401, body = ErrorBody))
)]
pub async fn tx_confirmation_unsubscribe(
    CopayerAuth(service): CopayerAuth,
    Path(txid): Path<String>,
) -> Result<StatusCode, ApiError> {
    service.tx_confirmation_unsubscribe(&txid).await?;
    Ok(StatusCode::NO_CONTENT)
}
