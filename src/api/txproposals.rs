// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Transaction proposals and history.
//!
//! | Route | Transition |
//! |-------|------------|
//! | `POST /v1/txproposals` | create (`temporary`) |
//! | `POST /v1/txproposals/{id}/publish` | `temporary` → `pending` |
//! | `POST /v1/txproposals/{id}/signatures` | accept, `pending` → `accepted` at m |
//! | `POST /v1/txproposals/{id}/rejections` | reject, `pending` → `rejected` at n−m+1 |
//! | `POST /v1/txproposals/{id}/broadcast` | `accepted` → `broadcasted` |
//! | `DELETE /v1/txproposals/{id}` | remove while pending |

use axum::{
    extract::{Path, Query},
    http::StatusCode,
    Json,
};
use serde_json::Value;

use crate::auth::{CopayerAuth, SignedJson};
use crate::error::{ApiError, ErrorBody};
use crate::models::TxProposal;
use crate::service::proposals::{HistoryOpts, PublishTxOpts, RejectTxOpts, SignTxOpts, TxsOpts};
use crate::service::{CreateTxOpts, TxHistoryItem};

#[utoipa::path(
    post,
    path = "/v1/txproposals",
    request_body = CreateTxOpts,
    tag = "Proposals",
    responses(
        (status = 200, body = TxProposal),
        (status = 400, body = ErrorBody),
        (status = 503, body = ErrorBody)
    )
)]
pub async fn create_tx(SignedJson(service, opts): SignedJson<CreateTxOpts>) -> Result<Json<TxProposal>, ApiError> {
    Ok(Json(service.create_tx(opts).await?))
}

#[utoipa::path(
    get,
    path = "/v1/txproposals",
    tag = "Proposals",
    responses((status = 200, body = [TxProposal]), (status = 401, body = ErrorBody))
)]
pub async fn get_pending_txs(CopayerAuth(service): CopayerAuth) -> Result<Json<Vec<TxProposal>>, ApiError> {
    Ok(Json(service.get_pending_txs().await?))
}

#[utoipa::path(
    get,
    path = "/v1/txproposals/{txp_id}",
    params(("txp_id" = String, Path, description = "Proposal id")),
    tag = "Proposals",
    responses((status = 200, body = TxProposal), (status = 404, body = ErrorBody))
)]
pub async fn get_tx(
    CopayerAuth(service): CopayerAuth,
    Path(txp_id): Path<String>,
) -> Result<Json<TxProposal>, ApiError> {
    Ok(Json(service.get_tx(&txp_id).await?))
}

#[utoipa::path(
    post,
    path = "/v1/txproposals/{txp_id}/publish",
    params(("txp_id" = String, Path, description = "Proposal id")),
    request_body = PublishTxOpts,
    tag = "Proposals",
    responses((status = 200, body = TxProposal), (status = 400, body = ErrorBody))
)]
pub async fn publish_tx(
    Path(txp_id): Path<String>,
    SignedJson(service, opts): SignedJson<PublishTxOpts>,
) -> Result<Json<TxProposal>, ApiError> {
    Ok(Json(service.publish_tx(&txp_id, opts).await?))
}

#[utoipa::path(
    post,
    path = "/v1/txproposals/{txp_id}/signatures",
    params(("txp_id" = String, Path, description = "Proposal id")),
    request_body = SignTxOpts,
    tag = "Proposals",
    responses((status = 200, body = TxProposal), (status = 400, body = ErrorBody))
)]
pub async fn sign_tx(
    Path(txp_id): Path<String>,
    SignedJson(service, opts): SignedJson<SignTxOpts>,
) -> Result<Json<TxProposal>, ApiError> {
    Ok(Json(service.sign_tx(&txp_id, opts).await?))
}

#[utoipa::path(
    post,
    path = "/v1/txproposals/{txp_id}/rejections",
    params(("txp_id" = String, Path, description = "Proposal id")),
    request_body = RejectTxOpts,
    tag = "Proposals",
    responses((status = 200, body = TxProposal), (status = 400, body = ErrorBody))
)]
pub async fn reject_tx(
    Path(txp_id): Path<String>,
    SignedJson(service, opts): SignedJson<RejectTxOpts>,
) -> Result<Json<TxProposal>, ApiError> {
    Ok(Json(service.reject_tx(&txp_id, opts).await?))
}

#[utoipa::path(
    post,
    path = "/v1/txproposals/{txp_id}/broadcast",
    params(("txp_id" = String, Path, description = "Proposal id")),
    tag = "Proposals",
    responses(
        (status = 200, body = TxProposal),
        (status = 400, body = ErrorBody),
        (status = 503, body = ErrorBody)
    )
)]
pub async fn broadcast_tx(
    Path(txp_id): Path<String>,
    SignedJson(service, _): SignedJson<Value>,
) -> Result<Json<TxProposal>, ApiError> {
    Ok(Json(service.broadcast_tx(&txp_id).await?))
}

#[utoipa::path(
    delete,
    path = "/v1/txproposals/{txp_id}",
    params(("txp_id" = String, Path, description = "Proposal id")),
    tag = "Proposals",
    responses((status = 204), (status = 400, body = ErrorBody))
)]
pub async fn remove_pending_tx(
    CopayerAuth(service): CopayerAuth,
    Path(txp_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    service.remove_pending_tx(&txp_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/v1/txs",
    params(TxsOpts),
    tag = "Proposals",
    responses((status = 200, body = [TxProposal]), (status = 401, body = ErrorBody))
)]
pub async fn get_txs(
    CopayerAuth(service): CopayerAuth,
    Query(opts): Query<TxsOpts>,
) -> Result<Json<Vec<TxProposal>>, ApiError> {
    Ok(Json(service.get_txs(&opts).await?))
}

#[utoipa::path(
    get,
    path = "/v1/txhistory",
    params(HistoryOpts),
    tag = "Proposals",
    responses((status = 200, body = [TxHistoryItem]), (status = 503, body = ErrorBody))
)]
pub async fn get_tx_history(
    CopayerAuth(service): CopayerAuth,
    Query(opts): Query<HistoryOpts>,
) -> Result<Json<Vec<TxHistoryItem>>, ApiError> {
    Ok(Json(service.get_tx_history(&opts).await?))
}
