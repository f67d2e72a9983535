// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Addresses, balance, UTXOs and fee levels.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::auth::{CopayerAuth, SignedJson};
use crate::chain::SendMaxInfo;
use crate::context::AppContext;
use crate::error::{ApiError, ErrorBody};
use crate::models::{Address, Utxo};
use crate::service::addresses::MainAddressesOpts;
use crate::service::balance::{SendMaxOpts, UtxoOpts};
use crate::service::{AddressOpts, Balance, FeeLevel, WalletService};

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ChainQuery {
    #[serde(default = "default_coin")]
    pub coin: String,
    #[serde(default = "default_network")]
    pub network: String,
}

fn default_coin() -> String {
    "btc".to_string()
}

fn default_network() -> String {
    "livenet".to_string()
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BlockHeightResponse {
    pub height: u64,
}

#[utoipa::path(
    post,
    path = "/v1/addresses",
    request_body = AddressOpts,
    tag = "Addresses",
    responses(
        (status = 201, body = Address),
        (status = 400, body = ErrorBody),
        (status = 503, body = ErrorBody)
    )
)]
pub async fn create_address(
    SignedJson(service, opts): SignedJson<AddressOpts>,
) -> Result<(StatusCode, Json<Address>), ApiError> {
    let address = service.create_address(opts).await?;
    Ok((StatusCode::CREATED, Json(address)))
}

#[utoipa::path(
    get,
    path = "/v1/addresses",
    params(MainAddressesOpts),
    tag = "Addresses",
    responses((status = 200, body = [Address]), (status = 401, body = ErrorBody))
)]
pub async fn get_main_addresses(
    CopayerAuth(service): CopayerAuth,
    Query(opts): Query<MainAddressesOpts>,
) -> Result<Json<Vec<Address>>, ApiError> {
    Ok(Json(service.get_main_addresses(&opts).await?))
}

#[utoipa::path(
    get,
    path = "/v1/balance",
    tag = "Addresses",
    responses((status = 200, body = Balance), (status = 401, body = ErrorBody))
)]
pub async fn get_balance(CopayerAuth(service): CopayerAuth) -> Result<Json<Balance>, ApiError> {
    Ok(Json(service.get_balance().await?))
}

#[utoipa::path(
    get,
    path = "/v1/utxos",
    params(UtxoOpts),
    tag = "Addresses",
    responses((status = 200, body = [Utxo]), (status = 401, body = ErrorBody))
)]
pub async fn get_utxos(
    CopayerAuth(service): CopayerAuth,
    Query(opts): Query<UtxoOpts>,
) -> Result<Json<Vec<Utxo>>, ApiError> {
    Ok(Json(service.get_utxos(&opts).await?))
}

#[utoipa::path(
    get,
    path = "/v1/sendmaxinfo",
    params(SendMaxOpts),
    tag = "Addresses",
    responses((status = 200, body = SendMaxInfo), (status = 401, body = ErrorBody))
)]
pub async fn get_send_max_info(
    CopayerAuth(service): CopayerAuth,
    Query(opts): Query<SendMaxOpts>,
) -> Result<Json<SendMaxInfo>, ApiError> {
    Ok(Json(service.get_send_max_info(&opts).await?))
}

#[utoipa::path(
    get,
    path = "/v1/feelevels",
    params(ChainQuery),
    tag = "Chains",
    responses((status = 200, body = [FeeLevel]), (status = 400, body = ErrorBody))
)]
pub async fn get_fee_levels(
    State(ctx): State<Arc<AppContext>>,
    Query(query): Query<ChainQuery>,
) -> Result<Json<Vec<FeeLevel>>, ApiError> {
    let levels = WalletService::anonymous(ctx)
        .get_fee_levels(&query.coin, &query.network)
        .await?;
    Ok(Json(levels))
}

#[utoipa::path(
    get,
    path = "/v1/blockheight",
    params(ChainQuery),
    tag = "Chains",
    responses((status = 200, body = BlockHeightResponse), (status = 503, body = ErrorBody))
)]
pub async fn get_blockchain_height(
    State(ctx): State<Arc<AppContext>>,
    Query(query): Query<ChainQuery>,
) -> Result<Json<BlockHeightResponse>, ApiError> {
    let height = WalletService::anonymous(ctx)
        .get_blockchain_height(&query.coin, &query.network)
        .await?;
    Ok(Json(BlockHeightResponse { height }))
}
