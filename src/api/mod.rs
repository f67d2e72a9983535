// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    context::AppContext,
    error::ErrorBody,
    models::{
        Address, Notification, NotificationType, Order, OrderErrorCode, OrderKind, OrderStatus, Preferences,
        TxOutput, TxProposal, TxpAction, TxpStatus, Utxo, Wallet,
    },
    service::{Balance, CreateTxOpts, CreateWalletOpts, FeeLevel, JoinWalletOpts, ScanOpts, WalletStatusInfo},
    swap::CreateOrderOpts,
};

pub mod addresses;
pub mod health;
pub mod notifications;
pub mod orders;
pub mod txproposals;
pub mod wallets;

pub fn router(ctx: Arc<AppContext>) -> Router {
    let v1_routes = Router::new()
        // Wallets and copayers
        .route(
            "/v1/wallets",
            post(wallets::create_wallet)
                .get(wallets::get_status)
                .delete(wallets::remove_wallet),
        )
        .route("/v1/wallets/{wallet_id}/copayers", post(wallets::join_wallet))
        .route("/v1/wallets/scan", post(wallets::start_scan))
        .route("/v1/copayers/access", post(wallets::add_access))
        .route(
            "/v1/preferences",
            get(wallets::get_preferences).put(wallets::save_preferences),
        )
        .route("/v1/login", post(wallets::login))
        .route("/v1/logout", post(wallets::logout))
        .route("/v1/pushnotifications/subscriptions", post(wallets::push_subscribe))
        .route(
            "/v1/pushnotifications/subscriptions/{token}",
            delete(wallets::push_unsubscribe),
        )
        .route("/v1/txconfirmations", post(wallets::tx_confirmation_subscribe))
        .route("/v1/txconfirmations/{txid}", delete(wallets::tx_confirmation_unsubscribe))
        // Addresses and funds
        .route(
            "/v1/addresses",
            post(addresses::create_address).get(addresses::get_main_addresses),
        )
        .route("/v1/balance", get(addresses::get_balance))
        .route("/v1/utxos", get(addresses::get_utxos))
        .route("/v1/sendmaxinfo", get(addresses::get_send_max_info))
        .route("/v1/feelevels", get(addresses::get_fee_levels))
        .route("/v1/blockheight", get(addresses::get_blockchain_height))
        // Proposals
        .route(
            "/v1/txproposals",
            post(txproposals::create_tx).get(txproposals::get_pending_txs),
        )
        .route(
            "/v1/txproposals/{txp_id}",
            get(txproposals::get_tx).delete(txproposals::remove_pending_tx),
        )
        .route("/v1/txproposals/{txp_id}/publish", post(txproposals::publish_tx))
        .route("/v1/txproposals/{txp_id}/signatures", post(txproposals::sign_tx))
        .route("/v1/txproposals/{txp_id}/rejections", post(txproposals::reject_tx))
        .route("/v1/txproposals/{txp_id}/broadcast", post(txproposals::broadcast_tx))
        .route("/v1/txs", get(txproposals::get_txs))
        .route("/v1/txhistory", get(txproposals::get_tx_history))
        .route("/v1/notifications", get(notifications::get_notifications))
        // Orders
        .route("/v1/orders", post(orders::create_order))
        .route("/v1/orders/{kind}/{order_id}", get(orders::get_order))
        .route("/v1/admin/orders", get(orders::query_orders))
        .route("/v1/admin/tasks", get(orders::list_tasks))
        .route("/v1/admin/tasks/{name}/restart", post(orders::restart_task))
        // Health
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .with_state(ctx);

    Router::new()
        .merge(v1_routes)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(CorsLayer::permissive())
}

#[derive(OpenApi)]
#[openapi(
    paths(
        wallets::create_wallet,
        wallets::join_wallet,
        wallets::get_status,
        wallets::remove_wallet,
        wallets::start_scan,
        wallets::add_access,
        wallets::get_preferences,
        wallets::save_preferences,
        wallets::login,
        wallets::logout,
        wallets::push_subscribe,
        wallets::push_unsubscribe,
        wallets::tx_confirmation_subscribe,
        wallets::tx_confirmation_unsubscribe,
        addresses::create_address,
        addresses::get_main_addresses,
        addresses::get_balance,
        addresses::get_utxos,
        addresses::get_send_max_info,
        addresses::get_fee_levels,
        addresses::get_blockchain_height,
        txproposals::create_tx,
        txproposals::get_pending_txs,
        txproposals::get_tx,
        txproposals::publish_tx,
        txproposals::sign_tx,
        txproposals::reject_tx,
        txproposals::broadcast_tx,
        txproposals::remove_pending_tx,
        txproposals::get_txs,
        txproposals::get_tx_history,
        notifications::get_notifications,
        orders::create_order,
        orders::get_order,
        orders::query_orders,
        orders::list_tasks,
        orders::restart_task,
        health::health,
        health::liveness,
        health::readiness
    ),
    components(
        schemas(
            ErrorBody,
            Wallet,
            WalletStatusInfo,
            CreateWalletOpts,
            JoinWalletOpts,
            ScanOpts,
            Preferences,
            Address,
            Balance,
            Utxo,
            FeeLevel,
            CreateTxOpts,
            TxProposal,
            TxpStatus,
            TxpAction,
            TxOutput,
            Notification,
            NotificationType,
            CreateOrderOpts,
            Order,
            OrderKind,
            OrderStatus,
            OrderErrorCode
        )
    ),
    tags(
        (name = "Wallets", description = "Wallet creation, joining and status"),
        (name = "Preferences", description = "Per-copayer preferences"),
        (name = "Sessions", description = "Session login and logout"),
        (name = "Subscriptions", description = "Push and confirmation subscriptions"),
        (name = "Addresses", description = "Addresses, balance and UTXOs"),
        (name = "Chains", description = "Fee levels and block height"),
        (name = "Proposals", description = "Transaction proposals and history"),
        (name = "Notifications", description = "Wallet notification feed"),
        (name = "Orders", description = "Swap, conversion and merchant orders"),
        (name = "Operator", description = "Operator order queries and task control"),
        (name = "Health", description = "Liveness and readiness probes")
    )
)]
struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{IDENTITY_HEADER, SIGNATURE_HEADER};
    use crate::crypto;
    use crate::testing::{join_opts, key, test_context, TestCopayer};
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn post_json(uri: &str, body: &Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn router_builds_with_all_routes() {
        let (_dir, ctx, _explorer) = test_context();
        let app = router(ctx);
        let (status, body) = send(&app, Request::get("/health/live").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn wallet_flow_over_http() {
        let (_dir, ctx, _explorer) = test_context();
        let app = router(ctx);

        let (status, created) = send(
            &app,
            post_json(
                "/v1/wallets",
                &json!({ "name": "shared", "m": 1, "n": 1, "pubKey": crypto::public_key_hex(&key(1)) }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let wallet_id = created["walletId"].as_str().unwrap().to_string();

        let copayer = TestCopayer::new(11);
        let opts = join_opts(&wallet_id, &copayer, 1);
        let (status, joined) = send(
            &app,
            post_json(
                &format!("/v1/wallets/{wallet_id}/copayers"),
                &json!({
                    "walletId": wallet_id,
                    "coin": opts.coin,
                    "name": opts.name,
                    "xPubKey": opts.x_pub_key,
                    "requestPubKey": opts.request_pub_key,
                    "copayerSignature": opts.copayer_signature,
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(joined["copayerId"], copayer.id);

        let unsigned = Request::get("/v1/wallets").body(Body::empty()).unwrap();
        let (status, error) = send(&app, unsigned).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(error["code"], "NOT_AUTHORIZED");

        let signed = Request::get("/v1/wallets")
            .header(IDENTITY_HEADER, copayer.id.as_str())
            .header(
                SIGNATURE_HEADER,
                crypto::sign_message(&copayer.request_key, "get|/v1/wallets|{}"),
            )
            .body(Body::empty())
            .unwrap();
        let (status, info) = send(&app, signed).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(info["wallet"]["id"], wallet_id.as_str());
    }

    #[tokio::test]
    async fn operator_routes_require_configured_token() {
        let (_dir, ctx, _explorer) = test_context();
        let app = router(ctx);
        let request = Request::get("/v1/admin/orders")
            .header("authorization", "Bearer anything")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "OPERATOR_DISABLED");
    }

    #[test]
    fn openapi_lists_order_routes() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/v1/orders"));
        assert!(doc.paths.paths.contains_key("/v1/txproposals/{txp_id}/signatures"));
    }
}
