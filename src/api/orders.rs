// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Swap, conversion and merchant orders, plus operator endpoints.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::auth::Operator;
use crate::context::AppContext;
use crate::error::{ApiError, ErrorBody};
use crate::models::order::OrderFilter;
use crate::models::{Order, OrderKind};
use crate::swap::{self, CreateOrderOpts};

#[derive(Debug, Serialize, ToSchema)]
pub struct TaskInfo {
    pub name: String,
    pub running: bool,
}

#[utoipa::path(
    post,
    path = "/v1/orders",
    request_body = CreateOrderOpts,
    tag = "Orders",
    responses(
        (status = 201, body = Order),
        (status = 400, body = ErrorBody),
        (status = 503, body = ErrorBody)
    )
)]
pub async fn create_order(
    State(ctx): State<Arc<AppContext>>,
    Json(opts): Json<CreateOrderOpts>,
) -> Result<(StatusCode, Json<Order>), ApiError> {
    let order = swap::create_order(&ctx, opts).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

#[utoipa::path(
    get,
    path = "/v1/orders/{kind}/{order_id}",
    params(
        ("kind" = OrderKind, Path, description = "swap, conversion or merchant"),
        ("order_id" = String, Path, description = "Order id")
    ),
    tag = "Orders",
    responses((status = 200, body = Order), (status = 404, body = ErrorBody))
)]
pub async fn get_order(
    State(ctx): State<Arc<AppContext>>,
    Path((kind, order_id)): Path<(OrderKind, String)>,
) -> Result<Json<Order>, ApiError> {
    Ok(Json(swap::get_order(&ctx, kind, &order_id).await?))
}

// =============================================================================
// Operator
// =============================================================================

#[utoipa::path(
    get,
    path = "/v1/admin/orders",
    params(OrderFilter),
    tag = "Operator",
    security(("bearer" = [])),
    responses(
        (status = 200, body = [Order]),
        (status = 401, body = ErrorBody),
        (status = 403, body = ErrorBody)
    )
)]
pub async fn query_orders(
    _: Operator,
    State(ctx): State<Arc<AppContext>>,
    Query(filter): Query<OrderFilter>,
) -> Result<Json<Vec<Order>>, ApiError> {
    Ok(Json(swap::query_orders(&ctx, &filter).await?))
}

#[utoipa::path(
    get,
    path = "/v1/admin/tasks",
    tag = "Operator",
    security(("bearer" = [])),
    responses((status = 200, body = [TaskInfo]), (status = 403, body = ErrorBody))
)]
pub async fn list_tasks(_: Operator, State(ctx): State<Arc<AppContext>>) -> Json<Vec<TaskInfo>> {
    let supervisor = &ctx.supervisor;
    let tasks = supervisor
        .names()
        .into_iter()
        .map(|name| TaskInfo {
            running: supervisor.is_running(&name),
            name,
        })
        .collect();
    Json(tasks)
}

#[utoipa::path(
    post,
    path = "/v1/admin/tasks/{name}/restart",
    params(("name" = String, Path, description = "Task name, e.g. orders:swap")),
    tag = "Operator",
    security(("bearer" = [])),
    responses((status = 204), (status = 404, body = ErrorBody))
)]
pub async fn restart_task(
    _: Operator,
    State(ctx): State<Arc<AppContext>>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    if ctx.supervisor.restart(&name).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(format!("No task named {name}")))
    }
}
