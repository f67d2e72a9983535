// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{extract::Query, Json};

use crate::auth::CopayerAuth;
use crate::error::{ApiError, ErrorBody};
use crate::models::Notification;
use crate::service::NotificationOpts;

/// Poll the wallet's notifications, including chain events for its network.
#[utoipa::path(
    get,
    path = "/v1/notifications",
    params(NotificationOpts),
    tag = "Notifications",
    responses(
        (status = 200, body = [Notification]),
        (status = 400, body = ErrorBody),
        (status = 401, body = ErrorBody)
    )
)]
pub async fn get_notifications(
    CopayerAuth(service): CopayerAuth,
    Query(opts): Query<NotificationOpts>,
) -> Result<Json<Vec<Notification>>, ApiError> {
    Ok(Json(service.get_notifications(&opts).await?))
}
