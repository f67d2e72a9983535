// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Per-copayer settings, login sessions and subscriptions.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    pub wallet_id: String,
    pub copayer_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub copayer_id: String,
    pub wallet_id: String,
    pub created_on: i64,
    pub updated_on: i64,
}

impl Session {
    pub fn is_valid(&self, now: i64, expiration_secs: i64) -> bool {
        now - self.updated_on <= expiration_secs
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PushNotificationSub {
    pub copayer_id: String,
    pub token: String,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub package_name: Option<String>,
    pub created_on: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TxConfirmationSub {
    pub wallet_id: String,
    pub copayer_id: String,
    pub txid: String,
    pub coin: String,
    pub network: String,
    pub is_active: bool,
    pub created_on: i64,
}
