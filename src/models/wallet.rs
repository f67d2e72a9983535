// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Wallet / copayer aggregate and the address derivation counters.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{now_secs, Address};
use crate::crypto;
use crate::error::{ErrorCode, ServiceError, ServiceResult};

pub const MAX_COPAYERS: u32 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum WalletStatus {
    Pending,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Idle,
    Running,
    Error,
    Success,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum AddressType {
    P2pkh,
    P2sh,
}

// =============================================================================
// Copayer
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RequestPubKey {
    pub key: String,
    pub signature: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Copayer {
    pub id: String,
    pub name: String,
    pub copayer_index: u32,
    pub x_pub_key: String,
    /// Newest first.
    pub request_pub_keys: Vec<RequestPubKey>,
    pub created_on: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_data: Option<String>,
}

impl Copayer {
    /// Copayer ids are derived from the coin and the extended public key.
    pub fn id_for(coin: &str, x_pub_key: &str) -> String {
        crypto::sha256_hex(format!("{coin}|{x_pub_key}").as_bytes())
    }

    pub fn new(
        coin: &str,
        name: &str,
        x_pub_key: &str,
        request_pub_key: &str,
        signature: &str,
        copayer_index: u32,
    ) -> Self {
        Self {
            id: Self::id_for(coin, x_pub_key),
            name: name.to_string(),
            copayer_index,
            x_pub_key: x_pub_key.to_string(),
            request_pub_keys: vec![RequestPubKey {
                key: request_pub_key.to_string(),
                signature: signature.to_string(),
                name: None,
            }],
            created_on: now_secs(),
            custom_data: None,
        }
    }

    pub fn add_request_key(&mut self, key: RequestPubKey, max_keys: usize) -> ServiceResult<()> {
        if self.request_pub_keys.len() >= max_keys {
            return Err(ServiceError::client(ErrorCode::TooManyKeys));
        }
        self.request_pub_keys.insert(0, key);
        Ok(())
    }
}

/// Authentication index: copayer id → wallet and request keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopayerLookup {
    pub copayer_id: String,
    pub wallet_id: String,
    pub request_pub_keys: Vec<RequestPubKey>,
}

// =============================================================================
// Address Manager
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SkippedPath {
    pub path: String,
    pub is_change: bool,
    pub index: u32,
}

/// Per-branch derivation counters. Branch 0 is main (receive), 1 is change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AddressManager {
    pub receive_index: u32,
    pub change_index: u32,
    #[serde(default)]
    pub skipped_paths: Vec<SkippedPath>,
}

impl AddressManager {
    fn index(&self, is_change: bool) -> u32 {
        if is_change {
            self.change_index
        } else {
            self.receive_index
        }
    }

    fn index_mut(&mut self, is_change: bool) -> &mut u32 {
        if is_change {
            &mut self.change_index
        } else {
            &mut self.receive_index
        }
    }

    fn path(is_change: bool, index: u32) -> String {
        format!("m/{}/{}", u8::from(is_change), index)
    }

    pub fn current_path(&self, is_change: bool) -> String {
        Self::path(is_change, self.index(is_change))
    }

    /// Allocate the next path, advancing the branch by `step`.
    ///
    /// With `step > 1` the intermediate paths are recorded as skipped so a
    /// coarse scan can still store them later.
    pub fn new_address_path(&mut self, is_change: bool, step: u32) -> String {
        let step = step.max(1);
        let mut path = None;
        for _ in 0..step {
            if let Some(previous) = path.take() {
                self.skipped_paths.push(SkippedPath {
                    path: previous,
                    is_change,
                    index: self.index(is_change) - 1,
                });
            }
            path = Some(self.current_path(is_change));
            *self.index_mut(is_change) += 1;
        }
        path.unwrap_or_else(|| self.current_path(is_change))
    }

    /// Move the branch back by `n * step` and forget skipped paths past it.
    pub fn rewind(&mut self, is_change: bool, step: u32, n: u32) {
        let index = self.index_mut(is_change);
        *index = index.saturating_sub(n.saturating_mul(step.max(1)));
        let limit = *index;
        self.skipped_paths
            .retain(|s| s.is_change != is_change || s.index < limit);
    }

    pub fn next_skipped_path(&mut self) -> Option<SkippedPath> {
        self.skipped_paths.pop()
    }
}

// =============================================================================
// Wallet
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Wallet {
    pub version: u32,
    pub id: String,
    pub name: String,
    pub m: u32,
    pub n: u32,
    pub coin: String,
    pub network: String,
    pub address_type: AddressType,
    pub single_address: bool,
    pub status: WalletStatus,
    /// Key whose private half signs copayer join requests.
    pub pub_key: String,
    pub copayers: Vec<Copayer>,
    pub address_manager: AddressManager,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scan_status: Option<ScanStatus>,
    #[serde(default)]
    pub be_registered: bool,
    pub created_on: i64,
}

/// Parameters for [`Wallet::new`].
#[derive(Debug, Clone)]
pub struct WalletParams {
    pub id: String,
    pub name: String,
    pub m: u32,
    pub n: u32,
    pub coin: String,
    pub network: String,
    pub pub_key: String,
    pub single_address: bool,
}

impl Wallet {
    pub fn verify_copayer_limits(m: u32, n: u32) -> bool {
        (1..=MAX_COPAYERS).contains(&n) && (1..=n).contains(&m)
    }

    pub fn new(params: WalletParams) -> Self {
        let address_type = if params.n > 1 {
            AddressType::P2sh
        } else {
            AddressType::P2pkh
        };
        Self {
            version: 1,
            id: params.id,
            name: params.name,
            m: params.m,
            n: params.n,
            coin: params.coin,
            network: params.network,
            address_type,
            single_address: params.single_address,
            status: WalletStatus::Pending,
            pub_key: params.pub_key,
            copayers: Vec::new(),
            address_manager: AddressManager::default(),
            scan_status: None,
            be_registered: false,
            created_on: now_secs(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status == WalletStatus::Complete
    }

    pub fn is_shared(&self) -> bool {
        self.n > 1
    }

    pub fn is_scan_error(&self) -> bool {
        self.scan_status == Some(ScanStatus::Error)
    }

    pub fn copayer(&self, copayer_id: &str) -> Option<&Copayer> {
        self.copayers.iter().find(|c| c.id == copayer_id)
    }

    pub fn copayer_mut(&mut self, copayer_id: &str) -> Option<&mut Copayer> {
        self.copayers.iter_mut().find(|c| c.id == copayer_id)
    }

    /// Append a copayer. The wallet becomes complete at `n` copayers.
    pub fn add_copayer(&mut self, copayer: Copayer) -> ServiceResult<()> {
        if self.copayers.iter().any(|c| c.x_pub_key == copayer.x_pub_key) {
            return Err(ServiceError::client(ErrorCode::CopayerInWallet));
        }
        if self.copayers.len() as u32 >= self.n {
            return Err(ServiceError::client(ErrorCode::WalletFull));
        }
        self.copayers.push(copayer);
        if self.copayers.len() as u32 == self.n {
            self.status = WalletStatus::Complete;
        }
        Ok(())
    }

    pub fn x_pub_keys(&self) -> Vec<String> {
        self.copayers.iter().map(|c| c.x_pub_key.clone()).collect()
    }

    pub fn total_addresses(&self) -> u32 {
        self.address_manager.receive_index + self.address_manager.change_index
    }

    /// Derive the address at `path` for this wallet.
    pub fn derive_address(&self, prefix: &str, path: &str, is_change: bool) -> ServiceResult<Address> {
        Address::derive(self, prefix, path, is_change)
    }

    /// Allocate and derive a fresh address on the given branch.
    pub fn create_address(&mut self, prefix: &str, is_change: bool, step: u32) -> ServiceResult<Address> {
        if !self.is_complete() {
            return Err(ServiceError::client(ErrorCode::WalletNotComplete));
        }
        let path = self.address_manager.new_address_path(is_change, step);
        self.derive_address(prefix, &path, is_change)
    }

    /// Derive the next address skipped by a stepped allocation, if any.
    pub fn next_skipped_address(&mut self, prefix: &str) -> ServiceResult<Option<Address>> {
        match self.address_manager.next_skipped_path() {
            Some(skipped) => self
                .derive_address(prefix, &skipped.path, skipped.is_change)
                .map(Some),
            None => Ok(None),
        }
    }
}
