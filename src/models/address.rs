// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Derived wallet addresses.
//!
//! Derivation is deterministic: each copayer's key is tweaked with the path
//! (HMAC-SHA256), the tweaks are sorted and hashed together with the
//! threshold, and the first 20 bytes become the address payload behind the
//! coin/network prefix.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{now_secs, Wallet};
use crate::crypto;
use crate::error::{ServiceError, ServiceResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    pub address: String,
    pub wallet_id: String,
    pub coin: String,
    pub network: String,
    pub path: String,
    pub is_change: bool,
    /// Sticky: once observed on-chain it is never reset.
    #[serde(default)]
    pub has_activity: bool,
    #[serde(default)]
    pub be_registered: bool,
    pub public_keys: Vec<String>,
    pub created_on: i64,
}

impl Address {
    pub fn derive(wallet: &Wallet, prefix: &str, path: &str, is_change: bool) -> ServiceResult<Self> {
        if wallet.copayers.is_empty() {
            return Err(ServiceError::invariant(format!(
                "deriving address for wallet {} without copayers",
                wallet.id
            )));
        }

        let mut public_keys = wallet
            .copayers
            .iter()
            .map(|c| {
                crypto::hmac_sha256(c.x_pub_key.as_bytes(), path.as_bytes())
                    .map(hex::encode)
                    .map_err(|e| ServiceError::invariant(e.to_string()))
            })
            .collect::<ServiceResult<Vec<_>>>()?;
        public_keys.sort();

        let script = format!("{}|{}", wallet.m, public_keys.join(","));
        let digest = crypto::sha256(script.as_bytes());
        let address = format!("{prefix}{}", hex::encode(&digest[..20]));

        Ok(Self {
            address,
            wallet_id: wallet.id.clone(),
            coin: wallet.coin.clone(),
            network: wallet.network.clone(),
            path: path.to_string(),
            is_change,
            has_activity: false,
            be_registered: false,
            public_keys,
            created_on: now_secs(),
        })
    }

    /// Index component of the derivation path (`m/<branch>/<index>`).
    pub fn index(&self) -> Option<u32> {
        self.path.rsplit('/').next()?.parse().ok()
    }
}

/// Whether `address` is `prefix` followed by a 20-byte hex payload.
pub fn has_valid_payload(prefix: &str, address: &str) -> bool {
    match address.strip_prefix(prefix) {
        Some(payload) => payload.len() == 40 && payload.chars().all(|c| c.is_ascii_hexdigit()),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::wallet::WalletParams;
    use crate::models::Copayer;

    fn complete_wallet() -> Wallet {
        let mut w = Wallet::new(WalletParams {
            id: "w1".into(),
            name: "test".into(),
            m: 2,
            n: 2,
            coin: "btc".into(),
            network: "livenet".into(),
            pub_key: "02aa".into(),
            single_address: false,
        });
        w.add_copayer(Copayer::new("btc", "a", "xpubA", "r", "s", 0)).unwrap();
        w.add_copayer(Copayer::new("btc", "b", "xpubB", "r", "s", 1)).unwrap();
        w
    }

    #[test]
    fn derivation_is_deterministic_and_path_dependent() {
        let w = complete_wallet();
        let a = Address::derive(&w, "bc1q", "m/0/0", false).unwrap();
        let b = Address::derive(&w, "bc1q", "m/0/0", false).unwrap();
        let c = Address::derive(&w, "bc1q", "m/0/1", false).unwrap();
        assert_eq!(a.address, b.address);
        assert_ne!(a.address, c.address);
        assert!(has_valid_payload("bc1q", &a.address));
        assert_eq!(a.public_keys.len(), 2);
        assert_eq!(c.index(), Some(1));
    }

    #[test]
    fn payload_validation() {
        assert!(has_valid_payload("0x", &format!("0x{}", "ab".repeat(20))));
        assert!(!has_valid_payload("0x", &format!("0x{}", "ab".repeat(19))));
        assert!(!has_valid_payload("bc1q", &format!("tb1q{}", "00".repeat(20))));
        assert!(!has_valid_payload("bc1q", &format!("bc1q{}", "zz".repeat(20))));
    }
}
