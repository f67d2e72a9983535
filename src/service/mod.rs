// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Wallet Service
//!
//! A [`WalletService`] is created per request and bound to the authenticated
//! `(walletId, copayerId)`. Every operation that mutates wallet-scoped state
//! (address counters, proposals, copayers) runs inside
//! [`WalletService::run_locked`], which holds the distributed wallet lock for
//! the whole read-modify-write span.
//!
//! ## Operation groups
//!
//! | Module | Operations |
//! |--------|------------|
//! | [`wallet`] | create / join / status / access keys / preferences / sessions / subscriptions |
//! | [`addresses`] | address creation with gap limit, listing |
//! | [`fees`] | fee levels, block height |
//! | [`balance`] | UTXO reconciliation, balance, send-max |
//! | [`proposals`] | proposal lifecycle and history |
//! | [`sync`] | explorer registration, sync checks, scanning |
//! | [`notifications`] | ticker, feed |

pub mod addresses;
pub mod balance;
pub mod fees;
pub mod notifications;
pub mod proposals;
pub mod sync;
pub mod wallet;

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::debug;

use crate::chain::ChainCapability;
use crate::context::AppContext;
use crate::crypto;
use crate::error::{ErrorCode, ServiceError, ServiceResult};
use crate::explorer::BlockchainExplorer;
use crate::models::{now_secs, Wallet};

pub use addresses::AddressOpts;
pub use balance::{AddressBalance, Balance};
pub use fees::FeeLevel;
pub use notifications::{NotificationOpts, Notifier};
pub use proposals::{CreateTxOpts, OutputOpts, TxHistoryItem};
pub use sync::ScanOpts;
pub use wallet::{CreateWalletOpts, JoinWalletOpts, WalletStatusInfo};

/// How a request proves it speaks for a copayer.
#[derive(Debug, Clone)]
pub enum AuthProof {
    /// Signature over `message` by one of the copayer's request keys.
    Signature { message: String, signature: String },
    /// Token from a previous login.
    Session(String),
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub copayer_id: String,
    pub proof: AuthProof,
}

pub struct WalletService {
    ctx: Arc<AppContext>,
    copayer_id: Option<String>,
    wallet_id: Option<String>,
    /// Lock keys held by an enclosing call on this service.
    held_locks: Mutex<HashSet<String>>,
}

/// Marks a lock key as held by this service until dropped.
struct HeldKey<'a> {
    set: &'a Mutex<HashSet<String>>,
    key: String,
}

impl Drop for HeldKey<'_> {
    fn drop(&mut self) {
        if let Ok(mut held) = self.set.lock() {
            held.remove(&self.key);
        }
    }
}

/// Client-chosen ids become storage key segments, so they may not carry
/// the `|` separator.
pub(crate) fn validate_client_id(id: &str, what: &str) -> ServiceResult<()> {
    if id.is_empty() || id.contains('|') {
        return Err(ServiceError::invalid(format!("Invalid {what} id")));
    }
    Ok(())
}

impl WalletService {
    /// Unauthenticated service, for wallet creation and joining.
    pub fn anonymous(ctx: Arc<AppContext>) -> Self {
        Self {
            ctx,
            copayer_id: None,
            wallet_id: None,
            held_locks: Mutex::new(HashSet::new()),
        }
    }

    /// Service bound to a copayer of a wallet. Callers must have
    /// authenticated the copayer.
    pub fn bound(ctx: Arc<AppContext>, wallet_id: &str, copayer_id: &str) -> Self {
        Self {
            copayer_id: Some(copayer_id.to_string()),
            wallet_id: Some(wallet_id.to_string()),
            ..Self::anonymous(ctx)
        }
    }

    /// Verify credentials and bind the service to the copayer's wallet.
    pub async fn authenticate(ctx: Arc<AppContext>, creds: &Credentials) -> ServiceResult<Self> {
        let lookup = ctx
            .storage
            .fetch_copayer_lookup(&creds.copayer_id)
            .await?
            .ok_or_else(|| ServiceError::client_msg(ErrorCode::NotAuthorized, "Copayer not found"))?;

        match &creds.proof {
            AuthProof::Signature { message, signature } => {
                let valid = lookup
                    .request_pub_keys
                    .iter()
                    .any(|k| crypto::verify_message(message, signature, &k.key));
                if !valid {
                    return Err(ServiceError::client_msg(ErrorCode::NotAuthorized, "Invalid signature"));
                }
            }
            AuthProof::Session(token) => {
                let expiration = ctx.config.policy.session_expiration.as_secs() as i64;
                let now = now_secs();
                let mut session = ctx
                    .storage
                    .fetch_session(&creds.copayer_id)
                    .await?
                    .filter(|s| s.id == *token && s.is_valid(now, expiration))
                    .ok_or_else(|| ServiceError::client_msg(ErrorCode::NotAuthorized, "Session expired"))?;
                session.updated_on = now;
                ctx.storage.store_session(&session).await?;
            }
        }

        debug!(copayer_id = %creds.copayer_id, wallet_id = %lookup.wallet_id, "Copayer authenticated");
        Ok(Self::bound(ctx, &lookup.wallet_id, &creds.copayer_id))
    }

    pub fn context(&self) -> &Arc<AppContext> {
        &self.ctx
    }

    pub fn wallet_id(&self) -> ServiceResult<&str> {
        self.wallet_id
            .as_deref()
            .ok_or_else(|| ServiceError::invariant("operation requires a bound wallet"))
    }

    pub fn copayer_id(&self) -> ServiceResult<&str> {
        self.copayer_id
            .as_deref()
            .ok_or_else(|| ServiceError::invariant("operation requires a bound copayer"))
    }

    // =========================================================================
    // Locking
    // =========================================================================

    /// Run `task` holding the wallet lock with the default wait time.
    pub async fn run_locked<T, F>(&self, task: F) -> ServiceResult<T>
    where
        F: Future<Output = ServiceResult<T>>,
    {
        let wait = self.ctx.config.policy.lock_wait_time;
        self.run_locked_with(wait, task).await
    }

    /// Run `task` holding the wallet lock.
    ///
    /// Nested calls on the same service reuse the enclosing acquisition.
    pub async fn run_locked_with<T, F>(&self, wait: Duration, task: F) -> ServiceResult<T>
    where
        F: Future<Output = ServiceResult<T>>,
    {
        let key = self.wallet_id()?.to_string();
        if self.is_holding(&key) {
            return task.await;
        }
        self.ctx
            .lock
            .run_locked(&key, wait, async {
                let _held = self.hold(&key);
                task.await
            })
            .await
    }

    fn is_holding(&self, key: &str) -> bool {
        self.held_locks
            .lock()
            .map(|held| held.contains(key))
            .unwrap_or(false)
    }

    fn hold(&self, key: &str) -> HeldKey<'_> {
        if let Ok(mut held) = self.held_locks.lock() {
            held.insert(key.to_string());
        }
        HeldKey {
            set: &self.held_locks,
            key: key.to_string(),
        }
    }

    // =========================================================================
    // Shared lookups
    // =========================================================================

    pub async fn get_wallet(&self) -> ServiceResult<Wallet> {
        let wallet_id = self.wallet_id()?;
        self.ctx
            .storage
            .fetch_wallet(wallet_id)
            .await?
            .ok_or_else(|| ServiceError::client(ErrorCode::WalletNotFound))
    }

    pub(crate) fn chain(&self, coin: &str) -> ServiceResult<Arc<dyn ChainCapability>> {
        self.ctx.chains.get(coin)
    }

    pub(crate) fn explorer(&self, coin: &str, network: &str) -> ServiceResult<Arc<dyn BlockchainExplorer>> {
        self.ctx
            .explorers
            .get(coin, network)
            .ok_or_else(|| ServiceError::invalid(format!("No explorer configured for {coin}/{network}")))
    }

    pub(crate) fn explorer_for(&self, wallet: &Wallet) -> ServiceResult<Arc<dyn BlockchainExplorer>> {
        self.explorer(&wallet.coin, &wallet.network)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{setup_wallet, test_context};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn authenticate_with_request_key_signature() {
        let (_dir, ctx, _explorer) = test_context();
        let (wallet_id, copayers) = setup_wallet(&ctx, 1, 1, "btc").await;
        let copayer = &copayers[0];

        let creds = Credentials {
            copayer_id: copayer.id.clone(),
            proof: AuthProof::Signature {
                message: "get|/v1/wallets/|{}".into(),
                signature: crypto::sign_message(&copayer.request_key, "get|/v1/wallets/|{}"),
            },
        };
        let service = WalletService::authenticate(ctx.clone(), &creds).await.unwrap();
        assert_eq!(service.wallet_id().unwrap(), wallet_id);

        let bad = Credentials {
            proof: AuthProof::Signature {
                message: "other".into(),
                signature: crypto::sign_message(&copayer.request_key, "get|/v1/wallets/|{}"),
            },
            ..creds
        };
        let err = WalletService::authenticate(ctx.clone(), &bad).await.err().unwrap();
        assert!(err.is_code(ErrorCode::NotAuthorized));

        let unknown = Credentials {
            copayer_id: "nobody".into(),
            proof: AuthProof::Session("x".into()),
        };
        let err = WalletService::authenticate(ctx, &unknown).await.err().unwrap();
        assert!(err.is_code(ErrorCode::NotAuthorized));
    }

    #[tokio::test]
    async fn nested_run_locked_does_not_deadlock() {
        let (_dir, ctx, _explorer) = test_context();
        let service = WalletService::bound(ctx, "w1", "c1");
        let inner_runs = AtomicUsize::new(0);

        service
            .run_locked(async {
                service
                    .run_locked_with(Duration::from_millis(100), async {
                        inner_runs.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .await
            })
            .await
            .unwrap();
        assert_eq!(inner_runs.load(Ordering::SeqCst), 1);
        assert!(!service.is_holding("w1"));
    }

    #[tokio::test]
    async fn other_services_wait_for_the_lock() {
        let (_dir, ctx, _explorer) = test_context();
        let a = WalletService::bound(ctx.clone(), "w1", "c1");
        let b = WalletService::bound(ctx, "w1", "c2");

        let err = a
            .run_locked(async {
                b.run_locked_with(Duration::from_millis(100), async { Ok(()) })
                    .await
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::LockTimeout(_)));
    }
}
