// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Wallet lifecycle, copayer access and per-copayer settings.

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use utoipa::ToSchema;

use super::balance::Balance;
use super::{validate_client_id, WalletService};
use crate::crypto;
use crate::error::{ErrorCode, ServiceError, ServiceResult};
use crate::models::wallet::WalletParams;
use crate::models::{
    now_secs, Copayer, NotificationType, Preferences, PushNotificationSub, RequestPubKey, Session,
    TxConfirmationSub, TxProposal, Wallet,
};
use crate::storage::StorageError;

const NETWORKS: [&str; 2] = ["livenet", "testnet"];

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateWalletOpts {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub m: u32,
    pub n: u32,
    /// Public half of the key that signs join requests.
    pub pub_key: String,
    #[serde(default = "default_coin")]
    pub coin: String,
    #[serde(default = "default_network")]
    pub network: String,
    #[serde(default)]
    pub single_address: bool,
}

fn default_coin() -> String {
    "btc".to_string()
}

fn default_network() -> String {
    "livenet".to_string()
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JoinWalletOpts {
    pub wallet_id: String,
    #[serde(default = "default_coin")]
    pub coin: String,
    pub name: String,
    pub x_pub_key: String,
    pub request_pub_key: String,
    /// Signature of `name|xPubKey|requestPubKey` by the wallet key.
    pub copayer_signature: String,
    #[serde(default)]
    pub custom_data: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JoinWalletResult {
    pub copayer_id: String,
    pub wallet: Wallet,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AddAccessOpts {
    pub request_pub_key: String,
    /// Signature of the new request key by the copayer's xPubKey.
    pub signature: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WalletStatusInfo {
    pub wallet: Wallet,
    pub balance: Balance,
    pub pending_txps: Vec<TxProposal>,
    pub preferences: Option<Preferences>,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PreferencesOpts {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PushSubOpts {
    pub token: String,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub package_name: Option<String>,
}

impl WalletService {
    // =========================================================================
    // Creation and joining
    // =========================================================================

    pub async fn create_wallet(&self, opts: CreateWalletOpts) -> ServiceResult<String> {
        if opts.name.trim().is_empty() {
            return Err(ServiceError::invalid("Missing wallet name"));
        }
        if !Wallet::verify_copayer_limits(opts.m, opts.n) {
            return Err(ServiceError::invalid("Invalid combination of required copayers / total copayers"));
        }
        let chain = self.chain(&opts.coin)?;
        if !NETWORKS.contains(&opts.network.as_str()) {
            return Err(ServiceError::invalid("Invalid network"));
        }
        crypto::parse_public_key(&opts.pub_key).map_err(|_| ServiceError::invalid("Invalid public key"))?;
        if let Some(id) = &opts.id {
            validate_client_id(id, "wallet")?;
        }

        let wallet = Wallet::new(WalletParams {
            id: opts.id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            name: opts.name,
            m: opts.m,
            n: opts.n,
            single_address: opts.single_address || chain.is_single_address(),
            coin: opts.coin,
            network: opts.network,
            pub_key: opts.pub_key,
        });

        match self.ctx.storage.create_wallet(&wallet).await {
            Ok(()) => {}
            Err(StorageError::AlreadyExists(_)) => {
                return Err(ServiceError::client(ErrorCode::WalletAlreadyExists))
            }
            Err(e) => return Err(e.into()),
        }
        info!(wallet_id = %wallet.id, coin = %wallet.coin, m = wallet.m, n = wallet.n, "Wallet created");
        Ok(wallet.id)
    }

    pub async fn join_wallet(&self, opts: JoinWalletOpts) -> ServiceResult<JoinWalletResult> {
        crypto::parse_public_key(&opts.x_pub_key).map_err(|_| ServiceError::invalid("Invalid xPubKey"))?;
        crypto::parse_public_key(&opts.request_pub_key)
            .map_err(|_| ServiceError::invalid("Invalid requestPubKey"))?;

        let wait = self.ctx.config.policy.lock_wait_time;
        let (wallet, copayer) = self
            .ctx
            .lock
            .run_locked(&opts.wallet_id, wait, async {
                let mut wallet = self
                    .ctx
                    .storage
                    .fetch_wallet(&opts.wallet_id)
                    .await?
                    .ok_or_else(|| ServiceError::client(ErrorCode::WalletNotFound))?;
                if wallet.coin != opts.coin {
                    return Err(ServiceError::invalid(
                        "The wallet you are trying to join was created for a different coin",
                    ));
                }

                let hash = crypto::copayer_hash(&opts.name, &opts.x_pub_key, &opts.request_pub_key);
                if !crypto::verify_message(&hash, &opts.copayer_signature, &wallet.pub_key) {
                    return Err(ServiceError::client_msg(ErrorCode::NotAuthorized, "Bad request"));
                }
                if wallet.copayers.iter().any(|c| c.x_pub_key == opts.x_pub_key) {
                    return Err(ServiceError::client(ErrorCode::CopayerInWallet));
                }
                if wallet.copayers.len() as u32 >= wallet.n {
                    return Err(ServiceError::client(ErrorCode::WalletFull));
                }

                let mut copayer = Copayer::new(
                    &wallet.coin,
                    &opts.name,
                    &opts.x_pub_key,
                    &opts.request_pub_key,
                    &opts.copayer_signature,
                    wallet.copayers.len() as u32,
                );
                copayer.custom_data = opts.custom_data.clone();

                if self.ctx.storage.fetch_copayer_lookup(&copayer.id).await?.is_some() {
                    return Err(ServiceError::client(ErrorCode::CopayerRegistered));
                }

                wallet.add_copayer(copayer.clone())?;
                self.ctx
                    .storage
                    .store_wallet_and_update_copayers_lookup(&wallet)
                    .await?;
                Ok((wallet, copayer))
            })
            .await?;

        info!(wallet_id = %wallet.id, copayer_id = %copayer.id, complete = wallet.is_complete(), "Copayer joined");

        let notifier = &self.ctx.notifier;
        notifier
            .notify(
                NotificationType::NewCopayer,
                &wallet.id,
                Some(&copayer.id),
                json!({ "walletId": wallet.id, "copayerId": copayer.id, "copayerName": copayer.name }),
            )
            .await;
        if wallet.is_complete() && wallet.is_shared() {
            notifier
                .notify(
                    NotificationType::WalletComplete,
                    &wallet.id,
                    None,
                    json!({ "walletId": wallet.id }),
                )
                .await;
        }

        Ok(JoinWalletResult {
            copayer_id: copayer.id,
            wallet,
        })
    }

    /// Register an additional request key for the calling copayer.
    pub async fn add_access(&self, opts: AddAccessOpts) -> ServiceResult<Wallet> {
        let copayer_id = self.copayer_id()?.to_string();
        let max_keys = self.ctx.config.policy.max_keys;
        self.run_locked(async {
            let mut wallet = self.get_wallet().await?;
            let copayer = wallet
                .copayer_mut(&copayer_id)
                .ok_or_else(|| ServiceError::client(ErrorCode::CopayerNotFound))?;
            if !crypto::verify_message(&opts.request_pub_key, &opts.signature, &copayer.x_pub_key) {
                return Err(ServiceError::client_msg(ErrorCode::NotAuthorized, "Bad signature"));
            }
            copayer.add_request_key(
                RequestPubKey {
                    key: opts.request_pub_key.clone(),
                    signature: opts.signature.clone(),
                    name: opts.name.clone(),
                },
                max_keys,
            )?;
            self.ctx
                .storage
                .store_wallet_and_update_copayers_lookup(&wallet)
                .await?;
            Ok(wallet)
        })
        .await
    }

    // =========================================================================
    // Status and removal
    // =========================================================================

    pub async fn get_status(&self) -> ServiceResult<WalletStatusInfo> {
        let wallet = self.get_wallet().await?;
        let balance = self.get_balance().await?;
        let pending_txps = self.get_pending_txs().await?;
        let preferences = self.get_preferences().await?;
        Ok(WalletStatusInfo {
            wallet,
            balance,
            pending_txps,
            preferences,
        })
    }

    pub async fn remove_wallet(&self) -> ServiceResult<()> {
        self.run_locked(async {
            let wallet = self.get_wallet().await?;
            self.ctx.storage.remove_wallet(&wallet.id).await?;
            info!(wallet_id = %wallet.id, "Wallet removed");
            Ok(())
        })
        .await
    }

    // =========================================================================
    // Preferences and sessions
    // =========================================================================

    pub async fn get_preferences(&self) -> ServiceResult<Option<Preferences>> {
        Ok(self
            .ctx
            .storage
            .fetch_preferences(self.wallet_id()?, self.copayer_id()?)
            .await?)
    }

    pub async fn save_preferences(&self, opts: PreferencesOpts) -> ServiceResult<Preferences> {
        if let Some(email) = &opts.email {
            if !email.contains('@') || email.len() > 254 {
                return Err(ServiceError::invalid("Invalid email"));
            }
        }
        if let Some(language) = &opts.language {
            if !(2..=5).contains(&language.len()) {
                return Err(ServiceError::invalid("Invalid language"));
            }
        }
        if let Some(unit) = &opts.unit {
            if !["btc", "bit"].contains(&unit.to_lowercase().as_str()) {
                return Err(ServiceError::invalid("Invalid unit"));
            }
        }

        let mut preferences = self.get_preferences().await?.unwrap_or_else(|| Preferences {
            wallet_id: self.wallet_id.clone().unwrap_or_default(),
            copayer_id: self.copayer_id.clone().unwrap_or_default(),
            ..Default::default()
        });
        if opts.email.is_some() {
            preferences.email = opts.email;
        }
        if opts.language.is_some() {
            preferences.language = opts.language;
        }
        if opts.unit.is_some() {
            preferences.unit = opts.unit.map(|u| u.to_lowercase());
        }
        self.ctx.storage.store_preferences(&preferences).await?;
        Ok(preferences)
    }

    /// Start (or refresh) the copayer's session and return its token.
    pub async fn login(&self) -> ServiceResult<String> {
        let copayer_id = self.copayer_id()?;
        let now = now_secs();
        let expiration = self.ctx.config.policy.session_expiration.as_secs() as i64;

        let session = match self.ctx.storage.fetch_session(copayer_id).await? {
            Some(mut s) if s.is_valid(now, expiration) => {
                s.updated_on = now;
                s
            }
            _ => Session {
                id: uuid::Uuid::new_v4().to_string(),
                copayer_id: copayer_id.to_string(),
                wallet_id: self.wallet_id()?.to_string(),
                created_on: now,
                updated_on: now,
            },
        };
        self.ctx.storage.store_session(&session).await?;
        Ok(session.id)
    }

    pub async fn logout(&self) -> ServiceResult<()> {
        Ok(self.ctx.storage.remove_session(self.copayer_id()?).await?)
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    pub async fn push_notifications_subscribe(&self, opts: PushSubOpts) -> ServiceResult<()> {
        if opts.token.is_empty() {
            return Err(ServiceError::invalid("Missing token"));
        }
        let sub = PushNotificationSub {
            copayer_id: self.copayer_id()?.to_string(),
            token: opts.token,
            platform: opts.platform,
            package_name: opts.package_name,
            created_on: now_secs(),
        };
        Ok(self.ctx.storage.store_push_sub(&sub).await?)
    }

    pub async fn push_notifications_unsubscribe(&self, token: &str) -> ServiceResult<()> {
        Ok(self.ctx.storage.remove_push_sub(self.copayer_id()?, token).await?)
    }

    pub async fn tx_confirmation_subscribe(&self, txid: &str) -> ServiceResult<()> {
        if txid.is_empty() {
            return Err(ServiceError::invalid("Missing txid"));
        }
        let wallet = self.get_wallet().await?;
        let sub = TxConfirmationSub {
            wallet_id: wallet.id,
            copayer_id: self.copayer_id()?.to_string(),
            txid: txid.to_string(),
            coin: wallet.coin,
            network: wallet.network,
            is_active: true,
            created_on: now_secs(),
        };
        Ok(self.ctx.storage.store_tx_confirmation_sub(&sub).await?)
    }

    pub async fn tx_confirmation_unsubscribe(&self, txid: &str) -> ServiceResult<()> {
        Ok(self
            .ctx
            .storage
            .remove_tx_confirmation_sub(self.copayer_id()?, txid)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::AuthProof;
    use crate::service::Credentials;
    use crate::testing::{join_opts, setup_wallet, test_context, TestCopayer};

    #[tokio::test]
    async fn create_wallet_validates_input() {
        let (_dir, ctx, _explorer) = test_context();
        let service = WalletService::anonymous(ctx);
        let wallet_key = crypto::public_key_hex(&crate::testing::key(1));
        let opts = |m, n, coin: &str| CreateWalletOpts {
            id: None,
            name: "shared".into(),
            m,
            n,
            pub_key: wallet_key.clone(),
            coin: coin.into(),
            network: "livenet".into(),
            single_address: false,
        };

        assert!(service.create_wallet(opts(3, 2, "btc")).await.is_err());
        assert!(service.create_wallet(opts(1, 16, "btc")).await.is_err());
        assert!(service.create_wallet(opts(1, 1, "xyz")).await.is_err());
        let err = service
            .create_wallet(CreateWalletOpts {
                pub_key: "zz".into(),
                ..opts(1, 1, "btc")
            })
            .await
            .unwrap_err();
        assert!(err.is_code(ErrorCode::InvalidArgument));

        let id = service
            .create_wallet(CreateWalletOpts {
                id: Some("fixed".into()),
                ..opts(1, 1, "eth")
            })
            .await
            .unwrap();
        assert_eq!(id, "fixed");
        let err = service
            .create_wallet(CreateWalletOpts {
                id: Some("fixed".into()),
                ..opts(1, 1, "eth")
            })
            .await
            .unwrap_err();
        assert!(err.is_code(ErrorCode::WalletAlreadyExists));

        let eth = service.context().storage.fetch_wallet("fixed").await.unwrap().unwrap();
        assert!(eth.single_address);
    }

    #[tokio::test]
    async fn copayers_never_exceed_n() {
        let (_dir, ctx, _explorer) = test_context();
        let (wallet_id, copayers) = setup_wallet(&ctx, 2, 2, "btc").await;
        let wallet = copayers[0].service(&ctx).get_wallet().await.unwrap();
        assert!(wallet.is_complete());

        let extra = TestCopayer::new(9);
        let err = WalletService::anonymous(ctx.clone())
            .join_wallet(join_opts(&wallet_id, &extra, 1))
            .await
            .unwrap_err();
        assert!(err.is_code(ErrorCode::WalletFull));
        let wallet = copayers[0].service(&ctx).get_wallet().await.unwrap();
        assert_eq!(wallet.copayers.len(), 2);

        let feed = ctx
            .storage
            .fetch_notifications(&wallet_id, &Default::default())
            .await
            .unwrap();
        let types: Vec<_> = feed.iter().map(|n| n.notification_type).collect();
        assert_eq!(
            types,
            vec![
                NotificationType::NewCopayer,
                NotificationType::NewCopayer,
                NotificationType::WalletComplete
            ]
        );
    }

    #[tokio::test]
    async fn join_requires_wallet_signature() {
        let (_dir, ctx, _explorer) = test_context();
        let service = WalletService::anonymous(ctx.clone());
        let wallet_id = service
            .create_wallet(CreateWalletOpts {
                id: None,
                name: "w".into(),
                m: 1,
                n: 2,
                pub_key: crypto::public_key_hex(&crate::testing::key(1)),
                coin: "btc".into(),
                network: "livenet".into(),
                single_address: false,
            })
            .await
            .unwrap();

        let copayer = TestCopayer::new(3);
        // Signed by the wrong wallet key.
        let err = service
            .join_wallet(join_opts(&wallet_id, &copayer, 99))
            .await
            .unwrap_err();
        assert!(err.is_code(ErrorCode::NotAuthorized));

        let joined = service.join_wallet(join_opts(&wallet_id, &copayer, 1)).await.unwrap();
        assert_eq!(joined.copayer_id, copayer.id);
        assert!(!joined.wallet.is_complete());

        let err = service.join_wallet(join_opts(&wallet_id, &copayer, 1)).await.unwrap_err();
        assert!(err.is_code(ErrorCode::CopayerInWallet));
    }

    #[tokio::test]
    async fn add_access_appends_request_key() {
        let (_dir, ctx, _explorer) = test_context();
        let (_wallet_id, copayers) = setup_wallet(&ctx, 1, 1, "btc").await;
        let copayer = &copayers[0];
        let service = copayer.service(&ctx);

        let new_key = crate::testing::key(77);
        let new_pub = crypto::public_key_hex(&new_key);
        let err = service
            .add_access(AddAccessOpts {
                request_pub_key: new_pub.clone(),
                signature: crypto::sign_message(&new_key, &new_pub),
                name: None,
            })
            .await
            .unwrap_err();
        assert!(err.is_code(ErrorCode::NotAuthorized));

        service
            .add_access(AddAccessOpts {
                request_pub_key: new_pub.clone(),
                signature: crypto::sign_message(&copayer.xpriv, &new_pub),
                name: Some("laptop".into()),
            })
            .await
            .unwrap();

        // The new key authenticates.
        let creds = Credentials {
            copayer_id: copayer.id.clone(),
            proof: AuthProof::Signature {
                message: "hello".into(),
                signature: crypto::sign_message(&new_key, "hello"),
            },
        };
        WalletService::authenticate(ctx, &creds).await.unwrap();
    }

    #[tokio::test]
    async fn sessions_and_preferences() {
        let (_dir, ctx, _explorer) = test_context();
        let (_wallet_id, copayers) = setup_wallet(&ctx, 1, 1, "btc").await;
        let service = copayers[0].service(&ctx);

        let token = service.login().await.unwrap();
        assert_eq!(service.login().await.unwrap(), token);
        let creds = Credentials {
            copayer_id: copayers[0].id.clone(),
            proof: AuthProof::Session(token.clone()),
        };
        WalletService::authenticate(ctx.clone(), &creds).await.unwrap();
        service.logout().await.unwrap();
        assert!(WalletService::authenticate(ctx.clone(), &creds).await.is_err());

        let err = service
            .save_preferences(PreferencesOpts {
                email: Some("nope".into()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(err.is_code(ErrorCode::InvalidArgument));
        service
            .save_preferences(PreferencesOpts {
                email: Some("a@b.c".into()),
                unit: Some("BIT".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        let prefs = service.get_preferences().await.unwrap().unwrap();
        assert_eq!(prefs.unit.as_deref(), Some("bit"));
        assert_eq!(prefs.email.as_deref(), Some("a@b.c"));
    }

    #[tokio::test]
    async fn remove_wallet_cascades() {
        let (_dir, ctx, _explorer) = test_context();
        let (_wallet_id, copayers) = setup_wallet(&ctx, 1, 1, "btc").await;
        let service = copayers[0].service(&ctx);
        service.create_address(Default::default()).await.unwrap();
        service.remove_wallet().await.unwrap();
        let err = service.get_wallet().await.unwrap_err();
        assert!(err.is_code(ErrorCode::WalletNotFound));
    }
}
