// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Transaction Proposals
//!
//! | Operation | From | To | Notifications |
//! |-----------|------|----|---------------|
//! | [`WalletService::create_tx`] | | `temporary` | |
//! | [`WalletService::publish_tx`] | `temporary` | `pending` | `NewTxProposal` |
//! | [`WalletService::sign_tx`] | `pending` | `pending` / `accepted` | `TxProposalAcceptedBy`, `TxProposalFinallyAccepted` |
//! | [`WalletService::reject_tx`] | `pending` | `pending` / `rejected` | `TxProposalRejectedBy`, `TxProposalFinallyRejected` |
//! | [`WalletService::broadcast_tx`] | `accepted` | `broadcasted` | `NewOutgoingTx`, `NewOutgoingTxByThirdParty` |
//! | [`WalletService::remove_pending_tx`] | `pending` | removed | `TxProposalRemoved` |
//!
//! Every transition is a read-modify-write of the proposal under the wallet
//! lock.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};
use utoipa::{IntoParams, ToSchema};

use super::{validate_client_id, WalletService};
use crate::chain::ChainCapability;
use crate::error::{ErrorCode, ServiceError, ServiceResult};
use crate::explorer::WalletTx;
use crate::models::{
    now_secs, Address, NotificationType, SigningMethod, TxOutput, TxProposal, TxProposalParams,
    TxpAction, TxpStatus, Wallet,
};
use crate::storage::TxQuery;

const DEFAULT_FEE_LEVEL: &str = "normal";
/// Proposals of the creator inspected by the backoff check, on top of the offset.
const BACKOFF_WINDOW: usize = 5;
const DEFAULT_HISTORY_LIMIT: usize = 50;
const MAX_HISTORY_LIMIT: usize = 1001;

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OutputOpts {
    pub to_address: String,
    /// Omitted for send-max proposals.
    #[serde(default)]
    pub amount: Option<u64>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateTxOpts {
    /// Client-chosen id; creating again with the same id returns the stored proposal.
    #[serde(default)]
    pub tx_proposal_id: Option<String>,
    pub outputs: Vec<OutputOpts>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub fee_level: Option<String>,
    #[serde(default)]
    pub fee_per_kb: Option<u64>,
    /// Fixed fee (account-model coins only).
    #[serde(default)]
    pub fee: Option<u64>,
    #[serde(default)]
    pub send_max: bool,
    #[serde(default)]
    pub exclude_unconfirmed_utxos: bool,
    #[serde(default)]
    pub no_shuffle_outputs: bool,
    #[serde(default)]
    pub signing_method: Option<SigningMethod>,
    #[serde(default)]
    pub custom_data: Option<String>,
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PublishTxOpts {
    /// Signature of the proposal's raw tx by one of the creator's request keys.
    pub proposal_signature: String,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SignTxOpts {
    /// One signature per input, in input order.
    pub signatures: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RejectTxOpts {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct TxsOpts {
    #[serde(default)]
    pub min_ts: Option<i64>,
    #[serde(default)]
    pub max_ts: Option<i64>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct HistoryOpts {
    #[serde(default)]
    pub skip: Option<usize>,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// An on-chain transaction, annotated with the proposal that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TxHistoryItem {
    #[serde(flatten)]
    pub tx: WalletTx,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proposal_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creator_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<TxpAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_data: Option<String>,
}

/// Proposal parameters derived from the wallet alone.
pub(crate) fn base_params(wallet: &Wallet, creator_id: &str) -> TxProposalParams {
    TxProposalParams {
        id: None,
        wallet_id: wallet.id.clone(),
        creator_id: creator_id.to_string(),
        coin: wallet.coin.clone(),
        network: wallet.network.clone(),
        outputs: Vec::new(),
        message: None,
        change_address: None,
        fee_level: None,
        fee_per_kb: None,
        fee: None,
        exclude_unconfirmed_utxos: false,
        no_shuffle_outputs: false,
        wallet_m: wallet.m,
        wallet_n: wallet.n,
        address_type: wallet.address_type,
        signing_method: SigningMethod::Ecdsa,
        nonce: None,
        from: None,
        custom_data: None,
        send_max: false,
    }
}

fn validate_outputs(chain: &dyn ChainCapability, wallet: &Wallet, opts: &CreateTxOpts) -> ServiceResult<()> {
    if opts.outputs.is_empty() {
        return Err(ServiceError::invalid("No outputs were specified"));
    }
    if opts.send_max && opts.outputs.len() != 1 {
        return Err(ServiceError::invalid("Only one output allowed when sendMax is specified"));
    }
    for output in &opts.outputs {
        if !chain.validate_address(&wallet.network, &output.to_address) {
            return Err(ServiceError::client(ErrorCode::InvalidAddress));
        }
        match (opts.send_max, output.amount) {
            (true, Some(_)) => {
                return Err(ServiceError::invalid("Amount is not allowed when sendMax is specified"))
            }
            (true, None) => {}
            (false, None) | (false, Some(0)) => return Err(ServiceError::invalid("Invalid amount")),
            (false, Some(amount)) if chain.is_utxo_coin() && amount < chain.dust_threshold() => {
                return Err(ServiceError::client(ErrorCode::DustAmount))
            }
            (false, Some(_)) => {}
        }
    }
    if !opts.send_max {
        let total = opts
            .outputs
            .iter()
            .try_fold(0u64, |acc, o| acc.checked_add(o.amount.unwrap_or(0)));
        if !total.is_some_and(|t| t <= chain.max_money()) {
            return Err(ServiceError::invalid("Total amount exceeds the maximum allowed"));
        }
    }
    Ok(())
}

fn validate_fee_args(chain: &dyn ChainCapability, opts: &CreateTxOpts) -> ServiceResult<()> {
    let given = [opts.fee_level.is_some(), opts.fee_per_kb.is_some(), opts.fee.is_some()]
        .into_iter()
        .filter(|g| *g)
        .count();
    if given > 1 {
        return Err(ServiceError::invalid("Only one of feeLevel/feePerKb/fee can be specified"));
    }
    if let Some(fee_per_kb) = opts.fee_per_kb {
        if fee_per_kb == 0 || fee_per_kb > chain.max_fee_per_kb() {
            return Err(ServiceError::invalid("Invalid fee per KB"));
        }
    }
    if opts.fee.is_some() && chain.is_utxo_coin() {
        return Err(ServiceError::invalid("Fixed fee is only supported for account-based coins"));
    }
    if let Some(level) = &opts.fee_level {
        if !chain.fee_levels().iter().any(|l| l.name == level) {
            return Err(ServiceError::invalid(format!("Invalid fee level: {level}")));
        }
    }
    if opts.signing_method == Some(SigningMethod::Schnorr) && !chain.supports_schnorr() {
        return Err(ServiceError::invalid("Wrong signing method"));
    }
    Ok(())
}

impl WalletService {
    // =========================================================================
    // Creation
    // =========================================================================

    pub async fn create_tx(&self, opts: CreateTxOpts) -> ServiceResult<TxProposal> {
        if let Some(id) = &opts.tx_proposal_id {
            validate_client_id(id, "proposal")?;
        }
        if let Some(existing) = self.existing_tx(opts.tx_proposal_id.as_deref()).await? {
            return Ok(existing);
        }

        let wait = self.ctx.config.policy.lock_wait_create;
        self.run_locked_with(wait, async {
            let mut wallet = self.get_wallet().await?;
            if !wallet.is_complete() {
                return Err(ServiceError::client(ErrorCode::WalletNotComplete));
            }
            if wallet.is_scan_error() {
                return Err(ServiceError::client(ErrorCode::WalletNeedScan));
            }
            if let Some(existing) = self.existing_tx(opts.tx_proposal_id.as_deref()).await? {
                return Ok(existing);
            }

            let chain = self.chain(&wallet.coin)?;
            validate_outputs(chain.as_ref(), &wallet, &opts)?;
            validate_fee_args(chain.as_ref(), &opts)?;
            if !self.can_create_tx(&wallet).await? {
                return Err(ServiceError::client(ErrorCode::TxCannotCreate));
            }

            let (change_address, new_change) = self.change_address(chain.as_ref(), &mut wallet, &opts).await?;
            let fee_level = if opts.fee_per_kb.is_some() || opts.fee.is_some() {
                None
            } else {
                Some(opts.fee_level.clone().unwrap_or_else(|| DEFAULT_FEE_LEVEL.to_string()))
            };
            let fee_per_kb = match (&fee_level, opts.fee_per_kb) {
                (Some(level), _) => Some(self.fee_per_kb_for_level(&wallet.coin, &wallet.network, level).await?),
                (None, fee_per_kb) => fee_per_kb,
            };

            let (from, nonce) = if chain.is_utxo_coin() {
                (None, None)
            } else {
                let from = self
                    .ctx
                    .storage
                    .fetch_addresses(&wallet.id)
                    .await?
                    .into_iter()
                    .find(|a| !a.is_change)
                    .map(|a| a.address)
                    .ok_or_else(|| ServiceError::invalid("Wallet has no address to send from"))?;
                let nonce = self.explorer_for(&wallet)?.get_transaction_count(&from).await?;
                (Some(from), Some(nonce))
            };

            let mut params = base_params(&wallet, self.copayer_id()?);
            params.id = opts.tx_proposal_id.clone();
            params.outputs = opts
                .outputs
                .iter()
                .map(|o| TxOutput {
                    to_address: o.to_address.clone(),
                    amount: o.amount.unwrap_or(0),
                    message: o.message.clone(),
                })
                .collect();
            params.message = opts.message.clone();
            params.change_address = change_address;
            params.fee_level = fee_level;
            params.fee_per_kb = fee_per_kb;
            params.fee = opts.fee;
            params.exclude_unconfirmed_utxos = opts.exclude_unconfirmed_utxos;
            params.no_shuffle_outputs = opts.no_shuffle_outputs;
            params.signing_method = opts.signing_method.unwrap_or_default();
            params.nonce = nonce;
            params.from = from;
            params.custom_data = opts.custom_data.clone();
            params.send_max = opts.send_max;
            let mut txp = TxProposal::create(params);

            self.select_inputs(chain.as_ref(), &wallet, &mut txp, opts.fee).await?;
            chain.check_tx(&txp)?;

            if opts.dry_run {
                return Ok(txp);
            }
            if let Some(change) = &new_change {
                self.ctx
                    .storage
                    .store_address_and_wallet(&wallet, std::slice::from_ref(change))
                    .await?;
                self.register_new_addresses(&wallet, std::slice::from_ref(change)).await;
            }
            self.ctx.storage.store_tx(&txp).await?;
            debug!(
                wallet_id = %wallet.id,
                txp_id = %txp.id,
                amount = txp.total_amount(),
                fee = txp.fee.unwrap_or(0),
                inputs = txp.inputs.len(),
                "Proposal created"
            );
            Ok(txp)
        })
        .await
    }

    async fn existing_tx(&self, txp_id: Option<&str>) -> ServiceResult<Option<TxProposal>> {
        match txp_id {
            Some(id) => Ok(self.ctx.storage.fetch_tx(self.wallet_id()?, id).await?),
            None => Ok(None),
        }
    }

    /// Backoff after repeated rejections of the caller's proposals.
    async fn can_create_tx(&self, wallet: &Wallet) -> ServiceResult<bool> {
        let policy = &self.ctx.config.policy;
        let txs = self
            .ctx
            .storage
            .fetch_last_txs(&wallet.id, self.copayer_id()?, BACKOFF_WINDOW + policy.backoff_offset)
            .await?;
        let rejections = txs.iter().take_while(|t| t.status == TxpStatus::Rejected).count();
        if rejections <= policy.backoff_offset {
            return Ok(true);
        }
        let since_last = now_secs() - txs.first().map(|t| t.created_on).unwrap_or(0);
        let allowed = since_last > policy.backoff_time.as_secs() as i64;
        if !allowed {
            info!(wallet_id = %wallet.id, rejections, "Proposal creation in backoff");
        }
        Ok(allowed)
    }

    /// Change address for a new proposal. The second value is set when a
    /// fresh address was derived and must be stored with the proposal.
    async fn change_address(
        &self,
        chain: &dyn ChainCapability,
        wallet: &mut Wallet,
        opts: &CreateTxOpts,
    ) -> ServiceResult<(Option<Address>, Option<Address>)> {
        if opts.send_max || !chain.is_utxo_coin() {
            return Ok((None, None));
        }
        if wallet.single_address {
            let first = self
                .ctx
                .storage
                .fetch_addresses(&wallet.id)
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| ServiceError::invalid("Wallet has no address"))?;
            return Ok((Some(first), None));
        }
        let change = wallet.create_address(chain.address_prefix(&wallet.network), true, 1)?;
        Ok((Some(change.clone()), Some(change)))
    }

    async fn select_inputs(
        &self,
        chain: &dyn ChainCapability,
        wallet: &Wallet,
        txp: &mut TxProposal,
        fixed_fee: Option<u64>,
    ) -> ServiceResult<()> {
        if chain.is_utxo_coin() {
            let utxos = self.get_utxos_for_current_wallet(wallet).await?;
            if txp.send_max {
                let info = chain.send_max_info(txp, &utxos, 0);
                if info.amount == 0 {
                    return Err(ServiceError::client(ErrorCode::InsufficientFunds));
                }
                txp.outputs[0].amount = info.amount;
                txp.inputs = info.inputs;
                txp.fee = Some(info.fee);
            } else {
                let selection = chain.select_tx_inputs(txp, &utxos)?;
                txp.inputs = selection.inputs;
                txp.fee = Some(selection.fee);
            }
            return Ok(());
        }

        let available = self.wallet_balance(wallet).await?.available_amount;
        if txp.send_max {
            let info = chain.send_max_info(txp, &[], available);
            if info.amount == 0 {
                return Err(ServiceError::client(ErrorCode::InsufficientFundsForFee));
            }
            txp.outputs[0].amount = info.amount;
            txp.fee = Some(info.fee);
            return Ok(());
        }

        let fee = match fixed_fee {
            Some(fee) => fee,
            None => chain.select_tx_inputs(txp, &[])?.fee,
        };
        let amount = txp.total_amount();
        if available < amount {
            return Err(ServiceError::client(ErrorCode::InsufficientFunds));
        }
        if available < amount + fee {
            return Err(ServiceError::client(ErrorCode::InsufficientFundsForFee));
        }
        txp.fee = Some(fee);
        Ok(())
    }

    // =========================================================================
    // Publication and actions
    // =========================================================================

    pub async fn publish_tx(&self, txp_id: &str, opts: PublishTxOpts) -> ServiceResult<TxProposal> {
        let txp = self
            .run_locked(async {
                let wallet = self.get_wallet().await?;
                let mut txp = self.get_tx(txp_id).await?;
                if !txp.is_temporary() {
                    return Ok(None);
                }

                let creator = wallet
                    .copayer(&txp.creator_id)
                    .ok_or_else(|| ServiceError::client(ErrorCode::CopayerNotFound))?;
                let raw = txp.raw_tx();
                let signing_key = creator
                    .request_pub_keys
                    .iter()
                    .find(|k| crate::crypto::verify_message(&raw, &opts.proposal_signature, &k.key))
                    .ok_or_else(|| ServiceError::invalid("Invalid proposal signature"))?;
                txp.proposal_signature = Some(opts.proposal_signature.clone());
                txp.proposal_signature_pub_key = Some(signing_key.key.clone());

                self.check_tx_utxos(&wallet, &txp).await?;
                txp.status = TxpStatus::Pending;
                self.ctx.storage.store_tx(&txp).await?;
                Ok(Some(txp))
            })
            .await?;

        match txp {
            Some(txp) => {
                info!(wallet_id = %txp.wallet_id, txp_id = %txp.id, "Proposal published");
                self.notify_txp(NotificationType::NewTxProposal, &txp, json!({})).await;
                Ok(txp)
            }
            None => self.get_tx(txp_id).await,
        }
    }

    /// Inputs must still be unspent and not locked by another proposal.
    async fn check_tx_utxos(&self, wallet: &Wallet, txp: &TxProposal) -> ServiceResult<()> {
        if !self.chain(&wallet.coin)?.is_utxo_coin() {
            return Ok(());
        }
        let utxos = self.get_utxos_for_current_wallet(wallet).await?;
        let available: HashMap<String, bool> = utxos.iter().map(|u| (u.key(), u.locked)).collect();
        let usable = txp
            .inputs
            .iter()
            .all(|input| available.get(&input.key()) == Some(&false));
        if !usable {
            return Err(ServiceError::client(ErrorCode::UnavailableUtxos));
        }
        Ok(())
    }

    pub async fn sign_tx(&self, txp_id: &str, opts: SignTxOpts) -> ServiceResult<TxProposal> {
        let copayer_id = self.copayer_id()?.to_string();
        let txp = self
            .run_locked(async {
                let wallet = self.get_wallet().await?;
                let copayer = wallet
                    .copayer(&copayer_id)
                    .ok_or_else(|| ServiceError::client(ErrorCode::CopayerNotFound))?;
                let mut txp = self.get_tx(txp_id).await?;
                if txp.action_by(&copayer_id).is_some() {
                    return Err(ServiceError::client(ErrorCode::CopayerVoted));
                }
                if !txp.is_pending() {
                    return Err(ServiceError::client(ErrorCode::TxNotPending));
                }
                txp.sign(&copayer_id, &opts.signatures, &copayer.x_pub_key)?;
                self.ctx.storage.store_tx(&txp).await?;
                Ok(txp)
            })
            .await?;

        self.notify_txp(NotificationType::TxProposalAcceptedBy, &txp, json!({ "copayerId": copayer_id }))
            .await;
        if txp.status == TxpStatus::Accepted {
            info!(wallet_id = %txp.wallet_id, txp_id = %txp.id, "Proposal accepted");
            self.notify_txp(NotificationType::TxProposalFinallyAccepted, &txp, json!({}))
                .await;
        }
        Ok(txp)
    }

    pub async fn reject_tx(&self, txp_id: &str, opts: RejectTxOpts) -> ServiceResult<TxProposal> {
        let copayer_id = self.copayer_id()?.to_string();
        let txp = self
            .run_locked(async {
                let mut txp = self.get_tx(txp_id).await?;
                if txp.action_by(&copayer_id).is_some() {
                    return Err(ServiceError::client(ErrorCode::CopayerVoted));
                }
                if !txp.is_pending() {
                    return Err(ServiceError::client(ErrorCode::TxNotPending));
                }
                txp.reject(&copayer_id, opts.reason.clone())?;
                self.ctx.storage.store_tx(&txp).await?;
                Ok(txp)
            })
            .await?;

        self.notify_txp(NotificationType::TxProposalRejectedBy, &txp, json!({ "copayerId": copayer_id }))
            .await;
        if txp.status == TxpStatus::Rejected {
            info!(wallet_id = %txp.wallet_id, txp_id = %txp.id, "Proposal rejected");
            self.notify_txp(
                NotificationType::TxProposalFinallyRejected,
                &txp,
                json!({ "rejectedBy": txp.rejectors() }),
            )
            .await;
        }
        Ok(txp)
    }

    // =========================================================================
    // Broadcast
    // =========================================================================

    pub async fn broadcast_tx(&self, txp_id: &str) -> ServiceResult<TxProposal> {
        let wallet = self.get_wallet().await?;
        let txp = self.get_tx(txp_id).await?;
        if txp.is_broadcasted() {
            return Err(ServiceError::client(ErrorCode::TxAlreadyBroadcasted));
        }
        if txp.status != TxpStatus::Accepted {
            return Err(ServiceError::client(ErrorCode::TxNotAccepted));
        }
        let (Some(raw), Some(txid)) = (txp.raw.clone(), txp.txid.clone()) else {
            return Err(ServiceError::invariant(format!("accepted proposal {} has no raw tx", txp.id)));
        };

        let explorer = self.explorer_for(&wallet)?;
        let failure = match explorer.broadcast(&raw).await {
            Ok(broadcast_txid) if broadcast_txid == txid => {
                return self.process_broadcast(&txp.id, false).await;
            }
            Ok(broadcast_txid) => ServiceError::invariant(format!(
                "explorer returned txid {broadcast_txid} for proposal {} (expected {txid})",
                txp.id
            )),
            Err(e) => ServiceError::from(e),
        };

        warn!(wallet_id = %wallet.id, txp_id = %txp.id, error = %failure, "Broadcast failed, checking chain");
        match explorer.get_transaction(&txid).await {
            Ok(Some(_)) => self.process_broadcast(&txp.id, true).await,
            _ => Err(failure),
        }
    }

    /// Mark an accepted proposal as broadcast and notify.
    pub(crate) async fn process_broadcast(&self, txp_id: &str, by_third_party: bool) -> ServiceResult<TxProposal> {
        let txp = self
            .run_locked(async {
                let mut txp = self.get_tx(txp_id).await?;
                if txp.is_broadcasted() {
                    return Ok(txp);
                }
                txp.set_broadcasted()?;
                self.ctx.storage.store_tx(&txp).await?;
                Ok(txp)
            })
            .await?;

        info!(wallet_id = %txp.wallet_id, txp_id = %txp.id, txid = ?txp.txid, by_third_party, "Proposal broadcast");
        let notification = if by_third_party {
            NotificationType::NewOutgoingTxByThirdParty
        } else {
            NotificationType::NewOutgoingTx
        };
        self.notify_txp(notification, &txp, json!({ "txid": txp.txid })).await;
        Ok(txp)
    }

    // =========================================================================
    // Removal
    // =========================================================================

    /// Seconds left before the proposal may be removed.
    pub(crate) fn remaining_delete_lock_time(&self, txp: &TxProposal) -> i64 {
        let window = self.ctx.config.policy.delete_locktime.as_secs() as i64;
        (txp.created_on + window - now_secs()).max(0)
    }

    /// Remove a pending proposal. Only its creator may, only while no other
    /// copayer has acted on it, and only once the delete lock has expired.
    pub async fn remove_pending_tx(&self, txp_id: &str) -> ServiceResult<()> {
        let copayer_id = self.copayer_id()?.to_string();
        let txp = self
            .run_locked(async {
                let txp = self.get_tx(txp_id).await?;
                if !txp.is_pending() {
                    return Err(ServiceError::client(ErrorCode::TxNotPending));
                }
                let others_acted = txp.actions.iter().any(|a| a.copayer_id != copayer_id);
                if txp.creator_id != copayer_id || others_acted || self.remaining_delete_lock_time(&txp) > 0 {
                    return Err(ServiceError::client(ErrorCode::TxCannotRemove));
                }
                self.ctx.storage.remove_tx(&txp.wallet_id, &txp.id).await?;
                Ok(txp)
            })
            .await?;

        info!(wallet_id = %txp.wallet_id, txp_id = %txp.id, "Proposal removed");
        self.notify_txp(NotificationType::TxProposalRemoved, &txp, json!({})).await;
        Ok(())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn get_tx(&self, txp_id: &str) -> ServiceResult<TxProposal> {
        self.ctx
            .storage
            .fetch_tx(self.wallet_id()?, txp_id)
            .await?
            .ok_or_else(|| ServiceError::client(ErrorCode::TxNotFound))
    }

    pub async fn get_txs(&self, opts: &TxsOpts) -> ServiceResult<Vec<TxProposal>> {
        let query = TxQuery {
            min_ts: opts.min_ts,
            max_ts: opts.max_ts,
            limit: opts.limit,
        };
        Ok(self.ctx.storage.fetch_txs(self.wallet_id()?, &query).await?)
    }

    /// Pending and accepted proposals. Accepted proposals that are already
    /// on-chain are recorded as broadcast by a third party and left out.
    pub async fn get_pending_txs(&self) -> ServiceResult<Vec<TxProposal>> {
        let wallet = self.get_wallet().await?;
        let mut txps = self.ctx.storage.fetch_pending_txs(&wallet.id).await?;
        let explorer = self.explorer_for(&wallet).ok();

        for txp in txps.iter_mut() {
            txp.delete_lock_time = Some(self.remaining_delete_lock_time(txp));
            let (Some(explorer), Some(txid), TxpStatus::Accepted) = (&explorer, &txp.txid, txp.status) else {
                continue;
            };
            match explorer.get_transaction(txid).await {
                Ok(Some(_)) => {
                    txp.status = self.process_broadcast(&txp.id, true).await?.status;
                }
                Ok(None) => {}
                Err(e) => warn!(wallet_id = %wallet.id, txp_id = %txp.id, error = %e, "Could not check proposal on chain"),
            }
        }

        txps.retain(|t| !t.is_broadcasted());
        Ok(txps)
    }

    /// Explorer history annotated with proposal data.
    pub async fn get_tx_history(&self, opts: &HistoryOpts) -> ServiceResult<Vec<TxHistoryItem>> {
        let limit = opts.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
        if limit > MAX_HISTORY_LIMIT {
            return Err(ServiceError::invalid(format!("limit must be at most {MAX_HISTORY_LIMIT}")));
        }
        let wallet = self.get_wallet().await?;
        if wallet.is_scan_error() {
            return Err(ServiceError::client(ErrorCode::WalletNeedScan));
        }

        let txs = self.explorer_for(&wallet)?.get_transactions(&wallet, None).await?;
        let proposals = self.ctx.storage.fetch_txs(&wallet.id, &TxQuery::default()).await?;
        let by_txid: HashMap<&str, &TxProposal> = proposals
            .iter()
            .filter_map(|p| p.txid.as_deref().map(|txid| (txid, p)))
            .collect();

        Ok(txs
            .into_iter()
            .skip(opts.skip.unwrap_or(0))
            .take(limit)
            .map(|tx| {
                let proposal = by_txid.get(tx.txid.as_str());
                TxHistoryItem {
                    proposal_id: proposal.map(|p| p.id.clone()),
                    creator_name: proposal
                        .and_then(|p| wallet.copayer(&p.creator_id))
                        .map(|c| c.name.clone()),
                    message: proposal.and_then(|p| p.message.clone()),
                    actions: proposal.map(|p| p.actions.clone()).unwrap_or_default(),
                    custom_data: proposal.and_then(|p| p.custom_data.clone()),
                    tx,
                }
            })
            .collect())
    }

    async fn notify_txp(&self, notification_type: NotificationType, txp: &TxProposal, extra: serde_json::Value) {
        let mut data = json!({
            "txProposalId": txp.id,
            "creatorId": txp.creator_id,
            "amount": txp.total_amount(),
            "message": txp.message,
        });
        if let (Some(data), Some(extra)) = (data.as_object_mut(), extra.as_object()) {
            data.extend(extra.clone());
        }
        self.notify(notification_type, data, false).await;
    }
}
