// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Transaction proposal record and its state machine.
//!
//! ## States
//!
//! | Status | Meaning |
//! |--------|---------|
//! | `temporary` | Created (or dry run), not yet published |
//! | `pending` | Published, collecting actions |
//! | `accepted` | `m` accept actions recorded, raw tx finalized |
//! | `rejected` | Enough rejections that `m` accepts are no longer reachable |
//! | `broadcasted` | Seen on-chain (self-submitted or third party) |
//!
//! Actions are unique per copayer: the first action wins and any later one
//! fails with `COPAYER_VOTED` before the record is touched.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{now_secs, Address, AddressType};
use crate::crypto;
use crate::error::{ErrorCode, ServiceError, ServiceResult};

pub const TXP_VERSION: u32 = 3;

/// Serialized size of a P2PKH input.
const P2PKH_INPUT_SIZE: u64 = 147;
const TX_OVERHEAD_SIZE: u64 = 26;
const OUTPUT_SIZE: u64 = 34;
const SAFETY_MARGIN_PCT: u64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TxpStatus {
    Temporary,
    Pending,
    Accepted,
    Rejected,
    Broadcasted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    Accept,
    Reject,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SigningMethod {
    #[default]
    Ecdsa,
    Schnorr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TxpAction {
    pub version: u32,
    pub created_on: i64,
    pub copayer_id: String,
    #[serde(rename = "type")]
    pub action_type: ActionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signatures: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x_pub_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TxOutput {
    pub to_address: String,
    pub amount: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Unspent output as seen by the explorer, annotated during reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Utxo {
    pub txid: String,
    pub vout: u32,
    pub address: String,
    pub satoshis: u64,
    pub confirmations: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub public_keys: Vec<String>,
    #[serde(default)]
    pub locked: bool,
}

impl Utxo {
    pub fn key(&self) -> String {
        format!("{}|{}", self.txid, self.vout)
    }
}

/// Parameters for [`TxProposal::create`].
#[derive(Debug, Clone)]
pub struct TxProposalParams {
    pub id: Option<String>,
    pub wallet_id: String,
    pub creator_id: String,
    pub coin: String,
    pub network: String,
    pub outputs: Vec<TxOutput>,
    pub message: Option<String>,
    pub change_address: Option<Address>,
    pub fee_level: Option<String>,
    pub fee_per_kb: Option<u64>,
    pub fee: Option<u64>,
    pub exclude_unconfirmed_utxos: bool,
    pub no_shuffle_outputs: bool,
    pub wallet_m: u32,
    pub wallet_n: u32,
    pub address_type: AddressType,
    pub signing_method: SigningMethod,
    pub nonce: Option<u64>,
    pub from: Option<String>,
    pub custom_data: Option<String>,
    pub send_max: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TxProposal {
    pub version: u32,
    pub id: String,
    pub wallet_id: String,
    pub creator_id: String,
    pub coin: String,
    pub network: String,
    pub created_on: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub outputs: Vec<TxOutput>,
    /// Permutation over `outputs` plus one slot (index `outputs.len()`) for change.
    pub output_order: Vec<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_address: Option<Address>,
    pub inputs: Vec<Utxo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee_level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee_per_kb: Option<u64>,
    pub exclude_unconfirmed_utxos: bool,
    pub wallet_m: u32,
    pub wallet_n: u32,
    pub required_signatures: u32,
    pub required_rejections: u32,
    pub address_type: AddressType,
    pub signing_method: SigningMethod,
    pub status: TxpStatus,
    pub actions: Vec<TxpAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broadcasted_on: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposal_signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposal_signature_pub_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_data: Option<String>,
    #[serde(default)]
    pub send_max: bool,
    /// Seconds until the proposal may be removed. Computed on read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_lock_time: Option<i64>,
}

fn shuffled_order<R: Rng + ?Sized>(len: usize, rng: &mut R) -> Vec<usize> {
    let mut order: Vec<usize> = (0..len).collect();
    order.shuffle(rng);
    order
}

impl TxProposal {
    pub fn create(params: TxProposalParams) -> Self {
        let order_len = params.outputs.len() + 1;
        let output_order = if params.no_shuffle_outputs {
            (0..order_len).collect()
        } else {
            shuffled_order(order_len, &mut rand::thread_rng())
        };
        let m = params.wallet_m;
        let n = params.wallet_n;

        Self {
            version: TXP_VERSION,
            id: params
                .id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            wallet_id: params.wallet_id,
            creator_id: params.creator_id,
            coin: params.coin,
            network: params.network,
            created_on: now_secs(),
            message: params.message,
            outputs: params.outputs,
            output_order,
            change_address: params.change_address,
            inputs: Vec::new(),
            fee: params.fee,
            fee_level: params.fee_level,
            fee_per_kb: params.fee_per_kb,
            exclude_unconfirmed_utxos: params.exclude_unconfirmed_utxos,
            wallet_m: m,
            wallet_n: n,
            required_signatures: m,
            required_rejections: n.saturating_sub(m) + 1,
            address_type: params.address_type,
            signing_method: params.signing_method,
            status: TxpStatus::Temporary,
            actions: Vec::new(),
            txid: None,
            raw: None,
            broadcasted_on: None,
            proposal_signature: None,
            proposal_signature_pub_key: None,
            nonce: params.nonce,
            from: params.from,
            custom_data: params.custom_data,
            send_max: params.send_max,
            delete_lock_time: None,
        }
    }

    // =========================================================================
    // Amounts and size
    // =========================================================================

    /// Sum of output amounts. Saturates; creation rejects totals that would
    /// overflow.
    pub fn total_amount(&self) -> u64 {
        self.outputs.iter().fold(0u64, |acc, o| acc.saturating_add(o.amount))
    }

    pub fn input_total(&self) -> u64 {
        self.inputs.iter().map(|u| u.satoshis).sum()
    }

    /// Change left after outputs and fee; `None` until inputs and fee are set.
    pub fn change_amount(&self) -> Option<u64> {
        if self.inputs.is_empty() {
            return None;
        }
        let fee = self.fee?;
        self.input_total().checked_sub(self.total_amount().checked_add(fee)?)
    }

    /// Estimated serialized size of one input for this wallet's script type.
    pub fn input_size(&self) -> u64 {
        match self.address_type {
            AddressType::P2pkh => P2PKH_INPUT_SIZE,
            AddressType::P2sh => {
                u64::from(self.required_signatures) * 72 + u64::from(self.wallet_n) * 36 + 44
            }
        }
    }

    pub fn estimated_size(&self) -> u64 {
        let inputs = self.inputs.len() as u64;
        let outputs = (self.outputs.len().max(1) + 1) as u64;
        let size = TX_OVERHEAD_SIZE + self.input_size() * inputs + OUTPUT_SIZE * outputs;
        size * (100 + SAFETY_MARGIN_PCT) / 100
    }

    pub fn estimated_fee(&self) -> u64 {
        self.fee_per_kb.unwrap_or(0) * self.estimated_size() / 1000
    }

    // =========================================================================
    // Canonical raw transaction
    // =========================================================================

    fn unsigned_payload(&self) -> String {
        let inputs = self
            .inputs
            .iter()
            .map(|u| format!("{}:{}:{}", u.txid, u.vout, u.satoshis))
            .collect::<Vec<_>>()
            .join(",");

        let mut outputs = Vec::with_capacity(self.output_order.len());
        for &i in &self.output_order {
            if let Some(output) = self.outputs.get(i) {
                outputs.push(format!("{}:{}", output.to_address, output.amount));
            } else if let (Some(change), Some(amount)) = (&self.change_address, self.change_amount()) {
                if amount > 0 {
                    outputs.push(format!("{}:{}", change.address, amount));
                }
            }
        }

        format!(
            "{}|{}|{}|{}|{}|{}",
            self.coin,
            self.network,
            inputs,
            outputs.join(","),
            self.fee.unwrap_or(0),
            self.nonce.map(|n| n.to_string()).unwrap_or_default()
        )
    }

    /// Hex of the canonical unsigned transaction. Proposal signatures cover it.
    pub fn raw_tx(&self) -> String {
        hex::encode(self.unsigned_payload())
    }

    /// Message a copayer signs for input `index`.
    pub fn sighash(raw_tx: &str, index: usize) -> String {
        format!("{raw_tx}:{index}")
    }

    fn finalize_signed(&mut self) {
        let signatures = self
            .actions
            .iter()
            .filter(|a| a.action_type == ActionType::Accept)
            .flat_map(|a| a.signatures.clone().unwrap_or_default())
            .collect::<Vec<_>>()
            .join(",");
        let signed = format!("{}#{}", self.unsigned_payload(), signatures);
        self.txid = Some(crypto::double_sha256_hex(signed.as_bytes()));
        self.raw = Some(hex::encode(signed));
    }

    // =========================================================================
    // Actions and status
    // =========================================================================

    pub fn action_by(&self, copayer_id: &str) -> Option<&TxpAction> {
        self.actions.iter().find(|a| a.copayer_id == copayer_id)
    }

    fn count(&self, action_type: ActionType) -> u32 {
        self.actions
            .iter()
            .filter(|a| a.action_type == action_type)
            .count() as u32
    }

    pub fn approvers(&self) -> Vec<String> {
        self.actions
            .iter()
            .filter(|a| a.action_type == ActionType::Accept)
            .map(|a| a.copayer_id.clone())
            .collect()
    }

    pub fn rejectors(&self) -> Vec<String> {
        self.actions
            .iter()
            .filter(|a| a.action_type == ActionType::Reject)
            .map(|a| a.copayer_id.clone())
            .collect()
    }

    pub fn is_temporary(&self) -> bool {
        self.status == TxpStatus::Temporary
    }

    pub fn is_pending(&self) -> bool {
        !matches!(
            self.status,
            TxpStatus::Temporary | TxpStatus::Broadcasted | TxpStatus::Rejected
        )
    }

    pub fn is_accepted(&self) -> bool {
        self.count(ActionType::Accept) >= self.required_signatures
    }

    pub fn is_rejected(&self) -> bool {
        self.count(ActionType::Reject) >= self.required_rejections
    }

    pub fn is_broadcasted(&self) -> bool {
        self.status == TxpStatus::Broadcasted
    }

    fn add_action(
        &mut self,
        copayer_id: &str,
        action_type: ActionType,
        comment: Option<String>,
        signatures: Option<Vec<String>>,
        x_pub_key: Option<String>,
    ) -> ServiceResult<()> {
        if self.action_by(copayer_id).is_some() {
            return Err(ServiceError::client(ErrorCode::CopayerVoted));
        }
        self.actions.push(TxpAction {
            version: 1,
            created_on: now_secs(),
            copayer_id: copayer_id.to_string(),
            action_type,
            signatures,
            x_pub_key,
            comment,
        });
        if self.is_pending() {
            if self.is_rejected() {
                self.status = TxpStatus::Rejected;
            } else if self.is_accepted() {
                self.status = TxpStatus::Accepted;
            }
        }
        Ok(())
    }

    /// Verify and record an accept action.
    ///
    /// One signature is expected per input (one in total for account-model
    /// proposals), each over [`TxProposal::sighash`] with the copayer's xPubKey.
    pub fn sign(&mut self, copayer_id: &str, signatures: &[String], x_pub_key: &str) -> ServiceResult<()> {
        if self.action_by(copayer_id).is_some() {
            return Err(ServiceError::client(ErrorCode::CopayerVoted));
        }
        let expected = self.inputs.len().max(1);
        let raw = self.raw_tx();
        let valid = signatures.len() == expected
            && signatures
                .iter()
                .enumerate()
                .all(|(i, sig)| crypto::verify_message(&Self::sighash(&raw, i), sig, x_pub_key));
        if !valid {
            return Err(ServiceError::client(ErrorCode::BadSignatures));
        }

        self.add_action(
            copayer_id,
            ActionType::Accept,
            None,
            Some(signatures.to_vec()),
            Some(x_pub_key.to_string()),
        )?;
        if self.status == TxpStatus::Accepted {
            self.finalize_signed();
        }
        Ok(())
    }

    pub fn reject(&mut self, copayer_id: &str, reason: Option<String>) -> ServiceResult<()> {
        self.add_action(copayer_id, ActionType::Reject, reason, None, None)
    }

    pub fn set_broadcasted(&mut self) -> ServiceResult<()> {
        if self.txid.is_none() {
            return Err(ServiceError::invariant(format!(
                "broadcasting proposal {} without txid",
                self.id
            )));
        }
        self.status = TxpStatus::Broadcasted;
        self.broadcasted_on = Some(now_secs());
        Ok(())
    }
}
