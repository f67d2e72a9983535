// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Cosign Wallet Server - Multi-signature Wallet Coordination Service
//!
//! Copayers of an m-of-n wallet register here, derive shared addresses, and
//! build, sign and broadcast transaction proposals together. The server never
//! holds copayer keys; it verifies their signatures and keeps everyone's view
//! of the wallet consistent.
//!
//! ## Modules
//!
//! - `api` - HTTP API handlers (Axum)
//! - `auth` - Copayer request signatures, sessions and operator access
//! - `service` - Wallet, address, proposal, balance and sync operations
//! - `swap` - Swap, conversion and merchant order pipeline
//! - `background` - Supervised periodic tasks and the chain monitor
//! - `storage` - Storage contract and the redb backend
//! - `explorer` - Blockchain explorer adapter
//! - `chain` - Per-coin capabilities

pub mod api;
pub mod auth;
pub mod background;
pub mod chain;
pub mod config;
pub mod context;
pub mod crypto;
pub mod error;
pub mod explorer;
pub mod lock;
pub mod models;
pub mod service;
pub mod storage;
pub mod swap;

#[cfg(test)]
pub(crate) mod testing;
