// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Notification ticker and feed.
//!
//! Notification ids come from a per-server ticker that is strictly
//! increasing: `max(previous + 1, now in µs)`. Stored ids therefore sort in
//! emission order even across restarts (as long as the clock does not jump
//! backwards by more than the downtime).
//!
//! Global chain events (`NewBlock`) are stored under `"{network}:{coin}"`
//! and merged into every wallet's feed for that chain.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use utoipa::IntoParams;

use super::WalletService;
use crate::error::{ServiceError, ServiceResult};
use crate::models::{now_secs, Notification, NotificationType};
use crate::storage::{NotificationQuery, Storage};

const CHANNEL_CAPACITY: usize = 1024;

pub struct Notifier {
    storage: Arc<dyn Storage>,
    ticker: AtomicU64,
    sender: broadcast::Sender<Notification>,
}

impl Notifier {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            storage,
            ticker: AtomicU64::new(0),
            sender,
        }
    }

    pub fn next_ticker(&self) -> u64 {
        let now = chrono::Utc::now().timestamp_micros().max(0) as u64;
        let mut previous = self.ticker.load(Ordering::SeqCst);
        loop {
            let next = now.max(previous + 1);
            match self
                .ticker
                .compare_exchange(previous, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return next,
                Err(actual) => previous = actual,
            }
        }
    }

    /// Append a notification and publish it to live subscribers.
    ///
    /// Storage failures are logged: a missing notification never fails the
    /// operation that produced it.
    pub async fn notify(
        &self,
        notification_type: NotificationType,
        wallet_id: &str,
        creator_id: Option<&str>,
        data: Value,
    ) -> Notification {
        let notification = Notification::new(self.next_ticker(), notification_type, wallet_id, creator_id, data);
        if let Err(e) = self.storage.store_notification(&notification).await {
            warn!(
                wallet_id = %wallet_id,
                notification_type = ?notification_type,
                error = %e,
                "Failed to store notification"
            );
        }
        debug!(wallet_id = %wallet_id, notification_id = %notification.id, notification_type = ?notification_type, "Notification emitted");
        // No receivers is fine.
        let _ = self.sender.send(notification.clone());
        notification
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }
}

/// Feed key for chain-wide events.
pub fn chain_feed_id(coin: &str, network: &str) -> String {
    format!("{network}:{coin}")
}

/// Cursor for [`WalletService::get_notifications`].
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct NotificationOpts {
    /// Only notifications after this id.
    #[serde(default)]
    pub notification_id: Option<String>,
    /// Look back this many seconds (capped by the server window).
    #[serde(default)]
    pub time_span: Option<i64>,
}

impl WalletService {
    pub(crate) async fn notify(&self, notification_type: NotificationType, data: Value, global: bool) -> Notification {
        let wallet_id = self.wallet_id.clone().unwrap_or_default();
        let creator = if global { None } else { self.copayer_id.as_deref() };
        self.ctx
            .notifier
            .notify(notification_type, &wallet_id, creator, data)
            .await
    }

    /// Wallet notifications plus chain events, in ticker order.
    pub async fn get_notifications(&self, opts: &NotificationOpts) -> ServiceResult<Vec<Notification>> {
        let wallet = self.get_wallet().await?;
        let max_span = self.ctx.config.policy.notifications_timespan.as_secs() as i64;
        let span = opts.time_span.unwrap_or(max_span);
        if span < 0 || span > max_span {
            return Err(ServiceError::invalid(format!("timeSpan must be within 0..={max_span}")));
        }

        let query = NotificationQuery {
            since_id: opts.notification_id.clone(),
            min_ts: now_secs() - span,
        };
        let mut feed = self.ctx.storage.fetch_notifications(&wallet.id, &query).await?;
        let chain_feed = chain_feed_id(&wallet.coin, &wallet.network);
        feed.extend(self.ctx.storage.fetch_notifications(&chain_feed, &query).await?);
        feed.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(feed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::RedbStorage;
    use crate::testing::{setup_wallet, test_context};
    use serde_json::json;

    #[test]
    fn ticker_is_strictly_increasing() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(RedbStorage::open(&dir.path().join("n.redb")).unwrap());
        let notifier = Notifier::new(storage);
        let mut last = 0;
        for _ in 0..1000 {
            let t = notifier.next_ticker();
            assert!(t > last);
            last = t;
        }
    }

    #[tokio::test]
    async fn feed_merges_chain_events_in_order() {
        let (_dir, ctx, _explorer) = test_context();
        let (wallet_id, copayers) = setup_wallet(&ctx, 1, 1, "btc").await;
        let service = copayers[0].service(&ctx);

        let mut live = ctx.notifier.subscribe();
        ctx.notifier
            .notify(NotificationType::NewBlock, &chain_feed_id("btc", "livenet"), None, json!({"height": 10}))
            .await;
        let mine = service.notify(NotificationType::NewAddress, json!({"address": "a"}), false).await;
        ctx.notifier
            .notify(NotificationType::NewBlock, &chain_feed_id("eth", "livenet"), None, json!({}))
            .await;

        let feed = service.get_notifications(&NotificationOpts::default()).await.unwrap();
        let types: Vec<_> = feed.iter().map(|n| n.notification_type).collect();
        assert!(types.ends_with(&[NotificationType::NewBlock, NotificationType::NewAddress]));
        assert!(feed.iter().all(|n| n.wallet_id != chain_feed_id("eth", "livenet")));
        assert_eq!(live.recv().await.unwrap().notification_type, NotificationType::NewBlock);

        let after = service
            .get_notifications(&NotificationOpts {
                notification_id: Some(mine.id.clone()),
                time_span: None,
            })
            .await
            .unwrap();
        assert!(after.is_empty());
        assert_eq!(mine.wallet_id, wallet_id);

        let err = service
            .get_notifications(&NotificationOpts {
                time_span: Some(i64::MAX),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(err.is_code(crate::error::ErrorCode::InvalidArgument));
    }
}
