// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Operator alerts with a per-key cool-down.
//!
//! The first alert for a key goes out immediately. Repeats within the
//! cool-down are counted and dropped; the next alert after the window carries
//! the number of suppressed repeats.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::warn;

/// Where alerts end up.
pub trait AlertSink: Send + Sync {
    fn send(&self, key: &str, message: &str);
}

/// Writes alerts to the log at `warn` level.
#[derive(Debug, Default)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn send(&self, key: &str, message: &str) {
        warn!(alert_key = %key, "{message}");
    }
}

struct KeyState {
    last_sent: Instant,
    suppressed: u32,
}

pub struct AlertDispatcher {
    sink: Arc<dyn AlertSink>,
    cooldown: Duration,
    state: Mutex<HashMap<String, KeyState>>,
}

impl AlertDispatcher {
    pub fn new(sink: Arc<dyn AlertSink>, cooldown: Duration) -> Self {
        Self {
            sink,
            cooldown,
            state: Mutex::new(HashMap::new()),
        }
    }

    /// Send an alert unless `key` is cooling down. Returns whether it was sent.
    pub fn dispatch(&self, key: &str, message: &str) -> bool {
        let suppressed = {
            let Ok(mut state) = self.state.lock() else {
                return false;
            };
            match state.get_mut(key) {
                Some(entry) if entry.last_sent.elapsed() < self.cooldown => {
                    entry.suppressed += 1;
                    return false;
                }
                Some(entry) => {
                    let suppressed = entry.suppressed;
                    entry.last_sent = Instant::now();
                    entry.suppressed = 0;
                    suppressed
                }
                None => {
                    state.insert(
                        key.to_string(),
                        KeyState {
                            last_sent: Instant::now(),
                            suppressed: 0,
                        },
                    );
                    0
                }
            }
        };

        if suppressed > 0 {
            self.sink
                .send(key, &format!("{message} ({suppressed} similar alerts suppressed)"));
        } else {
            self.sink.send(key, message);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingSink;

    #[test]
    fn repeats_are_suppressed_then_counted() {
        let sink = Arc::new(RecordingSink::default());
        let alerts = AlertDispatcher::new(sink.clone(), Duration::from_millis(20));

        assert!(alerts.dispatch("swap:OUT_OF_FUND", "out of funds"));
        assert!(!alerts.dispatch("swap:OUT_OF_FUND", "out of funds"));
        assert!(!alerts.dispatch("swap:OUT_OF_FUND", "out of funds"));
        assert!(alerts.dispatch("swap:NOT_STABLE_RATE", "rate moved"));

        std::thread::sleep(Duration::from_millis(30));
        assert!(alerts.dispatch("swap:OUT_OF_FUND", "out of funds"));

        let sent = sink.messages();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[2].1, "out of funds (2 similar alerts suppressed)");
    }
}
