//! Subscription registry and dispatch.
//!
//! Maps a channel key to the ordered list of registered consumers.
//! Registration hands back a [`SubscriptionToken`]; cancellation goes
//! through the token rather than comparing handler identity. Entries
//! survive reconnects (they are replayed, not destroyed) and are removed
//! only by explicit unsubscribe or service teardown.

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error};

/// Consumer callback invoked once per inbound message on its channel.
pub type Handler = Arc<dyn Fn(&Value) + Send + Sync>;

/// Identity of one registered subscription.
///
/// Returned by registration, consumed by `unsubscribe`. Cloneable so UI
/// components can stash it wherever teardown happens.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionToken {
    channel: String,
    id: u64,
}

impl SubscriptionToken {
    /// Channel key this token belongs to.
    pub fn channel(&self) -> &str {
        &self.channel
    }
}

struct Entry {
    id: u64,
    payload: Value,
    handler: Handler,
}

/// Channel key -> ordered subscription entries.
///
/// Insertion order is delivery order. Interior mutability so the service
/// facade and the connection task can share one instance behind an `Arc`.
pub struct SubscriptionRegistry {
    entries: RwLock<HashMap<String, Vec<Entry>>>,
    next_id: AtomicU64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Append a consumer under a channel key.
    pub fn insert(&self, channel: &str, payload: Value, handler: Handler) -> SubscriptionToken {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut entries = self.entries.write();
        entries.entry(channel.to_string()).or_default().push(Entry {
            id,
            payload,
            handler,
        });
        SubscriptionToken {
            channel: channel.to_string(),
            id,
        }
    }

    /// Replace every consumer under a channel key with a single new one.
    ///
    /// Returns the new token plus the payloads of the displaced entries, so
    /// the caller can emit an unsubscribe control message for each of them.
    pub fn replace(
        &self,
        channel: &str,
        payload: Value,
        handler: Handler,
    ) -> (SubscriptionToken, Vec<Value>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut entries = self.entries.write();
        let displaced = entries
            .insert(
                channel.to_string(),
                vec![Entry {
                    id,
                    payload,
                    handler,
                }],
            )
            .map(|old| old.into_iter().map(|e| e.payload).collect())
            .unwrap_or_default();

        (
            SubscriptionToken {
                channel: channel.to_string(),
                id,
            },
            displaced,
        )
    }

    /// Remove one entry by token.
    ///
    /// Returns the removed entry's payload, or `None` if the token was
    /// already gone (double-unsubscribe is harmless). The channel key is
    /// deleted when its entry list empties.
    pub fn remove(&self, token: &SubscriptionToken) -> Option<Value> {
        let mut entries = self.entries.write();
        let list = entries.get_mut(&token.channel)?;
        let position = list.iter().position(|e| e.id == token.id)?;
        let removed = list.remove(position);
        if list.is_empty() {
            entries.remove(&token.channel);
        }
        Some(removed.payload)
    }

    /// Remove every entry under a channel key, returning their payloads.
    pub fn remove_channel(&self, channel: &str) -> Vec<Value> {
        self.entries
            .write()
            .remove(channel)
            .map(|list| list.into_iter().map(|e| e.payload).collect())
            .unwrap_or_default()
    }

    /// Snapshot of (channel, payload) for every live entry, for
    /// subscription replay after a reconnect.
    pub fn replay_messages(&self) -> Vec<(String, Value)> {
        let entries = self.entries.read();
        let mut out = Vec::new();
        for (channel, list) in entries.iter() {
            for entry in list {
                out.push((channel.clone(), entry.payload.clone()));
            }
        }
        out
    }

    /// Number of live entries across all channels.
    pub fn entry_count(&self) -> usize {
        self.entries.read().values().map(Vec::len).sum()
    }

    /// Invoke every consumer of a channel with an inbound payload.
    ///
    /// Handlers run synchronously in registration order. Each invocation is
    /// panic-isolated so one failing consumer cannot starve the rest of the
    /// dispatch pass. Unknown channels are dropped. Returns the number of
    /// handlers invoked.
    pub fn dispatch(&self, channel: &str, data: &Value) -> usize {
        // Snapshot the handlers so consumers may subscribe/unsubscribe from
        // inside a callback without deadlocking on the registry lock.
        let handlers: Vec<Handler> = {
            let entries = self.entries.read();
            match entries.get(channel) {
                Some(list) => list.iter().map(|e| Arc::clone(&e.handler)).collect(),
                None => {
                    debug!(%channel, "No consumers for inbound channel, dropping");
                    return 0;
                }
            }
        };

        for handler in &handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(data))).is_err() {
                error!(%channel, "Subscription handler panicked, continuing dispatch");
            }
        }
        handlers.len()
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
