//! Row-change notifications delivered to named channels.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChangeNotification {
    pub table: String,
    pub kind: ChangeKind,
    pub record: Value,
}

/// Restricts a channel to rows whose `column` equals `value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeFilter {
    pub column: String,
    pub value: String,
}

impl ChangeFilter {
    #[must_use]
    pub fn eq(column: impl Into<String>, value: impl ToString) -> Self {
        Self {
            column: column.into(),
            value: value.to_string(),
        }
    }

    fn matches(&self, record: &Value) -> bool {
        match record.get(&self.column) {
            Some(Value::String(s)) => *s == self.value,
            Some(Value::Null) | None => false,
            Some(other) => other.to_string() == self.value,
        }
    }
}

/// Receiving end of one channel. Ends when the channel is removed.
#[derive(Debug)]
pub struct ChangeSubscription {
    name: String,
    receiver: broadcast::Receiver<ChangeNotification>,
}

impl ChangeSubscription {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Next notification, or `None` once the channel is gone. Notifications
    /// missed because the receiver fell behind are skipped.
    pub async fn recv(&mut self) -> Option<ChangeNotification> {
        loop {
            match self.receiver.recv().await {
                Ok(notification) => return Some(notification),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(channel = %self.name, skipped, "change subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

pub trait ChangeFeed: Send + Sync {
    /// Opens (or replaces) the channel `name` for changes on `table`.
    fn channel(&self, name: &str, table: &str, filter: Option<ChangeFilter>) -> ChangeSubscription;

    /// Closes the channel; its subscription's `recv` returns `None`.
    fn remove_channel(&self, name: &str);
}

struct Channel {
    table: String,
    filter: Option<ChangeFilter>,
    sender: broadcast::Sender<ChangeNotification>,
}

/// In-process change feed backed by tokio broadcast channels.
#[derive(Clone, Default)]
pub struct LocalChangeFeed {
    channels: Arc<Mutex<HashMap<String, Channel>>>,
}

impl std::fmt::Debug for LocalChangeFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("LocalChangeFeed")
            .field("channels", &channels.len())
            .finish()
    }
}

impl LocalChangeFeed {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers a change to every matching channel and returns how many
    /// channels accepted it.
    pub fn publish(&self, table: &str, kind: ChangeKind, record: &Value) -> usize {
        let channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        let mut delivered = 0;
        for (name, channel) in channels.iter() {
            if channel.table != table {
                continue;
            }
            if channel.filter.as_ref().is_some_and(|f| !f.matches(record)) {
                continue;
            }
            let notification = ChangeNotification {
                table: table.to_owned(),
                kind,
                record: record.clone(),
            };
            if channel.sender.send(notification).is_ok() {
                delivered += 1;
            } else {
                tracing::trace!(channel = %name, "no receivers on channel");
            }
        }
        delivered
    }

    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl ChangeFeed for LocalChangeFeed {
    fn channel(&self, name: &str, table: &str, filter: Option<ChangeFilter>) -> ChangeSubscription {
        let (sender, receiver) = broadcast::channel(CHANNEL_CAPACITY);
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        channels.insert(
            name.to_owned(),
            Channel {
                table: table.to_owned(),
                filter,
                sender,
            },
        );
        tracing::debug!(channel = %name, table = %table, "change channel opened");
        ChangeSubscription {
            name: name.to_owned(),
            receiver,
        }
    }

    fn remove_channel(&self, name: &str) {
        let removed = self
            .channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
        if removed.is_some() {
            tracing::debug!(channel = %name, "change channel removed");
        }
    }
}
