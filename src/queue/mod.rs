//! Offline mutation queue.
//!
//! Mutations recorded while offline are appended here and persisted to local
//! storage after every change, then replayed in insertion order by the
//! [`SyncCoordinator`] once connectivity returns.

mod store;
mod sync;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{info, warn};

pub use store::{KeyValueStore, SqliteKeyValueStore};
pub use sync::{DrainOutcome, DrainReport, FailurePolicy, SyncCoordinator};

/// Local storage key holding the serialized queue.
pub const QUEUE_KEY: &str = "offlineQueue";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
  Participation,
  Absence,
}

impl std::fmt::Display for OperationKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      OperationKind::Participation => write!(f, "participation"),
      OperationKind::Absence => write!(f, "absence"),
    }
  }
}

/// A pending mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
  /// Creation time in epoch milliseconds; unique and increasing
  pub id: i64,
  #[serde(rename = "type")]
  pub kind: OperationKind,
  /// Operation-specific record, replayed verbatim
  pub data: serde_json::Value,
  pub timestamp: DateTime<Utc>,
  /// Failed replay attempts so far
  #[serde(default, skip_serializing_if = "is_zero")]
  pub attempts: u32,
}

fn is_zero(n: &u32) -> bool {
  *n == 0
}

struct QueueState {
  items: Vec<QueueItem>,
  last_id: i64,
}

pub struct OfflineQueue {
  state: Mutex<QueueState>,
  store: Arc<dyn KeyValueStore>,
}

impl OfflineQueue {
  /// Load the queue persisted in `store`. Unreadable data starts an empty queue.
  pub fn load(store: Arc<dyn KeyValueStore>) -> Self {
    let items: Vec<QueueItem> = match store.get_item(QUEUE_KEY) {
      Ok(Some(json)) => serde_json::from_str(&json).unwrap_or_else(|e| {
        warn!(error = %e, "discarding unreadable offline queue");
        Vec::new()
      }),
      Ok(None) => Vec::new(),
      Err(e) => {
        warn!(error = %e, "failed to read offline queue");
        Vec::new()
      }
    };

    let last_id = items.iter().map(|i| i.id).max().unwrap_or(0);
    if !items.is_empty() {
      info!(pending = items.len(), "restored offline queue");
    }

    Self {
      state: Mutex::new(QueueState { items, last_id }),
      store,
    }
  }

  /// Append a mutation and persist the whole queue.
  ///
  /// Never fails: if the durable write fails the item is still held in memory
  /// for the rest of this session.
  pub fn enqueue(&self, kind: OperationKind, data: serde_json::Value) -> QueueItem {
    let mut state = self.lock();

    let now = Utc::now();
    let id = next_id(state.last_id, now.timestamp_millis());
    state.last_id = id;

    let item = QueueItem {
      id,
      kind,
      data,
      timestamp: now,
      attempts: 0,
    };
    state.items.push(item.clone());
    self.persist(&state.items);

    info!(id, kind = %kind, pending = state.items.len(), "queued offline operation");
    item
  }

  /// Snapshot of pending items in replay order.
  pub fn items(&self) -> Vec<QueueItem> {
    self.lock().items.clone()
  }

  pub fn len(&self) -> usize {
    self.lock().items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Drop a replayed item and persist what is left.
  pub fn remove(&self, id: i64) {
    let mut state = self.lock();
    let before = state.items.len();
    state.items.retain(|item| item.id != id);
    if state.items.len() != before {
      self.persist(&state.items);
    }
  }

  /// Store a retried item in place, keeping its position in the queue.
  pub fn update(&self, item: &QueueItem) {
    let mut state = self.lock();
    let Some(slot) = state.items.iter_mut().find(|i| i.id == item.id) else {
      return;
    };
    *slot = item.clone();
    self.persist(&state.items);
  }

  fn persist(&self, items: &[QueueItem]) {
    let result = if items.is_empty() {
      self.store.remove_item(QUEUE_KEY)
    } else {
      serde_json::to_string(items)
        .map_err(|e| color_eyre::eyre::eyre!("Failed to serialize offline queue: {}", e))
        .and_then(|json| self.store.set_item(QUEUE_KEY, &json))
    };

    if let Err(e) = result {
      warn!(error = %e, "failed to persist offline queue, keeping it in memory only");
    }
  }

  fn lock(&self) -> MutexGuard<'_, QueueState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

/// Wall-clock id, bumped past `last` when the clock has not advanced.
fn next_id(last: i64, now: i64) -> i64 {
  if now > last {
    now
  } else {
    last + 1
  }
}
