//! Messages exchanged between the worker and the application context.

use serde::{Deserialize, Serialize};

/// Background sync tag that asks clients to drain their offline queue.
pub const BACKGROUND_SYNC_TAG: &str = "background-sync";

/// Worker → application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
  BackgroundSync { message: String },
}

impl ClientMessage {
  pub fn background_sync() -> Self {
    ClientMessage::BackgroundSync {
      message: "Process offline queue".to_string(),
    }
  }
}

/// Application → worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
  /// Activate the waiting cache generation now
  SkipWaiting,
}
