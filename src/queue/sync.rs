//! Replays the offline queue against the backend.

use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::{OfflineQueue, OperationKind, QueueItem};
use crate::dataverse::{AbsenceData, Backend, ParticipationData};

/// What happens to an item whose replay fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum FailurePolicy {
  /// Log and discard after a single attempt (best-effort sync)
  #[default]
  Drop,
  /// Keep for the next sync trigger until `max_attempts` replays have failed
  Requeue { max_attempts: u32 },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
  pub attempted: usize,
  pub succeeded: usize,
  pub failed: usize,
  pub dropped: usize,
  pub requeued: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
  /// Another drain was in flight; nothing was done
  AlreadyRunning,
  Completed(DrainReport),
}

/// Drains the offline queue, one item at a time, at most one pass at a time.
pub struct SyncCoordinator {
  queue: Arc<OfflineQueue>,
  backend: Arc<dyn Backend>,
  policy: FailurePolicy,
  in_progress: AtomicBool,
}

/// Clears the in-progress flag when the pass ends, however it ends.
struct PassGuard<'a>(&'a AtomicBool);

impl Drop for PassGuard<'_> {
  fn drop(&mut self) {
    self.0.store(false, Ordering::SeqCst);
  }
}

impl SyncCoordinator {
  pub fn new(queue: Arc<OfflineQueue>, backend: Arc<dyn Backend>, policy: FailurePolicy) -> Self {
    Self {
      queue,
      backend,
      policy,
      in_progress: AtomicBool::new(false),
    }
  }

  #[allow(dead_code)]
  pub fn is_draining(&self) -> bool {
    self.in_progress.load(Ordering::SeqCst)
  }

  /// Replay every pending item in insertion order.
  ///
  /// A failing item never stops the pass. Under [`FailurePolicy::Drop`] the
  /// queue is empty afterwards (apart from items enqueued meanwhile). Retried
  /// items keep their place ahead of newer ones.
  pub async fn drain(&self, user_id: &str) -> DrainOutcome {
    if self
      .in_progress
      .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
      .is_err()
    {
      debug!("drain already in progress, skipping");
      return DrainOutcome::AlreadyRunning;
    }
    let _guard = PassGuard(&self.in_progress);

    let items = self.queue.items();
    let mut report = DrainReport::default();
    if items.is_empty() {
      return DrainOutcome::Completed(report);
    }

    info!(pending = items.len(), "synchronizing offline queue");

    // Each item is settled as soon as its replay returns, so a pass that is
    // cut short never replays delivered work
    for mut item in items {
      report.attempted += 1;

      let Err(e) = self.replay(user_id, &item).await else {
        report.succeeded += 1;
        self.queue.remove(item.id);
        continue;
      };

      report.failed += 1;
      item.attempts += 1;
      match self.policy {
        FailurePolicy::Requeue { max_attempts } if item.attempts < max_attempts => {
          warn!(
            id = item.id,
            kind = %item.kind,
            attempts = item.attempts,
            error = %e,
            "failed to sync offline item, keeping it"
          );
          report.requeued += 1;
          self.queue.update(&item);
        }
        _ => {
          error!(
            id = item.id,
            kind = %item.kind,
            attempts = item.attempts,
            error = %e,
            "failed to sync offline item, dropping it"
          );
          report.dropped += 1;
          self.queue.remove(item.id);
        }
      }
    }

    info!(
      succeeded = report.succeeded,
      dropped = report.dropped,
      requeued = report.requeued,
      "offline queue synchronized"
    );

    DrainOutcome::Completed(report)
  }

  async fn replay(&self, user_id: &str, item: &QueueItem) -> Result<()> {
    match item.kind {
      OperationKind::Participation => {
        let data: ParticipationData = serde_json::from_value(item.data.clone())
          .map_err(|e| eyre!("Invalid participation payload: {}", e))?;
        self.backend.create_participation(user_id, &data).await
      }
      OperationKind::Absence => {
        let data: AbsenceData = serde_json::from_value(item.data.clone())
          .map_err(|e| eyre!("Invalid absence payload: {}", e))?;
        self.backend.create_absence(user_id, &data).await
      }
    }
  }
}
