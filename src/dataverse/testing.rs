//! Recording backend for tests.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::types::{AbsenceData, ParticipationData};
use super::Backend;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
  Participation(String, ParticipationData),
  Absence(String, AbsenceData),
}

/// Records every call. Absences whose type is in `rejected_types` fail, as
/// does everything while `down` is set.
#[derive(Default)]
pub struct FakeBackend {
  calls: Mutex<Vec<BackendCall>>,
  rejected_types: Mutex<HashSet<String>>,
  down: AtomicBool,
  delay: Option<Duration>,
}

impl FakeBackend {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_delay(delay: Duration) -> Self {
    Self {
      delay: Some(delay),
      ..Self::default()
    }
  }

  pub fn reject_absence_type(&self, absence_type: &str) {
    self
      .rejected_types
      .lock()
      .unwrap()
      .insert(absence_type.to_string());
  }

  pub fn set_down(&self, down: bool) {
    self.down.store(down, Ordering::SeqCst);
  }

  pub fn calls(&self) -> Vec<BackendCall> {
    self.calls.lock().unwrap().clone()
  }

  async fn record(&self, call: BackendCall) -> Result<()> {
    if let Some(delay) = self.delay {
      tokio::time::sleep(delay).await;
    }

    let rejected = match &call {
      BackendCall::Absence(_, data) => self
        .rejected_types
        .lock()
        .unwrap()
        .contains(&data.absence_type),
      BackendCall::Participation(..) => false,
    };
    self.calls.lock().unwrap().push(call);

    if rejected || self.down.load(Ordering::SeqCst) {
      return Err(eyre!("API request failed: 500 Internal Server Error"));
    }
    Ok(())
  }
}

#[async_trait]
impl Backend for FakeBackend {
  async fn create_participation(&self, user_id: &str, data: &ParticipationData) -> Result<()> {
    self
      .record(BackendCall::Participation(user_id.to_string(), data.clone()))
      .await
  }

  async fn create_absence(&self, user_id: &str, data: &AbsenceData) -> Result<()> {
    self
      .record(BackendCall::Absence(user_id.to_string(), data.clone()))
      .await
  }
}
