use crate::connectivity::{ConnectivityMonitor, Transition};
use crate::dataverse::{
  AbsenceData, Backend, ParticipationData, ABSENCE_TYPES, MAX_DESCRIPTION_LEN, STATUS_REGISTERED,
};
use crate::event::{Event, EventHandler};
use crate::queue::{DrainOutcome, FailurePolicy, OfflineQueue, OperationKind, SyncCoordinator};
use crate::worker::ClientMessage;
use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How a registration was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
  /// Delivered to the backend
  Sent,
  /// Stored in the offline queue for the next sync
  Queued,
}

/// Main application context
pub struct App {
  /// Signed-in user; queued work is only replayed when present
  user_id: Option<String>,

  connectivity: ConnectivityMonitor,

  queue: Arc<OfflineQueue>,

  backend: Arc<dyn Backend>,

  sync: Arc<SyncCoordinator>,

  /// Drain passes started from the event loop, awaited before exit
  drains: Vec<JoinHandle<DrainOutcome>>,

  /// Whether to quit
  should_quit: bool,
}

impl App {
  pub fn new(
    user_id: Option<String>,
    online: bool,
    queue: Arc<OfflineQueue>,
    backend: Arc<dyn Backend>,
    policy: FailurePolicy,
  ) -> Self {
    let sync = Arc::new(SyncCoordinator::new(
      Arc::clone(&queue),
      Arc::clone(&backend),
      policy,
    ));

    Self {
      user_id,
      connectivity: ConnectivityMonitor::new(online),
      queue,
      backend,
      sync,
      drains: Vec::new(),
      should_quit: false,
    }
  }

  pub fn user_id(&self) -> Option<&str> {
    self.user_id.as_deref()
  }

  pub fn is_online(&self) -> bool {
    self.connectivity.is_online()
  }

  /// Observe connectivity changes
  pub fn connectivity(&self) -> watch::Receiver<bool> {
    self.connectivity.subscribe()
  }

  pub fn queue(&self) -> &OfflineQueue {
    &self.queue
  }

  /// Startup work: replay anything left from a previous session.
  pub fn start(&self) -> Option<JoinHandle<DrainOutcome>> {
    if self.is_online() {
      self.start_drain()
    } else {
      None
    }
  }

  fn session(&self) -> Result<&str> {
    self
      .user_id
      .as_deref()
      .ok_or_else(|| eyre!("User data not available; sign in with --user or --entra-id"))
  }

  pub async fn register_participation(&self, mut data: ParticipationData) -> Result<Registration> {
    let user_id = self.session()?;
    data.date.get_or_insert_with(Utc::now);
    data
      .status
      .get_or_insert_with(|| STATUS_REGISTERED.to_string());

    if self.is_online() {
      self.backend.create_participation(user_id, &data).await?;
      info!("participation registered");
      return Ok(Registration::Sent);
    }

    let payload = serde_json::to_value(&data)
      .map_err(|e| eyre!("Failed to serialize participation: {}", e))?;
    self.queue.enqueue(OperationKind::Participation, payload);
    Ok(Registration::Queued)
  }

  pub async fn register_absence(&self, mut data: AbsenceData) -> Result<Registration> {
    let user_id = self.session()?;
    validate_absence(&data)?;
    data.date.get_or_insert_with(Utc::now);
    data
      .status
      .get_or_insert_with(|| STATUS_REGISTERED.to_string());

    if self.is_online() {
      self.backend.create_absence(user_id, &data).await?;
      info!(absence_type = %data.absence_type, "absence registered");
      return Ok(Registration::Sent);
    }

    let payload =
      serde_json::to_value(&data).map_err(|e| eyre!("Failed to serialize absence: {}", e))?;
    self.queue.enqueue(OperationKind::Absence, payload);
    Ok(Registration::Queued)
  }

  /// Drain the queue now and wait for the pass to finish.
  pub async fn sync_now(&self) -> Result<DrainOutcome> {
    let user_id = self.session()?;
    if !self.is_online() {
      return Err(eyre!(
        "Offline; {} queued operation(s) will sync when connectivity returns",
        self.queue.len()
      ));
    }
    Ok(self.sync.drain(user_id).await)
  }

  fn start_drain(&self) -> Option<JoinHandle<DrainOutcome>> {
    let Some(user_id) = self.user_id.clone() else {
      debug!("no session, leaving offline queue for later");
      return None;
    };

    let sync = Arc::clone(&self.sync);
    Some(tokio::spawn(async move { sync.drain(&user_id).await }))
  }

  /// Apply a connectivity signal. A drain starts only on the flip to online.
  pub fn handle_connectivity(&self, online: bool) -> Option<JoinHandle<DrainOutcome>> {
    match self.connectivity.set_online(online)? {
      Transition::WentOnline => self.handle_online(),
      Transition::WentOffline => {
        self.handle_offline();
        None
      }
    }
  }

  fn handle_online(&self) -> Option<JoinHandle<DrainOutcome>> {
    info!(pending = self.queue.len(), "back online");
    self.start_drain()
  }

  fn handle_offline(&self) {
    info!("offline mode; changes will sync when connectivity returns");
  }

  pub fn handle_worker_message(&self, message: ClientMessage) -> Option<JoinHandle<DrainOutcome>> {
    match message {
      ClientMessage::BackgroundSync { message } => {
        info!(%message, "background sync requested");
        // Replaying while offline would only burn the queued items
        if self.is_online() {
          self.start_drain()
        } else {
          None
        }
      }
    }
  }

  fn handle_event(&mut self, event: Event) {
    let drain = match event {
      Event::Connectivity(online) => self.handle_connectivity(online),
      Event::Worker(message) => self.handle_worker_message(message),
      Event::Shutdown => {
        self.should_quit = true;
        None
      }
    };
    self.track(drain);
  }

  fn track(&mut self, drain: Option<JoinHandle<DrainOutcome>>) {
    self.drains.retain(|handle| !handle.is_finished());
    self.drains.extend(drain);
  }

  /// Let running drain passes finish so no delivered item stays queued.
  async fn finish_drains(&mut self) {
    for handle in self.drains.drain(..) {
      if let Err(e) = handle.await {
        warn!(error = %e, "drain task failed");
      }
    }
  }

  pub async fn run(&mut self, events: &mut EventHandler) -> Result<()> {
    let startup = self.start();
    self.track(startup);

    while !self.should_quit {
      match events.next().await {
        Some(event) => self.handle_event(event),
        None => break,
      }
    }

    if !self.drains.is_empty() {
      info!("waiting for sync to finish");
    }
    self.finish_drains().await;

    info!(pending = self.queue.len(), "shutting down");
    Ok(())
  }
}

fn validate_absence(data: &AbsenceData) -> Result<()> {
  if !ABSENCE_TYPES.contains(&data.absence_type.as_str()) {
    return Err(eyre!(
      "Unknown absence type '{}', expected one of: {}",
      data.absence_type,
      ABSENCE_TYPES.join(", ")
    ));
  }

  if let Some(description) = &data.description {
    if description.chars().count() > MAX_DESCRIPTION_LEN {
      return Err(eyre!(
        "Description is longer than {} characters",
        MAX_DESCRIPTION_LEN
      ));
    }
  }

  Ok(())
}
