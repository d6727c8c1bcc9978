use tokio::sync::mpsc;
use tracing::debug;

use crate::worker::ClientMessage;

/// Application events
#[derive(Debug)]
pub enum Event {
  /// Platform connectivity signal
  Connectivity(bool),
  /// Message posted by the caching worker
  Worker(ClientMessage),
  /// Stop the event loop
  Shutdown,
}

/// Funnels connectivity, worker and shutdown signals into one channel
pub struct EventHandler {
  tx: mpsc::UnboundedSender<Event>,
  rx: mpsc::UnboundedReceiver<Event>,
}

impl EventHandler {
  pub fn new() -> Self {
    let (tx, rx) = mpsc::unbounded_channel();
    Self { tx, rx }
  }

  /// Sender for producers outside the handler
  pub fn sender(&self) -> mpsc::UnboundedSender<Event> {
    self.tx.clone()
  }

  /// Relay everything the worker posts to this client
  pub fn forward_worker_messages(&self, mut messages: mpsc::UnboundedReceiver<ClientMessage>) {
    let tx = self.tx.clone();
    tokio::spawn(async move {
      while let Some(message) = messages.recv().await {
        if tx.send(Event::Worker(message)).is_err() {
          break;
        }
      }
      debug!("worker message stream closed");
    });
  }

  /// Turn Ctrl-C into a shutdown event
  pub fn forward_ctrl_c(&self) {
    let tx = self.tx.clone();
    tokio::spawn(async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        let _ = tx.send(Event::Shutdown);
      }
    });
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<Event> {
    self.rx.recv().await
  }
}
