//! The caching worker context.
//!
//! Runs as its own task and owns the interception layer and cache lifecycle.
//! The application reaches it only through a [`WorkerHandle`], which sends
//! commands over a channel; the worker talks back with [`ClientMessage`]s.

mod intercept;
mod lifecycle;
mod messages;

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{CacheLayer, CacheStorage};
use crate::config::Config;
use crate::http::{Classifier, Fetcher, Request, Response};

pub use intercept::Interceptor;
pub use lifecycle::{GenerationState, Lifecycle};
pub use messages::{ClientMessage, ControlMessage, BACKGROUND_SYNC_TAG};

/// Static settings for the worker.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
  /// Name of the generation this build installs
  pub cache_name: String,
  /// Assets that must all be cached for an install to succeed
  pub manifest: Vec<Url>,
  /// App shell served to offline navigations
  pub shell: Url,
  pub api_hosts: Vec<String>,
  /// Activate immediately after install instead of waiting for SKIP_WAITING
  pub skip_waiting: bool,
}

impl WorkerSettings {
  pub fn from_config(config: &Config) -> Result<Self> {
    Ok(Self {
      cache_name: config.offline.cache_name.clone(),
      manifest: config.static_manifest()?,
      shell: config.resolve(&config.offline.offline_document)?,
      api_hosts: config.offline.api_hosts.clone(),
      skip_waiting: config.offline.skip_waiting,
    })
  }
}

/// Snapshot of the worker's cache state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerStatus {
  pub cache_name: String,
  pub state: GenerationState,
  pub active: Option<String>,
  pub waiting: Option<String>,
  pub entries: usize,
}

/// Commands accepted by the worker task.
pub enum WorkerCommand {
  Fetch {
    request: Request,
    reply: oneshot::Sender<Result<Response>>,
  },
  Install {
    reply: oneshot::Sender<Result<()>>,
  },
  Message(ControlMessage),
  /// A background sync event fired for `tag`
  Sync {
    tag: String,
  },
  Connect {
    client: mpsc::UnboundedSender<ClientMessage>,
  },
  Status {
    reply: oneshot::Sender<Result<WorkerStatus>>,
  },
}

pub struct ServiceWorker {
  settings: WorkerSettings,
  storage: Arc<dyn CacheStorage>,
  lifecycle: Lifecycle,
  interceptor: Interceptor,
  clients: Vec<mpsc::UnboundedSender<ClientMessage>>,
}

impl ServiceWorker {
  pub fn new(
    settings: WorkerSettings,
    storage: Arc<dyn CacheStorage>,
    network: Arc<dyn Fetcher>,
  ) -> Result<Self> {
    let lifecycle = Lifecycle::restore(Arc::clone(&storage), &settings.cache_name)?;
    let mut interceptor = Interceptor::new(
      Classifier::new(settings.api_hosts.clone()),
      network,
      settings.shell.clone(),
    );
    interceptor.set_layer(
      lifecycle
        .active()
        .map(|name| CacheLayer::new(Arc::clone(&storage), name)),
    );

    Ok(Self {
      settings,
      storage,
      lifecycle,
      interceptor,
      clients: Vec::new(),
    })
  }

  /// Install this build's generation, then activate it unless told to wait.
  pub async fn install(&mut self) -> Result<()> {
    let name = self.settings.cache_name.clone();
    self
      .lifecycle
      .install(&name, &self.settings.manifest, self.interceptor.network())
      .await?;

    if self.settings.skip_waiting {
      self.activate()?;
    }
    Ok(())
  }

  /// Activate the waiting generation and take over fetches immediately.
  pub fn activate(&mut self) -> Result<()> {
    if let Some(name) = self.lifecycle.activate()? {
      self
        .interceptor
        .set_layer(Some(CacheLayer::new(Arc::clone(&self.storage), name.as_str())));
      info!(generation = %name, clients = self.clients.len(), "worker controls clients");
    }
    Ok(())
  }

  pub fn status(&self) -> Result<WorkerStatus> {
    let name = &self.settings.cache_name;
    let entries = match self.lifecycle.active() {
      Some(active) => self.storage.entry_count(active)?,
      None => 0,
    };

    Ok(WorkerStatus {
      cache_name: name.clone(),
      state: self.lifecycle.state_of(name),
      active: self.lifecycle.active().map(String::from),
      waiting: self.lifecycle.waiting().map(String::from),
      entries,
    })
  }

  fn handle_message(&mut self, message: ControlMessage) {
    debug!(?message, "worker received message");
    match message {
      ControlMessage::SkipWaiting => {
        if let Err(e) = self.activate() {
          warn!(error = %e, "activation failed");
        }
      }
    }
  }

  fn handle_sync(&mut self, tag: &str) {
    info!(tag, "background sync triggered");
    if tag != BACKGROUND_SYNC_TAG {
      return;
    }

    // Closed clients are dropped on the way
    self
      .clients
      .retain(|client| client.send(ClientMessage::background_sync()).is_ok());
  }

  async fn handle_command(&mut self, command: WorkerCommand) {
    match command {
      WorkerCommand::Fetch { request, reply } => {
        // Fetches run concurrently with each other and with lifecycle work
        let interceptor = self.interceptor.clone();
        tokio::spawn(async move {
          let _ = reply.send(interceptor.handle(&request).await);
        });
      }
      WorkerCommand::Install { reply } => {
        let _ = reply.send(self.install().await);
      }
      WorkerCommand::Message(message) => self.handle_message(message),
      WorkerCommand::Sync { tag } => self.handle_sync(&tag),
      WorkerCommand::Connect { client } => self.clients.push(client),
      WorkerCommand::Status { reply } => {
        let _ = reply.send(self.status());
      }
    }
  }
}

/// Start the worker task.
pub fn spawn(mut worker: ServiceWorker) -> WorkerHandle {
  let (tx, mut rx) = mpsc::unbounded_channel();

  tokio::spawn(async move {
    while let Some(command) = rx.recv().await {
      worker.handle_command(command).await;
    }
    debug!("worker stopped");
  });

  WorkerHandle { tx }
}

/// Cloneable handle to the worker task.
#[derive(Clone)]
pub struct WorkerHandle {
  tx: mpsc::UnboundedSender<WorkerCommand>,
}

impl WorkerHandle {
  fn send(&self, command: WorkerCommand) -> Result<()> {
    self
      .tx
      .send(command)
      .map_err(|_| eyre!("Worker is not running"))
  }

  async fn request<T>(
    &self,
    make: impl FnOnce(oneshot::Sender<Result<T>>) -> WorkerCommand,
  ) -> Result<T> {
    let (reply, rx) = oneshot::channel();
    self.send(make(reply))?;
    rx.await.map_err(|_| eyre!("Worker dropped the request"))?
  }

  pub async fn install(&self) -> Result<()> {
    self.request(|reply| WorkerCommand::Install { reply }).await
  }

  pub async fn status(&self) -> Result<WorkerStatus> {
    self.request(|reply| WorkerCommand::Status { reply }).await
  }

  pub fn post_message(&self, message: ControlMessage) -> Result<()> {
    self.send(WorkerCommand::Message(message))
  }

  pub fn sync(&self, tag: &str) -> Result<()> {
    self.send(WorkerCommand::Sync {
      tag: tag.to_string(),
    })
  }

  /// Register a client and receive the messages the worker posts to it.
  pub fn connect(&self) -> Result<mpsc::UnboundedReceiver<ClientMessage>> {
    let (client, rx) = mpsc::unbounded_channel();
    self.send(WorkerCommand::Connect { client })?;
    Ok(rx)
  }
}

#[async_trait]
impl Fetcher for WorkerHandle {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let request = request.clone();
    self
      .request(|reply| WorkerCommand::Fetch { request, reply })
      .await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStorage;
  use crate::http::testing::FakeFetcher;

  fn url(path: &str) -> Url {
    Url::parse(&format!("https://app.example{}", path)).unwrap()
  }

  fn settings(cache_name: &str, skip_waiting: bool) -> WorkerSettings {
    WorkerSettings {
      cache_name: cache_name.to_string(),
      manifest: vec![url("/index.html"), url("/styles.css")],
      shell: url("/index.html"),
      api_hosts: vec!["dynamics.com".to_string()],
      skip_waiting,
    }
  }

  fn serving_manifest() -> Arc<FakeFetcher> {
    let network = Arc::new(FakeFetcher::new());
    network.respond_ok(url("/index.html").as_str(), "<html>shell</html>");
    network.respond_ok(url("/styles.css").as_str(), "css");
    network
  }

  #[tokio::test]
  async fn test_install_activates_and_serves_from_cache() {
    let storage: Arc<dyn CacheStorage> = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let network = serving_manifest();
    let worker = ServiceWorker::new(settings("v1", true), storage, network.clone()).unwrap();
    let handle = spawn(worker);

    handle.install().await.unwrap();
    let status = handle.status().await.unwrap();
    assert_eq!(status.state, GenerationState::Active);
    assert_eq!(status.entries, 2);

    network.set_offline(true);
    let response = handle.fetch(&Request::get(url("/styles.css"))).await.unwrap();
    assert_eq!(response.text(), "css");

    let page = handle.fetch(&Request::navigate(url("/overview"))).await.unwrap();
    assert_eq!(page.text(), "<html>shell</html>");
  }

  #[tokio::test]
  async fn test_waits_for_skip_waiting() {
    let storage: Arc<dyn CacheStorage> = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let worker = ServiceWorker::new(settings("v1", false), storage, serving_manifest()).unwrap();
    let handle = spawn(worker);

    handle.install().await.unwrap();
    let status = handle.status().await.unwrap();
    assert_eq!(status.state, GenerationState::Installed);
    assert_eq!(status.active, None);

    handle.post_message(ControlMessage::SkipWaiting).unwrap();
    let status = handle.status().await.unwrap();
    assert_eq!(status.state, GenerationState::Active);
    assert_eq!(status.active.as_deref(), Some("v1"));
  }

  #[tokio::test]
  async fn test_failed_install_leaves_previous_generation_serving() {
    let storage: Arc<dyn CacheStorage> = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let network = serving_manifest();

    let v1 = ServiceWorker::new(settings("v1", true), Arc::clone(&storage), network.clone())
      .unwrap();
    spawn(v1).install().await.unwrap();

    network.fail(url("/styles.css").as_str());
    let v2 = ServiceWorker::new(settings("v2", true), Arc::clone(&storage), network.clone())
      .unwrap();
    let handle = spawn(v2);

    assert!(handle.install().await.is_err());
    let status = handle.status().await.unwrap();
    assert_eq!(status.active.as_deref(), Some("v1"));
    assert_eq!(status.state, GenerationState::Redundant);

    // v1 still answers for the cached stylesheet
    let response = handle.fetch(&Request::get(url("/styles.css"))).await.unwrap();
    assert_eq!(response.text(), "css");
  }

  #[tokio::test]
  async fn test_background_sync_posts_to_clients() {
    let storage: Arc<dyn CacheStorage> = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let worker = ServiceWorker::new(settings("v1", true), storage, serving_manifest()).unwrap();
    let handle = spawn(worker);

    let mut first = handle.connect().unwrap();
    let mut second = handle.connect().unwrap();

    handle.sync("other-tag").unwrap();
    handle.sync(BACKGROUND_SYNC_TAG).unwrap();

    assert_eq!(first.recv().await, Some(ClientMessage::background_sync()));
    assert_eq!(second.recv().await, Some(ClientMessage::background_sync()));
    assert!(first.try_recv().is_err());
  }

  #[tokio::test]
  async fn test_restarted_worker_does_not_refetch_active_generation() {
    let storage: Arc<dyn CacheStorage> = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let network = serving_manifest();

    let first = ServiceWorker::new(settings("v1", true), Arc::clone(&storage), network.clone())
      .unwrap();
    spawn(first).install().await.unwrap();

    let second = ServiceWorker::new(settings("v1", true), Arc::clone(&storage), network.clone())
      .unwrap();
    let handle = spawn(second);
    handle.install().await.unwrap();

    assert_eq!(network.calls_to(url("/styles.css").as_str()), 1);
    let status = handle.status().await.unwrap();
    assert_eq!(status.state, GenerationState::Active);
    assert_eq!(status.entries, 2);
  }
}
