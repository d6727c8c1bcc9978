//! Cache generation lifecycle: install, wait, activate, supersede.

use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, error, info};
use url::Url;

use crate::cache::CacheStorage;
use crate::http::{Fetcher, Request, Response};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationState {
  /// Manifest is being fetched
  Installing,
  /// Fully cached, waiting to take over
  Installed,
  /// Serving fetches
  Active,
  /// Replaced or never installed
  Redundant,
}

impl std::fmt::Display for GenerationState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      GenerationState::Installing => write!(f, "installing"),
      GenerationState::Installed => write!(f, "installed"),
      GenerationState::Active => write!(f, "active"),
      GenerationState::Redundant => write!(f, "redundant"),
    }
  }
}

/// Tracks which cache generation is installing, waiting and active.
pub struct Lifecycle {
  storage: Arc<dyn CacheStorage>,
  installing: Option<String>,
  waiting: Option<String>,
  active: Option<String>,
}

impl Lifecycle {
  /// Restore lifecycle state from storage.
  ///
  /// `current` counts as waiting when it is fully stored but not yet active.
  pub fn restore(storage: Arc<dyn CacheStorage>, current: &str) -> Result<Self> {
    let active = storage.active_generation()?;
    let waiting = if active.as_deref() != Some(current)
      && storage.generations()?.iter().any(|g| g == current)
    {
      Some(current.to_string())
    } else {
      None
    };

    Ok(Self {
      storage,
      installing: None,
      waiting,
      active,
    })
  }

  pub fn active(&self) -> Option<&str> {
    self.active.as_deref()
  }

  pub fn waiting(&self) -> Option<&str> {
    self.waiting.as_deref()
  }

  pub fn state_of(&self, name: &str) -> GenerationState {
    if self.installing.as_deref() == Some(name) {
      GenerationState::Installing
    } else if self.active.as_deref() == Some(name) {
      GenerationState::Active
    } else if self.waiting.as_deref() == Some(name) {
      GenerationState::Installed
    } else {
      GenerationState::Redundant
    }
  }

  /// Fetch every manifest URL and store them as generation `name`.
  ///
  /// Any unreachable or non-2xx asset fails the whole install and nothing is
  /// stored; the active generation keeps serving. A generation that is already
  /// active or waiting is not fetched again.
  pub async fn install(
    &mut self,
    name: &str,
    manifest: &[Url],
    network: &dyn Fetcher,
  ) -> Result<()> {
    if self.active() == Some(name) || self.waiting() == Some(name) {
      debug!(
        generation = name,
        state = %self.state_of(name),
        "cache generation already installed"
      );
      return Ok(());
    }

    info!(generation = name, assets = manifest.len(), "installing cache generation");
    self.installing = Some(name.to_string());

    let result = self.populate(name, manifest, network).await;
    self.installing = None;

    match result {
      Ok(()) => {
        info!(generation = name, "cache generation installed");
        self.waiting = Some(name.to_string());
        Ok(())
      }
      Err(e) => {
        error!(generation = name, error = %e, "cache generation install failed");
        Err(e)
      }
    }
  }

  async fn populate(&self, name: &str, manifest: &[Url], network: &dyn Fetcher) -> Result<()> {
    let requests: Vec<Request> = manifest.iter().cloned().map(Request::get).collect();
    let responses = join_all(requests.iter().map(|r| network.fetch(r))).await;

    let mut entries: Vec<(Request, Response)> = Vec::with_capacity(requests.len());
    for (request, response) in requests.into_iter().zip(responses) {
      let response =
        response.map_err(|e| eyre!("Failed to fetch {} during install: {}", request.url, e))?;
      if !response.is_success() {
        return Err(eyre!(
          "Failed to fetch {} during install: status {}",
          request.url,
          response.status
        ));
      }
      entries.push((request, response));
    }

    self.storage.put_all(name, &entries)
  }

  /// Promote the waiting generation (or re-assert the active one) and purge
  /// every other generation. Returns the generation now active.
  pub fn activate(&mut self) -> Result<Option<String>> {
    let Some(name) = self.waiting.take().or_else(|| self.active.clone()) else {
      return Ok(None);
    };

    for generation in self.storage.generations()? {
      if generation != name {
        info!(generation = %generation, "deleting old cache");
        self.storage.delete_generation(&generation)?;
      }
    }

    self.storage.mark_active(&name)?;
    if self.active.as_deref() != Some(name.as_str()) {
      info!(generation = %name, "cache generation activated");
    }
    self.active = Some(name.clone());

    Ok(Some(name))
  }
}
