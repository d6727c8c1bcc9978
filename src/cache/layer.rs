//! Caching strategies that combine the network with one cache generation.

use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

use super::storage::{CacheStorage, CachedEntry};
use super::traits::CacheResult;
use crate::http::{Fetcher, Request, Response};

/// JSON body returned for API requests that could not be served at all.
pub const OFFLINE_JSON: &str =
  r#"{"error":"Offline","message":"No internet connection available"}"#;

/// Offline page served for navigations when neither network nor cache can answer.
pub const OFFLINE_PAGE: &str = r#"<!DOCTYPE html>
<html lang="no">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>Offline - Fravær Registrering</title>
</head>
<body>
<main>
<h1>Offline</h1>
<p>Du er ikke tilkoblet til internett. Sjekk tilkoblingen din og prøv igjen.</p>
<p>Endringer du gjør vil bli lagret og synkronisert når du får tilbake tilkoblingen.</p>
</main>
</body>
</html>
"#;

/// Cache layer bound to a single cache generation.
///
/// This layer sits between the interception layer and the network,
/// providing the cache-first, network-first and navigation strategies.
pub struct CacheLayer {
  storage: Arc<dyn CacheStorage>,
  generation: String,
}

impl CacheLayer {
  pub fn new(storage: Arc<dyn CacheStorage>, generation: impl Into<String>) -> Self {
    Self {
      storage,
      generation: generation.into(),
    }
  }

  pub fn generation(&self) -> &str {
    &self.generation
  }

  /// Storage failures degrade to a cache miss.
  fn lookup(&self, request: &Request) -> Option<CachedEntry> {
    match self.storage.lookup(&self.generation, request) {
      Ok(entry) => entry,
      Err(e) => {
        warn!(request = %request.identity(), error = %e, "cache lookup failed");
        None
      }
    }
  }

  fn store(&self, request: &Request, response: &Response) {
    if !response.is_success() {
      return;
    }
    if let Err(e) = self.storage.put(&self.generation, request, response) {
      warn!(request = %request.identity(), error = %e, "failed to cache response");
    }
  }

  /// Cache-first strategy for static resources.
  ///
  /// 1. Check cache - if present, return without touching the network
  /// 2. Otherwise fetch, caching successful responses
  /// 3. On network failure, answer 503
  pub async fn cache_first(
    &self,
    request: &Request,
    network: &dyn Fetcher,
  ) -> CacheResult<Response> {
    if let Some(cached) = self.lookup(request) {
      return CacheResult::from_cache(cached.response, cached.cached_at);
    }

    match network.fetch(request).await {
      Ok(response) => {
        self.store(request, &response);
        CacheResult::from_network(response)
      }
      Err(e) => {
        warn!(request = %request.identity(), error = %e, "cache-first fetch failed");
        CacheResult::synthetic(
          Response::new(503, "Service Unavailable")
            .with_header("Content-Type", "text/plain")
            .with_body("Offline - Resource not available"),
        )
      }
    }
  }

  /// Network-first strategy for API and uncategorized requests.
  ///
  /// The network always wins when reachable; cached data is only a fallback.
  pub async fn network_first(
    &self,
    request: &Request,
    network: &dyn Fetcher,
  ) -> CacheResult<Response> {
    match network.fetch(request).await {
      Ok(response) => {
        self.store(request, &response);
        CacheResult::from_network(response)
      }
      Err(e) => {
        debug!(request = %request.identity(), error = %e, "network failed, trying cache");

        if let Some(cached) = self.lookup(request) {
          return CacheResult::offline(cached.response, cached.cached_at);
        }

        CacheResult::synthetic(
          Response::new(503, "Service Unavailable")
            .with_header("Content-Type", "application/json")
            .with_body(OFFLINE_JSON),
        )
      }
    }
  }

  /// Navigation strategy: network, then the cached app shell, then a built-in page.
  ///
  /// Navigation responses are not cached; the shell comes from the install manifest.
  pub async fn navigation(
    &self,
    request: &Request,
    network: &dyn Fetcher,
    shell: &Url,
  ) -> CacheResult<Response> {
    match network.fetch(request).await {
      Ok(response) => CacheResult::from_network(response),
      Err(e) => {
        debug!(
          request = %request.identity(),
          error = %e,
          "navigation failed, serving offline page"
        );

        if let Some(cached) = self.lookup(&Request::get(shell.clone())) {
          return CacheResult::offline(cached.response, cached.cached_at);
        }

        CacheResult::synthetic(
          Response::new(200, "OK")
            .with_header("Content-Type", "text/html")
            .with_body(OFFLINE_PAGE),
        )
      }
    }
  }
}

impl Clone for CacheLayer {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      generation: self.generation.clone(),
    }
  }
}
