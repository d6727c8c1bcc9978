//! Network interception: classify each request and dispatch to a strategy.

use color_eyre::Result;
use std::sync::Arc;
use tracing::debug;
use url::Url;

use crate::cache::CacheLayer;
use crate::http::{Classifier, Fetcher, Request, RequestCategory, Response};

#[derive(Clone)]
pub struct Interceptor {
  classifier: Classifier,
  network: Arc<dyn Fetcher>,
  /// Present once a cache generation controls fetches
  layer: Option<CacheLayer>,
  shell: Url,
}

impl Interceptor {
  pub fn new(classifier: Classifier, network: Arc<dyn Fetcher>, shell: Url) -> Self {
    Self {
      classifier,
      network,
      layer: None,
      shell,
    }
  }

  pub fn set_layer(&mut self, layer: Option<CacheLayer>) {
    self.layer = layer;
  }

  pub fn network(&self) -> &dyn Fetcher {
    self.network.as_ref()
  }

  /// Resolve a request.
  ///
  /// Only uncontrolled traffic (non-GET, non-http(s), or no active generation)
  /// can return an error; strategies always produce a response.
  pub async fn handle(&self, request: &Request) -> Result<Response> {
    let Some(layer) = self.controlling(request) else {
      return self.network.fetch(request).await;
    };

    let category = self.classifier.classify(request);
    let network = self.network.as_ref();
    let result = match category {
      RequestCategory::Static => layer.cache_first(request, network).await,
      RequestCategory::Api | RequestCategory::Other => layer.network_first(request, network).await,
      RequestCategory::Navigation => layer.navigation(request, network, &self.shell).await,
    };

    debug!(
      request = %request.identity(),
      generation = layer.generation(),
      category = %category,
      source = %result.source,
      cached_at = ?result.cached_at,
      status = result.data.status,
      "request resolved"
    );
    Ok(result.data)
  }

  fn controlling(&self, request: &Request) -> Option<&CacheLayer> {
    if request.method != reqwest::Method::GET {
      return None;
    }
    if !matches!(request.url.scheme(), "http" | "https") {
      return None;
    }
    self.layer.as_ref()
  }
}
