//! Scripted fetcher for tests.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::fetch::Fetcher;
use super::types::{Request, Response};

/// Answers from a fixed URL table and records every request it sees.
///
/// Unknown URLs answer 404. While offline every fetch fails.
#[derive(Default)]
pub struct FakeFetcher {
  routes: Mutex<HashMap<String, Response>>,
  once: Mutex<HashMap<String, VecDeque<Response>>>,
  unreachable: Mutex<HashSet<String>>,
  offline: AtomicBool,
  requests: Mutex<Vec<Request>>,
}

impl FakeFetcher {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn respond(&self, url: &str, response: Response) {
    self
      .routes
      .lock()
      .unwrap()
      .insert(url.to_string(), response);
  }

  /// Answer the next request for `url` with `response`, ahead of its route.
  pub fn respond_once(&self, url: &str, response: Response) {
    self
      .once
      .lock()
      .unwrap()
      .entry(url.to_string())
      .or_default()
      .push_back(response);
  }

  pub fn respond_ok(&self, url: &str, body: &str) {
    self.respond(url, Response::new(200, "OK").with_body(body));
  }

  /// Make a single URL fail at the transport level.
  pub fn fail(&self, url: &str) {
    self.unreachable.lock().unwrap().insert(url.to_string());
  }

  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  pub fn requests(&self) -> Vec<Request> {
    self.requests.lock().unwrap().clone()
  }

  pub fn calls_to(&self, url: &str) -> usize {
    self
      .requests
      .lock()
      .unwrap()
      .iter()
      .filter(|r| r.url.as_str() == url)
      .count()
  }
}

#[async_trait]
impl Fetcher for FakeFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    self.requests.lock().unwrap().push(request.clone());

    let url = request.url.as_str();
    if self.offline.load(Ordering::SeqCst) || self.unreachable.lock().unwrap().contains(url) {
      return Err(eyre!("Failed to fetch {}", url));
    }

    if let Some(response) = self
      .once
      .lock()
      .unwrap()
      .get_mut(url)
      .and_then(VecDeque::pop_front)
    {
      return Ok(response);
    }

    Ok(
      self
        .routes
        .lock()
        .unwrap()
        .get(url)
        .cloned()
        .unwrap_or_else(|| Response::new(404, "Not Found")),
    )
  }
}
