//! Maps an outgoing request to the caching strategy that should serve it.

use reqwest::Method;

use super::types::{Request, RequestMode};

/// Path suffixes served cache-first.
const STATIC_EXTENSIONS: &[&str] = &[
  "css", "js", "png", "jpg", "jpeg", "gif", "svg", "ico", "woff", "woff2", "ttf", "eot",
];

/// Host fragments of the backend and identity provider.
pub const DEFAULT_API_HOSTS: &[&str] = &["dynamics.com", "graph.microsoft.com"];

const API_PATH_MARKER: &str = "/api/";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestCategory {
  Static,
  Api,
  Navigation,
  Other,
}

impl std::fmt::Display for RequestCategory {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      RequestCategory::Static => write!(f, "static"),
      RequestCategory::Api => write!(f, "api"),
      RequestCategory::Navigation => write!(f, "navigation"),
      RequestCategory::Other => write!(f, "other"),
    }
  }
}

#[derive(Debug, Clone)]
pub struct Classifier {
  api_hosts: Vec<String>,
}

impl Default for Classifier {
  fn default() -> Self {
    Self::new(DEFAULT_API_HOSTS.iter().map(|h| h.to_string()).collect())
  }
}

impl Classifier {
  pub fn new(api_hosts: Vec<String>) -> Self {
    Self { api_hosts }
  }

  /// Classify a request. First match wins: static, api, navigation, other.
  pub fn classify(&self, request: &Request) -> RequestCategory {
    if is_static(request) {
      RequestCategory::Static
    } else if self.is_api(request) {
      RequestCategory::Api
    } else if is_navigation(request) {
      RequestCategory::Navigation
    } else {
      RequestCategory::Other
    }
  }

  fn is_api(&self, request: &Request) -> bool {
    if request.url.path().contains(API_PATH_MARKER) {
      return true;
    }

    let host = request.url.host_str().unwrap_or_default();
    self.api_hosts.iter().any(|h| host.contains(h.as_str()))
  }
}

fn is_static(request: &Request) -> bool {
  match request.url.path().rsplit_once('.') {
    Some((_, ext)) if !ext.contains('/') => STATIC_EXTENSIONS.contains(&ext),
    _ => false,
  }
}

fn is_navigation(request: &Request) -> bool {
  if request.mode == RequestMode::Navigate {
    return true;
  }

  request.method == Method::GET
    && request
      .header("accept")
      .is_some_and(|accept| accept.contains("text/html"))
}

#[cfg(test)]
mod tests {
  use super::*;
  use url::Url;

  fn get(url: &str) -> Request {
    Request::get(Url::parse(url).unwrap())
  }

  #[test]
  fn test_static_suffixes() {
    let classifier = Classifier::default();
    for path in ["/styles.css", "/app.js", "/icons/icon-192x192.png", "/fonts/a.woff2"] {
      let request = get(&format!("https://app.example{}", path));
      assert_eq!(classifier.classify(&request), RequestCategory::Static, "{}", path);
    }
  }

  #[test]
  fn test_suffix_must_end_the_path() {
    let classifier = Classifier::default();
    assert_eq!(
      classifier.classify(&get("https://app.example/v1.css/list")),
      RequestCategory::Other
    );
    assert_eq!(
      classifier.classify(&get("https://app.example/manifest.json")),
      RequestCategory::Other
    );
    // Case-sensitive, like the suffix list itself
    assert_eq!(
      classifier.classify(&get("https://app.example/LOGO.PNG")),
      RequestCategory::Other
    );
  }

  #[test]
  fn test_api_by_path_and_host() {
    let classifier = Classifier::default();
    assert_eq!(
      classifier.classify(&get("https://app.example/api/status")),
      RequestCategory::Api
    );
    assert_eq!(
      classifier.classify(&get(
        "https://org.crm4.dynamics.com/api/data/v9.2/new_bruker"
      )),
      RequestCategory::Api
    );
    assert_eq!(
      classifier.classify(&get("https://graph.microsoft.com/v1.0/me")),
      RequestCategory::Api
    );
  }

  #[test]
  fn test_static_wins_over_api() {
    let classifier = Classifier::default();
    assert_eq!(
      classifier.classify(&get("https://org.crm4.dynamics.com/api/logo.png")),
      RequestCategory::Static
    );
  }

  #[test]
  fn test_api_wins_over_navigation() {
    let classifier = Classifier::default();
    let request = Request::navigate(Url::parse("https://app.example/api/page").unwrap());
    assert_eq!(classifier.classify(&request), RequestCategory::Api);
  }

  #[test]
  fn test_navigation_by_mode_or_accept() {
    let classifier = Classifier::default();
    let by_mode = get("https://app.example/").with_mode(RequestMode::Navigate);
    assert_eq!(classifier.classify(&by_mode), RequestCategory::Navigation);

    let by_accept = get("https://app.example/overview").with_header("Accept", "text/html");
    assert_eq!(classifier.classify(&by_accept), RequestCategory::Navigation);
  }

  #[test]
  fn test_missing_accept_is_other() {
    let classifier = Classifier::default();
    assert_eq!(
      classifier.classify(&get("https://app.example/overview")),
      RequestCategory::Other
    );
  }

  #[test]
  fn test_custom_api_hosts() {
    let classifier = Classifier::new(vec!["backend.internal".to_string()]);
    assert_eq!(
      classifier.classify(&get("https://backend.internal/records")),
      RequestCategory::Api
    );
    assert_eq!(
      classifier.classify(&get("https://graph.microsoft.com/v1.0/me")),
      RequestCategory::Other
    );
  }
}
