use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use std::time::Duration;

use super::types::{Request, Response};

/// Something that can perform a request.
///
/// An `Err` means the request never produced an HTTP response (transport
/// failure, DNS, refused connection). Non-2xx statuses are returned as `Ok`.
#[async_trait]
pub trait Fetcher: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Response>;
}

#[async_trait]
impl<F: Fetcher + ?Sized> Fetcher for Arc<F> {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    (**self).fetch(request).await
  }
}

/// Network fetcher backed by reqwest.
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
}

impl HttpFetcher {
  pub fn new(timeout: Option<Duration>) -> Result<Self> {
    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = timeout {
      builder = builder.timeout(timeout);
    }

    let client = builder
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

#[async_trait]
impl Fetcher for HttpFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("Network request to {} failed: {}", request.url, e))?;

    let status = response.status();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();

    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read response body from {}: {}", request.url, e))?;

    Ok(Response {
      status: status.as_u16(),
      status_text: status.canonical_reason().unwrap_or_default().to_string(),
      headers,
      body: body.to_vec(),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use url::Url;
  use wiremock::matchers::{body_string, header, method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  #[tokio::test]
  async fn test_fetch_success() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
      .and(path("/styles.css"))
      .respond_with(
        ResponseTemplate::new(200)
          .set_body_raw("body { margin: 0 }", "text/css")
          .insert_header("content-type", "text/css"),
      )
      .mount(&mock_server)
      .await;

    let fetcher = HttpFetcher::new(None).unwrap();
    let url = Url::parse(&format!("{}/styles.css", mock_server.uri())).unwrap();
    let response = fetcher.fetch(&Request::get(url)).await.unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.status_text, "OK");
    assert_eq!(response.header("content-type"), Some("text/css"));
    assert_eq!(response.text(), "body { margin: 0 }");
  }

  #[tokio::test]
  async fn test_http_error_status_is_not_a_network_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
      .and(path("/missing.js"))
      .respond_with(ResponseTemplate::new(404))
      .mount(&mock_server)
      .await;

    let fetcher = HttpFetcher::new(None).unwrap();
    let url = Url::parse(&format!("{}/missing.js", mock_server.uri())).unwrap();
    let response = fetcher.fetch(&Request::get(url)).await.unwrap();

    assert_eq!(response.status, 404);
    assert!(!response.is_success());
  }

  #[tokio::test]
  async fn test_headers_and_body_are_sent() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
      .and(path("/api/data"))
      .and(header("authorization", "Bearer abc"))
      .and(body_string("{\"a\":1}"))
      .respond_with(ResponseTemplate::new(204))
      .mount(&mock_server)
      .await;

    let fetcher = HttpFetcher::new(None).unwrap();
    let url = Url::parse(&format!("{}/api/data", mock_server.uri())).unwrap();
    let request = Request::new(reqwest::Method::POST, url)
      .with_header("Authorization", "Bearer abc")
      .with_body(b"{\"a\":1}".to_vec());
    let response = fetcher.fetch(&request).await.unwrap();

    assert_eq!(response.status, 204);
  }

  #[tokio::test]
  async fn test_unreachable_host_is_an_error() {
    let fetcher = HttpFetcher::new(Some(Duration::from_secs(2))).unwrap();
    let url = Url::parse("http://127.0.0.1:1/").unwrap();
    assert!(fetcher.fetch(&Request::get(url)).await.is_err());
  }
}
