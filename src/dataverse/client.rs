use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info};
use url::Url;

use super::types::{
  Absence, AbsenceData, AbsencePayload, Collection, NewUser, Participation, ParticipationData,
  ParticipationPayload, User, UserPayload,
};
use super::Backend;
use crate::config::{Config, EntityNames};
use crate::http::{Fetcher, Request};

const USER_FIELDS: &str = "new_brukerid,new_entra_id,new_navn,new_telefon,new_epost";
const ABSENCE_FIELDS: &str = "new_fraværid,new_dato,new_type,new_beskrivelse,new_status";
const PARTICIPATION_FIELDS: &str = "new_deltakelseid,new_dato,new_status";

/// Dataverse Web API client.
///
/// Requests go through the given fetcher, which in the running app is the
/// worker handle, so reads get network-first caching like any other call.
#[derive(Clone)]
pub struct DataverseClient {
  fetcher: Arc<dyn Fetcher>,
  base_url: Url,
  token: Option<String>,
  entities: EntityNames,
}

impl DataverseClient {
  pub fn new(config: &Config, fetcher: Arc<dyn Fetcher>, token: Option<String>) -> Result<Self> {
    Ok(Self {
      fetcher,
      base_url: config.dataverse.api_base()?,
      token,
      entities: config.dataverse.entities.clone(),
    })
  }

  async fn make_request(
    &self,
    method: Method,
    endpoint: &str,
    body: Option<Vec<u8>>,
  ) -> Result<Option<serde_json::Value>> {
    let token = self
      .token
      .as_deref()
      .ok_or_else(|| eyre!("No access token available"))?;

    let url = self
      .base_url
      .join(endpoint)
      .map_err(|e| eyre!("Invalid endpoint {}: {}", endpoint, e))?;

    let mut request = Request::new(method, url)
      .with_header("Authorization", &format!("Bearer {}", token))
      .with_header("Content-Type", "application/json")
      .with_header("Accept", "application/json")
      .with_header("OData-MaxVersion", "4.0")
      .with_header("OData-Version", "4.0");
    if let Some(body) = body {
      request = request.with_body(body);
    }

    debug!(method = %request.method, url = %request.url, "dataverse request");
    let response = self.fetcher.fetch(&request).await?;

    if !response.is_success() {
      error!(status = response.status, body = %response.text(), "dataverse API error");
      return Err(eyre!(
        "API request failed: {} {}",
        response.status,
        response.status_text
      ));
    }

    // Handle empty responses (204 No Content)
    if response.status == 204 || response.body.is_empty() {
      return Ok(None);
    }

    let is_json = response
      .header("content-type")
      .is_some_and(|ct| ct.contains("application/json"));
    if is_json {
      Ok(Some(response.json()?))
    } else {
      Ok(Some(serde_json::Value::String(response.text())))
    }
  }

  async fn create<P: Serialize>(&self, entity: &str, payload: &P) -> Result<()> {
    let body =
      serde_json::to_vec(payload).map_err(|e| eyre!("Failed to serialize payload: {}", e))?;
    self.make_request(Method::POST, entity, Some(body)).await?;
    Ok(())
  }

  async fn list<T: DeserializeOwned>(&self, endpoint: &str) -> Result<Vec<T>> {
    match self.make_request(Method::GET, endpoint, None).await? {
      Some(value) => {
        let collection: Collection<T> = serde_json::from_value(value)
          .map_err(|e| eyre!("Failed to parse {} response: {}", endpoint, e))?;
        Ok(collection.value)
      }
      None => Ok(Vec::new()),
    }
  }

  pub async fn get_user_by_entra_id(&self, entra_id: &str) -> Result<Option<User>> {
    let endpoint = format!(
      "{}?$filter=new_entra_id eq '{}'&$select={}",
      self.entities.user,
      entra_id.replace('\'', "''"),
      USER_FIELDS
    );
    Ok(self.list(&endpoint).await?.into_iter().next())
  }

  pub async fn create_user(&self, user: &NewUser) -> Result<()> {
    self
      .create(&self.entities.user, &UserPayload::from(user))
      .await
  }

  /// Look the user up by Entra id, creating the record on first sign-in.
  pub async fn get_or_create_user(&self, user: &NewUser) -> Result<User> {
    if let Some(existing) = self.get_user_by_entra_id(&user.entra_id).await? {
      return Ok(existing);
    }

    info!(entra_id = %user.entra_id, "creating user record");
    self.create_user(user).await?;
    self
      .get_user_by_entra_id(&user.entra_id)
      .await?
      .ok_or_else(|| eyre!("User {} not found after creation", user.entra_id))
  }

  /// Most recent absences for a user.
  pub async fn get_absences(&self, user_id: &str, limit: usize) -> Result<Vec<Absence>> {
    let endpoint = format!(
      "{}?$filter=new_bruker/new_brukerid eq {}&$select={}&$orderby=new_dato desc&$top={}",
      self.entities.absence, user_id, ABSENCE_FIELDS, limit
    );
    self.list(&endpoint).await
  }

  /// Most recent participations for a user.
  pub async fn get_participations(
    &self,
    user_id: &str,
    limit: usize,
  ) -> Result<Vec<Participation>> {
    let endpoint = format!(
      "{}?$filter=new_bruker/new_brukerid eq {}&$select={}&$orderby=new_dato desc&$top={}",
      self.entities.participation, user_id, PARTICIPATION_FIELDS, limit
    );
    self.list(&endpoint).await
  }
}

#[async_trait]
impl Backend for DataverseClient {
  async fn create_participation(&self, user_id: &str, data: &ParticipationData) -> Result<()> {
    let payload = ParticipationPayload::new(user_id, data);
    self.create(&self.entities.participation, &payload).await
  }

  async fn create_absence(&self, user_id: &str, data: &AbsenceData) -> Result<()> {
    let payload = AbsencePayload::new(user_id, data);
    self.create(&self.entities.absence, &payload).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::http::testing::FakeFetcher;
  use crate::http::Response;

  const API: &str = "https://org.crm4.dynamics.com/api/data/v9.2/";

  fn client(fetcher: Arc<FakeFetcher>, token: Option<&str>) -> DataverseClient {
    let config = Config::for_tests("https://org.crm4.dynamics.com/");
    DataverseClient::new(&config, fetcher, token.map(String::from)).unwrap()
  }

  #[tokio::test]
  async fn test_create_absence_posts_payload() {
    let fetcher = Arc::new(FakeFetcher::new());
    let url = format!("{}new_fravær", API);
    let url = Url::parse(&url).unwrap();
    fetcher.respond(url.as_str(), Response::new(204, "No Content"));

    let client = client(Arc::clone(&fetcher), Some("token-1"));
    client
      .create_absence("user-1", &AbsenceData::new("Syk", Some("Hodepine")))
      .await
      .unwrap();

    let requests = fetcher.requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.method, Method::POST);
    assert_eq!(request.header("authorization"), Some("Bearer token-1"));
    assert_eq!(request.header("odata-version"), Some("4.0"));

    let body: serde_json::Value = serde_json::from_slice(request.body.as_ref().unwrap()).unwrap();
    assert_eq!(body["new_type"], "Syk");
    assert_eq!(body["new_beskrivelse"], "Hodepine");
    assert_eq!(body["new_bruker"], "/new_bruker(user-1)");
  }

  #[tokio::test]
  async fn test_http_error_is_reported() {
    let fetcher = Arc::new(FakeFetcher::new());
    let client = client(Arc::clone(&fetcher), Some("token-1"));

    // Unrouted URLs answer 404
    let err = client
      .create_participation("user-1", &ParticipationData::default())
      .await
      .unwrap_err();
    assert!(err.to_string().contains("API request failed: 404"));
  }

  #[tokio::test]
  async fn test_missing_token_fails_without_request() {
    let fetcher = Arc::new(FakeFetcher::new());
    let client = client(Arc::clone(&fetcher), None);

    assert!(client
      .create_participation("user-1", &ParticipationData::default())
      .await
      .is_err());
    assert!(fetcher.requests().is_empty());
  }

  #[tokio::test]
  async fn test_get_absences_parses_collection() {
    let fetcher = Arc::new(FakeFetcher::new());
    let client = client(Arc::clone(&fetcher), Some("t"));

    // Route whatever URL the client builds
    let probe = client.get_absences("user-1", 5).await;
    assert!(probe.is_err());
    let url = fetcher.requests()[0].url.to_string();
    assert!(url.contains("$top=5"));

    fetcher.respond(
      &url,
      Response::new(200, "OK")
        .with_header("content-type", "application/json; odata.metadata=minimal")
        .with_body(
          r#"{"value":[{
            "new_fraværid": "a1",
            "new_dato": "2024-01-01T00:00:00Z",
            "new_type": "Syk",
            "new_beskrivelse": "Hodepine",
            "new_status": "Registrert"
          }]}"#,
        ),
    );

    let absences = client.get_absences("user-1", 5).await.unwrap();
    assert_eq!(absences.len(), 1);
    assert_eq!(absences[0].description.as_deref(), Some("Hodepine"));
  }

  fn new_user() -> NewUser {
    NewUser {
      entra_id: "entra-1".to_string(),
      display_name: "Kari Nordmann".to_string(),
      email: None,
      phone: None,
    }
  }

  fn json(body: &str) -> Response {
    Response::new(200, "OK")
      .with_header("content-type", "application/json")
      .with_body(body)
  }

  /// URL the client builds for the user lookup; unrouted, so it answers 404.
  async fn user_lookup_url(client: &DataverseClient, fetcher: &FakeFetcher) -> String {
    assert!(client.get_user_by_entra_id("entra-1").await.is_err());
    let url = fetcher.requests().last().unwrap().url.to_string();
    assert!(url.starts_with(&format!("{}new_bruker?", API)));
    url
  }

  #[tokio::test]
  async fn test_get_or_create_returns_existing_user() {
    let fetcher = Arc::new(FakeFetcher::new());
    let client = client(Arc::clone(&fetcher), Some("t"));
    let lookup = user_lookup_url(&client, &fetcher).await;

    fetcher.respond(
      &lookup,
      json(r#"{"value":[{"new_brukerid":"b-1","new_entra_id":"entra-1","new_navn":"Kari"}]}"#),
    );

    let user = client.get_or_create_user(&new_user()).await.unwrap();
    assert_eq!(user.id, "b-1");
    assert_eq!(user.name.as_deref(), Some("Kari"));
    assert!(fetcher.requests().iter().all(|r| r.method == Method::GET));
  }

  #[tokio::test]
  async fn test_get_or_create_creates_missing_user() {
    let fetcher = Arc::new(FakeFetcher::new());
    let client = client(Arc::clone(&fetcher), Some("t"));
    let lookup = user_lookup_url(&client, &fetcher).await;

    fetcher.respond_once(&lookup, json(r#"{"value":[]}"#));
    fetcher.respond(
      &lookup,
      json(
        r#"{"value":[{"new_brukerid":"b-2","new_entra_id":"entra-1","new_navn":"Kari Nordmann"}]}"#,
      ),
    );
    let create = Url::parse(&format!("{}new_bruker", API)).unwrap();
    fetcher.respond(create.as_str(), Response::new(204, "No Content"));

    let user = client.get_or_create_user(&new_user()).await.unwrap();
    assert_eq!(user.id, "b-2");

    let posts: Vec<Request> = fetcher
      .requests()
      .into_iter()
      .filter(|r| r.method == Method::POST)
      .collect();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].url, create);
    let body: serde_json::Value = serde_json::from_slice(posts[0].body.as_ref().unwrap()).unwrap();
    assert_eq!(body["new_entra_id"], "entra-1");
    assert_eq!(body["new_navn"], "Kari Nordmann");
  }

  #[tokio::test]
  async fn test_failed_user_creation_is_reported() {
    let fetcher = Arc::new(FakeFetcher::new());
    let client = client(Arc::clone(&fetcher), Some("t"));
    let lookup = user_lookup_url(&client, &fetcher).await;
    fetcher.respond(&lookup, json(r#"{"value":[]}"#));

    // The create URL is unrouted and answers 404
    let err = client.get_or_create_user(&new_user()).await.unwrap_err();
    assert!(err.to_string().contains("API request failed: 404"));
  }
}
