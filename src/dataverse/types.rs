use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Default status for new registrations.
pub const STATUS_REGISTERED: &str = "Registrert";

/// Absence categories offered to users.
pub const ABSENCE_TYPES: &[&str] = &["Syk", "Permisjon", "Annet"];

pub const MAX_DESCRIPTION_LEN: usize = 1000;

/// A participation registration as captured by the app.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipationData {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub date: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub status: Option<String>,
}

/// An absence registration as captured by the app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbsenceData {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub date: Option<DateTime<Utc>>,
  #[serde(rename = "type")]
  pub absence_type: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub status: Option<String>,
}

impl AbsenceData {
  pub fn new(absence_type: &str, description: Option<&str>) -> Self {
    Self {
      date: None,
      absence_type: absence_type.to_string(),
      description: description
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(String::from),
      status: None,
    }
  }
}

// ============================================================================
// Wire payloads
// ============================================================================

#[derive(Debug, Serialize)]
pub(super) struct ParticipationPayload {
  pub new_bruker: String,
  pub new_dato: String,
  pub new_status: String,
  pub new_opprettet_av: String,
}

impl ParticipationPayload {
  pub fn new(user_id: &str, data: &ParticipationData) -> Self {
    Self {
      new_bruker: user_ref(user_id),
      new_dato: format_date(data.date),
      new_status: data
        .status
        .clone()
        .unwrap_or_else(|| STATUS_REGISTERED.to_string()),
      new_opprettet_av: user_ref(user_id),
    }
  }
}

#[derive(Debug, Serialize)]
pub(super) struct AbsencePayload {
  pub new_bruker: String,
  pub new_dato: String,
  pub new_type: String,
  pub new_beskrivelse: Option<String>,
  pub new_status: String,
  pub new_opprettet_av: String,
}

impl AbsencePayload {
  pub fn new(user_id: &str, data: &AbsenceData) -> Self {
    Self {
      new_bruker: user_ref(user_id),
      new_dato: format_date(data.date),
      new_type: data.absence_type.clone(),
      new_beskrivelse: data.description.clone().filter(|d| !d.is_empty()),
      new_status: data
        .status
        .clone()
        .unwrap_or_else(|| STATUS_REGISTERED.to_string()),
      new_opprettet_av: user_ref(user_id),
    }
  }
}

fn user_ref(user_id: &str) -> String {
  format!("/new_bruker({})", user_id)
}

fn format_date(date: Option<DateTime<Utc>>) -> String {
  date
    .unwrap_or_else(Utc::now)
    .to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Profile used to create a user record on first sign-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
  pub entra_id: String,
  pub display_name: String,
  pub email: Option<String>,
  pub phone: Option<String>,
}

#[derive(Debug, Serialize)]
pub(super) struct UserPayload {
  pub new_entra_id: String,
  pub new_navn: String,
  pub new_telefon: Option<String>,
  pub new_epost: Option<String>,
}

impl From<&NewUser> for UserPayload {
  fn from(user: &NewUser) -> Self {
    Self {
      new_entra_id: user.entra_id.clone(),
      new_navn: user.display_name.clone(),
      new_telefon: user.phone.clone(),
      new_epost: user.email.clone(),
    }
  }
}

/// User record keyed by the Entra object id.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct User {
  #[serde(rename = "new_brukerid")]
  pub id: String,
  #[serde(rename = "new_entra_id")]
  pub entra_id: String,
  #[serde(rename = "new_navn")]
  pub name: Option<String>,
  #[serde(rename = "new_telefon", default)]
  pub phone: Option<String>,
  #[serde(rename = "new_epost", default)]
  pub email: Option<String>,
}

/// Absence record as listed in the overview.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Absence {
  #[serde(rename = "new_fraværid")]
  pub id: String,
  #[serde(rename = "new_dato")]
  pub date: String,
  #[serde(rename = "new_type")]
  pub absence_type: Option<String>,
  #[serde(rename = "new_beskrivelse")]
  pub description: Option<String>,
  #[serde(rename = "new_status")]
  pub status: Option<String>,
}

/// Participation record as listed in the overview.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Participation {
  #[serde(rename = "new_deltakelseid")]
  pub id: String,
  #[serde(rename = "new_dato")]
  pub date: String,
  #[serde(rename = "new_status")]
  pub status: Option<String>,
}

/// OData collection envelope.
#[derive(Debug, Deserialize)]
pub(super) struct Collection<T> {
  pub value: Vec<T>,
}
