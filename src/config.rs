use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::dataverse::NewUser;
use crate::http::DEFAULT_API_HOSTS;
use crate::queue::FailurePolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub dataverse: DataverseConfig,
  #[serde(default)]
  pub app: AppConfig,
  #[serde(default)]
  pub offline: OfflineConfig,
  #[serde(default)]
  pub sync: SyncConfig,
  #[serde(default)]
  pub connectivity: ConnectivityConfig,
  #[serde(default)]
  pub session: SessionConfig,
  #[serde(default)]
  pub storage: StorageConfig,
  #[serde(default)]
  pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataverseConfig {
  pub instance_url: Url,
  #[serde(default = "default_api_version")]
  pub api_version: String,
  #[serde(default)]
  pub entities: EntityNames,
}

fn default_api_version() -> String {
  "9.2".to_string()
}

impl DataverseConfig {
  /// Base URL of the Web API, always ending in a slash.
  pub fn api_base(&self) -> Result<Url> {
    self
      .instance_url
      .join(&format!("api/data/v{}/", self.api_version))
      .map_err(|e| eyre!("Invalid Dataverse instance URL {}: {}", self.instance_url, e))
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EntityNames {
  pub user: String,
  pub participation: String,
  pub absence: String,
}

impl Default for EntityNames {
  fn default() -> Self {
    Self {
      user: "new_bruker".to_string(),
      participation: "new_deltakelse".to_string(),
      absence: "new_fravær".to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
  /// Origin the app is served from; relative asset paths resolve against it
  pub origin: Url,
}

impl Default for AppConfig {
  fn default() -> Self {
    Self {
      origin: Url::parse("http://localhost:8080/").expect("valid default origin"),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OfflineConfig {
  /// Disable to run without a response cache
  pub enabled: bool,
  /// Cache generation name; bump it to invalidate everything cached before
  pub cache_name: String,
  pub static_assets: Vec<String>,
  pub offline_document: String,
  pub api_hosts: Vec<String>,
  pub skip_waiting: bool,
}

impl Default for OfflineConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      cache_name: "fravær-app-cache-v1".to_string(),
      static_assets: [
        "/",
        "/index.html",
        "/styles.css",
        "/app.js",
        "/auth.js",
        "/dataverse.js",
        "/config.js",
        "/manifest.json",
        "/icons/icon-192x192.png",
        "/icons/icon-512x512.png",
      ]
      .iter()
      .map(|s| s.to_string())
      .collect(),
      offline_document: "/index.html".to_string(),
      api_hosts: DEFAULT_API_HOSTS.iter().map(|s| s.to_string()).collect(),
      skip_waiting: true,
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyncConfig {
  #[serde(default)]
  pub failure_policy: FailurePolicy,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
  /// Reachability target (defaults to the Dataverse instance)
  pub probe_url: Option<Url>,
  pub probe_interval_secs: u64,
  pub probe_timeout_secs: u64,
}

impl Default for ConnectivityConfig {
  fn default() -> Self {
    Self {
      probe_url: None,
      probe_interval_secs: 10,
      probe_timeout_secs: 5,
    }
  }
}

impl ConnectivityConfig {
  pub fn interval(&self) -> Duration {
    Duration::from_secs(self.probe_interval_secs.max(1))
  }

  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.probe_timeout_secs.max(1))
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionConfig {
  /// Backend id (new_brukerid) of the signed-in user
  pub user_id: Option<String>,
  /// Entra object id; resolved to a backend user, created on first use
  pub entra_id: Option<String>,
  pub display_name: Option<String>,
  pub email: Option<String>,
}

impl SessionConfig {
  /// Profile for creating the user record of `entra_id`.
  pub fn new_user(&self, entra_id: &str) -> NewUser {
    NewUser {
      entra_id: entra_id.to_string(),
      display_name: self
        .display_name
        .clone()
        .unwrap_or_else(|| "Bruker".to_string()),
      email: self.email.clone(),
      phone: None,
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
  pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
  pub level: String,
  /// Log file directory (defaults to `<data_dir>/logs`)
  pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      directory: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./fravaer.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/fravaer/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/fravaer/config.yaml\n\
                 with at least a `dataverse.instance_url` entry."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("fravaer.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("fravaer").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))
  }

  /// Directory holding the response cache, local storage and logs.
  pub fn data_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.storage.data_dir {
      return Ok(dir.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("fravaer"))
  }

  /// Resolve an app path (e.g. `/index.html`) against the app origin.
  pub fn resolve(&self, path: &str) -> Result<Url> {
    self
      .app
      .origin
      .join(path)
      .map_err(|e| eyre!("Invalid app path {}: {}", path, e))
  }

  /// Absolute URLs of every asset that must be cached at install time.
  pub fn static_manifest(&self) -> Result<Vec<Url>> {
    self
      .offline
      .static_assets
      .iter()
      .map(|path| self.resolve(path))
      .collect()
  }

  pub fn probe_url(&self) -> Url {
    self
      .connectivity
      .probe_url
      .clone()
      .unwrap_or_else(|| self.dataverse.instance_url.clone())
  }

  /// Get the Dataverse access token from environment variables.
  ///
  /// Token acquisition happens outside this tool. Checks FRAVAER_ACCESS_TOKEN
  /// first, then DATAVERSE_ACCESS_TOKEN as fallback.
  pub fn get_access_token() -> Option<String> {
    std::env::var("FRAVAER_ACCESS_TOKEN")
      .or_else(|_| std::env::var("DATAVERSE_ACCESS_TOKEN"))
      .ok()
      .filter(|t| !t.is_empty())
  }

  #[cfg(test)]
  pub fn for_tests(instance_url: &str) -> Self {
    Self::parse(&format!("dataverse:\n  instance_url: {}\n", instance_url)).unwrap()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimal_config_uses_defaults() {
    let config = Config::for_tests("https://org.crm4.dynamics.com/");

    assert!(config.offline.enabled);
    assert_eq!(config.offline.cache_name, "fravær-app-cache-v1");
    assert_eq!(config.offline.static_assets.len(), 10);
    assert_eq!(config.sync.failure_policy, FailurePolicy::Drop);
    assert_eq!(config.session.user_id, None);
    assert_eq!(
      config.dataverse.api_base().unwrap().as_str(),
      "https://org.crm4.dynamics.com/api/data/v9.2/"
    );
    assert_eq!(config.probe_url().as_str(), "https://org.crm4.dynamics.com/");
  }

  #[test]
  fn test_full_config() {
    let yaml = r#"
dataverse:
  instance_url: https://org.crm4.dynamics.com/
  api_version: "9.1"
app:
  origin: https://fravaer.example/app/
offline:
  cache_name: fravær-app-cache-v2
  static_assets: ["index.html", "/styles.css"]
  skip_waiting: false
sync:
  failure_policy:
    mode: requeue
    max_attempts: 3
session:
  user_id: abc-123
  entra_id: 7f1c-entra
  display_name: Kari Nordmann
"#;
    let config = Config::parse(yaml).unwrap();

    assert_eq!(config.offline.cache_name, "fravær-app-cache-v2");
    assert!(!config.offline.skip_waiting);
    assert_eq!(
      config.sync.failure_policy,
      FailurePolicy::Requeue { max_attempts: 3 }
    );
    assert_eq!(config.session.user_id.as_deref(), Some("abc-123"));
    let profile = config.session.new_user("7f1c-entra");
    assert_eq!(profile.display_name, "Kari Nordmann");
    assert_eq!(profile.email, None);

    let manifest: Vec<String> = config
      .static_manifest()
      .unwrap()
      .into_iter()
      .map(String::from)
      .collect();
    assert_eq!(
      manifest,
      vec![
        "https://fravaer.example/app/index.html",
        "https://fravaer.example/styles.css"
      ]
    );
  }

  #[test]
  fn test_missing_dataverse_section_is_an_error() {
    assert!(Config::parse("offline:\n  enabled: false\n").is_err());
  }

  #[test]
  fn test_load_explicit_missing_path() {
    let err = Config::load(Some(Path::new("/nonexistent/fravaer.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }

  #[test]
  fn test_load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    std::fs::write(
      &path,
      "dataverse:\n  instance_url: https://org.crm4.dynamics.com/\n\
       storage:\n  data_dir: /tmp/fravaer-test\n",
    )
    .unwrap();

    let config = Config::load(Some(&path)).unwrap();
    assert_eq!(config.data_dir().unwrap(), PathBuf::from("/tmp/fravaer-test"));
  }
}
