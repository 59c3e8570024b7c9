use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  /// Where the shopping list database lives (defaults to the data directory)
  pub database_path: Option<PathBuf>,
  #[serde(default)]
  pub offline: OfflineConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OfflineConfig {
  /// Origin the application assets are served from
  pub origin: String,
  /// Release version embedded in the cache bucket name
  pub version: String,
  /// Bucket name prefix; the bucket is `<prefix>-<version>`
  pub cache_prefix: String,
  /// Paths precached on install, relative to the origin
  pub assets: Vec<String>,
  /// Canonical document that navigations are stored under and fall back to
  pub document_path: String,
  /// Query parameter used for cache busting, stripped before matching
  pub bust_param: String,
  /// Whether a freshly installed worker skips the waiting phase on its own
  pub skip_waiting_on_install: bool,
  /// Where cache buckets are stored (defaults to the data directory)
  pub cache_path: Option<PathBuf>,
  pub request_timeout_secs: u64,
}

impl Default for OfflineConfig {
  fn default() -> Self {
    Self {
      origin: "http://localhost:8080/".to_string(),
      version: "v1.8.0".to_string(),
      cache_prefix: "lista-spesa-cache".to_string(),
      assets: [
        "./",
        "./index.html",
        "./styles.css",
        "./app.js",
        "./manifest.json",
        "./icons/icon-192.png",
        "./icons/icon-512.png",
      ]
      .into_iter()
      .map(String::from)
      .collect(),
      document_path: "./index.html".to_string(),
      bust_param: "v".to_string(),
      skip_waiting_on_install: true,
      cache_path: None,
      request_timeout_secs: 15,
    }
  }
}

impl OfflineConfig {
  /// Name of the cache bucket owned by this release.
  pub fn bucket_name(&self) -> String {
    format!("{}-{}", self.cache_prefix, self.version)
  }

  /// Parsed origin, with a trailing slash so relative assets resolve under it.
  pub fn origin_url(&self) -> Result<Url> {
    let mut origin = self.origin.clone();
    if !origin.ends_with('/') {
      origin.push('/');
    }
    Url::parse(&origin).map_err(|e| eyre!("Invalid offline origin '{}': {}", self.origin, e))
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./spesa.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/spesa/config.yaml
  ///
  /// Without any file the defaults are used.
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
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("spesa.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("spesa").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self, serde_yaml::Error> {
    serde_yaml::from_str(contents)
  }

  /// Resolved path of the shopping list database.
  pub fn database_path(&self) -> Result<PathBuf> {
    match &self.database_path {
      Some(p) => Ok(p.clone()),
      None => Ok(data_dir()?.join("lista_spesa_db.sqlite")),
    }
  }

  /// Resolved path of the offline asset cache.
  pub fn cache_path(&self) -> Result<PathBuf> {
    match &self.offline.cache_path {
      Some(p) => Ok(p.clone()),
      None => Ok(data_dir()?.join("offline-cache.sqlite")),
    }
  }
}

/// Application data directory, e.g. ~/.local/share/spesa
pub fn data_dir() -> Result<PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;

  Ok(data_dir.join("spesa"))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_empty_document_uses_defaults() {
    let config = Config::parse("{}").unwrap();
    assert!(config.database_path.is_none());
    assert_eq!(config.offline.bucket_name(), "lista-spesa-cache-v1.8.0");
    assert_eq!(config.offline.assets.len(), 7);
  }

  #[test]
  fn test_partial_offline_section() {
    let config = Config::parse(
      "database_path: /tmp/spesa.db\noffline:\n  version: v4\n  origin: https://shop.example\n",
    )
    .unwrap();
    assert_eq!(
      config.database_path().unwrap(),
      PathBuf::from("/tmp/spesa.db")
    );
    assert_eq!(config.offline.bucket_name(), "lista-spesa-cache-v4");
    assert_eq!(config.offline.bust_param, "v");
    assert_eq!(
      config.offline.origin_url().unwrap().as_str(),
      "https://shop.example/"
    );
  }
}
