use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::hierarchy::{CatalogOptions, DeletePolicy};
use crate::model::DEFAULT_PAGE_SIZE;
use crate::store::BUSY_TIMEOUT_DEFAULT;

pub const PROJECT_CONFIG_FILE: &str = ".catalog.project.yml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveConfig {
    pub page_size: u32,
    pub delete_policy: DeletePolicy,
    pub busy_timeout: Duration,
    pub log: Option<String>,
}

impl Default for EffectiveConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            delete_policy: DeletePolicy::default(),
            busy_timeout: BUSY_TIMEOUT_DEFAULT,
            log: None,
        }
    }
}

impl EffectiveConfig {
    pub fn catalog_options(&self) -> CatalogOptions {
        CatalogOptions {
            busy_timeout: self.busy_timeout,
            delete_policy: self.delete_policy,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    page_size: Option<u32>,
    #[serde(default)]
    delete_policy: Option<String>,
    #[serde(default)]
    busy_timeout_ms: Option<u64>,
    #[serde(default)]
    log: Option<String>,
}

#[derive(Debug, Default)]
struct ConfigLayer {
    page_size: Option<u32>,
    delete_policy: Option<DeletePolicy>,
    busy_timeout: Option<Duration>,
    log: Option<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
    #[error("unknown delete_policy `{0}` (expected `restrict` or `cascade`)")]
    InvalidDeletePolicy(String),
    #[error("page_size must be at least 1")]
    InvalidPageSize,
}

/// Merges user < nearest project < repo config; later layers win per key.
pub fn load_effective_config(
    cwd: &Path,
    repo_config: Option<&Path>,
    user_config: Option<&Path>,
) -> Result<EffectiveConfig, ConfigError> {
    let mut merged = EffectiveConfig::default();

    if let Some(path) = user_config.filter(|path| path.exists()) {
        merge_layer(&mut merged, load_config_layer(path)?);
    }

    if let Some(path) = find_nearest_project_config(cwd) {
        merge_layer(&mut merged, load_config_layer(&path)?);
    }

    if let Some(path) = repo_config.filter(|path| path.exists()) {
        merge_layer(&mut merged, load_config_layer(path)?);
    }

    Ok(merged)
}

pub fn find_nearest_project_config(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(PROJECT_CONFIG_FILE))
        .find(|candidate| candidate.is_file())
}

fn merge_layer(merged: &mut EffectiveConfig, layer: ConfigLayer) {
    if let Some(page_size) = layer.page_size {
        merged.page_size = page_size;
    }
    if let Some(policy) = layer.delete_policy {
        merged.delete_policy = policy;
    }
    if let Some(timeout) = layer.busy_timeout {
        merged.busy_timeout = timeout;
    }
    if layer.log.is_some() {
        merged.log = layer.log;
    }
}

fn load_config_layer(path: &Path) -> Result<ConfigLayer, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config_layer(&content)
}

fn parse_config_layer(content: &str) -> Result<ConfigLayer, ConfigError> {
    // An empty file deserializes to YAML null.
    let raw: Option<RawConfig> = serde_yaml::from_str(content)?;
    let raw = raw.unwrap_or_default();
    if raw.page_size == Some(0) {
        return Err(ConfigError::InvalidPageSize);
    }
    let delete_policy = raw
        .delete_policy
        .as_deref()
        .map(parse_delete_policy)
        .transpose()?;
    Ok(ConfigLayer {
        page_size: raw.page_size,
        delete_policy,
        busy_timeout: raw.busy_timeout_ms.map(Duration::from_millis),
        log: raw.log,
    })
}

pub fn load_config_file(path: &Path) -> Result<EffectiveConfig, ConfigError> {
    let mut config = EffectiveConfig::default();
    merge_layer(&mut config, load_config_layer(path)?);
    Ok(config)
}

pub fn default_config_yaml() -> String {
    format!(
        "page_size: {DEFAULT_PAGE_SIZE}\ndelete_policy: {}\nbusy_timeout_ms: {}\nlog: warn\n",
        DeletePolicy::default().as_str(),
        BUSY_TIMEOUT_DEFAULT.as_millis()
    )
}

pub fn parse_delete_policy(raw: &str) -> Result<DeletePolicy, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "restrict" => Ok(DeletePolicy::Restrict),
        "cascade" => Ok(DeletePolicy::Cascade),
        _ => Err(ConfigError::InvalidDeletePolicy(raw.to_string())),
    }
}
