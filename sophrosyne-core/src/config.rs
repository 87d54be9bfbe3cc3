//! Configuration loading: YAML file + `.env` + environment variable overlay,
//! with `${file:...}`/`${env:...}` secret placeholder resolution.
//!
//! Resolution order (lowest to highest priority), mirroring the teacher's
//! `R2eConfig` loader:
//! 1. `sophrosyne.yaml` (base)
//! 2. `sophrosyne-{profile}.yaml` (profile override)
//! 3. `.env` file (loaded into process environment, never overwriting an
//!    already-set variable)
//! 4. Environment variables with prefix `SOPH_`, `_` as the path delimiter
//!    (e.g. `SOPH_SERVER_PORT` overrides `server.port`).

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

const ENV_PREFIX: &str = "SOPH_";

#[derive(Debug)]
pub enum ConfigError {
    Load(String),
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Load(msg) => write!(f, "config load error: {msg}"),
            ConfigError::Validation(msg) => write!(f, "config validation error: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Resolve a `${file:path}` / `${env:VAR}` / `${VAR}` placeholder embedded in a
/// string value. Mirrors `r2e_core::config::secrets::resolve_placeholders`.
fn resolve_placeholders(value: &str) -> Result<String, ConfigError> {
    let mut result = value.to_string();
    while let Some(start) = result.find("${") {
        let end = result[start..]
            .find('}')
            .ok_or_else(|| ConfigError::Load(format!("unclosed placeholder in: {value}")))?;
        let reference = &result[start + 2..start + end];
        let resolved = if let Some(path) = reference.strip_prefix("file:") {
            std::fs::read_to_string(path.trim())
                .map(|s| s.trim().to_string())
                .map_err(|e| ConfigError::Load(format!("secret file '{}': {e}", path.trim())))?
        } else if let Some(var) = reference.strip_prefix("env:") {
            std::env::var(var.trim())
                .map_err(|_| ConfigError::Load(format!("missing env var env:{}", var.trim())))?
        } else {
            std::env::var(reference.trim())
                .map_err(|_| ConfigError::Load(format!("missing env var {}", reference.trim())))?
        };
        result = format!("{}{}{}", &result[..start], resolved, &result[start + end + 1..]);
    }
    Ok(result)
}

fn load_yaml_layer(path: &Path, into: &mut serde_yaml::Value) -> Result<(), ConfigError> {
    if !path.exists() {
        return Ok(());
    }
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Load(e.to_string()))?;
    let layer: serde_yaml::Value =
        serde_yaml::from_str(&content).map_err(|e| ConfigError::Load(e.to_string()))?;
    merge_yaml(into, layer);
    Ok(())
}

fn merge_yaml(base: &mut serde_yaml::Value, overlay: serde_yaml::Value) {
    match (base, overlay) {
        (serde_yaml::Value::Mapping(base_map), serde_yaml::Value::Mapping(overlay_map)) => {
            for (k, v) in overlay_map {
                match base_map.get_mut(&k) {
                    Some(existing) => merge_yaml(existing, v),
                    None => {
                        base_map.insert(k, v);
                    }
                }
            }
        }
        (base_slot, overlay_value) => *base_slot = overlay_value,
    }
}

fn resolve_string_placeholders(value: &mut serde_yaml::Value) -> Result<(), ConfigError> {
    match value {
        serde_yaml::Value::String(s) if s.contains("${") => {
            *s = resolve_placeholders(s)?;
        }
        serde_yaml::Value::Mapping(map) => {
            for (_, v) in map.iter_mut() {
                resolve_string_placeholders(v)?;
            }
        }
        serde_yaml::Value::Sequence(seq) => {
            for v in seq.iter_mut() {
                resolve_string_placeholders(v)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Overlay environment variables with the `SOPH_` prefix onto the YAML tree,
/// `_` acting as the path delimiter (`SOPH_SERVER_PORT` -> `server.port`).
fn overlay_env(value: &mut serde_yaml::Value) {
    for (env_key, env_val) in std::env::vars() {
        let Some(path) = env_key.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let segments: Vec<String> = path.to_lowercase().split('_').map(String::from).collect();
        if segments.is_empty() {
            continue;
        }
        set_path(value, &segments, env_val);
    }
}

fn set_path(root: &mut serde_yaml::Value, segments: &[String], val: String) {
    if !root.is_mapping() {
        *root = serde_yaml::Value::Mapping(Default::default());
    }
    let map = root.as_mapping_mut().expect("set to mapping above");
    let key = serde_yaml::Value::String(segments[0].clone());
    if segments.len() == 1 {
        map.insert(key, serde_yaml::Value::String(val));
        return;
    }
    let entry = map
        .entry(key)
        .or_insert_with(|| serde_yaml::Value::Mapping(Default::default()));
    set_path(entry, &segments[1..], val);
}

/// Load configuration for `profile`, merge layers, resolve secrets, overlay
/// env vars, then deserialize into the typed `AppConfig`.
pub fn load<T: for<'de> Deserialize<'de>>(profile: &str) -> Result<T, ConfigError> {
    load_from_dir(Path::new("."), profile)
}

/// Same as [`load`] but rooted at an explicit directory — used by tests so
/// they don't depend on the process's current working directory.
pub fn load_from_dir<T: for<'de> Deserialize<'de>>(
    dir: &Path,
    profile: &str,
) -> Result<T, ConfigError> {
    let active_profile = std::env::var("SOPHROSYNE_PROFILE").unwrap_or_else(|_| profile.to_string());

    let mut tree = serde_yaml::Value::Mapping(Default::default());
    load_yaml_layer(&dir.join("sophrosyne.yaml"), &mut tree)?;
    load_yaml_layer(&dir.join(format!("sophrosyne-{active_profile}.yaml")), &mut tree)?;

    let _ = dotenvy::from_path(dir.join(".env"));
    let _ = dotenvy::from_path(dir.join(format!(".env.{active_profile}")));

    resolve_string_placeholders(&mut tree)?;
    overlay_env(&mut tree);

    serde_yaml::from_value(tree).map_err(|e| ConfigError::Load(e.to_string()))
}

/// Build a typed config directly from a YAML string — used by tests.
pub fn from_yaml_str<T: for<'de> Deserialize<'de>>(yaml: &str) -> Result<T, ConfigError> {
    let mut tree: serde_yaml::Value =
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::Load(e.to_string()))?;
    resolve_string_placeholders(&mut tree)?;
    serde_yaml::from_value(tree).map_err(|e| ConfigError::Load(e.to_string()))
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    8443
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TlsConfig {
    #[serde(rename = "keyPath")]
    pub key_path: Option<String>,
    #[serde(rename = "certificatePath")]
    pub certificate_path: Option<String>,
    #[serde(rename = "keyType", default = "default_key_type")]
    pub key_type: String,
    #[serde(rename = "insecureSkipVerify", default)]
    pub insecure_skip_verify: bool,
}

fn default_key_type() -> String {
    "ecdsa-p256".to_string()
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            key_path: None,
            certificate_path: None,
            key_type: default_key_type(),
            insecure_skip_verify: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SecurityConfig {
    #[serde(default)]
    pub tls: TlsConfig,
    #[serde(rename = "policyPath", default)]
    pub policy_path: Option<String>,
    #[serde(rename = "siteKey", default)]
    pub site_key: String,
    #[serde(default)]
    pub salt: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RootPrincipalConfig {
    #[serde(default = "default_root_name")]
    pub name: String,
    #[serde(default = "default_root_email")]
    pub email: String,
    #[serde(default)]
    pub recreate: bool,
}

fn default_root_name() -> String {
    "root".to_string()
}

fn default_root_email() -> String {
    "root@localhost".to_string()
}

impl Default for RootPrincipalConfig {
    fn default() -> Self {
        Self {
            name: default_root_name(),
            email: default_root_email(),
            recreate: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct PrincipalsConfig {
    #[serde(default)]
    pub root: RootPrincipalConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_ttl_secs")]
    pub ttl: u64,
    #[serde(rename = "cleanupInterval", default = "default_cleanup_secs")]
    pub cleanup_interval: u64,
}

fn default_ttl_secs() -> u64 {
    60
}
fn default_cleanup_secs() -> u64 {
    30
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: default_ttl_secs(),
            cleanup_interval: default_cleanup_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    #[serde(rename = "pageSize", default = "default_page_size")]
    pub page_size: u32,
    #[serde(default)]
    pub cache: CacheConfig,
}

fn default_page_size() -> u32 {
    20
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            cache: CacheConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ServicesConfig {
    #[serde(default)]
    pub users: ServiceConfig,
    #[serde(default)]
    pub profiles: ServiceConfig,
    #[serde(default)]
    pub checks: ServiceConfig,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TracingConfig {
    #[serde(default = "default_tracing_level")]
    pub level: String,
}

fn default_tracing_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct DevelopmentConfig {
    #[serde(rename = "staticRootToken", default)]
    pub static_root_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub principals: PrincipalsConfig,
    #[serde(default)]
    pub services: ServicesConfig,
    #[serde(default)]
    pub tracing: TracingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub development: DevelopmentConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_defaults_from_minimal_yaml() {
        let cfg: AppConfig = from_yaml_str("server:\n  port: 9443\n").unwrap();
        assert_eq!(cfg.server.port, 9443);
        assert_eq!(cfg.services.users.page_size, 20);
        assert_eq!(cfg.tracing.level, "info");
    }

    #[test]
    fn resolves_env_placeholder() {
        std::env::set_var("SOPHROSYNE_TEST_SECRET", "shh");
        let cfg: AppConfig = from_yaml_str(
            "server:\n  port: 1\nsecurity:\n  siteKey: \"${env:SOPHROSYNE_TEST_SECRET}\"\n",
        )
        .unwrap();
        assert_eq!(cfg.security.site_key, "shh");
        std::env::remove_var("SOPHROSYNE_TEST_SECRET");
    }

    #[test]
    fn env_overlay_sets_dotted_path() {
        std::env::set_var("SOPH_SERVER_PORT", "7777");
        let cfg: AppConfig = from_yaml_str("server:\n  port: 1\n").unwrap();
        // env overlay only applies via `load`/`load_from_dir`, not `from_yaml_str`;
        // this asserts from_yaml_str leaves the base value untouched.
        assert_eq!(cfg.server.port, 1);
        std::env::remove_var("SOPH_SERVER_PORT");
    }
}
