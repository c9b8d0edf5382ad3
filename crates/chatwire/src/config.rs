use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chatwire_transport::ConnectOptions;
use serde::Deserialize;
use thiserror::Error;
use tokio::fs;

use crate::session::{ReconnectPolicy, SessionSettings};

// ============================================================================
// Config (root)
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub transport: TransportConfig,
    pub reconnect: ReconnectConfig,
    pub events: EventsConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_saphyr::Error),

    #[error("environment variable '{0}' is not set")]
    MissingEnvVar(String),

    #[error("unclosed variable reference '${{' (missing '}}')")]
    UnclosedVarReference,

    #[error("invalid config: {0}")]
    Invalid(String),
}

impl Config {
    /// Load and validate a config file. A missing file yields the defaults.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = match fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(ConfigError::Io(e)),
        };
        let expanded = expand_env_vars(&contents)?;
        let config: Self = serde_saphyr::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.events.capacity == 0 {
            return Err(ConfigError::Invalid(
                "events.capacity must be at least 1".to_string(),
            ));
        }
        if self.reconnect.initial_backoff_ms > self.reconnect.max_backoff_ms {
            return Err(ConfigError::Invalid(
                "reconnect.initial_backoff_ms exceeds reconnect.max_backoff_ms".to_string(),
            ));
        }
        Ok(())
    }

    /// Settings handed to every session of a registry.
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            connect_options: self.transport.connect_options(),
            reconnect: self.reconnect.policy(),
            event_capacity: self.events.capacity,
        }
    }

    /// Storage root, resolved against the config file's directory.
    pub fn storage_root(&self, config_path: &Path) -> PathBuf {
        let root = self
            .storage
            .path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_DIR));
        resolve_path(config_path, &root)
    }

    pub fn credentials_dir(&self, config_path: &Path) -> PathBuf {
        self.storage_root(config_path).join(DEFAULT_CREDENTIALS_DIR)
    }

    pub fn messages_dir(&self, config_path: &Path) -> PathBuf {
        self.storage_root(config_path).join(DEFAULT_MESSAGES_DIR)
    }
}

/// Resolve a path relative to the config file directory.
///
/// Absolute paths are returned as-is.
pub fn resolve_path(config_path: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }

    let config_dir = config_path.parent().unwrap_or_else(|| Path::new("."));
    config_dir.join(path)
}

// ============================================================================
// Default Paths
// ============================================================================

/// Default storage root (relative to config file).
pub const DEFAULT_STORAGE_DIR: &str = ".chatwire";
/// Credentials directory (relative to storage root).
pub const DEFAULT_CREDENTIALS_DIR: &str = "credentials";
/// Message records directory (relative to storage root).
pub const DEFAULT_MESSAGES_DIR: &str = "messages";

// ============================================================================
// Sections
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// How long a pairing code stays valid.
    pub qr_timeout_ms: u64,
    pub print_qr: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            qr_timeout_ms: 20_000,
            print_qr: true,
        }
    }
}

impl TransportConfig {
    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            qr_timeout: Duration::from_millis(self.qr_timeout_ms),
            print_qr: self.print_qr,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Zero retries forever.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 60_000,
        }
    }
}

impl ReconnectConfig {
    pub fn policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: self.max_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Buffer size of each broadcast channel.
    pub capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            capacity: crate::session::DEFAULT_EVENT_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Storage root. Defaults to `.chatwire` next to the config file.
    pub path: Option<PathBuf>,
}

// ============================================================================
// Environment Variable Expansion
// ============================================================================

/// Expand `${VAR}` references against the process environment.
///
/// - `${VAR}` must be set
/// - `${VAR:-fallback}` uses `fallback` when `VAR` is unset
/// - `$$` is a literal `$`; any other `$` is kept as-is
///
/// Expansion is single-pass; values are never re-expanded.
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    expand_vars(input, |name| std::env::var(name).ok())
}

fn expand_vars(
    input: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<String, ConfigError> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        if let Some(tail) = after.strip_prefix('$') {
            out.push('$');
            rest = tail;
        } else if let Some(body) = after.strip_prefix('{') {
            let end = body.find('}').ok_or(ConfigError::UnclosedVarReference)?;
            let reference = &body[..end];
            let value = match reference.split_once(":-") {
                Some((name, fallback)) => lookup(name).unwrap_or_else(|| fallback.to_string()),
                None => lookup(reference)
                    .ok_or_else(|| ConfigError::MissingEnvVar(reference.to_string()))?,
            };
            out.push_str(&value);
            rest = &body[end + 1..];
        } else {
            out.push('$');
            rest = after;
        }
    }

    out.push_str(rest);
    Ok(out)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    fn expand_with(input: &str, vars: &[(&str, &str)]) -> Result<String, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        expand_vars(input, |name| vars.get(name).cloned())
    }

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.transport.qr_timeout_ms, 20_000);
        assert!(config.transport.print_qr);
        assert_eq!(config.reconnect.max_attempts, 5);
        assert_eq!(config.events.capacity, 256);
        assert!(config.storage.path.is_none());
    }

    #[tokio::test]
    async fn load_missing_file_returns_defaults() {
        let tmp = TempDir::new().unwrap();
        let config = Config::load(tmp.path().join("chatwire.yaml")).await.unwrap();
        assert_eq!(config.reconnect.initial_backoff_ms, 1_000);
    }

    #[tokio::test]
    async fn load_partial_yaml_keeps_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
transport:
  print_qr: false
reconnect:
  max_attempts: 0
storage:
  path: /var/lib/chatwire
"#
        )
        .unwrap();

        let config = Config::load(file.path()).await.unwrap();
        assert!(!config.transport.print_qr);
        assert_eq!(config.transport.qr_timeout_ms, 20_000);
        assert_eq!(config.reconnect.max_attempts, 0);
        assert_eq!(config.reconnect.max_backoff_ms, 60_000);
        assert_eq!(config.storage.path, Some(PathBuf::from("/var/lib/chatwire")));
    }

    #[tokio::test]
    async fn load_invalid_yaml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "transport: [unclosed").unwrap();

        assert!(matches!(
            Config::load(file.path()).await,
            Err(ConfigError::Yaml(_))
        ));
    }

    #[tokio::test]
    async fn zero_capacity_is_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "events:\n  capacity: 0").unwrap();

        assert!(matches!(
            Config::load(file.path()).await,
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn session_settings_convert_units() {
        let config = Config {
            transport: TransportConfig {
                qr_timeout_ms: 1_500,
                print_qr: false,
            },
            reconnect: ReconnectConfig {
                max_attempts: 2,
                initial_backoff_ms: 250,
                max_backoff_ms: 2_000,
            },
            ..Default::default()
        };

        let settings = config.session_settings();
        assert_eq!(settings.connect_options.qr_timeout, Duration::from_millis(1_500));
        assert!(!settings.connect_options.print_qr);
        assert_eq!(settings.reconnect.max_attempts, 2);
        assert_eq!(settings.reconnect.initial_backoff, Duration::from_millis(250));
        assert_eq!(settings.event_capacity, 256);
    }

    #[test]
    fn storage_dirs_resolve_against_config() {
        let config = Config::default();
        let config_path = Path::new("/etc/chatwire/chatwire.yaml");
        assert_eq!(
            config.credentials_dir(config_path),
            PathBuf::from("/etc/chatwire/.chatwire/credentials")
        );
        assert_eq!(
            config.messages_dir(config_path),
            PathBuf::from("/etc/chatwire/.chatwire/messages")
        );
    }

    #[test]
    fn resolve_path_keeps_absolute() {
        let result = resolve_path(Path::new("conf/chatwire.yaml"), Path::new("/data"));
        assert_eq!(result, PathBuf::from("/data"));
    }

    #[test]
    fn resolve_path_bare_config_name() {
        let result = resolve_path(Path::new("chatwire.yaml"), Path::new(".chatwire"));
        assert_eq!(result, PathBuf::from(".chatwire"));
    }

    #[test]
    fn expand_required_and_fallback() {
        let out = expand_with(
            "root: ${ROOT}\nqr: ${QR:-false}\nempty: '${NONE:-}'",
            &[("ROOT", "/srv")],
        )
        .unwrap();
        assert_eq!(out, "root: /srv\nqr: false\nempty: ''");
    }

    #[test]
    fn expand_set_var_wins_over_fallback() {
        let out = expand_with("${QR:-false}", &[("QR", "true")]).unwrap();
        assert_eq!(out, "true");
    }

    #[test]
    fn expand_escapes_and_plain_dollars() {
        let out = expand_with("price: $100, literal: $${HOME}", &[]).unwrap();
        assert_eq!(out, "price: $100, literal: ${HOME}");
    }

    #[test]
    fn expand_missing_var() {
        assert!(matches!(
            expand_with("${MISSING}", &[]),
            Err(ConfigError::MissingEnvVar(name)) if name == "MISSING"
        ));
    }

    #[test]
    fn expand_unclosed_reference() {
        assert!(matches!(
            expand_with("value: ${OPEN:-x", &[]),
            Err(ConfigError::UnclosedVarReference)
        ));
    }
}
