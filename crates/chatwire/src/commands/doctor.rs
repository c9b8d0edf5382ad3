//! `chatwire doctor`: check configuration and storage.

use std::path::Path;

use anyhow::{Result, bail};
use serde::Serialize;

use chatwire::config::{Config, ConfigError};
use chatwire::store::{CredentialStore, FileCredentialStore};

// ============================================================================
// Report Types
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Ok,
    Warn,
    Error,
}

#[derive(Debug, Serialize)]
struct CheckResult {
    status: CheckStatus,
    message: String,
}

impl CheckResult {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            status: CheckStatus::Ok,
            message: message.into(),
        }
    }

    fn warn(message: impl Into<String>) -> Self {
        Self {
            status: CheckStatus::Warn,
            message: message.into(),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            status: CheckStatus::Error,
            message: message.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct Section {
    name: &'static str,
    checks: Vec<CheckResult>,
}

#[derive(Debug, Serialize)]
struct Report {
    sections: Vec<Section>,
    errors: usize,
    warnings: usize,
}

impl Report {
    fn from_sections(sections: Vec<Section>) -> Self {
        let count = |status: fn(&CheckStatus) -> bool| {
            sections
                .iter()
                .flat_map(|s| &s.checks)
                .filter(|c| status(&c.status))
                .count()
        };
        let errors = count(|s| matches!(s, CheckStatus::Error));
        let warnings = count(|s| matches!(s, CheckStatus::Warn));
        Self {
            sections,
            errors,
            warnings,
        }
    }

    fn render(&self, format: &str) -> Result<()> {
        match format {
            "json" => println!("{}", serde_json::to_string_pretty(self)?),
            _ => self.render_text(),
        }
        Ok(())
    }

    fn render_text(&self) {
        println!("chatwire doctor");
        println!("{}", "=".repeat(40));

        for section in &self.sections {
            println!();
            println!("{}", section.name);
            println!("{}", "-".repeat(section.name.len()));
            for check in &section.checks {
                let label = match check.status {
                    CheckStatus::Ok => "  OK   ",
                    CheckStatus::Warn => "  WARN ",
                    CheckStatus::Error => "  ERROR",
                };
                println!("{} {}", label, check.message);
            }
        }

        println!();
        let verdict = if self.errors > 0 { "FAIL" } else { "PASS" };
        println!(
            "{verdict}: {} warning(s), {} error(s)",
            self.warnings, self.errors
        );
    }
}

// ============================================================================
// Entry Point
// ============================================================================

pub async fn run(config_path: &str, format: &str) -> Result<()> {
    let mut sections = Vec::new();

    if let Some(config) = check_config(&mut sections, config_path).await {
        sections.push(describe_sessions(&config));
        sections.push(check_storage(&config, Path::new(config_path)).await);
    }

    let report = Report::from_sections(sections);
    report.render(format)?;

    if report.errors > 0 {
        bail!("{} error(s) found", report.errors);
    }
    Ok(())
}

// ============================================================================
// Checks
// ============================================================================

async fn check_config(sections: &mut Vec<Section>, config_path: &str) -> Option<Config> {
    let mut checks = Vec::new();

    if Path::new(config_path).exists() {
        checks.push(CheckResult::ok(format!("Config file '{config_path}' found")));
    } else {
        checks.push(CheckResult::warn(format!(
            "Config file '{config_path}' not found, using defaults"
        )));
    }

    let result = Config::load(config_path).await;
    let config = match result {
        Ok(config) => Some(config),
        Err(e) => {
            let message = match &e {
                ConfigError::Yaml(_) => format!("Invalid YAML: {e}"),
                ConfigError::MissingEnvVar(var) => {
                    format!("Environment variable '{var}' is not set")
                }
                _ => format!("Failed to load config: {e}"),
            };
            checks.push(CheckResult::error(message));
            None
        }
    };

    sections.push(Section {
        name: "Configuration",
        checks,
    });
    config
}

fn describe_sessions(config: &Config) -> Section {
    let settings = config.session_settings();
    let policy = settings.reconnect;
    let attempts = if policy.max_attempts == 0 {
        "unbounded".to_string()
    } else {
        policy.max_attempts.to_string()
    };

    Section {
        name: "Sessions",
        checks: vec![
            CheckResult::ok(format!(
                "Pairing code timeout {:?}, print to terminal: {}",
                settings.connect_options.qr_timeout, settings.connect_options.print_qr
            )),
            CheckResult::ok(format!(
                "Reconnect attempts {attempts}, backoff {:?} up to {:?}",
                policy.initial_backoff, policy.max_backoff
            )),
            CheckResult::ok(format!("Event buffer {} per channel", settings.event_capacity)),
        ],
    }
}

async fn check_storage(config: &Config, config_path: &Path) -> Section {
    let mut checks = Vec::new();

    let root = config.storage_root(config_path);
    if root.is_dir() {
        checks.push(CheckResult::ok(format!(
            "Storage root '{}'",
            root.display()
        )));
    } else if root.exists() {
        checks.push(CheckResult::error(format!(
            "Storage root '{}' is not a directory",
            root.display()
        )));
    } else {
        checks.push(CheckResult::warn(format!(
            "Storage root '{}' does not exist yet (created on first save)",
            root.display()
        )));
    }

    let credentials_dir = config.credentials_dir(config_path);
    match FileCredentialStore::new(&credentials_dir).list().await {
        Ok(ids) => checks.push(CheckResult::ok(format!(
            "{} session(s) with stored credentials in '{}'",
            ids.len(),
            credentials_dir.display()
        ))),
        Err(e) => checks.push(CheckResult::error(format!(
            "Cannot read credentials: {e}"
        ))),
    }

    checks.push(CheckResult::ok(format!(
        "Message records in '{}'",
        config.messages_dir(config_path).display()
    )));

    Section {
        name: "Storage",
        checks,
    }
}
