//! Configuration loading and validation.
//!
//! Configuration is YAML with a global investigation section and one section
//! per probe family. A missing file falls back to defaults so the binary
//! runs out of the box against an in-cluster monitoring stack.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::{info, warn};

use crate::errors::{TriageError, TriageResult};
use crate::probes::loki::LokiClientConfig;
use crate::probes::prometheus::PrometheusClientConfig;
use crate::probes::HttpAuth;

fn default_model() -> String {
    crate::ai::anthropic::default_model().to_string()
}

fn default_max_steps() -> usize {
    10
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./investigations")
}

fn default_true() -> bool {
    true
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_limit() -> u32 {
    100
}

fn default_loki_url() -> String {
    "http://loki.monitoring.svc.cluster.local:3100".to_string()
}

fn default_prometheus_url() -> String {
    "http://prometheus.monitoring.svc.cluster.local:9090".to_string()
}

fn default_repo_path() -> PathBuf {
    PathBuf::from(".")
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InvestigationConfig {
    pub model: String,
    /// Hard ceiling on executed steps per investigation.
    pub max_steps: usize,
    pub output_dir: PathBuf,
}

impl Default for InvestigationConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            max_steps: default_max_steps(),
            output_dir: default_output_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub url: String,
    pub timeout_seconds: u64,
    pub username: Option<String>,
    pub password: Option<String>,
    pub token: Option<String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            timeout_seconds: default_timeout_seconds(),
            username: None,
            password: None,
            token: None,
        }
    }
}

impl ConnectionConfig {
    fn auth(&self) -> HttpAuth {
        HttpAuth {
            username: self.username.clone(),
            password: self.password.clone(),
            token: self.token.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueryDefaults {
    pub limit: u32,
}

impl Default for QueryDefaults {
    fn default() -> Self {
        Self {
            limit: default_limit(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FamilyConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub query_defaults: QueryDefaults,
    /// Only meaningful for the git family.
    #[serde(default = "default_repo_path")]
    pub repo_path: PathBuf,
}

impl Default for FamilyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            connection: ConnectionConfig::default(),
            query_defaults: QueryDefaults::default(),
            repo_path: default_repo_path(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub kubernetes: FamilyConfig,
    pub loki: FamilyConfig,
    pub prometheus: FamilyConfig,
    pub git: FamilyConfig,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub investigation: InvestigationConfig,
    pub tools: ToolsConfig,
}

impl Config {
    /// Load configuration from a YAML file, or defaults when no path is
    /// given or the file does not exist.
    pub fn load(path: Option<&Path>) -> TriageResult<Self> {
        let Some(path) = path else {
            info!("No configuration file given, using defaults");
            return Ok(Self::default());
        };

        if !path.exists() {
            warn!(path = %path.display(), "Configuration file not found, using defaults");
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&contents)
            .map_err(|e| TriageError::Config(format!("{}: {e}", path.display())))?;
        info!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Non-fatal configuration issues, for startup logging.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if self.investigation.max_steps == 0 {
            issues.push("investigation.max_steps is 0; no probe will ever run".to_string());
        }
        if self.investigation.model.trim().is_empty() {
            issues.push("investigation.model is empty".to_string());
        }
        for (family, config) in [("loki", &self.tools.loki), ("prometheus", &self.tools.prometheus)]
        {
            if config.enabled {
                let url = self.family_url(family);
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    issues.push(format!("tools.{family}.connection.url is not an HTTP URL: '{url}'"));
                }
            }
        }
        if self.tools.git.enabled && !self.tools.git.repo_path.is_dir() {
            issues.push(format!(
                "tools.git.repo_path does not exist: {}",
                self.tools.git.repo_path.display()
            ));
        }
        issues
    }

    fn family_url(&self, family: &str) -> String {
        match family {
            "loki" => {
                if self.tools.loki.connection.url.is_empty() {
                    default_loki_url()
                } else {
                    self.tools.loki.connection.url.clone()
                }
            }
            "prometheus" => {
                if self.tools.prometheus.connection.url.is_empty() {
                    default_prometheus_url()
                } else {
                    self.tools.prometheus.connection.url.clone()
                }
            }
            _ => String::new(),
        }
    }

    /// Whether a probe family is enabled.
    #[must_use]
    pub fn is_enabled(&self, family: &str) -> bool {
        match family {
            "kubernetes" => self.tools.kubernetes.enabled,
            "loki" => self.tools.loki.enabled,
            "prometheus" => self.tools.prometheus.enabled,
            "git" => self.tools.git.enabled,
            _ => false,
        }
    }

    #[must_use]
    pub fn loki_client_config(&self) -> LokiClientConfig {
        LokiClientConfig {
            base_url: self.family_url("loki"),
            timeout: Duration::from_secs(self.tools.loki.connection.timeout_seconds),
            default_limit: self.tools.loki.query_defaults.limit,
            auth: self.tools.loki.connection.auth(),
        }
    }

    #[must_use]
    pub fn prometheus_client_config(&self) -> PrometheusClientConfig {
        PrometheusClientConfig {
            base_url: self.family_url("prometheus"),
            timeout: Duration::from_secs(self.tools.prometheus.connection.timeout_seconds),
            auth: self.tools.prometheus.connection.auth(),
        }
    }

    #[must_use]
    pub fn git_repo_path(&self) -> PathBuf {
        self.tools.git.repo_path.clone()
    }
}
