use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

use crate::acquisition::AcquisitionConfig;
use crate::credentials::CredentialConfig;
use crate::egress::{parse_route, EgressConfig};

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub acquisition: AcquisitionConfig,
    #[serde(default)]
    pub egress: EgressConfig,
    #[serde(default)]
    pub credentials: CredentialConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([127, 0, 0, 1])
}

fn default_port() -> u16 {
    8080
}

/// Database configuration (durable job tier)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("reelfetch.db")
}

/// Job retention
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JobsConfig {
    /// Jobs untouched for this long are removed from both tiers.
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            retention_hours: default_retention_hours(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

fn default_retention_hours() -> u64 {
    crate::job::DEFAULT_RETENTION_HOURS
}

fn default_sweep_interval() -> u64 {
    3600
}

/// Sanitized config for API responses (proxy credentials redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub jobs: JobsConfig,
    pub acquisition: AcquisitionConfig,
    pub egress: SanitizedEgressConfig,
    pub credentials: SanitizedCredentialConfig,
}

/// Egress config with routes reduced to their credential-free ids
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedEgressConfig {
    pub routes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub routes_file: Option<PathBuf>,
    pub failure_threshold: u32,
    pub base_cooldown_secs: u64,
    pub max_cooldown_secs: u64,
    pub probe_before_reinstate: bool,
    pub probe_url: String,
    pub probe_interval_secs: u64,
}

/// Credential config without the cookie material location details
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedCredentialConfig {
    pub path_configured: bool,
    pub search_paths: usize,
    pub env_var: String,
    pub domains: Vec<String>,
    pub required_cookies: Vec<String>,
    pub refresh_interval_secs: u64,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        let egress = &config.egress;
        let credentials = &config.credentials;
        Self {
            server: config.server.clone(),
            database: config.database.clone(),
            jobs: config.jobs.clone(),
            acquisition: config.acquisition.clone(),
            egress: SanitizedEgressConfig {
                routes: egress
                    .routes
                    .iter()
                    .map(|r| match parse_route(r) {
                        Ok(parsed) => parsed.id,
                        Err(_) => "<invalid>".to_string(),
                    })
                    .collect(),
                routes_file: egress.routes_file.clone(),
                failure_threshold: egress.failure_threshold,
                base_cooldown_secs: egress.base_cooldown_secs,
                max_cooldown_secs: egress.max_cooldown_secs,
                probe_before_reinstate: egress.probe_before_reinstate,
                probe_url: egress.probe_url.clone(),
                probe_interval_secs: egress.probe_interval_secs,
            },
            credentials: SanitizedCredentialConfig {
                path_configured: credentials.path.is_some(),
                search_paths: credentials.search_paths.len(),
                env_var: credentials.env_var.clone(),
                domains: credentials.domains.clone(),
                required_cookies: credentials.required_cookies.clone(),
                refresh_interval_secs: credentials.refresh_interval_secs,
            },
        }
    }
}
