//! Credential source configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialConfig {
    /// Explicit cookie file; checked before the search paths.
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Files tried in order when no explicit path resolves. `~/` expands to `$HOME`.
    #[serde(default = "default_search_paths")]
    pub search_paths: Vec<PathBuf>,

    /// Environment variable holding cookie file content, tried last.
    #[serde(default = "default_env_var")]
    pub env_var: String,

    /// Where cookie content from the environment is written for the downloader.
    #[serde(default = "default_materialize_path")]
    pub materialize_path: PathBuf,

    /// Cookie domains that count toward validation.
    #[serde(default = "default_domains")]
    pub domains: Vec<String>,

    /// Cookie names that must be present for the set to validate.
    #[serde(default)]
    pub required_cookies: Vec<String>,

    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,

    /// Warn when the earliest cookie expiry is closer than this.
    #[serde(default = "default_expiry_warning")]
    pub expiry_warning_hours: u64,
}

fn default_search_paths() -> Vec<PathBuf> {
    vec![
        PathBuf::from("youtube_cookies.txt"),
        PathBuf::from("~/youtube_cookies.txt"),
        PathBuf::from("cookies/youtube_cookies.txt"),
        PathBuf::from("config/youtube_cookies.txt"),
        PathBuf::from("/tmp/youtube_cookies.txt"),
    ]
}

fn default_env_var() -> String {
    "YOUTUBE_COOKIES".to_string()
}

fn default_materialize_path() -> PathBuf {
    std::env::temp_dir().join("reelfetch_env_cookies.txt")
}

fn default_domains() -> Vec<String> {
    vec!["youtube.com".to_string(), "google.com".to_string()]
}

fn default_refresh_interval() -> u64 {
    6 * 60 * 60
}

fn default_expiry_warning() -> u64 {
    7 * 24
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            path: None,
            search_paths: default_search_paths(),
            env_var: default_env_var(),
            materialize_path: default_materialize_path(),
            domains: default_domains(),
            required_cookies: Vec::new(),
            refresh_interval_secs: default_refresh_interval(),
            expiry_warning_hours: default_expiry_warning(),
        }
    }
}
