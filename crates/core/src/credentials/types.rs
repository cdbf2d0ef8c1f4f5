use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("failed to read credentials from {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write credentials to {path}: {source}")]
    Materialize {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Where a credential set was loaded from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "location", rename_all = "snake_case")]
pub enum CredentialSource {
    ExplicitPath(PathBuf),
    File(PathBuf),
    Environment(String),
}

impl std::fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialSource::ExplicitPath(p) => write!(f, "explicit path {}", p.display()),
            CredentialSource::File(p) => write!(f, "file {}", p.display()),
            CredentialSource::Environment(var) => write!(f, "environment variable {}", var),
        }
    }
}

/// One line of a Netscape cookie file.
#[derive(Debug, Clone, PartialEq)]
pub struct Cookie {
    pub domain: String,
    pub include_subdomains: bool,
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
    /// `None` for session cookies.
    pub expires: Option<DateTime<Utc>>,
    pub name: String,
    pub value: String,
}

impl Cookie {
    /// Whether the cookie belongs to `domain` or one of its subdomains.
    pub fn matches_domain(&self, domain: &str) -> bool {
        let own = self.domain.trim_start_matches('.');
        own == domain || own.ends_with(&format!(".{}", domain))
    }
}

/// Authentication material as read from a source, before parsing.
#[derive(Debug, Clone)]
pub struct RawCredentials {
    pub source: CredentialSource,
    /// File the downloader should be pointed at.
    pub cookie_file: PathBuf,
    pub content: String,
}

/// A parsed, possibly validated bundle of cookies.
#[derive(Debug, Clone)]
pub struct CredentialSet {
    pub source: CredentialSource,
    pub cookie_file: PathBuf,
    pub cookies: Vec<Cookie>,
    pub loaded_at: DateTime<Utc>,
    /// Earliest expiry among the relevant persistent cookies.
    pub expires_at: Option<DateTime<Utc>>,
    pub validated: bool,
}

impl CredentialSet {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Validated and not expired; anything else counts as absent.
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        self.validated && !self.is_expired_at(now)
    }
}

/// Exposed view of the current credentials (no cookie values).
#[derive(Debug, Clone, Serialize)]
pub struct CredentialStatus {
    pub present: bool,
    pub source: Option<CredentialSource>,
    pub loaded_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub validated: bool,
    pub cookie_count: usize,
    pub refresh_count: u64,
}
