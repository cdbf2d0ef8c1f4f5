//! Credential sources.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

use super::{CredentialConfig, CredentialError, CredentialSource, RawCredentials};

/// Fetches raw credential material from wherever it is configured to live.
#[async_trait]
pub trait CredentialLoader: Send + Sync {
    /// `Ok(None)` when no source has any material.
    async fn load(&self) -> Result<Option<RawCredentials>, CredentialError>;
}

/// Loads cookie files from disk, falling back to an environment variable.
///
/// Order: explicit path, each search path, then the environment variable.
pub struct FsCredentialLoader {
    explicit: Option<PathBuf>,
    search_paths: Vec<PathBuf>,
    env_var: String,
    materialize_path: PathBuf,
}

impl FsCredentialLoader {
    pub fn new(config: &CredentialConfig) -> Self {
        Self {
            explicit: config.path.clone(),
            search_paths: config.search_paths.clone(),
            env_var: config.env_var.clone(),
            materialize_path: config.materialize_path.clone(),
        }
    }

    async fn read(path: &Path) -> Result<Option<String>, CredentialError> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(CredentialError::Read {
                path: path.display().to_string(),
                source,
            }),
        }
    }
}

#[async_trait]
impl CredentialLoader for FsCredentialLoader {
    async fn load(&self) -> Result<Option<RawCredentials>, CredentialError> {
        if let Some(path) = &self.explicit {
            let path = expand_home(path);
            if let Some(content) = Self::read(&path).await? {
                debug!("Loaded cookies from explicit path {}", path.display());
                return Ok(Some(RawCredentials {
                    source: CredentialSource::ExplicitPath(path.clone()),
                    cookie_file: path,
                    content,
                }));
            }
            debug!("Explicit cookie path {} not found", path.display());
        }

        for candidate in &self.search_paths {
            let path = expand_home(candidate);
            if let Some(content) = Self::read(&path).await? {
                debug!("Loaded cookies from {}", path.display());
                return Ok(Some(RawCredentials {
                    source: CredentialSource::File(path.clone()),
                    cookie_file: path,
                    content,
                }));
            }
        }

        let Ok(content) = std::env::var(&self.env_var) else {
            return Ok(None);
        };
        if content.trim().is_empty() {
            return Ok(None);
        }

        tokio::fs::write(&self.materialize_path, &content)
            .await
            .map_err(|source| CredentialError::Materialize {
                path: self.materialize_path.display().to_string(),
                source,
            })?;
        info!(
            "Loaded cookies from ${} into {}",
            self.env_var,
            self.materialize_path.display()
        );
        Ok(Some(RawCredentials {
            source: CredentialSource::Environment(self.env_var.clone()),
            cookie_file: self.materialize_path.clone(),
            content,
        }))
    }
}

fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), std::env::var_os("HOME")) {
        (Ok(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const COOKIE_LINE: &str = ".youtube.com\tTRUE\t/\tTRUE\t0\tSID\tabc\n";

    fn loader(dir: &TempDir, explicit: Option<PathBuf>, search: Vec<PathBuf>) -> FsCredentialLoader {
        FsCredentialLoader::new(&CredentialConfig {
            path: explicit,
            search_paths: search,
            env_var: "REELFETCH_TEST_COOKIES_UNSET".to_string(),
            materialize_path: dir.path().join("env_cookies.txt"),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_explicit_path_wins() {
        let dir = TempDir::new().unwrap();
        let explicit = dir.path().join("explicit.txt");
        let fallback = dir.path().join("fallback.txt");
        std::fs::write(&explicit, COOKIE_LINE).unwrap();
        std::fs::write(&fallback, COOKIE_LINE).unwrap();

        let raw = loader(&dir, Some(explicit.clone()), vec![fallback])
            .load()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(raw.source, CredentialSource::ExplicitPath(explicit.clone()));
        assert_eq!(raw.cookie_file, explicit);
    }

    #[tokio::test]
    async fn test_search_paths_in_order() {
        let dir = TempDir::new().unwrap();
        let first = dir.path().join("first.txt");
        let second = dir.path().join("second.txt");
        std::fs::write(&second, COOKIE_LINE).unwrap();

        let raw = loader(
            &dir,
            Some(dir.path().join("missing.txt")),
            vec![first, second.clone()],
        )
        .load()
        .await
        .unwrap()
        .unwrap();
        assert_eq!(raw.source, CredentialSource::File(second));
    }

    #[tokio::test]
    async fn test_nothing_found() {
        let dir = TempDir::new().unwrap();
        let raw = loader(&dir, None, vec![dir.path().join("nope.txt")])
            .load()
            .await
            .unwrap();
        assert!(raw.is_none());
    }

    #[test]
    fn test_expand_home() {
        if let Some(home) = std::env::var_os("HOME") {
            assert_eq!(
                expand_home(Path::new("~/cookies.txt")),
                PathBuf::from(home).join("cookies.txt")
            );
        }
        assert_eq!(
            expand_home(Path::new("/abs/cookies.txt")),
            PathBuf::from("/abs/cookies.txt")
        );
    }
}
