//! Mock credential loader for testing.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::credentials::{CredentialError, CredentialLoader, CredentialSource, RawCredentials};

/// Mock implementation of [`CredentialLoader`].
///
/// Serves fixed Netscape cookie content and counts how often it is asked.
#[derive(Debug)]
pub struct MockCredentialLoader {
    content: Mutex<Option<String>>,
    delay: Option<Duration>,
    loads: AtomicUsize,
}

impl MockCredentialLoader {
    /// A loader that finds nothing.
    pub fn empty() -> Self {
        Self {
            content: Mutex::new(None),
            delay: None,
            loads: AtomicUsize::new(0),
        }
    }

    pub fn with_content(content: &str) -> Self {
        let loader = Self::empty();
        loader.set_content(Some(content));
        loader
    }

    /// YouTube session cookies valid for a year.
    pub fn valid_youtube_cookies() -> Self {
        let expires = (Utc::now() + chrono::Duration::days(365)).timestamp();
        Self::with_content(&format!(
            "# Netscape HTTP Cookie File\n\
             .youtube.com\tTRUE\t/\tTRUE\t{expires}\tSID\tsid-value\n\
             .youtube.com\tTRUE\t/\tTRUE\t{expires}\tHSID\thsid-value\n"
        ))
    }

    /// Each load sleeps this long first.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Replace what subsequent loads return.
    pub fn set_content(&self, content: Option<&str>) {
        *self.content.lock().unwrap() = content.map(str::to_string);
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialLoader for MockCredentialLoader {
    async fn load(&self) -> Result<Option<RawCredentials>, CredentialError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let content = self.content.lock().unwrap().clone();
        Ok(content.map(|content| RawCredentials {
            source: CredentialSource::Environment("MOCK_COOKIES".to_string()),
            cookie_file: PathBuf::from("/tmp/mock_cookies.txt"),
            content,
        }))
    }
}
