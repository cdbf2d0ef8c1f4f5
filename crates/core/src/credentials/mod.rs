//! Authentication material for credentialed acquisition.
//!
//! Cookies are loaded from an explicit path, a list of search paths or an
//! environment variable, validated, and refreshed on a timer or on demand.
//! Concurrent refresh requests collapse into one reload.

mod config;
mod loader;
mod netscape;
mod store;
mod types;

pub use config::CredentialConfig;
pub use loader::{CredentialLoader, FsCredentialLoader};
pub use netscape::parse_netscape;
pub use store::CredentialStore;
pub use types::{
    Cookie, CredentialError, CredentialSet, CredentialSource, CredentialStatus, RawCredentials,
};
