//! Testing utilities and mock implementations.
//!
//! Mocks for every seam the engine talks through, so the acquisition flow
//! can be exercised end to end without yt-dlp, proxies or cookie files.
//!
//! # Example
//!
//! ```rust,ignore
//! use reelfetch_core::testing::{MockAcquisitionBackend, MockCredentialLoader, MockRouteProber};
//!
//! let backend = Arc::new(MockAcquisitionBackend::new());
//! let loader = Arc::new(MockCredentialLoader::valid_youtube_cookies());
//! let prober = Arc::new(MockRouteProber::new());
//!
//! backend.script(Strategy::Direct, vec![MockStep::succeed("/downloads/a.mp4")]);
//! ```

mod flaky_tier;
mod mock_backend;
mod mock_credentials;
mod mock_prober;

pub use flaky_tier::FlakyDurableTier;
pub use mock_backend::{MockAcquisitionBackend, MockCall, MockStep};
pub use mock_credentials::MockCredentialLoader;
pub use mock_prober::MockRouteProber;
