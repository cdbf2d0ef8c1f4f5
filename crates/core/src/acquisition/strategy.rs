//! Acquisition strategies.

use serde::{Deserialize, Serialize};

/// One named way of attempting acquisition.
///
/// The orchestrator walks these in a fixed order; the order never adapts to
/// past results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Plain request from the host's own network.
    Direct,
    /// Mobile player client through a proxy.
    AlternateClientA,
    /// Web player client through a proxy.
    AlternateClientB,
    /// Web client with a cookie jar.
    Credentialed,
    /// Several clients at once, lowest-quality formats, no cookies.
    UncredentialedFallback,
}

/// How a strategy relates to credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialNeed {
    /// Never sends credentials.
    Unused,
    /// Sends credentials when valid ones exist.
    Optional,
    /// Cannot run without credentials; skipped when none are valid.
    Required,
}

impl Strategy {
    pub const DEFAULT_ORDER: [Strategy; 5] = [
        Strategy::Direct,
        Strategy::AlternateClientA,
        Strategy::AlternateClientB,
        Strategy::Credentialed,
        Strategy::UncredentialedFallback,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Direct => "direct",
            Strategy::AlternateClientA => "alternate-client-a",
            Strategy::AlternateClientB => "alternate-client-b",
            Strategy::Credentialed => "credentialed",
            Strategy::UncredentialedFallback => "uncredentialed-fallback",
        }
    }

    /// Whether attempts go through an egress route when one is available.
    pub fn uses_route(&self) -> bool {
        !matches!(self, Strategy::Direct)
    }

    pub fn credential_need(&self) -> CredentialNeed {
        match self {
            Strategy::Direct => CredentialNeed::Optional,
            Strategy::Credentialed => CredentialNeed::Required,
            Strategy::AlternateClientA
            | Strategy::AlternateClientB
            | Strategy::UncredentialedFallback => CredentialNeed::Unused,
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
