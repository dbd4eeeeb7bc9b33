//! Failure taxonomy for scrape execution.

use thiserror::Error;

use crate::models::RunOutcome;

/// Typed failure of one scrape execution.
///
/// The scheduler keys its backoff and escalation behavior off the variant,
/// so classification here matters more than the message.
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// Timeout, connection reset, navigation failure. Retried on the
    /// normal scheduling cadence.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Login rejected. Not retried within the same call; repeated
    /// occurrences invalidate the credential.
    #[error("login failed: {0}")]
    Credential(String),

    /// Anti-bot challenge or interstitial detected. The session is
    /// evicted and the service gate backs off aggressively.
    #[error("anti-bot block detected: {0}")]
    Blocked(String),

    /// Page structure did not match the strategy's selectors. Surfaced
    /// for operator attention, treated as transient for scheduling.
    #[error("page structure mismatch: {0}")]
    Parse(String),
}

impl ScrapeError {
    /// The audit outcome this failure maps to.
    pub fn outcome(&self) -> RunOutcome {
        match self {
            Self::Transient(_) => RunOutcome::TransientError,
            Self::Credential(_) => RunOutcome::CredentialError,
            Self::Blocked(_) => RunOutcome::Blocked,
            Self::Parse(_) => RunOutcome::ParseError,
        }
    }

    /// How much this failure advances the consecutive-failure counter.
    /// Credential and block failures escalate twice as fast.
    pub fn failure_weight(&self) -> u32 {
        match self {
            Self::Transient(_) | Self::Parse(_) => 1,
            Self::Credential(_) | Self::Blocked(_) => 2,
        }
    }
}
