/*!
 * Error types for the novelwai engine.
 *
 * Provider failures carry a `FailureKind` that drives the retry/fallback
 * policy; orchestration errors are what callers of the engine see. The
 * ledger layer itself works with `anyhow`, which surfaces here as the
 * transparent `OrchestrationError::Ledger` variant.
 */

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::translation::document::Phase;

/// Classification of a failed provider call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Backend throttled the request (HTTP 429, quota windows)
    RateLimited,
    /// Credentials rejected or missing
    AuthFailed,
    /// Backend refused the request as malformed or unsupported
    InvalidRequest,
    /// Backend overloaded, down or unreachable
    ServiceUnavailable,
    /// The call did not complete within the client timeout
    Timeout,
    /// Anything else, including unusable responses
    Unknown,
}

impl FailureKind {
    /// Whether the same provider may be called again for the same work unit.
    ///
    /// Auth and request errors will not resolve by repeating the call, so the
    /// policy moves straight on to the next provider.
    pub fn is_retryable(self) -> bool {
        !matches!(self, FailureKind::AuthFailed | FailureKind::InvalidRequest)
    }

    /// Stable identifier used in the ledger
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::RateLimited => "rate_limited",
            FailureKind::AuthFailed => "auth_failed",
            FailureKind::InvalidRequest => "invalid_request",
            FailureKind::ServiceUnavailable => "service_unavailable",
            FailureKind::Timeout => "timeout",
            FailureKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FailureKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "rate_limited" => Ok(FailureKind::RateLimited),
            "auth_failed" => Ok(FailureKind::AuthFailed),
            "invalid_request" => Ok(FailureKind::InvalidRequest),
            "service_unavailable" => Ok(FailureKind::ServiceUnavailable),
            "timeout" => Ok(FailureKind::Timeout),
            "unknown" => Ok(FailureKind::Unknown),
            _ => Err(anyhow::anyhow!("Invalid failure kind: {}", s)),
        }
    }
}

/// Error returned by a provider adapter for a single call
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind}: {message}")]
pub struct ProviderError {
    /// Failure classification
    pub kind: FailureKind,
    /// Human-readable detail from the backend or transport
    pub message: String,
}

impl ProviderError {
    /// Create a new provider error
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Error for a request the backend throttled
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(FailureKind::RateLimited, message)
    }

    /// Error for rejected or missing credentials
    pub fn auth_failed(message: impl Into<String>) -> Self {
        Self::new(FailureKind::AuthFailed, message)
    }
}

/// One provider's share of a failed work unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderTrial {
    /// Provider name
    pub provider: String,
    /// Calls made to this provider for the unit
    pub attempts: u32,
    /// Classification of the last failed call
    pub last_failure: FailureKind,
}

/// A phase that stopped because a work unit could not be completed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseFailure {
    /// Phase that failed
    pub phase: Phase,
    /// First failing unit in document order
    pub unit_key: String,
    /// Chapter the failing unit belongs to
    pub chapter_id: String,
    /// Providers tried for that unit, in order
    pub trials: Vec<ProviderTrial>,
    /// Number of units left unresolved in the phase
    pub failed_units: usize,
}

impl fmt::Display for PhaseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} phase failed at unit '{}' (chapter {})",
            self.phase, self.unit_key, self.chapter_id
        )?;

        if self.trials.is_empty() {
            write!(f, ": no provider could be tried")?;
        } else {
            let tried: Vec<String> = self
                .trials
                .iter()
                .map(|t| format!("{} x{} ({})", t.provider, t.attempts, t.last_failure))
                .collect();
            write!(f, ": tried {}; all providers exhausted", tried.join(", then "))?;
        }

        if self.failed_units > 1 {
            write!(f, " [{} units unresolved]", self.failed_units)?;
        }

        Ok(())
    }
}

/// Errors surfaced by the orchestration engine
#[derive(Error, Debug)]
pub enum OrchestrationError {
    /// No provider survived configuration
    #[error("No enabled providers are available{}", format_unavailable(.unavailable))]
    NoEnabledProviders {
        /// Providers that were configured but could not be constructed
        unavailable: Vec<String>,
    },

    /// A pinned provider is not among the available ones
    #[error("Requested provider '{0}' is not enabled or not available")]
    UnknownProvider(String),

    /// Contradictory phase restrictions
    #[error("Invalid phase selection: {0}")]
    InvalidPhaseSet(String),

    /// The document handed to the engine is malformed
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    /// State machine refused a transition
    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition {
        /// Current state
        from: String,
        /// Requested state
        to: String,
    },

    /// Another run is active on this engine
    #[error("A run is already active for document '{0}'")]
    AlreadyRunning(String),

    /// Unknown document id
    #[error("Document '{0}' not found in the ledger")]
    DocumentNotFound(String),

    /// Document is not paused or failed
    #[error("Document '{document_id}' cannot be resumed from state {state}")]
    NotResumable {
        /// Document id
        document_id: String,
        /// Current state label
        state: String,
    },

    /// The prompt builder could not produce a prompt for a unit
    #[error("Failed to build prompt for unit '{unit_key}': {message}")]
    Prompt {
        /// Unit the prompt was for
        unit_key: String,
        /// Builder error
        message: String,
    },

    /// Ledger read or write failure
    #[error(transparent)]
    Ledger(#[from] anyhow::Error),
}

fn format_unavailable(unavailable: &[String]) -> String {
    if unavailable.is_empty() {
        String::new()
    } else {
        format!(" (unavailable: {})", unavailable.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failureKind_isRetryable_shouldExcludeAuthAndInvalidRequest() {
        assert!(FailureKind::RateLimited.is_retryable());
        assert!(FailureKind::ServiceUnavailable.is_retryable());
        assert!(FailureKind::Timeout.is_retryable());
        assert!(FailureKind::Unknown.is_retryable());
        assert!(!FailureKind::AuthFailed.is_retryable());
        assert!(!FailureKind::InvalidRequest.is_retryable());
    }

    #[test]
    fn test_failureKind_fromStr_shouldRoundTripDisplay() {
        for kind in [
            FailureKind::RateLimited,
            FailureKind::AuthFailed,
            FailureKind::InvalidRequest,
            FailureKind::ServiceUnavailable,
            FailureKind::Timeout,
            FailureKind::Unknown,
        ] {
            assert_eq!(kind.to_string().parse::<FailureKind>().unwrap(), kind);
        }
        assert!("bogus".parse::<FailureKind>().is_err());
    }

    #[test]
    fn test_phaseFailure_display_shouldListProvidersInOrder() {
        let failure = PhaseFailure {
            phase: Phase::Translate,
            unit_key: "ch-2".to_string(),
            chapter_id: "ch-2".to_string(),
            trials: vec![
                ProviderTrial {
                    provider: "gemini".to_string(),
                    attempts: 3,
                    last_failure: FailureKind::RateLimited,
                },
                ProviderTrial {
                    provider: "openai".to_string(),
                    attempts: 1,
                    last_failure: FailureKind::AuthFailed,
                },
            ],
            failed_units: 1,
        };

        let text = failure.to_string();
        assert!(text.contains("translate phase failed at unit 'ch-2'"));
        let gemini = text.find("gemini x3 (rate_limited)").unwrap();
        let openai = text.find("openai x1 (auth_failed)").unwrap();
        assert!(gemini < openai);
        assert!(text.ends_with("all providers exhausted"));
    }

    #[test]
    fn test_noEnabledProviders_display_shouldNameUnavailableProviders() {
        let err = OrchestrationError::NoEnabledProviders {
            unavailable: vec!["openai".to_string(), "anthropic".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "No enabled providers are available (unavailable: openai, anthropic)"
        );
    }
}
