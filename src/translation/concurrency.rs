/*!
 * Provider-specific concurrency tuning.
 *
 * Default in-flight limits and timeouts per backend, based on their rate
 * limits and typical response times for chapter-sized prompts.
 */

use crate::app_config::ProviderKind;

/// Provider-specific concurrency profile with tuned defaults
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderProfile {
    /// Maximum concurrent requests
    pub max_concurrent_requests: usize,
    /// Target requests per minute, if the backend publishes one
    pub target_rpm: Option<u32>,
    /// Client timeout for one chapter-sized call
    pub timeout_secs: u64,
}

impl ProviderProfile {
    /// Get the profile for a given backend
    pub fn for_provider(kind: ProviderKind) -> Self {
        match kind {
            ProviderKind::Gemini => Self {
                max_concurrent_requests: 4,
                target_rpm: Some(15),
                timeout_secs: 120,
            },
            ProviderKind::OpenAI => Self {
                max_concurrent_requests: 10,
                target_rpm: Some(60),
                timeout_secs: 120,
            },
            ProviderKind::Anthropic => Self {
                // lower rate limits, longer outputs
                max_concurrent_requests: 5,
                target_rpm: Some(45),
                timeout_secs: 180,
            },
            ProviderKind::Scripted => Self {
                max_concurrent_requests: 16,
                target_rpm: None,
                timeout_secs: 5,
            },
        }
    }

    /// Get effective concurrent requests, respecting any user override
    pub fn effective_concurrent_requests(&self, user_override: Option<usize>) -> usize {
        user_override.unwrap_or(self.max_concurrent_requests)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_providerProfile_forOpenAI_shouldHaveRateLimit() {
        let profile = ProviderProfile::for_provider(ProviderKind::OpenAI);
        assert_eq!(profile.max_concurrent_requests, 10);
        assert_eq!(profile.target_rpm, Some(60));
    }

    #[test]
    fn test_providerProfile_forAnthropic_shouldBeConservative() {
        let profile = ProviderProfile::for_provider(ProviderKind::Anthropic);
        assert_eq!(profile.max_concurrent_requests, 5);
        assert_eq!(profile.timeout_secs, 180);
    }

    #[test]
    fn test_providerProfile_forScripted_shouldHaveNoRateLimit() {
        let profile = ProviderProfile::for_provider(ProviderKind::Scripted);
        assert!(profile.target_rpm.is_none());
    }

    #[test]
    fn test_effectiveConcurrentRequests_withOverride_shouldUseOverride() {
        let profile = ProviderProfile::for_provider(ProviderKind::Gemini);
        assert_eq!(profile.effective_concurrent_requests(Some(2)), 2);
        assert_eq!(profile.effective_concurrent_requests(None), 4);
    }
}
