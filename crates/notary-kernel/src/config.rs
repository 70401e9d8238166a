//! Notary configuration.

use std::time::Duration as StdDuration;

use chrono::Duration;
use notary_kernel_core::VerifyPolicy;

/// Configuration for the Notary.
#[derive(Debug, Clone)]
pub struct NotaryConfig {
    /// Prefix for public verification URLs (`{base_url}/r/{receipt_hash}`).
    pub base_url: String,
    /// Attempts at appending to a chain before giving up on a moving head.
    pub max_issue_attempts: u32,
    /// Timestamp bounds for verification.
    pub verify: VerifyPolicy,
    /// Longest allowed distance between commit and reveal deadline.
    pub max_reveal_window: Duration,
    /// Period of the background expiry sweep.
    pub sweep_interval: StdDuration,
}

impl Default for NotaryConfig {
    fn default() -> Self {
        Self {
            base_url: "https://notary.local".into(),
            max_issue_attempts: 3,
            verify: VerifyPolicy::default(),
            max_reveal_window: Duration::hours(24),
            sweep_interval: StdDuration::from_secs(60),
        }
    }
}

impl NotaryConfig {
    /// Public URL for a receipt hash.
    pub fn verification_url(&self, receipt_hash: &str) -> String {
        format!("{}/r/{}", self.base_url.trim_end_matches('/'), receipt_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verification_url() {
        let mut config = NotaryConfig::default();
        assert_eq!(config.verification_url("ab12"), "https://notary.local/r/ab12");

        config.base_url = "https://example.org/".into();
        assert_eq!(config.verification_url("ab12"), "https://example.org/r/ab12");
    }
}
