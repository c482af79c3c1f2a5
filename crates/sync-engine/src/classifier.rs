//! Retry/error classification
//!
//! Every failed call passes through here exactly once. The result decides
//! whether the fetch cycle retries, ends with a valid absence, or surfaces
//! an error to the cache.

use vigil_core::{FeedConfig, RetryConfig, SyncError, UnavailableMarkers};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Retry,
    /// Legitimate absence: the cache stores `None` and no error.
    AbandonSilently,
    AbandonWithError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryClassifier {
    max_attempts: u32,
    unavailable: UnavailableMarkers,
}

impl RetryClassifier {
    pub fn new(max_attempts: u32, unavailable: UnavailableMarkers) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            unavailable,
        }
    }

    pub fn for_feed(retry: &RetryConfig, feed: &FeedConfig) -> Self {
        Self::new(retry.max_attempts, feed.unavailable.clone())
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// True when the error means "this resource is not tracked".
    pub fn is_unavailable(&self, error: &SyncError) -> bool {
        match error {
            SyncError::ResourceUnavailable { .. } => true,
            SyncError::Backend { code, message } => {
                self.unavailable.matches(code.as_deref(), message)
            }
            SyncError::Transport { reason } => self.unavailable.matches(None, reason),
            _ => false,
        }
    }

    /// `attempt` is the 1-based number of the attempt that just failed.
    pub fn classify(&self, error: &SyncError, attempt: u32) -> Verdict {
        match error {
            SyncError::Unauthenticated
            | SyncError::CommandRejected { .. }
            | SyncError::Config { .. } => Verdict::AbandonWithError,
            _ if self.is_unavailable(error) => Verdict::AbandonSilently,
            _ if attempt < self.max_attempts => Verdict::Retry,
            _ => Verdict::AbandonWithError,
        }
    }

    /// Error as the cache should store it once retries are exhausted.
    pub fn surface(&self, error: SyncError, attempts: u32) -> SyncError {
        match error {
            SyncError::Unauthenticated
            | SyncError::CommandRejected { .. }
            | SyncError::Transient { .. } => error,
            other => SyncError::Transient {
                attempts,
                reason: other.to_string(),
            },
        }
    }
}

impl Default for RetryClassifier {
    fn default() -> Self {
        Self::new(RetryConfig::default().max_attempts, UnavailableMarkers::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::FeedsConfig;

    fn depth_classifier() -> RetryClassifier {
        RetryClassifier::for_feed(&RetryConfig::default(), &FeedsConfig::default().market_depth)
    }

    #[test]
    fn unauthenticated_is_never_retried() {
        let classifier = depth_classifier();
        assert_eq!(
            classifier.classify(&SyncError::Unauthenticated, 1),
            Verdict::AbandonWithError
        );
    }

    #[test]
    fn provider_absence_is_silent_on_first_attempt() {
        let classifier = depth_classifier();
        let by_code = SyncError::backend(Some("40309"), "param error");
        let by_message = SyncError::backend(None::<String>, "Symbol not available");
        let in_transport = SyncError::transport("edge function said 40034");

        for error in [by_code, by_message, in_transport] {
            assert_eq!(classifier.classify(&error, 1), Verdict::AbandonSilently);
        }
    }

    #[test]
    fn generic_failures_retry_until_the_ceiling() {
        let classifier = depth_classifier();
        let error = SyncError::transport("connection reset");

        assert_eq!(classifier.classify(&error, 1), Verdict::Retry);
        assert_eq!(classifier.classify(&error, 2), Verdict::Retry);
        assert_eq!(classifier.classify(&error, 3), Verdict::AbandonWithError);
    }

    #[test]
    fn markers_are_per_source() {
        let logs = RetryClassifier::for_feed(&RetryConfig::default(), &FeedsConfig::default().logs);
        let error = SyncError::backend(Some("40309"), "Symbol not available");
        assert_eq!(logs.classify(&error, 1), Verdict::Retry);
    }

    #[test]
    fn surfaced_errors_record_attempts() {
        let classifier = RetryClassifier::default();
        match classifier.surface(SyncError::transport("timeout"), 3) {
            SyncError::Transient { attempts, reason } => {
                assert_eq!(attempts, 3);
                assert!(reason.contains("timeout"));
            }
            other => panic!("expected transient, got {other:?}"),
        }
        assert!(matches!(
            classifier.surface(SyncError::Unauthenticated, 1),
            SyncError::Unauthenticated
        ));
    }
}
