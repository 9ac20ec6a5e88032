//! AWS test utilities
//!
//! Provides region detection and unique stack names for live integration tests.

use chrono::Utc;

/// Get the AWS region for tests.
///
/// Checks environment variables in order:
/// 1. AWS_REGION
/// 2. AWS_DEFAULT_REGION
/// 3. Falls back to us-east-1
pub fn get_test_region() -> String {
    std::env::var("AWS_REGION")
        .or_else(|_| std::env::var("AWS_DEFAULT_REGION"))
        .unwrap_or_else(|_| "us-east-1".to_string())
}

/// Generate a unique stack name for test resources.
///
/// Format: `{prefix}-test-{timestamp_ms}-{counter}`. Stack names allow only
/// letters, digits and hyphens, so the result is safe to pass straight through.
///
/// # Example
///
/// ```
/// use stackctl_test_utils::aws::test_stack_name;
///
/// let name = test_stack_name("web");
/// assert!(name.starts_with("web-test-"));
/// ```
pub fn test_stack_name(prefix: &str) -> String {
    use std::sync::atomic::{AtomicU32, Ordering};
    static COUNTER: AtomicU32 = AtomicU32::new(0);

    let ts = Utc::now().timestamp_millis();
    let counter = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-test-{ts}-{counter}")
}
