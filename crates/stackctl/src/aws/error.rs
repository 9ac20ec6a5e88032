//! AWS error classification and handling
//!
//! Provides typed errors for AWS SDK operations using the `.code()` method
//! instead of string matching on Debug format.

use aws_sdk_cloudformation::error::{DisplayErrorContext, ProvideErrorMetadata};
use thiserror::Error;

/// AWS error categories for retry and cleanup logic
#[derive(Debug, Clone, Error)]
pub enum AwsError {
    /// Resource was not found (safe to skip in cleanup)
    #[error("Resource not found: {message}")]
    NotFound { message: String },

    /// Resource already exists (a changeset name collision, an owned bucket)
    #[error("Resource already exists: {message}")]
    AlreadyExists { message: String },

    /// Rate limit exceeded (retryable with backoff)
    #[error("Rate limit exceeded")]
    Throttled,

    /// Generic AWS SDK error with code and message
    #[error("AWS error: {message}")]
    Sdk {
        code: Option<String>,
        message: String,
    },
}

impl AwsError {
    /// Check if this is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, AwsError::NotFound { .. })
    }

    /// Check if this is an "already exists" error
    pub fn is_already_exists(&self) -> bool {
        matches!(self, AwsError::AlreadyExists { .. })
    }

    pub fn is_throttled(&self) -> bool {
        matches!(self, AwsError::Throttled)
    }

    /// Check if this is a retryable error
    pub fn is_retryable(&self) -> bool {
        self.is_throttled()
    }

    /// The raw service error code, if the service returned one
    pub fn code(&self) -> Option<&str> {
        match self {
            AwsError::Sdk { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Get a user-friendly suggestion for resolving this error, if available.
    pub fn suggestion(&self) -> Option<String> {
        match self {
            AwsError::Throttled => suggestion_for_code("Throttling"),
            AwsError::Sdk { code: Some(c), .. } => suggestion_for_code(c),
            _ => None,
        }
    }
}

/// Known AWS error codes for "not found" conditions
const NOT_FOUND_CODES: &[&str] = &[
    "ChangeSetNotFound",
    "ChangeSetNotFoundException",
    "StackNotFoundException",
    "NoSuchBucket",
    "NoSuchKey",
];

/// Known AWS error codes for "already exists" conditions
const ALREADY_EXISTS_CODES: &[&str] = &["AlreadyExistsException", "BucketAlreadyOwnedByYou"];

/// Known AWS error codes for throttling/rate limiting
const THROTTLING_CODES: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "RequestLimitExceeded",
    "TooManyRequestsException",
    "SlowDown",
];

/// Classify an AWS SDK error using the error code.
///
/// CloudFormation reports a missing stack as a generic `ValidationError`
/// whose message ends in "does not exist", so that pairing is checked too.
pub fn classify_aws_error(code: Option<&str>, message: Option<&str>) -> AwsError {
    let message = message.unwrap_or("Unknown error").to_string();

    match code {
        Some(c) if NOT_FOUND_CODES.contains(&c) => AwsError::NotFound { message },
        Some("ValidationError") if message.contains("does not exist") => {
            AwsError::NotFound { message }
        }
        Some(c) if ALREADY_EXISTS_CODES.contains(&c) => AwsError::AlreadyExists { message },
        Some(c) if THROTTLING_CODES.contains(&c) => AwsError::Throttled,
        _ => AwsError::Sdk {
            code: code.map(|s| s.to_string()),
            message,
        },
    }
}

/// Classify any SDK operation error through its error metadata.
///
/// Errors that carry no service code (timeouts, dispatch failures) become
/// [`AwsError::Sdk`] with the full display chain as message.
pub fn from_sdk_error<E>(err: &E) -> AwsError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    match err.code() {
        Some(code) => classify_aws_error(Some(code), err.message()),
        None => AwsError::Sdk {
            code: None,
            message: DisplayErrorContext(err).to_string(),
        },
    }
}

/// Error code to user-friendly suggestion mapping
const SUGGESTIONS: &[(&str, &str)] = &[
    (
        "Throttling",
        "AWS API rate limit hit. The operation will be retried automatically.",
    ),
    (
        "ThrottlingException",
        "AWS API rate limit hit. The operation will be retried automatically.",
    ),
    (
        "InsufficientCapabilitiesException",
        "Add the required value (e.g. CAPABILITY_IAM) to Capabilities in the parameter file.",
    ),
    (
        "LimitExceededException",
        "Request a service limit increase via AWS Service Quotas console.",
    ),
    (
        "AccessDenied",
        "Check that the selected profile has permission for this operation.",
    ),
    (
        "ExpiredToken",
        "Your credentials have expired. Refresh them and retry.",
    ),
];

/// Get a user-friendly suggestion for a known error code.
fn suggestion_for_code(code: &str) -> Option<String> {
    SUGGESTIONS
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, s)| (*s).to_string())
}
