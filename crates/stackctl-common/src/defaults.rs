//! Default configuration values shared across stackctl components

use std::time::Duration;

/// Lower bound of the adaptive poll interval
pub const DEFAULT_MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Upper bound of the adaptive poll interval, as a multiple of the lower bound
pub const DEFAULT_MAX_POLL_MULTIPLE: u32 = 128;

/// Factor applied to the poll interval after a throttled request
pub const DEFAULT_MULTIPLY_ON_ERROR: u32 = 2;

/// Fixed poll interval used while waiting for a stack to settle
pub const DEFAULT_STACK_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Inline template bodies at or above this many bytes are staged in S3.
///
/// The API limit is 51,200 bytes; the difference leaves room for encoding.
pub const TEMPLATE_INLINE_LIMIT: usize = 51_100;

/// How long cleanup jobs may run at shutdown
pub const DEFAULT_CLEANUP_TIMEOUT: Duration = Duration::from_secs(30);

/// How many times a "changeset already exists" conflict is resolved by
/// deleting the old changeset before giving up
pub const DEFAULT_CONFLICT_RETRIES: u32 = 1;

/// Status shown for a stack that does not exist remotely
pub const STACK_DOES_NOT_EXIST: &str = "--DOES NOT EXIST--";

/// Default directory holding `<template>/<params>.json` files
pub const DEFAULT_TEMPLATE_DIR: &str = "cloudformation";

/// Prefix for generated changeset names, staging buckets and object keys
pub const NAME_PREFIX: &str = "stackctl";
