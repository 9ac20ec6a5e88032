//! stackctl-common - Shared types and utilities
//!
//! This crate holds the pieces of stackctl that have no AWS SDK dependency:
//! the adaptive poll-interval policy and the closed status enumerations used
//! to decide when a remote operation has finished.
//!
//! ## Modules
//!
//! - [`backoff`]: AIMD poll-interval controller
//! - [`defaults`]: Default configuration values
//! - [`status`]: Stack and changeset status codes with terminal-state classification

pub mod backoff;
pub mod defaults;
pub mod status;

pub use backoff::{Aimd, AimdConfig};
pub use status::{ChangesetStatus, StackStatus, StatusOutcome, classify_stack_status};
