//! Shared test utilities for stackctl
//!
//! This crate provides common test helpers that can be used across
//! multiple test modules without circular dependencies.
//!
//! ## Modules
//!
//! - [`aws`]: AWS region detection and unique stack naming
//! - [`fixtures`]: On-disk template directories

pub mod aws;
pub mod fixtures;

// Re-export commonly used items
pub use aws::{get_test_region, test_stack_name};
pub use fixtures::{MINIMAL_TEMPLATE, TemplateDir};
