//! stackctl - Changeset-driven CloudFormation deployments
//!
//! Stacks are described by `<template>/<params>.json` files. For each one
//! the engine computes a changeset, reports what it would change and, once
//! approved, executes it while streaming stack events until the stack
//! settles.

pub mod aws;
pub mod cleanup;
pub mod commands;
pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod stack;
pub mod templates;
pub mod wait;

#[cfg(test)]
pub mod testing;

pub use cleanup::{CleanupRegistry, CleanupReport};
pub use engine::{Engine, StackStatusReport};
pub use error::EngineError;
pub use stack::PipelineOutcome;
