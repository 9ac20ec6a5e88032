//! Configuration types for a stackctl invocation

use std::path::{Path, PathBuf};
use std::time::Duration;

use stackctl_common::defaults::{DEFAULT_CLEANUP_TIMEOUT, DEFAULT_TEMPLATE_DIR};

use crate::model::ChangesetRequest;

/// How results are rendered
#[derive(Debug, Clone, Default)]
pub struct OutputConfig {
    /// Emit JSON instead of tables
    pub json: bool,
    /// Number of `-v` flags
    pub verbosity: u8,
}

#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// Deadline for the whole command; `None` waits indefinitely
    pub command: Option<Duration>,
    /// How long shutdown cleanup jobs may run
    pub cleanup: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            command: None,
            cleanup: DEFAULT_CLEANUP_TIMEOUT,
        }
    }
}

impl TimeoutConfig {
    /// Seconds as given on the command line; zero disables the deadline
    pub fn from_secs(command: u64, cleanup: u64) -> Self {
        Self {
            command: (command > 0).then(|| Duration::from_secs(command)),
            cleanup: Duration::from_secs(cleanup),
        }
    }
}

/// Session settings used when a parameter file leaves them empty
#[derive(Debug, Clone, Default)]
pub struct AwsOverrides {
    pub profile: Option<String>,
    pub region: Option<String>,
}

impl AwsOverrides {
    pub fn apply(&self, request: &mut ChangesetRequest) {
        if request.profile.is_empty() {
            if let Some(profile) = &self.profile {
                request.profile.clone_from(profile);
            }
        }
        if request.region.is_empty() {
            if let Some(region) = &self.region {
                request.region.clone_from(region);
            }
        }
    }
}

/// Configuration for one invocation
///
/// Composed of focused sub-configs.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Directory holding `<template>/<params>.json`
    pub template_dir: PathBuf,
    pub output: OutputConfig,
    pub timeouts: TimeoutConfig,
    pub aws: AwsOverrides,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            template_dir: PathBuf::from(DEFAULT_TEMPLATE_DIR),
            output: OutputConfig::default(),
            timeouts: TimeoutConfig::default(),
            aws: AwsOverrides::default(),
        }
    }
}

impl RunConfig {
    pub fn template_dir(&self) -> &Path {
        &self.template_dir
    }
    pub fn json(&self) -> bool {
        self.output.json
    }
    pub fn command_timeout(&self) -> Option<Duration> {
        self.timeouts.command
    }
    pub fn cleanup_timeout(&self) -> Duration {
        self.timeouts.cleanup
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TemplateSource;

    #[test]
    fn zero_timeout_disables_the_deadline() {
        let t = TimeoutConfig::from_secs(0, 30);
        assert_eq!(t.command, None);
        assert_eq!(t.cleanup, Duration::from_secs(30));
        assert_eq!(
            TimeoutConfig::from_secs(600, 5).command,
            Some(Duration::from_secs(600))
        );
    }

    #[test]
    fn overrides_fill_only_empty_fields() {
        let overrides = AwsOverrides {
            profile: Some("ops".into()),
            region: Some("us-west-2".into()),
        };

        let mut request = ChangesetRequest::new("web", TemplateSource::Body("{}".into()));
        request.region = "eu-west-1".into();
        overrides.apply(&mut request);
        assert_eq!(request.profile, "ops");
        assert_eq!(request.region, "eu-west-1");
    }

    #[test]
    fn defaults() {
        let config = RunConfig::default();
        assert_eq!(config.template_dir(), Path::new("cloudformation"));
        assert!(!config.json());
        assert_eq!(config.command_timeout(), None);
        assert_eq!(config.cleanup_timeout(), Duration::from_secs(30));
    }
}
