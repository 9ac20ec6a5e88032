//! Temporary `<template>/<params>.json` directories

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::TempDir;

/// Smallest template CloudFormation accepts
pub const MINIMAL_TEMPLATE: &str = r#"{
  "Resources": {
    "Topic": { "Type": "AWS::SNS::Topic" }
  }
}"#;

/// A template directory removed when dropped
pub struct TemplateDir {
    dir: TempDir,
}

impl TemplateDir {
    pub fn new() -> Result<Self> {
        Ok(Self {
            dir: TempDir::new().context("Failed to create template directory")?,
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write `<template>/<name>.json` with the given content
    pub fn add_parameter_file(
        &self,
        template: &str,
        name: &str,
        content: &serde_json::Value,
    ) -> Result<PathBuf> {
        let dir = self.template_path(template)?;
        let path = dir.join(format!("{name}.json"));
        let body = serde_json::to_string_pretty(content)?;
        fs::write(&path, body)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }

    /// Write an arbitrary file inside the template directory
    pub fn add_file(&self, template: &str, file: &str, body: &str) -> Result<PathBuf> {
        let path = self.template_path(template)?.join(file);
        fs::write(&path, body)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }

    /// Parameter file for `stack_name` with [`MINIMAL_TEMPLATE`] inlined
    pub fn add_stack(&self, template: &str, name: &str, stack_name: &str) -> Result<PathBuf> {
        self.add_parameter_file(
            template,
            name,
            &serde_json::json!({
                "StackName": stack_name,
                "TemplateBody": MINIMAL_TEMPLATE,
            }),
        )
    }

    fn template_path(&self, template: &str) -> Result<PathBuf> {
        let dir = self.dir.path().join(template);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        Ok(dir)
    }
}
