//! Template directory discovery
//!
//! Layout: `<base>/<template>/<params>.json`. Each subdirectory of the base
//! is a template; each JSON file inside it describes one stack built from
//! that template.

mod parameters;

pub use parameters::{ParameterEntry, ParameterFile, TagEntry};

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::trace;

use crate::model::ChangesetRequest;

/// A template or parameter name that does not exist on disk
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("invalid template: {name} (valid templates: {})", .valid.join(", "))]
    UnknownTemplate { name: String, valid: Vec<String> },

    #[error(
        "invalid parameter file: {name} for template {template} (valid parameter files: {})",
        .valid.join(", ")
    )]
    UnknownParameters {
        template: String,
        name: String,
        valid: Vec<String>,
    },
}

#[derive(Debug, Clone)]
pub struct TemplateFinder {
    base_dir: PathBuf,
}

impl TemplateFinder {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Template names, sorted
    pub fn list_templates(&self) -> Result<Vec<String>> {
        let entries = fs::read_dir(&self.base_dir).with_context(|| {
            format!("Failed to read template directory: {}", self.base_dir.display())
        })?;

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Parameter file stems of `template`, sorted
    pub fn list_parameters(&self, template: &str) -> Result<Vec<String>> {
        let dir = self.base_dir.join(template);
        let entries = fs::read_dir(&dir)
            .with_context(|| format!("Failed to read template directory: {}", dir.display()))?;

        let mut names = Vec::new();
        for entry in entries {
            let path = entry?.path();
            trace!(path = %path.display(), "Found file");
            if path.extension().is_some_and(|ext| ext == "json") {
                if let Some(stem) = path.file_stem() {
                    names.push(stem.to_string_lossy().into_owned());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Every `(template, params)` pair under the base directory
    pub fn pairs(&self) -> Result<Vec<(String, String)>> {
        let mut pairs = Vec::new();
        for template in self.list_templates()? {
            for params in self.list_parameters(&template)? {
                pairs.push((template.clone(), params));
            }
        }
        Ok(pairs)
    }

    pub fn validate_template(&self, template: &str) -> Result<()> {
        let valid = self.list_templates()?;
        if valid.iter().any(|t| t == template) {
            return Ok(());
        }
        Err(TemplateError::UnknownTemplate {
            name: template.to_string(),
            valid,
        }
        .into())
    }

    pub fn validate_parameters(&self, template: &str, params: &str) -> Result<()> {
        self.validate_template(template)?;
        let valid = self.list_parameters(template)?;
        if valid.iter().any(|p| p == params) {
            return Ok(());
        }
        Err(TemplateError::UnknownParameters {
            template: template.to_string(),
            name: params.to_string(),
            valid,
        }
        .into())
    }

    pub fn parameter_path(&self, template: &str, params: &str) -> PathBuf {
        self.base_dir.join(template).join(format!("{params}.json"))
    }

    /// Load the changeset request for one `(template, params)` pair
    pub fn load(&self, template: &str, params: &str) -> Result<ChangesetRequest> {
        let path = self.parameter_path(template, params);
        let file = ParameterFile::load(&path)?;
        let base = path.parent().unwrap_or(&self.base_dir);
        file.into_request(base)
            .with_context(|| format!("Invalid parameter file: {}", path.display()))
    }
}
