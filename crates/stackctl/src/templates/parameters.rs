//! Parameter files: one JSON document per stack
//!
//! Keys follow the CreateChangeSet API (`StackName`, `Parameters`, ...) so an
//! existing request body can be dropped in as is. The lowercase `profile`,
//! `region` and `bucket` keys pick the session and the staging bucket.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use garde::Validate;
use serde::Deserialize;

use crate::model::{ChangesetRequest, ChangesetType, Parameter, Tag, TemplateSource};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Validate)]
#[serde(rename_all = "PascalCase")]
pub struct ParameterEntry {
    #[garde(length(min = 1))]
    pub parameter_key: String,
    #[serde(default)]
    #[garde(skip)]
    pub parameter_value: Option<String>,
    #[serde(default)]
    #[garde(skip)]
    pub use_previous_value: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Validate)]
#[serde(rename_all = "PascalCase")]
pub struct TagEntry {
    #[garde(length(min = 1))]
    pub key: String,
    #[garde(skip)]
    pub value: String,
}

/// Contents of `<template>/<params>.json`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Validate)]
#[serde(rename_all = "PascalCase")]
pub struct ParameterFile {
    #[garde(length(min = 1))]
    pub stack_name: String,

    #[serde(default)]
    #[garde(skip)]
    pub template_body: Option<String>,

    #[serde(default, rename = "TemplateURL")]
    #[garde(skip)]
    pub template_url: Option<String>,

    /// Template path, relative to the parameter file
    #[serde(default)]
    #[garde(skip)]
    pub template_file: Option<String>,

    #[serde(default)]
    #[garde(dive)]
    pub parameters: Vec<ParameterEntry>,

    #[serde(default)]
    #[garde(skip)]
    pub capabilities: Vec<String>,

    #[serde(default, rename = "ChangeSetType")]
    #[garde(skip)]
    pub changeset_type: ChangesetType,

    #[serde(default, rename = "ChangeSetName")]
    #[garde(skip)]
    pub changeset_name: Option<String>,

    #[serde(default)]
    #[garde(skip)]
    pub description: Option<String>,

    #[serde(default, rename = "RoleARN")]
    #[garde(skip)]
    pub role_arn: Option<String>,

    #[serde(default)]
    #[garde(dive)]
    pub tags: Vec<TagEntry>,

    #[serde(default, rename = "profile")]
    #[garde(skip)]
    pub profile: String,

    #[serde(default, rename = "region")]
    #[garde(skip)]
    pub region: String,

    #[serde(default, rename = "bucket")]
    #[garde(skip)]
    pub bucket: Option<String>,
}

impl ParameterFile {
    /// Read and validate a parameter file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read parameter file: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Invalid parameter file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let file: Self = serde_json::from_str(content).context("Failed to parse JSON")?;
        file.validate()?;
        Ok(file)
    }

    /// Resolve the template source. `TemplateFile` is read relative to `base`.
    pub fn template_source(&self, base: &Path) -> Result<TemplateSource> {
        let sources = [
            self.template_body.is_some(),
            self.template_url.is_some(),
            self.template_file.is_some(),
        ];
        match sources.iter().filter(|set| **set).count() {
            0 => bail!("one of TemplateBody, TemplateURL or TemplateFile is required"),
            1 => {}
            _ => bail!("only one of TemplateBody, TemplateURL or TemplateFile may be set"),
        }

        if let Some(body) = &self.template_body {
            return Ok(TemplateSource::Body(body.clone()));
        }
        if let Some(url) = &self.template_url {
            return Ok(TemplateSource::Url(url.clone()));
        }
        let file = self.template_file.as_deref().unwrap_or_default();
        let path = base.join(file);
        let body = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read template file: {}", path.display()))?;
        Ok(TemplateSource::Body(body))
    }

    /// Build the changeset request this file describes
    pub fn into_request(self, base: &Path) -> Result<ChangesetRequest> {
        let template = self.template_source(base)?;
        let mut request = ChangesetRequest::new(self.stack_name, template);
        request.parameters = self
            .parameters
            .into_iter()
            .map(|p| Parameter {
                key: p.parameter_key,
                value: p.parameter_value,
                use_previous_value: p.use_previous_value,
            })
            .collect();
        request.capabilities = self.capabilities;
        request.changeset_type = self.changeset_type;
        request.changeset_name = self.changeset_name.filter(|n| !n.is_empty());
        request.description = self.description;
        request.role_arn = self.role_arn;
        request.tags = self
            .tags
            .into_iter()
            .map(|t| Tag {
                key: t.key,
                value: t.value,
            })
            .collect();
        request.profile = self.profile;
        request.region = self.region;
        request.staging_bucket = self.bucket.filter(|b| !b.is_empty());
        Ok(request)
    }
}
