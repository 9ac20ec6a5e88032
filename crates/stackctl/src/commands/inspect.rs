//! `inspect`: one stack's summary, pending changes, parameters and outputs

use std::io::Write;

use anyhow::{Context, Result};
use serde::Serialize;

use super::status::{StatusRow, write_rows};
use super::{CommandContext, HumanReadable, KeyValue, display, write_key_values};
use crate::engine::StackStatusReport;

#[derive(Debug, Clone, Serialize)]
pub struct InspectModel {
    #[serde(flatten)]
    pub summary: StatusRow,
    pub parameters: Vec<KeyValue>,
    pub outputs: Vec<KeyValue>,
    /// Resource id mapped to the action the changeset would take
    pub changes: Vec<KeyValue>,
}

impl InspectModel {
    pub fn from_report(template: &str, file_name: String, report: &StackStatusReport) -> Self {
        let outputs = report
            .snapshot
            .outputs
            .iter()
            .map(|o| KeyValue {
                key: o.key.clone(),
                value: o.value.clone(),
            })
            .collect();

        let (parameters, changes) = match &report.changeset {
            Some(cs) => (
                cs.parameters
                    .iter()
                    .map(|p| KeyValue {
                        key: p.key.clone(),
                        value: p.value.clone(),
                    })
                    .collect(),
                cs.changes
                    .iter()
                    .map(|c| KeyValue {
                        key: c.display_id().to_string(),
                        value: c.action.clone(),
                    })
                    .collect(),
            ),
            None => (Vec::new(), Vec::new()),
        };

        Self {
            summary: StatusRow::from_report(template, file_name, report),
            parameters,
            outputs,
            changes,
        }
    }
}

impl HumanReadable for InspectModel {
    fn write_human(&self, out: &mut dyn Write) -> Result<()> {
        writeln!(out, "Stack summary")?;
        write_rows(out, std::slice::from_ref(&self.summary))?;
        write_key_values(out, "Parameters", &self.parameters)?;
        write_key_values(out, "Outputs", &self.outputs)?;
        write_key_values(out, "Changes", &self.changes)?;
        Ok(())
    }
}

pub async fn run(ctx: &CommandContext, template: &str, params: &str, out: &mut dyn Write) -> Result<()> {
    ctx.finder.validate_parameters(template, params)?;
    let model = inspect(ctx, template, params).await?;
    display(out, ctx.config.json(), &model)
}

pub async fn inspect(ctx: &CommandContext, template: &str, params: &str) -> Result<InspectModel> {
    let request = ctx.load_request(template, params)?;
    let report = ctx
        .engine
        .inspect_status(&request, &ctx.cancel)
        .await
        .with_context(|| format!("unable to inspect stack {}", request.stack_name))?;
    let file_name = ctx
        .finder
        .parameter_path(template, params)
        .display()
        .to_string();
    Ok(InspectModel::from_report(template, file_name, &report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunConfig;
    use crate::model::ResourceChange;
    use crate::templates::TemplateError;
    use crate::testing::FakeCloud;
    use stackctl_test_utils::TemplateDir;

    fn context(cloud: &FakeCloud, dir: &TemplateDir, json: bool) -> CommandContext {
        let mut config = RunConfig {
            template_dir: dir.path().to_path_buf(),
            ..RunConfig::default()
        };
        config.output.json = json;
        CommandContext::new(cloud.engine(), config)
    }

    fn change(action: &str, logical: &str, physical: Option<&str>) -> ResourceChange {
        ResourceChange {
            action: action.into(),
            logical_resource_id: logical.into(),
            physical_resource_id: physical.map(String::from),
            resource_type: Some("AWS::SNS::Topic".into()),
            replacement: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn changes_are_keyed_by_resource() {
        let cloud = FakeCloud::new();
        cloud.put_stack("web-prod", "UPDATE_COMPLETE");
        cloud.next_changeset_changes(vec![
            change("Modify", "Topic", Some("arn:aws:sns:us-east-1:123456789012:topic")),
            change("Add", "Queue", None),
        ]);
        let dir = TemplateDir::new().unwrap();
        dir.add_stack("web", "prod", "web-prod").unwrap();
        let ctx = context(&cloud, &dir, false);

        let model = inspect(&ctx, "web", "prod").await.unwrap();
        assert_eq!(model.summary.pending_changes, Some(2));
        assert_eq!(
            model.changes,
            vec![
                KeyValue {
                    key: "arn:aws:sns:us-east-1:123456789012:topic".into(),
                    value: "Modify".into(),
                },
                KeyValue {
                    key: "Queue".into(),
                    value: "Add".into(),
                },
            ]
        );
        assert!(model.outputs.is_empty());

        let mut out = Vec::new();
        model.write_human(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("Stack summary\n"));
        assert!(text.contains("Outputs\n<NONE>\n"));
        assert!(text.contains("Queue"));
    }

    #[tokio::test(start_paused = true)]
    async fn json_flattens_the_summary() {
        let cloud = FakeCloud::new();
        let dir = TemplateDir::new().unwrap();
        dir.add_stack("web", "prod", "web-prod").unwrap();
        let ctx = context(&cloud, &dir, true);

        let mut out = Vec::new();
        run(&ctx, "web", "prod", &mut out).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(parsed["stack_name"], "web-prod");
        assert_eq!(parsed["stack_status"], "--DOES NOT EXIST--");
        assert!(parsed["changes"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_parameters_list_valid_choices() {
        let cloud = FakeCloud::new();
        let dir = TemplateDir::new().unwrap();
        dir.add_stack("web", "prod", "web-prod").unwrap();
        dir.add_stack("web", "dev", "web-dev").unwrap();
        let ctx = context(&cloud, &dir, false);

        let err = run(&ctx, "web", "staging", &mut Vec::new()).await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<TemplateError>(),
            Some(&TemplateError::UnknownParameters {
                template: "web".into(),
                name: "staging".into(),
                valid: vec!["dev".into(), "prod".into()],
            })
        );
        assert!(err.to_string().contains("valid parameter files: dev, prod"));
    }
}
