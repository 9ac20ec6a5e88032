//! Template directory discovery and parameter file loading against a real
//! filesystem layout

use stackctl::model::{ChangesetType, TemplateSource};
use stackctl::templates::{TemplateError, TemplateFinder};
use stackctl_test_utils::{MINIMAL_TEMPLATE, TemplateDir};

fn layout() -> TemplateDir {
    let dir = TemplateDir::new().unwrap();
    dir.add_stack("web", "prod", "web-prod").unwrap();
    dir.add_stack("web", "dev", "web-dev").unwrap();
    dir.add_stack("api", "prod", "api-prod").unwrap();
    // Not parameter files
    dir.add_file("web", "README.md", "docs").unwrap();
    dir.add_file("web", "template.yaml", MINIMAL_TEMPLATE).unwrap();
    dir
}

#[test]
fn lists_templates_and_parameters_sorted() {
    let dir = layout();
    std::fs::write(dir.path().join("stray.json"), "{}").unwrap();
    let finder = TemplateFinder::new(dir.path());

    assert_eq!(finder.list_templates().unwrap(), ["api", "web"]);
    assert_eq!(finder.list_parameters("web").unwrap(), ["dev", "prod"]);
    assert_eq!(
        finder.pairs().unwrap(),
        [
            ("api".to_string(), "prod".to_string()),
            ("web".to_string(), "dev".to_string()),
            ("web".to_string(), "prod".to_string()),
        ]
    );
}

#[test]
fn validation_lists_valid_choices() {
    let dir = layout();
    let finder = TemplateFinder::new(dir.path());

    finder.validate_parameters("web", "prod").unwrap();

    let err = finder.validate_template("db").unwrap_err();
    assert_eq!(
        err.downcast_ref::<TemplateError>(),
        Some(&TemplateError::UnknownTemplate {
            name: "db".into(),
            valid: vec!["api".into(), "web".into()],
        })
    );
    assert_eq!(
        err.to_string(),
        "invalid template: db (valid templates: api, web)"
    );

    // An unknown template is reported before its parameters
    let err = finder.validate_parameters("db", "prod").unwrap_err();
    assert!(matches!(
        err.downcast_ref::<TemplateError>(),
        Some(TemplateError::UnknownTemplate { .. })
    ));
}

#[test]
fn missing_base_directory_is_an_error() {
    let dir = TemplateDir::new().unwrap();
    let finder = TemplateFinder::new(dir.path().join("missing"));
    let err = finder.list_templates().unwrap_err();
    assert!(err.to_string().contains("Failed to read template directory"));
}

#[test]
fn template_file_is_read_relative_to_parameter_file() {
    let dir = layout();
    dir.add_parameter_file(
        "web",
        "staging",
        &serde_json::json!({
            "StackName": "web-staging",
            "TemplateFile": "template.yaml",
            "ChangeSetType": "CREATE",
            "Parameters": [{"ParameterKey": "Env", "ParameterValue": "staging"}],
            "Tags": [{"Key": "team", "Value": "web"}],
            "region": "us-west-2",
        }),
    )
    .unwrap();
    let finder = TemplateFinder::new(dir.path());

    let request = finder.load("web", "staging").unwrap();
    assert_eq!(request.stack_name, "web-staging");
    assert_eq!(request.template, TemplateSource::Body(MINIMAL_TEMPLATE.into()));
    assert_eq!(request.changeset_type, ChangesetType::Create);
    assert_eq!(request.parameters[0].key, "Env");
    assert_eq!(request.tags[0].value, "web");
    assert_eq!(request.region, "us-west-2");
    assert!(request.profile.is_empty());
}

#[test]
fn invalid_parameter_files_name_the_path() {
    let dir = layout();
    dir.add_parameter_file("web", "nameless", &serde_json::json!({"TemplateBody": "{}"}))
        .unwrap();
    dir.add_parameter_file(
        "web",
        "dangling",
        &serde_json::json!({"StackName": "web-dangling", "TemplateFile": "missing.yaml"}),
    )
    .unwrap();
    let finder = TemplateFinder::new(dir.path());

    let err = finder.load("web", "nameless").unwrap_err();
    assert!(format!("{err:#}").contains("nameless.json"));

    let err = finder.load("web", "dangling").unwrap_err();
    let message = format!("{err:#}");
    assert!(message.contains("dangling.json"), "{message}");
    assert!(message.contains("missing.yaml"), "{message}");
}
