//! Rendering of runtime objects as tables, JSON, YAML or Go templates.
//!
//! JSON and YAML go through [`serde_json::Value`], whose maps are ordered,
//! so repeated renders of the same object are byte-identical.
pub mod table;
pub mod template;

use serde::Serialize;

use crate::errors::{CliError, CliResult};
pub use table::Table;
pub use template::GoTemplate;

/// Output format chosen by `--output` / `--template`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    Yaml,
    GoTemplate(GoTemplate),
}

impl OutputFormat {
    /// Validates the flag pair. `default` applies when `--output` is absent;
    /// verbs without a table view pass `allow_table = false`.
    pub fn from_flags(
        output: Option<&str>,
        template: Option<&str>,
        default: &str,
        allow_table: bool,
    ) -> CliResult<Self> {
        let format = output.filter(|o| !o.is_empty()).unwrap_or(default);
        let template = template.filter(|t| !t.is_empty());

        let is_known = matches!(format, "json" | "yaml" | "go-template")
            || (format == "table" && allow_table);
        if !is_known {
            return Err(CliError::UnsupportedFormat(format.to_string()));
        }
        if template.is_some() && format != "go-template" {
            return Err(CliError::FlagConflict(format!(
                "template can't be used with {format:?} format"
            )));
        }

        match format {
            "table" => Ok(OutputFormat::Table),
            "json" => Ok(OutputFormat::Json),
            "yaml" => Ok(OutputFormat::Yaml),
            _ => GoTemplate::parse(template.unwrap_or_default()).map(OutputFormat::GoTemplate),
        }
    }

    pub fn is_table(&self) -> bool {
        matches!(self, OutputFormat::Table)
    }
}

/// Renders `value` in `format`. `table` builds the table view and is only
/// invoked for [`OutputFormat::Table`].
pub fn render<T, F>(value: &T, format: &OutputFormat, table: F) -> CliResult<String>
where
    T: Serialize + ?Sized,
    F: FnOnce() -> CliResult<Table>,
{
    match format {
        OutputFormat::Table => table()?.render(),
        OutputFormat::Json => render_json(value),
        OutputFormat::Yaml => Ok(serde_yaml::to_string(&serde_json::to_value(value)?)?),
        OutputFormat::GoTemplate(template) => {
            let mut out = template.render(&serde_json::to_value(value)?)?;
            if !out.ends_with('\n') {
                out.push('\n');
            }
            Ok(out)
        }
    }
}

/// Pretty JSON with two-space indent and sorted keys, newline terminated.
pub fn render_json<T: Serialize + ?Sized>(value: &T) -> CliResult<String> {
    let mut out = serde_json::to_string_pretty(&serde_json::to_value(value)?)?;
    out.push('\n');
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cri::{Container, ContainerMetadata, ContainerState, ListContainersResponse};
    use std::collections::HashMap;

    fn sample() -> ListContainersResponse {
        ListContainersResponse {
            containers: vec![Container {
                id: "1f2e3d".into(),
                pod_sandbox_id: "9a8b7c".into(),
                metadata: Some(ContainerMetadata {
                    name: "web".into(),
                    attempt: 0,
                }),
                state: ContainerState::ContainerRunning as i32,
                created_at: 1_700_000_000_000_000_000,
                labels: HashMap::from([
                    ("zeta".to_string(), "1".to_string()),
                    ("alpha".to_string(), "2".to_string()),
                ]),
                ..Default::default()
            }],
        }
    }

    #[test]
    fn unsupported_format_is_rejected() {
        let err = OutputFormat::from_flags(Some("ini"), None, "json", true).unwrap_err();
        assert_eq!(err.to_string(), "don't support \"ini\" format");
    }

    #[test]
    fn template_requires_go_template_format() {
        let err =
            OutputFormat::from_flags(None, Some("{{.containerID}}"), "json", true).unwrap_err();
        assert!(matches!(err, CliError::FlagConflict(_)));
        assert_eq!(err.to_string(), "template can't be used with \"json\" format");
    }

    #[test]
    fn go_template_needs_a_parsable_template() {
        assert!(matches!(
            OutputFormat::from_flags(Some("go-template"), None, "json", true),
            Err(CliError::TemplateParse(_))
        ));
        assert!(matches!(
            OutputFormat::from_flags(Some("go-template"), Some("{{.id}}"), "json", true),
            Ok(OutputFormat::GoTemplate(_))
        ));
    }

    #[test]
    fn table_is_refused_where_not_offered() {
        assert!(matches!(
            OutputFormat::from_flags(Some("table"), None, "json", false),
            Err(CliError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn json_output_is_stable_and_sorted() {
        let response = sample();
        let first = render_json(&response).unwrap();
        let second = render_json(&response).unwrap();
        assert_eq!(first, second);
        assert!(first.find("\"alpha\"").unwrap() < first.find("\"zeta\"").unwrap());
        assert!(first.contains("  \"containers\": ["));
        assert!(first.contains("\"state\": \"CONTAINER_RUNNING\""));
    }

    #[test]
    fn json_survives_a_parse_and_render_cycle() {
        let rendered = render_json(&sample()).unwrap();
        let parsed: ListContainersResponse = serde_json::from_str(&rendered).unwrap();
        assert_eq!(parsed, sample());
        assert_eq!(render_json(&parsed).unwrap(), rendered);
    }

    #[test]
    fn yaml_uses_the_same_document() {
        let yaml = render(&sample(), &OutputFormat::Yaml, || unreachable!()).unwrap();
        assert!(yaml.contains("podSandboxId: 9a8b7c"));
        assert!(!yaml.contains('&'));
    }

    #[test]
    fn yaml_survives_a_parse_and_render_cycle() {
        let rendered = render(&sample(), &OutputFormat::Yaml, || unreachable!()).unwrap();
        let parsed: ListContainersResponse = serde_yaml::from_str(&rendered).unwrap();
        assert_eq!(parsed, sample());
        let again = render(&parsed, &OutputFormat::Yaml, || unreachable!()).unwrap();
        assert_eq!(again, rendered);
    }

    #[test]
    fn template_output_is_newline_terminated() {
        let format = OutputFormat::from_flags(
            Some("go-template"),
            Some("{{range .containers}}{{.id}}{{end}}"),
            "json",
            true,
        )
        .unwrap();
        let out = render(&sample(), &format, || unreachable!()).unwrap();
        assert_eq!(out, "1f2e3d\n");
    }
}
