use std::fmt;

use gtmpl::{Context, Template, Value};

use crate::errors::{CliError, CliResult};

/// A validated Go `text/template`. The source is parsed once up front so
/// syntax errors surface before any call is made.
#[derive(Clone, PartialEq, Eq)]
pub struct GoTemplate {
    source: String,
}

impl GoTemplate {
    pub fn parse(source: &str) -> CliResult<Self> {
        if source.trim().is_empty() {
            return Err(CliError::TemplateParse("template is empty".into()));
        }
        compile(source)?;
        Ok(Self {
            source: source.to_string(),
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn render(&self, data: &serde_json::Value) -> CliResult<String> {
        let template = compile(&self.source)?;
        template
            .render(&Context::from(to_template_value(data)))
            .map_err(|err| CliError::InvalidArgument(format!("failed to execute template: {err}")))
    }
}

impl fmt::Debug for GoTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("GoTemplate").field(&self.source).finish()
    }
}

fn compile(source: &str) -> CliResult<Template> {
    let mut template = Template::default();
    template
        .parse(source)
        .map_err(|err| CliError::TemplateParse(err.to_string()))?;
    Ok(template)
}

fn to_template_value(value: &serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Nil,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::from(i)
            } else if let Some(u) = n.as_u64() {
                Value::from(u)
            } else {
                Value::from(n.as_f64().unwrap_or_default())
            }
        }
        serde_json::Value::String(s) => Value::String(s.clone()),
        serde_json::Value::Array(items) => {
            Value::Array(items.iter().map(to_template_value).collect())
        }
        serde_json::Value::Object(map) => Value::Map(
            map.iter()
                .map(|(key, value)| (key.clone(), to_template_value(value)))
                .collect(),
        ),
    }
}
