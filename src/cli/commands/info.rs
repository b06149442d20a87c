// version and info

use std::collections::HashMap;

use serde_json::{Map, Value};

use super::common::{emit, no_table};
use crate::cli::{OutputArgs, Session};
use crate::errors::CliResult;
use crate::output::{render, OutputFormat};

/// Print the runtime and API versions.
pub async fn handle_version(session: &Session) -> CliResult<u8> {
    let client = session.client().await?;
    let version = client.version().await?;

    emit(&format!(
        "Version:  {}\nRuntimeName:  {}\nRuntimeVersion:  {}\nRuntimeApiVersion:  {}\n",
        version.version, version.runtime_name, version.runtime_version, version.runtime_api_version
    ))?;
    Ok(0)
}

/// Print runtime conditions plus the runtime's verbose info.
pub async fn handle_info(session: &Session, output: &OutputArgs) -> CliResult<u8> {
    let format = OutputFormat::from_flags(
        output.output.as_deref(),
        output.template.as_deref(),
        "json",
        false,
    )?;

    let client = session.client().await?;
    let response = client.status(true).await?;

    let mut document = expand_info(&response.info);
    document.insert("status".to_string(), serde_json::to_value(&response.status)?);
    emit(&render(&Value::Object(document), &format, no_table)?)?;
    Ok(0)
}

/// Verbose info values are JSON documents encoded as strings; inline them.
pub fn expand_info(info: &HashMap<String, String>) -> Map<String, Value> {
    info.iter()
        .map(|(key, raw)| {
            let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone()));
            (key.clone(), value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_values_are_inlined_when_json() {
        let info = HashMap::from([
            ("config".to_string(), r#"{"cgroup":"systemd"}"#.to_string()),
            ("note".to_string(), "plain text".to_string()),
        ]);
        let expanded = expand_info(&info);
        assert_eq!(expanded["config"]["cgroup"], "systemd");
        assert_eq!(expanded["note"], "plain text");
    }
}
