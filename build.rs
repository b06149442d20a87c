const PROTO: &str = "proto/api.proto";

/// Enum-typed fields rendered by their proto names instead of raw numbers.
const ENUM_FIELDS: &[(&str, &str)] = &[
    (".runtime.v1.PortMapping.protocol", "protocol"),
    (".runtime.v1.Mount.propagation", "mount_propagation"),
    (".runtime.v1.NamespaceOption.network", "namespace_mode"),
    (".runtime.v1.NamespaceOption.pid", "namespace_mode"),
    (".runtime.v1.NamespaceOption.ipc", "namespace_mode"),
    (".runtime.v1.PodSandbox.state", "pod_sandbox_state"),
    (".runtime.v1.PodSandboxStatus.state", "pod_sandbox_state"),
    (".runtime.v1.PodSandboxStateValue.state", "pod_sandbox_state"),
    (".runtime.v1.Container.state", "container_state"),
    (".runtime.v1.ContainerStatus.state", "container_state"),
    (".runtime.v1.ContainerStateValue.state", "container_state"),
    (
        ".runtime.v1.ContainerEventResponse.container_event_type",
        "container_event_type",
    ),
];

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed={PROTO}");

    let mut builder = tonic_build::configure()
        .build_client(true)
        .build_server(true)
        .message_attribute(
            ".",
            "#[derive(serde::Serialize, serde::Deserialize)] #[serde(default, rename_all = \"camelCase\")]",
        );

    for (path, module) in ENUM_FIELDS {
        builder = builder.field_attribute(
            path,
            format!("#[serde(with = \"crate::cri::enum_names::{module}\")]"),
        );
    }

    builder.compile_protos(&[PROTO], &["proto"])?;
    Ok(())
}
