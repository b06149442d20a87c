//! Generated bindings for the CRI `runtime.v1` API.
//!
//! Every message derives serde with camelCase keys so the output layer can
//! render responses directly. Enum-typed fields go through [`enum_names`] and
//! serialize as their proto names (`CONTAINER_RUNNING`) rather than numbers.

pub mod v1 {
    tonic::include_proto!("runtime.v1");
}

pub use v1::*;

pub mod enum_names {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    trait ProtoEnum: Sized + Into<i32> + TryFrom<i32> {
        fn name(&self) -> &'static str;
        fn parse(name: &str) -> Option<Self>;
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(i32),
        Name(String),
    }

    fn serialize_enum<E: ProtoEnum, S: Serializer>(
        value: i32,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match E::try_from(value) {
            Ok(known) => serializer.serialize_str(known.name()),
            // Unknown values from newer runtimes still round-trip.
            Err(_) => serializer.serialize_i32(value),
        }
    }

    fn deserialize_enum<'de, E: ProtoEnum, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<i32, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Number(value) => Ok(value),
            Raw::Name(name) => E::parse(&name)
                .map(Into::into)
                .ok_or_else(|| D::Error::custom(format!("unknown enum value {name:?}"))),
        }
    }

    macro_rules! proto_enums {
        ($($module:ident => $ty:ident),* $(,)?) => {$(
            impl ProtoEnum for super::v1::$ty {
                fn name(&self) -> &'static str {
                    self.as_str_name()
                }

                fn parse(name: &str) -> Option<Self> {
                    Self::from_str_name(name)
                }
            }

            pub mod $module {
                use serde::{Deserializer, Serializer};

                pub fn serialize<S: Serializer>(value: &i32, serializer: S) -> Result<S::Ok, S::Error> {
                    super::serialize_enum::<super::super::v1::$ty, S>(*value, serializer)
                }

                pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i32, D::Error> {
                    super::deserialize_enum::<super::super::v1::$ty, D>(deserializer)
                }
            }
        )*};
    }

    proto_enums! {
        protocol => Protocol,
        mount_propagation => MountPropagation,
        namespace_mode => NamespaceMode,
        pod_sandbox_state => PodSandboxState,
        container_state => ContainerState,
        container_event_type => ContainerEventType,
    }
}

/// Proto name of a container state, or the raw number when unknown.
pub fn container_state_name(value: i32) -> String {
    ContainerState::try_from(value)
        .map(|state| state.as_str_name().to_string())
        .unwrap_or_else(|_| value.to_string())
}

/// Proto name of a sandbox state, or the raw number when unknown.
pub fn pod_sandbox_state_name(value: i32) -> String {
    PodSandboxState::try_from(value)
        .map(|state| state.as_str_name().to_string())
        .unwrap_or_else(|_| value.to_string())
}

/// Proto name of a container event type, or the raw number when unknown.
pub fn event_type_name(value: i32) -> String {
    ContainerEventType::try_from(value)
        .map(|kind| kind.as_str_name().to_string())
        .unwrap_or_else(|_| value.to_string())
}
