//! Per-type configuration blobs.
//!
//! A resource carries its configuration as opaque bytes. The bytes only gain
//! meaning once the resource's effective type is known, so decoding is
//! keyed on [`ResourceType`].

use serde::{Deserialize, Serialize};

use crate::core::{RouterError, RouterResult};

use super::ResourceType;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AreaType {
    #[default]
    System,
    User,
}

/// Configuration of an authenticator resource.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigureAuth {
    pub area: AreaType,
    /// "QA" or "PROD" for the system area, a user name for the user area.
    pub environment: String,
}

/// Configuration of a URL resource.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigureUrl {
    /// Client visible path, relative to the login bundle prefix.
    pub map_to: String,
    /// Free form configuration handed to the handler.
    #[serde(default)]
    pub config: String,
}

impl ConfigureAuth {
    pub fn encode(&self) -> RouterResult<Vec<u8>> {
        encode(self)
    }

    pub fn decode(data: &[u8]) -> RouterResult<Self> {
        decode(data)
    }
}

impl ConfigureUrl {
    pub fn encode(&self) -> RouterResult<Vec<u8>> {
        encode(self)
    }

    pub fn decode(data: &[u8]) -> RouterResult<Self> {
        decode(data)
    }
}

/// Decoded configuration, one variant per configuration kind.
#[derive(Clone, Debug, PartialEq)]
pub enum ResourceConfig {
    Empty,
    Auth(ConfigureAuth),
    Url(ConfigureUrl),
    /// Types the router does not interpret keep their bytes.
    Opaque(Vec<u8>),
}

impl ResourceConfig {
    pub fn decode(kind: ResourceType, data: &[u8]) -> RouterResult<Self> {
        match kind {
            ResourceType::Auth => ConfigureAuth::decode(data).map(ResourceConfig::Auth),
            ResourceType::Url => ConfigureUrl::decode(data).map(ResourceConfig::Url),
            _ if data.is_empty() => Ok(ResourceConfig::Empty),
            _ => Ok(ResourceConfig::Opaque(data.to_vec())),
        }
    }
}

fn encode<T: Serialize>(value: &T) -> RouterResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| RouterError::Configuration(e.to_string()))
}

fn decode<T: for<'de> Deserialize<'de>>(data: &[u8]) -> RouterResult<T> {
    if data.is_empty() {
        return Err(RouterError::Configuration("empty configuration".to_string()));
    }
    serde_json::from_slice(data).map_err(|e| RouterError::Configuration(e.to_string()))
}

/// Serde adapter carrying byte payloads as base64 strings.
pub mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
