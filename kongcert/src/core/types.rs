//! Shared types for the gateway mirror and admin API request bodies.
//!
//! These types mirror the JSON shapes of the Kong admin API. They carry no
//! behavior beyond (de)serialization so core logic and adapters can share them.

use std::collections::BTreeSet;

use serde::{Deserialize, Deserializer, Serialize};

/// Plain-text HTTP protocol name as used in route `protocols`.
pub const PROTOCOL_HTTP: &str = "http";
/// TLS protocol name as used in route `protocols`.
pub const PROTOCOL_HTTPS: &str = "https";

/// A certificate stored at the gateway, with the SNIs that reference it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    pub id: String,
    pub cert: String,
    pub key: String,
    /// SNI hostnames bound to this certificate (unique, order irrelevant).
    #[serde(default, deserialize_with = "null_as_default")]
    pub snis: BTreeSet<String>,
}

impl Certificate {
    /// True if `cert` and `key` match this certificate byte-for-byte.
    pub fn has_material(&self, cert: &str, key: &str) -> bool {
        self.cert == cert && self.key == key
    }

    /// Material needed to recreate this certificate.
    pub fn data(&self) -> CertificateData {
        CertificateData::new(&self.cert, &self.key)
    }
}

/// A gateway route. An empty `hosts` list matches every host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub hosts: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub protocols: Vec<String>,
}

impl Route {
    pub fn accepts_http(&self) -> bool {
        self.protocols.iter().any(|p| p == PROTOCOL_HTTP)
    }
}

/// Certificate material sent to the admin API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateData {
    pub cert: String,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snis: Option<Vec<String>>,
}

impl CertificateData {
    pub fn new(cert: &str, key: &str) -> Self {
        Self {
            cert: cert.to_string(),
            key: key.to_string(),
            snis: None,
        }
    }
}

/// Reference to another gateway entity by id (`{"id": "..."}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    pub id: String,
}

impl EntityRef {
    pub fn new(id: &str) -> Self {
        Self { id: id.to_string() }
    }
}

/// Body of a service upsert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceData {
    pub name: String,
    pub url: String,
}

/// Body of a plugin upsert. Only `request-termination` is used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginData {
    pub service: EntityRef,
    pub name: String,
    pub config: RequestTerminationConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestTerminationConfig {
    pub status_code: u16,
    pub content_type: String,
    pub body: String,
}

/// Body of a route upsert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteData {
    pub service: EntityRef,
    pub paths: Vec<String>,
    pub hosts: Vec<String>,
    pub protocols: Vec<String>,
}

/// Kong serializes empty collections as `null`; read those as empty.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
