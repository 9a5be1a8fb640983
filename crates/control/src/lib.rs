//! Control-plane channel between the manager and rproxy processes.
//!
//! A message names one function and carries its full endpoint list: a
//! non-empty list adds or replaces the function, an empty list deletes it.
//! Only control facts travel here, never function payloads.

pub mod client;
pub mod server;

use registry::{FunctionRegistry, RegistryError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use client::{ControlPlane, HttpControlClient, LocalControlPlane};
pub use server::{control_router, serve_control};

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlMessage {
    #[serde(default = "default_version")]
    pub version: u32,
    pub name: String,
    #[serde(default)]
    pub ips: Vec<String>,
}

fn default_version() -> u32 {
    SCHEMA_VERSION
}

impl ControlMessage {
    pub fn upsert(name: impl Into<String>, ips: Vec<String>) -> Self {
        Self {
            version: SCHEMA_VERSION,
            name: name.into(),
            ips,
        }
    }

    pub fn delete(name: impl Into<String>) -> Self {
        Self::upsert(name, Vec::new())
    }

    pub fn is_delete(&self) -> bool {
        self.ips.is_empty()
    }
}

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("unsupported control message version {0}")]
    UnsupportedVersion(u32),
    #[error("malformed control message: {0}")]
    Malformed(String),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("control plane unreachable: {0}")]
    Unreachable(String),
    #[error("control plane rejected message ({status}): {body}")]
    Rejected { status: u16, body: String },
}

impl ControlError {
    /// HTTP status the receiving side answers with.
    pub fn status(&self) -> u16 {
        match self {
            ControlError::Registry(RegistryError::NotFound(_)) => 404,
            ControlError::UnsupportedVersion(_)
            | ControlError::Malformed(_)
            | ControlError::Registry(_) => 400,
            ControlError::Rejected { status, .. } => *status,
            ControlError::Unreachable(_) => 502,
        }
    }
}

/// Apply one message to the registry. A leading `/` in the name is ignored.
pub fn apply(registry: &FunctionRegistry, message: &ControlMessage) -> Result<(), ControlError> {
    if message.version != SCHEMA_VERSION {
        return Err(ControlError::UnsupportedVersion(message.version));
    }
    let name = message.name.strip_prefix('/').unwrap_or(&message.name);
    if message.is_delete() {
        registry.remove(name)?;
    } else {
        registry.upsert(name, message.ips.clone())?;
    }
    Ok(())
}
