//! Function registry shared by the dispatcher and the control plane.
//!
//! Maps a function name to the endpoint addresses of its currently active
//! execution units. Every dispatch reads it; only control-plane messages
//! (driven by the orchestrator) write it.

pub mod endpoint;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

pub use endpoint::{function_url, health_url};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("function {0} not found")]
    NotFound(String),
    #[error("no endpoints given for function {0}")]
    NoEndpoints(String),
    #[error("invalid function name {0:?}: only alphanumeric characters are allowed")]
    InvalidName(String),
}

/// Endpoint list of one function version. Shared with readers so a lookup
/// is a reference-count bump instead of a copy.
pub type Endpoints = Arc<[String]>;

#[derive(Debug, Default)]
pub struct FunctionRegistry {
    functions: RwLock<HashMap<String, Endpoints>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a function or replace the endpoint list of an existing one.
    ///
    /// Readers observe either the previous list or the new one, never a mix.
    pub fn upsert(&self, name: &str, endpoints: Vec<String>) -> Result<(), RegistryError> {
        if !is_valid_function_name(name) {
            return Err(RegistryError::InvalidName(name.to_string()));
        }
        if endpoints.is_empty() {
            return Err(RegistryError::NoEndpoints(name.to_string()));
        }

        let endpoints: Endpoints = endpoints.into();
        let previous = self
            .functions
            .write()
            .insert(name.to_string(), Arc::clone(&endpoints));

        match previous {
            Some(old) => tracing::info!(
                function = name,
                old = ?old,
                new = ?endpoints,
                "replaced function endpoints"
            ),
            None => tracing::info!(function = name, endpoints = ?endpoints, "added function"),
        }
        Ok(())
    }

    pub fn remove(&self, name: &str) -> Result<Endpoints, RegistryError> {
        let removed = self.functions.write().remove(name);
        match removed {
            Some(endpoints) => {
                tracing::info!(function = name, "removed function");
                Ok(endpoints)
            }
            None => Err(RegistryError::NotFound(name.to_string())),
        }
    }

    pub fn lookup(&self, name: &str) -> Result<Endpoints, RegistryError> {
        self.functions
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.read().contains_key(name)
    }

    /// Registered function names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.functions.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.functions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.read().is_empty()
    }
}

/// Function names are restricted to ASCII letters and digits.
pub fn is_valid_function_name(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|byte| byte.is_ascii_alphanumeric())
}
