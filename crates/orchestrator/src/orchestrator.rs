use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use control::{ControlMessage, ControlPlane};
use registry::is_valid_function_name;
use tokio::sync::Mutex;

use crate::backend::{Backend, DeploymentHandle};
use crate::error::{OrchestratorError, Stage};
use crate::health::{HealthPolicy, wait_until_healthy};
use crate::package::{PackageSource, stage};

#[derive(Debug, Clone)]
pub struct DeployRequest {
    pub name: String,
    /// Runtime environment (`python3`, `nodejs`, ...).
    pub env: String,
    pub threads: usize,
    pub source: PackageSource,
    /// Folder inside the package holding the function source.
    pub subpath: Option<String>,
    pub env_vars: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub staging_dir: PathBuf,
    pub health: HealthPolicy,
    /// Upper bound for downloading a package from a URL.
    pub fetch_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            staging_dir: PathBuf::from("./tmp"),
            health: HealthPolicy::default(),
            fetch_timeout: Duration::from_secs(60),
        }
    }
}

/// Owns the active deployment of every function and drives deploy, delete
/// and wipe. One mutex serializes all of them.
pub struct Orchestrator {
    backend: Arc<dyn Backend>,
    control: Arc<dyn ControlPlane>,
    client: reqwest::Client,
    config: OrchestratorConfig,
    deployments: Mutex<HashMap<String, Box<dyn DeploymentHandle>>>,
}

impl Orchestrator {
    pub fn new(
        backend: Arc<dyn Backend>,
        control: Arc<dyn ControlPlane>,
        config: OrchestratorConfig,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.fetch_timeout)
            .build()
            .unwrap_or_else(|err| {
                tracing::warn!("falling back to default HTTP client: {}", err);
                reqwest::Client::new()
            });
        Self {
            backend,
            control,
            client,
            config,
            deployments: Mutex::new(HashMap::new()),
        }
    }

    /// Deploy a new version of a function and return its endpoints.
    ///
    /// The previous version keeps serving until the new units are healthy
    /// and the control plane acknowledged the swap; only then is it retired.
    pub async fn deploy(&self, request: DeployRequest) -> Result<Vec<String>, OrchestratorError> {
        let name = request.name.as_str();
        validate(&request)?;

        // staged before taking the lock; removed from disk on every path out
        // of this function
        let staged = stage(
            &self.client,
            &request.source,
            &self.config.staging_dir,
            request.subpath.as_deref(),
        )
        .await
        .map_err(|source| OrchestratorError::Package {
            name: name.to_string(),
            source,
        })?;

        let mut deployments = self.deployments.lock().await;
        tracing::info!(
            function = name,
            env = %request.env,
            threads = request.threads,
            redeploy = deployments.contains_key(name),
            "deploying function"
        );

        let mut handle = self
            .backend
            .create(
                name,
                &request.env,
                request.threads,
                staged.root(),
                &request.env_vars,
            )
            .await
            .map_err(|err| OrchestratorError::backend(name, Stage::Create, err))?;

        if let Err(err) = handle.start().await {
            discard(name, handle).await;
            return Err(OrchestratorError::backend(name, Stage::Start, err));
        }

        let ips = handle.ips();
        if let Err(endpoint) = wait_until_healthy(&self.client, &ips, &self.config.health).await {
            let logs = handle
                .logs()
                .await
                .unwrap_or_else(|err| format!("logs unavailable: {:#}", err));
            discard(name, handle).await;
            return Err(OrchestratorError::HealthCheckTimeout {
                name: name.to_string(),
                endpoint,
                attempts: self.config.health.attempts,
                logs,
            });
        }

        if let Err(source) = self
            .control
            .send(&ControlMessage::upsert(name, ips.clone()))
            .await
        {
            // units stay up but unreachable; they need manual cleanup
            tracing::error!(function = name, endpoints = ?ips, "control plane rejected swap: {}", source);
            return Err(OrchestratorError::ControlPlane {
                name: name.to_string(),
                source,
            });
        }

        if let Some(previous) = deployments.insert(name.to_string(), handle) {
            if let Err(err) = previous.destroy().await {
                tracing::warn!(function = name, "retiring previous version failed: {:#}", err);
            }
        }
        tracing::info!(function = name, endpoints = ?ips, "function deployed");
        Ok(ips)
    }

    /// Remove the function from the registry, then destroy its units. Both
    /// steps run even if the first fails; the first error is returned.
    pub async fn delete(&self, name: &str) -> Result<(), OrchestratorError> {
        let mut deployments = self.deployments.lock().await;
        let handle = deployments
            .remove(name)
            .ok_or_else(|| OrchestratorError::NotFound(name.to_string()))?;
        self.teardown(name, handle).await
    }

    /// Delete every function, continuing past failures.
    pub async fn wipe_all(&self) -> Result<(), OrchestratorError> {
        let mut deployments = self.deployments.lock().await;
        let mut names: Vec<String> = deployments.keys().cloned().collect();
        names.sort();

        let mut errors = Vec::new();
        for name in names {
            let Some(handle) = deployments.remove(&name) else {
                continue;
            };
            if let Err(err) = self.teardown(&name, handle).await {
                tracing::warn!(function = %name, "wipe: {}", err);
                errors.push(err);
            }
        }

        if errors.is_empty() {
            tracing::info!("all functions removed");
            Ok(())
        } else {
            Err(OrchestratorError::Wipe(errors))
        }
    }

    pub async fn list(&self) -> Vec<String> {
        let deployments = self.deployments.lock().await;
        let mut names: Vec<String> = deployments.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn logs(&self, name: &str) -> Result<String, OrchestratorError> {
        let deployments = self.deployments.lock().await;
        let handle = deployments
            .get(name)
            .ok_or_else(|| OrchestratorError::NotFound(name.to_string()))?;
        handle
            .logs()
            .await
            .map_err(|err| OrchestratorError::backend(name, Stage::Logs, err))
    }

    /// Logs of every function, in name order, separated by newlines.
    pub async fn logs_all(&self) -> Result<String, OrchestratorError> {
        let deployments = self.deployments.lock().await;
        let mut names: Vec<&String> = deployments.keys().collect();
        names.sort();

        let mut out = Vec::with_capacity(names.len());
        for name in names {
            let logs = deployments[name]
                .logs()
                .await
                .map_err(|err| OrchestratorError::backend(name, Stage::Logs, err))?;
            out.push(logs);
        }
        Ok(out.join("\n"))
    }

    async fn teardown(
        &self,
        name: &str,
        handle: Box<dyn DeploymentHandle>,
    ) -> Result<(), OrchestratorError> {
        let unregistered = self
            .control
            .send(&ControlMessage::delete(name))
            .await
            .map_err(|source| OrchestratorError::ControlPlane {
                name: name.to_string(),
                source,
            });
        let destroyed = handle
            .destroy()
            .await
            .map_err(|err| OrchestratorError::backend(name, Stage::Destroy, err));

        let result = unregistered.and(destroyed);
        match &result {
            Ok(()) => tracing::info!(function = name, "function deleted"),
            Err(err) => tracing::warn!(function = name, "function deleted with errors: {}", err),
        }
        result
    }
}

fn validate(request: &DeployRequest) -> Result<(), OrchestratorError> {
    if !is_valid_function_name(&request.name) {
        return Err(OrchestratorError::Validation(format!(
            "function name {:?} must be non-empty and alphanumeric",
            request.name
        )));
    }
    let env_ok = !request.env.is_empty()
        && request
            .env
            .bytes()
            .all(|byte| byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_');
    if !env_ok {
        return Err(OrchestratorError::Validation(format!(
            "invalid runtime environment {:?}",
            request.env
        )));
    }
    if request.threads == 0 {
        return Err(OrchestratorError::Validation(
            "threads must be at least 1".to_string(),
        ));
    }
    Ok(())
}

/// Best-effort teardown of a version that never got registered.
async fn discard(name: &str, handle: Box<dyn DeploymentHandle>) {
    if let Err(err) = handle.destroy().await {
        tracing::warn!(function = name, "destroying failed version failed: {:#}", err);
    }
}
