use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;

/// Builds isolated execution units for one function version.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Build `threads` units for `name` from the function source in
    /// `code_dir`. Units are created but not started.
    async fn create(
        &self,
        name: &str,
        env: &str,
        threads: usize,
        code_dir: &Path,
        env_vars: &HashMap<String, String>,
    ) -> anyhow::Result<Box<dyn DeploymentHandle>>;
}

/// The units of one deployed function version.
#[async_trait]
pub trait DeploymentHandle: Send + Sync {
    async fn start(&mut self) -> anyhow::Result<()>;

    /// Endpoint addresses of the started units.
    fn ips(&self) -> Vec<String>;

    /// Tear the units down. Consumes the handle so it can run only once.
    async fn destroy(self: Box<Self>) -> anyhow::Result<()>;

    async fn logs(&self) -> anyhow::Result<String>;
}
