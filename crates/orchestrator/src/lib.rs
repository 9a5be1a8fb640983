//! Deployment orchestrator: turns uploaded packages into healthy execution
//! units, swaps them into the registry through the control plane and
//! retires the previous version.

pub mod api;
pub mod backend;
pub mod docker;
pub mod error;
pub mod health;
pub mod orchestrator;
pub mod package;

pub use api::{ApiState, api_router, serve_api};
pub use backend::{Backend, DeploymentHandle};
pub use docker::DockerBackend;
pub use error::{OrchestratorError, Stage};
pub use health::HealthPolicy;
pub use orchestrator::{DeployRequest, Orchestrator, OrchestratorConfig};
pub use package::{PackageError, PackageSource};
