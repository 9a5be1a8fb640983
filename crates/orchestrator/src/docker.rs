//! Container backend that drives the `docker` CLI.
//!
//! Every deployment gets its own image, bridge network and `threads`
//! containers, all named after a unique tag so repeated deploys of the same
//! function never collide.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{Context, bail};
use async_trait::async_trait;
use futures_util::future::join_all;
use tokio::process::Command;

use crate::backend::{Backend, DeploymentHandle};

const FUNCTION_LABEL: &str = "nimbus-function";
const INSTANCE_LABEL: &str = "nimbus";

pub struct DockerBackend {
    runtimes_dir: PathBuf,
    build_dir: PathBuf,
    instance_id: String,
}

impl DockerBackend {
    pub fn new(runtimes_dir: impl Into<PathBuf>, build_dir: impl Into<PathBuf>) -> Self {
        Self {
            runtimes_dir: runtimes_dir.into(),
            build_dir: build_dir.into(),
            instance_id: nanoid::nanoid!(12, &nanoid::alphabet::SAFE),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    fn labels(&self, name: &str) -> Vec<String> {
        vec![
            "--label".to_string(),
            format!("{}={}", FUNCTION_LABEL, name),
            "--label".to_string(),
            format!("{}={}", INSTANCE_LABEL, self.instance_id),
        ]
    }
}

#[async_trait]
impl Backend for DockerBackend {
    async fn create(
        &self,
        name: &str,
        env: &str,
        threads: usize,
        code_dir: &Path,
        env_vars: &HashMap<String, String>,
    ) -> anyhow::Result<Box<dyn DeploymentHandle>> {
        let tag = unique_tag(name);
        tracing::info!(function = name, tag = %tag, "creating deployment");

        let runtime = self.runtimes_dir.join(env);
        if !runtime.is_dir() {
            bail!("unknown runtime {:?} (no {})", env, runtime.display());
        }

        tokio::fs::create_dir_all(&self.build_dir).await?;
        let context = tempfile::Builder::new()
            .prefix(&format!("{}-", tag))
            .tempdir_in(&self.build_dir)?;
        let runtime_src = runtime.clone();
        let code_src = code_dir.to_path_buf();
        let context_dir = context.path().to_path_buf();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            copy_dir(&runtime_src, &context_dir)?;
            copy_dir(&code_src, &context_dir.join("fn"))
        })
        .await??;

        let mut build = vec!["build".to_string(), "-t".to_string(), tag.clone()];
        build.extend(self.labels(name));
        build.push(context.path().display().to_string());
        docker(&build).await.context("docker build")?;
        drop(context);

        let mut handle = DockerHandle {
            name: name.to_string(),
            tag: tag.clone(),
            network: None,
            containers: Vec::with_capacity(threads),
            ips: Vec::new(),
        };

        let mut network = vec!["network".to_string(), "create".to_string()];
        network.extend(self.labels(name));
        network.push(tag.clone());
        if let Err(err) = docker(&network).await.context("docker network create") {
            let _ = handle.cleanup().await;
            return Err(err);
        }
        handle.network = Some(tag.clone());

        let mut env_flags: Vec<String> = env_vars
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect();
        env_flags.sort();

        for index in 0..threads {
            let mut args = vec![
                "create".to_string(),
                "--name".to_string(),
                format!("{}-{}", tag, index),
                "--network".to_string(),
                tag.clone(),
            ];
            args.extend(self.labels(name));
            for pair in &env_flags {
                args.push("-e".to_string());
                args.push(pair.clone());
            }
            args.push(tag.clone());

            match docker(&args).await.context("docker create") {
                Ok(id) => handle.containers.push(id.trim().to_string()),
                Err(err) => {
                    let _ = handle.cleanup().await;
                    return Err(err);
                }
            }
        }

        tracing::info!(function = name, containers = handle.containers.len(), "deployment created");
        Ok(Box::new(handle))
    }
}

struct DockerHandle {
    name: String,
    tag: String,
    network: Option<String>,
    containers: Vec<String>,
    ips: Vec<String>,
}

impl DockerHandle {
    /// Stop and remove everything this handle created; continues past
    /// failures and returns the first one.
    async fn cleanup(&mut self) -> anyhow::Result<()> {
        let removals = self.containers.iter().map(|container| async move {
            let _ = docker(&["stop", "-t", "1", container.as_str()]).await;
            docker(&["rm", "-f", container.as_str()])
                .await
                .with_context(|| format!("removing container {}", container))
        });
        let mut first_error = join_all(removals).await.into_iter().find_map(Result::err);
        self.containers.clear();

        if let Some(network) = self.network.take() {
            if let Err(err) = docker(&["network", "rm", network.as_str()]).await {
                tracing::warn!(function = %self.name, "removing network failed: {:#}", err);
                if first_error.is_none() {
                    first_error = Some(err.context("removing network"));
                }
            }
        }
        if let Err(err) = docker(&["rmi", self.tag.as_str()]).await {
            tracing::warn!(function = %self.name, "removing image failed: {:#}", err);
            if first_error.is_none() {
                first_error = Some(err.context("removing image"));
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn container_logs(&self, container: &str) -> anyhow::Result<String> {
        let output = Command::new("docker")
            .args(["logs", "--timestamps", container])
            .stdin(Stdio::null())
            .output()
            .await
            .context("spawning docker")?;
        if !output.status.success() {
            bail!(
                "docker logs {} failed: {}",
                container,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        // units log to both streams
        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        let mut out = String::new();
        for line in combined.lines() {
            out.push_str(&format!("function={} handler={} {}\n", self.name, container, line));
        }
        Ok(out)
    }
}

#[async_trait]
impl DeploymentHandle for DockerHandle {
    async fn start(&mut self) -> anyhow::Result<()> {
        let starts = self
            .containers
            .iter()
            .map(|container| async move { docker(&["start", container.as_str()]).await });
        for result in join_all(starts).await {
            result.context("docker start")?;
        }

        let network = self.network.clone().unwrap_or_else(|| self.tag.clone());
        let format = format!(
            "{{{{(index .NetworkSettings.Networks \"{}\").IPAddress}}}}",
            network
        );
        let mut ips = Vec::with_capacity(self.containers.len());
        for container in &self.containers {
            let ip = docker(&["inspect", "--format", format.as_str(), container.as_str()])
                .await
                .context("docker inspect")?;
            let ip = ip.trim();
            if ip.is_empty() {
                bail!("container {} has no address on network {}", container, network);
            }
            tracing::debug!(function = %self.name, container = %container, ip, "unit started");
            ips.push(ip.to_string());
        }
        self.ips = ips;
        Ok(())
    }

    fn ips(&self) -> Vec<String> {
        self.ips.clone()
    }

    async fn destroy(mut self: Box<Self>) -> anyhow::Result<()> {
        tracing::info!(function = %self.name, tag = %self.tag, "destroying deployment");
        self.cleanup().await
    }

    async fn logs(&self) -> anyhow::Result<String> {
        let mut out = String::new();
        for container in &self.containers {
            out.push_str(&self.container_logs(container).await?);
        }
        Ok(out)
    }
}

/// `<lowercased name>-<12 random chars>`; docker image tags must be lowercase.
fn unique_tag(name: &str) -> String {
    let suffix = nanoid::nanoid!(12, &LOWER_ALPHANUMERIC);
    format!("{}-{}", name.to_ascii_lowercase(), suffix)
}

const LOWER_ALPHANUMERIC: [char; 36] = [
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i',
    'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z',
];

/// Run `docker <args>` and return its stdout.
async fn docker<S: AsRef<str>>(args: &[S]) -> anyhow::Result<String> {
    let args: Vec<&str> = args.iter().map(AsRef::as_ref).collect();
    tracing::debug!("docker {}", args.join(" "));
    let output = Command::new("docker")
        .args(&args)
        .stdin(Stdio::null())
        .output()
        .await
        .context("spawning docker")?;
    if !output.status.success() {
        bail!(
            "docker {} exited with {}: {}",
            args.first().copied().unwrap_or_default(),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn copy_dir(from: &Path, to: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(to)?;
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
