use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, anyhow};
use control::HttpControlClient;
use orchestrator::{
    ApiState, DockerBackend, HealthPolicy, Orchestrator, OrchestratorConfig, serve_api,
};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};

use super::{CommandSpec, Context, Registry};
use crate::config::Config;

const COMMAND: CommandSpec = CommandSpec {
    name: "manager",
    summary: "run the management API and deploy functions",
    aliases: &["serve"],
    handler: cmd,
};

pub fn register(registry: &mut Registry) {
    registry.add_command(COMMAND);
}

pub fn cmd(context: &Context) -> anyhow::Result<()> {
    let config = context.load_config()?;
    super::runtime()?.block_on(run(config, context))
}

async fn run(config: Config, context: &Context) -> anyhow::Result<()> {
    let front_ends = config.front_end_urls()?;
    let mut rproxy = if config.manager.spawn_rproxy {
        Some(spawn_rproxy(context)?)
    } else {
        None
    };

    let backend = DockerBackend::new(&config.manager.runtimes_dir, &config.manager.staging_dir);
    tracing::info!(instance = backend.instance_id(), "docker backend ready");
    let control = HttpControlClient::new(config.manager.control_url.clone());
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(backend),
        Arc::new(control),
        OrchestratorConfig {
            staging_dir: config.manager.staging_dir.clone(),
            health: health_policy(&config),
            fetch_timeout: Duration::from_secs(config.manager.package_fetch_timeout_secs),
        },
    ));

    let state = ApiState {
        orchestrator: Arc::clone(&orchestrator),
        front_ends: Arc::new(front_ends),
    };

    let served = tokio::select! {
        result = serve_api(state, config.manager.listen) => result.map_err(|err| anyhow!(err)),
        result = wait_child(&mut rproxy) => result,
        _ = super::shutdown_signal() => Ok(()),
    };

    tracing::info!("removing all functions before exit");
    if let Err(err) = orchestrator.wipe_all().await {
        tracing::error!("cleanup incomplete: {}", err);
    }
    if let Some(mut child) = rproxy {
        if let Err(err) = child.kill().await {
            tracing::warn!("stopping rproxy failed: {}", err);
        }
    }
    served
}

fn health_policy(config: &Config) -> HealthPolicy {
    HealthPolicy {
        attempts: config.manager.health_attempts,
        interval: Duration::from_millis(config.manager.health_interval_ms),
        timeout: Duration::from_millis(config.manager.health_timeout_ms),
        port: config.rproxy.function_port,
    }
}

/// Start `nimbus rproxy` from the same binary with the same config file.
fn spawn_rproxy(context: &Context) -> anyhow::Result<Child> {
    let exe = std::env::current_exe().context("locating the nimbus binary")?;
    let mut command = Command::new(exe);
    command
        .arg("rproxy")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(path) = &context.config_path {
        command.arg("--config").arg(path);
    }
    let mut child = command.spawn().context("spawning rproxy")?;
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(forward_lines(stdout));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_lines(stderr));
    }
    tracing::info!(pid = ?child.id(), "rproxy started");
    Ok(child)
}

async fn forward_lines<R: AsyncRead + Unpin>(stream: R) {
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => tracing::info!(target: "nimbus::rproxy", "{}", line),
            Ok(None) => break,
            Err(err) => {
                tracing::warn!("reading rproxy output failed: {}", err);
                break;
            }
        }
    }
}

/// Resolves with an error when a spawned rproxy exits; never resolves
/// without one.
async fn wait_child(child: &mut Option<Child>) -> anyhow::Result<()> {
    match child {
        Some(child) => {
            let status = child.wait().await.context("waiting on rproxy")?;
            Err(anyhow!("rproxy exited with {}", status))
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_probes_use_the_function_port() {
        let mut config = Config::default();
        config.rproxy.function_port = 9001;
        config.manager.health_attempts = 3;
        config.manager.health_interval_ms = 250;
        let policy = health_policy(&config);
        assert_eq!(policy.port, 9001);
        assert_eq!(policy.attempts, 3);
        assert_eq!(policy.interval, Duration::from_millis(250));
        assert_eq!(policy.timeout, Duration::from_secs(3));
    }

    #[tokio::test]
    async fn no_child_never_finishes() {
        let mut child = None;
        let waited = tokio::time::timeout(Duration::from_millis(20), wait_child(&mut child)).await;
        assert!(waited.is_err());
    }
}
