use std::sync::Arc;

use anyhow::anyhow;
use engine::{DispatchConfig, Dispatcher, FunctionRegistry};

use super::{CommandSpec, Context, Registry};
use crate::config::Config;

const COMMAND: CommandSpec = CommandSpec {
    name: "rproxy",
    summary: "run the front-ends and the control plane",
    aliases: &["proxy"],
    handler: cmd,
};

pub fn register(registry: &mut Registry) {
    registry.add_command(COMMAND);
}

pub fn cmd(context: &Context) -> anyhow::Result<()> {
    let config = context.load_config()?;
    super::runtime()?.block_on(run(config))
}

pub async fn run(config: Config) -> anyhow::Result<()> {
    let targets = config.listen_configs()?;
    let registry = Arc::new(FunctionRegistry::new());
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&registry),
        DispatchConfig {
            function_port: config.rproxy.function_port,
            call_timeout: config.call_timeout(),
        },
    ));

    tracing::info!(
        front_ends = targets.len(),
        workers = config.workers(),
        function_port = config.rproxy.function_port,
        "starting rproxy"
    );

    tokio::select! {
        result = control::serve_control(registry, config.rproxy.control_listen) => {
            result.map_err(|err| anyhow!(err))
        }
        result = transport::serve_all(dispatcher, targets) => {
            result.map_err(|err| anyhow!(err))
        }
        _ = super::shutdown_signal() => Ok(()),
    }
}
