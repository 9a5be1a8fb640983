use std::path::PathBuf;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::Config;

pub mod manager;
pub mod rproxy;

#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub name: &'static str,
    pub summary: &'static str,
    pub aliases: &'static [&'static str],
    pub handler: fn(&Context) -> anyhow::Result<()>,
}

#[derive(Debug, Default, Clone)]
pub struct Registry {
    commands: Vec<CommandSpec>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_command(&mut self, command: CommandSpec) {
        self.commands.push(command);
    }

    pub fn commands(&self) -> &[CommandSpec] {
        &self.commands
    }

    pub fn command_for(&self, token: &str) -> Option<&CommandSpec> {
        self.commands.iter().find(|command| {
            command.name == token || command.aliases.iter().any(|alias| *alias == token)
        })
    }
}

/// Parsed command line shared by every command.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Context {
    pub command: Option<String>,
    pub config_path: Option<PathBuf>,
    pub help: bool,
    pub version: bool,
}

impl Context {
    pub fn parse<I>(args: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = String>,
    {
        let mut context = Context::default();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--help" | "-H" | "help" => context.help = true,
                "--version" | "-V" | "version" => context.version = true,
                "--config" | "-c" => {
                    let path = args
                        .next()
                        .ok_or_else(|| format!("{} expects a path", arg))?;
                    context.config_path = Some(PathBuf::from(path));
                }
                other if other.starts_with("--config=") => {
                    context.config_path = Some(PathBuf::from(&other["--config=".len()..]));
                }
                other if other.starts_with('-') => {
                    return Err(format!("unknown flag {}", other));
                }
                other => {
                    if let Some(command) = &context.command {
                        return Err(format!(
                            "unexpected argument {} after command {}",
                            other, command
                        ));
                    }
                    context.command = Some(other.to_string());
                }
            }
        }
        Ok(context)
    }

    pub fn load_config(&self) -> anyhow::Result<Config> {
        Ok(Config::load(self.config_path.as_deref())?)
    }
}

pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "nimbus=info,orchestrator=info,control=info,engine=info,transport=info,http=info,registry=info,tower_http=info"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

pub fn help(registry: &Registry) {
    println!("nimbus {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("usage: nimbus <command> [--config <path>]");
    println!();
    println!("commands:");
    for command in registry.commands() {
        println!("  {:<10} {}", command.name, command.summary);
    }
    println!();
    println!("flags:");
    println!("  {:<10} {}", "--config", "config file (default: search ./nimbus.toml, ~/.config/nimbus, /etc/nimbus)");
    println!("  {:<10} {}", "--help", "show help");
    println!("  {:<10} {}", "--version", "show version");
}

pub fn execute(registry: &Registry) {
    let context = match Context::parse(std::env::args().skip(1)) {
        Ok(context) => context,
        Err(message) => {
            eprintln!("error: {}", message);
            help(registry);
            std::process::exit(2);
        }
    };

    if context.version {
        println!("nimbus {}", env!("CARGO_PKG_VERSION"));
        return;
    }
    let Some(token) = context.command.as_deref() else {
        help(registry);
        return;
    };
    if context.help {
        help(registry);
        return;
    }
    let Some(command) = registry.command_for(token) else {
        eprintln!("error: unknown command {}", token);
        help(registry);
        std::process::exit(2);
    };

    init_tracing();
    if let Err(err) = (command.handler)(&context) {
        tracing::error!("{} failed: {:#}", command.name, err);
        std::process::exit(1);
    }
}

/// Resolves on ctrl-c, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!("ctrl-c handler unavailable: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::warn!("SIGTERM handler unavailable: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}

pub(crate) fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?)
}
