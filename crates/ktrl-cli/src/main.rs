#![deny(unsafe_code)]

//! ktrlctl: send commands to a running ktrl daemon and watch its events.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use ktrl_config::AppConfig;
use ktrl_ipc::{
    Command, CommandClient, CommandOptions, CommandReply, Endpoint, IpcError, Notification,
    NotificationClient,
};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// ktrlctl: control client for the ktrl keyboard-remapping daemon.
#[derive(Parser)]
#[command(name = "ktrlctl", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, default_value = "ktrl.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a raw message on the command channel and print the reply.
    Send {
        #[command(flatten)]
        target: CommandTarget,

        /// Message to send, e.g. "IpcDoEffect((fx: NoOp, val: Press))".
        message: String,
    },

    /// Ask the daemon to perform an effect and print the reply.
    Effect {
        #[command(flatten)]
        target: CommandTarget,

        /// Effect, e.g. NoOp or "ToggleLayer(1)".
        fx: String,

        /// Key value, e.g. Press, Release or Tap.
        val: String,
    },

    /// Subscribe to notifications and print them until interrupted.
    Listen {
        /// Daemon host.
        #[arg(long)]
        host: Option<String>,

        /// ktrl's notify port.
        #[arg(long)]
        port: Option<u16>,

        /// Topic prefix to subscribe to ("" for everything).
        #[arg(long)]
        topic: Option<String>,
    },

    /// Validate and display configuration.
    Config {
        /// Show the resolved configuration.
        #[arg(long)]
        show: bool,
    },
}

/// Where and how to reach the command channel.
#[derive(Args, Debug, Default)]
struct CommandTarget {
    /// Daemon host.
    #[arg(long)]
    host: Option<String>,

    /// ktrl's IPC port.
    #[arg(long)]
    port: Option<u16>,

    /// Reply timeout in milliseconds (0 waits forever).
    #[arg(long)]
    timeout_ms: Option<u64>,
}

impl CommandTarget {
    fn resolve(&self, config: &AppConfig) -> (Endpoint, CommandOptions) {
        let mut endpoint = config.command_endpoint();
        if let Some(host) = &self.host {
            endpoint.host = host.clone();
        }
        if let Some(port) = self.port {
            endpoint.port = port;
        }

        let mut options = config.command_options();
        if let Some(ms) = self.timeout_ms {
            options.reply_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }
        (endpoint, options)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (config, from_file) = load_config(&cli.config).await?;

    let filter = match cli.verbose {
        0 => config.logging.level.as_str(),
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    if from_file {
        debug!(path = %cli.config.display(), "using configuration file");
    } else {
        debug!(path = %cli.config.display(), "config file not found, using defaults");
    }

    match cli.command {
        Commands::Send { target, message } => {
            let reply = cmd_send(&config, &target, Command::raw(message)).await?;
            println!("{reply}");
        }
        Commands::Effect { target, fx, val } => {
            let reply = cmd_send(&config, &target, Command::do_effect(&fx, &val)).await?;
            println!("{reply}");
        }
        Commands::Listen { host, port, topic } => cmd_listen(&config, host, port, topic).await?,
        Commands::Config { show } => cmd_config(&cli.config, &config, show)?,
    }

    Ok(())
}

async fn cmd_send(config: &AppConfig, target: &CommandTarget, cmd: Command) -> Result<CommandReply> {
    let (endpoint, options) = target.resolve(config);
    info!(%endpoint, "sending an IPC message to ktrl");

    let mut client = CommandClient::connect_to(&endpoint, options)
        .await
        .with_context(|| format!("could not reach ktrl at {endpoint}"))?;
    let reply = client.send_command(cmd).await;
    client.close();

    reply.with_context(|| format!("no usable reply from ktrl at {endpoint}"))
}

async fn cmd_listen(
    config: &AppConfig,
    host: Option<String>,
    port: Option<u16>,
    topic: Option<String>,
) -> Result<()> {
    let mut endpoint = config.notify_endpoint();
    if let Some(host) = host {
        endpoint.host = host;
    }
    if let Some(port) = port {
        endpoint.port = port;
    }
    let topic = topic.unwrap_or_else(|| config.notify.topic.clone());

    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };
    listen_until(&endpoint, &topic, config.connect_timeout(), ctrl_c, |n| {
        println!("{}", format_notification(n));
    })
    .await
}

/// Print notifications until `interrupt` resolves. The interrupt is armed
/// before connecting, so it also cuts a slow connect short.
async fn listen_until<I, F>(
    endpoint: &Endpoint,
    topic: &str,
    connect_timeout: Duration,
    interrupt: I,
    mut on_notification: F,
) -> Result<()>
where
    I: Future<Output = ()> + Send + 'static,
    F: FnMut(&Notification),
{
    let mut interrupt = tokio::spawn(interrupt);

    let connect = NotificationClient::connect_with_timeout(endpoint, topic, connect_timeout);
    let mut client = tokio::select! {
        _ = &mut interrupt => {
            info!(%endpoint, "interrupted while connecting");
            return Ok(());
        }
        connected = connect => connected
            .with_context(|| format!("could not reach ktrl's notification server at {endpoint}"))?,
    };
    println!("Connected to ktrl's notification server: {endpoint}");

    let handle = client.close_handle();
    tokio::spawn(async move {
        if interrupt.await.is_ok() {
            handle.close();
        }
    });

    loop {
        match client.receive().await {
            Ok(notification) => on_notification(&notification),
            Err(IpcError::Closed) => {
                info!("notification listener stopped");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }
    }
}

fn format_notification(notification: &Notification) -> String {
    format!("NOTIFY: [ {notification} ]")
}

fn cmd_config(config_path: &Path, config: &AppConfig, show: bool) -> Result<()> {
    if show {
        let toml_str =
            toml::to_string_pretty(config).map_err(|e| anyhow::anyhow!("TOML error: {e}"))?;
        println!("{toml_str}");
    } else {
        println!("Configuration at '{}' is valid.", config_path.display());
    }
    Ok(())
}

/// Load the config file, falling back to defaults when it does not exist.
/// The flag reports whether the file was found.
async fn load_config(path: &Path) -> Result<(AppConfig, bool)> {
    if path.exists() {
        let config = AppConfig::load(path)
            .await
            .with_context(|| format!("invalid configuration in {}", path.display()))?;
        Ok((config, true))
    } else {
        Ok((AppConfig::default(), false))
    }
}
