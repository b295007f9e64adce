use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use cpal::traits::HostTrait;
use futures_util::future::join_all;
use tracing::{error, info, warn};

use micstream_lib::audio::{list_input_devices, parse_device_selection, AudioSubsystem};
use micstream_lib::server::{ServerConfig, ServerLifecycle};
use micstream_lib::utils::logging::init_logging;
use micstream_lib::utils::{AppError, AppResult};

/// Stream a microphone to WebRTC peers over HTTP signaling
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List input devices as `index: name`
    Devices {
        /// Also report the audio host and the device count
        #[arg(long)]
        verbose: bool,
    },
    /// Run one or more signaling servers until Ctrl+C
    Serve(ServeArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Server instance as PORT or PORT@DEVICE, e.g. `8880@2`; repeatable
    #[arg(long = "instance", value_name = "PORT[@DEVICE]", value_parser = parse_instance)]
    instances: Vec<InstanceSpec>,

    /// JSON config file providing defaults for every instance
    #[arg(long)]
    config: Option<PathBuf>,

    /// Microphone amplification
    #[arg(long)]
    gain: Option<f32>,

    /// STUN/TURN server URL; repeatable
    #[arg(long = "ice-server", value_name = "URL")]
    ice_servers: Vec<String>,

    /// Directory holding the client index.html [default: ./static, then the bundled page]
    #[arg(long)]
    static_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
struct InstanceSpec {
    port: u16,
    /// `Some(None)`: device given but not an index, use the default
    device: Option<Option<usize>>,
}

fn parse_instance(value: &str) -> Result<InstanceSpec, String> {
    let (port, device) = match value.split_once('@') {
        Some((port, device)) => (port, Some(parse_device_selection(device))),
        None => (value, None),
    };

    let port = port
        .trim()
        .parse::<u16>()
        .map_err(|e| format!("invalid port '{}': {}", port, e))?;

    Ok(InstanceSpec { port, device })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let cli = Cli::parse();
    match cli.command {
        Command::Devices { verbose } => {
            if let Err(e) = print_devices(verbose) {
                error!(code = ?e.code(), "{}", e);
                if let Some(hint) = e.recovery_hint() {
                    warn!("{}", hint);
                }
                return Err(e.into());
            }
            Ok(())
        }
        Command::Serve(args) => serve(args).await,
    }
}

fn print_devices(verbose: bool) -> AppResult<()> {
    let subsystem = AudioSubsystem::shared();

    if verbose {
        let host = subsystem.with_host(|host| host.id().name());
        println!("Audio host: {}", host);
    }

    let devices = list_input_devices(&subsystem)?;
    if verbose {
        println!("Input devices: {}", devices.len());
    }

    if devices.is_empty() {
        println!("No Microphone Found");
    }
    for device in devices {
        println!("{}", device);
    }

    Ok(())
}

async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    let base = build_base_config(&args)?;

    let instances = if args.instances.is_empty() {
        vec![InstanceSpec {
            port: base.port,
            device: None,
        }]
    } else {
        args.instances.clone()
    };

    let mut servers: Vec<Arc<ServerLifecycle>> = Vec::with_capacity(instances.len());
    for instance in instances {
        let mut config = base.clone();
        config.port = instance.port;
        if let Some(device) = instance.device {
            config.device_index = device;
        }

        let started = start_instance(config).await;
        match started {
            Ok(server) => servers.push(server),
            Err(e) => {
                error!(code = ?e.code(), "Failed to start server on port {}: {}", instance.port, e);
                if let Some(hint) = e.recovery_hint() {
                    warn!("{}", hint);
                }
                stop_all(&servers).await;
                return Err(e.into());
            }
        }
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    info!("Shutdown signal received");

    stop_all(&servers).await;
    info!("All servers stopped");
    Ok(())
}

async fn start_instance(config: ServerConfig) -> AppResult<Arc<ServerLifecycle>> {
    let device = config
        .device_index
        .map_or_else(|| "Default".to_string(), |i| i.to_string());
    let server = Arc::new(ServerLifecycle::from_config(config)?);
    let addr = server.start().await?;
    info!(%addr, device = %device, "Instance ready");
    Ok(server)
}

fn build_base_config(args: &ServeArgs) -> Result<ServerConfig, AppError> {
    let mut config = match &args.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };

    if let Some(gain) = args.gain {
        config.gain = gain;
    }
    if !args.ice_servers.is_empty() {
        config.ice_servers = args.ice_servers.clone();
    }
    if let Some(dir) = &args.static_dir {
        config.static_dir = Some(dir.clone());
    }

    config.validate()?;
    Ok(config.with_default_static_dir())
}

async fn stop_all(servers: &[Arc<ServerLifecycle>]) {
    join_all(servers.iter().map(|server| server.stop())).await;
}
