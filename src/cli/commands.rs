use crate::cli::args::{Args, Command, ConfigCommand, RunArgs};
use crate::cli::output::{ConsoleWriter, OutputWriter, PortEntry};
use crate::core::bridge::Bridge;
use crate::core::cancellation::CancellationToken;
use crate::domain::config::BridgeConfig;
use crate::domain::error::{BridgeError, BridgeResult};
use crate::infrastructure::config::ConfigManager;
use crate::infrastructure::logging::init_logging;
use std::path::PathBuf;
use tracing::{info, warn};

/// Execute CLI command
pub async fn execute_command(args: Args) -> BridgeResult<()> {
    let writer = ConsoleWriter::new(args.output.clone());

    // Load configuration using ConfigManager
    let config_manager = ConfigManager::new()?;
    let config = if let Some(config_path) = &args.config {
        config_manager.load_config_from_path(config_path.as_ref())?
    } else {
        config_manager.load_config()?
    };

    if !args.quiet {
        init_logging(&config.global.log_level, args.verbose)?;
    }

    match args.command {
        Command::Run(run_args) => execute_run(run_args, config, &writer).await,
        Command::Ports => execute_ports(&writer),
        Command::Config(config_args) => {
            execute_config_command(config_args.command, &writer, &config, &config_manager)
        }
        Command::Version => {
            writer.write_message(&format!("serialbridge {}", env!("CARGO_PKG_VERSION")))?;
            Ok(())
        }
    }
}

async fn execute_run(
    args: RunArgs,
    mut config: BridgeConfig,
    writer: &ConsoleWriter,
) -> BridgeResult<()> {
    args.apply(&mut config);

    let token = CancellationToken::new();
    spawn_interrupt_handler(token.clone());

    let Some(bridge) = Bridge::from_config(&config, token).await? else {
        writer.write_message("Interrupted before the listener could be bound")?;
        return Ok(());
    };

    info!(
        "Bridging {} <-> {}",
        config.serial.port,
        bridge.local_addr()
    );

    let stats = bridge.run().await?;
    writer.write_statistics(&stats)?;
    writer.write_message("Bye :)")?;
    Ok(())
}

/// Cancel `token` on the first Ctrl-C
fn spawn_interrupt_handler(token: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, shutting down");
                token.cancel();
            }
            Err(e) => warn!("Failed to listen for interrupt signal: {}", e),
        }
    });
}

fn execute_ports(writer: &ConsoleWriter) -> BridgeResult<()> {
    let ports: Vec<PortEntry> = serialport::available_ports()?
        .into_iter()
        .map(PortEntry::from)
        .collect();

    writer.write_ports(&ports)?;
    Ok(())
}

fn execute_config_command(
    command: ConfigCommand,
    writer: &ConsoleWriter,
    config: &BridgeConfig,
    config_manager: &ConfigManager,
) -> BridgeResult<()> {
    match command {
        ConfigCommand::Show => {
            writer.write_config(config)?;
        }
        ConfigCommand::Init { path } => {
            let base = match path {
                Some(path) => PathBuf::from(path),
                None => std::env::current_dir().map_err(|e| BridgeError::Config {
                    message: format!("Cannot determine current directory: {}", e),
                })?,
            };
            let created = config_manager.init_project_config(&base)?;
            writer.write_message(&format!("Created {}", created.display()))?;
        }
        ConfigCommand::Path => {
            writer.write_message(&format!(
                "Global: {}",
                config_manager.get_global_config_path_ref().display()
            ))?;
            match config_manager.get_project_config_path() {
                Some(path) => writer.write_message(&format!("Project: {}", path.display()))?,
                None => writer.write_message("Project: (none)")?,
            }
        }
    }
    Ok(())
}
