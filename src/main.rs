use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use gcodelink::{
    init_logging, list_ports, Config, ConnectionType, ControllerLink, SendOptions,
    TransferPhase, TransportConfig,
};
use gcodelink_communication::{ReconnectPolicy, SerialConfig, SocketConfig};

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (built ",
    env!("BUILD_DATE"),
    ")"
);

#[derive(Debug, Parser)]
#[command(
    name = "gcodelink",
    about = "Stream G-code to GRBL and FluidNC controllers",
    version,
    long_version = LONG_VERSION
)]
struct Cli {
    /// Configuration file (.toml or .json); defaults to the user config directory
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Serial port, overrides the configured connection
    #[arg(long, global = true, conflicts_with = "socket")]
    serial: Option<String>,

    /// Baud rate for --serial
    #[arg(long, global = true)]
    baud: Option<u32>,

    /// Socket address (tcp://host:port or host[:port]), overrides the configured connection
    #[arg(long, global = true)]
    socket: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List serial ports that look like controllers
    Ports,
    /// Send one line and print the reply
    Send {
        /// The command, e.g. `$I` or `G0 X10`
        line: String,
    },
    /// Stream a G-code file; Ctrl-C stops before the next line
    Stream {
        /// Program file
        file: PathBuf,
    },
    /// Request one status report
    Status,
    /// Write a default configuration file
    InitConfig {
        /// Replace an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.json)?;

    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => gcodelink_settings::default_config_path()?,
    };

    match &cli.command {
        Command::Ports => print_ports(),
        Command::InitConfig { force } => init_config(&config_path, *force),
        Command::Send { line } => {
            let config = Config::load_or_default(&config_path)?;
            let link = open_link(&cli, &config).await?;
            let result = send_line(&link, line).await;
            link.disconnect().await?;
            result
        }
        Command::Status => {
            let config = Config::load_or_default(&config_path)?;
            let link = open_link(&cli, &config).await?;
            let result = print_status(&link).await;
            link.disconnect().await?;
            result
        }
        Command::Stream { file } => {
            let config = Config::load_or_default(&config_path)?;
            let program = std::fs::read_to_string(file)
                .with_context(|| format!("cannot read {}", file.display()))?;
            let link = open_link(&cli, &config).await?;
            let result = stream_program(&link, &program, config.streaming.progress_interval).await;
            link.disconnect().await?;
            result
        }
    }
}

fn print_ports() -> anyhow::Result<()> {
    let ports = list_ports()?;
    if ports.is_empty() {
        println!("No controller ports found");
    }
    for port in ports {
        match port.manufacturer {
            Some(manufacturer) => {
                println!("{}\t{} ({})", port.port_name, port.description, manufacturer)
            }
            None => println!("{}\t{}", port.port_name, port.description),
        }
    }
    Ok(())
}

fn init_config(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists, pass --force to replace it", path.display());
    }
    Config::default().save_to_file(path)?;
    println!("Wrote {}", path.display());
    Ok(())
}

/// Configured transport with command-line overrides applied
fn transport_config(cli: &Cli, config: &Config) -> TransportConfig {
    if let Some(port) = &cli.serial {
        return TransportConfig::Serial(SerialConfig {
            port: port.clone(),
            baud_rate: cli.baud.unwrap_or(config.connection.baud_rate),
        });
    }
    if let Some(url) = &cli.socket {
        return TransportConfig::Socket(SocketConfig {
            url: url.clone(),
            auto_reconnect: config.connection.auto_reconnect,
            reconnect: ReconnectPolicy {
                max_attempts: config.connection.reconnect_attempts,
                base_delay_ms: config.connection.reconnect_delay_ms,
            },
        });
    }
    match (config.transport_config(), cli.baud) {
        (TransportConfig::Serial(mut serial), Some(baud))
            if config.connection.connection_type == ConnectionType::Serial =>
        {
            serial.baud_rate = baud;
            TransportConfig::Serial(serial)
        }
        (transport, _) => transport,
    }
}

async fn open_link(cli: &Cli, config: &Config) -> anyhow::Result<ControllerLink> {
    let transport = transport_config(cli, config);
    let link = ControllerLink::new(config.link_config());
    tracing::info!("Connecting to {} ({})", transport.endpoint(), transport.kind());
    link.connect(&transport)
        .await
        .with_context(|| format!("cannot connect to {}", transport.endpoint()))?;
    Ok(link)
}

async fn send_line(link: &ControllerLink, line: &str) -> anyhow::Result<()> {
    let reply = link.send_command(line, SendOptions::default()).await?;
    println!("{}", reply.response_text());
    if let Some(err) = reply.error() {
        anyhow::bail!("controller rejected `{}`: {}", reply.command, err);
    }
    Ok(())
}

async fn print_status(link: &ControllerLink) -> anyhow::Result<()> {
    match link.request_status().await? {
        Some(status) => {
            println!("State: {}", status.state);
            println!("MPos:  {}", status.machine_position);
            println!("WPos:  {}", status.work_position);
            println!("Feed:  {}  Spindle: {}", status.feed_rate, status.spindle_speed);
            if let Some(buffer) = status.buffer {
                println!(
                    "Buffer: {} blocks, {} bytes free",
                    buffer.planner_blocks, buffer.rx_bytes
                );
            }
            Ok(())
        }
        None => anyhow::bail!("controller did not answer the status request"),
    }
}

async fn stream_program(
    link: &ControllerLink,
    program: &str,
    progress_interval: usize,
) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, stopping after the current line");
            ctrl_c.cancel();
        }
    });

    let interval = progress_interval.max(1);
    let result = link
        .send_program_with_cancel(
            program,
            |progress| match progress.phase {
                TransferPhase::Line if progress.current_line % interval == 0 => println!(
                    "{:>6}/{} ({:.0}%)",
                    progress.current_line,
                    progress.total_lines,
                    progress.fraction() * 100.0
                ),
                TransferPhase::Failed => {
                    if let Some(error) = &progress.error {
                        eprintln!("Line {}: {}", progress.current_line, error);
                    }
                }
                _ => {}
            },
            cancel,
        )
        .await;
    watcher.abort();

    let summary = result?;
    println!(
        "Sent {} lines ({} skipped) in {:.1}s",
        summary.sent_lines,
        summary.skipped_lines,
        summary.elapsed.as_secs_f64()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_override() {
        let cli = Cli::try_parse_from([
            "gcodelink",
            "--serial",
            "/dev/ttyACM0",
            "--baud",
            "250000",
            "status",
        ])
        .expect("parse");
        assert_eq!(
            transport_config(&cli, &Config::default()),
            TransportConfig::Serial(SerialConfig {
                port: "/dev/ttyACM0".to_string(),
                baud_rate: 250000,
            })
        );
    }

    #[test]
    fn test_socket_override_keeps_reconnect_settings() {
        let cli = Cli::try_parse_from(["gcodelink", "send", "$I", "--socket", "fluidnc.local"])
            .expect("parse");
        let mut config = Config::default();
        config.connection.reconnect_attempts = 2;
        match transport_config(&cli, &config) {
            TransportConfig::Socket(socket) => {
                assert_eq!(socket.url, "fluidnc.local");
                assert_eq!(socket.reconnect.max_attempts, 2);
            }
            other => panic!("expected socket, got {:?}", other),
        }
        assert!(matches!(cli.command, Command::Send { ref line } if line == "$I"));
    }

    #[test]
    fn test_serial_and_socket_conflict() {
        let parsed =
            Cli::try_parse_from(["gcodelink", "--serial", "COM3", "--socket", "host", "status"]);
        assert!(parsed.is_err());
    }
}
