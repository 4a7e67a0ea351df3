//! TLS transport probe.
//!
//! # Architecture Overview
//!
//! ```text
//!     transport.toml
//!          │
//!          ▼
//!     ┌─────────┐    ┌───────────────┐    ┌──────────────────────────────┐
//!     │ config  │───▶│ Connection    │───▶│ net::NetworkInterface        │
//!     │ loader  │    │ Parameters    │    │  credentials → socket → TLS  │───▶ broker
//!     └─────────┘    └───────────────┘    └──────────────────────────────┘
//!          │                                     ▲
//!          ▼                                     │ Countdown per phase
//!     observability (tracing subscriber)         │
//!                                           probe: connect → write → read
//!                                                  → disconnect → destroy
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use tls_transport::config::{load_config, TransportConfig};
use tls_transport::net::{Countdown, Network, RustlsConnector, TlsNetwork, TransportError};
use tls_transport::observability::init_logging;

#[derive(Parser)]
#[command(name = "tls-transport")]
#[command(about = "Mutually authenticated TLS transport probe", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "transport.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and validate the configuration file
    Validate,
    /// Connect, optionally exchange data, then disconnect
    Probe {
        /// Payload written once the session is established
        #[arg(short, long)]
        payload: Option<String>,

        /// Number of bytes to read after the write
        #[arg(short, long, default_value_t = 0)]
        read: usize,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}: {}", cli.config.display(), e);
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Commands::Validate => {
            println!(
                "{}: ok ({}:{})",
                cli.config.display(),
                config.endpoint.host,
                config.endpoint.port
            );
            ExitCode::SUCCESS
        }
        Commands::Probe { payload, read } => {
            if let Err(e) = init_logging(&config.observability) {
                eprintln!("Warning: {}", e);
            }
            match probe(&config, payload.as_deref(), read) {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    eprintln!(
                        "Error: {} (kind: {:?}, recovery: {:?})",
                        e,
                        e.kind(),
                        e.recovery()
                    );
                    ExitCode::FAILURE
                }
            }
        }
    }
}

fn probe(config: &TransportConfig, payload: Option<&str>, read_len: usize) -> Result<(), TransportError> {
    let deadline = config.timeouts.operation_ms;
    let mut network = TlsNetwork::new(RustlsConnector::new());

    tracing::info!(
        host = %config.endpoint.host,
        port = config.endpoint.port,
        verify_server = config.verify_server,
        "Probing endpoint"
    );

    network.connect(Some(config.connection_parameters()), &Countdown::from_millis(deadline))?;
    println!(
        "connected to {}:{} (verify result {:#06x})",
        config.endpoint.host,
        config.endpoint.port,
        network.verify_result().unwrap_or_default()
    );

    let exchanged = exchange(&mut network, deadline, payload, read_len);

    network.disconnect();
    network.destroy();
    exchanged
}

fn exchange(
    network: &mut TlsNetwork,
    deadline: u32,
    payload: Option<&str>,
    read_len: usize,
) -> Result<(), TransportError> {
    if let Some(payload) = payload {
        let written = network.write(payload.as_bytes(), &Countdown::from_millis(deadline))?;
        println!("wrote {} bytes", written);
    }

    if read_len > 0 {
        let mut buf = vec![0u8; read_len];
        let received = network.read(&mut buf, &Countdown::from_millis(deadline))?;
        println!("read {} bytes: {}", received, String::from_utf8_lossy(&buf[..received]));
    }

    Ok(())
}
