use std::{error::Error, process, time::Duration};

use clap::Parser;
use eip_bridge::{BridgeConfig, BridgeServer, protocol::framing::DEFAULT_MAX_BODY_LEN};
use log::info;

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Listen for client connections at address
    #[arg(default_value = "127.0.0.1:3000")]
    listen: String,
    /// Interpreter backend to relay each session to
    #[arg(default_value = "127.0.0.1:3001")]
    backend: String,
    /// Close sessions after this many seconds without traffic
    #[arg(long, default_value_t = 900)]
    idle_timeout: u64,
    /// Largest backend message accepted, in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_BODY_LEN)]
    max_body_len: usize,
}

impl From<Cli> for BridgeConfig {
    fn from(cli: Cli) -> Self {
        BridgeConfig {
            listen: cli.listen,
            backend: cli.backend,
            idle_timeout: Duration::from_secs(cli.idle_timeout),
            max_body_len: cli.max_body_len,
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let server = BridgeServer::bind(cli.into())?;

    let registry = server.registry();
    ctrlc::set_handler(move || {
        info!("shutting down, closing {} sessions", registry.len());
        registry.close_all();
        process::exit(0);
    })?;

    server.listen()?;
    Ok(())
}
