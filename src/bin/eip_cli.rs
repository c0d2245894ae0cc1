use std::{error::Error, io, net::TcpStream, sync::Arc, thread};

use clap::Parser;
use eip_bridge::{
    Command, CorrelationEngine, PrintHandler, prompt,
    protocol::{BridgeWriter, connect_bridge},
};
use log::warn;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Bridge to connect to
    #[arg(default_value = "127.0.0.1:3000")]
    address: String,
}

type Engine = CorrelationEngine<BridgeWriter<TcpStream>, PrintHandler<io::Stdout>>;

fn main() -> Result<(), Box<dyn Error>> {
    // Initialize env_logger; For logging to STDOUT/STDERR
    env_logger::init();

    let cli = Cli::parse();
    let (writer, mut reader) = connect_bridge(&cli.address)?;
    let engine: Arc<Engine> = Arc::new(CorrelationEngine::new(
        writer,
        PrintHandler::new(io::stdout()),
    ));

    {
        let engine = Arc::clone(&engine);
        thread::spawn(move || {
            if let Err(e) = engine.serve(&mut reader) {
                warn!("connection to bridge failed: {e}");
            }
            eprintln!("bridge closed the connection");
        });
    }

    let stdio = io::stdin();

    loop {
        // Unlocked stdout: replies printed by the serve thread must not wait for input.
        let cmd = match prompt(stdio.lock(), io::stdout()) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("error: {e}");
                continue;
            }
        };

        match cmd {
            Command::Exit => break,
            Command::Call(call) => {
                if let Err(e) = engine.call(call) {
                    eprintln!("failed to send request: {e}");
                    break;
                }
            }
        }
    }

    let abandoned = engine.abandon();
    if !abandoned.is_empty() {
        eprintln!("{} requests left unanswered", abandoned.len());
    }
    Ok(())
}
