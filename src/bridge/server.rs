use std::{
    io,
    net::{Shutdown, SocketAddr, TcpListener, TcpStream},
    thread,
};

use log::{info, warn};

use crate::{
    BridgeConfig,
    protocol::{ClientEvent, TransportError, write_event},
};

use super::{Session, SessionId, SessionRegistry};

pub struct BridgeServer {
    listener: TcpListener,
    config: BridgeConfig,
    registry: SessionRegistry,
}

impl BridgeServer {
    pub fn bind(config: BridgeConfig) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(&config.listen)?;
        Ok(Self {
            listener,
            config,
            registry: SessionRegistry::new(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> SessionRegistry {
        self.registry.clone()
    }

    /// Accepts clients until the listener fails. Every client gets its own session
    /// thread and its own backend connection.
    pub fn listen(self) -> Result<(), TransportError> {
        info!(
            "listening at {}, relaying to {}",
            self.local_addr()?,
            self.config.backend
        );

        let mut next_id: SessionId = 1;
        for stream in self.listener.incoming() {
            match stream {
                Ok(stream) => {
                    let id = next_id;
                    next_id += 1;

                    let config = self.config.clone();
                    let registry = self.registry.clone();
                    let spawned = thread::Builder::new()
                        .name(format!("session-{id}"))
                        .spawn(move || handle_connection(id, stream, &config, &registry));
                    if let Err(e) = spawned {
                        warn!("failed to start session {id}: {e}");
                    }
                }
                Err(e) => warn!("broken connection: {e:?}"),
            }
        }
        Ok(())
    }
}

fn handle_connection(
    id: SessionId,
    mut client: TcpStream,
    config: &BridgeConfig,
    registry: &SessionRegistry,
) {
    match client.peer_addr() {
        Ok(peer) => info!("session {id} opened by {peer}"),
        Err(_) => info!("session {id} opened"),
    }

    let backend = match TcpStream::connect(&config.backend) {
        Ok(backend) => backend,
        Err(e) => {
            warn!("session {id}: backend {} unreachable: {e}", config.backend);
            let _ = write_event(
                &mut client,
                &ClientEvent::Disconnect {
                    reason: Some(format!("backend unreachable: {e}")),
                },
            );
            let _ = client.shutdown(Shutdown::Both);
            return;
        }
    };

    match Session::new(id, client, backend, config).run(registry) {
        Ok(reason) => info!("session {id} closed: {reason}"),
        Err(e) => warn!("session {id} failed: {e}"),
    }
}
