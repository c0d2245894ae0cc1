use std::{
    collections::HashMap,
    fmt,
    io::{BufRead, BufReader, ErrorKind},
    net::{Shutdown, SocketAddr, TcpStream},
    sync::{Arc, Mutex, OnceLock},
    thread,
    time::{Duration, Instant},
};

use log::{debug, trace, warn};

use crate::{
    BridgeConfig, lock,
    protocol::{
        ClientEvent, EventReader, FramedReader, FramedWriter, FramingError, Inbound, Outbound,
        TransportError, max_event_len, write_event,
    },
};

pub type SessionId = u64;

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    ClientClosed,
    BackendClosed,
    IdleTimeout,
    Framing(FramingError),
    Transport(String),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::ClientClosed => f.write_str("client closed"),
            CloseReason::BackendClosed => f.write_str("backend closed"),
            CloseReason::IdleTimeout => f.write_str("idle timeout"),
            CloseReason::Framing(e) => write!(f, "framing error: {e}"),
            CloseReason::Transport(e) => write!(f, "transport error: {e}"),
        }
    }
}

/// Expiry that moves forward whenever a message is relayed in either direction.
#[derive(Debug, Clone)]
pub struct IdleDeadline {
    timeout: Duration,
    last_activity: Arc<Mutex<Instant>>,
}

impl IdleDeadline {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            last_activity: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn touch(&self) {
        *lock(&self.last_activity) = Instant::now();
    }

    /// Time left before expiry, `None` once expired.
    pub fn remaining(&self) -> Option<Duration> {
        let idle = lock(&self.last_activity).elapsed();
        self.timeout.checked_sub(idle).filter(|d| !d.is_zero())
    }
}

#[derive(Debug)]
struct SessionEntry {
    peer: Option<SocketAddr>,
    opened: Instant,
    client: TcpStream,
    backend: TcpStream,
}

/// Live sessions keyed by id. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<Mutex<HashMap<SessionId, SessionEntry>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, id: SessionId, entry: SessionEntry) {
        lock(&self.sessions).insert(id, entry);
    }

    fn remove(&self, id: SessionId) {
        if let Some(entry) = lock(&self.sessions).remove(&id) {
            debug!(
                "session {id} from {:?} released after {:?}",
                entry.peer,
                entry.opened.elapsed()
            );
        }
    }

    pub fn contains(&self, id: SessionId) -> bool {
        lock(&self.sessions).contains_key(&id)
    }

    pub fn len(&self) -> usize {
        lock(&self.sessions).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shuts down the sockets of every live session. Each session then tears itself
    /// down and leaves the registry.
    pub fn close_all(&self) {
        for entry in lock(&self.sessions).values() {
            let _ = entry.client.shutdown(Shutdown::Both);
            let _ = entry.backend.shutdown(Shutdown::Both);
        }
    }
}

/// Records the first close reason and tears both connections down.
struct Closer {
    id: SessionId,
    reason: OnceLock<CloseReason>,
    events: Mutex<TcpStream>,
    client: TcpStream,
    backend: TcpStream,
}

impl Closer {
    fn send(&self, event: &ClientEvent) -> Result<(), TransportError> {
        write_event(&mut *lock(&self.events), event)
    }

    fn close(&self, reason: CloseReason) {
        if self.reason.set(reason.clone()).is_ok() {
            debug!("session {} closing: {reason}", self.id);
            let _ = self.send(&ClientEvent::Disconnect {
                reason: Some(reason.to_string()),
            });
        }
        let _ = self.client.shutdown(Shutdown::Both);
        let _ = self.backend.shutdown(Shutdown::Both);
    }
}

/// One client paired with its own backend connection.
pub struct Session {
    id: SessionId,
    client: TcpStream,
    backend: TcpStream,
    deadline: IdleDeadline,
    max_body_len: usize,
}

impl Session {
    pub fn new(
        id: SessionId,
        client: TcpStream,
        backend: TcpStream,
        config: &BridgeConfig,
    ) -> Self {
        Self {
            id,
            client,
            backend,
            deadline: IdleDeadline::new(config.idle_timeout),
            max_body_len: config.max_body_len,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Relays until either side closes, the idle deadline expires, or the backend
    /// stream breaks. The session is listed in `registry` for exactly that long.
    pub fn run(self, registry: &SessionRegistry) -> Result<CloseReason, TransportError> {
        let id = self.id;
        registry.insert(
            id,
            SessionEntry {
                peer: self.client.peer_addr().ok(),
                opened: Instant::now(),
                client: self.client.try_clone()?,
                backend: self.backend.try_clone()?,
            },
        );

        let res = self.relay();
        registry.remove(id);
        res
    }

    fn relay(self) -> Result<CloseReason, TransportError> {
        let Session {
            id,
            client,
            backend,
            deadline,
            max_body_len,
        } = self;

        let closer = Arc::new(Closer {
            id,
            reason: OnceLock::new(),
            events: Mutex::new(client.try_clone()?),
            client: client.try_clone()?,
            backend: backend.try_clone()?,
        });
        let events = EventReader::with_limit(
            BufReader::new(client.try_clone()?),
            max_event_len(max_body_len),
        );
        let inbound = FramedReader::new(backend.try_clone()?, max_body_len);

        let spawned = {
            let closer = Arc::clone(&closer);
            let deadline = deadline.clone();
            thread::Builder::new()
                .name(format!("session-{id}-backend"))
                .spawn(move || {
                    let reason = relay_backend(id, inbound, &closer, &deadline);
                    closer.close(reason);
                })
        };
        let backend_relay = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                closer.close(CloseReason::Transport(e.to_string()));
                return Err(e.into());
            }
        };

        let mut outbound = FramedWriter::new(backend);
        let reason = relay_client(id, events, &client, &mut outbound, &deadline);
        closer.close(reason);

        if backend_relay.join().is_err() {
            warn!("session {id}: backend relay panicked");
        }

        Ok(closer
            .reason
            .get()
            .cloned()
            .unwrap_or(CloseReason::ClientClosed))
    }
}

/// Client commands to the backend. Enforces the idle deadline through the client
/// socket's read timeout.
fn relay_client<R: BufRead, O: Outbound>(
    id: SessionId,
    mut events: EventReader<R>,
    client: &TcpStream,
    outbound: &mut O,
    deadline: &IdleDeadline,
) -> CloseReason {
    loop {
        let Some(remaining) = deadline.remaining() else {
            return CloseReason::IdleTimeout;
        };
        if let Err(e) = client.set_read_timeout(Some(remaining)) {
            return CloseReason::Transport(e.to_string());
        }

        match events.read_event() {
            Ok(Some(ClientEvent::Command { data })) => {
                trace!("session {id} -> backend: {data}");
                if let Err(e) = outbound.transmit(&data) {
                    return CloseReason::Transport(e.to_string());
                }
                deadline.touch();
            }
            Ok(Some(ClientEvent::Disconnect { .. }) | None) => return CloseReason::ClientClosed,
            Ok(Some(ClientEvent::Data { .. })) => {
                warn!("session {id}: ignoring data event sent by client");
            }
            Err(TransportError::Json(e)) => warn!("session {id}: skipping malformed event: {e}"),
            Err(TransportError::Io(e))
                if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(e) => return CloseReason::Transport(e.to_string()),
        }
    }
}

/// Backend messages to the client, one `data` event per reassembled body.
fn relay_backend<I: Inbound>(
    id: SessionId,
    mut inbound: I,
    closer: &Closer,
    deadline: &IdleDeadline,
) -> CloseReason {
    loop {
        match inbound.next_body() {
            Ok(Some(body)) => {
                trace!("session {id} <- backend: {body}");
                if let Err(e) = closer.send(&ClientEvent::Data { data: body }) {
                    return CloseReason::Transport(e.to_string());
                }
                deadline.touch();
            }
            Ok(None) => return CloseReason::BackendClosed,
            Err(TransportError::Framing(e)) => return CloseReason::Framing(e),
            Err(e) => return CloseReason::Transport(e.to_string()),
        }
    }
}
