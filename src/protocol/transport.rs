use std::{
    collections::VecDeque,
    io::{self, BufRead, BufReader, Read, Write},
    net::{TcpStream, ToSocketAddrs},
};

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::framing::{self, DEFAULT_MAX_BODY_LEN, Decoder, FramingError};

const READ_CHUNK: usize = 8 * 1024;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport IO error: {0}")]
    Io(#[from] io::Error),
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),
    #[error("malformed event: {0}")]
    Json(#[from] serde_json::Error),
    #[error("connection closed with a partial message buffered")]
    Closed,
    #[error("event line exceeds {limit} bytes")]
    LineTooLong { limit: usize },
}

// Room for the event envelope and for escaping inside the JSON string.
const EVENT_OVERHEAD: usize = 4 * 1024;

/// Longest event line accepted when bodies may be up to `max_body_len` bytes.
pub fn max_event_len(max_body_len: usize) -> usize {
    max_body_len.saturating_mul(2).saturating_add(EVENT_OVERHEAD)
}

/// Events exchanged between a bridge and its clients, one JSON object per line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum ClientEvent {
    /// Request body for the bridge to frame and relay to the backend.
    Command { data: String },
    /// One reassembled backend message.
    Data { data: String },
    Disconnect {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

pub fn write_event<W: Write>(writer: &mut W, event: &ClientEvent) -> Result<(), TransportError> {
    let mut line = serde_json::to_vec(event)?;
    line.push(b'\n');
    writer.write_all(&line)?;
    writer.flush()?;
    Ok(())
}

/// Reads [`ClientEvent`] lines.
///
/// A read interrupted by a socket timeout keeps the partial line, so the next call
/// resumes where the last one stopped.
pub struct EventReader<R: BufRead> {
    reader: R,
    line: Vec<u8>,
    max_line_len: usize,
}

impl<R: BufRead> EventReader<R> {
    pub fn new(reader: R) -> Self {
        Self::with_limit(reader, max_event_len(DEFAULT_MAX_BODY_LEN))
    }

    /// Lines longer than `max_line_len` bytes, newline excluded, are rejected.
    pub fn with_limit(reader: R, max_line_len: usize) -> Self {
        Self {
            reader,
            line: Vec::new(),
            max_line_len,
        }
    }

    /// Returns `Ok(None)` at end of stream. A line that is not a valid event is
    /// consumed and reported as [`TransportError::Json`]; one over the length limit is
    /// dropped and reported as [`TransportError::LineTooLong`].
    pub fn read_event(&mut self) -> Result<Option<ClientEvent>, TransportError> {
        loop {
            let budget = (self.max_line_len + 1).saturating_sub(self.line.len());
            let n = (&mut self.reader)
                .take(budget as u64)
                .read_until(b'\n', &mut self.line)?;
            if self.line.last() != Some(&b'\n') {
                if self.line.len() > self.max_line_len {
                    self.line.clear();
                    return Err(TransportError::LineTooLong {
                        limit: self.max_line_len,
                    });
                }
                if n == 0 {
                    return Ok(None);
                }
                // EOF in the middle of a line; the next read reports it.
                continue;
            }

            let line = std::mem::take(&mut self.line);
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            return Ok(Some(serde_json::from_slice(&line)?));
        }
    }
}

/// Where a correlation engine sends request bodies.
pub trait Outbound: Send {
    fn transmit(&mut self, body: &str) -> Result<(), TransportError>;
}

/// Where a correlation engine receives response bodies from.
pub trait Inbound {
    /// Next complete body, or `Ok(None)` once the peer has closed.
    fn next_body(&mut self) -> Result<Option<String>, TransportError>;
}

/// Writes framed messages straight to an interpreter backend.
pub struct FramedWriter<W: Write> {
    stream: W,
}

impl<W: Write> FramedWriter<W> {
    pub fn new(stream: W) -> Self {
        Self { stream }
    }
}

impl<W: Write + Send> Outbound for FramedWriter<W> {
    fn transmit(&mut self, body: &str) -> Result<(), TransportError> {
        self.stream.write_all(&framing::encode(body))?;
        self.stream.flush()?;
        Ok(())
    }
}

/// Reassembles framed messages from an interpreter backend.
pub struct FramedReader<R: Read> {
    stream: R,
    decoder: Decoder,
    ready: VecDeque<String>,
}

impl<R: Read> FramedReader<R> {
    pub fn new(stream: R, max_body_len: usize) -> Self {
        Self {
            stream,
            decoder: Decoder::new(max_body_len),
            ready: VecDeque::new(),
        }
    }
}

impl<R: Read> Inbound for FramedReader<R> {
    fn next_body(&mut self) -> Result<Option<String>, TransportError> {
        let mut chunk = [0u8; READ_CHUNK];

        loop {
            if let Some(body) = self.ready.pop_front() {
                return Ok(Some(body));
            }

            let n = self.stream.read(&mut chunk)?;
            if n == 0 {
                if !self.decoder.is_idle() {
                    return Err(TransportError::Closed);
                }
                return Ok(None);
            }

            for frame in self.decoder.decode(&chunk[..n]) {
                self.ready.push_back(frame?);
            }
        }
    }
}

/// Sends request bodies to a bridge as `command` events.
pub struct BridgeWriter<W: Write> {
    stream: W,
}

impl<W: Write> BridgeWriter<W> {
    pub fn new(stream: W) -> Self {
        Self { stream }
    }
}

impl<W: Write + Send> Outbound for BridgeWriter<W> {
    fn transmit(&mut self, body: &str) -> Result<(), TransportError> {
        write_event(
            &mut self.stream,
            &ClientEvent::Command {
                data: body.to_string(),
            },
        )
    }
}

/// Receives response bodies from a bridge's `data` events.
pub struct BridgeReader<R: BufRead> {
    events: EventReader<R>,
}

impl<R: BufRead> BridgeReader<R> {
    pub fn new(stream: R) -> Self {
        Self {
            events: EventReader::new(stream),
        }
    }
}

impl<R: BufRead> Inbound for BridgeReader<R> {
    fn next_body(&mut self) -> Result<Option<String>, TransportError> {
        loop {
            match self.events.read_event()? {
                Some(ClientEvent::Data { data }) => return Ok(Some(data)),
                Some(ClientEvent::Disconnect { reason }) => {
                    debug!("bridge disconnected: {}", reason.as_deref().unwrap_or("no reason"));
                    return Ok(None);
                }
                Some(ClientEvent::Command { .. }) => warn!("ignoring command event from bridge"),
                None => return Ok(None),
            }
        }
    }
}

/// Connects directly to an interpreter backend.
pub fn connect_backend<A: ToSocketAddrs>(
    addr: A,
) -> Result<(FramedWriter<TcpStream>, FramedReader<TcpStream>), TransportError> {
    let stream = TcpStream::connect(addr)?;
    let reader = stream.try_clone()?;
    Ok((
        FramedWriter::new(stream),
        FramedReader::new(reader, DEFAULT_MAX_BODY_LEN),
    ))
}

/// Connects to a bridge as a client.
pub fn connect_bridge<A: ToSocketAddrs>(
    addr: A,
) -> Result<(BridgeWriter<TcpStream>, BridgeReader<BufReader<TcpStream>>), TransportError> {
    let stream = TcpStream::connect(addr)?;
    let reader = stream.try_clone()?;
    Ok((
        BridgeWriter::new(stream),
        BridgeReader::new(BufReader::new(reader)),
    ))
}
