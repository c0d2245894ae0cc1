//! Length-prefixed message framing.
//!
//! Every message on a backend connection is an HTTP-style header block followed by the
//! body it announces:
//!
//! ```text
//! Content-Length: 43\r\n
//! Content-Type: jrpcei\r\n
//! \r\n
//! {"jsonrpc":"2.0","id":"1","method":"getLeaves"}
//! ```
//!
//! [`encode`] produces that layout. [`Decoder`] reassembles bodies from a byte stream
//! delivered in arbitrary chunks: a chunk may end mid-header, mid-body, or carry any
//! number of complete messages back to back.
use std::{mem, str};

use log::trace;
use thiserror::Error;

/// Value written in the `Content-Type` header of every outgoing message.
pub const CONTENT_TYPE: &str = "jrpcei";

/// Largest body a [`Decoder`] accepts unless configured otherwise.
pub const DEFAULT_MAX_BODY_LEN: usize = 64 * 1024 * 1024;

const MAX_HEADER_LEN: usize = 8 * 1024;
const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FramingError {
    #[error("missing Content-Length header")]
    MissingLength,

    #[error("invalid Content-Length '{0}'")]
    InvalidLength(String),

    #[error("malformed header line '{0}'")]
    MalformedHeader(String),

    #[error("header block exceeds {MAX_HEADER_LEN} bytes")]
    HeaderTooLong,

    #[error("declared body length {declared} exceeds limit of {limit} bytes")]
    BodyTooLong { declared: usize, limit: usize },

    #[error("message body is not valid UTF-8")]
    InvalidUtf8,
}

/// Frames `body` for the wire. The declared length is the body's byte length.
pub fn encode(body: &str) -> Vec<u8> {
    let header = format!(
        "Content-Length: {}\r\nContent-Type: {CONTENT_TYPE}\r\n\r\n",
        body.len()
    );

    let mut out = Vec::with_capacity(header.len() + body.len());
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(body.as_bytes());
    out
}

#[derive(Debug)]
enum State {
    AwaitingHeader,
    AwaitingBody { remaining: usize, body: Vec<u8> },
}

/// Incremental decoder for framed messages.
///
/// Bytes handed to [`Decoder::decode`] that do not complete a message are kept until
/// the next call, so one decoder must be used per byte stream.
#[derive(Debug)]
pub struct Decoder {
    state: State,
    pending: Vec<u8>,
    max_body_len: usize,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BODY_LEN)
    }
}

impl Decoder {
    pub fn new(max_body_len: usize) -> Self {
        Self {
            state: State::AwaitingHeader,
            pending: Vec::new(),
            max_body_len,
        }
    }

    /// Feeds a chunk and returns the messages it completes, in stream order.
    ///
    /// The iterator is lazy; bytes it has not reached when dropped are scanned by the
    /// next call. After an error the decoder discards everything buffered and starts
    /// over at a header boundary.
    pub fn decode(&mut self, chunk: &[u8]) -> Frames<'_> {
        self.pending.extend_from_slice(chunk);
        Frames { decoder: self }
    }

    /// True when no partial message is buffered.
    pub fn is_idle(&self) -> bool {
        matches!(self.state, State::AwaitingHeader) && self.pending.is_empty()
    }

    fn next_frame(&mut self) -> Option<Result<String, FramingError>> {
        loop {
            if let State::AwaitingBody { remaining, body } = &mut self.state {
                if self.pending.len() < *remaining {
                    *remaining -= self.pending.len();
                    body.append(&mut self.pending);
                    return None;
                }

                let rest = self.pending.split_off(*remaining);
                body.append(&mut self.pending);
                self.pending = rest;

                let body = mem::take(body);
                self.state = State::AwaitingHeader;
                return Some(self.finish(body));
            }

            match self.scan_header() {
                Ok(Some(declared)) => {
                    trace!("header declares {declared} byte body");
                    self.state = State::AwaitingBody {
                        remaining: declared,
                        body: Vec::with_capacity(declared.min(MAX_HEADER_LEN)),
                    };
                }
                Ok(None) => return None,
                Err(e) => return Some(Err(self.fail(e))),
            }
        }
    }

    fn scan_header(&mut self) -> Result<Option<usize>, FramingError> {
        let Some(end) = find(&self.pending, HEADER_TERMINATOR) else {
            if self.pending.len() > MAX_HEADER_LEN {
                return Err(FramingError::HeaderTooLong);
            }
            return Ok(None);
        };

        if end > MAX_HEADER_LEN {
            return Err(FramingError::HeaderTooLong);
        }

        let declared = parse_header(&self.pending[..end])?;
        if declared > self.max_body_len {
            return Err(FramingError::BodyTooLong {
                declared,
                limit: self.max_body_len,
            });
        }

        self.pending.drain(..end + HEADER_TERMINATOR.len());
        Ok(Some(declared))
    }

    fn finish(&mut self, body: Vec<u8>) -> Result<String, FramingError> {
        String::from_utf8(body).map_err(|_| self.fail(FramingError::InvalidUtf8))
    }

    fn fail(&mut self, err: FramingError) -> FramingError {
        self.state = State::AwaitingHeader;
        self.pending.clear();
        err
    }
}

/// Messages completed by one [`Decoder::decode`] call.
pub struct Frames<'a> {
    decoder: &'a mut Decoder,
}

impl Iterator for Frames<'_> {
    type Item = Result<String, FramingError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.decoder.next_frame()
    }
}

fn parse_header(header: &[u8]) -> Result<usize, FramingError> {
    let text = str::from_utf8(header)
        .map_err(|_| FramingError::MalformedHeader(String::from_utf8_lossy(header).into_owned()))?;

    let mut length = None;
    for line in text.split("\r\n").filter(|l| !l.is_empty()) {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| FramingError::MalformedHeader(line.to_string()))?;

        if name.trim().eq_ignore_ascii_case("content-length") {
            let value = value.trim();
            let parsed = value
                .parse::<usize>()
                .map_err(|_| FramingError::InvalidLength(value.to_string()))?;
            length = Some(parsed);
        }
    }

    length.ok_or(FramingError::MissingLength)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXECUTE: &str =
        r#"{"jsonrpc":"2.0","id":"1","method":"execute","params":{"program":"x"}}"#;
    const REFERENCES: &str = r#"{"jsonrpc":"2.0","id":"7","result":[0,1,2,5]}"#;

    fn collect(decoder: &mut Decoder, chunk: &[u8]) -> Vec<String> {
        decoder
            .decode(chunk)
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn encode_declares_body_byte_length() {
        let framed = encode(EXECUTE);
        let text = String::from_utf8(framed).unwrap();
        let (header, body) = text.split_once("\r\n\r\n").unwrap();

        assert_eq!(
            header,
            format!("Content-Length: {}\r\nContent-Type: jrpcei", EXECUTE.len())
        );
        assert_eq!(body, EXECUTE);
    }

    #[test]
    fn encode_counts_bytes_not_chars() {
        let body = r#"{"program":"λx.x"}"#;
        let framed = encode(body);
        let header = format!("Content-Length: {}\r\n", body.len());

        assert!(body.len() > body.chars().count());
        assert!(framed.starts_with(header.as_bytes()));
    }

    #[test]
    fn decode_single_chunk() {
        let mut decoder = Decoder::default();

        assert_eq!(collect(&mut decoder, &encode(EXECUTE)), vec![EXECUTE]);
        assert!(decoder.is_idle());
    }

    #[test]
    fn decode_one_byte_at_a_time() {
        let mut decoder = Decoder::default();
        let mut out = Vec::new();

        for byte in encode("{\"λ\":[1,2,3]}") {
            out.extend(collect(&mut decoder, &[byte]));
        }

        assert_eq!(out, vec!["{\"λ\":[1,2,3]}"]);
        assert!(decoder.is_idle());
    }

    #[test]
    fn decode_every_three_way_split() {
        let framed = encode(REFERENCES);

        for a in 0..=framed.len() {
            for b in a..=framed.len() {
                let mut decoder = Decoder::default();
                let mut out = collect(&mut decoder, &framed[..a]);
                out.extend(collect(&mut decoder, &framed[a..b]));
                out.extend(collect(&mut decoder, &framed[b..]));

                assert_eq!(out, vec![REFERENCES], "split at {a} and {b}");
            }
        }
    }

    #[test]
    fn decode_concatenated_messages_in_order() {
        let bodies = [EXECUTE, REFERENCES, "", "{}"];
        let stream = bodies.iter().flat_map(|b| encode(b)).collect::<Vec<u8>>();

        let mut decoder = Decoder::default();
        assert_eq!(collect(&mut decoder, &stream), bodies);
    }

    #[test]
    fn decode_suffix_carries_partial_message() {
        let mut stream = encode(EXECUTE);
        let second = encode(REFERENCES);
        stream.extend_from_slice(&second[..10]);

        let mut decoder = Decoder::default();
        assert_eq!(collect(&mut decoder, &stream), vec![EXECUTE]);
        assert!(!decoder.is_idle());
        assert_eq!(collect(&mut decoder, &second[10..]), vec![REFERENCES]);
    }

    #[test]
    fn decode_accepts_header_without_space() {
        let raw = format!(
            "Content-Length:{}\r\nContent-Type: jrpcei\r\n\r\n{REFERENCES}",
            REFERENCES.len()
        );
        let mut decoder = Decoder::default();

        assert_eq!(collect(&mut decoder, raw.as_bytes()), vec![REFERENCES]);
    }

    #[test]
    fn decode_rejects_non_numeric_length() {
        let mut decoder = Decoder::default();
        let res: Vec<Result<String, FramingError>> = decoder
            .decode(b"Content-Length: ten\r\n\r\n0123456789")
            .collect();

        assert_eq!(res, vec![Err(FramingError::InvalidLength("ten".into()))]);
        assert!(decoder.is_idle());
    }

    #[test]
    fn decode_rejects_missing_length() {
        let mut decoder = Decoder::default();
        let res: Vec<Result<String, FramingError>> =
            decoder.decode(b"Content-Type: jrpcei\r\n\r\n{}").collect();

        assert_eq!(res, vec![Err(FramingError::MissingLength)]);
    }

    #[test]
    fn decode_rejects_oversized_body() {
        let mut decoder = Decoder::new(4);
        let res: Vec<Result<String, FramingError>> = decoder.decode(&encode("too long")).collect();

        assert_eq!(
            res,
            vec![Err(FramingError::BodyTooLong {
                declared: 8,
                limit: 4
            })]
        );
    }

    #[test]
    fn decode_rejects_runaway_header() {
        let mut decoder = Decoder::default();
        let junk = vec![b'a'; MAX_HEADER_LEN + 1];
        let res: Vec<Result<String, FramingError>> = decoder.decode(&junk).collect();

        assert_eq!(res, vec![Err(FramingError::HeaderTooLong)]);
    }

    #[test]
    fn decoder_recovers_after_error() {
        let mut decoder = Decoder::default();
        let _ = decoder.decode(b"garbage\r\n\r\n").count();

        assert_eq!(collect(&mut decoder, &encode(EXECUTE)), vec![EXECUTE]);
    }
}
