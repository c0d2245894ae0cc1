//! Exploring interpreter protocol.
//!
//! This module defines how requests reach an interpreter and how its answers find their
//! way back to the code that asked: the wire framing, the message catalog, the
//! transports a client can speak, and the engine that correlates responses with the
//! requests that caused them.
//!
//! # Overview
//!
//! An exploring interpreter keeps a tree of program states. Each node is a
//! [`Reference`]; executing a program fragment adds an [`Edge`] from the current node to
//! a new one, and `jump`/`revert`/`deref` move around or prune the tree. Clients drive
//! it with JSON-RPC 2.0 requests and receive exactly one response per request.
//!
//! # Key Components
//!
//! - [`framing`]: `Content-Length` framing and the incremental [`Decoder`].
//! - [`Call`], [`Request`], [`Response`]: the message catalog.
//! - [`CorrelationEngine`]: issues requests and dispatches responses to a [`Handler`].
//! - [`Outbound`] / [`Inbound`]: the seams an engine reads and writes through, with
//!   implementations for a direct backend connection and for a bridge session.
//!
//! # Wire Format
//!
//! ```text
//! Content-Length: <n>\r\n
//! Content-Type: jrpcei\r\n
//! \r\n
//! <n bytes of UTF-8 JSON>
//! ```
//!
//! # See Also
//!
//! - [`bridge`](crate::bridge): Relays framed traffic between clients and a backend.
pub mod framing;

mod engine;
mod message;
mod pending;
mod transport;

pub use engine::{CorrelationEngine, Dispatch, Handler, Unattributable};
pub use framing::{Decoder, FramingError};
pub use message::{
    Call, Edge, EdgeLabel, ErrorCode, ExecuteParams, ExecuteResult, ExecutionTree, JumpResult,
    Method, Outcome, PathParams, ProtocolDecodeError, Reference, ReferenceParams, Reply, Request,
    RequestId, Response, ResponseError, RevertResult, TraceParams,
};
pub use transport::{
    BridgeReader, BridgeWriter, ClientEvent, EventReader, FramedReader, FramedWriter, Inbound,
    Outbound, TransportError, connect_backend, connect_bridge, max_event_len, write_event,
};
