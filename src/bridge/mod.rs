//! Client-to-interpreter relay.
//!
//! A bridge sits between clients that speak line-delimited [`ClientEvent`]s and an
//! interpreter backend that speaks framed messages. Each client connection becomes a
//! [`Session`] with its own backend connection, framing state and idle deadline; the
//! only state sessions share is the [`SessionRegistry`].
//!
//! # Overview
//!
//! - `command` events from the client are framed and written to the backend as-is.
//! - Backend bytes are reassembled and every complete body goes back to the client as
//!   a `data` event.
//! - A session ends when either side closes, when the backend stream cannot be
//!   de-framed, or when nothing has been relayed for the configured idle timeout. The
//!   client is told why in a final `disconnect` event.
//!
//! Bodies are never parsed here; correlating them is the client's business (see
//! [`CorrelationEngine`](crate::protocol::CorrelationEngine)).
//!
//! [`ClientEvent`]: crate::protocol::ClientEvent
mod server;
mod session;

pub use server::BridgeServer;
pub use session::{CloseReason, IdleDeadline, Session, SessionId, SessionRegistry};
