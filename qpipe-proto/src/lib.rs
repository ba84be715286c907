//! Wire protocol for qpipe control-host ↔ remote-primitive communication.
//!
//! The transport is a pair of pipes into a remote interpreter. Requests are
//! single text lines naming a remote primitive ([`Request`]); replies and
//! file chunks are framed with decimal length lines (see [`codec`]), and
//! remote OS failures travel as marshalled exceptions ([`RemoteError`]).
//!
//! Everything here works over plain `BufRead`/`Write`, so the same code
//! serves the host session, the native agent and in-memory tests.

pub mod codec;
mod error;
mod exception;
pub mod literal;
mod message;

pub use codec::{ChunkHeader, Flag, MAX_CHUNK, MAX_LINE, MAX_OUTPUT, MAX_REQUEST, READY};
pub use error::ProtocolError;
pub use exception::{RemoteError, RemoteErrorKind};
pub use message::{ExecOutput, Request, check_ready, read_ack, read_exec_reply, write_failure};

/// Version of the request/reply format, also stamped on the bootstrap asset.
pub const PROTOCOL_VERSION: u32 = 1;

/// First line of the remote primitives payload.
pub const BOOTSTRAP_HEADER: &str = "# qpipe remote primitives, protocol 1";

/// Last line of the remote primitives payload.
pub const BOOTSTRAP_END: &str = "# end of qpipe bootstrap";
