//! Client side of the rsync daemon protocol (version 27).
//!
//! - `Conn`: line and integer primitives over a blocking duplex stream
//! - `Handshake`: drives version, module, arguments and seed exchange
//! - `MuxReader`: strips multiplex framing and routes diagnostics to a sink
//! - `split_uri` / `connect`: turn an `rsync://` URI into a live `Session`

mod client;
mod error;
mod handshake;
mod mux;
mod transport;
mod uri;

pub use client::connect;
pub use error::ProtocolError;
pub use handshake::{
    Handshake, HandshakeState, ProtocolVersion, Session, EXCLUSION_END, RSYNCD_OK,
    RSYNC_VERSION, SAMPLE_ARGS,
};
pub use mux::{
    encode_frame, log_diagnostic, write_frame, FramingError, MessageCode, MuxReader,
    HEADER_LEN, MAX_PAYLOAD_LEN, MPLEX_BASE,
};
pub use transport::{Conn, MAX_LINE_LEN};
pub use uri::{split_uri, RsyncUri, UriError, DEFAULT_PORT};
