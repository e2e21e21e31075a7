use std::net::TcpStream;

use tracing::{info, instrument};

use crate::error::ProtocolError;
use crate::handshake::{Handshake, Session};
use crate::transport::Conn;

/// Connect to an rsync daemon at `address` and complete the handshake for
/// `module` and `path`.
#[instrument(level = "debug")]
pub fn connect(
    address: &str,
    module: &str,
    path: &str,
) -> Result<Session<TcpStream, TcpStream>, ProtocolError> {
    let stream = TcpStream::connect(address)?;
    stream.set_nodelay(true)?;
    let writer = stream.try_clone()?;
    info!("Connected to rsync daemon at {}", address);

    Handshake::new(Conn::new(stream, writer)).run(module, path)
}
