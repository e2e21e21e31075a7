use std::io;

use thiserror::Error;

use crate::handshake::HandshakeState;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Transport error: {0}")]
    Transport(#[from] io::Error),

    #[error("Handshake failed in state {state}: {source}")]
    HandshakeFailed {
        state: HandshakeState,
        #[source]
        source: io::Error,
    },
}

impl ProtocolError {
    /// The handshake state a failure is attributed to, if any.
    pub fn state(&self) -> Option<HandshakeState> {
        match self {
            ProtocolError::HandshakeFailed { state, .. } => Some(*state),
            ProtocolError::Transport(_) => None,
        }
    }
}
