use std::fmt;
use std::io::{self, Read, Write};

use tracing::{debug, info, instrument, warn};

use crate::error::ProtocolError;
use crate::mux::MuxReader;
use crate::transport::Conn;

/// Banner this client announces.
pub const RSYNC_VERSION: &str = "@RSYNCD: 27.0\n";
/// Sentinel that ends the daemon's greeting lines.
pub const RSYNCD_OK: &str = "@RSYNCD: OK";
/// Baseline server-side arguments: a sender that preserves links, perms and times, recursively.
pub const SAMPLE_ARGS: &str = "--server\n--sender\n-l\n-p\n-r\n-t\n.\n";
/// Terminator of the (empty) filter list.
pub const EXCLUSION_END: i32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Init,
    VersionSent,
    VersionReceived,
    ModuleSent,
    AwaitingOk,
    ArgumentsSent,
    SeedReceived,
    MuxActive,
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HandshakeState::Init => "Init",
            HandshakeState::VersionSent => "VersionSent",
            HandshakeState::VersionReceived => "VersionReceived",
            HandshakeState::ModuleSent => "ModuleSent",
            HandshakeState::AwaitingOk => "AwaitingOK",
            HandshakeState::ArgumentsSent => "ArgumentsSent",
            HandshakeState::SeedReceived => "SeedReceived",
            HandshakeState::MuxActive => "MuxActive",
        };
        f.write_str(name)
    }
}

/// Version parsed from a daemon banner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolVersion {
    pub major: u32,
    pub minor: u32,
}

impl ProtocolVersion {
    /// Parse `@RSYNCD: <major>.<minor>`, ignoring anything after the minor number
    /// (newer daemons append digest lists).
    pub fn parse_banner(line: &str) -> Option<Self> {
        let rest = line.strip_prefix("@RSYNCD: ")?;
        let (major, rest) = rest.split_once('.')?;
        let minor: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        Some(Self {
            major: major.trim().parse().ok()?,
            minor: minor.parse().ok()?,
        })
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// An established daemon session: the demultiplexed read side, the raw write
/// side and what the daemon told us during the handshake.
pub struct Session<R, W> {
    reader: MuxReader<R>,
    writer: W,
    seed: i32,
    remote_version: Option<ProtocolVersion>,
    module: String,
    path: String,
}

impl<R, W> Session<R, W> {
    /// Checksum seed sent by the daemon.
    pub fn seed(&self) -> i32 {
        self.seed
    }

    pub fn remote_version(&self) -> Option<ProtocolVersion> {
        self.remote_version
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn reader(&mut self) -> &mut MuxReader<R> {
        &mut self.reader
    }

    pub fn writer(&mut self) -> &mut W {
        &mut self.writer
    }

    pub fn into_parts(self) -> (MuxReader<R>, W) {
        (self.reader, self.writer)
    }
}

impl<R, W> fmt::Debug for Session<R, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("module", &self.module)
            .field("path", &self.path)
            .field("seed", &self.seed)
            .field("remote_version", &self.remote_version)
            .finish()
    }
}

/// Client side of the daemon handshake.
///
/// Each step runs in a named state; a failed read or write aborts the whole
/// handshake with the state it happened in.
pub struct Handshake<R, W> {
    conn: Conn<R, W>,
    state: HandshakeState,
}

impl<R: Read, W: Write> Handshake<R, W> {
    pub fn new(conn: Conn<R, W>) -> Self {
        Self {
            conn,
            state: HandshakeState::Init,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    fn enter(&mut self, state: HandshakeState) {
        debug!("Handshake {} -> {}", self.state, state);
        self.state = state;
    }

    fn fail(&self, source: io::Error) -> ProtocolError {
        warn!("Handshake failed in {}: {}", self.state, source);
        ProtocolError::HandshakeFailed {
            state: self.state,
            source,
        }
    }

    /// Run the handshake for `module` and request `path` to completion.
    #[instrument(skip(self), level = "debug")]
    pub fn run(mut self, module: &str, path: &str) -> Result<Session<R, W>, ProtocolError> {
        self.enter(HandshakeState::VersionSent);
        self.conn
            .write_all(RSYNC_VERSION.as_bytes())
            .map_err(|e| self.fail(e))?;

        self.enter(HandshakeState::VersionReceived);
        let banner = self.conn.read_line().map_err(|e| self.fail(e))?;
        let remote_version = ProtocolVersion::parse_banner(&banner);
        match remote_version {
            Some(version) => info!("Remote rsync daemon speaks protocol {}", version),
            None => warn!("Unrecognized daemon banner: {:?}", banner),
        }

        self.enter(HandshakeState::ModuleSent);
        self.conn
            .write_all(format!("{module}\n").as_bytes())
            .map_err(|e| self.fail(e))?;

        self.enter(HandshakeState::AwaitingOk);
        loop {
            let line = self.conn.read_line().map_err(|e| self.fail(e))?;
            if line.contains(RSYNCD_OK) {
                break;
            }
            if line.starts_with("@ERROR") || line.starts_with("@RSYNCD: EXIT") {
                return Err(self.fail(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    format!("daemon refused module {module}: {line}"),
                )));
            }
            info!("{}", line);
        }

        self.enter(HandshakeState::ArgumentsSent);
        let args = format!("{SAMPLE_ARGS}{module}{path}\n\n");
        self.conn
            .write_all(args.as_bytes())
            .map_err(|e| self.fail(e))?;

        self.enter(HandshakeState::SeedReceived);
        let seed = self.conn.read_i32().map_err(|e| self.fail(e))?;
        debug!("Checksum seed {}", seed);

        self.enter(HandshakeState::MuxActive);
        self.conn
            .write_i32(EXCLUSION_END)
            .map_err(|e| self.fail(e))?;
        let (reader, writer) = self.conn.into_parts();

        info!("Handshake completed for module {}", module);
        Ok(Session {
            reader: MuxReader::new(reader),
            writer,
            seed,
            remote_version,
            module: module.to_string(),
            path: path.to_string(),
        })
    }
}
