use std::io::{self, BufRead, BufReader, Cursor, Read, Write};
use std::net::TcpListener;
use std::thread;

use rsync_os_protocol::{
    connect, encode_frame, Conn, Handshake, HandshakeState, MessageCode, ProtocolError,
    ProtocolVersion, SAMPLE_ARGS,
};

fn greeting(seed: Option<i32>) -> Vec<u8> {
    let mut script = b"@RSYNCD: 31.0\nWelcome to the mirror\n@RSYNCD: OK\n".to_vec();
    if let Some(seed) = seed {
        script.extend_from_slice(&seed.to_le_bytes());
    }
    script
}

fn run(script: Vec<u8>) -> (Result<Vec<u8>, ProtocolError>, Option<ProtocolVersion>) {
    let conn = Conn::new(Cursor::new(script), Vec::new());
    match Handshake::new(conn).run("debian", "/pool/") {
        Ok(session) => {
            let version = session.remote_version();
            let (_, written) = session.into_parts();
            (Ok(written), version)
        }
        Err(e) => (Err(e), None),
    }
}

fn failed_state(script: &[u8]) -> HandshakeState {
    let (result, _) = run(script.to_vec());
    match result {
        Err(ProtocolError::HandshakeFailed { state, .. }) => state,
        other => panic!("expected handshake failure, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn handshake_reaches_mux_active() {
    let mut script = greeting(Some(0x0102_0304));
    script.extend(encode_frame(MessageCode::Info, b"motd").unwrap());
    script.extend(encode_frame(MessageCode::Data, b"flist").unwrap());

    let conn = Conn::new(Cursor::new(script), Vec::new());
    let mut session = Handshake::new(conn).run("debian", "/pool/").unwrap();
    assert_eq!(session.seed(), 0x0102_0304);
    assert_eq!(
        session.remote_version(),
        Some(ProtocolVersion { major: 31, minor: 0 })
    );
    assert_eq!(session.module(), "debian");

    let mut data = Vec::new();
    session.reader().read_to_end(&mut data).unwrap();
    assert_eq!(data, b"flist");

    let (_, written) = session.into_parts();
    let mut expected = b"@RSYNCD: 27.0\ndebian\n".to_vec();
    expected.extend_from_slice(SAMPLE_ARGS.as_bytes());
    expected.extend_from_slice(b"debian/pool/\n\n");
    expected.extend_from_slice(&[0, 0, 0, 0]);
    assert_eq!(written, expected);
}

#[test]
fn unparseable_banner_is_tolerated() {
    let mut script = b"RSYNC daemon ready\n@RSYNCD: OK\n".to_vec();
    script.extend_from_slice(&7i32.to_le_bytes());
    let (result, version) = run(script);
    assert!(result.is_ok());
    assert_eq!(version, None);
}

#[test]
fn truncated_scripts_report_state() {
    assert_eq!(failed_state(b""), HandshakeState::VersionReceived);
    assert_eq!(failed_state(b"@RSYNCD: 31.0"), HandshakeState::VersionReceived);
    assert_eq!(failed_state(b"@RSYNCD: 31.0\n"), HandshakeState::AwaitingOk);
    assert_eq!(
        failed_state(b"@RSYNCD: 31.0\nno ok here\n"),
        HandshakeState::AwaitingOk
    );
    assert_eq!(failed_state(&greeting(None)), HandshakeState::SeedReceived);

    let mut short_seed = greeting(None);
    short_seed.extend_from_slice(&[1, 2]);
    assert_eq!(failed_state(&short_seed), HandshakeState::SeedReceived);
}

#[test]
fn daemon_error_aborts_in_awaiting_ok() {
    let script = b"@RSYNCD: 31.0\n@ERROR: Unknown module 'debian'\n@RSYNCD: OK\n".to_vec();
    let (result, _) = run(script);
    match result {
        Err(ProtocolError::HandshakeFailed { state, source }) => {
            assert_eq!(state, HandshakeState::AwaitingOk);
            assert!(source.to_string().contains("Unknown module"));
        }
        other => panic!("expected rejection, got {:?}", other.map(|_| ())),
    }
}

struct BrokenPipe;

impl Write for BrokenPipe {
    fn write(&mut self, _: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn write_failure_reports_version_sent() {
    let conn = Conn::new(Cursor::new(greeting(Some(1))), BrokenPipe);
    let err = Handshake::new(conn).run("debian", "/").unwrap_err();
    assert_eq!(err.state(), Some(HandshakeState::VersionSent));
}

#[test]
fn connect_over_tcp() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap().to_string();

    let server = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut writer = stream.try_clone().unwrap();
        let mut reader = BufReader::new(stream);

        writer.write_all(b"@RSYNCD: 30.0\n").unwrap();
        let mut lines = Vec::new();
        for _ in 0..2 {
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            lines.push(line);
        }
        writer.write_all(b"@RSYNCD: OK\n").unwrap();

        loop {
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            if line == "\n" {
                break;
            }
            lines.push(line);
        }
        writer.write_all(&42i32.to_le_bytes()).unwrap();

        let mut filter_end = [0u8; 4];
        reader.read_exact(&mut filter_end).unwrap();
        writer
            .write_all(&encode_frame(MessageCode::Data, b"hello").unwrap())
            .unwrap();
        (lines, filter_end)
    });

    let mut session = connect(&address, "pub", "/").unwrap();
    assert_eq!(session.seed(), 42);
    let mut data = Vec::new();
    session.reader().read_to_end(&mut data).unwrap();
    assert_eq!(data, b"hello");

    let (lines, filter_end) = server.join().unwrap();
    assert_eq!(lines[0], "@RSYNCD: 27.0\n");
    assert_eq!(lines[1], "pub\n");
    assert_eq!(lines.last().map(String::as_str), Some("pub/\n"));
    assert_eq!(filter_end, [0, 0, 0, 0]);
}
