use std::io::{self, Read, Write};

/// Longest text line accepted from the daemon, newline included.
pub const MAX_LINE_LEN: usize = 4096;

/// Blocking duplex connection with the primitives the handshake needs.
///
/// Lines are read one byte at a time so nothing past the newline is consumed;
/// whatever follows (the seed, then multiplexed frames) stays in the stream.
pub struct Conn<R, W> {
    reader: R,
    writer: W,
}

impl<R, W> Conn<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }

    pub fn into_parts(self) -> (R, W) {
        (self.reader, self.writer)
    }
}

impl<R: Read, W: Write> Conn<R, W> {
    /// Write `buf` in full and flush.
    pub fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.writer.write_all(buf)?;
        self.writer.flush()
    }

    /// Read up to and including `\n`, returning the line without it.
    pub fn read_line(&mut self) -> io::Result<String> {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];

        loop {
            if self.reader.read(&mut byte)? == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed before end of line",
                ));
            }
            if byte[0] == b'\n' {
                break;
            }
            line.push(byte[0]);
            if line.len() >= MAX_LINE_LEN {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("line exceeds {MAX_LINE_LEN} bytes"),
                ));
            }
        }

        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Ok(String::from_utf8_lossy(&line).into_owned())
    }

    pub fn read_i32(&mut self) -> io::Result<i32> {
        let mut buf = [0u8; 4];
        self.reader.read_exact(&mut buf)?;
        Ok(i32::from_le_bytes(buf))
    }

    pub fn write_i32(&mut self, value: i32) -> io::Result<()> {
        self.write_all(&value.to_le_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn conn(input: &[u8]) -> Conn<Cursor<Vec<u8>>, Vec<u8>> {
        Conn::new(Cursor::new(input.to_vec()), Vec::new())
    }

    #[test]
    fn read_line_stops_at_newline() {
        let mut c = conn(b"@RSYNCD: 30.0\r\n\x01\x02");
        assert_eq!(c.read_line().unwrap(), "@RSYNCD: 30.0");

        let (mut rest, _) = c.into_parts();
        let mut tail = Vec::new();
        rest.read_to_end(&mut tail).unwrap();
        assert_eq!(tail, vec![1, 2]);
    }

    #[test]
    fn read_line_eof_is_error() {
        let mut c = conn(b"partial");
        let err = c.read_line().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn read_line_rejects_overlong() {
        let mut c = conn(&vec![b'a'; MAX_LINE_LEN + 10]);
        let err = c.read_line().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn integers_are_little_endian() {
        let mut c = conn(&[0x78, 0x56, 0x34, 0x12]);
        assert_eq!(c.read_i32().unwrap(), 0x1234_5678);

        c.write_i32(-2).unwrap();
        let (_, written) = c.into_parts();
        assert_eq!(written, vec![0xfe, 0xff, 0xff, 0xff]);
    }
}
