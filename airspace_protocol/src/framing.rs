// Length-delimited framing for both server channels.
//
// Two wire formats live here:
//
// - **RPC channel**: a 4-byte big-endian length prefix followed by a JSON
//   payload (`write_message` / `read_message`). The caller handles JSON
//   serialization, keeping this module format-agnostic. `MAX_MESSAGE_SIZE`
//   protects against unbounded allocation from a corrupt length prefix.
//
// - **Control socket**: a 2-byte big-endian length prefix followed by that
//   many bytes of UTF-8 text (`write_frame` / `read_frame`). File bodies that
//   follow a `fileTransfer` frame are raw bytes with no inner framing; see
//   `control.rs` for the decoder state machine that tracks them.
//
// Both readers block on `read_exact`; there is no polling.

use std::io::{self, Read, Write};

use crate::error::FrameError;

/// Maximum allowed RPC message size (16 MB).
pub const MAX_MESSAGE_SIZE: u32 = 16 * 1024 * 1024;

/// Maximum text payload of a control frame (limited by the 2-byte prefix).
pub const MAX_FRAME_LEN: usize = u16::MAX as usize;

/// Write a length-delimited RPC message: 4-byte big-endian length, then payload.
pub fn write_message<W: Write>(writer: &mut W, msg: &[u8]) -> io::Result<()> {
    let len = u32::try_from(msg.len())
        .ok()
        .filter(|len| *len <= MAX_MESSAGE_SIZE)
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "message too large: {} bytes (max {MAX_MESSAGE_SIZE})",
                    msg.len()
                ),
            )
        })?;
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(msg)?;
    writer.flush()?;
    Ok(())
}

/// Read a length-delimited RPC message: 4-byte big-endian length, then payload.
///
/// Returns `UnexpectedEof` if the stream closes before or during a message,
/// and `InvalidData` if the length exceeds `MAX_MESSAGE_SIZE`.
pub fn read_message<R: Read>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_MESSAGE_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("message too large: {len} bytes (max {MAX_MESSAGE_SIZE})"),
        ));
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

/// Write one control frame and flush it.
pub fn write_frame<W: Write>(writer: &mut W, text: &str) -> Result<(), FrameError> {
    let bytes = text.as_bytes();
    let len = u16::try_from(bytes.len()).map_err(|_| FrameError::TooLong(bytes.len()))?;
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(bytes)?;
    writer.flush()?;
    Ok(())
}

/// Read one control frame, blocking until the whole payload has arrived.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<String, FrameError> {
    let mut len_buf = [0u8; 2];
    reader.read_exact(&mut len_buf)?;
    let len = u16::from_be_bytes(len_buf) as usize;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    Ok(String::from_utf8(buf)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn rpc_message_roundtrip() {
        let mut buf = Vec::new();
        write_message(&mut buf, b"{\"method\":\"Stop\"}").unwrap();
        assert_eq!(&buf[..4], &17u32.to_be_bytes());

        let mut cursor = Cursor::new(&buf);
        assert_eq!(read_message(&mut cursor).unwrap(), b"{\"method\":\"Stop\"}");
    }

    #[test]
    fn rejects_oversized_rpc_read() {
        let fake_len = (MAX_MESSAGE_SIZE + 1).to_be_bytes();
        let mut cursor = Cursor::new(fake_len.to_vec());
        let err = read_message(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn control_frame_has_two_byte_prefix() {
        let mut buf = Vec::new();
        write_frame(&mut buf, "{sessionId: 42}").unwrap();
        assert_eq!(&buf[..2], &[0, 15]);
        assert_eq!(&buf[2..], b"{sessionId: 42}");
    }

    #[test]
    fn control_frames_in_sequence() {
        let mut buf = Vec::new();
        for text in ["first", "", "third"] {
            write_frame(&mut buf, text).unwrap();
        }
        let mut cursor = Cursor::new(&buf);
        assert_eq!(read_frame(&mut cursor).unwrap(), "first");
        assert_eq!(read_frame(&mut cursor).unwrap(), "");
        assert_eq!(read_frame(&mut cursor).unwrap(), "third");
        assert!(read_frame(&mut cursor).unwrap_err().is_eof());
    }

    #[test]
    fn rejects_frame_over_u16() {
        let text = "x".repeat(MAX_FRAME_LEN + 1);
        let mut buf = Vec::new();
        let err = write_frame(&mut buf, &text).unwrap_err();
        assert!(matches!(err, FrameError::TooLong(n) if n == MAX_FRAME_LEN + 1));
        assert!(buf.is_empty());
    }

    #[test]
    fn rejects_invalid_utf8() {
        let mut cursor = Cursor::new(vec![0, 2, 0xC3, 0x28]);
        let err = read_frame(&mut cursor).unwrap_err();
        assert!(matches!(err, FrameError::InvalidUtf8(_)));
    }

    #[test]
    fn truncated_frame_is_eof() {
        let mut cursor = Cursor::new(vec![0, 10, b'a', b'b']);
        assert!(read_frame(&mut cursor).unwrap_err().is_eof());
    }
}
