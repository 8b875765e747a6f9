//! `Content-Length` framing over a byte stream.

use crate::debugger::error::Error;
use std::io::{BufRead, Read, Write};

/// Read a single framed JSON message.
pub(crate) fn read_message(reader: &mut impl BufRead) -> Result<serde_json::Value, Error> {
    let mut content_length: Option<usize> = None;
    loop {
        let mut line = String::new();
        let read_n = reader.read_line(&mut line)?;
        if read_n == 0 {
            return Err(Error::Disconnected);
        }
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            break;
        }
        if let Some(v) = line.strip_prefix("Content-Length:") {
            content_length = Some(
                v.trim()
                    .parse()
                    .map_err(|_| Error::Protocol("dap", line.to_string()))?,
            );
        }
    }

    let len =
        content_length.ok_or_else(|| Error::Protocol("dap", "missing Content-Length".to_string()))?;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    Ok(serde_json::from_slice(&buf)?)
}

/// Write a single framed JSON message.
pub(crate) fn write_message(
    writer: &mut impl Write,
    message: &serde_json::Value,
) -> Result<(), Error> {
    let payload = serde_json::to_vec(message)?;
    write!(writer, "Content-Length: {}\r\n\r\n", payload.len())?;
    writer.write_all(&payload)?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;
    use std::io::Cursor;

    #[test]
    fn test_round_trip() {
        let msg = json!({"seq": 1, "type": "request", "command": "threads"});
        let mut wire = Vec::new();
        write_message(&mut wire, &msg).unwrap();

        let text = String::from_utf8(wire.clone()).unwrap();
        assert!(text.starts_with("Content-Length: "));
        assert!(text.contains("\r\n\r\n"));

        let mut reader = Cursor::new(wire);
        let parsed = read_message(&mut reader).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_read_without_length_header_fails() {
        let mut reader = Cursor::new(b"X-Header: 1\r\n\r\n".to_vec());
        assert!(matches!(
            read_message(&mut reader),
            Err(Error::Protocol("dap", _))
        ));
    }
}
