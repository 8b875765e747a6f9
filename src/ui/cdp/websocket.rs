//! Minimal RFC 6455 server-side framing.
//!
//! Only what a CDP frontend needs: the upgrade handshake, unmasked
//! server-to-client text frames, masked client-to-server text frames and the
//! close opcode. Continuation, ping/pong and binary frames are rejected.

use crate::debugger::error::Error;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha1::{Digest, Sha1};
use std::io::Read;

const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

const OPCODE_TEXT: u8 = 0x1;
const OPCODE_CLOSE: u8 = 0x8;

/// `Sec-WebSocket-Accept` = base64(SHA-1(client key + GUID)).
pub(crate) fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

pub(crate) fn handshake_response(client_key: &str) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\r\n",
        accept_key(client_key)
    )
}

/// Frame a text payload for the server-to-client direction. A server must
/// not mask its frames.
pub(crate) fn encode_text_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + 10);
    frame.push(0x80 | OPCODE_TEXT); // fin + text

    let len = payload.len();
    if len < 126 {
        frame.push(len as u8);
    } else if len < 65536 {
        frame.push(126);
        frame.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        frame.push(127);
        frame.extend_from_slice(&(len as u64).to_be_bytes());
    }

    frame.extend_from_slice(payload);
    frame
}

pub(crate) enum WsMessage {
    Text(String),
    /// The peer sent a close frame.
    Close,
}

/// Read one client-to-server frame. Client frames are required to be masked.
pub(crate) fn read_frame(reader: &mut impl Read) -> Result<WsMessage, Error> {
    let mut head = [0u8; 2];
    reader.read_exact(&mut head)?;

    let fin = head[0] & 0x80 != 0;
    let opcode = head[0] & 0x0f;
    match opcode {
        OPCODE_CLOSE => return Ok(WsMessage::Close),
        OPCODE_TEXT if fin => {}
        other => return Err(Error::WsOpcode(other)),
    }

    if head[1] & 0x80 == 0 {
        return Err(Error::WsUnmasked);
    }
    let payload_len = match head[1] & 0x7f {
        126 => {
            let mut ext = [0u8; 2];
            reader.read_exact(&mut ext)?;
            u16::from_be_bytes(ext) as usize
        }
        127 => {
            let mut ext = [0u8; 8];
            reader.read_exact(&mut ext)?;
            u64::from_be_bytes(ext) as usize
        }
        len => len as usize,
    };

    let mut mask_key = [0u8; 4];
    reader.read_exact(&mut mask_key)?;

    let mut payload = vec![0u8; payload_len];
    reader.read_exact(&mut payload)?;
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask_key[i % 4];
    }

    Ok(WsMessage::Text(String::from_utf8(payload)?))
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_accept_key_rfc_vector() {
        // the handshake example of RFC 6455 section 1.3
        assert_eq!(
            accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLbMqHFvcPwXm45o21gEwY4U="
        );
    }

    #[test]
    fn test_short_text_frame_layout() {
        let payload = br#"{"id":1,"result":{}}"#;
        let frame = encode_text_frame(payload);
        assert_eq!(frame[0], 0x81);
        assert_eq!(frame[1] as usize, payload.len());
        assert_eq!(frame[1] & 0x80, 0, "server frames are unmasked");
        assert_eq!(&frame[2..], payload);
    }

    #[test]
    fn test_extended_length_encoding() {
        let payload = vec![b'x'; 300];
        let frame = encode_text_frame(&payload);
        assert_eq!(frame[1], 126);
        assert_eq!(u16::from_be_bytes([frame[2], frame[3]]), 300);
        assert_eq!(frame.len(), 4 + 300);
    }

    #[test]
    fn test_masked_client_frame_decoding() {
        let text = br#"{"id":2,"method":"Debugger.resume"}"#;
        let mask = [0x12u8, 0x34, 0x56, 0x78];
        let mut wire = vec![0x81, 0x80 | text.len() as u8];
        wire.extend_from_slice(&mask);
        wire.extend(
            text.iter()
                .enumerate()
                .map(|(i, b)| b ^ mask[i % 4]),
        );

        match read_frame(&mut Cursor::new(wire)).unwrap() {
            WsMessage::Text(decoded) => {
                assert_eq!(decoded.as_bytes(), text);
            }
            WsMessage::Close => panic!("unexpected close"),
        }
    }

    #[test]
    fn test_unmasked_client_frame_rejected() {
        let wire = vec![0x81, 0x02, b'{', b'}'];
        assert!(matches!(
            read_frame(&mut Cursor::new(wire)),
            Err(Error::WsUnmasked)
        ));
    }

    #[test]
    fn test_close_opcode() {
        let wire = vec![0x88, 0x80, 0, 0, 0, 0];
        assert!(matches!(
            read_frame(&mut Cursor::new(wire)).unwrap(),
            WsMessage::Close
        ));
    }
}
