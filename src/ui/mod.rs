//! Wire front ends.
//!
//! A transport listener accepts stream connections and reads a one-shot
//! greeting to decide which protocol the peer speaks: the line REPL
//! (`version: ...` greeting), DAP (`Content-Length:` framed JSON) or CDP
//! (an HTTP WebSocket upgrade). The matching adapter is built once per
//! connection and handed to the session coordinator.

pub mod cdp;
pub mod dap;
pub mod repl;

use crate::debugger::error::Error;
use crate::debugger::{ProtocolAdapter, SessionApi, VERSION};
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::sync::mpsc::{channel, Receiver};

/// A bidirectional byte stream with clonable write halves.
pub(crate) trait Transport: Read + Write + Send {
    fn try_clone_box(&self) -> std::io::Result<Box<dyn Transport>>;
}

impl Transport for TcpStream {
    fn try_clone_box(&self) -> std::io::Result<Box<dyn Transport>> {
        Ok(Box::new(self.try_clone()?))
    }
}

impl Transport for UnixStream {
    fn try_clone_box(&self) -> std::io::Result<Box<dyn Transport>> {
        Ok(Box::new(self.try_clone()?))
    }
}

/// Listen on TCP; every accepted connection is greeted and delivered as a
/// ready protocol adapter.
pub fn listen_tcp(
    host: &str,
    port: u16,
    api: SessionApi,
) -> std::io::Result<(SocketAddr, Receiver<Box<dyn ProtocolAdapter>>)> {
    let listener = TcpListener::bind((host, port))?;
    let addr = listener.local_addr()?;
    log::info!(target: "ui", "debugger can attach via TCP/IP ({addr})");

    let (tx, rx) = channel();
    std::thread::Builder::new()
        .name("breakroom-listener".to_string())
        .spawn(move || {
            for stream in listener.incoming() {
                let adapter = stream
                    .map_err(Error::IO)
                    .and_then(|stream| greet(Box::new(stream), api.clone()));
                match adapter {
                    Ok(adapter) => {
                        log::info!(target: "ui", "connected");
                        if tx.send(adapter).is_err() {
                            break;
                        }
                    }
                    Err(e) => log::warn!(target: "ui", "connection rejected: {e}"),
                }
            }
        })
        .expect("spawn listener thread");

    Ok((addr, rx))
}

/// Listen on a Unix domain socket.
pub fn listen_unix(
    path: &Path,
    api: SessionApi,
) -> std::io::Result<Receiver<Box<dyn ProtocolAdapter>>> {
    let _ = std::fs::remove_file(path);
    let listener = UnixListener::bind(path)?;
    log::info!(target: "ui", "debugger can attach via UNIX domain socket ({})", path.display());

    let (tx, rx) = channel();
    std::thread::Builder::new()
        .name("breakroom-listener".to_string())
        .spawn(move || {
            for stream in listener.incoming() {
                let adapter = stream
                    .map_err(Error::IO)
                    .and_then(|stream| greet(Box::new(stream), api.clone()));
                match adapter {
                    Ok(adapter) => {
                        log::info!(target: "ui", "connected");
                        if tx.send(adapter).is_err() {
                            break;
                        }
                    }
                    Err(e) => log::warn!(target: "ui", "connection rejected: {e}"),
                }
            }
        })
        .expect("spawn listener thread");

    Ok(rx)
}

/// Read the connection greeting and build the matching adapter.
fn greet(stream: Box<dyn Transport>, api: SessionApi) -> Result<Box<dyn ProtocolAdapter>, Error> {
    let mut reader = BufReader::new(stream.try_clone_box()?);
    let mut first_line = String::new();
    if reader.read_line(&mut first_line)? == 0 {
        return Err(Error::Disconnected);
    }
    let line = first_line.trim_end_matches(['\r', '\n']);

    if let Some(tail) = line.strip_prefix("version:") {
        // REPL greeting: `version: <ver> width: <cols> cookie: <token>`
        let parse = || -> Option<(String, usize, String)> {
            let (version, tail) = tail.trim_start().split_once(" width: ")?;
            let (width, cookie) = tail.split_once(" cookie: ")?;
            Some((
                version.trim().to_string(),
                width.trim().parse().ok()?,
                cookie.trim().to_string(),
            ))
        };
        let (version, width, cookie) =
            parse().ok_or_else(|| Error::Greeting(line.to_string()))?;
        if version != VERSION {
            return Err(Error::VersionMismatch(VERSION, version));
        }
        if let Some(expected) = api.cookie() {
            if expected != cookie {
                return Err(Error::CookieMismatch(cookie));
            }
        }
        return Ok(Box::new(repl::ReplAdapter::new(stream, reader, width, api)));
    }

    if let Some(len) = line.strip_prefix("Content-Length:") {
        // a DAP client starts talking immediately: the greeting line is the
        // header of its `initialize` request
        let len: usize = len
            .trim()
            .parse()
            .map_err(|_| Error::Greeting(line.to_string()))?;
        let mut sep = [0u8; 2];
        reader.read_exact(&mut sep)?;
        if &sep != b"\r\n" {
            return Err(Error::Protocol("dap", "missing header terminator".to_string()));
        }
        let mut payload = vec![0u8; len];
        reader.read_exact(&mut payload)?;
        let init: dap::protocol::DapRequest = serde_json::from_slice(&payload)?;
        return Ok(Box::new(dap::DapAdapter::new(stream, reader, init, api)?));
    }

    if line.starts_with("GET ") && line.contains("HTTP/1.1") {
        // HTTP Upgrade: read the remaining headers, find the websocket key
        let mut key = None;
        loop {
            let mut header = String::new();
            if reader.read_line(&mut header)? == 0 {
                break;
            }
            let header = header.trim_end_matches(['\r', '\n']);
            if header.is_empty() {
                break;
            }
            if let Some(value) = header.strip_prefix("Sec-WebSocket-Key:") {
                key = Some(value.trim().to_string());
            }
        }
        let key = key.ok_or_else(|| Error::WsHandshake("missing Sec-WebSocket-Key".to_string()))?;
        return Ok(Box::new(cdp::CdpAdapter::new(stream, reader, &key, api)?));
    }

    Err(Error::Greeting(line.to_string()))
}
