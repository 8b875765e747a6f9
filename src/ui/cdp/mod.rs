//! The CDP-style structured adapter: a minimal WebSocket server speaking the
//! Chrome DevTools protocol.
//!
//! Breakpoint ids are composite strings `"1:<line>:<path>"` so that
//! removal can parse the line and path back out without a side table. A
//! close frame surfaces as a detach: the reader injects a `continue` so the
//! debuggee is never left stuck.

pub(crate) mod websocket;

use crate::debugger::error::Error;
use crate::debugger::{
    AdapterKind, Message, ProtocolAdapter, ProtocolRequest, SessionApi, UiEvent, Wire,
};
use crate::ui::Transport;
use serde_json::json;
use std::collections::HashMap;
use std::io::{BufReader, Write};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use self::websocket::WsMessage;
use uuid::Uuid;

const INVALID_REQUEST: i64 = -32600;

struct CdpWriter {
    stream: Box<dyn Transport>,
}

impl CdpWriter {
    fn send(&mut self, message: serde_json::Value) {
        let payload = message.to_string();
        let frame = websocket::encode_text_frame(payload.as_bytes());
        if let Err(e) = self.stream.write_all(&frame).and_then(|_| self.stream.flush()) {
            log::debug!(target: "cdp", "write failed: {e}");
        }
    }

    fn send_response(&mut self, id: i64, result: serde_json::Value) {
        self.send(json!({ "id": id, "result": result }));
    }

    fn send_fail_response(&mut self, id: i64, error: serde_json::Value) {
        self.send(json!({ "id": id, "error": error }));
    }

    fn send_event(&mut self, method: &str, params: serde_json::Value) {
        self.send(json!({ "method": method, "params": params }));
    }
}

pub struct CdpAdapter {
    writer: Arc<Mutex<CdpWriter>>,
    rx: Receiver<Message>,
}

impl CdpAdapter {
    pub(crate) fn new(
        stream: Box<dyn Transport>,
        reader: BufReader<Box<dyn Transport>>,
        client_key: &str,
        api: SessionApi,
    ) -> Result<Self, Error> {
        let mut stream = stream;
        stream.write_all(websocket::handshake_response(client_key).as_bytes())?;
        stream.flush()?;

        let writer = Arc::new(Mutex::new(CdpWriter { stream }));
        let (tx, rx) = channel();

        let reader_writer = Arc::clone(&writer);
        std::thread::Builder::new()
            .name("breakroom-cdp-reader".to_string())
            .spawn(move || {
                let mut state = ReaderState {
                    writer: reader_writer,
                    tx,
                    api,
                    bps: HashMap::new(),
                };
                let mut reader = reader;
                loop {
                    match websocket::read_frame(&mut reader) {
                        Ok(WsMessage::Text(text)) => match serde_json::from_str(&text) {
                            Ok(req) => {
                                if !state.handle(req) {
                                    break;
                                }
                            }
                            Err(e) => log::error!(target: "cdp", "malformed request: {e}"),
                        },
                        Ok(WsMessage::Close) => {
                            // detach: never leave the debuggee parked
                            log::info!(target: "cdp", "frontend detached");
                            let _ = state.tx.send(Message::Line("continue".to_string()));
                            break;
                        }
                        Err(e) => {
                            log::warn!(target: "cdp", "connection finished: {e}");
                            let _ = state.tx.send(Message::Line("continue".to_string()));
                            break;
                        }
                    }
                }
                log::debug!(target: "cdp", "reader finished");
            })
            .expect("spawn cdp reader thread");

        Ok(Self { writer, rx })
    }
}

struct ReaderState {
    writer: Arc<Mutex<CdpWriter>>,
    tx: Sender<Message>,
    api: SessionApi,
    /// breakpoint id -> user-visible ordinal, mirrored for removal
    bps: HashMap<String, usize>,
}

impl ReaderState {
    fn respond(&self, req: &serde_json::Value, result: serde_json::Value) {
        let id = req["id"].as_i64().unwrap_or(0);
        self.writer.lock().unwrap().send_response(id, result);
    }

    fn fail(&self, req: &serde_json::Value, code: i64, message: &str) {
        let id = req["id"].as_i64().unwrap_or(0);
        self.writer
            .lock()
            .unwrap()
            .send_fail_response(id, json!({ "code": code, "message": message }));
    }

    fn event(&self, method: &str, params: serde_json::Value) {
        self.writer.lock().unwrap().send_event(method, params);
    }

    fn line(&self, line: &str) {
        let _ = self.tx.send(Message::Line(line.to_string()));
    }

    fn forward(&self, req: &serde_json::Value) {
        let _ = self.tx.send(Message::Request(ProtocolRequest {
            wire: Wire::Cdp,
            id: req["id"].as_i64().unwrap_or(0),
            method: req["method"].as_str().unwrap_or("").to_string(),
            args: req["params"].clone(),
        }));
    }

    /// A stepping verb: postmortem guard, resumed event, and the queued
    /// backtrace request that makes the next stop fire `Debugger.paused`.
    fn step(&self, req: &serde_json::Value, repl_command: &str) {
        match self.api.check_postmortem() {
            Ok(()) => {
                self.line(repl_command);
                self.respond(req, json!({}));
                self.event("Debugger.resumed", json!({}));
            }
            Err(_) => {
                let method = req["method"].as_str().unwrap_or("step");
                self.fail(
                    req,
                    INVALID_REQUEST,
                    &format!("'{method}' is not supported while postmortem mode"),
                );
            }
        }
        self.forward(req);
    }

    fn source_len(&self, path: &str) -> usize {
        self.api
            .source_text(path)
            .map(|src| src.lines().count())
            .unwrap_or(0)
    }

    fn deactivate_bp(&mut self) {
        self.line("del");
        self.bps.clear();
    }

    fn activate_bp(&mut self) {
        let bps: Vec<String> = self.bps.keys().cloned().collect();
        for key in bps {
            let mut parts = key.splitn(3, ':');
            let (_, line, path) = (parts.next(), parts.next(), parts.next());
            match (line.and_then(|l| l.parse::<u32>().ok()), path) {
                (Some(line), Some(path)) => {
                    let _ = self.api.add_line_breakpoint(path, line + 1, None);
                }
                _ => {
                    let _ = self.api.add_catch_breakpoint("Exception");
                }
            }
        }
    }

    fn remove_bp(&mut self, id: &str) {
        let Some(index) = self.bps.remove(id) else {
            return;
        };
        for ordinal in self.bps.values_mut() {
            if *ordinal > index {
                *ordinal -= 1;
            }
        }
        self.line(&format!("del {index}"));
    }

    /// Returns false to finish the reader loop.
    fn handle(&mut self, req: serde_json::Value) -> bool {
        let method = req["method"].as_str().unwrap_or("").to_string();
        log::debug!(target: "cdp", "{method}");

        match method.as_str() {
            "Page.getResourceTree" => {
                let path = self.api.entry_script().unwrap_or_default();
                let src = self.api.source_text(&path).unwrap_or_default();
                self.respond(
                    &req,
                    json!({
                        "frameTree": {
                            "frame": {
                                "id": Uuid::new_v4().simple().to_string(),
                                "loaderId": Uuid::new_v4().simple().to_string(),
                                "url": "http://debuggee/",
                                "securityOrigin": "http://debuggee",
                                "mimeType": "text/plain",
                            },
                            "resources": [],
                        }
                    }),
                );
                self.event(
                    "Debugger.scriptParsed",
                    json!({
                        "scriptId": path,
                        "url": format!("http://debuggee{path}"),
                        "startLine": 0,
                        "startColumn": 0,
                        "endLine": src.lines().count(),
                        "endColumn": 0,
                        "executionContextId": 1,
                        "hash": format!("{:x}", src.len()),
                    }),
                );
                self.event(
                    "Runtime.executionContextCreated",
                    json!({
                        "context": {
                            "id": Uuid::new_v4().simple().to_string(),
                            "origin": "http://debuggee",
                            "name": "",
                        }
                    }),
                );
            }

            "Debugger.getScriptSource" => {
                let script = req["params"]["scriptId"].as_str().unwrap_or("");
                let src = self.api.source_text(script).unwrap_or_default();
                self.respond(&req, json!({ "scriptSource": src }));
                self.forward(&req);
            }

            // the usual frontend chatter, acknowledged and ignored
            "Page.startScreencast"
            | "Emulation.setTouchEmulationEnabled"
            | "Emulation.setEmitTouchEventsForMouse"
            | "Runtime.compileScript"
            | "Page.getResourceContent"
            | "Overlay.setPausedInDebuggerMessage"
            | "Runtime.releaseObjectGroup"
            | "Runtime.discardConsoleEntries"
            | "Log.clear" => self.respond(&req, json!({})),

            "Debugger.resume" => {
                self.line("c");
                self.forward(&req);
                self.respond(&req, json!({}));
                self.event("Debugger.resumed", json!({}));
            }
            "Debugger.stepOver" => self.step(&req, "n"),
            "Debugger.stepInto" => self.step(&req, "s"),
            "Debugger.stepOut" => self.step(&req, "fin"),

            "Debugger.setSkipAllPauses" => {
                if req["params"]["skip"].as_bool().unwrap_or(false) {
                    self.deactivate_bp();
                } else {
                    self.activate_bp();
                }
                self.respond(&req, json!({}));
            }

            "Debugger.getPossibleBreakpoints" => {
                let script = req["params"]["start"]["scriptId"].as_str().unwrap_or("");
                let mut line = req["params"]["start"]["lineNumber"].as_u64().unwrap_or(0);
                let end_line = self.source_len(script) as u64;
                if line > end_line {
                    line = end_line;
                }
                self.respond(
                    &req,
                    json!({
                        "locations": [
                            { "scriptId": script, "lineNumber": line }
                        ]
                    }),
                );
            }

            "Debugger.setBreakpointByUrl" => {
                let mut line = req["params"]["lineNumber"].as_u64().unwrap_or(0) as u32;
                let url = req["params"]["url"].as_str().unwrap_or("");
                let mut locations = Vec::new();
                let b_id;
                match url.strip_prefix("http://debuggee") {
                    Some(path) if !path.is_empty() => {
                        let cond = req["params"]["condition"]
                            .as_str()
                            .filter(|c| !c.is_empty())
                            .map(str::to_string);
                        let end_line = self.source_len(path) as u32;
                        if line > end_line {
                            line = end_line;
                        }
                        b_id = format!("1:{line}:{path}");
                        // CDP line numbers are 0-based
                        let _ = self.api.add_line_breakpoint(path, line + 1, cond);
                        self.bps.insert(b_id.clone(), self.bps.len());
                        locations.push(json!({ "scriptId": path, "lineNumber": line }));
                    }
                    _ => {
                        b_id = format!("1:{line}:{url}");
                    }
                }
                self.respond(
                    &req,
                    json!({ "breakpointId": b_id, "locations": locations }),
                );
            }

            "Debugger.removeBreakpoint" => {
                let id = req["params"]["breakpointId"].as_str().unwrap_or("").to_string();
                self.remove_bp(&id);
                self.respond(&req, json!({}));
            }

            "Debugger.setBreakpointsActive" => {
                if req["params"]["active"].as_bool().unwrap_or(true) {
                    self.activate_bp();
                } else {
                    self.deactivate_bp();
                }
                self.respond(&req, json!({}));
            }

            "Debugger.setPauseOnExceptions" => {
                let state = req["params"]["state"].as_str().unwrap_or("none");
                match state {
                    "none" => {
                        self.line("config postmortem = false");
                        self.remove_bp_key("Exception");
                    }
                    "uncaught" => {
                        self.line("config postmortem = true");
                        self.remove_bp_key("Exception");
                    }
                    "all" => {
                        self.line("config postmortem = false");
                        let _ = self.api.add_catch_breakpoint("Exception");
                        self.bps.insert("Exception".to_string(), self.bps.len());
                    }
                    _ => {}
                }
                self.respond(&req, json!({}));
            }

            "Debugger.evaluateOnCallFrame" | "Runtime.getProperties" => self.forward(&req),

            other => {
                log::debug!(target: "cdp", "ignored method: {other}");
            }
        }
        true
    }

    fn remove_bp_key(&mut self, key: &str) {
        let key = key.to_string();
        self.remove_bp(&key);
    }
}

impl ProtocolAdapter for CdpAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Cdp
    }

    fn width(&self) -> usize {
        80
    }

    fn puts(&mut self, line: &str) {
        // REPL output is invisible to CDP frontends
        log::debug!(target: "cdp", "out: {line}");
    }

    fn ask(&mut self, _prompt: &str) -> String {
        // confirmations only come from the adapter's own `del` lines
        "y".to_string()
    }

    fn read_next_message(&mut self) -> Option<Message> {
        self.rx.recv().ok()
    }

    fn event(&mut self, _event: &UiEvent) {
        // `Debugger.paused` is fired by the queued backtrace round trip
    }

    fn respond(&mut self, req: &ProtocolRequest, success: bool, body: serde_json::Value) {
        let mut writer = self.writer.lock().unwrap();
        if success {
            writer.send_response(req.id, body);
        } else {
            writer.send_fail_response(req.id, body);
        }
    }

    fn fire_event(&mut self, name: &str, body: serde_json::Value) {
        self.writer.lock().unwrap().send_event(name, body);
    }

    fn quit(&mut self) {}
}
