//! The DAP-style structured adapter.
//!
//! The reader thread answers configuration and control requests itself
//! (translating control verbs into REPL command lines) and forwards query
//! requests that need frame state to the session as [`ProtocolRequest`]s.
//! Request/response pairing is driven by the client-assigned `seq` numbers.

pub mod protocol;
pub(crate) mod transport;

use crate::debugger::error::Error;
use crate::debugger::{
    AdapterKind, Message, ProtocolAdapter, ProtocolRequest, SessionApi, UiEvent, Wire,
};
use self::protocol::{DapEvent, DapRequest, DapResponse};
use crate::ui::Transport;
use serde_json::json;
use std::io::BufReader;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};

struct DapWriter {
    stream: Box<dyn Transport>,
    seq: i64,
}

impl DapWriter {
    fn send(&mut self, message: serde_json::Value) {
        if let Err(e) = transport::write_message(&mut self.stream, &message) {
            log::debug!(target: "dap", "write failed: {e}");
        }
    }

    fn send_response(
        &mut self,
        request_seq: i64,
        command: &str,
        success: bool,
        message: Option<String>,
        body: Option<serde_json::Value>,
    ) {
        self.seq += 1;
        let response = DapResponse {
            seq: self.seq,
            r#type: "response",
            request_seq,
            success,
            command: command.to_string(),
            message: message.or_else(|| {
                Some(if success { "Success" } else { "Failed" }.to_string())
            }),
            body,
        };
        match serde_json::to_value(&response) {
            Ok(value) => self.send(value),
            Err(e) => log::error!(target: "dap", "serialize response: {e}"),
        }
    }

    fn send_event(&mut self, name: &str, body: Option<serde_json::Value>) {
        self.seq += 1;
        let event = DapEvent {
            seq: self.seq,
            r#type: "event",
            event: name.to_string(),
            body,
        };
        match serde_json::to_value(&event) {
            Ok(value) => self.send(value),
            Err(e) => log::error!(target: "dap", "serialize event: {e}"),
        }
    }
}

pub struct DapAdapter {
    writer: Arc<Mutex<DapWriter>>,
    rx: Receiver<Message>,
}

impl DapAdapter {
    pub(crate) fn new(
        stream: Box<dyn Transport>,
        reader: BufReader<Box<dyn Transport>>,
        init: DapRequest,
        api: SessionApi,
    ) -> Result<Self, Error> {
        let writer = Arc::new(Mutex::new(DapWriter { stream, seq: 0 }));
        let (tx, rx) = channel();

        {
            let mut w = writer.lock().unwrap();
            w.send_response(
                init.seq,
                &init.command,
                true,
                None,
                Some(json!({
                    "supportsConfigurationDoneRequest": true,
                    "supportsFunctionBreakpoints": true,
                    "supportsConditionalBreakpoints": true,
                    "supportTerminateDebuggee": true,
                    "supportsTerminateRequest": true,
                    "exceptionBreakpointFilters": [
                        { "filter": "any", "label": "rescue any exception" },
                        { "filter": "RuntimeError", "label": "rescue RuntimeError", "default": true },
                    ],
                    "supportsExceptionFilterOptions": true,
                    "supportsStepBack": true,
                    "supportsEvaluateForHovers": true,
                    "supportsCompletionsRequest": true,
                })),
            );
            w.send_event("initialized", None);
        }

        let reader_writer = Arc::clone(&writer);
        std::thread::Builder::new()
            .name("breakroom-dap-reader".to_string())
            .spawn(move || {
                let mut state = ReaderState {
                    writer: reader_writer,
                    tx,
                    api,
                    is_attach: false,
                };
                let mut reader = reader;
                loop {
                    let req = match transport::read_message(&mut reader) {
                        Ok(value) => value,
                        Err(e) => {
                            if e.is_fatal() {
                                log::warn!(target: "dap", "connection finished: {e}");
                            }
                            break;
                        }
                    };
                    let req: DapRequest = match serde_json::from_value(req) {
                        Ok(req) => req,
                        Err(e) => {
                            log::error!(target: "dap", "malformed request: {e}");
                            continue;
                        }
                    };
                    log::debug!(target: "dap", "{}: {}", req.seq, req.command);
                    if !state.handle(req) {
                        break;
                    }
                }
                log::debug!(target: "dap", "reader finished");
            })
            .expect("spawn dap reader thread");

        Ok(Self { writer, rx })
    }
}

struct ReaderState {
    writer: Arc<Mutex<DapWriter>>,
    tx: Sender<Message>,
    api: SessionApi,
    is_attach: bool,
}

impl ReaderState {
    fn respond(&self, req: &DapRequest, body: Option<serde_json::Value>) {
        self.writer
            .lock()
            .unwrap()
            .send_response(req.seq, &req.command, true, None, body);
    }

    fn respond_fail(&self, req: &DapRequest, message: &str) {
        self.writer.lock().unwrap().send_response(
            req.seq,
            &req.command,
            false,
            Some(message.to_string()),
            None,
        );
    }

    fn line(&self, line: &str) -> bool {
        self.tx.send(Message::Line(line.to_string())).is_ok()
    }

    fn forward(&self, req: DapRequest) -> bool {
        self.tx
            .send(Message::Request(ProtocolRequest {
                wire: Wire::Dap,
                id: req.seq,
                method: req.command,
                args: req.arguments,
            }))
            .is_ok()
    }

    /// Control verbs with a postmortem short-circuit.
    fn step(&self, req: &DapRequest, repl_command: &str) -> bool {
        match self.api.check_postmortem() {
            Ok(()) => {
                let ok = self.line(repl_command);
                self.respond(req, None);
                ok
            }
            Err(_) => {
                self.writer.lock().unwrap().send_response(
                    req.seq,
                    &req.command,
                    false,
                    Some("postmortem mode".to_string()),
                    Some(json!({
                        "result": format!("'{}' is not supported while postmortem mode", req.command),
                    })),
                );
                true
            }
        }
    }

    /// Returns false to finish the reader loop.
    fn handle(&mut self, req: DapRequest) -> bool {
        match req.command.as_str() {
            "launch" => {
                self.respond(&req, None);
                self.is_attach = false;
            }
            "attach" => {
                self.respond(&req, None);
                self.api.pause();
                self.is_attach = true;
            }

            "setBreakpoints" => {
                let path = req.arguments["source"]["path"].as_str().unwrap_or("");
                let breakpoints: Vec<serde_json::Value> = req.arguments["breakpoints"]
                    .as_array()
                    .cloned()
                    .unwrap_or_default()
                    .iter()
                    .map(|bp| {
                        let line = bp["line"].as_u64().unwrap_or(0) as u32;
                        let cond = bp["condition"].as_str().map(str::to_string);
                        let verified = self.api.add_line_breakpoint(path, line, cond).is_ok();
                        json!({ "verified": verified })
                    })
                    .collect();
                self.respond(&req, Some(json!({ "breakpoints": breakpoints })));
            }

            "setFunctionBreakpoints" => self.respond(&req, None),

            "setExceptionBreakpoints" => {
                let mut filters: Vec<String> = req.arguments["filters"]
                    .as_array()
                    .cloned()
                    .unwrap_or_default()
                    .iter()
                    .filter_map(|f| f.as_str().map(str::to_string))
                    .collect();
                filters.extend(
                    req.arguments["filterOptions"]
                        .as_array()
                        .cloned()
                        .unwrap_or_default()
                        .iter()
                        .filter_map(|o| o["filterId"].as_str().map(str::to_string)),
                );
                let breakpoints: Vec<serde_json::Value> = filters
                    .iter()
                    .map(|filter| {
                        let pattern = match filter.as_str() {
                            "any" => Some("Exception"),
                            "RuntimeError" => Some("RuntimeError"),
                            _ => None,
                        };
                        let verified = pattern
                            .map(|p| self.api.add_catch_breakpoint(p).is_ok())
                            .unwrap_or(false);
                        json!({ "verified": verified })
                    })
                    .collect();
                self.respond(&req, Some(json!({ "breakpoints": breakpoints })));
            }

            "configurationDone" => {
                self.respond(&req, None);
                if self.is_attach {
                    self.line("p");
                    self.writer.lock().unwrap().send_event(
                        "stopped",
                        Some(json!({
                            "reason": "pause",
                            "threadId": 1,
                            "allThreadsStopped": true,
                        })),
                    );
                } else {
                    self.line("continue");
                }
            }

            "disconnect" => {
                if req.arguments["terminateDebuggee"].as_bool().unwrap_or(false) {
                    self.line("kill!");
                } else {
                    self.line("continue");
                }
                self.respond(&req, None);
                return false;
            }

            "continue" => {
                self.line("c");
                self.respond(&req, Some(json!({ "allThreadsContinued": true })));
            }
            "next" => return self.step(&req, "n"),
            "stepIn" => return self.step(&req, "s"),
            "stepOut" => return self.step(&req, "fin"),

            "terminate" => {
                self.respond(&req, None);
                self.line("kill!");
            }
            "pause" => {
                self.respond(&req, None);
                self.api.pause();
            }

            "reverseContinue" => {
                self.writer.lock().unwrap().send_response(
                    req.seq,
                    &req.command,
                    false,
                    Some("cancelled".to_string()),
                    Some(json!({
                        "result": "Reverse Continue is not supported. Only \"Step back\" is supported.",
                    })),
                );
            }

            "threads" => {
                let threads: Vec<serde_json::Value> = self
                    .api
                    .thread_list()
                    .into_iter()
                    .map(|(id, name)| json!({ "id": id, "name": name }))
                    .collect();
                self.respond(&req, Some(json!({ "threads": threads })));
            }

            "stepBack" | "stackTrace" | "scopes" | "variables" | "evaluate" | "source"
            | "completions" => return self.forward(req),

            other => {
                log::warn!(target: "dap", "unknown request: {other}");
                self.respond_fail(&req, "unknown command");
            }
        }
        true
    }
}

impl ProtocolAdapter for DapAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Dap
    }

    fn width(&self) -> usize {
        80
    }

    fn puts(&mut self, line: &str) {
        // REPL output is invisible to DAP clients
        log::debug!(target: "dap", "out: {line}");
    }

    fn ask(&mut self, _prompt: &str) -> String {
        String::new()
    }

    fn read_next_message(&mut self) -> Option<Message> {
        self.rx.recv().ok()
    }

    fn event(&mut self, event: &UiEvent) {
        let mut writer = self.writer.lock().unwrap();
        match event {
            UiEvent::Load => {}
            UiEvent::SuspendBreakpoint {
                description,
                exception,
                thread,
                ..
            } => {
                let reason = if *exception { "exception" } else { "breakpoint" };
                writer.send_event(
                    "stopped",
                    Some(json!({
                        "reason": reason,
                        "description": description,
                        "text": description,
                        "threadId": thread,
                        "allThreadsStopped": true,
                    })),
                );
            }
            UiEvent::SuspendTrap { thread, .. } => {
                writer.send_event(
                    "stopped",
                    Some(json!({
                        "reason": "pause",
                        "threadId": thread,
                        "allThreadsStopped": true,
                    })),
                );
            }
            UiEvent::Suspended { thread } => {
                writer.send_event(
                    "stopped",
                    Some(json!({
                        "reason": "step",
                        "threadId": thread,
                        "allThreadsStopped": true,
                    })),
                );
            }
        }
    }

    fn respond(&mut self, req: &ProtocolRequest, success: bool, body: serde_json::Value) {
        let message = if success {
            None
        } else {
            body["message"].as_str().map(str::to_string)
        };
        let body = if success { Some(body) } else { None };
        self.writer
            .lock()
            .unwrap()
            .send_response(req.id, &req.method, success, message, body);
    }

    fn fire_event(&mut self, name: &str, body: serde_json::Value) {
        self.writer.lock().unwrap().send_event(name, Some(body));
    }

    fn quit(&mut self) {
        self.writer.lock().unwrap().send_event("terminated", None);
    }
}
