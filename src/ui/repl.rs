//! The line-oriented REPL adapter.
//!
//! Wire protocol, all newline-terminated UTF-8 lines:
//!   outbound: `out <line>`, `input <pid>`, `ask <pid> <prompt>`, `quit`
//!   inbound:  `command <pid> <width> <line>`, `answer <pid> <text>`, `pause`

use crate::debugger::{
    AdapterKind, Message, ProtocolAdapter, ProtocolRequest, SessionApi, UiEvent,
};
use crate::ui::Transport;
use std::io::{BufRead, BufReader, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{channel, Receiver};
use std::sync::Arc;

pub struct ReplAdapter {
    writer: Box<dyn Transport>,
    rx: Receiver<Message>,
    ans_rx: Receiver<String>,
    width: Arc<AtomicUsize>,
}

impl ReplAdapter {
    pub(crate) fn new(
        writer: Box<dyn Transport>,
        reader: BufReader<Box<dyn Transport>>,
        width: usize,
        api: SessionApi,
    ) -> Self {
        let (tx, rx) = channel();
        let (ans_tx, ans_rx) = channel();
        let width = Arc::new(AtomicUsize::new(width));
        api.set_width(width.load(Ordering::Relaxed));

        {
            let width = Arc::clone(&width);
            std::thread::Builder::new()
                .name("breakroom-repl-reader".to_string())
                .spawn(move || {
                    for line in reader.lines() {
                        let Ok(line) = line else {
                            break;
                        };
                        log::debug!(target: "repl", "received: {line}");

                        if line.starts_with("pause") {
                            api.pause();
                        } else if let Some(tail) = line.strip_prefix("command ") {
                            let mut parts = tail.splitn(3, ' ');
                            let _pid = parts.next();
                            if let Some(cols) = parts.next().and_then(|w| w.parse().ok()) {
                                width.store(cols, Ordering::Relaxed);
                                api.set_width(cols);
                            }
                            let cmd = parts.next().unwrap_or("").to_string();
                            if tx.send(Message::Line(cmd)).is_err() {
                                break;
                            }
                        } else if let Some(tail) = line.strip_prefix("answer ") {
                            let answer = tail
                                .split_once(' ')
                                .map(|(_pid, text)| text)
                                .unwrap_or("")
                                .to_string();
                            let _ = ans_tx.send(answer);
                        } else {
                            log::warn!(target: "repl", "unsupported line: {line}");
                        }
                    }
                    log::debug!(target: "repl", "reader finished");
                })
                .expect("spawn repl reader thread");
        }

        Self {
            writer,
            rx,
            ans_rx,
            width,
        }
    }

    fn send_line(&mut self, line: &str) {
        if let Err(e) = writeln!(self.writer, "{line}") {
            log::debug!(target: "repl", "write failed: {e}");
        }
        let _ = self.writer.flush();
    }
}

impl ProtocolAdapter for ReplAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Repl
    }

    fn width(&self) -> usize {
        self.width.load(Ordering::Relaxed)
    }

    fn puts(&mut self, line: &str) {
        for line in line.split('\n') {
            self.send_line(&format!("out {line}"));
        }
    }

    fn ask(&mut self, prompt: &str) -> String {
        self.send_line(&format!("ask {} {prompt}", std::process::id()));
        self.ans_rx.recv().unwrap_or_default()
    }

    fn read_next_message(&mut self) -> Option<Message> {
        self.send_line(&format!("input {}", std::process::id()));
        self.rx.recv().ok()
    }

    fn event(&mut self, event: &UiEvent) {
        match event {
            UiEvent::Load => self.puts("loaded new code"),
            UiEvent::SuspendBreakpoint {
                index, description, ..
            } => {
                let index = index.map(|i| i.to_string()).unwrap_or_else(|| "?".to_string());
                self.puts(&format!("Stop by #{index} {description}"));
            }
            UiEvent::SuspendTrap { signal, .. } => {
                self.puts(&format!("Stop by {signal}"));
            }
            UiEvent::Suspended { .. } => {}
        }
    }

    fn respond(&mut self, _req: &ProtocolRequest, _success: bool, _body: serde_json::Value) {
        log::warn!(target: "repl", "structured response on a REPL connection");
    }

    fn fire_event(&mut self, _name: &str, _body: serde_json::Value) {}

    fn quit(&mut self) {
        self.send_line("quit");
    }
}
