//! Shared harness: a scripted debuggee plus a channel-backed adapter that
//! records everything the session renders.

use breakroom::debugger::scripted::ScriptedEngine;
use breakroom::debugger::{
    AdapterKind, Config, Message, ProtocolAdapter, ProtocolRequest, Session, UiEvent, Wire,
};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub struct TestUi {
    tx: Sender<Message>,
    pub outputs: Arc<Mutex<Vec<String>>>,
    pub events: Arc<Mutex<Vec<String>>>,
    pub responses: Arc<Mutex<Vec<(i64, bool, serde_json::Value)>>>,
    pub fired: Arc<Mutex<Vec<(String, serde_json::Value)>>>,
}

impl TestUi {
    /// Feed one REPL command line.
    pub fn cmd(&self, line: &str) {
        self.tx
            .send(Message::Line(line.to_string()))
            .expect("session is gone");
    }

    /// Feed one structured request.
    pub fn request(&self, wire: Wire, id: i64, method: &str, args: serde_json::Value) {
        self.tx
            .send(Message::Request(ProtocolRequest {
                wire,
                id,
                method: method.to_string(),
                args,
            }))
            .expect("session is gone");
    }

    pub fn output_contains(&self, needle: &str) -> bool {
        self.outputs
            .lock()
            .unwrap()
            .iter()
            .any(|line| line.contains(needle))
    }

    pub fn output_count(&self, needle: &str) -> usize {
        self.outputs
            .lock()
            .unwrap()
            .iter()
            .filter(|line| line.contains(needle))
            .count()
    }

    pub fn wait_output_contains(&self, needle: &str) {
        wait_until(
            || self.output_contains(needle),
            &format!("output containing {needle:?}"),
        );
    }

    pub fn event_count(&self, needle: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.contains(needle))
            .count()
    }
}

struct TestAdapter {
    kind: AdapterKind,
    rx: Receiver<Message>,
    outputs: Arc<Mutex<Vec<String>>>,
    events: Arc<Mutex<Vec<String>>>,
    responses: Arc<Mutex<Vec<(i64, bool, serde_json::Value)>>>,
    fired: Arc<Mutex<Vec<(String, serde_json::Value)>>>,
}

impl ProtocolAdapter for TestAdapter {
    fn kind(&self) -> AdapterKind {
        self.kind
    }

    fn width(&self) -> usize {
        100
    }

    fn puts(&mut self, line: &str) {
        self.outputs.lock().unwrap().push(line.to_string());
    }

    fn ask(&mut self, _prompt: &str) -> String {
        "y".to_string()
    }

    fn read_next_message(&mut self) -> Option<Message> {
        self.rx.recv().ok()
    }

    fn event(&mut self, event: &UiEvent) {
        self.events.lock().unwrap().push(format!("{event:?}"));
    }

    fn respond(&mut self, req: &ProtocolRequest, success: bool, body: serde_json::Value) {
        self.responses.lock().unwrap().push((req.id, success, body));
    }

    fn fire_event(&mut self, name: &str, body: serde_json::Value) {
        self.fired.lock().unwrap().push((name.to_string(), body));
    }

    fn quit(&mut self) {}
}

pub fn adapter_pair(kind: AdapterKind) -> (TestUi, Box<dyn ProtocolAdapter>) {
    let (tx, rx) = channel();
    let outputs = Arc::new(Mutex::new(Vec::new()));
    let events = Arc::new(Mutex::new(Vec::new()));
    let responses = Arc::new(Mutex::new(Vec::new()));
    let fired = Arc::new(Mutex::new(Vec::new()));
    let adapter = TestAdapter {
        kind,
        rx,
        outputs: Arc::clone(&outputs),
        events: Arc::clone(&events),
        responses: Arc::clone(&responses),
        fired: Arc::clone(&fired),
    };
    (
        TestUi {
            tx,
            outputs,
            events,
            responses,
            fired,
        },
        Box::new(adapter),
    )
}

/// Build an activated session over the scripted engine with one attached
/// test adapter.
pub fn boot(
    engine: &Arc<ScriptedEngine>,
    config: Config,
    kind: AdapterKind,
) -> (Session, TestUi, Sender<Box<dyn ProtocolAdapter>>) {
    let mut session = Session::new(engine.clone(), config);
    engine.install_listener(session.listener());
    let (ui, adapter) = adapter_pair(kind);
    let (atx, arx) = channel();
    atx.send(adapter).expect("queue the adapter");
    session.activate(arx);
    (session, ui, atx)
}

pub fn wait_until(pred: impl Fn() -> bool, what: &str) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if pred() {
            return;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    panic!("timed out waiting for {what}");
}
