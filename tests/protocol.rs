mod common;

use breakroom::debugger::engine::{PlainValue, Value, ValueKind};
use breakroom::debugger::scripted::{ScriptOp, ScriptedEngine};
use breakroom::debugger::{AdapterKind, Config, Wire};
use common::{boot, wait_until};
use serde_json::json;
use std::collections::HashSet;

fn int(n: i64) -> Value {
    PlainValue::new("Integer", n.to_string())
        .kind(ValueKind::Number)
        .into_value()
}

fn nonstop_config() -> Config {
    Config {
        nonstop: true,
        no_color: true,
        ..Config::default()
    }
}

const SRC_D: &str = "d1\nd2\nd3\nd4\n";

/// Three nested frames suspended at d.src:3.
fn deep_script() -> Vec<ScriptOp> {
    vec![
        ScriptOp::call("main", "d.src", 1),
        ScriptOp::line_with(1, vec![("a", int(1))]),
        ScriptOp::call("inner", "d.src", 2),
        ScriptOp::line_with(2, vec![("b", int(2))]),
        ScriptOp::call("leaf", "d.src", 3),
        ScriptOp::line_with(3, vec![("c", int(3))]),
        ScriptOp::ret(int(0)),
        ScriptOp::ret(int(0)),
        ScriptOp::ret(int(0)),
    ]
}

#[test]
fn test_dap_stack_trace_round_trip() {
    let engine = ScriptedEngine::new();
    engine.add_source("d.src", SRC_D);

    let (session, ui, _atx) = boot(&engine, nonstop_config(), AdapterKind::Dap);
    let api = session.api();
    api.add_line_breakpoint("d.src", 3, None).unwrap();

    let handle = engine.spawn_thread(7, "main", deep_script());
    wait_until(
        || api.thread_snapshots().iter().any(|t| t.visible_frames),
        "suspended with three frames",
    );
    let thread_id = api.thread_snapshots()[0].id;

    ui.request(Wire::Dap, 1, "stackTrace", json!({ "threadId": thread_id }));
    wait_until(
        || !ui.responses.lock().unwrap().is_empty(),
        "stackTrace response",
    );

    {
        let responses = ui.responses.lock().unwrap();
        let (req_id, success, body) = &responses[0];
        assert_eq!(*req_id, 1);
        assert!(success);

        let frames = body["stackFrames"].as_array().unwrap();
        assert_eq!(frames.len(), 3);

        // each frame got a previously-unused id
        let ids: HashSet<i64> = frames.iter().map(|f| f["id"].as_i64().unwrap()).collect();
        assert_eq!(ids.len(), 3);
        assert_eq!(frames[0]["name"], json!("leaf"));
        assert_eq!(frames[0]["line"], json!(3));
    }

    // scopes over one of the minted frame ids
    ui.request(Wire::Dap, 2, "scopes", json!({ "frameId": 1 }));
    wait_until(
        || ui.responses.lock().unwrap().len() >= 2,
        "scopes response",
    );
    let var_ref = {
        let responses = ui.responses.lock().unwrap();
        let (_, success, body) = &responses[1];
        assert!(success);
        let scopes = body["scopes"].as_array().unwrap();
        assert_eq!(scopes[0]["name"], json!("Local variables"));
        scopes[0]["variablesReference"].as_i64().unwrap()
    };
    assert!(var_ref > 1, "globals own the reference 1");

    ui.request(Wire::Dap, 3, "variables", json!({ "variablesReference": var_ref }));
    wait_until(
        || ui.responses.lock().unwrap().len() >= 3,
        "variables response",
    );
    {
        let responses = ui.responses.lock().unwrap();
        let (_, success, body) = &responses[2];
        assert!(success);
        let names: Vec<String> = body["variables"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v["name"].as_str().unwrap().to_string())
            .collect();
        assert!(names.contains(&"%self".to_string()));
        assert!(names.contains(&"c".to_string()));
    }

    ui.cmd("continue");
    handle.join().unwrap();

    let mut session = session;
    session.deactivate();
}

#[test]
fn test_dap_evaluate_in_frame() {
    let engine = ScriptedEngine::new();
    engine.add_source("d.src", SRC_D);

    let (session, ui, _atx) = boot(&engine, nonstop_config(), AdapterKind::Dap);
    let api = session.api();
    api.add_line_breakpoint("d.src", 3, None).unwrap();

    let handle = engine.spawn_thread(7, "main", deep_script());
    wait_until(
        || api.thread_snapshots().iter().any(|t| t.visible_frames),
        "suspended",
    );
    let thread_id = api.thread_snapshots()[0].id;

    ui.request(Wire::Dap, 1, "stackTrace", json!({ "threadId": thread_id }));
    wait_until(|| !ui.responses.lock().unwrap().is_empty(), "stackTrace");

    // frame id 2 refers to the `inner` frame holding local `b`
    ui.request(
        Wire::Dap,
        2,
        "evaluate",
        json!({ "frameId": 2, "expression": "b", "context": "repl" }),
    );
    wait_until(|| ui.responses.lock().unwrap().len() >= 2, "evaluate");
    {
        let responses = ui.responses.lock().unwrap();
        let (_, success, body) = &responses[1];
        assert!(success);
        assert_eq!(body["result"], json!("2"));
        assert_eq!(body["type"], json!("Integer"));
    }

    ui.cmd("continue");
    handle.join().unwrap();

    let mut session = session;
    session.deactivate();
}

#[test]
fn test_cdp_paused_event_and_evaluate() {
    let engine = ScriptedEngine::new();
    engine.add_source("d.src", SRC_D);

    let (session, ui, _atx) = boot(&engine, nonstop_config(), AdapterKind::Cdp);
    let api = session.api();
    api.add_line_breakpoint("d.src", 3, None).unwrap();

    let handle = engine.spawn_thread(9, "main", deep_script());
    wait_until(
        || api.thread_snapshots().iter().any(|t| t.visible_frames),
        "suspended",
    );

    // the queued backtrace request resolves into a Debugger.paused event
    ui.request(Wire::Cdp, 1, "Debugger.getScriptSource", json!({ "scriptId": "d.src" }));
    wait_until(|| !ui.fired.lock().unwrap().is_empty(), "Debugger.paused");

    let frame_id = {
        let fired = ui.fired.lock().unwrap();
        let (name, body) = fired
            .iter()
            .find(|(name, _)| name == "Debugger.paused")
            .expect("paused event");
        assert_eq!(name, "Debugger.paused");
        let frames = body["callFrames"].as_array().unwrap();
        assert_eq!(frames.len(), 3);
        // 0-based line numbers on the wire
        assert_eq!(frames[0]["location"]["lineNumber"], json!(2));
        frames[0]["callFrameId"].as_str().unwrap().to_string()
    };

    ui.request(
        Wire::Cdp,
        2,
        "Debugger.evaluateOnCallFrame",
        json!({ "callFrameId": frame_id, "expression": "c" }),
    );
    wait_until(|| !ui.responses.lock().unwrap().is_empty(), "evaluate");
    {
        let responses = ui.responses.lock().unwrap();
        let (req_id, success, body) = &responses[0];
        assert_eq!(*req_id, 2);
        assert!(success);
        assert_eq!(body["result"]["description"], json!("3"));
        assert_eq!(body["result"]["type"], json!("number"));
    }

    ui.cmd("continue");
    handle.join().unwrap();

    let mut session = session;
    session.deactivate();
}
