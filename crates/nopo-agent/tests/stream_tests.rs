use nopo_agent::stream::{extract_json, parse_stream};

const STREAM: &str = r#"{"type":"system","subtype":"init","session_id":"sess-123"}
{"type":"assistant","message":{"role":"assistant","content":[{"type":"text","text":"Looking at the issue."}]}}
{"type":"assistant","message":{"role":"assistant","content":[{"type":"tool_use","id":"t1","name":"Read","input":{"path":"src/lib.rs"}}]}}
{"type":"user","message":{"role":"user","content":[{"type":"tool_result","tool_use_id":"t1","content":"ok","is_error":false}]}}
{"type":"result","subtype":"success","result":"{\"summary\":\"done\"}","session_id":"sess-123","is_error":false,"num_turns":3}
"#;

#[test]
fn parse_stream_takes_result_text_and_session_id() {
    let summary = parse_stream(STREAM);
    assert_eq!(summary.output, "{\"summary\":\"done\"}");
    assert_eq!(summary.session_id.as_deref(), Some("sess-123"));
    assert!(!summary.is_error);
}

#[test]
fn parse_stream_falls_back_to_assistant_text() {
    let stream = r#"{"type":"system","session_id":"sess-9","subtype":"init"}
{"type":"assistant","message":{"role":"assistant","content":[{"type":"text","text":"first"}]}}
{"type":"assistant","message":{"role":"assistant","content":[{"type":"text","text":"second"}]}}
"#;
    let summary = parse_stream(stream);
    assert_eq!(summary.output, "first\nsecond");
    assert_eq!(summary.session_id.as_deref(), Some("sess-9"));
}

#[test]
fn parse_stream_ignores_garbage_lines() {
    let stream = "not json at all\n{\"type\":\"result\",\"result\":\"ok\",\"session_id\":\"s\"}\n";
    let summary = parse_stream(stream);
    assert_eq!(summary.output, "ok");
}

#[test]
fn parse_stream_surfaces_result_errors() {
    let stream = r#"{"type":"result","subtype":"error","result":"","is_error":true}"#;
    let summary = parse_stream(stream);
    assert!(summary.is_error);
}

#[test]
fn extract_json_handles_bare_fenced_and_wrapped() {
    assert_eq!(extract_json("{\"a\":1}"), "{\"a\":1}");
    assert_eq!(
        extract_json("Here you go:\n```json\n{\"a\":1}\n```\nThanks!"),
        "{\"a\":1}"
    );
    assert_eq!(
        extract_json("The answer is {\"a\":1} as requested."),
        "{\"a\":1}"
    );
}
