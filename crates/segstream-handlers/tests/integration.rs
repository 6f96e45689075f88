//! Integration tests for the segstream-handlers crate.
//!
//! Every handler is driven through the public API only: the factory picks
//! it, chunks go in, and the emitted events and invocations are checked for
//! ordering, id pairing and independence from chunk boundaries.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::{Value, json};

use segstream_core::{
    ResponseChunk, SegmentEvent, SegmentEventType, SegmentType, StreamError, ToolCallDelta,
    ToolInvocation,
};
use segstream_handlers::{
    CallbackListener, HandlerOptions, StreamConfig, StreamingResponseHandler,
    StreamingResponseHandlerFactory, drive, parse_tool_invocations,
};

const XML_RESPONSE: &str = r#"I'll look first.
<tool name="search"><arg name="query">rust &amp; streams</arg><arg name="tags"><item>a</item><item>b</item></arg></tool>
Then write it.
<file path="notes.md"><!-- draft --> a && b</file>
<bash>
cargo test
</bash>
Done."#;

const JSON_RESPONSE: &str = "Let me save that.\n```json\n{\"name\": \"write_file\", \"arguments\": {\"path\": \"a.txt\", \"content\": \"x \\\"quoted\\\"\\n\"}}\n```\nAnd search:\n```json\n{\"tool\": \"search\", \"parameters\": {\"q\": \"n <= 0\"}}\n```\n";

const SENTINEL_RESPONSE: &str = "Saving.\n[[SEG_START {\"type\": \"write_file\", \"tool_name\": \"write_file\", \"arguments\": {\"path\": \"b.txt\"}}]]\nbody [[not a marker]]\n[[SEG_END]]\n[[SEG_START {\"tool_name\": \"run_bash\"}]] ls -la [[SEG_END]]";

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn handler_for(parser: &str) -> Box<dyn StreamingResponseHandler> {
    let options = HandlerOptions::default().with_parser(parser);
    StreamingResponseHandlerFactory::create(&options).unwrap()
}

/// What a consumer observes from one response, minus generated ids.
#[derive(Debug, PartialEq)]
struct Observed {
    calls: Vec<(String, Value)>,
    text: String,
    tool_content: Vec<String>,
}

fn observe(handler: &dyn StreamingResponseHandler, invocations: &[ToolInvocation]) -> Observed {
    let mut types = HashMap::new();
    let mut order = Vec::new();
    let mut content: HashMap<&str, String> = HashMap::new();
    for event in handler.events() {
        match event.event_type {
            SegmentEventType::Start => {
                types.insert(event.segment_id.as_str(), event.segment_type);
                order.push(event.segment_id.as_str());
            }
            SegmentEventType::Content => content
                .entry(event.segment_id.as_str())
                .or_default()
                .push_str(event.delta().unwrap_or_default()),
            SegmentEventType::End => {}
        }
    }

    let mut text = String::new();
    let mut tool_content = Vec::new();
    for id in order {
        let body = content.remove(id).unwrap_or_default();
        match types.get(id) {
            Some(Some(SegmentType::Text)) => text.push_str(&body),
            _ => tool_content.push(body),
        }
    }

    Observed {
        calls: invocations
            .iter()
            .map(|i| (i.name.clone(), Value::Object(i.arguments.clone())))
            .collect(),
        text,
        tool_content,
    }
}

fn run_pieces<'a>(parser: &str, pieces: impl IntoIterator<Item = &'a str>) -> Observed {
    let mut handler = handler_for(parser);
    for piece in pieces {
        handler.feed_text(piece).unwrap();
    }
    let invocations = handler.finalize().unwrap();
    assert_lifecycle(handler.events());
    assert_ids_pair(handler.events(), &invocations);
    observe(handler.as_ref(), &invocations)
}

fn one_char_pieces(text: &str) -> Vec<&str> {
    text.char_indices()
        .map(|(i, c)| &text[i..i + c.len_utf8()])
        .collect()
}

/// Per segment: `Start`, then `Content`*, then exactly one `End`.
fn assert_lifecycle(events: &[SegmentEvent]) {
    let mut state: HashMap<&str, SegmentEventType> = HashMap::new();
    for event in events {
        let previous = state.get(event.segment_id.as_str()).copied();
        match event.event_type {
            SegmentEventType::Start => assert_eq!(previous, None, "{event:?}"),
            SegmentEventType::Content | SegmentEventType::End => assert!(
                matches!(
                    previous,
                    Some(SegmentEventType::Start | SegmentEventType::Content)
                ),
                "{event:?} after {previous:?}"
            ),
        }
        state.insert(event.segment_id.as_str(), event.event_type);
    }
    assert!(state.values().all(|s| *s == SegmentEventType::End));
}

/// Every invocation's id names a tool-bearing segment.
fn assert_ids_pair(events: &[SegmentEvent], invocations: &[ToolInvocation]) {
    for invocation in invocations {
        let start = events
            .iter()
            .find(|e| e.event_type == SegmentEventType::Start && e.segment_id == invocation.id)
            .unwrap_or_else(|| panic!("no segment for invocation {}", invocation.id));
        assert!(start.segment_type.unwrap().is_tool(), "{start:?}");
    }
}

fn api_args(index: usize, text: &str) -> ResponseChunk {
    ToolCallDelta::arguments(index, text).into()
}

// ═══════════════════════════════════════════════════════════════════════
//  Chunk invariance
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn xml_whole_response() {
    let observed = run_pieces("xml", [XML_RESPONSE]);
    assert_eq!(
        observed.calls,
        vec![
            (
                "search".to_owned(),
                json!({"query": "rust & streams", "tags": ["a", "b"]})
            ),
            (
                "write_file".to_owned(),
                json!({"path": "notes.md", "content": "<!-- draft --> a && b"})
            ),
            ("run_bash".to_owned(), json!({"command": "cargo test"})),
        ]
    );
    assert!(observed.text.starts_with("I'll look first.\n"));
    assert!(observed.text.contains("Then write it.\n"));
    assert!(observed.text.ends_with("Done."));
    assert!(!observed.text.contains("<tool"));
    assert_eq!(observed.tool_content[1], "<!-- draft --> a && b");
}

#[test]
fn xml_one_character_per_chunk() {
    let whole = run_pieces("xml", [XML_RESPONSE]);
    let split = run_pieces("xml", one_char_pieces(XML_RESPONSE));
    assert_eq!(whole, split);
}

#[test]
fn xml_every_two_way_split() {
    let whole = run_pieces("xml", [XML_RESPONSE]);
    for (i, _) in XML_RESPONSE.char_indices().skip(1) {
        let (a, b) = XML_RESPONSE.split_at(i);
        assert_eq!(run_pieces("xml", [a, b]), whole, "split at {i}");
    }
}

#[test]
fn json_one_character_per_chunk() {
    let whole = run_pieces("json", [JSON_RESPONSE]);
    assert_eq!(
        whole.calls,
        vec![
            (
                "write_file".to_owned(),
                json!({"path": "a.txt", "content": "x \"quoted\"\n"})
            ),
            ("search".to_owned(), json!({"q": "n <= 0"})),
        ]
    );
    assert!(!whole.text.contains("```"));
    assert_eq!(run_pieces("json", one_char_pieces(JSON_RESPONSE)), whole);
}

#[test]
fn sentinel_one_character_per_chunk() {
    let whole = run_pieces("sentinel", [SENTINEL_RESPONSE]);
    assert_eq!(
        whole.calls,
        vec![
            (
                "write_file".to_owned(),
                json!({"path": "b.txt", "content": "body [[not a marker]]\n"})
            ),
            ("run_bash".to_owned(), json!({"command": "ls -la"})),
        ]
    );
    assert_eq!(
        run_pieces("sentinel", one_char_pieces(SENTINEL_RESPONSE)),
        whole
    );
}

#[test]
fn api_calls_one_character_per_chunk() {
    let args = r#"{"path": "src/lib.rs", "content": "fn f() -> &'static str {\n    \"a\\b\"\n}\n"}"#;

    let run = |pieces: &[&str]| {
        let mut handler = handler_for("api_tool_call");
        handler
            .feed(&ToolCallDelta::begin(0, "call_1", "write_file").into())
            .unwrap();
        for piece in pieces {
            handler.feed(&api_args(0, piece)).unwrap();
        }
        let invocations = handler.finalize().unwrap();
        assert_lifecycle(handler.events());
        assert_ids_pair(handler.events(), &invocations);
        observe(handler.as_ref(), &invocations)
    };

    let whole = run(&[args]);
    let expected = "fn f() -> &'static str {\n    \"a\\b\"\n}\n";
    assert_eq!(whole.calls[0].1["content"], expected);
    assert_eq!(whole.tool_content, vec![expected.to_owned()]);
    assert_eq!(run(&one_char_pieces(args)), whole);
}

// ═══════════════════════════════════════════════════════════════════════
//  Look-alike markup and split fragments
// ═══════════════════════════════════════════════════════════════════════

const LOOKALIKE_RESPONSE: &str = "I use the <tool that's best. Try <bash command, it's fine.\n<tool name=\"x\"><a>1</a></tool >\nok";

#[test]
fn xml_lookalike_openers_keep_later_call() {
    let whole = run_pieces("xml", [LOOKALIKE_RESPONSE]);
    assert_eq!(whole.calls, vec![("x".to_owned(), json!({"a": "1"}))]);
    assert!(whole.text.starts_with("I use the <tool that's best. Try <bash command, it's fine.\n"));
    assert!(whole.text.ends_with("\nok"));
    assert!(!whole.text.contains("</tool"));

    assert_eq!(run_pieces("xml", one_char_pieces(LOOKALIKE_RESPONSE)), whole);
    for (i, _) in LOOKALIKE_RESPONSE.char_indices().skip(1) {
        let (a, b) = LOOKALIKE_RESPONSE.split_at(i);
        assert_eq!(run_pieces("xml", [a, b]), whole, "split at {i}");
    }
}

#[test]
fn xml_lookalike_opener_text_streams_before_finalize() {
    let mut handler = handler_for("xml");
    let mut streamed = String::new();
    for piece in one_char_pieces("See <tool that's best") {
        for event in handler.feed_text(piece).unwrap() {
            streamed.push_str(event.delta().unwrap_or_default());
        }
    }
    assert_eq!(streamed, "See <tool that's best");
}

#[test]
fn xml_close_tag_with_whitespace_ends_call_live() {
    let mut handler = handler_for("xml");
    handler
        .feed_text(r#"<tool name="x"><a>1</a></tool"#)
        .unwrap();
    assert!(handler.tool_invocations().is_empty());
    handler.feed_text(" ").unwrap();
    let events = handler.feed_text("> after").unwrap();
    assert_eq!(handler.tool_invocations().len(), 1);
    assert!(events.iter().any(|e| e.delta() == Some(" after")));

    let legacy = parse_tool_invocations(r#"<tool name="x"><a>1</a></tool > after"#);
    assert_eq!(legacy[0].arguments, handler.tool_invocations()[0].arguments);
}

#[test]
fn api_split_name_one_fragment_per_chunk() {
    let args = r#"{"path": "a.txt", "content": "hi"}"#;
    let run = |name_pieces: &[&str], arg_pieces: &[&str]| {
        let mut handler = handler_for("api_tool_call");
        for (n, piece) in name_pieces.iter().enumerate() {
            let delta = ToolCallDelta {
                index: 0,
                call_id: (n == name_pieces.len() - 1).then(|| "call_w".to_owned()),
                name: Some((*piece).to_owned()),
                ..Default::default()
            };
            handler.feed(&delta.into()).unwrap();
        }
        for piece in arg_pieces {
            handler.feed(&api_args(0, piece)).unwrap();
        }
        let invocations = handler.finalize().unwrap();
        assert_lifecycle(handler.events());
        assert_ids_pair(handler.events(), &invocations);

        let start = &handler.events()[0];
        assert_eq!(start.segment_id, "call_w");
        assert_eq!(start.segment_type, Some(SegmentType::WriteFile));
        assert_eq!(start.metadata_str("tool_name"), Some("write_file"));
        observe(handler.as_ref(), &invocations)
    };

    let whole = run(&["write_file"], &[args]);
    assert_eq!(
        whole.calls,
        vec![("write_file".to_owned(), json!({"path": "a.txt", "content": "hi"}))]
    );
    assert_eq!(whole.tool_content, vec!["hi".to_owned()]);
    assert_eq!(run(&["write", "_", "file"], &one_char_pieces(args)), whole);
}

// ═══════════════════════════════════════════════════════════════════════
//  Edge cases
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn escape_split_after_backslash() {
    let mut handler = handler_for("api_tool_call");
    handler
        .feed(&ToolCallDelta::begin(0, "call_esc", "write_file").into())
        .unwrap();
    handler
        .feed(&api_args(0, r#"{"path": "q.txt", "content": "say \"#))
        .unwrap();
    handler.feed(&api_args(0, r#""hi\"#)).unwrap();
    handler.feed(&api_args(0, r#"" and \"#)).unwrap();
    handler.feed(&api_args(0, r#"n"}"#)).unwrap();
    let invocations = handler.finalize().unwrap();

    assert_eq!(invocations[0].argument_str("content"), Some("say \"hi\" and \n"));
    let streamed: String = handler
        .events()
        .iter()
        .filter(|e| e.segment_id == "call_esc")
        .filter_map(SegmentEvent::delta)
        .collect();
    assert_eq!(streamed, "say \"hi\" and \n");
}

#[test]
fn unescaped_less_than_in_xml_arguments() {
    let text = r#"<tool name="edit"><arg name="note">Handle n <= 0 case</arg></tool>"#;
    let lt = text.find("<=").unwrap();

    for pieces in [vec![text], vec![&text[..lt], &text[lt..]]] {
        let observed = run_pieces("xml", pieces);
        assert_eq!(
            observed.calls,
            vec![("edit".to_owned(), json!({"note": "Handle n <= 0 case"}))]
        );
    }
}

#[test]
fn idempotent_flush() {
    let mut handler = handler_for("xml");
    handler.feed_text(r#"<tool name="x"><a>1</a></tool>"#).unwrap();
    let first = handler.finalize().unwrap();
    let events = handler.events().len();
    let second = handler.finalize().unwrap();

    assert_eq!(first.len(), 1);
    assert_eq!(first, second);
    assert_eq!(first[0].name, "x");
    assert_eq!(Value::Object(first[0].arguments.clone()), json!({"a": "1"}));
    assert_eq!(handler.events().len(), events);
    assert_eq!(handler.tool_invocations(), first.as_slice());
}

#[test]
fn no_tools_never_yields_invocations() {
    let options = HandlerOptions::default()
        .with_tools(false)
        .with_provider("anthropic");
    let mut handler = StreamingResponseHandlerFactory::create(&options).unwrap();
    handler.feed_text(XML_RESPONSE).unwrap();
    handler
        .feed(&ToolCallDelta::begin(0, "call_1", "run_bash").into())
        .unwrap();
    assert!(handler.finalize().unwrap().is_empty());

    let observed = observe(handler.as_ref(), &[]);
    assert_eq!(observed.text, XML_RESPONSE);
    assert!(observed.tool_content.is_empty());
}

#[test]
fn parallel_api_calls_in_index_order() {
    let mut handler = handler_for("native");
    handler
        .feed(&ResponseChunk::ToolCalls {
            content: "Checking two things.".into(),
            tool_calls: vec![
                ToolCallDelta::begin(0, "call_a", "read_file"),
                ToolCallDelta::begin(1, "call_b", "run_bash"),
            ],
        })
        .unwrap();
    let first = one_char_pieces(r#"{"path": "Cargo.toml"}"#);
    let second = one_char_pieces(r#"{"command": "git status"}"#);
    for i in 0..first.len().max(second.len()) {
        if let Some(piece) = second.get(i) {
            handler.feed(&api_args(1, piece)).unwrap();
        }
        if let Some(piece) = first.get(i) {
            handler.feed(&api_args(0, piece)).unwrap();
        }
    }
    let invocations = handler.finalize().unwrap();

    let ids: Vec<_> = invocations.iter().map(|i| i.id.as_str()).collect();
    assert_eq!(ids, vec!["call_a", "call_b"]);
    assert_eq!(invocations[0].argument_str("path"), Some("Cargo.toml"));
    assert_eq!(invocations[1].argument_str("command"), Some("git status"));
    assert_lifecycle(handler.events());
}

#[test]
fn feed_after_finalize_is_rejected_until_reset() {
    let mut handler = handler_for("json");
    handler.feed_text("hello").unwrap();
    handler.finalize().unwrap();

    let err = handler.feed_text("more").unwrap_err();
    assert!(matches!(err, StreamError::AlreadyFinalized { handler: "parsing:json" }));

    handler.reset();
    assert!(handler.events().is_empty());
    handler.feed_text("again").unwrap();
    assert!(!handler.is_finalized());
}

// ═══════════════════════════════════════════════════════════════════════
//  Listener seam
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn listener_sees_every_event_and_invocation_in_order() {
    let log: Arc<Mutex<Vec<String>>> = Arc::default();
    let events_log = Arc::clone(&log);
    let invocations_log = Arc::clone(&log);
    let listener = CallbackListener::new()
        .with_segment_events(move |event| {
            events_log
                .lock()
                .unwrap()
                .push(format!("{:?}:{}", event.event_type, event.segment_id));
            Ok(())
        })
        .with_tool_invocations(move |invocation| {
            invocations_log
                .lock()
                .unwrap()
                .push(format!("Invocation:{}", invocation.id));
            Ok(())
        });

    let mut handler = handler_for("xml");
    handler.set_listener(Box::new(listener));
    handler.feed_text("Run it: <bash>ls</bash>").unwrap();
    let invocations = handler.finalize().unwrap();

    let log = log.lock().unwrap();
    let id = &invocations[0].id;
    let invocation_at = log
        .iter()
        .position(|l| *l == format!("Invocation:{id}"))
        .unwrap();
    assert_eq!(log[invocation_at + 1], format!("End:{id}"));
    assert_eq!(log.len(), handler.events().len() + 1);
}

#[test]
fn listener_error_aborts_the_call() {
    let listener = CallbackListener::new()
        .with_tool_invocations(|_| Err(StreamError::listener("sink closed")));
    let mut handler = handler_for("xml");
    handler.set_listener(Box::new(listener));
    handler.feed_text("<bash>ls</bash>").unwrap_err();

    let mut handler = handler_for("xml");
    handler.set_listener(Box::new(
        CallbackListener::new().with_segment_events(|_| Err(StreamError::listener("nope"))),
    ));
    let err = handler.feed_text("plain text").unwrap_err();
    assert!(matches!(err, StreamError::Listener { ref reason } if reason == "nope"));
}

// ═══════════════════════════════════════════════════════════════════════
//  Configuration
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn config_file_drives_selection_and_classification() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("segstream.toml");
    std::fs::write(
        &path,
        r#"
default_parser = "sentinel"

[providers]
openai = "api_tool_call"

[tools]
write_file = ["save"]

[parsing]
bash_tool_name = "shell"
"#,
    )
    .unwrap();

    let config = StreamConfig::load(&path).unwrap();
    let options = HandlerOptions::new(config.clone()).with_provider("openai");
    let mut handler = StreamingResponseHandlerFactory::create(&options).unwrap();
    assert_eq!(handler.name(), "api_tool_call");
    handler
        .feed(&ToolCallDelta::begin(0, "call_s", "save").into())
        .unwrap();
    handler
        .feed(&api_args(0, r#"{"path": "x", "content": "y"}"#))
        .unwrap();
    handler.finalize().unwrap();
    assert_eq!(handler.events()[0].segment_type, Some(SegmentType::WriteFile));

    let options = HandlerOptions::new(config).with_provider("mistral");
    let mut handler = StreamingResponseHandlerFactory::create(&options).unwrap();
    assert_eq!(handler.name(), "parsing:sentinel");
    handler
        .feed_text("[[SEG_START {\"type\": \"bash\"}]]pwd[[SEG_END]]")
        .unwrap();
    assert_eq!(handler.finalize().unwrap()[0].name, "shell");
}

#[test]
fn invalid_config_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "default_parser = \"yaml\"\n").unwrap();
    assert!(matches!(
        StreamConfig::load(&path),
        Err(StreamError::UnknownParser { .. })
    ));

    std::fs::write(&path, "[parsing\n").unwrap();
    assert!(matches!(
        StreamConfig::load(&path),
        Err(StreamError::Config { .. })
    ));

    assert!(matches!(
        StreamConfig::load(&dir.path().join("missing.toml")),
        Err(StreamError::Io(_))
    ));
}

// ═══════════════════════════════════════════════════════════════════════
//  Async driver and legacy parser
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn drive_feeds_and_finalizes() {
    let chunks: Vec<ResponseChunk> = one_char_pieces(XML_RESPONSE)
        .into_iter()
        .map(ResponseChunk::from)
        .collect();
    let mut handler = handler_for("xml");
    let invocations = drive(handler.as_mut(), futures::stream::iter(chunks))
        .await
        .unwrap();

    assert!(handler.is_finalized());
    let names: Vec<_> = invocations.iter().map(|i| i.name.as_str()).collect();
    assert_eq!(names, vec!["search", "write_file", "run_bash"]);
}

#[tokio::test]
async fn drive_stops_on_finalized_handler() {
    let mut handler = handler_for("json");
    handler.finalize().unwrap();
    let result = drive(
        handler.as_mut(),
        futures::stream::iter(vec![ResponseChunk::from("late")]),
    )
    .await;
    assert!(matches!(result, Err(StreamError::AlreadyFinalized { .. })));
}

#[test]
fn legacy_parser_agrees_with_streaming_xml() {
    let text = r#"First <tool name="a"><x>1</x></tool> then <tool name="b"><arg name="y"><item>2</item></arg></tool>"#;
    let legacy = parse_tool_invocations(text);
    let streamed = run_pieces("xml", one_char_pieces(text));

    let legacy: Vec<_> = legacy
        .into_iter()
        .map(|i| (i.name, Value::Object(i.arguments)))
        .collect();
    assert_eq!(legacy, streamed.calls);
}
