//! Decoding provider wire events into results

use genstream::decoder::{DecodeStep, DecodedPayload, DecodedResult, StreamDecoder};
use genstream::error::{ApiError, ProviderError};
use genstream::provider::{OutputItem, OutputSchema, ProviderResponse, ProviderWireEvent, ScriptedCall};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

fn point_schema() -> OutputSchema {
    OutputSchema {
        name: "emit_point".to_string(),
        description: None,
        schema: json!({
            "type": "object",
            "properties": {"x": {"type": "integer"}, "y": {"type": "integer"}},
            "required": ["x", "y"]
        }),
    }
}

fn events_of(call: ScriptedCall) -> Vec<ProviderWireEvent> {
    match call {
        ScriptedCall::Respond(events) => events,
        ScriptedCall::Fail(err) => panic!("expected events, got {}", err),
    }
}

/// Feed every event, collecting chunks until the call resolves.
fn run(decoder: &mut StreamDecoder, events: Vec<ProviderWireEvent>) -> (Vec<String>, Result<DecodedResult, ApiError>) {
    let mut chunks = Vec::new();
    for event in events {
        match decoder.feed(event) {
            Ok(DecodeStep::Chunk(text)) => chunks.push(text),
            Ok(DecodeStep::Continue) => {}
            Ok(DecodeStep::Resolved(result)) => return (chunks, Ok(result)),
            Err(err) => return (chunks, Err(err)),
        }
    }
    let err = decoder.finish().err().unwrap_or_else(|| ApiError::Internal("unresolved".into()));
    (chunks, Err(err))
}

#[test]
fn test_structured_fragments_resolve_to_parsed_value() {
    let mut decoder = StreamDecoder::new(Some(point_schema()));
    let events = events_of(ScriptedCall::structured_response(
        "fc_1",
        "emit_point",
        &["{\"x\"", ":1,", "\"y\":2}"],
    ));

    let (chunks, result) = run(&mut decoder, events);
    assert_eq!(chunks.concat(), "{\"x\":1,\"y\":2}");
    let result = result.unwrap();
    assert_eq!(result.payload, DecodedPayload::Structured(json!({"x": 1, "y": 2})));
    assert_eq!(result.usage.input_tokens, 12);
    assert!(decoder.is_finished());
}

#[test]
fn test_single_element_list_is_repaired_once() {
    let mut decoder = StreamDecoder::new(Some(point_schema()));
    let events = events_of(ScriptedCall::structured_response(
        "fc_1",
        "emit_point",
        &["[{\"x\":1,\"y\":2}]"],
    ));
    let (_, result) = run(&mut decoder, events);
    assert_eq!(
        result.unwrap().payload,
        DecodedPayload::Structured(json!({"x": 1, "y": 2}))
    );

    let mut decoder = StreamDecoder::new(Some(point_schema()));
    let events = events_of(ScriptedCall::structured_response(
        "fc_1",
        "emit_point",
        &["[{\"x\":1,\"y\":2},{\"x\":3,\"y\":4}]"],
    ));
    let (_, result) = run(&mut decoder, events);
    assert!(matches!(result, Err(ApiError::Decode(_))));
}

#[test]
fn test_done_event_with_full_arguments_replaces_buffer() {
    let mut decoder = StreamDecoder::new(Some(point_schema()));
    let events = vec![
        ProviderWireEvent::StructuredArgDelta {
            item_id: "fc_1".to_string(),
            fragment: "{\"x\":1,".to_string(),
        },
        ProviderWireEvent::StructuredArgDone {
            item_id: "fc_1".to_string(),
            arguments: Some("{\"x\":5,\"y\":6}".to_string()),
        },
        ProviderWireEvent::Completed(ProviderResponse {
            output: vec![OutputItem::FunctionCall {
                item_id: "fc_1".to_string(),
                name: "emit_point".to_string(),
                arguments: String::new(),
            }],
            ..ProviderResponse::default()
        }),
    ];
    let (_, result) = run(&mut decoder, events);
    assert_eq!(
        result.unwrap().payload,
        DecodedPayload::Structured(json!({"x": 5, "y": 6}))
    );
}

#[test]
fn test_chat_style_usage_is_normalised() {
    let mut decoder = StreamDecoder::new(None);
    let response = ProviderResponse::from_json(&json!({
        "id": "resp_1",
        "model": "gpt-4o-2024-08-06",
        "usage": {
            "prompt_tokens": 100,
            "completion_tokens": 40,
            "completion_tokens_details": {"reasoning_tokens": 8},
            "prompt_tokens_details": {"cached_tokens": 64}
        },
        "output": [{
            "type": "message",
            "content": [{"type": "output_text", "text": "hello"}]
        }]
    }));

    let (_, result) = run(&mut decoder, vec![ProviderWireEvent::Completed(response)]);
    let result = result.unwrap();
    assert_eq!(result.payload, DecodedPayload::Text("hello".to_string()));
    assert_eq!(result.usage.input_tokens, 100);
    assert_eq!(result.usage.output_tokens, 40);
    assert_eq!(result.usage.total_tokens, 140);
    assert_eq!(result.usage.reasoning_tokens, 8);
    assert_eq!(result.usage.cached_tokens, 64);
    assert_eq!(result.model.as_deref(), Some("gpt-4o-2024-08-06"));
}

#[test]
fn test_reasoning_callback_errors_are_swallowed() {
    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let mut decoder = StreamDecoder::new(None).with_reasoning_callback(Box::new(move |text| {
        sink.lock().unwrap().push(text.to_string());
        Err(ApiError::Internal("listener gone".to_string()))
    }));

    let mut events = vec![
        ProviderWireEvent::ReasoningDelta("think ".to_string()),
        ProviderWireEvent::ReasoningDelta("hard".to_string()),
    ];
    events.extend(events_of(ScriptedCall::text_response(&["answer"])));

    let (chunks, result) = run(&mut decoder, events);
    assert_eq!(chunks, vec!["answer".to_string()]);
    let result = result.unwrap();
    assert_eq!(result.reasoning.as_deref(), Some("think hard"));
    assert_eq!(*seen.lock().unwrap(), vec!["think ".to_string(), "hard".to_string()]);
}

#[test]
fn test_failed_envelope_abandons_decoding() {
    let mut decoder = StreamDecoder::new(None);
    let events = vec![
        ProviderWireEvent::TextDelta("partial".to_string()),
        ProviderWireEvent::Failed("server_error".to_string()),
        ProviderWireEvent::TextDelta("ignored".to_string()),
    ];
    let (chunks, result) = run(&mut decoder, events);
    assert_eq!(chunks, vec!["partial".to_string()]);
    match result {
        Err(ApiError::Provider(ProviderError::ResponseFailed(message))) => {
            assert_eq!(message, "server_error")
        }
        other => panic!("expected failed response, got {:?}", other),
    }
}

#[test]
fn test_buffer_cap_is_a_decode_failure() {
    let mut decoder = StreamDecoder::new(Some(point_schema())).with_max_buffer_bytes(16);
    let big = format!("{{\"x\":\"{}\"", "a".repeat(64));
    let events = vec![ProviderWireEvent::StructuredArgDelta {
        item_id: "fc_1".to_string(),
        fragment: big,
    }];
    let (chunks, result) = run(&mut decoder, events);
    assert!(chunks.is_empty());
    assert!(matches!(result, Err(ApiError::Decode(_))));
}

#[test]
fn test_stream_without_envelope_fails() {
    let mut decoder = StreamDecoder::new(None);
    let (_, result) = run(&mut decoder, vec![ProviderWireEvent::TextDelta("dangling".into())]);
    assert!(matches!(result, Err(ApiError::Decode(_))));
}

#[test]
fn test_blocking_response_expands_to_equivalent_events() {
    let response = ProviderResponse {
        id: Some("resp_1".to_string()),
        model: Some("gpt-4.1".to_string()),
        usage: Some(json!({"input_tokens": 3, "output_tokens": 4})),
        output: vec![OutputItem::FunctionCall {
            item_id: "fc_9".to_string(),
            name: "emit_point".to_string(),
            arguments: "{\"x\":0,\"y\":-1}".to_string(),
        }],
    };
    let mut decoder = StreamDecoder::new(Some(point_schema()));
    let (chunks, result) = run(&mut decoder, response.into_events());
    assert_eq!(chunks, vec!["{\"x\":0,\"y\":-1}".to_string()]);
    let result = result.unwrap();
    let expected: Value = json!({"x": 0, "y": -1});
    assert_eq!(result.payload, DecodedPayload::Structured(expected));
    assert_eq!(result.usage.total_tokens, 7);
}
