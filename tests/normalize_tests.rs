//! Table-driven checks of reply text extraction across every payload shape.

use chat_relay::normalize::*;
use rstest::rstest;
use serde_json::{json, Value};

#[rstest]
#[case::plain_string(json!("hello"), Some("hello"))]
#[case::answer_field(json!({"answer": "hi"}), Some("hi"))]
#[case::text_field(json!({"text": "t"}), Some("t"))]
#[case::message_field(json!({"message": "m"}), Some("m"))]
#[case::assistant_field(json!({"assistant": "a"}), Some("a"))]
#[case::text_before_answer(json!({"answer": "second", "text": "first"}), Some("first"))]
#[case::answer_before_message(json!({"message": "third", "answer": "second"}), Some("second"))]
#[case::messages_last_assistant(
    json!({"messages": [
        {"role": "user", "content": "q"},
        {"role": "assistant", "content": "a"}
    ]}),
    Some("a")
)]
#[case::messages_scans_from_end(
    json!({"messages": [
        {"role": "assistant", "content": "old"},
        {"role": "user", "content": "q"},
        {"role": "assistant", "content": "new"},
        {"role": "user", "content": "pending"}
    ]}),
    Some("new")
)]
#[case::messages_nested_content(
    json!({"messages": [{"role": "assistant", "content": {"type": "text", "text": "nested"}}]}),
    Some("nested")
)]
#[case::role_content_array(
    json!([{"role": "user", "content": "q"}, {"role": "assistant", "content": "a"}]),
    Some("a")
)]
#[case::legacy_pairs(json!([["user", "q"], ["assistant", "a"]]), Some("a"))]
#[case::gradio_history(json!([["q1", "a1"], ["q2", "a2"]]), Some("a2"))]
#[case::value_string(json!({"value": "wrapped"}), Some("wrapped"))]
#[case::value_pairs(json!({"value": [["q", "a"]]}), Some("a"))]
#[case::empty_object(json!({}), None)]
#[case::null(json!(null), None)]
#[case::number(json!(3), None)]
#[case::empty_array(json!([]), None)]
#[case::pair_with_null_reply(json!([["q", null]]), None)]
#[case::three_tuple(json!([["q", "a", "extra"]]), None)]
#[case::no_assistant(json!({"messages": [{"role": "user", "content": "q"}]}), None)]
#[case::non_string_fields(json!({"text": 1, "answer": null}), None)]
fn extracts_expected_text(#[case] raw: Value, #[case] expected: Option<&str>) {
    assert_eq!(extract_text(&raw).as_deref(), expected);
}

#[rstest]
#[case(json!("x"), true)]
#[case(json!({"answer": "x"}), true)]
#[case(json!([["u", "a"]]), true)]
#[case(json!({"session": 1}), false)]
#[case(json!(null), false)]
#[case(json!([1, 2]), false)]
fn recognition_follows_extraction(#[case] raw: Value, #[case] recognized: bool) {
    assert_eq!(is_recognized(&raw), recognized);
}

#[test]
fn classification_priority_is_fixed() {
    let raw = json!({
        "value": "envelope",
        "messages": [{"role": "assistant", "content": "list"}],
        "assistant": "field"
    });
    assert_eq!(
        classify(&raw),
        ResponseShape::TextField {
            field: "assistant",
            text: "field"
        }
    );

    let raw = json!({
        "value": "envelope",
        "messages": [{"role": "assistant", "content": "list"}]
    });
    assert!(matches!(classify(&raw), ResponseShape::MessageList(_)));
    assert_eq!(extract_text(&raw).as_deref(), Some("list"));
}

#[test]
fn text_fields_are_in_priority_order() {
    assert_eq!(TEXT_FIELDS, ["text", "answer", "message", "assistant"]);
}

#[test]
fn unknown_shape_pretty_prints_for_diagnosis() {
    let raw = json!({"weird": {"nested": true}});
    assert_eq!(extract_text(&raw), None);
    let shown = pretty_raw(&raw);
    assert!(shown.contains("\"weird\""));
    assert!(shown.lines().count() > 1);
}
