//! Tool Call Normalization
//!
//! The remote model does not guarantee a wire shape for tool invocations. This
//! module checks an inbound event against a fixed, ordered set of extraction
//! rules and produces a canonical [`ToolCall`] from the first rule that matches.
//! Events that match no rule are ordinary traffic (audio deltas, transcripts,
//! session updates) and yield `None`.

use chrono::Utc;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

/// A tool invocation recognized in an inbound event.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub name: String,
    /// Never empty; generated when the event carries no id.
    pub call_id: String,
    /// An object in the normal case. Anything else is kept as received:
    /// the raw string when the arguments were not JSON, or the parsed
    /// scalar or array when they were JSON but not an object.
    pub args: Value,
    /// The event the call was extracted from, kept for diagnostics.
    pub raw_event: Value,
}

impl ToolCall {
    /// Returns the arguments as a map when they parsed to a JSON object.
    pub fn args_object(&self) -> Option<&Map<String, Value>> {
        self.args.as_object()
    }

    /// True when the arguments are not a JSON object.
    pub fn is_degraded(&self) -> bool {
        !self.args.is_object()
    }
}

/// Where a tool-invocation record may live inside an event.
enum CandidateRule {
    /// The record sits at a fixed path.
    At(&'static [&'static str]),
    /// The event itself is the record when its `type` contains the marker.
    TypeMarker(&'static str),
}

const CANDIDATE_RULES: &[CandidateRule] = &[
    CandidateRule::At(&["tool_call"]),
    CandidateRule::At(&["function_call"]),
    CandidateRule::At(&["data", "tool_call"]),
    CandidateRule::TypeMarker("tool"),
    CandidateRule::TypeMarker("function_call"),
];

/// Which object a field rule reads from.
#[derive(Clone, Copy)]
enum Scope {
    /// The candidate record selected by `CANDIDATE_RULES`.
    Call,
    /// The whole inbound event.
    Event,
}

struct FieldRule {
    scope: Scope,
    path: &'static [&'static str],
}

const fn rule(scope: Scope, path: &'static [&'static str]) -> FieldRule {
    FieldRule { scope, path }
}

const NAME_RULES: &[FieldRule] = &[
    rule(Scope::Call, &["name"]),
    rule(Scope::Event, &["name"]),
    rule(Scope::Event, &["tool", "name"]),
    rule(Scope::Event, &["function", "name"]),
    rule(Scope::Call, &["function", "name"]),
    rule(Scope::Event, &["tool_name"]),
];

const CALL_ID_RULES: &[FieldRule] = &[
    rule(Scope::Call, &["id"]),
    rule(Scope::Call, &["call_id"]),
    rule(Scope::Event, &["call_id"]),
    rule(Scope::Event, &["tool_call_id"]),
    rule(Scope::Event, &["id"]),
];

const ARGS_RULES: &[FieldRule] = &[
    rule(Scope::Call, &["arguments"]),
    rule(Scope::Event, &["arguments"]),
    rule(Scope::Event, &["tool", "arguments"]),
    rule(Scope::Call, &["function", "arguments"]),
];

/// Extracts a tool call from an inbound event, if it carries one.
pub fn normalize(event: &Value) -> Option<ToolCall> {
    let Some(call) = find_candidate(event) else {
        trace!("Event carries no tool call");
        return None;
    };

    let Some(name) = first_text(NAME_RULES, call, event) else {
        debug!("Tool-call record has no name; ignoring");
        return None;
    };

    let call_id = first_text(CALL_ID_RULES, call, event).unwrap_or_else(generate_call_id);

    let args = match first_present(ARGS_RULES, call, event) {
        Some(Value::String(text)) => match serde_json::from_str::<Value>(text) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!(%call_id, tool = %name, error = %e, "Tool arguments are not JSON; passing raw string");
                Value::String(text.clone())
            }
        },
        Some(other) => other.clone(),
        None => Value::Object(Map::new()),
    };

    Some(ToolCall {
        name,
        call_id,
        args,
        raw_event: event.clone(),
    })
}

fn find_candidate(event: &Value) -> Option<&Value> {
    CANDIDATE_RULES.iter().find_map(|rule| match rule {
        CandidateRule::At(path) => lookup(event, path).filter(|v| is_truthy(v)),
        CandidateRule::TypeMarker(marker) => event
            .get("type")
            .and_then(Value::as_str)
            .filter(|kind| kind.contains(marker))
            .map(|_| event),
    })
}

fn lookup<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(value, |current, key| current.get(key))
}

fn resolve<'a>(rule: &FieldRule, call: &'a Value, event: &'a Value) -> Option<&'a Value> {
    let root = match rule.scope {
        Scope::Call => call,
        Scope::Event => event,
    };
    lookup(root, rule.path)
}

fn first_text(rules: &[FieldRule], call: &Value, event: &Value) -> Option<String> {
    rules.iter().find_map(|rule| match resolve(rule, call, event)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn first_present<'a>(rules: &[FieldRule], call: &'a Value, event: &'a Value) -> Option<&'a Value> {
    rules
        .iter()
        .find_map(|rule| resolve(rule, call, event).filter(|v| !v.is_null()))
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64() != Some(0.0),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn generate_call_id() -> String {
    static SEQUENCE: AtomicU64 = AtomicU64::new(0);
    let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("call_{}_{}", Utc::now().timestamp_millis(), seq)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_direct_tool_call_with_string_arguments() {
        let event = json!({ "tool_call": { "name": "x", "id": "c1", "arguments": "{\"a\":1}" } });

        let call = normalize(&event).expect("tool call should be recognized");
        assert_eq!(call.name, "x");
        assert_eq!(call.call_id, "c1");
        assert_eq!(call.args, json!({ "a": 1 }));
        assert!(!call.is_degraded());
        assert_eq!(call.raw_event, event);
    }

    #[test]
    fn test_unrecognized_event_is_not_a_tool_call() {
        assert!(normalize(&json!({ "type": "response.audio.delta", "delta": "AAAA" })).is_none());
        assert!(normalize(&json!({ "hello": "world" })).is_none());
        assert!(normalize(&json!("just a string")).is_none());
        assert!(normalize(&json!(null)).is_none());
    }

    #[test]
    fn test_object_arguments_pass_through() {
        let args = json!({ "name": "Ada", "email": "ada@example.com", "profile": "Both" });
        let event = json!({ "tool_call": { "name": "subscribe_to_list", "id": "c9", "arguments": args } });

        let first = normalize(&event).unwrap();
        assert_eq!(first.args, args);

        // Re-applying to an event carrying the already-normalized args is stable.
        let again = json!({ "tool_call": { "name": first.name, "id": first.call_id, "arguments": first.args } });
        let second = normalize(&again).unwrap();
        assert_eq!(second.args, args);
        assert_eq!(second.call_id, "c9");
    }

    #[test]
    fn test_unparseable_arguments_stay_raw() {
        let event = json!({ "tool_call": { "name": "x", "id": "c1", "arguments": "{\"a\":" } });

        let call = normalize(&event).unwrap();
        assert!(call.is_degraded());
        assert_eq!(call.args, json!("{\"a\":"));
        assert!(call.args_object().is_none());
    }

    #[test]
    fn test_non_object_arguments_are_degraded() {
        for (raw, parsed) in [("42", json!(42)), ("[1]", json!([1])), ("\"hi\"", json!("hi"))] {
            let event = json!({ "tool_call": { "name": "x", "id": "c1", "arguments": raw } });

            let call = normalize(&event).unwrap();
            assert_eq!(call.args, parsed);
            assert!(call.is_degraded(), "{raw} should be degraded");
            assert!(call.args_object().is_none());
        }

        let event = json!({ "tool_call": { "name": "x", "id": "c1", "arguments": [1, 2] } });
        assert!(normalize(&event).unwrap().is_degraded());
    }

    #[test]
    fn test_function_call_and_nested_shapes() {
        let function_call = json!({ "function_call": { "name": "f", "call_id": "fc1", "arguments": "{}" } });
        let call = normalize(&function_call).unwrap();
        assert_eq!(call.name, "f");
        assert_eq!(call.call_id, "fc1");

        let nested = json!({ "data": { "tool_call": { "name": "n", "id": "d1" } } });
        let call = normalize(&nested).unwrap();
        assert_eq!(call.name, "n");
        assert_eq!(call.call_id, "d1");
        assert_eq!(call.args, json!({}));
    }

    #[test]
    fn test_candidate_priority_prefers_direct_field() {
        let event = json!({
            "tool_call": { "name": "first", "id": "a" },
            "function_call": { "name": "second", "id": "b" }
        });
        let call = normalize(&event).unwrap();
        assert_eq!(call.name, "first");
        assert_eq!(call.call_id, "a");
    }

    #[test]
    fn test_type_tagged_realtime_event() {
        let event = json!({
            "type": "response.function_call_arguments.done",
            "event_id": "evt_1",
            "call_id": "call_abc",
            "name": "create_contact_request",
            "arguments": "{\"email\":\"a@b.c\",\"topic\":\"tokens\"}"
        });

        let call = normalize(&event).unwrap();
        assert_eq!(call.name, "create_contact_request");
        assert_eq!(call.call_id, "call_abc");
        assert_eq!(call.args, json!({ "email": "a@b.c", "topic": "tokens" }));
    }

    #[test]
    fn test_name_falls_back_to_event_fields() {
        let event = json!({
            "tool_call": { "id": "c3" },
            "tool": { "name": "from_tool", "arguments": { "k": "v" } }
        });
        let call = normalize(&event).unwrap();
        assert_eq!(call.name, "from_tool");
        assert_eq!(call.args, json!({ "k": "v" }));
    }

    #[test]
    fn test_missing_call_id_is_generated() {
        let event = json!({ "tool_call": { "name": "x" } });
        let first = normalize(&event).unwrap();
        let second = normalize(&event).unwrap();

        assert!(first.call_id.starts_with("call_"));
        assert!(!first.call_id.is_empty());
        assert_ne!(first.call_id, second.call_id);
    }

    #[test]
    fn test_empty_call_id_is_skipped() {
        let event = json!({ "tool_call": { "name": "x", "id": "" }, "tool_call_id": "t7" });
        assert_eq!(normalize(&event).unwrap().call_id, "t7");
    }

    #[test]
    fn test_nameless_record_is_ignored() {
        let event = json!({ "type": "tool.started", "id": "evt" });
        assert!(normalize(&event).is_none());
    }
}
