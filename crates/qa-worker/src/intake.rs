//! Message intake and shape normalization.
//!
//! Two producer shapes are accepted:
//! - addressed: `{id, thread_id, user_id, content}`
//! - legacy: `{question_id, question}`
//!
//! `content` wins over `question`, `question_id` wins over `id`, and ids may
//! be strings or numbers. Anything else that is still valid JSON is answered
//! as text: a JSON string verbatim, other values as their JSON rendering.

use qa_common::{Question, UNKNOWN_QUESTION_ID};
use serde_json::{Map, Value};

use crate::error::WorkerError;

const RECOGNIZED_KEYS: [&str; 6] = [
    "content",
    "question",
    "question_id",
    "id",
    "thread_id",
    "user_id",
];

/// Decode and normalize a message body. Fails only when the body is not JSON.
pub fn parse_question(body: &[u8]) -> Result<Question, WorkerError> {
    let value: Value =
        serde_json::from_slice(body).map_err(|e| WorkerError::Parse(e.to_string()))?;
    Ok(normalize(value))
}

/// Reject questions that have nothing to answer
pub fn validate(question: Question) -> Result<Question, WorkerError> {
    if question.is_blank() {
        return Err(WorkerError::Validation {
            question_id: question.question_id,
        });
    }
    Ok(question)
}

fn normalize(value: Value) -> Question {
    match value {
        Value::Object(map) if RECOGNIZED_KEYS.iter().any(|k| map.contains_key(*k)) => {
            from_object(&map)
        }
        Value::String(text) => unidentified(text),
        Value::Null => unidentified(String::new()),
        other => unidentified(other.to_string()),
    }
}

fn from_object(map: &Map<String, Value>) -> Question {
    Question {
        question_id: id_field(map, "question_id")
            .or_else(|| id_field(map, "id"))
            .unwrap_or_else(|| UNKNOWN_QUESTION_ID.to_string()),
        content: text_field(map, "content")
            .or_else(|| text_field(map, "question"))
            .unwrap_or_default(),
        thread_id: id_field(map, "thread_id"),
        user_id: id_field(map, "user_id"),
        timestamp: map
            .get("timestamp")
            .and_then(Value::as_str)
            .map(str::to_string),
    }
}

fn unidentified(content: String) -> Question {
    Question {
        question_id: UNKNOWN_QUESTION_ID.to_string(),
        content,
        thread_id: None,
        user_id: None,
        timestamp: None,
    }
}

/// Strings and numbers, anything else counts as absent
fn id_field(map: &Map<String, Value>, key: &str) -> Option<String> {
    match map.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn text_field(map: &Map<String, Value>, key: &str) -> Option<String> {
    match map.get(key)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(body: &str) -> Question {
        parse_question(body.as_bytes()).unwrap()
    }

    #[test]
    fn test_legacy_shape() {
        let q = parse(concat!(
            r#"{"question_id":"q-1","question":"What is a trait?","#,
            r#""timestamp":"2024-01-01T00:00:00Z"}"#
        ));
        assert_eq!(q.question_id, "q-1");
        assert_eq!(q.content, "What is a trait?");
        assert_eq!(q.timestamp.as_deref(), Some("2024-01-01T00:00:00Z"));
        assert!(q.recipient().is_none());
    }

    #[test]
    fn test_addressed_shape() {
        let q =
            parse(r#"{"id":"q-2","thread_id":"t1","user_id":"u1","content":"Explain borrowing"}"#);
        assert_eq!(q.question_id, "q-2");
        assert_eq!(q.content, "Explain borrowing");
        let recipient = q.recipient().unwrap();
        assert_eq!(recipient.thread_id, "t1");
        assert_eq!(recipient.user_id, "u1");
    }

    #[test]
    fn test_content_wins_over_question() {
        let q = parse(r#"{"content":"from content","question":"from question"}"#);
        assert_eq!(q.content, "from content");
    }

    #[test]
    fn test_question_id_wins_over_id() {
        let q = parse(r#"{"question_id":"primary","id":"secondary","content":"x"}"#);
        assert_eq!(q.question_id, "primary");
    }

    #[test]
    fn test_numeric_ids() {
        let q = parse(r#"{"id":42,"thread_id":7,"user_id":9,"content":"x"}"#);
        assert_eq!(q.question_id, "42");
        assert_eq!(q.thread_id.as_deref(), Some("7"));
        assert_eq!(q.user_id.as_deref(), Some("9"));
    }

    #[test]
    fn test_missing_id_is_unknown() {
        let q = parse(r#"{"question":"no id here"}"#);
        assert_eq!(q.question_id, UNKNOWN_QUESTION_ID);
    }

    #[test]
    fn test_bare_string_is_content() {
        let q = parse(r#""What is a monad?""#);
        assert_eq!(q.content, "What is a monad?");
        assert_eq!(q.question_id, UNKNOWN_QUESTION_ID);
    }

    #[test]
    fn test_unrecognized_values_become_json_text() {
        assert_eq!(parse(r#"{"foo":"bar"}"#).content, r#"{"foo":"bar"}"#);
        assert_eq!(parse("[1,2]").content, "[1,2]");
        assert_eq!(parse("12").content, "12");
        assert_eq!(parse("true").content, "true");
    }

    #[test]
    fn test_null_body_is_blank() {
        assert!(parse("null").is_blank());
    }

    #[test]
    fn test_invalid_json_is_parse_error() {
        assert!(matches!(parse_question(b"not json"), Err(WorkerError::Parse(_))));
        assert!(matches!(parse_question(&[0xff, 0xfe]), Err(WorkerError::Parse(_))));
    }

    #[test]
    fn test_validate_rejects_blank_content() {
        let q = parse(r#"{"question_id":"q-3","question":"   "}"#);
        match validate(q) {
            Err(WorkerError::Validation { question_id }) => assert_eq!(question_id, "q-3"),
            other => panic!("unexpected: {:?}", other),
        }

        let q = parse(r#"{"question_id":"q-4"}"#);
        assert!(validate(q).is_err());
    }
}
