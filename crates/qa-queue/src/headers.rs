//! AMQP property mapping for queue envelopes.
//!
//! Producers and the worker always write `x-retry-count`. Reading is lenient:
//! messages from other producers may carry the count as any integer width or
//! as a numeric string, or not at all.

use lapin::types::{AMQPValue, FieldTable};
use lapin::BasicProperties;
use qa_common::{QueueEnvelope, RETRY_COUNT_HEADER};

/// Persistent delivery mode
const PERSISTENT: u8 = 2;

pub fn retry_headers(retry_count: u32) -> FieldTable {
    let mut headers = FieldTable::default();
    headers.insert(
        RETRY_COUNT_HEADER.into(),
        AMQPValue::LongLongInt(i64::from(retry_count)),
    );
    headers
}

/// Properties for publishing `envelope`: persistent JSON with the retry header
pub fn envelope_properties(envelope: &QueueEnvelope) -> BasicProperties {
    let properties = BasicProperties::default()
        .with_delivery_mode(PERSISTENT)
        .with_content_type("application/json".into())
        .with_headers(retry_headers(envelope.retry_count));

    match &envelope.message_id {
        Some(id) => properties.with_message_id(id.as_str().into()),
        None => properties,
    }
}

/// Absent, negative or unparseable values read as 0
pub fn retry_count_from(headers: Option<&FieldTable>) -> u32 {
    headers
        .and_then(|table| {
            table
                .inner()
                .iter()
                .find(|(key, _)| key.as_str() == RETRY_COUNT_HEADER)
                .and_then(|(_, value)| value_as_count(value))
        })
        .unwrap_or(0)
}

fn value_as_count(value: &AMQPValue) -> Option<u32> {
    let n: i64 = match value {
        AMQPValue::ShortShortInt(v) => i64::from(*v),
        AMQPValue::ShortShortUInt(v) => i64::from(*v),
        AMQPValue::ShortInt(v) => i64::from(*v),
        AMQPValue::ShortUInt(v) => i64::from(*v),
        AMQPValue::LongInt(v) => i64::from(*v),
        AMQPValue::LongUInt(v) => i64::from(*v),
        AMQPValue::LongLongInt(v) => *v,
        AMQPValue::LongString(s) => std::str::from_utf8(s.as_bytes()).ok()?.trim().parse().ok()?,
        AMQPValue::ShortString(s) => s.as_str().trim().parse().ok()?,
        _ => return None,
    };

    if n <= 0 {
        Some(0)
    } else {
        Some(u32::try_from(n).unwrap_or(u32::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lapin::types::LongString;

    fn with_header(value: AMQPValue) -> FieldTable {
        let mut table = FieldTable::default();
        table.insert(RETRY_COUNT_HEADER.into(), value);
        table
    }

    #[test]
    fn test_written_count_reads_back() {
        assert_eq!(retry_count_from(Some(&retry_headers(0))), 0);
        assert_eq!(retry_count_from(Some(&retry_headers(2))), 2);
    }

    #[test]
    fn test_missing_header_is_zero() {
        assert_eq!(retry_count_from(None), 0);
        assert_eq!(retry_count_from(Some(&FieldTable::default())), 0);
    }

    #[test]
    fn test_other_integer_widths() {
        assert_eq!(retry_count_from(Some(&with_header(AMQPValue::LongInt(3)))), 3);
        assert_eq!(retry_count_from(Some(&with_header(AMQPValue::ShortShortUInt(1)))), 1);
    }

    #[test]
    fn test_negative_and_garbage_are_zero() {
        assert_eq!(retry_count_from(Some(&with_header(AMQPValue::LongInt(-4)))), 0);
        assert_eq!(
            retry_count_from(Some(&with_header(AMQPValue::LongString(LongString::from("abc"))))),
            0
        );
        assert_eq!(retry_count_from(Some(&with_header(AMQPValue::Boolean(true)))), 0);
    }

    #[test]
    fn test_numeric_string() {
        let table = with_header(AMQPValue::LongString(LongString::from(" 2 ")));
        assert_eq!(retry_count_from(Some(&table)), 2);
    }

    #[test]
    fn test_envelope_properties() {
        let envelope = QueueEnvelope::new(b"{}".to_vec())
            .with_message_id("q-1")
            .with_retry_count(1);
        let properties = envelope_properties(&envelope);

        assert_eq!(properties.delivery_mode(), &Some(PERSISTENT));
        assert_eq!(
            properties.message_id().as_ref().map(|id| id.as_str()),
            Some("q-1")
        );
        assert_eq!(retry_count_from(properties.headers().as_ref()), 1);
    }
}
