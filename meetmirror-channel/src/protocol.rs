use base64::Engine;
use meetmirror_core::feedback::{FeedbackEvent, FeedbackKind};
use meetmirror_core::transcript::now_unix_ms;

// Client -> backend message builders. The backend keys on the `type` tag.

pub fn build_transcript_message(text: &str) -> String {
    serde_json::json!({
        "type": "transcript",
        "text": text,
    })
    .to_string()
}

pub fn build_process_transcript_message(text: &str) -> String {
    serde_json::json!({
        "type": "process_transcript",
        "text": text,
    })
    .to_string()
}

/// Legacy raw-audio path, kept for clients without a recognition engine.
pub fn build_audio_message(data: &[u8], mime: &str) -> String {
    let b64 = base64::engine::general_purpose::STANDARD.encode(data);
    serde_json::json!({
        "type": "audio",
        "data": b64,
        "mime": mime,
    })
    .to_string()
}

#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// Bare acknowledgment echoing the phrase the backend heard.
    Heard(String),
    Feedback(FeedbackEvent),
}

/// Parses one inbound text frame.
///
/// A malformed payload degrades to a minimal feedback event wrapping the raw
/// text; blank payloads are dropped (`None`). This never fails: the channel
/// must not crash on backend garbage.
pub fn parse_server_message(raw: &str) -> Option<ServerMessage> {
    let value: serde_json::Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(_) => return fallback_feedback(raw),
    };

    if let Some(heard) = value.get("heard").and_then(|v| v.as_str()) {
        return Some(ServerMessage::Heard(heard.to_string()));
    }

    let Some(message) = value.get("feedback").and_then(|v| v.as_str()) else {
        return fallback_feedback(raw);
    };

    let field = |key: &str| {
        value
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let mut event = FeedbackEvent {
        message: message.to_string(),
        kind: FeedbackKind::Positive,
        transcript: field("transcript"),
        fillers: field("fillers"),
        filler_breakdown: field("filler_breakdown"),
        improved_sentence: field("improved_sentence"),
        pace: field("pace"),
        volume: field("volume"),
        engagement_alert: field("engagement_alert"),
        suggestion: field("suggestion"),
        language_detected: field("language_detected"),
        non_english_message: field("non_english_message"),
        at_unix_ms: now_unix_ms(),
    };

    event.kind = value
        .get("feedbackType")
        .and_then(|v| v.as_str())
        .and_then(FeedbackKind::from_label)
        .unwrap_or_else(|| event.classify());

    Some(ServerMessage::Feedback(event))
}

fn fallback_feedback(raw: &str) -> Option<ServerMessage> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(ServerMessage::Feedback(FeedbackEvent::from_plain_text(
        trimmed,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_tagged_outbound_messages() {
        let t: serde_json::Value =
            serde_json::from_str(&build_transcript_message("hello there")).unwrap();
        assert_eq!(t["type"], "transcript");
        assert_eq!(t["text"], "hello there");

        let p: serde_json::Value =
            serde_json::from_str(&build_process_transcript_message("full text")).unwrap();
        assert_eq!(p["type"], "process_transcript");
        assert_eq!(p["text"], "full text");

        let a: serde_json::Value =
            serde_json::from_str(&build_audio_message(b"abc", "audio/webm")).unwrap();
        assert_eq!(a["type"], "audio");
        assert_eq!(a["mime"], "audio/webm");
        assert_eq!(a["data"], "YWJj");
    }

    #[test]
    fn parses_heard_acknowledgment() {
        let msg = parse_server_message(r#"{"heard":"hello there"}"#).unwrap();
        assert_eq!(msg, ServerMessage::Heard("hello there".into()));
    }

    #[test]
    fn parses_structured_feedback_with_explicit_type() {
        let raw = r#"{
            "feedback": "Pause instead of saying um",
            "feedbackType": "filler_words",
            "fillers": "um, like",
            "transcript": "um hello like",
            "pace": "good",
            "volume": null
        }"#;

        let ServerMessage::Feedback(event) = parse_server_message(raw).unwrap() else {
            panic!("expected feedback");
        };
        assert_eq!(event.kind, FeedbackKind::FillerWords);
        assert_eq!(event.message, "Pause instead of saying um");
        assert_eq!(event.fillers.as_deref(), Some("um, like"));
        assert_eq!(event.transcript.as_deref(), Some("um hello like"));
        assert_eq!(event.volume, None);
    }

    #[test]
    fn classifies_feedback_when_type_is_missing() {
        let raw = r#"{"feedback":"slow down","pace":"too fast"}"#;
        let ServerMessage::Feedback(event) = parse_server_message(raw).unwrap() else {
            panic!("expected feedback");
        };
        assert_eq!(event.kind, FeedbackKind::PaceVolume);
    }

    #[test]
    fn unknown_type_label_falls_back_to_classification() {
        let raw = r#"{"feedback":"tip","feedbackType":"brand_new","engagement_alert":"long monologue"}"#;
        let ServerMessage::Feedback(event) = parse_server_message(raw).unwrap() else {
            panic!("expected feedback");
        };
        assert_eq!(event.kind, FeedbackKind::Engagement);
    }

    #[test]
    fn non_json_text_becomes_minimal_feedback() {
        let ServerMessage::Feedback(event) =
            parse_server_message("  keep it up!  ").unwrap()
        else {
            panic!("expected feedback");
        };
        assert_eq!(event.message, "keep it up!");
        assert_eq!(event.kind, FeedbackKind::Positive);
    }

    #[test]
    fn json_without_known_fields_becomes_minimal_feedback() {
        let ServerMessage::Feedback(event) =
            parse_server_message(r#"{"status":"ok"}"#).unwrap()
        else {
            panic!("expected feedback");
        };
        assert_eq!(event.message, r#"{"status":"ok"}"#);
    }

    #[test]
    fn blank_payload_is_dropped() {
        assert_eq!(parse_server_message(""), None);
        assert_eq!(parse_server_message("   \n"), None);
    }
}
