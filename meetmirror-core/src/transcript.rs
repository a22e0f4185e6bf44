use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

pub fn now_unix_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// One finalized phrase of recognized speech. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub text: String,
    pub index: u64,
    pub at_unix_ms: i64,
}

/// Append-only, strictly ordered log of finalized segments.
///
/// Segments are never removed, edited, or reordered after finalization.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TranscriptLog {
    segments: Vec<TranscriptSegment>,
}

impl TranscriptLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a finalized phrase. Blank input (after trimming) is rejected
    /// and produces no segment.
    pub fn append(&mut self, text: &str) -> Option<&TranscriptSegment> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return None;
        }

        let index = self.segments.len() as u64;
        self.segments.push(TranscriptSegment {
            text: trimmed.to_string(),
            index,
            at_unix_ms: now_unix_ms(),
        });
        self.segments.last()
    }

    pub fn segments(&self) -> &[TranscriptSegment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// The entire accumulated transcript as one unit, for one-shot
    /// reprocessing.
    pub fn full_text(&self) -> String {
        let parts: Vec<&str> = self.segments.iter().map(|s| s.text.as_str()).collect();
        parts.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_in_order_with_monotonic_indices() {
        let mut log = TranscriptLog::new();
        log.append("hello there");
        log.append("second phrase");
        log.append("third");

        let texts: Vec<&str> = log.segments().iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["hello there", "second phrase", "third"]);

        let indices: Vec<u64> = log.segments().iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn rejects_blank_input() {
        let mut log = TranscriptLog::new();
        assert!(log.append("").is_none());
        assert!(log.append("   \n\t").is_none());
        assert!(log.is_empty());

        assert_eq!(log.append("  ok  ").map(|s| s.text.clone()), Some("ok".into()));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn full_text_joins_segments() {
        let mut log = TranscriptLog::new();
        assert_eq!(log.full_text(), "");
        log.append("hello");
        log.append("world");
        assert_eq!(log.full_text(), "hello world");
    }
}
