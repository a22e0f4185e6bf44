use serde::{Deserialize, Serialize};

use crate::transcript::now_unix_ms;

pub const FEEDBACK_HISTORY_LIMIT: usize = 50;

/// Classification tag for one coaching result. Serialized with the backend's
/// snake_case labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackKind {
    Engagement,
    PaceVolume,
    SuggestedSentence,
    FillerWords,
    Positive,
    OtherLanguage,
}

impl FeedbackKind {
    pub fn label(self) -> &'static str {
        match self {
            FeedbackKind::Engagement => "engagement",
            FeedbackKind::PaceVolume => "pace_volume",
            FeedbackKind::SuggestedSentence => "suggested_sentence",
            FeedbackKind::FillerWords => "filler_words",
            FeedbackKind::Positive => "positive",
            FeedbackKind::OtherLanguage => "other_language",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "engagement" => Some(FeedbackKind::Engagement),
            "pace_volume" => Some(FeedbackKind::PaceVolume),
            "suggested_sentence" => Some(FeedbackKind::SuggestedSentence),
            "filler_words" => Some(FeedbackKind::FillerWords),
            "positive" => Some(FeedbackKind::Positive),
            "other_language" => Some(FeedbackKind::OtherLanguage),
            _ => None,
        }
    }
}

/// One structured coaching result from the analysis backend.
///
/// Immutable once received; every field except `message` and `kind` is
/// optional because the backend only fills what the analysis produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackEvent {
    pub message: String,
    pub kind: FeedbackKind,
    pub transcript: Option<String>,
    pub fillers: Option<String>,
    pub filler_breakdown: Option<String>,
    pub improved_sentence: Option<String>,
    pub pace: Option<String>,
    pub volume: Option<String>,
    pub engagement_alert: Option<String>,
    pub suggestion: Option<String>,
    pub language_detected: Option<String>,
    pub non_english_message: Option<String>,
    pub at_unix_ms: i64,
}

impl FeedbackEvent {
    /// Minimal fallback event wrapping a raw text payload.
    pub fn from_plain_text(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: FeedbackKind::Positive,
            transcript: None,
            fillers: None,
            filler_breakdown: None,
            improved_sentence: None,
            pace: None,
            volume: None,
            engagement_alert: None,
            suggestion: None,
            language_detected: None,
            non_english_message: None,
            at_unix_ms: now_unix_ms(),
        }
    }

    /// Recomputes the classification from the optional fields, in priority
    /// order: engagement > non-English > pace/volume > improved sentence >
    /// fillers > positive. Used when the backend omits the explicit tag.
    pub fn classify(&self) -> FeedbackKind {
        if self.engagement_alert.is_some() {
            return FeedbackKind::Engagement;
        }
        if self.language_detected.as_deref() == Some("non_english") {
            return FeedbackKind::OtherLanguage;
        }
        let pace_issue = self.pace.as_deref().is_some_and(|p| p != "good");
        let volume_issue = self.volume.as_deref() == Some("low");
        if pace_issue || volume_issue {
            return FeedbackKind::PaceVolume;
        }
        if self.improved_sentence.is_some() {
            return FeedbackKind::SuggestedSentence;
        }
        if self.fillers.is_some() {
            return FeedbackKind::FillerWords;
        }
        FeedbackKind::Positive
    }
}

/// Ordered feedback, newest-first, bounded to the most recent
/// [`FEEDBACK_HISTORY_LIMIT`] entries.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FeedbackHistory {
    entries: Vec<FeedbackEvent>,
}

impl FeedbackHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prepend(&mut self, event: FeedbackEvent) {
        self.entries.insert(0, event);
        self.entries.truncate(FEEDBACK_HISTORY_LIMIT);
    }

    pub fn entries(&self) -> &[FeedbackEvent] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
