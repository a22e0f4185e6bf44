use serde::{Deserialize, Serialize};

// Used when no real meeting context exists (local development, detached tabs).
pub const LOCAL_FALLBACK_MEETING_ID: &str = "local-dev";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MeetingId(String);

impl MeetingId {
    pub fn new(value: impl Into<String>) -> Self {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Self::local_fallback();
        }
        Self(trimmed.to_string())
    }

    pub fn local_fallback() -> Self {
        Self(LOCAL_FALLBACK_MEETING_ID.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// The user-selectable recognition languages. Persisting the selection across
// sessions is a collaborator concern; the core only validates tags.
pub const SUPPORTED_LANGUAGE_TAGS: &[&str] = &[
    "en-US", "en-GB", "en-IN", "hi-IN", "es-ES", "fr-FR", "de-DE",
];

pub const DEFAULT_LANGUAGE_TAG: &str = "en-US";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LanguageTag(String);

impl LanguageTag {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_supported(&self) -> bool {
        SUPPORTED_LANGUAGE_TAGS.contains(&self.0.as_str())
    }
}

impl Default for LanguageTag {
    fn default() -> Self {
        Self(DEFAULT_LANGUAGE_TAG.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_meeting_id_falls_back_to_local() {
        assert_eq!(MeetingId::new("").as_str(), LOCAL_FALLBACK_MEETING_ID);
        assert_eq!(MeetingId::new("   ").as_str(), LOCAL_FALLBACK_MEETING_ID);
        assert_eq!(MeetingId::new(" abc-123 ").as_str(), "abc-123");
    }

    #[test]
    fn default_language_is_supported() {
        assert!(LanguageTag::default().is_supported());
        assert!(!LanguageTag::new("xx-XX").is_supported());
    }
}
