use async_trait::async_trait;
use meetmirror_core::types::LanguageTag;
use thiserror::Error;
use tokio::sync::mpsc;

/// Error conditions reported by the underlying recognition engine during an
/// open capture session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineErrorKind {
    // Expected steady-state noise; never surfaced.
    NoSpeech,
    Aborted,
    // Transient blips during an active segment; the engine's own
    // end-of-session signal drives recovery, not the error handler.
    Network,
    AudioCapture,

    // Fatal for the capture session.
    NotAllowed,
    Other(String),
}

impl EngineErrorKind {
    pub fn is_benign(&self) -> bool {
        matches!(
            self,
            EngineErrorKind::NoSpeech
                | EngineErrorKind::Aborted
                | EngineErrorKind::Network
                | EngineErrorKind::AudioCapture
        )
    }

    pub fn describe(&self) -> String {
        match self {
            EngineErrorKind::NoSpeech => "no speech detected".into(),
            EngineErrorKind::Aborted => "capture aborted".into(),
            EngineErrorKind::Network => "network error".into(),
            EngineErrorKind::AudioCapture => "audio capture error".into(),
            EngineErrorKind::NotAllowed => "recognition not allowed".into(),
            EngineErrorKind::Other(msg) => msg.clone(),
        }
    }
}

/// Events emitted by one underlying engine instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Full replacement text for the still-open phrase.
    Interim(String),
    /// One finalized phrase (may still need trimming).
    Finalized(String),
    Error(EngineErrorKind),
    /// The engine's own end-of-session signal. Fires on the hard session
    /// cutoff (~60s) even mid-utterance.
    Ended,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("speech recognition is not supported on this platform")]
    NotSupported,
    #[error("engine failed to start: {0}")]
    StartFailed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("microphone permission denied")]
pub struct MicPermissionDenied;

/// Seam over a continuous speech-recognition capability.
///
/// `open_session` must construct and start a brand-new engine instance every
/// time: a terminated instance is never resumed (restarting the same one can
/// leave it stuck repeating a partial word). The returned receiver closing is
/// equivalent to an `Ended` event.
#[async_trait]
pub trait RecognitionEngine: Send + Sync {
    /// Requests microphone access; must resolve before any session starts.
    async fn request_microphone(&self) -> Result<(), MicPermissionDenied>;

    async fn open_session(
        &self,
        language: &LanguageTag,
    ) -> Result<mpsc::Receiver<EngineEvent>, EngineError>;
}
