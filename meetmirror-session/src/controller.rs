use std::sync::Arc;

use meetmirror_channel::{ChannelEvent, ChannelHandle, ChannelState};
use meetmirror_core::feedback::{FeedbackEvent, FeedbackHistory};
use meetmirror_core::transcript::{TranscriptLog, TranscriptSegment};
use meetmirror_core::types::LanguageTag;
use meetmirror_segmenter::{SegmenterError, SegmenterEvent, SpeechSegmenter};
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStage {
    NoConsent,
    Idle,
    Listening,
    AwaitingResult,
}

fn stage_label(stage: SessionStage) -> &'static str {
    match stage {
        SessionStage::NoConsent => "no_consent",
        SessionStage::Idle => "idle",
        SessionStage::Listening => "listening",
        SessionStage::AwaitingResult => "awaiting_result",
    }
}

fn connection_label(state: ChannelState) -> &'static str {
    match state {
        ChannelState::Connecting => "connecting",
        ChannelState::Connected => "connected",
        ChannelState::Closed => "closed",
        ChannelState::Failed => "failed",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("consent has not been granted")]
    ConsentRequired,
    #[error("coaching channel is not connected")]
    NotConnected,
    #[error("busy: {0}")]
    Busy(&'static str),
    #[error("nothing to process: transcript is empty")]
    EmptyTranscript,
    #[error(transparent)]
    Segmenter(#[from] SegmenterError),
}

/// Snapshot for a presentation layer. The controller hands state out; it
/// never renders.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionStatus {
    pub stage: SessionStage,
    pub stage_label: String,
    pub connection: String,
    pub interim: Option<String>,
    pub transcript: Vec<TranscriptSegment>,
    pub awaiting_result: bool,
    pub process_result: Option<FeedbackEvent>,
    pub history: Vec<FeedbackEvent>,
    pub last_heard: Option<String>,
    pub error: Option<String>,
}

struct Inner {
    stage: SessionStage,
    transcript: TranscriptLog,
    history: FeedbackHistory,
    interim: Option<String>,
    // Correlates a process request with its resulting feedback: the next
    // feedback received while this is set is taken as the answer. The wire
    // format carries no request token.
    awaiting_result: bool,
    process_result: Option<FeedbackEvent>,
    last_heard: Option<String>,
    error: Option<String>,
    language: LanguageTag,
}

/// The orchestrating state machine: owns the transcript log and feedback
/// history, decides when segmentation runs, and reconciles inbound feedback.
#[derive(Clone)]
pub struct CoachingSessionController {
    segmenter: Arc<SpeechSegmenter>,
    channel: ChannelHandle,
    inner: Arc<Mutex<Inner>>,
}

impl CoachingSessionController {
    /// Consent is decided by an external collaborator and enters the core as
    /// a boolean precondition.
    pub fn new(segmenter: SpeechSegmenter, channel: ChannelHandle, consented: bool) -> Self {
        Self {
            segmenter: Arc::new(segmenter),
            channel,
            inner: Arc::new(Mutex::new(Inner {
                stage: if consented {
                    SessionStage::Idle
                } else {
                    SessionStage::NoConsent
                },
                transcript: TranscriptLog::new(),
                history: FeedbackHistory::new(),
                interim: None,
                awaiting_result: false,
                process_result: None,
                last_heard: None,
                error: None,
                language: LanguageTag::default(),
            })),
        }
    }

    pub async fn grant_consent(&self) {
        let mut inner = self.inner.lock().await;
        if inner.stage == SessionStage::NoConsent {
            inner.stage = SessionStage::Idle;
            log::info!("session stage: no_consent -> idle");
        }
    }

    /// Idle -> Listening. Requires consent and a connected channel; starting
    /// while already listening is idempotent.
    pub async fn start_listening(&self, language: LanguageTag) -> Result<(), SessionError> {
        {
            let inner = self.inner.lock().await;
            match inner.stage {
                SessionStage::NoConsent => return Err(SessionError::ConsentRequired),
                SessionStage::Listening => return Ok(()),
                SessionStage::AwaitingResult => {
                    return Err(SessionError::Busy("awaiting a process result"));
                }
                SessionStage::Idle => {}
            }
        }

        if !self.channel.is_connected() {
            return Err(SessionError::NotConnected);
        }

        if let Err(e) = self.segmenter.start(language.clone()).await {
            let mut inner = self.inner.lock().await;
            inner.error = Some(e.to_string());
            return Err(e.into());
        }

        let mut inner = self.inner.lock().await;
        inner.stage = SessionStage::Listening;
        inner.language = language;
        inner.interim = None;
        inner.error = None;
        log::info!("session stage: idle -> listening");
        Ok(())
    }

    /// Listening -> Idle. The transcript log is retained, not cleared.
    pub async fn stop_listening(&self) {
        self.segmenter.stop().await;
        let mut inner = self.inner.lock().await;
        if inner.stage == SessionStage::Listening {
            inner.stage = SessionStage::Idle;
            log::info!("session stage: listening -> idle");
        }
        inner.interim = None;
    }

    /// Idle -> AwaitingResult: sends the entire accumulated transcript for
    /// one-shot reprocessing. Rejected while listening or already awaiting,
    /// which keeps process requests from overlapping on the client side.
    pub async fn process_transcript(&self) -> Result<(), SessionError> {
        // The send is a synchronous enqueue, so the lock is held across it:
        // no event can slip between the send and the awaiting flag.
        let mut inner = self.inner.lock().await;
        match inner.stage {
            SessionStage::NoConsent => return Err(SessionError::ConsentRequired),
            SessionStage::Listening => return Err(SessionError::Busy("listening")),
            SessionStage::AwaitingResult => {
                return Err(SessionError::Busy("awaiting a process result"));
            }
            SessionStage::Idle => {}
        }
        if inner.transcript.is_empty() {
            return Err(SessionError::EmptyTranscript);
        }

        if !self.channel.send_full_transcript(&inner.transcript.full_text()) {
            return Err(SessionError::NotConnected);
        }

        inner.stage = SessionStage::AwaitingResult;
        inner.awaiting_result = true;
        inner.process_result = None;
        log::info!("session stage: idle -> awaiting_result");
        Ok(())
    }

    pub async fn handle_segmenter_event(&self, event: SegmenterEvent) {
        match event {
            SegmenterEvent::Interim(text) => {
                self.inner.lock().await.interim = Some(text);
            }
            SegmenterEvent::InterimCleared => {
                self.inner.lock().await.interim = None;
            }
            SegmenterEvent::Segment(text) => {
                {
                    let mut inner = self.inner.lock().await;
                    if inner.transcript.append(&text).is_none() {
                        return;
                    }
                    inner.interim = None;
                }
                if !self.channel.send_phrase(&text) {
                    log::debug!("phrase not streamed: channel not connected");
                }
            }
            SegmenterEvent::Fatal(err) => {
                log::error!("segmentation failed: {err}");
                let mut inner = self.inner.lock().await;
                if inner.stage == SessionStage::Listening {
                    inner.stage = SessionStage::Idle;
                }
                inner.interim = None;
                inner.error = Some(err.to_string());
            }
        }
    }

    pub async fn handle_channel_event(&self, event: ChannelEvent) {
        match event {
            ChannelEvent::Connected => {
                let mut inner = self.inner.lock().await;
                inner.error = None;
                log::info!("coaching channel connected");
            }
            ChannelEvent::Heard(text) => {
                self.inner.lock().await.last_heard = Some(text);
            }
            ChannelEvent::Feedback(feedback) => {
                let mut inner = self.inner.lock().await;
                if inner.awaiting_result {
                    inner.awaiting_result = false;
                    if inner.stage == SessionStage::AwaitingResult {
                        inner.stage = SessionStage::Idle;
                    }
                    inner.process_result = Some(feedback.clone());
                }
                inner.history.prepend(feedback);
            }
            ChannelEvent::Failed { reason } => {
                // Stop segmentation but keep everything already captured.
                self.segmenter.stop().await;
                let mut inner = self.inner.lock().await;
                if matches!(
                    inner.stage,
                    SessionStage::Listening | SessionStage::AwaitingResult
                ) {
                    inner.stage = SessionStage::Idle;
                }
                inner.awaiting_result = false;
                inner.interim = None;
                inner.error = Some(format!("connection failed: {reason}"));
            }
        }
    }

    /// Pumps both event streams until each has closed.
    pub async fn run(
        &self,
        mut segmenter_rx: mpsc::Receiver<SegmenterEvent>,
        mut channel_rx: mpsc::Receiver<ChannelEvent>,
    ) {
        let mut segmenter_open = true;
        let mut channel_open = true;

        while segmenter_open || channel_open {
            tokio::select! {
                event = segmenter_rx.recv(), if segmenter_open => {
                    match event {
                        Some(event) => self.handle_segmenter_event(event).await,
                        None => segmenter_open = false,
                    }
                }
                event = channel_rx.recv(), if channel_open => {
                    match event {
                        Some(event) => self.handle_channel_event(event).await,
                        None => channel_open = false,
                    }
                }
            }
        }
    }

    pub async fn status(&self) -> SessionStatus {
        let inner = self.inner.lock().await;
        SessionStatus {
            stage: inner.stage,
            stage_label: stage_label(inner.stage).into(),
            connection: connection_label(self.channel.state()).into(),
            interim: inner.interim.clone(),
            transcript: inner.transcript.segments().to_vec(),
            awaiting_result: inner.awaiting_result,
            process_result: inner.process_result.clone(),
            history: inner.history.entries().to_vec(),
            last_heard: inner.last_heard.clone(),
            error: inner.error.clone(),
        }
    }

    pub async fn language(&self) -> LanguageTag {
        self.inner.lock().await.language.clone()
    }
}
