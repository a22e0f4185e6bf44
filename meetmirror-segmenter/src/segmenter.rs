use std::sync::Arc;
use std::time::Duration;

use meetmirror_core::types::LanguageTag;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::traits::{EngineError, EngineErrorKind, EngineEvent, RecognitionEngine};

// Lets the hardware mic release cleanly before the replacement session
// grabs it.
pub const RESTART_GRACE: Duration = Duration::from_millis(300);

const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SegmenterError {
    #[error("speech recognition is not supported on this platform")]
    NotSupported,
    #[error("microphone permission denied")]
    PermissionDenied,
    #[error("speech recognition failed: {0}")]
    RecognitionFailed(String),
}

/// Events emitted towards the session controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmenterEvent {
    /// Replacement preview for the still-open phrase.
    Interim(String),
    /// The still-open phrase was finalized, restarted, or stopped.
    InterimCleared,
    /// One finalized phrase, trimmed and non-empty.
    Segment(String),
    /// Unrecoverable; capture has stopped.
    Fatal(SegmenterError),
}

/// Lifecycle of the current capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapturePhase {
    Idle,
    Starting,
    Active,
    Ending,
}

struct Inner {
    phase: CapturePhase,
    // Identity token for the current session. Every driver callback checks it
    // still refers to itself before acting, so a superseded session can never
    // emit events or trigger a spurious restart.
    generation: u64,
    driver: Option<JoinHandle<()>>,
}

/// Turns a live engine stream into finalized segments plus a transient
/// preview, transparently surviving the engine's hard session cutoff.
pub struct SpeechSegmenter {
    engine: Arc<dyn RecognitionEngine>,
    inner: Arc<Mutex<Inner>>,
    event_tx: mpsc::Sender<SegmenterEvent>,
}

impl SpeechSegmenter {
    pub fn new(engine: Arc<dyn RecognitionEngine>) -> (Self, mpsc::Receiver<SegmenterEvent>) {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let segmenter = Self {
            engine,
            inner: Arc::new(Mutex::new(Inner {
                phase: CapturePhase::Idle,
                generation: 0,
                driver: None,
            })),
            event_tx,
        };
        (segmenter, event_rx)
    }

    pub async fn phase(&self) -> CapturePhase {
        self.inner.lock().await.phase
    }

    pub async fn is_active(&self) -> bool {
        matches!(
            self.phase().await,
            CapturePhase::Starting | CapturePhase::Active
        )
    }

    /// Starts capture. Requests microphone permission first, then launches a
    /// capture session. Idempotent while a session is starting or active:
    /// returns `Ok` without spawning a second engine. A `stop()` issued while
    /// this is suspended on the permission prompt or the session open wins:
    /// the attempt is abandoned and capture stays down.
    pub async fn start(&self, language: LanguageTag) -> Result<(), SegmenterError> {
        let start_generation = {
            let mut inner = self.inner.lock().await;
            match inner.phase {
                CapturePhase::Starting | CapturePhase::Active => return Ok(()),
                CapturePhase::Idle | CapturePhase::Ending => {
                    inner.phase = CapturePhase::Starting;
                }
            }
            inner.generation
        };

        if self.engine.request_microphone().await.is_err() {
            self.abandon_start(start_generation).await;
            return Err(SegmenterError::PermissionDenied);
        }

        // stop() may have run while the permission prompt was open.
        if !self.still_starting(start_generation).await {
            return Ok(());
        }

        let engine_rx = match self.engine.open_session(&language).await {
            Ok(rx) => rx,
            Err(e) => {
                self.abandon_start(start_generation).await;
                return Err(match e {
                    EngineError::NotSupported => SegmenterError::NotSupported,
                    EngineError::StartFailed(msg) => SegmenterError::RecognitionFailed(msg),
                });
            }
        };

        let mut inner = self.inner.lock().await;
        if inner.generation != start_generation || inner.phase != CapturePhase::Starting {
            // Superseded while waiting on the engine; dropping the receiver
            // tears the session down and no driver runs.
            return Ok(());
        }
        inner.phase = CapturePhase::Active;
        inner.generation = inner.generation.wrapping_add(1);
        let generation = inner.generation;

        log::info!("capture session started (generation {generation})");

        inner.driver = Some(tokio::spawn(drive_session(
            self.engine.clone(),
            self.inner.clone(),
            self.event_tx.clone(),
            language,
            generation,
            engine_rx,
        )));
        Ok(())
    }

    /// Stops capture immediately. No event is emitted afterwards and any
    /// pending grace-interval restart is cancelled.
    pub async fn stop(&self) {
        let driver = {
            let mut inner = self.inner.lock().await;
            if inner.phase == CapturePhase::Idle {
                return;
            }
            inner.phase = CapturePhase::Ending;
            inner.generation = inner.generation.wrapping_add(1);
            let driver = inner.driver.take();
            inner.phase = CapturePhase::Idle;
            driver
        };

        if let Some(driver) = driver {
            driver.abort();
        }
        log::info!("capture stopped");
    }

    async fn still_starting(&self, start_generation: u64) -> bool {
        let inner = self.inner.lock().await;
        inner.generation == start_generation && inner.phase == CapturePhase::Starting
    }

    async fn abandon_start(&self, start_generation: u64) {
        let mut inner = self.inner.lock().await;
        if inner.generation == start_generation && inner.phase == CapturePhase::Starting {
            inner.phase = CapturePhase::Idle;
        }
    }
}

async fn drive_session(
    engine: Arc<dyn RecognitionEngine>,
    inner: Arc<Mutex<Inner>>,
    events: mpsc::Sender<SegmenterEvent>,
    language: LanguageTag,
    generation: u64,
    mut engine_rx: mpsc::Receiver<EngineEvent>,
) {
    let mut have_interim = false;

    loop {
        let event = engine_rx.recv().await;
        match event {
            Some(EngineEvent::Interim(text)) => {
                have_interim = true;
                let _ = events.send(SegmenterEvent::Interim(text)).await;
            }
            Some(EngineEvent::Finalized(text)) => {
                if have_interim {
                    have_interim = false;
                    let _ = events.send(SegmenterEvent::InterimCleared).await;
                }
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    let _ = events
                        .send(SegmenterEvent::Segment(trimmed.to_string()))
                        .await;
                }
            }
            Some(EngineEvent::Error(kind)) => {
                if kind.is_benign() {
                    log::debug!("recognition noise swallowed: {}", kind.describe());
                    continue;
                }

                log::error!("recognition fatal error: {}", kind.describe());
                if have_interim {
                    let _ = events.send(SegmenterEvent::InterimCleared).await;
                }
                // A mid-session permission revocation stays distinguishable
                // from a generic recognition failure.
                let error = match kind {
                    EngineErrorKind::NotAllowed => SegmenterError::PermissionDenied,
                    other => SegmenterError::RecognitionFailed(other.describe()),
                };
                let _ = events.send(SegmenterEvent::Fatal(error)).await;

                let mut guard = inner.lock().await;
                if guard.generation == generation {
                    guard.phase = CapturePhase::Idle;
                    guard.driver = None;
                }
                return;
            }
            Some(EngineEvent::Ended) | None => {
                if have_interim {
                    have_interim = false;
                    let _ = events.send(SegmenterEvent::InterimCleared).await;
                }

                tokio::time::sleep(RESTART_GRACE).await;

                {
                    let guard = inner.lock().await;
                    if guard.phase != CapturePhase::Active || guard.generation != generation {
                        // Stopped or superseded during the grace window.
                        return;
                    }
                }

                // The terminated instance is discarded entirely; resuming it
                // can leave the engine stuck repeating a partial word.
                match engine.open_session(&language).await {
                    Ok(rx) => {
                        engine_rx = rx;
                        log::info!("capture session restarted after engine cutoff");
                    }
                    Err(e) => {
                        log::error!("capture restart failed: {e}");
                        let _ = events
                            .send(SegmenterEvent::Fatal(SegmenterError::RecognitionFailed(
                                e.to_string(),
                            )))
                            .await;

                        let mut guard = inner.lock().await;
                        if guard.generation == generation {
                            guard.phase = CapturePhase::Idle;
                            guard.driver = None;
                        }
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{EngineErrorKind, MicPermissionDenied};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Feeds pre-scripted event sequences, one script per opened session.
    /// Channels stay open after the script runs out so only explicit `Ended`
    /// events terminate a session.
    struct ScriptedEngine {
        scripts: StdMutex<VecDeque<Vec<EngineEvent>>>,
        opened: AtomicUsize,
        deny_mic: bool,
        mic_delay: Duration,
        keepalive: StdMutex<Vec<mpsc::Sender<EngineEvent>>>,
    }

    impl ScriptedEngine {
        fn new(scripts: Vec<Vec<EngineEvent>>) -> Arc<Self> {
            Arc::new(Self {
                scripts: StdMutex::new(scripts.into()),
                opened: AtomicUsize::new(0),
                deny_mic: false,
                mic_delay: Duration::ZERO,
                keepalive: StdMutex::new(Vec::new()),
            })
        }

        fn denying_mic() -> Arc<Self> {
            Arc::new(Self {
                scripts: StdMutex::new(VecDeque::new()),
                opened: AtomicUsize::new(0),
                deny_mic: true,
                mic_delay: Duration::ZERO,
                keepalive: StdMutex::new(Vec::new()),
            })
        }

        /// Holds the permission prompt open for `delay` before granting.
        fn slow_mic(scripts: Vec<Vec<EngineEvent>>, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                scripts: StdMutex::new(scripts.into()),
                opened: AtomicUsize::new(0),
                deny_mic: false,
                mic_delay: delay,
                keepalive: StdMutex::new(Vec::new()),
            })
        }

        fn opened(&self) -> usize {
            self.opened.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RecognitionEngine for ScriptedEngine {
        async fn request_microphone(&self) -> Result<(), MicPermissionDenied> {
            if !self.mic_delay.is_zero() {
                tokio::time::sleep(self.mic_delay).await;
            }
            if self.deny_mic {
                Err(MicPermissionDenied)
            } else {
                Ok(())
            }
        }

        async fn open_session(
            &self,
            _language: &LanguageTag,
        ) -> Result<mpsc::Receiver<EngineEvent>, EngineError> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            let script = self.scripts.lock().unwrap().pop_front().unwrap_or_default();

            let (tx, rx) = mpsc::channel(16);
            self.keepalive.lock().unwrap().push(tx.clone());
            tokio::spawn(async move {
                for event in script {
                    if tx.send(event).await.is_err() {
                        break;
                    }
                }
            });
            Ok(rx)
        }
    }

    async fn collect_segments(
        rx: &mut mpsc::Receiver<SegmenterEvent>,
        expected: usize,
    ) -> Vec<String> {
        let mut out = Vec::new();
        while out.len() < expected {
            let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("timed out waiting for segment")
                .expect("segmenter channel closed");
            if let SegmenterEvent::Segment(text) = event {
                out.push(text);
            }
        }
        out
    }

    #[tokio::test]
    async fn permission_denial_fails_fast_without_a_session() {
        let engine = ScriptedEngine::denying_mic();
        let (segmenter, _rx) = SpeechSegmenter::new(engine.clone());

        let err = segmenter.start(LanguageTag::default()).await.unwrap_err();
        assert_eq!(err, SegmenterError::PermissionDenied);
        assert_eq!(engine.opened(), 0);
        assert_eq!(segmenter.phase().await, CapturePhase::Idle);
    }

    #[tokio::test]
    async fn start_is_idempotent_while_active() {
        let engine = ScriptedEngine::new(vec![vec![]]);
        let (segmenter, _rx) = SpeechSegmenter::new(engine.clone());

        segmenter.start(LanguageTag::default()).await.unwrap();
        segmenter.start(LanguageTag::default()).await.unwrap();

        assert_eq!(engine.opened(), 1);
        assert!(segmenter.is_active().await);
    }

    #[tokio::test]
    async fn emits_trimmed_segments_in_order_and_drops_blanks() {
        let engine = ScriptedEngine::new(vec![vec![
            EngineEvent::Interim("hel".into()),
            EngineEvent::Finalized("  hello there  ".into()),
            EngineEvent::Finalized("   ".into()),
            EngineEvent::Finalized("second".into()),
        ]]);
        let (segmenter, mut rx) = SpeechSegmenter::new(engine);
        segmenter.start(LanguageTag::default()).await.unwrap();

        let first = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first, SegmenterEvent::Interim("hel".into()));

        let second = rx.recv().await.unwrap();
        assert_eq!(second, SegmenterEvent::InterimCleared);

        let segments = collect_segments(&mut rx, 2).await;
        assert_eq!(segments, vec!["hello there", "second"]);
    }

    #[tokio::test]
    async fn engine_cutoff_restarts_with_a_new_session() {
        let engine = ScriptedEngine::new(vec![
            vec![EngineEvent::Finalized("before cutoff".into()), EngineEvent::Ended],
            vec![EngineEvent::Finalized("after restart".into())],
        ]);
        let (segmenter, mut rx) = SpeechSegmenter::new(engine.clone());
        segmenter.start(LanguageTag::default()).await.unwrap();

        let segments = collect_segments(&mut rx, 2).await;
        assert_eq!(segments, vec!["before cutoff", "after restart"]);
        assert_eq!(engine.opened(), 2);
        assert!(segmenter.is_active().await);
    }

    #[tokio::test]
    async fn restart_clears_pending_interim() {
        let engine = ScriptedEngine::new(vec![
            vec![EngineEvent::Interim("cut off mid".into()), EngineEvent::Ended],
            vec![],
        ]);
        let (segmenter, mut rx) = SpeechSegmenter::new(engine);
        segmenter.start(LanguageTag::default()).await.unwrap();

        let first = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first, SegmenterEvent::Interim("cut off mid".into()));

        let second = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second, SegmenterEvent::InterimCleared);
    }

    #[tokio::test]
    async fn stop_during_permission_wait_prevents_activation() {
        let engine = ScriptedEngine::slow_mic(
            vec![vec![EngineEvent::Finalized("never heard".into())]],
            Duration::from_millis(200),
        );
        let (segmenter, _rx) = SpeechSegmenter::new(engine.clone());
        let segmenter = Arc::new(segmenter);

        let starter = segmenter.clone();
        let start_task =
            tokio::spawn(async move { starter.start(LanguageTag::default()).await });

        // Stop while start() is suspended on the permission prompt.
        tokio::time::sleep(Duration::from_millis(50)).await;
        segmenter.stop().await;

        start_task.await.unwrap().unwrap();
        assert!(!segmenter.is_active().await);
        assert_eq!(segmenter.phase().await, CapturePhase::Idle);
        assert_eq!(engine.opened(), 0);
    }

    #[tokio::test]
    async fn revoked_permission_mid_session_surfaces_as_permission_denied() {
        let engine = ScriptedEngine::new(vec![vec![EngineEvent::Error(
            EngineErrorKind::NotAllowed,
        )]]);
        let (segmenter, mut rx) = SpeechSegmenter::new(engine);
        segmenter.start(LanguageTag::default()).await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            SegmenterEvent::Fatal(SegmenterError::PermissionDenied)
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(segmenter.phase().await, CapturePhase::Idle);
    }

    #[tokio::test]
    async fn stop_during_grace_window_cancels_restart() {
        let engine = ScriptedEngine::new(vec![vec![EngineEvent::Ended], vec![]]);
        let (segmenter, _rx) = SpeechSegmenter::new(engine.clone());
        segmenter.start(LanguageTag::default()).await.unwrap();

        // Let the driver see Ended and enter the grace sleep.
        tokio::time::sleep(Duration::from_millis(50)).await;
        segmenter.stop().await;

        tokio::time::sleep(RESTART_GRACE + Duration::from_millis(200)).await;
        assert_eq!(engine.opened(), 1);
        assert_eq!(segmenter.phase().await, CapturePhase::Idle);
    }

    #[tokio::test]
    async fn benign_errors_are_swallowed() {
        let engine = ScriptedEngine::new(vec![vec![
            EngineEvent::Error(EngineErrorKind::NoSpeech),
            EngineEvent::Error(EngineErrorKind::Network),
            EngineEvent::Error(EngineErrorKind::AudioCapture),
            EngineEvent::Error(EngineErrorKind::Aborted),
            EngineEvent::Finalized("still alive".into()),
        ]]);
        let (segmenter, mut rx) = SpeechSegmenter::new(engine);
        segmenter.start(LanguageTag::default()).await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, SegmenterEvent::Segment("still alive".into()));
    }

    #[tokio::test]
    async fn fatal_error_surfaces_and_stops_capture() {
        let engine = ScriptedEngine::new(vec![vec![EngineEvent::Error(
            EngineErrorKind::Other("service blew up".into()),
        )]]);
        let (segmenter, mut rx) = SpeechSegmenter::new(engine);
        segmenter.start(LanguageTag::default()).await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            SegmenterEvent::Fatal(SegmenterError::RecognitionFailed(msg)) => {
                assert!(msg.contains("service blew up"));
            }
            other => panic!("expected fatal, got {other:?}"),
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(segmenter.phase().await, CapturePhase::Idle);
    }

    #[tokio::test]
    async fn restart_after_stop_starts_a_fresh_session() {
        let engine = ScriptedEngine::new(vec![
            vec![EngineEvent::Finalized("one".into())],
            vec![EngineEvent::Finalized("two".into())],
        ]);
        let (segmenter, mut rx) = SpeechSegmenter::new(engine.clone());

        segmenter.start(LanguageTag::default()).await.unwrap();
        assert_eq!(collect_segments(&mut rx, 1).await, vec!["one"]);

        segmenter.stop().await;
        assert_eq!(segmenter.phase().await, CapturePhase::Idle);

        segmenter.start(LanguageTag::default()).await.unwrap();
        assert_eq!(collect_segments(&mut rx, 1).await, vec!["two"]);
        assert_eq!(engine.opened(), 2);
    }
}
