use std::sync::Arc;
use std::time::Duration;

use meetmirror_channel::{ChannelConfig, spawn_coaching_channel};
use meetmirror_core::types::{LanguageTag, MeetingId};
use meetmirror_segmenter::{
    EngineError, EngineEvent, MicPermissionDenied, RecognitionEngine, SpeechSegmenter,
};
use meetmirror_session::{CoachingSessionController, SessionStage};
use tokio::sync::mpsc;
use url::Url;

/// Stand-in recognition engine that replays a canned utterance. Lets the
/// whole pipeline run end to end against a real backend without a
/// platform speech stack.
struct CannedEngine {
    phrases: Vec<&'static str>,
}

#[async_trait::async_trait]
impl RecognitionEngine for CannedEngine {
    async fn request_microphone(&self) -> Result<(), MicPermissionDenied> {
        Ok(())
    }

    async fn open_session(
        &self,
        _language: &LanguageTag,
    ) -> Result<mpsc::Receiver<EngineEvent>, EngineError> {
        let phrases = self.phrases.clone();
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            for phrase in phrases {
                tokio::time::sleep(Duration::from_millis(150)).await;
                if tx.send(EngineEvent::Finalized(phrase.into())).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // One listen -> stop -> process cycle against a running backend, driven
    // by a canned engine instead of a live microphone.

    let base_url = std::env::var("MEETMIRROR_WS_URL")
        .unwrap_or_else(|_| "ws://localhost:8000".into());
    let meeting = MeetingId::new(&std::env::var("MEETMIRROR_MEETING_ID").unwrap_or_default());
    let language = LanguageTag::new(
        &std::env::var("MEETMIRROR_LANGUAGE").unwrap_or_else(|_| "en-US".into()),
    );

    let cfg = ChannelConfig::new(Url::parse(&base_url)?, meeting.clone());
    println!("connecting to {} (meeting {})", base_url, meeting.as_str());

    let (handle, channel_rx) = spawn_coaching_channel(cfg)?;

    let engine = Arc::new(CannedEngine {
        phrases: vec![
            "um hello everyone thanks for joining",
            "so like today I want to walk through the quarterly numbers",
            "let me know if you have questions",
        ],
    });
    let (segmenter, segmenter_rx) = SpeechSegmenter::new(engine);
    let controller = CoachingSessionController::new(segmenter, handle.clone(), true);

    let pump = controller.clone();
    tokio::spawn(async move {
        pump.run(segmenter_rx, channel_rx).await;
    });

    // Wait out the handshake before capture can start.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !handle.is_connected() {
        let status = controller.status().await;
        if let Some(error) = status.error {
            anyhow::bail!("connection failed: {error}");
        }
        if tokio::time::Instant::now() >= deadline {
            anyhow::bail!("timed out connecting to {base_url}");
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    println!("connected");

    controller.start_listening(language).await?;
    println!("listening...");
    tokio::time::sleep(Duration::from_secs(2)).await;
    controller.stop_listening().await;

    let status = controller.status().await;
    println!(
        "captured {} segment(s): {:?}",
        status.transcript.len(),
        status
            .transcript
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
    );

    controller.process_transcript().await?;
    println!("processing full transcript...");

    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    loop {
        let status = controller.status().await;
        if status.stage == SessionStage::Idle && status.process_result.is_some() {
            break;
        }
        if let Some(error) = status.error {
            anyhow::bail!("session failed: {error}");
        }
        if tokio::time::Instant::now() >= deadline {
            anyhow::bail!("timed out waiting for the coaching result");
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let status = controller.status().await;
    println!("{}", serde_json::to_string_pretty(&status)?);

    handle.close().await;
    Ok(())
}
