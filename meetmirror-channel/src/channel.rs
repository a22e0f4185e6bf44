use std::time::Duration;

use anyhow::Context;
use futures_util::{SinkExt, StreamExt};
use meetmirror_core::feedback::FeedbackEvent;
use meetmirror_core::types::MeetingId;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use crate::protocol::{
    ServerMessage, build_audio_message, build_process_transcript_message,
    build_transcript_message, parse_server_message,
};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const WS_SEND_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Backend root, e.g. `ws://localhost:8000`.
    pub base_url: Url,
    pub meeting: MeetingId,
    pub connect_timeout: Duration,
    pub send_timeout: Duration,
}

impl ChannelConfig {
    pub fn new(base_url: Url, meeting: MeetingId) -> Self {
        Self {
            base_url,
            meeting,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            send_timeout: WS_SEND_TIMEOUT,
        }
    }
}

pub fn build_channel_url(cfg: &ChannelConfig) -> anyhow::Result<Url> {
    let mut url = cfg.base_url.clone();
    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| anyhow::anyhow!("channel base url cannot have a path"))?;
        segments.pop_if_empty();
        segments.push("ws");
        segments.push("coaching");
        segments.push(cfg.meeting.as_str());
    }
    Ok(url)
}

/// True connectivity of one channel instance. `Closed` (intentional
/// shutdown) and `Failed` are both terminal: a new meeting identity
/// requires a new instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Connected,
    Closed,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Connected,
    /// Acknowledgment only; updates the last-heard marker.
    Heard(String),
    Feedback(FeedbackEvent),
    Failed { reason: String },
}

#[derive(Debug)]
enum ChannelCmd {
    Send(String),
    Close,
}

#[derive(Clone)]
pub struct ChannelHandle {
    cmd_tx: mpsc::Sender<ChannelCmd>,
    state_rx: watch::Receiver<ChannelState>,
}

impl ChannelHandle {
    pub fn state(&self) -> ChannelState {
        *self.state_rx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ChannelState::Connected
    }

    /// Streams one finalized phrase. No-op (returns false) when the channel
    /// is not connected or the text is blank after trimming.
    pub fn send_phrase(&self, text: &str) -> bool {
        let trimmed = text.trim();
        if trimmed.is_empty() || !self.is_connected() {
            return false;
        }
        self.enqueue(build_transcript_message(trimmed))
    }

    /// Requests one-shot reprocessing of the entire accumulated transcript.
    pub fn send_full_transcript(&self, text: &str) -> bool {
        let trimmed = text.trim();
        if trimmed.is_empty() || !self.is_connected() {
            return false;
        }
        self.enqueue(build_process_transcript_message(trimmed))
    }

    /// Legacy raw-audio segment path.
    pub fn send_audio_segment(&self, data: &[u8], mime: &str) -> bool {
        if data.is_empty() || !self.is_connected() {
            return false;
        }
        self.enqueue(build_audio_message(data, mime))
    }

    /// Intentional shutdown. Idempotent; no event is delivered afterwards.
    pub async fn close(&self) {
        let _ = self.cmd_tx.send(ChannelCmd::Close).await;
    }

    fn enqueue(&self, payload: String) -> bool {
        self.cmd_tx.try_send(ChannelCmd::Send(payload)).is_ok()
    }
}

/// Opens one channel for the given meeting identity. Returns immediately in
/// `Connecting`; the handshake runs in the spawned actor with a hard timeout.
pub fn spawn_coaching_channel(
    cfg: ChannelConfig,
) -> anyhow::Result<(ChannelHandle, mpsc::Receiver<ChannelEvent>)> {
    let url = build_channel_url(&cfg).context("build coaching channel url")?;

    let (cmd_tx, cmd_rx) = mpsc::channel(64);
    let (evt_tx, evt_rx) = mpsc::channel(64);
    let (state_tx, state_rx) = watch::channel(ChannelState::Connecting);

    tokio::spawn(run_channel(cfg, url, cmd_rx, evt_tx, state_tx));

    Ok((ChannelHandle { cmd_tx, state_rx }, evt_rx))
}

async fn run_channel(
    cfg: ChannelConfig,
    url: Url,
    mut cmd_rx: mpsc::Receiver<ChannelCmd>,
    evt_tx: mpsc::Sender<ChannelEvent>,
    state_tx: watch::Sender<ChannelState>,
) {
    let fail = |reason: String| {
        let _ = state_tx.send(ChannelState::Failed);
        let evt_tx = evt_tx.clone();
        async move {
            log::warn!("coaching channel failed: {reason}");
            let _ = evt_tx.send(ChannelEvent::Failed { reason }).await;
        }
    };

    // Connect with a hard timeout so we can't hang on a bad network.
    let ws = match tokio::time::timeout(
        cfg.connect_timeout,
        tokio_tungstenite::connect_async(url.as_str()),
    )
    .await
    {
        Ok(Ok((ws, _resp))) => ws,
        Ok(Err(e)) => {
            fail(format!("handshake failed: {e}")).await;
            return;
        }
        Err(_) => {
            fail("handshake timed out".into()).await;
            return;
        }
    };

    let _ = state_tx.send(ChannelState::Connected);
    let _ = evt_tx.send(ChannelEvent::Connected).await;
    log::info!("coaching channel connected: {}", cfg.meeting.as_str());

    let (ws_write, mut ws_read) = ws.split();

    // Writer task: keeps reads responsive by never awaiting socket writes in
    // the main loop.
    let send_timeout = cfg.send_timeout;
    let (out_tx, mut out_rx) = mpsc::channel::<Message>(64);
    tokio::spawn(async move {
        let mut ws_write = ws_write;
        while let Some(msg) = out_rx.recv().await {
            let res = tokio::time::timeout(send_timeout, ws_write.send(msg)).await;
            if !matches!(res, Ok(Ok(()))) {
                break;
            }
        }
        let _ = ws_write.send(Message::Close(None)).await;
    });

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(ChannelCmd::Send(payload)) => {
                        if out_tx.try_send(Message::Text(payload.into())).is_err() {
                            fail("websocket writer closed".into()).await;
                            return;
                        }
                    }
                    // Dropping `out_tx` ends the writer, which sends Close.
                    Some(ChannelCmd::Close) | None => {
                        let _ = state_tx.send(ChannelState::Closed);
                        log::info!("coaching channel closed");
                        return;
                    }
                }
            }

            msg = ws_read.next() => {
                let Some(msg) = msg else {
                    fail("connection closed".into()).await;
                    return;
                };

                match msg {
                    Ok(Message::Text(text)) => match parse_server_message(&text) {
                        Some(ServerMessage::Heard(heard)) => {
                            let _ = evt_tx.send(ChannelEvent::Heard(heard)).await;
                        }
                        Some(ServerMessage::Feedback(event)) => {
                            let _ = evt_tx.send(ChannelEvent::Feedback(event)).await;
                        }
                        None => {}
                    },
                    Ok(Message::Ping(payload)) => {
                        if out_tx.try_send(Message::Pong(payload)).is_err() {
                            fail("failed to send pong".into()).await;
                            return;
                        }
                    }
                    Ok(Message::Close(_)) => {
                        fail("closed by server".into()).await;
                        return;
                    }
                    // Binary and pong frames carry nothing for us.
                    Ok(_) => {}
                    Err(e) => {
                        fail(format!("websocket read failed: {e}")).await;
                        return;
                    }
                }
            }
        }
    }
}
