//! Persistent state channel to the orchestrator.
//!
//! [`StateChannel`] owns one WebSocket connection to the orchestrator's studio
//! endpoint. Inbound frames are parsed and merged into the Aura State one at a
//! time, in arrival order, and every accepted frame republishes the state on a
//! [`watch`] channel. [`ChannelHandle`] is the cheap, cloneable sending side.
//!
//! # Lifecycle
//!
//! ```text
//! Disconnected ──► Connecting ──► Open ──► Closed
//!                       └──────────────────▲
//! ```
//!
//! `Closed` is terminal. The channel never reconnects on its own; the session
//! keeps running with `connected = false`.

pub mod frame;

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use futures::{Sink, SinkExt, Stream, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, error, info, warn};

use crate::engine::error::PlayerError;
use crate::state::{self, AuraState, EmotionVector};
use frame::{InboundFrame, OutboundFrame};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChannelState {
    Disconnected = 0,
    Connecting = 1,
    Open = 2,
    Closed = 3,
}

impl ChannelState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ChannelState::Connecting,
            2 => ChannelState::Open,
            3 => ChannelState::Closed,
            _ => ChannelState::Disconnected,
        }
    }
}

/// Sending side of the state channel.
///
/// Every send is fire-and-forget: unless the channel is `Open` at the moment
/// of the call, the frame is dropped. Nothing is queued for later delivery.
#[derive(Clone)]
pub struct ChannelHandle {
    state: Arc<AtomicU8>,
    outbound: mpsc::UnboundedSender<String>,
}

impl ChannelHandle {
    pub fn state(&self) -> ChannelState {
        ChannelState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ChannelState::Open
    }

    pub fn send_vote(&self, mood: &str) {
        self.send_frame(OutboundFrame::audience_vote(mood));
    }

    pub fn send_control(&self, kind: &str, payload: Value) {
        self.send_frame(OutboundFrame::control(kind, payload));
    }

    pub fn send_weights(&self, weights: &std::collections::BTreeMap<String, f64>) {
        self.send_frame(OutboundFrame::update_weights(weights));
    }

    pub fn send_manual_override(&self, active: bool, vector: &EmotionVector) {
        self.send_frame(OutboundFrame::set_manual_override(active, vector));
    }

    fn send_frame(&self, frame: OutboundFrame) {
        let state = self.state();
        if state != ChannelState::Open {
            debug!("Dropping {} frame, channel is {:?}", frame.kind, state);
            return;
        }
        match frame.to_json() {
            Ok(text) => {
                if self.outbound.send(text).is_err() {
                    debug!("Dropping {} frame, channel task is gone", frame.kind);
                }
            }
            Err(e) => warn!("Failed to encode {} frame: {}", frame.kind, e),
        }
    }
}

/// Receiving side of the state channel. Consumed by [`StateChannel::run`].
pub struct StateChannel {
    url: String,
    state: Arc<AtomicU8>,
    aura: AuraState,
    publisher: watch::Sender<AuraState>,
    outbound: mpsc::UnboundedReceiver<String>,
}

impl StateChannel {
    pub fn new(url: impl Into<String>) -> (Self, ChannelHandle, watch::Receiver<AuraState>) {
        let state = Arc::new(AtomicU8::new(ChannelState::Disconnected as u8));
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (publisher, subscriber) = watch::channel(AuraState::default());

        let channel = Self {
            url: url.into(),
            state: state.clone(),
            aura: AuraState::default(),
            publisher,
            outbound: outbound_rx,
        };
        let handle = ChannelHandle {
            state,
            outbound: outbound_tx,
        };
        (channel, handle, subscriber)
    }

    /// Connects and serves the channel until it closes.
    pub async fn run(self) {
        self.set_state(ChannelState::Connecting);
        info!("Connecting to orchestrator at {}", self.url);

        match tokio_tungstenite::connect_async(self.url.as_str()).await {
            Ok((ws, _response)) => self.serve(ws).await,
            Err(e) => {
                let error = PlayerError::Connection(e.to_string());
                error!("{}", error);
                self.set_state(ChannelState::Closed);
            }
        }
    }

    /// Serves an already-established connection until it closes.
    pub async fn serve<S>(mut self, ws: S)
    where
        S: Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Unpin,
    {
        let (mut sink, mut stream) = ws.split();

        self.aura = AuraState::default();
        self.publisher.send_replace(self.aura.clone());
        self.set_state(ChannelState::Open);

        loop {
            tokio::select! {
                inbound = stream.next() => match inbound {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(e) = self.handle_text(&text) {
                            warn!("{}", e);
                        }
                    }
                    Some(Ok(Message::Close(close))) => {
                        info!("Orchestrator closed the channel: {:?}", close);
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!("{}", PlayerError::Connection(e.to_string()));
                        break;
                    }
                    None => {
                        warn!("Orchestrator connection ended");
                        break;
                    }
                },
                outbound = self.outbound.recv() => match outbound {
                    Some(text) => {
                        if let Err(e) = sink.send(Message::Text(text)).await {
                            error!("{}", PlayerError::Connection(e.to_string()));
                            break;
                        }
                    }
                    None => {
                        debug!("All channel handles dropped, closing");
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                },
            }
        }

        self.set_state(ChannelState::Closed);
        self.aura = AuraState::default();
        self.publisher.send_replace(AuraState::default());
    }

    /// Parses one text frame and merges it into the Aura State.
    ///
    /// A frame that fails to parse leaves the state untouched.
    pub fn handle_text(&mut self, text: &str) -> Result<(), PlayerError> {
        let frame = InboundFrame::parse(text)?;
        let kind = frame.kind().to_string();
        if state::apply(&mut self.aura, frame) {
            debug!("Merged {} frame", kind);
            self.publisher.send_replace(self.aura.clone());
        }
        Ok(())
    }

    #[cfg(test)]
    pub fn aura(&self) -> &AuraState {
        &self.aura
    }

    fn set_state(&self, next: ChannelState) {
        let previous = ChannelState::from_u8(self.state.swap(next as u8, Ordering::AcqRel));
        if previous != next {
            info!("State channel {:?} -> {:?}", previous, next);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;

    #[test]
    fn test_handle_text_merges_and_publishes() {
        let (mut channel, _handle, mut subscriber) = StateChannel::new("ws://unused");

        channel
            .handle_text(r#"{"type":"vote_ack","payload":{"mood":"joy","tally":2}}"#)
            .unwrap();

        assert!(subscriber.has_changed().unwrap());
        assert_eq!(subscriber.borrow_and_update().audience_tally("joy"), Some(2));
    }

    #[test]
    fn test_malformed_frame_leaves_state_untouched() {
        let (mut channel, _handle, subscriber) = StateChannel::new("ws://unused");
        channel
            .handle_text(r#"{"type":"aura_update","payload":{"audio":{"tempo_bpm":120}}}"#)
            .unwrap();
        let before = channel.aura().clone();

        let result = channel.handle_text(
            r#"{"type":"aura_update","payload":{"audio":{"tempo_bpm":140,"modulation":{"gain":"loud"}}}}"#,
        );

        assert!(matches!(result, Err(PlayerError::Parse(_))));
        assert_eq!(channel.aura(), &before);
        assert_eq!(*subscriber.borrow(), before);
    }

    #[test]
    fn test_full_update_keeps_unknown_fields() {
        let (mut channel, _handle, subscriber) = StateChannel::new("ws://unused");
        let update = serde_json::json!({
            "type": "aura_update",
            "payload": {
                "final_emotion_vector": {"joy": 0.7, "sadness": 0.1},
                "source_data": {
                    "game_state": {"level": 3, "boss": true},
                    "face_emotion": {"emotion": "joy", "confidence": 0.82},
                    "speech_emotion": {"emotion": "calm", "confidence": 0.4},
                    "manual_override": {"active": true, "vector": {"joy": 1.0}},
                    "weights": {"face": 0.5, "speech": 0.3, "game": 0.2},
                    "audience_vector": {"joy": 0.25}
                },
                "audio": {
                    "current_track": "theme.wav",
                    "base_tempo": 120.0,
                    "tempo_bpm": 132.0,
                    "tempo_multiplier": 1.1,
                    "primary_emotion": "joy",
                    "track_url": "/music_dna/theme.wav",
                    "key": "C major",
                    "modulation": {
                        "gain": 0.8,
                        "filter_cutoff_hz": 4200.0,
                        "intensity": 0.6,
                        "advanced": {"reverb": 0.3}
                    }
                }
            }
        });
        channel.handle_text(&update.to_string()).unwrap();

        let aura = subscriber.borrow().clone();
        let source = &aura.source_data;
        assert_eq!(source.game_state, Some(serde_json::json!({"level": 3, "boss": true})));
        assert_eq!(source.face_emotion.as_ref().unwrap().confidence, 0.82);
        let manual = source.manual_override.as_ref().unwrap();
        assert!(manual.active);
        assert_eq!(manual.vector["joy"], 1.0);
        assert_eq!(source.extra["audience_vector"], serde_json::json!({"joy": 0.25}));
        assert_eq!(aura.audio.extra["key"], "C major");

        let back = serde_json::to_value(&aura).unwrap();
        assert_eq!(back["source_data"]["audience_vector"]["joy"], 0.25);
        assert_eq!(back["audio"]["key"], "C major");
        assert_eq!(back["audio"]["modulation"]["intensity"], 0.6);
        assert_eq!(back["audio"]["modulation"]["advanced"]["reverb"], 0.3);

        channel
            .handle_text(r#"{"type":"aura_update","payload":{"audio":{"modulation":{"gain":0.5}}}}"#)
            .unwrap();
        let modulation = channel.aura().audio.modulation.as_ref().unwrap();
        assert_eq!(modulation.gain, Some(0.5));
        assert_eq!(modulation.filter_cutoff_hz, Some(4200.0));
        assert_eq!(modulation.extra["advanced"]["reverb"], 0.3);
        assert_eq!(channel.aura().audio.tempo_bpm, Some(132.0));
    }

    #[test]
    fn test_send_while_not_open_is_dropped() {
        let (channel, handle, _subscriber) = StateChannel::new("ws://unused");
        let mut outbound = channel.outbound;

        handle.send_vote("joy");
        channel.state.store(ChannelState::Connecting as u8, Ordering::Release);
        handle.send_vote("fear");
        handle.send_control("update_weights", serde_json::json!({"face": 0.5}));

        channel.state.store(ChannelState::Open as u8, Ordering::Release);
        assert!(outbound.try_recv().is_err());

        handle.send_vote("calm");
        assert_eq!(
            outbound.try_recv().unwrap(),
            r#"{"type":"audience_vote","payload":{"mood":"calm"}}"#
        );
    }

    #[tokio::test]
    async fn test_loopback_session() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            ws.send(Message::Text("garbage".into())).await.unwrap();
            ws.send(Message::Text(
                r#"{"type":"aura_update","payload":{"audio":{"tempo_multiplier":1.25}}}"#.into(),
            ))
            .await
            .unwrap();
            let received = loop {
                match ws.next().await {
                    Some(Ok(Message::Text(text))) => break text,
                    Some(Ok(_)) => continue,
                    other => panic!("unexpected {other:?}"),
                }
            };
            ws.close(None).await.unwrap();
            received
        });

        let (channel, handle, mut subscriber) = StateChannel::new(format!("ws://{addr}"));
        let client = tokio::spawn(channel.run());

        let tempo = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                subscriber.changed().await.unwrap();
                let tempo = subscriber.borrow_and_update().audio.tempo_multiplier;
                if tempo.is_some() {
                    break tempo;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(tempo, Some(1.25));
        assert!(handle.is_connected());

        handle.send_vote("tension");
        let received = server.await.unwrap();
        assert_eq!(
            received,
            r#"{"type":"audience_vote","payload":{"mood":"tension"}}"#
        );

        client.await.unwrap();
        assert_eq!(handle.state(), ChannelState::Closed);
        handle.send_vote("joy");
    }
}
