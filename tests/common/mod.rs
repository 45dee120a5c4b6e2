//! Shared test utilities

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::{Semaphore, mpsc};

use cadence::config::TurnConfig;
use cadence::{
    Emotion, Error, LlmError, Message, ModelClient, Renderer, Result, SpeechAudio, SttError,
    Synthesizer, TokenStream, Transcriber, TurnEvent, TurnOrchestrator, TurnState,
};

/// How long any single wait in a test may take
pub const WAIT: Duration = Duration::from_secs(3);

/// Turn settings with short timers so tests run fast
#[must_use]
pub fn fast_turn_config() -> TurnConfig {
    TurnConfig {
        retry_delay: Duration::from_millis(20),
        finish_grace: Duration::from_millis(10),
        mood_decay: Duration::from_secs(60),
        ..TurnConfig::default()
    }
}

// -- model ---------------------------------------------------------------------

/// One scripted model response
#[derive(Debug, Clone)]
pub enum Reply {
    /// Stream these tokens, then end
    Tokens(Vec<&'static str>),
    /// Fail the request with this HTTP status
    Status(u16),
    /// Stream these tokens, then never finish
    Hang(Vec<&'static str>),
    /// Stream these tokens, then break with a stream error
    Break(Vec<&'static str>),
}

/// Model double that plays back scripted replies in order
#[derive(Default)]
pub struct ScriptedModel {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<Vec<Message>>>,
    dropped: Arc<AtomicBool>,
}

impl ScriptedModel {
    pub fn new(replies: impl IntoIterator<Item = Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().collect()),
            ..Self::default()
        })
    }

    /// Every message list the orchestrator sent, in order
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().unwrap().clone()
    }

    /// Whether a hanging stream was dropped (cancelled)
    pub fn hang_dropped(&self) -> bool {
        self.dropped.load(Ordering::SeqCst)
    }
}

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn stream_chat(&self, messages: &[Message]) -> std::result::Result<TokenStream, LlmError> {
        self.requests.lock().unwrap().push(messages.to_vec());
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Reply::Tokens(vec!["[neutral] Okay."]));

        match reply {
            Reply::Tokens(tokens) => {
                let tokens: Vec<_> = tokens.into_iter().map(|t| Ok(t.to_string())).collect();
                Ok(futures::stream::iter(tokens).boxed())
            }
            Reply::Break(tokens) => {
                let mut items: Vec<_> = tokens.into_iter().map(|t| Ok(t.to_string())).collect();
                items.push(Err(LlmError::Stream("connection reset".to_string())));
                Ok(futures::stream::iter(items).boxed())
            }
            Reply::Status(status) => Err(LlmError::from_status(status, "scripted failure")),
            Reply::Hang(tokens) => {
                let guard = DropFlag(Arc::clone(&self.dropped));
                let tokens: Vec<_> = tokens.into_iter().map(|t| Ok(t.to_string())).collect();
                Ok(futures::stream::iter(tokens)
                    .chain(futures::stream::pending())
                    .map(move |item| {
                        let _keep = &guard;
                        item
                    })
                    .boxed())
            }
        }
    }
}

// -- synthesis -----------------------------------------------------------------

/// Synthesizer double. PCM is the sentence text; sentences containing
/// "Boom" fail. When gated, each call waits for a released permit.
pub struct GatedSynthesizer {
    gate: Semaphore,
    texts: Mutex<Vec<String>>,
}

impl GatedSynthesizer {
    /// Synthesizes immediately
    pub fn open() -> Arc<Self> {
        Arc::new(Self {
            gate: Semaphore::new(Semaphore::MAX_PERMITS),
            texts: Mutex::new(Vec::new()),
        })
    }

    /// Blocks until [`Self::release`] is called
    pub fn closed() -> Arc<Self> {
        Arc::new(Self {
            gate: Semaphore::new(0),
            texts: Mutex::new(Vec::new()),
        })
    }

    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    /// Sentences the synthesizer was asked for, in order
    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Synthesizer for GatedSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<SpeechAudio> {
        self.texts.lock().unwrap().push(text.to_string());
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| Error::Tts(e.to_string()))?;
        permit.forget();

        if text.contains("Boom") {
            return Err(Error::Tts("scripted failure".to_string()));
        }
        Ok(SpeechAudio {
            pcm: text.as_bytes().to_vec(),
            words: Vec::new(),
        })
    }
}

// -- renderer ------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderCall {
    Speak(String),
    Stop,
    Mood(Emotion),
}

#[derive(Default)]
pub struct RecordingRenderer {
    calls: Mutex<Vec<RenderCall>>,
}

impl RecordingRenderer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<RenderCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Text of every sentence played, in order
    pub fn spoken(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                RenderCall::Speak(text) => Some(text),
                _ => None,
            })
            .collect()
    }
}

impl Renderer for RecordingRenderer {
    fn speak(&self, audio: SpeechAudio) {
        let text = String::from_utf8(audio.pcm).unwrap_or_default();
        self.calls.lock().unwrap().push(RenderCall::Speak(text));
    }

    fn stop_speaking(&self) {
        self.calls.lock().unwrap().push(RenderCall::Stop);
    }

    fn set_mood(&self, mood: Emotion) {
        self.calls.lock().unwrap().push(RenderCall::Mood(mood));
    }
}

// -- transcriber ---------------------------------------------------------------

#[derive(Default)]
pub struct RecordingTranscriber {
    pub starts: AtomicUsize,
    pub pauses: AtomicUsize,
    /// Error returned from `start`, if any
    pub fail_with: Mutex<Option<SttError>>,
}

#[async_trait]
impl Transcriber for RecordingTranscriber {
    async fn start(&self) -> std::result::Result<(), SttError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.fail_with.lock().unwrap().clone().map_or(Ok(()), Err)
    }

    fn pause(&self) {
        self.pauses.fetch_add(1, Ordering::SeqCst);
    }
}

// -- harness -------------------------------------------------------------------

/// Orchestrator wired to test doubles, plus its event log
pub struct Harness {
    pub orchestrator: TurnOrchestrator,
    pub model: Arc<ScriptedModel>,
    pub synth: Arc<GatedSynthesizer>,
    pub renderer: Arc<RecordingRenderer>,
    pub transcriber: Arc<RecordingTranscriber>,
    pub events: EventLog,
}

impl Harness {
    pub fn start(model: Arc<ScriptedModel>, synth: Arc<GatedSynthesizer>) -> Self {
        Self::start_with(fast_turn_config(), model, synth)
    }

    pub fn start_with(
        turn: TurnConfig,
        model: Arc<ScriptedModel>,
        synth: Arc<GatedSynthesizer>,
    ) -> Self {
        let renderer = RecordingRenderer::new();
        let transcriber = Arc::new(RecordingTranscriber::default());
        let (orchestrator, events) = TurnOrchestrator::builder(turn)
            .system_prompt("test prompt")
            .model(model.clone())
            .synthesizer(synth.clone())
            .renderer(renderer.clone())
            .transcriber(transcriber.clone())
            .spawn()
            .unwrap();

        Self {
            orchestrator,
            model,
            synth,
            renderer,
            transcriber,
            events: EventLog::new(events),
        }
    }
}

/// Records every orchestrator event and waits for specific ones
pub struct EventLog {
    rx: mpsc::UnboundedReceiver<TurnEvent>,
    pub seen: Vec<TurnEvent>,
}

impl EventLog {
    pub fn new(rx: mpsc::UnboundedReceiver<TurnEvent>) -> Self {
        Self {
            rx,
            seen: Vec::new(),
        }
    }

    /// Wait for the first not-yet-consumed event matching `pred`
    pub async fn until(&mut self, pred: impl Fn(&TurnEvent) -> bool) -> TurnEvent {
        tokio::time::timeout(WAIT, async {
            loop {
                let event = self.rx.recv().await.expect("event channel closed");
                self.seen.push(event.clone());
                if pred(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }

    pub async fn until_state(&mut self, state: TurnState) {
        self.until(|e| matches!(e, TurnEvent::StateChanged(c) if c.current == state))
            .await;
    }

    /// Collect whatever arrives within `window`
    pub async fn drain_for(&mut self, window: Duration) {
        let deadline = tokio::time::Instant::now() + window;
        while let Ok(Some(event)) = tokio::time::timeout_at(deadline, self.rx.recv()).await {
            self.seen.push(event);
        }
    }

    pub fn sentences(&self) -> Vec<String> {
        self.seen
            .iter()
            .filter_map(|e| match e {
                TurnEvent::AssistantSentence(s) => Some(s.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn states(&self) -> Vec<TurnState> {
        self.seen
            .iter()
            .filter_map(|e| match e {
                TurnEvent::StateChanged(c) => Some(c.current),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<String> {
        self.seen
            .iter()
            .filter_map(|e| match e {
                TurnEvent::Error(message) => Some(message.clone()),
                _ => None,
            })
            .collect()
    }
}
