//! Turn orchestration
//!
//! [`TurnOrchestrator`] is a cheap, cloneable handle. All turn state lives in
//! a single actor task that owns the state machine, conversation store and
//! current stream session, so every mutation is serialized. Model streaming,
//! synthesis and timers run in their own tasks and report back tagged with
//! the turn generation they belong to; reports from an older generation are
//! ignored.

mod actor;
mod retry;
mod session;

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::avatar::Renderer;
use crate::config::{Config, DEFAULT_SYSTEM_PROMPT, TurnConfig};
use crate::conversation::Message;
use crate::emotion::Emotion;
use crate::llm::ModelClient;
use crate::state::{StateChange, TurnState};
use crate::voice::{SttError, SttEvent, Synthesizer, Transcriber};
use crate::{Error, Result};

pub use retry::RetryPolicy;
pub use session::{StreamSession, StreamStep};

use self::actor::{Command, TurnActor};

/// Notifications for the UI layer, delivered in order on one channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnEvent {
    StateChanged(StateChange),
    /// Accepted user input, trimmed
    UserSpeech(String),
    /// Emotion tag found in the current reply
    Emotion(Emotion),
    /// A sentence handed to synthesis
    AssistantSentence(String),
    /// The complete reply as stored in the conversation
    AssistantDone(String),
    /// User-facing message for a turn-ending failure
    Error(String),
}

/// Point-in-time view of the orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnSnapshot {
    pub state: TurnState,
    /// Retained history without the system message
    pub history: Vec<Message>,
    /// Sentences dispatched in the current turn and not yet synthesized
    pub outstanding: usize,
    pub generation: u64,
    pub mood: Emotion,
}

/// Handle to the turn orchestrator task
#[derive(Clone)]
pub struct TurnOrchestrator {
    commands: mpsc::UnboundedSender<Command>,
}

impl TurnOrchestrator {
    /// Start building an orchestrator with the given turn settings
    #[must_use]
    pub fn builder(turn: TurnConfig) -> OrchestratorBuilder {
        OrchestratorBuilder {
            turn,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            model: None,
            synthesizer: None,
            renderer: None,
            transcriber: None,
        }
    }

    /// Builder seeded from a loaded [`Config`]
    #[must_use]
    pub fn from_config(config: &Config) -> OrchestratorBuilder {
        Self::builder(config.turn.clone()).system_prompt(config.llm.system_prompt.clone())
    }

    /// Accept typed or transcribed user text. Blank input is ignored; a reply
    /// in progress is interrupted first.
    ///
    /// # Errors
    ///
    /// Returns error if the orchestrator task has stopped
    pub fn accept_user_text(&self, text: impl Into<String>) -> Result<()> {
        self.send(Command::UserText(text.into()))
    }

    /// Cancel model and synthesis work for the current turn and stop
    /// playback. Leaves the state unchanged.
    ///
    /// # Errors
    ///
    /// Returns error if the orchestrator task has stopped
    pub fn interrupt(&self) -> Result<()> {
        self.send(Command::Interrupt)
    }

    /// Interrupt and return to idle
    ///
    /// # Errors
    ///
    /// Returns error if the orchestrator task has stopped
    pub fn cancel_turn(&self) -> Result<()> {
        self.send(Command::CancelTurn)
    }

    /// Start the transcriber and enter listening
    ///
    /// # Errors
    ///
    /// Returns error if the orchestrator task has stopped
    pub fn start_listening(&self) -> Result<()> {
        self.send(Command::StartListening)
    }

    /// Pause the transcriber; leaves listening for idle
    ///
    /// # Errors
    ///
    /// Returns error if the orchestrator task has stopped
    pub fn stop_listening(&self) -> Result<()> {
        self.send(Command::StopListening)
    }

    /// Voice activity began. Barges in on a reply that is thinking or
    /// speaking.
    ///
    /// # Errors
    ///
    /// Returns error if the orchestrator task has stopped
    pub fn speech_started(&self) -> Result<()> {
        self.send(Command::SpeechStarted)
    }

    /// # Errors
    ///
    /// Returns error if the orchestrator task has stopped
    pub fn speech_ended(&self) -> Result<()> {
        self.send(Command::SpeechEnded)
    }

    /// # Errors
    ///
    /// Returns error if the orchestrator task has stopped
    pub fn transcribed(&self, text: impl Into<String>) -> Result<()> {
        self.accept_user_text(text)
    }

    /// End the turn with a user-facing transcription error
    ///
    /// # Errors
    ///
    /// Returns error if the orchestrator task has stopped
    pub fn transcription_failed(&self, error: SttError) -> Result<()> {
        self.send(Command::TranscriptionFailed(error))
    }

    /// Route one transcriber notification
    ///
    /// # Errors
    ///
    /// Returns error if the orchestrator task has stopped
    pub fn handle_stt_event(&self, event: SttEvent) -> Result<()> {
        match event {
            SttEvent::SpeechStart => self.speech_started(),
            SttEvent::SpeechEnd => self.speech_ended(),
            SttEvent::Transcription(text) => self.transcribed(text),
            SttEvent::Error(error) => self.transcription_failed(error),
        }
    }

    /// Forget the conversation history
    ///
    /// # Errors
    ///
    /// Returns error if the orchestrator task has stopped
    pub fn clear_conversation(&self) -> Result<()> {
        self.send(Command::ClearConversation)
    }

    /// Current state, history and counters
    ///
    /// # Errors
    ///
    /// Returns error if the orchestrator task has stopped
    pub async fn snapshot(&self) -> Result<TurnSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Snapshot(tx))?;
        rx.await.map_err(|_| stopped())
    }

    /// Stop the orchestrator task, cancelling everything in flight
    ///
    /// # Errors
    ///
    /// Returns error if the orchestrator task has already stopped
    pub fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown)
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| stopped())
    }
}

fn stopped() -> Error {
    Error::Orchestrator("orchestrator task has stopped".to_string())
}

/// Collects collaborators before the orchestrator task is spawned
pub struct OrchestratorBuilder {
    turn: TurnConfig,
    system_prompt: String,
    model: Option<Arc<dyn ModelClient>>,
    synthesizer: Option<Arc<dyn Synthesizer>>,
    renderer: Option<Arc<dyn Renderer>>,
    transcriber: Option<Arc<dyn Transcriber>>,
}

impl OrchestratorBuilder {
    #[must_use]
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    #[must_use]
    pub fn model(mut self, model: Arc<dyn ModelClient>) -> Self {
        self.model = Some(model);
        self
    }

    #[must_use]
    pub fn synthesizer(mut self, synthesizer: Arc<dyn Synthesizer>) -> Self {
        self.synthesizer = Some(synthesizer);
        self
    }

    #[must_use]
    pub fn renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Optional; without one, listening commands are ignored
    #[must_use]
    pub fn transcriber(mut self, transcriber: Arc<dyn Transcriber>) -> Self {
        self.transcriber = Some(transcriber);
        self
    }

    /// Spawn the orchestrator task on the current tokio runtime.
    ///
    /// Returns the handle and the receiving end of the event channel.
    ///
    /// # Errors
    ///
    /// Returns error if the model, synthesizer or renderer is missing
    pub fn spawn(self) -> Result<(TurnOrchestrator, mpsc::UnboundedReceiver<TurnEvent>)> {
        let model = self
            .model
            .ok_or_else(|| Error::Config("orchestrator needs a model client".to_string()))?;
        let synthesizer = self
            .synthesizer
            .ok_or_else(|| Error::Config("orchestrator needs a synthesizer".to_string()))?;
        let renderer = self
            .renderer
            .ok_or_else(|| Error::Config("orchestrator needs a renderer".to_string()))?;

        let (commands, command_rx) = mpsc::unbounded_channel();
        let (events, event_rx) = mpsc::unbounded_channel();

        let actor = TurnActor::new(
            self.turn,
            self.system_prompt,
            model,
            synthesizer,
            renderer,
            self.transcriber,
            events,
        );
        tokio::spawn(actor.run(command_rx));

        tracing::debug!("turn orchestrator started");
        Ok((TurnOrchestrator { commands }, event_rx))
    }
}
