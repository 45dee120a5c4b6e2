//! Orchestrator event loop

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::retry::RetryPolicy;
use super::session::{StreamSession, StreamStep};
use super::{TurnEvent, TurnSnapshot};
use crate::avatar::Renderer;
use crate::config::TurnConfig;
use crate::conversation::ConversationStore;
use crate::emotion::{Emotion, MoodTracker, parse_emotion_tag};
use crate::llm::{LlmError, ModelClient};
use crate::state::{StateMachine, TurnState};
use crate::stream::strip_reasoning_blocks;
use crate::voice::{SpeechCompletion, SpeechQueue, SttError, Synthesizer, Transcriber};

/// Requests from [`super::TurnOrchestrator`] handles
pub(super) enum Command {
    UserText(String),
    Interrupt,
    CancelTurn,
    StartListening,
    StopListening,
    SpeechStarted,
    SpeechEnded,
    TranscriptionFailed(SttError),
    ClearConversation,
    Snapshot(oneshot::Sender<TurnSnapshot>),
    Shutdown,
}

/// Reports from tasks the actor spawned
enum Internal {
    Token { generation: u64, token: String },
    ModelDone { generation: u64 },
    ModelFailed { generation: u64, error: LlmError },
    RetryDue { generation: u64 },
    Synthesized(SpeechCompletion),
    FinishDue { generation: u64 },
    MoodDecay { epoch: u64 },
    ListenFailed(SttError),
}

pub(super) struct TurnActor {
    config: TurnConfig,
    retry: RetryPolicy,
    state: StateMachine,
    conversation: ConversationStore,
    session: StreamSession,
    next_generation: u64,
    model: Arc<dyn ModelClient>,
    speech: SpeechQueue,
    renderer: Arc<dyn Renderer>,
    transcriber: Option<Arc<dyn Transcriber>>,
    mood: MoodTracker,
    mood_epoch: u64,
    events: mpsc::UnboundedSender<TurnEvent>,
    internal: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    model_task: Option<JoinHandle<()>>,
    retry_timer: Option<JoinHandle<()>>,
    finish_timer: Option<JoinHandle<()>>,
    mood_timer: Option<JoinHandle<()>>,
}

impl TurnActor {
    pub(super) fn new(
        config: TurnConfig,
        system_prompt: String,
        model: Arc<dyn ModelClient>,
        synthesizer: Arc<dyn Synthesizer>,
        renderer: Arc<dyn Renderer>,
        transcriber: Option<Arc<dyn Transcriber>>,
        events: mpsc::UnboundedSender<TurnEvent>,
    ) -> Self {
        let (internal, internal_rx) = mpsc::unbounded_channel();

        let reporter = internal.clone();
        let speech = SpeechQueue::new(synthesizer, move |done| {
            let _ = reporter.send(Internal::Synthesized(done));
        });

        let mut state = StateMachine::new();
        let notify = events.clone();
        state.subscribe(move |change| {
            let _ = notify.send(TurnEvent::StateChanged(change));
        });

        Self {
            retry: RetryPolicy::from(&config),
            conversation: ConversationStore::new(system_prompt, config.max_history),
            session: StreamSession::new(0, config.emotion_window),
            next_generation: 1,
            config,
            state,
            model,
            speech,
            renderer,
            transcriber,
            mood: MoodTracker::default(),
            mood_epoch: 0,
            events,
            internal,
            internal_rx,
            model_task: None,
            retry_timer: None,
            finish_timer: None,
            mood_timer: None,
        }
    }

    pub(super) async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                Some(report) = self.internal_rx.recv() => self.handle_internal(report),
            }
        }

        self.cancel_work();
        abort(&mut self.mood_timer);
        tracing::debug!("turn orchestrator stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::UserText(text) => self.accept_user_text(&text),
            Command::Interrupt => self.interrupt(),
            Command::CancelTurn => {
                self.interrupt();
                self.state.transition(TurnState::Idle);
            }
            Command::StartListening => self.start_listening(),
            Command::StopListening => {
                if let Some(transcriber) = &self.transcriber {
                    transcriber.pause();
                }
                if self.state.is(TurnState::Listening) {
                    self.state.transition(TurnState::Idle);
                }
            }
            Command::SpeechStarted => {
                if self.state.is(TurnState::Speaking) || self.state.is(TurnState::Thinking) {
                    tracing::info!("barge-in while {}", self.state.current());
                    self.interrupt();
                }
                self.state.transition(TurnState::Listening);
            }
            Command::SpeechEnded => {
                self.state.transition(TurnState::Transcribing);
            }
            Command::TranscriptionFailed(error) => self.transcription_failed(&error),
            Command::ClearConversation => self.conversation.clear(),
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            // Handled by the run loop
            Command::Shutdown => {}
        }
    }

    fn handle_internal(&mut self, report: Internal) {
        match report {
            Internal::Token { generation, token } => {
                if self.is_stale(generation) {
                    return;
                }
                let step = self.session.push_token(&token);
                self.apply_step(step);
            }
            Internal::ModelDone { generation } => {
                if self.is_stale(generation) {
                    return;
                }
                self.model_task = None;
                self.complete_stream();
            }
            Internal::ModelFailed { generation, error } => {
                if self.is_stale(generation) {
                    return;
                }
                self.model_task = None;
                self.model_failed(&error);
            }
            Internal::RetryDue { generation } => {
                if self.is_stale(generation) {
                    return;
                }
                self.retry_timer = None;
                if !self.state.is(TurnState::Thinking) {
                    tracing::debug!("turn moved on during retry delay, not retrying");
                    return;
                }
                self.session.restart_stream();
                self.start_model_request();
            }
            Internal::Synthesized(SpeechCompletion { generation, result }) => {
                if self.is_stale(generation) {
                    return;
                }
                match result {
                    Ok(audio) => self.renderer.speak(audio),
                    Err(e) => tracing::warn!(error = %e, "sentence not spoken"),
                }
                self.session.unit_completed();
                self.maybe_finish();
            }
            Internal::FinishDue { generation } => {
                if self.is_stale(generation) {
                    return;
                }
                self.finish_timer = None;
                if self.state.is(TurnState::Speaking) || self.state.is(TurnState::Thinking) {
                    self.state.transition(TurnState::Idle);
                }
                tracing::info!(generation, "turn complete");
                self.reset_session();
            }
            Internal::MoodDecay { epoch } => {
                if epoch == self.mood_epoch && self.mood.set(Emotion::Neutral) {
                    tracing::debug!("mood decayed to neutral");
                    self.renderer.set_mood(Emotion::Neutral);
                }
                self.mood_timer = None;
            }
            Internal::ListenFailed(error) => self.transcription_failed(&error),
        }
    }

    // -- turn lifecycle -------------------------------------------------------

    fn accept_user_text(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }

        tracing::info!(chars = text.len(), "user input accepted");
        self.emit(TurnEvent::UserSpeech(text.to_string()));

        if !self.state.is(TurnState::Idle) && !self.state.is(TurnState::Listening) {
            self.interrupt();
        }

        self.conversation.add_user(text);
        self.state.transition(TurnState::Thinking);
        self.reset_session();
        self.start_model_request();
    }

    fn start_model_request(&mut self) {
        abort(&mut self.model_task);

        let generation = self.session.generation();
        let messages = self.conversation.messages_for_request();
        let model = Arc::clone(&self.model);
        let tx = self.internal.clone();

        tracing::debug!(
            generation,
            attempt = self.session.retries_used() + 1,
            messages = messages.len(),
            "requesting reply"
        );

        self.model_task = Some(tokio::spawn(async move {
            let mut tokens = match model.stream_chat(&messages).await {
                Ok(tokens) => tokens,
                Err(error) => {
                    let _ = tx.send(Internal::ModelFailed { generation, error });
                    return;
                }
            };

            while let Some(item) = tokens.next().await {
                let report = match item {
                    Ok(token) => Internal::Token { generation, token },
                    Err(error) => {
                        let _ = tx.send(Internal::ModelFailed { generation, error });
                        return;
                    }
                };
                if tx.send(report).is_err() {
                    return;
                }
            }

            let _ = tx.send(Internal::ModelDone { generation });
        }));
    }

    fn apply_step(&mut self, step: StreamStep) {
        if let Some(emotion) = step.emotion {
            self.apply_emotion(emotion);
        }
        for sentence in step.sentences {
            self.dispatch(sentence);
        }
    }

    fn dispatch(&mut self, sentence: String) {
        self.state.transition(TurnState::Speaking);
        self.session.unit_dispatched();
        tracing::debug!(
            generation = self.session.generation(),
            outstanding = self.session.outstanding(),
            "sentence queued"
        );
        self.emit(TurnEvent::AssistantSentence(sentence.clone()));
        self.speech.enqueue(self.session.generation(), sentence);
    }

    fn complete_stream(&mut self) {
        let step = self.session.finish_stream();
        self.apply_step(step);

        let reply = strip_reasoning_blocks(self.session.raw());
        self.conversation.add_assistant(&reply);
        let (_, clean) = parse_emotion_tag(&reply);
        tracing::info!(
            chars = clean.len(),
            outstanding = self.session.outstanding(),
            "reply complete"
        );
        self.emit(TurnEvent::AssistantDone(clean.to_string()));

        self.maybe_finish();
    }

    fn model_failed(&mut self, error: &LlmError) {
        if error.is_cancelled() {
            tracing::debug!("model request cancelled");
            return;
        }

        if self.state.is(TurnState::Speaking) {
            tracing::warn!(error = %error, "model stream broke mid-reply, keeping what was spoken");
            self.complete_stream();
            return;
        }

        let retries_used = self.session.retries_used();
        if self.retry.should_retry(error, retries_used) {
            tracing::warn!(
                error = %error,
                retries_left = self.retry.remaining(retries_used),
                "LLM error, retrying"
            );
            let generation = self.session.generation();
            let delay = self.retry.delay;
            let tx = self.internal.clone();
            abort(&mut self.retry_timer);
            self.retry_timer = Some(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = tx.send(Internal::RetryDue { generation });
            }));
            return;
        }

        tracing::error!(error = %error, "LLM failed after retries");
        self.reset_session();
        self.state.transition(TurnState::Idle);
        self.emit(TurnEvent::Error(format!("LLM error: {error}")));
    }

    fn maybe_finish(&mut self) {
        if !self.session.claim_finish() {
            return;
        }

        let generation = self.session.generation();
        let grace = self.config.finish_grace;
        let tx = self.internal.clone();
        self.finish_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let _ = tx.send(Internal::FinishDue { generation });
        }));
    }

    fn interrupt(&mut self) {
        tracing::info!(generation = self.session.generation(), "interrupting");
        self.cancel_work();
        self.renderer.stop_speaking();
        self.reset_session();
    }

    /// Abort the model stream, queued synthesis and turn timers
    fn cancel_work(&mut self) {
        abort(&mut self.model_task);
        abort(&mut self.retry_timer);
        abort(&mut self.finish_timer);
        self.speech.clear();
    }

    /// Replace the session; everything tagged with the old generation is
    /// now stale
    fn reset_session(&mut self) {
        self.session = StreamSession::new(self.next_generation, self.config.emotion_window);
        self.next_generation += 1;
    }

    fn is_stale(&self, generation: u64) -> bool {
        let stale = !self.session.is_current(generation);
        if stale {
            tracing::trace!(
                generation,
                current = self.session.generation(),
                "dropping stale report"
            );
        }
        stale
    }

    // -- collaborators --------------------------------------------------------

    fn start_listening(&mut self) {
        let Some(transcriber) = self.transcriber.clone() else {
            tracing::warn!("no transcriber configured, ignoring start listening");
            return;
        };

        let tx = self.internal.clone();
        tokio::spawn(async move {
            if let Err(error) = transcriber.start().await {
                let _ = tx.send(Internal::ListenFailed(error));
            }
        });
        self.state.transition(TurnState::Listening);
    }

    fn transcription_failed(&mut self, error: &SttError) {
        tracing::error!(error = %error, "transcription failed");
        self.state.transition(TurnState::Idle);
        self.emit(TurnEvent::Error(format!("STT error: {error}")));
    }

    fn apply_emotion(&mut self, emotion: Emotion) {
        tracing::debug!(%emotion, "emotion tag");
        self.emit(TurnEvent::Emotion(emotion));

        if self.mood.set(emotion) {
            self.renderer.set_mood(emotion);
        }

        self.mood_epoch += 1;
        abort(&mut self.mood_timer);
        if self.mood.decays() {
            let epoch = self.mood_epoch;
            let decay = self.config.mood_decay;
            let tx = self.internal.clone();
            self.mood_timer = Some(tokio::spawn(async move {
                tokio::time::sleep(decay).await;
                let _ = tx.send(Internal::MoodDecay { epoch });
            }));
        }
    }

    fn snapshot(&self) -> TurnSnapshot {
        TurnSnapshot {
            state: self.state.current(),
            history: self.conversation.history(),
            outstanding: self.session.outstanding(),
            generation: self.session.generation(),
            mood: self.mood.current(),
        }
    }

    fn emit(&self, event: TurnEvent) {
        let _ = self.events.send(event);
    }
}

fn abort(task: &mut Option<JoinHandle<()>>) {
    if let Some(task) = task.take() {
        task.abort();
    }
}
