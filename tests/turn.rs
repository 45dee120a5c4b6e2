//! Turn orchestration integration tests
//!
//! Drives the orchestrator through scripted collaborators and checks the
//! observable effects: events, synthesis requests, playback and history.

use std::sync::atomic::Ordering;
use std::time::Duration;

use cadence::config::TurnConfig;
use cadence::{Emotion, Message, SttError, SttEvent, TurnEvent, TurnState};

mod common;

use common::{GatedSynthesizer, Harness, RenderCall, Reply, ScriptedModel, WAIT, fast_turn_config};

async fn wait_until(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

// -- complete turns --------------------------------------------------------------

#[tokio::test]
async fn test_reply_is_segmented_spoken_and_stored() {
    let model = ScriptedModel::new([Reply::Tokens(vec![
        "[happy]", " Hi", " there!", " How", " are", " you?",
    ])]);
    let mut h = Harness::start(model, GatedSynthesizer::open());

    h.orchestrator.accept_user_text("Hello").unwrap();
    h.events.until_state(TurnState::Idle).await;

    let expected = vec!["Hi there!".to_string(), "How are you?".to_string()];
    assert_eq!(h.events.sentences(), expected);
    assert_eq!(h.synth.texts(), expected);
    assert_eq!(h.renderer.spoken(), expected);
    assert_eq!(
        h.events.states(),
        vec![TurnState::Thinking, TurnState::Speaking, TurnState::Idle]
    );
    assert!(h.events.seen.contains(&TurnEvent::UserSpeech("Hello".to_string())));
    assert!(h.events.seen.contains(&TurnEvent::Emotion(Emotion::Happy)));
    assert!(
        h.events
            .seen
            .contains(&TurnEvent::AssistantDone("Hi there! How are you?".to_string()))
    );
    assert_eq!(h.renderer.calls().first(), Some(&RenderCall::Mood(Emotion::Happy)));

    let snapshot = h.orchestrator.snapshot().await.unwrap();
    assert_eq!(snapshot.state, TurnState::Idle);
    assert_eq!(snapshot.outstanding, 0);
    assert_eq!(snapshot.mood, Emotion::Happy);
    assert_eq!(
        snapshot.history,
        vec![
            Message::user("Hello"),
            Message::assistant("Hi there! How are you?"),
        ]
    );
    assert_eq!(
        h.model.requests(),
        vec![vec![Message::system("test prompt"), Message::user("Hello")]]
    );
}

#[tokio::test]
async fn test_reasoning_block_is_never_spoken_or_stored() {
    let model = ScriptedModel::new([Reply::Tokens(vec![
        "<think>",
        "The user sounds down.",
        "</think>",
        "\n\n[sad] ",
        "Sorry to hear that. ",
        "Take care.",
    ])]);
    let mut h = Harness::start(model, GatedSynthesizer::open());

    h.orchestrator.accept_user_text("Rough day").unwrap();
    h.events.until_state(TurnState::Idle).await;

    assert_eq!(h.events.sentences(), vec!["Sorry to hear that.", "Take care."]);
    assert!(h.events.seen.contains(&TurnEvent::Emotion(Emotion::Sad)));
    let history = h.orchestrator.snapshot().await.unwrap().history;
    assert_eq!(history[1], Message::assistant("Sorry to hear that. Take care."));
}

#[tokio::test]
async fn test_empty_reply_returns_to_idle() {
    let model = ScriptedModel::new([Reply::Tokens(vec![])]);
    let mut h = Harness::start(model, GatedSynthesizer::open());

    h.orchestrator.accept_user_text("...anyone?").unwrap();
    h.events.until_state(TurnState::Idle).await;

    assert!(h.events.sentences().is_empty());
    assert_eq!(h.events.states(), vec![TurnState::Thinking, TurnState::Idle]);
    assert!(h.events.seen.contains(&TurnEvent::AssistantDone(String::new())));
}

#[tokio::test]
async fn test_blank_input_is_ignored() {
    let model = ScriptedModel::new([]);
    let h = Harness::start(model, GatedSynthesizer::open());

    h.orchestrator.accept_user_text("   \n").unwrap();
    let snapshot = h.orchestrator.snapshot().await.unwrap();

    assert_eq!(snapshot.state, TurnState::Idle);
    assert!(snapshot.history.is_empty());
    assert!(h.model.requests().is_empty());
}

// -- completion bookkeeping ------------------------------------------------------

#[tokio::test]
async fn test_turn_finishes_exactly_once() {
    let model = ScriptedModel::new([Reply::Tokens(vec![
        "[neutral] One. ",
        "Two. ",
        "Three. ",
        "Four.",
    ])]);
    let mut h = Harness::start(model, GatedSynthesizer::open());

    h.orchestrator.accept_user_text("Count").unwrap();
    h.events.until_state(TurnState::Idle).await;
    h.events.drain_for(Duration::from_millis(100)).await;

    let idles = h
        .events
        .states()
        .into_iter()
        .filter(|s| *s == TurnState::Idle)
        .count();
    assert_eq!(idles, 1);
    assert_eq!(h.renderer.spoken().len(), 4);
    assert_eq!(h.orchestrator.snapshot().await.unwrap().outstanding, 0);
}

#[tokio::test]
async fn test_outstanding_tracks_unfinished_synthesis() {
    let model = ScriptedModel::new([Reply::Tokens(vec!["[neutral] One. Two. Three."])]);
    let synth = GatedSynthesizer::closed();
    let mut h = Harness::start(model, synth.clone());

    h.orchestrator.accept_user_text("Count").unwrap();
    h.events
        .until(|e| matches!(e, TurnEvent::AssistantDone(_)))
        .await;
    assert_eq!(h.orchestrator.snapshot().await.unwrap().outstanding, 3);

    synth.release(1);
    let orchestrator = h.orchestrator.clone();
    tokio::time::timeout(WAIT, async {
        while orchestrator.snapshot().await.unwrap().outstanding != 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(h.orchestrator.snapshot().await.unwrap().state, TurnState::Speaking);

    synth.release(2);
    h.events.until_state(TurnState::Idle).await;
}

#[tokio::test]
async fn test_failed_sentence_still_counts_as_complete() {
    let model = ScriptedModel::new([Reply::Tokens(vec![
        "[neutral] Fine. Boom goes this one. Done.",
    ])]);
    let mut h = Harness::start(model, GatedSynthesizer::open());

    h.orchestrator.accept_user_text("Go").unwrap();
    h.events.until_state(TurnState::Idle).await;

    assert_eq!(h.events.sentences().len(), 3);
    assert_eq!(h.renderer.spoken(), vec!["Fine.", "Done."]);
    assert!(h.events.errors().is_empty());
}

// -- retries ---------------------------------------------------------------------

#[tokio::test]
async fn test_two_failures_then_success() {
    let model = ScriptedModel::new([
        Reply::Status(500),
        Reply::Status(500),
        Reply::Tokens(vec!["[neutral] Third time lucky."]),
    ]);
    let mut h = Harness::start(model, GatedSynthesizer::open());

    h.orchestrator.accept_user_text("Try").unwrap();
    h.events.until_state(TurnState::Idle).await;

    assert_eq!(h.model.requests().len(), 3);
    assert_eq!(h.events.sentences(), vec!["Third time lucky."]);
    assert!(h.events.errors().is_empty());
    assert_eq!(
        h.events.states(),
        vec![TurnState::Thinking, TurnState::Speaking, TurnState::Idle]
    );
}

#[tokio::test]
async fn test_retries_exhausted_surfaces_error() {
    let model = ScriptedModel::new([Reply::Status(500), Reply::Status(500), Reply::Status(500)]);
    let mut h = Harness::start(model, GatedSynthesizer::open());

    h.orchestrator.accept_user_text("Try").unwrap();
    h.events.until_state(TurnState::Idle).await;
    h.events.drain_for(Duration::from_millis(100)).await;

    assert_eq!(h.model.requests().len(), 3);
    assert_eq!(
        h.events.errors(),
        vec!["LLM error: LLM server error (500), check service logs"]
    );
    let snapshot = h.orchestrator.snapshot().await.unwrap();
    assert_eq!(snapshot.history, vec![Message::user("Try")]);
}

#[tokio::test]
async fn test_retry_abandoned_after_interrupt() {
    let turn = TurnConfig {
        retry_delay: Duration::from_millis(200),
        ..fast_turn_config()
    };
    let model = ScriptedModel::new([Reply::Status(503), Reply::Tokens(vec!["Never said."])]);
    let mut h = Harness::start_with(turn, model, GatedSynthesizer::open());

    h.orchestrator.accept_user_text("Try").unwrap();
    h.events.until_state(TurnState::Thinking).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    h.orchestrator.cancel_turn().unwrap();
    h.events.until_state(TurnState::Idle).await;
    h.events.drain_for(Duration::from_millis(300)).await;

    assert_eq!(h.model.requests().len(), 1);
    assert!(h.events.sentences().is_empty());
    assert!(h.events.errors().is_empty());
}

#[tokio::test]
async fn test_stream_break_mid_reply_keeps_spoken_part() {
    let model = ScriptedModel::new([Reply::Break(vec!["[neutral] First part. ", "Second"])]);
    let mut h = Harness::start(model, GatedSynthesizer::open());

    h.orchestrator.accept_user_text("Go").unwrap();
    h.events.until_state(TurnState::Idle).await;

    assert_eq!(h.model.requests().len(), 1);
    assert_eq!(h.events.sentences(), vec!["First part.", "Second"]);
    let history = h.orchestrator.snapshot().await.unwrap().history;
    assert_eq!(history[1], Message::assistant("First part. Second"));
}

// -- interruption ----------------------------------------------------------------

#[tokio::test]
async fn test_cancel_mid_stream_leaves_no_trace() {
    let model = ScriptedModel::new([Reply::Hang(vec!["Hel"])]);
    let mut h = Harness::start(model, GatedSynthesizer::open());

    h.orchestrator.accept_user_text("Hello").unwrap();
    h.events.until_state(TurnState::Thinking).await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    h.orchestrator.cancel_turn().unwrap();
    h.events.until_state(TurnState::Idle).await;

    let snapshot = h.orchestrator.snapshot().await.unwrap();
    assert_eq!(snapshot.history, vec![Message::user("Hello")]);
    assert_eq!(snapshot.outstanding, 0);
    assert!(h.events.sentences().is_empty());
    assert!(h.synth.texts().is_empty());
    assert!(h.renderer.calls().contains(&RenderCall::Stop));

    let model = h.model.clone();
    wait_until(|| model.hang_dropped()).await;
}

#[tokio::test]
async fn test_speech_during_thinking_moves_to_listening() {
    let model = ScriptedModel::new([Reply::Hang(vec![])]);
    let mut h = Harness::start(model, GatedSynthesizer::open());

    h.orchestrator.accept_user_text("Hello").unwrap();
    h.events.until_state(TurnState::Thinking).await;
    h.orchestrator.speech_started().unwrap();
    h.events.until_state(TurnState::Listening).await;

    let model = h.model.clone();
    wait_until(|| model.hang_dropped()).await;
    assert_eq!(h.renderer.calls(), vec![RenderCall::Stop]);
}

#[tokio::test]
async fn test_barge_in_discards_old_turn() {
    let model = ScriptedModel::new([
        Reply::Tokens(vec!["[happy] One. ", "Two. ", "Three."]),
        Reply::Tokens(vec!["[neutral] Sure."]),
    ]);
    let synth = GatedSynthesizer::closed();
    let mut h = Harness::start(model, synth.clone());

    h.orchestrator.accept_user_text("first").unwrap();
    h.events
        .until(|e| matches!(e, TurnEvent::AssistantDone(_)))
        .await;
    let snapshot = h.orchestrator.snapshot().await.unwrap();
    assert_eq!(snapshot.state, TurnState::Speaking);
    assert_eq!(snapshot.outstanding, 3);

    h.orchestrator.speech_started().unwrap();
    h.events.until_state(TurnState::Listening).await;
    h.orchestrator.speech_ended().unwrap();
    h.events.until_state(TurnState::Transcribing).await;
    h.orchestrator.transcribed("second").unwrap();
    h.events.until_state(TurnState::Thinking).await;

    synth.release(10);
    h.events.until_state(TurnState::Idle).await;

    assert_eq!(h.renderer.spoken(), vec!["Sure."]);
    let stop = h.renderer.calls().iter().position(|c| *c == RenderCall::Stop);
    let speak = h
        .renderer
        .calls()
        .iter()
        .position(|c| *c == RenderCall::Speak("Sure.".to_string()));
    assert!(stop < speak);

    let snapshot = h.orchestrator.snapshot().await.unwrap();
    assert_eq!(snapshot.outstanding, 0);
    assert_eq!(
        snapshot.history,
        vec![
            Message::user("first"),
            Message::assistant("One. Two. Three."),
            Message::user("second"),
            Message::assistant("Sure."),
        ]
    );
}

#[tokio::test]
async fn test_new_text_interrupts_speaking_turn() {
    let model = ScriptedModel::new([
        Reply::Tokens(vec!["[neutral] A long answer. With more."]),
        Reply::Tokens(vec!["[neutral] Short."]),
    ]);
    let synth = GatedSynthesizer::closed();
    let mut h = Harness::start(model, synth.clone());

    h.orchestrator.accept_user_text("one").unwrap();
    h.events.until_state(TurnState::Speaking).await;
    h.orchestrator.accept_user_text("two").unwrap();
    h.events
        .until(|e| *e == TurnEvent::UserSpeech("two".to_string()))
        .await;

    synth.release(10);
    h.events.until_state(TurnState::Idle).await;
    assert_eq!(h.renderer.spoken(), vec!["Short."]);
}

#[tokio::test]
async fn test_barge_in_during_grace_delay_cancels_finish() {
    let turn = TurnConfig {
        finish_grace: Duration::from_millis(300),
        ..fast_turn_config()
    };
    let model = ScriptedModel::new([
        Reply::Tokens(vec!["[neutral] First."]),
        Reply::Tokens(vec!["[neutral] Second."]),
    ]);
    let mut h = Harness::start_with(turn, model, GatedSynthesizer::open());

    h.orchestrator.accept_user_text("one").unwrap();
    h.events
        .until(|e| matches!(e, TurnEvent::AssistantDone(_)))
        .await;
    let renderer = h.renderer.clone();
    wait_until(|| renderer.spoken() == vec!["First.".to_string()]).await;
    let snapshot = h.orchestrator.snapshot().await.unwrap();
    assert_eq!(snapshot.state, TurnState::Speaking);
    assert_eq!(snapshot.outstanding, 0);

    h.orchestrator.speech_started().unwrap();
    h.events.until_state(TurnState::Listening).await;
    h.events.drain_for(Duration::from_millis(400)).await;
    assert_eq!(
        h.orchestrator.snapshot().await.unwrap().state,
        TurnState::Listening
    );
    assert!(!h.events.states().contains(&TurnState::Idle));

    h.orchestrator.transcribed("two").unwrap();
    h.events.until_state(TurnState::Idle).await;

    assert_eq!(h.renderer.spoken(), vec!["First.", "Second."]);
    let idles = h
        .events
        .states()
        .into_iter()
        .filter(|s| *s == TurnState::Idle)
        .count();
    assert_eq!(idles, 1);
}

#[tokio::test]
async fn test_interrupt_is_idempotent() {
    let model = ScriptedModel::new([]);
    let h = Harness::start(model, GatedSynthesizer::open());

    h.orchestrator.interrupt().unwrap();
    h.orchestrator.interrupt().unwrap();
    let snapshot = h.orchestrator.snapshot().await.unwrap();

    assert_eq!(snapshot.state, TurnState::Idle);
    assert_eq!(snapshot.outstanding, 0);
    assert_eq!(h.renderer.calls(), vec![RenderCall::Stop, RenderCall::Stop]);
}

// -- history ---------------------------------------------------------------------

#[tokio::test]
async fn test_history_is_bounded() {
    let turn = TurnConfig {
        max_history: 4,
        ..fast_turn_config()
    };
    let model = ScriptedModel::new([]);
    let mut h = Harness::start_with(turn, model, GatedSynthesizer::open());

    for text in ["one", "two", "three"] {
        h.orchestrator.accept_user_text(text).unwrap();
        h.events.until_state(TurnState::Idle).await;
    }

    let snapshot = h.orchestrator.snapshot().await.unwrap();
    assert_eq!(
        snapshot.history,
        vec![
            Message::user("two"),
            Message::assistant("Okay."),
            Message::user("three"),
            Message::assistant("Okay."),
        ]
    );

    let last = h.model.requests().pop().unwrap();
    assert_eq!(last.len(), 5);
    assert_eq!(last[0], Message::system("test prompt"));
    assert_eq!(last[4], Message::user("three"));
}

#[tokio::test]
async fn test_clear_conversation() {
    let model = ScriptedModel::new([]);
    let mut h = Harness::start(model, GatedSynthesizer::open());

    h.orchestrator.accept_user_text("remember me").unwrap();
    h.events.until_state(TurnState::Idle).await;
    h.orchestrator.clear_conversation().unwrap();

    assert!(h.orchestrator.snapshot().await.unwrap().history.is_empty());
}

// -- listening and transcription -------------------------------------------------

#[tokio::test]
async fn test_listening_delegates_to_transcriber() {
    let model = ScriptedModel::new([]);
    let mut h = Harness::start(model, GatedSynthesizer::open());

    h.orchestrator.start_listening().unwrap();
    h.events.until_state(TurnState::Listening).await;
    let transcriber = h.transcriber.clone();
    wait_until(|| transcriber.starts.load(Ordering::SeqCst) == 1).await;

    h.orchestrator.stop_listening().unwrap();
    h.events.until_state(TurnState::Idle).await;
    assert_eq!(h.transcriber.pauses.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_transcription_failure_ends_turn() {
    let model = ScriptedModel::new([]);
    let mut h = Harness::start(model, GatedSynthesizer::open());

    h.orchestrator.handle_stt_event(SttEvent::SpeechStart).unwrap();
    h.orchestrator.handle_stt_event(SttEvent::SpeechEnd).unwrap();
    h.events.until_state(TurnState::Transcribing).await;
    h.orchestrator
        .handle_stt_event(SttEvent::Error(SttError::Unreachable("refused".to_string())))
        .unwrap();
    h.events
        .until(|e| matches!(e, TurnEvent::Error(_)))
        .await;

    assert_eq!(h.events.states().last(), Some(&TurnState::Idle));
    assert_eq!(
        h.events.errors(),
        vec!["STT error: cannot reach transcription service: refused"]
    );
    assert!(h.model.requests().is_empty());
}

#[tokio::test]
async fn test_start_failure_is_reported() {
    let model = ScriptedModel::new([]);
    let mut h = Harness::start(model, GatedSynthesizer::open());
    *h.transcriber.fail_with.lock().unwrap() = Some(SttError::PermissionDenied);

    h.orchestrator.start_listening().unwrap();
    let error = h
        .events
        .until(|e| matches!(e, TurnEvent::Error(_)))
        .await;

    assert_eq!(
        error,
        TurnEvent::Error(format!("STT error: {}", SttError::PermissionDenied))
    );
    assert_eq!(h.orchestrator.snapshot().await.unwrap().state, TurnState::Idle);
}

#[tokio::test]
async fn test_transcription_starts_a_turn() {
    let model = ScriptedModel::new([Reply::Tokens(vec!["[neutral] Heard you."])]);
    let mut h = Harness::start(model, GatedSynthesizer::open());

    h.orchestrator
        .handle_stt_event(SttEvent::Transcription("testing".to_string()))
        .unwrap();
    h.events.until_state(TurnState::Idle).await;

    assert_eq!(h.renderer.spoken(), vec!["Heard you."]);
}

// -- mood and lifecycle ----------------------------------------------------------

#[tokio::test]
async fn test_mood_decays_to_neutral() {
    let turn = TurnConfig {
        mood_decay: Duration::from_millis(40),
        ..fast_turn_config()
    };
    let model = ScriptedModel::new([Reply::Tokens(vec!["[sad] Oh no."])]);
    let mut h = Harness::start_with(turn, model, GatedSynthesizer::open());

    h.orchestrator.accept_user_text("News").unwrap();
    h.events.until_state(TurnState::Idle).await;

    let renderer = h.renderer.clone();
    wait_until(|| renderer.calls().contains(&RenderCall::Mood(Emotion::Neutral))).await;
    let moods: Vec<_> = h
        .renderer
        .calls()
        .into_iter()
        .filter(|c| matches!(c, RenderCall::Mood(_)))
        .collect();
    assert_eq!(
        moods,
        vec![RenderCall::Mood(Emotion::Sad), RenderCall::Mood(Emotion::Neutral)]
    );
}

#[tokio::test]
async fn test_shutdown_stops_the_task() {
    let model = ScriptedModel::new([]);
    let h = Harness::start(model, GatedSynthesizer::open());

    h.orchestrator.shutdown().unwrap();
    tokio::time::timeout(WAIT, async {
        while h.orchestrator.interrupt().is_ok() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
    assert!(h.orchestrator.snapshot().await.is_err());
}
