//! Full listen/reply iterations over a real audio ring with scripted
//! recognizer, engine and speaker.

use crate::helpers::{
    CharEngine, RecordingSpeaker, ScriptedRecognizer, chars, push_finished_utterance, small_config,
};
use talkback::audio::{AudioRing, AudioSource};
use talkback::config::TalkConfig;
use talkback::gate::IgnoreReason;
use talkback::pipeline::messages::TurnPhase;
use talkback::{StepOutcome, TalkEvent, TurnController};

fn ring_for(config: &TalkConfig) -> AudioRing {
    AudioRing::new(config.audio.buffer_ms, config.audio.sample_rate)
}

fn history_ends_with(controller: &TurnController<'_, CharEngine>, text: &str) -> bool {
    controller.state().history().ends_with(&chars(text))
}

#[test]
fn wake_command_opens_a_turn() {
    let mut config = small_config();
    config.conversation.wake_command = "hello bot".to_owned();
    let mut engine = CharEngine::new(512);
    engine.script_reply("ten past two");
    let mut controller = TurnController::start(&config, engine).unwrap();

    let ring = ring_for(&config);
    push_finished_utterance(&ring);
    let mut stt = ScriptedRecognizer::new(&["hello bot what time is it"]);
    let mut speaker = RecordingSpeaker::default();

    let outcome = controller.step(&ring, &mut stt, &mut speaker).unwrap();
    match outcome {
        StepOutcome::Replied(reply) => assert_eq!(reply.text, "ten past two"),
        other => panic!("expected a reply, got {other:?}"),
    }
    assert_eq!(speaker.lines, vec!["ten past two"]);
    assert!(ring.is_empty());
    assert!(history_ends_with(&controller, "|U:what time is it|B:ten past two"));
}

#[test]
fn speech_without_wake_command_is_dropped() {
    let mut config = small_config();
    config.conversation.wake_command = "hello bot".to_owned();
    let mut controller = TurnController::start(&config, CharEngine::new(512)).unwrap();
    let batches_before = controller.engine().batches.len();
    let history_before = controller.state().history().len();

    let ring = ring_for(&config);
    push_finished_utterance(&ring);
    let mut stt = ScriptedRecognizer::new(&["goodbye now"]);
    let mut speaker = RecordingSpeaker::default();

    let outcome = controller.step(&ring, &mut stt, &mut speaker).unwrap();
    assert!(matches!(
        outcome,
        StepOutcome::Ignored(IgnoreReason::WakeMismatch { .. })
    ));
    assert!(ring.is_empty());
    assert!(speaker.lines.is_empty());
    assert_eq!(controller.engine().batches.len(), batches_before);
    assert_eq!(controller.state().history().len(), history_before);
}

#[test]
fn annotations_are_stripped_before_prompting() {
    let config = small_config();
    let mut engine = CharEngine::new(512);
    engine.script_reply("hey");
    let mut controller = TurnController::start(&config, engine).unwrap();

    let ring = ring_for(&config);
    push_finished_utterance(&ring);
    let mut stt = ScriptedRecognizer::new(&["[laughs] Hello (to you)!!\nok"]);
    let mut speaker = RecordingSpeaker::default();

    controller.step(&ring, &mut stt, &mut speaker).unwrap();
    assert!(history_ends_with(&controller, "|U:Hello !!|B:hey"));
}

#[test]
fn acknowledgement_is_spoken_before_reply() {
    let mut config = small_config();
    config.conversation.heard_ok = "mm-hm".to_owned();
    let mut engine = CharEngine::new(512);
    engine.script_reply("sure");
    let mut controller = TurnController::start(&config, engine).unwrap();

    let ring = ring_for(&config);
    push_finished_utterance(&ring);
    let mut stt = ScriptedRecognizer::new(&["can you help"]);
    let mut speaker = RecordingSpeaker::default();

    controller.step(&ring, &mut stt, &mut speaker).unwrap();
    assert_eq!(speaker.lines, vec!["mm-hm", "sure"]);
}

#[test]
fn annotation_only_transcript_says_nothing() {
    let config = small_config();
    let mut controller = TurnController::start(&config, CharEngine::new(512)).unwrap();
    let history_before = controller.state().history().len();

    let ring = ring_for(&config);
    push_finished_utterance(&ring);
    let mut stt = ScriptedRecognizer::new(&["[BLANK_AUDIO]"]);
    let mut speaker = RecordingSpeaker::default();

    let outcome = controller.step(&ring, &mut stt, &mut speaker).unwrap();
    assert_eq!(outcome, StepOutcome::NothingToSay);
    assert!(ring.is_empty());
    assert_eq!(controller.state().history().len(), history_before);
}

#[test]
fn recognizer_failure_keeps_listening() {
    let config = small_config();
    let mut engine = CharEngine::new(512);
    engine.script_reply("back again");
    let mut controller = TurnController::start(&config, engine).unwrap();

    let ring = ring_for(&config);
    let mut stt = ScriptedRecognizer::new(&[]);
    let mut speaker = RecordingSpeaker::default();

    push_finished_utterance(&ring);
    let outcome = controller.step(&ring, &mut stt, &mut speaker).unwrap();
    assert_eq!(
        outcome,
        StepOutcome::Ignored(IgnoreReason::TranscriptionFailed)
    );
    assert!(ring.is_empty());

    stt.transcripts.push_back("are you there".to_owned());
    push_finished_utterance(&ring);
    let outcome = controller.step(&ring, &mut stt, &mut speaker).unwrap();
    assert!(matches!(outcome, StepOutcome::Replied(ref r) if r.text == "back again"));
    assert_eq!(stt.calls, 2);
}

#[test]
fn quiet_ring_accumulates_until_speech_ends() {
    let config = small_config();
    let mut controller = TurnController::start(&config, CharEngine::new(512)).unwrap();

    let ring = ring_for(&config);
    ring.push(&[0.25; 1_600]);
    let mut stt = ScriptedRecognizer::new(&["unused"]);
    let mut speaker = RecordingSpeaker::default();

    let outcome = controller.step(&ring, &mut stt, &mut speaker).unwrap();
    assert_eq!(outcome, StepOutcome::NoSpeech);
    assert_eq!(ring.len(), 1_600);
    assert_eq!(stt.calls, 0);
}

#[test]
fn run_stops_when_cancelled() {
    let config = small_config();
    let (tx, rx) = crossbeam_channel::unbounded();
    let mut controller = TurnController::start(&config, CharEngine::new(512))
        .unwrap()
        .with_events(tx);
    controller.cancel_token().cancel();

    let ring = ring_for(&config);
    let mut stt = ScriptedRecognizer::new(&[]);
    let mut speaker = RecordingSpeaker::default();
    controller.run(&ring, &mut stt, &mut speaker).unwrap();

    let phases: Vec<TurnPhase> = rx
        .try_iter()
        .filter_map(|e| match e {
            TalkEvent::Phase(p) => Some(p),
            _ => None,
        })
        .collect();
    assert_eq!(phases, vec![TurnPhase::Listening, TurnPhase::Idle]);
    assert_eq!(controller.phase(), TurnPhase::Idle);
}

#[test]
fn cancel_during_reply_speaks_the_partial_text() {
    let mut config = small_config();
    config.conversation.heard_ok = String::new();
    let mut engine = CharEngine::new(512);
    engine.script_reply("one two");
    let (tx, rx) = crossbeam_channel::unbounded();
    let mut controller = TurnController::start(&config, engine)
        .unwrap()
        .with_events(tx);
    // Turn fragment, then the decodes of 'o' and 'n'.
    let cancel = controller.cancel_token();
    controller.engine_mut().cancel_after(3, cancel);

    let ring = ring_for(&config);
    push_finished_utterance(&ring);
    let mut stt = ScriptedRecognizer::new(&["hello"]);
    let mut speaker = RecordingSpeaker::default();
    controller.run(&ring, &mut stt, &mut speaker).unwrap();

    assert_eq!(speaker.lines, vec!["on"]);
    let replies: Vec<(String, bool)> = rx
        .try_iter()
        .filter_map(|e| match e {
            TalkEvent::Reply { text, interrupted } => Some((text, interrupted)),
            _ => None,
        })
        .collect();
    assert_eq!(replies, vec![("on".to_owned(), true)]);

    let history = controller.state().history();
    assert!(history_ends_with(&controller, "|U:hello|B:on"));
    assert_eq!(controller.state().n_past(), history.len());
    assert_eq!(controller.engine().positions, history);
    assert!(ring.is_empty());
    assert_eq!(controller.phase(), TurnPhase::Idle);
}

#[test]
fn heard_event_carries_recognizer_confidence() {
    let config = small_config();
    let mut engine = CharEngine::new(512);
    engine.script_reply("yes");
    let (tx, rx) = crossbeam_channel::unbounded();
    let mut controller = TurnController::start(&config, engine)
        .unwrap()
        .with_events(tx);

    let ring = ring_for(&config);
    push_finished_utterance(&ring);
    let mut stt = ScriptedRecognizer::new(&["are you awake"]);
    let mut speaker = RecordingSpeaker::default();
    controller.step(&ring, &mut stt, &mut speaker).unwrap();

    let heard: Vec<(String, Option<f32>)> = rx
        .try_iter()
        .filter_map(|e| match e {
            TalkEvent::Heard {
                text, confidence, ..
            } => Some((text, confidence)),
            _ => None,
        })
        .collect();
    assert_eq!(heard, vec![("are you awake".to_owned(), Some(0.9))]);
}
