//! Long conversations in a small context window.

use crate::helpers::{BOS, CharEngine, chars, session_file, small_config};
use talkback::{TalkEvent, TurnController};

const CTX: usize = 64;

#[test]
fn overflow_keeps_prompt_and_stops_persisting() {
    let dir = tempfile::tempdir().unwrap();
    let path = session_file(&dir);
    let mut config = small_config();
    config.llm.context_size = CTX;
    config.llm.session_path = Some(path.clone());

    let mut engine = CharEngine::new(CTX);
    for _ in 0..10 {
        engine.script_reply("ok");
    }
    let (tx, rx) = crossbeam_channel::unbounded();
    let mut controller = TurnController::start(&config, engine).unwrap().with_events(tx);

    // Prompt (8) plus four turns of "|U:hello|B:ok" (13 each) fill 60 of 64.
    for _ in 0..4 {
        let reply = controller.submit_text("hello").unwrap().unwrap();
        assert_eq!(reply.text, "ok");
    }
    assert_eq!(controller.state().n_past(), 60);
    assert!(
        !rx.try_iter()
            .any(|e| matches!(e, TalkEvent::ContextEvicted { .. }))
    );
    let saved_before = std::fs::read_to_string(&path).unwrap();

    for _ in 0..6 {
        let reply = controller.submit_text("hello").unwrap().unwrap();
        assert_eq!(reply.text, "ok");
        assert!(controller.state().n_past() <= CTX);
    }

    let evictions: Vec<usize> = rx
        .try_iter()
        .filter_map(|e| match e {
            TalkEvent::ContextEvicted { n_keep } => Some(n_keep),
            _ => None,
        })
        .collect();
    assert!(!evictions.is_empty());

    let mut prompt = vec![BOS];
    prompt.extend(chars("SYS Fae"));
    assert!(evictions.iter().all(|&n_keep| n_keep == prompt.len()));
    assert_eq!(controller.state().n_keep(), prompt.len());
    assert_eq!(&controller.state().history()[..prompt.len()], prompt.as_slice());
    assert_eq!(&controller.engine().positions[..prompt.len()], prompt.as_slice());

    assert!(!controller.state().session().is_active());
    assert_eq!(std::fs::read_to_string(&path).unwrap(), saved_before);
}

#[test]
fn evicted_context_carries_recent_history() {
    let mut config = small_config();
    config.llm.context_size = CTX;

    let mut engine = CharEngine::new(CTX);
    for _ in 0..5 {
        engine.script_reply("ok");
    }
    let mut controller = TurnController::start(&config, engine).unwrap();
    for _ in 0..5 {
        controller.submit_text("hello").unwrap().unwrap();
    }

    // The fifth turn rebuilt the context: prompt, the last n_prev (8) tokens of
    // "|U:hello|B:ok", then the new turn and its reply.
    let n_keep = controller.state().n_keep();
    let n_past = controller.state().n_past();
    let mut expected = chars("hello|B:ok|U:hello|B:ok");
    expected.drain(..2);
    assert_eq!(n_past, n_keep + expected.len());
    assert_eq!(&controller.engine().positions[n_keep..n_past], expected.as_slice());
}
