use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use voxjockey_brain::fast_brain::DEFAULT_MIN_CHARS;
use voxjockey_brain::llm_client::LlmClient;
use voxjockey_brain::{AccumulationBuffer, FastBrain};
use voxjockey_foundation::config::{Config, ConfigCell};
use voxjockey_osc::{OscBroadcaster, PromptResult};
use voxjockey_stt::types::TextToken;
use voxjockey_telemetry::PipelineMetrics;

fn token(text: &str) -> TextToken {
    TextToken {
        text: text.to_string(),
        emitted_at: Instant::now(),
    }
}

fn unreachable_llm() -> LlmClient {
    // Port 1 is a reserved, never-listening port: connection fails fast
    // instead of hanging, so these tests stay quick without a mock server.
    LlmClient::new("http://127.0.0.1:1", "unused")
}

/// §8 Scenario 2: "Hello", " world", "." totals 12 chars, below
/// `min_chars=15`, so content alone never triggers a sentence-boundary
/// flush — only the timeout does.
#[test]
fn short_sentence_below_min_chars_has_no_content_trigger() {
    let mut accum = AccumulationBuffer::new();
    let now = Instant::now();
    accum.push(now, "Hello".into());
    accum.push(now, " world".into());
    accum.push(now, ".".into());

    assert_eq!(accum.char_len(), 12);
    assert!(accum.char_len() < DEFAULT_MIN_CHARS);
    assert!(accum.ends_with_sentence_boundary());
}

/// §8 Scenario 3: 40 tokens totaling 300 chars with no terminal punctuation
/// crosses `min_chars` and should fire on the length-only trigger.
#[test]
fn long_monologue_crosses_min_chars_without_terminal_punctuation() {
    let mut accum = AccumulationBuffer::new();
    let now = Instant::now();
    for _ in 0..40 {
        accum.push(now, "sevenchr ".into());
    }

    assert!(accum.char_len() >= DEFAULT_MIN_CHARS);
    assert!(!accum.ends_with_sentence_boundary());
}

/// §8 Scenario 4 / §7 kind 5: an unreachable LLM still produces exactly one
/// `PromptResult` per flush, derived from the raw accumulated text.
#[tokio::test]
async fn unreachable_llm_still_emits_a_fallback_prompt() {
    let (tx, rx) = crossbeam_channel::unbounded();
    tx.send(token("Hello world.")).unwrap();

    let config = Config {
        fast_rate_s: 0.2,
        history_s: 30.0,
        ..Config::default()
    };
    let config_cell = Arc::new(ConfigCell::new(config));
    let osc = Arc::new(OscBroadcaster::new("127.0.0.1", 19_999, PipelineMetrics::default()).unwrap());

    let results: Arc<Mutex<Vec<PromptResult>>> = Arc::new(Mutex::new(Vec::new()));
    let results_for_cb = Arc::clone(&results);
    let callback: voxjockey_brain::PromptCallback =
        Arc::new(move |r: PromptResult| results_for_cb.lock().unwrap().push(r));

    let brain = FastBrain::new(
        rx,
        config_cell,
        unreachable_llm(),
        osc,
        PipelineMetrics::default(),
        Some(callback),
        None,
    );
    let handle = brain.spawn();

    tokio::time::sleep(Duration::from_secs(1)).await;
    handle.stop_and_join().await;

    let collected = results.lock().unwrap();
    assert_eq!(collected.len(), 1);
    assert_eq!(collected[0].prompt, "Hello world.");
    assert_eq!(collected[0].style, voxjockey_osc::DEFAULT_STYLE);
    assert_eq!(collected[0].mood, voxjockey_osc::DEFAULT_MOOD);
}

/// §8 round-trip property: `get_state()` after feeding tokens returns a
/// non-empty snapshot that a fresh brain can be restored from.
#[tokio::test]
async fn get_state_returns_the_fed_accumulation() {
    let (tx, rx) = crossbeam_channel::unbounded();
    tx.send(token("partial")).unwrap();

    let config = Config {
        fast_rate_s: 50.0,
        history_s: 50.0,
        ..Config::default()
    };
    let config_cell = Arc::new(ConfigCell::new(config));
    let osc = Arc::new(OscBroadcaster::new("127.0.0.1", 19_999, PipelineMetrics::default()).unwrap());

    let brain = FastBrain::new(
        rx,
        config_cell,
        unreachable_llm(),
        osc,
        PipelineMetrics::default(),
        None,
        None,
    );
    let handle = brain.spawn();
    tokio::time::sleep(Duration::from_millis(250)).await;

    let state = handle.get_state().await.expect("brain still running");
    assert!(!state.accum_tokens.is_empty());
    assert!(state.accum_first_arrival.is_some());

    handle.stop_and_join().await;
}
