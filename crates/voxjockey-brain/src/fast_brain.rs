use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use tokio::sync::{mpsc, oneshot};

use voxjockey_foundation::config::{Config, ConfigCell};
use voxjockey_osc::{OscBroadcaster, PromptResult};
use voxjockey_stt::types::TextToken;
use voxjockey_telemetry::PipelineMetrics;

use crate::buffers::{AccumulationBuffer, ContextBuffer};
use crate::llm_client::{parse_json_response, ChatMessage, LlmClient};

/// Minimum accumulated characters before a sentence-boundary or length-only
/// flush may fire (§4.C). Not part of `Config`: the distilled spec gives it
/// a fixed default with no user-adjustable range, unlike `fast_rate_s`.
pub const DEFAULT_MIN_CHARS: usize = 15;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

const SYSTEM_PROMPT: &str = "You are the reactive visual imagination of a live conversation. \
Given recent context and the latest fragment of speech, respond with a single JSON object \
with exactly three string fields: prompt, style, mood. prompt is a short SDXL-style image \
prompt; style is a one- or two-word art style tag; mood is a one-word mood tag. Respond with \
JSON only, no commentary.";

pub type PromptCallback = Arc<dyn Fn(PromptResult) + Send + Sync>;

/// Pause/resume capture for Fast Brain (§3 StageState, §4.C).
#[derive(Debug, Clone, Default)]
pub struct FastBrainState {
    pub ctx_entries: Vec<(Instant, String)>,
    pub accum_tokens: Vec<String>,
    pub accum_first_arrival: Option<Instant>,
    pub user_context: Option<String>,
    pub last_flush_time: Option<Instant>,
}

enum Command {
    GetState(oneshot::Sender<FastBrainState>),
    Stop(oneshot::Sender<()>),
}

pub struct FastBrainHandle {
    cmd_tx: mpsc::Sender<Command>,
    join: tokio::task::JoinHandle<()>,
}

impl FastBrainHandle {
    pub async fn get_state(&self) -> Option<FastBrainState> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx.send(Command::GetState(tx)).await.ok()?;
        rx.await.ok()
    }

    /// Request a clean stop (flushing any pending `accum` first) and join.
    pub async fn stop_and_join(self) {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Stop(tx)).await.is_ok() {
            let _ = tokio::time::timeout(Duration::from_secs(2), rx).await;
        }
        let _ = tokio::time::timeout(Duration::from_secs(2), self.join).await;
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

pub struct FastBrain {
    rx: Receiver<TextToken>,
    config: Arc<ConfigCell>,
    llm: LlmClient,
    osc: Arc<OscBroadcaster>,
    metrics: PipelineMetrics,
    callback: Option<PromptCallback>,
    ctx: ContextBuffer,
    accum: AccumulationBuffer,
    user_context: Option<String>,
    last_flush_time: Option<Instant>,
}

impl FastBrain {
    pub fn new(
        rx: Receiver<TextToken>,
        config: Arc<ConfigCell>,
        llm: LlmClient,
        osc: Arc<OscBroadcaster>,
        metrics: PipelineMetrics,
        callback: Option<PromptCallback>,
        initial_state: Option<FastBrainState>,
    ) -> Self {
        let history_s = config.snapshot().history_s;
        let mut ctx = ContextBuffer::new(Duration::from_secs_f64(history_s));
        let mut accum = AccumulationBuffer::new();
        let mut user_context = None;
        let mut last_flush_time = None;

        if let Some(state) = initial_state {
            ctx.restore(state.ctx_entries);
            accum.restore(state.accum_tokens, state.accum_first_arrival);
            user_context = state.user_context;
            last_flush_time = state.last_flush_time;
        }

        Self {
            rx,
            config,
            llm,
            osc,
            metrics,
            callback,
            ctx,
            accum,
            user_context,
            last_flush_time,
        }
    }

    pub fn spawn(self) -> FastBrainHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(4);
        let join = tokio::spawn(self.run(cmd_rx));
        FastBrainHandle { cmd_tx, join }
    }

    async fn run(mut self, mut cmd_rx: mpsc::Receiver<Command>) {
        let mut interval = tokio::time::interval(POLL_INTERVAL);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.poll_cycle().await;
                }
                Some(cmd) = cmd_rx.recv() => {
                    match cmd {
                        Command::GetState(tx) => {
                            let _ = tx.send(self.snapshot());
                        }
                        Command::Stop(ack) => {
                            if !self.accum.is_empty() && !self.accum.text().trim().is_empty() {
                                let config = self.config.snapshot();
                                self.flush(Instant::now(), &config).await;
                            }
                            let _ = ack.send(());
                            return;
                        }
                    }
                }
            }
        }
    }

    fn snapshot(&self) -> FastBrainState {
        FastBrainState {
            ctx_entries: self.ctx.raw_entries(),
            accum_tokens: self.accum.tokens().to_vec(),
            accum_first_arrival: self.accum.first_arrival(),
            user_context: self.user_context.clone(),
            last_flush_time: self.last_flush_time,
        }
    }

    async fn poll_cycle(&mut self) {
        let now = Instant::now();
        let config = self.config.snapshot();
        self.user_context = config.user_context.clone();
        self.ctx.set_window(Duration::from_secs_f64(config.history_s));

        while let Ok(token) = self.rx.try_recv() {
            self.accum.push(now, token.text.clone());
            self.ctx.push(now, token.text);
        }
        self.ctx.prune(now);

        if self.should_flush(now, &config) {
            self.flush(now, &config).await;
        }
    }

    fn should_flush(&self, now: Instant, config: &Config) -> bool {
        if self.accum.is_empty() {
            return false;
        }
        let fast_rate = Duration::from_secs_f64(config.fast_rate_s);
        let timed_out = self
            .accum
            .first_arrival()
            .map(|t0| now.saturating_duration_since(t0) >= fast_rate)
            .unwrap_or(false);
        if timed_out {
            return true;
        }

        let long_enough = self.accum.char_len() >= DEFAULT_MIN_CHARS;
        if long_enough && self.accum.ends_with_sentence_boundary() {
            return true;
        }
        long_enough
    }

    async fn flush(&mut self, now: Instant, config: &Config) {
        let accum_text = self.accum.text();
        let ctx_text = self.ctx.window_text(now);
        let start = Instant::now();

        let result = self.call_llm(config, &ctx_text, &accum_text).await;
        self.metrics.record_fast_brain_flush(start.elapsed());
        if result.is_none() {
            self.metrics.record_fast_brain_llm_error();
        }
        let result = result.unwrap_or_else(|| PromptResult::fallback(&accum_text));

        if let Some(cb) = &self.callback {
            cb(result.clone());
        }
        self.osc.send_prompt(&result);

        self.accum.reset();
        self.last_flush_time = Some(now);
    }

    async fn call_llm(&self, config: &Config, ctx_text: &str, accum_text: &str) -> Option<PromptResult> {
        let mut user_message = String::new();
        if let Some(ctx) = &config.user_context {
            user_message.push_str("Global context: ");
            user_message.push_str(ctx);
            user_message.push('\n');
        }
        user_message.push_str("Recent conversation: ");
        user_message.push_str(ctx_text);
        user_message.push_str("\nLatest: ");
        user_message.push_str(accum_text);

        let messages = vec![
            ChatMessage {
                role: "system".to_string(),
                content: SYSTEM_PROMPT.to_string(),
            },
            ChatMessage::user(user_message),
        ];

        match tokio::time::timeout(self.llm_timeout(), self.llm.chat_json(&messages)).await {
            Ok(Ok(value)) => Some(value_to_prompt_result(&value, accum_text)),
            Ok(Err(e)) => {
                tracing::warn!("fast brain llm call failed: {}", e);
                None
            }
            Err(_) => {
                tracing::warn!("fast brain llm call timed out");
                None
            }
        }
    }

    fn llm_timeout(&self) -> Duration {
        crate::llm_client::DEFAULT_LLM_TIMEOUT
    }
}

fn value_to_prompt_result(value: &serde_json::Value, raw_text: &str) -> PromptResult {
    let Some(obj) = value.as_object() else {
        return PromptResult::fallback(raw_text);
    };
    let field = |name: &str| obj.get(name).and_then(|v| v.as_str()).map(|s| s.to_string());
    PromptResult::from_partial(field("prompt"), field("style"), field("mood"), raw_text)
}

/// Parse a raw LLM text response (already extracted from the HTTP envelope)
/// the way [`FastBrain::flush`] would, for callers that need the pure
/// fallback function described in §9 without driving the whole brain.
pub fn parse_prompt_response(raw: &str, source_text: &str) -> PromptResult {
    match parse_json_response(raw) {
        Ok(value) => value_to_prompt_result(&value, source_text),
        Err(_) => PromptResult::fallback(source_text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_to_prompt_result_fills_defaults_for_non_object() {
        let value = serde_json::json!("not an object");
        let result = value_to_prompt_result(&value, "hello world");
        assert_eq!(result, PromptResult::fallback("hello world"));
    }

    #[test]
    fn value_to_prompt_result_uses_provided_fields() {
        let value = serde_json::json!({"prompt": "a city", "style": "noir", "mood": "tense"});
        let result = value_to_prompt_result(&value, "source");
        assert_eq!(result.prompt, "a city");
        assert_eq!(result.style, "noir");
        assert_eq!(result.mood, "tense");
    }

    #[test]
    fn parse_prompt_response_falls_back_on_malformed_json() {
        let result = parse_prompt_response("not json", "raw fallback text");
        assert_eq!(result, PromptResult::fallback("raw fallback text"));
    }
}
