use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use tokio::sync::{mpsc, oneshot};

use voxjockey_foundation::config::ConfigCell;
use voxjockey_osc::OscBroadcaster;
use voxjockey_stt::types::TextToken;
use voxjockey_telemetry::PipelineMetrics;

use crate::buffers::TranscriptLog;
use crate::llm_client::LlmClient;

/// Text summary cadence (§4.D).
pub const T_TEXT: Duration = Duration::from_secs(30);
/// Visual-prompt summary cadence (§4.D).
pub const T_VISUAL: Duration = Duration::from_secs(60);
/// Trailing window of the transcript handed to either LLM call (§3).
pub const N_MAX_CHARS: usize = 15_000;

const SUMMARY_TEXT_SYSTEM_PROMPT: &str =
    "Summarize the following live conversation transcript in two or three sentences, \
capturing the topic and tone. Respond with plain text only.";
const SUMMARY_VISUAL_SYSTEM_PROMPT: &str =
    "Describe a single rich visual scene that captures the mood and content of this \
conversation, suitable as an image generation prompt. Respond with plain text only.";

pub type SummaryCallback = Arc<dyn Fn(&str, String) + Send + Sync>;

/// Pause/resume capture for Slow Brain (§3 StageState, §4.D).
#[derive(Debug, Clone, Default)]
pub struct SlowBrainState {
    pub transcript: String,
    pub user_context: Option<String>,
    pub last_text_summary_at: Option<Instant>,
    pub last_visual_summary_at: Option<Instant>,
}

enum Command {
    GetState(oneshot::Sender<SlowBrainState>),
    ResetMemory,
    Stop(oneshot::Sender<()>),
}

pub struct SlowBrainHandle {
    cmd_tx: mpsc::Sender<Command>,
    join: tokio::task::JoinHandle<()>,
}

impl SlowBrainHandle {
    pub async fn get_state(&self) -> Option<SlowBrainState> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx.send(Command::GetState(tx)).await.ok()?;
        rx.await.ok()
    }

    pub async fn reset_memory(&self) {
        let _ = self.cmd_tx.send(Command::ResetMemory).await;
    }

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

pub struct SlowBrain {
    rx: Receiver<TextToken>,
    config: Arc<ConfigCell>,
    llm: LlmClient,
    osc: Arc<OscBroadcaster>,
    metrics: PipelineMetrics,
    callback: Option<SummaryCallback>,
    transcript: TranscriptLog,
    last_text_summary_at: Option<Instant>,
    last_visual_summary_at: Option<Instant>,
}

impl SlowBrain {
    pub fn new(
        rx: Receiver<TextToken>,
        config: Arc<ConfigCell>,
        llm: LlmClient,
        osc: Arc<OscBroadcaster>,
        metrics: PipelineMetrics,
        callback: Option<SummaryCallback>,
        initial_state: Option<SlowBrainState>,
    ) -> Self {
        let mut transcript = TranscriptLog::new();
        let mut last_text_summary_at = None;
        let mut last_visual_summary_at = None;

        if let Some(state) = initial_state {
            transcript.restore(state.transcript);
            last_text_summary_at = state.last_text_summary_at;
            last_visual_summary_at = state.last_visual_summary_at;
        }

        Self {
            rx,
            config,
            llm,
            osc,
            metrics,
            callback,
            transcript,
            last_text_summary_at,
            last_visual_summary_at,
        }
    }

    pub fn spawn(self) -> SlowBrainHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(4);
        let join = tokio::spawn(self.run(cmd_rx));
        SlowBrainHandle { cmd_tx, join }
    }

    async fn run(mut self, mut cmd_rx: mpsc::Receiver<Command>) {
        let mut poll = tokio::time::interval(Duration::from_millis(100));
        let mut text_timer = tokio::time::interval(T_TEXT);
        let mut visual_timer = tokio::time::interval(T_VISUAL);
        // The first tick fires immediately; skip it so the nominal interval
        // starts from spawn time, not from "already elapsed".
        text_timer.tick().await;
        visual_timer.tick().await;

        loop {
            tokio::select! {
                _ = poll.tick() => {
                    self.drain_tokens();
                }
                _ = text_timer.tick() => {
                    self.spawn_summary_tick(SummaryKind::Text);
                }
                _ = visual_timer.tick() => {
                    self.spawn_summary_tick(SummaryKind::Visual);
                }
                Some(cmd) = cmd_rx.recv() => {
                    match cmd {
                        Command::GetState(tx) => {
                            let _ = tx.send(self.snapshot());
                        }
                        Command::ResetMemory => {
                            self.transcript.reset();
                        }
                        Command::Stop(ack) => {
                            let _ = ack.send(());
                            return;
                        }
                    }
                }
            }
        }
    }

    fn snapshot(&self) -> SlowBrainState {
        SlowBrainState {
            transcript: self.transcript.full().to_string(),
            user_context: self.config.snapshot().user_context.clone(),
            last_text_summary_at: self.last_text_summary_at,
            last_visual_summary_at: self.last_visual_summary_at,
        }
    }

    fn drain_tokens(&mut self) {
        while let Ok(token) = self.rx.try_recv() {
            self.transcript.push(&token.text);
        }
    }

    /// Fire an independent task for this tick's LLM call so a slow response
    /// for one timer never delays the other (§4.D).
    fn spawn_summary_tick(&mut self, kind: SummaryKind) {
        if self.transcript.is_empty() {
            return;
        }
        let now = Instant::now();
        match kind {
            SummaryKind::Text => self.last_text_summary_at = Some(now),
            SummaryKind::Visual => self.last_visual_summary_at = Some(now),
        }

        let transcript = self.transcript.trailing(N_MAX_CHARS);
        let llm = self.llm.clone();
        let osc = Arc::clone(&self.osc);
        let metrics = self.metrics.clone();
        let callback = self.callback.clone();

        tokio::spawn(async move {
            let system_prompt = match kind {
                SummaryKind::Text => SUMMARY_TEXT_SYSTEM_PROMPT,
                SummaryKind::Visual => SUMMARY_VISUAL_SYSTEM_PROMPT,
            };
            let address = match kind {
                SummaryKind::Text => "/summary/text",
                SummaryKind::Visual => "/summary/image_prompt",
            };

            match tokio::time::timeout(
                crate::llm_client::DEFAULT_LLM_TIMEOUT,
                llm.generate(system_prompt, &transcript),
            )
            .await
            {
                Ok(Ok(text)) => {
                    match kind {
                        SummaryKind::Text => metrics.record_slow_brain_summary(),
                        SummaryKind::Visual => metrics.record_slow_brain_visual(),
                    }
                    if let Some(cb) = &callback {
                        cb(address, text.clone());
                    }
                    osc.send_text(address, text);
                }
                Ok(Err(e)) => {
                    tracing::warn!("slow brain {:?} llm call failed: {}", kind, e);
                    metrics.record_slow_brain_llm_error();
                }
                Err(_) => {
                    tracing::warn!("slow brain {:?} llm call timed out, abandoning this tick", kind);
                    metrics.record_slow_brain_llm_error();
                }
            }
        });
    }
}

#[derive(Debug, Clone, Copy)]
enum SummaryKind {
    Text,
    Visual,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffers::TranscriptLog;

    #[test]
    fn transcript_log_is_the_trailing_n_max_chars() {
        let mut log = TranscriptLog::new();
        for _ in 0..20_000 {
            log.push("a");
        }
        assert_eq!(log.trailing(N_MAX_CHARS).len(), N_MAX_CHARS);
    }
}
