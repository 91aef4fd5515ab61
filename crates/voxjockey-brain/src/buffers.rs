use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Time-ordered `(timestamp, text)` pairs bounded by a sliding window
/// `W_context` (§3 ContextBuffer). Pruning is lazy: entries older than
/// `now - window` are skipped by readers but may still sit in the deque
/// until the next `prune`.
#[derive(Debug, Clone)]
pub struct ContextBuffer {
    entries: VecDeque<(Instant, String)>,
    window: Duration,
}

impl ContextBuffer {
    pub fn new(window: Duration) -> Self {
        Self {
            entries: VecDeque::new(),
            window,
        }
    }

    pub fn set_window(&mut self, window: Duration) {
        self.window = window;
    }

    pub fn push(&mut self, now: Instant, text: String) {
        self.entries.push_back((now, text));
    }

    /// Drop entries that have fallen outside the window as of `now`.
    pub fn prune(&mut self, now: Instant) {
        let window = self.window;
        while let Some((ts, _)) = self.entries.front() {
            if now.saturating_duration_since(*ts) > window {
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }

    /// Entries currently inside the window, oldest first. Invariant: never
    /// returns an entry with `ts < now - window` (§8).
    pub fn window_entries(&self, now: Instant) -> Vec<(Instant, String)> {
        self.entries
            .iter()
            .filter(|(ts, _)| now.saturating_duration_since(*ts) <= self.window)
            .cloned()
            .collect()
    }

    /// The window's text, space-joined, oldest first.
    pub fn window_text(&self, now: Instant) -> String {
        self.window_entries(now)
            .into_iter()
            .map(|(_, text)| text)
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn raw_entries(&self) -> Vec<(Instant, String)> {
        self.entries.iter().cloned().collect()
    }

    pub fn restore(&mut self, entries: Vec<(Instant, String)>) {
        self.entries = entries.into_iter().collect();
    }
}

/// Tokens received since the last flush, plus a first-arrival timestamp
/// (§3 AccumulationBuffer). Invariant: `first_arrival` is `None` iff empty.
#[derive(Debug, Clone, Default)]
pub struct AccumulationBuffer {
    tokens: Vec<String>,
    first_arrival: Option<Instant>,
}

impl AccumulationBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, now: Instant, token: String) {
        if self.first_arrival.is_none() {
            self.first_arrival = Some(now);
        }
        self.tokens.push(token);
    }

    pub fn reset(&mut self) {
        self.tokens.clear();
        self.first_arrival = None;
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn first_arrival(&self) -> Option<Instant> {
        self.first_arrival
    }

    pub fn text(&self) -> String {
        self.tokens.join("")
    }

    pub fn char_len(&self) -> usize {
        self.text().chars().count()
    }

    pub fn ends_with_sentence_boundary(&self) -> bool {
        matches!(self.tokens.last().map(|s| s.trim_end()), Some(t) if t.ends_with(['.', '!', '?']))
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    pub fn restore(&mut self, tokens: Vec<String>, first_arrival: Option<Instant>) {
        self.tokens = tokens;
        self.first_arrival = first_arrival;
    }
}

/// Append-only full-session transcript (§3 TranscriptLog). Only
/// `reset_memory`/`stop` may shrink it; the model-call boundary truncates a
/// *read* of the trailing `n_max_chars`, never the log itself.
#[derive(Debug, Clone, Default)]
pub struct TranscriptLog {
    text: String,
}

impl TranscriptLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, token: &str) {
        self.text.push_str(token);
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn reset(&mut self) {
        self.text.clear();
    }

    /// The trailing `n_max_chars` of the log, for the LLM call boundary.
    pub fn trailing(&self, n_max_chars: usize) -> String {
        let total = self.text.chars().count();
        if total <= n_max_chars {
            self.text.clone()
        } else {
            self.text.chars().skip(total - n_max_chars).collect()
        }
    }

    pub fn full(&self) -> &str {
        &self.text
    }

    pub fn restore(&mut self, text: String) {
        self.text = text;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_buffer_excludes_entries_outside_window() {
        let mut ctx = ContextBuffer::new(Duration::from_secs(30));
        let t0 = Instant::now();
        ctx.push(t0, "old".into());
        let later = t0 + Duration::from_secs(40);
        ctx.push(later, "new".into());

        let visible = ctx.window_entries(later);
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].1, "new");
    }

    #[test]
    fn accumulation_buffer_first_arrival_none_iff_empty() {
        let mut accum = AccumulationBuffer::new();
        assert!(accum.first_arrival().is_none());
        accum.push(Instant::now(), "hi".into());
        assert!(accum.first_arrival().is_some());
        accum.reset();
        assert!(accum.first_arrival().is_none());
    }

    #[test]
    fn accumulation_buffer_detects_sentence_boundary() {
        let mut accum = AccumulationBuffer::new();
        accum.push(Instant::now(), "Hello world".into());
        assert!(!accum.ends_with_sentence_boundary());
        accum.push(Instant::now(), ".".into());
        assert!(accum.ends_with_sentence_boundary());
    }

    #[test]
    fn transcript_log_trailing_truncates_from_the_front() {
        let mut log = TranscriptLog::new();
        log.push("abcdefghij");
        assert_eq!(log.trailing(4), "ghij");
        assert_eq!(log.trailing(100), "abcdefghij");
    }

    #[test]
    fn transcript_log_reset_empties_it() {
        let mut log = TranscriptLog::new();
        log.push("hello");
        log.reset();
        assert!(log.is_empty());
    }
}
