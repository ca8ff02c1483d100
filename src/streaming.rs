use strum::{AsRefStr, Display};

/// Lifecycle of one request/response cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, Display)]
#[strum(serialize_all = "snake_case")]
pub enum TurnPhase {
    Idle,
    Requested,
    Streaming,
    Completed,
    Failed,
}

impl TurnPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, TurnPhase::Completed | TurnPhase::Failed)
    }

    /// Whether `next` is a legal successor of this phase.
    pub fn can_advance_to(self, next: TurnPhase) -> bool {
        use TurnPhase::*;
        matches!(
            (self, next),
            (Idle, Requested)
                | (Idle, Failed)
                | (Requested, Streaming)
                | (Requested, Failed)
                | (Streaming, Completed)
                | (Streaming, Failed)
        )
    }
}

/// Tracks phase and accumulated output for a single turn
#[derive(Debug, Clone)]
pub struct StreamAccumulator {
    phase: TurnPhase,
    /// Accumulated text buffer
    text_buffer: String,
    chunks: usize,
}

impl Default for StreamAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self {
            phase: TurnPhase::Idle,
            text_buffer: String::new(),
            chunks: 0,
        }
    }

    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    /// Move to `next`; illegal moves are refused and reported as `false`.
    pub fn advance(&mut self, next: TurnPhase) -> bool {
        if !self.phase.can_advance_to(next) {
            return false;
        }
        self.phase = next;
        true
    }

    /// Record a delta. Only accepted while streaming.
    pub fn push_delta(&mut self, delta: &str) -> bool {
        if self.phase != TurnPhase::Streaming {
            return false;
        }
        self.text_buffer.push_str(delta);
        self.chunks += 1;
        true
    }

    /// Finish cleanly. Returns the text to commit, if there is any.
    pub fn complete(&mut self) -> Option<String> {
        if !self.advance(TurnPhase::Completed) || self.text_buffer.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.text_buffer))
    }

    /// Abandon the turn. Accumulated text is discarded.
    pub fn fail(&mut self) {
        if self.advance(TurnPhase::Failed) {
            self.text_buffer.clear();
        }
    }

    pub fn text(&self) -> &str {
        &self.text_buffer
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn streaming() -> StreamAccumulator {
        let mut acc = StreamAccumulator::new();
        assert!(acc.advance(TurnPhase::Requested));
        assert!(acc.advance(TurnPhase::Streaming));
        acc
    }

    #[test]
    fn happy_path_accumulates_in_order() {
        let mut acc = streaming();
        for delta in ["Hel", "lo ", "there"] {
            assert!(acc.push_delta(delta));
        }
        assert_eq!(acc.text(), "Hello there");
        assert_eq!(acc.chunk_count(), 3);
        assert_eq!(acc.complete().as_deref(), Some("Hello there"));
        assert_eq!(acc.phase(), TurnPhase::Completed);
        assert!(acc.phase().is_terminal());
    }

    #[test]
    fn empty_completion_commits_nothing() {
        let mut acc = streaming();
        assert_eq!(acc.complete(), None);
        assert_eq!(acc.phase(), TurnPhase::Completed);
    }

    #[test]
    fn failure_discards_partial_text() {
        let mut acc = streaming();
        acc.push_delta("partial");
        acc.fail();
        assert_eq!(acc.phase(), TurnPhase::Failed);
        assert_eq!(acc.text(), "");
    }

    #[test]
    fn pre_stream_failure_is_allowed() {
        let mut acc = StreamAccumulator::new();
        acc.advance(TurnPhase::Requested);
        acc.fail();
        assert_eq!(acc.phase(), TurnPhase::Failed);
    }

    #[test]
    fn terminal_phases_are_final() {
        let mut acc = streaming();
        acc.complete();
        assert!(!acc.advance(TurnPhase::Streaming));
        assert!(!acc.push_delta("late"));
        acc.fail();
        assert_eq!(acc.phase(), TurnPhase::Completed);
    }

    #[test]
    fn deltas_before_streaming_are_refused() {
        let mut acc = StreamAccumulator::new();
        assert!(!acc.push_delta("early"));
        assert!(!acc.advance(TurnPhase::Completed));
        assert_eq!(acc.phase().as_ref(), "idle");
    }
}
