//! Client input management: live capture or replay, optional recording, and
//! pacing of `PLAY` submissions.

use shared::input::{Control, InputCapture, TickLine};
use shared::protocol::input_bits;
use shared::record::{RecordEncoder, RecordError, Recording, Replayer};
use std::time::Duration;
use tokio::time::Instant;

/// Default gap the client aims for between two input submissions.
pub const DEFAULT_ROUND_TRIP_BUDGET: Duration = Duration::from_millis(32);

enum InputSource {
    /// Key events fed through the capture automata.
    Live(InputCapture),
    /// Tick lines read back from a recording. Idle once exhausted.
    Replay(Replayer),
}

/// Produces one tick line per submission and optionally records it
pub struct InputManager {
    source: InputSource,
    recorder: Option<RecordEncoder>,
    replay_done: bool,
    /// Set by [`InputManager::request_goal_reset`], consumed by the next mask.
    goal_reset: bool,
}

impl InputManager {
    /// Live capture with no keys pressed until events arrive.
    pub fn live() -> Self {
        Self {
            source: InputSource::Live(InputCapture::new()),
            recorder: None,
            replay_done: false,
            goal_reset: false,
        }
    }

    pub fn replay(recording: &Recording) -> Self {
        Self {
            source: InputSource::Replay(Replayer::new(recording)),
            recorder: None,
            replay_done: false,
            goal_reset: false,
        }
    }

    /// Also records every line this manager produces.
    pub fn with_recorder(mut self) -> Self {
        self.recorder = Some(RecordEncoder::new());
        self
    }

    /// Feeds a physical key-down. Ignored while replaying.
    pub fn press(&mut self, control: Control) {
        if let InputSource::Live(capture) = &mut self.source {
            capture.press(control);
        }
    }

    /// Feeds a physical key-up. Ignored while replaying.
    pub fn release(&mut self, control: Control) {
        if let InputSource::Live(capture) = &mut self.source {
            capture.release(control);
        }
    }

    pub fn replay_done(&self) -> bool {
        self.replay_done
    }

    pub fn next_line(&mut self) -> Result<TickLine, RecordError> {
        let line = match &mut self.source {
            InputSource::Live(capture) => capture.poll(),
            InputSource::Replay(replayer) => match replayer.next_line()? {
                Some(line) => line,
                None => {
                    self.replay_done = true;
                    TickLine::default()
                }
            },
        };
        if let Some(recorder) = &mut self.recorder {
            recorder.push(line);
        }
        Ok(line)
    }

    /// Asks the server to move the goal on the next submission. Works in
    /// replay too; the request is not part of the recorded tick lines.
    pub fn request_goal_reset(&mut self) {
        self.goal_reset = true;
    }

    /// Next `PLAY` input byte.
    pub fn next_mask(&mut self) -> Result<u8, RecordError> {
        let mut mask = self.next_line()?.play_mask();
        if std::mem::take(&mut self.goal_reset) {
            mask |= input_bits::GOAL_RESET;
        }
        Ok(mask)
    }

    /// Finishes recording, if enabled.
    pub fn take_recording(&mut self) -> Option<Recording> {
        self.recorder.take().map(RecordEncoder::finish)
    }
}

/// Spaces out input submissions against a round-trip budget.
#[derive(Debug, Clone)]
pub struct Pacer {
    budget: Duration,
    last_sent: Option<Instant>,
}

impl Pacer {
    pub fn new(budget: Duration) -> Self {
        Self {
            budget,
            last_sent: None,
        }
    }

    pub fn mark_sent(&mut self, now: Instant) {
        self.last_sent = Some(now);
    }

    /// Delay before the next submission: what is left of the budget since
    /// the last one, never negative.
    pub fn next_delay(&self, now: Instant) -> Duration {
        match self.last_sent {
            Some(sent) => self.budget.saturating_sub(now.saturating_duration_since(sent)),
            None => Duration::ZERO,
        }
    }
}

impl Default for Pacer {
    fn default() -> Self {
        Self::new(DEFAULT_ROUND_TRIP_BUDGET)
    }
}
