//! Crash-loop detection for formulas
//!
//! TigerStyle: Explicit state machine, wrapping counters with named bounds.
//!
//! A dispatcher tags every report it sends to a formula with a sequence id.
//! When the formula fails on a report it sends the id back in a poison
//! notification. Failures on consecutive ids mean the formula fails on every
//! report it gets, and the dispatcher restarts it.

use wattflow_core::constants::SEQUENCE_ID_MAX;

/// State of a blocking detector
///
/// ```text
///   Init --> BlockedInter1 --> BlockedInter2 --> Blocked --> Final
///                 ^                  |
///                 +-- non-consecutive+
/// ```
///
/// `Blocked` and `Final` never go back on a non-consecutive poison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockingState {
    #[default]
    Init,
    BlockedInter1,
    BlockedInter2,
    Blocked,
    Final,
}

impl BlockingState {
    fn advance(self) -> Self {
        match self {
            Self::Init => Self::BlockedInter1,
            Self::BlockedInter1 => Self::BlockedInter2,
            Self::BlockedInter2 => Self::Blocked,
            Self::Blocked | Self::Final => Self::Final,
        }
    }

    fn is_latched(self) -> bool {
        matches!(self, Self::Blocked | Self::Final)
    }
}

/// Per-formula crash-loop detector
#[derive(Debug, Clone, Default)]
pub struct BlockingDetector {
    state: BlockingState,
    /// Last poison id observed; `-1` stands for the id before 0 after a wrap
    last_poison_seq: Option<i64>,
    next_seq: u32,
}

impl BlockingDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state
    pub fn state(&self) -> BlockingState {
        self.state
    }

    /// Feed a poison notification's sequence id
    pub fn notify_poison_received(&mut self, seq: u32) {
        debug_assert!(seq < SEQUENCE_ID_MAX, "sequence id out of range");

        match self.last_poison_seq {
            None => self.state = BlockingState::BlockedInter1,
            Some(last) if i64::from(seq) == last + 1 => self.state = self.state.advance(),
            Some(_) => {
                if !self.state.is_latched() {
                    self.state = BlockingState::BlockedInter1;
                }
            }
        }

        self.last_poison_seq = if seq == SEQUENCE_ID_MAX - 1 {
            Some(-1)
        } else {
            Some(i64::from(seq))
        };
    }

    /// Check if the formula is in a crash loop
    ///
    /// Only `Blocked` counts: a formula that keeps failing moves on to
    /// `Final` and is no longer reported as blocked.
    pub fn is_blocked(&self) -> bool {
        self.state == BlockingState::Blocked
    }

    /// Next sequence id to tag an outgoing report with
    pub fn next_seq_id(&mut self) -> u32 {
        let seq = self.next_seq;
        self.next_seq = (self.next_seq + 1) % SEQUENCE_ID_MAX;
        debug_assert!(seq < SEQUENCE_ID_MAX);
        seq
    }
}
