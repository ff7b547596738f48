//! Job phase state machine.

use std::fmt;

/// Where a job currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Queued,
    Downloading,
    Compiling,
    Storing,
    Complete,
    Failed,
}

impl Phase {
    fn rank(self) -> u8 {
        match self {
            Phase::Queued => 0,
            Phase::Downloading => 1,
            Phase::Compiling => 2,
            Phase::Storing => 3,
            Phase::Complete | Phase::Failed => 4,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Complete | Phase::Failed)
    }

    /// Allowed moves:
    ///
    /// - forward through Queued, Downloading, Compiling, Storing (phases may
    ///   be skipped, e.g. a playground compile has no download)
    /// - Complete from Storing, or from Downloading for source fetches that
    ///   publish nothing
    /// - Failed from any non-terminal phase
    pub fn can_advance_to(self, next: Phase) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            Phase::Failed => true,
            Phase::Complete => matches!(self, Phase::Storing | Phase::Downloading),
            Phase::Queued => false,
            _ => next.rank() > self.rank(),
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Queued => "queued",
            Phase::Downloading => "downloading",
            Phase::Compiling => "compiling",
            Phase::Storing => "storing",
            Phase::Complete => "complete",
            Phase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Tracks one job's phase and rejects illegal transitions.
#[derive(Debug)]
pub struct PhaseTracker {
    current: Phase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal phase transition {from} -> {to}")]
pub struct IllegalTransition {
    pub from: Phase,
    pub to: Phase,
}

impl PhaseTracker {
    pub fn new() -> Self {
        Self {
            current: Phase::Queued,
        }
    }

    pub fn current(&self) -> Phase {
        self.current
    }

    pub fn advance(&mut self, next: Phase) -> Result<(), IllegalTransition> {
        if !self.current.can_advance_to(next) {
            return Err(IllegalTransition {
                from: self.current,
                to: next,
            });
        }
        self.current = next;
        Ok(())
    }
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}
