//! Anti-stall recovery.
//!
//! A candidate that looks usable but keeps failing in the sink is probably
//! blocked by something the frame does not show (a stale cue, an open
//! dialog). After `threshold` consecutive failures the coordinator sends one
//! interrupt code instead of attempting the action again.
//!
//! Only sink-reported failures count. A visually ready action that simply
//! loses selection to another one is not stalled.

use crate::error::Result;
use crate::registry::{ActionRuntimeRegistry, ActionRuntimeState};

pub const DEFAULT_STALL_THRESHOLD: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StallCheck {
    Proceed,
    Intervene,
}

#[derive(Debug, Clone)]
pub struct StallRecovery {
    threshold: u32,
    interrupt_code: String,
}

impl StallRecovery {
    pub fn new(threshold: u32, interrupt_code: impl Into<String>) -> Self {
        Self {
            threshold: threshold.max(1),
            interrupt_code: interrupt_code.into(),
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn interrupt_code(&self) -> &str {
        &self.interrupt_code
    }

    /// Decide, before execution, whether `candidate` should be attempted.
    pub fn check(&self, candidate: &ActionRuntimeState) -> StallCheck {
        if candidate.consecutive_failures() >= self.threshold {
            StallCheck::Intervene
        } else {
            StallCheck::Proceed
        }
    }

    /// Count a failed attempt. Returns the new streak, or `None` when the
    /// candidate did not look ready and the failure is not counted.
    pub fn record_failure(
        &self,
        registry: &mut ActionRuntimeRegistry,
        id: &str,
        visually_ready: bool,
    ) -> Result<Option<u32>> {
        if !visually_ready {
            return Ok(None);
        }
        registry.record_failure(id).map(Some)
    }

    /// Clear the streak once the interrupt has been issued.
    pub fn acknowledge(&self, registry: &mut ActionRuntimeRegistry, id: &str) -> Result<()> {
        registry.reset_failures(id)
    }
}

impl Default for StallRecovery {
    fn default() -> Self {
        Self::new(DEFAULT_STALL_THRESHOLD, "Escape")
    }
}
