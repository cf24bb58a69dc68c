//! Power-cut injection points for the crash-scenario harness.
//!
//! An armed point makes the engine return [`fj_error::JrnlError::PowerCut`]
//! at the matching spot in the commit or replay path, leaving the disk
//! exactly as a real power loss there would. A point only fires while the
//! store holds journaled data, so empty transactions pass through.
//! Dropping the instance and remounting the same device models the reboot.

use serde::{Deserialize, Serialize};

/// Where the simulated power loss strikes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CutPoint {
    /// Leave the transaction OPEN instead of starting the commit.
    SkipCommit,
    /// Cut right after the COMMIT status reaches the master sector.
    AfterCommitMark,
    /// Cut after the first target-range erase of the replay.
    AfterReplayErase,
    /// Cut after the first target-range write of the replay.
    AfterReplayWrite,
    /// Cut after all entries are applied but before the master reset.
    BeforeMasterReset,
}

impl CutPoint {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::SkipCommit => "skip-commit",
            Self::AfterCommitMark => "after-commit-mark",
            Self::AfterReplayErase => "after-replay-erase",
            Self::AfterReplayWrite => "after-replay-write",
            Self::BeforeMasterReset => "before-master-reset",
        }
    }

    fn bit(self) -> u8 {
        match self {
            Self::SkipCommit => 1 << 0,
            Self::AfterCommitMark => 1 << 1,
            Self::AfterReplayErase => 1 << 2,
            Self::AfterReplayWrite => 1 << 3,
            Self::BeforeMasterReset => 1 << 4,
        }
    }
}

/// Set of armed cut points for one instance. Empty by default; runtime
/// state only, never persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PowerCutPlan {
    mask: u8,
}

impl PowerCutPlan {
    pub const NONE: Self = Self { mask: 0 };

    #[must_use]
    pub fn armed(points: &[CutPoint]) -> Self {
        let mut plan = Self::NONE;
        for point in points {
            plan.arm(*point);
        }
        plan
    }

    pub fn arm(&mut self, point: CutPoint) {
        self.mask |= point.bit();
    }

    #[must_use]
    pub fn is_armed(self, point: CutPoint) -> bool {
        self.mask & point.bit() != 0
    }
}
