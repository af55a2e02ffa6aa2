//! Stages of a single endpoint upgrade.

use std::fmt;

/// One step of an upgrade, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    RemoveFromPool,
    KillExisting,
    CopyBinary,
    StartBinary,
    WaitHealthy,
    AddToPool,
    Done,
}

impl Stage {
    /// Where a fresh upgrade starts.
    pub const INITIAL: Stage = Stage::RemoveFromPool;

    pub fn name(self) -> &'static str {
        match self {
            Self::RemoveFromPool => "RemoveFromPool",
            Self::KillExisting => "KillExisting",
            Self::CopyBinary => "CopyBinary",
            Self::StartBinary => "StartBinary",
            Self::WaitHealthy => "WaitHealthy",
            Self::AddToPool => "AddToPool",
            Self::Done => "Done",
        }
    }

    /// The stage that follows a successful `self`.
    pub fn next(self) -> Stage {
        match self {
            Self::RemoveFromPool => Self::KillExisting,
            Self::KillExisting => Self::CopyBinary,
            Self::CopyBinary => Self::StartBinary,
            Self::StartBinary => Self::WaitHealthy,
            Self::WaitHealthy => Self::AddToPool,
            Self::AddToPool | Self::Done => Self::Done,
        }
    }

    pub fn is_done(self) -> bool {
        self == Self::Done
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
