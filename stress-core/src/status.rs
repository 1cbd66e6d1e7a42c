// stress-core/src/status.rs
// Exit statuses reported by stressor instances

use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of one stressor instance, carried across fork as the exit code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitStatus {
    Success,
    Failure,
    NotSuccess,
    NoResource,
    /// Capability or kernel feature absent
    NotImplemented,
    Signaled,
    /// Not implemented on this platform
    Unsupported,
    MetricsUntrustworthy,
}

impl ExitStatus {
    pub fn code(self) -> i32 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::Failure => 1,
            ExitStatus::NotSuccess => 2,
            ExitStatus::NoResource => 3,
            ExitStatus::NotImplemented => 4,
            ExitStatus::Signaled => 5,
            ExitStatus::Unsupported => 6,
            ExitStatus::MetricsUntrustworthy => 7,
        }
    }

    /// Map a child exit code back; anything unknown is a plain failure
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => ExitStatus::Success,
            2 => ExitStatus::NotSuccess,
            3 => ExitStatus::NoResource,
            4 => ExitStatus::NotImplemented,
            5 => ExitStatus::Signaled,
            6 => ExitStatus::Unsupported,
            7 => ExitStatus::MetricsUntrustworthy,
            _ => ExitStatus::Failure,
        }
    }

    /// Skipped instances count as neither passed nor failed
    pub fn is_skip(self) -> bool {
        matches!(
            self,
            ExitStatus::NoResource | ExitStatus::NotImplemented | ExitStatus::Unsupported
        )
    }

    pub fn is_failure(self) -> bool {
        matches!(
            self,
            ExitStatus::Failure | ExitStatus::NotSuccess | ExitStatus::Signaled
        )
    }

    /// Combine two statuses, keeping the one that matters most for reporting
    pub fn worst(self, other: ExitStatus) -> ExitStatus {
        fn rank(s: ExitStatus) -> u8 {
            match s {
                ExitStatus::Success => 0,
                ExitStatus::NotImplemented | ExitStatus::Unsupported => 1,
                ExitStatus::NoResource => 2,
                ExitStatus::MetricsUntrustworthy => 3,
                ExitStatus::NotSuccess => 4,
                ExitStatus::Signaled => 5,
                ExitStatus::Failure => 6,
            }
        }
        if rank(other) > rank(self) {
            other
        } else {
            self
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExitStatus::Success => "passed",
            ExitStatus::Failure => "failed",
            ExitStatus::NotSuccess => "not successful",
            ExitStatus::NoResource => "skipped (no resource)",
            ExitStatus::NotImplemented => "skipped (not implemented)",
            ExitStatus::Signaled => "killed by signal",
            ExitStatus::Unsupported => "skipped (unsupported platform)",
            ExitStatus::MetricsUntrustworthy => "metrics untrustworthy",
        };
        f.write_str(s)
    }
}
