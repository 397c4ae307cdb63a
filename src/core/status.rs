//! Session status state machine.
//!
//! ```text
//! INACTIVE --open--> CONNECTING --matching connection--> ACTIVE
//! ACTIVE --file switch--> RESTARTING --matching connection--> ACTIVE
//! ACTIVE --dirty, not live-editable--> OUT_OF_SYNC --clean--> ACTIVE
//! ACTIVE --live document error--> SYNC_ERROR --error cleared--> ACTIVE
//! ACTIVE --save of reload-only file--> RELOADING --reconnect--> ACTIVE
//! any --close--> INACTIVE
//! ```

use std::fmt;

/// Preview session status. Ordered: everything below `Active` is a
/// session that has not reached the browser yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Status {
    Inactive = 0,
    Connecting = 1,
    Active = 2,
    OutOfSync = 3,
    SyncError = 4,
    Reloading = 5,
    Restarting = 6,
}

impl Status {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Inactive => "inactive",
            Self::Connecting => "connecting",
            Self::Active => "active",
            Self::OutOfSync => "out of sync",
            Self::SyncError => "sync error",
            Self::Reloading => "reloading",
            Self::Restarting => "restarting",
        }
    }

    /// True for every status except `Inactive`.
    pub const fn is_live(self) -> bool {
        !matches!(self, Self::Inactive)
    }

    /// Whether the machine has an edge from `self` to `to`.
    pub const fn can_transition_to(self, to: Status) -> bool {
        use Status::*;
        match to {
            Inactive => true,
            Connecting => matches!(self, Inactive),
            Active => matches!(self, Connecting | Restarting | OutOfSync | SyncError | Reloading),
            OutOfSync => matches!(self, Active),
            SyncError => matches!(self, Active),
            Reloading => matches!(self, Active | OutOfSync | SyncError),
            // A file switch rebuilds the session from any live state
            Restarting => self.is_live(),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Why a session went back to `Inactive`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseReason {
    ExplicitClose,
    NavigatedAway,
    DetachedTargetClosed,
}

impl CloseReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ExplicitClose => "explicit_close",
            Self::NavigatedAway => "navigated_away",
            Self::DetachedTargetClosed => "detached_target_closed",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A status-change notification. `reason` is only set for `Inactive`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub status: Status,
    pub reason: Option<CloseReason>,
}

/// Sole owner of the session status.
#[derive(Debug)]
pub struct StatusController {
    current: Status,
}

impl StatusController {
    pub const fn new() -> Self {
        Self {
            current: Status::Inactive,
        }
    }

    pub const fn current(&self) -> Status {
        self.current
    }

    /// Move to `status`. Returns the notification to publish, or `None`
    /// when the value is unchanged or the edge does not exist.
    pub fn transition(&mut self, status: Status, reason: Option<CloseReason>) -> Option<StatusChange> {
        if status == self.current {
            return None;
        }
        if !self.current.can_transition_to(status) {
            crate::debug!("session"; "ignored status change {} -> {}", self.current, status);
            return None;
        }
        self.current = status;
        let reason = match status {
            Status::Inactive => Some(reason.unwrap_or(CloseReason::ExplicitClose)),
            _ => None,
        };
        Some(StatusChange { status, reason })
    }
}

impl Default for StatusController {
    fn default() -> Self {
        Self::new()
    }
}
