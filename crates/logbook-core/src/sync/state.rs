//! Sync status and trigger types shared with the UI layer.

use std::fmt;

/// Coarse sync status surfaced to the user.
///
/// `Error` means "not synced yet, will retry"; it never blocks local use.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncState {
    /// The remote could not be reached, or no cycle has completed yet.
    Offline,
    Syncing,
    Synced,
    /// Some records or attachments failed and are scheduled for retry.
    Error,
}

impl SyncState {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Syncing => "syncing",
            Self::Synced => "synced",
            Self::Error => "retrying",
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Why a sync cycle was started.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncTrigger {
    /// The application came to the foreground.
    Foreground,
    /// The user asked for a sync.
    UserAction,
    /// A local mutation was just committed.
    PostMutation,
    /// The periodic background loop fired.
    Interval,
}

impl fmt::Display for SyncTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Foreground => "foreground",
            Self::UserAction => "user action",
            Self::PostMutation => "post-mutation",
            Self::Interval => "interval",
        })
    }
}
