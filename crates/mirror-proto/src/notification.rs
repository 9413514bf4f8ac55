use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationKind {
    ModeChanged,
    FindTarget,
    Correct,
    Skipped,
    TimeUp,
    Learned,
    NothingLearned,
    NoTargetAvailable,
    LoadError,
    CameraError,
    InferenceDegraded,
    Status,
}

impl NotificationKind {
    /// Errors are shown with the destructive toast style.
    pub fn is_error(self) -> bool {
        matches!(
            self,
            NotificationKind::NothingLearned
                | NotificationKind::LoadError
                | NotificationKind::CameraError
                | NotificationKind::InferenceDegraded
        )
    }
}

/// A user-facing event. Presentation (toast, banner, console) is up to the sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub ts_unix_ms: i64,
    pub kind: NotificationKind,
    pub title: String,
    pub detail: Option<String>,
}

impl Notification {
    pub fn new(kind: NotificationKind, title: impl Into<String>) -> Self {
        Self {
            ts_unix_ms: now_unix_ms(),
            kind,
            title: title.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

fn now_unix_ms() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}
