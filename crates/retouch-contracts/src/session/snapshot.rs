use serde::Serialize;

use crate::codec::CanonicalImage;
use crate::errors::ErrorDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Pending,
}

/// Derived lifecycle position of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Empty,
    Ready,
    Pending,
    Transformed,
}

impl SessionPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Ready => "ready",
            Self::Pending => "pending",
            Self::Transformed => "transformed",
        }
    }
}

/// Read-only copy of session state handed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    pub status: SessionStatus,
    pub original: Option<CanonicalImage>,
    pub current: Option<CanonicalImage>,
    pub last_error: Option<ErrorDescriptor>,
    pub active_selection: Option<String>,
    pub custom_instruction: Option<String>,
    pub generation: u64,
}

impl SessionSnapshot {
    /// What a viewer should render: the latest result, else the original.
    pub fn displayed(&self) -> Option<&CanonicalImage> {
        self.current.as_ref().or(self.original.as_ref())
    }

    pub fn is_pending(&self) -> bool {
        self.status == SessionStatus::Pending
    }
}
