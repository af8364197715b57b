use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    lifecycle::SessionLifecycle,
    timeline::TimelineMergeError,
    types::{GapId, MessageId},
};

/// Broad error category used for user-facing handling.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PaneErrorCategory {
    /// A page or neighbourhood fetch failed; retryable by repeating the action.
    FetchFailed,
    /// A jump target no longer exists on the server.
    TargetGone,
    /// A gap placeholder lacks the boundary needed to fetch it.
    MalformedGap,
    /// A merge referenced an anchor that is not loaded.
    Merge,
    /// A command arrived in a lifecycle state that cannot serve it.
    InvalidState,
    /// Invalid tuning or input values.
    Config,
}

/// Stable error payload emitted across the command/event boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{category:?}:{code}: {message}")]
pub struct PaneError {
    /// High-level error category.
    pub category: PaneErrorCategory,
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl PaneError {
    pub fn new(
        category: PaneErrorCategory,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
        }
    }

    /// A fetch issued by `operation` failed before any merge happened.
    pub fn fetch_failed(operation: &str, message: impl Into<String>) -> Self {
        Self::new(
            PaneErrorCategory::FetchFailed,
            format!("{operation}_failed"),
            message,
        )
    }

    pub fn target_gone(message_id: MessageId) -> Self {
        Self::new(
            PaneErrorCategory::TargetGone,
            "jump_target_gone",
            format!("message {message_id} is no longer available"),
        )
    }

    pub fn malformed_gap(gap_id: GapId) -> Self {
        Self::new(
            PaneErrorCategory::MalformedGap,
            "malformed_gap",
            format!("gap placeholder {} has no usable boundary", gap_id.0),
        )
    }

    /// Build a standard invalid-state error.
    pub fn invalid_state(current: SessionLifecycle, action: impl Into<String>) -> Self {
        let action = action.into();
        Self::new(
            PaneErrorCategory::InvalidState,
            "invalid_state_transition",
            format!("cannot run '{action}' while session is in state {current:?}"),
        )
    }

    /// Whether repeating the same user action may succeed.
    pub fn is_transient(&self) -> bool {
        self.category == PaneErrorCategory::FetchFailed
    }
}

impl From<TimelineMergeError> for PaneError {
    fn from(err: TimelineMergeError) -> Self {
        let code = match err {
            TimelineMergeError::UnknownAnchor(_) => "unknown_merge_anchor",
        };
        Self::new(PaneErrorCategory::Merge, code, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_failures_are_transient_and_coded_by_operation() {
        let err = PaneError::fetch_failed("load_older", "connection reset");
        assert_eq!(err.category, PaneErrorCategory::FetchFailed);
        assert_eq!(err.code, "load_older_failed");
        assert!(err.is_transient());
    }

    #[test]
    fn target_gone_is_terminal() {
        let err = PaneError::target_gone(777);
        assert_eq!(err.code, "jump_target_gone");
        assert!(err.message.contains("777"));
        assert!(!err.is_transient());
    }

    #[test]
    fn keeps_invalid_state_error_code_stable() {
        let err = PaneError::invalid_state(SessionLifecycle::Detached, "load_older");
        assert_eq!(err.code, "invalid_state_transition");
        assert_eq!(err.category, PaneErrorCategory::InvalidState);
    }

    #[test]
    fn merge_errors_map_to_merge_category() {
        let err = PaneError::from(TimelineMergeError::UnknownAnchor(50));
        assert_eq!(err.category, PaneErrorCategory::Merge);
        assert_eq!(err.code, "unknown_merge_anchor");
    }

    #[test]
    fn serializes_with_stable_field_names() {
        let err = PaneError::malformed_gap(GapId(3));
        let json = serde_json::to_value(&err).expect("error should serialize");
        assert_eq!(json["category"], "MalformedGap");
        assert_eq!(json["code"], "malformed_gap");
    }
}
