//! Core of the message pane: a windowed, partially loaded conversation
//! timeline with bidirectional cursor pagination and gap reconciliation.
//!
//! This crate performs no I/O. [`PaginationController`] turns host commands
//! into fetch requests and applies fetch results; a runtime executes the
//! requests against a message source.

/// Async command, event and snapshot channels.
pub mod channel;
/// Stable pane error payload.
pub mod error;
/// Visibility-driven gap-fill triggering.
pub mod gap_detector;
/// Session lifecycle state machine.
pub mod lifecycle;
/// Fetch scheduling and result application.
pub mod pagination;
/// Ordered timeline of messages and gap placeholders.
pub mod timeline;
/// Data model and host-facing protocol types.
pub mod types;
/// Scroll anchoring across timeline mutations.
pub mod viewport;

pub use channel::{EventStream, PaneChannelError, PaneChannels, SnapshotWatch};
pub use error::{PaneError, PaneErrorCategory};
pub use gap_detector::{GapDecision, GapDetector, IgnoreReason};
pub use lifecycle::{SessionLifecycle, SessionStateMachine};
pub use pagination::{
    Effects, FetchKind, FetchOp, FetchRequest, FetchResponse, FetchTicket, PaginationController,
};
pub use timeline::{GapChange, JumpPlacement, MergeOutcome, Timeline, TimelineMergeError};
pub use types::{
    Cursor, Direction, GapId, GapKind, GapPlaceholder, Message, MessageId, MessageStatus,
    Neighbourhood, NeighbourhoodGap, PaginationConfig, PaginationState, PaneCommand, PaneEvent,
    PaneSnapshot, TimelineEntry,
};
pub use viewport::{AnchorPlan, ViewportAnchor, ViewportCommand, ViewportMetrics};
