use serde::{Deserialize, Serialize};

use crate::{
    error::PaneError,
    lifecycle::SessionLifecycle,
    viewport::{ViewportCommand, ViewportMetrics},
};

/// Server-assigned message identifier.
pub type MessageId = u64;

/// Seek boundary used for "older than" / "newer than" page queries.
///
/// Field order matters: the derived `Ord` compares `last_happened_at_ms` first
/// and breaks ties with `last_entity_id`, which is the timeline order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cursor {
    /// Timestamp of the boundary message in milliseconds since Unix epoch.
    pub last_happened_at_ms: u64,
    /// Identifier of the boundary message.
    pub last_entity_id: MessageId,
}

impl Cursor {
    pub fn new(last_happened_at_ms: u64, last_entity_id: MessageId) -> Self {
        Self {
            last_happened_at_ms,
            last_entity_id,
        }
    }
}

/// Page direction relative to a cursor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Older messages, returned newest-first.
    Up,
    /// Newer messages, returned oldest-first.
    Down,
}

/// Delivery status of a message. Not part of ordering.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum MessageStatus {
    #[default]
    Sent,
    Delivered,
    Read,
}

/// One chat message as delivered by the message source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    /// Send time in milliseconds since Unix epoch; primary ordering key.
    pub sent_at_ms: u64,
    pub sender_id: String,
    pub content: String,
    /// Message this one replies to, if any.
    pub parent_id: Option<MessageId>,
    pub status: MessageStatus,
}

impl Message {
    /// Position of this message in the timeline total order.
    pub fn cursor(&self) -> Cursor {
        Cursor::new(self.sent_at_ms, self.id)
    }
}

/// Stable identity of a gap placeholder, used to key visibility events.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GapId(pub u64);

/// Which side of a jump neighbourhood a placeholder was created for.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum GapKind {
    /// Missing run between older known history and a jump neighbourhood.
    Before,
    /// Missing run between a loaded run and the next known message.
    After,
}

/// A known-missing run of messages following a boundary message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GapPlaceholder {
    pub id: GapId,
    pub kind: GapKind,
    /// Last known message before the missing run.
    pub last_message_id: Option<MessageId>,
    pub last_message_sent_at_ms: Option<u64>,
    /// Best-known estimate of how many messages are missing.
    pub missing_count: u32,
}

impl GapPlaceholder {
    /// Seek cursor for filling this gap, when both boundary fields are set.
    pub fn boundary(&self) -> Option<Cursor> {
        match (self.last_message_sent_at_ms, self.last_message_id) {
            (Some(sent_at_ms), Some(id)) => Some(Cursor::new(sent_at_ms, id)),
            _ => None,
        }
    }

    /// Whether this placeholder carries enough information to be fetched.
    pub fn is_fillable(&self) -> bool {
        self.missing_count > 0 && self.boundary().is_some()
    }
}

/// Atomic unit stored in the timeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum TimelineEntry {
    Message(Message),
    Gap(GapPlaceholder),
}

impl TimelineEntry {
    pub fn as_message(&self) -> Option<&Message> {
        match self {
            Self::Message(message) => Some(message),
            Self::Gap(_) => None,
        }
    }

    pub fn as_gap(&self) -> Option<&GapPlaceholder> {
        match self {
            Self::Message(_) => None,
            Self::Gap(gap) => Some(gap),
        }
    }
}

/// Boundary metadata reported alongside a jump neighbourhood.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct NeighbourhoodGap {
    pub exists: bool,
    pub missing_count: u32,
    pub last_message_id: Option<MessageId>,
    pub last_message_sent_at_ms: Option<u64>,
}

impl NeighbourhoodGap {
    pub(crate) fn is_open(&self) -> bool {
        self.exists && self.missing_count > 0
    }
}

/// Messages surrounding a jump target plus gap metadata on both sides.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Neighbourhood {
    pub messages: Vec<Message>,
    pub gap_before: NeighbourhoodGap,
    pub gap_after: NeighbourhoodGap,
}

/// Tuning values for pagination and viewport behavior.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaginationConfig {
    /// Page size for initial, older and newer loads.
    pub page_size: u32,
    /// Upper bound for a single gap-fill request (never above 100).
    pub gap_fill_cap: u32,
    /// Messages requested on each side of a jump target.
    pub neighbourhood_window: u32,
    /// Distance from the bottom still treated as "at the bottom".
    pub bottom_epsilon_px: f64,
    /// How long gap detection stays disabled after a scroll-into-view.
    pub jump_settle_ms: u64,
    /// Duration of the jump target highlight.
    pub highlight_ms: u64,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            page_size: 30,
            gap_fill_cap: 100,
            neighbourhood_window: 25,
            bottom_epsilon_px: 24.0,
            jump_settle_ms: 600,
            highlight_ms: 2_000,
        }
    }
}

/// Direction-specific loading flags for the active conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PaginationState {
    pub has_more_older: bool,
    pub has_more_newer: bool,
    pub loading_older: bool,
    pub loading_newer: bool,
    /// Kind of placeholder currently being resolved; blocks new gap fills.
    pub filling_gap: Option<GapKind>,
    /// Jump target whose neighbourhood is being fetched.
    pub jumping_to: Option<MessageId>,
}

impl PaginationState {
    /// Flags for a freshly selected conversation anchored at "now".
    pub fn fresh() -> Self {
        Self {
            has_more_older: true,
            ..Self::default()
        }
    }

    /// Whether any fetch for the conversation is outstanding.
    pub fn any_in_flight(&self) -> bool {
        self.loading_older || self.loading_newer || self.jumping_to.is_some()
    }
}

/// Full state published to the host after each change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaneSnapshot {
    pub conversation_id: Option<String>,
    pub lifecycle: SessionLifecycle,
    pub entries: Vec<TimelineEntry>,
    pub pagination: PaginationState,
}

/// Commands accepted from the host UI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum PaneCommand {
    /// Switch to a conversation and load its newest page.
    SelectConversation { conversation_id: String },
    /// Load the page preceding the oldest loaded message.
    LoadOlder { viewport: ViewportMetrics },
    /// Load the page following the newest loaded message.
    LoadNewer { viewport: ViewportMetrics },
    /// Bring a message into view, fetching its neighbourhood when needed.
    JumpToMessage { message_id: MessageId },
    /// A gap placeholder entered or left the visible viewport.
    GapVisibility { gap_id: GapId, visible: bool },
    /// A message was sent or received live.
    PushMessage {
        message: Message,
        viewport: ViewportMetrics,
    },
    /// Tear down the view and discard all conversation state.
    Close,
}

/// Events published to the host UI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum PaneEvent {
    /// Timeline or flags changed.
    StateChanged(PaneSnapshot),
    /// Scroll instruction to apply after the host renders the latest snapshot.
    Viewport(ViewportCommand),
    /// User-visible, non-fatal condition.
    Notice(PaneError),
}
