use serde::{Deserialize, Serialize};

use crate::types::{MessageId, PaginationConfig};

/// Scroll geometry reported by the host at the moment a command is issued.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct ViewportMetrics {
    /// Total content height.
    pub scroll_height: f64,
    /// Distance scrolled from the top of the content.
    pub scroll_offset: f64,
    /// Height of the visible area.
    pub client_height: f64,
}

impl ViewportMetrics {
    pub fn distance_from_bottom(&self) -> f64 {
        (self.scroll_height - self.scroll_offset - self.client_height).max(0.0)
    }

    pub fn is_near_bottom(&self, epsilon_px: f64) -> bool {
        self.distance_from_bottom() <= epsilon_px
    }
}

/// How to restore the scroll position once a merge has been rendered.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum AnchorPlan {
    /// Content was inserted above the viewport; shift by the height delta.
    PreserveOffset {
        scroll_height_before: f64,
        scroll_offset_before: f64,
    },
    /// Follow the newest message.
    StickToBottom,
    /// Leave the scroll position alone.
    Untouched,
}

impl AnchorPlan {
    /// Offset to scroll to given the geometry after the update, or `None`
    /// when the position must not change.
    pub fn resolve(&self, after: &ViewportMetrics) -> Option<f64> {
        match *self {
            Self::PreserveOffset {
                scroll_height_before,
                scroll_offset_before,
            } => Some(after.scroll_height - scroll_height_before + scroll_offset_before),
            Self::StickToBottom => Some((after.scroll_height - after.client_height).max(0.0)),
            Self::Untouched => None,
        }
    }
}

/// Scroll instruction emitted to the host.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum ViewportCommand {
    Restore(AnchorPlan),
    /// Center `message_id`, highlight it for `highlight_ms`, and expect the
    /// animation to settle within `settle_ms`.
    ScrollIntoView {
        message_id: MessageId,
        highlight_ms: u64,
        settle_ms: u64,
    },
}

/// Plans viewport restoration for every kind of timeline mutation.
#[derive(Debug, Clone)]
pub struct ViewportAnchor {
    bottom_epsilon_px: f64,
    settle_ms: u64,
    highlight_ms: u64,
}

impl ViewportAnchor {
    pub fn new(config: &PaginationConfig) -> Self {
        Self {
            bottom_epsilon_px: config.bottom_epsilon_px,
            settle_ms: config.jump_settle_ms,
            highlight_ms: config.highlight_ms,
        }
    }

    /// Record the geometry before an older page is fetched.
    pub fn plan_prepend(&self, before: &ViewportMetrics) -> AnchorPlan {
        AnchorPlan::PreserveOffset {
            scroll_height_before: before.scroll_height,
            scroll_offset_before: before.scroll_offset,
        }
    }

    /// Decide before a newer fetch whether the view follows the tail.
    pub fn plan_append(&self, before: &ViewportMetrics) -> AnchorPlan {
        if before.is_near_bottom(self.bottom_epsilon_px) {
            AnchorPlan::StickToBottom
        } else {
            AnchorPlan::Untouched
        }
    }

    pub fn scroll_into_view(&self, message_id: MessageId) -> ViewportCommand {
        ViewportCommand::ScrollIntoView {
            message_id,
            highlight_ms: self.highlight_ms,
            settle_ms: self.settle_ms,
        }
    }

    /// Until when gap detection stays off after a scroll-into-view at `now_ms`.
    pub fn settle_deadline(&self, now_ms: u64) -> u64 {
        now_ms.saturating_add(self.settle_ms)
    }
}
