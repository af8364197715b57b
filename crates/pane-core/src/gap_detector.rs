use std::collections::HashSet;

use crate::types::{GapId, GapKind, GapPlaceholder, MessageId};

/// Outcome of a visibility signal for one placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GapDecision {
    /// Fetch the missing run following `anchor_id`.
    Fill {
        gap_id: GapId,
        kind: GapKind,
        anchor_id: MessageId,
        missing_count: u32,
    },
    Ignore(IgnoreReason),
    /// Placeholder cannot be fetched; report and drop it.
    Malformed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Placeholder left the viewport.
    Hidden,
    /// A scroll-into-view is still settling.
    Suppressed,
    /// Another gap fill or fetch is outstanding.
    FillInProgress,
    /// No placeholder with this id in the current timeline.
    UnknownGap,
    /// Already triggered since the last re-arm.
    AlreadyObserved,
}

/// Turns "placeholder became visible" events into gap-fill triggers.
///
/// Each placeholder triggers at most once per arm cycle. The owner calls
/// [`GapDetector::rearm`] after every structural timeline change, so a
/// placeholder that is still on screen after a partial fill reports again.
///
/// Visibility is edge-triggered, so placeholders reported visible are
/// remembered until reported hidden. The owner re-evaluates them through
/// [`GapDetector::visible`] once whatever blocked them has settled.
#[derive(Debug, Clone, Default)]
pub struct GapDetector {
    observed: HashSet<GapId>,
    visible: HashSet<GapId>,
    suppressed_until_ms: Option<u64>,
}

impl GapDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn evaluate(
        &mut self,
        gap_id: GapId,
        gap: Option<&GapPlaceholder>,
        visible: bool,
        busy: bool,
        now_ms: u64,
    ) -> GapDecision {
        if !visible {
            self.forget(gap_id);
            return GapDecision::Ignore(IgnoreReason::Hidden);
        }
        let Some(gap) = gap else {
            self.forget(gap_id);
            return GapDecision::Ignore(IgnoreReason::UnknownGap);
        };
        self.visible.insert(gap_id);
        if self.is_suppressed(now_ms) {
            return GapDecision::Ignore(IgnoreReason::Suppressed);
        }
        if busy {
            return GapDecision::Ignore(IgnoreReason::FillInProgress);
        }
        if !self.observed.insert(gap_id) {
            return GapDecision::Ignore(IgnoreReason::AlreadyObserved);
        }
        match (gap.is_fillable(), gap.last_message_id) {
            (true, Some(anchor_id)) => GapDecision::Fill {
                gap_id,
                kind: gap.kind,
                anchor_id,
                missing_count: gap.missing_count,
            },
            _ => GapDecision::Malformed,
        }
    }

    /// Forget every observation; visible placeholders will report again.
    pub fn rearm(&mut self) {
        self.observed.clear();
    }

    pub fn is_visible(&self, gap_id: GapId) -> bool {
        self.visible.contains(&gap_id)
    }

    /// Stop tracking a placeholder that left the viewport or the timeline.
    pub fn forget(&mut self, gap_id: GapId) {
        self.observed.remove(&gap_id);
        self.visible.remove(&gap_id);
    }

    pub fn suppress_until(&mut self, deadline_ms: u64) {
        self.suppressed_until_ms = Some(deadline_ms);
    }

    pub fn is_suppressed(&self, now_ms: u64) -> bool {
        self.suppressed_until_ms
            .is_some_and(|deadline| now_ms < deadline)
    }

    /// Drop all state, including suppression.
    pub fn reset(&mut self) {
        self.observed.clear();
        self.visible.clear();
        self.suppressed_until_ms = None;
    }
}
