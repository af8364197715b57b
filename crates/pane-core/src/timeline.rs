use std::collections::HashSet;

use thiserror::Error;
use tracing::trace;

use crate::types::{
    Cursor, GapId, GapKind, GapPlaceholder, Message, MessageId, NeighbourhoodGap, TimelineEntry,
};

const MAX_FILL_PAGE: u32 = 100;

/// Errors that can occur while merging into the timeline.
///
/// A merge that returns an error leaves the timeline untouched.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TimelineMergeError {
    /// A gap fill referenced a boundary message that is not loaded.
    #[error("message {0} is not loaded and cannot anchor a merge")]
    UnknownAnchor(MessageId),
}

/// Effect a merge had on gap placeholders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GapChange {
    Untouched,
    Removed(GapId),
    /// Placeholder kept with a new boundary and/or count.
    Revised { id: GapId, missing_count: u32 },
    Created(GapId),
}

/// Result of a prepend, append, initial or gap-fill merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeOutcome {
    pub inserted: usize,
    /// Duplicates and messages outside the merged region.
    pub skipped: usize,
    pub gap: GapChange,
}

/// Result of merging a jump neighbourhood.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JumpPlacement {
    pub inserted: usize,
    pub skipped: usize,
    /// No loaded message precedes the inserted run.
    pub at_head: bool,
    /// No loaded message follows the inserted run.
    pub at_tail: bool,
    pub gap_before: GapChange,
    pub gap_after: GapChange,
}

/// Ordered, partially loaded conversation timeline.
///
/// Messages are kept ascending by `(sent_at_ms, id)` and are unique by id.
/// A gap placeholder always directly follows the message it is bounded by,
/// and never two placeholders sit next to each other.
#[derive(Debug, Clone, Default)]
pub struct Timeline {
    entries: Vec<TimelineEntry>,
    ids: HashSet<MessageId>,
    next_gap_id: u64,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current entries in display order.
    pub fn entries(&self) -> &[TimelineEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn message_count(&self) -> usize {
        self.ids.len()
    }

    pub fn contains(&self, id: MessageId) -> bool {
        self.ids.contains(&id)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.ids.clear();
    }

    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.entries.iter().filter_map(TimelineEntry::as_message)
    }

    pub fn gaps(&self) -> impl Iterator<Item = &GapPlaceholder> {
        self.entries.iter().filter_map(TimelineEntry::as_gap)
    }

    pub fn gap(&self, id: GapId) -> Option<&GapPlaceholder> {
        self.gaps().find(|gap| gap.id == id)
    }

    /// Seek cursor of the oldest loaded message.
    pub fn oldest_known(&self) -> Option<Cursor> {
        self.messages().next().map(Message::cursor)
    }

    /// Seek cursor of the newest loaded message.
    pub fn newest_known(&self) -> Option<Cursor> {
        self.entries
            .iter()
            .rev()
            .find_map(TimelineEntry::as_message)
            .map(Message::cursor)
    }

    /// Page size for a gap-fill request of `requested` messages.
    pub fn bounded_fill_limit(requested: u32, cap: u32) -> u32 {
        let safe_requested = requested.max(1);
        let safe_cap = cap.max(1);
        safe_requested.min(safe_cap).min(MAX_FILL_PAGE)
    }

    /// Drop a placeholder without touching the messages around it.
    pub fn remove_gap(&mut self, id: GapId) -> bool {
        let Some(idx) = self
            .entries
            .iter()
            .position(|entry| entry.as_gap().is_some_and(|gap| gap.id == id))
        else {
            return false;
        };
        self.entries.remove(idx);
        true
    }

    /// Replace the timeline with `batch`, sorted ascending.
    pub fn initial_load(&mut self, batch: Vec<Message>) -> MergeOutcome {
        self.clear();
        let (fresh, skipped) = self.normalize_batch(batch);
        let inserted = self.insert_run(0, fresh);
        trace!(inserted, skipped, "timeline initial load");
        MergeOutcome {
            inserted,
            skipped,
            gap: GapChange::Untouched,
        }
    }

    /// Insert an older page at the head. `batch` is newest-first, as an `Up`
    /// page arrives from the source.
    pub fn prepend_older(&mut self, mut batch: Vec<Message>) -> MergeOutcome {
        batch.reverse();
        let floor = self.oldest_known();
        let (fresh, mut skipped) = self.normalize_batch(batch);
        let (run, rejected): (Vec<_>, Vec<_>) = fresh
            .into_iter()
            .partition(|message| floor.is_none_or(|floor| message.cursor() < floor));
        skipped += rejected.len();

        let inserted = self.insert_run(0, run);
        trace!(inserted, skipped, "timeline prepended older page");
        MergeOutcome {
            inserted,
            skipped,
            gap: GapChange::Untouched,
        }
    }

    /// Append a newer page (ascending) at the tail.
    pub fn append_newer(&mut self, batch: Vec<Message>) -> MergeOutcome {
        let ceiling = self.newest_known();
        let (fresh, mut skipped) = self.normalize_batch(batch);
        let (run, rejected): (Vec<_>, Vec<_>) = fresh
            .into_iter()
            .partition(|message| ceiling.is_none_or(|ceiling| message.cursor() > ceiling));
        skipped += rejected.len();

        let inserted = self.insert_run(self.entries.len(), run);
        trace!(inserted, skipped, "timeline appended newer page");
        MergeOutcome {
            inserted,
            skipped,
            gap: GapChange::Untouched,
        }
    }

    /// Splice a gap-fill page directly after the message `anchor_id` and
    /// reconcile the placeholder that follows it.
    ///
    /// `requested_count` is the placeholder's `missing_count` when the fill
    /// was issued. The placeholder is removed when the page is empty, when it
    /// covers the requested count, or when it reaches the next loaded message.
    /// Otherwise it is moved behind the inserted run with the remaining count.
    /// A short page with no placeholder behind it gets a new one, as long as a
    /// loaded message still follows.
    pub fn insert_gap_fill(
        &mut self,
        anchor_id: MessageId,
        batch: Vec<Message>,
        requested_count: u32,
    ) -> Result<MergeOutcome, TimelineMergeError> {
        let (anchor_idx, floor) = self
            .locate(anchor_id)
            .ok_or(TimelineMergeError::UnknownAnchor(anchor_id))?;
        let ceiling = self.entries[anchor_idx + 1..]
            .iter()
            .find_map(TimelineEntry::as_message)
            .map(Message::cursor);

        let received = batch.len();
        let reached_next =
            ceiling.is_some_and(|ceiling| batch.iter().any(|message| message.cursor() >= ceiling));

        let (fresh, mut skipped) = self.normalize_batch(batch);
        let (run, rejected): (Vec<_>, Vec<_>) = fresh.into_iter().partition(|message| {
            let cursor = message.cursor();
            cursor > floor && ceiling.is_none_or(|ceiling| cursor < ceiling)
        });
        skipped += rejected.len();

        let last_inserted = run.last().map(|message| (message.id, message.sent_at_ms));
        let at = anchor_idx + 1;
        let inserted = self.insert_run(at, run);
        let after = at + inserted;

        let remaining =
            requested_count.saturating_sub(u32::try_from(received).unwrap_or(u32::MAX));
        let exhausted = received == 0 || remaining == 0 || reached_next;
        let trailing_gap = self
            .entries
            .get(after)
            .and_then(TimelineEntry::as_gap)
            .map(|gap| gap.id);

        let gap = match (exhausted, trailing_gap) {
            (true, Some(id)) => {
                self.entries.remove(after);
                GapChange::Removed(id)
            }
            (true, None) => GapChange::Untouched,
            (false, Some(id)) => {
                if let Some(TimelineEntry::Gap(gap)) = self.entries.get_mut(after) {
                    if let Some((last_id, last_sent_at_ms)) = last_inserted {
                        gap.last_message_id = Some(last_id);
                        gap.last_message_sent_at_ms = Some(last_sent_at_ms);
                    }
                    gap.missing_count = remaining;
                }
                GapChange::Revised {
                    id,
                    missing_count: remaining,
                }
            }
            (false, None) => {
                if let Some((last_id, last_sent_at_ms)) = last_inserted
                    && after < self.entries.len()
                {
                    let gap = self.new_gap(
                        GapKind::After,
                        Some(last_id),
                        Some(last_sent_at_ms),
                        remaining,
                    );
                    let id = gap.id;
                    self.entries.insert(after, TimelineEntry::Gap(gap));
                    GapChange::Created(id)
                } else {
                    GapChange::Untouched
                }
            }
        };

        trace!(anchor_id, inserted, skipped, remaining, ?gap, "timeline gap fill merged");
        Ok(MergeOutcome {
            inserted,
            skipped,
            gap,
        })
    }

    /// Merge the neighbourhood of a jump target at its ordered position.
    ///
    /// The neighbourhood is a contiguous slice of the conversation, so it
    /// replaces everything between the loaded message before it and the
    /// loaded message after it. Loaded messages inside that window are kept
    /// and placeholders strictly inside it are closed.
    ///
    /// The placeholder after the preceding message is revised to `gap_before`
    /// or removed, and one is created when that message had none. The
    /// placeholder in front of the following message is moved behind the run
    /// and capped at `gap_after`, or created, or removed when the run reaches
    /// that message. When the neighbourhood is older than everything loaded
    /// the window is the head of the timeline.
    pub fn insert_around_jump_target(
        &mut self,
        messages: Vec<Message>,
        gap_before: &NeighbourhoodGap,
        gap_after: &NeighbourhoodGap,
    ) -> JumpPlacement {
        let raw_ids: HashSet<MessageId> = messages.iter().map(|message| message.id).collect();
        let (fresh, skipped) = self.normalize_batch(messages);
        let mut placement = JumpPlacement {
            inserted: 0,
            skipped,
            at_head: false,
            at_tail: false,
            gap_before: GapChange::Untouched,
            gap_after: GapChange::Untouched,
        };

        let (Some(first), Some(last)) = (
            fresh.first().map(Message::cursor),
            fresh.last().map(Message::cursor),
        ) else {
            return placement;
        };

        let previous = self
            .entries
            .iter()
            .enumerate()
            .take_while(|(_, entry)| entry.as_message().is_none_or(|m| m.cursor() < first))
            .filter_map(|(idx, entry)| entry.as_message().map(|m| (idx, m.id, m.cursor())))
            .last();
        let window_start = previous.map_or(0, |(idx, _, _)| idx + 1);
        let window_end = self.entries[window_start..]
            .iter()
            .position(|entry| entry.as_message().is_some_and(|m| m.cursor() > last))
            .map_or(self.entries.len(), |offset| window_start + offset);
        let next_id = self
            .entries
            .get(window_end)
            .and_then(TimelineEntry::as_message)
            .map(|message| message.id);

        let touches_previous = previous.is_some_and(|(_, id, _)| raw_ids.contains(&id));
        let touches_next = next_id.is_some_and(|id| raw_ids.contains(&id));
        placement.at_head = previous.is_none();
        placement.at_tail = next_id.is_none();
        placement.inserted = fresh.len();
        self.ids.extend(fresh.iter().map(|message| message.id));

        let window: Vec<TimelineEntry> = self.entries.drain(window_start..window_end).collect();
        let window_len = window.len();
        let mut leading = None;
        let mut trailing = None;
        let mut closed = 0_usize;
        let mut run = fresh;
        for (idx, entry) in window.into_iter().enumerate() {
            match entry {
                TimelineEntry::Message(message) => run.push(message),
                TimelineEntry::Gap(gap) if idx == 0 && previous.is_some() => leading = Some(gap),
                TimelineEntry::Gap(gap) if idx + 1 == window_len => trailing = Some(gap),
                TimelineEntry::Gap(_) => closed += 1,
            }
        }
        run.sort_by_key(Message::cursor);

        let mut replacement = Vec::with_capacity(run.len() + 2);
        match leading {
            Some(mut gap) => {
                let revised = gap.missing_count.min(gap_before.missing_count);
                if gap_before.is_open() && !touches_previous && revised > 0 {
                    gap.kind = GapKind::Before;
                    gap.missing_count = revised;
                    placement.gap_before = GapChange::Revised {
                        id: gap.id,
                        missing_count: revised,
                    };
                    replacement.push(TimelineEntry::Gap(gap));
                } else {
                    placement.gap_before = GapChange::Removed(gap.id);
                }
            }
            None => {
                if let Some((_, previous_id, previous_cursor)) = previous
                    && gap_before.is_open()
                    && !touches_previous
                {
                    let gap = self.new_gap(
                        GapKind::Before,
                        Some(previous_id),
                        Some(previous_cursor.last_happened_at_ms),
                        gap_before.missing_count,
                    );
                    placement.gap_before = GapChange::Created(gap.id);
                    replacement.push(TimelineEntry::Gap(gap));
                }
            }
        }

        replacement.extend(run.into_iter().map(TimelineEntry::Message));

        let keep_after = !placement.at_tail && gap_after.is_open() && !touches_next;
        match trailing {
            Some(mut gap) if keep_after => {
                gap.kind = GapKind::After;
                gap.last_message_id = Some(last.last_entity_id);
                gap.last_message_sent_at_ms = Some(last.last_happened_at_ms);
                gap.missing_count = gap.missing_count.min(gap_after.missing_count);
                placement.gap_after = GapChange::Revised {
                    id: gap.id,
                    missing_count: gap.missing_count,
                };
                replacement.push(TimelineEntry::Gap(gap));
            }
            Some(gap) => placement.gap_after = GapChange::Removed(gap.id),
            None if keep_after => {
                let gap = self.new_gap(
                    GapKind::After,
                    Some(last.last_entity_id),
                    Some(last.last_happened_at_ms),
                    gap_after.missing_count,
                );
                placement.gap_after = GapChange::Created(gap.id);
                replacement.push(TimelineEntry::Gap(gap));
            }
            None => {}
        }

        self.entries
            .splice(window_start..window_start, replacement);
        trace!(?placement, closed, "timeline merged jump neighbourhood");
        placement
    }

    fn locate(&self, id: MessageId) -> Option<(usize, Cursor)> {
        if !self.ids.contains(&id) {
            return None;
        }
        self.entries
            .iter()
            .enumerate()
            .find_map(|(idx, entry)| match entry {
                TimelineEntry::Message(message) if message.id == id => {
                    Some((idx, message.cursor()))
                }
                _ => None,
            })
    }

    /// Drop already-loaded and repeated ids, then order ascending.
    fn normalize_batch(&self, batch: Vec<Message>) -> (Vec<Message>, usize) {
        let total = batch.len();
        let mut seen = HashSet::with_capacity(total);
        let mut fresh: Vec<Message> = batch
            .into_iter()
            .filter(|message| !self.ids.contains(&message.id) && seen.insert(message.id))
            .collect();
        if !fresh.is_sorted_by_key(Message::cursor) {
            fresh.sort_by_key(Message::cursor);
        }
        let skipped = total - fresh.len();
        (fresh, skipped)
    }

    fn insert_run(&mut self, at: usize, run: Vec<Message>) -> usize {
        let count = run.len();
        self.ids.extend(run.iter().map(|message| message.id));
        self.entries
            .splice(at..at, run.into_iter().map(TimelineEntry::Message));
        count
    }

    fn new_gap(
        &mut self,
        kind: GapKind,
        last_message_id: Option<MessageId>,
        last_message_sent_at_ms: Option<u64>,
        missing_count: u32,
    ) -> GapPlaceholder {
        let id = GapId(self.next_gap_id);
        self.next_gap_id += 1;
        GapPlaceholder {
            id,
            kind,
            last_message_id,
            last_message_sent_at_ms,
            missing_count,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::MessageStatus;

    pub(crate) fn msg(id: MessageId) -> Message {
        Message {
            id,
            sent_at_ms: 1_700_000_000_000 + id * 1_000,
            sender_id: if id % 2 == 0 { "alice" } else { "bob" }.to_owned(),
            content: format!("message {id}"),
            parent_id: None,
            status: MessageStatus::Delivered,
        }
    }

    pub(crate) fn msgs(ids: impl IntoIterator<Item = MessageId>) -> Vec<Message> {
        ids.into_iter().map(msg).collect()
    }

    pub(crate) fn open_gap(last: MessageId, missing_count: u32) -> NeighbourhoodGap {
        NeighbourhoodGap {
            exists: true,
            missing_count,
            last_message_id: Some(last),
            last_message_sent_at_ms: Some(msg(last).sent_at_ms),
        }
    }

    /// Message ids in order, with `None` standing for a gap placeholder.
    pub(crate) fn layout(timeline: &Timeline) -> Vec<Option<MessageId>> {
        timeline
            .entries()
            .iter()
            .map(|entry| entry.as_message().map(|message| message.id))
            .collect()
    }

    pub(crate) fn assert_invariants(timeline: &Timeline) {
        let entries = timeline.entries();
        let mut seen = HashSet::new();
        let mut previous: Option<Cursor> = None;
        for (idx, entry) in entries.iter().enumerate() {
            match entry {
                TimelineEntry::Message(message) => {
                    assert!(seen.insert(message.id), "duplicate id {}", message.id);
                    if let Some(previous) = previous {
                        assert!(previous < message.cursor(), "order broken at {idx}");
                    }
                    previous = Some(message.cursor());
                }
                TimelineEntry::Gap(_) => {
                    assert!(idx > 0, "gap placeholder at the head");
                    assert!(
                        entries[idx - 1].as_message().is_some(),
                        "gap placeholder not preceded by its boundary message"
                    );
                }
            }
        }
        assert_eq!(seen.len(), timeline.message_count());
    }

    /// Place an `After` placeholder directly behind loaded message `after`.
    ///
    /// `sent_at_ms` stands in for the boundary timestamp so callers can build
    /// placeholders the merges themselves would never produce.
    pub(crate) fn plant_gap(
        timeline: &mut Timeline,
        after: MessageId,
        sent_at_ms: Option<u64>,
        missing_count: u32,
    ) -> GapId {
        let (idx, _) = timeline.locate(after).expect("boundary message is loaded");
        let gap = timeline.new_gap(GapKind::After, Some(after), sent_at_ms, missing_count);
        let id = gap.id;
        timeline.entries.insert(idx + 1, TimelineEntry::Gap(gap));
        id
    }

    /// Builds `[41..=50, gap(8), 59..=60]`.
    fn timeline_with_gap_after_50() -> (Timeline, GapId) {
        let mut timeline = Timeline::new();
        timeline.initial_load(msgs(41..=50));
        timeline.append_newer(msgs(59..=60));
        let id = plant_gap(&mut timeline, 50, Some(msg(50).sent_at_ms), 8);
        assert_invariants(&timeline);
        (timeline, id)
    }

    #[test]
    fn initial_load_sorts_ascending_and_sets_bounds() {
        let mut timeline = Timeline::new();
        let mut batch = msgs(1..=10);
        batch.reverse();
        let outcome = timeline.initial_load(batch);

        assert_eq!(outcome.inserted, 10);
        assert_eq!(timeline.entries().len(), 10);
        assert_eq!(
            layout(&timeline),
            (1..=10).map(Some).collect::<Vec<_>>()
        );
        assert_eq!(timeline.oldest_known(), Some(msg(1).cursor()));
        assert_eq!(timeline.newest_known(), Some(msg(10).cursor()));
        assert_invariants(&timeline);
    }

    #[test]
    fn ties_on_timestamp_are_broken_by_id() {
        let mut timeline = Timeline::new();
        let mut a = msg(7);
        let mut b = msg(3);
        a.sent_at_ms = 1_000;
        b.sent_at_ms = 1_000;
        timeline.initial_load(vec![a, b]);
        assert_eq!(layout(&timeline), vec![Some(3), Some(7)]);
    }

    #[test]
    fn prepend_reverses_newest_first_page_and_skips_duplicates() {
        let mut timeline = Timeline::new();
        timeline.initial_load(msgs(11..=20));

        let mut page = msgs(8..=12);
        page.reverse();
        let outcome = timeline.prepend_older(page);

        assert_eq!(outcome.inserted, 3);
        assert_eq!(outcome.skipped, 2);
        assert_eq!(timeline.oldest_known(), Some(msg(8).cursor()));
        assert_eq!(layout(&timeline)[..4], [Some(8), Some(9), Some(10), Some(11)]);
        assert_invariants(&timeline);
    }

    #[test]
    fn append_keeps_ascending_order_and_ignores_stale_messages() {
        let mut timeline = Timeline::new();
        timeline.initial_load(msgs(1..=5));

        let mut stale = msg(99);
        stale.sent_at_ms = 0;
        let mut page = msgs(6..=8);
        page.push(stale);
        let outcome = timeline.append_newer(page);

        assert_eq!(outcome.inserted, 3);
        assert_eq!(outcome.skipped, 1);
        assert_eq!(timeline.newest_known(), Some(msg(8).cursor()));
        assert!(!timeline.contains(99));
        assert_invariants(&timeline);
    }

    #[test]
    fn complete_gap_fill_removes_placeholder() {
        let (mut timeline, gap_id) = timeline_with_gap_after_50();

        let outcome = timeline
            .insert_gap_fill(50, msgs(51..=58), 8)
            .expect("anchor is loaded");

        assert_eq!(outcome.inserted, 8);
        assert_eq!(outcome.gap, GapChange::Removed(gap_id));
        assert!(timeline.gaps().next().is_none());
        let ids = layout(&timeline);
        let at = ids.iter().position(|id| *id == Some(50)).expect("50 is loaded");
        assert_eq!(
            ids[at + 1..at + 9],
            (51..=58).map(Some).collect::<Vec<_>>()[..]
        );
        assert_invariants(&timeline);
    }

    #[test]
    fn partial_gap_fill_advances_boundary_and_shrinks_count() {
        let (mut timeline, gap_id) = timeline_with_gap_after_50();

        let outcome = timeline
            .insert_gap_fill(50, msgs(51..=53), 8)
            .expect("anchor is loaded");

        assert_eq!(
            outcome.gap,
            GapChange::Revised {
                id: gap_id,
                missing_count: 5
            }
        );
        let gap = timeline.gap(gap_id).expect("placeholder remains");
        assert_eq!(gap.missing_count, 5);
        assert_eq!(gap.last_message_id, Some(53));
        assert_eq!(gap.last_message_sent_at_ms, Some(msg(53).sent_at_ms));
        let ids = layout(&timeline);
        let at = ids.iter().position(|id| *id == Some(53)).expect("53 is loaded");
        assert_eq!(ids[at + 1], None);
        assert_invariants(&timeline);
    }

    #[test]
    fn empty_gap_fill_means_range_is_exhausted() {
        let (mut timeline, gap_id) = timeline_with_gap_after_50();

        let outcome = timeline
            .insert_gap_fill(50, Vec::new(), 8)
            .expect("anchor is loaded");

        assert_eq!(outcome.gap, GapChange::Removed(gap_id));
        assert_invariants(&timeline);
    }

    #[test]
    fn gap_fill_reaching_next_known_message_closes_gap() {
        let (mut timeline, gap_id) = timeline_with_gap_after_50();

        // Estimate said 8 missing but only 51 and 52 existed; the page runs into 59.
        let outcome = timeline
            .insert_gap_fill(50, msgs([51, 52, 59, 60]), 8)
            .expect("anchor is loaded");

        assert_eq!(outcome.inserted, 2);
        assert_eq!(outcome.skipped, 2);
        assert_eq!(outcome.gap, GapChange::Removed(gap_id));
        assert_invariants(&timeline);
    }

    #[test]
    fn short_fill_without_placeholder_synthesizes_one_when_messages_follow() {
        let mut timeline = Timeline::new();
        timeline.initial_load(msgs([10, 20]));

        let outcome = timeline
            .insert_gap_fill(10, msgs(11..=13), 9)
            .expect("anchor is loaded");

        let GapChange::Created(id) = outcome.gap else {
            panic!("expected a synthesized gap, got {:?}", outcome.gap);
        };
        let gap = timeline.gap(id).expect("gap present");
        assert_eq!(gap.missing_count, 6);
        assert_eq!(gap.last_message_id, Some(13));
        assert_eq!(
            layout(&timeline),
            vec![Some(10), Some(11), Some(12), Some(13), None, Some(20)]
        );
        assert_invariants(&timeline);
    }

    #[test]
    fn short_fill_at_tail_does_not_fabricate_placeholder() {
        let mut timeline = Timeline::new();
        timeline.initial_load(msgs([10]));

        let outcome = timeline
            .insert_gap_fill(10, msgs(11..=12), 9)
            .expect("anchor is loaded");

        assert_eq!(outcome.gap, GapChange::Untouched);
        assert!(timeline.gaps().next().is_none());
    }

    #[test]
    fn gap_fill_with_unknown_anchor_is_a_noop_error() {
        let (mut timeline, _) = timeline_with_gap_after_50();
        let before = timeline.entries().to_vec();

        let err = timeline
            .insert_gap_fill(404, msgs(51..=53), 8)
            .expect_err("unknown anchor must fail");

        assert_eq!(err, TimelineMergeError::UnknownAnchor(404));
        assert_eq!(timeline.entries(), &before[..]);
    }

    #[test]
    fn jump_neighbourhood_older_than_window_lands_at_head_with_gap_after() {
        let mut timeline = Timeline::new();
        timeline.initial_load(msgs(100..=110));

        let placement = timeline.insert_around_jump_target(
            msgs(40..=60),
            &NeighbourhoodGap {
                exists: true,
                missing_count: 39,
                last_message_id: None,
                last_message_sent_at_ms: None,
            },
            &open_gap(60, 39),
        );

        assert!(placement.at_head);
        assert!(!placement.at_tail);
        assert_eq!(placement.inserted, 21);
        let GapChange::Created(gap_id) = placement.gap_after else {
            panic!("expected gap after the neighbourhood");
        };
        assert_eq!(timeline.oldest_known(), Some(msg(40).cursor()));
        let ids = layout(&timeline);
        assert_eq!(ids[20], Some(60));
        assert_eq!(ids[21], None);
        assert_eq!(ids[22], Some(100));
        let gap = timeline.gap(gap_id).expect("gap present");
        assert_eq!(gap.missing_count, 39);
        assert_eq!(gap.last_message_id, Some(60));
        assert_invariants(&timeline);
    }

    #[test]
    fn jump_neighbourhood_touching_window_does_not_create_gap() {
        let mut timeline = Timeline::new();
        timeline.initial_load(msgs(100..=110));

        let placement = timeline.insert_around_jump_target(
            msgs(90..=105),
            &NeighbourhoodGap::default(),
            &open_gap(105, 3),
        );

        assert_eq!(placement.inserted, 10);
        assert_eq!(placement.skipped, 6);
        assert_eq!(placement.gap_after, GapChange::Untouched);
        assert!(timeline.gaps().next().is_none());
        assert_invariants(&timeline);
    }

    #[test]
    fn jump_into_existing_gap_revises_it_to_gap_before() {
        let (mut timeline, gap_id) = timeline_with_gap_after_50();

        let placement = timeline.insert_around_jump_target(
            msgs(54..=55),
            &open_gap(53, 3),
            &open_gap(55, 3),
        );

        assert_eq!(
            placement.gap_before,
            GapChange::Revised {
                id: gap_id,
                missing_count: 3
            }
        );
        assert!(matches!(placement.gap_after, GapChange::Created(_)));
        assert_eq!(
            timeline.gap(gap_id).map(|gap| gap.kind),
            Some(GapKind::Before)
        );
        assert_eq!(
            layout(&timeline)[9..],
            [Some(50), None, Some(54), Some(55), None, Some(59), Some(60)]
        );
        assert_invariants(&timeline);
    }

    #[test]
    fn jump_neighbourhood_newer_than_window_gets_gap_before() {
        let mut timeline = Timeline::new();
        timeline.initial_load(msgs(1..=10));

        let placement = timeline.insert_around_jump_target(
            msgs(45..=55),
            &open_gap(44, 34),
            &NeighbourhoodGap::default(),
        );

        assert!(!placement.at_head);
        assert!(placement.at_tail);
        let GapChange::Created(gap_id) = placement.gap_before else {
            panic!("expected gap before the neighbourhood");
        };
        let gap = timeline.gap(gap_id).expect("gap present");
        assert_eq!(gap.kind, GapKind::Before);
        assert_eq!(gap.last_message_id, Some(10));
        assert_eq!(gap.missing_count, 34);
        assert_eq!(layout(&timeline)[9..12], [Some(10), None, Some(45)]);
        assert_invariants(&timeline);
    }

    #[test]
    fn jump_across_loaded_island_keeps_both_sides_recoverable() {
        // [41..=50, gap(8), 59, 60, gap(10), 71..=80]
        let (mut timeline, first_gap) = timeline_with_gap_after_50();
        timeline.append_newer(msgs(71..=80));
        let second_gap = plant_gap(&mut timeline, 60, Some(msg(60).sent_at_ms), 10);
        assert_invariants(&timeline);

        let placement =
            timeline.insert_around_jump_target(msgs(53..=61), &open_gap(52, 2), &open_gap(61, 9));

        assert_eq!(placement.inserted, 7);
        assert!(!placement.at_head);
        assert!(!placement.at_tail);
        assert_eq!(
            placement.gap_before,
            GapChange::Revised {
                id: first_gap,
                missing_count: 2
            }
        );
        assert_eq!(
            placement.gap_after,
            GapChange::Revised {
                id: second_gap,
                missing_count: 9
            }
        );
        let mut expected: Vec<_> = (41..=50).map(Some).collect();
        expected.push(None);
        expected.extend((53..=61).map(Some));
        expected.push(None);
        expected.extend((71..=80).map(Some));
        assert_eq!(layout(&timeline), expected);
        let after = timeline.gap(second_gap).expect("gap after the run");
        assert_eq!(after.last_message_id, Some(61));
        assert_eq!(after.last_message_sent_at_ms, Some(msg(61).sent_at_ms));
        assert_invariants(&timeline);

        let before_fill = timeline
            .insert_gap_fill(50, msgs(51..=52), 2)
            .expect("anchor is loaded");
        assert_eq!(before_fill.inserted, 2);
        assert_eq!(before_fill.gap, GapChange::Removed(first_gap));

        let after_fill = timeline
            .insert_gap_fill(61, msgs(62..=70), 9)
            .expect("anchor is loaded");
        assert_eq!(after_fill.inserted, 9);
        assert_eq!(after_fill.gap, GapChange::Removed(second_gap));

        assert_eq!(layout(&timeline), (41..=80).map(Some).collect::<Vec<_>>());
        assert_invariants(&timeline);
    }

    #[test]
    fn jump_spanning_several_gaps_closes_the_inner_ones() {
        let mut timeline = Timeline::new();
        timeline.initial_load(msgs([10, 20, 30, 40]));
        let leading = plant_gap(&mut timeline, 10, Some(msg(10).sent_at_ms), 9);
        let inner = plant_gap(&mut timeline, 20, Some(msg(20).sent_at_ms), 9);
        let trailing = plant_gap(&mut timeline, 30, Some(msg(30).sent_at_ms), 9);

        let placement =
            timeline.insert_around_jump_target(msgs(15..=35), &open_gap(14, 4), &open_gap(35, 4));

        assert_eq!(placement.inserted, 19);
        assert_eq!(placement.skipped, 2);
        assert!(timeline.gap(inner).is_none());
        assert_eq!(
            timeline.gap(leading).map(|gap| (gap.kind, gap.missing_count)),
            Some((GapKind::Before, 4))
        );
        let after = timeline.gap(trailing).expect("trailing gap moves behind the run");
        assert_eq!(after.kind, GapKind::After);
        assert_eq!(after.last_message_id, Some(35));
        assert_eq!(after.missing_count, 4);

        let mut expected = vec![Some(10), None];
        expected.extend((15..=35).map(Some));
        expected.extend([None, Some(40)]);
        assert_eq!(layout(&timeline), expected);
        assert_invariants(&timeline);
    }

    #[test]
    fn jump_reaching_next_loaded_message_drops_its_gap() {
        let (mut timeline, gap_id) = timeline_with_gap_after_50();

        let placement = timeline.insert_around_jump_target(
            msgs(51..=59),
            &NeighbourhoodGap::default(),
            &open_gap(59, 0),
        );

        assert_eq!(placement.inserted, 8);
        assert_eq!(placement.gap_before, GapChange::Removed(gap_id));
        assert!(timeline.gaps().next().is_none());
        assert_eq!(layout(&timeline), (41..=60).map(Some).collect::<Vec<_>>());
    }

    #[test]
    fn gap_after_is_bounded_by_the_inserted_run_not_source_metadata() {
        let mut timeline = Timeline::new();
        timeline.initial_load(msgs(100..=110));

        // The source names a boundary that is not part of the neighbourhood.
        let placement = timeline.insert_around_jump_target(
            msgs(40..=60),
            &NeighbourhoodGap::default(),
            &open_gap(75, 39),
        );

        let GapChange::Created(gap_id) = placement.gap_after else {
            panic!("expected gap after the neighbourhood");
        };
        let gap = timeline.gap(gap_id).expect("gap present");
        assert_eq!(gap.last_message_id, Some(60));
        assert_eq!(gap.last_message_sent_at_ms, Some(msg(60).sent_at_ms));

        let outcome = timeline
            .insert_gap_fill(60, msgs(61..=99), 39)
            .expect("gap boundary is loaded");
        assert_eq!(outcome.gap, GapChange::Removed(gap_id));
        assert_invariants(&timeline);
    }

    #[test]
    fn clamps_fill_limit_to_safe_bounds() {
        assert_eq!(Timeline::bounded_fill_limit(0, 100), 1);
        assert_eq!(Timeline::bounded_fill_limit(8, 100), 8);
        assert_eq!(Timeline::bounded_fill_limit(250, 0), 1);
        assert_eq!(Timeline::bounded_fill_limit(250, 40), 40);
        assert_eq!(Timeline::bounded_fill_limit(250, 500), 100);
    }

    #[test]
    fn removing_gap_leaves_messages_in_place() {
        let (mut timeline, gap_id) = timeline_with_gap_after_50();

        assert!(timeline.remove_gap(gap_id));
        assert!(!timeline.remove_gap(gap_id));
        assert_eq!(timeline.message_count(), 12);
        assert!(timeline.gaps().next().is_none());
    }

    #[test]
    fn jump_with_only_known_messages_changes_nothing() {
        let mut timeline = Timeline::new();
        timeline.initial_load(msgs(1..=5));
        let before = timeline.entries().to_vec();

        let placement = timeline.insert_around_jump_target(
            msgs(2..=4),
            &NeighbourhoodGap::default(),
            &NeighbourhoodGap::default(),
        );

        assert_eq!(placement.inserted, 0);
        assert_eq!(placement.skipped, 3);
        assert_eq!(timeline.entries(), &before[..]);
    }

    #[test]
    fn mixed_merge_sequence_preserves_invariants() {
        // Deterministic pseudo-random sequence of merges over ids 1..=400.
        let mut timeline = Timeline::new();
        timeline.initial_load(msgs(300..=330));
        let mut state: u64 = 0x9E37_79B9_7F4A_7C15;
        let mut next = || {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state
        };

        for _ in 0..200 {
            let start = next() % 400 + 1;
            let len = next() % 12;
            let batch = msgs(start..start + len);
            match next() % 4 {
                0 => {
                    let mut batch = batch;
                    batch.reverse();
                    timeline.prepend_older(batch);
                }
                1 => {
                    timeline.append_newer(batch);
                }
                2 => {
                    let anchor = timeline
                        .gaps()
                        .next()
                        .and_then(|gap| gap.last_message_id)
                        .or_else(|| timeline.messages().next().map(|m| m.id));
                    if let Some(anchor) = anchor {
                        let requested = u32::try_from(len).unwrap_or(0) + 2;
                        let _ = timeline.insert_gap_fill(anchor, batch, requested);
                    }
                }
                _ => {
                    let last = batch.last().map(|m| m.id).unwrap_or(1);
                    timeline.insert_around_jump_target(
                        batch,
                        &open_gap(1, 3),
                        &open_gap(last, 4),
                    );
                }
            }
            assert_invariants(&timeline);
        }
    }
}
