use tracing::{debug, trace, warn};

use crate::{
    error::PaneError,
    gap_detector::{GapDecision, GapDetector},
    lifecycle::{SessionLifecycle, SessionStateMachine},
    timeline::Timeline,
    types::{
        Cursor, Direction, GapId, GapKind, Message, MessageId, Neighbourhood, PaginationConfig,
        PaginationState, PaneCommand, PaneEvent, PaneSnapshot,
    },
    viewport::{AnchorPlan, ViewportAnchor, ViewportCommand, ViewportMetrics},
};

/// What an outstanding fetch was issued for.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchKind {
    /// Newest page of a freshly selected conversation.
    Initial,
    /// Page older than `edge`, the oldest message when issued.
    Older { edge: Cursor, plan: AnchorPlan },
    /// Page newer than `edge`, the newest message when issued.
    Newer { edge: Cursor, plan: AnchorPlan },
    GapFill {
        gap_id: GapId,
        kind: GapKind,
        anchor_id: MessageId,
        /// Placeholder `missing_count` when the fill was issued.
        requested: u32,
    },
    Jump { target: MessageId },
}

impl FetchKind {
    /// Operation name used in error codes and logs.
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Initial => "initial_load",
            Self::Older { .. } => "load_older",
            Self::Newer { .. } => "load_newer",
            Self::GapFill { .. } => "gap_fill",
            Self::Jump { .. } => "jump_to_message",
        }
    }

    pub fn direction(&self) -> Option<Direction> {
        match self {
            Self::Initial | Self::Older { .. } => Some(Direction::Up),
            Self::Newer { .. } | Self::GapFill { .. } => Some(Direction::Down),
            Self::Jump { .. } => None,
        }
    }
}

/// Identity of one issued fetch. Results are matched back by ticket.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchTicket {
    pub conversation_id: String,
    /// Bumped on every conversation switch and on close.
    pub generation: u64,
    pub seq: u64,
    pub kind: FetchKind,
}

/// Call to make against the message source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOp {
    Page {
        cursor: Option<Cursor>,
        direction: Direction,
        page_size: u32,
    },
    /// `window` messages on each side of `target`.
    Neighbourhood {
        target: MessageId,
        window: u32,
        context_anchor: Option<MessageId>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub ticket: FetchTicket,
    pub op: FetchOp,
}

/// Source answer fed back through [`PaginationController::complete`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchResponse {
    Page(Vec<Message>),
    /// `None` when the target no longer exists.
    Neighbourhood(Option<Neighbourhood>),
}

/// Output of one controller step: events to publish and at most one fetch to run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Effects {
    pub events: Vec<PaneEvent>,
    pub fetch: Option<FetchRequest>,
}

impl Effects {
    pub fn none() -> Self {
        Self::default()
    }

    fn emit(events: Vec<PaneEvent>) -> Self {
        Self {
            events,
            fetch: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.fetch.is_none()
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct PendingFetches {
    initial: Option<u64>,
    older: Option<u64>,
    /// Newer pages and gap fills share the downward slot.
    newer: Option<u64>,
    jump: Option<u64>,
}

impl PendingFetches {
    fn slot_mut(&mut self, kind: &FetchKind) -> &mut Option<u64> {
        match kind {
            FetchKind::Initial => &mut self.initial,
            FetchKind::Older { .. } => &mut self.older,
            FetchKind::Newer { .. } | FetchKind::GapFill { .. } => &mut self.newer,
            FetchKind::Jump { .. } => &mut self.jump,
        }
    }
}

/// Owns the timeline of the active conversation and decides what to fetch.
///
/// The controller performs no I/O. Every method returns [`Effects`]; the
/// caller publishes the events, runs the fetch, and hands the result back to
/// [`PaginationController::complete`] in whatever order fetches resolve.
#[derive(Debug, Clone)]
pub struct PaginationController {
    config: PaginationConfig,
    session: SessionStateMachine,
    conversation_id: Option<String>,
    generation: u64,
    next_seq: u64,
    timeline: Timeline,
    state: PaginationState,
    anchor: ViewportAnchor,
    detector: GapDetector,
    pending: PendingFetches,
}

impl PaginationController {
    pub fn new(config: PaginationConfig) -> Self {
        let anchor = ViewportAnchor::new(&config);
        Self {
            config,
            session: SessionStateMachine::default(),
            conversation_id: None,
            generation: 0,
            next_seq: 0,
            timeline: Timeline::new(),
            state: PaginationState::default(),
            anchor,
            detector: GapDetector::new(),
            pending: PendingFetches::default(),
        }
    }

    pub fn config(&self) -> &PaginationConfig {
        &self.config
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn state(&self) -> &PaginationState {
        &self.state
    }

    pub fn lifecycle(&self) -> SessionLifecycle {
        self.session.state()
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn snapshot(&self) -> PaneSnapshot {
        PaneSnapshot {
            conversation_id: self.conversation_id.clone(),
            lifecycle: self.session.state(),
            entries: self.timeline.entries().to_vec(),
            pagination: self.state.clone(),
        }
    }

    /// Route a host command to the matching operation.
    pub fn handle(&mut self, command: PaneCommand, now_ms: u64) -> Effects {
        match command {
            PaneCommand::SelectConversation { conversation_id } => {
                self.select_conversation(conversation_id)
            }
            PaneCommand::LoadOlder { viewport } => self.load_older(&viewport),
            PaneCommand::LoadNewer { viewport } => self.load_newer(&viewport),
            PaneCommand::JumpToMessage { message_id } => self.jump_to_message(message_id, now_ms),
            PaneCommand::GapVisibility { gap_id, visible } => {
                self.on_gap_visibility(gap_id, visible, now_ms)
            }
            PaneCommand::PushMessage { message, viewport } => {
                self.push_message(message, &viewport)
            }
            PaneCommand::Close => self.close(),
        }
    }

    /// Reset everything and load the newest page of `conversation_id`.
    ///
    /// Results of fetches issued for the previous conversation are discarded
    /// when they arrive.
    pub fn select_conversation(&mut self, conversation_id: impl Into<String>) -> Effects {
        let conversation_id = conversation_id.into();
        debug!(%conversation_id, previous = ?self.conversation_id, "selecting conversation");

        self.reset();
        self.conversation_id = Some(conversation_id);
        self.session.on_select();
        self.state = PaginationState::fresh();
        self.state.loading_older = true;

        let fetch = self.issue(
            FetchKind::Initial,
            FetchOp::Page {
                cursor: None,
                direction: Direction::Up,
                page_size: self.config.page_size,
            },
        );
        Effects {
            events: vec![self.state_changed()],
            fetch,
        }
    }

    /// Tear down the session. Late results are discarded.
    pub fn close(&mut self) -> Effects {
        debug!(conversation_id = ?self.conversation_id, "closing pane");
        self.reset();
        self.conversation_id = None;
        self.session.on_close();
        Effects::emit(vec![self.state_changed()])
    }

    pub fn load_older(&mut self, viewport: &ViewportMetrics) -> Effects {
        if !self.accepts("load_older") {
            return Effects::none();
        }
        if self.state.loading_older || !self.state.has_more_older {
            trace!(state = ?self.state, "load_older skipped");
            return Effects::none();
        }
        if self.state.filling_gap.is_some() {
            trace!("load_older blocked by gap fill");
            return Effects::none();
        }
        let Some(edge) = self.timeline.oldest_known() else {
            return Effects::none();
        };

        let plan = self.anchor.plan_prepend(viewport);
        self.state.loading_older = true;
        let fetch = self.issue(
            FetchKind::Older { edge, plan },
            FetchOp::Page {
                cursor: Some(edge),
                direction: Direction::Up,
                page_size: self.config.page_size,
            },
        );
        Effects {
            events: vec![self.state_changed()],
            fetch,
        }
    }

    pub fn load_newer(&mut self, viewport: &ViewportMetrics) -> Effects {
        if !self.accepts("load_newer") {
            return Effects::none();
        }
        if self.state.loading_newer || !self.state.has_more_newer {
            trace!(state = ?self.state, "load_newer skipped");
            return Effects::none();
        }
        if self.state.filling_gap.is_some() {
            trace!("load_newer blocked by gap fill");
            return Effects::none();
        }
        let Some(edge) = self.timeline.newest_known() else {
            return Effects::none();
        };

        let plan = self.anchor.plan_append(viewport);
        self.state.loading_newer = true;
        let fetch = self.issue(
            FetchKind::Newer { edge, plan },
            FetchOp::Page {
                cursor: Some(edge),
                direction: Direction::Down,
                page_size: self.config.page_size,
            },
        );
        Effects {
            events: vec![self.state_changed()],
            fetch,
        }
    }

    /// Bring `target` into view, fetching its neighbourhood when not loaded.
    pub fn jump_to_message(&mut self, target: MessageId, now_ms: u64) -> Effects {
        if !self.accepts("jump_to_message") {
            return Effects::none();
        }
        if self.timeline.contains(target) {
            return Effects::emit(vec![self.scroll_to(target, now_ms)]);
        }
        if self.state.jumping_to.is_some() || self.state.filling_gap.is_some() {
            debug!(target, state = ?self.state, "jump_to_message blocked by outstanding fetch");
            return Effects::none();
        }

        self.state.jumping_to = Some(target);
        let context_anchor = self.timeline.messages().next().map(|message| message.id);
        let fetch = self.issue(
            FetchKind::Jump { target },
            FetchOp::Neighbourhood {
                target,
                window: self.config.neighbourhood_window,
                context_anchor,
            },
        );
        Effects {
            events: vec![self.state_changed()],
            fetch,
        }
    }

    /// Visibility signal for a placeholder; may start a gap fill.
    pub fn on_gap_visibility(&mut self, gap_id: GapId, visible: bool, now_ms: u64) -> Effects {
        if !self.accepts("gap_visibility") {
            return Effects::none();
        }
        let busy = self.state.filling_gap.is_some() || self.state.any_in_flight();
        let gap = self.timeline.gap(gap_id).cloned();

        match self
            .detector
            .evaluate(gap_id, gap.as_ref(), visible, busy, now_ms)
        {
            GapDecision::Fill {
                gap_id,
                kind,
                anchor_id,
                missing_count,
            } => {
                let Some(boundary) = gap.as_ref().and_then(|gap| gap.boundary()) else {
                    return Effects::none();
                };
                let page_size =
                    Timeline::bounded_fill_limit(missing_count, self.config.gap_fill_cap);
                debug!(gap_id = gap_id.0, anchor_id, missing_count, page_size, "filling gap");

                self.state.filling_gap = Some(kind);
                self.state.loading_newer = true;
                let fetch = self.issue(
                    FetchKind::GapFill {
                        gap_id,
                        kind,
                        anchor_id,
                        requested: missing_count,
                    },
                    FetchOp::Page {
                        cursor: Some(boundary),
                        direction: Direction::Down,
                        page_size,
                    },
                );
                Effects {
                    events: vec![self.state_changed()],
                    fetch,
                }
            }
            GapDecision::Malformed => {
                let err = PaneError::malformed_gap(gap_id);
                warn!(error = %err, ?gap, "dropping gap placeholder");
                self.detector.forget(gap_id);
                if self.timeline.remove_gap(gap_id) {
                    self.detector.rearm();
                    Effects::emit(vec![self.state_changed()])
                } else {
                    Effects::none()
                }
            }
            GapDecision::Ignore(reason) => {
                trace!(gap_id = gap_id.0, ?reason, "gap visibility ignored");
                Effects::none()
            }
        }
    }

    /// Append a live message when the window is at the newest edge.
    pub fn push_message(&mut self, message: Message, viewport: &ViewportMetrics) -> Effects {
        if !self.accepts("push_message") {
            return Effects::none();
        }
        if self.state.has_more_newer {
            debug!(message_id = message.id, "window is behind the live edge; live message deferred to load_newer");
            return Effects::none();
        }

        let plan = self.anchor.plan_append(viewport);
        let outcome = self.timeline.append_newer(vec![message]);
        if outcome.inserted == 0 {
            return Effects::none();
        }
        self.detector.rearm();
        let mut events = vec![self.state_changed()];
        if plan != AnchorPlan::Untouched {
            events.push(PaneEvent::Viewport(ViewportCommand::Restore(plan)));
        }
        Effects::emit(events)
    }

    /// Apply the result of a fetch issued by this controller.
    pub fn complete(
        &mut self,
        ticket: FetchTicket,
        result: Result<FetchResponse, PaneError>,
        now_ms: u64,
    ) -> Effects {
        if ticket.generation != self.generation
            || self.conversation_id.as_deref() != Some(ticket.conversation_id.as_str())
        {
            debug!(
                conversation_id = %ticket.conversation_id,
                operation = ticket.kind.operation(),
                "discarding result for a stale conversation"
            );
            return Effects::none();
        }
        let slot = self.pending.slot_mut(&ticket.kind);
        if *slot != Some(ticket.seq) {
            debug!(
                seq = ticket.seq,
                operation = ticket.kind.operation(),
                "discarding superseded fetch result"
            );
            return Effects::none();
        }
        *slot = None;

        let mut effects = match ticket.kind {
            FetchKind::Initial => self.complete_initial(result),
            FetchKind::Older { edge, plan } => self.complete_older(edge, plan, result),
            FetchKind::Newer { edge, plan } => self.complete_newer(edge, plan, result),
            FetchKind::GapFill {
                anchor_id,
                requested,
                ..
            } => self.complete_gap_fill(anchor_id, requested, result),
            FetchKind::Jump { target } => self.complete_jump(target, result, now_ms),
        };
        self.resume_visible_gap(&mut effects, now_ms);
        effects
    }

    /// Retry placeholders that became visible while a fetch was outstanding.
    ///
    /// The host reports visibility once, so a placeholder ignored as busy
    /// would otherwise stay on screen unfilled.
    fn resume_visible_gap(&mut self, effects: &mut Effects, now_ms: u64) {
        if effects.fetch.is_some() || self.session.state() != SessionLifecycle::Ready {
            return;
        }
        let visible: Vec<GapId> = self
            .timeline
            .gaps()
            .map(|gap| gap.id)
            .filter(|id| self.detector.is_visible(*id))
            .collect();
        for gap_id in visible {
            if self.state.filling_gap.is_some() || self.state.any_in_flight() {
                return;
            }
            let resumed = self.on_gap_visibility(gap_id, true, now_ms);
            effects.events.extend(resumed.events);
            if resumed.fetch.is_some() {
                effects.fetch = resumed.fetch;
                return;
            }
        }
    }

    fn complete_initial(&mut self, result: Result<FetchResponse, PaneError>) -> Effects {
        self.state.loading_older = false;
        let batch = match page_from(result, "initial_load") {
            Ok(batch) => batch,
            Err(err) => {
                if let Err(transition) = self.session.on_initial_failed() {
                    warn!(error = %transition, "initial load failure in unexpected state");
                }
                return self.fetch_failed("initial_load", err);
            }
        };
        if let Err(err) = self.session.on_initial_loaded() {
            warn!(error = %err, "initial page arrived in unexpected state");
            return Effects::none();
        }

        let received = batch.len();
        let outcome = self.timeline.initial_load(batch);
        self.state.has_more_older = received >= self.config.page_size as usize;
        self.state.has_more_newer = false;
        self.detector.rearm();
        debug!(
            conversation_id = ?self.conversation_id,
            count = outcome.inserted,
            has_more_older = self.state.has_more_older,
            "initial page loaded"
        );

        Effects::emit(vec![
            self.state_changed(),
            PaneEvent::Viewport(ViewportCommand::Restore(AnchorPlan::StickToBottom)),
        ])
    }

    fn complete_older(
        &mut self,
        edge: Cursor,
        plan: AnchorPlan,
        result: Result<FetchResponse, PaneError>,
    ) -> Effects {
        self.state.loading_older = false;
        let batch = match page_from(result, "load_older") {
            Ok(batch) => batch,
            Err(err) => return self.fetch_failed("load_older", err),
        };
        if self.timeline.oldest_known() != Some(edge) {
            debug!("older page issued against a moved edge; discarding");
            return Effects::emit(vec![self.state_changed()]);
        }

        let received = batch.len();
        let outcome = self.timeline.prepend_older(batch);
        if received < self.config.page_size as usize {
            self.state.has_more_older = false;
        }
        trace!(
            direction = ?Direction::Up,
            count = outcome.inserted,
            skipped = outcome.skipped,
            has_more_older = self.state.has_more_older,
            "older page merged"
        );

        let mut events = vec![self.state_changed()];
        if outcome.inserted > 0 {
            self.detector.rearm();
            events.push(PaneEvent::Viewport(ViewportCommand::Restore(plan)));
        }
        Effects::emit(events)
    }

    fn complete_newer(
        &mut self,
        edge: Cursor,
        plan: AnchorPlan,
        result: Result<FetchResponse, PaneError>,
    ) -> Effects {
        self.state.loading_newer = false;
        let batch = match page_from(result, "load_newer") {
            Ok(batch) => batch,
            Err(err) => return self.fetch_failed("load_newer", err),
        };
        if self.timeline.newest_known() != Some(edge) {
            debug!("newer page issued against a moved edge; discarding");
            return Effects::emit(vec![self.state_changed()]);
        }

        let received = batch.len();
        let outcome = self.timeline.append_newer(batch);
        if received < self.config.page_size as usize {
            self.state.has_more_newer = false;
        }
        trace!(
            direction = ?Direction::Down,
            count = outcome.inserted,
            skipped = outcome.skipped,
            has_more_newer = self.state.has_more_newer,
            "newer page merged"
        );

        let mut events = vec![self.state_changed()];
        if outcome.inserted > 0 {
            self.detector.rearm();
            if plan != AnchorPlan::Untouched {
                events.push(PaneEvent::Viewport(ViewportCommand::Restore(plan)));
            }
        }
        Effects::emit(events)
    }

    fn complete_gap_fill(
        &mut self,
        anchor_id: MessageId,
        requested: u32,
        result: Result<FetchResponse, PaneError>,
    ) -> Effects {
        self.state.loading_newer = false;
        self.state.filling_gap = None;
        // Structural change or not, a still-visible placeholder may report again.
        self.detector.rearm();

        let batch = match page_from(result, "gap_fill") {
            Ok(batch) => batch,
            Err(err) => return self.fetch_failed("gap_fill", err),
        };
        match self.timeline.insert_gap_fill(anchor_id, batch, requested) {
            Ok(outcome) => {
                debug!(
                    anchor_id,
                    count = outcome.inserted,
                    gap = ?outcome.gap,
                    "gap fill merged"
                );
                Effects::emit(vec![self.state_changed()])
            }
            Err(err) => {
                let err = PaneError::from(err);
                warn!(error = %err, "gap fill could not be merged");
                Effects::emit(vec![self.state_changed(), PaneEvent::Notice(err)])
            }
        }
    }

    fn complete_jump(
        &mut self,
        target: MessageId,
        result: Result<FetchResponse, PaneError>,
        now_ms: u64,
    ) -> Effects {
        self.state.jumping_to = None;
        let neighbourhood = match result {
            Ok(FetchResponse::Neighbourhood(neighbourhood)) => neighbourhood,
            Ok(FetchResponse::Page(_)) => {
                let err = PaneError::fetch_failed(
                    "jump_to_message",
                    "source answered a neighbourhood request with a page",
                );
                return self.fetch_failed("jump_to_message", err);
            }
            Err(err) => return self.fetch_failed("jump_to_message", err),
        };
        let Some(neighbourhood) = neighbourhood else {
            return self.target_gone(target);
        };

        let Neighbourhood {
            messages,
            gap_before,
            gap_after,
        } = neighbourhood;
        let placement = self
            .timeline
            .insert_around_jump_target(messages, &gap_before, &gap_after);
        if placement.at_head {
            self.state.has_more_older = gap_before.exists;
        }
        if placement.at_tail {
            self.state.has_more_newer = gap_after.exists;
        }
        if placement.inserted > 0 {
            self.detector.rearm();
        }
        debug!(target, ?placement, "jump neighbourhood merged");

        if !self.timeline.contains(target) {
            return self.target_gone(target);
        }
        Effects::emit(vec![self.state_changed(), self.scroll_to(target, now_ms)])
    }

    fn target_gone(&self, target: MessageId) -> Effects {
        let err = PaneError::target_gone(target);
        debug!(target, "jump target no longer exists");
        Effects::emit(vec![self.state_changed(), PaneEvent::Notice(err)])
    }

    fn fetch_failed(&self, operation: &str, err: PaneError) -> Effects {
        warn!(
            conversation_id = ?self.conversation_id,
            operation,
            error = %err,
            "fetch failed; timeline left unchanged"
        );
        Effects::emit(vec![self.state_changed(), PaneEvent::Notice(err)])
    }

    fn scroll_to(&mut self, target: MessageId, now_ms: u64) -> PaneEvent {
        self.detector
            .suppress_until(self.anchor.settle_deadline(now_ms));
        PaneEvent::Viewport(self.anchor.scroll_into_view(target))
    }

    fn accepts(&self, action: &str) -> bool {
        match self.session.require_ready(action) {
            Ok(()) => true,
            Err(err) => {
                debug!(error = %err, "ignoring command");
                false
            }
        }
    }

    fn issue(&mut self, kind: FetchKind, op: FetchOp) -> Option<FetchRequest> {
        let conversation_id = self.conversation_id.clone()?;
        let seq = self.next_seq;
        self.next_seq += 1;
        *self.pending.slot_mut(&kind) = Some(seq);
        trace!(%conversation_id, seq, operation = kind.operation(), ?op, "issuing fetch");
        Some(FetchRequest {
            ticket: FetchTicket {
                conversation_id,
                generation: self.generation,
                seq,
                kind,
            },
            op,
        })
    }

    fn reset(&mut self) {
        self.generation += 1;
        self.timeline.clear();
        self.state = PaginationState::default();
        self.detector.reset();
        self.pending = PendingFetches::default();
    }

    fn state_changed(&self) -> PaneEvent {
        PaneEvent::StateChanged(self.snapshot())
    }
}

fn page_from(
    result: Result<FetchResponse, PaneError>,
    operation: &str,
) -> Result<Vec<Message>, PaneError> {
    match result? {
        FetchResponse::Page(batch) => Ok(batch),
        FetchResponse::Neighbourhood(_) => Err(PaneError::fetch_failed(
            operation,
            "source answered a page request with a neighbourhood",
        )),
    }
}
