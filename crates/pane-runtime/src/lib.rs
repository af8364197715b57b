//! Async runtime that drives a [`PaginationController`] against a
//! [`MessageSource`].
//!
//! One actor task owns the controller. Commands arrive over an mpsc channel,
//! fetches run as separate tasks, and their results are routed back into the
//! actor so every timeline mutation happens on a single task.

use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use pane_core::{
    Effects, EventStream, FetchOp, FetchRequest, FetchResponse, FetchTicket, PaginationConfig,
    PaginationController, PaneChannelError, PaneChannels, PaneCommand, PaneError, PaneSnapshot,
    SnapshotWatch,
};
use pane_source::{MessageSource, SourceError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Clone, Debug)]
pub struct PaneRuntimeHandle {
    channels: PaneChannels,
    stop: CancellationToken,
}

impl PaneRuntimeHandle {
    pub async fn send(&self, command: PaneCommand) -> Result<(), PaneChannelError> {
        self.channels.send_command(command).await
    }

    pub fn subscribe(&self) -> EventStream {
        self.channels.subscribe()
    }

    /// Most recent published state, for hosts that fell behind the event stream.
    pub fn latest_snapshot(&self) -> Option<PaneSnapshot> {
        self.channels.latest_snapshot()
    }

    pub fn watch_snapshots(&self) -> SnapshotWatch {
        self.channels.watch_snapshots()
    }

    /// Stop the runtime and cancel outstanding fetches.
    pub fn shutdown(&self) {
        self.stop.cancel();
    }
}

pub fn spawn_runtime(source: Arc<dyn MessageSource>, config: PaginationConfig) -> PaneRuntimeHandle {
    let (channels, command_rx) = PaneChannels::new(128, 512);
    let stop = CancellationToken::new();
    let runtime = PaneRuntime::new(
        channels.clone(),
        command_rx,
        source,
        config,
        stop.child_token(),
    );
    tokio::spawn(async move {
        runtime.run().await;
    });

    PaneRuntimeHandle { channels, stop }
}

struct Completion {
    ticket: FetchTicket,
    result: Result<FetchResponse, PaneError>,
}

struct PaneRuntime {
    channels: PaneChannels,
    command_rx: mpsc::Receiver<PaneCommand>,
    source: Arc<dyn MessageSource>,
    controller: PaginationController,
    completion_tx: mpsc::UnboundedSender<Completion>,
    completion_rx: mpsc::UnboundedReceiver<Completion>,
    /// Cancelled whenever the active conversation changes or closes.
    conversation_stop: CancellationToken,
    stop: CancellationToken,
}

impl PaneRuntime {
    fn new(
        channels: PaneChannels,
        command_rx: mpsc::Receiver<PaneCommand>,
        source: Arc<dyn MessageSource>,
        config: PaginationConfig,
        stop: CancellationToken,
    ) -> Self {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        Self {
            channels,
            command_rx,
            source,
            controller: PaginationController::new(config),
            completion_tx,
            completion_rx,
            conversation_stop: stop.child_token(),
            stop,
        }
    }

    async fn run(mut self) {
        info!("pane runtime started");
        loop {
            tokio::select! {
                _ = self.stop.cancelled() => break,
                command = self.command_rx.recv() => {
                    let Some(command) = command else { break };
                    self.handle_command(command);
                }
                Some(completion) = self.completion_rx.recv() => {
                    let effects = self.controller.complete(
                        completion.ticket,
                        completion.result,
                        now_millis(),
                    );
                    self.apply(effects);
                }
            }
        }
        self.conversation_stop.cancel();
        info!("pane runtime stopped");
    }

    fn handle_command(&mut self, command: PaneCommand) {
        debug!(command = command_kind(&command), "pane command received");
        if matches!(
            command,
            PaneCommand::SelectConversation { .. } | PaneCommand::Close
        ) {
            self.conversation_stop.cancel();
            self.conversation_stop = self.stop.child_token();
        }
        let effects = self.controller.handle(command, now_millis());
        self.apply(effects);
    }

    fn apply(&mut self, effects: Effects) {
        for event in effects.events {
            self.channels.emit(event);
        }
        if let Some(request) = effects.fetch {
            self.spawn_fetch(request);
        }
    }

    fn spawn_fetch(&self, request: FetchRequest) {
        let source = Arc::clone(&self.source);
        let completion_tx = self.completion_tx.clone();
        let cancel = self.conversation_stop.clone();

        tokio::spawn(async move {
            let FetchRequest { ticket, op } = request;
            let operation = ticket.kind.operation();
            debug!(
                conversation_id = %ticket.conversation_id,
                operation,
                direction = ?ticket.kind.direction(),
                "fetch started"
            );

            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(conversation_id = %ticket.conversation_id, operation, "fetch cancelled");
                    return;
                }
                result = execute(source.as_ref(), &ticket.conversation_id, op) => result,
            };
            let result = result.map_err(|err| PaneError::fetch_failed(operation, err.to_string()));
            let _ = completion_tx.send(Completion { ticket, result });
        });
    }
}

async fn execute(
    source: &dyn MessageSource,
    conversation_id: &str,
    op: FetchOp,
) -> Result<FetchResponse, SourceError> {
    match op {
        FetchOp::Page {
            cursor,
            direction,
            page_size,
        } => source
            .fetch_page(conversation_id, cursor, direction, page_size)
            .await
            .map(FetchResponse::Page),
        FetchOp::Neighbourhood {
            target,
            window,
            context_anchor,
        } => source
            .fetch_neighbourhood(conversation_id, target, window, context_anchor)
            .await
            .map(FetchResponse::Neighbourhood),
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as u64)
        .unwrap_or(0)
}

fn command_kind(command: &PaneCommand) -> &'static str {
    match command {
        PaneCommand::SelectConversation { .. } => "SelectConversation",
        PaneCommand::LoadOlder { .. } => "LoadOlder",
        PaneCommand::LoadNewer { .. } => "LoadNewer",
        PaneCommand::JumpToMessage { .. } => "JumpToMessage",
        PaneCommand::GapVisibility { .. } => "GapVisibility",
        PaneCommand::PushMessage { .. } => "PushMessage",
        PaneCommand::Close => "Close",
    }
}
