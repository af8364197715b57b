use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};

use crate::types::{PaneCommand, PaneEvent, PaneSnapshot};

/// Broadcast event stream handed to host subscribers.
pub type EventStream = broadcast::Receiver<PaneEvent>;

/// Latest published pane state; `None` until the runtime publishes once.
pub type SnapshotWatch = watch::Receiver<Option<PaneSnapshot>>;

/// Errors returned by pane channel operations.
#[derive(Debug, Error)]
pub enum PaneChannelError {
    /// The runtime stopped and dropped its command receiver.
    #[error("command channel is closed")]
    CommandChannelClosed,
}

/// Channels between the host and the pane runtime.
///
/// Events fan out over a bounded `broadcast`, so a slow host can miss some.
/// Every `StateChanged` snapshot is also kept in a `watch`, which lets a host
/// that sees `RecvError::Lagged` resynchronise from [`Self::latest_snapshot`]
/// instead of waiting for the next state change.
#[derive(Clone, Debug)]
pub struct PaneChannels {
    command_tx: mpsc::Sender<PaneCommand>,
    event_tx: broadcast::Sender<PaneEvent>,
    snapshot_tx: watch::Sender<Option<PaneSnapshot>>,
}

impl PaneChannels {
    /// Create a new channel set and return it with the command receiver.
    pub fn new(command_buffer: usize, event_buffer: usize) -> (Self, mpsc::Receiver<PaneCommand>) {
        let (command_tx, command_rx) = mpsc::channel(command_buffer.max(1));
        let (event_tx, _) = broadcast::channel(event_buffer.max(1));
        let (snapshot_tx, _) = watch::channel(None);

        (
            Self {
                command_tx,
                event_tx,
                snapshot_tx,
            },
            command_rx,
        )
    }

    pub fn subscribe(&self) -> EventStream {
        self.event_tx.subscribe()
    }

    /// Receiver that always holds the most recent snapshot.
    pub fn watch_snapshots(&self) -> SnapshotWatch {
        self.snapshot_tx.subscribe()
    }

    pub fn latest_snapshot(&self) -> Option<PaneSnapshot> {
        self.snapshot_tx.borrow().clone()
    }

    /// Send one command to the runtime.
    pub async fn send_command(&self, command: PaneCommand) -> Result<(), PaneChannelError> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| PaneChannelError::CommandChannelClosed)
    }

    /// Emit an event to all subscribers.
    ///
    /// The snapshot watch is updated before the broadcast, so a subscriber
    /// woken by an event never reads an older snapshot from the watch.
    pub fn emit(&self, event: PaneEvent) {
        if let PaneEvent::StateChanged(snapshot) = &event {
            self.snapshot_tx.send_replace(Some(snapshot.clone()));
        }
        // No subscribers is fine; the watch still holds the state.
        let _ = self.event_tx.send(event);
    }
}
