mod config;
mod logging;

use std::{error::Error, sync::Arc, time::Duration};

use config::SmokeConfig;
use pane_core::{
    EventStream, GapPlaceholder, Message, MessageId, MessageStatus, PaneCommand, PaneEvent,
    PaneSnapshot, SessionLifecycle, ViewportMetrics,
};
use pane_runtime::{PaneRuntimeHandle, spawn_runtime};
use pane_source::{InMemoryMessageSource, RetryPolicy, RetryingSource};
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

const CONVERSATION_ID: &str = "demo";
const STEP_TIMEOUT: Duration = Duration::from_secs(5);
const BASE_SENT_AT_MS: u64 = 1_700_000_000_000;

type SmokeResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

#[tokio::main]
async fn main() {
    logging::init();

    let config = match SmokeConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Failed to load configuration: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = run(config).await {
        eprintln!("Smoke run failed: {err}");
        std::process::exit(1);
    }
}

async fn run(config: SmokeConfig) -> SmokeResult<()> {
    let memory = InMemoryMessageSource::new();
    memory.insert_conversation(CONVERSATION_ID, seed_history(config.history_len))?;
    let source = RetryingSource::new(memory, RetryPolicy::default())
        .with_timeout(config.fetch_timeout)
        .with_max_retries(config.fetch_retries);

    let handle = spawn_runtime(Arc::new(source), config.pagination.clone());
    let mut events = handle.subscribe();
    let outcome = drive(&handle, &mut events, &config).await;
    handle.shutdown();
    outcome
}

async fn drive(
    handle: &PaneRuntimeHandle,
    events: &mut EventStream,
    config: &SmokeConfig,
) -> SmokeResult<()> {
    handle
        .send(PaneCommand::SelectConversation {
            conversation_id: CONVERSATION_ID.to_owned(),
        })
        .await?;
    let snapshot = wait_for(handle, events, |s| {
        matches!(s.lifecycle, SessionLifecycle::Ready | SessionLifecycle::Failed)
    })
    .await?;
    report("select", &snapshot)?;
    if snapshot.lifecycle != SessionLifecycle::Ready {
        return Err("initial load failed".into());
    }

    handle
        .send(PaneCommand::LoadOlder {
            viewport: ViewportMetrics {
                scroll_height: 3_000.0,
                scroll_offset: 0.0,
                client_height: 800.0,
            },
        })
        .await?;
    let snapshot = wait_for(handle, events, |s| !s.pagination.loading_older).await?;
    report("load_older", &snapshot)?;

    let target = config.jump_target;
    handle
        .send(PaneCommand::JumpToMessage { message_id: target })
        .await?;
    let snapshot = wait_for(handle, events, |s| {
        s.pagination.jumping_to.is_none() && contains_message(s, target)
    })
    .await?;
    report("jump", &snapshot)?;

    let Some(gap) = first_fillable_gap(&snapshot) else {
        info!("no gap left after jump; skipping gap fill");
        return Ok(());
    };

    // Gap detection stays off while the jump scroll settles.
    tokio::time::sleep(Duration::from_millis(config.pagination.jump_settle_ms + 50)).await;
    handle
        .send(PaneCommand::GapVisibility {
            gap_id: gap.id,
            visible: true,
        })
        .await?;
    wait_for(handle, events, |s| s.pagination.filling_gap.is_some()).await?;
    let snapshot = wait_for(handle, events, |s| s.pagination.filling_gap.is_none()).await?;
    report("gap_fill", &snapshot)?;

    Ok(())
}

/// Wait for the next snapshot accepted by `predicate`, logging notices on the way.
async fn wait_for<F>(
    handle: &PaneRuntimeHandle,
    events: &mut EventStream,
    predicate: F,
) -> SmokeResult<PaneSnapshot>
where
    F: Fn(&PaneSnapshot) -> bool,
{
    tokio::time::timeout(STEP_TIMEOUT, next_matching(handle, events, &predicate))
        .await
        .map_err(|_| "timed out waiting for pane state")?
}

async fn next_matching<F>(
    handle: &PaneRuntimeHandle,
    events: &mut EventStream,
    predicate: &F,
) -> SmokeResult<PaneSnapshot>
where
    F: Fn(&PaneSnapshot) -> bool,
{
    loop {
        match events.recv().await {
            Ok(PaneEvent::StateChanged(snapshot)) if predicate(&snapshot) => return Ok(snapshot),
            Ok(PaneEvent::Notice(notice)) => {
                warn!(code = %notice.code, message = %notice.message, "pane notice");
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                // The skipped events may have held the state we wait for.
                let latest = handle.latest_snapshot();
                warn!(
                    skipped,
                    resynced = latest.is_some(),
                    "event stream lagged"
                );
                if let Some(snapshot) = latest.filter(|snapshot| predicate(snapshot)) {
                    return Ok(snapshot);
                }
            }
            Err(RecvError::Closed) => return Err("event stream closed".into()),
        }
    }
}

fn report(step: &str, snapshot: &PaneSnapshot) -> SmokeResult<()> {
    let messages = snapshot
        .entries
        .iter()
        .filter_map(|entry| entry.as_message())
        .collect::<Vec<_>>();
    let gaps = snapshot
        .entries
        .iter()
        .filter_map(|entry| entry.as_gap())
        .map(|gap| {
            json!({
                "id": gap.id.0,
                "kind": format!("{:?}", gap.kind),
                "after": gap.last_message_id,
                "missing": gap.missing_count,
            })
        })
        .collect::<Vec<_>>();

    let summary = json!({
        "step": step,
        "conversation": snapshot.conversation_id,
        "lifecycle": snapshot.lifecycle,
        "messages": messages.len(),
        "oldest": messages.first().map(|message| message.id),
        "newest": messages.last().map(|message| message.id),
        "gaps": gaps,
        "pagination": snapshot.pagination,
    });
    println!("{}", serde_json::to_string(&summary)?);
    Ok(())
}

fn contains_message(snapshot: &PaneSnapshot, id: MessageId) -> bool {
    snapshot
        .entries
        .iter()
        .filter_map(|entry| entry.as_message())
        .any(|message| message.id == id)
}

fn first_fillable_gap(snapshot: &PaneSnapshot) -> Option<GapPlaceholder> {
    snapshot
        .entries
        .iter()
        .filter_map(|entry| entry.as_gap())
        .find(|gap| gap.is_fillable())
        .cloned()
}

fn seed_history(len: u64) -> Vec<Message> {
    const SENDERS: [&str; 3] = ["alice", "bob", "carol"];
    (1..=len)
        .map(|id| Message {
            id,
            sent_at_ms: BASE_SENT_AT_MS + id * 60_000,
            sender_id: SENDERS[(id % SENDERS.len() as u64) as usize].to_owned(),
            content: format!("message #{id}"),
            parent_id: None,
            status: MessageStatus::Read,
        })
        .collect()
}
