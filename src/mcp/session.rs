//! SSE session bookkeeping
//!
//! A session lives from the moment its event stream is opened until the
//! stream is dropped, a heartbeat cannot be delivered, or the store is shut
//! down. Sessions carry no application data.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    time::{interval_at, Instant, MissedTickBehavior},
};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

const EVENT_BUFFER: usize = 32;

/// Server-to-client events carried on a session stream, in emission order.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Callback path the client must POST JSON-RPC requests to.
    Endpoint(String),
    Message(Value),
    Heartbeat,
}

#[derive(Debug)]
struct SessionRecord {
    id: String,
    created_at: DateTime<Utc>,
    alive: AtomicBool,
    cancel: CancellationToken,
}

#[derive(Debug, Clone)]
pub struct SessionHandle {
    record: Arc<SessionRecord>,
}

impl SessionHandle {
    fn new(id: String) -> Self {
        Self {
            record: Arc::new(SessionRecord {
                id,
                created_at: Utc::now(),
                alive: AtomicBool::new(true),
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.record.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.record.created_at
    }

    pub fn is_alive(&self) -> bool {
        self.record.alive.load(Ordering::Acquire)
    }

    fn shut(&self) {
        self.record.alive.store(false, Ordering::Release);
        self.record.cancel.cancel();
    }
}

#[derive(Debug, Clone)]
pub struct SessionStore {
    sessions: Arc<DashMap<String, SessionHandle>>,
    heartbeat_interval: Duration,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_HEARTBEAT_INTERVAL)
    }
}

impl SessionStore {
    pub fn new(heartbeat_interval: Duration) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            heartbeat_interval,
        }
    }

    /// Registers a session, queues `greeting` ahead of any heartbeat and
    /// starts the heartbeat task. Must be called inside a tokio runtime.
    pub fn open(
        &self,
        greeting: impl FnOnce(&SessionHandle) -> Vec<SessionEvent>,
    ) -> (SessionHandle, ReceiverStream<SessionEvent>) {
        let handle = SessionHandle::new(new_session_id());
        let (sender, receiver) = mpsc::channel(EVENT_BUFFER);

        for event in greeting(&handle) {
            if sender.try_send(event).is_err() {
                debug!(session_id = %handle.id(), "greeting event dropped");
            }
        }

        self.sessions
            .insert(handle.id().to_string(), handle.clone());
        info!(session_id = %handle.id(), active = self.sessions.len(), "session opened");

        tokio::spawn(run_heartbeat(
            self.clone(),
            handle.clone(),
            sender,
            self.heartbeat_interval,
        ));

        (handle, ReceiverStream::new(receiver))
    }

    pub fn get(&self, id: &str) -> Option<SessionHandle> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    /// Idempotent: unknown or already closed ids are ignored.
    pub fn close(&self, id: &str) {
        if let Some((_, handle)) = self.sessions.remove(id) {
            handle.shut();
            debug!(session_id = %id, "session released");
        }
    }

    pub fn close_all(&self) {
        let ids = self
            .sessions
            .iter()
            .map(|entry| entry.key().clone())
            .collect::<Vec<_>>();
        for id in &ids {
            self.close(id);
        }
        info!(closed = ids.len(), "all sessions closed");
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

fn new_session_id() -> String {
    format!(
        "{:x}-{}",
        Utc::now().timestamp_millis(),
        Uuid::new_v4().simple()
    )
}

async fn run_heartbeat(
    store: SessionStore,
    handle: SessionHandle,
    sender: mpsc::Sender<SessionEvent>,
    period: Duration,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let reason = loop {
        tokio::select! {
            _ = handle.record.cancel.cancelled() => break "closed",
            _ = sender.closed() => break "client disconnected",
            _ = ticker.tick() => match sender.try_send(SessionEvent::Heartbeat) {
                Ok(()) => debug!(session_id = %handle.id(), "heartbeat sent"),
                Err(TrySendError::Full(_)) => {
                    debug!(session_id = %handle.id(), "heartbeat skipped, stream backlogged");
                }
                Err(TrySendError::Closed(_)) => break "heartbeat write failed",
            },
        }
    };

    store.close(handle.id());
    info!(
        session_id = %handle.id(),
        reason,
        lifetime_secs = (Utc::now() - handle.created_at()).num_seconds(),
        "session closed"
    );
}
