use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, MutexGuard, RwLock};
use tokio_util::sync::CancellationToken;

use maitre_core::domain::conversation::{ConversationHistory, SessionId};
use maitre_core::domain::reservation::ReservationDraft;
use maitre_core::flows::TurnState;

/// Everything the orchestrator remembers about one conversation.
#[derive(Clone, Debug)]
pub struct SessionState {
    pub history: ConversationHistory,
    pub draft: ReservationDraft,
    /// Set while the local flow is still collecting booking details, even
    /// if nothing has been captured yet.
    pub booking_active: bool,
    pub turn_state: TurnState,
}

impl SessionState {
    pub fn new(max_history_turns: usize) -> Self {
        Self {
            history: ConversationHistory::new(max_history_turns),
            draft: ReservationDraft::default(),
            booking_active: false,
            turn_state: TurnState::Idle,
        }
    }
}

/// Shared handle to one session. Turns serialize on `lock`; pacing of the
/// in-flight turn is cut short through its cancellation token.
#[derive(Clone)]
pub struct SessionHandle {
    state: Arc<Mutex<SessionState>>,
    pacing: Arc<StdMutex<CancellationToken>>,
    last_seen: Arc<StdMutex<Instant>>,
}

impl SessionHandle {
    fn new(max_history_turns: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(SessionState::new(max_history_turns))),
            pacing: Arc::new(StdMutex::new(CancellationToken::new())),
            last_seen: Arc::new(StdMutex::new(Instant::now())),
        }
    }

    pub async fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().await
    }

    /// Cancels whatever pacing is running and hands out a fresh token for the
    /// next turn.
    pub fn begin_pacing(&self) -> CancellationToken {
        let fresh = CancellationToken::new();
        let mut current = match self.pacing.lock() {
            Ok(current) => current,
            Err(poisoned) => poisoned.into_inner(),
        };
        current.cancel();
        *current = fresh.clone();
        fresh
    }

    fn touch(&self) {
        match self.last_seen.lock() {
            Ok(mut seen) => *seen = Instant::now(),
            Err(poisoned) => *poisoned.into_inner() = Instant::now(),
        }
    }

    fn idle_for(&self) -> Duration {
        match self.last_seen.lock() {
            Ok(seen) => seen.elapsed(),
            Err(poisoned) => poisoned.into_inner().elapsed(),
        }
    }

    /// A turn is holding the state lock.
    fn is_busy(&self) -> bool {
        self.state.try_lock().is_err()
    }

    pub fn cancel_pacing(&self) {
        match self.pacing.lock() {
            Ok(current) => current.cancel(),
            Err(poisoned) => poisoned.into_inner().cancel(),
        }
    }
}

pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, SessionHandle>>,
    max_history_turns: usize,
}

impl SessionRegistry {
    pub fn new(max_history_turns: usize) -> Self {
        Self { sessions: RwLock::new(HashMap::new()), max_history_turns }
    }

    pub async fn handle(&self, session_id: &SessionId) -> SessionHandle {
        if let Some(handle) = self.sessions.read().await.get(session_id) {
            handle.touch();
            return handle.clone();
        }
        let handle = self
            .sessions
            .write()
            .await
            .entry(session_id.clone())
            .or_insert_with(|| SessionHandle::new(self.max_history_turns))
            .clone();
        handle.touch();
        handle
    }

    pub async fn get(&self, session_id: &SessionId) -> Option<SessionHandle> {
        self.sessions.read().await.get(session_id).cloned()
    }

    pub async fn remove(&self, session_id: &SessionId) -> Option<SessionHandle> {
        self.sessions.write().await.remove(session_id)
    }

    /// Drops sessions untouched for at least `max_idle`. Sessions with a turn
    /// in flight are kept.
    pub async fn evict_idle(&self, max_idle: Duration) -> Vec<(SessionId, SessionHandle)> {
        let mut sessions = self.sessions.write().await;
        let expired: Vec<SessionId> = sessions
            .iter()
            .filter(|(_, handle)| handle.idle_for() >= max_idle && !handle.is_busy())
            .map(|(id, _)| id.clone())
            .collect();
        expired
            .into_iter()
            .filter_map(|id| sessions.remove(&id).map(|handle| (id, handle)))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}
