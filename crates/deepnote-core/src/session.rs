//! Session store — per-key deep-dive state.
//!
//! Records live in a plain map guarded by a short synchronous lock, so `create`,
//! `get`, `mutate` and `delete` never suspend. Whole turns are serialized per key
//! with a separate async lock taken through [`SessionStore::begin_turn`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex as TurnMutex, OwnedMutexGuard};

use crate::error::{DeepNoteError, Result};
use crate::questions::Question;

/// Session key for the push channel, which has exactly one conversation slot.
pub const PUSH_SESSION_KEY: &str = "line";

/// One recorded exchange of the deep dive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaPair {
    pub question: String,
    pub answer: String,
}

/// What the dialogue expects next.
///
/// The chosen question and the pending analysis travel inside their variants,
/// so they cannot outlive the state that needs them.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Awaiting {
    #[default]
    Idle,
    ConfirmDeepDive,
    Choice,
    Answer { question: Question },
    Continue,
    AnalysisContext,
    AnalysisFollowup { analysis: String },
}

impl Awaiting {
    pub fn state(&self) -> SessionState {
        match self {
            Self::Idle => SessionState::Idle,
            Self::ConfirmDeepDive => SessionState::WaitingDeepDive,
            Self::Choice => SessionState::WaitingChoice,
            Self::Answer { .. } => SessionState::WaitingAnswer,
            Self::Continue => SessionState::WaitingContinue,
            Self::AnalysisContext => SessionState::WaitingAnalysisContext,
            Self::AnalysisFollowup { .. } => SessionState::WaitingAnalysisFollowup,
        }
    }
}

/// Wire discriminant reported to callers: the awaiting kinds plus terminal markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    WaitingDeepDive,
    WaitingChoice,
    WaitingAnswer,
    WaitingContinue,
    WaitingAnalysisContext,
    WaitingAnalysisFollowup,
    Ended,
    Completed,
    Timeout,
    Error,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::WaitingDeepDive => "waiting_deep_dive",
            Self::WaitingChoice => "waiting_choice",
            Self::WaitingAnswer => "waiting_answer",
            Self::WaitingContinue => "waiting_continue",
            Self::WaitingAnalysisContext => "waiting_analysis_context",
            Self::WaitingAnalysisFollowup => "waiting_analysis_followup",
            Self::Ended => "ended",
            Self::Completed => "completed",
            Self::Timeout => "timeout",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of one deep-dive thread.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub session_id: String,
    /// Memo the dive is anchored on. Set once, when the memo is archived.
    pub original_memo: Option<String>,
    /// Completed exchanges; always equals `qa_pairs.len()`.
    pub round: usize,
    pub questions: Vec<Question>,
    pub qa_pairs: Vec<QaPair>,
    pub awaiting: Awaiting,
    pub last_activity_at: DateTime<Utc>,
    pub timeout_minutes: i64,
}

impl Session {
    pub fn new(session_id: &str, timeout_minutes: i64, now: DateTime<Utc>) -> Self {
        Self {
            session_id: session_id.to_string(),
            original_memo: None,
            round: 0,
            questions: Vec::new(),
            qa_pairs: Vec::new(),
            awaiting: Awaiting::Idle,
            last_activity_at: now,
            timeout_minutes,
        }
    }

    /// True once the inactivity window has passed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.last_activity_at > Duration::minutes(self.timeout_minutes)
    }

    /// Err with [`DeepNoteError::SessionExpired`] when an active dive has gone stale.
    pub fn ensure_fresh(&self, now: DateTime<Utc>) -> Result<()> {
        if self.is_active() && self.is_expired(now) {
            return Err(DeepNoteError::SessionExpired(self.timeout_minutes));
        }
        Ok(())
    }

    /// A dive is active once a memo has been archived for it.
    pub fn is_active(&self) -> bool {
        self.original_memo.is_some()
    }

    pub fn current_question(&self) -> Option<&Question> {
        match &self.awaiting {
            Awaiting::Answer { question } => Some(question),
            _ => None,
        }
    }

    pub fn current_analysis(&self) -> Option<&str> {
        match &self.awaiting {
            Awaiting::AnalysisFollowup { analysis } => Some(analysis),
            _ => None,
        }
    }

    /// Record an exchange; keeps `round` in step with `qa_pairs`.
    pub fn record(&mut self, question: &str, answer: &str) {
        self.qa_pairs.push(QaPair {
            question: question.to_string(),
            answer: answer.to_string(),
        });
        self.round = self.qa_pairs.len();
    }

    /// Start a fresh dive anchored on `memo`.
    pub fn start(&mut self, memo: &str) {
        self.original_memo = Some(memo.to_string());
        self.round = 0;
        self.questions.clear();
        self.qa_pairs.clear();
        self.awaiting = Awaiting::ConfirmDeepDive;
    }
}

type TurnLocks = Arc<Mutex<HashMap<String, Arc<TurnMutex<()>>>>>;

/// Guard held for the duration of one turn on a key.
///
/// Dropping it releases the key and forgets the key's lock once no other turn
/// holds or waits on it.
pub struct TurnGuard {
    key: String,
    turns: TurnLocks,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut turns = self.turns.lock().unwrap_or_else(PoisonError::into_inner);
        if turns.get(&self.key).is_some_and(|l| Arc::strong_count(l) == 1) {
            turns.remove(&self.key);
        }
    }
}

/// Session store — owns every session record.
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Session>>,
    turns: TurnLocks,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            turns: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Wait until no other turn is running for `key`, then hold the key until the
    /// guard is dropped.
    pub async fn begin_turn(&self, key: &str) -> TurnGuard {
        let lock = {
            let mut turns = self.turns.lock().unwrap_or_else(PoisonError::into_inner);
            turns
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(TurnMutex::new(())))
                .clone()
        };
        TurnGuard {
            key: key.to_string(),
            turns: self.turns.clone(),
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Number of keys with a turn running or waiting.
    pub fn turns_in_flight(&self) -> usize {
        let turns = self.turns.lock().unwrap_or_else(PoisonError::into_inner);
        turns.len()
    }

    /// (Re)initialize the record for `key` as a fresh idle session.
    pub fn create(&self, key: &str, timeout_minutes: i64, now: DateTime<Utc>) -> Session {
        let session = Session::new(key, timeout_minutes, now);
        self.put(session.clone());
        session
    }

    pub fn get(&self, key: &str) -> Option<Session> {
        let sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        sessions.get(key).cloned()
    }

    /// Store a record under its own `session_id`, replacing any previous one.
    pub fn put(&self, session: Session) {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        sessions.insert(session.session_id.clone(), session);
    }

    /// Apply `f` to the record for `key`. Returns `None` when there is no record.
    pub fn mutate<F, R>(&self, key: &str, f: F) -> Option<R>
    where
        F: FnOnce(&mut Session) -> R,
    {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        sessions.get_mut(key).map(f)
    }

    /// Record activity on `key`. A dive that has already timed out stays stale,
    /// so its next message still reports the timeout.
    pub fn touch(&self, key: &str, now: DateTime<Utc>) -> bool {
        self.mutate(key, |s| {
            let fresh = s.ensure_fresh(now).is_ok();
            if fresh {
                s.last_activity_at = now;
            }
            fresh
        })
        .unwrap_or(false)
    }

    /// Remove the record for `key`, returning it.
    pub fn delete(&self, key: &str) -> Option<Session> {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        sessions.remove(key)
    }

    /// Keys whose records are past their timeout, idle ones included.
    pub fn expired(&self, now: DateTime<Utc>) -> Vec<String> {
        let sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        sessions
            .values()
            .filter(|s| s.is_expired(now))
            .map(|s| s.session_id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        let sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}
