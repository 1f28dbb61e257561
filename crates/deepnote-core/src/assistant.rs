//! Note assistant — the transport-agnostic entry point for every inbound message.
//!
//! Routing order for a text message:
//! 1. A leading `YYYY/MM/DD` or `YYYY-MM-DD` goes to the daily log.
//! 2. An active session past its timeout is replaced by a fresh one and the
//!    message is discarded with a timeout notice.
//! 3. Everything else runs through the deep-dive state machine.
//!
//! Images are archived and linked from the day's notes. Images and dated entries
//! leave the dialogue where it is but count as activity while it is still live.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use rand::Rng;
use tracing::{debug, info, warn};

use crate::analysis::AnalysisGenerator;
use crate::archive::{DailyLog, DatedEntry, NoteArchive, parse_dated_entry};
use crate::config::DeepNoteConfig;
use crate::deep_dive::{DeepDive, Turn};
use crate::document::DocumentStore;
use crate::error::Result;
use crate::message::{InboundMessage, Payload};
use crate::provider::LlmProvider;
use crate::questions::QuestionGenerator;
use crate::session::{PUSH_SESSION_KEY, Session, SessionState, SessionStore};

/// Outcome of [`NoteAssistant::sweep_expired`].
#[derive(Debug, Default, PartialEq)]
pub struct Sweep {
    /// Push-channel dialogues that timed out; their user should be told.
    pub timed_out: Vec<String>,
    /// Idle records dropped after their inactivity window.
    pub reclaimed: usize,
}

impl Sweep {
    pub fn total(&self) -> usize {
        self.timed_out.len() + self.reclaimed
    }
}

pub struct NoteAssistant {
    sessions: SessionStore,
    archive: Arc<NoteArchive>,
    daily: DailyLog,
    deep_dive: DeepDive,
    review_since: NaiveDate,
}

impl NoteAssistant {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        provider: Arc<dyn LlmProvider>,
        config: &DeepNoteConfig,
    ) -> Result<Self> {
        let archive = Arc::new(NoteArchive::from_settings(store.clone(), &config.archive)?);
        let daily = DailyLog::new(store, &config.archive.daily_base_dir);
        let dd = &config.deep_dive;
        let deep_dive = DeepDive::new(
            archive.clone(),
            QuestionGenerator::new(provider.clone(), dd, &config.provider),
            AnalysisGenerator::new(provider, dd, &config.provider),
            dd.keywords.clone(),
            dd.max_rounds,
        );

        Ok(Self {
            sessions: SessionStore::new(),
            archive,
            daily,
            deep_dive,
            review_since: config.archive.review_since,
        })
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn archive(&self) -> &NoteArchive {
        &self.archive
    }

    /// Snapshot of the session stored under `key`.
    pub fn session(&self, key: &str) -> Option<Session> {
        self.sessions.get(key)
    }

    /// Process a message now. `timeout_minutes` is the channel's inactivity window.
    pub async fn handle(&self, msg: InboundMessage, timeout_minutes: i64) -> Turn {
        self.handle_at(msg, timeout_minutes, Utc::now()).await
    }

    /// Process a message as if received at `now`.
    pub async fn handle_at(&self, msg: InboundMessage, timeout_minutes: i64, now: DateTime<Utc>) -> Turn {
        let key = msg.session_key.clone();
        let _turn = self.sessions.begin_turn(&key).await;

        let turn = match msg.payload {
            Payload::Image { data, extension } => self.save_image(&key, &data, &extension, now).await,
            Payload::Text(text) => match parse_dated_entry(text.trim()) {
                Some(entry) => self.save_daily(&key, &entry, now).await,
                None => self.converse(&key, &text, timeout_minutes, now).await,
            },
        };

        info!(
            "[{}:{}] → {} (success={})",
            msg.channel, key, turn.state, turn.success
        );
        turn
    }

    async fn converse(&self, key: &str, text: &str, timeout_minutes: i64, now: DateTime<Utc>) -> Turn {
        let mut session = self
            .sessions
            .get(key)
            .unwrap_or_else(|| Session::new(key, timeout_minutes, now));

        if let Err(e) = session.ensure_fresh(now) {
            info!("Session {}: {}", key, e);
            self.sessions.create(key, timeout_minutes, now);
            return Turn::ok(
                SessionState::Timeout,
                format!(
                    "The session timed out ({} minutes without activity). Please send a new memo.",
                    session.timeout_minutes
                ),
            );
        }

        session.last_activity_at = now;
        let step = self.deep_dive.step(session, text, now).await;

        match step.next {
            Some(next) => self.sessions.put(next),
            None => {
                self.sessions.delete(key);
            }
        }
        step.turn
    }

    async fn save_daily(&self, key: &str, entry: &DatedEntry, now: DateTime<Utc>) -> Turn {
        self.sessions.touch(key, now);
        let state = self.current_state(key);
        match self.daily.save(entry).await {
            Ok(url) => Turn::ok(state, format!("Saved to the daily log!\n{}", url)),
            Err(e) => {
                warn!("Failed to save daily log: {}", e);
                Turn::failed(state, "Failed to save the daily log.", &e)
            }
        }
    }

    async fn save_image(&self, key: &str, data: &[u8], extension: &str, now: DateTime<Utc>) -> Turn {
        self.sessions.touch(key, now);
        let state = self.current_state(key);
        match self.archive.append_image_link(data, extension, now).await {
            Ok(url) => Turn::ok(state, format!("Image saved!\n{}", url)),
            Err(e) => {
                warn!("Failed to save image: {}", e);
                Turn::failed(state, "Failed to save the image.", &e)
            }
        }
    }

    fn current_state(&self, key: &str) -> SessionState {
        self.sessions
            .get(key)
            .map(|s| s.awaiting.state())
            .unwrap_or(SessionState::Idle)
    }

    /// Clear the push channel's stale dialogue and reclaim idle records past
    /// their window.
    ///
    /// Stale dialogues on other keys are left in place: their next message is
    /// what reports the timeout.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Sweep {
        let mut sweep = Sweep::default();
        for key in self.sessions.expired(now) {
            let _turn = self.sessions.begin_turn(&key).await;
            // A turn may have refreshed it while we waited.
            let Some(session) = self.sessions.get(&key).filter(|s| s.is_expired(now)) else {
                continue;
            };
            if !session.is_active() {
                self.sessions.delete(&key);
                sweep.reclaimed += 1;
            } else if key == PUSH_SESSION_KEY {
                self.sessions.delete(&key);
                info!("Swept stale session {}", key);
                sweep.timed_out.push(key);
            }
        }
        if sweep.reclaimed > 0 {
            debug!("Reclaimed {} idle sessions", sweep.reclaimed);
        }
        sweep
    }

    /// Text for the review push: a random past day's notes.
    pub async fn review<R: Rng>(&self, rng: &mut R, now: DateTime<Utc>) -> Result<String> {
        let today = self.archive.clock().day(now);
        let day = NoteArchive::random_day(self.review_since, today, rng);
        let content = self
            .archive
            .read_day(day)
            .await?
            .unwrap_or_else(|| "No content found.".to_string());
        let days_ago = (today - day).num_days();
        Ok(format!(
            "{} ({} days ago)\n\n{}",
            day.format("%Y.%-m.%-d"),
            days_ago,
            content
        ))
    }
}
