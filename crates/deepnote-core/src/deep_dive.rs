//! Deep-dive state machine — the guided Q&A dialogue anchored on one memo.
//!
//! Each call to [`DeepDive::step`] consumes one message against a working copy of
//! the session and returns the reply together with the record to store (or `None`
//! when the session ends). Upstream failures hand back the record as it was, so a
//! failed LLM or archive call never moves the dialogue.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::analysis::AnalysisGenerator;
use crate::archive::{ANALYSIS_QUESTION, NoteArchive};
use crate::config::Keywords;
use crate::error::DeepNoteError;
use crate::questions::{Question, QuestionGenerator};
use crate::session::{Awaiting, Session, SessionState};

/// Question archived with the user's reaction to an analysis.
pub const ANALYSIS_FOLLOWUP_QUESTION: &str = "What do you think about this analysis?";

/// Outcome of one processed message.
#[derive(Debug, Clone)]
pub struct Turn {
    pub success: bool,
    pub state: SessionState,
    /// Outbound messages, in order.
    pub replies: Vec<String>,
    /// Set whenever a batch of questions was just presented.
    pub questions: Option<Vec<Question>>,
    pub error: Option<String>,
}

impl Turn {
    pub fn ok(state: SessionState, reply: impl Into<String>) -> Self {
        Self {
            success: true,
            state,
            replies: vec![reply.into()],
            questions: None,
            error: None,
        }
    }

    pub fn failed(state: SessionState, reply: impl Into<String>, error: &DeepNoteError) -> Self {
        Self {
            success: false,
            state,
            replies: vec![reply.into()],
            questions: None,
            error: Some(error.to_string()),
        }
    }

    pub fn then(mut self, reply: impl Into<String>) -> Self {
        self.replies.push(reply.into());
        self
    }

    pub fn with_questions(mut self, questions: Vec<Question>) -> Self {
        self.questions = Some(questions);
        self
    }

    /// All replies joined for transports that answer with a single text.
    pub fn message(&self) -> String {
        self.replies.join("\n\n")
    }
}

/// Result of [`DeepDive::step`].
#[derive(Debug)]
pub struct Step {
    pub turn: Turn,
    /// Record to store, or `None` to remove the session.
    pub next: Option<Session>,
}

impl Step {
    fn keep(turn: Turn, session: Session) -> Self {
        Self {
            turn,
            next: Some(session),
        }
    }

    fn end(turn: Turn) -> Self {
        Self { turn, next: None }
    }
}

/// The dialogue engine. Stateless apart from its collaborators.
pub struct DeepDive {
    archive: Arc<NoteArchive>,
    questions: QuestionGenerator,
    analysis: AnalysisGenerator,
    keywords: Keywords,
    max_rounds: usize,
}

impl DeepDive {
    pub fn new(
        archive: Arc<NoteArchive>,
        questions: QuestionGenerator,
        analysis: AnalysisGenerator,
        keywords: Keywords,
        max_rounds: usize,
    ) -> Self {
        Self {
            archive,
            questions,
            analysis,
            keywords,
            max_rounds: max_rounds.max(1),
        }
    }

    pub fn keywords(&self) -> &Keywords {
        &self.keywords
    }

    pub fn max_rounds(&self) -> usize {
        self.max_rounds
    }

    /// Process one text message for `session`.
    pub async fn step(&self, session: Session, text: &str, now: DateTime<Utc>) -> Step {
        let text = text.trim();

        if self.keywords.is_terminate(text) {
            return self.terminate(session);
        }

        match session.awaiting.clone() {
            Awaiting::Idle => self.new_memo(session, text, now).await,
            Awaiting::ConfirmDeepDive => {
                if self.keywords.is_affirmative(text) {
                    self.present_questions(session, false).await
                } else {
                    self.new_memo(session, text, now).await
                }
            }
            Awaiting::Choice => self.choose(session, text).await,
            Awaiting::Answer { question } => self.answer(session, &question, text, now).await,
            Awaiting::Continue => {
                if self.keywords.is_affirmative(text) {
                    self.present_questions(session, false).await
                } else {
                    info!("Deep dive {} ended after {} rounds", session.session_id, session.round);
                    Step::end(Turn::ok(SessionState::Ended, "Deep-dive session ended."))
                }
            }
            Awaiting::AnalysisContext => self.analyse(session, text, now).await,
            Awaiting::AnalysisFollowup { .. } => self.react_to_analysis(session, text, now).await,
        }
    }

    fn terminate(&self, session: Session) -> Step {
        if session.is_active() {
            info!("Deep dive {} terminated by user", session.session_id);
            Step::end(Turn::ok(SessionState::Ended, "Deep-dive session ended."))
        } else {
            let turn = Turn::ok(SessionState::Idle, "There is no active session.");
            Step::keep(turn, session)
        }
    }

    async fn new_memo(&self, mut session: Session, text: &str, now: DateTime<Utc>) -> Step {
        let state = session.awaiting.state();
        if text.is_empty() {
            let err = DeepNoteError::Validation("empty memo".into());
            return Step::keep(Turn::failed(state, "Send some text to save a memo.", &err), session);
        }

        match self.archive.append_memo(text, now).await {
            Ok(url) => {
                session.start(text);
                info!("Memo saved for {}: {}", session.session_id, url);
                let turn = Turn::ok(SessionState::WaitingDeepDive, format!("Saved!\n{}", url)).then(
                    format!(
                        "Dig deeper into this note? Reply \"{}\" and the AI will suggest questions.\n\
                         Anything else is saved as your next memo.",
                        first(&self.keywords.affirmative, "yes")
                    ),
                );
                Step::keep(turn, session)
            }
            Err(e) => {
                warn!("Failed to save memo: {}", e);
                Step::keep(Turn::failed(state, "Failed to save the memo.", &e), session)
            }
        }
    }

    async fn present_questions(&self, mut session: Session, regenerate: bool) -> Step {
        let Some(memo) = session.original_memo.clone() else {
            return self.lost(session);
        };

        let generated = self
            .questions
            .generate(&memo, &session.qa_pairs, regenerate, &session.questions)
            .await;

        match generated {
            Ok(questions) => {
                session.questions = questions.clone();
                session.awaiting = Awaiting::Choice;
                let header = if regenerate {
                    "【New questions】 Pick a question:"
                } else {
                    "Pick a question:"
                };
                let turn = Turn::ok(SessionState::WaitingChoice, self.render_choices(header, &questions))
                    .with_questions(questions);
                Step::keep(turn, session)
            }
            Err(e) => {
                warn!("Question generation failed: {}", e);
                let turn = Turn::failed(
                    session.awaiting.state(),
                    "Failed to generate questions. Please try again.",
                    &e,
                );
                Step::keep(turn, session)
            }
        }
    }

    async fn choose(&self, mut session: Session, text: &str) -> Step {
        if self.keywords.is_regenerate(text) {
            return self.present_questions(session, true).await;
        }

        let count = session.questions.len();
        let analysis_option = count + 1;

        match parse_choice(text) {
            Some(n) if (1..=count).contains(&n) => {
                let question = session.questions[n - 1].clone();
                let reply = format!(
                    "Question: {}\n\nType your answer.\n(Send \"{}\" to finish the session.)",
                    question.text,
                    first(&self.keywords.terminate, "end")
                );
                session.awaiting = Awaiting::Answer { question };
                Step::keep(Turn::ok(SessionState::WaitingAnswer, reply), session)
            }
            Some(n) if n == analysis_option => {
                session.awaiting = Awaiting::AnalysisContext;
                let reply = format!(
                    "The AI will give an objective analysis.\n\n\
                     If you have a hypothesis or extra context, type it now.\n\
                     Otherwise reply \"{}\".",
                    first(&self.keywords.none, "none")
                );
                Step::keep(Turn::ok(SessionState::WaitingAnalysisContext, reply), session)
            }
            Some(_) => {
                let msg = format!("Choose a number from 1 to {}.", analysis_option);
                let err = DeepNoteError::Validation(msg.clone());
                Step::keep(Turn::failed(SessionState::WaitingChoice, msg, &err), session)
            }
            None => {
                let msg = format!(
                    "Reply with a number, or \"{}\" for different questions.",
                    first(&self.keywords.regenerate, "regenerate")
                );
                let err = DeepNoteError::Validation(format!("not a choice: {}", text));
                Step::keep(Turn::failed(SessionState::WaitingChoice, msg, &err), session)
            }
        }
    }

    async fn answer(
        &self,
        mut session: Session,
        question: &Question,
        text: &str,
        now: DateTime<Utc>,
    ) -> Step {
        if let Err(e) = self.archive.append_qa(&question.text, text, now).await {
            warn!("Failed to save answer: {}", e);
            let turn = Turn::failed(SessionState::WaitingAnswer, "Failed to save your answer.", &e);
            return Step::keep(turn, session);
        }

        session.record(&question.text, text);
        self.after_exchange(session, "Answer saved.")
    }

    async fn analyse(&self, mut session: Session, text: &str, now: DateTime<Utc>) -> Step {
        let Some(memo) = session.original_memo.clone() else {
            return self.lost(session);
        };
        let context = (!self.keywords.is_none(text)).then_some(text);

        let analysis = match self.analysis.generate(&memo, &session.qa_pairs, context).await {
            Ok(a) => a,
            Err(e) => {
                warn!("Analysis generation failed: {}", e);
                session.awaiting = Awaiting::Choice;
                let questions = session.questions.clone();
                let turn = Turn::failed(SessionState::WaitingChoice, "Failed to generate the analysis.", &e)
                    .then(self.render_choices("Pick a question:", &questions))
                    .with_questions(questions);
                return Step::keep(turn, session);
            }
        };

        if let Err(e) = self.archive.append_analysis_qa(&analysis, now).await {
            warn!("Failed to save analysis: {}", e);
            let turn = Turn::failed(
                SessionState::WaitingAnalysisContext,
                "Failed to save the analysis. Send your context again to retry.",
                &e,
            );
            return Step::keep(turn, session);
        }

        session.record(ANALYSIS_QUESTION, &analysis);
        let shown = format!("【AI analysis】\n{}", analysis);

        if session.round >= self.max_rounds {
            return self.complete(session, Turn::ok(SessionState::Completed, shown));
        }

        session.awaiting = Awaiting::AnalysisFollowup { analysis };
        let turn = Turn::ok(SessionState::WaitingAnalysisFollowup, shown).then(format!(
            "What do you think about this analysis? Share any thoughts freely.\n\
             If nothing comes to mind, reply \"{}\".",
            first(&self.keywords.none, "none")
        ));
        Step::keep(turn, session)
    }

    async fn react_to_analysis(&self, mut session: Session, text: &str, now: DateTime<Utc>) -> Step {
        if self.keywords.is_none(text) {
            return self.after_exchange(session, "Understood.");
        }

        if let Err(e) = self
            .archive
            .append_qa(ANALYSIS_FOLLOWUP_QUESTION, text, now)
            .await
        {
            warn!("Failed to save analysis reaction: {}", e);
            let turn = Turn::failed(
                SessionState::WaitingAnalysisFollowup,
                "Failed to save your thoughts.",
                &e,
            );
            return Step::keep(turn, session);
        }

        session.record(ANALYSIS_FOLLOWUP_QUESTION, text);
        self.after_exchange(session, "Your thoughts were saved.")
    }

    /// Either ask whether to continue or finish at the round limit.
    fn after_exchange(&self, mut session: Session, lead: &str) -> Step {
        if session.round >= self.max_rounds {
            return self.complete(session, Turn::ok(SessionState::Completed, lead));
        }

        session.awaiting = Awaiting::Continue;
        let turn = Turn::ok(
            SessionState::WaitingContinue,
            format!(
                "{}\n\nKeep digging? Reply \"{}\" to continue, anything else to finish.",
                lead,
                first(&self.keywords.affirmative, "yes")
            ),
        );
        Step::keep(turn, session)
    }

    fn complete(&self, session: Session, turn: Turn) -> Step {
        info!(
            "Deep dive {} completed after {} rounds",
            session.session_id, session.round
        );
        Step::end(turn.then(format!(
            "Deep-dive complete! (reached the maximum of {} rounds)",
            self.max_rounds
        )))
    }

    // A non-idle session without a memo cannot continue; drop it.
    fn lost(&self, session: Session) -> Step {
        warn!("Session {} has no memo in state {}", session.session_id, session.awaiting.state());
        let err = DeepNoteError::Other("session has no memo".into());
        Step::end(Turn::failed(
            SessionState::Error,
            "Session not found. Please send a new memo.",
            &err,
        ))
    }

    fn render_choices(&self, header: &str, questions: &[Question]) -> String {
        let mut text = format!("{}\n\n", header);
        for (i, q) in questions.iter().enumerate() {
            text.push_str(&format!("{}. [{}] {}\n", i + 1, q.kind, q.text));
        }
        let last = questions.len() + 1;
        text.push_str(&format!(
            "{}. [Analysis] Ask the AI for an objective analysis\n\n\
             Reply with a number (1-{}).\n\
             Send \"{}\" for different questions.\n\
             Send \"{}\" to finish the session.",
            last,
            last,
            first(&self.keywords.regenerate, "regenerate"),
            first(&self.keywords.terminate, "end"),
        ));
        text
    }
}

fn first<'a>(words: &'a [String], fallback: &'a str) -> &'a str {
    words.first().map(String::as_str).unwrap_or(fallback)
}

/// Parse a menu choice, accepting full-width digits.
fn parse_choice(text: &str) -> Option<usize> {
    let normalized: String = text
        .trim()
        .chars()
        .map(|c| match c {
            '０'..='９' => char::from_u32(c as u32 - '０' as u32 + '0' as u32).unwrap_or(c),
            _ => c,
        })
        .collect();
    normalized.parse().ok()
}
