//! Question generator — typed probing questions about a memo.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::DeepDiveSettings;
use crate::error::{DeepNoteError, Result};
use crate::message::ChatMessage;
use crate::provider::{ChatRequest, LlmProvider, ProviderConfig};
use crate::session::QaPair;

/// Category of a probing question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuestionKind {
    Clarify,
    Cause,
    Impact,
    Alternative,
    Evidence,
    Action,
    Meta,
    Values,
}

impl QuestionKind {
    pub const ALL: [QuestionKind; 8] = [
        Self::Clarify,
        Self::Cause,
        Self::Impact,
        Self::Alternative,
        Self::Evidence,
        Self::Action,
        Self::Meta,
        Self::Values,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Clarify => "Clarify",
            Self::Cause => "Cause",
            Self::Impact => "Impact",
            Self::Alternative => "Alternative",
            Self::Evidence => "Evidence",
            Self::Action => "Action",
            Self::Meta => "Meta",
            Self::Values => "Values",
        }
    }

    /// Case-insensitive lookup by name.
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(name))
    }
}

impl std::fmt::Display for QuestionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A generated question. Serialized as `{"type": ..., "q": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    #[serde(rename = "type")]
    pub kind: QuestionKind,
    #[serde(rename = "q")]
    pub text: String,
}

/// Wraps the LLM call that proposes the next questions.
pub struct QuestionGenerator {
    provider: Arc<dyn LlmProvider>,
    max_questions: usize,
    max_chars: usize,
    max_tokens: u32,
    temperature: f32,
}

impl QuestionGenerator {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        settings: &DeepDiveSettings,
        sampling: &ProviderConfig,
    ) -> Self {
        Self {
            provider,
            max_questions: settings.max_questions.max(1),
            max_chars: settings.max_question_chars.max(1),
            max_tokens: sampling.max_tokens,
            temperature: sampling.temperature,
        }
    }

    pub fn max_questions(&self) -> usize {
        self.max_questions
    }

    /// Produce up to `max_questions` questions.
    ///
    /// With `regenerate`, `previous` is shown to the model as a batch to move away from.
    pub async fn generate(
        &self,
        memo: &str,
        history: &[QaPair],
        regenerate: bool,
        previous: &[Question],
    ) -> Result<Vec<Question>> {
        let request = ChatRequest {
            messages: vec![
                ChatMessage::system(&self.system_prompt()),
                ChatMessage::user(&user_prompt(memo, history, regenerate, previous)),
            ],
            model: None,
            max_tokens: self.max_tokens,
            // A little hotter when asked for something different.
            temperature: if regenerate {
                (self.temperature + 0.2).min(1.2)
            } else {
                self.temperature
            },
            json_mode: true,
        };

        let response = self.provider.chat(request).await?;
        debug!(
            "Question generation: model={}, tokens={}",
            response.model, response.usage.total_tokens
        );
        decode_questions(response.text(), self.max_questions, self.max_chars)
    }

    fn system_prompt(&self) -> String {
        let kinds: Vec<&str> = QuestionKind::ALL.iter().map(|k| k.as_str()).collect();
        format!(
            "You help a person think more deeply about a short note they wrote.\n\
             Propose at most {max} short, open questions that would help them elaborate.\n\
             Each question gets one type from: {kinds}.\n\
             Use different types where possible and never repeat a question already answered.\n\
             Keep every question under {chars} characters and write it in the language of the note.\n\
             Reply with JSON only: {{\"questions\": [{{\"type\": \"Cause\", \"q\": \"...\"}}]}}",
            max = self.max_questions,
            kinds = kinds.join(", "),
            chars = self.max_chars,
        )
    }
}

fn user_prompt(memo: &str, history: &[QaPair], regenerate: bool, previous: &[Question]) -> String {
    let mut prompt = format!("Note:\n{}\n", memo.trim());

    if !history.is_empty() {
        prompt.push_str("\nConversation so far:\n");
        for (i, qa) in history.iter().enumerate() {
            prompt.push_str(&format!("Q{}: {}\nA{}: {}\n", i + 1, qa.question, i + 1, qa.answer));
        }
    }

    if regenerate {
        prompt.push_str(
            "\nThe person did not like the previous questions. \
             Take a clearly different angle and use other question types.\n",
        );
        if !previous.is_empty() {
            prompt.push_str("Previous questions:\n");
            for q in previous {
                prompt.push_str(&format!("- [{}] {}\n", q.kind, q.text));
            }
        }
    }

    prompt
}

/// Keys under which a question list may be wrapped.
const LIST_KEYS: [&str; 4] = ["questions", "items", "data", "result"];

/// Decode the model's reply into questions.
///
/// Accepts a bare JSON list or an object wrapping the list under one of
/// [`LIST_KEYS`], optionally inside a fenced code block. Items may name their fields
/// `type`/`category` and `q`/`question`. Anything else is an error.
pub fn decode_questions(raw: &str, max_questions: usize, max_chars: usize) -> Result<Vec<Question>> {
    let body = strip_code_fence(raw);
    let value: Value = serde_json::from_str(body)
        .map_err(|e| DeepNoteError::Llm(format!("Question reply is not JSON: {}", e)))?;

    let items = match &value {
        Value::Array(items) => items,
        Value::Object(map) => LIST_KEYS
            .iter()
            .find_map(|k| map.get(*k).and_then(Value::as_array))
            .ok_or_else(|| DeepNoteError::Llm("Question reply has no question list".into()))?,
        _ => {
            return Err(DeepNoteError::Llm(
                "Question reply has an unexpected shape".into(),
            ));
        }
    };

    let questions: Vec<Question> = items
        .iter()
        .filter_map(|item| decode_item(item, max_chars))
        .take(max_questions)
        .collect();

    if questions.is_empty() {
        return Err(DeepNoteError::Llm("Question reply contained no usable questions".into()));
    }
    Ok(questions)
}

fn decode_item(item: &Value, max_chars: usize) -> Option<Question> {
    let obj = item.as_object()?;
    let kind_name = obj
        .get("type")
        .or_else(|| obj.get("category"))
        .and_then(Value::as_str)?;
    let text = obj
        .get("q")
        .or_else(|| obj.get("question"))
        .and_then(Value::as_str)?
        .trim();

    let Some(kind) = QuestionKind::parse(kind_name) else {
        warn!("Dropping question with unknown type '{}'", kind_name);
        return None;
    };
    if text.is_empty() {
        return None;
    }

    Some(Question {
        kind,
        text: truncate_chars(text, max_chars),
    })
}

/// Cut `text` to at most `max` characters.
pub(crate) fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(start) = trimmed.find("```") else {
        return trimmed;
    };
    let after = &trimmed[start + 3..];
    // Skip the language tag line, e.g. ```json
    let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after[body_start..];
    match body.find("```") {
        Some(end) => body[..end].trim(),
        None => body.trim(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrapped_list() {
        let raw = r#"{"questions": [
            {"type": "Cause", "q": "Why did you run out?"},
            {"type": "action", "q": "When will you go shopping?"}
        ]}"#;
        let qs = decode_questions(raw, 3, 120).unwrap();
        assert_eq!(qs.len(), 2);
        assert_eq!(qs[0].kind, QuestionKind::Cause);
        assert_eq!(qs[1].kind, QuestionKind::Action);
    }

    #[test]
    fn test_bare_list_and_alternate_keys() {
        let raw = r#"[{"category": "Values", "question": "What matters here?"}]"#;
        let qs = decode_questions(raw, 3, 120).unwrap();
        assert_eq!(
            qs,
            vec![Question {
                kind: QuestionKind::Values,
                text: "What matters here?".into()
            }]
        );

        let raw = r#"{"items": [{"type": "Meta", "q": "How do you feel writing this?"}]}"#;
        assert_eq!(decode_questions(raw, 3, 120).unwrap().len(), 1);
    }

    #[test]
    fn test_fenced_reply() {
        let raw = "Here you go:\n```json\n{\"data\": [{\"type\": \"Impact\", \"q\": \"What changes?\"}]}\n```";
        let qs = decode_questions(raw, 3, 120).unwrap();
        assert_eq!(qs[0].kind, QuestionKind::Impact);
    }

    #[test]
    fn test_bounds() {
        let raw = r#"[
            {"type": "Clarify", "q": "one"},
            {"type": "Cause", "q": "two"},
            {"type": "Impact", "q": "three"},
            {"type": "Evidence", "q": "four"}
        ]"#;
        assert_eq!(decode_questions(raw, 3, 120).unwrap().len(), 3);

        let raw = r#"[{"type": "Clarify", "q": "あいうえおかきくけこ"}]"#;
        assert_eq!(decode_questions(raw, 3, 5).unwrap()[0].text, "あいうえお");
    }

    #[test]
    fn test_fails_closed() {
        assert!(decode_questions("not json", 3, 120).is_err());
        assert!(decode_questions(r#"{"foo": []}"#, 3, 120).is_err());
        assert!(decode_questions(r#""just a string""#, 3, 120).is_err());
        assert!(decode_questions(r#"{"questions": []}"#, 3, 120).is_err());
        // unknown categories are dropped; nothing usable left
        assert!(decode_questions(r#"[{"type": "Gossip", "q": "Who?"}]"#, 3, 120).is_err());
        let err = decode_questions("[1, 2]", 3, 120).unwrap_err();
        assert!(matches!(err, DeepNoteError::Llm(_)));
    }

    #[test]
    fn test_prompt_mentions_previous_batch() {
        let previous = vec![Question {
            kind: QuestionKind::Cause,
            text: "Why?".into(),
        }];
        let history = vec![QaPair {
            question: "What?".into(),
            answer: "Milk".into(),
        }];
        let prompt = user_prompt("Buy milk", &history, true, &previous);
        assert!(prompt.contains("Q1: What?\nA1: Milk"));
        assert!(prompt.contains("- [Cause] Why?"));

        let prompt = user_prompt("Buy milk", &[], false, &previous);
        assert!(!prompt.contains("Previous questions"));
    }

    #[test]
    fn test_question_wire_shape() {
        let q = Question {
            kind: QuestionKind::Alternative,
            text: "What else?".into(),
        };
        assert_eq!(
            serde_json::to_value(&q).unwrap(),
            serde_json::json!({"type": "Alternative", "q": "What else?"})
        );
    }
}
