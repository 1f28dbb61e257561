//! Analysis generator — an objective, theme-structured take on a memo.

use std::sync::Arc;

use tracing::debug;

use crate::config::DeepDiveSettings;
use crate::error::{DeepNoteError, Result};
use crate::message::ChatMessage;
use crate::provider::{ChatRequest, LlmProvider, ProviderConfig};
use crate::questions::truncate_chars;
use crate::session::QaPair;

pub struct AnalysisGenerator {
    provider: Arc<dyn LlmProvider>,
    themes: Vec<String>,
    max_chars: usize,
    max_tokens: u32,
    temperature: f32,
}

impl AnalysisGenerator {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        settings: &DeepDiveSettings,
        sampling: &ProviderConfig,
    ) -> Self {
        Self {
            provider,
            themes: settings.analysis_themes.clone(),
            max_chars: settings.max_analysis_chars.max(1),
            max_tokens: sampling.max_tokens,
            temperature: sampling.temperature,
        }
    }

    /// Analyse the memo and its Q&A history, taking the user's own hypothesis
    /// into account when one is given.
    pub async fn generate(
        &self,
        memo: &str,
        history: &[QaPair],
        user_context: Option<&str>,
    ) -> Result<String> {
        let request = ChatRequest {
            messages: vec![
                ChatMessage::system(&self.system_prompt()),
                ChatMessage::user(&user_prompt(memo, history, user_context)),
            ],
            model: None,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            json_mode: false,
        };

        let response = self.provider.chat(request).await?;
        debug!(
            "Analysis generation: model={}, {} chars",
            response.model,
            response.text().len()
        );

        let text = response.text().trim();
        if text.is_empty() {
            return Err(DeepNoteError::Llm("Analysis reply was empty".into()));
        }
        Ok(truncate_chars(text, self.max_chars))
    }

    fn system_prompt(&self) -> String {
        let sections: Vec<String> = self
            .themes
            .iter()
            .map(|t| format!("【{}】\n- ...", t))
            .collect();
        format!(
            "You are a calm, objective analyst. Read the person's note and their answers, \
             then give your honest view as a third party.\n\
             Cover exactly these {n} themes in this order, each as a heading followed by \
             two or three short bullet points:\n\n{sections}\n\n\
             Stay under {max} characters in total, write in the language of the note, \
             and output nothing besides the themed blocks.",
            n = self.themes.len(),
            sections = sections.join("\n\n"),
            max = self.max_chars,
        )
    }
}

fn user_prompt(memo: &str, history: &[QaPair], user_context: Option<&str>) -> String {
    let mut prompt = format!("Note:\n{}\n", memo.trim());
    if !history.is_empty() {
        prompt.push_str("\nQuestions and answers so far:\n");
        for qa in history {
            prompt.push_str(&format!("Q: {}\nA: {}\n", qa.question, qa.answer));
        }
    }
    if let Some(ctx) = user_context.map(str::trim).filter(|c| !c.is_empty()) {
        prompt.push_str(&format!(
            "\nThe person's own hypothesis or extra context:\n{}\n",
            ctx
        ));
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_includes_context_only_when_given() {
        let history = vec![QaPair {
            question: "Why?".into(),
            answer: "Tired".into(),
        }];
        let p = user_prompt("Skipped the gym", &history, Some("  I think it's stress "));
        assert!(p.contains("Q: Why?\nA: Tired"));
        assert!(p.contains("I think it's stress"));

        let p = user_prompt("Skipped the gym", &history, None);
        assert!(!p.contains("hypothesis"));
    }
}
