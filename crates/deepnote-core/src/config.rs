//! Configuration management for DeepNote.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{DeepNoteError, Result};
use crate::provider::ProviderConfig;

/// Top-level DeepNote configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeepNoteConfig {
    /// LLM provider settings.
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Deep-dive dialogue settings.
    #[serde(default)]
    pub deep_dive: DeepDiveSettings,

    /// Document store settings.
    #[serde(default)]
    pub archive: ArchiveSettings,

    /// LINE messaging channel.
    pub line: Option<LineSettings>,

    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerSettings,
}

/// Deep-dive dialogue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeepDiveSettings {
    /// Completed exchanges after which the session ends.
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,

    /// Upper bound on questions per generated batch.
    #[serde(default = "default_max_questions")]
    pub max_questions: usize,

    #[serde(default = "default_max_question_chars")]
    pub max_question_chars: usize,

    #[serde(default = "default_max_analysis_chars")]
    pub max_analysis_chars: usize,

    /// Inactivity timeout for the push (LINE) channel.
    #[serde(default = "default_push_timeout")]
    pub push_timeout_minutes: i64,

    /// Inactivity timeout for the request/response API.
    #[serde(default = "default_api_timeout")]
    pub api_timeout_minutes: i64,

    /// Ordered analysis themes; the analysis renders one block per theme.
    #[serde(default = "default_themes")]
    pub analysis_themes: Vec<String>,

    #[serde(default)]
    pub keywords: Keywords,
}

fn default_max_rounds() -> usize {
    10
}

fn default_max_questions() -> usize {
    3
}

fn default_max_question_chars() -> usize {
    120
}

fn default_max_analysis_chars() -> usize {
    1200
}

fn default_push_timeout() -> i64 {
    5
}

fn default_api_timeout() -> i64 {
    30
}

fn default_themes() -> Vec<String> {
    [
        "Facts and Observations",
        "Underlying Causes",
        "Risks and Blind Spots",
        "Alternative Perspectives",
        "Suggested Next Steps",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for DeepDiveSettings {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            max_questions: default_max_questions(),
            max_question_chars: default_max_question_chars(),
            max_analysis_chars: default_max_analysis_chars(),
            push_timeout_minutes: default_push_timeout(),
            api_timeout_minutes: default_api_timeout(),
            analysis_themes: default_themes(),
            keywords: Keywords::default(),
        }
    }
}

/// Command words recognised by the deep-dive dialogue.
///
/// Matching is case-insensitive on the trimmed message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Keywords {
    pub terminate: Vec<String>,
    pub affirmative: Vec<String>,
    pub regenerate: Vec<String>,
    /// "Nothing to add" answers for the analysis prompts. Empty text always counts.
    pub none: Vec<String>,
}

fn words(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

impl Default for Keywords {
    fn default() -> Self {
        Self {
            terminate: words(&["end", "quit", "exit", "終了", "エンド", "終わり", "やめる"]),
            affirmative: words(&["yes", "y", "はい"]),
            regenerate: words(&[
                "regenerate", "again", "retry", "再考", "再生成", "やり直し", "別の質問",
            ]),
            none: words(&["none", "no", "nothing", "なし", "ない", "特にない", "特になし"]),
        }
    }
}

impl Keywords {
    fn matches(list: &[String], text: &str) -> bool {
        let needle = text.trim().to_lowercase();
        list.iter().any(|w| w.to_lowercase() == needle)
    }

    pub fn is_terminate(&self, text: &str) -> bool {
        Self::matches(&self.terminate, text)
    }

    pub fn is_affirmative(&self, text: &str) -> bool {
        Self::matches(&self.affirmative, text)
    }

    pub fn is_regenerate(&self, text: &str) -> bool {
        Self::matches(&self.regenerate, text)
    }

    pub fn is_none(&self, text: &str) -> bool {
        text.trim().is_empty() || Self::matches(&self.none, text)
    }
}

/// Document store settings (GitHub repository layout and logical-day clock).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveSettings {
    pub owner: Option<String>,
    pub repository: Option<String>,
    pub token: Option<String>,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default = "default_memo_base")]
    pub memo_base_dir: String,
    #[serde(default = "default_daily_base")]
    pub daily_base_dir: String,
    /// Fixed offset of the user's local time from UTC.
    #[serde(default = "default_utc_offset")]
    pub utc_offset_hours: i32,
    /// Local hour at which a new logical day begins.
    #[serde(default = "default_day_start")]
    pub day_start_hour: u32,
    /// First day the review feature may pick.
    #[serde(default = "default_review_since")]
    pub review_since: NaiveDate,
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_memo_base() -> String {
    "seeds".to_string()
}

fn default_daily_base() -> String {
    "daily".to_string()
}

fn default_utc_offset() -> i32 {
    9
}

fn default_day_start() -> u32 {
    4
}

fn default_review_since() -> NaiveDate {
    NaiveDate::from_ymd_opt(2023, 3, 17).unwrap_or_default()
}

impl Default for ArchiveSettings {
    fn default() -> Self {
        Self {
            owner: None,
            repository: None,
            token: None,
            branch: default_branch(),
            memo_base_dir: default_memo_base(),
            daily_base_dir: default_daily_base(),
            utc_offset_hours: default_utc_offset(),
            day_start_hour: default_day_start(),
            review_since: default_review_since(),
        }
    }
}

/// LINE Messaging API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineSettings {
    pub channel_access_token: String,
    /// The single user proactive pushes go to.
    pub user_id: String,
    #[serde(default = "default_reminder")]
    pub reminder_message: String,
}

fn default_reminder() -> String {
    "How was your day? Send me a note.".to_string()
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl DeepNoteConfig {
    /// Load config from a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| DeepNoteError::Config(format!("Failed to read config: {}", e)))?;
        toml::from_str(&content)
            .map_err(|e| DeepNoteError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Save config to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| DeepNoteError::Config(format!("Failed to serialize config: {}", e)))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default config file path.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("deepnote")
            .join("config.toml")
    }

    /// Override settings from environment variables.
    pub fn apply_env(&mut self) {
        self.apply_vars(|key| std::env::var(key).ok());
    }

    fn apply_vars<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| var(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = var("GITHUB_ACCESS_TOKEN") {
            self.archive.token = Some(v);
        }
        if let Some(v) = var("GITHUB_USERNAME") {
            self.archive.owner = Some(v);
        }
        if let Some(v) = var("GITHUB_REPOSITORY") {
            self.archive.repository = Some(v);
        }
        if let Some(v) = var("GITHUB_BRANCH") {
            self.archive.branch = v;
        }
        if let Some(v) = var("MEMO_BASE_DIR") {
            self.archive.memo_base_dir = v;
        }
        if let Some(v) = var("DAILY_BASE_DIR") {
            self.archive.daily_base_dir = v;
        }
        if let Some(v) = var("OPENAI_API_KEY") {
            self.provider.api_key = Some(v);
        }
        if let Some(v) = var("OPENAI_MODEL") {
            self.provider.model = v;
        }
        if let Some(v) = var("OPENAI_API_BASE") {
            self.provider.api_base = Some(v);
        }

        if let Some(token) = var("LINEBOT_CHANNEL_ACCESS_TOKEN") {
            let line = self.line.get_or_insert_with(|| LineSettings {
                channel_access_token: String::new(),
                user_id: String::new(),
                reminder_message: default_reminder(),
            });
            line.channel_access_token = token;
        }
        if let Some(line) = self.line.as_mut() {
            if let Some(v) = var("LINEBOT_USER_ID") {
                line.user_id = v;
            }
            if let Some(v) = var("REMINDER_MESSAGE") {
                line.reminder_message = v;
            }
        }
    }

    /// Check that everything needed to reach the archive and the LLM is present.
    pub fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();
        if self.archive.token.is_none() {
            missing.push("GITHUB_ACCESS_TOKEN");
        }
        if self.archive.owner.is_none() {
            missing.push("GITHUB_USERNAME");
        }
        if self.archive.repository.is_none() {
            missing.push("GITHUB_REPOSITORY");
        }
        if self.provider.api_key.is_none() && self.provider.api_base.is_none() {
            missing.push("OPENAI_API_KEY");
        }
        if !missing.is_empty() {
            return Err(DeepNoteError::Config(format!(
                "Missing settings: {}",
                missing.join(", ")
            )));
        }

        let dd = &self.deep_dive;
        if dd.max_rounds == 0 || dd.max_questions == 0 {
            return Err(DeepNoteError::Config(
                "deep_dive.max_rounds and deep_dive.max_questions must be positive".into(),
            ));
        }
        if dd.analysis_themes.is_empty() {
            return Err(DeepNoteError::Config(
                "deep_dive.analysis_themes must not be empty".into(),
            ));
        }
        if self.archive.day_start_hour > 23 {
            return Err(DeepNoteError::Config(
                "archive.day_start_hour must be between 0 and 23".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = DeepNoteConfig::load(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(cfg.deep_dive.max_rounds, 10);
        assert_eq!(cfg.deep_dive.max_questions, 3);
        assert_eq!(cfg.archive.memo_base_dir, "seeds");
        assert_eq!(cfg.archive.day_start_hour, 4);
        assert_eq!(cfg.deep_dive.analysis_themes.len(), 5);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deepnote").join("config.toml");

        let mut cfg = DeepNoteConfig::default();
        cfg.deep_dive.max_questions = 5;
        cfg.archive.owner = Some("me".into());
        cfg.save(&path).unwrap();

        let loaded = DeepNoteConfig::load(&path).unwrap();
        assert_eq!(loaded.deep_dive.max_questions, 5);
        assert_eq!(loaded.archive.owner.as_deref(), Some("me"));
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let cfg: DeepNoteConfig = toml::from_str(
            r#"
            [deep_dive]
            max_questions = 5

            [archive]
            daily_base_dir = "diary"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.deep_dive.max_questions, 5);
        assert_eq!(cfg.deep_dive.push_timeout_minutes, 5);
        assert_eq!(cfg.archive.daily_base_dir, "diary");
        assert_eq!(cfg.archive.branch, "main");
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("GITHUB_ACCESS_TOKEN", "ghp_x"),
            ("GITHUB_USERNAME", "alice"),
            ("GITHUB_REPOSITORY", "notes"),
            ("OPENAI_API_KEY", "sk-x"),
            ("LINEBOT_CHANNEL_ACCESS_TOKEN", "line-token"),
            ("LINEBOT_USER_ID", "U123"),
            ("MEMO_BASE_DIR", ""),
        ]
        .into_iter()
        .collect();

        let mut cfg = DeepNoteConfig::default();
        cfg.apply_vars(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(cfg.archive.owner.as_deref(), Some("alice"));
        assert_eq!(cfg.archive.memo_base_dir, "seeds");
        let line = cfg.line.as_ref().unwrap();
        assert_eq!(line.channel_access_token, "line-token");
        assert_eq!(line.user_id, "U123");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_validate_reports_missing() {
        let err = DeepNoteConfig::default().validate().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("GITHUB_ACCESS_TOKEN"));
        assert!(msg.contains("OPENAI_API_KEY"));
    }

    #[test]
    fn test_keywords() {
        let kw = Keywords::default();
        assert!(kw.is_terminate(" Quit "));
        assert!(kw.is_terminate("終了"));
        assert!(!kw.is_terminate("quite"));
        assert!(kw.is_affirmative("YES"));
        assert!(kw.is_regenerate("再考"));
        assert!(kw.is_none(""));
        assert!(kw.is_none("なし"));
        assert!(!kw.is_none("I disagree"));
    }
}
