//! Note archive and daily log — dated markdown files in a document store.
//!
//! Notes are appended to `{base}/{year}/{month:02}/{month:02}{day:02}.md` for the
//! current logical day. The daily log uses the same layout under its own base
//! directory but overwrites the whole file.

use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, Timelike, Utc};
use rand::Rng;
use regex::Regex;
use tracing::{debug, info};

use crate::config::ArchiveSettings;
use crate::document::DocumentStore;
use crate::error::{DeepNoteError, Result};

/// Reserved question under which an AI analysis is archived.
pub const ANALYSIS_QUESTION: &str = "objective AI analysis";

/// Maps wall-clock time onto logical days that start at a fixed local hour.
#[derive(Debug, Clone, Copy)]
pub struct LogicalClock {
    offset: FixedOffset,
    day_start_hour: u32,
}

impl LogicalClock {
    pub fn new(utc_offset_hours: i32, day_start_hour: u32) -> Result<Self> {
        let offset = FixedOffset::east_opt(utc_offset_hours * 3600).ok_or_else(|| {
            DeepNoteError::Config(format!("Invalid UTC offset: {}", utc_offset_hours))
        })?;
        Ok(Self {
            offset,
            day_start_hour: day_start_hour.min(23),
        })
    }

    /// Local wall-clock time.
    pub fn local(&self, now: DateTime<Utc>) -> NaiveDateTime {
        now.with_timezone(&self.offset).naive_local()
    }

    /// The logical day `now` belongs to. Before the start hour counts as yesterday.
    pub fn day(&self, now: DateTime<Utc>) -> NaiveDate {
        let local = self.local(now);
        if local.hour() < self.day_start_hour {
            local.date() - Duration::days(1)
        } else {
            local.date()
        }
    }
}

fn day_path(base_dir: &str, date: NaiveDate) -> String {
    format!(
        "{}/{}/{:02}/{:02}{:02}.md",
        base_dir.trim_end_matches('/'),
        date.year(),
        date.month(),
        date.month(),
        date.day()
    )
}

fn day_label(date: NaiveDate) -> String {
    format!("{}.{}.{}", date.year(), date.month(), date.day())
}

/// Append-only note archive.
pub struct NoteArchive {
    store: Arc<dyn DocumentStore>,
    base_dir: String,
    clock: LogicalClock,
}

impl NoteArchive {
    pub fn new(store: Arc<dyn DocumentStore>, base_dir: &str, clock: LogicalClock) -> Self {
        Self {
            store,
            base_dir: base_dir.to_string(),
            clock,
        }
    }

    pub fn from_settings(store: Arc<dyn DocumentStore>, settings: &ArchiveSettings) -> Result<Self> {
        let clock = LogicalClock::new(settings.utc_offset_hours, settings.day_start_hour)?;
        Ok(Self::new(store, &settings.memo_base_dir, clock))
    }

    pub fn clock(&self) -> &LogicalClock {
        &self.clock
    }

    pub fn path_for(&self, date: NaiveDate) -> String {
        day_path(&self.base_dir, date)
    }

    /// Append `text` as a top-level bullet to today's document.
    pub async fn append_memo(&self, text: &str, now: DateTime<Utc>) -> Result<String> {
        self.append_block(&format_memo(text), now).await
    }

    /// Append a question with its answer nested beneath it.
    pub async fn append_qa(&self, question: &str, answer: &str, now: DateTime<Utc>) -> Result<String> {
        self.append_block(&format_qa(question, answer), now).await
    }

    /// Append an analysis under [`ANALYSIS_QUESTION`]. The analysis is already a
    /// bulleted structure, so its lines get no extra marker.
    pub async fn append_analysis_qa(&self, analysis: &str, now: DateTime<Utc>) -> Result<String> {
        self.append_block(&format_analysis(analysis), now).await
    }

    /// Upload an image next to the notes and link it from today's document.
    pub async fn append_image_link(
        &self,
        data: &[u8],
        extension: &str,
        now: DateTime<Utc>,
    ) -> Result<String> {
        let day = self.clock.day(now);
        let stamp = self.clock.local(now).format("%Y-%m-%d-%H%M%S").to_string();
        let file_name = format!("{}.{}", stamp, extension.trim_start_matches('.'));
        let asset_path = format!(
            "{}/{}/{:02}/assets/{}",
            self.base_dir.trim_end_matches('/'),
            day.year(),
            day.month(),
            file_name
        );

        self.store
            .create(&asset_path, data, &format!("Add image {}", stamp))
            .await?;
        info!("Image uploaded: {} ({} bytes)", asset_path, data.len());

        self.append_memo(&format!("![{}](assets/{})", file_name, file_name), now)
            .await
    }

    /// Read the notes of a given day.
    pub async fn read_day(&self, date: NaiveDate) -> Result<Option<String>> {
        Ok(self.store.get(&self.path_for(date)).await?.map(|d| d.text()))
    }

    /// Pick a uniformly random day in `[since, today]`.
    pub fn random_day<R: Rng>(since: NaiveDate, today: NaiveDate, rng: &mut R) -> NaiveDate {
        let span = (today - since).num_days();
        if span <= 0 {
            return since;
        }
        since + Duration::days(rng.gen_range(0..=span))
    }

    async fn append_block(&self, block: &str, now: DateTime<Utc>) -> Result<String> {
        let day = self.clock.day(now);
        let path = self.path_for(day);
        let label = day_label(day);

        // Always read right before writing so the version token is current.
        match self.store.get(&path).await? {
            Some(doc) => {
                let existing = doc.text();
                let content = format!("{}\n{}", existing.trim_end_matches('\n'), block);
                debug!("Appending {} bytes to {}", block.len(), path);
                self.store
                    .update(&path, content.as_bytes(), &doc.version, &format!("Update {}", label))
                    .await
            }
            None => {
                info!("Creating {}", path);
                self.store
                    .create(&path, block.as_bytes(), &format!("Add {}", label))
                    .await
            }
        }
    }
}

fn format_memo(text: &str) -> String {
    format!("- {}", text.trim().replace('\n', "\n  "))
}

fn format_qa(question: &str, answer: &str) -> String {
    format!(
        "  - {}\n    - {}",
        question.trim().replace('\n', " "),
        answer.trim().replace('\n', "\n      ")
    )
}

fn format_analysis(analysis: &str) -> String {
    let body: Vec<String> = analysis
        .trim()
        .lines()
        .map(|line| {
            let line = line.trim_end();
            if line.is_empty() {
                String::new()
            } else {
                format!("    {}", line)
            }
        })
        .collect();
    format!("  - {}\n{}", ANALYSIS_QUESTION, body.join("\n"))
}

/// A daily-log entry addressed by an explicit date.
#[derive(Debug, Clone, PartialEq)]
pub struct DatedEntry {
    pub date: NaiveDate,
    pub body: String,
}

fn date_prefix() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([0-9]{4})[/-]([0-9]{1,2})[/-]([0-9]{1,2})").ok())
        .as_ref()
}

/// Parse a leading `YYYY/MM/DD` or `YYYY-MM-DD` token. Impossible dates don't count.
pub fn parse_dated_entry(text: &str) -> Option<DatedEntry> {
    let caps = date_prefix()?.captures(text)?;
    let year: i32 = caps[1].parse().ok()?;
    let month: u32 = caps[2].parse().ok()?;
    let day: u32 = caps[3].parse().ok()?;
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    let end = caps.get(0)?.end();
    Some(DatedEntry {
        date,
        body: text[end..].trim_start_matches(['\n', '\r']).trim().to_string(),
    })
}

/// Daily log — one overwritten document per date.
pub struct DailyLog {
    store: Arc<dyn DocumentStore>,
    base_dir: String,
}

impl DailyLog {
    pub fn new(store: Arc<dyn DocumentStore>, base_dir: &str) -> Self {
        Self {
            store,
            base_dir: base_dir.to_string(),
        }
    }

    pub fn path_for(&self, date: NaiveDate) -> String {
        day_path(&self.base_dir, date)
    }

    /// Write `entry`, replacing whatever was stored for its date.
    pub async fn save(&self, entry: &DatedEntry) -> Result<String> {
        let path = self.path_for(entry.date);
        let label = day_label(entry.date);
        let base = self.base_dir.trim_end_matches('/');

        match self.store.get(&path).await? {
            Some(doc) => {
                info!("Overwriting daily log {}", path);
                self.store
                    .update(
                        &path,
                        entry.body.as_bytes(),
                        &doc.version,
                        &format!("{}: Update {}", base, label),
                    )
                    .await
            }
            None => {
                info!("Creating daily log {}", path);
                self.store
                    .create(&path, entry.body.as_bytes(), &format!("{}: Add {}", base, label))
                    .await
            }
        }
    }

    pub async fn read_day(&self, date: NaiveDate) -> Result<Option<String>> {
        Ok(self.store.get(&self.path_for(date)).await?.map(|d| d.text()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::InMemoryDocumentStore;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn at(rfc3339: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(rfc3339)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn jst() -> LogicalClock {
        LogicalClock::new(9, 4).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_logical_day_boundary() {
        let clock = jst();
        // 03:59 JST on Jan 4 still belongs to Jan 3
        assert_eq!(clock.day(at("2026-01-03T18:59:00Z")), date(2026, 1, 3));
        // 04:00 JST starts Jan 4
        assert_eq!(clock.day(at("2026-01-03T19:00:00Z")), date(2026, 1, 4));
        // 00:30 JST on Jan 1 belongs to Dec 31 of the previous year
        assert_eq!(clock.day(at("2025-12-31T15:30:00Z")), date(2025, 12, 31));
    }

    #[test]
    fn test_path_layout() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let archive = NoteArchive::new(store, "seeds/", jst());
        assert_eq!(archive.path_for(date(2026, 1, 3)), "seeds/2026/01/0103.md");
    }

    #[tokio::test]
    async fn test_memo_round_trip() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let archive = NoteArchive::new(store.clone(), "seeds", jst());
        let now = at("2026-01-03T01:00:00Z");

        let url = archive.append_memo("Buy milk", now).await.unwrap();
        assert_eq!(url, "memory://seeds/2026/01/0103.md");
        archive.append_memo("line one\nline two", now).await.unwrap();

        let content = archive.read_day(date(2026, 1, 3)).await.unwrap().unwrap();
        assert_eq!(content, "- Buy milk\n- line one\n  line two");
        assert_eq!(store.commits(), vec!["Add 2026.1.3", "Update 2026.1.3"]);
    }

    #[tokio::test]
    async fn test_qa_and_analysis_blocks() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let archive = NoteArchive::new(store.clone(), "seeds", jst());
        let now = at("2026-01-03T01:00:00Z");

        archive.append_memo("Buy milk", now).await.unwrap();
        archive
            .append_qa("Why milk?", "Because it's empty", now)
            .await
            .unwrap();
        archive
            .append_analysis_qa("【Facts】\n- fridge empty\n\n【Causes】\n- forgot", now)
            .await
            .unwrap();

        let content = store.read("seeds/2026/01/0103.md").unwrap();
        assert_eq!(
            content,
            "- Buy milk\n  - Why milk?\n    - Because it's empty\n  - objective AI analysis\n    【Facts】\n    - fridge empty\n\n    【Causes】\n    - forgot"
        );
    }

    #[tokio::test]
    async fn test_image_link() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let archive = NoteArchive::new(store.clone(), "seeds", jst());
        // 01:30:52 JST on Jan 4 → logical Jan 3
        let now = at("2026-01-03T16:30:52Z");

        archive.append_image_link(b"\xff\xd8", "jpg", now).await.unwrap();

        assert!(
            store
                .paths()
                .contains(&"seeds/2026/01/assets/2026-01-04-013052.jpg".to_string())
        );
        let content = store.read("seeds/2026/01/0103.md").unwrap();
        assert_eq!(
            content,
            "- ![2026-01-04-013052.jpg](assets/2026-01-04-013052.jpg)"
        );
    }

    #[test]
    fn test_parse_dated_entry() {
        let e = parse_dated_entry("2026/01/03 Went hiking").unwrap();
        assert_eq!(e.date, date(2026, 1, 3));
        assert_eq!(e.body, "Went hiking");

        let e = parse_dated_entry("2026-1-3\n\nLong day.\nSlept early.").unwrap();
        assert_eq!(e.date, date(2026, 1, 3));
        assert_eq!(e.body, "Long day.\nSlept early.");

        assert!(parse_dated_entry("2026/13/40 nope").is_none());
        assert!(parse_dated_entry("Buy milk 2026/01/03").is_none());
        assert!(parse_dated_entry("26/01/03").is_none());
    }

    #[tokio::test]
    async fn test_daily_log_overwrites() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let log = DailyLog::new(store.clone(), "daily");

        let first = parse_dated_entry("2026/01/03 Went hiking").unwrap();
        log.save(&first).await.unwrap();
        let second = parse_dated_entry("2026-01-03 Stayed home").unwrap();
        log.save(&second).await.unwrap();

        assert_eq!(
            log.read_day(date(2026, 1, 3)).await.unwrap().as_deref(),
            Some("Stayed home")
        );
        assert_eq!(
            store.commits(),
            vec!["daily: Add 2026.1.3", "daily: Update 2026.1.3"]
        );
    }

    #[test]
    fn test_random_day_in_range() {
        let mut rng = StdRng::seed_from_u64(7);
        let since = date(2023, 3, 17);
        let today = date(2026, 1, 3);
        for _ in 0..100 {
            let d = NoteArchive::random_day(since, today, &mut rng);
            assert!(d >= since && d <= today);
        }
        assert_eq!(NoteArchive::random_day(today, since, &mut rng), today);
    }
}
