//! Story archive: full transcripts on disk, a capped summary index, and a
//! background summarization worker.
//!
//! After each completed order the orchestrator submits the exchange here and
//! moves on; the worker writes the transcript, asks the summary model for a
//! one-sentence description, and upserts it into the index that prompt
//! assembly searches. Worker failures are logged and never surface to the
//! order that triggered them.

use crate::persist::{self, PersistError};
use chrono::{DateTime, Local};
use openai::{Message, OpenAi, Request};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Upper bound on the summary index; the oldest entries fall off.
const INDEX_CAP: usize = 200;

/// One transcript line as persisted in a story file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryEntry {
    pub role: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    pub timestamp: DateTime<Local>,
}

impl StoryEntry {
    pub fn user(content: impl Into<String>) -> Self {
        Self::plain("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain("assistant", content)
    }

    pub fn tool(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            role: "tool".to_string(),
            content: content.into(),
            tool_call_id: Some(tool_call_id.into()),
            tool_name: Some(tool_name.into()),
            timestamp: Local::now(),
        }
    }

    fn plain(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
            tool_call_id: None,
            tool_name: None,
            timestamp: Local::now(),
        }
    }
}

/// One line of the persisted summary index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryIndexEntry {
    pub id: String,
    pub date: DateTime<Local>,
    pub summary: String,
}

#[derive(Debug, Error)]
enum WorkerError {
    #[error(transparent)]
    Persist(#[from] PersistError),

    #[error(transparent)]
    Llm(#[from] openai::Error),
}

struct SummarizeJob {
    id: String,
    entries: Vec<StoryEntry>,
}

/// The archive handle held by the orchestrator.
pub struct StoryArchive {
    stories_dir: PathBuf,
    index: Arc<Mutex<Vec<StoryIndexEntry>>>,
    jobs: mpsc::UnboundedSender<SummarizeJob>,
    worker: JoinHandle<()>,
}

impl StoryArchive {
    /// Open the archive under the data directory and start the worker.
    pub async fn open(data_dir: &Path, client: OpenAi, summary_model: impl Into<String>) -> Self {
        let stories_dir = data_dir.join("stories");
        let index_path = data_dir.join("story-index.json");

        let entries: Vec<StoryIndexEntry> = persist::load_json_or_default(&index_path).await;
        let index = Arc::new(Mutex::new(entries));

        let (jobs, jobs_rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_worker(
            jobs_rx,
            stories_dir.clone(),
            index_path,
            Arc::clone(&index),
            client,
            summary_model.into(),
        ));

        Self {
            stories_dir,
            index,
            jobs,
            worker,
        }
    }

    /// Queue a completed order for archival. Never blocks the caller.
    pub fn submit(&self, id: String, entries: Vec<StoryEntry>) {
        if self.jobs.send(SummarizeJob { id, entries }).is_err() {
            warn!("Summarization worker is gone, dropping story");
        }
    }

    /// The most relevant archived stories for an order, best first.
    pub async fn find_relevant(&self, order: &str, limit: usize) -> Vec<StoryIndexEntry> {
        let index = self.index.lock().await;
        let mut scored: Vec<(usize, &StoryIndexEntry)> = index
            .iter()
            .map(|entry| (score_relevance(order, &entry.summary), entry))
            .filter(|(score, _)| *score > 0)
            .collect();
        // Stable sort keeps older entries first within a score
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored
            .into_iter()
            .take(limit)
            .map(|(_, entry)| entry.clone())
            .collect()
    }

    /// Read back one archived transcript, formatted for the model. Unknown
    /// or malformed ids read as "not found" text rather than an error.
    pub async fn story_detail(&self, id: &str) -> String {
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return format!("No story found with id \"{id}\".");
        }

        let path = self.stories_dir.join(format!("story-{id}.json"));
        match persist::load_json::<Vec<StoryEntry>>(&path).await {
            Ok(entries) => format_transcript(id, &entries),
            Err(_) => format!("No story found with id \"{id}\"."),
        }
    }

    /// Stop accepting stories and wait for queued summaries to finish.
    pub async fn shutdown(self) {
        drop(self.jobs);
        if let Err(e) = self.worker.await {
            warn!(error = %e, "Summarization worker panicked");
        }
    }
}

/// A fresh story id: the current time in Unix epoch milliseconds.
pub fn new_story_id() -> String {
    Local::now().timestamp_millis().to_string()
}

async fn run_worker(
    mut jobs: mpsc::UnboundedReceiver<SummarizeJob>,
    stories_dir: PathBuf,
    index_path: PathBuf,
    index: Arc<Mutex<Vec<StoryIndexEntry>>>,
    client: OpenAi,
    model: String,
) {
    while let Some(job) = jobs.recv().await {
        if let Err(e) = process_job(&job, &stories_dir, &index_path, &index, &client, &model).await
        {
            warn!(story = %job.id, error = %e, "Failed to archive story");
        }
    }
}

async fn process_job(
    job: &SummarizeJob,
    stories_dir: &Path,
    index_path: &Path,
    index: &Mutex<Vec<StoryIndexEntry>>,
    client: &OpenAi,
    model: &str,
) -> Result<(), WorkerError> {
    let transcript_path = stories_dir.join(format!("story-{}.json", job.id));
    persist::save_json(&transcript_path, &job.entries).await?;

    let request = Request::new(summary_messages(&job.entries))
        .with_model(model)
        .with_max_tokens(80)
        .with_temperature(0.3);
    let response = client.complete(request).await?;
    let summary = clean_summary(response.text());

    debug!(story = %job.id, summary = %summary, "Archived story");

    let mut index = index.lock().await;
    upsert_entry(
        &mut index,
        StoryIndexEntry {
            id: job.id.clone(),
            date: Local::now(),
            summary,
        },
    );
    persist::save_json(index_path, &*index).await?;
    Ok(())
}

fn summary_messages(entries: &[StoryEntry]) -> Vec<Message> {
    let transcript: String = entries
        .iter()
        .filter(|e| e.role == "user" || e.role == "assistant")
        .map(|e| format!("{}: {}\n", e.role, e.content))
        .collect();

    vec![
        Message::system(
            "Summarize the following conversation in one short sentence of at most \
             120 characters. Name the key action or topic. Do not end with punctuation.",
        ),
        Message::user(transcript),
    ]
}

fn clean_summary(raw: &str) -> String {
    raw.trim()
        .trim_matches('"')
        .trim_end_matches(['.', '!', '?'])
        .trim_end()
        .to_string()
}

fn upsert_entry(index: &mut Vec<StoryIndexEntry>, entry: StoryIndexEntry) {
    if let Some(existing) = index.iter_mut().find(|e| e.id == entry.id) {
        *existing = entry;
    } else {
        index.push(entry);
    }
    while index.len() > INDEX_CAP {
        index.remove(0);
    }
}

/// Count the order words longer than 3 characters that appear in the
/// summary, case-insensitively. A word repeated in the order counts once
/// per occurrence.
fn score_relevance(order: &str, summary: &str) -> usize {
    let summary_lower = summary.to_lowercase();
    order
        .split_whitespace()
        .map(str::to_lowercase)
        .filter(|word| word.chars().count() > 3)
        .filter(|word| summary_lower.contains(word.as_str()))
        .count()
}

fn format_transcript(id: &str, entries: &[StoryEntry]) -> String {
    let mut out = format!("Story {id}:\n");
    for entry in entries {
        match entry.role.as_str() {
            "tool" => {
                let name = entry.tool_name.as_deref().unwrap_or("tool");
                out.push_str(&format!("[{name}] {}\n", entry.content));
            }
            role => out.push_str(&format!("{role}: {}\n", entry.content)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn archive_in(dir: &TempDir) -> StoryArchive {
        StoryArchive::open(dir.path(), OpenAi::new("test-key"), "gpt-4o-mini").await
    }

    #[test]
    fn test_score_relevance() {
        // Words longer than 3 chars, case-insensitive
        assert_eq!(
            score_relevance("Turn on the kitchen lights", "Turned the kitchen lights off"),
            3 // "turn" (in "turned"), "kitchen", "lights"
        );
        // A repeated order word scores once per occurrence
        assert_eq!(
            score_relevance("lights lights lights", "dimmed the lights"),
            3
        );
        // Words of 3 or fewer characters never score
        assert_eq!(score_relevance("on the off and", "on the off and"), 0);
        assert_eq!(score_relevance("garden party", "ordered groceries"), 0);
    }

    #[test]
    fn test_clean_summary() {
        assert_eq!(clean_summary("  \"Watered the plants.\"  "), "Watered the plants");
        assert_eq!(clean_summary("Set an alarm!"), "Set an alarm");
        assert_eq!(clean_summary("No punctuation"), "No punctuation");
    }

    #[test]
    fn test_upsert_caps_index() {
        let mut index = Vec::new();
        for i in 0..INDEX_CAP {
            upsert_entry(
                &mut index,
                StoryIndexEntry {
                    id: format!("{i}"),
                    date: Local::now(),
                    summary: format!("story {i}"),
                },
            );
        }
        assert_eq!(index.len(), INDEX_CAP);

        upsert_entry(
            &mut index,
            StoryIndexEntry {
                id: "newest".to_string(),
                date: Local::now(),
                summary: "the newest story".to_string(),
            },
        );

        // The oldest entry is evicted, the newest kept
        assert_eq!(index.len(), INDEX_CAP);
        assert_eq!(index[0].id, "1");
        assert_eq!(index.last().unwrap().id, "newest");
    }

    #[test]
    fn test_upsert_replaces_existing_id() {
        let mut index = vec![StoryIndexEntry {
            id: "42".to_string(),
            date: Local::now(),
            summary: "old summary".to_string(),
        }];

        upsert_entry(
            &mut index,
            StoryIndexEntry {
                id: "42".to_string(),
                date: Local::now(),
                summary: "new summary".to_string(),
            },
        );

        assert_eq!(index.len(), 1);
        assert_eq!(index[0].summary, "new summary");
    }

    #[test]
    fn test_story_entry_serialization() {
        let entry = StoryEntry::tool("call_1", "set_light", "Done.");
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["role"], "tool");
        assert_eq!(value["toolCallId"], "call_1");
        assert_eq!(value["toolName"], "set_light");
        assert!(value["timestamp"].is_string());

        // Plain entries omit the tool fields entirely
        let value = serde_json::to_value(StoryEntry::user("hello")).unwrap();
        assert!(value.get("toolCallId").is_none());
        assert!(value.get("toolName").is_none());
    }

    #[test]
    fn test_summary_messages_skip_tool_traffic() {
        let entries = vec![
            StoryEntry::user("Turn on the lights"),
            StoryEntry::tool("call_1", "set_light", "ok"),
            StoryEntry::assistant("The lights are on"),
        ];

        let messages = summary_messages(&entries);
        match &messages[1] {
            Message::User { content } => {
                assert!(content.contains("Turn on the lights"));
                assert!(content.contains("The lights are on"));
                assert!(!content.contains("set_light"));
            }
            other => panic!("Expected user message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_find_relevant_orders_and_limits() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let archive = archive_in(&temp_dir).await;

        {
            let mut index = archive.index.lock().await;
            for (id, summary) in [
                ("1", "ordered pizza for dinner"),
                ("2", "turned the kitchen lights off"),
                ("3", "dimmed the kitchen lights for movie night"),
                ("4", "scheduled a morning workout"),
            ] {
                index.push(StoryIndexEntry {
                    id: id.to_string(),
                    date: Local::now(),
                    summary: summary.to_string(),
                });
            }
        }

        let relevant = archive.find_relevant("kitchen lights please", 3).await;
        assert_eq!(relevant.len(), 2);
        // Equal scores keep index order
        assert_eq!(relevant[0].id, "2");
        assert_eq!(relevant[1].id, "3");

        // Zero-scoring stories never appear
        let relevant = archive.find_relevant("what is the weather", 3).await;
        assert!(relevant.is_empty());

        archive.shutdown().await;
    }

    #[tokio::test]
    async fn test_story_detail_round_trip() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let archive = archive_in(&temp_dir).await;

        let entries = vec![
            StoryEntry::user("Play some jazz"),
            StoryEntry::tool("call_1", "play_music", "Now playing: Kind of Blue"),
            StoryEntry::assistant("Jazz is playing in the living room"),
        ];
        persist::save_json(temp_dir.path().join("stories").join("story-1700000000000.json"), &entries)
            .await
            .expect("Save should succeed");

        let detail = archive.story_detail("1700000000000").await;
        assert!(detail.contains("Story 1700000000000"));
        assert!(detail.contains("user: Play some jazz"));
        assert!(detail.contains("[play_music] Now playing: Kind of Blue"));

        archive.shutdown().await;
    }

    #[tokio::test]
    async fn test_story_detail_rejects_bad_ids() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let archive = archive_in(&temp_dir).await;

        assert!(archive.story_detail("9999999").await.contains("No story found"));
        assert!(archive.story_detail("").await.contains("No story found"));
        // Path metacharacters are never used to build a path
        assert!(archive
            .story_detail("../../../etc/passwd")
            .await
            .contains("No story found"));

        archive.shutdown().await;
    }

    #[test]
    fn test_new_story_id_is_numeric() {
        let id = new_story_id();
        assert!(id.chars().all(|c| c.is_ascii_digit()));
        assert!(id.len() >= 13);
    }
}
