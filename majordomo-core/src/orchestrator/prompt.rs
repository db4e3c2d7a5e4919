//! System prompt assembly.
//!
//! Every order gets a fresh system prompt: the capability docs from disk,
//! the current time, the always-tier memory, the on-demand namespace list,
//! and summaries of relevant past conversations. Docs are re-read on every
//! order so they can be edited without restarting the agent.

use crate::archive::StoryIndexEntry;
use crate::memory::MemoryContext;
use chrono::Local;
use std::path::Path;
use tracing::warn;

/// Read every `*.md` file in the docs directory, sorted by file name, and
/// join them with horizontal rules. A missing directory yields no docs.
pub async fn load_docs(dir: &Path) -> String {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return String::new(),
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "Failed to read docs directory");
            return String::new();
        }
    };

    let mut paths = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "md") {
            paths.push(path);
        }
    }
    paths.sort();

    let mut docs = Vec::new();
    for path in paths {
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => docs.push(content.trim().to_string()),
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to read doc file"),
        }
    }
    docs.join("\n\n---\n\n")
}

/// Assemble the system prompt for one order.
pub fn build_system_prompt(
    docs: &str,
    memory: &MemoryContext,
    relevant_stories: &[StoryIndexEntry],
) -> String {
    let mut prompt = String::new();

    if !docs.is_empty() {
        prompt.push_str(docs);
        prompt.push_str("\n\n");
    }

    prompt.push_str(&format!(
        "The current date and time is {}.\n",
        Local::now().format("%A, %B %-d %Y, %H:%M")
    ));

    if !memory.always.is_empty() {
        prompt.push_str("\n# Long-term memory\n");
        prompt.push_str(&memory.always);
    }

    if !memory.on_demand.is_empty() {
        prompt.push_str("\n# On-demand memory namespaces\n");
        prompt.push_str(
            "These namespaces exist but are not shown here. Call memory_read to see one.\n",
        );
        for (name, count) in &memory.on_demand {
            let noun = if *count == 1 { "entry" } else { "entries" };
            prompt.push_str(&format!("- {name} ({count} {noun})\n"));
        }
    }

    if !relevant_stories.is_empty() {
        prompt.push_str("\n# Possibly relevant past conversations\n");
        prompt.push_str("Call get_story_detail with an id for the full transcript.\n");
        for story in relevant_stories {
            prompt.push_str(&format!(
                "- [{}] {} ({})\n",
                story.id,
                story.summary,
                story.date.format("%Y-%m-%d")
            ));
        }
    }

    prompt
}
