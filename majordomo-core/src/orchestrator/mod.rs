//! The orchestrator: a turn-based tool-calling loop around the model.
//!
//! One order flows through a bounded loop of model calls. Each round either
//! yields a plain-text answer, which ends the order, or a batch of tool
//! calls, which are dispatched sequentially in the order the model emitted
//! them and answered with paired tool results. When the turn budget runs out
//! a fallback answer is substituted so an order always terminates.
//!
//! The full transcript of every order, tool traffic included, goes to the
//! story archive in the background; only the completed exchange enters the
//! rolling history carried to the next order.

mod history;
mod prompt;

use crate::archive::{new_story_id, StoryArchive, StoryEntry};
use crate::config::Config;
use crate::memory::MemoryStore;
use crate::registry::{RegistryError, ToolRegistry};
use crate::scheduler::{ScheduledOrder, Scheduler};
use futures::StreamExt;
use openai::{
    Message, OpenAi, Request, StreamEvent, ToolCall, ToolCallAccumulator, ToolChoice,
};
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};

pub use history::RollingHistory;

/// Upper bound on model rounds per order. Guarantees termination even when
/// every response requests more tools.
const MAX_TURNS: usize = 10;

/// Answer substituted when the turn budget runs out.
const FALLBACK_ANSWER: &str = "Task completed.";

/// How many archived stories to surface in the system prompt.
const RELEVANT_STORIES: usize = 3;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("LLM request failed: {0}")]
    Llm(#[from] openai::Error),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// The agent core: model client, tool registry, stores, and history.
pub struct Orchestrator {
    client: OpenAi,
    model: String,
    docs_dir: PathBuf,
    registry: ToolRegistry,
    memory: MemoryStore,
    scheduler: Scheduler,
    archive: StoryArchive,
    history: RollingHistory,
}

impl Orchestrator {
    /// Connect capability servers, open the stores, and start the scheduler
    /// timers. Orders fired by schedules arrive on the given channel.
    pub async fn start(
        client: OpenAi,
        config: Config,
        orders: mpsc::Sender<ScheduledOrder>,
    ) -> Result<Self, OrchestratorError> {
        let registry = ToolRegistry::connect(&config.servers).await?;
        let memory = MemoryStore::open(config.data_dir.join("memory.json")).await;
        let scheduler = Scheduler::load(config.data_dir.join("schedules.json"), orders).await;
        let archive =
            StoryArchive::open(&config.data_dir, client.clone(), config.summary_model).await;

        info!(model = %config.model, tools = registry.catalogue().len(), "Orchestrator ready");

        Ok(Self {
            client,
            model: config.model,
            docs_dir: config.docs_dir,
            registry,
            memory,
            scheduler,
            archive,
            history: RollingHistory::new(),
        })
    }

    /// Resolve one order and return the final answer.
    pub async fn process_order(&mut self, order: &str) -> Result<String, OrchestratorError> {
        let (mut messages, mut story) = self.begin_order(order).await;
        let mut answer = None;

        for turn in 0..MAX_TURNS {
            let response = self.client.complete(self.build_request(&messages)).await?;

            if response.tool_calls.is_empty() {
                answer = Some(response.text().to_string());
                break;
            }

            debug!(turn, calls = response.tool_calls.len(), "Tool round");
            self.run_tool_round(response.content, response.tool_calls, &mut messages, &mut story)
                .await;
        }

        Ok(self.finish_order(order, answer, story))
    }

    /// Resolve one order, pushing answer tokens to `sink` as they arrive.
    ///
    /// Tool rounds stay blocking: a call is only dispatched once its
    /// arguments are complete. A dropped receiver never aborts the order.
    pub async fn process_order_stream(
        &mut self,
        order: &str,
        sink: mpsc::Sender<String>,
    ) -> Result<String, OrchestratorError> {
        let (mut messages, mut story) = self.begin_order(order).await;
        let mut answer = None;

        for turn in 0..MAX_TURNS {
            let mut stream = self.client.stream(self.build_request(&messages)).await?;
            let mut content = String::new();
            let mut pending = ToolCallAccumulator::new();

            while let Some(event) = stream.next().await {
                match event? {
                    StreamEvent::ContentDelta { text } => {
                        let _ = sink.send(text.clone()).await;
                        content.push_str(&text);
                    }
                    StreamEvent::ToolCallDelta {
                        index,
                        id,
                        name,
                        arguments,
                    } => pending.push(index, id, name, &arguments),
                    StreamEvent::Finished { .. } => {}
                    StreamEvent::Done => break,
                }
            }

            let calls = pending.finish();
            if calls.is_empty() {
                answer = Some(content);
                break;
            }

            debug!(turn, calls = calls.len(), "Tool round");
            let content = (!content.is_empty()).then_some(content);
            self.run_tool_round(content, calls, &mut messages, &mut story).await;
        }

        Ok(self.finish_order_stream(order, answer, story, &sink).await)
    }

    /// Stop timers, kill capability servers, and drain the archive worker.
    pub async fn shutdown(self) {
        let Self {
            mut registry,
            mut scheduler,
            archive,
            ..
        } = self;
        scheduler.shutdown();
        registry.shutdown().await;
        archive.shutdown().await;
    }

    async fn begin_order(&self, order: &str) -> (Vec<Message>, Vec<StoryEntry>) {
        let docs = prompt::load_docs(&self.docs_dir).await;
        let memory = self.memory.prompt_context();
        let relevant = self.archive.find_relevant(order, RELEVANT_STORIES).await;
        let system = prompt::build_system_prompt(&docs, &memory, &relevant);

        let mut messages = vec![Message::system(system)];
        messages.extend(self.history.messages());
        messages.push(Message::user(order));

        (messages, vec![StoryEntry::user(order)])
    }

    fn build_request(&self, messages: &[Message]) -> Request {
        Request::new(messages.to_vec())
            .with_model(&self.model)
            .with_tools(self.registry.catalogue().to_vec())
            .with_tool_choice(ToolChoice::Auto)
    }

    /// Dispatch one round of tool calls sequentially, in emission order, and
    /// append the assistant message plus one paired result per call.
    async fn run_tool_round(
        &mut self,
        content: Option<String>,
        calls: Vec<ToolCall>,
        messages: &mut Vec<Message>,
        story: &mut Vec<StoryEntry>,
    ) {
        if let Some(text) = content.as_deref() {
            if !text.is_empty() {
                story.push(StoryEntry::assistant(text));
            }
        }
        messages.push(Message::Assistant {
            content,
            tool_calls: calls.clone(),
        });

        for call in calls {
            let outcome = self
                .registry
                .dispatch(&call, &mut self.memory, &mut self.scheduler, &self.archive)
                .await;

            debug!(tool = %call.name, error = outcome.is_error, "Dispatched tool");
            story.push(StoryEntry::tool(&call.id, &call.name, &outcome.text));
            messages.push(Message::tool_result(call.id, call.name, outcome.text));
        }
    }

    /// Record the exchange and hand the transcript to the archive.
    fn finish_order(
        &mut self,
        order: &str,
        answer: Option<String>,
        mut story: Vec<StoryEntry>,
    ) -> String {
        let answer = match answer {
            Some(answer) if !answer.trim().is_empty() => answer,
            _ => FALLBACK_ANSWER.to_string(),
        };

        story.push(StoryEntry::assistant(&answer));
        self.history.push_exchange(order, &answer);
        self.archive.submit(new_story_id(), story);
        answer
    }

    /// Like [`Self::finish_order`], but a substituted fallback answer still
    /// reaches the token sink, since it was never streamed by the model.
    async fn finish_order_stream(
        &mut self,
        order: &str,
        answer: Option<String>,
        story: Vec<StoryEntry>,
        sink: &mpsc::Sender<String>,
    ) -> String {
        let streamed = matches!(&answer, Some(a) if !a.trim().is_empty());
        let answer = self.finish_order(order, answer, story);
        if !streamed {
            let _ = sink.send(answer.clone()).await;
        }
        answer
    }
}
