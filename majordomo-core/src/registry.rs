//! The tool registry: one catalogue, one dispatch point.
//!
//! At startup the registry records every builtin tool and connects each
//! configured capability server, collecting their descriptors into a single
//! catalogue offered to the model on every turn. Dispatch resolves a tool
//! call by name to either an in-process handler or a `tools/call` on the
//! owning server. Nothing in the dispatch path throws: every failure comes
//! back as an error-tagged outcome the model can read.

use crate::archive::StoryArchive;
use crate::builtins::{self, BuiltinTool};
use crate::capability::{CapabilityClient, ToolOutcome};
use crate::config::ServerConfig;
use crate::memory::MemoryStore;
use crate::scheduler::Scheduler;
use openai::{Tool, ToolCall};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Duplicate tool name \"{name}\" ({first} and {second})")]
    DuplicateTool {
        name: String,
        first: String,
        second: String,
    },
}

/// Where a tool call goes when dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Binding {
    Builtin(BuiltinTool),
    /// Index into the connected client list.
    Remote(usize),
}

/// The full set of tools callable this session.
pub struct ToolRegistry {
    bindings: HashMap<String, Binding>,
    catalogue: Vec<Tool>,
    clients: Vec<CapabilityClient>,
}

impl ToolRegistry {
    /// Build the registry: register every builtin, then connect each
    /// configured capability server and fold in its tools.
    ///
    /// A server that fails to connect is logged and skipped; the session
    /// runs without its tools. A duplicate tool name is fatal, because the
    /// model addresses tools by name alone.
    pub async fn connect(configs: &[ServerConfig]) -> Result<Self, RegistryError> {
        let mut registry = Self {
            bindings: HashMap::new(),
            catalogue: Vec::new(),
            clients: Vec::new(),
        };

        for tool in BuiltinTool::all() {
            registry.insert(tool.descriptor(), Binding::Builtin(tool), "builtin")?;
        }

        for config in configs {
            let mut client = match CapabilityClient::connect(config).await {
                Ok(client) => client,
                Err(e) => {
                    warn!(server = %config.name, error = %e, "Capability server unavailable, skipping");
                    continue;
                }
            };

            let tools = match client.list_tools().await {
                Ok(tools) => tools,
                Err(e) => {
                    warn!(server = %config.name, error = %e, "Failed to list tools, skipping server");
                    client.shutdown().await;
                    continue;
                }
            };

            let index = registry.clients.len();
            registry.clients.push(client);
            info!(server = %config.name, tools = tools.len(), "Connected capability server");

            for tool in tools {
                registry.insert(tool, Binding::Remote(index), &config.name)?;
            }
        }

        Ok(registry)
    }

    /// Every registered tool descriptor, builtins first, then server tools
    /// in connection order.
    pub fn catalogue(&self) -> &[Tool] {
        &self.catalogue
    }

    /// Execute one tool call.
    ///
    /// Unknown names, malformed arguments, and server failures all come back
    /// as error outcomes so the turn loop can feed them to the model.
    pub async fn dispatch(
        &mut self,
        call: &ToolCall,
        memory: &mut MemoryStore,
        scheduler: &mut Scheduler,
        archive: &StoryArchive,
    ) -> ToolOutcome {
        let Some(&binding) = self.bindings.get(&call.name) else {
            return ToolOutcome::error(format!("Tool \"{}\" not found.", call.name));
        };

        let arguments = match call.arguments_json() {
            Ok(arguments) => arguments,
            Err(e) => {
                return ToolOutcome::error(format!(
                    "Malformed arguments for \"{}\": {e}",
                    call.name
                ))
            }
        };

        match binding {
            Binding::Builtin(tool) => {
                builtins::execute(tool, &arguments, memory, scheduler, archive).await
            }
            Binding::Remote(index) => {
                match self.clients[index].call_tool(&call.name, arguments).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        warn!(
                            tool = %call.name,
                            server = %self.clients[index].name(),
                            error = %e,
                            "Tool dispatch failed"
                        );
                        ToolOutcome::error(format!("Error executing tool: {e}"))
                    }
                }
            }
        }
    }

    /// Kill every connected capability server.
    pub async fn shutdown(&mut self) {
        for client in &mut self.clients {
            client.shutdown().await;
        }
    }

    fn insert(&mut self, tool: Tool, binding: Binding, owner: &str) -> Result<(), RegistryError> {
        if self.bindings.contains_key(&tool.name) {
            return Err(RegistryError::DuplicateTool {
                name: tool.name.clone(),
                first: self.describe_owner(&tool.name),
                second: owner.to_string(),
            });
        }
        self.bindings.insert(tool.name.clone(), binding);
        self.catalogue.push(tool);
        Ok(())
    }

    fn describe_owner(&self, name: &str) -> String {
        match self.bindings.get(name) {
            Some(Binding::Builtin(_)) => "builtin".to_string(),
            Some(Binding::Remote(index)) => self.clients[*index].name().to_string(),
            None => "unknown".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openai::OpenAi;
    use serde_json::json;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    struct Fixture {
        registry: ToolRegistry,
        memory: MemoryStore,
        scheduler: Scheduler,
        archive: StoryArchive,
        _orders: mpsc::Receiver<crate::scheduler::ScheduledOrder>,
    }

    async fn fixture(dir: &TempDir) -> Fixture {
        let (tx, rx) = mpsc::channel(8);
        Fixture {
            registry: ToolRegistry::connect(&[]).await.expect("Connect should succeed"),
            memory: MemoryStore::open(dir.path().join("memory.json")).await,
            scheduler: Scheduler::load(dir.path().join("schedules.json"), tx).await,
            archive: StoryArchive::open(dir.path(), OpenAi::new("test-key"), "gpt-4o-mini").await,
            _orders: rx,
        }
    }

    fn call(name: &str, arguments: &str) -> ToolCall {
        ToolCall {
            id: "call_1".to_string(),
            name: name.to_string(),
            arguments: arguments.to_string(),
        }
    }

    #[tokio::test]
    async fn test_catalogue_contains_builtins() {
        let registry = ToolRegistry::connect(&[]).await.expect("Connect should succeed");
        let names: Vec<&str> = registry.catalogue().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names.len(), 9);
        assert!(names.contains(&"memory_save"));
        assert!(names.contains(&"schedule_add"));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_skipped() {
        let configs = vec![ServerConfig {
            name: "ghost".to_string(),
            command: "/nonexistent/capability-server".to_string(),
            args: Vec::new(),
        }];

        // Startup survives; only builtins are registered
        let registry = ToolRegistry::connect(&configs).await.expect("Connect should succeed");
        assert_eq!(registry.catalogue().len(), 9);
        assert!(registry.clients.is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_unknown_tool_is_error_outcome() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let mut f = fixture(&temp_dir).await;

        let outcome = f
            .registry
            .dispatch(&call("set_light", "{}"), &mut f.memory, &mut f.scheduler, &f.archive)
            .await;
        assert!(outcome.is_error);
        assert_eq!(outcome.text, "Tool \"set_light\" not found.");

        f.archive.shutdown().await;
    }

    #[tokio::test]
    async fn test_dispatch_malformed_arguments() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let mut f = fixture(&temp_dir).await;

        let outcome = f
            .registry
            .dispatch(
                &call("memory_list", "{\"unclosed\":"),
                &mut f.memory,
                &mut f.scheduler,
                &f.archive,
            )
            .await;
        assert!(outcome.is_error);
        assert!(outcome.text.contains("Malformed arguments"));

        f.archive.shutdown().await;
    }

    #[tokio::test]
    async fn test_dispatch_builtin_round_trip() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let mut f = fixture(&temp_dir).await;

        let outcome = f
            .registry
            .dispatch(
                &call(
                    "memory_save",
                    &json!({"namespace": "house", "key": "gate code", "value": "4491"}).to_string(),
                ),
                &mut f.memory,
                &mut f.scheduler,
                &f.archive,
            )
            .await;
        assert!(!outcome.is_error);
        assert!(f.memory.prompt_context().always.contains("gate code: 4491"));

        f.archive.shutdown().await;
    }

    #[tokio::test]
    async fn test_duplicate_builtin_name_is_fatal() {
        let mut registry = ToolRegistry::connect(&[]).await.expect("Connect should succeed");
        let result = registry.insert(
            BuiltinTool::MemorySave.descriptor(),
            Binding::Builtin(BuiltinTool::MemorySave),
            "lights",
        );
        assert!(matches!(
            result,
            Err(RegistryError::DuplicateTool { name, first, .. })
                if name == "memory_save" && first == "builtin"
        ));
    }
}
