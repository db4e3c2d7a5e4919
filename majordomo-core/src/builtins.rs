//! Virtual tools executed in-process against the agent's own stores.
//!
//! These sit in the same catalogue as capability server tools but never
//! leave the process: memory management, story recall, and schedule
//! management. Each one validates its own arguments and answers with a
//! short confirmation or a descriptive error outcome.

use crate::archive::StoryArchive;
use crate::capability::ToolOutcome;
use crate::memory::{MemoryStore, Priority};
use crate::scheduler::Scheduler;
use openai::Tool;
use serde_json::{json, Value};

/// The closed set of in-process tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinTool {
    MemorySave,
    MemoryDelete,
    MemoryRead,
    MemoryList,
    GetStoryDetail,
    ScheduleAdd,
    ScheduleList,
    ScheduleDelete,
    ScheduleToggle,
}

impl BuiltinTool {
    pub fn all() -> [BuiltinTool; 9] {
        [
            Self::MemorySave,
            Self::MemoryDelete,
            Self::MemoryRead,
            Self::MemoryList,
            Self::GetStoryDetail,
            Self::ScheduleAdd,
            Self::ScheduleList,
            Self::ScheduleDelete,
            Self::ScheduleToggle,
        ]
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "memory_save" => Some(Self::MemorySave),
            "memory_delete" => Some(Self::MemoryDelete),
            "memory_read" => Some(Self::MemoryRead),
            "memory_list" => Some(Self::MemoryList),
            "get_story_detail" => Some(Self::GetStoryDetail),
            "schedule_add" => Some(Self::ScheduleAdd),
            "schedule_list" => Some(Self::ScheduleList),
            "schedule_delete" => Some(Self::ScheduleDelete),
            "schedule_toggle" => Some(Self::ScheduleToggle),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::MemorySave => "memory_save",
            Self::MemoryDelete => "memory_delete",
            Self::MemoryRead => "memory_read",
            Self::MemoryList => "memory_list",
            Self::GetStoryDetail => "get_story_detail",
            Self::ScheduleAdd => "schedule_add",
            Self::ScheduleList => "schedule_list",
            Self::ScheduleDelete => "schedule_delete",
            Self::ScheduleToggle => "schedule_toggle",
        }
    }

    /// The tool definition offered to the model.
    pub fn descriptor(self) -> Tool {
        match self {
            Self::MemorySave => Tool {
                name: "memory_save".to_string(),
                description: "Save a fact to long-term memory. Facts live in named namespaces; an 'always' namespace is visible in every conversation, an 'on-demand' namespace must be read explicitly with memory_read.".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "namespace": {
                            "type": "string",
                            "description": "Namespace to store the fact under (e.g. 'household', 'pantry')"
                        },
                        "key": {
                            "type": "string",
                            "description": "Short identifier for the fact"
                        },
                        "value": {
                            "type": "string",
                            "description": "The fact itself"
                        },
                        "priority": {
                            "type": "string",
                            "enum": ["always", "on-demand"],
                            "description": "Prompt tier if the namespace is new (default 'always'). Existing namespaces keep their tier."
                        }
                    },
                    "required": ["namespace", "key", "value"]
                }),
            },
            Self::MemoryDelete => Tool {
                name: "memory_delete".to_string(),
                description: "Delete one fact from long-term memory. The namespace disappears with its last entry.".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "namespace": {
                            "type": "string",
                            "description": "Namespace containing the fact"
                        },
                        "key": {
                            "type": "string",
                            "description": "Key of the fact to delete"
                        }
                    },
                    "required": ["namespace", "key"]
                }),
            },
            Self::MemoryRead => Tool {
                name: "memory_read".to_string(),
                description: "Read every entry in one memory namespace.".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "namespace": {
                            "type": "string",
                            "description": "Namespace to read"
                        }
                    },
                    "required": ["namespace"]
                }),
            },
            Self::MemoryList => Tool {
                name: "memory_list".to_string(),
                description: "List all memory namespaces with their tier and entry count.".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {},
                    "required": []
                }),
            },
            Self::GetStoryDetail => Tool {
                name: "get_story_detail".to_string(),
                description: "Fetch the full transcript of a past conversation by its story id. Story ids appear next to the summaries of relevant past conversations.".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "story_id": {
                            "type": "string",
                            "description": "Id of the story to fetch"
                        }
                    },
                    "required": ["story_id"]
                }),
            },
            Self::ScheduleAdd => Tool {
                name: "schedule_add".to_string(),
                description: "Create a recurring order. The prompt is run automatically on the given cron expression: five fields (minute hour day month weekday), local time. Example: '0 7 * * *' runs daily at 07:00.".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "name": {
                            "type": "string",
                            "description": "Human-readable name (e.g. 'morning briefing')"
                        },
                        "cron": {
                            "type": "string",
                            "description": "Five-field cron expression"
                        },
                        "prompt": {
                            "type": "string",
                            "description": "The order to run each time the schedule fires"
                        }
                    },
                    "required": ["name", "cron", "prompt"]
                }),
            },
            Self::ScheduleList => Tool {
                name: "schedule_list".to_string(),
                description: "List all recurring orders with their ids, cron expressions, and enabled state.".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {},
                    "required": []
                }),
            },
            Self::ScheduleDelete => Tool {
                name: "schedule_delete".to_string(),
                description: "Delete a recurring order by id.".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "id": {
                            "type": "string",
                            "description": "Id of the schedule to delete"
                        }
                    },
                    "required": ["id"]
                }),
            },
            Self::ScheduleToggle => Tool {
                name: "schedule_toggle".to_string(),
                description: "Enable or disable a recurring order by id. Disabled schedules keep their definition but never fire.".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "id": {
                            "type": "string",
                            "description": "Id of the schedule to toggle"
                        }
                    },
                    "required": ["id"]
                }),
            },
        }
    }
}

/// Descriptors for every builtin, in declaration order.
pub fn descriptors() -> Vec<Tool> {
    BuiltinTool::all().iter().map(|t| t.descriptor()).collect()
}

/// Execute one builtin against the stores.
pub async fn execute(
    tool: BuiltinTool,
    args: &Value,
    memory: &mut MemoryStore,
    scheduler: &mut Scheduler,
    archive: &StoryArchive,
) -> ToolOutcome {
    match tool {
        BuiltinTool::MemorySave => memory_save(args, memory).await,
        BuiltinTool::MemoryDelete => memory_delete(args, memory).await,
        BuiltinTool::MemoryRead => memory_read(args, memory),
        BuiltinTool::MemoryList => memory_list(memory),
        BuiltinTool::GetStoryDetail => story_detail(args, archive).await,
        BuiltinTool::ScheduleAdd => schedule_add(args, scheduler).await,
        BuiltinTool::ScheduleList => schedule_list(scheduler),
        BuiltinTool::ScheduleDelete => schedule_delete(args, scheduler).await,
        BuiltinTool::ScheduleToggle => schedule_toggle(args, scheduler).await,
    }
}

async fn memory_save(args: &Value, memory: &mut MemoryStore) -> ToolOutcome {
    let Some(namespace) = args["namespace"].as_str() else {
        return ToolOutcome::error("memory_save requires a \"namespace\" argument");
    };
    let Some(key) = args["key"].as_str() else {
        return ToolOutcome::error("memory_save requires a \"key\" argument");
    };
    let Some(value) = args["value"].as_str() else {
        return ToolOutcome::error("memory_save requires a \"value\" argument");
    };
    let priority = match args["priority"].as_str() {
        None => Priority::Always,
        Some(raw) => match Priority::parse(raw) {
            Some(priority) => priority,
            None => {
                return ToolOutcome::error(format!(
                    "Unknown priority \"{raw}\", expected \"always\" or \"on-demand\""
                ))
            }
        },
    };

    match memory.set(namespace, key, value, priority).await {
        Ok(()) => ToolOutcome::success(format!("Saved {namespace}/{key}.")),
        Err(e) => ToolOutcome::error(format!("Failed to save memory: {e}")),
    }
}

async fn memory_delete(args: &Value, memory: &mut MemoryStore) -> ToolOutcome {
    let Some(namespace) = args["namespace"].as_str() else {
        return ToolOutcome::error("memory_delete requires a \"namespace\" argument");
    };
    let Some(key) = args["key"].as_str() else {
        return ToolOutcome::error("memory_delete requires a \"key\" argument");
    };

    match memory.remove(namespace, key).await {
        Ok(true) => ToolOutcome::success(format!("Deleted {namespace}/{key}.")),
        Ok(false) => {
            ToolOutcome::error(format!("No entry \"{key}\" in namespace \"{namespace}\""))
        }
        Err(e) => ToolOutcome::error(format!("Failed to delete memory: {e}")),
    }
}

fn memory_read(args: &Value, memory: &MemoryStore) -> ToolOutcome {
    let Some(namespace) = args["namespace"].as_str() else {
        return ToolOutcome::error("memory_read requires a \"namespace\" argument");
    };

    match memory.namespace(namespace) {
        Some(ns) => {
            let mut text = format!("Namespace \"{namespace}\" ({}):\n", ns.priority.as_str());
            for (key, value) in &ns.entries {
                text.push_str(&format!("- {key}: {value}\n"));
            }
            ToolOutcome::success(text)
        }
        None => ToolOutcome::error(format!("No namespace \"{namespace}\"")),
    }
}

fn memory_list(memory: &MemoryStore) -> ToolOutcome {
    let namespaces = memory.list();
    if namespaces.is_empty() {
        return ToolOutcome::success("No memories saved yet.");
    }

    let mut text = String::from("Memory namespaces:\n");
    for (name, priority, count) in namespaces {
        let noun = if count == 1 { "entry" } else { "entries" };
        text.push_str(&format!("- {name} ({}, {count} {noun})\n", priority.as_str()));
    }
    ToolOutcome::success(text)
}

async fn story_detail(args: &Value, archive: &StoryArchive) -> ToolOutcome {
    let Some(id) = args["story_id"].as_str() else {
        return ToolOutcome::error("get_story_detail requires a \"story_id\" argument");
    };
    // An unknown id reads back as "not found" text, which is an answer
    ToolOutcome::success(archive.story_detail(id).await)
}

async fn schedule_add(args: &Value, scheduler: &mut Scheduler) -> ToolOutcome {
    let Some(name) = args["name"].as_str() else {
        return ToolOutcome::error("schedule_add requires a \"name\" argument");
    };
    let Some(cron) = args["cron"].as_str() else {
        return ToolOutcome::error("schedule_add requires a \"cron\" argument");
    };
    let Some(prompt) = args["prompt"].as_str() else {
        return ToolOutcome::error("schedule_add requires a \"prompt\" argument");
    };

    match scheduler.add(name, cron, prompt).await {
        Ok(schedule) => ToolOutcome::success(format!(
            "Scheduled \"{}\" with id {} ({}).",
            schedule.name, schedule.id, schedule.cron
        )),
        Err(e) => ToolOutcome::error(format!("Failed to add schedule: {e}")),
    }
}

fn schedule_list(scheduler: &Scheduler) -> ToolOutcome {
    let schedules = scheduler.list();
    if schedules.is_empty() {
        return ToolOutcome::success("No schedules configured.");
    }

    let mut text = String::from("Schedules:\n");
    for schedule in schedules {
        let state = if schedule.enabled { "enabled" } else { "disabled" };
        text.push_str(&format!(
            "- {}: \"{}\" [{}] {} - {}\n",
            schedule.id, schedule.name, schedule.cron, state, schedule.prompt
        ));
    }
    ToolOutcome::success(text)
}

async fn schedule_delete(args: &Value, scheduler: &mut Scheduler) -> ToolOutcome {
    let Some(id) = args["id"].as_str() else {
        return ToolOutcome::error("schedule_delete requires an \"id\" argument");
    };

    match scheduler.remove(id).await {
        Ok(removed) => ToolOutcome::success(format!("Deleted schedule \"{}\" ({id}).", removed.name)),
        Err(e) => ToolOutcome::error(format!("Failed to delete schedule: {e}")),
    }
}

async fn schedule_toggle(args: &Value, scheduler: &mut Scheduler) -> ToolOutcome {
    let Some(id) = args["id"].as_str() else {
        return ToolOutcome::error("schedule_toggle requires an \"id\" argument");
    };

    match scheduler.toggle(id).await {
        Ok(enabled) => {
            let state = if enabled { "enabled" } else { "disabled" };
            ToolOutcome::success(format!("Schedule {id} is now {state}."))
        }
        Err(e) => ToolOutcome::error(format!("Failed to toggle schedule: {e}")),
    }
}
