//! Two-tier long-term memory, persisted as a single JSON file.
//!
//! Memory is organized into named namespaces of key/value entries. A
//! namespace is either `always` (its full contents are folded into every
//! system prompt) or `on-demand` (only its name and entry count appear; the
//! model reads it explicitly via the `memory_read` tool).

use crate::persist::{self, PersistError};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Reserved key storing the namespace tier inside the persisted file.
const PRIORITY_KEY: &str = "_priority";

/// Prompt tier of a namespace, fixed when the namespace is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Always,
    OnDemand,
}

impl Priority {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "always" => Some(Self::Always),
            "on-demand" => Some(Self::OnDemand),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Always => "always",
            Self::OnDemand => "on-demand",
        }
    }
}

/// A named group of memory entries sharing one prompt tier.
#[derive(Debug, Clone, PartialEq)]
pub struct Namespace {
    pub priority: Priority,
    pub entries: BTreeMap<String, String>,
}

/// Memory sections ready for prompt assembly.
#[derive(Debug, Clone, Default)]
pub struct MemoryContext {
    /// Full contents of every always-tier namespace, formatted as markdown.
    pub always: String,

    /// Name and entry count of every on-demand namespace.
    pub on_demand: Vec<(String, usize)>,
}

/// On-disk layout: namespace name to a flat map holding `_priority` plus the
/// entries themselves.
type FileMap = BTreeMap<String, BTreeMap<String, String>>;

/// The agent's long-term memory store.
#[derive(Debug)]
pub struct MemoryStore {
    namespaces: BTreeMap<String, Namespace>,
    path: PathBuf,
}

impl MemoryStore {
    /// Open the store backed by the given file. A missing or unreadable file
    /// starts the store empty.
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let file_map: FileMap = persist::load_json_or_default(&path).await;
        Self {
            namespaces: from_file_map(file_map),
            path,
        }
    }

    /// Store a value. The namespace is created on first write with the given
    /// tier; writes to an existing namespace keep its original tier.
    pub async fn set(
        &mut self,
        namespace: &str,
        key: &str,
        value: &str,
        priority: Priority,
    ) -> Result<(), PersistError> {
        self.namespaces
            .entry(namespace.to_string())
            .or_insert_with(|| Namespace {
                priority,
                entries: BTreeMap::new(),
            })
            .entries
            .insert(key.to_string(), value.to_string());
        self.save().await
    }

    /// Delete an entry. Returns whether it existed. A namespace vanishes with
    /// its last entry.
    pub async fn remove(&mut self, namespace: &str, key: &str) -> Result<bool, PersistError> {
        let Some(ns) = self.namespaces.get_mut(namespace) else {
            return Ok(false);
        };
        let existed = ns.entries.remove(key).is_some();
        if existed {
            if ns.entries.is_empty() {
                self.namespaces.remove(namespace);
            }
            self.save().await?;
        }
        Ok(existed)
    }

    /// Read one namespace.
    pub fn namespace(&self, name: &str) -> Option<&Namespace> {
        self.namespaces.get(name)
    }

    /// All namespaces as (name, tier, entry count).
    pub fn list(&self) -> Vec<(&str, Priority, usize)> {
        self.namespaces
            .iter()
            .map(|(name, ns)| (name.as_str(), ns.priority, ns.entries.len()))
            .collect()
    }

    /// Build the memory sections of the system prompt.
    pub fn prompt_context(&self) -> MemoryContext {
        let mut context = MemoryContext::default();

        for (name, ns) in &self.namespaces {
            match ns.priority {
                Priority::Always => {
                    context.always.push_str(&format!("## {name}\n"));
                    for (key, value) in &ns.entries {
                        context.always.push_str(&format!("- {key}: {value}\n"));
                    }
                    context.always.push('\n');
                }
                Priority::OnDemand => {
                    context.on_demand.push((name.clone(), ns.entries.len()));
                }
            }
        }

        context
    }

    async fn save(&self) -> Result<(), PersistError> {
        persist::save_json(&self.path, &to_file_map(&self.namespaces)).await
    }
}

fn to_file_map(namespaces: &BTreeMap<String, Namespace>) -> FileMap {
    namespaces
        .iter()
        .map(|(name, ns)| {
            let mut flat = BTreeMap::new();
            flat.insert(PRIORITY_KEY.to_string(), ns.priority.as_str().to_string());
            for (key, value) in &ns.entries {
                flat.insert(key.clone(), value.clone());
            }
            (name.clone(), flat)
        })
        .collect()
}

fn from_file_map(map: FileMap) -> BTreeMap<String, Namespace> {
    map.into_iter()
        .map(|(name, mut flat)| {
            let priority = flat
                .remove(PRIORITY_KEY)
                .and_then(|s| Priority::parse(&s))
                .unwrap_or(Priority::Always);
            (
                name,
                Namespace {
                    priority,
                    entries: flat,
                },
            )
        })
        .collect()
}
