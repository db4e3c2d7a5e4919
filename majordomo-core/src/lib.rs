//! Household agent core: an LLM-driven orchestrator over capability servers.
//!
//! This crate provides:
//! - The orchestrator turn loop (blocking and token-streaming)
//! - A tool registry spanning in-process tools and capability servers
//! - Two-tier long-term memory
//! - A story archive with background summarization and keyword recall
//! - Cron-based recurring orders
//!
//! # Quick Start
//!
//! ```ignore
//! use majordomo_core::{Config, Orchestrator};
//! use openai::OpenAi;
//! use tokio::sync::mpsc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = OpenAi::from_env()?;
//!     let (orders_tx, mut orders_rx) = mpsc::channel(16);
//!
//!     let mut agent = Orchestrator::start(client, Config::load().await, orders_tx).await?;
//!
//!     let answer = agent.process_order("Turn on the kitchen lights").await?;
//!     println!("{answer}");
//!
//!     agent.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod builtins;
pub mod capability;
pub mod config;
pub mod cron;
pub mod memory;
pub mod orchestrator;
pub mod persist;
pub mod registry;
pub mod scheduler;

// Primary public API
pub use capability::ToolOutcome;
pub use config::{Config, ServerConfig};
pub use orchestrator::{Orchestrator, OrchestratorError};
pub use scheduler::ScheduledOrder;
