//! Recurring scheduled orders backed by cron timers.
//!
//! Each enabled schedule owns one background timer task that sleeps until
//! the next cron fire time, then sends the stored prompt down the order
//! channel. Mutations persist the list before touching timers, and roll the
//! in-memory change back when the write fails, so timer state never diverges
//! from what is on disk.

use crate::cron::{CronError, CronSchedule};
use crate::persist::{self, PersistError};
use chrono::Local;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Length of generated schedule ids.
const ID_LENGTH: usize = 8;

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("Invalid cron expression: {0}")]
    InvalidCron(#[from] CronError),

    #[error("Failed to persist schedules: {0}")]
    Persist(#[from] PersistError),

    #[error("No schedule with id \"{0}\"")]
    NotFound(String),
}

/// A persisted recurring order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: String,
    pub name: String,
    pub cron: String,
    pub prompt: String,
    pub enabled: bool,
}

/// What a fired timer puts on the order channel.
#[derive(Debug, Clone)]
pub struct ScheduledOrder {
    pub schedule_id: String,
    pub name: String,
    pub prompt: String,
}

/// Owns the schedule list, its persistence, and the live timer tasks.
pub struct Scheduler {
    path: PathBuf,
    schedules: Vec<Schedule>,
    timers: HashMap<String, JoinHandle<()>>,
    orders: mpsc::Sender<ScheduledOrder>,
}

impl Scheduler {
    /// Load persisted schedules and start timers for the enabled ones.
    pub async fn load(path: impl Into<PathBuf>, orders: mpsc::Sender<ScheduledOrder>) -> Self {
        let path = path.into();
        let schedules: Vec<Schedule> = persist::load_json_or_default(&path).await;

        let mut scheduler = Self {
            path,
            schedules,
            timers: HashMap::new(),
            orders,
        };

        let enabled: Vec<Schedule> = scheduler
            .schedules
            .iter()
            .filter(|s| s.enabled)
            .cloned()
            .collect();
        for schedule in &enabled {
            scheduler.start_timer(schedule);
        }

        if !scheduler.schedules.is_empty() {
            info!(
                total = scheduler.schedules.len(),
                enabled = enabled.len(),
                "Loaded schedules"
            );
        }

        scheduler
    }

    /// Create a new enabled schedule. The cron expression is validated before
    /// anything is recorded.
    pub async fn add(
        &mut self,
        name: &str,
        cron: &str,
        prompt: &str,
    ) -> Result<Schedule, ScheduleError> {
        CronSchedule::parse(cron)?;

        let mut id = random_id();
        while self.schedules.iter().any(|s| s.id == id) {
            id = random_id();
        }

        let schedule = Schedule {
            id,
            name: name.to_string(),
            cron: cron.to_string(),
            prompt: prompt.to_string(),
            enabled: true,
        };

        self.schedules.push(schedule.clone());
        if let Err(e) = self.save().await {
            self.schedules.pop();
            return Err(e.into());
        }

        self.start_timer(&schedule);
        info!(id = %schedule.id, name = %schedule.name, cron = %schedule.cron, "Added schedule");
        Ok(schedule)
    }

    /// Delete a schedule and stop its timer.
    pub async fn remove(&mut self, id: &str) -> Result<Schedule, ScheduleError> {
        let index = self
            .schedules
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| ScheduleError::NotFound(id.to_string()))?;

        let removed = self.schedules.remove(index);
        if let Err(e) = self.save().await {
            self.schedules.insert(index, removed);
            return Err(e.into());
        }

        if let Some(timer) = self.timers.remove(id) {
            timer.abort();
        }
        info!(id = %removed.id, name = %removed.name, "Removed schedule");
        Ok(removed)
    }

    /// Flip a schedule's enabled flag. Returns the new state.
    pub async fn toggle(&mut self, id: &str) -> Result<bool, ScheduleError> {
        let index = self
            .schedules
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| ScheduleError::NotFound(id.to_string()))?;

        self.schedules[index].enabled = !self.schedules[index].enabled;
        if let Err(e) = self.save().await {
            self.schedules[index].enabled = !self.schedules[index].enabled;
            return Err(e.into());
        }

        let schedule = self.schedules[index].clone();
        if schedule.enabled {
            self.start_timer(&schedule);
        } else if let Some(timer) = self.timers.remove(id) {
            timer.abort();
        }

        info!(id = %schedule.id, enabled = schedule.enabled, "Toggled schedule");
        Ok(schedule.enabled)
    }

    /// All schedules, in creation order.
    pub fn list(&self) -> &[Schedule] {
        &self.schedules
    }

    /// Abort every live timer.
    pub fn shutdown(&mut self) {
        for (_, timer) in self.timers.drain() {
            timer.abort();
        }
    }

    fn start_timer(&mut self, schedule: &Schedule) {
        let cron = match CronSchedule::parse(&schedule.cron) {
            Ok(cron) => cron,
            Err(e) => {
                // A persisted expression that no longer parses keeps its
                // entry listable and deletable, it just never fires
                warn!(id = %schedule.id, cron = %schedule.cron, error = %e, "Skipping timer for unparseable cron expression");
                return;
            }
        };

        if let Some(previous) = self.timers.remove(&schedule.id) {
            previous.abort();
        }

        let order = ScheduledOrder {
            schedule_id: schedule.id.clone(),
            name: schedule.name.clone(),
            prompt: schedule.prompt.clone(),
        };
        let sender = self.orders.clone();

        let handle = tokio::spawn(async move {
            loop {
                let Some(next) = cron.next_after(Local::now()) else {
                    debug!(id = %order.schedule_id, "No future fire time, stopping timer");
                    return;
                };
                let wait = (next - Local::now()).to_std().unwrap_or_default();
                tokio::time::sleep(wait).await;

                debug!(id = %order.schedule_id, name = %order.name, "Schedule fired");
                if sender.send(order.clone()).await.is_err() {
                    return;
                }
            }
        });

        self.timers.insert(schedule.id.clone(), handle);
    }

    async fn save(&self) -> Result<(), PersistError> {
        persist::save_json(&self.path, &self.schedules).await
    }
}

fn random_id() -> String {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..ID_LENGTH)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}
