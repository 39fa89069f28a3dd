//! Agent registry: liveness, free/busy hand-out, bans, task placement.
//!
//! One mutex guards the whole registry state; `acquire_free` is the only
//! blocking operation and waits on a `Notify` (the async rendering of a
//! condition variable). Each registered agent gets a watchdog task that
//! retires it when its heartbeat deadline passes.

mod agent;

pub use agent::{AgentInfo, AgentState};

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::TaskError;

use self::agent::AgentSlot;

/// Total attempts `run_task` makes before giving up.
const RUN_TASK_ATTEMPTS: u32 = 3;
/// An agent whose error count exceeds this is retired and banned.
const MAX_AGENT_ERRORS: u32 = 3;

struct RegistryInner {
    agents: HashMap<i64, AgentSlot>,
    /// Ids in hand-out order; stale entries are skipped on pop.
    free_queue: VecDeque<i64>,
    /// Address -> ban expiration. Expired entries are evicted lazily.
    banned: HashMap<String, SystemTime>,
    next_id: i64,
}

pub struct AgentRegistry {
    inner: Mutex<RegistryInner>,
    /// Signalled whenever an agent becomes free.
    free_notify: Notify,
    heartbeat_timeout: Duration,
    ban_duration: Duration,
}

impl AgentRegistry {
    pub fn new(heartbeat_timeout: Duration, ban_duration: Duration) -> Arc<Self> {
        Arc::new(AgentRegistry {
            inner: Mutex::new(RegistryInner {
                agents: HashMap::new(),
                free_queue: VecDeque::new(),
                banned: HashMap::new(),
                next_id: 0,
            }),
            free_notify: Notify::new(),
            heartbeat_timeout,
            ban_duration,
        })
    }

    /// Register an agent: assign a fresh id, place it in Free, start its
    /// heartbeat watchdog. Refused while the agent's address is banned.
    pub fn add(
        self: &Arc<Self>,
        name: &str,
        version: &str,
        address: &str,
        port: u16,
    ) -> Result<AgentInfo, TaskError> {
        let info = {
            let mut inner = self.inner.lock().unwrap();

            if let Some(until) = inner.banned.get(address).copied() {
                if SystemTime::now() < until {
                    let until_unix = until
                        .duration_since(UNIX_EPOCH)
                        .unwrap_or_default()
                        .as_secs() as i64;
                    return Err(TaskError::AgentBanned {
                        address: address.to_string(),
                        until_unix,
                    });
                }
                inner.banned.remove(address);
            }

            let id = inner.next_id;
            inner.next_id += 1;
            let info = AgentInfo {
                id,
                name: name.to_string(),
                version: version.to_string(),
                address: address.to_string(),
                port,
            };
            inner.agents.insert(
                id,
                AgentSlot {
                    info: info.clone(),
                    state: AgentState::Free,
                    error_count: 0,
                    deadline: Instant::now() + self.heartbeat_timeout,
                },
            );
            inner.free_queue.push_back(id);
            info
        };

        self.free_notify.notify_one();
        self.spawn_watchdog(info.id);
        tracing::info!(id = info.id, name, address, port, "agent registered");
        Ok(info)
    }

    /// Reset the agent's heartbeat deadline.
    pub fn heartbeat(&self, id: i64) -> Result<(), TaskError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.agents.get_mut(&id) {
            Some(slot) => {
                slot.deadline = Instant::now() + self.heartbeat_timeout;
                Ok(())
            }
            None => Err(TaskError::AgentNotRegistered { id }),
        }
    }

    /// Lookup across Free and Busy.
    pub fn get_by_id(&self, id: i64) -> Option<AgentInfo> {
        let inner = self.inner.lock().unwrap();
        inner.agents.get(&id).map(|slot| slot.info.clone())
    }

    /// Wait until a Free agent exists, atomically move it to Busy, return it.
    /// Hand-out is FIFO over the free set so no agent is starved.
    pub async fn acquire_free(&self) -> AgentInfo {
        loop {
            let notified = self.free_notify.notified();
            if let Some(info) = self.try_acquire() {
                return info;
            }
            notified.await;
        }
    }

    fn try_acquire(&self) -> Option<AgentInfo> {
        let mut inner = self.inner.lock().unwrap();
        while let Some(id) = inner.free_queue.pop_front() {
            if let Some(slot) = inner.agents.get_mut(&id) {
                if slot.state == AgentState::Free {
                    slot.state = AgentState::Busy;
                    return Some(slot.info.clone());
                }
            }
            // Stale queue entry (agent retired or already busy); skip.
        }
        None
    }

    /// Move Busy -> Free. No-op when the agent was retired mid-task.
    pub fn release(&self, id: i64) {
        let released = {
            let mut guard = self.inner.lock().unwrap();
            let inner = &mut *guard;
            match inner.agents.get_mut(&id) {
                Some(slot) if slot.state == AgentState::Busy => {
                    slot.state = AgentState::Free;
                    inner.free_queue.push_back(id);
                    true
                }
                _ => false,
            }
        };
        if released {
            self.free_notify.notify_one();
        }
    }

    /// Ban the agent's address until `until` and drop it from the registry.
    /// A rejoining process under a new id cannot bypass the ban: the key is
    /// the network address.
    pub fn ban(&self, id: i64, reason: &str, until: SystemTime) {
        let mut inner = self.inner.lock().unwrap();
        let Some(slot) = inner.agents.remove(&id) else {
            tracing::warn!(id, reason, "attempted to ban unknown agent");
            return;
        };
        let address = slot.info.address.clone();
        inner.banned.insert(address.clone(), until);
        tracing::info!(id, %address, reason, "agent banned");
    }

    /// Free + busy agents. Banned agents are excluded by construction.
    pub fn count(&self) -> usize {
        self.inner.lock().unwrap().agents.len()
    }

    /// Busy agents only; used by tests and status reporting.
    pub fn busy_count(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner
            .agents
            .values()
            .filter(|slot| slot.state == AgentState::Busy)
            .count()
    }

    /// Acquire a free agent and run `f` on it, releasing afterwards. Up to 3
    /// total attempts, each on whatever agent the free queue hands out. An
    /// agent that accumulates more than 3 errors is retired and banned for
    /// the configured duration; success decrements its error count.
    pub async fn run_task<F, Fut, T>(self: &Arc<Self>, f: F) -> Result<T, anyhow::Error>
    where
        F: Fn(AgentInfo) -> Fut,
        Fut: Future<Output = Result<T, anyhow::Error>>,
    {
        let mut last_err = None;
        for attempt in 1..=RUN_TASK_ATTEMPTS {
            let agent = self.acquire_free().await;
            let id = agent.id;
            match f(agent).await {
                Ok(value) => {
                    self.record_success(id);
                    self.release(id);
                    tracing::debug!(id, attempt, "task ran on agent");
                    return Ok(value);
                }
                Err(e) => {
                    let errors = self.record_failure(id);
                    if errors > MAX_AGENT_ERRORS {
                        tracing::warn!(id, errors, "agent exceeded error budget, retiring");
                        self.ban(
                            id,
                            "too many errors",
                            SystemTime::now() + self.ban_duration,
                        );
                    } else {
                        self.release(id);
                    }
                    tracing::debug!(id, attempt, error = %e, "task attempt failed");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| {
            TaskError::InternalInvariantViolation("run_task finished without attempts".into())
                .into()
        }))
    }

    fn record_success(&self, id: i64) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(slot) = inner.agents.get_mut(&id) {
            slot.error_count = slot.error_count.saturating_sub(1);
        }
    }

    fn record_failure(&self, id: i64) -> u32 {
        let mut inner = self.inner.lock().unwrap();
        match inner.agents.get_mut(&id) {
            Some(slot) => {
                slot.error_count += 1;
                slot.error_count
            }
            None => 0,
        }
    }

    fn deadline(&self, id: i64) -> Option<Instant> {
        let inner = self.inner.lock().unwrap();
        inner.agents.get(&id).map(|slot| slot.deadline)
    }

    /// One watchdog task per agent: sleeps until the current deadline and
    /// retires the agent if no heartbeat moved it. Exits when the agent is
    /// gone for any reason.
    fn spawn_watchdog(self: &Arc<Self>, id: i64) {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let Some(deadline) = registry.deadline(id) else {
                    return;
                };
                if Instant::now() >= deadline {
                    registry.expire(id, deadline);
                    return;
                }
                tokio::time::sleep_until(deadline).await;
            }
        });
    }

    fn expire(&self, id: i64, observed_deadline: Instant) {
        let mut inner = self.inner.lock().unwrap();
        let Some(slot) = inner.agents.get(&id) else {
            return;
        };
        // A heartbeat may have raced the watchdog; only retire if the
        // deadline we slept on is still current.
        if slot.deadline != observed_deadline {
            return;
        }
        let name = slot.info.name.clone();
        inner.agents.remove(&id);
        tracing::info!(id, name, "agent heartbeat expired, removed");
    }
}
