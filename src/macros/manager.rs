//! Macro registry and execution lifecycle
//!
//! The manager owns registered macros and their running executions. At most
//! one execution per macro id is active: starting a macro that is already
//! running cancels the previous run and waits for it to finish first. A
//! scheduler loop can start enabled macros whose schedule is due.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Datelike, Utc, Weekday};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::{Macro, MacroError, MacroInterpreter};

/// Scheduler tick used by [`MacroManager::new`]
pub const DEFAULT_SCHEDULER_TICK: Duration = Duration::from_millis(1000);

/// Execution history length used by [`MacroManager::new`]
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// When a scheduled macro may run
///
/// Weekdays are evaluated in UTC.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MacroSchedule {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    /// Allowed days, any day when empty
    pub days: Vec<Weekday>,
    /// Minimum time since the last execution
    pub min_interval_ms: Option<u64>,
}

impl MacroSchedule {
    /// Whether the schedule allows a run at `now`
    pub fn is_due(&self, now: DateTime<Utc>, last_executed: Option<DateTime<Utc>>) -> bool {
        if self.start.is_some_and(|start| now < start) {
            return false;
        }
        if self.end.is_some_and(|end| now > end) {
            return false;
        }
        if !self.days.is_empty() && !self.days.contains(&now.weekday()) {
            return false;
        }
        match (self.min_interval_ms, last_executed) {
            (Some(interval), Some(last)) => {
                (now - last).num_milliseconds() >= interval as i64
            }
            _ => true,
        }
    }
}

/// A registered macro
#[derive(Debug, Clone)]
pub struct MacroInfo {
    pub id: String,
    pub name: String,
    pub definition: Arc<Macro>,
    pub enabled: bool,
    pub priority: i32,
    /// `-1` for unlimited
    pub max_executions: i64,
    /// Shared between clones
    execution_count: Arc<AtomicU64>,
    pub last_executed: Option<DateTime<Utc>>,
    pub tags: BTreeSet<String>,
    pub schedule: Option<MacroSchedule>,
}

impl MacroInfo {
    pub fn new(id: impl Into<String>, definition: Macro) -> Self {
        Self {
            id: id.into(),
            name: definition.name.clone(),
            definition: Arc::new(definition),
            enabled: true,
            priority: 0,
            max_executions: -1,
            execution_count: Arc::new(AtomicU64::new(0)),
            last_executed: None,
            tags: BTreeSet::new(),
            schedule: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_executions(mut self, max: i64) -> Self {
        self.max_executions = max;
        self
    }

    pub fn with_schedule(mut self, schedule: MacroSchedule) -> Self {
        self.schedule = Some(schedule);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Completed executions
    pub fn execution_count(&self) -> u64 {
        self.execution_count.load(Ordering::Acquire)
    }

    pub fn limit_reached(&self) -> bool {
        self.max_executions > 0 && self.execution_count() >= self.max_executions as u64
    }
}

/// Outcome of one execution
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionResult {
    pub macro_id: String,
    pub success: bool,
    pub error: Option<String>,
    /// Zero for failed runs
    pub execution_ms: u64,
    pub finished_at: DateTime<Utc>,
}

struct ActiveRun {
    token: CancellationToken,
    handle: JoinHandle<ExecutionResult>,
}

struct Inner {
    interpreter: Arc<MacroInterpreter>,
    registry: RwLock<HashMap<String, MacroInfo>>,
    active: tokio::sync::Mutex<HashMap<String, ActiveRun>>,
    history: Mutex<VecDeque<ExecutionResult>>,
    history_limit: usize,
    tick: Duration,
    shutdown: CancellationToken,
    scheduler: Mutex<Option<JoinHandle<()>>>,
}

/// Registry of macros and their running executions
#[derive(Clone)]
pub struct MacroManager {
    inner: Arc<Inner>,
}

impl MacroManager {
    pub fn new(interpreter: Arc<MacroInterpreter>) -> Self {
        Self::with_config(interpreter, DEFAULT_SCHEDULER_TICK, DEFAULT_HISTORY_LIMIT)
    }

    pub fn with_config(interpreter: Arc<MacroInterpreter>, tick: Duration, history_limit: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                interpreter,
                registry: RwLock::new(HashMap::new()),
                active: tokio::sync::Mutex::new(HashMap::new()),
                history: Mutex::new(VecDeque::new()),
                history_limit: history_limit.max(1),
                tick,
                shutdown: CancellationToken::new(),
                scheduler: Mutex::new(None),
            }),
        }
    }

    /// Register or replace a macro
    pub fn add(&self, info: MacroInfo) {
        debug!("Registered macro '{}' ({})", info.name, info.id);
        self.inner.write().insert(info.id.clone(), info);
    }

    /// Stop any execution of `id` and unregister it
    pub async fn remove(&self, id: &str) -> Option<MacroInfo> {
        // Unregister under the active-table lock so no start can slip in between
        let (info, run) = {
            let mut active = self.inner.active.lock().await;
            let info = self.inner.write().remove(id);
            (info, active.remove(id))
        };
        if let Some(run) = run {
            run.token.cancel();
            let _ = run.handle.await;
            info!("Stopped macro '{}'", id);
        }
        info
    }

    /// Modify a registered macro in place
    pub fn update(&self, id: &str, f: impl FnOnce(&mut MacroInfo)) -> bool {
        match self.inner.write().get_mut(id) {
            Some(info) => {
                f(info);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &str) -> Option<MacroInfo> {
        self.inner.read().get(id).cloned()
    }

    pub fn by_tag(&self, tag: &str) -> Vec<MacroInfo> {
        let mut found: Vec<MacroInfo> = self
            .inner
            .read()
            .values()
            .filter(|info| info.tags.contains(tag))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        found
    }

    /// Macros with at least `min_priority`, highest first
    pub fn by_priority(&self, min_priority: i32) -> Vec<MacroInfo> {
        let mut found: Vec<MacroInfo> = self
            .inner
            .read()
            .values()
            .filter(|info| info.priority >= min_priority)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));
        found
    }

    /// Start executing `id`, replacing a running execution of it
    pub async fn execute_macro(&self, id: &str) -> Result<(), MacroError> {
        // Registration is read under the active-table lock, which `remove` also holds
        let mut active = self.inner.active.lock().await;
        let info = self
            .get(id)
            .ok_or_else(|| MacroError::NotFound(id.to_string()))?;
        if info.limit_reached() {
            info!("Macro '{}' reached its limit of {} executions", id, info.max_executions);
            return Err(MacroError::LimitReached(id.to_string()));
        }

        if let Some(previous) = active.remove(id) {
            info!("Restarting macro '{}'", id);
            previous.token.cancel();
            let _ = previous.handle.await;
        }

        let token = self.inner.shutdown.child_token();
        let inner = self.inner.clone();
        let run_token = token.clone();
        let handle = tokio::spawn(async move { inner.run(info, run_token).await });

        info!("Started macro '{}'", id);
        active.insert(id.to_string(), ActiveRun { token, handle });
        Ok(())
    }

    /// Wait for the current execution of `id` to finish
    ///
    /// Returns `None` when the macro is not running.
    pub async fn wait(&self, id: &str) -> Option<Result<ExecutionResult, MacroError>> {
        let run = self.inner.active.lock().await.remove(id)?;
        Some(
            run.handle
                .await
                .map_err(|e| MacroError::TaskFailed(e.to_string())),
        )
    }

    /// Cancel `id` and wait for it to stop, returning whether it was running
    pub async fn stop(&self, id: &str) -> bool {
        let Some(run) = self.inner.active.lock().await.remove(id) else {
            return false;
        };
        let was_running = !run.handle.is_finished();
        run.token.cancel();
        let _ = run.handle.await;
        if was_running {
            info!("Stopped macro '{}'", id);
        }
        was_running
    }

    pub async fn stop_all(&self) {
        let runs: Vec<(String, ActiveRun)> = self.inner.active.lock().await.drain().collect();
        for (_, run) in &runs {
            run.token.cancel();
        }
        for (id, run) in runs {
            let _ = run.handle.await;
            debug!("Stopped macro '{}'", id);
        }
    }

    pub async fn is_running(&self, id: &str) -> bool {
        self.inner
            .active
            .lock()
            .await
            .get(id)
            .is_some_and(|run| !run.handle.is_finished())
    }

    /// Ids of running macros, sorted
    pub async fn running(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .inner
            .active
            .lock()
            .await
            .iter()
            .filter(|(_, run)| !run.handle.is_finished())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Execution results, newest first
    pub fn history(&self) -> Vec<ExecutionResult> {
        self.inner.history().iter().cloned().collect()
    }

    pub fn clear_history(&self) {
        self.inner.history().clear();
    }

    /// Attach a schedule to `id` and make sure the scheduler is running
    pub fn schedule(&self, id: &str, schedule: MacroSchedule) -> bool {
        let updated = self.update(id, |info| info.schedule = Some(schedule));
        if updated {
            self.start_scheduler();
        }
        updated
    }

    /// Start the scheduler loop if it is not running yet
    pub fn start_scheduler(&self) {
        let mut scheduler = self
            .inner
            .scheduler
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if scheduler.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        let manager = self.clone();
        *scheduler = Some(tokio::spawn(async move { manager.scheduler_loop().await }));
    }

    /// Stop the scheduler and every running macro
    pub async fn shutdown(&self) {
        info!("Shutting down macro manager");
        self.inner.shutdown.cancel();
        let scheduler = self
            .inner
            .scheduler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = scheduler {
            let _ = handle.await;
        }
        self.stop_all().await;
    }

    async fn scheduler_loop(&self) {
        let mut ticker = tokio::time::interval(self.inner.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.inner.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let now = Utc::now();
            let due: Vec<String> = self
                .inner
                .read()
                .values()
                .filter(|info| info.enabled && !info.limit_reached())
                .filter(|info| {
                    info.schedule
                        .as_ref()
                        .is_some_and(|s| s.is_due(now, info.last_executed))
                })
                .map(|info| info.id.clone())
                .collect();

            for id in due {
                if self.is_running(&id).await {
                    continue;
                }
                debug!("Schedule due for macro '{}'", id);
                if let Err(e) = self.execute_macro(&id).await {
                    warn!("Scheduled start of '{}' failed: {}", id, e);
                }
            }
        }
        debug!("Scheduler stopped");
    }
}

impl Inner {
    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, MacroInfo>> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, MacroInfo>> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn history(&self) -> std::sync::MutexGuard<'_, VecDeque<ExecutionResult>> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn run(&self, info: MacroInfo, token: CancellationToken) -> ExecutionResult {
        let started = Instant::now();
        let outcome = self.interpreter.execute(&info.definition, &token).await;
        let finished_at = Utc::now();

        let result = match outcome {
            Ok(_) => {
                info.execution_count.fetch_add(1, Ordering::AcqRel);
                if let Some(registered) = self.write().get_mut(&info.id) {
                    registered.last_executed = Some(finished_at);
                }
                info!("Macro '{}' completed", info.id);
                ExecutionResult {
                    macro_id: info.id.clone(),
                    success: true,
                    error: None,
                    execution_ms: started.elapsed().as_millis() as u64,
                    finished_at,
                }
            }
            Err(e) => {
                info!("Macro '{}' ended: {}", info.id, e);
                ExecutionResult {
                    macro_id: info.id.clone(),
                    success: false,
                    error: Some(e.to_string()),
                    execution_ms: 0,
                    finished_at,
                }
            }
        };

        let mut history = self.history();
        history.push_front(result.clone());
        history.truncate(self.history_limit);
        result
    }
}
