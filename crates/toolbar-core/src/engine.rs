//! Dev server sync engine
//!
//! Polls the dev server, merges each snapshot into the state store and
//! applies optimistic override patches.
//!
//! ## Lifecycle
//!
//! ```text
//! Idle -> Connecting -> Polling -> Stopped
//! ```
//!
//! `start` resolves the project (auto-detecting it when none is given),
//! then spawns a poll loop that fetches immediately and again on every
//! interval tick. A failed tick records the error and keeps the stale flags;
//! the next successful tick clears it. Only `stop` ends the loop.
//!
//! ## Generations
//!
//! Every `start`, `switch_project` and `stop` bumps a generation counter.
//! Work captures the generation when it begins and its result is applied
//! only if that generation is still current, checked under the store lock.
//!
//! ## Consistency
//!
//! Overrides use last-write-wins: optimistic patches land immediately and
//! the next poll, which is authoritative, overwrites them.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::Utc;
use futures_util::future::join_all;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::client::{DevServerApi, RemoteStateClient};
use crate::error::{ClearAllError, ClientError, EngineError, WriteError, WriteOp};
use crate::merge::build_enhanced_flags;
use crate::models::{ConnectionStatus, EnhancedFlag, ToolbarSyncState};
use crate::store::SyncStateStore;

/// Default poll interval
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5000);

/// Options for `SyncEngine::start`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    pub base_url: String,
    /// Project to sync; the first project on the server when unset
    pub project_key: Option<String>,
    pub poll_interval: Duration,
}

impl EngineOptions {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            project_key: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_project_key(mut self, project_key: impl Into<String>) -> Self {
        self.project_key = Some(project_key.into());
        self
    }

    /// Set the poll interval (zero falls back to the default)
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = if interval.is_zero() {
            DEFAULT_POLL_INTERVAL
        } else {
            interval
        };
        self
    }
}

/// Internal lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePhase {
    /// Never started, or startup failed
    Idle,
    /// Resolving the project
    Connecting,
    /// Poll loop running
    Polling,
    Stopped,
}

/// Result of a single poll attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Snapshot merged into the store
    Applied,
    /// Fetch failed; error recorded in the store
    Failed,
    /// Another poll was already in flight
    Skipped,
    /// Generation changed while fetching; result dropped
    Discarded,
    /// Engine is not polling
    Inactive,
}

/// Synchronizes a `SyncStateStore` with a dev server
///
/// Cloning yields another handle to the same engine.
pub struct SyncEngine<C: DevServerApi + 'static = RemoteStateClient> {
    inner: Arc<Inner<C>>,
}

impl<C: DevServerApi + 'static> Clone for SyncEngine<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct Inner<C> {
    client: C,
    store: SyncStateStore,
    generation: AtomicU64,
    /// Bumped with every applied snapshot, under the store lock
    sync_epoch: AtomicU64,
    control: Mutex<Control>,
}

struct Control {
    phase: EnginePhase,
    options: Option<EngineOptions>,
    runtime: Option<Handle>,
    session: Option<Arc<Session>>,
    task: Option<JoinHandle<()>>,
}

/// Per-generation poll state
struct Session {
    generation: u64,
    in_flight: AtomicBool,
}

/// Skip-on-overlap gate, released on drop
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<C: DevServerApi + 'static> SyncEngine<C> {
    /// Create an engine with its own store
    pub fn new(client: C) -> Self {
        Self::with_store(client, SyncStateStore::new())
    }

    /// Create an engine writing to an existing store
    ///
    /// Only one engine should write to a given store.
    pub fn with_store(client: C, store: SyncStateStore) -> Self {
        Self {
            inner: Arc::new(Inner {
                client,
                store,
                generation: AtomicU64::new(0),
                sync_epoch: AtomicU64::new(0),
                control: Mutex::new(Control {
                    phase: EnginePhase::Idle,
                    options: None,
                    runtime: None,
                    session: None,
                    task: None,
                }),
            }),
        }
    }

    /// Read-only handle to the state store
    pub fn store(&self) -> SyncStateStore {
        self.inner.store.clone()
    }

    pub fn client(&self) -> &C {
        &self.inner.client
    }

    pub fn phase(&self) -> EnginePhase {
        lock(&self.inner.control).phase
    }

    /// Start syncing
    ///
    /// Resets the state, resolves the project and starts the poll loop.
    /// Without a project key the first project listed by the server is used;
    /// if there is none, or listing fails, the state moves to `error` and the
    /// error is returned.
    pub async fn start(&self, options: EngineOptions) -> Result<(), EngineError> {
        let options = options.clone().with_poll_interval(options.poll_interval);
        let generation = self.inner.begin_generation();
        {
            let mut control = lock(&self.inner.control);
            control.phase = EnginePhase::Connecting;
            control.options = Some(options.clone());
            control.runtime = Some(Handle::current());
        }

        info!("Starting dev server sync against {}", options.base_url);
        self.inner
            .client
            .configure(&options.base_url, options.project_key.as_deref());
        self.inner.store.update(|state| {
            *state = ToolbarSyncState {
                is_loading: true,
                current_project_key: options.project_key.clone(),
                ..Default::default()
            };
        });

        let listed = self.inner.client.list_projects().await;
        if !self.inner.is_current(generation) {
            debug!("Startup superseded while listing projects");
            return Ok(());
        }

        let (project_key, projects) = match (options.project_key.clone(), listed) {
            (Some(key), Ok(projects)) => (key, projects),
            (Some(key), Err(err)) => {
                warn!("Could not list dev server projects: {}", err);
                (key.clone(), vec![key])
            }
            (None, Ok(projects)) => match projects.first() {
                Some(first) => {
                    info!("Auto-selected dev server project '{}'", first);
                    (first.clone(), projects)
                }
                None => return Err(self.fail_start(generation, EngineError::NoProjectsAvailable)),
            },
            (None, Err(err)) => {
                return Err(self.fail_start(generation, EngineError::ProjectDetection(err)))
            }
        };

        self.inner.client.set_project_key(Some(&project_key));
        self.inner.store.update_if(|state| {
            if !self.inner.is_current(generation) {
                return false;
            }
            state.current_project_key = Some(project_key.clone());
            state.available_projects = projects;
            true
        });

        self.inner.spawn_polling(generation, options.poll_interval);
        Ok(())
    }

    fn fail_start(&self, generation: u64, error: EngineError) -> EngineError {
        warn!("Dev server sync failed to start: {}", error);
        let message = error.to_string();
        self.inner.store.update_if(|state| {
            if !self.inner.is_current(generation) {
                return false;
            }
            state.connection_status = ConnectionStatus::Error;
            state.error = Some(message);
            state.is_loading = false;
            true
        });
        let mut control = lock(&self.inner.control);
        if self.inner.is_current(generation) {
            control.phase = EnginePhase::Idle;
        }
        error
    }

    /// Stop polling
    ///
    /// Flags stay in the store; the status becomes `disconnected`. An
    /// in-flight poll is cancelled and its result discarded.
    pub fn stop(&self) {
        self.inner.begin_generation();
        lock(&self.inner.control).phase = EnginePhase::Stopped;
        self.inner.store.update(|state| {
            state.connection_status = ConnectionStatus::Disconnected;
            state.is_loading = false;
        });
        info!("Stopped dev server sync");
    }

    /// Stop polling and tear down the store
    pub fn shutdown(self) {
        self.stop();
        self.inner.store.destroy();
    }

    /// Poll immediately, outside the timer
    ///
    /// Never fails; errors end up in the store like any other poll.
    pub async fn refresh(&self) -> PollOutcome {
        let session = lock(&self.inner.control).session.clone();
        match session {
            Some(session) => self.inner.poll(&session).await,
            None => PollOutcome::Inactive,
        }
    }

    /// Switch to another project
    ///
    /// Cancels the current loop, empties the flags and starts polling the
    /// new project. Results still in flight for the old project are dropped.
    pub fn switch_project(&self, project_key: &str) -> Result<(), EngineError> {
        let interval = {
            let mut control = lock(&self.inner.control);
            let options = control.options.as_mut().ok_or(EngineError::NotStarted)?;
            options.project_key = Some(project_key.to_string());
            options.poll_interval
        };

        let generation = self.inner.begin_generation();
        lock(&self.inner.control).phase = EnginePhase::Connecting;
        info!("Switching dev server project to '{}'", project_key);

        self.inner.client.set_project_key(Some(project_key));
        self.inner.store.update(|state| {
            state.flags.clear();
            state.connection_status = ConnectionStatus::Disconnected;
            state.error = None;
            state.is_loading = true;
            state.last_sync_time = None;
            state.last_synced_from_source = None;
            state.current_project_key = Some(project_key.to_string());
            if !state.available_projects.iter().any(|p| p == project_key) {
                state.available_projects.push(project_key.to_string());
            }
        });

        self.inner.spawn_polling(generation, interval);
        Ok(())
    }

    /// Override a flag's value
    ///
    /// The store is patched before the request is sent. If the write fails
    /// the patch is reverted (unless a poll replaced it in the meantime) and
    /// the error is returned; the connection status is left alone.
    pub async fn set_override(&self, flag_key: &str, value: Value) -> Result<(), WriteError> {
        let patch = self.inner.patch(flag_key, |flag| flag.apply_override(&value));

        match self.inner.client.set_override(flag_key, &value).await {
            Ok(response) => {
                debug!("Override set for '{}'", flag_key);
                self.inner.confirm(patch.generation, flag_key, |flag| {
                    if response.is_override {
                        flag.apply_override(&response.value);
                    } else {
                        flag.revert_override();
                    }
                });
                Ok(())
            }
            Err(source) => {
                warn!("Failed to set override for '{}': {}", flag_key, source);
                self.inner.rollback(patch);
                Err(WriteError::new(flag_key, WriteOp::Set, source))
            }
        }
    }

    /// Remove a flag's override
    ///
    /// A flag known to have no override is left alone without a request.
    pub async fn clear_override(&self, flag_key: &str) -> Result<(), WriteError> {
        let known_clean = self
            .inner
            .store
            .get_state()
            .flags
            .get(flag_key)
            .is_some_and(|flag| !flag.is_overridden);
        if known_clean {
            debug!("No override on '{}', nothing to clear", flag_key);
            return Ok(());
        }

        let patch = self.inner.patch(flag_key, EnhancedFlag::revert_override);

        let outcome = match self.inner.client.clear_override(flag_key).await {
            Ok(()) => {
                debug!("Override cleared for '{}'", flag_key);
                Ok(())
            }
            Err(err) if err.is_not_found() => {
                debug!("Override for '{}' was already gone", flag_key);
                Ok(())
            }
            Err(source) => Err(source),
        };

        match outcome {
            Ok(()) => {
                // A poll may have restored the override while the request ran
                self.inner
                    .confirm(patch.generation, flag_key, EnhancedFlag::revert_override);
                Ok(())
            }
            Err(source) => {
                warn!("Failed to clear override for '{}': {}", flag_key, source);
                self.inner.rollback(patch);
                Err(WriteError::new(flag_key, WriteOp::Clear, source))
            }
        }
    }

    /// Clear every override currently shown in the store
    ///
    /// All keys are attempted even when some fail. Returns the cleared keys,
    /// or an aggregate error naming the keys that failed.
    pub async fn clear_all_overrides(&self) -> Result<Vec<String>, ClearAllError> {
        let keys = self.inner.store.get_state().overridden_keys();
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        info!("Clearing {} override(s)", keys.len());

        let results = join_all(keys.iter().map(|key| self.clear_override(key))).await;

        let mut cleared = Vec::new();
        let mut failures = Vec::new();
        for (key, result) in keys.into_iter().zip(results) {
            match result {
                Ok(()) => cleared.push(key),
                Err(err) => failures.push(err),
            }
        }

        if failures.is_empty() {
            Ok(cleared)
        } else {
            Err(ClearAllError { cleared, failures })
        }
    }
}

/// Record of an optimistic patch, used to roll it back
struct Patch {
    generation: u64,
    epoch: u64,
    key: String,
    previous: Option<EnhancedFlag>,
    patched: Option<EnhancedFlag>,
}

impl<C: DevServerApi + 'static> Inner<C> {
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Cancel the running loop and open a new generation
    fn begin_generation(&self) -> u64 {
        let mut control = lock(&self.control);
        if let Some(task) = control.task.take() {
            task.abort();
        }
        control.session = None;
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn spawn_polling(self: &Arc<Self>, generation: u64, interval: Duration) {
        let mut control = lock(&self.control);
        if !self.is_current(generation) {
            return;
        }
        let runtime = control.runtime.clone().unwrap_or_else(Handle::current);

        let session = Arc::new(Session {
            generation,
            in_flight: AtomicBool::new(false),
        });
        control.session = Some(session.clone());
        control.phase = EnginePhase::Polling;
        control.task = Some(runtime.spawn(poll_loop(Arc::downgrade(self), session, interval)));

        debug!(
            "Polling every {:?} (generation {})",
            interval, generation
        );
    }

    async fn poll(&self, session: &Session) -> PollOutcome {
        let Some(_gate) = InFlight::acquire(&session.in_flight) else {
            debug!("Poll already in flight, skipping");
            return PollOutcome::Skipped;
        };
        let generation = session.generation;

        match self.client.fetch_project_snapshot().await {
            Ok(snapshot) => {
                let flags = build_enhanced_flags(&snapshot);
                let mut regressions = Vec::new();

                let applied = self.store.update_if(|state| {
                    if !self.is_current(generation) {
                        return false;
                    }
                    regressions = version_regressions(&state.flags, &flags);
                    state.flags = flags;
                    state.connection_status = ConnectionStatus::Connected;
                    state.error = None;
                    state.last_sync_time = Some(Utc::now());
                    state.last_synced_from_source = Some(snapshot.last_synced_from_source);
                    state.is_loading = false;
                    self.sync_epoch.fetch_add(1, Ordering::SeqCst);
                    true
                });

                if !applied {
                    debug!("Discarding snapshot from superseded generation {}", generation);
                    return PollOutcome::Discarded;
                }
                for (key, previous, next) in regressions {
                    warn!(
                        "Flag '{}' version went backwards ({} -> {})",
                        key, previous, next
                    );
                }
                PollOutcome::Applied
            }
            Err(err) => {
                let message = poll_error_message(&err);
                let recorded = self.store.update_if(|state| {
                    if !self.is_current(generation) {
                        return false;
                    }
                    state.connection_status = ConnectionStatus::Error;
                    state.error = Some(message);
                    state.is_loading = false;
                    true
                });

                if recorded {
                    warn!("Dev server poll failed: {}", err);
                    PollOutcome::Failed
                } else {
                    PollOutcome::Discarded
                }
            }
        }
    }

    /// Apply an optimistic change to one flag
    fn patch<F>(&self, key: &str, change: F) -> Patch
    where
        F: FnOnce(&mut EnhancedFlag),
    {
        let generation = self.generation.load(Ordering::SeqCst);
        let mut previous = None;
        let mut patched = None;

        self.store.update_if(|state| {
            if !self.is_current(generation) {
                return false;
            }
            let Some(flag) = state.flags.get_mut(key) else {
                return false;
            };
            previous = Some(flag.clone());
            change(flag);
            patched = Some(flag.clone());
            true
        });

        Patch {
            generation,
            epoch: self.sync_epoch.load(Ordering::SeqCst),
            key: key.to_string(),
            previous,
            patched,
        }
    }

    /// Re-apply a confirmed write to whatever the store holds now
    fn confirm<F>(&self, generation: u64, key: &str, change: F)
    where
        F: FnOnce(&mut EnhancedFlag),
    {
        self.store.update_if(|state| {
            if !self.is_current(generation) {
                return false;
            }
            let Some(flag) = state.flags.get_mut(key) else {
                return false;
            };
            let before = flag.clone();
            change(flag);
            *flag != before
        });
    }

    /// Undo a patch unless something newer has replaced it
    fn rollback(&self, patch: Patch) {
        let (Some(previous), Some(patched)) = (patch.previous, patch.patched) else {
            return;
        };

        self.store.update_if(|state| {
            if !self.is_current(patch.generation)
                || self.sync_epoch.load(Ordering::SeqCst) != patch.epoch
            {
                return false;
            }
            match state.flags.get_mut(&patch.key) {
                Some(flag) if *flag == patched => {
                    *flag = previous;
                    true
                }
                _ => false,
            }
        });
    }
}

impl<C> Drop for Inner<C> {
    fn drop(&mut self) {
        let control = self.control.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = control.task.take() {
            task.abort();
        }
    }
}

/// Poll immediately, then on every tick until cancelled
///
/// Polls run inline, so a tick that comes due while a fetch is outstanding
/// is skipped rather than queued.
async fn poll_loop<C: DevServerApi + 'static>(
    engine: Weak<Inner<C>>,
    session: Arc<Session>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        let Some(inner) = engine.upgrade() else {
            break;
        };
        if !inner.is_current(session.generation) {
            break;
        }
        inner.poll(&session).await;
    }
}

fn poll_error_message(err: &ClientError) -> String {
    match err {
        ClientError::Connection { .. } | ClientError::Request { .. } => err.to_string(),
        other => format!("Dev server sync failed: {}", other),
    }
}

/// Flags whose version decreased between two snapshots
fn version_regressions(
    previous: &BTreeMap<String, EnhancedFlag>,
    next: &BTreeMap<String, EnhancedFlag>,
) -> Vec<(String, u64, u64)> {
    next.iter()
        .filter_map(|(key, flag)| {
            let old = previous.get(key)?;
            (flag.version < old.version).then(|| (key.clone(), old.version, flag.version))
        })
        .collect()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
