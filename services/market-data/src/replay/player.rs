//! Replay player state machine
//!
//! ```text
//! Stopped ──play()──► Initializing ──► Initialized ──first worker──► Playing ──all Once tasks done──► Finished
//!    ▲                                                                  │
//!    └───────────── Stopping ◄──stop()── (any state but Stopped) ◄──────┘
//! ```
//!
//! Every worker run belongs to a generation. `stop()` and `play()` bump the
//! generation, so timers or workers left over from a previous run never
//! touch the current one.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::scheduler::{StopRegistry, TaskScheduler};
use super::task::{RepeatMode, Task};
use super::track::{TrackNumber, TrackStore};
use super::worker::{self, PlaybackContext, PlaybackOutcome};
use super::{ContentListener, ListenerSet};
use crate::config::ReplayConfig;
use crate::error::SchedulerError;
use crate::metrics::FabricMetrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlayerState {
    Stopped,
    Initializing,
    Initialized,
    Playing,
    Finished,
    Stopping,
}

struct Worker {
    cancel: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct RunState {
    generation: u64,
    runtime: Option<Handle>,
    task_count: usize,
    workers: HashMap<TrackNumber, Worker>,
    registry: StopRegistry,
    finished: HashSet<TrackNumber>,
}

struct PlayerInner {
    config: ReplayConfig,
    store: Option<Arc<dyn TrackStore>>,
    tasks: Mutex<Vec<Task>>,
    listeners: Arc<ListenerSet>,
    scheduler: TaskScheduler,
    state: watch::Sender<PlayerState>,
    run: Mutex<RunState>,
    metrics: Arc<FabricMetrics>,
}

impl PlayerInner {
    fn run(&self) -> MutexGuard<'_, RunState> {
        self.run.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> PlayerState {
        *self.state.borrow()
    }

    fn transition(&self, to: PlayerState) {
        let from = self.state.send_replace(to);
        if from != to {
            info!(from = ?from, to = ?to, "Player state changed");
        }
    }

    /// Move to `to` only when the current state is `from`.
    fn transition_from(&self, from: PlayerState, to: PlayerState) {
        let changed = self.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        });
        if changed {
            info!(from = ?from, to = ?to, "Player state changed");
        }
    }

    fn schedule_start(self: &Arc<Self>, runtime: &Handle, task: Task, generation: u64) {
        let delay = task.start.delay_from(Utc::now());
        let name = format!("track-{}", task.number());
        let inner = Arc::clone(self);
        self.scheduler.schedule(runtime, &name, delay, move || {
            inner.start_worker(task, generation);
        });
    }

    fn start_worker(self: &Arc<Self>, task: Task, generation: u64) {
        let mut run = self.run();
        if run.generation != generation {
            debug!(track = %task.number(), "Ignoring timer of a previous run");
            return;
        }
        let Some(runtime) = run.runtime.clone() else {
            return;
        };

        let number = task.number();
        let cancel = Arc::new(AtomicBool::new(false));
        let ctx = PlaybackContext {
            task: task.clone(),
            store: self.store.clone(),
            listeners: Arc::clone(&self.listeners),
            metrics: Arc::clone(&self.metrics),
            cancel: Arc::clone(&cancel),
            pacing: self.config.pacing_interval(),
            emit_latency_offset: self.config.emit_latency_offset,
        };

        self.transition_from(PlayerState::Initialized, PlayerState::Playing);
        info!(track = %number, context = %task.track.context, "Starting track");

        let inner = Arc::clone(self);
        let handle = runtime.spawn(async move {
            let outcome = worker::play_track(ctx).await;
            inner.on_track_finished(task, generation, outcome);
        });
        run.workers.insert(number, Worker { cancel, handle });
    }

    fn on_track_finished(self: &Arc<Self>, task: Task, generation: u64, outcome: PlaybackOutcome) {
        self.metrics.record_track_run(outcome.messages);
        let number = task.number();

        let (dependents, runtime, all_done) = {
            let mut run = self.run();
            if run.generation != generation {
                return;
            }
            run.workers.remove(&number);
            if outcome.cancelled {
                return;
            }
            let dependents = run.registry.take(number);
            if task.repeat == RepeatMode::Once {
                run.finished.insert(number);
            }
            let all_done = run.finished.len() == run.task_count;
            (dependents, run.runtime.clone(), all_done)
        };

        if let Some(runtime) = runtime {
            for dependent in dependents {
                debug!(track = %dependent.number(), after = %number, "Predecessor stopped");
                self.schedule_start(&runtime, dependent, generation);
            }
            if task.repeat == RepeatMode::Loop {
                debug!(track = %number, "Restarting looping track");
                self.schedule_start(&runtime, task, generation);
            }
        }

        if all_done {
            self.transition_from(PlayerState::Playing, PlayerState::Finished);
        }
    }
}

/// Order tasks by track number and resolve the track each one waits for.
///
/// A task waits on its explicit `wait_for`, else on the previous track when
/// `chain_tasks` is set. A predecessor that is not scheduled is dropped and
/// the task starts from its own timer. Tracks scheduled twice and waits
/// that loop back on themselves are rejected.
fn plan_starts(
    mut tasks: Vec<Task>,
    chain_tasks: bool,
) -> Result<Vec<(Task, Option<TrackNumber>)>, SchedulerError> {
    tasks.sort_by_key(Task::number);
    if let Some(pair) = tasks.windows(2).find(|pair| pair[0].number() == pair[1].number()) {
        return Err(SchedulerError::DuplicateTrack {
            track: pair[0].number(),
        });
    }
    let known: HashSet<TrackNumber> = tasks.iter().map(Task::number).collect();

    let mut plan = Vec::with_capacity(tasks.len());
    let mut waits: HashMap<TrackNumber, TrackNumber> = HashMap::new();
    let mut previous: Option<TrackNumber> = None;
    for task in tasks {
        let number = task.number();
        let chained = previous.filter(|_| chain_tasks);
        let dependency = match task.wait_for.or(chained) {
            Some(dependency) if known.contains(&dependency) => {
                waits.insert(number, dependency);
                Some(dependency)
            }
            Some(dependency) => {
                warn!(track = %number, wait_for = %dependency, "Unknown predecessor, starting on timer");
                None
            }
            None => None,
        };
        previous = Some(number);
        plan.push((task, dependency));
    }

    // Every track has at most one predecessor, so a walk of more than
    // `waits.len()` steps can only be inside a loop.
    for (task, _) in &plan {
        let start = task.number();
        let mut current = start;
        for _ in 0..waits.len() {
            match waits.get(&current) {
                Some(&next) if next == start => {
                    return Err(SchedulerError::DependencyCycle { track: start });
                }
                Some(&next) => current = next,
                None => break,
            }
        }
    }
    Ok(plan)
}

/// Plays tasks in track-number order into registered content listeners.
pub struct Player {
    inner: Arc<PlayerInner>,
}

impl Player {
    pub fn new(config: ReplayConfig, store: Option<Arc<dyn TrackStore>>) -> Self {
        Self::with_metrics(config, store, Arc::new(FabricMetrics::new()))
    }

    pub fn with_metrics(
        config: ReplayConfig,
        store: Option<Arc<dyn TrackStore>>,
        metrics: Arc<FabricMetrics>,
    ) -> Self {
        let (state, _) = watch::channel(PlayerState::Stopped);
        Self {
            inner: Arc::new(PlayerInner {
                config,
                store,
                tasks: Mutex::new(Vec::new()),
                listeners: Arc::new(ListenerSet::default()),
                scheduler: TaskScheduler::new(),
                state,
                run: Mutex::new(RunState::default()),
                metrics,
            }),
        }
    }

    /// Add a task for the next `play()`.
    pub fn add_task(&self, task: Task) {
        self.inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(task);
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn add_listener(&self, listener: Arc<dyn ContentListener>) {
        self.inner.listeners.add(listener);
    }

    pub fn state(&self) -> PlayerState {
        self.inner.state()
    }

    /// Receiver that observes every state transition.
    pub fn subscribe_state(&self) -> watch::Receiver<PlayerState> {
        self.inner.state.subscribe()
    }

    /// Tracks with a running worker.
    pub fn active_tracks(&self) -> Vec<TrackNumber> {
        let mut tracks: Vec<TrackNumber> = self.inner.run().workers.keys().copied().collect();
        tracks.sort();
        tracks
    }

    pub fn metrics(&self) -> &Arc<FabricMetrics> {
        &self.inner.metrics
    }

    /// Schedule every task and return once the first timers are armed.
    ///
    /// Must be called from within a tokio runtime.
    pub fn play(&self) -> Result<(), SchedulerError> {
        let runtime = Handle::try_current().map_err(|_| SchedulerError::NoRuntime)?;
        let plan = plan_starts(self.tasks(), self.inner.config.chain_tasks)?;

        let mut rejected = None;
        self.inner.state.send_if_modified(|state| match state {
            PlayerState::Stopped | PlayerState::Finished => {
                *state = PlayerState::Initializing;
                true
            }
            other => {
                rejected = Some(*other);
                false
            }
        });
        if let Some(state) = rejected {
            return Err(SchedulerError::InvalidState {
                operation: "play",
                state,
            });
        }
        info!(to = ?PlayerState::Initializing, "Player state changed");

        if self.inner.store.is_none() {
            warn!("No track store configured, every track will play empty");
        }

        let task_count = plan.len();
        let mut timed = Vec::new();
        let generation = {
            let mut run = self.inner.run();
            run.generation += 1;
            run.runtime = Some(runtime.clone());
            run.task_count = task_count;
            run.workers.clear();
            run.registry.clear();
            run.finished.clear();

            for (task, dependency) in plan {
                match dependency {
                    Some(dependency) => {
                        debug!(track = %task.number(), wait_for = %dependency, "Chained task");
                        run.registry.subscribe(dependency, task);
                    }
                    None => timed.push(task),
                }
            }
            run.generation
        };

        self.inner.transition(PlayerState::Initialized);
        if task_count == 0 {
            self.inner.transition(PlayerState::Finished);
            return Ok(());
        }
        for task in timed {
            self.inner.schedule_start(&runtime, task, generation);
        }
        Ok(())
    }

    /// Cancel pending timers, stop every worker and wait for them.
    ///
    /// Each worker is joined for at most the configured join timeout and
    /// aborted if it does not stop in time.
    pub async fn stop(&self) -> Result<(), SchedulerError> {
        let mut rejected = None;
        self.inner.state.send_if_modified(|state| match state {
            PlayerState::Stopped | PlayerState::Stopping => {
                rejected = Some(*state);
                false
            }
            _ => {
                *state = PlayerState::Stopping;
                true
            }
        });
        if let Some(state) = rejected {
            return Err(SchedulerError::InvalidState {
                operation: "stop",
                state,
            });
        }
        info!(to = ?PlayerState::Stopping, "Player state changed");

        self.inner.scheduler.cancel_all();
        let workers: Vec<(TrackNumber, Worker)> = {
            let mut run = self.inner.run();
            run.generation += 1;
            run.registry.clear();
            run.finished.clear();
            run.workers.drain().collect()
        };

        for (_, worker) in &workers {
            worker.cancel.store(true, Ordering::Release);
        }

        let join_timeout = self.inner.config.join_timeout();
        for (track, mut worker) in workers {
            match tokio::time::timeout(join_timeout, &mut worker.handle).await {
                Ok(Ok(())) => debug!(track = %track, "Worker joined"),
                Ok(Err(err)) => warn!(track = %track, error = %err, "Worker ended abnormally"),
                Err(_) => {
                    warn!(track = %track, timeout_ms = join_timeout.as_millis() as u64, "Worker did not stop in time, aborting");
                    worker.handle.abort();
                }
            }
        }

        self.inner.transition(PlayerState::Stopped);
        Ok(())
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.inner.scheduler.cancel_all();
        let mut run = self.inner.run();
        run.generation += 1;
        for worker in run.workers.values() {
            worker.cancel.store(true, Ordering::Release);
        }
    }
}
