//! One-shot timers and track-completion subscriptions
//!
//! [`TaskScheduler`] owns every pending start timer of a player so `stop()`
//! can cancel them in one call. [`StopRegistry`] holds tasks waiting for a
//! predecessor track; each subscription fires at most once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::debug;

use super::task::Task;
use super::track::TrackNumber;

/// Handle of a scheduled timer.
pub type TimerId = u64;

/// Cancel-on-stop timer service backed by tokio tasks.
#[derive(Default)]
pub struct TaskScheduler {
    timers: Mutex<HashMap<TimerId, JoinHandle<()>>>,
    next_id: AtomicU64,
}

impl TaskScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `callback` on `runtime` once `delay` has elapsed.
    pub fn schedule<F>(&self, runtime: &Handle, name: &str, delay: Duration, callback: F) -> TimerId
    where
        F: FnOnce() + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            callback();
        });

        let mut timers = self.timers.lock().unwrap_or_else(PoisonError::into_inner);
        timers.retain(|_, timer| !timer.is_finished());
        timers.insert(id, handle);
        debug!(timer = name, id, delay_ms = delay.as_millis() as u64, "Scheduled timer");
        id
    }

    /// Abort every timer that has not fired yet.
    pub fn cancel_all(&self) -> usize {
        let mut timers = self.timers.lock().unwrap_or_else(PoisonError::into_inner);
        let mut cancelled = 0;
        for (_, timer) in timers.drain() {
            if !timer.is_finished() {
                timer.abort();
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            debug!(cancelled, "Cancelled pending timers");
        }
        cancelled
    }

    /// Timers scheduled and not yet fired.
    pub fn pending(&self) -> usize {
        self.timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|timer| !timer.is_finished())
            .count()
    }
}

/// Tasks waiting for a track to stop, keyed by that track.
#[derive(Debug, Default)]
pub struct StopRegistry {
    waiting: HashMap<TrackNumber, Vec<Task>>,
}

impl StopRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start `task` once `track` reports `StopPlaying`.
    pub fn subscribe(&mut self, track: TrackNumber, task: Task) {
        self.waiting.entry(track).or_default().push(task);
    }

    /// Remove and return the tasks waiting on `track`.
    pub fn take(&mut self, track: TrackNumber) -> Vec<Task> {
        self.waiting.remove(&track).unwrap_or_default()
    }

    pub fn is_waiting(&self, track: TrackNumber) -> bool {
        self.waiting.contains_key(&track)
    }

    pub fn len(&self) -> usize {
        self.waiting.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty()
    }

    pub fn clear(&mut self) {
        self.waiting.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replay::track::Track;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn task(n: u32) -> Task {
        Task::new(Track::new(TrackNumber::new(n), "ctx", Vec::new()))
    }

    #[test]
    fn test_registry_is_one_shot() {
        let mut registry = StopRegistry::new();
        registry.subscribe(TrackNumber::new(1), task(2));
        registry.subscribe(TrackNumber::new(1), task(3));
        assert_eq!(registry.len(), 2);
        assert!(registry.is_waiting(TrackNumber::new(1)));

        let started = registry.take(TrackNumber::new(1));
        assert_eq!(started.len(), 2);
        assert!(registry.take(TrackNumber::new(1)).is_empty());
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_after_delay() {
        let scheduler = TaskScheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);

        scheduler.schedule(&Handle::current(), "t", Duration::from_millis(100), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(scheduler.pending(), 1);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all_prevents_firing() {
        let scheduler = TaskScheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let counter = Arc::clone(&fired);
            scheduler.schedule(&Handle::current(), "t", Duration::from_secs(1), move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        assert_eq!(scheduler.cancel_all(), 3);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.pending(), 0);
    }
}
