use std::collections::VecDeque;
use std::panic;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, warn};
use thiserror::Error;

use crate::observability;

pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(2);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobsMode {
    Threaded,
    Inline,
}

#[derive(Clone, Copy, Debug)]
pub struct JobsConfig {
    pub mode: JobsMode,
    pub max_workers: usize,
    pub keep_alive: Duration,
}

impl JobsConfig {
    pub fn threaded(max_workers: usize, keep_alive: Duration) -> Self {
        Self {
            mode: JobsMode::Threaded,
            max_workers: max_workers.max(1),
            keep_alive,
        }
    }

    pub fn inline() -> Self {
        Self {
            mode: JobsMode::Inline,
            max_workers: 0,
            keep_alive: Duration::ZERO,
        }
    }

    /// One less than the available parallelism, never below one.
    pub fn default_worker_count() -> usize {
        thread::available_parallelism()
            .map(|count| count.get())
            .unwrap_or(1)
            .saturating_sub(1)
            .max(1)
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self::threaded(Self::default_worker_count(), DEFAULT_KEEP_ALIVE)
    }
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("job queue closed")]
    QueueClosed,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct JobsTelemetry {
    pub queue_depth: usize,
    pub live_workers: usize,
    pub idle_workers: usize,
    pub active_workers: usize,
}

#[derive(Clone)]
pub struct JobHandle {
    cancelled: Arc<AtomicBool>,
}

impl JobHandle {
    /// A job cancelled before a worker picks it up never runs and never
    /// reports completion. A running job is not interrupted.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

type JobRunner = Box<dyn FnOnce() + Send + 'static>;

struct Job {
    run: JobRunner,
    cancelled: Arc<AtomicBool>,
}

/// Elastic worker pool over one unbounded FIFO queue. Workers are spawned on
/// demand up to `max_workers` and retire after `keep_alive` without work.
pub struct Jobs {
    inner: Arc<JobsInner>,
}

struct JobsInner {
    mode: JobsMode,
    max_workers: usize,
    keep_alive: Duration,
    queue: Mutex<QueueState>,
    wake: Condvar,
    active: AtomicUsize,
    spawned: AtomicUsize,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

struct QueueState {
    entries: VecDeque<Job>,
    shutdown: bool,
    live: usize,
    idle: usize,
}

impl Jobs {
    pub fn new(config: JobsConfig) -> Self {
        let inner = Arc::new(JobsInner {
            mode: config.mode,
            max_workers: config.max_workers.max(1),
            keep_alive: config.keep_alive,
            queue: Mutex::new(QueueState {
                entries: VecDeque::new(),
                shutdown: false,
                live: 0,
                idle: 0,
            }),
            wake: Condvar::new(),
            active: AtomicUsize::new(0),
            spawned: AtomicUsize::new(0),
            workers: Mutex::new(Vec::new()),
        });
        Self { inner }
    }

    pub fn mode(&self) -> JobsMode {
        self.inner.mode
    }

    pub fn max_workers(&self) -> usize {
        self.inner.max_workers
    }

    /// Queues `job`; `on_complete` receives its result on the thread that ran
    /// it. A panic in either closure is recorded as the last failure and the
    /// worker keeps going. Inline mode runs both before returning.
    pub fn submit<R, F, C>(&self, job: F, on_complete: C) -> Result<JobHandle, JobError>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
        C: FnOnce(R) + Send + 'static,
    {
        let cancel_flag = Arc::new(AtomicBool::new(false));
        let cancel_for_job = Arc::clone(&cancel_flag);
        let run: JobRunner = Box::new(move || {
            if cancel_for_job.load(Ordering::Acquire) {
                return;
            }
            let result = panic::catch_unwind(panic::AssertUnwindSafe(move || on_complete(job())));
            if let Err(payload) = result {
                observability::record_failure(format!(
                    "job panic ({})",
                    observability::panic_message(payload.as_ref())
                ));
            }
        });
        let job = Job {
            run,
            cancelled: Arc::clone(&cancel_flag),
        };
        let handle = JobHandle {
            cancelled: cancel_flag,
        };

        if self.inner.mode == JobsMode::Inline {
            (job.run)();
            return Ok(handle);
        }

        self.enqueue(job)?;
        Ok(handle)
    }

    /// Drops every queued job that has not started. Returns how many.
    pub fn purge(&self) -> usize {
        let drained: Vec<Job> = self.inner.lock_queue().entries.drain(..).collect();
        drained.len()
    }

    pub fn telemetry(&self) -> JobsTelemetry {
        let queue = self.inner.lock_queue();
        JobsTelemetry {
            queue_depth: queue.entries.len(),
            live_workers: queue.live,
            idle_workers: queue.idle,
            active_workers: self.inner.active.load(Ordering::Relaxed),
        }
    }

    fn enqueue(&self, job: Job) -> Result<(), JobError> {
        let spawn = {
            let mut queue = self.inner.lock_queue();
            if queue.shutdown {
                return Err(JobError::QueueClosed);
            }
            queue.entries.push_back(job);
            let spawn = queue.entries.len() > queue.idle && queue.live < self.inner.max_workers;
            if spawn {
                queue.live += 1;
            }
            spawn
        };
        self.inner.wake.notify_one();
        if spawn {
            self.spawn_worker();
        }
        Ok(())
    }

    fn spawn_worker(&self) {
        let index = self.inner.spawned.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::clone(&self.inner);
        let spawned = thread::Builder::new()
            .name(format!("asset-worker-{}", index))
            .spawn(move || worker_loop(&inner));
        match spawned {
            Ok(handle) => {
                debug!("spawned asset-worker-{}", index);
                let mut workers = self.inner.workers.lock().expect("workers lock poisoned");
                workers.retain(|worker| !worker.is_finished());
                workers.push(handle);
            }
            Err(err) => {
                warn!("failed to spawn asset worker: {}", err);
                let orphaned: Vec<Job> = {
                    let mut queue = self.inner.lock_queue();
                    queue.live -= 1;
                    if queue.live == 0 {
                        queue.entries.drain(..).collect()
                    } else {
                        Vec::new()
                    }
                };
                // Without any worker the backlog would never drain.
                for job in orphaned {
                    if !job.cancelled.load(Ordering::Acquire) {
                        (job.run)();
                    }
                }
            }
        }
    }
}

impl JobsInner {
    fn lock_queue(&self) -> MutexGuard<'_, QueueState> {
        self.queue.lock().expect("job queue lock poisoned")
    }

    fn next_job(&self) -> Option<Job> {
        let mut queue = self.lock_queue();
        loop {
            if let Some(job) = queue.entries.pop_front() {
                return Some(job);
            }
            if queue.shutdown {
                queue.live -= 1;
                return None;
            }
            queue.idle += 1;
            let (guard, timeout) = self
                .wake
                .wait_timeout(queue, self.keep_alive)
                .expect("job queue lock poisoned");
            queue = guard;
            queue.idle -= 1;
            if timeout.timed_out() && queue.entries.is_empty() {
                queue.live -= 1;
                return None;
            }
        }
    }
}

impl Drop for Jobs {
    fn drop(&mut self) {
        let abandoned: Vec<Job> = {
            let mut queue = self.inner.lock_queue();
            queue.shutdown = true;
            queue.entries.drain(..).collect()
        };
        self.inner.wake.notify_all();
        drop(abandoned);
        let current = thread::current().id();
        let workers: Vec<JoinHandle<()>> = self
            .inner
            .workers
            .lock()
            .expect("workers lock poisoned")
            .drain(..)
            .collect();
        for handle in workers {
            // The pool can be dropped from one of its own completion hooks.
            if handle.thread().id() != current {
                let _ = handle.join();
            }
        }
    }
}

fn worker_loop(inner: &JobsInner) {
    while let Some(job) = inner.next_job() {
        if job.cancelled.load(Ordering::Acquire) {
            continue;
        }
        inner.active.fetch_add(1, Ordering::Relaxed);
        (job.run)();
        inner.active.fetch_sub(1, Ordering::Relaxed);
    }
    debug!(
        "{} retiring",
        thread::current().name().unwrap_or("asset-worker")
    );
}
