// A custom pool rather than rayon for the same reasons the larger clients
// use one: script verification must preempt housekeeping work, and rayon
// only offers coarse `spawn`/`spawn_fifo` ordering. Validation jobs go on
// the high priority queue; deferred delivery and other housekeeping go on
// the low priority queue and will starve while validation saturates the
// workers, which is the intended trade.

use std::{
    collections::VecDeque,
    panic::AssertUnwindSafe,
    sync::Arc,
    thread::Builder,
};

use anyhow::Result;
use log::{debug, error};
use parking_lot::{Condvar, Mutex};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// The dedicated validation pool. Dropping it stops the workers once the
/// queues drain of running jobs.
pub struct ThreadPool {
    shared: Arc<Shared>,
    workers: usize,
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shared.critical.lock().done = true;
        self.shared.condvar.notify_all();
    }
}

#[derive(Default)]
struct Shared {
    critical: Mutex<Critical>,
    condvar: Condvar,
}

// `done` and the queues must live inside the `Mutex` to avoid races between
// shutdown and a worker deciding to sleep.
#[derive(Default)]
struct Critical {
    done: bool,
    high_priority_jobs: VecDeque<Job>,
    low_priority_jobs: VecDeque<Job>,
}

impl ThreadPool {
    pub fn new(workers: usize) -> Result<Self> {
        let shared = Arc::new(Shared::default());

        for index in 0..workers {
            let shared = shared.clone();

            Builder::new()
                .name(format!("priority-worker-{index}"))
                .spawn(move || run_worker(&shared))?;
        }

        Ok(Self { shared, workers })
    }

    #[must_use]
    pub const fn workers(&self) -> usize {
        self.workers
    }

    /// Submits a validation job.
    pub fn spawn_validation(&self, job: impl FnOnce() + Send + 'static) {
        self.shared
            .critical
            .lock()
            .high_priority_jobs
            .push_back(Box::new(job));
        self.shared.condvar.notify_one();
    }

    /// Submits housekeeping that may wait behind validation.
    pub fn spawn_deferred(&self, job: impl FnOnce() + Send + 'static) {
        self.shared
            .critical
            .lock()
            .low_priority_jobs
            .push_back(Box::new(job));
        self.shared.condvar.notify_one();
    }

    #[must_use]
    pub fn job_counts(&self) -> (usize, usize) {
        let critical = self.shared.critical.lock();
        let high = critical.high_priority_jobs.len();
        let low = critical.low_priority_jobs.len();
        (high, low)
    }
}

fn run_worker(shared: &Shared) {
    debug!("thread {} starting", thread_name());

    'outer: loop {
        let mut critical = shared.critical.lock();

        loop {
            if critical.done {
                break 'outer;
            }

            if let Some(job) = critical.high_priority_jobs.pop_front() {
                drop(critical);
                run_job(job);
                continue 'outer;
            }

            if let Some(job) = critical.low_priority_jobs.pop_front() {
                drop(critical);
                run_job(job);
                continue 'outer;
            }

            shared.condvar.wait(&mut critical);
        }
    }

    debug!("thread {} stopping", thread_name());
}

fn run_job(job: Job) {
    // Jobs report their results over channels, so a panicking job is only
    // lost work; the worker must survive it.
    if std::panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
        error!("thread {} lost a panicking job", thread_name());
    }
}

fn thread_name() -> String {
    std::thread::current()
        .name()
        .expect("ThreadPool::new gives every worker thread a name")
        .to_owned()
}
