//! A fixed size pool of worker threads fed by a blocking queue.
//!
//! Workers block in [`SyncQueue::wait_and_pop`] and exit once the queue is
//! stopped. Shutting the pool down stops its queue, so tasks that are still
//! queued at that point are never run.

use crate::{Error, LinkedQueue, Result, Run, SyncQueue};
use std::{io, mem};
use std::sync::{Arc, Mutex, PoisonError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};

/// A unit of work submitted to a `ThreadPool`.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// A queue that can be used to back a thread pool
pub trait WorkQueue : SyncQueue<Job> + Clone + Send + Sync + 'static {
}

impl<Q: SyncQueue<Job> + Clone + Send + Sync + 'static> WorkQueue for Q {
}

pub struct ThreadPool<Q: WorkQueue = LinkedQueue<Job>> {
    inner: Arc<ThreadPoolInner<Q>>,
}

impl ThreadPool<LinkedQueue<Job>> {
    pub fn fixed_size(size: usize) -> Result<ThreadPool<LinkedQueue<Job>>> {
        Builder::new().size(size).build()
    }

    pub fn single_thread() -> Result<ThreadPool<LinkedQueue<Job>>> {
        ThreadPool::fixed_size(1)
    }
}

impl<Q: WorkQueue> ThreadPool<Q> {
    /// Submits `task` to be run by one of the workers.
    ///
    /// # Errors
    ///
    /// Returns `Error::Shutdown` if the pool has been shut down.
    pub fn run<F>(&self, task: F) -> Result<()>
        where F: FnOnce() + Send + 'static
    {
        self.inner.run(Box::new(task))
    }

    /// Stops the work queue. Idle workers exit right away and busy workers
    /// exit once their current task completes.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.is_shutdown()
    }

    /// Number of worker threads the pool was started with.
    pub fn size(&self) -> usize {
        self.inner.size
    }

    /// Blocks until every worker has exited. Only returns once `shutdown` has
    /// been called, from this or another thread.
    ///
    /// # Errors
    ///
    /// Returns `Error::WorkerPanicked` if a task panicked and took its worker
    /// down with it. The pool replaces such workers while it is running, and
    /// all workers, replacements included, are joined regardless.
    pub fn await_termination(&self) -> Result<()> {
        self.inner.await_termination()
    }
}

impl<Q: WorkQueue> Run for ThreadPool<Q> {
    fn run<F>(&self, task: F) -> Result<()>
        where F: FnOnce() + Send + 'static
    {
        ThreadPool::run(self, task)
    }
}

impl<Q: WorkQueue> Clone for ThreadPool<Q> {
    fn clone(&self) -> ThreadPool<Q> {
        ThreadPool { inner: self.inner.clone() }
    }
}

/// Thread pool configuration.
#[derive(Debug, Clone)]
pub struct Builder {
    size: usize,
    name_prefix: String,
    stack_size: Option<usize>,
}

impl Builder {
    pub fn new() -> Builder {
        Builder {
            size: 1,
            name_prefix: "waitbox-worker".to_string(),
            stack_size: None,
        }
    }

    /// Number of worker threads. Must be greater than 0.
    pub fn size(mut self, size: usize) -> Builder {
        self.size = size;
        self
    }

    /// Workers are named `{prefix}-{index}`.
    pub fn name_prefix<S: Into<String>>(mut self, prefix: S) -> Builder {
        self.name_prefix = prefix.into();
        self
    }

    pub fn stack_size(mut self, bytes: usize) -> Builder {
        self.stack_size = Some(bytes);
        self
    }

    pub fn build(self) -> Result<ThreadPool<LinkedQueue<Job>>> {
        self.build_with_queue(LinkedQueue::new())
    }

    /// Starts the workers, pulling tasks from `work_queue`.
    ///
    /// If any worker fails to spawn, `work_queue` is stopped so that the
    /// workers which did start exit. The queue stays stopped, so a queue
    /// shared with other consumers must not be reused after a failed build.
    pub fn build_with_queue<Q: WorkQueue>(self, work_queue: Q) -> Result<ThreadPool<Q>> {
        if self.size == 0 {
            return Err(Error::InvalidSize);
        }

        let size = self.size;

        let core = Arc::new(Core {
            work_queue,
            workers: Mutex::new(Vec::with_capacity(size)),
            next_index: AtomicUsize::new(0),
            config: self,
        });

        for _ in 0..size {
            if let Err(e) = core.spawn_worker() {
                warn!("failed to spawn worker; err={}", e);

                // Release the workers that did start
                core.work_queue.notify_stop();
                return Err(Error::Spawn(e));
            }
        }

        let inner = ThreadPoolInner { core, size };

        Ok(ThreadPool { inner: Arc::new(inner) })
    }
}

impl Default for Builder {
    fn default() -> Builder {
        Builder::new()
    }
}

// Owned by the pool handles only, so that dropping the last handle shuts the
// pool down even though workers are still parked on the queue.
struct ThreadPoolInner<Q: WorkQueue> {
    core: Arc<Core<Q>>,
    size: usize,
}

impl<Q: WorkQueue> ThreadPoolInner<Q> {
    fn run(&self, task: Job) -> Result<()> {
        if self.is_shutdown() {
            warn!("threadpool is not accepting new tasks");
            return Err(Error::Shutdown);
        }

        self.core.work_queue.push(task);
        trace!("task submitted to queue");

        Ok(())
    }

    fn shutdown(&self) {
        if !self.is_shutdown() {
            debug!("shutdown; worker_count={}", self.size);
        }

        self.core.work_queue.notify_stop();
    }

    fn is_shutdown(&self) -> bool {
        self.core.is_shutdown()
    }

    fn await_termination(&self) -> Result<()> {
        let mut ret = Ok(());

        // A worker that panics spawns its replacement before exiting, so keep
        // draining until no handles are left.
        loop {
            let workers = {
                let mut workers = self.core.workers.lock()
                    .unwrap_or_else(PoisonError::into_inner);

                mem::take(&mut *workers)
            };

            if workers.is_empty() {
                return ret;
            }

            for handle in workers {
                let name = handle.thread().name()
                    .unwrap_or("<unnamed>")
                    .to_string();

                if handle.join().is_err() {
                    warn!("worker panicked; name={}", name);

                    if ret.is_ok() {
                        ret = Err(Error::WorkerPanicked { name });
                    }
                }
            }
        }
    }
}

impl<Q: WorkQueue> Drop for ThreadPoolInner<Q> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// Shared by the pool and its workers
struct Core<Q: WorkQueue> {
    // The queue used for holding tasks and handing off to worker threads.
    // Its stop flag doubles as the pool's shutdown state.
    work_queue: Q,

    // Handles of workers not yet joined by `await_termination`
    workers: Mutex<Vec<JoinHandle<()>>>,

    // Suffix of the next worker thread name
    next_index: AtomicUsize,

    config: Builder,
}

impl<Q: WorkQueue> Core<Q> {
    fn is_shutdown(&self) -> bool {
        self.work_queue.is_stopped()
    }

    fn spawn_worker(self: &Arc<Self>) -> io::Result<()> {
        let index = self.next_index.fetch_add(1, Ordering::Relaxed);

        let mut builder = thread::Builder::new()
            .name(format!("{}-{}", self.config.name_prefix, index));

        if let Some(bytes) = self.config.stack_size {
            builder = builder.stack_size(bytes);
        }

        let mut worker = Worker::new(self.clone());

        debug!("spawning new worker thread; index={}", index);

        let handle = builder.spawn(move || worker.run())?;

        self.workers.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);

        Ok(())
    }
}

struct Worker<Q: WorkQueue> {
    core: Arc<Core<Q>>,

    // Checked in the drop function whether or not the thread panicked
    panicked: bool,
}

impl<Q: WorkQueue> Worker<Q> {
    fn new(core: Arc<Core<Q>>) -> Worker<Q> {
        Worker {
            core,
            panicked: false,
        }
    }

    fn run(&mut self) {
        self.panicked = true;

        debug!("worker waiting for task");

        while let Some(task) = self.core.work_queue.wait_and_pop() {
            trace!("worker processing task");
            task();
        }

        debug!("received stop signal -- shutting down");

        self.panicked = false;
    }
}

impl<Q: WorkQueue> Drop for Worker<Q> {
    fn drop(&mut self) {
        if !self.panicked || self.core.is_shutdown() {
            return;
        }

        warn!("task panicked -- replacing worker");

        if let Err(e) = self.core.spawn_worker() {
            warn!("failed to replace worker; err={}", e);
        }
    }
}
