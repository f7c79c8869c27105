use std::sync::Arc;

use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::Semaphore;
use tracing::{debug, info};

use crate::config::PoolConfig;
use crate::types::{EngineError, FetchError, Result};

/// Elastic pool of threads for blocking fetch work.
///
/// Backed by a dedicated runtime's blocking pool: threads are spawned on
/// demand up to `max_threads` and retired after `keep_alive` of idleness.
/// At most `max_threads + queue_capacity` jobs are admitted at once, further
/// callers wait for a slot. Create it once at startup and share it; dropping
/// the last handle shuts it down.
pub struct WorkerPool {
    name: String,
    runtime: Option<Runtime>,
    handle: Handle,
    slots: Arc<Semaphore>,
    capacity: usize,
    max_threads: usize,
}

impl WorkerPool {
    pub fn new(config: &PoolConfig) -> Result<Self> {
        if config.max_threads == 0 {
            return Err(EngineError::Config("worker pool needs at least one thread".into()));
        }

        let capacity = config
            .max_threads
            .checked_add(config.queue_capacity)
            .filter(|capacity| *capacity <= Semaphore::MAX_PERMITS)
            .ok_or_else(|| {
                EngineError::Config(format!(
                    "pool '{}' admits too many jobs ({} threads + {} queued)",
                    config.name, config.max_threads, config.queue_capacity
                ))
            })?;

        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(config.max_threads)
            .thread_keep_alive(config.keep_alive())
            .thread_name(format!("{}-worker", config.name))
            .enable_time()
            .build()
            .map_err(|e| EngineError::Pool(format!("building {} pool: {}", config.name, e)))?;

        info!(
            "Started worker pool '{}' (max {} threads, {} queued)",
            config.name, config.max_threads, config.queue_capacity
        );

        Ok(Self {
            name: config.name.clone(),
            handle: runtime.handle().clone(),
            runtime: Some(runtime),
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
            max_threads: config.max_threads,
        })
    }

    /// Runs `job` on a pool thread and waits for its result without blocking
    /// the calling task.
    pub async fn run<F, T>(&self, job: F) -> std::result::Result<T, FetchError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| FetchError::Pool(format!("pool '{}' is shut down", self.name)))?;

        self.handle
            .spawn_blocking(move || {
                let _permit = permit;
                job()
            })
            .await
            .map_err(|e| FetchError::Pool(e.to_string()))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_threads(&self) -> usize {
        self.max_threads
    }

    /// Jobs currently running or queued.
    pub fn busy(&self) -> usize {
        self.capacity - self.slots.available_permits()
    }

    /// Stops accepting work. Running jobs finish on their own threads, pending
    /// callers get `FetchError::Pool`.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.slots.close();
        if let Some(runtime) = self.runtime.take() {
            // Never blocks, so this is safe from inside another runtime.
            runtime.shutdown_background();
            debug!("Worker pool '{}' shut down", self.name);
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}
