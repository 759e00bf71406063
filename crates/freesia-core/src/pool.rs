//! Shared worker pool for asynchronous handlers.
//!
//! Handler bodies are plain synchronous closures, so they run on a tokio
//! blocking pool. The bus either borrows the handle of an existing runtime or
//! owns a small runtime of its own, started on the first async submission.

use crate::config::WorkerConfig;
use crate::error::BusError;
use once_cell::sync::OnceCell;
use tokio::runtime::{Builder, Handle, Runtime};
use tracing::debug;

pub(crate) struct WorkerPool {
    config: WorkerConfig,
    shared: Option<Handle>,
    owned: OnceCell<Runtime>,
}

impl WorkerPool {
    /// A pool that starts its own runtime lazily.
    pub(crate) fn owned(config: WorkerConfig) -> Self {
        Self {
            config,
            shared: None,
            owned: OnceCell::new(),
        }
    }

    /// A pool that submits to an existing runtime.
    pub(crate) fn shared(config: WorkerConfig, handle: Handle) -> Self {
        Self {
            config,
            shared: Some(handle),
            owned: OnceCell::new(),
        }
    }

    fn handle(&self) -> Result<&Handle, BusError> {
        if let Some(handle) = &self.shared {
            return Ok(handle);
        }
        self.owned
            .get_or_try_init(|| build_runtime(&self.config))
            .map(Runtime::handle)
    }

    /// Queue `job` and return without waiting for it.
    pub(crate) fn submit<F>(&self, job: F) -> Result<(), BusError>
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = self.handle()?;
        // Detached: the JoinHandle is not needed to keep the task alive.
        drop(handle.spawn_blocking(job));
        Ok(())
    }

    pub(crate) fn is_started(&self) -> bool {
        self.shared.is_some() || self.owned.get().is_some()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // shutdown_background is safe to call from inside another runtime.
        if let Some(runtime) = self.owned.take() {
            runtime.shutdown_background();
        }
    }
}

fn build_runtime(config: &WorkerConfig) -> Result<Runtime, BusError> {
    let mut builder = Builder::new_multi_thread();
    builder
        .worker_threads(1)
        .max_blocking_threads(config.threads.max(1))
        .thread_name(config.thread_name.clone());
    if let Some(stack_size) = config.stack_size {
        builder.thread_stack_size(stack_size);
    }

    let runtime = builder.build().map_err(BusError::WorkerPool)?;
    debug!(
        threads = config.threads,
        thread_name = %config.thread_name,
        "started async handler pool"
    );
    Ok(runtime)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    fn small_config() -> WorkerConfig {
        WorkerConfig {
            threads: 2,
            thread_name: "pool-test".to_string(),
            stack_size: None,
        }
    }

    #[test]
    fn test_owned_pool_starts_lazily() {
        let pool = WorkerPool::owned(small_config());
        assert!(!pool.is_started());

        let (tx, rx) = mpsc::channel();
        pool.submit(move || {
            let name = std::thread::current().name().map(str::to_string);
            tx.send(name).unwrap();
        })
        .unwrap();

        assert!(pool.is_started());
        let name = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(name.as_deref(), Some("pool-test"));
    }

    #[test]
    fn test_submit_runs_off_the_caller_thread() {
        let pool = WorkerPool::owned(small_config());
        let caller = std::thread::current().id();

        let (tx, rx) = mpsc::channel();
        pool.submit(move || tx.send(std::thread::current().id()).unwrap())
            .unwrap();

        let worker = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_ne!(worker, caller);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_shared_pool_uses_existing_runtime() {
        let pool = WorkerPool::shared(small_config(), Handle::current());
        assert!(pool.is_started());

        let (tx, rx) = tokio::sync::oneshot::channel();
        pool.submit(move || {
            let _ = tx.send(42);
        })
        .unwrap();

        let value = tokio::time::timeout(Duration::from_secs(2), rx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_owned_pool_can_drop_inside_runtime() {
        let pool = WorkerPool::owned(small_config());
        pool.submit(|| {}).unwrap();
        drop(pool);
    }
}
