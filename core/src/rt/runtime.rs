//! Tokio-backed pool that runs blocking branch jobs and joins them in submission order.

use anyhow::{Result, anyhow};
use tracing::debug;

/// Environment toggle forcing the current-thread flavor.
const SINGLE_THREAD_ENV: &str = "STRAND_SINGLE_THREAD";

#[derive(Debug)]
pub struct BranchRuntime {
    tokio_runtime: Option<tokio::runtime::Runtime>,
    workers: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeStats {
    pub workers: usize,
    pub is_multi_threaded: bool,
}

impl BranchRuntime {
    /// `workers == 0` sizes the pool to the available parallelism.
    pub fn new(workers: usize) -> Result<Self> {
        let workers = match workers {
            0 => std::thread::available_parallelism().map_or(1, |n| n.get()),
            n => n,
        };
        if std::env::var(SINGLE_THREAD_ENV).is_ok() {
            return Self::new_current_thread(workers);
        }
        match Self::new_multi_thread(workers) {
            Ok(runtime) => Ok(runtime),
            Err(err) => {
                let err_msg = err.to_string();
                Self::new_current_thread(workers).map_err(|fallback_err| {
                    anyhow!(
                        "Failed to create multi-thread runtime ({}) and fallback to current-thread runtime failed ({})",
                        err_msg,
                        fallback_err
                    )
                })
            }
        }
    }

    pub fn new_multi_thread(workers: usize) -> Result<Self> {
        let tokio_runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(workers.max(1))
            .max_blocking_threads(workers.max(1))
            .thread_name("strand-branch")
            .enable_all()
            .build()
            .map_err(|e| anyhow!("Failed to create tokio runtime: {}", e))?;
        debug!(target: "strand::engine", workers, "branch runtime started");
        Ok(Self {
            tokio_runtime: Some(tokio_runtime),
            workers,
        })
    }

    pub fn new_current_thread(workers: usize) -> Result<Self> {
        let tokio_runtime = tokio::runtime::Builder::new_current_thread()
            .max_blocking_threads(workers.max(1))
            .enable_all()
            .build()
            .map_err(|e| anyhow!("Failed to create tokio runtime: {}", e))?;
        debug!(target: "strand::engine", workers, "branch runtime started on the current thread");
        Ok(Self {
            tokio_runtime: Some(tokio_runtime),
            workers,
        })
    }

    fn runtime(&self) -> Result<&tokio::runtime::Runtime> {
        self.tokio_runtime
            .as_ref()
            .ok_or_else(|| anyhow!("branch runtime already shut down"))
    }

    /// Runs every job on the blocking pool and returns their outputs in the order given.
    pub fn run_all<T, F>(&self, jobs: Vec<F>) -> Result<Vec<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.runtime()?.block_on(async {
            let handles: Vec<_> = jobs.into_iter().map(tokio::task::spawn_blocking).collect();
            let mut out = Vec::with_capacity(handles.len());
            for (i, handle) in handles.into_iter().enumerate() {
                let value = handle
                    .await
                    .map_err(|e| anyhow!("branch job {} failed: {}", i, e))?;
                out.push(value);
            }
            Ok(out)
        })
    }

    pub fn stats(&self) -> RuntimeStats {
        RuntimeStats {
            workers: self.workers,
            is_multi_threaded: self.tokio_runtime.as_ref().is_some_and(|rt| {
                matches!(
                    rt.handle().runtime_flavor(),
                    tokio::runtime::RuntimeFlavor::MultiThread
                )
            }),
        }
    }
}

impl Drop for BranchRuntime {
    fn drop(&mut self) {
        // Dropping a runtime from inside another one panics; hand it off instead.
        if let Some(runtime) = self.tokio_runtime.take() {
            if tokio::runtime::Handle::try_current().is_ok() {
                runtime.shutdown_background();
            } else {
                drop(runtime);
            }
        }
    }
}
