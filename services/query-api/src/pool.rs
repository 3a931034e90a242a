//! Pool of ready-to-use, single-use query sandboxes.
//!
//! A background filler keeps up to `pool_size` sandboxes provisioned. Each
//! query takes one sandbox, runs, and terminates it; the filler replaces it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{QueryError, QueryResult};

/// How often the filler checks for free pool slots.
pub const FILL_INTERVAL: Duration = Duration::from_millis(20);

/// Text used for SQL NULL values in query results.
pub const NULL_MARKER: &str = "\\N";

/// Column names and stringified rows of a query result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// An isolated database that serves exactly one query.
#[async_trait]
pub trait Sandbox: Send {
    async fn execute(&mut self, sql: &str) -> QueryResult<QueryRows>;

    /// Release every resource held by the sandbox.
    async fn terminate(self: Box<Self>) -> QueryResult<()>;
}

/// Creates fresh sandboxes.
#[async_trait]
pub trait SandboxProvider: Send + Sync + 'static {
    async fn provision(&self) -> QueryResult<Box<dyn Sandbox>>;
}

pub struct SandboxPool {
    ready: Mutex<mpsc::Receiver<Box<dyn Sandbox>>>,
    stop: watch::Sender<bool>,
    filler: Mutex<Option<JoinHandle<()>>>,
    pool_size: usize,
}

impl SandboxPool {
    /// Start a pool keeping `pool_size` sandboxes ready. Must be called
    /// inside a tokio runtime.
    pub fn start(provider: Arc<dyn SandboxProvider>, pool_size: usize) -> Self {
        let pool_size = pool_size.max(1);
        let (tx, rx) = mpsc::channel(pool_size);
        let (stop, stop_rx) = watch::channel(false);

        let filler = tokio::spawn(fill_loop(provider, tx, stop_rx));
        info!(pool_size, "Sandbox pool started");

        Self {
            ready: Mutex::new(rx),
            stop,
            filler: Mutex::new(Some(filler)),
            pool_size,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Run `sql` in a fresh sandbox, waiting for one if none is ready.
    /// Fails with `PoolClosed` once the pool is closed, including for
    /// callers already waiting.
    pub async fn execute(&self, sql: &str) -> QueryResult<QueryRows> {
        let mut closed = self.stop.subscribe();
        let mut sandbox = tokio::select! {
            biased;
            _ = async {
                let _ = closed.wait_for(|closed| *closed).await;
            } => return Err(QueryError::PoolClosed),
            sandbox = async { self.ready.lock().await.recv().await } => {
                sandbox.ok_or(QueryError::PoolClosed)?
            }
        };

        let result = sandbox.execute(sql).await;

        if let Err(e) = sandbox.terminate().await {
            warn!(error = %e, "Failed to terminate sandbox");
        }

        result
    }

    pub fn is_closed(&self) -> bool {
        *self.stop.borrow()
    }

    /// Stop handing out sandboxes. Pending and later `execute` calls fail
    /// with `PoolClosed`; queries already running in a sandbox finish.
    pub fn close(&self) {
        if !self.stop.send_replace(true) {
            info!("Sandbox pool closed");
        }
    }

    /// Close the pool, stop provisioning and terminate every ready sandbox.
    pub async fn shutdown(&self) {
        self.close();

        if let Some(filler) = self.filler.lock().await.take() {
            if let Err(e) = filler.await {
                error!(error = %e, "Sandbox filler task failed");
            }
        }

        let mut ready = self.ready.lock().await;
        let mut terminated = 0usize;
        while let Some(sandbox) = ready.recv().await {
            if let Err(e) = sandbox.terminate().await {
                warn!(error = %e, "Failed to terminate sandbox");
            }
            terminated += 1;
        }
        info!(terminated, "Sandbox pool shut down");
    }
}

async fn fill_loop(
    provider: Arc<dyn SandboxProvider>,
    tx: mpsc::Sender<Box<dyn Sandbox>>,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(FILL_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = stop.changed() => break,
        }
        if *stop.borrow() {
            break;
        }
        if tx.capacity() == 0 {
            continue;
        }

        match provider.provision().await {
            Ok(sandbox) => {
                // Stop may have been requested while provisioning
                if *stop.borrow() {
                    if let Err(e) = sandbox.terminate().await {
                        warn!(error = %e, "Failed to terminate sandbox");
                    }
                    break;
                }
                if let Err(mpsc::error::TrySendError::Full(sandbox))
                | Err(mpsc::error::TrySendError::Closed(sandbox)) = tx.try_send(sandbox)
                {
                    if let Err(e) = sandbox.terminate().await {
                        warn!(error = %e, "Failed to terminate sandbox");
                    }
                    continue;
                }
                debug!(ready = tx.max_capacity() - tx.capacity(), "Sandbox ready");
            }
            Err(e) => error!(error = %e, "Failed to create sandbox"),
        }
    }

    debug!("Sandbox filler stopped");
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// In-memory provider counting sandbox lifecycles.
    #[derive(Default)]
    pub struct CountingProvider {
        pub provisioned: Arc<AtomicUsize>,
        pub terminated: Arc<AtomicUsize>,
        pub executed: Arc<AtomicUsize>,
        pub fail_queries: AtomicBool,
        pub fail_provision: AtomicBool,
        /// Result returned by every query; a single `id, name` row when unset.
        pub rows: std::sync::Mutex<Option<QueryRows>>,
    }

    impl CountingProvider {
        pub fn returning(rows: QueryRows) -> Self {
            let provider = Self::default();
            *provider.rows.lock().unwrap() = Some(rows);
            provider
        }
    }

    struct CountingSandbox {
        terminated: Arc<AtomicUsize>,
        executed: Arc<AtomicUsize>,
        fail: bool,
        rows: Option<QueryRows>,
    }

    #[async_trait]
    impl Sandbox for CountingSandbox {
        async fn execute(&mut self, sql: &str) -> QueryResult<QueryRows> {
            self.executed.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(QueryError::Database(sqlx::Error::Protocol(format!(
                    "relation in \"{}\" does not exist",
                    sql
                ))));
            }
            Ok(self.rows.clone().unwrap_or_else(|| QueryRows {
                columns: vec!["id".into(), "name".into()],
                rows: vec![vec!["1".into(), "alpha".into()]],
            }))
        }

        async fn terminate(self: Box<Self>) -> QueryResult<()> {
            self.terminated.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[async_trait]
    impl SandboxProvider for CountingProvider {
        async fn provision(&self) -> QueryResult<Box<dyn Sandbox>> {
            if self.fail_provision.load(Ordering::SeqCst) {
                return Err(QueryError::Provision("no database server".into()));
            }
            self.provisioned.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(CountingSandbox {
                terminated: self.terminated.clone(),
                executed: self.executed.clone(),
                fail: self.fail_queries.load(Ordering::SeqCst),
                rows: self.rows.lock().unwrap().clone(),
            }))
        }
    }
}
