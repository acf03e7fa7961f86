//! A concurrent application runner that manages long-running processes with graceful shutdown.
//!
//! This runner orchestrates multiple app processes and cleanup functions, providing:
//! - Concurrent execution of multiple named processes
//! - Graceful shutdown on SIGTERM/SIGINT, letting in-flight work finish
//! - Configurable drain and cleanup timeouts
//! - Automatic cleanup execution regardless of process outcome
//!
//! # Example
//!
//! ```no_run
//! use turbofan_runner::Runner;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let runner = Runner::new()
//!         .with_app_process(|ctx| async move {
//!             loop {
//!                 tokio::select! {
//!                     _ = ctx.cancelled() => {
//!                         tracing::info!("Process stopping gracefully");
//!                         break;
//!                     }
//!                     _ = tokio::time::sleep(Duration::from_secs(1)) => {
//!                         tracing::info!("Process working...");
//!                     }
//!                 }
//!             }
//!             Ok(())
//!         })
//!         .with_closer(|| async move {
//!             tracing::info!("Cleaning up resources");
//!             Ok(())
//!         })
//!         .with_closer_timeout(Duration::from_secs(5));
//!
//!     runner.run().await;
//! }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Type alias for an app process function.
/// Takes a cancellation token and returns a future that resolves to Result<(), anyhow::Error>
pub type AppProcess = Box<
    dyn FnOnce(CancellationToken) -> Pin<Box<dyn Future<Output = Result<(), anyhow::Error>> + Send>>
        + Send,
>;

/// Type alias for a closer function.
/// Returns a future that resolves to Result<(), anyhow::Error>
pub type Closer =
    Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = Result<(), anyhow::Error>> + Send>> + Send>;

/// A concurrent application runner that manages long-running processes with graceful shutdown.
///
/// The `Runner` orchestrates multiple app processes and cleanup functions:
/// - App processes run concurrently until one fails or a shutdown signal is received
/// - On shutdown, processes get `drain_timeout` to finish what they started
/// - Closers execute afterward, regardless of process outcome
pub struct Runner {
    app_processes: Vec<(String, AppProcess)>,
    closers: Vec<Closer>,
    closer_timeout: Duration,
    drain_timeout: Duration,
    cancellation_token: CancellationToken,
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}

impl Runner {
    /// Creates a new Runner with default configuration.
    ///
    /// Default settings:
    /// - Closer timeout: 10 seconds
    /// - Drain timeout: 30 seconds
    /// - No app processes or closers
    pub fn new() -> Self {
        Self {
            app_processes: Vec::new(),
            closers: Vec::new(),
            closer_timeout: Duration::from_secs(10),
            drain_timeout: Duration::from_secs(30),
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Adds an unnamed app process to the runner.
    ///
    /// App processes run concurrently. If any process returns an error,
    /// all processes are cancelled and closers are executed.
    pub fn with_app_process<F, Fut>(self, process: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), anyhow::Error>> + Send + 'static,
    {
        let name = format!("process_{}", self.app_processes.len());
        self.with_named_process(name, Box::new(|token| Box::pin(process(token))))
    }

    /// Adds an already boxed process under a name used in logs.
    pub fn with_named_process(mut self, name: impl Into<String>, process: AppProcess) -> Self {
        self.app_processes.push((name.into(), process));
        self
    }

    /// Adds a closer to the runner.
    ///
    /// Closers are executed after all app processes have stopped,
    /// regardless of whether they stopped due to error or cancellation.
    /// All closers will attempt to execute even if some fail.
    pub fn with_closer<F, Fut>(mut self, closer: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), anyhow::Error>> + Send + 'static,
    {
        self.closers.push(Box::new(|| Box::pin(closer())));
        self
    }

    /// Sets the timeout for executing closers.
    ///
    /// Default is 10 seconds.
    pub fn with_closer_timeout(mut self, timeout: Duration) -> Self {
        self.closer_timeout = timeout;
        self
    }

    /// Sets how long processes may keep running after cancellation before
    /// they are aborted.
    ///
    /// Default is 30 seconds.
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Sets a custom cancellation token.
    ///
    /// This allows external control over process cancellation.
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    /// Runs until stopped, then exits the process with code 0, or 1 when a
    /// process failed.
    pub async fn run(self) {
        match self.run_until_stopped().await {
            Ok(()) => {
                tracing::info!("Application exiting normally");
                std::process::exit(0);
            }
            Err(err) => {
                tracing::error!("Application exiting with error: {:#}", err);
                std::process::exit(1);
            }
        }
    }

    /// Runs all app processes and waits for completion or shutdown signal.
    ///
    /// This method:
    /// 1. Spawns all app processes concurrently
    /// 2. Monitors for SIGTERM/SIGINT signals
    /// 3. Cancels all processes when a signal is received or any process fails
    /// 4. Waits up to the drain timeout for processes to finish in-flight work
    /// 5. Executes all closers with the configured timeout
    ///
    /// Returns the first process error, if any.
    pub async fn run_until_stopped(self) -> anyhow::Result<()> {
        let token = self.cancellation_token;
        let mut join_set = JoinSet::new();

        for (name, process) in self.app_processes {
            let process_token = token.clone();
            tracing::debug!(process = %name, "Starting app process");
            join_set.spawn(async move { (name, process(process_token).await) });
        }

        spawn_signal_handlers(token.clone());

        let mut first_error = None;
        while let Some(result) = join_set.join_next().await {
            Self::record_exit(result, &token, &mut first_error);
            if token.is_cancelled() {
                break;
            }
        }

        // Cancelled processes finish the work they already started
        if !join_set.is_empty() {
            tracing::info!(
                remaining = join_set.len(),
                "Waiting up to {:?} for processes to finish",
                self.drain_timeout
            );

            let drained = tokio::time::timeout(self.drain_timeout, async {
                while let Some(result) = join_set.join_next().await {
                    Self::record_exit(result, &token, &mut first_error);
                }
            })
            .await;

            if drained.is_err() {
                tracing::error!(
                    "Processes did not stop within {:?}, aborting",
                    self.drain_timeout
                );
                join_set.shutdown().await;
            }
        }

        if !self.closers.is_empty() {
            tracing::info!("Running closers with timeout of {:?}", self.closer_timeout);

            let closer_result =
                tokio::time::timeout(self.closer_timeout, Self::run_closers_static(self.closers))
                    .await;

            match closer_result {
                Ok(_) => {
                    tracing::info!("All closers completed");
                }
                Err(_) => {
                    tracing::error!("Closers timed out after {:?}", self.closer_timeout);
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn record_exit(
        result: Result<(String, anyhow::Result<()>), tokio::task::JoinError>,
        token: &CancellationToken,
        first_error: &mut Option<anyhow::Error>,
    ) {
        match result {
            Ok((name, Ok(()))) => {
                tracing::debug!(process = %name, "App process completed successfully");
            }
            Ok((name, Err(err))) => {
                tracing::error!(process = %name, "App process error: {:#}", err);
                if first_error.is_none() {
                    *first_error = Some(err);
                }
                token.cancel();
            }
            Err(err) => {
                tracing::error!("App process panicked: {}", err);
                token.cancel();
            }
        }
    }

    /// Runs all closers concurrently.
    async fn run_closers_static(closers: Vec<Closer>) {
        let mut closer_set = JoinSet::new();

        for closer in closers {
            closer_set.spawn(async move { closer().await });
        }

        while let Some(result) = closer_set.join_next().await {
            match result {
                Ok(Ok(())) => {
                    tracing::debug!("Closer completed successfully");
                }
                Ok(Err(err)) => {
                    tracing::error!("Closer error: {:#}", err);
                }
                Err(err) => {
                    tracing::error!("Closer panicked: {}", err);
                }
            }
        }
    }
}

fn spawn_signal_handlers(token: CancellationToken) {
    let signal_token = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Received shutdown signal");
                signal_token.cancel();
            }
            Err(err) => {
                tracing::error!("Error setting up signal handler: {}", err);
            }
        }
    });

    #[cfg(unix)]
    {
        tokio::spawn(async move {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                    tracing::info!("Received SIGTERM signal");
                    token.cancel();
                }
                Err(err) => {
                    tracing::error!("Failed to set up SIGTERM handler: {}", err);
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_cancellation_lets_in_flight_work_finish() {
        let finished = Arc::new(AtomicBool::new(false));
        let finished_clone = finished.clone();
        let closer_called = Arc::new(AtomicBool::new(false));
        let closer_called_clone = closer_called.clone();

        let token = CancellationToken::new();
        let token_clone = token.clone();

        let runner = Runner::new()
            .with_app_process(move |ctx| async move {
                ctx.cancelled().await;
                // Work already started when the signal arrived
                tokio::time::sleep(Duration::from_millis(50)).await;
                finished_clone.store(true, Ordering::SeqCst);
                Ok(())
            })
            .with_closer(move || {
                let flag = closer_called_clone.clone();
                async move {
                    flag.store(true, Ordering::SeqCst);
                    Ok(())
                }
            })
            .with_cancellation_token(token)
            .with_closer_timeout(Duration::from_secs(5));

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token_clone.cancel();
        });

        let result = runner.run_until_stopped().await;

        assert!(result.is_ok());
        assert!(finished.load(Ordering::SeqCst));
        assert!(closer_called.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_process_error_cancels_others() {
        let stopped = Arc::new(AtomicUsize::new(0));
        let stopped_clone = stopped.clone();

        let runner = Runner::new()
            .with_named_process(
                "failing",
                Box::new(|_ctx| Box::pin(async { Err::<(), _>(anyhow::anyhow!("boom")) })),
            )
            .with_app_process(move |ctx| async move {
                ctx.cancelled().await;
                stopped_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });

        let result = runner.run_until_stopped().await;

        let err = result.expect_err("runner should report the failing process");
        assert_eq!(err.to_string(), "boom");
        assert_eq!(stopped.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_drain_timeout_aborts_stuck_processes() {
        let token = CancellationToken::new();
        token.cancel();

        let runner = Runner::new()
            .with_app_process(|_ctx| async move {
                tokio::time::sleep(Duration::from_secs(100)).await;
                Ok(())
            })
            .with_app_process(|_ctx| async move { Ok(()) })
            .with_cancellation_token(token)
            .with_drain_timeout(Duration::from_millis(50));

        let result =
            tokio::time::timeout(Duration::from_secs(5), runner.run_until_stopped()).await;

        assert!(matches!(result, Ok(Ok(()))));
    }

    #[tokio::test]
    async fn test_closer_execution() {
        let counter = Arc::new(AtomicBool::new(false));
        let counter_clone = counter.clone();

        let runner = Runner::new()
            .with_closer(move || {
                let c = counter_clone.clone();
                async move {
                    c.store(true, Ordering::SeqCst);
                    Ok(())
                }
            })
            .with_closer_timeout(Duration::from_secs(1));

        Runner::run_closers_static(runner.closers).await;
        assert!(counter.load(Ordering::SeqCst));
    }
}
