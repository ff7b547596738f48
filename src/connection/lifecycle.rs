//! Lifecycle watcher: hard connection timeout and server shutdown.

use std::time::Duration;

use log::{debug, info};
use tokio_util::sync::CancellationToken;

const LOG_TARGET: &str = "buildfarm::connection::lifecycle";

/// How the lifecycle watcher ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleExit {
    /// The connection ended on its own.
    Finished,
    /// The hard connection timeout fired.
    TimedOut,
    /// The task panicked or was aborted.
    Aborted,
}

/// Watch for the hard timeout and for server shutdown.
///
/// Shutdown cancels only the job token so the job can still report
/// "server shut down" over the connection before teardown. The hard timeout
/// cancels the whole connection.
pub(crate) async fn lifecycle_loop(
    token: CancellationToken,
    job_token: CancellationToken,
    shutdown: CancellationToken,
    connection_timeout: Duration,
) -> LifecycleExit {
    let hard_deadline = tokio::time::sleep(connection_timeout);
    tokio::pin!(hard_deadline);
    let mut shutdown_seen = false;

    loop {
        tokio::select! {
            biased;

            _ = token.cancelled() => return LifecycleExit::Finished,

            _ = shutdown.cancelled(), if !shutdown_seen => {
                info!(target: LOG_TARGET, "Server shutting down, stopping job");
                shutdown_seen = true;
                job_token.cancel();
            }

            _ = &mut hard_deadline => {
                debug!(target: LOG_TARGET, "Connection exceeded {:?}, cancelling", connection_timeout);
                token.cancel();
                return LifecycleExit::TimedOut;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn hard_timeout_cancels_connection() {
        let token = CancellationToken::new();
        let job = token.child_token();

        let exit = lifecycle_loop(
            token.clone(),
            job.clone(),
            CancellationToken::new(),
            Duration::from_secs(300),
        )
        .await;

        assert_eq!(exit, LifecycleExit::TimedOut);
        assert!(token.is_cancelled());
        assert!(job.is_cancelled(), "job token follows its parent");
    }

    /// Shutdown stops the job but leaves the connection open for the report.
    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_job_only() {
        let token = CancellationToken::new();
        let job = token.child_token();
        let shutdown = CancellationToken::new();
        let watcher = tokio::spawn(lifecycle_loop(
            token.clone(),
            job.clone(),
            shutdown.clone(),
            Duration::from_secs(300),
        ));

        shutdown.cancel();
        job.cancelled().await;
        assert!(!token.is_cancelled());

        token.cancel();
        assert_eq!(watcher.await.unwrap(), LifecycleExit::Finished);
    }
}
