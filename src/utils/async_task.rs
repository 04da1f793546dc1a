use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::error;
use tracing::warn;

use crate::NetworkError;
use crate::Result;

/// Runs `task` under `duration`, turning an elapsed deadline into
/// `NetworkError::Timeout` tagged with `url`.
pub(crate) async fn run_with_timeout<F, P>(
    url: &str,
    duration: Duration,
    task: F,
) -> Result<P>
where
    F: Future<Output = Result<P>>,
{
    match timeout(duration, task).await {
        Ok(result) => result,
        Err(_) => {
            warn!("request to {} timed out after {:?}", url, duration);
            Err(NetworkError::Timeout {
                url: url.to_string(),
                duration,
            }
            .into())
        }
    }
}

// Helper function to spawn tasks and track their JoinHandles
pub(crate) fn spawn_task<F, Fut>(
    name: &str,
    task_fn: F,
    handles: Option<&mut Vec<JoinHandle<()>>>,
) where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    // Clone the name so it can be safely moved into the async block
    let name = name.to_string();
    let handle = tokio::spawn(async move {
        if let Err(e) = task_fn().await {
            error!("spawned task: {name} stopped or encountered an error: {:?}", e);
        }
    });

    if let Some(h) = handles {
        h.push(handle);
    }
}
