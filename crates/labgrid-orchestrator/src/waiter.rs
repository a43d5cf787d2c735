//! Task waiter.
//!
//! Polls an asynchronous cluster task at a fixed interval until it turns
//! terminal. A maximum wait bounds the loop so a stuck task surfaces as
//! [`OrchestratorError::TaskTimeout`] instead of blocking the flow forever.

use std::time::Duration;

use labgrid_cluster::{ClusterClient, TaskId};
use labgrid_core::TaskConfig;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, warn};

use crate::error::{OrchestratorError, OrchestratorResult};

#[derive(Debug, Clone, Copy)]
pub struct TaskWaiter {
    poll_interval: Duration,
    max_wait: Duration,
}

impl TaskWaiter {
    pub fn new(poll_interval: Duration, max_wait: Duration) -> Self {
        Self {
            poll_interval,
            max_wait,
        }
    }

    pub fn from_config(config: &TaskConfig) -> Self {
        Self::new(config.poll_interval(), config.max_wait())
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn max_wait(&self) -> Duration {
        self.max_wait
    }

    /// Block until `task` on `node` is terminal.
    ///
    /// Succeeds on `OK` or a missing exit status; any other exit status is
    /// a [`OrchestratorError::ClusterTaskFailed`]. Errors from the status
    /// call itself are returned as they are.
    pub async fn wait(
        &self,
        cluster: &dyn ClusterClient,
        node: &str,
        task: &TaskId,
    ) -> OrchestratorResult<()> {
        let started = Instant::now();
        let poll = async {
            let mut polls = 0u32;
            loop {
                polls += 1;
                let status = cluster.task_status(node, task).await?;
                if status.is_terminal() {
                    if let Some(exit) = status.failure() {
                        return Err(OrchestratorError::ClusterTaskFailed {
                            node: node.to_string(),
                            task: task.to_string(),
                            exit_status: exit.to_string(),
                        });
                    }
                    debug!(%node, upid = %task, polls, elapsed = ?started.elapsed(), "task finished");
                    return Ok(());
                }
                sleep(self.poll_interval).await;
            }
        };

        match timeout(self.max_wait, poll).await {
            Ok(result) => result,
            Err(_) => {
                warn!(%node, upid = %task, max_wait = ?self.max_wait, "task did not finish in time");
                Err(OrchestratorError::TaskTimeout {
                    node: node.to_string(),
                    task: task.to_string(),
                    waited: started.elapsed(),
                })
            }
        }
    }
}

impl Default for TaskWaiter {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(600))
    }
}
