//! Waitable task group
//!
//! A bounded (or unbounded) pool of tokio tasks that callers can block on
//! until every submission completes. Two waiting modes:
//!
//! - [`TaskGroup::wait_fail_fast`] returns on the first failure and aborts
//!   every task still in flight
//! - [`TaskGroup::wait_all`] lets everything finish and hands back one
//!   [`TaskOutcome`] per submission, in submission order
//!
//! Aborting is cooperative: a running task stops at its next `.await`.

use crate::error::{DroidpackError, DroidpackResult, ErrorList};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{Id, JoinSet};
use tracing::debug;

/// Result of one submitted task
#[derive(Debug)]
pub struct TaskOutcome<T> {
    /// Submission index, starting at zero
    pub index: usize,
    /// Value or error produced by the task
    pub result: DroidpackResult<T>,
}

/// Group of units of work running on the tokio runtime
pub struct TaskGroup<T> {
    set: JoinSet<(usize, DroidpackResult<T>)>,
    permits: Option<Arc<Semaphore>>,
    /// Submission index of each task, for tasks that panic
    indices: HashMap<Id, usize>,
    submitted: usize,
}

impl<T: Send + 'static> TaskGroup<T> {
    /// Create a group that runs at most `limit` tasks at once
    pub fn bounded(limit: usize) -> Self {
        Self {
            set: JoinSet::new(),
            permits: Some(Arc::new(Semaphore::new(limit.max(1)))),
            indices: HashMap::new(),
            submitted: 0,
        }
    }

    /// Create a group with no concurrency limit
    pub fn unbounded() -> Self {
        Self {
            set: JoinSet::new(),
            permits: None,
            indices: HashMap::new(),
            submitted: 0,
        }
    }

    /// Create a group sized from a job count, where 0 means one per CPU
    pub fn with_jobs(jobs: usize) -> Self {
        let limit = if jobs == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            jobs
        };
        Self::bounded(limit)
    }

    /// Submit a unit of work
    pub fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = DroidpackResult<T>> + Send + 'static,
    {
        let index = self.submitted;
        self.submitted += 1;
        let permits = self.permits.clone();

        let handle = self.set.spawn(async move {
            let _permit = match permits {
                Some(sem) => match sem.acquire_owned().await {
                    Ok(permit) => Some(permit),
                    Err(_) => {
                        return (
                            index,
                            Err(DroidpackError::Internal("task group closed".to_string())),
                        )
                    }
                },
                None => None,
            };
            (index, task.await)
        });
        self.indices.insert(handle.id(), index);
    }

    /// Number of tasks submitted so far
    pub fn len(&self) -> usize {
        self.submitted
    }

    /// Whether nothing has been submitted
    pub fn is_empty(&self) -> bool {
        self.submitted == 0
    }

    /// Wait for every task, stopping at the first failure.
    ///
    /// On failure the remaining tasks are aborted and the first error is
    /// returned. On success values come back in submission order.
    pub async fn wait_fail_fast(mut self) -> DroidpackResult<Vec<T>> {
        let mut slots: Vec<Option<T>> = (0..self.submitted).map(|_| None).collect();

        while let Some(joined) = self.set.join_next().await {
            let outcome = match joined {
                Ok((index, Ok(value))) => {
                    slots[index] = Some(value);
                    continue;
                }
                Ok((_, Err(e))) => e,
                Err(e) if e.is_cancelled() => continue,
                Err(e) => DroidpackError::TaskPanicked(e.to_string()),
            };

            debug!(
                "Task failed, cancelling {} remaining task(s)",
                self.set.len()
            );
            self.set.abort_all();
            while self.set.join_next().await.is_some() {}
            return Err(outcome);
        }

        slots
            .into_iter()
            .map(|slot| {
                slot.ok_or_else(|| DroidpackError::Internal("task produced no result".to_string()))
            })
            .collect()
    }

    /// Wait for every task and collect each outcome, in submission order
    pub async fn wait_all(mut self) -> Vec<TaskOutcome<T>> {
        let mut outcomes: Vec<TaskOutcome<T>> = Vec::with_capacity(self.submitted);

        while let Some(joined) = self.set.join_next().await {
            match joined {
                Ok((index, result)) => outcomes.push(TaskOutcome { index, result }),
                Err(e) => {
                    let index = self.indices.get(&e.id()).copied().unwrap_or(self.submitted);
                    outcomes.push(TaskOutcome {
                        index,
                        result: Err(DroidpackError::TaskPanicked(e.to_string())),
                    });
                }
            }
        }

        outcomes.sort_by_key(|o| o.index);
        outcomes
    }

    /// Wait for every task and fold all failures into one error
    pub async fn wait_all_checked(self) -> DroidpackResult<Vec<T>> {
        let mut values = Vec::new();
        let mut errors = ErrorList::new();
        for outcome in self.wait_all().await {
            match outcome.result {
                Ok(v) => values.push(v),
                Err(e) => errors.push(e),
            }
        }
        errors.into_result()?;
        Ok(values)
    }
}
