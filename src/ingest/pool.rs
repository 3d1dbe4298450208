// src/ingest/pool.rs
//! Bounded worker pool with a single global deadline.
//!
//! - At most `limit` tasks are in flight at any moment.
//! - A task is only started while the deadline has not passed; later ones are `Skipped`.
//! - Errors and panics are captured per task; `run` always completes.
//!
//! Time is `tokio::time::Instant`, so tests drive it with a paused clock.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::{stream, FutureExt, StreamExt};
use metrics::counter;
use tokio::time::Instant;

/// Wall-clock cutoff after which no new network work is started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
        }
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.at
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }
}

/// How a single task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome<T, E> {
    Completed(T),
    Failed(E),
    /// Not started because the deadline had passed.
    Skipped,
    Panicked,
}

impl<T, E> TaskOutcome<T, E> {
    pub fn is_skipped(&self) -> bool {
        matches!(self, TaskOutcome::Skipped)
    }

    pub fn completed(self) -> Option<T> {
        match self {
            TaskOutcome::Completed(v) => Some(v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    limit: usize,
}

impl WorkerPool {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Run `tasks` and return their outcomes in task order.
    pub async fn run<T, E, F, Fut>(&self, tasks: Vec<F>, deadline: Deadline) -> Vec<TaskOutcome<T, E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let total = tasks.len();
        let mut done: Vec<(usize, TaskOutcome<T, E>)> = stream::iter(tasks.into_iter().enumerate())
            .map(|(idx, task)| async move {
                // Checked when the task is first polled, i.e. when a slot frees up.
                if deadline.is_expired() {
                    return (idx, TaskOutcome::Skipped);
                }
                let outcome = match AssertUnwindSafe(task()).catch_unwind().await {
                    Ok(Ok(v)) => TaskOutcome::Completed(v),
                    Ok(Err(e)) => TaskOutcome::Failed(e),
                    Err(_) => {
                        tracing::error!(target: "stream", task = idx, "pool task panicked");
                        TaskOutcome::Panicked
                    }
                };
                (idx, outcome)
            })
            .buffer_unordered(self.limit)
            .collect()
            .await;

        done.sort_by_key(|(idx, _)| *idx);
        let skipped = done.iter().filter(|(_, o)| o.is_skipped()).count();
        if skipped > 0 {
            counter!("stream_tasks_skipped_total").increment(skipped as u64);
            tracing::debug!(target: "stream", skipped, total, "deadline reached before all tasks started");
        }
        done.into_iter().map(|(_, o)| o).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn never_exceeds_limit() {
        let in_flight = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let tasks: Vec<_> = (0..10)
            .map(|i| {
                let in_flight = &in_flight;
                let peak = &peak;
                move || async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10 + i)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, ()>(i)
                }
            })
            .collect();

        let out = WorkerPool::new(3)
            .run(tasks, Deadline::after(Duration::from_secs(60)))
            .await;

        assert_eq!(peak.load(Ordering::SeqCst), 3);
        let values: Vec<u64> = out.into_iter().filter_map(TaskOutcome::completed).collect();
        assert_eq!(values, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test(start_paused = true)]
    async fn tasks_after_deadline_are_skipped() {
        // limit 1, each task takes 100ms, deadline 250ms → tasks 0,1,2 start; 3,4 skipped.
        let tasks: Vec<_> = (0..5)
            .map(|i| {
                move || async move {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok::<_, ()>(i)
                }
            })
            .collect();

        let out = WorkerPool::new(1)
            .run(tasks, Deadline::after(Duration::from_millis(250)))
            .await;

        assert_eq!(
            out,
            vec![
                TaskOutcome::Completed(0),
                TaskOutcome::Completed(1),
                TaskOutcome::Completed(2),
                TaskOutcome::Skipped,
                TaskOutcome::Skipped,
            ]
        );
    }

    #[tokio::test]
    async fn failures_and_panics_do_not_propagate() {
        let tasks: Vec<Box<dyn FnOnce() -> futures::future::BoxFuture<'static, Result<u8, String>>>> = vec![
            Box::new(|| async { Ok::<u8, String>(1) }.boxed()),
            Box::new(|| async { Err::<u8, String>("boom".to_string()) }.boxed()),
            Box::new(|| {
                async {
                    if true {
                        panic!("task blew up");
                    }
                    Ok::<u8, String>(0)
                }
                .boxed()
            }),
        ];

        let out = WorkerPool::new(2)
            .run(tasks, Deadline::after(Duration::from_secs(5)))
            .await;

        assert_eq!(out[0], TaskOutcome::Completed(1));
        assert_eq!(out[1], TaskOutcome::Failed("boom".to_string()));
        assert_eq!(out[2], TaskOutcome::Panicked);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_deadline_starts_nothing() {
        let deadline = Deadline::after(Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(deadline.is_expired());
        assert_eq!(deadline.remaining(), Duration::ZERO);

        let tasks: Vec<_> = (0..3).map(|i| move || async move { Ok::<_, ()>(i) }).collect();
        let out = WorkerPool::new(4).run(tasks, deadline).await;
        assert!(out.iter().all(TaskOutcome::is_skipped));
    }
}
