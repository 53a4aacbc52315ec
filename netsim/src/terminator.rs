//! Shut the simulation down once every receiver has finished.

use crate::{Completion, Report};
use commonware_runtime::{Handle, Spawner};
use futures::channel::oneshot;
use std::sync::Arc;
use tracing::{error, info};

/// Outcome of a completed run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Summary {
    /// Final totals of every receiver, ordered by receiver address.
    pub reports: Vec<Report>,
}

/// Task that waits for the [Completion] signal and then aborts every other
/// task.
///
/// This is the only task that stops other tasks.
pub struct Terminator<E: Spawner> {
    context: E,
    completion: Arc<Completion>,
    signal: oneshot::Receiver<Vec<Report>>,
    tasks: Vec<(String, Handle<()>)>,
}

impl<E: Spawner> Terminator<E> {
    /// Create a terminator that aborts `tasks` (named for logging) once
    /// `signal` fires.
    pub fn new(
        context: E,
        completion: Arc<Completion>,
        signal: oneshot::Receiver<Vec<Report>>,
        tasks: Vec<(String, Handle<()>)>,
    ) -> Self {
        Self {
            context,
            completion,
            signal,
            tasks,
        }
    }

    /// Start waiting for completion.
    ///
    /// The returned handle resolves to the final reports once every task has
    /// been aborted. If completion never fires, it never resolves.
    pub fn start(self) -> Handle<Summary> {
        self.context.clone().spawn(|_| self.run())
    }

    async fn run(self) -> Summary {
        let reports = match self.signal.await {
            Ok(reports) => reports,
            Err(err) => {
                error!(?err, "completion signal dropped");
                Vec::new()
            }
        };

        info!("simulation complete, suspending all tasks");
        for (name, task) in &self.tasks {
            task.abort();
            info!(task = name.as_str(), "suspended task");
        }
        self.completion.suspend();
        for report in &reports {
            info!(
                receiver = report.receiver,
                total = report.received,
                lost = report.lost,
                "final stats",
            );
        }
        Summary { reports }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Phase;
    use commonware_macros::{select, test_traced};
    use commonware_runtime::{deterministic, Clock, Metrics, Runner};
    use std::{
        collections::BTreeMap,
        sync::atomic::{AtomicU64, Ordering},
        time::Duration,
    };

    #[test_traced]
    fn test_aborts_tasks_on_completion() {
        let executor = deterministic::Runner::seeded(0);
        executor.start(|context| async move {
            // A task that ticks forever unless aborted
            let ticks = Arc::new(AtomicU64::new(0));
            let ticker = context.with_label("ticker").spawn({
                let ticks = ticks.clone();
                move |context| async move {
                    loop {
                        ticks.fetch_add(1, Ordering::Relaxed);
                        context.sleep(Duration::from_millis(10)).await;
                    }
                }
            });

            let (completion, signal) = Completion::new(1);
            let terminator = Terminator::new(
                context.with_label("terminator"),
                completion.clone(),
                signal,
                vec![("ticker".to_string(), ticker)],
            )
            .start();

            // Nothing happens before completion
            context.sleep(Duration::from_millis(100)).await;
            assert!(ticks.load(Ordering::Relaxed) > 0);
            assert_eq!(completion.phase(), Phase::Running);

            let report = Report {
                receiver: 3,
                received: 1,
                lost: 0,
                last_seen: BTreeMap::from([(1, 0)]),
            };
            assert!(completion.finish(report.clone()));
            let summary = terminator.await.unwrap();
            assert_eq!(summary.reports, vec![report]);
            assert_eq!(completion.phase(), Phase::Suspended);

            // The ticker no longer runs
            let stopped = ticks.load(Ordering::Relaxed);
            context.sleep(Duration::from_millis(100)).await;
            assert_eq!(ticks.load(Ordering::Relaxed), stopped);
        });
    }

    #[test_traced]
    fn test_waits_without_completion() {
        let executor = deterministic::Runner::seeded(0);
        executor.start(|context| async move {
            let (completion, signal) = Completion::new(2);
            let terminator = Terminator::new(
                context.with_label("terminator"),
                completion.clone(),
                signal,
                Vec::new(),
            )
            .start();

            // One receiver finishing is not enough
            completion.finish(Report {
                receiver: 3,
                received: 1,
                lost: 0,
                last_seen: BTreeMap::new(),
            });
            select! {
                _ = terminator => {
                    panic!("terminated without completion");
                },
                _ = context.sleep(Duration::from_secs(5)) => {},
            };
            assert_eq!(completion.phase(), Phase::Draining);
        });
    }
}
