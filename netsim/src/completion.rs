//! One-shot signal raised when every receiver reaches its stop threshold.

use crate::Report;
use futures::channel::oneshot;
use std::{
    mem,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

/// Lifecycle of a simulation run.
///
/// A run only moves forward. Starting over requires a new [crate::Simulation].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// No receiver has reached its stop threshold.
    Running,

    /// Some, but not all, receivers have reached their stop threshold.
    Draining,

    /// Every receiver has reached its stop threshold.
    Complete,

    /// Every task has been aborted.
    Suspended,
}

/// Completion shared by the receivers (which finish) and the terminator (which
/// waits).
///
/// The finished count is incremented atomically and only the increment that
/// reaches the number of receivers fires the signal, so the signal fires exactly
/// once no matter how receivers race to finish.
pub struct Completion {
    receivers: usize,
    finished: AtomicUsize,
    suspended: AtomicBool,

    reports: Mutex<Vec<Report>>,
    signal: Mutex<Option<oneshot::Sender<Vec<Report>>>>,
}

impl Completion {
    /// Create a completion for `receivers` receivers.
    ///
    /// Returns the shared completion and the receiving end of its signal, which
    /// resolves to the final report of every receiver.
    pub fn new(receivers: usize) -> (Arc<Self>, oneshot::Receiver<Vec<Report>>) {
        let (sender, receiver) = oneshot::channel();
        let completion = Self {
            receivers,
            finished: AtomicUsize::new(0),
            suspended: AtomicBool::new(false),
            reports: Mutex::new(Vec::with_capacity(receivers)),
            signal: Mutex::new(Some(sender)),
        };
        (Arc::new(completion), receiver)
    }

    /// Record that a receiver reached its stop threshold.
    ///
    /// Returns `true` if this was the last receiver to finish (and the signal
    /// was fired).
    pub fn finish(&self, report: Report) -> bool {
        // Store the report before counting it, so whoever observes the final
        // count also observes every report
        self.reports.lock().unwrap().push(report);
        let finished = self.finished.fetch_add(1, Ordering::AcqRel) + 1;
        if finished != self.receivers {
            return false;
        }

        let mut reports = mem::take(&mut *self.reports.lock().unwrap());
        reports.sort_by_key(|report| report.receiver);
        if let Some(signal) = self.signal.lock().unwrap().take() {
            let _ = signal.send(reports);
        }
        true
    }

    /// Record that every task has been aborted.
    pub fn suspend(&self) {
        self.suspended.store(true, Ordering::Release);
    }

    /// Current phase of the run.
    pub fn phase(&self) -> Phase {
        if self.suspended.load(Ordering::Acquire) {
            return Phase::Suspended;
        }
        match self.finished.load(Ordering::Acquire) {
            0 => Phase::Running,
            finished if finished < self.receivers => Phase::Draining,
            _ => Phase::Complete,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{collections::BTreeMap, thread};

    fn report(receiver: u8) -> Report {
        Report {
            receiver,
            received: 200,
            lost: 0,
            last_seen: BTreeMap::new(),
        }
    }

    #[test]
    fn test_phases() {
        let (completion, mut signal) = Completion::new(2);
        assert_eq!(completion.phase(), Phase::Running);

        assert!(!completion.finish(report(4)));
        assert_eq!(completion.phase(), Phase::Draining);
        assert!(signal.try_recv().unwrap().is_none());

        assert!(completion.finish(report(3)));
        assert_eq!(completion.phase(), Phase::Complete);

        // Reports are ordered by receiver
        let reports = signal.try_recv().unwrap().unwrap();
        assert_eq!(reports, vec![report(3), report(4)]);

        completion.suspend();
        assert_eq!(completion.phase(), Phase::Suspended);
    }

    #[test]
    fn test_single_receiver() {
        let (completion, mut signal) = Completion::new(1);
        assert!(completion.finish(report(3)));
        assert_eq!(signal.try_recv().unwrap().unwrap(), vec![report(3)]);
    }

    #[test]
    fn test_signal_fires_once_under_race() {
        for _ in 0..500 {
            let (completion, mut signal) = Completion::new(2);
            let last = thread::scope(|scope| {
                let first = scope.spawn(|| completion.finish(report(3)));
                let second = scope.spawn(|| completion.finish(report(4)));
                [first.join().unwrap(), second.join().unwrap()]
            });

            // Exactly one receiver observes itself as last
            assert_eq!(last.iter().filter(|last| **last).count(), 1);
            let reports = signal.try_recv().unwrap().unwrap();
            assert_eq!(reports, vec![report(3), report(4)]);
            assert_eq!(completion.phase(), Phase::Complete);
        }
    }
}
