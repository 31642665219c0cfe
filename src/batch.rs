//! Multi-subject processing.
//!
//! A batch runs one job per [`SubjectKey`]. Each key is handled by exactly
//! one worker, and one subject's failure never stops the others.

use std::io;
use std::thread;

use crossbeam_channel::unbounded;

use crate::error::{OphysError, Result};
use crate::subject::SubjectKey;
use crate::types::ContainerId;

/// Where a subject came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Origin {
    /// Decoded from an existing cache record.
    Cached,
    /// Assembled from the data source and written to the cache.
    Computed,
}

/// Outcome of a batch run.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Number of subjects attempted.
    pub total: usize,
    /// Subjects assembled during this run.
    pub computed: Vec<ContainerId>,
    /// Subjects already present in the cache.
    pub cached: Vec<ContainerId>,
    /// Subjects that failed, with the reason.
    pub failed: Vec<(ContainerId, OphysError)>,
}

impl BatchReport {
    /// Creates an empty report for `total` subjects.
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Default::default()
        }
    }

    /// Records one subject's outcome.
    pub fn record(&mut self, container: ContainerId, outcome: &Result<Origin>) {
        match outcome {
            Ok(Origin::Cached) => self.cached.push(container),
            Ok(Origin::Computed) => self.computed.push(container),
            Err(_) => {}
        }
    }

    /// Records a failure.
    pub fn fail(&mut self, container: ContainerId, error: OphysError) {
        self.failed.push((container, error));
    }

    /// Number of subjects that completed.
    pub fn succeeded(&self) -> usize {
        self.computed.len() + self.cached.len()
    }

    /// Returns true if no subject failed.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Ids of the failed subjects.
    pub fn failed_ids(&self) -> Vec<ContainerId> {
        self.failed.iter().map(|(id, _)| *id).collect()
    }
}

/// Runs `job` once per key and returns the results in key order.
///
/// With `workers <= 1` the keys are processed sequentially on the calling
/// thread. Otherwise up to `workers` scoped threads pull key indices from a
/// shared queue. The job receives the key's index along with the key.
pub fn run<T, F>(keys: &[SubjectKey], workers: usize, job: F) -> Vec<Result<T>>
where
    T: Send,
    F: Fn(usize, &SubjectKey) -> Result<T> + Sync,
{
    let total = keys.len();
    if workers <= 1 || total <= 1 {
        return keys
            .iter()
            .enumerate()
            .map(|(index, key)| job(index, key))
            .collect();
    }

    let (task_tx, task_rx) = unbounded::<usize>();
    for index in 0..total {
        // Receiver is alive until the scope below ends.
        let _ = task_tx.send(index);
    }
    drop(task_tx);

    let (done_tx, done_rx) = unbounded::<(usize, Result<T>)>();
    let job = &job;
    thread::scope(|scope| {
        for _ in 0..workers.min(total) {
            let task_rx = task_rx.clone();
            let done_tx = done_tx.clone();
            scope.spawn(move || {
                for index in task_rx.iter() {
                    if done_tx.send((index, job(index, &keys[index]))).is_err() {
                        break;
                    }
                }
            });
        }
    });
    drop(done_tx);

    let mut slots: Vec<Option<Result<T>>> = (0..total).map(|_| None).collect();
    for (index, result) in done_rx.try_iter() {
        slots[index] = Some(result);
    }
    slots
        .into_iter()
        .map(|slot| {
            slot.unwrap_or_else(|| {
                Err(OphysError::Io(io::Error::other("batch worker stopped early")))
            })
        })
        .collect()
}
