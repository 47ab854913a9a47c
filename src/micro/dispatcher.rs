//! Scheduling of per-market computations.
//!
//! The dispatcher visits every market exactly once. In sequential mode markets
//! run on the calling thread in canonical order. In pool mode a feeder thread
//! builds work items into a bounded queue, worker threads compute them, and
//! completions flow back over a channel to the caller, which is the only
//! writer of the aggregate.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use crossbeam_channel::{bounded, unbounded};
use tracing::debug;

use crate::config::Scheduling;
use crate::error::{BlpError, BlpResult, ExecutionError};
use crate::market::MarketId;

use super::computation::{MarketComputation, MarketOutcome};
use super::work_item::{MarketWorkItem, Partitioner};

type Completion = (MarketId, Result<MarketOutcome, ExecutionError>);

/// Fans market work out and completions back in.
#[derive(Debug, Clone, Copy)]
pub struct Dispatcher {
    scheduling: Scheduling,
}

impl Dispatcher {
    /// Create a dispatcher with the given scheduling.
    #[must_use]
    pub const fn new(scheduling: Scheduling) -> Self {
        Self { scheduling }
    }

    /// Run `computation` for every market, handing each completion to `on_complete`.
    ///
    /// Completions arrive in canonical order when sequential and in completion
    /// order otherwise. A panicking computation, or an error returned by
    /// `on_complete`, aborts the batch: no further markets are scheduled and the
    /// error is returned.
    ///
    /// # Errors
    ///
    /// `ExecutionError::MarketPanicked` for a panicking computation, whatever
    /// `on_complete` returns, and `ExecutionError::Disconnected` if the pool
    /// stops before every market completes.
    pub fn run<C, F>(&self, partitioner: &Partitioner<'_>, computation: &C, on_complete: F) -> BlpResult<()>
    where
        C: MarketComputation + ?Sized,
        F: FnMut(MarketId, MarketOutcome) -> BlpResult<()>,
    {
        match self.scheduling {
            Scheduling::Sequential => run_sequential(partitioner, computation, on_complete),
            Scheduling::Pool {
                workers,
                queue_capacity,
            } => run_pool(partitioner, computation, workers.max(1), queue_capacity.max(1), on_complete),
        }
    }
}

fn run_sequential<C, F>(partitioner: &Partitioner<'_>, computation: &C, mut on_complete: F) -> BlpResult<()>
where
    C: MarketComputation + ?Sized,
    F: FnMut(MarketId, MarketOutcome) -> BlpResult<()>,
{
    for market in partitioner.market_ids() {
        let item = partitioner.work_item(market);
        let outcome = guarded(computation, &item)?;
        on_complete(market.clone(), outcome)?;
    }
    Ok(())
}

fn run_pool<C, F>(
    partitioner: &Partitioner<'_>,
    computation: &C,
    workers: usize,
    queue_capacity: usize,
    mut on_complete: F,
) -> BlpResult<()>
where
    C: MarketComputation + ?Sized,
    F: FnMut(MarketId, MarketOutcome) -> BlpResult<()>,
{
    let expected = partitioner.market_ids().len();
    let abort = AtomicBool::new(false);
    let (job_tx, job_rx) = bounded::<MarketWorkItem>(queue_capacity);
    let (done_tx, done_rx) = unbounded::<Completion>();

    thread::scope(|scope| {
        let abort = &abort;

        thread::Builder::new()
            .name("blpsim-feeder".to_string())
            .spawn_scoped(scope, move || {
                for market in partitioner.market_ids() {
                    if abort.load(Ordering::Acquire) {
                        break;
                    }
                    if job_tx.send(partitioner.work_item(market)).is_err() {
                        break;
                    }
                }
                // Dropping the sender lets workers drain the queue and exit.
            })
            .expect("failed to spawn blpsim feeder");

        for idx in 0..workers {
            let rx = job_rx.clone();
            let tx = done_tx.clone();
            thread::Builder::new()
                .name(format!("blpsim-market-{idx}"))
                .spawn_scoped(scope, move || {
                    for item in &rx {
                        if abort.load(Ordering::Acquire) {
                            continue;
                        }
                        let result = guarded(computation, &item);
                        if tx.send((item.market_id().clone(), result)).is_err() {
                            break;
                        }
                    }
                })
                .expect("failed to spawn blpsim market worker");
        }
        drop(job_rx);
        drop(done_tx);

        let mut received = 0;
        for (market, result) in &done_rx {
            received += 1;
            let step = result
                .map_err(BlpError::from)
                .and_then(|outcome| on_complete(market, outcome));
            if let Err(err) = step {
                abort.store(true, Ordering::Release);
                return Err(err);
            }
        }
        if received != expected {
            return Err(ExecutionError::Disconnected.into());
        }
        debug!(markets = received, workers, "market pool drained");
        Ok(())
    })
}

fn guarded<C>(computation: &C, item: &MarketWorkItem) -> Result<MarketOutcome, ExecutionError>
where
    C: MarketComputation + ?Sized,
{
    panic::catch_unwind(AssertUnwindSafe(|| computation.compute(item))).map_err(|payload| {
        ExecutionError::MarketPanicked {
            market: item.market_id().clone(),
            message: panic_message(payload.as_ref()),
        }
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
