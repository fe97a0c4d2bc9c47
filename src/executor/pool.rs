//! Bounded worker pool.
//!
//! Jobs are started in FIFO order and at most `workers` of them are in
//! flight at once. Each job runs on its own tokio task and handles one case
//! end to end. Results are handed to a single sink in completion order.
use std::{future::Future, time::Duration};

use futures::{stream, StreamExt};
use tokio::{sync::watch, time};
use tracing::warn;

use crate::errors::{RichResult, UnitsError};

/// Default number of workers.
pub const DEFAULT_WORKERS: usize = 4;

/// How long in-flight jobs get to wind down after an interrupt.
pub const GRACE_PERIOD: Duration = Duration::from_secs(2);

/// Receiving side of a cancellation flag.
#[derive(Clone, Debug)]
pub struct CancelToken(watch::Receiver<bool>);

impl CancelToken {
    /// A token and the sender that trips it.
    pub fn new() -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(false);
        (tx, CancelToken(rx))
    }

    /// A token that is never tripped.
    pub fn never() -> Self {
        CancelToken::new().1
    }

    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once the flag is set. Never resolves if the sender is gone
    /// without setting it.
    pub async fn cancelled(&mut self) {
        while !*self.0.borrow_and_update() {
            if self.0.changed().await.is_err() {
                futures::future::pending::<()>().await;
            }
        }
    }
}

/// How a pool run ended.
#[derive(Debug, PartialEq, Eq)]
pub enum Completion {
    /// Every job ran.
    Drained,
    /// An interrupt arrived; queued jobs were dropped unexecuted.
    Interrupted,
}

pub struct Pool {
    workers: usize,
}

impl Pool {
    pub fn new(workers: usize) -> Self {
        Pool {
            workers: workers.max(1),
        }
    }

    /// Run `jobs`, feeding each produced value (or error) to `sink`.
    ///
    /// A job returning `Ok(None)` produced nothing, which is what abandoned
    /// jobs do after observing cancellation. When `interrupt` resolves, the
    /// pool stops dispatching, trips every job's [`CancelToken`], and waits
    /// up to the grace period for in-flight jobs before returning
    /// [`Completion::Interrupted`].
    pub async fn run<J, Fut, T, S, I>(
        &self,
        jobs: Vec<J>,
        interrupt: I,
        mut sink: S,
    ) -> Completion
    where
        J: FnOnce(CancelToken) -> Fut,
        Fut: Future<Output = Result<Option<T>, UnitsError>> + Send + 'static,
        T: Send + 'static,
        S: FnMut(Result<T, UnitsError>),
        I: Future<Output = ()>,
    {
        let (cancel_tx, token) = CancelToken::new();

        let mut results = stream::iter(jobs.into_iter().map(|job| {
            let token = token.clone();
            async move {
                // Checked when the job is popped off the queue.
                if token.is_cancelled() {
                    return Ok(None);
                }
                tokio::spawn(job(token))
                    .await
                    .map_err(|err| UnitsError::Worker(err.to_string()))
                    .collapse()
            }
        }))
        .buffer_unordered(self.workers);

        tokio::pin!(interrupt);
        loop {
            tokio::select! {
                next = results.next() => match next {
                    Some(Ok(Some(value))) => sink(Ok(value)),
                    Some(Ok(None)) => {}
                    Some(Err(err)) => sink(Err(err)),
                    None => return Completion::Drained,
                },
                _ = &mut interrupt => break,
            }
        }

        warn!("interrupted, stopping workers");
        let _ = cancel_tx.send(true);
        let drain = async { while results.next().await.is_some() {} };
        if time::timeout(GRACE_PERIOD, drain).await.is_err() {
            warn!("workers did not stop within {:?}", GRACE_PERIOD);
        }
        Completion::Interrupted
    }
}
