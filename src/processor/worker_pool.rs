//! Bounded producer/worker/collector pool.
//!
//! A producer task feeds a bounded task queue, `workers` tasks pull from it
//! and push results into a bounded result channel, and the calling task drains
//! that channel as the single collector. The producer stops enqueuing once the
//! token fires; workers always drain what was already queued so every issued
//! task yields a result. Handlers are responsible for returning promptly when
//! cancelled. Dropping the pool future aborts the producer and every worker.

use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

/// Counters describing one pool run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct PoolSummary {
    pub issued: usize,
    pub delivered: usize,
    pub panicked_workers: usize,
}

impl PoolSummary {
    pub(crate) fn missing(&self) -> usize {
        self.issued.saturating_sub(self.delivered)
    }
}

/// Spawned pool task that is aborted if the pool is dropped before joining it.
struct PoolTask<T>(JoinHandle<T>);

impl<T> PoolTask<T> {
    async fn join(&mut self) -> Result<T, JoinError> {
        (&mut self.0).await
    }
}

impl<T> Drop for PoolTask<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Runs `handler` over `tasks` with at most `workers` concurrent invocations and
/// hands every result to `collect` on the calling task. Returns once the
/// producer and all workers have exited.
pub(crate) async fn run_pool<T, R, I, H, Fut, C>(
    label: &'static str,
    tasks: I,
    workers: usize,
    token: &CancellationToken,
    handler: H,
    mut collect: C,
) -> PoolSummary
where
    T: Send + 'static,
    R: Send + 'static,
    I: IntoIterator<Item = T>,
    I::IntoIter: Send + 'static,
    H: Fn(usize, T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    C: FnMut(R),
{
    let workers = workers.max(1);
    let (task_tx, task_rx) = mpsc::channel::<T>(workers.saturating_mul(2));
    let (result_tx, mut result_rx) = mpsc::channel::<R>(workers.saturating_mul(2));

    let mut producer = PoolTask(spawn_producer(
        label,
        tasks.into_iter(),
        task_tx,
        token.clone(),
    ));

    let task_rx = Arc::new(Mutex::new(task_rx));
    let handler = Arc::new(handler);
    let mut handles: Vec<PoolTask<bool>> = Vec::with_capacity(workers);

    for worker_id in 0..workers {
        let task_rx = task_rx.clone();
        let result_tx = result_tx.clone();
        let handler = handler.clone();

        handles.push(PoolTask(tokio::spawn(async move {
            let run = worker_loop(worker_id, task_rx, result_tx, handler);
            match std::panic::AssertUnwindSafe(run).catch_unwind().await {
                Ok(()) => true,
                Err(panic_payload) => {
                    let panic_msg = panic_message(panic_payload.as_ref());
                    tracing::error!(
                        pool = label,
                        worker = worker_id,
                        panic = %panic_msg,
                        "pool worker panicked"
                    );
                    false
                }
            }
        })));
    }

    // The pool's own handles must go so the channels close once workers finish.
    drop(task_rx);
    drop(result_tx);

    let mut delivered = 0;
    while let Some(result) = result_rx.recv().await {
        delivered += 1;
        collect(result);
    }

    let mut panicked_workers = 0;
    for mut handle in handles {
        match handle.join().await {
            Ok(true) => {}
            Ok(false) => panicked_workers += 1,
            Err(err) => {
                tracing::error!(pool = label, error = %err, "pool worker join failed");
                panicked_workers += 1;
            }
        }
    }

    let issued = match producer.join().await {
        Ok(issued) => issued,
        Err(err) => {
            tracing::error!(pool = label, error = %err, "pool producer join failed");
            delivered
        }
    };

    let summary = PoolSummary {
        issued,
        delivered,
        panicked_workers,
    };
    tracing::debug!(
        pool = label,
        issued = summary.issued,
        delivered = summary.delivered,
        panicked_workers = summary.panicked_workers,
        "worker pool drained"
    );
    summary
}

fn spawn_producer<T, I>(
    label: &'static str,
    tasks: I,
    task_tx: mpsc::Sender<T>,
    token: CancellationToken,
) -> JoinHandle<usize>
where
    T: Send + 'static,
    I: Iterator<Item = T> + Send + 'static,
{
    tokio::spawn(async move {
        let mut issued = 0;
        for task in tasks {
            let sent = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    tracing::debug!(pool = label, issued, "producer stopped by cancellation");
                    break;
                }
                sent = task_tx.send(task) => sent,
            };
            if sent.is_err() {
                tracing::warn!(pool = label, issued, "task queue closed before producer finished");
                break;
            }
            issued += 1;
        }
        issued
    })
}

#[tracing::instrument(name = "pool_worker", skip_all, fields(worker = worker_id))]
async fn worker_loop<T, R, H, Fut>(
    worker_id: usize,
    task_rx: Arc<Mutex<mpsc::Receiver<T>>>,
    result_tx: mpsc::Sender<R>,
    handler: Arc<H>,
) where
    H: Fn(usize, T) -> Fut,
    Fut: Future<Output = R>,
{
    loop {
        let next = {
            let mut rx = task_rx.lock().await;
            rx.recv().await
        };
        let Some(task) = next else {
            break;
        };

        let result = handler(worker_id, task).await;
        if result_tx.send(result).await.is_err() {
            tracing::warn!("result channel closed, worker exiting");
            break;
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
