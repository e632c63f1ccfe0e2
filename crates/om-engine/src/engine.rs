//! C10: ParallelizationEngine — spawns one collector and N-1 workers over
//! an in-process channel transport (spec.md §9's sanctioned replacement
//! for the original's MPI ranks), wires up graceful shutdown on SIGINT,
//! and waits for the termination quorum.

use tokio::sync::{mpsc, watch};

use common::{OmError, OmResult};

use crate::collector::{run_collector, CollectorContext, CollectorReport};
use crate::message::WorkerMsg;
use crate::worker::{run_worker, WorkerContext};

/// Default depth of the worker-to-collector channel. Spec.md §5 notes
/// worker-to-master traffic has no explicit backpressure policy of its
/// own beyond the transport's buffer; a bounded channel gives exactly
/// that "fills up, then throttles" behavior.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

pub struct EngineReport {
    pub collector: CollectorReport,
}

/// Run the full master/worker pool to completion. `workers` must carry
/// ranks `1..=workers.len()`; rank 0 is the collector role, realized here
/// as this function's own collector task rather than a separate worker.
pub async fn run_engine(
    workers: Vec<WorkerContext>,
    collector_ctx: CollectorContext,
    channel_capacity: usize,
) -> OmResult<EngineReport> {
    let num_workers = workers.len();
    if collector_ctx.num_workers != num_workers {
        return Err(OmError::Protocol(format!(
            "collector configured for {} workers but {} were provided",
            collector_ctx.num_workers, num_workers
        )));
    }
    let pool_size = num_workers + 1;

    let (tx, rx) = mpsc::channel::<WorkerMsg>(channel_capacity);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let collector_shutdown = shutdown_tx.clone();
    let collector_handle = tokio::spawn(run_collector(collector_ctx, rx, collector_shutdown));

    let mut worker_handles = Vec::with_capacity(num_workers);
    for ctx in workers {
        let tx = tx.clone();
        let shutdown_rx = shutdown_rx.clone();
        worker_handles.push(tokio::spawn(run_worker(ctx, tx, shutdown_rx, pool_size)));
    }
    // The engine's own sender must be dropped too, or the channel never
    // closes once every worker's clone is gone.
    drop(tx);

    let sigint_shutdown = shutdown_tx.clone();
    let sigint_handle = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received interrupt signal, initiating graceful shutdown");
            let _ = sigint_shutdown.send(true);
        }
    });

    let mut worker_errors = Vec::new();
    for handle in worker_handles {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => worker_errors.push(e.to_string()),
            Err(e) => worker_errors.push(format!("worker task panicked: {e}")),
        }
    }

    let collector = match collector_handle.await {
        Ok(Ok(report)) => report,
        Ok(Err(e)) => return Err(e),
        Err(e) => return Err(OmError::Protocol(format!("collector task panicked: {e}"))),
    };

    sigint_handle.abort();

    if !worker_errors.is_empty() {
        return Err(OmError::Protocol(format!(
            "worker pool finished with errors: {}",
            worker_errors.join("; ")
        )));
    }

    Ok(EngineReport { collector })
}
