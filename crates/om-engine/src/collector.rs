//! C9: CollectNode — the master's receive loop. Updates the rolling
//! hit/saturation windows and the data accumulator, broadcasts tagged
//! snapshots, and prints a periodic speed report.

use std::collections::HashSet;
use std::time::Instant;

use tokio::sync::{mpsc, watch};

use common::{OmError, OmResult};
use om_broadcast::{Broadcaster, TAG_ONDADATA, TAG_ONDAFRAMEDATA};
use om_core::{DataAccumulator, ProcessedRecord, RollingWindow};

use crate::message::WorkerMsg;

pub struct CollectorContext {
    pub num_workers: usize,
    pub running_average_window_size: usize,
    pub num_events_to_accumulate: usize,
    pub speed_report_interval: u64,
    pub geometry_is_optimized: bool,
    pub broadcaster: Broadcaster,
}

/// Summary returned once the collector has received every worker's
/// termination token.
#[derive(Debug, Clone, Copy, Default)]
pub struct CollectorReport {
    pub num_collected_events: u64,
}

/// Run the collector loop until every worker (by rank) has sent exactly
/// one termination token, or the channel closes early. `shutdown` is set
/// when the engine wants every worker to stop (SIGINT); the collector
/// itself only stops once the termination quorum — or channel closure —
/// says there is nothing left to receive.
pub async fn run_collector(
    mut ctx: CollectorContext,
    mut rx: mpsc::Receiver<WorkerMsg>,
    shutdown: watch::Sender<bool>,
) -> OmResult<CollectorReport> {
    let mut hit_rate_window = RollingWindow::new(ctx.running_average_window_size);
    let mut saturation_rate_window = RollingWindow::new(ctx.running_average_window_size);
    let mut accumulator: DataAccumulator<ProcessedRecord> =
        DataAccumulator::new(ctx.num_events_to_accumulate);

    let mut num_collected_events: u64 = 0;
    let mut terminated_ranks: HashSet<usize> = HashSet::new();
    let mut last_report_time = Instant::now();
    let mut last_report_count: u64 = 0;

    while terminated_ranks.len() < ctx.num_workers {
        let msg = match rx.recv().await {
            Some(msg) => msg,
            None => {
                tracing::warn!(
                    received = terminated_ranks.len(),
                    expected = ctx.num_workers,
                    "worker channel closed before every termination token arrived"
                );
                break;
            }
        };

        match msg {
            WorkerMsg::Data(mut record) => {
                num_collected_events += 1;
                hit_rate_window.push(if record.frame_is_hit { 1.0 } else { 0.0 });
                saturation_rate_window.push(if record.frame_is_saturated { 1.0 } else { 0.0 });
                record.hit_rate = hit_rate_window.mean();
                record.saturation_rate = saturation_rate_window.mean();
                record.geometry_is_optimized = ctx.geometry_is_optimized;

                if let Some(detector_data) = record.detector_data.take() {
                    let mut sample = record.clone();
                    sample.detector_data = Some(detector_data);
                    ctx.broadcaster.send(TAG_ONDAFRAMEDATA, &[sample]);
                }

                if let Some(batch) = accumulator.add(record) {
                    ctx.broadcaster.send(TAG_ONDADATA, &batch);
                }

                if num_collected_events % ctx.speed_report_interval == 0 {
                    let elapsed = last_report_time.elapsed();
                    let delta = num_collected_events - last_report_count;
                    let hz = delta as f64 / elapsed.as_secs_f64().max(1e-9);
                    tracing::info!(
                        num_collected_events,
                        hz = format!("{hz:.2}"),
                        "speed report"
                    );
                    last_report_time = Instant::now();
                    last_report_count = num_collected_events;
                }
            }
            WorkerMsg::End { worker_rank } | WorkerMsg::Dead { worker_rank } => {
                if !terminated_ranks.insert(worker_rank) {
                    let _ = shutdown.send(true);
                    return Err(OmError::Protocol(format!(
                        "worker {worker_rank} sent more than one termination token"
                    )));
                }
                tracing::info!(
                    worker_rank,
                    terminated = terminated_ranks.len(),
                    expected = ctx.num_workers,
                    "worker finalized"
                );
            }
        }
    }

    tracing::info!(num_collected_events, "all workers terminated, shutting down");
    Ok(CollectorReport {
        num_collected_events,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record(is_hit: bool) -> ProcessedRecord {
        ProcessedRecord {
            timestamp: 0.0,
            frame_is_hit: is_hit,
            frame_is_saturated: false,
            hit_rate: 0.0,
            saturation_rate: 0.0,
            beam_energy: 9500.0,
            detector_distance: 120.0,
            native_data_shape: (64, 64),
            geometry_is_optimized: false,
            peak_list: om_core::PeakList::empty(),
            detector_data: None,
        }
    }

    #[tokio::test]
    async fn test_s7_termination_quorum() {
        let (tx, rx) = mpsc::channel(64);
        let (shutdown_tx, _shutdown_rx) = watch::channel(false);
        let broadcaster = Broadcaster::bind(Some("127.0.0.1".into()), 0).unwrap();

        let ctx = CollectorContext {
            num_workers: 3,
            running_average_window_size: 4,
            num_events_to_accumulate: 100,
            speed_report_interval: 1000,
            geometry_is_optimized: false,
            broadcaster,
        };

        let handle = tokio::spawn(run_collector(ctx, rx, shutdown_tx));

        for rank in 1..=3 {
            tx.send(WorkerMsg::Data(sample_record(true))).await.unwrap();
            tx.send(WorkerMsg::Data(sample_record(false))).await.unwrap();
            tx.send(WorkerMsg::End { worker_rank: rank }).await.unwrap();
        }
        drop(tx);

        let report = handle.await.unwrap().unwrap();
        assert_eq!(report.num_collected_events, 6);
    }

    #[tokio::test]
    async fn test_duplicate_termination_token_is_protocol_error() {
        let (tx, rx) = mpsc::channel(64);
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let broadcaster = Broadcaster::bind(Some("127.0.0.1".into()), 0).unwrap();

        let ctx = CollectorContext {
            num_workers: 2,
            running_average_window_size: 4,
            num_events_to_accumulate: 100,
            speed_report_interval: 1000,
            geometry_is_optimized: false,
            broadcaster,
        };

        let handle = tokio::spawn(run_collector(ctx, rx, shutdown_tx));
        tx.send(WorkerMsg::End { worker_rank: 1 }).await.unwrap();
        tx.send(WorkerMsg::End { worker_rank: 1 }).await.unwrap();
        drop(tx);

        let result = handle.await.unwrap();
        assert!(result.is_err());
        assert!(*shutdown_rx.borrow_and_update());
    }
}
