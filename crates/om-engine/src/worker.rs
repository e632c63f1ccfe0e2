//! C8: ProcessNode — the per-worker event loop. For each event: open,
//! scan the selected frames, extract, calibrate/correct, find peaks,
//! classify hit/saturated, and stream reduced records to the collector.

use std::collections::HashSet;

use tokio::sync::{mpsc, watch};

use common::{OmError, OmResult};
use om_core::{Correction, Peakfinder8, ProcessedRecord};
use om_source::{Event, EventSource, ExtractedField, Extractor, SourceParams};

use crate::message::WorkerMsg;

/// Hit/saturation classification thresholds, grounded on
/// `onda/processing_layer/crystallography.py::process_data`.
#[derive(Debug, Clone, Copy)]
pub struct ClassificationParams {
    pub min_num_peaks_for_hit: usize,
    pub max_num_peaks_for_hit: usize,
    pub saturation_value: f32,
    pub max_saturated_peaks: usize,
}

/// Frame-sampling counters controlling when a sampled frame's
/// `detector_data` rides along with the record. Either interval may be
/// `None` to disable sampling for that class of frame.
#[derive(Debug, Default)]
struct SendCounters {
    hit_interval: Option<u64>,
    non_hit_interval: Option<u64>,
    hit_counter: u64,
    non_hit_counter: u64,
}

impl SendCounters {
    /// Returns true, and resets the counter, iff this hit should carry
    /// raw detector data.
    fn tick_hit(&mut self) -> bool {
        match self.hit_interval {
            None => false,
            Some(interval) => {
                self.hit_counter += 1;
                if self.hit_counter >= interval {
                    self.hit_counter = 0;
                    true
                } else {
                    false
                }
            }
        }
    }

    fn tick_non_hit(&mut self) -> bool {
        match self.non_hit_interval {
            None => false,
            Some(interval) => {
                self.non_hit_counter += 1;
                if self.non_hit_counter >= interval {
                    self.non_hit_counter = 0;
                    true
                } else {
                    false
                }
            }
        }
    }
}

/// Everything a worker task needs, built once at startup by the caller
/// (reference arrays and the peakfinder are loaded once per worker and
/// treated as read-only for the worker's lifetime, per spec.md §5).
pub struct WorkerContext {
    pub rank: usize,
    pub source_string: String,
    pub event_source: Box<dyn EventSource>,
    pub extractor: Extractor,
    pub required_data: Vec<String>,
    pub num_frames_in_event_to_process: Option<usize>,
    pub frame_indexes_to_skip: HashSet<i64>,
    pub correction: Correction,
    pub peakfinder: Peakfinder8,
    pub classification: ClassificationParams,
    pub hit_frame_sending_interval: Option<u64>,
    pub non_hit_frame_sending_interval: Option<u64>,
}

/// Run the worker event loop until the event source is exhausted or a
/// shutdown is observed. Sends exactly one `WorkerMsg::End`/`Dead` before
/// returning, per spec.md §3's `TerminationToken` invariant.
pub async fn run_worker(
    mut ctx: WorkerContext,
    tx: mpsc::Sender<WorkerMsg>,
    mut shutdown: watch::Receiver<bool>,
    pool_size: usize,
) -> OmResult<()> {
    ctx.event_source
        .initialize(&ctx.source_string, pool_size, &SourceParams::default())?;
    let events = ctx.event_source.iterate(
        &ctx.source_string,
        ctx.rank,
        pool_size,
        &SourceParams::default(),
    )?;

    let mut counters = SendCounters {
        hit_interval: ctx.hit_frame_sending_interval,
        non_hit_interval: ctx.non_hit_frame_sending_interval,
        ..Default::default()
    };

    let mut shutting_down = false;
    let mut pending_send: Option<tokio::task::JoinHandle<()>> = None;

    for mut event in events {
        if *shutdown.borrow() {
            shutting_down = true;
            break;
        }

        if let Err(e) = event.open() {
            tracing::warn!(rank = ctx.rank, error = %e, "failed to open event, skipping");
            continue;
        }

        let n = event.num_frames();
        let k = ctx
            .num_frames_in_event_to_process
            .map(|limit| limit.min(n))
            .unwrap_or(n);

        for frame_offset in (n.saturating_sub(k)..n).map(|i| i as i64) {
            let current_frame = frame_offset;
            if ctx.frame_indexes_to_skip.contains(&current_frame) {
                continue;
            }

            let extracted = match ctx
                .extractor
                .extract(event.as_ref(), current_frame, &ctx.required_data)
            {
                Ok(fields) => fields,
                Err(e) => {
                    tracing::warn!(
                        rank = ctx.rank,
                        frame = current_frame,
                        error = %e,
                        "data extraction failed, skipping frame"
                    );
                    continue;
                }
            };

            let record = match build_record(&ctx, &mut counters, &extracted) {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!(
                        rank = ctx.rank,
                        frame = current_frame,
                        error = %e,
                        "frame processing failed, skipping frame"
                    );
                    continue;
                }
            };

            if let Some(handle) = pending_send.take() {
                let _ = handle.await;
            }
            let tx = tx.clone();
            pending_send = Some(tokio::spawn(async move {
                let _ = tx.send(WorkerMsg::Data(record)).await;
            }));
        }

        if let Err(e) = event.close() {
            tracing::warn!(rank = ctx.rank, error = %e, "failed to close event");
        }
    }

    if let Some(handle) = pending_send.take() {
        let _ = handle.await;
    }

    let termination = if shutting_down {
        WorkerMsg::Dead {
            worker_rank: ctx.rank,
        }
    } else {
        WorkerMsg::End {
            worker_rank: ctx.rank,
        }
    };
    tx.send(termination)
        .await
        .map_err(|_| OmError::Protocol("collector channel closed before termination token send".into()))?;

    Ok(())
}

/// Hit/saturation classification, grounded on
/// `onda/processing_layer/crystallography.py::process_data`.
///
/// Saturation: spec.md §8's S8 worked example (4 peaks over threshold
/// 10000, with exactly 2 exceeding it and `max_saturated_peaks=2`,
/// expects `frame_is_saturated=true`) only holds under `>=`; the
/// canonical source uses a strict `>`. Resolved in favor of the literal
/// test scenario — see DESIGN.md.
fn classify(peak_list: &om_core::PeakList, params: &ClassificationParams) -> (bool, bool) {
    let num_peaks = peak_list.num_peaks();
    let frame_is_hit =
        params.min_num_peaks_for_hit < num_peaks && num_peaks < params.max_num_peaks_for_hit;
    let num_saturated = peak_list
        .intensity
        .iter()
        .filter(|&&i| i > params.saturation_value)
        .count();
    let frame_is_saturated = num_saturated >= params.max_saturated_peaks;
    (frame_is_hit, frame_is_saturated)
}

fn extracted_f64(extracted: &std::collections::HashMap<String, ExtractedField>, name: &str) -> OmResult<f64> {
    match extracted.get(name) {
        Some(ExtractedField::Float(v)) => Ok(*v),
        Some(ExtractedField::Int(v)) => Ok(*v as f64),
        Some(_) => Err(OmError::DataExtraction(format!("'{name}' is not numeric"))),
        None => Err(OmError::DataExtraction(format!("'{name}' was not extracted"))),
    }
}

/// Build a `ProcessedRecord` from one extracted frame: calibrate/correct,
/// find peaks, classify hit/saturation, and apply the frame-sampling
/// policy for raw `detector_data`.
fn build_record(
    ctx: &WorkerContext,
    counters: &mut SendCounters,
    extracted: &std::collections::HashMap<String, ExtractedField>,
) -> OmResult<ProcessedRecord> {
    let mut image = match extracted.get("detector_data") {
        Some(ExtractedField::Image(img)) => img.clone(),
        _ => return Err(OmError::DataExtraction("'detector_data' was not extracted".into())),
    };
    let native_data_shape = image.shape;

    ctx.correction.apply(&mut image)?;
    let mut peak_list = ctx.peakfinder.find_peaks(&image);

    let (frame_is_hit, frame_is_saturated) = classify(&peak_list, &ctx.classification);

    let timestamp = extracted_f64(extracted, "timestamp").unwrap_or(0.0);
    let beam_energy = extracted_f64(extracted, "beam_energy").unwrap_or(0.0) as f32;
    let detector_distance = extracted_f64(extracted, "detector_distance").unwrap_or(0.0) as f32;

    let mut detector_data = None;
    if frame_is_hit {
        if counters.tick_hit() {
            detector_data = Some(image);
        }
    } else {
        peak_list.clear();
        if counters.tick_non_hit() {
            detector_data = Some(image);
        }
    }

    Ok(ProcessedRecord {
        timestamp,
        frame_is_hit,
        frame_is_saturated,
        hit_rate: 0.0,
        saturation_rate: 0.0,
        beam_energy,
        detector_distance,
        native_data_shape,
        geometry_is_optimized: false,
        peak_list,
        detector_data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_counters_fire_on_interval_and_reset() {
        let mut counters = SendCounters {
            hit_interval: Some(3),
            non_hit_interval: None,
            ..Default::default()
        };
        assert!(!counters.tick_hit());
        assert!(!counters.tick_hit());
        assert!(counters.tick_hit());
        assert!(!counters.tick_hit());
    }

    #[test]
    fn test_null_interval_never_fires() {
        let mut counters = SendCounters::default();
        for _ in 0..100 {
            assert!(!counters.tick_hit());
            assert!(!counters.tick_non_hit());
        }
    }

    #[test]
    fn test_s8_saturation() {
        let peaks = om_core::PeakList {
            fs: vec![0.0; 4],
            ss: vec![0.0; 4],
            intensity: vec![12000.0, 11000.0, 9000.0, 8000.0],
        };
        let params = ClassificationParams {
            min_num_peaks_for_hit: 0,
            max_num_peaks_for_hit: 100,
            saturation_value: 10000.0,
            max_saturated_peaks: 2,
        };
        let (_, is_saturated) = classify(&peaks, &params);
        assert!(is_saturated);
    }

    #[test]
    fn test_hit_classification_is_strict_on_both_bounds() {
        let params = ClassificationParams {
            min_num_peaks_for_hit: 2,
            max_num_peaks_for_hit: 5,
            saturation_value: 1e9,
            max_saturated_peaks: usize::MAX,
        };
        let make = |n: usize| om_core::PeakList {
            fs: vec![0.0; n],
            ss: vec![0.0; n],
            intensity: vec![1.0; n],
        };
        assert!(!classify(&make(2), &params).0);
        assert!(classify(&make(3), &params).0);
        assert!(classify(&make(4), &params).0);
        assert!(!classify(&make(5), &params).0);
    }
}
