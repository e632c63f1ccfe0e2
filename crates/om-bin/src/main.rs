//! `om_monitor` — the real-time reduction engine CLI.
//!
//! `om_monitor SOURCE [-i CONFIG]`. Wires a typed configuration, a
//! pluggable event source, the per-frame numeric core, and the
//! parallelization engine together, then runs the pool to completion or
//! until SIGINT.

use std::collections::HashSet;
use std::path::PathBuf;

use clap::Parser;

use common::{OmError, OmResult};
use om_broadcast::Broadcaster;
use om_config::Config;
use om_core::{BadPixelMap, Correction, Peakfinder8, Peakfinder8Params, RadiusMap};
use om_engine::{run_engine, ClassificationParams, CollectorContext, WorkerContext};
use om_source::{EventSource, Extractor, FileListSource, MockSource, MockSourceConfig};

#[derive(Parser, Debug)]
#[command(
    name = "om_monitor",
    about = "Real-time reduction engine for serial X-ray crystallography"
)]
struct Cli {
    /// Free-form string interpreted by the configured data retrieval
    /// layer: a file-list path for `file_list`, or `mock:<n>` for `mock`.
    source: String,

    /// Path to the monitor's TOML configuration file.
    #[arg(short = 'i', long = "config", default_value = "monitor.toml")]
    config: PathBuf,

    /// Number of worker tasks in the pool. Replaces `mpirun -n` from the
    /// original MPI-based engine, since this engine runs as one process.
    /// Defaults to the available parallelism, minus the collector task.
    #[arg(short = 'w', long = "num-workers")]
    num_workers: Option<usize>,
}

fn default_num_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1).max(1))
        .unwrap_or(1)
}

/// A one-line, stack-trace-free diagnostic for a fatal `OmError`, per
/// spec.md §7's "custom top-level handler" propagation policy.
fn diagnostic(err: &OmError) -> String {
    let kind = match err {
        OmError::Config(_) => "configuration error",
        OmError::Configuration(_) => "configuration error",
        OmError::Dependency(_) => "dependency error",
        OmError::MissingFunction(_) => "missing extractor function",
        OmError::DataExtraction(_) => "data extraction error",
        OmError::ReferenceArrayIo(_) => "reference array I/O error",
        OmError::Transport(_) => "transport error",
        OmError::Protocol(_) => "protocol error",
        OmError::Io(_) => "I/O error",
    };
    format!("{kind}: {err}")
}

fn register_mock_extractor() -> (Extractor, Vec<String>) {
    let mut extractor = Extractor::new();
    extractor.register("timestamp", Box::new(om_source::mock::timestamp_fn));
    extractor.register("beam_energy", Box::new(om_source::mock::beam_energy_fn));
    extractor.register(
        "detector_distance",
        Box::new(om_source::mock::detector_distance_fn),
    );
    extractor.register("detector_data", Box::new(om_source::mock::detector_data_fn));
    let names = vec![
        "timestamp".to_string(),
        "beam_energy".to_string(),
        "detector_distance".to_string(),
        "detector_data".to_string(),
    ];
    (extractor, names)
}

fn register_file_list_extractor() -> (Extractor, Vec<String>) {
    let mut extractor = Extractor::new();
    extractor.register("timestamp", Box::new(om_source::file_list::timestamp_fn));
    extractor.register(
        "detector_data",
        Box::new(om_source::file_list::detector_data_fn),
    );
    let names = vec!["timestamp".to_string(), "detector_data".to_string()];
    (extractor, names)
}

fn parse_mock_source(source: &str) -> usize {
    source
        .strip_prefix("mock:")
        .and_then(|n| n.parse::<usize>().ok())
        .unwrap_or(1000)
}

/// Build a fallback radius map centered on the detector shape. Real
/// geometry parsing (CrystFEL `.geom` files) is a non-goal (spec.md §1):
/// production deployments are expected to supply a precomputed map from
/// an external geometry-adapter crate instead.
fn synthesize_radius_map(shape: (usize, usize)) -> RadiusMap {
    let (ss_len, fs_len) = shape;
    let cy = (ss_len as f32 - 1.0) / 2.0;
    let cx = (fs_len as f32 - 1.0) / 2.0;
    let mut data = Vec::with_capacity(ss_len * fs_len);
    for ss in 0..ss_len {
        for fs in 0..fs_len {
            let dy = ss as f32 - cy;
            let dx = fs as f32 - cx;
            data.push((dy * dy + dx * dx).sqrt());
        }
    }
    RadiusMap::new(data, shape)
}

/// Load the bad-pixel map named by `[Peakfinder8PeakDetection]` out of
/// its HDF5 file. A shape mismatch against the detector's configured ASIC
/// tiling is a reference-array I/O error (spec.md §7.5), fatal at worker
/// startup.
fn load_bad_pixel_map(
    config: &om_config::Peakfinder8Config,
    shape: (usize, usize),
) -> OmResult<BadPixelMap> {
    let (data, loaded_shape) = om_core::load_u8_dataset(
        &config.bad_pixel_map_filename,
        &config.bad_pixel_map_hdf5_path,
    )?;
    if loaded_shape != shape {
        return Err(OmError::ReferenceArrayIo(format!(
            "bad pixel map shape {loaded_shape:?} does not match detector shape {shape:?}"
        )));
    }
    Ok(BadPixelMap::new(data, shape))
}

/// Load the optional dark/mask/gain arrays named by `[Correction]`.
/// `om_config::CorrectionConfig::validate` has already rejected a
/// filename present without its HDF5 path (or vice versa), so each pair
/// here is either both present or both absent.
fn load_correction(config: &om_config::CorrectionConfig, shape: (usize, usize)) -> OmResult<Correction> {
    let dark = match (&config.dark_filename, &config.dark_hdf5_path) {
        (Some(f), Some(p)) => Some(om_core::load_f32_dataset(f, p)?.0),
        _ => None,
    };
    let gain = match (&config.gain_filename, &config.gain_hdf5_path) {
        (Some(f), Some(p)) => Some(om_core::load_f32_dataset(f, p)?.0),
        _ => None,
    };
    let mask = match (&config.mask_filename, &config.mask_hdf5_path) {
        (Some(f), Some(p)) => Some(om_core::load_u8_dataset(f, p)?.0),
        _ => None,
    };
    Correction::new(shape, mask, dark, gain)
}

fn build_worker(
    rank: usize,
    cli: &Cli,
    config: &Config,
    bad_pixel_map: &BadPixelMap,
    shape: (usize, usize),
) -> OmResult<WorkerContext> {
    let correction = load_correction(&config.correction, shape)?;
    let radius_map = synthesize_radius_map(shape);
    let pf8 = &config.peakfinder8_peak_detection;
    let peakfinder = Peakfinder8::new(
        Peakfinder8Params {
            max_num_peaks: pf8.max_num_peaks,
            asic_nx: pf8.asic_nx,
            asic_ny: pf8.asic_ny,
            nasics_x: pf8.nasics_x,
            nasics_y: pf8.nasics_y,
            adc_threshold: pf8.adc_threshold,
            minimum_snr: pf8.minimum_snr,
            min_pixel_count: pf8.min_pixel_count,
            max_pixel_count: pf8.max_pixel_count,
            local_bg_radius: pf8.local_bg_radius,
            min_res: pf8.min_res as f32,
            max_res: pf8.max_res as f32,
        },
        bad_pixel_map,
        radius_map,
    );

    let (event_source, extractor, required_data): (Box<dyn EventSource>, Extractor, Vec<String>) =
        match config.onda.data_retrieval_layer.as_str() {
            "mock" => {
                let num_events = parse_mock_source(&cli.source);
                let (extractor, names) = register_mock_extractor();
                (
                    Box::new(MockSource::new(MockSourceConfig {
                        num_events,
                        shape,
                        hit_every: 10,
                    })),
                    extractor,
                    names,
                )
            }
            "file_list" => {
                let (extractor, names) = register_file_list_extractor();
                (Box::new(FileListSource::new(shape)), extractor, names)
            }
            other => {
                return Err(OmError::Dependency(format!(
                    "unknown data_retrieval_layer '{other}'"
                )))
            }
        };

    let required_data = if config.onda.required_data.is_empty() {
        required_data
    } else {
        config.onda.required_data.clone()
    };
    extractor.resolve(&required_data)?;

    let skip: HashSet<i64> = config.general.frame_indexes_to_skip.iter().copied().collect();

    Ok(WorkerContext {
        rank,
        source_string: cli.source.clone(),
        event_source,
        extractor,
        required_data,
        num_frames_in_event_to_process: config.general.num_frames_in_event_to_process,
        frame_indexes_to_skip: skip,
        correction,
        peakfinder,
        classification: ClassificationParams {
            min_num_peaks_for_hit: config.crystallography.min_num_peaks_for_hit,
            max_num_peaks_for_hit: config.crystallography.max_num_peaks_for_hit,
            saturation_value: config.crystallography.saturation_value,
            max_saturated_peaks: config.crystallography.max_saturated_peaks,
        },
        hit_frame_sending_interval: config.general.hit_frame_sending_interval,
        non_hit_frame_sending_interval: config.general.non_hit_frame_sending_interval,
    })
}

async fn run(cli: Cli) -> OmResult<()> {
    let config = Config::load_from(&cli.config)?;
    let num_workers = cli.num_workers.unwrap_or_else(default_num_workers).max(1);

    let pf8 = &config.peakfinder8_peak_detection;
    let shape = (
        pf8.nasics_y * pf8.asic_ny,
        pf8.nasics_x * pf8.asic_nx,
    );
    let bad_pixel_map = load_bad_pixel_map(pf8, shape)?;

    let mut workers = Vec::with_capacity(num_workers);
    for rank in 1..=num_workers {
        workers.push(build_worker(
            rank,
            &cli,
            &config,
            &bad_pixel_map,
            shape,
        )?);
    }

    let broadcaster = Broadcaster::bind(
        config.general.broadcast_ip.clone(),
        config.general.broadcast_port,
    )?;

    let collector_ctx = CollectorContext {
        num_workers,
        running_average_window_size: config.crystallography.running_average_window_size,
        num_events_to_accumulate: config.data_accumulator.num_events_to_accumulate,
        speed_report_interval: config.general.speed_report_interval,
        geometry_is_optimized: config.crystallography.geometry_is_optimized,
        broadcaster,
    };

    tracing::info!(num_workers, source = %cli.source, "starting om_monitor");
    let report = run_engine(workers, collector_ctx, om_engine::DEFAULT_CHANNEL_CAPACITY).await?;
    tracing::info!(
        num_collected_events = report.collector.num_collected_events,
        "monitor finished"
    );
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("dependency error: failed to start async runtime: {e}");
            std::process::exit(1);
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            eprintln!("{}", diagnostic(&e));
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_mock_source_extracts_count() {
        assert_eq!(parse_mock_source("mock:500"), 500);
        assert_eq!(parse_mock_source("mock:bogus"), 1000);
        assert_eq!(parse_mock_source("not-mock"), 1000);
    }

    #[test]
    fn test_default_num_workers_is_at_least_one() {
        assert!(default_num_workers() >= 1);
    }
}
